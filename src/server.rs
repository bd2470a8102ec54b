//! HTTP surface of the signer. It is enabled by the `server` feature.
//!
//! A single route, `POST /secure-sign-pdf`, takes a multipart form with the
//! fields `file`, `private_key`, `password`, `signatures` and `user_id`, and
//! answers with the sealed PDF as an attachment.

use std::sync::Arc;

use axum::extract::multipart::MultipartError;
use axum::extract::{DefaultBodyLimit, Multipart, State};
use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::post;
use axum::{Json, Router};
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

use crate::openssl::OpenSslIdentity;
use crate::stamp::SignaturePlacement;
use crate::{
    Config, Error, ErrorKind, IntegrityVerifier, JsonFileTrustStore, SecureSigner,
    SignatureRequest,
};

pub const SIGN_ROUTE: &str = "/secure-sign-pdf";

const INTEGRITY_ALERT: &str =
    "security alert: the registered signature image failed its integrity check";
const INTERNAL_ERROR: &str = "internal server error";

pub type OpenSslSigner = SecureSigner<OpenSslIdentity>;

/// Builds the signer described by `config`, backed by its JSON trust store.
pub fn signer_from_config(config: &Config) -> OpenSslSigner {
    SecureSigner::new(
        Arc::new(JsonFileTrustStore::new(&config.trust_store)),
        IntegrityVerifier::new(&config.images_dir),
        OpenSslIdentity,
    )
    .with_document_info(&config.producer, &config.title)
}

#[derive(Clone)]
struct AppState {
    signer: Arc<OpenSslSigner>,
    content_disposition: HeaderValue,
}

pub fn router(signer: Arc<OpenSslSigner>, config: &Config) -> Router {
    let state = AppState {
        signer,
        content_disposition: attachment(&config.download_name),
    };

    Router::new()
        .route(SIGN_ROUTE, post(secure_sign_pdf))
        .layer(DefaultBodyLimit::max(config.max_upload_bytes))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

fn attachment(file_name: &str) -> HeaderValue {
    let file_name: String = file_name
        .chars()
        .filter(|c| (c.is_ascii_graphic() || *c == ' ') && !matches!(c, '"' | '\\'))
        .collect();
    HeaderValue::from_str(&format!("attachment; filename=\"{file_name}\""))
        .unwrap_or_else(|_| HeaderValue::from_static("attachment"))
}

async fn secure_sign_pdf(
    State(state): State<AppState>,
    multipart: Multipart,
) -> Result<Response, ApiError> {
    let request = SignForm::read(multipart).await?.into_request()?;

    let signer = state.signer.clone();
    let signed = tokio::task::spawn_blocking(move || signer.sign(request))
        .await
        .map_err(|e| ApiError::Task(e.to_string()))??;

    Ok((
        [
            (header::CONTENT_TYPE, HeaderValue::from_static("application/pdf")),
            (header::CONTENT_DISPOSITION, state.content_disposition),
        ],
        signed.bytes,
    )
        .into_response())
}

/// The raw form fields, as sent by the client.
#[derive(Default)]
struct SignForm {
    file: Option<Vec<u8>>,
    private_key: Option<Vec<u8>>,
    password: Option<String>,
    signatures: Option<String>,
    user_id: Option<String>,
}

impl SignForm {
    async fn read(mut multipart: Multipart) -> Result<Self, MultipartError> {
        let mut form = SignForm::default();
        while let Some(field) = multipart.next_field().await? {
            let Some(name) = field.name().map(str::to_owned) else {
                continue;
            };
            match name.as_str() {
                "file" => form.file = Some(field.bytes().await?.to_vec()),
                "private_key" => form.private_key = Some(field.bytes().await?.to_vec()),
                "password" => form.password = Some(field.text().await?),
                "signatures" => form.signatures = Some(field.text().await?),
                "user_id" => form.user_id = Some(field.text().await?),
                other => tracing::debug!(field = other, "ignoring unexpected form field"),
            }
        }
        Ok(form)
    }

    fn into_request(self) -> crate::Result<SignatureRequest> {
        let signatures = self.signatures.ok_or(Error::MissingField("signatures"))?;
        Ok(SignatureRequest {
            pdf: self.file.ok_or(Error::MissingField("file"))?,
            private_key_pem: self.private_key.ok_or(Error::MissingField("private_key"))?,
            passphrase: self.password.ok_or(Error::MissingField("password"))?,
            user_id: self.user_id.ok_or(Error::MissingField("user_id"))?,
            placements: SignaturePlacement::parse_list(&signatures)?,
        })
    }
}

enum ApiError {
    Signing(Error),
    Form(MultipartError),
    Task(String),
}

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError::Signing(e)
    }
}

impl From<MultipartError> for ApiError {
    fn from(e: MultipartError) -> Self {
        ApiError::Form(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, detail) = match self {
            ApiError::Signing(e) => match e.kind() {
                ErrorKind::AuthenticationFailure => (StatusCode::UNAUTHORIZED, e.to_string()),
                ErrorKind::UnknownUser => (StatusCode::NOT_FOUND, e.to_string()),
                ErrorKind::IntegrityViolation => (StatusCode::FORBIDDEN, INTEGRITY_ALERT.to_owned()),
                ErrorKind::InvalidRequest => (StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
                ErrorKind::MissingAsset | ErrorKind::Unhandled => {
                    tracing::error!("signing request failed: {:#}", anyhow::Error::new(e));
                    (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR.to_owned())
                }
            },
            ApiError::Form(e) => (e.status(), e.body_text()),
            ApiError::Task(e) => {
                tracing::error!(error = %e, "signing task did not complete");
                (StatusCode::INTERNAL_SERVER_ERROR, INTERNAL_ERROR.to_owned())
            }
        };

        (status, Json(serde_json::json!({ "detail": detail }))).into_response()
    }
}
