//! The signing workflow: authenticate, check the image, stamp, seal.

use std::sync::Arc;

use chrono::{DateTime, Local, SecondsFormat};
use lopdf::Document;

use crate::integrity::IntegrityVerifier;
use crate::metadata::{self, SealClaims, SignatureMetadata};
use crate::stamp::{self, SignaturePlacement, StampImage};
use crate::trust_store::{sanitize_user_id, TrustStore};
use crate::{audit, Error, ErrorKind, IdentityVerifier, Result, SigningKey};

pub const DEFAULT_PRODUCER: &str = "pdf-seal secure signer 1.0";
pub const DEFAULT_TITLE: &str = "Officially Signed Document";

/// Number of image hash characters shown in the stamp caption.
const CAPTION_HASH_LEN: usize = 16;

pub struct SignatureRequest {
    pub pdf: Vec<u8>,
    pub private_key_pem: Vec<u8>,
    pub passphrase: String,
    pub placements: Vec<SignaturePlacement>,
    pub user_id: String,
}

impl std::fmt::Debug for SignatureRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SignatureRequest")
            .field("pdf_len", &self.pdf.len())
            .field("placements", &self.placements)
            .field("user_id", &self.user_id)
            .finish_non_exhaustive()
    }
}

#[derive(Debug)]
pub struct SignedPdf {
    pub bytes: Vec<u8>,
    pub metadata: SignatureMetadata,
    /// 1-based numbers of the pages that received a stamp.
    pub stamped_pages: Vec<u32>,
}

pub struct SecureSigner<V> {
    store: Arc<dyn TrustStore>,
    integrity: IntegrityVerifier,
    identity: V,
    producer: String,
    title: String,
}

impl<V: IdentityVerifier> SecureSigner<V> {
    pub fn new(store: Arc<dyn TrustStore>, integrity: IntegrityVerifier, identity: V) -> Self {
        Self {
            store,
            integrity,
            identity,
            producer: DEFAULT_PRODUCER.to_owned(),
            title: DEFAULT_TITLE.to_owned(),
        }
    }

    /// Overrides the `Producer` and `Title` written into sealed documents.
    pub fn with_document_info(mut self, producer: impl Into<String>, title: impl Into<String>) -> Self {
        self.producer = producer.into();
        self.title = title.into();
        self
    }

    pub fn store(&self) -> &dyn TrustStore {
        self.store.as_ref()
    }

    /// Runs the whole workflow. The first failing step aborts it:
    ///
    /// 1. unlock the private key ([`crate::Error::AuthenticationFailure`]);
    /// 2. check the user's registered image ([`crate::Error::UnknownUser`],
    ///    [`crate::Error::MissingAsset`], [`crate::Error::IntegrityViolation`]);
    /// 3. stamp the image on the requested pages;
    /// 4. write the seal claims, serialize, sign the serialized bytes and
    ///    append the signature.
    #[tracing::instrument(skip_all, fields(user_id = %request.user_id))]
    pub fn sign(&self, request: SignatureRequest) -> Result<SignedPdf> {
        let user_id = sanitize_user_id(&request.user_id);
        if user_id.is_empty() {
            return Err(Error::MissingField("user_id"));
        }

        let key = match self
            .identity
            .unlock(&request.private_key_pem, &request.passphrase)
        {
            Ok(key) => key,
            Err(e) => {
                if e.kind() == ErrorKind::AuthenticationFailure {
                    audit::log_authentication_failure(&user_id);
                }
                return Err(e);
            }
        };
        tracing::debug!("private key unlocked");

        let image = self.integrity.verify(self.store(), &user_id)?;
        let stamp_image = StampImage::decode(&image.bytes).map_err(|e| {
            tracing::error!(error = %e, path = %image.path.display(), "signature image can not be drawn");
            e
        })?;

        let now = Local::now();
        let mut doc = Document::load_mem(&request.pdf)?;
        let stamped_pages = stamp::stamp_document(
            &mut doc,
            &request.placements,
            &stamp_image,
            &caption(&now, &image.hash),
        )?;
        tracing::debug!(?stamped_pages, "document stamped");

        let claims = SealClaims {
            producer: self.producer.clone(),
            title: self.title.clone(),
            signer_identity: user_id,
            image_hash: image.hash,
            signed_at: now.to_rfc3339_opts(SecondsFormat::Secs, false),
        };
        metadata::write_claims(&mut doc, &claims)?;

        let mut signed = Vec::new();
        doc.save_to(&mut signed)?;
        let signed_length = signed.len();
        let signature = key.sign(&signed)?;
        let bytes = metadata::append_seal(signed, &signature)?;

        audit::log_document_signed(
            &claims.signer_identity,
            &claims.image_hash,
            signed_length,
            &stamped_pages,
        );

        let seal = SignatureMetadata {
            claims,
            signature,
            signed_length,
        };
        Ok(SignedPdf {
            bytes,
            metadata: seal,
            stamped_pages,
        })
    }
}

fn caption(now: &DateTime<Local>, image_hash: &str) -> String {
    let short_hash = image_hash.get(..CAPTION_HASH_LEN).unwrap_or(image_hash);
    format!(
        "Digitally Signed: {} | SHA-256 {short_hash}",
        now.format("%Y-%m-%d %H:%M:%S")
    )
}
