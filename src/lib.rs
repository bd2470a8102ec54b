#![doc = include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/README.md"))]

#[cfg(feature = "openssl")]
pub mod openssl;
#[cfg(feature = "server")]
pub mod server;

pub mod audit;
pub mod config;
pub mod integrity;
pub mod metadata;
pub mod signer;
pub mod stamp;
pub mod trust_store;

#[cfg(test)]
mod test_util;

use std::path::PathBuf;

use lopdf::Document;
use regex::bytes::Regex;
use thiserror::Error;

pub use config::Config;
pub use integrity::{IntegrityVerifier, VerifiedImage};
pub use metadata::{SealClaims, SignatureMetadata};
pub use signer::{SecureSigner, SignatureRequest, SignedPdf};
pub use stamp::SignaturePlacement;
pub use trust_store::{InMemoryTrustStore, JsonFileTrustStore, TrustRecord, TrustStore};

#[derive(Error, Debug)]
pub enum Error {
    #[error("invalid credentials: wrong passphrase or unreadable private key")]
    AuthenticationFailure,
    #[error("user {0:?} has no registered signature image")]
    UnknownUser(String),
    #[error("registered signature image {} is missing", .0.display())]
    MissingAsset(PathBuf),
    #[error("signature image of user {user:?} does not match its registered hash")]
    IntegrityViolation {
        user: String,
        expected: String,
        actual: String,
    },
    #[error("user id {0:?} has no usable characters")]
    InvalidUserId(String),
    #[error("image file name {0:?} must not contain directory components")]
    InvalidImageName(String),
    #[error("missing form field {0:?}")]
    MissingField(&'static str),
    #[error("invalid signature placements")]
    InvalidPlacements(#[source] serde_json::Error),
    #[error("signature image could not be decoded")]
    ImageDecode(#[from] image::ImageError),
    #[error("signature image has no pixels")]
    EmptyImage,
    #[error("PDF parsing error")]
    Parsing(#[from] lopdf::Error),
    #[error("trust store is not valid JSON")]
    TrustStoreFormat(#[from] serde_json::Error),
    #[error("configuration error")]
    Config(#[from] toml::de::Error),
    #[error("I/O error")]
    Io(#[from] std::io::Error),
    #[cfg(feature = "openssl")]
    #[error("openssl error")]
    OpenSsl(#[from] ::openssl::error::ErrorStack),
    #[error("document carries no metadata signature")]
    Unsigned,
    #[error("invalid signed range")]
    InvalidRange,
    #[error("signed range does not end at the end of a PDF file")]
    WrongRangeEnd,
    #[error("can not guarantee the contents of the signed document were not changed")]
    PossibleContentChange,
    #[error("metadata signature does not match the signed bytes")]
    BadSignature,
}

pub type Result<T> = std::result::Result<T, Error>;

/// Coarse classification of [`Error`], as seen by the caller of the signing
/// workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthenticationFailure,
    UnknownUser,
    MissingAsset,
    IntegrityViolation,
    InvalidRequest,
    Unhandled,
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::AuthenticationFailure => ErrorKind::AuthenticationFailure,
            Error::UnknownUser(_) => ErrorKind::UnknownUser,
            Error::MissingAsset(_) => ErrorKind::MissingAsset,
            Error::IntegrityViolation { .. } => ErrorKind::IntegrityViolation,
            Error::MissingField(_) | Error::InvalidUserId(_) => ErrorKind::InvalidRequest,
            _ => ErrorKind::Unhandled,
        }
    }
}

/// Unlocks private keys, proving the caller knows the key passphrase.
pub trait IdentityVerifier {
    type Key: SigningKey;

    /// Loads a PEM encoded private key protected by `passphrase`.
    ///
    /// A wrong passphrase and malformed key material are both reported as
    /// [`Error::AuthenticationFailure`].
    fn unlock(&self, key_pem: &[u8], passphrase: &str) -> Result<Self::Key>;
}

/// A private key able to produce the metadata signature of a document.
pub trait SigningKey {
    /// Signs `data` with RSA-PSS (maximum salt length) over SHA-256.
    fn sign(&self, data: &[u8]) -> Result<Vec<u8>>;
}

/// Checks a metadata signature against the bytes it claims to cover.
pub trait SignatureVerifier {
    fn verify(&self, signature: &[u8], signed_data: &[u8]) -> Result<()>;
}

/// Verifies a document sealed by [`SecureSigner`].
///
/// The signed prefix of the file must be intact, and the only thing appended
/// after it must be the information dictionary holding the signature. The
/// returned claims are the ones inside the signed prefix; a seal whose
/// appended copy of the claims differs from them is rejected.
pub fn verify_signed_pdf(
    signed_pdf_bytes: impl AsRef<[u8]>,
    verifier: impl SignatureVerifier,
) -> Result<SignatureMetadata> {
    let pdf_bytes = signed_pdf_bytes.as_ref();

    let doc = Document::load_mem(pdf_bytes)?;
    let seal = metadata::read_signature_metadata(&doc)?;

    if seal.signed_length >= pdf_bytes.len() {
        return Err(Error::InvalidRange);
    }
    let signed = &pdf_bytes[..seal.signed_length];
    if !pdf_ends_with_eof(signed) {
        return Err(Error::WrongRangeEnd);
    }

    // Everything in the signed revision must have survived untouched in the
    // final one. The increment may only add the info dictionary and its own
    // cross-reference stream.
    let previous = Document::load_mem(signed)?;
    if previous.trailer.get(b"Root")? != doc.trailer.get(b"Root")? {
        return Err(Error::PossibleContentChange);
    }
    for (id, obj) in previous.objects.iter() {
        if doc.objects.get(id) != Some(obj) {
            return Err(Error::PossibleContentChange);
        }
    }
    let info_id = doc.trailer.get(b"Info")?.as_reference()?;
    if previous.objects.contains_key(&info_id) {
        return Err(Error::PossibleContentChange);
    }
    let unexpected_addition = doc.objects.iter().any(|(id, obj)| {
        !previous.objects.contains_key(id) && *id != info_id && obj.type_name().ok() != Some("XRef")
    });
    if unexpected_addition {
        return Err(Error::PossibleContentChange);
    }

    if metadata::read_claims(&previous)? != seal.claims {
        return Err(Error::PossibleContentChange);
    }

    verifier.verify(&seal.signature, signed)?;

    Ok(seal)
}

struct ExactArrayOrNone<T, const N: usize>(Option<[T; N]>);

impl<T, const N: usize> FromIterator<T> for ExactArrayOrNone<T, N> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut iter = iter.into_iter();
        let result = array_init::from_iter(&mut iter);
        let result = if iter.next().is_none() { result } else { None };
        ExactArrayOrNone(result)
    }
}

lazy_static::lazy_static! {
    static ref EOF_REGEX: Regex = Regex::new(r"(?:\r\n|\r|\n)%%EOF[ \t]*(?:\r\n|\r|\n)?$").unwrap();
}

/// Tests if the PDF ends with the %%EOF marker.
fn pdf_ends_with_eof(pdf_bytes: &[u8]) -> bool {
    EOF_REGEX.is_match(pdf_bytes)
}
