//! Checks a user's signature image against the hash recorded in the trust
//! store.

use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use crate::trust_store::{self, TrustStore};
use crate::{audit, Error, Result};

/// A signature image whose contents matched the registered hash.
///
/// `bytes` are exactly the bytes that were hashed, so stamping them can not
/// race with a later change of the file on disk.
#[derive(Debug)]
pub struct VerifiedImage {
    pub path: PathBuf,
    pub bytes: Vec<u8>,
    pub hash: String,
}

pub struct IntegrityVerifier {
    images_dir: PathBuf,
}

impl IntegrityVerifier {
    pub fn new(images_dir: impl Into<PathBuf>) -> Self {
        Self {
            images_dir: images_dir.into(),
        }
    }

    pub fn images_dir(&self) -> &Path {
        &self.images_dir
    }

    /// Loads the registered image of `user_id` and checks its hash.
    ///
    /// Fails with [`Error::UnknownUser`] when there is no trust record,
    /// [`Error::MissingAsset`] when the image file is gone and
    /// [`Error::IntegrityViolation`] when its contents changed.
    pub fn verify(&self, store: &dyn TrustStore, user_id: &str) -> Result<VerifiedImage> {
        let Some(record) = store.get(user_id)? else {
            audit::log_unknown_user(user_id);
            return Err(Error::UnknownUser(user_id.to_owned()));
        };

        let path = trust_store::image_path(&self.images_dir, &record.image_filename)?;
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                audit::log_missing_asset(user_id, &record.image_filename);
                return Err(Error::MissingAsset(path));
            }
            Err(e) => return Err(e.into()),
        };

        let hash = trust_store::hash_bytes(&bytes);
        if hash.as_bytes() != record.image_hash.as_bytes() {
            audit::log_integrity_violation(
                user_id,
                &record.image_filename,
                &record.image_hash,
                &hash,
            );
            return Err(Error::IntegrityViolation {
                user: user_id.to_owned(),
                expected: record.image_hash,
                actual: hash,
            });
        }

        tracing::debug!(user_id, path = %path.display(), "signature image integrity verified");
        Ok(VerifiedImage { path, bytes, hash })
    }
}
