//! Service configuration, read from an optional TOML file.

use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::signer::{DEFAULT_PRODUCER, DEFAULT_TITLE};
use crate::Result;

pub const DEFAULT_MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// Settings of the signing service. Every key is optional in the file.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Config {
    pub bind: SocketAddr,
    /// JSON file mapping user ids to their registered images.
    pub trust_store: PathBuf,
    /// Directory holding the registered signature images.
    pub images_dir: PathBuf,
    /// Durable JSON audit log. Audit events only go to the regular log when
    /// unset.
    pub audit_log: Option<PathBuf>,
    /// Limit on the whole multipart request body.
    pub max_upload_bytes: usize,
    pub producer: String,
    pub title: String,
    /// File name suggested to clients in `Content-Disposition`.
    pub download_name: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 8000)),
            trust_store: PathBuf::from("users_db.json"),
            images_dir: PathBuf::from("signatures"),
            audit_log: None,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            producer: DEFAULT_PRODUCER.to_owned(),
            title: DEFAULT_TITLE.to_owned(),
            download_name: "signed_document.pdf".to_owned(),
        }
    }
}

impl Config {
    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Reads the file at `path`, or returns the defaults when there is none.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        match path {
            Some(path) => {
                tracing::debug!(path = %path.display(), "loading configuration");
                Self::from_toml(&std::fs::read_to_string(path)?)
            }
            None => Ok(Self::default()),
        }
    }
}
