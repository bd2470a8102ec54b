//! Registry of the signature images users are allowed to stamp.
//!
//! Each user id maps to a [`TrustRecord`] holding the file name of the user's
//! signature image and the SHA-256 of its contents at registration time.

use std::collections::{BTreeMap, HashMap};
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tempfile::NamedTempFile;

use crate::{audit, Error, Result};

/// Files are hashed in blocks of this size.
const HASH_BLOCK_SIZE: usize = 4096;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustRecord {
    pub image_filename: String,
    /// Lowercase hex SHA-256 of the image file.
    pub image_hash: String,
    pub registered_at: String,
}

/// Key-value storage for trust records.
pub trait TrustStore: Send + Sync {
    fn get(&self, user_id: &str) -> Result<Option<TrustRecord>>;

    /// Inserts or replaces the record of `user_id`, returning the replaced
    /// record, if any.
    fn put(&self, user_id: &str, record: TrustRecord) -> Result<Option<TrustRecord>>;
}

/// Trust store persisted as a single JSON object mapping user ids to records.
///
/// The file is read on every lookup. Writers in this process are serialized,
/// and every write replaces the file atomically, so readers never see a torn
/// file.
pub struct JsonFileTrustStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl JsonFileTrustStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn load(&self) -> Result<BTreeMap<String, TrustRecord>> {
        let file = match File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => return Err(e.into()),
        };
        Ok(serde_json::from_reader(BufReader::new(file))?)
    }

    fn store(&self, records: &BTreeMap<String, TrustRecord>) -> Result<()> {
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };

        let mut tmp = NamedTempFile::new_in(dir)?;
        {
            let mut writer = BufWriter::new(tmp.as_file_mut());
            serde_json::to_writer_pretty(&mut writer, records)?;
            writer.write_all(b"\n")?;
            writer.flush()?;
        }
        tmp.as_file().sync_all()?;
        tmp.persist(&self.path).map_err(|e| e.error)?;
        Ok(())
    }
}

impl TrustStore for JsonFileTrustStore {
    fn get(&self, user_id: &str) -> Result<Option<TrustRecord>> {
        Ok(self.load()?.remove(user_id))
    }

    fn put(&self, user_id: &str, record: TrustRecord) -> Result<Option<TrustRecord>> {
        let _guard = self.write_lock.lock();
        let mut records = self.load()?;
        let previous = records.insert(user_id.to_owned(), record);
        self.store(&records)?;
        Ok(previous)
    }
}

#[derive(Default)]
pub struct InMemoryTrustStore {
    records: RwLock<HashMap<String, TrustRecord>>,
}

impl InMemoryTrustStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl TrustStore for InMemoryTrustStore {
    fn get(&self, user_id: &str) -> Result<Option<TrustRecord>> {
        Ok(self.records.read().get(user_id).cloned())
    }

    fn put(&self, user_id: &str, record: TrustRecord) -> Result<Option<TrustRecord>> {
        Ok(self.records.write().insert(user_id.to_owned(), record))
    }
}

/// Outcome of [`register`].
#[derive(Debug)]
pub struct Registration {
    pub user_id: String,
    pub record: TrustRecord,
    /// The record this registration replaced.
    pub previous: Option<TrustRecord>,
}

/// Records the current hash of `image_filename`, found inside `images_dir`,
/// as the trusted signature image of `user_id`.
///
/// Registering again overwrites the previous record.
pub fn register(
    store: &dyn TrustStore,
    images_dir: &Path,
    user_id: &str,
    image_filename: &str,
) -> Result<Registration> {
    let raw_user_id = user_id;
    let user_id = sanitize_user_id(raw_user_id);
    if user_id.is_empty() {
        return Err(Error::InvalidUserId(raw_user_id.to_owned()));
    }
    let image_path = image_path(images_dir, image_filename)?;
    if !image_path.is_file() {
        return Err(Error::MissingAsset(image_path));
    }

    let record = TrustRecord {
        image_filename: image_filename.to_owned(),
        image_hash: hash_file(&image_path)?,
        registered_at: chrono::Utc::now().date_naive().to_string(),
    };
    let previous = store.put(&user_id, record.clone())?;
    audit::log_user_registered(&user_id, &record, previous.as_ref());

    Ok(Registration {
        user_id,
        record,
        previous,
    })
}

/// Keeps only the characters of a user id that are safe to use as a key and
/// inside file names: alphanumerics, `_` and `-`.
pub fn sanitize_user_id(user_id: &str) -> String {
    user_id
        .chars()
        .filter(|c| c.is_alphanumeric() || *c == '_' || *c == '-')
        .collect()
}

/// Resolves a registered image file name inside `images_dir`.
///
/// The name must be a bare file name, so a record can never point outside
/// the image directory.
pub fn image_path(images_dir: &Path, image_filename: &str) -> Result<PathBuf> {
    let name = Path::new(image_filename);
    if image_filename.is_empty() || name.file_name() != Some(name.as_os_str()) {
        return Err(Error::InvalidImageName(image_filename.to_owned()));
    }
    Ok(images_dir.join(name))
}

/// Lowercase hex SHA-256 of a file, read in fixed size blocks.
pub fn hash_file(path: &Path) -> Result<String> {
    let mut file = File::open(path)?;
    let mut hasher = Sha256::new();
    let mut block = [0u8; HASH_BLOCK_SIZE];
    loop {
        let read = match file.read(&mut block) {
            Ok(0) => break,
            Ok(read) => read,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        hasher.update(&block[..read]);
    }
    Ok(hex::encode(hasher.finalize()))
}

/// Lowercase hex SHA-256 of an in-memory buffer.
pub fn hash_bytes(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
