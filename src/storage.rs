//! Durable key/value storage for traces.
//!
//! The [TraceStore] trait is deliberately tiny so that anything from a
//! directory on disk to browser local storage can sit behind it. Two stores
//! ship with the crate: [MemoryStore] and [DirStore]. Both can be given a byte
//! quota, which is what makes the stroke cache's cleanup path reachable.

use std::{
    borrow::Cow,
    collections::{BTreeMap, BTreeSet},
    fmt, fs, io,
    path::{Path, PathBuf},
};

/// Failures a [TraceStore] reports.
#[derive(Debug)]
pub enum StorageError {
    /// Writing `key` would exceed the store's quota.
    Quota {
        /// Key being written.
        key: String,
        /// Bytes the write needed.
        requested: usize,
        /// Bytes left under the quota.
        available: usize,
    },
    /// The backing medium failed.
    IoError(io::Error),
}

impl fmt::Display for StorageError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            StorageError::Quota {
                key,
                requested,
                available,
            } => Cow::from(format!(
                "quota exceeded writing '{}': {} bytes requested, {} available",
                key, requested, available
            )),
            StorageError::IoError(error) => Cow::from(format!("io error: {}", error)),
        };
        write!(f, "{}", msg)
    }
}

impl std::error::Error for StorageError {}

impl From<io::Error> for StorageError {
    fn from(value: io::Error) -> Self {
        Self::IoError(value)
    }
}

impl StorageError {
    /// Whether this is the recoverable out-of-space case.
    pub fn is_quota(&self) -> bool {
        matches!(self, StorageError::Quota { .. })
    }
}

/// A durable key/value store.
pub trait TraceStore: Send {
    /// The value stored under `key`, if any.
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError>;
    /// Store `value` under `key`, replacing what was there.
    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError>;
    /// Remove `key`. Removing a missing key is not an error.
    fn delete(&mut self, key: &str) -> Result<(), StorageError>;
    /// Every key currently stored.
    fn list_keys(&self) -> Result<BTreeSet<String>, StorageError>;
}

fn check_quota(
    quota: Option<usize>,
    key: &str,
    used_by_others: usize,
    requested: usize,
) -> Result<(), StorageError> {
    match quota {
        Some(quota) if used_by_others + requested > quota => Err(StorageError::Quota {
            key: key.to_owned(),
            requested,
            available: quota.saturating_sub(used_by_others),
        }),
        _ => Ok(()),
    }
}

/// A [TraceStore] that lives in memory.
#[derive(Debug, Default, Clone)]
pub struct MemoryStore {
    entries: BTreeMap<String, Vec<u8>>,
    quota: Option<usize>,
}

impl MemoryStore {
    /// An empty store without a quota.
    pub fn new() -> Self {
        Self::default()
    }

    /// A store that refuses writes once the total value size would exceed
    /// `quota` bytes.
    pub fn with_quota(quota: usize) -> Self {
        Self {
            entries: BTreeMap::new(),
            quota: Some(quota),
        }
    }

    /// Total bytes held.
    pub fn used_bytes(&self) -> usize {
        self.entries.values().map(Vec::len).sum()
    }
}

impl TraceStore for MemoryStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        Ok(self.entries.get(key).cloned())
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        let others = self.used_bytes() - self.entries.get(key).map_or(0, Vec::len);
        check_quota(self.quota, key, others, value.len())?;
        self.entries.insert(key.to_owned(), value.to_vec());
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        self.entries.remove(key);
        Ok(())
    }

    fn list_keys(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.entries.keys().cloned().collect())
    }
}

const EXTENSION: &str = "ron";

/// Keys become file names; anything outside `[A-Za-z0-9_-]` is `%XX`
/// escaped so arbitrary device names are safe on every filesystem.
fn encode_key(key: &str) -> String {
    let mut out = String::with_capacity(key.len());
    for b in key.bytes() {
        if b.is_ascii_alphanumeric() || b == b'-' || b == b'_' {
            out.push(b as char);
        } else {
            out.push_str(&format!("%{:02X}", b));
        }
    }
    out
}

fn decode_key(name: &str) -> Option<String> {
    let bytes = name.as_bytes();
    let mut out = Vec::with_capacity(bytes.len());
    let mut i = 0;
    while i < bytes.len() {
        if bytes[i] == b'%' {
            let hex = name.get(i + 1..i + 3)?;
            out.push(u8::from_str_radix(hex, 16).ok()?);
            i += 3;
        } else {
            out.push(bytes[i]);
            i += 1;
        }
    }
    String::from_utf8(out).ok()
}

/// A [TraceStore] keeping one file per key in a directory.
#[derive(Debug, Clone)]
pub struct DirStore {
    root: PathBuf,
    quota: Option<usize>,
}

impl DirStore {
    /// Open (creating if needed) a store rooted at `root`.
    pub fn open(root: impl AsRef<Path>) -> Result<Self, StorageError> {
        let root = root.as_ref().to_path_buf();
        fs::create_dir_all(&root)?;
        Ok(Self { root, quota: None })
    }

    /// Cap the total size of all stored values.
    pub fn with_quota(self, quota: usize) -> Self {
        Self {
            quota: Some(quota),
            ..self
        }
    }

    /// The directory the traces live in.
    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(format!("{}.{}", encode_key(key), EXTENSION))
    }

    fn entries(&self) -> Result<Vec<(String, u64)>, StorageError> {
        let mut out = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let entry = entry?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(EXTENSION) {
                continue;
            }
            let Some(key) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(decode_key)
            else {
                continue;
            };
            out.push((key, entry.metadata()?.len()));
        }
        Ok(out)
    }
}

impl TraceStore for DirStore {
    fn get(&self, key: &str) -> Result<Option<Vec<u8>>, StorageError> {
        match fs::read(self.path_for(key)) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn set(&mut self, key: &str, value: &[u8]) -> Result<(), StorageError> {
        if self.quota.is_some() {
            let others: u64 = self
                .entries()?
                .into_iter()
                .filter(|(k, _)| k != key)
                .map(|(_, len)| len)
                .sum();
            check_quota(self.quota, key, others as usize, value.len())?;
        }
        fs::write(self.path_for(key), value)?;
        Ok(())
    }

    fn delete(&mut self, key: &str) -> Result<(), StorageError> {
        match fs::remove_file(self.path_for(key)) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    fn list_keys(&self) -> Result<BTreeSet<String>, StorageError> {
        Ok(self.entries()?.into_iter().map(|(k, _)| k).collect())
    }
}
