//! In-memory disk implementation.

use crate::{Disk, guess_mime_type, join_path, parent_path};
use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::RwLock;
use vermeer_error::{StorageError, StorageErrorKind, VermeerResult};

#[derive(Debug, Clone)]
struct MemoryBlob {
    contents: Vec<u8>,
    modified: DateTime<Utc>,
}

/// Disk backed by an in-process ordered map.
///
/// Directories exist implicitly while they contain at least one blob.
/// Modification times can be overridden with [`MemoryDisk::touch`], which
/// makes expiry-driven behaviour testable without sleeping.
#[derive(Debug, Default)]
pub struct MemoryDisk {
    blobs: RwLock<BTreeMap<String, MemoryBlob>>,
    url: Option<String>,
}

impl MemoryDisk {
    /// Create an empty in-memory disk.
    pub fn new() -> Self {
        Self::default()
    }

    /// Serve blobs below this base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Override the modification time of an existing blob.
    ///
    /// Returns `false` if no blob exists at `path`.
    pub fn touch(&self, path: &str, modified: DateTime<Utc>) -> bool {
        match self.blobs.write() {
            Ok(mut blobs) => match blobs.get_mut(path.trim_matches('/')) {
                Some(blob) => {
                    blob.modified = modified;
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    /// Number of blobs stored.
    pub fn len(&self) -> usize {
        self.blobs.read().map(|b| b.len()).unwrap_or(0)
    }

    /// Whether the disk holds no blobs.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn poisoned() -> StorageError {
        StorageError::new(StorageErrorKind::Unavailable(
            "memory disk lock poisoned".to_string(),
        ))
    }

    fn with_blob<T>(&self, path: &str, f: impl FnOnce(&MemoryBlob) -> T) -> VermeerResult<T> {
        let blobs = self.blobs.read().map_err(|_| Self::poisoned())?;
        blobs
            .get(path.trim_matches('/'))
            .map(f)
            .ok_or_else(|| StorageError::new(StorageErrorKind::FileRead(path.to_string())).into())
    }

    /// Every ancestor directory of every blob.
    fn all_directories(blobs: &BTreeMap<String, MemoryBlob>) -> BTreeSet<String> {
        let mut dirs = BTreeSet::new();
        for path in blobs.keys() {
            let mut dir = parent_path(path);
            while !dir.is_empty() {
                dirs.insert(dir.to_string());
                dir = parent_path(dir);
            }
        }
        dirs
    }

    fn is_listed(dir: &str, entry: &str, recursive: bool) -> bool {
        let dir = dir.trim_matches('/');
        let parent = parent_path(entry);
        if recursive {
            dir.is_empty() || parent == dir || parent.starts_with(&format!("{}/", dir))
        } else {
            parent == dir
        }
    }
}

#[async_trait::async_trait]
impl Disk for MemoryDisk {
    async fn put(&self, path: &str, contents: &[u8]) -> VermeerResult<()> {
        let path = path.trim_matches('/');
        if path.is_empty() {
            return Err(StorageError::new(StorageErrorKind::InvalidPath(path.to_string())).into());
        }
        let mut blobs = self.blobs.write().map_err(|_| Self::poisoned())?;
        blobs.insert(
            path.to_string(),
            MemoryBlob {
                contents: contents.to_vec(),
                modified: Utc::now(),
            },
        );
        Ok(())
    }

    async fn get(&self, path: &str) -> VermeerResult<Vec<u8>> {
        self.with_blob(path, |blob| blob.contents.clone())
    }

    async fn exists(&self, path: &str) -> VermeerResult<bool> {
        let blobs = self.blobs.read().map_err(|_| Self::poisoned())?;
        Ok(blobs.contains_key(path.trim_matches('/')))
    }

    async fn delete(&self, paths: &[String]) -> VermeerResult<()> {
        let mut blobs = self.blobs.write().map_err(|_| Self::poisoned())?;
        for path in paths {
            blobs.remove(path.trim_matches('/'));
        }
        Ok(())
    }

    async fn delete_directory(&self, path: &str) -> VermeerResult<()> {
        let prefix = format!("{}/", path.trim_matches('/'));
        if prefix == "/" {
            return Err(StorageError::new(StorageErrorKind::InvalidPath(
                "refusing to delete disk root".to_string(),
            ))
            .into());
        }
        let mut blobs = self.blobs.write().map_err(|_| Self::poisoned())?;
        blobs.retain(|key, _| !key.starts_with(&prefix));
        Ok(())
    }

    async fn size(&self, path: &str) -> VermeerResult<u64> {
        self.with_blob(path, |blob| blob.contents.len() as u64)
    }

    async fn last_modified(&self, path: &str) -> VermeerResult<DateTime<Utc>> {
        self.with_blob(path, |blob| blob.modified)
    }

    async fn mime_type(&self, path: &str) -> VermeerResult<Option<String>> {
        self.with_blob(path, |_| guess_mime_type(path))
    }

    async fn url(&self, path: &str) -> VermeerResult<String> {
        Ok(match &self.url {
            Some(base) => join_path(base, path),
            None => format!("memory://{}", path.trim_matches('/')),
        })
    }

    async fn files(&self, dir: &str, recursive: bool) -> VermeerResult<Vec<String>> {
        let blobs = self.blobs.read().map_err(|_| Self::poisoned())?;
        Ok(blobs
            .keys()
            .filter(|key| Self::is_listed(dir, key, recursive))
            .cloned()
            .collect())
    }

    async fn directories(&self, dir: &str, recursive: bool) -> VermeerResult<Vec<String>> {
        let blobs = self.blobs.read().map_err(|_| Self::poisoned())?;
        Ok(Self::all_directories(&blobs)
            .into_iter()
            .filter(|entry| Self::is_listed(dir, entry, recursive))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_listed() {
        assert!(MemoryDisk::is_listed("a", "a/b", false));
        assert!(!MemoryDisk::is_listed("a", "a/b/c", false));
        assert!(MemoryDisk::is_listed("a", "a/b/c", true));
        assert!(!MemoryDisk::is_listed("a", "ab/c", true));
        assert!(MemoryDisk::is_listed("", "x", false));
    }
}
