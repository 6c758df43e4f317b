//! Filesystem-based disk implementation.
//!
//! Blobs live as plain files below a root directory, so the layout on disk
//! mirrors the relative paths Vermeer generates.

use crate::{Disk, guess_mime_type, join_path};
use chrono::{DateTime, Utc};
use std::path::{Component, Path, PathBuf};
use uuid::Uuid;
use vermeer_error::{StorageError, StorageErrorKind, VermeerResult};

/// Local filesystem disk.
///
/// # Example Structure
///
/// ```text
/// /var/www/storage/
/// ├── uploads/
/// │   └── avatars/
/// │       └── k3x9/
/// │           ├── 8f2kq0c1m4.jpg
/// │           └── formats/
/// │               └── 8f2kq0c1m4.jpg/
/// │                   └── thumb.png
/// └── temp/
///     └── avatars/
/// ```
///
/// # Features
///
/// - **Atomic writes**: Uses hidden temp file + rename, so readers never see
///   a half-written blob
/// - **Path confinement**: Absolute paths and `..` segments are rejected
/// - **Optional public URL**: Files are addressable as `{url}/{path}` when a
///   base URL is configured
#[derive(Debug, Clone)]
pub struct LocalDisk {
    root: PathBuf,
    url: Option<String>,
}

impl LocalDisk {
    /// Create a new local disk rooted at `root`.
    ///
    /// Creates the root directory if it doesn't exist.
    ///
    /// # Errors
    ///
    /// Returns error if the directory cannot be created.
    #[tracing::instrument(skip(root))]
    pub fn new(root: impl Into<PathBuf>) -> VermeerResult<Self> {
        let root = root.into();

        std::fs::create_dir_all(&root).map_err(|e| {
            StorageError::new(StorageErrorKind::DirectoryCreation(format!(
                "{}: {}",
                root.display(),
                e
            )))
        })?;

        tracing::info!(path = %root.display(), "Created local disk");
        Ok(Self { root, url: None })
    }

    /// Serve files below this base URL.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Root directory of this disk.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a relative path below the root, rejecting escapes.
    fn resolve(&self, path: &str) -> VermeerResult<PathBuf> {
        let relative = Path::new(path);
        let confined = relative
            .components()
            .all(|c| matches!(c, Component::Normal(_) | Component::CurDir));
        if !confined {
            return Err(StorageError::new(StorageErrorKind::InvalidPath(path.to_string())).into());
        }
        Ok(self.root.join(relative))
    }

    async fn list(&self, dir: &str, recursive: bool, want_dirs: bool) -> VermeerResult<Vec<String>> {
        let mut found = Vec::new();
        let mut pending = vec![dir.trim_matches('/').to_string()];

        while let Some(current) = pending.pop() {
            let absolute = self.resolve(&current)?;
            let mut entries = match tokio::fs::read_dir(&absolute).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => {
                    return Err(StorageError::new(StorageErrorKind::FileRead(format!(
                        "{}: {}",
                        absolute.display(),
                        e
                    )))
                    .into());
                }
            };

            while let Some(entry) = entries.next_entry().await.map_err(|e| {
                StorageError::new(StorageErrorKind::FileRead(format!(
                    "{}: {}",
                    absolute.display(),
                    e
                )))
            })? {
                let name = entry.file_name().to_string_lossy().to_string();
                // In-flight writes
                if name.starts_with('.') {
                    continue;
                }
                let file_type = entry.file_type().await.map_err(|e| {
                    StorageError::new(StorageErrorKind::FileRead(format!("{}: {}", name, e)))
                })?;
                let relative = join_path(&current, &name);

                if file_type.is_dir() {
                    if recursive {
                        pending.push(relative.clone());
                    }
                    if want_dirs {
                        found.push(relative);
                    }
                } else if !want_dirs {
                    found.push(relative);
                }
            }
        }

        found.sort();
        Ok(found)
    }

    async fn metadata(&self, path: &str) -> VermeerResult<std::fs::Metadata> {
        let absolute = self.resolve(path)?;
        tokio::fs::metadata(&absolute).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileRead(format!(
                "{}: {}",
                absolute.display(),
                e
            )))
            .into()
        })
    }
}

#[async_trait::async_trait]
impl Disk for LocalDisk {
    #[tracing::instrument(skip(self, contents), fields(size = contents.len()))]
    async fn put(&self, path: &str, contents: &[u8]) -> VermeerResult<()> {
        let target = self.resolve(path)?;

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(|e| {
                StorageError::new(StorageErrorKind::DirectoryCreation(format!(
                    "{}: {}",
                    parent.display(),
                    e
                )))
            })?;
        }

        // Write to a hidden temp file first, then rename for atomicity
        let file_name = target
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| StorageError::new(StorageErrorKind::InvalidPath(path.to_string())))?;
        let temp_path = target.with_file_name(format!(".{}.{}.tmp", file_name, Uuid::new_v4()));

        tokio::fs::write(&temp_path, contents).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileWrite(format!(
                "{}: {}",
                temp_path.display(),
                e
            )))
        })?;

        if let Err(e) = tokio::fs::rename(&temp_path, &target).await {
            let _ = tokio::fs::remove_file(&temp_path).await;
            return Err(StorageError::new(StorageErrorKind::FileWrite(format!(
                "rename {} to {}: {}",
                temp_path.display(),
                target.display(),
                e
            )))
            .into());
        }

        tracing::debug!(path = %target.display(), size = contents.len(), "Wrote blob");
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn get(&self, path: &str) -> VermeerResult<Vec<u8>> {
        let absolute = self.resolve(path)?;
        tokio::fs::read(&absolute).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileRead(format!(
                "{}: {}",
                absolute.display(),
                e
            )))
            .into()
        })
    }

    async fn exists(&self, path: &str) -> VermeerResult<bool> {
        let absolute = self.resolve(path)?;
        match tokio::fs::metadata(&absolute).await {
            Ok(meta) => Ok(meta.is_file()),
            Err(_) => Ok(false),
        }
    }

    #[tracing::instrument(skip(self, paths), fields(count = paths.len()))]
    async fn delete(&self, paths: &[String]) -> VermeerResult<()> {
        for path in paths {
            let absolute = self.resolve(path)?;
            match tokio::fs::remove_file(&absolute).await {
                Ok(()) => tracing::debug!(path = %absolute.display(), "Deleted blob"),
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => {
                    return Err(StorageError::new(StorageErrorKind::FileDelete(format!(
                        "{}: {}",
                        absolute.display(),
                        e
                    )))
                    .into());
                }
            }
        }
        Ok(())
    }

    #[tracing::instrument(skip(self))]
    async fn delete_directory(&self, path: &str) -> VermeerResult<()> {
        let absolute = self.resolve(path)?;
        if absolute == self.root {
            return Err(StorageError::new(StorageErrorKind::InvalidPath(
                "refusing to delete disk root".to_string(),
            ))
            .into());
        }
        match tokio::fs::remove_dir_all(&absolute).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(StorageError::new(StorageErrorKind::FileDelete(format!(
                "{}: {}",
                absolute.display(),
                e
            )))
            .into()),
        }
    }

    async fn size(&self, path: &str) -> VermeerResult<u64> {
        Ok(self.metadata(path).await?.len())
    }

    async fn last_modified(&self, path: &str) -> VermeerResult<DateTime<Utc>> {
        let modified = self.metadata(path).await?.modified().map_err(|e| {
            StorageError::new(StorageErrorKind::Unavailable(format!(
                "modification time of {}: {}",
                path, e
            )))
        })?;
        Ok(DateTime::<Utc>::from(modified))
    }

    async fn mime_type(&self, path: &str) -> VermeerResult<Option<String>> {
        Ok(guess_mime_type(path))
    }

    async fn url(&self, path: &str) -> VermeerResult<String> {
        match &self.url {
            Some(base) => Ok(join_path(base, path)),
            None => Err(StorageError::new(StorageErrorKind::Unsupported(format!(
                "local disk at {} has no public URL",
                self.root.display()
            )))
            .into()),
        }
    }

    async fn files(&self, dir: &str, recursive: bool) -> VermeerResult<Vec<String>> {
        self.list(dir, recursive, false).await
    }

    async fn directories(&self, dir: &str, recursive: bool) -> VermeerResult<Vec<String>> {
        self.list(dir, recursive, true).await
    }
}
