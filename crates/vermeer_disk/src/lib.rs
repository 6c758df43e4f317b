//! Blob storage backends for Vermeer.
//!
//! A [`Disk`] is an opaque key-value byte store keyed by `/`-separated
//! relative paths. Vermeer never assumes anything about a disk beyond this
//! trait, so local directories, in-memory maps and object stores are
//! interchangeable.
//!
//! # Example
//!
//! ```rust
//! use vermeer_disk::{Disk, MemoryDisk};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let disk = MemoryDisk::new().with_url("https://cdn.example.com");
//! disk.put("uploads/ab12/photo.jpg", b"...").await?;
//!
//! assert!(disk.exists("uploads/ab12/photo.jpg").await?);
//! assert_eq!(disk.url("uploads/ab12/photo.jpg").await?, "https://cdn.example.com/uploads/ab12/photo.jpg");
//! assert_eq!(disk.directories("uploads", false).await?, vec!["uploads/ab12".to_string()]);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use chrono::{DateTime, Utc};
use vermeer_error::VermeerResult;

mod local;
mod memory;

pub use local::LocalDisk;
pub use memory::MemoryDisk;

/// Trait for pluggable blob storage backends.
///
/// All paths are relative to the disk root and use `/` as separator.
/// Listing a directory that does not exist yields an empty list.
#[async_trait::async_trait]
pub trait Disk: Send + Sync {
    /// Write `contents` at `path`, creating parent directories.
    ///
    /// Implementations must never expose a partially written blob: a
    /// concurrent reader sees either the previous contents or the new ones.
    async fn put(&self, path: &str, contents: &[u8]) -> VermeerResult<()>;

    /// Read the blob at `path`.
    async fn get(&self, path: &str) -> VermeerResult<Vec<u8>>;

    /// Check whether a blob exists at `path`.
    async fn exists(&self, path: &str) -> VermeerResult<bool>;

    /// Delete blobs. Missing paths are not an error.
    async fn delete(&self, paths: &[String]) -> VermeerResult<()>;

    /// Delete a directory and everything below it.
    async fn delete_directory(&self, path: &str) -> VermeerResult<()>;

    /// Size of the blob in bytes.
    async fn size(&self, path: &str) -> VermeerResult<u64>;

    /// Last modification time of the blob.
    async fn last_modified(&self, path: &str) -> VermeerResult<DateTime<Utc>>;

    /// MIME type of the blob, if it can be determined.
    async fn mime_type(&self, path: &str) -> VermeerResult<Option<String>>;

    /// Public URL of the blob.
    async fn url(&self, path: &str) -> VermeerResult<String>;

    /// Files directly inside `dir` (or anywhere below it when `recursive`).
    async fn files(&self, dir: &str, recursive: bool) -> VermeerResult<Vec<String>>;

    /// Directories directly inside `dir` (or anywhere below it when `recursive`).
    async fn directories(&self, dir: &str, recursive: bool) -> VermeerResult<Vec<String>>;
}

/// Guess a MIME type from the extension of `path`.
pub fn guess_mime_type(path: &str) -> Option<String> {
    mime_guess::from_path(path)
        .first()
        .map(|mime| mime.essence_str().to_string())
}

/// Join two relative path fragments with a single `/`.
///
/// # Examples
///
/// ```
/// use vermeer_disk::join_path;
///
/// assert_eq!(join_path("uploads/", "/ab12"), "uploads/ab12");
/// assert_eq!(join_path("", "ab12"), "ab12");
/// ```
pub fn join_path(base: &str, child: &str) -> String {
    let base = base.trim_end_matches('/');
    let child = child.trim_start_matches('/');
    match (base.is_empty(), child.is_empty()) {
        (true, _) => child.to_string(),
        (false, true) => base.to_string(),
        (false, false) => format!("{}/{}", base, child),
    }
}

/// Parent directory of a relative path, `""` for top-level entries.
///
/// # Examples
///
/// ```
/// use vermeer_disk::parent_path;
///
/// assert_eq!(parent_path("uploads/ab12/photo.jpg"), "uploads/ab12");
/// assert_eq!(parent_path("photo.jpg"), "");
/// ```
pub fn parent_path(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit_once('/')
        .map(|(parent, _)| parent)
        .unwrap_or("")
}

/// Last segment of a relative path.
pub fn base_name(path: &str) -> &str {
    path.trim_end_matches('/')
        .rsplit_once('/')
        .map(|(_, name)| name)
        .unwrap_or(path)
}
