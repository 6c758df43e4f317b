//! Expiry sweep over temp storages.

use crate::storage::{DeleteOptions, Storage};
use chrono::Utc;
use rand::Rng;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument};
use vermeer_disk::join_path;
use vermeer_error::{ConfigError, VermeerResult};

/// Deletes files that outlived their lifetime in one storage.
///
/// Nothing is persisted between runs; each pass lists the storage and acts
/// on what it finds.
#[derive(Debug, Clone)]
pub struct GarbageCollector {
    storage: Arc<Storage>,
    lifetime: Duration,
}

impl GarbageCollector {
    /// Collector over `storage` with a default lifetime.
    pub fn new(storage: Arc<Storage>, lifetime: Duration) -> Self {
        Self { storage, lifetime }
    }

    /// Storage being swept.
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Default lifetime.
    pub fn lifetime(&self) -> Duration {
        self.lifetime
    }

    /// Origin paths last modified before `now - lifetime`.
    ///
    /// # Errors
    ///
    /// Returns storage errors from listing or reading timestamps.
    #[instrument(skip(self), fields(context = %self.storage.context_name(), storage = %self.storage.name()))]
    pub async fn collect(&self, lifetime: Option<Duration>) -> VermeerResult<Vec<String>> {
        let lifetime = lifetime.unwrap_or(self.lifetime);
        let lifetime = chrono::Duration::from_std(lifetime)
            .map_err(|e| ConfigError::new(format!("Invalid garbage collector lifetime: {}", e)))?;
        let threshold = Utc::now() - lifetime;

        let root = self.storage.name_generator().root_directory();
        let mut expired = Vec::new();
        for path in self.storage.files().await? {
            let modified = self
                .storage
                .disk()
                .last_modified(&join_path(root, &path))
                .await?;
            if modified < threshold {
                expired.push(path);
            }
        }
        debug!(count = expired.len(), "Collected expired files");
        Ok(expired)
    }

    /// Delete `paths`, or everything [`collect`](Self::collect) finds.
    ///
    /// Deletion is best effort: failures are logged and skipped. Returns the
    /// paths that were processed.
    ///
    /// # Errors
    ///
    /// Returns storage errors from the collection pass.
    #[instrument(skip(self, paths), fields(context = %self.storage.context_name(), storage = %self.storage.name()))]
    pub async fn clean(&self, paths: Option<Vec<String>>) -> VermeerResult<Vec<String>> {
        let paths = match paths {
            Some(paths) => paths,
            None => self.collect(None).await?,
        };
        if paths.is_empty() {
            debug!("Nothing to clean");
            return Ok(paths);
        }
        self.storage
            .delete_files(&paths, DeleteOptions::best_effort())
            .await?;
        info!(count = paths.len(), "Garbage collection pass finished");
        Ok(paths)
    }

    /// Weighted coin flip: `true` with chance `probability / divisor`.
    ///
    /// Always `false` when either value is below 1.
    ///
    /// # Examples
    ///
    /// ```
    /// use vermeer::GarbageCollector;
    ///
    /// assert!(GarbageCollector::should_trigger(1, 1));
    /// assert!(!GarbageCollector::should_trigger(0, 100));
    /// assert!(!GarbageCollector::should_trigger(1, 0));
    /// ```
    pub fn should_trigger(probability: u32, divisor: u32) -> bool {
        if probability < 1 || divisor < 1 {
            return false;
        }
        rand::rng().random_range(1..=divisor) <= probability
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_trigger_bounds() {
        for _ in 0..100 {
            assert!(GarbageCollector::should_trigger(5, 5));
            assert!(GarbageCollector::should_trigger(10, 5));
            assert!(!GarbageCollector::should_trigger(0, 5));
        }
    }
}
