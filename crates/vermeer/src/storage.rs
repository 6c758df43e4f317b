//! Save, derive, delete and query files of one context area.

use crate::config::StorageConfig;
use crate::context::Context;
use crate::naming::{NameGenerator, validate_format_name, validate_origin_path};
use crate::not_found::Resolution;
use crate::source::{Attribute, AttributeValue, FileSource, StoredFile};
use chrono::{DateTime, Utc};
use std::collections::BTreeMap;
use std::sync::{Arc, Weak};
use tracing::{debug, info, instrument, warn};
use vermeer_disk::{Disk, base_name, join_path, parent_path};
use vermeer_error::{
    ConfigError, NotFoundError, StorageError, StorageErrorKind, VermeerError, VermeerResult,
};

/// Durable or ephemeral area of a context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum StorageRole {
    /// Durable files
    Main,
    /// Uploads awaiting promotion, reclaimed by garbage collection
    Temp,
}

impl StorageRole {
    /// Path prefix used when none is configured.
    pub fn default_prefix(&self) -> &'static str {
        match self {
            Self::Main => "uploads",
            Self::Temp => "temp",
        }
    }

    /// Storage name used when none is configured.
    pub fn default_name(&self) -> &'static str {
        match self {
            Self::Main => "main",
            Self::Temp => "temp",
        }
    }
}

/// Options for [`Storage::delete_file`] and [`Storage::delete_files`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeleteOptions {
    /// Also delete every formatted file of a deleted origin
    pub with_formats: bool,
    /// Log failures and carry on instead of returning them
    pub suppress_errors: bool,
}

impl Default for DeleteOptions {
    fn default() -> Self {
        Self {
            with_formats: true,
            suppress_errors: false,
        }
    }
}

impl DeleteOptions {
    /// Delete formats too and never fail; used by garbage collection.
    pub fn best_effort() -> Self {
        Self {
            with_formats: true,
            suppress_errors: true,
        }
    }
}

fn invalid_path(path: &str) -> VermeerError {
    StorageError::new(StorageErrorKind::InvalidPath(format!(
        "'{}' is not a {{shard}}/{{filename}} path",
        path
    )))
    .into()
}

/// One disk-bound file area (main or temp) of a [`Context`].
///
/// Storages are created by their context and hold it weakly.
pub struct Storage {
    name: String,
    role: StorageRole,
    context_name: String,
    context: Weak<Context>,
    config: StorageConfig,
    disk: Arc<dyn Disk>,
    naming: NameGenerator,
}

impl std::fmt::Debug for Storage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Storage")
            .field("name", &self.name)
            .field("role", &self.role)
            .field("context", &self.context_name)
            .field("root", &self.naming.root_directory())
            .finish()
    }
}

impl Storage {
    pub(crate) fn new(
        context_name: &str,
        context: Weak<Context>,
        role: StorageRole,
        config: StorageConfig,
        disk: Arc<dyn Disk>,
    ) -> Self {
        let name = config
            .name()
            .clone()
            .unwrap_or_else(|| role.default_name().to_string());
        let naming = NameGenerator::new(
            context_name,
            role,
            config.name_generator().clone(),
            Arc::clone(&disk),
        );
        Self {
            name,
            role,
            context_name: context_name.to_string(),
            context,
            config,
            disk,
            naming,
        }
    }

    /// Storage name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Main or temp.
    pub fn role(&self) -> StorageRole {
        self.role
    }

    /// Name of the owning context.
    pub fn context_name(&self) -> &str {
        &self.context_name
    }

    /// Owning context.
    ///
    /// # Errors
    ///
    /// Returns a configuration error once the context has been dropped.
    pub fn context(&self) -> VermeerResult<Arc<Context>> {
        self.context.upgrade().ok_or_else(|| {
            ConfigError::new(format!("Context '{}' is no longer alive", self.context_name)).into()
        })
    }

    /// Settings in use.
    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Backing disk.
    pub fn disk(&self) -> &Arc<dyn Disk> {
        &self.disk
    }

    /// Path allocator.
    pub fn name_generator(&self) -> &NameGenerator {
        &self.naming
    }

    /// Handle on the origin file at `path`.
    pub fn file(self: &Arc<Self>, path: &str) -> StoredFile {
        StoredFile::new(path, Arc::clone(self))
    }

    /// Validate, store and optionally derive formats for a new file.
    ///
    /// # Errors
    ///
    /// Returns the aggregated validation error, or the first storage or
    /// formatter error.
    #[instrument(skip(self, source), fields(context = %self.context_name, storage = %self.name))]
    pub async fn save_new_file(
        self: &Arc<Self>,
        source: &FileSource,
        validate: bool,
    ) -> VermeerResult<StoredFile> {
        let context = self.context()?;
        if validate {
            context.validate(source).await?;
        }

        let path = self.naming.path_for_new_file(source).await?;
        let contents = source.contents(None).await?;
        let full = join_path(self.naming.root_directory(), &path);
        self.disk.put(&full, &contents).await?;
        info!(path = %path, size = contents.len(), "Saved new file");

        let formats = self
            .config
            .generate_formats_on_save()
            .select(context.format_names());
        for format in formats {
            if self.has_file(&path, Some(&format)).await? {
                continue;
            }
            let generated = self.generate_formatted_file(&path, &format).await?;
            debug!(format = %format, generated, "Derived format on save");
        }

        Ok(self.file(&path))
    }

    /// Derive `format` of the origin at `path`, replacing any previous version.
    ///
    /// Returns `false` when the formatter declines the file.
    ///
    /// # Errors
    ///
    /// Returns a formatter error when no formatter exists for `format`, a
    /// not-found error when the origin is missing, or a storage error.
    #[instrument(skip(self), fields(context = %self.context_name, storage = %self.name))]
    pub async fn generate_formatted_file(self: &Arc<Self>, path: &str, format: &str) -> VermeerResult<bool> {
        if !validate_origin_path(path) {
            return Err(invalid_path(path));
        }
        if !validate_format_name(format) {
            return Err(ConfigError::new(format!("Invalid format name '{}'", format)).into());
        }

        let formatter = self.context()?.formatter(format)?;
        let source = FileSource::Stored(self.file(path));
        let Some(output) = formatter.format(&source, self).await? else {
            debug!("Formatter declined");
            return Ok(false);
        };

        let target = self
            .naming
            .path_for_new_formatted_file(path, format, output.extension());
        let contents = output.contents().await?;
        self.disk.put(&target, &contents).await?;
        if let Err(e) = output.discard() {
            warn!(error = %e, "Failed to remove formatter output");
        }

        let stale: Vec<String> = self
            .naming
            .list_formatted_files(path)
            .await?
            .into_iter()
            .filter(|(full, name)| name == format && *full != target)
            .map(|(full, _)| full)
            .collect();
        if !stale.is_empty() {
            debug!(count = stale.len(), "Removing stale formatted files");
            self.disk.delete(&stale).await?;
        }

        info!(target = %target, size = contents.len(), "Formatted file written");
        Ok(true)
    }

    /// Delete the origin (`format = None`) or one formatted file.
    ///
    /// Emptied directories are removed up to the storage root.
    ///
    /// # Errors
    ///
    /// Returns storage errors unless `options.suppress_errors` is set.
    #[instrument(skip(self), fields(context = %self.context_name, storage = %self.name))]
    pub async fn delete_file(
        &self,
        path: &str,
        format: Option<&str>,
        options: DeleteOptions,
    ) -> VermeerResult<()> {
        match self.delete_one(path, format, options).await {
            Err(e) if options.suppress_errors => {
                warn!(path, error = %e, "Delete failed, continuing");
                Ok(())
            }
            result => result,
        }
    }

    /// Delete several origins.
    ///
    /// # Errors
    ///
    /// Stops at the first failure unless `options.suppress_errors` is set.
    #[instrument(skip(self, paths), fields(context = %self.context_name, storage = %self.name, count = paths.len()))]
    pub async fn delete_files(&self, paths: &[String], options: DeleteOptions) -> VermeerResult<()> {
        for path in paths {
            self.delete_file(path, None, options).await?;
        }
        info!(count = paths.len(), "Deleted files");
        Ok(())
    }

    async fn delete_one(&self, path: &str, format: Option<&str>, options: DeleteOptions) -> VermeerResult<()> {
        if !validate_origin_path(path) {
            return Err(invalid_path(path));
        }

        match format {
            Some(format) => {
                if let Some(full) = self.naming.full_path(path, Some(format)).await? {
                    self.disk.delete(std::slice::from_ref(&full)).await?;
                    self.prune(parent_path(&full)).await?;
                }
            }
            None => {
                let origin = join_path(self.naming.root_directory(), path);
                self.disk.delete(std::slice::from_ref(&origin)).await?;
                if options.with_formats {
                    let formats = self.naming.formats_directory(path);
                    self.disk.delete_directory(&formats).await?;
                    self.prune(parent_path(&formats)).await?;
                }
                self.prune(parent_path(&origin)).await?;
            }
        }
        Ok(())
    }

    /// Remove empty directories from `dir` upward, stopping below the root.
    async fn prune(&self, dir: &str) -> VermeerResult<()> {
        let root = self.naming.root_directory();
        let mut current = dir.to_string();
        while current.len() > root.len() && current.starts_with(&format!("{}/", root)) {
            let empty = self.disk.files(&current, false).await?.is_empty()
                && self.disk.directories(&current, false).await?.is_empty();
            if !empty {
                break;
            }
            self.disk.delete_directory(&current).await?;
            debug!(dir = %current, "Pruned empty directory");
            current = parent_path(&current).to_string();
        }
        Ok(())
    }

    /// Whether the origin or formatted file exists.
    ///
    /// Misses go through the not-found handlers; an unresolved miss is `false`.
    pub async fn file_exists(self: &Arc<Self>, path: &str, format: Option<&str>) -> VermeerResult<bool> {
        match self.attribute(path, format, Attribute::Exists).await? {
            AttributeValue::Exists(exists) => Ok(exists),
            other => Err(attribute_mismatch(Attribute::Exists, &other)),
        }
    }

    /// Public URL of the origin or formatted file.
    pub async fn file_url(self: &Arc<Self>, path: &str, format: Option<&str>) -> VermeerResult<String> {
        match self.attribute(path, format, Attribute::Url).await? {
            AttributeValue::Url(url) => Ok(url),
            other => Err(attribute_mismatch(Attribute::Url, &other)),
        }
    }

    /// Bytes of the origin or formatted file.
    pub async fn file_contents(self: &Arc<Self>, path: &str, format: Option<&str>) -> VermeerResult<Vec<u8>> {
        match self.attribute(path, format, Attribute::Contents).await? {
            AttributeValue::Contents(contents) => Ok(contents),
            other => Err(attribute_mismatch(Attribute::Contents, &other)),
        }
    }

    /// Last path segment of the origin or formatted file.
    pub async fn file_basename(self: &Arc<Self>, path: &str, format: Option<&str>) -> VermeerResult<String> {
        match self.attribute(path, format, Attribute::Basename).await? {
            AttributeValue::Basename(name) => Ok(name),
            other => Err(attribute_mismatch(Attribute::Basename, &other)),
        }
    }

    /// Size in bytes of the origin or formatted file.
    pub async fn file_size(self: &Arc<Self>, path: &str, format: Option<&str>) -> VermeerResult<u64> {
        match self.attribute(path, format, Attribute::Size).await? {
            AttributeValue::Size(size) => Ok(size),
            other => Err(attribute_mismatch(Attribute::Size, &other)),
        }
    }

    /// Modification time of the origin or formatted file.
    pub async fn file_last_modified(
        self: &Arc<Self>,
        path: &str,
        format: Option<&str>,
    ) -> VermeerResult<DateTime<Utc>> {
        match self.attribute(path, format, Attribute::LastModified).await? {
            AttributeValue::LastModified(modified) => Ok(modified),
            other => Err(attribute_mismatch(Attribute::LastModified, &other)),
        }
    }

    /// MIME type of the origin or formatted file.
    pub async fn file_mime_type(
        self: &Arc<Self>,
        path: &str,
        format: Option<&str>,
    ) -> VermeerResult<Option<String>> {
        match self.attribute(path, format, Attribute::MimeType).await? {
            AttributeValue::MimeType(mime) => Ok(mime),
            other => Err(attribute_mismatch(Attribute::MimeType, &other)),
        }
    }

    /// Names of the existing formats of `path`, sorted.
    pub async fn file_formats(&self, path: &str) -> VermeerResult<Vec<String>> {
        if !validate_origin_path(path) {
            return Err(invalid_path(path));
        }
        let mut formats: Vec<String> = self
            .naming
            .list_formatted_files(path)
            .await?
            .into_values()
            .collect();
        formats.sort();
        formats.dedup();
        Ok(formats)
    }

    /// Existing formatted files of `path`, full path to format name.
    pub async fn list_formatted_files(&self, path: &str) -> VermeerResult<BTreeMap<String, String>> {
        if !validate_origin_path(path) {
            return Err(invalid_path(path));
        }
        self.naming.list_formatted_files(path).await
    }

    /// Every origin file of this storage as `{shard}/{filename}`, sorted.
    #[instrument(skip(self), fields(context = %self.context_name, storage = %self.name))]
    pub async fn files(&self) -> VermeerResult<Vec<String>> {
        let mut files = Vec::new();
        for dir in self.disk.directories(self.naming.root_directory(), false).await? {
            let shard = base_name(&dir).to_string();
            for file in self.disk.files(&dir, false).await? {
                let relative = format!("{}/{}", shard, base_name(&file));
                if validate_origin_path(&relative) {
                    files.push(relative);
                }
            }
        }
        files.sort();
        Ok(files)
    }

    /// Full disk path of the origin or an existing formatted file.
    pub async fn file_path(&self, path: &str, format: Option<&str>) -> VermeerResult<Option<String>> {
        if !validate_origin_path(path) {
            return Err(invalid_path(path));
        }
        self.naming.full_path(path, format).await
    }

    /// Whether the file is on disk, without consulting not-found handlers.
    pub async fn has_file(&self, path: &str, format: Option<&str>) -> VermeerResult<bool> {
        if !validate_origin_path(path) {
            return Ok(false);
        }
        match self.naming.full_path(path, format).await? {
            Some(full) => self.disk.exists(&full).await,
            None => Ok(false),
        }
    }

    async fn read_attribute(
        &self,
        path: &str,
        format: Option<&str>,
        attribute: Attribute,
    ) -> VermeerResult<Option<AttributeValue>> {
        let Some(full) = self.naming.full_path(path, format).await? else {
            return Ok(None);
        };
        if !self.disk.exists(&full).await? {
            return Ok(None);
        }
        Ok(Some(match attribute {
            Attribute::Exists => AttributeValue::Exists(true),
            Attribute::Url => AttributeValue::Url(self.disk.url(&full).await?),
            Attribute::Contents => AttributeValue::Contents(self.disk.get(&full).await?),
            Attribute::Basename => AttributeValue::Basename(base_name(&full).to_string()),
            Attribute::Size => AttributeValue::Size(self.disk.size(&full).await?),
            Attribute::LastModified => AttributeValue::LastModified(self.disk.last_modified(&full).await?),
            Attribute::MimeType => AttributeValue::MimeType(self.disk.mime_type(&full).await?),
        }))
    }

    /// Read an attribute, routing misses through the context's handlers.
    #[instrument(skip(self), fields(context = %self.context_name, storage = %self.name))]
    pub(crate) async fn attribute(
        self: &Arc<Self>,
        path: &str,
        format: Option<&str>,
        attribute: Attribute,
    ) -> VermeerResult<AttributeValue> {
        if !validate_origin_path(path) {
            return match attribute {
                Attribute::Exists => Ok(AttributeValue::Exists(false)),
                _ => Err(invalid_path(path)),
            };
        }

        if let Some(value) = self.read_attribute(path, format, attribute).await? {
            return Ok(value);
        }

        let error = NotFoundError::new(&self.context_name, &self.name, path, format);
        let context = self.context()?;
        for handler in context.handlers().await? {
            match handler.handle(&error, self).await? {
                Resolution::Continue => continue,
                Resolution::Fail => break,
                Resolution::Retry => {
                    if let Some(value) = self.read_attribute(path, format, attribute).await? {
                        return Ok(value);
                    }
                    debug!("File still missing after retry");
                    break;
                }
                Resolution::Replace(replacement) => {
                    debug!(?replacement, "Answering from replacement source");
                    return replacement.attribute(attribute, None).await;
                }
            }
        }

        match attribute {
            Attribute::Exists => Ok(AttributeValue::Exists(false)),
            _ => Err(error.into()),
        }
    }
}

fn attribute_mismatch(expected: Attribute, value: &AttributeValue) -> VermeerError {
    StorageError::new(StorageErrorKind::Unsupported(format!(
        "expected {} but the source answered {}",
        expected,
        value.attribute()
    )))
    .into()
}
