//! Formatters derive new files from a source file.
//!
//! A formatter either produces a temporary file ([`FormattedFile`]) or
//! declines with `Ok(None)` when it cannot convert the input. Declining is
//! an expected outcome, not an error.

mod chain;
mod from;
mod imaging;
mod inline;

pub use chain::ChainFormatter;
pub use from::FromFormatter;
pub use imaging::{Anchor, ImageFn, ImageFormatter, ImageHandle, ImageOperation, ImageOptions, Watermark};
pub use inline::{FormattedContent, InlineFn, InlineFormatter};

use crate::recipe::{Options, Recipe};
use crate::source::{FileSource, UploadedFile};
use crate::storage::Storage;
use serde_json::{Map, Value};
use std::path::Path;
use std::sync::Arc;
use tempfile::TempPath;
use vermeer_error::{ConfigError, StorageError, StorageErrorKind, VermeerResult};

/// A transform from a source file to a derived file.
#[async_trait::async_trait]
pub trait Formatter: Send + Sync {
    /// Produce a derived file from `source`, or decline with `Ok(None)`.
    ///
    /// `storage` is the storage the result will be written to.
    async fn format(
        &self,
        source: &FileSource,
        storage: &Arc<Storage>,
    ) -> VermeerResult<Option<FormattedFile>>;
}

/// Temporary output of a formatter.
///
/// The file is removed when this value is dropped, so intermediate results
/// never outlive the operation that produced them.
#[derive(Debug)]
pub struct FormattedFile {
    path: TempPath,
    extension: Option<String>,
}

impl FormattedFile {
    /// Write `contents` to a new temporary file.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the temporary file cannot be written.
    pub async fn from_contents(contents: &[u8], extension: Option<&str>) -> VermeerResult<Self> {
        let extension = extension
            .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
            .filter(|ext| !ext.is_empty());
        let suffix = extension
            .as_ref()
            .map(|ext| format!(".{}", ext))
            .unwrap_or_default();

        let path = tempfile::Builder::new()
            .prefix("vermeer-")
            .suffix(&suffix)
            .tempfile()
            .map_err(|e| StorageError::new(StorageErrorKind::FileWrite(format!("temp file: {}", e))))?
            .into_temp_path();

        tokio::fs::write(&path, contents).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileWrite(format!(
                "{}: {}",
                path.display(),
                e
            )))
        })?;

        Ok(Self { path, extension })
    }

    /// Location of the temporary file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Extension chosen by the formatter.
    pub fn extension(&self) -> Option<&str> {
        self.extension.as_deref()
    }

    /// View the output as a source for the next stage.
    pub fn source(&self) -> FileSource {
        let name = match &self.extension {
            Some(ext) => format!("formatted.{}", ext),
            None => "formatted".to_string(),
        };
        FileSource::Uploaded(UploadedFile::new(self.path.to_path_buf(), name))
    }

    /// Bytes of the output.
    pub async fn contents(&self) -> VermeerResult<Vec<u8>> {
        tokio::fs::read(&self.path).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileRead(format!(
                "{}: {}",
                self.path.display(),
                e
            )))
            .into()
        })
    }

    /// Remove the temporary file now, reporting failures.
    pub fn discard(self) -> VermeerResult<()> {
        self.path.close().map_err(|e| {
            StorageError::new(StorageErrorKind::FileDelete(format!("temp file: {}", e))).into()
        })
    }
}

/// How a format is configured.
#[derive(Clone)]
pub enum FormatterConfig {
    /// Registered alias plus options
    Alias {
        /// Alias name, e.g. `"thumbnail"`
        alias: String,
        /// Alias options
        options: Options,
    },
    /// Byte-level closure
    Callable(InlineFn),
    /// Prebuilt formatter
    Instance(Arc<dyn Formatter>),
}

impl std::fmt::Debug for FormatterConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Alias { alias, options } => f
                .debug_struct("Alias")
                .field("alias", alias)
                .field("options", options)
                .finish(),
            Self::Callable(_) => f.write_str("Callable"),
            Self::Instance(_) => f.write_str("Instance"),
        }
    }
}

impl FormatterConfig {
    /// Alias config.
    pub fn alias(alias: impl Into<String>, options: Options) -> Self {
        Self::Alias {
            alias: alias.into(),
            options,
        }
    }

    /// Parse a recipe value.
    ///
    /// Strings and tables are alias recipes; an array is shorthand for a
    /// `chain` of its elements.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed recipes.
    pub fn from_value(value: &Value) -> VermeerResult<Self> {
        match value {
            Value::Array(stages) => {
                if stages.is_empty() {
                    return Err(ConfigError::new("A chain recipe needs at least one stage").into());
                }
                let mut options = Map::new();
                options.insert("formatters".to_string(), Value::Array(stages.clone()));
                Ok(Self::alias("chain", Options::from(options)))
            }
            other => {
                let recipe = Recipe::from_value(other)?;
                Ok(Self::alias(recipe.alias, recipe.options))
            }
        }
    }
}

impl From<Arc<dyn Formatter>> for FormatterConfig {
    fn from(formatter: Arc<dyn Formatter>) -> Self {
        Self::Instance(formatter)
    }
}
