//! Handlers consulted when a read hits a missing file.
//!
//! Handlers run in configured order. Each answers with a [`Resolution`]:
//! continue to the next handler, fail with the original error, retry the
//! read (the handler just created the file), or replace the file with
//! another source.

use crate::recipe::{Options, Recipe};
use crate::source::{EmptyFile, FileSource, FixedFormatFile};
use crate::storage::Storage;
use serde_json::Value;
use std::sync::Arc;
use tracing::{debug, instrument, warn};
use vermeer_error::{NotFoundError, VermeerResult};

/// Outcome of one handler.
#[derive(Debug, Clone)]
pub enum Resolution {
    /// Let the next handler decide
    Continue,
    /// Stop and surface the not-found error
    Fail,
    /// Stop and read the original file again
    Retry,
    /// Stop and answer every read from this source
    Replace(FileSource),
}

/// Reacts to a missing origin or formatted file.
#[async_trait::async_trait]
pub trait FileNotFoundHandler: Send + Sync {
    /// Decide how the failed read continues.
    async fn handle(&self, error: &NotFoundError, storage: &Arc<Storage>) -> VermeerResult<Resolution>;
}

/// How a handler is configured.
#[derive(Clone)]
pub enum HandlerConfig {
    /// Registered alias plus options
    Alias {
        /// Alias name, e.g. `"generate"`
        alias: String,
        /// Alias and filter options
        options: Options,
    },
    /// Prebuilt handler
    Instance(Arc<dyn FileNotFoundHandler>),
}

impl HandlerConfig {
    /// Parse a string or table recipe.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed recipes.
    pub fn from_value(value: &Value) -> VermeerResult<Self> {
        let recipe = Recipe::from_value(value)?;
        Ok(Self::Alias {
            alias: recipe.alias,
            options: recipe.options,
        })
    }
}

/// Derives the missing format, then retries the read.
///
/// Passes when the read is for an origin file, the format has no formatter,
/// the formatter declines or the origin itself is missing.
#[derive(Debug, Clone, Copy, Default)]
pub struct GenerateHandler;

#[async_trait::async_trait]
impl FileNotFoundHandler for GenerateHandler {
    #[instrument(skip_all, fields(path = %error.path, format = ?error.format))]
    async fn handle(&self, error: &NotFoundError, storage: &Arc<Storage>) -> VermeerResult<Resolution> {
        let Some(format) = error.format.as_deref() else {
            return Ok(Resolution::Continue);
        };
        if !storage.context()?.has_formatter(format)? {
            debug!("No formatter for missing format");
            return Ok(Resolution::Continue);
        }

        match storage.generate_formatted_file(&error.path, format).await {
            Ok(true) => Ok(Resolution::Retry),
            Ok(false) => Ok(Resolution::Continue),
            Err(e) if e.is_not_found() => {
                debug!("Origin missing, nothing to generate from");
                Ok(Resolution::Continue)
            }
            Err(e) => Err(e),
        }
    }
}

/// Logs the miss and passes.
#[derive(Debug, Clone, Copy, Default)]
pub struct LogHandler;

#[async_trait::async_trait]
impl FileNotFoundHandler for LogHandler {
    async fn handle(&self, error: &NotFoundError, _storage: &Arc<Storage>) -> VermeerResult<Resolution> {
        warn!(
            kind = %error.kind,
            context = %error.context,
            storage = %error.storage,
            path = %error.path,
            format = ?error.format,
            "File not found"
        );
        Ok(Resolution::Continue)
    }
}

/// Answers with a placeholder at a fixed URL.
#[derive(Debug, Clone)]
pub struct UrlHandler {
    url: String,
}

impl UrlHandler {
    /// Redirect reads to `url`.
    pub fn new(url: impl Into<String>) -> Self {
        Self { url: url.into() }
    }
}

#[async_trait::async_trait]
impl FileNotFoundHandler for UrlHandler {
    async fn handle(&self, _error: &NotFoundError, _storage: &Arc<Storage>) -> VermeerResult<Resolution> {
        Ok(Resolution::Replace(FileSource::Empty(
            EmptyFile::new().with_url(self.url.clone()),
        )))
    }
}

/// Answers with another existing format of the same origin.
#[derive(Debug, Clone)]
pub struct FormatHandler {
    format: String,
}

impl FormatHandler {
    /// Fall back to `format`.
    pub fn new(format: impl Into<String>) -> Self {
        Self {
            format: format.into(),
        }
    }
}

#[async_trait::async_trait]
impl FileNotFoundHandler for FormatHandler {
    async fn handle(&self, error: &NotFoundError, storage: &Arc<Storage>) -> VermeerResult<Resolution> {
        if error.format.as_deref() == Some(self.format.as_str()) {
            return Ok(Resolution::Continue);
        }
        if !storage.has_file(&error.path, Some(&self.format)).await? {
            debug!(fallback = %self.format, "Fallback format missing too");
            return Ok(Resolution::Continue);
        }
        let stored = FileSource::Stored(storage.file(&error.path));
        Ok(Resolution::Replace(FileSource::FixedFormat(FixedFormatFile::new(
            stored,
            self.format.clone(),
        ))))
    }
}

/// Answers with an empty placeholder, optionally at a URL.
#[derive(Debug, Clone, Default)]
pub struct EmptyHandler {
    url: Option<String>,
}

impl EmptyHandler {
    /// Placeholder with an optional URL.
    pub fn new(url: Option<String>) -> Self {
        Self { url }
    }
}

#[async_trait::async_trait]
impl FileNotFoundHandler for EmptyHandler {
    async fn handle(&self, _error: &NotFoundError, _storage: &Arc<Storage>) -> VermeerResult<Resolution> {
        let file = match &self.url {
            Some(url) => EmptyFile::new().with_url(url.clone()),
            None => EmptyFile::new(),
        };
        Ok(Resolution::Replace(FileSource::Empty(file)))
    }
}

/// Stops the chain.
#[derive(Debug, Clone, Copy, Default)]
pub struct FailHandler;

#[async_trait::async_trait]
impl FileNotFoundHandler for FailHandler {
    async fn handle(&self, _error: &NotFoundError, _storage: &Arc<Storage>) -> VermeerResult<Resolution> {
        Ok(Resolution::Fail)
    }
}

/// Allow and deny lists by format and storage name.
///
/// An origin miss never matches a format allow-list.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HandlerFilter {
    formats: Option<Vec<String>>,
    except_formats: Vec<String>,
    storages: Option<Vec<String>>,
    except_storages: Vec<String>,
}

impl HandlerFilter {
    /// Read `formats`, `except_formats`, `storages` and `except_storages`.
    pub fn from_options(options: &Options) -> VermeerResult<Self> {
        Ok(Self {
            formats: options.list("formats")?,
            except_formats: options.list("except_formats")?.unwrap_or_default(),
            storages: options.list("storages")?,
            except_storages: options.list("except_storages")?.unwrap_or_default(),
        })
    }

    /// Only these formats.
    pub fn with_formats(mut self, formats: Vec<String>) -> Self {
        self.formats = Some(formats);
        self
    }

    /// Never these formats.
    pub fn with_except_formats(mut self, formats: Vec<String>) -> Self {
        self.except_formats = formats;
        self
    }

    /// Only these storages.
    pub fn with_storages(mut self, storages: Vec<String>) -> Self {
        self.storages = Some(storages);
        self
    }

    /// Never these storages.
    pub fn with_except_storages(mut self, storages: Vec<String>) -> Self {
        self.except_storages = storages;
        self
    }

    /// Whether the filter lets everything through.
    pub fn is_empty(&self) -> bool {
        self.formats.is_none()
            && self.except_formats.is_empty()
            && self.storages.is_none()
            && self.except_storages.is_empty()
    }

    /// Whether a handler should see `error`.
    pub fn matches(&self, error: &NotFoundError) -> bool {
        let format = error.format.as_deref();
        if let Some(formats) = &self.formats
            && !format.is_some_and(|f| formats.iter().any(|allowed| allowed == f))
        {
            return false;
        }
        if format.is_some_and(|f| self.except_formats.iter().any(|denied| denied == f)) {
            return false;
        }
        if let Some(storages) = &self.storages
            && !storages.contains(&error.storage)
        {
            return false;
        }
        !self.except_storages.contains(&error.storage)
    }
}

/// Runs the wrapped handler only for misses its filter matches.
pub struct FilteredHandler {
    handler: Arc<dyn FileNotFoundHandler>,
    filter: HandlerFilter,
}

impl FilteredHandler {
    /// Wrap `handler`.
    pub fn new(handler: Arc<dyn FileNotFoundHandler>, filter: HandlerFilter) -> Self {
        Self { handler, filter }
    }
}

#[async_trait::async_trait]
impl FileNotFoundHandler for FilteredHandler {
    async fn handle(&self, error: &NotFoundError, storage: &Arc<Storage>) -> VermeerResult<Resolution> {
        if self.filter.matches(error) {
            self.handler.handle(error, storage).await
        } else {
            Ok(Resolution::Continue)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn miss(format: Option<&str>, storage: &str) -> NotFoundError {
        NotFoundError::new("avatars", storage, "ab12/me.jpg", format)
    }

    #[test]
    fn test_filter_formats() {
        let filter = HandlerFilter::default().with_formats(vec!["thumb".to_string()]);
        assert!(filter.matches(&miss(Some("thumb"), "main")));
        assert!(!filter.matches(&miss(Some("large"), "main")));
        assert!(!filter.matches(&miss(None, "main")));
    }

    #[test]
    fn test_filter_exceptions() {
        let filter = HandlerFilter::default()
            .with_except_formats(vec!["original".to_string()])
            .with_except_storages(vec!["temp".to_string()]);
        assert!(filter.matches(&miss(Some("thumb"), "main")));
        assert!(filter.matches(&miss(None, "main")));
        assert!(!filter.matches(&miss(Some("original"), "main")));
        assert!(!filter.matches(&miss(Some("thumb"), "temp")));
    }

    #[test]
    fn test_filter_from_options() {
        let recipe: Recipe = "generate:formats=thumb|small,storages=main".parse().unwrap();
        let filter = HandlerFilter::from_options(&recipe.options).unwrap();
        assert!(!filter.is_empty());
        assert!(filter.matches(&miss(Some("small"), "main")));
        assert!(!filter.matches(&miss(Some("small"), "temp")));
        assert!(HandlerFilter::default().is_empty());
    }
}
