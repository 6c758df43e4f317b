use super::{FormattedFile, Formatter};
use crate::source::{FileSource, FixedFormatFile, StoredFile};
use crate::storage::Storage;
use std::cell::RefCell;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};
use vermeer_disk::base_name;
use vermeer_error::{FormatterError, FormatterErrorKind, NotFoundError, VermeerResult};

tokio::task_local! {
    /// Formats being derived by `from` formatters in the current task.
    static IN_PROGRESS: RefCell<HashSet<String>>;
}

/// Removes its key from the in-progress set when dropped.
struct InProgress(String);

impl InProgress {
    /// Mark `key` in progress, `None` when it already is.
    fn enter(key: String) -> Option<Self> {
        let inserted = IN_PROGRESS
            .try_with(|set| set.borrow_mut().insert(key.clone()))
            .unwrap_or(false);
        inserted.then_some(Self(key))
    }
}

impl Drop for InProgress {
    fn drop(&mut self) {
        let _ = IN_PROGRESS.try_with(|set| set.borrow_mut().remove(&self.0));
    }
}

/// Derives a format from another format of the same origin.
///
/// The other format is generated first when missing. Without a nested
/// formatter the other format is copied verbatim.
pub struct FromFormatter {
    format: String,
    from: String,
    required: bool,
    formatter: Option<Arc<dyn Formatter>>,
}

impl FromFormatter {
    /// Build the formatter for `format`, derived from `from`.
    ///
    /// # Errors
    ///
    /// Returns a self-reference error when `format` equals `from`.
    pub fn new(
        format: impl Into<String>,
        from: impl Into<String>,
        formatter: Option<Arc<dyn Formatter>>,
        required: bool,
    ) -> VermeerResult<Self> {
        let format = format.into();
        let from = from.into();
        if format == from {
            return Err(FormatterError::new(FormatterErrorKind::SelfReference { format }).into());
        }
        Ok(Self {
            format,
            from,
            required,
            formatter,
        })
    }

    /// Format this one is derived from.
    pub fn from_format(&self) -> &str {
        &self.from
    }

    fn origin(source: &FileSource) -> Option<&StoredFile> {
        match source {
            FileSource::Stored(file) => Some(file),
            FileSource::FixedFormat(fixed) => match fixed.inner() {
                FileSource::Stored(file) => Some(file),
                _ => None,
            },
            _ => None,
        }
    }

    async fn derive(
        &self,
        origin: &StoredFile,
        storage: &Arc<Storage>,
    ) -> VermeerResult<Option<FormattedFile>> {
        let path = origin.path();

        if !storage.has_file(path, Some(&self.from)).await? {
            let generated = match storage.generate_formatted_file(path, &self.from).await {
                Ok(generated) => generated,
                Err(e) if e.is_configuration() || self.required => return Err(e),
                Err(e) => {
                    debug!(error = %e, "Source format could not be generated");
                    false
                }
            };
            if !generated {
                if self.required {
                    return Err(NotFoundError::new(
                        storage.context_name(),
                        storage.name(),
                        path,
                        Some(&self.from),
                    )
                    .into());
                }
                debug!(from = %self.from, "Source format unavailable, declining");
                return Ok(None);
            }
        }

        let input = FileSource::FixedFormat(FixedFormatFile::new(
            FileSource::Stored(origin.clone()),
            self.from.clone(),
        ));

        match &self.formatter {
            Some(formatter) => formatter.format(&input, storage).await,
            None => {
                let contents = input.contents(None).await?;
                let extension = storage
                    .file_path(path, Some(&self.from))
                    .await?
                    .and_then(|full| {
                        let name = base_name(&full);
                        name.split_once('.').map(|(_, ext)| ext.to_string())
                    });
                FormattedFile::from_contents(&contents, extension.as_deref())
                    .await
                    .map(Some)
            }
        }
    }
}

#[async_trait::async_trait]
impl Formatter for FromFormatter {
    #[instrument(skip_all, fields(format = %self.format, from = %self.from))]
    async fn format(
        &self,
        source: &FileSource,
        storage: &Arc<Storage>,
    ) -> VermeerResult<Option<FormattedFile>> {
        if IN_PROGRESS.try_with(|_| ()).is_err() {
            return IN_PROGRESS
                .scope(RefCell::new(HashSet::new()), self.format(source, storage))
                .await;
        }

        let Some(origin) = Self::origin(source) else {
            debug!("Source is not a stored file, declining");
            return Ok(None);
        };

        let key = format!(
            "{}/{}:{}",
            storage.context_name(),
            storage.name(),
            self.format
        );
        let Some(_guard) = InProgress::enter(key) else {
            return Err(FormatterError::new(FormatterErrorKind::SelfReference {
                format: self.format.clone(),
            })
            .into());
        };

        self.derive(origin, storage).await
    }
}
