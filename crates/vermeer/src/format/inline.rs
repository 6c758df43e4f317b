use super::{FormattedFile, Formatter};
use crate::source::FileSource;
use crate::storage::Storage;
use std::sync::Arc;
use tracing::debug;
use vermeer_error::VermeerResult;

/// Bytes produced by an inline formatter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FormattedContent {
    /// Output bytes
    pub contents: Vec<u8>,
    /// Output extension, if any
    pub extension: Option<String>,
}

impl FormattedContent {
    /// Output with an extension.
    pub fn new(contents: Vec<u8>, extension: impl Into<String>) -> Self {
        Self {
            contents,
            extension: Some(extension.into()),
        }
    }
}

/// Closure from source bytes to output bytes; `Ok(None)` declines.
pub type InlineFn =
    Arc<dyn Fn(&[u8]) -> VermeerResult<Option<FormattedContent>> + Send + Sync>;

/// Formatter wrapping an [`InlineFn`].
pub struct InlineFormatter {
    func: InlineFn,
}

impl InlineFormatter {
    /// Wrap `func`.
    pub fn new(func: InlineFn) -> Self {
        Self { func }
    }

    /// Copies the source unchanged, optionally under another extension.
    pub fn copy(extension: Option<String>) -> Self {
        Self::new(Arc::new(move |contents: &[u8]| {
            Ok(Some(FormattedContent {
                contents: contents.to_vec(),
                extension: extension.clone(),
            }))
        }))
    }
}

#[async_trait::async_trait]
impl Formatter for InlineFormatter {
    async fn format(
        &self,
        source: &FileSource,
        _storage: &Arc<Storage>,
    ) -> VermeerResult<Option<FormattedFile>> {
        let contents = source.contents(None).await?;
        match (self.func)(&contents)? {
            Some(output) => {
                let extension = match output.extension {
                    Some(ext) => Some(ext),
                    None => source.extension().await?,
                };
                FormattedFile::from_contents(&output.contents, extension.as_deref())
                    .await
                    .map(Some)
            }
            None => {
                debug!("Inline formatter declined");
                Ok(None)
            }
        }
    }
}
