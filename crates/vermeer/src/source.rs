//! Uniform read-only views over a file, wherever it currently lives.

use crate::storage::Storage;
use chrono::{DateTime, Utc};
use futures::FutureExt;
use futures::future::BoxFuture;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, instrument};
use vermeer_disk::{base_name, guess_mime_type};
use vermeer_error::{HttpError, StorageError, StorageErrorKind, VermeerResult};

/// A readable property of a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum Attribute {
    /// Whether the file exists
    Exists,
    /// Public URL
    Url,
    /// Raw bytes
    Contents,
    /// Last path segment
    Basename,
    /// Size in bytes
    Size,
    /// Modification time
    LastModified,
    /// MIME type, if known
    MimeType,
}

/// The value of an [`Attribute`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttributeValue {
    /// Value of [`Attribute::Exists`]
    Exists(bool),
    /// Value of [`Attribute::Url`]
    Url(String),
    /// Value of [`Attribute::Contents`]
    Contents(Vec<u8>),
    /// Value of [`Attribute::Basename`]
    Basename(String),
    /// Value of [`Attribute::Size`]
    Size(u64),
    /// Value of [`Attribute::LastModified`]
    LastModified(DateTime<Utc>),
    /// Value of [`Attribute::MimeType`]
    MimeType(Option<String>),
}

impl AttributeValue {
    /// The attribute this value answers.
    pub fn attribute(&self) -> Attribute {
        match self {
            Self::Exists(_) => Attribute::Exists,
            Self::Url(_) => Attribute::Url,
            Self::Contents(_) => Attribute::Contents,
            Self::Basename(_) => Attribute::Basename,
            Self::Size(_) => Attribute::Size,
            Self::LastModified(_) => Attribute::LastModified,
            Self::MimeType(_) => Attribute::MimeType,
        }
    }
}

fn mismatch(expected: Attribute, value: &AttributeValue) -> StorageError {
    StorageError::new(StorageErrorKind::Unsupported(format!(
        "expected {} but the source answered {}",
        expected,
        value.attribute()
    )))
}

fn unsupported(what: impl Into<String>) -> StorageError {
    StorageError::new(StorageErrorKind::Unsupported(what.into()))
}

/// Rejects a format request on a source that has no formatted variants.
fn no_formats(kind: &str, format: Option<&str>) -> VermeerResult<()> {
    match format {
        Some(format) => Err(unsupported(format!("{} files have no format '{}'", kind, format)).into()),
        None => Ok(()),
    }
}

/// A file received from a client, sitting at a transient local path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedFile {
    path: PathBuf,
    original_name: String,
    mime_type: Option<String>,
}

impl UploadedFile {
    /// Wrap an upload stored at `path` under the client-supplied name.
    pub fn new(path: impl Into<PathBuf>, original_name: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            original_name: original_name.into(),
            mime_type: None,
        }
    }

    /// Override the MIME type reported by the client.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Local path of the upload.
    pub fn path(&self) -> &std::path::Path {
        &self.path
    }

    /// Client-supplied filename.
    pub fn original_name(&self) -> &str {
        &self.original_name
    }

    async fn metadata(&self) -> VermeerResult<std::fs::Metadata> {
        tokio::fs::metadata(&self.path).await.map_err(|e| {
            StorageError::new(StorageErrorKind::FileRead(format!(
                "{}: {}",
                self.path.display(),
                e
            )))
            .into()
        })
    }

    async fn attribute(&self, attribute: Attribute) -> VermeerResult<AttributeValue> {
        Ok(match attribute {
            Attribute::Exists => AttributeValue::Exists(tokio::fs::try_exists(&self.path).await.unwrap_or(false)),
            Attribute::Url => return Err(unsupported("uploaded files have no URL").into()),
            Attribute::Contents => AttributeValue::Contents(tokio::fs::read(&self.path).await.map_err(|e| {
                StorageError::new(StorageErrorKind::FileRead(format!("{}: {}", self.path.display(), e)))
            })?),
            Attribute::Basename => AttributeValue::Basename(self.original_name.clone()),
            Attribute::Size => AttributeValue::Size(self.metadata().await?.len()),
            Attribute::LastModified => {
                let modified = self.metadata().await?.modified().map_err(|e| {
                    StorageError::new(StorageErrorKind::FileRead(format!(
                        "{}: {}",
                        self.path.display(),
                        e
                    )))
                })?;
                AttributeValue::LastModified(DateTime::<Utc>::from(modified))
            }
            Attribute::MimeType => AttributeValue::MimeType(
                self.mime_type
                    .clone()
                    .or_else(|| guess_mime_type(&self.original_name)),
            ),
        })
    }
}

/// In-memory bytes with a name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContentFile {
    contents: Arc<[u8]>,
    name: String,
    mime_type: Option<String>,
    modified: DateTime<Utc>,
}

impl ContentFile {
    /// Wrap `contents` under `name`, modified now.
    pub fn new(contents: impl Into<Vec<u8>>, name: impl Into<String>) -> Self {
        Self {
            contents: Arc::from(contents.into()),
            name: name.into(),
            mime_type: None,
            modified: Utc::now(),
        }
    }

    /// Set the MIME type instead of guessing from the name.
    pub fn with_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.mime_type = Some(mime_type.into());
        self
    }

    /// Set the modification time.
    pub fn with_modified(mut self, modified: DateTime<Utc>) -> Self {
        self.modified = modified;
        self
    }

    /// Raw bytes.
    pub fn contents(&self) -> &[u8] {
        &self.contents
    }

    fn attribute(&self, attribute: Attribute) -> VermeerResult<AttributeValue> {
        Ok(match attribute {
            Attribute::Exists => AttributeValue::Exists(true),
            Attribute::Url => return Err(unsupported("in-memory files have no URL").into()),
            Attribute::Contents => AttributeValue::Contents(self.contents.to_vec()),
            Attribute::Basename => AttributeValue::Basename(self.name.clone()),
            Attribute::Size => AttributeValue::Size(self.contents.len() as u64),
            Attribute::LastModified => AttributeValue::LastModified(self.modified),
            Attribute::MimeType => AttributeValue::MimeType(
                self.mime_type.clone().or_else(|| guess_mime_type(&self.name)),
            ),
        })
    }
}

/// A file addressed by URL: `http(s)://` is fetched, `file://` read locally.
#[derive(Debug, Clone)]
pub struct UrlFile {
    url: reqwest::Url,
    client: reqwest::Client,
}

impl UrlFile {
    /// Parse `url`.
    ///
    /// # Errors
    ///
    /// Returns an HTTP error when `url` does not parse.
    pub fn new(url: &str) -> VermeerResult<Self> {
        let url = reqwest::Url::parse(url)
            .map_err(|e| HttpError::new(url, format!("invalid URL: {}", e)))?;
        Ok(Self {
            url,
            client: reqwest::Client::new(),
        })
    }

    /// Use a preconfigured client.
    pub fn with_client(mut self, client: reqwest::Client) -> Self {
        self.client = client;
        self
    }

    /// The URL.
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    fn local_path(&self) -> Option<PathBuf> {
        if self.url.scheme() == "file" {
            self.url.to_file_path().ok()
        } else {
            None
        }
    }

    #[track_caller]
    fn request_error(url: &reqwest::Url, step: &str, error: reqwest::Error) -> HttpError {
        let http = HttpError::new(url.as_str(), format!("{} failed: {}", step, error));
        match error.status() {
            Some(status) => http.with_status(status.as_u16()),
            None => http,
        }
    }

    async fn head(&self) -> VermeerResult<reqwest::Response> {
        self.client
            .head(self.url.clone())
            .send()
            .await
            .map_err(|e| Self::request_error(&self.url, "HEAD", e).into())
    }

    async fn fetch(&self) -> VermeerResult<Vec<u8>> {
        let response = self
            .client
            .get(self.url.clone())
            .send()
            .await
            .and_then(reqwest::Response::error_for_status)
            .map_err(|e| Self::request_error(&self.url, "GET", e))?;
        let bytes = response
            .bytes()
            .await
            .map_err(|e| Self::request_error(&self.url, "reading body", e))?;
        Ok(bytes.to_vec())
    }

    fn header(response: &reqwest::Response, name: reqwest::header::HeaderName) -> Option<String> {
        response
            .headers()
            .get(name)
            .and_then(|value| value.to_str().ok())
            .map(str::to_string)
    }

    #[instrument(skip(self), fields(url = %self.url))]
    async fn attribute(&self, attribute: Attribute) -> VermeerResult<AttributeValue> {
        if let Some(path) = self.local_path() {
            let name = path
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let local = UploadedFile::new(path, name);
            return match attribute {
                Attribute::Url => Ok(AttributeValue::Url(self.url.to_string())),
                other => local.attribute(other).await,
            };
        }

        Ok(match attribute {
            Attribute::Url => AttributeValue::Url(self.url.to_string()),
            Attribute::Basename => AttributeValue::Basename(
                self.url
                    .path_segments()
                    .and_then(|mut segments| segments.next_back())
                    .unwrap_or_default()
                    .to_string(),
            ),
            Attribute::Contents => AttributeValue::Contents(self.fetch().await?),
            Attribute::Exists => match self.head().await {
                Ok(response) => AttributeValue::Exists(response.status().is_success()),
                Err(e) => {
                    debug!(error = %e, "Treating unreachable URL as missing");
                    AttributeValue::Exists(false)
                }
            },
            Attribute::Size => {
                let response = self.head().await?;
                match Self::header(&response, reqwest::header::CONTENT_LENGTH)
                    .and_then(|len| len.parse::<u64>().ok())
                {
                    Some(len) => AttributeValue::Size(len),
                    None => AttributeValue::Size(self.fetch().await?.len() as u64),
                }
            }
            Attribute::LastModified => {
                let response = self.head().await?;
                let modified = Self::header(&response, reqwest::header::LAST_MODIFIED)
                    .and_then(|value| DateTime::parse_from_rfc2822(&value).ok())
                    .ok_or_else(|| unsupported(format!("{} reports no Last-Modified", self.url)))?;
                AttributeValue::LastModified(modified.with_timezone(&Utc))
            }
            Attribute::MimeType => {
                let response = self.head().await?;
                AttributeValue::MimeType(
                    Self::header(&response, reqwest::header::CONTENT_TYPE)
                        .map(|value| value.split(';').next().unwrap_or_default().trim().to_string())
                        .or_else(|| guess_mime_type(self.url.path())),
                )
            }
        })
    }
}

/// A file saved in a [`Storage`].
///
/// Serializes as a [`StoredFileReference`] and survives process restarts.
#[derive(Clone)]
pub struct StoredFile {
    path: String,
    storage: Arc<Storage>,
}

impl std::fmt::Debug for StoredFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredFile")
            .field("path", &self.path)
            .field("storage", &self.storage.name())
            .field("context", &self.storage.context_name())
            .finish()
    }
}

impl StoredFile {
    /// Reference the origin file at `path` in `storage`.
    pub fn new(path: impl Into<String>, storage: Arc<Storage>) -> Self {
        Self {
            path: path.into(),
            storage,
        }
    }

    /// Relative `{shard}/{filename}` path.
    pub fn path(&self) -> &str {
        &self.path
    }

    /// Owning storage.
    pub fn storage(&self) -> &Arc<Storage> {
        &self.storage
    }

    /// Serializable `(path, storage, context)` triple.
    pub fn reference(&self) -> StoredFileReference {
        StoredFileReference {
            path: self.path.clone(),
            storage: self.storage.name().to_string(),
            context: self.storage.context_name().to_string(),
        }
    }

    /// Whether the origin or formatted file exists.
    pub async fn exists(&self, format: Option<&str>) -> VermeerResult<bool> {
        self.storage.file_exists(&self.path, format).await
    }

    /// Public URL of the origin or formatted file.
    pub async fn url(&self, format: Option<&str>) -> VermeerResult<String> {
        self.storage.file_url(&self.path, format).await
    }

    /// Bytes of the origin or formatted file.
    pub async fn contents(&self, format: Option<&str>) -> VermeerResult<Vec<u8>> {
        self.storage.file_contents(&self.path, format).await
    }

    /// Size in bytes of the origin or formatted file.
    pub async fn size(&self, format: Option<&str>) -> VermeerResult<u64> {
        self.storage.file_size(&self.path, format).await
    }

    /// Existing formats of this file.
    pub async fn formats(&self) -> VermeerResult<Vec<String>> {
        self.storage.file_formats(&self.path).await
    }

    /// Derive `format`, overwriting any previous version.
    pub async fn generate(&self, format: &str) -> VermeerResult<bool> {
        self.storage.generate_formatted_file(&self.path, format).await
    }

    /// Delete the origin and its formats.
    pub async fn delete(&self) -> VermeerResult<()> {
        self.storage
            .delete_file(&self.path, None, crate::DeleteOptions::default())
            .await
    }
}

/// Persistable identity of a [`StoredFile`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StoredFileReference {
    /// Relative `{shard}/{filename}` path
    pub path: String,
    /// Storage name within the context
    pub storage: String,
    /// Context name
    pub context: String,
}

/// Another source pinned to one format.
#[derive(Debug, Clone)]
pub struct FixedFormatFile {
    inner: Box<FileSource>,
    format: String,
}

impl FixedFormatFile {
    /// Pin `inner` to `format`.
    pub fn new(inner: FileSource, format: impl Into<String>) -> Self {
        Self {
            inner: Box::new(inner),
            format: format.into(),
        }
    }

    /// Wrapped source.
    pub fn inner(&self) -> &FileSource {
        &self.inner
    }

    /// Pinned format.
    pub fn format(&self) -> &str {
        &self.format
    }
}

/// Answers the reads an [`EmptyFile`] cannot.
pub type EmptyFallback =
    Arc<dyn Fn(Attribute, Option<&str>) -> VermeerResult<AttributeValue> + Send + Sync>;

/// Placeholder with no bytes.
///
/// Never exists, has empty contents and zero size. Other reads go to the
/// fallback when one is set.
#[derive(Clone, Default)]
pub struct EmptyFile {
    url: Option<String>,
    fallback: Option<EmptyFallback>,
}

impl std::fmt::Debug for EmptyFile {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EmptyFile")
            .field("url", &self.url)
            .field("fallback", &self.fallback.is_some())
            .finish()
    }
}

impl EmptyFile {
    /// Placeholder without URL.
    pub fn new() -> Self {
        Self::default()
    }

    /// Placeholder answering URL reads with `url`.
    pub fn with_url(mut self, url: impl Into<String>) -> Self {
        self.url = Some(url.into());
        self
    }

    /// Route unknown reads to `fallback`.
    pub fn with_fallback(mut self, fallback: EmptyFallback) -> Self {
        self.fallback = Some(fallback);
        self
    }

    fn attribute(&self, attribute: Attribute, format: Option<&str>) -> VermeerResult<AttributeValue> {
        match attribute {
            Attribute::Exists => return Ok(AttributeValue::Exists(false)),
            Attribute::Contents => return Ok(AttributeValue::Contents(Vec::new())),
            Attribute::Size => return Ok(AttributeValue::Size(0)),
            Attribute::Url => {
                if let Some(url) = &self.url {
                    return Ok(AttributeValue::Url(url.clone()));
                }
            }
            _ => {}
        }

        match &self.fallback {
            Some(fallback) => fallback(attribute, format),
            None => match attribute {
                Attribute::Basename => Ok(AttributeValue::Basename(String::new())),
                Attribute::MimeType => Ok(AttributeValue::MimeType(None)),
                other => Err(unsupported(format!("empty files have no {}", other)).into()),
            },
        }
    }
}

/// A single logical file version, wherever it lives.
#[derive(Debug, Clone)]
pub enum FileSource {
    /// Client upload at a transient local path
    Uploaded(UploadedFile),
    /// File saved in a storage
    Stored(StoredFile),
    /// In-memory bytes
    Content(ContentFile),
    /// Remote or `file://` URL
    Url(UrlFile),
    /// Source pinned to one format
    FixedFormat(FixedFormatFile),
    /// Placeholder with no bytes
    Empty(EmptyFile),
}

impl FileSource {
    /// Read one attribute of the origin (`None`) or a formatted variant.
    ///
    /// Only stored sources have formats; others reject a format with an
    /// unsupported-operation error.
    pub fn attribute<'a>(
        &'a self,
        attribute: Attribute,
        format: Option<&'a str>,
    ) -> BoxFuture<'a, VermeerResult<AttributeValue>> {
        async move {
            match self {
                Self::Uploaded(file) => {
                    no_formats("uploaded", format)?;
                    file.attribute(attribute).await
                }
                Self::Content(file) => {
                    no_formats("in-memory", format)?;
                    file.attribute(attribute)
                }
                Self::Url(file) => {
                    no_formats("URL", format)?;
                    file.attribute(attribute).await
                }
                Self::Stored(file) => file.storage.attribute(&file.path, format, attribute).await,
                Self::FixedFormat(fixed) => {
                    if let Some(requested) = format
                        && requested != fixed.format
                    {
                        return Err(unsupported(format!(
                            "source is fixed to format '{}', not '{}'",
                            fixed.format, requested
                        ))
                        .into());
                    }
                    fixed.inner.attribute(attribute, Some(&fixed.format)).await
                }
                Self::Empty(file) => file.attribute(attribute, format),
            }
        }
        .boxed()
    }

    /// Whether the file exists.
    pub async fn exists(&self, format: Option<&str>) -> VermeerResult<bool> {
        match self.attribute(Attribute::Exists, format).await? {
            AttributeValue::Exists(exists) => Ok(exists),
            other => Err(mismatch(Attribute::Exists, &other).into()),
        }
    }

    /// Public URL.
    pub async fn url(&self, format: Option<&str>) -> VermeerResult<String> {
        match self.attribute(Attribute::Url, format).await? {
            AttributeValue::Url(url) => Ok(url),
            other => Err(mismatch(Attribute::Url, &other).into()),
        }
    }

    /// Raw bytes.
    pub async fn contents(&self, format: Option<&str>) -> VermeerResult<Vec<u8>> {
        match self.attribute(Attribute::Contents, format).await? {
            AttributeValue::Contents(contents) => Ok(contents),
            other => Err(mismatch(Attribute::Contents, &other).into()),
        }
    }

    /// Last path segment or original name.
    pub async fn basename(&self, format: Option<&str>) -> VermeerResult<String> {
        match self.attribute(Attribute::Basename, format).await? {
            AttributeValue::Basename(name) => Ok(name),
            other => Err(mismatch(Attribute::Basename, &other).into()),
        }
    }

    /// Size in bytes.
    pub async fn size(&self, format: Option<&str>) -> VermeerResult<u64> {
        match self.attribute(Attribute::Size, format).await? {
            AttributeValue::Size(size) => Ok(size),
            other => Err(mismatch(Attribute::Size, &other).into()),
        }
    }

    /// Modification time.
    pub async fn last_modified(&self, format: Option<&str>) -> VermeerResult<DateTime<Utc>> {
        match self.attribute(Attribute::LastModified, format).await? {
            AttributeValue::LastModified(modified) => Ok(modified),
            other => Err(mismatch(Attribute::LastModified, &other).into()),
        }
    }

    /// MIME type, if known.
    pub async fn mime_type(&self, format: Option<&str>) -> VermeerResult<Option<String>> {
        match self.attribute(Attribute::MimeType, format).await? {
            AttributeValue::MimeType(mime) => Ok(mime),
            other => Err(mismatch(Attribute::MimeType, &other).into()),
        }
    }

    /// Lowercase extension from the basename, else from the MIME type.
    pub async fn extension(&self) -> VermeerResult<Option<String>> {
        let name = self.basename(None).await.unwrap_or_default();
        if let Some((stem, ext)) = base_name(&name).rsplit_once('.')
            && !stem.is_empty()
            && !ext.is_empty()
        {
            return Ok(Some(ext.to_ascii_lowercase()));
        }

        let mime = self.mime_type(None).await.ok().flatten();
        Ok(mime.and_then(|mime| {
            mime_guess::get_mime_extensions_str(&mime)
                .and_then(|extensions| extensions.first())
                .map(|ext| ext.to_string())
        }))
    }

    /// Relative path, for stored sources.
    pub fn path(&self) -> Option<&str> {
        match self {
            Self::Stored(file) => Some(file.path()),
            Self::FixedFormat(fixed) => fixed.inner.path(),
            _ => None,
        }
    }

    /// Persistable reference, for stored sources.
    pub fn reference(&self) -> Option<StoredFileReference> {
        match self {
            Self::Stored(file) => Some(file.reference()),
            _ => None,
        }
    }
}

impl From<StoredFile> for FileSource {
    fn from(file: StoredFile) -> Self {
        Self::Stored(file)
    }
}

impl From<ContentFile> for FileSource {
    fn from(file: ContentFile) -> Self {
        Self::Content(file)
    }
}

impl From<UploadedFile> for FileSource {
    fn from(file: UploadedFile) -> Self {
        Self::Uploaded(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vermeer_error::VermeerErrorKind;

    #[test]
    fn test_invalid_url_is_reported_with_the_url() {
        let err = UrlFile::new("not a url").err().unwrap();
        match err.kind() {
            VermeerErrorKind::Http(http) => {
                assert_eq!(http.url, "not a url");
                assert!(http.status.is_none());
                assert!(!http.is_missing());
            }
            other => panic!("unexpected error: {}", other),
        }
    }

    #[tokio::test]
    async fn test_content_file_attributes() {
        let source = FileSource::from(ContentFile::new(b"hello".to_vec(), "notes.TXT"));
        assert!(source.exists(None).await.unwrap());
        assert_eq!(source.size(None).await.unwrap(), 5);
        assert_eq!(source.extension().await.unwrap().as_deref(), Some("txt"));
        assert_eq!(source.mime_type(None).await.unwrap().as_deref(), Some("text/plain"));
        assert!(source.url(None).await.is_err());
        assert!(source.contents(Some("thumb")).await.is_err());
    }

    #[tokio::test]
    async fn test_extension_from_mime_type() {
        let source = FileSource::from(ContentFile::new(Vec::new(), "blob").with_mime_type("image/png"));
        assert_eq!(source.extension().await.unwrap().as_deref(), Some("png"));
    }

    #[tokio::test]
    async fn test_empty_file() {
        let source = FileSource::Empty(EmptyFile::new().with_url("/img/blank.png"));
        assert!(!source.exists(None).await.unwrap());
        assert_eq!(source.size(None).await.unwrap(), 0);
        assert!(source.contents(None).await.unwrap().is_empty());
        assert_eq!(source.url(None).await.unwrap(), "/img/blank.png");
        assert!(source.last_modified(None).await.is_err());
    }

    #[tokio::test]
    async fn test_empty_file_fallback() {
        let fallback: EmptyFallback = Arc::new(|attribute: Attribute, _format: Option<&str>| match attribute {
            Attribute::LastModified => Ok(AttributeValue::LastModified(DateTime::<Utc>::UNIX_EPOCH)),
            _ => Ok(AttributeValue::Basename("placeholder".to_string())),
        });
        let source = FileSource::Empty(EmptyFile::new().with_fallback(fallback));
        assert_eq!(
            source.last_modified(None).await.unwrap(),
            DateTime::<Utc>::UNIX_EPOCH
        );
        assert!(source.url(None).await.is_err());
    }
}
