//! Remote source error types.

/// A request for a remote file source failed.
///
/// Raised while reading URL-backed sources: the URL did not parse, the
/// server was unreachable, or it answered with an error status.
///
/// # Examples
///
/// ```
/// use vermeer_error::HttpError;
///
/// let err = HttpError::new("https://cdn.example.com/logo.png", "GET failed").with_status(404);
/// assert_eq!(err.status, Some(404));
/// assert!(err.is_missing());
/// assert!(format!("{}", err).contains("logo.png"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display(
    "HTTP Error: {} for {} (status: {}) at line {} in {}",
    message,
    url,
    status.map(|code| code.to_string()).unwrap_or_else(|| "none".to_string()),
    line,
    file
)]
pub struct HttpError {
    /// URL of the remote source
    pub url: String,
    /// What went wrong
    pub message: String,
    /// Response status, when the server answered
    pub status: Option<u16>,
    /// Line number where the error occurred
    pub line: u32,
    /// File where the error occurred
    pub file: &'static str,
}

impl HttpError {
    /// Create an error for `url` at the current location.
    #[track_caller]
    pub fn new(url: impl Into<String>, message: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        Self {
            url: url.into(),
            message: message.into(),
            status: None,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Record the response status.
    pub fn with_status(mut self, status: u16) -> Self {
        self.status = Some(status);
        self
    }

    /// Whether the server reported the file as absent (404 or 410).
    pub fn is_missing(&self) -> bool {
        matches!(self.status, Some(404 | 410))
    }
}
