//! File-not-found error types.

/// Which file of a stored upload was missing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, derive_more::Display)]
pub enum NotFoundKind {
    /// The originally saved file
    #[display("origin")]
    Origin,
    /// A derived variant of the origin file
    #[display("formatted")]
    Formatted,
}

/// A read against a missing origin or formatted file.
///
/// Built by storage reads before the context's not-found handlers run, and
/// surfaced to the caller only when no handler resolves it.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display(
    "File Not Found: {} file '{}' (format: {}) in {}/{} at line {} in {}",
    kind,
    path,
    format.as_deref().unwrap_or("none"),
    context,
    storage,
    line,
    file
)]
pub struct NotFoundError {
    /// Origin or formatted
    pub kind: NotFoundKind,
    /// Context name
    pub context: String,
    /// Storage name within the context
    pub storage: String,
    /// Relative path of the origin file
    pub path: String,
    /// Requested format, `None` for origin files
    pub format: Option<String>,
    /// Line number where the error occurred
    pub line: u32,
    /// File where the error occurred
    pub file: &'static str,
}

impl NotFoundError {
    /// Create a not-found error; the kind follows from whether a format was requested.
    ///
    /// # Examples
    ///
    /// ```
    /// use vermeer_error::{NotFoundError, NotFoundKind};
    ///
    /// let err = NotFoundError::new("avatars", "main", "ab12/photo.jpg", Some("thumb"));
    /// assert_eq!(err.kind, NotFoundKind::Formatted);
    /// assert_eq!(err.format.as_deref(), Some("thumb"));
    /// ```
    #[track_caller]
    pub fn new(
        context: impl Into<String>,
        storage: impl Into<String>,
        path: impl Into<String>,
        format: Option<&str>,
    ) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind: if format.is_some() {
                NotFoundKind::Formatted
            } else {
                NotFoundKind::Origin
            },
            context: context.into(),
            storage: storage.into(),
            path: path.into(),
            format: format.map(str::to_string),
            line: location.line(),
            file: location.file(),
        }
    }
}
