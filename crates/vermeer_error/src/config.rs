//! Configuration error types.

/// Broken setup, reported where it was detected.
///
/// Raised for bad formatter, validator or handler wiring, overlapping
/// storage directories and unknown context, storage or disk names. Never
/// retried: the deployment has to change.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display(
    "Configuration Error: {}{} at line {} in {}",
    context.as_deref().map(|name| format!("[{}] ", name)).unwrap_or_default(),
    message,
    line,
    file
)]
pub struct ConfigError {
    /// What is wrong
    pub message: String,
    /// Context the setting belongs to, if known
    pub context: Option<String>,
    /// Line number where the error occurred
    pub line: u32,
    /// File where the error occurred
    pub file: &'static str,
}

impl ConfigError {
    /// Create a setup error at the current location.
    ///
    /// # Examples
    ///
    /// ```
    /// use vermeer_error::ConfigError;
    ///
    /// let err = ConfigError::new("resize needs 'width' or 'height'");
    /// assert!(err.message.contains("width"));
    /// assert!(err.context.is_none());
    /// ```
    #[track_caller]
    pub fn new(message: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        Self {
            message: message.into(),
            context: None,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Create a setup error for a named context.
    ///
    /// # Examples
    ///
    /// ```
    /// use vermeer_error::ConfigError;
    ///
    /// let err = ConfigError::for_context("avatars", "unknown disk 's3'");
    /// assert_eq!(err.context.as_deref(), Some("avatars"));
    /// assert!(format!("{}", err).contains("[avatars] unknown disk"));
    /// ```
    #[track_caller]
    pub fn for_context(context: impl Into<String>, message: impl Into<String>) -> Self {
        let location = std::panic::Location::caller();
        Self {
            message: message.into(),
            context: Some(context.into()),
            line: location.line(),
            file: location.file(),
        }
    }
}
