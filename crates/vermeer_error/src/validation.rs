//! Validation error types.

/// Aggregated validation failure.
///
/// Carries the message of every validator that failed, in evaluation order.
///
/// # Examples
///
/// ```
/// use vermeer_error::ValidationError;
///
/// let err = ValidationError::new(vec![
///     "The file may not be greater than 10M.".to_string(),
///     "The file must have one of the extensions: jpg, png.".to_string(),
/// ]);
/// assert_eq!(err.messages.len(), 2);
/// assert!(format!("{}", err).contains("10M"));
/// ```
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Validation Error: {} at line {} in {}", messages.join(" "), line, file)]
pub struct ValidationError {
    /// Messages of all failing validators
    pub messages: Vec<String>,
    /// Line number where the error occurred
    pub line: u32,
    /// File where the error occurred
    pub file: &'static str,
}

impl ValidationError {
    /// Create a new validation error from the collected messages.
    #[track_caller]
    pub fn new(messages: Vec<String>) -> Self {
        let location = std::panic::Location::caller();
        Self {
            messages,
            line: location.line(),
            file: location.file(),
        }
    }
}
