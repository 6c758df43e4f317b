//! Top-level error wrapper types.

use crate::{
    ConfigError, FormatterError, HttpError, NotFoundError, StorageError, ValidationError,
};

/// This is the foundation error enum wrapping every Vermeer error type.
///
/// # Examples
///
/// ```
/// use vermeer_error::{VermeerError, StorageError, StorageErrorKind};
///
/// let err: VermeerError = StorageError::new(StorageErrorKind::Unavailable("disk".into())).into();
/// assert!(format!("{}", err).contains("Storage Error"));
/// ```
#[derive(Debug, derive_more::From, derive_more::Display, derive_more::Error)]
pub enum VermeerErrorKind {
    /// Configuration error
    #[from(ConfigError)]
    Config(ConfigError),
    /// Formatter lookup or processing error
    #[from(FormatterError)]
    Formatter(FormatterError),
    /// Aggregated validation failure
    #[from(ValidationError)]
    Validation(ValidationError),
    /// Missing origin or formatted file
    #[from(NotFoundError)]
    NotFound(NotFoundError),
    /// Blob backend or local filesystem error
    #[from(StorageError)]
    Storage(StorageError),
    /// Remote source error
    #[from(HttpError)]
    Http(HttpError),
}

/// Vermeer error with kind discrimination.
#[derive(Debug, derive_more::Display, derive_more::Error)]
#[display("Vermeer Error: {}", _0)]
pub struct VermeerError(Box<VermeerErrorKind>);

impl VermeerError {
    /// Create a new error from a kind.
    pub fn new(kind: VermeerErrorKind) -> Self {
        Self(Box::new(kind))
    }

    /// Get the error kind.
    pub fn kind(&self) -> &VermeerErrorKind {
        &self.0
    }

    /// The not-found condition, if this is one.
    pub fn not_found(&self) -> Option<&NotFoundError> {
        match self.kind() {
            VermeerErrorKind::NotFound(err) => Some(err),
            _ => None,
        }
    }

    /// The aggregated validation failure, if this is one.
    pub fn validation(&self) -> Option<&ValidationError> {
        match self.kind() {
            VermeerErrorKind::Validation(err) => Some(err),
            _ => None,
        }
    }

    /// Whether this is a missing-file error.
    pub fn is_not_found(&self) -> bool {
        self.not_found().is_some()
    }

    /// Whether this is a validation error.
    pub fn is_validation(&self) -> bool {
        self.validation().is_some()
    }

    /// Whether this error points at a deployment or setup bug.
    pub fn is_configuration(&self) -> bool {
        match self.kind() {
            VermeerErrorKind::Config(_) => true,
            VermeerErrorKind::Formatter(err) => err.is_configuration(),
            _ => false,
        }
    }
}

// Generic From implementation for any type that converts to VermeerErrorKind
impl<T> From<T> for VermeerError
where
    T: Into<VermeerErrorKind>,
{
    fn from(err: T) -> Self {
        Self::new(err.into())
    }
}

/// Result type for Vermeer operations.
pub type VermeerResult<T> = std::result::Result<T, VermeerError>;
