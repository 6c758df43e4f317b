//! Formatter error types.

/// Specific formatter error conditions.
#[derive(Debug, Clone, PartialEq, Eq, Hash, derive_more::Display)]
pub enum FormatterErrorKind {
    /// No formatter is configured for the format and no name parser matched
    #[display("Formatter '{}' not found in context '{}'", format, context)]
    NotFound {
        /// Context the lookup ran in
        context: String,
        /// Requested format name
        format: String,
    },

    /// A `from` formatter transitively depends on itself
    #[display("Format '{}' is derived from itself", format)]
    SelfReference {
        /// Format whose derivation re-entered itself
        format: String,
    },

    /// Image decoding or encoding failed after the input was accepted
    #[display("Image processing failed: {}", _0)]
    Image(String),
}

/// Formatter error with location tracking.
#[derive(Debug, Clone, derive_more::Display, derive_more::Error)]
#[display("Formatter Error: {} at line {} in {}", kind, line, file)]
pub struct FormatterError {
    /// The specific error kind
    pub kind: FormatterErrorKind,
    /// Line number where error occurred
    pub line: u32,
    /// File where error occurred
    pub file: &'static str,
}

impl FormatterError {
    /// Create a new formatter error with location tracking.
    #[track_caller]
    pub fn new(kind: FormatterErrorKind) -> Self {
        let location = std::panic::Location::caller();
        Self {
            kind,
            line: location.line(),
            file: location.file(),
        }
    }

    /// Get the error kind.
    pub fn kind(&self) -> &FormatterErrorKind {
        &self.kind
    }

    /// Whether this error reports broken formatter wiring rather than a
    /// failure processing one file.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self.kind,
            FormatterErrorKind::NotFound { .. } | FormatterErrorKind::SelfReference { .. }
        )
    }
}
