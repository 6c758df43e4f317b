//! Error types for the Vermeer library.
//!
//! This crate provides the foundation error types used throughout the Vermeer ecosystem.
//!
//! # Error Hierarchy
//!
//! All errors follow the `ErrorKind` + wrapper struct pattern for clean error handling:
//! - `*ErrorKind` enum defines specific error conditions
//! - `*Error` struct wraps the kind with source location tracking
//! - All errors use `#[track_caller]` for automatic location capture
//!
//! # Examples
//!
//! ```
//! use vermeer_error::{ConfigError, VermeerResult};
//!
//! fn load_recipe() -> VermeerResult<String> {
//!     Err(ConfigError::new("Unknown formatter alias"))?
//! }
//!
//! assert!(load_recipe().unwrap_err().is_configuration());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod error;
mod formatter;
mod http;
mod not_found;
mod storage;
mod validation;

pub use config::ConfigError;
pub use error::{VermeerError, VermeerErrorKind, VermeerResult};
pub use formatter::{FormatterError, FormatterErrorKind};
pub use http::HttpError;
pub use not_found::{NotFoundError, NotFoundKind};
pub use storage::{StorageError, StorageErrorKind};
pub use validation::ValidationError;
