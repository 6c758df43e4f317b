//! Vermeer - upload lifecycle management on top of blob storage.
//!
//! Vermeer stores uploaded files below collision-resistant, sharded paths,
//! derives formatted variants (thumbnails, resized copies, watermarked
//! versions) eagerly or on demand, resolves reads of missing files through a
//! configurable fallback chain and reclaims orphaned temporary uploads.
//!
//! # Architecture
//!
//! - [`Manager`] - registry of named [`Context`]s built from [`VermeerConfig`]
//! - [`Context`] - one configuration domain (e.g. "avatars") owning a main and
//!   a temp [`Storage`], its formats, validators and not-found handlers
//! - [`Storage`] - save/derive/delete/query against one [`Disk`]
//! - [`NameGenerator`] - path allocation, sharding and path validation
//! - [`Formatter`] - transforms producing derived files; built from recipes
//!   through the [`Registry`]
//! - [`FileSource`] - uniform read-only view over a file wherever it lives
//! - [`GarbageCollector`] - expiry sweep over temp storages
//!
//! # Example
//!
//! ```rust,no_run
//! use vermeer::{ContentFile, FileSource, Manager, VermeerConfig};
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = Manager::from_config(VermeerConfig::load()?)?;
//! let avatars = manager.context("avatars")?;
//! let storage = avatars.main_storage();
//!
//! let upload = FileSource::Content(ContentFile::new(std::fs::read("me.jpg")?, "me.jpg"));
//! let stored = storage.save_new_file(&upload, true).await?;
//!
//! // Generated on first access when a generate handler is configured
//! let thumb_url = stored.url(Some("thumb")).await?;
//! println!("{} -> {}", stored.path(), thumb_url);
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod config;
mod context;
mod format;
mod gc;
mod manager;
mod naming;
mod not_found;
mod recipe;
mod registry;
mod source;
mod storage;
mod telemetry;
mod validation;

pub use config::{
    ContextConfig, ContextConfigBuilder, DiskConfig, DiskDriver, GarbageCollectorConfig,
    GenerateFormats, NameGeneratorConfig, NameGeneratorConfigBuilder, NameStrategy, RunMode,
    StorageConfig, StorageConfigBuilder, VermeerConfig,
};
pub use context::{Context, unit_of_work};
pub use format::{
    Anchor, ChainFormatter, FormattedContent, FormattedFile, Formatter, FormatterConfig,
    FromFormatter, ImageFn, ImageFormatter, ImageHandle, ImageOperation, ImageOptions,
    InlineFn, InlineFormatter, Watermark,
};
pub use gc::GarbageCollector;
pub use manager::{Manager, ManagerBuilder};
pub use naming::{NameGenerator, validate_origin_path};
pub use not_found::{
    EmptyHandler, FailHandler, FileNotFoundHandler, FilteredHandler, FormatHandler,
    GenerateHandler, HandlerConfig, HandlerFilter, LogHandler, Resolution, UrlHandler,
};
pub use recipe::{Options, Recipe};
pub use registry::{
    DEFAULT_MAX_PARSED_DIMENSION, FormatterBuild, FormatterFactory, HandlerFactory, NameParser,
    Registry, ValidatorFactory,
    formatter_factory, handler_factory, name_parser, validator_factory,
};
pub use source::{
    Attribute, AttributeValue, ContentFile, EmptyFallback, EmptyFile, FileSource,
    FixedFormatFile, StoredFile, StoredFileReference, UploadedFile, UrlFile,
};
pub use storage::{DeleteOptions, Storage, StorageRole};
pub use telemetry::init_tracing;
pub use validation::{
    ExtensionValidator, ImageDimensionsValidator, MimeTypeValidator, SizeValidator, Validator,
    ValidatorConfig,
};

pub use vermeer_disk::{Disk, LocalDisk, MemoryDisk};
pub use vermeer_error::*;
