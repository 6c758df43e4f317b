//! Configuration structures for contexts, storages and disks.
//!
//! Configuration is loaded with the following precedence (later sources win):
//! 1. Bundled defaults (`vermeer.toml` shipped with the library)
//! 2. `~/.config/vermeer/vermeer.toml`
//! 3. `./vermeer.toml`
//!
//! ```toml
//! run_mode = "interactive"
//!
//! [disks.local]
//! driver = "local"
//! root = "storage"
//! url = "/storage"
//!
//! [contexts.avatars]
//! formats = { thumb = "thumbnail:width=120,height=120", "2x" = ["resize:width=640", "watermark:image=logo.png"] }
//! validate = ["size:max=10M", "extensions:allowed=jpg|png"]
//! file_not_found_handlers = ["generate"]
//!
//! [contexts.avatars.main_storage]
//! generate_formats_on_save = ["thumb"]
//! ```

use config::{Config, File, FileFormat};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::path::PathBuf;
use tracing::{debug, instrument};
use vermeer_error::{ConfigError, VermeerError, VermeerResult};

/// Whether the process serves interactive requests or runs batch jobs.
///
/// The probabilistic garbage collection trigger only fires in interactive
/// mode; batch jobs use [`Manager::collect_garbage`](crate::Manager::collect_garbage).
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum RunMode {
    /// Request handling, GC may run inline
    #[default]
    Interactive,
    /// Console or scheduled job, GC never runs implicitly
    Batch,
}

/// Blob backend driver.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum DiskDriver {
    /// Directory on the local filesystem
    #[default]
    Local,
    /// In-process map, lost on exit
    Memory,
}

/// A named blob backend.
#[derive(
    Debug,
    Clone,
    Default,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
)]
#[setters(prefix = "with_", strip_option)]
pub struct DiskConfig {
    /// Backend driver
    #[serde(default)]
    driver: DiskDriver,

    /// Root directory for the local driver
    #[serde(default, skip_serializing_if = "Option::is_none")]
    root: Option<PathBuf>,

    /// Public base URL prepended to paths
    #[serde(default, skip_serializing_if = "Option::is_none")]
    url: Option<String>,
}

/// How new origin filenames are chosen.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, strum::Display,
)]
#[serde(rename_all = "snake_case")]
#[strum(serialize_all = "snake_case")]
pub enum NameStrategy {
    /// Random alphanumeric token
    #[default]
    Random,
    /// Slug of the uploaded name, random when the slug is taken or empty
    OriginName,
    /// The configured constant filename
    Fixed,
}

/// Path allocation settings for one storage.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
#[builder(default, setter(into))]
pub struct NameGeneratorConfig {
    /// Filename strategy
    #[serde(default)]
    strategy: NameStrategy,

    /// Length of random filenames
    #[serde(default = "default_length")]
    length: usize,

    /// Filename used by the fixed strategy
    #[serde(default = "default_filename")]
    filename: String,

    /// Directory prefix above the context directory.
    ///
    /// `None` falls back to `"uploads"` for main storages and `"temp"` for
    /// temp storages; an empty string disables the prefix.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    global_prefix: Option<String>,

    /// Shards holding this many entries are not reused
    #[serde(default = "default_max_subdir_files_count")]
    max_subdir_files_count: usize,

    /// Length of newly minted shard names
    #[serde(default = "default_subdir_name_length")]
    subdir_name_length: usize,

    /// Extensions never kept on stored files
    #[serde(default = "default_disallowed_extensions")]
    disallowed_extensions: Vec<String>,
}

fn default_length() -> usize {
    20
}

fn default_filename() -> String {
    "file".to_string()
}

fn default_max_subdir_files_count() -> usize {
    1000
}

fn default_subdir_name_length() -> usize {
    4
}

fn default_disallowed_extensions() -> Vec<String> {
    [
        "php", "php3", "php4", "php5", "php6", "php7", "phps", "phtml", "phar", "pl", "py",
        "pyc", "cgi", "asp", "aspx", "ascx", "ashx", "asmx", "jsp", "jspx", "sh", "bash", "bat",
        "cmd", "exe", "com", "dll", "htaccess", "htpasswd", "shtml",
    ]
    .iter()
    .map(|ext| ext.to_string())
    .collect()
}

impl Default for NameGeneratorConfig {
    fn default() -> Self {
        Self {
            strategy: NameStrategy::default(),
            length: default_length(),
            filename: default_filename(),
            global_prefix: None,
            max_subdir_files_count: default_max_subdir_files_count(),
            subdir_name_length: default_subdir_name_length(),
            disallowed_extensions: default_disallowed_extensions(),
        }
    }
}

/// Longest filename or shard name a generator may produce.
pub(crate) const MAX_NAME_LENGTH: usize = 255;

impl NameGeneratorConfig {
    /// Check that the settings yield paths the origin path check accepts.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when `length` or `subdir_name_length`
    /// falls outside `1..=255`, or `max_subdir_files_count` is zero.
    pub fn validate(&self) -> VermeerResult<()> {
        for (key, value) in [
            ("length", self.length),
            ("subdir_name_length", self.subdir_name_length),
        ] {
            if !(1..=MAX_NAME_LENGTH).contains(&value) {
                return Err(ConfigError::new(format!(
                    "name_generator.{} must be between 1 and {}, got {}",
                    key, MAX_NAME_LENGTH, value
                ))
                .into());
            }
        }
        if self.max_subdir_files_count == 0 {
            return Err(
                ConfigError::new("name_generator.max_subdir_files_count must be at least 1").into(),
            );
        }
        Ok(())
    }
}

/// Which formats are derived right after a file is saved.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum GenerateFormats {
    /// `true` derives every configured format, `false` none
    All(bool),
    /// Derive only the listed formats
    Formats(Vec<String>),
}

impl Default for GenerateFormats {
    fn default() -> Self {
        Self::All(false)
    }
}

impl GenerateFormats {
    /// Formats to derive, given every format configured on the context.
    pub fn select(&self, configured: impl IntoIterator<Item = String>) -> Vec<String> {
        match self {
            Self::All(true) => configured.into_iter().collect(),
            Self::All(false) => Vec::new(),
            Self::Formats(formats) => formats.clone(),
        }
    }
}

/// Settings for a main or temp storage.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Eq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
#[builder(default, setter(into))]
pub struct StorageConfig {
    /// Disk name from `[disks]`
    #[serde(default = "default_disk")]
    disk: String,

    /// Storage name, `"main"` or `"temp"` when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    name: Option<String>,

    /// Formats derived on save
    #[serde(default)]
    generate_formats_on_save: GenerateFormats,

    /// Path allocation settings
    #[serde(default)]
    name_generator: NameGeneratorConfig,
}

fn default_disk() -> String {
    "local".to_string()
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            disk: default_disk(),
            name: None,
            generate_formats_on_save: GenerateFormats::default(),
            name_generator: NameGeneratorConfig::default(),
        }
    }
}

/// Garbage collector settings.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, derive_getters::Getters,
)]
pub struct GarbageCollectorConfig {
    /// Seconds a temp file survives before it is collectable
    #[serde(default = "default_lifetime")]
    lifetime: u64,
}

fn default_lifetime() -> u64 {
    86_400
}

impl GarbageCollectorConfig {
    /// Settings with the given lifetime in seconds.
    pub fn new(lifetime: u64) -> Self {
        Self { lifetime }
    }

    /// Lifetime as a duration.
    pub fn lifetime_duration(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.lifetime)
    }
}

impl Default for GarbageCollectorConfig {
    fn default() -> Self {
        Self::new(default_lifetime())
    }
}

/// Settings for one context.
///
/// Formats, validators and handlers are kept as raw recipe values and
/// resolved through the [`Registry`](crate::Registry) when the context is
/// built.
#[derive(
    Debug,
    Clone,
    PartialEq,
    Serialize,
    Deserialize,
    derive_getters::Getters,
    derive_setters::Setters,
    derive_builder::Builder,
)]
#[setters(prefix = "with_")]
#[builder(default, setter(into))]
pub struct ContextConfig {
    /// Durable storage
    #[serde(default)]
    main_storage: StorageConfig,

    /// Ephemeral storage
    #[serde(default)]
    temp_storage: StorageConfig,

    /// Format name to formatter recipe
    #[serde(default)]
    formats: BTreeMap<String, Value>,

    /// Validator recipes, evaluated in order
    #[serde(default)]
    validate: Vec<Value>,

    /// Not-found handler recipes, consulted in order
    #[serde(default)]
    file_not_found_handlers: Vec<Value>,

    /// Garbage collector settings
    #[serde(default)]
    garbage_collector: GarbageCollectorConfig,

    /// Numerator of the GC trigger chance
    #[serde(default = "default_gc_probability")]
    gc_probability: u32,

    /// Denominator of the GC trigger chance
    #[serde(default = "default_gc_divisor")]
    gc_divisor: u32,
}

fn default_gc_probability() -> u32 {
    1
}

fn default_gc_divisor() -> u32 {
    100
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            main_storage: StorageConfig::default(),
            temp_storage: StorageConfig::default(),
            formats: BTreeMap::new(),
            validate: Vec::new(),
            file_not_found_handlers: Vec::new(),
            garbage_collector: GarbageCollectorConfig::default(),
            gc_probability: default_gc_probability(),
            gc_divisor: default_gc_divisor(),
        }
    }
}

/// Top-level Vermeer configuration.
///
/// # Example
///
/// ```no_run
/// use vermeer::VermeerConfig;
///
/// # fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = VermeerConfig::load()?;
/// for name in config.contexts.keys() {
///     println!("context: {}", name);
/// }
/// # Ok(())
/// # }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VermeerConfig {
    /// Disk name to backend settings
    #[serde(default)]
    pub disks: BTreeMap<String, DiskConfig>,

    /// Context name to context settings
    #[serde(default)]
    pub contexts: BTreeMap<String, ContextConfig>,

    /// Interactive or batch
    #[serde(default)]
    pub run_mode: RunMode,
}

impl VermeerConfig {
    /// Load configuration from a specific file path.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read or parsed.
    #[instrument(skip(path), fields(path = %path.as_ref().display()))]
    pub fn from_file(path: impl AsRef<std::path::Path>) -> VermeerResult<Self> {
        debug!("Loading configuration from file");

        let builder = Config::builder().add_source(File::from(path.as_ref()));
        Self::build(builder, &path.as_ref().display().to_string())
    }

    /// Parse configuration from a TOML string.
    ///
    /// # Errors
    ///
    /// Returns an error if the string is not valid configuration.
    #[instrument(skip(toml))]
    pub fn from_toml(toml: &str) -> VermeerResult<Self> {
        let builder = Config::builder().add_source(File::from_str(toml, FileFormat::Toml));
        Self::build(builder, "inline TOML")
    }

    /// Load configuration with precedence: current dir > home dir > bundled defaults.
    ///
    /// User config files are optional and silently skipped if not found.
    ///
    /// # Errors
    ///
    /// Returns an error if any present source fails to parse.
    #[instrument]
    pub fn load() -> VermeerResult<Self> {
        debug!("Loading configuration with precedence: current dir > home dir > bundled defaults");

        const DEFAULT_CONFIG: &str = include_str!("../vermeer.toml");

        let mut builder =
            Config::builder().add_source(File::from_str(DEFAULT_CONFIG, FileFormat::Toml));

        if let Some(home) = dirs::home_dir() {
            let home_config = home.join(".config/vermeer/vermeer.toml");
            builder = builder.add_source(File::from(home_config).required(false));
        }

        builder = builder.add_source(File::with_name("vermeer").required(false));

        Self::build(builder, "layered sources")
    }

    fn build(
        builder: config::ConfigBuilder<config::builder::DefaultState>,
        origin: &str,
    ) -> VermeerResult<Self> {
        builder
            .build()
            .map_err(|e| {
                VermeerError::from(ConfigError::new(format!(
                    "Failed to read configuration from {}: {}",
                    origin, e
                )))
            })?
            .try_deserialize()
            .map_err(|e| {
                VermeerError::from(ConfigError::new(format!(
                    "Failed to parse configuration: {}",
                    e
                )))
            })
    }
}
