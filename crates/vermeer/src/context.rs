//! Named configuration domains.

use crate::config::{ContextConfig, RunMode};
use crate::format::{Formatter, FormatterConfig};
use crate::gc::GarbageCollector;
use crate::naming::{root_directory, roots_overlap};
use crate::not_found::{FileNotFoundHandler, HandlerConfig};
use crate::registry::Registry;
use crate::source::FileSource;
use crate::storage::{Storage, StorageRole};
use crate::validation::{Validator, ValidatorConfig, run_validators};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock, Weak};
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};
use vermeer_disk::Disk;
use vermeer_error::{
    ConfigError, FormatterError, FormatterErrorKind, StorageError, StorageErrorKind,
    VermeerError, VermeerErrorKind, VermeerResult,
};

tokio::task_local! {
    /// Contexts whose temp storage was used in the current unit of work.
    static TEMP_TOUCHED: RefCell<HashSet<String>>;
}

/// Run `work` as one unit of work, such as one request.
///
/// Inside the unit, the first [`Context::temp_storage`] call of each
/// context gets its own chance to trigger garbage collection. Outside any
/// unit, that chance is taken once per context for the process lifetime.
///
/// # Example
///
/// ```
/// use vermeer::{ContextConfig, Manager, MemoryDisk, unit_of_work};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let manager = Manager::builder()
///     .disk("local", MemoryDisk::new())
///     .context("avatars", ContextConfig::default())
///     .build()?;
/// let avatars = manager.context("avatars")?;
///
/// // One call per incoming request
/// let files = unit_of_work(async { avatars.temp_storage().await.files().await }).await?;
/// assert!(files.is_empty());
/// # Ok(())
/// # }
/// ```
pub async fn unit_of_work<F: Future>(work: F) -> F::Output {
    TEMP_TOUCHED.scope(RefCell::new(HashSet::new()), work).await
}

/// Programmatic additions layered over a [`ContextConfig`].
#[derive(Clone, Default)]
pub(crate) struct ContextParts {
    pub(crate) formats: BTreeMap<String, FormatterConfig>,
    pub(crate) validators: Vec<ValidatorConfig>,
    pub(crate) handlers: Vec<HandlerConfig>,
}

/// One configuration domain, e.g. `"avatars"`.
///
/// Owns a main and a temp [`Storage`], its formatters, validators and
/// not-found handlers. Configured formatters and validators are built when
/// the context is created, so wiring errors surface at setup. Not-found
/// handlers are resolved on the first miss and cached, as are formats
/// recognised only by a name parser.
pub struct Context {
    name: String,
    config: ContextConfig,
    run_mode: RunMode,
    registry: Registry,
    formats: BTreeMap<String, Arc<dyn Formatter>>,
    parsed: RwLock<HashMap<String, Arc<dyn Formatter>>>,
    validators: Vec<Arc<dyn Validator>>,
    handler_configs: Vec<HandlerConfig>,
    handlers: OnceCell<Vec<Arc<dyn FileNotFoundHandler>>>,
    main: Arc<Storage>,
    temp: Arc<Storage>,
    temp_touched: AtomicBool,
}

impl std::fmt::Debug for Context {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Context")
            .field("name", &self.name)
            .field("run_mode", &self.run_mode)
            .field("formats", &self.formats.keys().collect::<Vec<_>>())
            .field("validators", &self.validators.len())
            .field("handlers", &self.handler_configs.len())
            .field("main", &self.main)
            .field("temp", &self.temp)
            .finish()
    }
}

fn lookup_disk(
    disks: &HashMap<String, Arc<dyn Disk>>,
    context: &str,
    disk: &str,
) -> VermeerResult<Arc<dyn Disk>> {
    disks
        .get(disk)
        .cloned()
        .ok_or_else(|| ConfigError::for_context(context, format!("unknown disk '{}'", disk)).into())
}

/// Disk name and root directory of each storage of a context.
pub(crate) fn storage_roots(name: &str, config: &ContextConfig) -> [(String, String); 2] {
    [
        (StorageRole::Main, config.main_storage()),
        (StorageRole::Temp, config.temp_storage()),
    ]
    .map(|(role, storage)| {
        (
            storage.disk().clone(),
            root_directory(name, role, storage.name_generator()),
        )
    })
}

/// Reject contexts whose storages share a directory on the same disk.
///
/// A shared root would let garbage collection of one storage delete files
/// of another, and shard discovery pick up foreign directories.
pub(crate) fn check_disjoint_roots<'a>(
    contexts: impl IntoIterator<Item = (&'a str, &'a ContextConfig)>,
) -> VermeerResult<()> {
    let mut seen: Vec<(&str, String, String)> = Vec::new();
    for (name, config) in contexts {
        for (disk, root) in storage_roots(name, config) {
            if let Some((other, _, other_root)) = seen
                .iter()
                .find(|(_, seen_disk, seen_root)| *seen_disk == disk && roots_overlap(seen_root, &root))
            {
                return Err(ConfigError::for_context(
                    name,
                    format!(
                        "storage root '{}' overlaps '{}' of context '{}' on disk '{}'",
                        root, other_root, other, disk
                    ),
                )
                .into());
            }
            seen.push((name, disk, root));
        }
    }
    Ok(())
}

fn poisoned() -> StorageError {
    StorageError::new(StorageErrorKind::Unavailable(
        "formatter cache lock poisoned".to_string(),
    ))
}

impl Context {
    /// Build a context and its storages.
    #[instrument(skip_all, fields(context = %name))]
    pub(crate) fn build(
        name: &str,
        config: ContextConfig,
        mut parts: ContextParts,
        registry: Registry,
        disks: &HashMap<String, Arc<dyn Disk>>,
        run_mode: RunMode,
    ) -> VermeerResult<Arc<Self>> {
        let mut format_configs = BTreeMap::new();
        for (format, value) in config.formats() {
            format_configs.insert(format.clone(), FormatterConfig::from_value(value)?);
        }
        format_configs.append(&mut parts.formats);

        let mut formats = BTreeMap::new();
        for (format, formatter) in &format_configs {
            formats.insert(
                format.clone(),
                registry.build_formatter(name, format, formatter)?,
            );
        }

        let mut validators = Vec::new();
        for value in config.validate() {
            validators.push(registry.build_validator(&ValidatorConfig::from_value(value)?)?);
        }
        for validator in &parts.validators {
            validators.push(registry.build_validator(validator)?);
        }

        let mut handler_configs = Vec::new();
        for value in config.file_not_found_handlers() {
            handler_configs.push(HandlerConfig::from_value(value)?);
        }
        handler_configs.append(&mut parts.handlers);

        let main_disk = lookup_disk(disks, name, config.main_storage().disk())?;
        let temp_disk = lookup_disk(disks, name, config.temp_storage().disk())?;
        config.main_storage().name_generator().validate()?;
        config.temp_storage().name_generator().validate()?;
        let [(_, main_root), (_, temp_root)] = storage_roots(name, &config);
        if (config.main_storage().disk() == config.temp_storage().disk()
            || Arc::ptr_eq(&main_disk, &temp_disk))
            && roots_overlap(&main_root, &temp_root)
        {
            return Err(ConfigError::for_context(
                name,
                format!(
                    "main storage '{}' and temp storage '{}' share one directory tree",
                    main_root, temp_root
                ),
            )
            .into());
        }
        let main_name = config
            .main_storage()
            .name()
            .as_deref()
            .unwrap_or(StorageRole::Main.default_name());
        let temp_name = config
            .temp_storage()
            .name()
            .as_deref()
            .unwrap_or(StorageRole::Temp.default_name());
        if main_name == temp_name {
            return Err(ConfigError::for_context(
                name,
                "main and temp storage have the same name",
            )
            .into());
        }

        let context = Arc::new_cyclic(|this: &Weak<Self>| {
            let main = Arc::new(Storage::new(
                name,
                this.clone(),
                StorageRole::Main,
                config.main_storage().clone(),
                main_disk,
            ));
            let temp = Arc::new(Storage::new(
                name,
                this.clone(),
                StorageRole::Temp,
                config.temp_storage().clone(),
                temp_disk,
            ));
            Self {
                name: name.to_string(),
                config,
                run_mode,
                registry,
                formats,
                parsed: RwLock::new(HashMap::new()),
                validators,
                handler_configs,
                handlers: OnceCell::new(),
                main,
                temp,
                temp_touched: AtomicBool::new(false),
            }
        });

        info!(
            formats = context.formats.len(),
            validators = context.validators.len(),
            handlers = context.handler_configs.len(),
            "Context ready"
        );
        Ok(context)
    }

    /// Context name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Settings the context was built from.
    pub fn config(&self) -> &ContextConfig {
        &self.config
    }

    /// Interactive or batch.
    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    /// Durable storage.
    pub fn main_storage(&self) -> Arc<Storage> {
        Arc::clone(&self.main)
    }

    /// Ephemeral storage.
    ///
    /// The first call within each [`unit_of_work`] of an interactive
    /// process may run a garbage collection pass inline, with chance
    /// `gc_probability / gc_divisor`. Outside a unit of work only the first
    /// call of the process gets that chance. Failures of the pass are
    /// logged, never returned.
    pub async fn temp_storage(&self) -> Arc<Storage> {
        let first_touch = TEMP_TOUCHED
            .try_with(|touched| touched.borrow_mut().insert(self.name.clone()))
            .unwrap_or_else(|_| !self.temp_touched.swap(true, Ordering::AcqRel));
        if first_touch
            && self.run_mode == RunMode::Interactive
            && GarbageCollector::should_trigger(*self.config.gc_probability(), *self.config.gc_divisor())
        {
            debug!(context = %self.name, "Garbage collection triggered");
            if let Err(e) = self.garbage_collector().clean(None).await {
                warn!(context = %self.name, error = %e, "Garbage collection failed");
            }
        }
        Arc::clone(&self.temp)
    }

    /// Storage by name.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown names.
    pub async fn storage(&self, name: &str) -> VermeerResult<Arc<Storage>> {
        if self.main.name() == name {
            Ok(self.main_storage())
        } else if self.temp.name() == name {
            Ok(self.temp_storage().await)
        } else {
            Err(ConfigError::for_context(
                &self.name,
                format!("no storage named '{}'", name),
            )
            .into())
        }
    }

    /// Formatter for `format`: configured first, then name parsers.
    ///
    /// # Errors
    ///
    /// Returns a formatter-not-found error when neither source knows the
    /// name, or a configuration error from building a parsed formatter.
    pub fn formatter(&self, format: &str) -> VermeerResult<Arc<dyn Formatter>> {
        if let Some(formatter) = self.formats.get(format) {
            return Ok(Arc::clone(formatter));
        }
        if let Some(formatter) = self.parsed.read().map_err(|_| poisoned())?.get(format) {
            return Ok(Arc::clone(formatter));
        }

        let Some(formatter) = self.registry.parse_formatter(&self.name, format)? else {
            return Err(FormatterError::new(FormatterErrorKind::NotFound {
                context: self.name.clone(),
                format: format.to_string(),
            })
            .into());
        };

        let mut parsed = self.parsed.write().map_err(|_| poisoned())?;
        Ok(Arc::clone(
            parsed.entry(format.to_string()).or_insert(formatter),
        ))
    }

    /// Whether a formatter exists for `format`.
    ///
    /// # Errors
    ///
    /// Returns configuration errors from building a parsed formatter.
    pub fn has_formatter(&self, format: &str) -> VermeerResult<bool> {
        match self.formatter(format) {
            Ok(_) => Ok(true),
            Err(e) => match e.kind() {
                VermeerErrorKind::Formatter(f)
                    if matches!(f.kind(), FormatterErrorKind::NotFound { .. }) =>
                {
                    Ok(false)
                }
                _ => Err(e),
            },
        }
    }

    /// Names of the configured formats, sorted.
    pub fn format_names(&self) -> Vec<String> {
        self.formats.keys().cloned().collect()
    }

    /// Run every validator against `source`.
    ///
    /// # Errors
    ///
    /// Returns one validation error carrying every failing rule's message.
    #[instrument(skip(self, source), fields(context = %self.name))]
    pub async fn validate(&self, source: &FileSource) -> VermeerResult<()> {
        run_validators(&self.validators, source).await
    }

    /// Not-found handlers in consultation order, built on first call.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown aliases or bad options;
    /// the next call tries again.
    pub async fn handlers(&self) -> VermeerResult<&[Arc<dyn FileNotFoundHandler>]> {
        let handlers = self
            .handlers
            .get_or_try_init(|| async {
                let built = self
                    .handler_configs
                    .iter()
                    .map(|config| self.registry.build_handler(config))
                    .collect::<VermeerResult<Vec<_>>>()?;
                debug!(context = %self.name, handlers = built.len(), "Not-found handlers resolved");
                Ok::<_, VermeerError>(built)
            })
            .await?;
        Ok(handlers.as_slice())
    }

    /// Collector over the temp storage with the configured lifetime.
    pub fn garbage_collector(&self) -> GarbageCollector {
        GarbageCollector::new(
            Arc::clone(&self.temp),
            self.config.garbage_collector().lifetime_duration(),
        )
    }
}
