//! Process-wide registry of contexts.

use crate::config::{ContextConfig, DiskConfig, DiskDriver, RunMode, VermeerConfig};
use crate::context::{Context, ContextParts, check_disjoint_roots};
use crate::format::FormatterConfig;
use crate::naming::validate_origin_path;
use crate::not_found::HandlerConfig;
use crate::registry::Registry;
use crate::source::{StoredFile, StoredFileReference};
use crate::validation::ValidatorConfig;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, instrument};
use vermeer_disk::{Disk, LocalDisk, MemoryDisk};
use vermeer_error::{ConfigError, StorageError, StorageErrorKind, VermeerResult};

fn build_disk(name: &str, config: &DiskConfig) -> VermeerResult<Arc<dyn Disk>> {
    match config.driver() {
        DiskDriver::Local => {
            let root = config.root().as_ref().ok_or_else(|| {
                ConfigError::new(format!("Local disk '{}' needs a root directory", name))
            })?;
            let disk = LocalDisk::new(root)?;
            Ok(match config.url() {
                Some(url) => Arc::new(disk.with_url(url.clone())),
                None => Arc::new(disk),
            })
        }
        DiskDriver::Memory => {
            let disk = MemoryDisk::new();
            Ok(match config.url() {
                Some(url) => Arc::new(disk.with_url(url.clone())),
                None => Arc::new(disk),
            })
        }
    }
}

/// Builder for a [`Manager`].
///
/// # Example
///
/// ```
/// use vermeer::{ContextConfig, Manager, MemoryDisk};
///
/// let manager = Manager::builder()
///     .disk("local", MemoryDisk::new())
///     .context("avatars", ContextConfig::default())
///     .build()
///     .unwrap();
/// assert!(manager.context("avatars").is_ok());
/// assert!(manager.context("banners").is_err());
/// ```
#[derive(Default)]
pub struct ManagerBuilder {
    config: VermeerConfig,
    run_mode: Option<RunMode>,
    registry: Option<Registry>,
    disks: HashMap<String, Arc<dyn Disk>>,
    parts: BTreeMap<String, ContextParts>,
}

impl ManagerBuilder {
    /// Start from a loaded configuration.
    pub fn config(mut self, config: VermeerConfig) -> Self {
        self.config = config;
        self
    }

    /// Provide a disk directly; wins over a `[disks]` entry of the same name.
    pub fn disk(mut self, name: impl Into<String>, disk: impl Disk + 'static) -> Self {
        self.disks.insert(name.into(), Arc::new(disk));
        self
    }

    /// Provide a shared disk.
    pub fn shared_disk(mut self, name: impl Into<String>, disk: Arc<dyn Disk>) -> Self {
        self.disks.insert(name.into(), disk);
        self
    }

    /// Alias tables; [`Registry::default`] when unset.
    pub fn registry(mut self, registry: Registry) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Override the configured run mode.
    pub fn run_mode(mut self, run_mode: RunMode) -> Self {
        self.run_mode = Some(run_mode);
        self
    }

    /// Add or replace a context definition.
    pub fn context(mut self, name: impl Into<String>, config: ContextConfig) -> Self {
        self.config.contexts.insert(name.into(), config);
        self
    }

    /// Add or replace a format of a context.
    pub fn format(
        mut self,
        context: impl Into<String>,
        format: impl Into<String>,
        config: FormatterConfig,
    ) -> Self {
        self.parts
            .entry(context.into())
            .or_default()
            .formats
            .insert(format.into(), config);
        self
    }

    /// Append a validator to a context.
    pub fn validator(mut self, context: impl Into<String>, config: ValidatorConfig) -> Self {
        self.parts
            .entry(context.into())
            .or_default()
            .validators
            .push(config);
        self
    }

    /// Append a not-found handler to a context.
    pub fn handler(mut self, context: impl Into<String>, config: HandlerConfig) -> Self {
        self.parts
            .entry(context.into())
            .or_default()
            .handlers
            .push(config);
        self
    }

    /// Create configured disks and the manager.
    ///
    /// Contexts are built on first use.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a disk cannot be created,
    /// additions name an unknown context, or two contexts share a storage
    /// directory on one disk.
    #[instrument(skip(self))]
    pub fn build(self) -> VermeerResult<Manager> {
        let mut disks = self.disks;
        for (name, config) in &self.config.disks {
            if disks.contains_key(name) {
                debug!(disk = %name, "Configured disk overridden");
                continue;
            }
            disks.insert(name.clone(), build_disk(name, config)?);
        }

        if let Some(unknown) = self
            .parts
            .keys()
            .find(|name| !self.config.contexts.contains_key(*name))
        {
            return Err(ConfigError::new(format!(
                "Additions given for unknown context '{}'",
                unknown
            ))
            .into());
        }

        check_disjoint_roots(
            self.config
                .contexts
                .iter()
                .map(|(name, config)| (name.as_str(), config)),
        )?;

        let run_mode = self.run_mode.unwrap_or(self.config.run_mode);
        info!(
            contexts = self.config.contexts.len(),
            disks = disks.len(),
            run_mode = %run_mode,
            "Manager ready"
        );
        Ok(Manager {
            definitions: self.config.contexts,
            parts: self.parts,
            registry: self.registry.unwrap_or_default(),
            run_mode,
            disks,
            contexts: RwLock::new(HashMap::new()),
        })
    }
}

/// Named contexts over shared disks.
///
/// Contexts are built once, on first lookup, and live as long as the
/// manager.
pub struct Manager {
    definitions: BTreeMap<String, ContextConfig>,
    parts: BTreeMap<String, ContextParts>,
    registry: Registry,
    run_mode: RunMode,
    disks: HashMap<String, Arc<dyn Disk>>,
    contexts: RwLock<HashMap<String, Arc<Context>>>,
}

impl std::fmt::Debug for Manager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut disks: Vec<_> = self.disks.keys().collect();
        disks.sort();
        f.debug_struct("Manager")
            .field("contexts", &self.definitions.keys().collect::<Vec<_>>())
            .field("disks", &disks)
            .field("run_mode", &self.run_mode)
            .field("registry", &self.registry)
            .finish()
    }
}

fn poisoned() -> StorageError {
    StorageError::new(StorageErrorKind::Unavailable(
        "context cache lock poisoned".to_string(),
    ))
}

impl Manager {
    /// Start building a manager.
    pub fn builder() -> ManagerBuilder {
        ManagerBuilder::default()
    }

    /// Manager over a loaded configuration with the built-in aliases.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when a disk cannot be created.
    pub fn from_config(config: VermeerConfig) -> VermeerResult<Self> {
        Self::builder().config(config).build()
    }

    /// Interactive or batch.
    pub fn run_mode(&self) -> RunMode {
        self.run_mode
    }

    /// Alias tables in use.
    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Names of every known context, sorted.
    pub fn context_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.definitions.keys().cloned().collect();
        if let Ok(contexts) = self.contexts.read() {
            names.extend(
                contexts
                    .keys()
                    .filter(|name| !self.definitions.contains_key(*name))
                    .cloned(),
            );
        }
        names.sort();
        names
    }

    /// Context by name, built on first lookup.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown names or broken wiring.
    pub fn context(&self, name: &str) -> VermeerResult<Arc<Context>> {
        if let Some(context) = self.contexts.read().map_err(|_| poisoned())?.get(name) {
            return Ok(Arc::clone(context));
        }

        let config = self
            .definitions
            .get(name)
            .ok_or_else(|| ConfigError::new(format!("Unknown context '{}'", name)))?;
        let parts = self.parts.get(name).cloned().unwrap_or_default();
        let built = Context::build(
            name,
            config.clone(),
            parts,
            self.registry.clone(),
            &self.disks,
            self.run_mode,
        )?;

        let mut contexts = self.contexts.write().map_err(|_| poisoned())?;
        Ok(Arc::clone(contexts.entry(name.to_string()).or_insert(built)))
    }

    /// Add a context at runtime.
    ///
    /// # Errors
    ///
    /// Returns a configuration error when the name is taken, a storage
    /// directory overlaps one of another context, or the configuration is
    /// broken.
    #[instrument(skip(self, config))]
    pub fn register_context(&self, name: &str, config: ContextConfig) -> VermeerResult<Arc<Context>> {
        let taken = || ConfigError::new(format!("Context '{}' already exists", name));
        if self.definitions.contains_key(name) {
            return Err(taken().into());
        }

        let registered: Vec<Arc<Context>> = self
            .contexts
            .read()
            .map_err(|_| poisoned())?
            .values()
            .filter(|context| !self.definitions.contains_key(context.name()))
            .cloned()
            .collect();
        if registered.iter().any(|context| context.name() == name) {
            return Err(taken().into());
        }
        check_disjoint_roots(
            self.definitions
                .iter()
                .map(|(name, config)| (name.as_str(), config))
                .chain(registered.iter().map(|context| (context.name(), context.config())))
                .chain(std::iter::once((name, &config))),
        )?;

        let built = Context::build(
            name,
            config,
            ContextParts::default(),
            self.registry.clone(),
            &self.disks,
            self.run_mode,
        )?;

        let mut contexts = self.contexts.write().map_err(|_| poisoned())?;
        if contexts.contains_key(name) {
            return Err(taken().into());
        }
        contexts.insert(name.to_string(), Arc::clone(&built));
        Ok(built)
    }

    /// Rehydrate a stored file from its persisted reference.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown context or storage names,
    /// and an invalid-path error for malformed paths.
    pub async fn stored_file(&self, reference: &StoredFileReference) -> VermeerResult<StoredFile> {
        if !validate_origin_path(&reference.path) {
            return Err(StorageError::new(StorageErrorKind::InvalidPath(reference.path.clone())).into());
        }
        let storage = self
            .context(&reference.context)?
            .storage(&reference.storage)
            .await?;
        Ok(storage.file(&reference.path))
    }

    /// Operator sweep of a context's temp storage, whatever the run mode.
    ///
    /// Returns the deleted paths.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown contexts or storage errors
    /// from listing.
    #[instrument(skip(self))]
    pub async fn collect_garbage(&self, context: &str) -> VermeerResult<Vec<String>> {
        let deleted = self.context(context)?.garbage_collector().clean(None).await?;
        info!(context, count = deleted.len(), "Garbage collected");
        Ok(deleted)
    }
}
