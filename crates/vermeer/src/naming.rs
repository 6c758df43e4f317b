//! Path allocation for origin and formatted files.
//!
//! Origin files live at `{root}/{shard}/{filename}`; formatted files at
//! `{root}/{shard}/formats/{filename}/{format}[.ext]`.

use crate::config::{MAX_NAME_LENGTH, NameGeneratorConfig, NameStrategy};
use crate::source::FileSource;
use crate::storage::StorageRole;
use rand::Rng;
use rand::seq::SliceRandom;
use regex::Regex;
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, LazyLock};
use tracing::{debug, instrument};
use vermeer_disk::{Disk, base_name, join_path, parent_path};
use vermeer_error::{StorageError, StorageErrorKind, VermeerResult};

static SHARD: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)^[a-z0-9]+$").expect("Valid shard regex"));

static FILENAME: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[A-Za-z0-9_-][A-Za-z0-9._-]{0,254}$").expect("Valid filename regex")
});

static EXTENSION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-z0-9_-]{1,16}$").expect("Valid extension regex"));

static FORMAT_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[a-zA-Z0-9_-]{1,64}$").expect("Valid format name regex"));

const ALPHABET: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";
const FORMATS_DIR: &str = "formats";
const MAX_SHARD_ATTEMPTS: usize = 100;

/// Check an untrusted relative path against the `{shard}/{filename}` shape.
///
/// # Examples
///
/// ```
/// use vermeer::validate_origin_path;
///
/// assert!(validate_origin_path("ab12/photo.jpg"));
/// assert!(!validate_origin_path("ab12/../etc/passwd"));
/// assert!(!validate_origin_path("photo.jpg"));
/// assert!(!validate_origin_path("ab_1/photo.jpg"));
/// ```
pub fn validate_origin_path(path: &str) -> bool {
    let mut segments = path.split('/');
    match (segments.next(), segments.next(), segments.next()) {
        (Some(shard), Some(filename), None) => {
            SHARD.is_match(shard) && FILENAME.is_match(filename) && filename != "." && filename != ".."
        }
        _ => false,
    }
}

/// Whether `format` is usable as a formatted filename stem.
pub(crate) fn validate_format_name(format: &str) -> bool {
    FORMAT_NAME.is_match(format)
}

/// Random lowercase alphanumeric token.
fn random_token(length: usize) -> String {
    let mut rng = rand::rng();
    (0..length.max(1))
        .map(|_| ALPHABET[rng.random_range(0..ALPHABET.len())] as char)
        .collect()
}

/// Lowercase slug of a filename stem.
fn slugify(stem: &str) -> String {
    let mut slug = String::with_capacity(stem.len());
    for c in stem.chars().flat_map(char::to_lowercase) {
        if c.is_ascii_alphanumeric() || c == '_' {
            slug.push(c);
        } else if !slug.ends_with('-') {
            slug.push('-');
        }
    }
    slug.trim_matches(|c| c == '-' || c == '_')
        .chars()
        .take(100)
        .collect::<String>()
        .trim_end_matches('-')
        .to_string()
}

/// Split CamelCase into lowercase `/`-separated segments.
fn context_directory(context: &str) -> String {
    let mut dir = String::with_capacity(context.len() + 4);
    let mut previous: Option<char> = None;
    for c in context.chars() {
        if c.is_uppercase() && previous.is_some_and(|p| p.is_lowercase() || p.is_ascii_digit()) {
            dir.push('/');
        }
        if c.is_ascii_alphanumeric() || c == '_' || c == '-' {
            dir.push(c.to_ascii_lowercase());
        } else {
            dir.push('-');
        }
        previous = Some(c);
    }
    dir
}

/// Root directory of a storage of `context` in `role`.
pub(crate) fn root_directory(context: &str, role: StorageRole, config: &NameGeneratorConfig) -> String {
    let prefix = config
        .global_prefix()
        .clone()
        .unwrap_or_else(|| role.default_prefix().to_string());
    join_path(&prefix, &context_directory(context))
}

/// Whether one root equals or contains the other.
pub(crate) fn roots_overlap(a: &str, b: &str) -> bool {
    let nested = |outer: &str, inner: &str| {
        outer.is_empty() || inner.strip_prefix(outer).is_some_and(|rest| rest.starts_with('/'))
    };
    a == b || nested(a, b) || nested(b, a)
}

/// Allocates paths for one storage.
#[derive(Clone)]
pub struct NameGenerator {
    config: NameGeneratorConfig,
    root: String,
    disk: Arc<dyn Disk>,
}

impl std::fmt::Debug for NameGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NameGenerator")
            .field("root", &self.root)
            .field("config", &self.config)
            .finish()
    }
}

impl NameGenerator {
    /// Generator for a storage of `context` in the given role.
    pub fn new(
        context: &str,
        role: StorageRole,
        config: NameGeneratorConfig,
        disk: Arc<dyn Disk>,
    ) -> Self {
        let root = root_directory(context, role, &config);
        Self { config, root, disk }
    }

    /// Directory holding every shard of this storage.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use vermeer::{MemoryDisk, NameGenerator, NameGeneratorConfig, StorageRole};
    ///
    /// let naming = NameGenerator::new(
    ///     "UserAvatars",
    ///     StorageRole::Main,
    ///     NameGeneratorConfig::default(),
    ///     Arc::new(MemoryDisk::new()),
    /// );
    /// assert_eq!(naming.root_directory(), "uploads/user/avatars");
    /// ```
    pub fn root_directory(&self) -> &str {
        &self.root
    }

    /// Settings in use.
    pub fn config(&self) -> &NameGeneratorConfig {
        &self.config
    }

    /// Lowercase `extension` when it is syntactically valid and allowed.
    pub fn validate_extension(&self, extension: &str) -> Option<String> {
        let extension = extension.trim().trim_start_matches('.').to_ascii_lowercase();
        if !EXTENSION.is_match(&extension) {
            return None;
        }
        if self
            .config
            .disallowed_extensions()
            .iter()
            .any(|denied| denied.eq_ignore_ascii_case(&extension))
        {
            return None;
        }
        Some(extension)
    }

    /// Whether `path` has the `{shard}/{filename}` shape.
    pub fn validate_origin_path(&self, path: &str) -> bool {
        validate_origin_path(path)
    }

    fn name_length(&self) -> usize {
        (*self.config.length()).clamp(1, MAX_NAME_LENGTH)
    }

    fn filename_stem(&self, original: &str) -> String {
        match self.config.strategy() {
            NameStrategy::Random => random_token(self.name_length()),
            NameStrategy::Fixed => {
                let fixed = slugify(self.config.filename());
                if fixed.is_empty() {
                    random_token(self.name_length())
                } else {
                    fixed
                }
            }
            NameStrategy::OriginName => {
                let stem = match original.rsplit_once('.') {
                    Some((stem, _)) if !stem.is_empty() => stem,
                    _ => original,
                };
                let slug = slugify(stem);
                if slug.is_empty() {
                    random_token(self.name_length())
                } else {
                    slug
                }
            }
        }
    }

    /// Allocate a fresh `{shard}/{filename}` for `source`.
    ///
    /// Disallowed or malformed extensions are dropped and unusable names are
    /// replaced by random tokens, so this never fails on client input.
    ///
    /// # Errors
    ///
    /// Returns a storage error when the disk cannot be listed or no unused
    /// shard name is found.
    #[instrument(skip(self, source), fields(root = %self.root))]
    pub async fn path_for_new_file(&self, source: &FileSource) -> VermeerResult<String> {
        let original = source.basename(None).await.unwrap_or_default();
        let extension = source
            .extension()
            .await
            .ok()
            .flatten()
            .and_then(|ext| self.validate_extension(&ext));

        let stem = self.filename_stem(base_name(&original));
        let mut filename = match &extension {
            Some(ext) => format!("{}.{}", stem, ext),
            None => stem,
        };
        if !FILENAME.is_match(&filename) {
            filename = random_token(self.name_length());
        }

        let shard = self.choose_shard(&filename).await?;
        let path = format!("{}/{}", shard, filename);
        debug!(path = %path, "Allocated path for new file");
        Ok(path)
    }

    async fn choose_shard(&self, filename: &str) -> VermeerResult<String> {
        let mut shards: Vec<String> = self
            .disk
            .directories(&self.root, false)
            .await?
            .iter()
            .map(|dir| base_name(dir).to_string())
            .filter(|shard| SHARD.is_match(shard))
            .collect();
        shards.shuffle(&mut rand::rng());

        let limit = *self.config.max_subdir_files_count();
        for shard in &shards {
            let dir = join_path(&self.root, shard);
            if self.disk.exists(&join_path(&dir, filename)).await? {
                continue;
            }
            let entries = self.disk.files(&dir, false).await?.len()
                + self.disk.directories(&dir, false).await?.len();
            if entries < limit {
                debug!(shard = %shard, entries, "Reusing shard");
                return Ok(shard.clone());
            }
        }

        let taken: HashSet<String> = shards.into_iter().map(|s| s.to_ascii_lowercase()).collect();
        for _ in 0..MAX_SHARD_ATTEMPTS {
            let shard = random_token((*self.config.subdir_name_length()).clamp(1, MAX_NAME_LENGTH));
            if !taken.contains(&shard) {
                debug!(shard = %shard, "Minted new shard");
                return Ok(shard);
            }
        }

        Err(StorageError::new(StorageErrorKind::Unavailable(format!(
            "no unused shard name under '{}' after {} attempts",
            self.root, MAX_SHARD_ATTEMPTS
        )))
        .into())
    }

    /// Directory holding the formatted files of `origin`.
    pub fn formats_directory(&self, origin: &str) -> String {
        let shard_dir = join_path(&self.root, parent_path(origin));
        join_path(&join_path(&shard_dir, FORMATS_DIR), base_name(origin))
    }

    /// Full path for `format` of `origin` with the produced extension.
    ///
    /// # Examples
    ///
    /// ```
    /// use std::sync::Arc;
    /// use vermeer::{MemoryDisk, NameGenerator, NameGeneratorConfig, StorageRole};
    ///
    /// let naming = NameGenerator::new(
    ///     "avatars",
    ///     StorageRole::Main,
    ///     NameGeneratorConfig::default(),
    ///     Arc::new(MemoryDisk::new()),
    /// );
    /// assert_eq!(
    ///     naming.path_for_new_formatted_file("ab12/me.jpg", "thumb", Some("png")),
    ///     "uploads/avatars/ab12/formats/me.jpg/thumb.png"
    /// );
    /// ```
    pub fn path_for_new_formatted_file(
        &self,
        origin: &str,
        format: &str,
        extension: Option<&str>,
    ) -> String {
        let name = match extension.and_then(|ext| self.validate_extension(ext)) {
            Some(ext) => format!("{}.{}", format, ext),
            None => format.to_string(),
        };
        join_path(&self.formats_directory(origin), &name)
    }

    /// Full path of the origin (`None`) or an existing formatted file.
    ///
    /// Origin paths are joined without touching the disk. Formatted paths
    /// are found by listing the formats directory, because the stored
    /// extension is chosen by the formatter; `None` when absent.
    pub async fn full_path(&self, relative: &str, format: Option<&str>) -> VermeerResult<Option<String>> {
        match format {
            None => Ok(Some(join_path(&self.root, relative))),
            Some(format) => Ok(self
                .list_formatted_files(relative)
                .await?
                .into_iter()
                .find(|(_, name)| name == format)
                .map(|(path, _)| path)),
        }
    }

    /// Existing formatted files of `origin`, full path to format name.
    pub async fn list_formatted_files(&self, origin: &str) -> VermeerResult<BTreeMap<String, String>> {
        let dir = self.formats_directory(origin);
        Ok(self
            .disk
            .files(&dir, false)
            .await?
            .into_iter()
            .filter_map(|path| {
                let stem = base_name(&path).split('.').next().unwrap_or_default().to_string();
                validate_format_name(&stem).then_some((path, stem))
            })
            .collect())
    }
}
