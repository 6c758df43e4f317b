//! Validators checked before a file is saved.

use crate::recipe::{Options, Recipe};
use crate::source::FileSource;
use image::ImageReader;
use serde_json::Value;
use std::io::Cursor;
use std::sync::Arc;
use tracing::{debug, instrument};
use vermeer_error::{ConfigError, ValidationError, VermeerResult};

/// One rule a source must satisfy.
#[async_trait::async_trait]
pub trait Validator: Send + Sync {
    /// `Ok(Some(message))` when `source` breaks the rule.
    async fn validate(&self, source: &FileSource) -> VermeerResult<Option<String>>;

    /// Skip this rule once an earlier rule has failed.
    fn skip_on_error(&self) -> bool {
        false
    }
}

/// How a validator is configured.
#[derive(Clone)]
pub enum ValidatorConfig {
    /// Registered alias plus options
    Alias {
        /// Alias name, e.g. `"size"`
        alias: String,
        /// Alias options
        options: Options,
    },
    /// Prebuilt validator
    Instance(Arc<dyn Validator>),
}

impl ValidatorConfig {
    /// Parse a string or table recipe.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed recipes.
    pub fn from_value(value: &Value) -> VermeerResult<Self> {
        let recipe = Recipe::from_value(value)?;
        Ok(Self::Alias {
            alias: recipe.alias,
            options: recipe.options,
        })
    }
}

/// Run `validators` in order, collecting every failure.
///
/// # Errors
///
/// Returns one [`ValidationError`] carrying all messages when any rule fails.
#[instrument(skip_all, fields(validators = validators.len()))]
pub(crate) async fn run_validators(
    validators: &[Arc<dyn Validator>],
    source: &FileSource,
) -> VermeerResult<()> {
    let mut messages = Vec::new();
    for (index, validator) in validators.iter().enumerate() {
        if validator.skip_on_error() && !messages.is_empty() {
            debug!(index, "Skipping validator after earlier failure");
            continue;
        }
        if let Some(message) = validator.validate(source).await? {
            debug!(index, message = %message, "Validator failed");
            messages.push(message);
        }
    }

    if messages.is_empty() {
        Ok(())
    } else {
        Err(ValidationError::new(messages).into())
    }
}

/// Allow-list of file extensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtensionValidator {
    allowed: Vec<String>,
    skip_on_error: bool,
}

impl ExtensionValidator {
    /// Allow the given extensions (case-insensitive).
    pub fn new(allowed: Vec<String>) -> Self {
        Self {
            allowed: allowed
                .into_iter()
                .map(|ext| ext.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            skip_on_error: false,
        }
    }

    /// `extensions:allowed=jpg|png`
    pub fn from_options(options: &Options) -> VermeerResult<Self> {
        let allowed = options
            .list("allowed")?
            .ok_or_else(|| ConfigError::new("extensions validator needs 'allowed'"))?;
        Ok(Self::new(allowed).with_skip_on_error(options.bool("skip_on_error")?.unwrap_or(false)))
    }

    /// Skip once an earlier rule failed.
    pub fn with_skip_on_error(mut self, skip: bool) -> Self {
        self.skip_on_error = skip;
        self
    }
}

#[async_trait::async_trait]
impl Validator for ExtensionValidator {
    async fn validate(&self, source: &FileSource) -> VermeerResult<Option<String>> {
        let extension = source.extension().await?;
        if extension.is_some_and(|ext| self.allowed.contains(&ext)) {
            Ok(None)
        } else {
            Ok(Some(format!(
                "The file must be a file of type: {}.",
                self.allowed.join(", ")
            )))
        }
    }

    fn skip_on_error(&self) -> bool {
        self.skip_on_error
    }
}

/// Allow-list of MIME types; `image/*` matches any image type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MimeTypeValidator {
    allowed: Vec<String>,
    skip_on_error: bool,
}

impl MimeTypeValidator {
    /// Allow the given MIME types or `type/*` wildcards.
    pub fn new(allowed: Vec<String>) -> Self {
        Self {
            allowed: allowed.into_iter().map(|mime| mime.to_ascii_lowercase()).collect(),
            skip_on_error: false,
        }
    }

    /// `mime_types:allowed=image/*|application/pdf`
    pub fn from_options(options: &Options) -> VermeerResult<Self> {
        let allowed = options
            .list("allowed")?
            .ok_or_else(|| ConfigError::new("mime_types validator needs 'allowed'"))?;
        Ok(Self::new(allowed).with_skip_on_error(options.bool("skip_on_error")?.unwrap_or(false)))
    }

    /// Skip once an earlier rule failed.
    pub fn with_skip_on_error(mut self, skip: bool) -> Self {
        self.skip_on_error = skip;
        self
    }

    fn matches(pattern: &str, mime: &str) -> bool {
        match pattern.strip_suffix("/*") {
            Some(prefix) => mime
                .split_once('/')
                .is_some_and(|(kind, _)| kind == prefix),
            None => pattern == "*" || pattern == mime,
        }
    }
}

#[async_trait::async_trait]
impl Validator for MimeTypeValidator {
    async fn validate(&self, source: &FileSource) -> VermeerResult<Option<String>> {
        let mime = source.mime_type(None).await?.map(|m| m.to_ascii_lowercase());
        let accepted = mime.is_some_and(|mime| {
            self.allowed.iter().any(|pattern| Self::matches(pattern, &mime))
        });
        if accepted {
            Ok(None)
        } else {
            Ok(Some(format!(
                "The file must be a file of type: {}.",
                self.allowed.join(", ")
            )))
        }
    }

    fn skip_on_error(&self) -> bool {
        self.skip_on_error
    }
}

/// Parse sizes like `512`, `100K`, `10M`, `2G` or `10MB` into bytes.
///
/// Units are 1024-based.
pub(crate) fn parse_size(size: &str) -> Option<u64> {
    let size = size.trim().to_ascii_uppercase();
    let size = size.strip_suffix('B').unwrap_or(&size).trim_end();
    let (number, multiplier) = match size.chars().last()? {
        'K' => (&size[..size.len() - 1], 1u64 << 10),
        'M' => (&size[..size.len() - 1], 1 << 20),
        'G' => (&size[..size.len() - 1], 1 << 30),
        'T' => (&size[..size.len() - 1], 1 << 40),
        _ => (size, 1),
    };
    let value: f64 = number.trim().parse().ok()?;
    if value < 0.0 {
        return None;
    }
    Some((value * multiplier as f64).round() as u64)
}

/// Minimum and maximum file size.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SizeValidator {
    min: Option<(u64, String)>,
    max: Option<(u64, String)>,
    skip_on_error: bool,
}

impl SizeValidator {
    /// Size bounds given as strings such as `"10M"`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unparsable sizes or no bound at all.
    pub fn new(min: Option<&str>, max: Option<&str>) -> VermeerResult<Self> {
        let parse = |label: &str| {
            parse_size(label)
                .map(|bytes| (bytes, label.trim().to_string()))
                .ok_or_else(|| ConfigError::new(format!("Invalid size '{}'", label)))
        };
        let min = min.map(parse).transpose()?;
        let max = max.map(parse).transpose()?;
        if min.is_none() && max.is_none() {
            return Err(ConfigError::new("size validator needs 'min' or 'max'").into());
        }
        Ok(Self {
            min,
            max,
            skip_on_error: false,
        })
    }

    /// `size:min=1K,max=10M`
    pub fn from_options(options: &Options) -> VermeerResult<Self> {
        let min = options.string("min")?;
        let max = options.string("max")?;
        Ok(Self::new(min.as_deref(), max.as_deref())?
            .with_skip_on_error(options.bool("skip_on_error")?.unwrap_or(false)))
    }

    /// Skip once an earlier rule failed.
    pub fn with_skip_on_error(mut self, skip: bool) -> Self {
        self.skip_on_error = skip;
        self
    }
}

#[async_trait::async_trait]
impl Validator for SizeValidator {
    async fn validate(&self, source: &FileSource) -> VermeerResult<Option<String>> {
        let size = source.size(None).await?;
        if let Some((max, label)) = &self.max
            && size > *max
        {
            return Ok(Some(format!("The file may not be greater than {}.", label)));
        }
        if let Some((min, label)) = &self.min
            && size < *min
        {
            return Ok(Some(format!("The file must be at least {}.", label)));
        }
        Ok(None)
    }

    fn skip_on_error(&self) -> bool {
        self.skip_on_error
    }
}

/// Pixel dimension bounds; decodes only the image header.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ImageDimensionsValidator {
    min_width: Option<u32>,
    max_width: Option<u32>,
    min_height: Option<u32>,
    max_height: Option<u32>,
    skip_on_error: bool,
}

impl ImageDimensionsValidator {
    /// `image:min_width=100,max_width=4000,min_height=100,max_height=4000`
    pub fn from_options(options: &Options) -> VermeerResult<Self> {
        Ok(Self {
            min_width: options.u32("min_width")?,
            max_width: options.u32("max_width")?,
            min_height: options.u32("min_height")?,
            max_height: options.u32("max_height")?,
            skip_on_error: options.bool("skip_on_error")?.unwrap_or(false),
        })
    }

    /// Width bounds.
    pub fn with_width(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_width = min;
        self.max_width = max;
        self
    }

    /// Height bounds.
    pub fn with_height(mut self, min: Option<u32>, max: Option<u32>) -> Self {
        self.min_height = min;
        self.max_height = max;
        self
    }

    /// Skip once an earlier rule failed.
    pub fn with_skip_on_error(mut self, skip: bool) -> Self {
        self.skip_on_error = skip;
        self
    }

    fn violations(&self, width: u32, height: u32) -> Vec<String> {
        let mut violations = Vec::new();
        if let Some(min) = self.min_width.filter(|min| width < *min) {
            violations.push(format!("at least {} pixels wide", min));
        }
        if let Some(max) = self.max_width.filter(|max| width > *max) {
            violations.push(format!("at most {} pixels wide", max));
        }
        if let Some(min) = self.min_height.filter(|min| height < *min) {
            violations.push(format!("at least {} pixels high", min));
        }
        if let Some(max) = self.max_height.filter(|max| height > *max) {
            violations.push(format!("at most {} pixels high", max));
        }
        violations
    }
}

#[async_trait::async_trait]
impl Validator for ImageDimensionsValidator {
    async fn validate(&self, source: &FileSource) -> VermeerResult<Option<String>> {
        let contents = source.contents(None).await?;
        let dimensions = ImageReader::new(Cursor::new(contents))
            .with_guessed_format()
            .ok()
            .and_then(|reader| reader.into_dimensions().ok());

        let Some((width, height)) = dimensions else {
            return Ok(Some("The file must be an image.".to_string()));
        };
        let violations = self.violations(width, height);
        if violations.is_empty() {
            Ok(None)
        } else {
            Ok(Some(format!("The image must be {}.", violations.join(" and "))))
        }
    }

    fn skip_on_error(&self) -> bool {
        self.skip_on_error
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::source::ContentFile;

    #[test]
    fn test_parse_size() {
        assert_eq!(parse_size("512"), Some(512));
        assert_eq!(parse_size("10M"), Some(10 * 1024 * 1024));
        assert_eq!(parse_size("10mb"), Some(10 * 1024 * 1024));
        assert_eq!(parse_size("1.5K"), Some(1536));
        assert_eq!(parse_size("lots"), None);
        assert_eq!(parse_size(""), None);
    }

    #[test]
    fn test_mime_wildcards() {
        assert!(MimeTypeValidator::matches("image/*", "image/png"));
        assert!(!MimeTypeValidator::matches("image/*", "text/plain"));
        assert!(MimeTypeValidator::matches("text/plain", "text/plain"));
    }

    #[tokio::test]
    async fn test_extension_validator() {
        let validator = ExtensionValidator::new(vec!["JPG".to_string(), ".png".to_string()]);
        let png = FileSource::from(ContentFile::new(vec![0; 4], "a.PNG"));
        let gif = FileSource::from(ContentFile::new(vec![0; 4], "a.gif"));
        assert!(validator.validate(&png).await.unwrap().is_none());
        assert_eq!(
            validator.validate(&gif).await.unwrap().unwrap(),
            "The file must be a file of type: jpg, png."
        );
    }

    #[tokio::test]
    async fn test_skip_on_error_and_aggregation() {
        let validators: Vec<Arc<dyn Validator>> = vec![
            Arc::new(SizeValidator::new(None, Some("1K")).unwrap()),
            Arc::new(MimeTypeValidator::new(vec!["image/*".to_string()])),
            Arc::new(
                ExtensionValidator::new(vec!["png".to_string()]).with_skip_on_error(true),
            ),
        ];
        let source = FileSource::from(ContentFile::new(vec![0; 4096], "notes.txt"));
        let err = run_validators(&validators, &source).await.unwrap_err();
        let messages = &err.validation().unwrap().messages;
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0], "The file may not be greater than 1K.");
    }

    #[tokio::test]
    async fn test_image_dimensions_rejects_non_images() {
        let validator = ImageDimensionsValidator::default().with_width(Some(10), None);
        let source = FileSource::from(ContentFile::new(b"plain".to_vec(), "a.png"));
        assert_eq!(
            validator.validate(&source).await.unwrap().as_deref(),
            Some("The file must be an image.")
        );
    }
}
