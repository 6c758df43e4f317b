//! Alias tables turning recipes into formatters, validators and handlers.

use crate::format::{
    ChainFormatter, Formatter, FormatterConfig, FromFormatter, ImageFormatter, InlineFormatter,
};
use crate::not_found::{
    EmptyHandler, FailHandler, FileNotFoundHandler, FilteredHandler, FormatHandler,
    GenerateHandler, HandlerConfig, HandlerFilter, LogHandler, UrlHandler,
};
use crate::recipe::Options;
use crate::validation::{
    ExtensionValidator, ImageDimensionsValidator, MimeTypeValidator, SizeValidator, Validator,
    ValidatorConfig,
};
use regex::Regex;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};
use tracing::debug;
use vermeer_error::{ConfigError, VermeerResult};

/// Where a formatter is being built.
#[derive(Clone, Copy)]
pub struct FormatterBuild<'a> {
    registry: &'a Registry,
    context: &'a str,
    format: &'a str,
}

impl<'a> FormatterBuild<'a> {
    /// Context name.
    pub fn context(&self) -> &'a str {
        self.context
    }

    /// Name of the format being built.
    pub fn format(&self) -> &'a str {
        self.format
    }

    /// Build a nested formatter from a recipe value.
    pub fn nested(&self, value: &Value) -> VermeerResult<Arc<dyn Formatter>> {
        let config = FormatterConfig::from_value(value)?;
        self.registry.build_formatter(self.context, self.format, &config)
    }
}

/// Builds a formatter from recipe options.
pub type FormatterFactory =
    Arc<dyn Fn(&FormatterBuild<'_>, &Options) -> VermeerResult<Arc<dyn Formatter>> + Send + Sync>;

/// Builds a validator from recipe options.
pub type ValidatorFactory = Arc<dyn Fn(&Options) -> VermeerResult<Arc<dyn Validator>> + Send + Sync>;

/// Builds a not-found handler from recipe options.
pub type HandlerFactory =
    Arc<dyn Fn(&Options) -> VermeerResult<Arc<dyn FileNotFoundHandler>> + Send + Sync>;

/// Maps an unconfigured format name to a formatter config.
///
/// The second argument is the largest pixel dimension a parsed name may
/// ask for; see [`Registry::set_max_parsed_dimension`].
pub type NameParser = Arc<dyn Fn(&str, u32) -> Option<FormatterConfig> + Send + Sync>;

/// Wrap a closure as a [`FormatterFactory`].
pub fn formatter_factory<F>(factory: F) -> FormatterFactory
where
    F: Fn(&FormatterBuild<'_>, &Options) -> VermeerResult<Arc<dyn Formatter>> + Send + Sync + 'static,
{
    Arc::new(factory)
}

/// Wrap a closure as a [`ValidatorFactory`].
pub fn validator_factory<F>(factory: F) -> ValidatorFactory
where
    F: Fn(&Options) -> VermeerResult<Arc<dyn Validator>> + Send + Sync + 'static,
{
    Arc::new(factory)
}

/// Wrap a closure as a [`HandlerFactory`].
pub fn handler_factory<F>(factory: F) -> HandlerFactory
where
    F: Fn(&Options) -> VermeerResult<Arc<dyn FileNotFoundHandler>> + Send + Sync + 'static,
{
    Arc::new(factory)
}

/// Wrap a closure as a [`NameParser`].
pub fn name_parser<F>(parser: F) -> NameParser
where
    F: Fn(&str, u32) -> Option<FormatterConfig> + Send + Sync + 'static,
{
    Arc::new(parser)
}

static WIDTH: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^(\d+)$").expect("Valid width regex"));

static DIMENSIONS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^(\d+)x(\d+)$").expect("Valid dimensions regex"));

/// Default bound on dimensions taken from format names.
pub const DEFAULT_MAX_PARSED_DIMENSION: u32 = 4096;

/// Pixel count in `1..=max`, or `None`.
fn parse_dimension(digits: &str, max: u32) -> Option<u32> {
    digits
        .parse::<u32>()
        .ok()
        .filter(|value| (1..=max).contains(value))
}

/// Alias tables and name parsers.
///
/// [`Registry::default`] carries the built-in aliases:
///
/// | family | aliases |
/// |---|---|
/// | formatters | `chain`, `from`, `inline`, `resize`, `fit`, `thumbnail`, `watermark` |
/// | validators | `extensions`, `mime_types`, `size`, `image` |
/// | handlers | `generate`, `log`, `url`, `format`, `empty`, `fail` |
///
/// and two name parsers: `"320"` resizes to that width, `"120x90"` builds
/// a thumbnail of those dimensions. Format names usually come from request
/// input, so parsed dimensions above [`Registry::max_parsed_dimension`]
/// are not recognised and the lookup reports a missing formatter.
#[derive(Clone)]
pub struct Registry {
    formatters: HashMap<String, FormatterFactory>,
    validators: HashMap<String, ValidatorFactory>,
    handlers: HashMap<String, HandlerFactory>,
    name_parsers: Vec<NameParser>,
    max_parsed_dimension: u32,
}

impl std::fmt::Debug for Registry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut formatters: Vec<_> = self.formatters.keys().collect();
        let mut validators: Vec<_> = self.validators.keys().collect();
        let mut handlers: Vec<_> = self.handlers.keys().collect();
        formatters.sort();
        validators.sort();
        handlers.sort();
        f.debug_struct("Registry")
            .field("formatters", &formatters)
            .field("validators", &validators)
            .field("handlers", &handlers)
            .field("name_parsers", &self.name_parsers.len())
            .field("max_parsed_dimension", &self.max_parsed_dimension)
            .finish()
    }
}

impl Default for Registry {
    fn default() -> Self {
        let mut registry = Self::empty();
        registry.register_builtin_formatters();
        registry.register_builtin_validators();
        registry.register_builtin_handlers();
        registry.register_builtin_name_parsers();
        registry
    }
}

impl Registry {
    /// Registry with the built-in aliases.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry without any alias or name parser.
    pub fn empty() -> Self {
        Self {
            formatters: HashMap::new(),
            validators: HashMap::new(),
            handlers: HashMap::new(),
            name_parsers: Vec::new(),
            max_parsed_dimension: DEFAULT_MAX_PARSED_DIMENSION,
        }
    }

    /// Add or replace a formatter alias.
    pub fn register_formatter(&mut self, alias: impl Into<String>, factory: FormatterFactory) -> &mut Self {
        self.formatters.insert(alias.into(), factory);
        self
    }

    /// Add or replace a validator alias.
    pub fn register_validator(&mut self, alias: impl Into<String>, factory: ValidatorFactory) -> &mut Self {
        self.validators.insert(alias.into(), factory);
        self
    }

    /// Add or replace a handler alias.
    pub fn register_handler(&mut self, alias: impl Into<String>, factory: HandlerFactory) -> &mut Self {
        self.handlers.insert(alias.into(), factory);
        self
    }

    /// Append a name parser; parsers are tried in registration order.
    pub fn add_name_parser(&mut self, parser: NameParser) -> &mut Self {
        self.name_parsers.push(parser);
        self
    }

    /// Largest width or height a name parser may accept.
    pub fn max_parsed_dimension(&self) -> u32 {
        self.max_parsed_dimension
    }

    /// Bound the dimensions accepted from format names.
    pub fn set_max_parsed_dimension(&mut self, max: u32) -> &mut Self {
        self.max_parsed_dimension = max;
        self
    }

    /// Build the formatter for `format` in `context`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown aliases or bad options.
    pub fn build_formatter(
        &self,
        context: &str,
        format: &str,
        config: &FormatterConfig,
    ) -> VermeerResult<Arc<dyn Formatter>> {
        match config {
            FormatterConfig::Instance(formatter) => Ok(Arc::clone(formatter)),
            FormatterConfig::Callable(func) => Ok(Arc::new(InlineFormatter::new(Arc::clone(func)))),
            FormatterConfig::Alias { alias, options } => {
                let factory = self.formatters.get(alias).ok_or_else(|| {
                    ConfigError::new(format!(
                        "Unknown formatter alias '{}' for format '{}' in context '{}'",
                        alias, format, context
                    ))
                })?;
                let build = FormatterBuild {
                    registry: self,
                    context,
                    format,
                };
                factory(&build, options)
            }
        }
    }

    /// Build a formatter for an unconfigured `name` through the name parsers.
    ///
    /// `Ok(None)` when no parser recognises the name.
    pub fn parse_formatter(&self, context: &str, name: &str) -> VermeerResult<Option<Arc<dyn Formatter>>> {
        for parser in &self.name_parsers {
            if let Some(config) = parser(name, self.max_parsed_dimension) {
                debug!(context, format = name, "Format name parsed");
                return self.build_formatter(context, name, &config).map(Some);
            }
        }
        Ok(None)
    }

    /// Build a validator.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown aliases or bad options.
    pub fn build_validator(&self, config: &ValidatorConfig) -> VermeerResult<Arc<dyn Validator>> {
        match config {
            ValidatorConfig::Instance(validator) => Ok(Arc::clone(validator)),
            ValidatorConfig::Alias { alias, options } => {
                let factory = self.validators.get(alias).ok_or_else(|| {
                    ConfigError::new(format!("Unknown validator alias '{}'", alias))
                })?;
                factory(options)
            }
        }
    }

    /// Build a not-found handler, wrapped in a filter when the recipe
    /// carries `formats`, `except_formats`, `storages` or `except_storages`.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for unknown aliases or bad options.
    pub fn build_handler(&self, config: &HandlerConfig) -> VermeerResult<Arc<dyn FileNotFoundHandler>> {
        match config {
            HandlerConfig::Instance(handler) => Ok(Arc::clone(handler)),
            HandlerConfig::Alias { alias, options } => {
                let factory = self.handlers.get(alias).ok_or_else(|| {
                    ConfigError::new(format!("Unknown file-not-found handler alias '{}'", alias))
                })?;
                let handler = factory(options)?;
                let filter = HandlerFilter::from_options(options)?;
                if filter.is_empty() {
                    Ok(handler)
                } else {
                    Ok(Arc::new(FilteredHandler::new(handler, filter)))
                }
            }
        }
    }

    fn register_builtin_formatters(&mut self) {
        self.register_formatter(
            "chain",
            formatter_factory(|build, options| {
                let stages = match options.get("formatters") {
                    Some(Value::Array(stages)) if !stages.is_empty() => stages,
                    _ => {
                        return Err(ConfigError::new(format!(
                            "chain format '{}' needs a non-empty 'formatters' list",
                            build.format()
                        ))
                        .into());
                    }
                };
                let stages = stages
                    .iter()
                    .map(|stage| build.nested(stage))
                    .collect::<VermeerResult<Vec<_>>>()?;
                Ok(Arc::new(ChainFormatter::new(stages)) as Arc<dyn Formatter>)
            }),
        );
        self.register_formatter(
            "from",
            formatter_factory(|build, options| {
                let from = options.required_string("from")?;
                let formatter = match options.get("formatter") {
                    Some(value) => Some(build.nested(value)?),
                    None => None,
                };
                let required = options.bool("required")?.unwrap_or(false);
                Ok(Arc::new(FromFormatter::new(build.format(), from, formatter, required)?)
                    as Arc<dyn Formatter>)
            }),
        );
        self.register_formatter(
            "inline",
            formatter_factory(|_, options| {
                Ok(Arc::new(InlineFormatter::copy(options.string("extension")?)) as Arc<dyn Formatter>)
            }),
        );
        self.register_formatter(
            "resize",
            formatter_factory(|_, options| Ok(Arc::new(ImageFormatter::resize(options)?) as Arc<dyn Formatter>)),
        );
        self.register_formatter(
            "fit",
            formatter_factory(|_, options| Ok(Arc::new(ImageFormatter::fit(options)?) as Arc<dyn Formatter>)),
        );
        self.register_formatter(
            "thumbnail",
            formatter_factory(|_, options| {
                Ok(Arc::new(ImageFormatter::thumbnail(options)?) as Arc<dyn Formatter>)
            }),
        );
        self.register_formatter(
            "watermark",
            formatter_factory(|_, options| {
                Ok(Arc::new(ImageFormatter::watermark(options)?) as Arc<dyn Formatter>)
            }),
        );
    }

    fn register_builtin_validators(&mut self) {
        self.register_validator(
            "extensions",
            validator_factory(|options| Ok(Arc::new(ExtensionValidator::from_options(options)?) as Arc<dyn Validator>)),
        );
        self.register_validator(
            "mime_types",
            validator_factory(|options| Ok(Arc::new(MimeTypeValidator::from_options(options)?) as Arc<dyn Validator>)),
        );
        self.register_validator(
            "size",
            validator_factory(|options| Ok(Arc::new(SizeValidator::from_options(options)?) as Arc<dyn Validator>)),
        );
        self.register_validator(
            "image",
            validator_factory(|options| {
                Ok(Arc::new(ImageDimensionsValidator::from_options(options)?) as Arc<dyn Validator>)
            }),
        );
    }

    fn register_builtin_handlers(&mut self) {
        self.register_handler(
            "generate",
            handler_factory(|_| Ok(Arc::new(GenerateHandler) as Arc<dyn FileNotFoundHandler>)),
        );
        self.register_handler(
            "log",
            handler_factory(|_| Ok(Arc::new(LogHandler) as Arc<dyn FileNotFoundHandler>)),
        );
        self.register_handler(
            "url",
            handler_factory(|options| {
                Ok(Arc::new(UrlHandler::new(options.required_string("url")?)) as Arc<dyn FileNotFoundHandler>)
            }),
        );
        self.register_handler(
            "format",
            handler_factory(|options| {
                Ok(Arc::new(FormatHandler::new(options.required_string("format")?))
                    as Arc<dyn FileNotFoundHandler>)
            }),
        );
        self.register_handler(
            "empty",
            handler_factory(|options| {
                Ok(Arc::new(EmptyHandler::new(options.string("url")?)) as Arc<dyn FileNotFoundHandler>)
            }),
        );
        self.register_handler(
            "fail",
            handler_factory(|_| Ok(Arc::new(FailHandler) as Arc<dyn FileNotFoundHandler>)),
        );
    }

    fn register_builtin_name_parsers(&mut self) {
        self.add_name_parser(name_parser(|name, max| {
            let captures = WIDTH.captures(name)?;
            let width = parse_dimension(&captures[1], max)?;
            Some(FormatterConfig::alias("resize", Options::new().with("width", width)))
        }));
        self.add_name_parser(name_parser(|name, max| {
            let captures = DIMENSIONS.captures(name)?;
            let width = parse_dimension(&captures[1], max)?;
            let height = parse_dimension(&captures[2], max)?;
            Some(FormatterConfig::alias(
                "thumbnail",
                Options::new().with("width", width).with("height", height),
            ))
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_builtin_aliases() {
        let registry = Registry::default();
        let config = FormatterConfig::from_value(&json!("resize:width=100")).unwrap();
        assert!(registry.build_formatter("avatars", "small", &config).is_ok());

        let unknown = FormatterConfig::from_value(&json!("sepia")).unwrap();
        let err = registry.build_formatter("avatars", "old", &unknown).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_name_parsers() {
        let registry = Registry::default();
        assert!(registry.parse_formatter("avatars", "320").unwrap().is_some());
        assert!(registry.parse_formatter("avatars", "120x90").unwrap().is_some());
        assert!(registry.parse_formatter("avatars", "thumb").unwrap().is_none());
        assert!(Registry::empty().parse_formatter("avatars", "320").unwrap().is_none());
    }

    #[test]
    fn test_name_parsers_bound_dimensions() {
        let mut registry = Registry::default();
        assert_eq!(registry.max_parsed_dimension(), DEFAULT_MAX_PARSED_DIMENSION);
        assert!(registry.parse_formatter("avatars", "50000x50000").unwrap().is_none());
        assert!(registry.parse_formatter("avatars", "120x50000").unwrap().is_none());
        assert!(registry.parse_formatter("avatars", "99999999999").unwrap().is_none());
        assert!(registry.parse_formatter("avatars", "0").unwrap().is_none());
        assert!(registry.parse_formatter("avatars", "4096").unwrap().is_some());

        registry.set_max_parsed_dimension(100);
        assert!(registry.parse_formatter("avatars", "320").unwrap().is_none());
        assert!(registry.parse_formatter("avatars", "100x100").unwrap().is_some());
    }

    #[test]
    fn test_direct_self_reference_rejected() {
        let registry = Registry::default();
        let config = FormatterConfig::from_value(&json!({"type": "from", "from": "thumb"})).unwrap();
        let err = registry.build_formatter("avatars", "thumb", &config).err().unwrap();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_chain_shorthand() {
        let registry = Registry::default();
        let config = FormatterConfig::from_value(&json!(["resize:width=200", "fit:width=100,height=100"])).unwrap();
        assert!(registry.build_formatter("avatars", "square", &config).is_ok());

        let bad = FormatterConfig::from_value(&json!(["resize:width=200", "fit:width=100"])).unwrap();
        assert!(registry.build_formatter("avatars", "square", &bad).is_err());
    }

    #[test]
    fn test_custom_alias() {
        let mut registry = Registry::empty();
        registry.register_formatter(
            "copy",
            formatter_factory(|_, _| Ok(Arc::new(InlineFormatter::copy(None)) as Arc<dyn Formatter>)),
        );
        let config = FormatterConfig::from_value(&json!("copy")).unwrap();
        assert!(registry.build_formatter("docs", "backup", &config).is_ok());
    }
}
