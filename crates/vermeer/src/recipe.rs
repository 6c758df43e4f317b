//! Recipe parsing shared by formatters, validators and not-found handlers.
//!
//! A recipe names a registered alias and carries its options. Recipes come
//! in two shapes:
//!
//! ```toml
//! thumb = "thumbnail:width=120,height=120,background=#000000"
//! wide = { type = "resize", width = 1600 }
//! ```
//!
//! String recipes carry string values only; list options use `|` as the
//! separator (`"extensions:allowed=jpg|png"`).

use serde_json::{Map, Value};
use std::str::FromStr;
use vermeer_error::{ConfigError, VermeerResult};

/// Options of a recipe, keyed by option name.
///
/// Getters coerce string values, so `"120"` and `120` read the same.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Options(Map<String, Value>);

impl Options {
    /// Create empty options.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an option.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.0.insert(key.into(), value.into());
        self
    }

    /// Raw option value.
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key).filter(|v| !v.is_null())
    }

    /// Whether an option is present.
    pub fn contains(&self, key: &str) -> bool {
        self.get(key).is_some()
    }

    /// Option names.
    pub fn keys(&self) -> impl Iterator<Item = &String> {
        self.0.keys()
    }

    /// String option; numbers and booleans are rendered as text.
    pub fn string(&self, key: &str) -> VermeerResult<Option<String>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::String(s)) => Ok(Some(s.clone())),
            Some(Value::Number(n)) => Ok(Some(n.to_string())),
            Some(Value::Bool(b)) => Ok(Some(b.to_string())),
            Some(other) => Err(invalid(key, "a string", other)),
        }
    }

    /// Unsigned integer option.
    pub fn u64(&self, key: &str) -> VermeerResult<Option<u64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_u64()
                .map(Some)
                .ok_or_else(|| invalid(key, "a non-negative integer", &Value::Number(n.clone()))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<u64>()
                .map(Some)
                .map_err(|_| invalid(key, "a non-negative integer", &Value::String(s.clone()))),
            Some(other) => Err(invalid(key, "a non-negative integer", other)),
        }
    }

    /// `u32` option.
    pub fn u32(&self, key: &str) -> VermeerResult<Option<u32>> {
        match self.u64(key)? {
            None => Ok(None),
            Some(n) => u32::try_from(n).map(Some).map_err(|_| {
                ConfigError::new(format!("Option '{}' is out of range: {}", key, n)).into()
            }),
        }
    }

    /// Signed integer option.
    pub fn i64(&self, key: &str) -> VermeerResult<Option<i64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => n
                .as_i64()
                .map(Some)
                .ok_or_else(|| invalid(key, "an integer", &Value::Number(n.clone()))),
            Some(Value::String(s)) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| invalid(key, "an integer", &Value::String(s.clone()))),
            Some(other) => Err(invalid(key, "an integer", other)),
        }
    }

    /// Floating point option.
    pub fn f64(&self, key: &str) -> VermeerResult<Option<f64>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Number(n)) => Ok(n.as_f64()),
            Some(Value::String(s)) => s
                .trim()
                .parse::<f64>()
                .map(Some)
                .map_err(|_| invalid(key, "a number", &Value::String(s.clone()))),
            Some(other) => Err(invalid(key, "a number", other)),
        }
    }

    /// Boolean option; accepts `true/false`, `1/0`, `yes/no`.
    pub fn bool(&self, key: &str) -> VermeerResult<Option<bool>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Bool(b)) => Ok(Some(*b)),
            Some(Value::Number(n)) if n.as_u64() == Some(0) => Ok(Some(false)),
            Some(Value::Number(n)) if n.as_u64() == Some(1) => Ok(Some(true)),
            Some(Value::String(s)) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "1" | "yes" | "on" => Ok(Some(true)),
                "false" | "0" | "no" | "off" => Ok(Some(false)),
                _ => Err(invalid(key, "a boolean", &Value::String(s.clone()))),
            },
            Some(other) => Err(invalid(key, "a boolean", other)),
        }
    }

    /// List option: an array, or a `|`-separated string.
    pub fn list(&self, key: &str) -> VermeerResult<Option<Vec<String>>> {
        match self.get(key) {
            None => Ok(None),
            Some(Value::Array(items)) => items
                .iter()
                .map(|item| match item {
                    Value::String(s) => Ok(s.clone()),
                    Value::Number(n) => Ok(n.to_string()),
                    other => Err(invalid(key, "a list of strings", other)),
                })
                .collect::<VermeerResult<Vec<_>>>()
                .map(Some),
            Some(Value::String(s)) => Ok(Some(
                s.split('|')
                    .map(str::trim)
                    .filter(|item| !item.is_empty())
                    .map(str::to_string)
                    .collect(),
            )),
            Some(other) => Err(invalid(key, "a list of strings", other)),
        }
    }

    /// Required string option.
    pub fn required_string(&self, key: &str) -> VermeerResult<String> {
        self.string(key)?.ok_or_else(|| missing(key))
    }

    /// Required `u32` option.
    pub fn required_u32(&self, key: &str) -> VermeerResult<u32> {
        self.u32(key)?.ok_or_else(|| missing(key))
    }
}

impl From<Map<String, Value>> for Options {
    fn from(map: Map<String, Value>) -> Self {
        Self(map)
    }
}

fn invalid(key: &str, expected: &str, value: &Value) -> vermeer_error::VermeerError {
    ConfigError::new(format!("Option '{}' must be {}, got {}", key, expected, value)).into()
}

fn missing(key: &str) -> vermeer_error::VermeerError {
    ConfigError::new(format!("Missing required option '{}'", key)).into()
}

/// An alias plus its options.
#[derive(Debug, Clone, PartialEq)]
pub struct Recipe {
    /// Registered alias, e.g. `"resize"`
    pub alias: String,
    /// Options passed to the alias factory
    pub options: Options,
}

impl Recipe {
    /// Create a recipe.
    pub fn new(alias: impl Into<String>, options: Options) -> Self {
        Self {
            alias: alias.into(),
            options,
        }
    }

    /// Parse a string or table recipe.
    ///
    /// # Errors
    ///
    /// Returns a configuration error for malformed strings, tables without a
    /// `type` key and any other value shape.
    pub fn from_value(value: &Value) -> VermeerResult<Self> {
        match value {
            Value::String(s) => s.parse(),
            Value::Object(map) => {
                let alias = match map.get("type") {
                    Some(Value::String(alias)) if !alias.trim().is_empty() => alias.trim().to_string(),
                    _ => {
                        return Err(ConfigError::new(format!(
                            "Recipe table requires a string 'type': {}",
                            value
                        ))
                        .into());
                    }
                };
                let mut options = map.clone();
                options.remove("type");
                Ok(Self::new(alias, Options(options)))
            }
            other => Err(ConfigError::new(format!("Invalid recipe: {}", other)).into()),
        }
    }
}

impl FromStr for Recipe {
    type Err = vermeer_error::VermeerError;

    fn from_str(recipe: &str) -> Result<Self, Self::Err> {
        let (alias, rest) = match recipe.split_once(':') {
            Some((alias, rest)) => (alias.trim(), Some(rest)),
            None => (recipe.trim(), None),
        };
        if alias.is_empty() {
            return Err(ConfigError::new(format!("Recipe '{}' has no alias", recipe)).into());
        }

        let mut options = Map::new();
        for pair in rest.unwrap_or("").split(',').filter(|p| !p.trim().is_empty()) {
            let (key, value) = pair.split_once('=').ok_or_else(|| {
                ConfigError::new(format!(
                    "Recipe option '{}' in '{}' is not key=value",
                    pair, recipe
                ))
            })?;
            options.insert(key.trim().to_string(), Value::String(value.trim().to_string()));
        }

        Ok(Self::new(alias, Options(options)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_parse_string_recipe() {
        let recipe: Recipe = "thumbnail:width=120, height=80".parse().unwrap();
        assert_eq!(recipe.alias, "thumbnail");
        assert_eq!(recipe.options.u32("width").unwrap(), Some(120));
        assert_eq!(recipe.options.u32("height").unwrap(), Some(80));
    }

    #[test]
    fn test_parse_bare_alias() {
        let recipe: Recipe = "generate".parse().unwrap();
        assert_eq!(recipe.alias, "generate");
        assert!(!recipe.options.contains("anything"));
    }

    #[test]
    fn test_parse_table_recipe() {
        let recipe = Recipe::from_value(&json!({"type": "resize", "width": 300, "upsize": true})).unwrap();
        assert_eq!(recipe.alias, "resize");
        assert_eq!(recipe.options.u32("width").unwrap(), Some(300));
        assert_eq!(recipe.options.bool("upsize").unwrap(), Some(true));
        assert!(!recipe.options.contains("type"));
    }

    #[test]
    fn test_rejects_malformed_recipes() {
        assert!("resize:200".parse::<Recipe>().is_err());
        assert!(":width=1".parse::<Recipe>().is_err());
        assert!(Recipe::from_value(&json!({"width": 1})).is_err());
        assert!(Recipe::from_value(&json!(42)).is_err());
    }

    #[test]
    fn test_list_options() {
        let recipe: Recipe = "extensions:allowed=jpg|png| gif".parse().unwrap();
        assert_eq!(
            recipe.options.list("allowed").unwrap(),
            Some(vec!["jpg".to_string(), "png".to_string(), "gif".to_string()])
        );

        let options = Options::new().with("allowed", json!(["image/*", "text/plain"]));
        assert_eq!(options.list("allowed").unwrap().unwrap().len(), 2);
    }

    #[test]
    fn test_invalid_values() {
        let options = Options::new().with("width", "wide").with("flag", "maybe");
        assert!(options.u32("width").is_err());
        assert!(options.bool("flag").is_err());
        assert!(options.required_string("missing").is_err());
    }
}
