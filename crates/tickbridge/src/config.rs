//! Bridge configuration.

use serde::{de::DeserializeOwned, Deserialize, Serialize};
use thiserror::Error;

/// Configuration errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// The document could not be parsed.
    #[error("failed to parse config: {0}")]
    Parse(String),

    /// A value is out of range.
    #[error("invalid config value `{field}`: {reason}")]
    Invalid {
        /// Offending field.
        field: &'static str,
        /// Why it was rejected.
        reason: String,
    },
}

/// Parses any config type from JSON.
///
/// # Errors
///
/// [`ConfigError::Parse`] if the document is malformed.
pub fn from_json<T: DeserializeOwned>(json: &str) -> Result<T, ConfigError> {
    serde_json::from_str(json).map_err(|e| ConfigError::Parse(e.to_string()))
}

/// Settings for one [`Bridge`](crate::Bridge).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BridgeConfig {
    /// Name attached to log records.
    pub name: String,
    /// Catch panics raised by handlers instead of unwinding through the
    /// dispatcher.
    pub catch_handler_panics: bool,
}

impl BridgeConfig {
    /// Config with the given name and defaults otherwise.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Parses and validates a JSON document.
    ///
    /// # Errors
    ///
    /// [`ConfigError`] if the document is malformed or the name is blank.
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = from_json(json)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks field constraints.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Invalid`] if the name is blank.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.name.trim().is_empty() {
            return Err(ConfigError::Invalid {
                field: "name",
                reason: "must not be blank".into(),
            });
        }
        Ok(())
    }
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            name: "bridge".into(),
            catch_handler_panics: true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_fill_missing_fields() {
        let config = BridgeConfig::from_json(r#"{ "name": "server" }"#).unwrap();
        assert_eq!(config.name, "server");
        assert!(config.catch_handler_panics);
    }

    #[test]
    fn blank_name_rejected() {
        let err = BridgeConfig::from_json(r#"{ "name": "  " }"#).unwrap_err();
        assert!(matches!(err, ConfigError::Invalid { field: "name", .. }));
    }

    #[test]
    fn malformed_json_rejected() {
        let err = BridgeConfig::from_json("{ name: ").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }
}
