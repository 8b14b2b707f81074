#![forbid(unsafe_code)]

//! Import configuration, loadable from TOML.

use std::path::Path;

use jitload_script::ResolverConfig;
use miette::Report;
use serde::{Deserialize, Serialize};

pub type ConfigError = Report;

fn config_msg(message: impl Into<String>) -> ConfigError {
    Report::msg(message.into())
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportConfig {
    /// Identifier assigned on the first line of every source unit.
    #[serde(default = "default_version_marker")]
    pub version_marker: String,

    /// Newest operator set version accepted, if bounded.
    #[serde(default)]
    pub max_supported_version: Option<u64>,

    #[serde(default)]
    pub resolver: ResolverConfig,
}

fn default_version_marker() -> String {
    "op_version_set".to_string()
}

impl Default for ImportConfig {
    fn default() -> Self {
        ImportConfig {
            version_marker: default_version_marker(),
            max_supported_version: None,
            resolver: ResolverConfig::default(),
        }
    }
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_')
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

impl ImportConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(content)
            .map_err(|e| config_msg(format!("Invalid config format: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| config_msg(format!("Failed to read config: {}", e)))?;
        Self::from_toml_str(&content)
    }

    pub fn to_toml_string(&self) -> Result<String, ConfigError> {
        toml::to_string_pretty(self)
            .map_err(|e| config_msg(format!("Failed to serialize config: {}", e)))
    }

    /// Names used as source identifiers must lex as identifiers.
    pub fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("version_marker", &self.version_marker),
            ("resolver.namespace_root", &self.resolver.namespace_root),
            ("resolver.builtin_namespace", &self.resolver.builtin_namespace),
        ] {
            if !is_identifier(value) {
                return Err(config_msg(format!(
                    "Invalid config: {field} must be an identifier, got {value:?}"
                )));
            }
        }
        Ok(())
    }
}
