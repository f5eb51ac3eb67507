//! Configuration file handling

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use super::paths::config_path;
use super::Result;

/// Main configuration structure
#[derive(Debug, Deserialize, Default, Clone)]
pub struct Config {
    /// Where fragments are looked up
    #[serde(default)]
    pub loader: LoaderConfig,

    /// Template evaluation limits
    #[serde(default)]
    pub template: TemplateConfig,

    /// Report, trace and log output
    #[serde(default)]
    pub output: OutputConfig,

    /// Global variables seeded into every run
    #[serde(default)]
    pub variables: BTreeMap<String, serde_json::Value>,
}

/// Dependency area layout, relative to the testset being run
#[derive(Debug, Deserialize, Clone)]
pub struct LoaderConfig {
    #[serde(default = "default_dependencies_dir")]
    pub dependencies_dir: String,

    #[serde(default = "default_api_dir")]
    pub api_dir: String,

    #[serde(default = "default_suite_dir")]
    pub suite_dir: String,

    /// Nesting limit for actions and references parsed at load time;
    /// follows `[template] max_depth`
    #[serde(skip, default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for LoaderConfig {
    fn default() -> Self {
        Self {
            dependencies_dir: default_dependencies_dir(),
            api_dir: default_api_dir(),
            suite_dir: default_suite_dir(),
            max_depth: default_max_depth(),
        }
    }
}

fn default_dependencies_dir() -> String {
    "dependencies".to_string()
}
fn default_api_dir() -> String {
    "api".to_string()
}
fn default_suite_dir() -> String {
    "suite".to_string()
}

/// Template evaluation settings
#[derive(Debug, Deserialize, Clone)]
pub struct TemplateConfig {
    /// Maximum nesting of calls and deferred variable expansion
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
        }
    }
}

fn default_max_depth() -> usize {
    32
}

/// Output settings
#[derive(Debug, Deserialize, Default, Clone)]
pub struct OutputConfig {
    /// Write the JSON run report here
    pub report: Option<PathBuf>,

    /// Write the JSON trace records here
    pub trace: Option<PathBuf>,

    /// Mirror log output into this file
    pub log_file: Option<PathBuf>,
}

impl Config {
    /// Load configuration from the default config file
    ///
    /// Returns default configuration if file doesn't exist
    pub fn load() -> Result<Self> {
        if let Some(path) = config_path() {
            if path.exists() {
                return Self::load_from(&path);
            }
        }
        Ok(Self::default())
    }

    /// Load configuration from an explicit file
    pub fn load_from(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            super::Error::Config(format!("Cannot read '{}': {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse configuration from TOML text
    pub fn parse(content: &str) -> Result<Self> {
        let mut config: Config =
            toml::from_str(content).map_err(|e| super::Error::ConfigParse(e.to_string()))?;
        config.loader.max_depth = config.template.max_depth;
        Ok(config)
    }

    /// Apply `KEY=VALUE` overrides on top of the `[variables]` table
    ///
    /// Values are kept as strings; typed values belong in the config file.
    pub fn apply_overrides<S: AsRef<str>>(&mut self, overrides: &[S]) -> Result<()> {
        for item in overrides {
            let item = item.as_ref();
            let (key, value) = item.split_once('=').ok_or_else(|| {
                super::Error::Config(format!("Expected KEY=VALUE, got '{}'", item))
            })?;
            let key = key.trim();
            if key.is_empty() {
                return Err(super::Error::Config(format!(
                    "Empty variable name in '{}'",
                    item
                )));
            }
            self.variables
                .insert(key.to_string(), serde_json::Value::String(value.to_string()));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_empty() {
        let config = Config::parse("").unwrap();
        assert_eq!(config.loader.dependencies_dir, "dependencies");
        assert_eq!(config.loader.api_dir, "api");
        assert_eq!(config.loader.suite_dir, "suite");
        assert_eq!(config.template.max_depth, 32);
        assert!(config.variables.is_empty());
    }

    #[test]
    fn test_parse_sections() {
        let config = Config::parse(
            r#"
[loader]
dependencies_dir = "deps"

[template]
max_depth = 8

[output]
report = "out/report.json"

[variables]
host = "127.0.0.1"
port = 8080
"#,
        )
        .unwrap();
        assert_eq!(config.loader.dependencies_dir, "deps");
        assert_eq!(config.loader.api_dir, "api");
        assert_eq!(config.template.max_depth, 8);
        assert_eq!(config.loader.max_depth, 8);
        assert_eq!(config.output.report, Some(PathBuf::from("out/report.json")));
        assert_eq!(config.variables["port"], serde_json::json!(8080));
    }

    #[test]
    fn test_overrides() {
        let mut config = Config::default();
        config.apply_overrides(&["user=admin", "token=a=b"]).unwrap();
        assert_eq!(config.variables["user"], serde_json::json!("admin"));
        assert_eq!(config.variables["token"], serde_json::json!("a=b"));
        assert!(config.apply_overrides(&["novalue"]).is_err());
        assert!(config.apply_overrides(&["=x"]).is_err());
    }

    #[test]
    fn test_unreadable_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = Config::load_from(&dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, crate::common::Error::Config(_)));
        assert_eq!(err.category(), crate::common::ErrorCategory::Config);
        assert!(!err.is_load_error());
    }

    #[test]
    fn test_invalid_toml() {
        assert!(matches!(
            Config::parse("[loader"),
            Err(crate::common::Error::ConfigParse(_))
        ));
    }
}
