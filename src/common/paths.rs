//! Configuration and dependency-area paths
//!
//! Fragments live in a fixed area next to the testset being run:
//! `<testset dir>/dependencies/{api,suite}/`.

use std::path::{Path, PathBuf};

use super::config::LoaderConfig;

/// Name used for the configuration directory
const APP_NAME: &str = "stepcase";

/// File extensions accepted for testset, api and suite documents
pub const DEFINITION_EXTENSIONS: &[&str] = &["yaml", "yml", "json"];

/// Get the configuration directory path
///
/// Uses the directories crate for platform-appropriate locations:
/// - Linux: `~/.config/stepcase/`
/// - macOS: `~/Library/Application Support/stepcase/`
/// - Windows: `%APPDATA%\stepcase\`
pub fn config_dir() -> Option<PathBuf> {
    directories::ProjectDirs::from("", "", APP_NAME).map(|dirs| dirs.config_dir().to_path_buf())
}

/// Get the path to the configuration file
pub fn config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("config.toml"))
}

/// The dependency area for a testset file or a directory of testsets
pub fn dependencies_dir(testset: &Path, loader: &LoaderConfig) -> PathBuf {
    let base = if testset.is_dir() {
        testset.to_path_buf()
    } else {
        testset
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    };
    base.join(&loader.dependencies_dir)
}

/// Directory holding api fragments for a dependency area
pub fn api_dir(dependencies: &Path, loader: &LoaderConfig) -> PathBuf {
    dependencies.join(&loader.api_dir)
}

/// Directory holding suite fragments for a dependency area
pub fn suite_dir(dependencies: &Path, loader: &LoaderConfig) -> PathBuf {
    dependencies.join(&loader.suite_dir)
}

/// Whether a path carries one of the accepted definition extensions
pub fn is_definition_file(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| {
            let ext = ext.to_ascii_lowercase();
            DEFINITION_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_dir_is_valid() {
        let dir = config_dir();
        assert!(dir.is_some());
    }

    #[test]
    fn test_dependencies_dir_is_sibling_of_testset() {
        let loader = LoaderConfig::default();
        let deps = dependencies_dir(Path::new("cases/login/testset.yaml"), &loader);
        assert_eq!(deps, PathBuf::from("cases/login/dependencies"));
        assert_eq!(
            api_dir(&deps, &loader),
            PathBuf::from("cases/login/dependencies/api")
        );
        assert_eq!(
            suite_dir(&deps, &loader),
            PathBuf::from("cases/login/dependencies/suite")
        );
    }

    #[test]
    fn test_definition_extensions() {
        assert!(is_definition_file(Path::new("a.yaml")));
        assert!(is_definition_file(Path::new("a.YML")));
        assert!(is_definition_file(Path::new("a.json")));
        assert!(!is_definition_file(Path::new("a.toml")));
        assert!(!is_definition_file(Path::new("README")));
    }
}
