//! Configuration loading and root folder resolution
//!
//! Root folder priority order:
//! 1. Command-line argument (highest priority)
//! 2. Environment variable
//! 3. TOML config file
//! 4. OS-dependent compiled default (fallback)

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Environment variable overriding the root folder
pub const ROOT_FOLDER_ENV: &str = "ELECT_ROOT_FOLDER";

/// Loader configuration as stored in `config.toml`
///
/// Every field is optional so a partial file (or no file at all) still
/// produces a usable configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Folder holding the database and the image cache
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// Database file path (default: `<root_folder>/elect.db`)
    #[serde(default)]
    pub database: Option<PathBuf>,

    /// Local cache folder for protocol images (default: `<root_folder>/images`)
    #[serde(default)]
    pub images_folder: Option<PathBuf>,

    /// HTTP listen address for `serve`
    #[serde(default)]
    pub listen: Option<String>,

    #[serde(default)]
    pub logging: LoggingConfig,

    #[serde(default)]
    pub html: HtmlSourceSettings,

    #[serde(default)]
    pub delimited: DelimitedSourceSettings,

    /// Poll and candidate list; the built-in definition is used when absent
    #[serde(default)]
    pub poll: Option<PollSettings>,
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive (overridden by `RUST_LOG`)
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

/// HTML scrape source section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct HtmlSourceSettings {
    /// Results page to download
    #[serde(default)]
    pub page_url: Option<String>,

    /// Regex matching image URLs; groups: 1 = region, 2 = commission, 3 = file name
    #[serde(default)]
    pub image_uri_pattern: Option<String>,

    /// Provider name used for scrape imports
    #[serde(default)]
    pub provider_name: Option<String>,
}

/// Delimited file source section
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct DelimitedSourceSettings {
    /// Single-character field delimiter (default `;`)
    #[serde(default)]
    pub delimiter: Option<char>,

    /// WHATWG encoding label (default `windows-1251`)
    #[serde(default)]
    pub encoding: Option<String>,
}

/// Poll definition section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollSettings {
    pub name: String,
    pub candidates: Vec<String>,
}

/// Resolve the root folder following the priority order above
pub fn resolve_root_folder(cli_arg: Option<&Path>, toml: &TomlConfig) -> PathBuf {
    // Priority 1: Command-line argument
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    // Priority 2: Environment variable
    if let Ok(path) = std::env::var(ROOT_FOLDER_ENV) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    // Priority 3: TOML config file
    if let Some(path) = &toml.root_folder {
        return path.clone();
    }

    // Priority 4: OS-dependent compiled default
    default_root_folder()
}

/// Default location of `config.toml` for the platform
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("elect").join("config.toml"))
}

/// OS-dependent default root folder
pub fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("elect"))
        .unwrap_or_else(|| PathBuf::from("./elect_data"))
}

/// Load TOML configuration
///
/// A missing file is not an error: defaults are returned and a warning logged.
/// A file that exists but cannot be read or parsed is a configuration error.
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        warn!(
            path = %path.display(),
            "Config file not found, using defaults"
        );
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read {} failed: {}", path.display(), e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse {} failed: {}", path.display(), e)))?;

    debug!(path = %path.display(), "Config file loaded");
    Ok(config)
}

/// Write TOML configuration atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_file_yields_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_toml_config(&dir.path().join("absent.toml")).unwrap();
        assert_eq!(config, TomlConfig::default());
        assert_eq!(config.logging.level, "info");
    }

    #[test]
    fn test_invalid_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "root_folder = [not toml").unwrap();

        let err = load_toml_config(&path).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_cli_argument_wins() {
        let toml = TomlConfig {
            root_folder: Some(PathBuf::from("/from/toml")),
            ..Default::default()
        };
        let resolved = resolve_root_folder(Some(Path::new("/from/cli")), &toml);
        assert_eq!(resolved, PathBuf::from("/from/cli"));
    }
}
