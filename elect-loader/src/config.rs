//! Runtime configuration for elect-loader
//!
//! Folds the TOML file and the root folder resolution into one resolved
//! configuration with every default filled in.

use elect_common::config::{resolve_root_folder, TomlConfig};
use elect_common::{Error, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::models::{PollDefinition, CANDIDATE_VALUES};
use crate::services::prefetch::{compile_pattern, DEFAULT_IMAGE_URI_PATTERN};
use crate::sources::TabularOptions;

/// Default HTTP listen address
pub const DEFAULT_LISTEN: &str = "127.0.0.1:5740";

/// Default results page for HTML imports
pub const DEFAULT_PAGE_URL: &str = "http://www.kartaitogov.ru/diff";

/// Default provider name for HTML imports
pub const DEFAULT_HTML_PROVIDER: &str = "kartaitogov";

/// Fully resolved loader configuration
#[derive(Debug, Clone)]
pub struct LoaderConfig {
    pub root_folder: PathBuf,
    pub database: PathBuf,
    pub images_folder: PathBuf,
    pub listen: String,
    pub log_level: String,
    pub page_url: String,
    pub image_uri_pattern: Regex,
    pub html_provider: String,
    pub tabular: TabularOptions,
    pub poll: PollDefinition,
}

impl LoaderConfig {
    /// Resolve against the TOML file; `cli_root` overrides every other root source
    pub fn resolve(cli_root: Option<&Path>, toml: &TomlConfig) -> Result<Self> {
        let root_folder = resolve_root_folder(cli_root, toml);

        let database = toml
            .database
            .clone()
            .unwrap_or_else(|| root_folder.join("elect.db"));
        let images_folder = toml
            .images_folder
            .clone()
            .unwrap_or_else(|| root_folder.join("images"));

        let pattern = toml
            .html
            .image_uri_pattern
            .as_deref()
            .unwrap_or(DEFAULT_IMAGE_URI_PATTERN);
        let image_uri_pattern = compile_pattern(pattern)
            .map_err(|e| Error::Config(format!("Invalid image URI pattern: {}", e)))?;
        if image_uri_pattern.captures_len() < 4 {
            return Err(Error::Config(
                "Image URI pattern needs three groups: region, commission, file name".to_string(),
            ));
        }

        let tabular = TabularOptions::from_settings(
            toml.delimited.delimiter,
            toml.delimited.encoding.as_deref(),
        )
        .map_err(Error::Config)?;

        let poll = match &toml.poll {
            Some(settings) => PollDefinition {
                name: settings.name.clone(),
                candidates: settings.candidates.clone(),
            },
            None => PollDefinition::default(),
        };
        if poll.candidates.len() < CANDIDATE_VALUES {
            return Err(Error::Config(format!(
                "Poll '{}' lists {} candidates, at least {} required",
                poll.name,
                poll.candidates.len(),
                CANDIDATE_VALUES
            )));
        }

        Ok(Self {
            root_folder,
            database,
            images_folder,
            listen: toml.listen.clone().unwrap_or_else(|| DEFAULT_LISTEN.to_string()),
            log_level: toml.logging.level.clone(),
            page_url: toml
                .html
                .page_url
                .clone()
                .unwrap_or_else(|| DEFAULT_PAGE_URL.to_string()),
            image_uri_pattern,
            html_provider: toml
                .html
                .provider_name
                .clone()
                .unwrap_or_else(|| DEFAULT_HTML_PROVIDER.to_string()),
            tabular,
            poll,
        })
    }

    /// Create the root, database and image folders if missing
    pub fn ensure_folders(&self) -> Result<()> {
        std::fs::create_dir_all(&self.root_folder)?;
        if let Some(parent) = self.database.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::create_dir_all(&self.images_folder)?;

        info!(
            root = %self.root_folder.display(),
            database = %self.database.display(),
            images = %self.images_folder.display(),
            "Folders ready"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use elect_common::config::{HtmlSourceSettings, PollSettings};

    #[test]
    fn test_defaults_derive_from_root() {
        let config = LoaderConfig::resolve(Some(Path::new("/data/elect")), &TomlConfig::default()).unwrap();

        assert_eq!(config.database, PathBuf::from("/data/elect/elect.db"));
        assert_eq!(config.images_folder, PathBuf::from("/data/elect/images"));
        assert_eq!(config.listen, DEFAULT_LISTEN);
        assert_eq!(config.html_provider, DEFAULT_HTML_PROVIDER);
        assert_eq!(config.tabular.delimiter, b';');
        assert_eq!(config.poll, PollDefinition::state_duma_2011());
    }

    #[test]
    fn test_pattern_without_groups_rejected() {
        let toml = TomlConfig {
            html: HtmlSourceSettings {
                image_uri_pattern: Some(r"http://example\.org/.*\.jpg".to_string()),
                ..Default::default()
            },
            ..Default::default()
        };
        let err = LoaderConfig::resolve(Some(Path::new("/tmp")), &toml).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn test_short_poll_rejected() {
        let toml = TomlConfig {
            poll: Some(PollSettings {
                name: "Референдум".to_string(),
                candidates: vec!["Да".to_string(), "Нет".to_string()],
            }),
            ..Default::default()
        };
        let err = LoaderConfig::resolve(Some(Path::new("/tmp")), &toml).unwrap_err();
        assert!(err.to_string().contains("2 candidates"));
    }
}
