//! Import run parameters
//!
//! Policies governing unknown entities and changed duplicates, plus the
//! source-independent knobs of one run.

use serde::{Deserialize, Serialize};
use std::str::FromStr;

/// What to do with a region or commission the store does not know
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UnknownEntityAction {
    /// Persist the entity and keep processing the record
    #[default]
    Create,
    /// Skip the record, continue with the next one
    Ignore,
    /// Abort the whole run
    Stop,
}

impl FromStr for UnknownEntityAction {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "create" => Ok(UnknownEntityAction::Create),
            "ignore" => Ok(UnknownEntityAction::Ignore),
            "stop" => Ok(UnknownEntityAction::Stop),
            other => Err(format!("unknown action '{}' (expected create, ignore or stop)", other)),
        }
    }
}

/// What to do with a duplicate whose values differ from the stored protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UpdatePolicy {
    /// Rewrite the stored protocol in place
    #[default]
    Replace,
    /// Keep the stored protocol, log a warning
    SkipWithWarning,
}

/// Import workflow parameters
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportParameters {
    #[serde(default)]
    pub unknown_region: UnknownEntityAction,

    #[serde(default)]
    pub unknown_commission: UnknownEntityAction,

    #[serde(default)]
    pub update_policy: UpdatePolicy,

    /// Fetch image bytes for records that only carry URIs (default: false)
    #[serde(default)]
    pub download_images: bool,
}

impl Default for ImportParameters {
    fn default() -> Self {
        Self {
            unknown_region: UnknownEntityAction::Create,
            unknown_commission: UnknownEntityAction::Create,
            update_policy: UpdatePolicy::Replace,
            download_images: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_parsing_is_case_insensitive() {
        assert_eq!("Ignore".parse::<UnknownEntityAction>(), Ok(UnknownEntityAction::Ignore));
        assert_eq!("STOP".parse::<UnknownEntityAction>(), Ok(UnknownEntityAction::Stop));
        assert!("drop".parse::<UnknownEntityAction>().is_err());
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let params: ImportParameters = serde_json::from_str(r#"{"unknown_region":"ignore"}"#).unwrap();
        assert_eq!(params.unknown_region, UnknownEntityAction::Ignore);
        assert_eq!(params.unknown_commission, UnknownEntityAction::Create);
        assert_eq!(params.update_policy, UpdatePolicy::Replace);
        assert!(!params.download_images);
    }
}
