//! Optional TOML settings file
//!
//! ```toml
//! mode = "multi"
//! cancel_check_interval = 1000
//! hidden_levels = ["debug"]
//! limit = 500
//!
//! [[filter]]
//! property = "Logger"
//! relation = "Contains"
//! mode = "Exclude"
//! value = "Sql"
//! ```
//!
//! Command-line flags override anything set here.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

use logsift_logs::{
    DEFAULT_CANCEL_CHECK_INTERVAL, FilterError, FilterSpec, LoadMode, PersistedFilter,
};
use logsift_types::Severity;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub mode: LoadMode,

    /// Records parsed between cancellation checks
    pub cancel_check_interval: usize,

    /// Severities hidden from the output
    pub hidden_levels: Vec<Severity>,

    /// Maximum number of records printed
    pub limit: Option<usize>,

    #[serde(rename = "filter")]
    pub filters: Vec<PersistedFilter>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            mode: LoadMode::default(),
            cancel_check_interval: DEFAULT_CANCEL_CHECK_INTERVAL,
            hidden_levels: Vec::new(),
            limit: None,
            filters: Vec::new(),
        }
    }
}

impl Settings {
    /// Load settings from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read settings from {}", path.display()))?;
        Self::parse(&content).with_context(|| format!("invalid settings in {}", path.display()))
    }

    pub fn parse(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    /// Validate the embedded filters
    pub fn filter_specs(&self) -> Result<Vec<FilterSpec>, FilterError> {
        self.filters.iter().map(FilterSpec::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_file_uses_defaults() {
        let settings = Settings::parse("").unwrap();
        assert_eq!(settings, Settings::default());
        assert_eq!(settings.cancel_check_interval, 1000);
        assert_eq!(settings.mode, LoadMode::Multi);
    }

    #[test]
    fn test_full_settings() {
        let settings = Settings::parse(
            r#"
            mode = "single"
            cancel_check_interval = 50
            hidden_levels = ["debug", "info"]
            limit = 10

            [[filter]]
            property = "Logger"
            relation = "Contains"
            mode = "Exclude"
            value = "Sql"
            "#,
        )
        .unwrap();

        assert_eq!(settings.mode, LoadMode::Single);
        assert_eq!(settings.cancel_check_interval, 50);
        assert_eq!(settings.hidden_levels, vec![Severity::Debug, Severity::Info]);
        assert_eq!(settings.limit, Some(10));
        assert_eq!(settings.filter_specs().unwrap().len(), 1);
    }

    #[test]
    fn test_invalid_filter_surfaces_on_validation() {
        let settings = Settings::parse(
            r#"
            [[filter]]
            property = "Nope"
            relation = "Is"
            mode = "Include"
            "#,
        )
        .unwrap();
        assert!(settings.filter_specs().is_err());
    }

    #[test]
    fn test_invalid_regex_surfaces_on_validation() {
        let settings = Settings::parse(
            r#"
            [[filter]]
            property = "Message"
            relation = "MatchesRegex"
            mode = "Include"
            value = "(unclosed"
            "#,
        )
        .unwrap();
        assert!(matches!(
            settings.filter_specs(),
            Err(FilterError::InvalidRegex { .. })
        ));
    }

    #[test]
    fn test_unknown_mode_is_rejected() {
        assert!(Settings::parse(r#"mode = "sideways""#).is_err());
    }

    #[test]
    fn test_load_reports_path() {
        let err = Settings::load(Path::new("/no/such/settings.toml")).unwrap_err();
        assert!(format!("{:#}", err).contains("/no/such/settings.toml"));
    }
}
