//! Config file (§6): JSON, not the sibling crate's TOML — the wire format
//! Stitch's own config files have always used.

use crate::error::TargetStitchError;
use crate::runtime::normalize_stitch_url;
use serde::Deserialize;
use std::path::Path;

pub const DEFAULT_STITCH_URL: &str = "https://api.stitchdata.com/v2/import/batch";

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub token: Option<String>,
    #[serde(default)]
    pub stitch_url: Option<String>,
    #[serde(default)]
    pub disable_collection: Option<bool>,
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, TargetStitchError> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            TargetStitchError::ConfigError(format!("failed reading config file {}: {e}", path.display()))
        })?;
        let mut config: Config = serde_json::from_str(&raw).map_err(|e| {
            TargetStitchError::ConfigError(format!("failed parsing config file {}: {e}", path.display()))
        })?;
        config.stitch_url = Some(normalize_stitch_url(
            config.stitch_url.as_deref().unwrap_or(DEFAULT_STITCH_URL),
        ));
        Ok(config)
    }

    pub fn stitch_url(&self) -> String {
        self.stitch_url.clone().unwrap_or_else(|| DEFAULT_STITCH_URL.to_string())
    }

    pub fn require_token(&self) -> Result<String, TargetStitchError> {
        self.token
            .clone()
            .ok_or_else(|| TargetStitchError::ConfigError("config is missing required field \"token\"".to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn parses_minimal_config() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{"token": "abc123"}}"#).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.token.as_deref(), Some("abc123"));
        assert_eq!(config.stitch_url(), DEFAULT_STITCH_URL);
    }

    #[test]
    fn rewrites_push_url_on_load() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"token": "abc123", "stitch_url": "https://api.stitchdata.com/v2/import/push"}}"#
        )
        .unwrap();
        let config = Config::load(file.path()).unwrap();
        assert_eq!(config.stitch_url(), DEFAULT_STITCH_URL);
    }

    #[test]
    fn missing_token_is_an_error_unless_dry_run_bypasses_it() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{}}"#).unwrap();
        let config = Config::load(file.path()).unwrap();
        assert!(config.require_token().is_err());
    }
}
