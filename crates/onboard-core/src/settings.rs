use crate::verify::VerifyOptions;
use crate::CoreError;
use onboard_remote::TroubleshooterConfig;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// User-level settings read from `config.toml`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default, deny_unknown_fields)]
pub struct Settings {
    pub cache_ttl_hours: u64,
    pub verify_workers: usize,
    pub check_timeout_secs: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub troubleshooter: Option<TroubleshooterConfig>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cache_ttl_hours: 24,
            verify_workers: 4,
            check_timeout_secs: 10,
            troubleshooter: None,
        }
    }
}

impl Settings {
    /// `$ONBOARD_CONFIG`, else `~/.config/onboard/config.toml`.
    pub fn default_path() -> Option<PathBuf> {
        if let Ok(path) = std::env::var("ONBOARD_CONFIG") {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        std::env::var("HOME")
            .ok()
            .map(|home| PathBuf::from(home).join(".config/onboard/config.toml"))
    }

    /// Settings from the default location; a missing file yields defaults.
    pub fn load_default() -> Result<Self, CoreError> {
        match Self::default_path() {
            Some(path) => Self::load(&path),
            None => Ok(Self::default()),
        }
    }

    pub fn load(path: &Path) -> Result<Self, CoreError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = std::fs::read_to_string(path)?;
        Self::from_toml(&content)
            .map_err(|e| CoreError::Settings(format!("{}: {e}", path.display())))
    }

    pub fn from_toml(content: &str) -> Result<Self, CoreError> {
        let settings: Settings =
            toml::from_str(content).map_err(|e| CoreError::Settings(e.to_string()))?;
        if settings.verify_workers == 0 {
            return Err(CoreError::Settings(
                "verify_workers must be at least 1".to_owned(),
            ));
        }
        Ok(settings)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_hours * 60 * 60)
    }

    pub fn verify_options(&self) -> VerifyOptions {
        VerifyOptions {
            workers: self.verify_workers,
            default_timeout: Duration::from_secs(self.check_timeout_secs),
        }
    }
}
