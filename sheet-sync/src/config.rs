//! Application configuration
//!
//! Read from TOML at `--config <path>` or `<config dir>/sheet-sync/config.toml`,
//! then overridden from the environment (`.env` is loaded by the binary).
//! Every section is optional.
//!
//! ```toml
//! [remote]
//! kind = "drive"
//! file_id = "11xfaf0nGgscOpYpE9U3tfRelyCxsDoOJ"
//! name = "ICERWORKSHEET.xlsx"
//!
//! [local]
//! working_copy = "ICERWORKSHEET.xlsx"
//!
//! [header]
//! key_aliases = ["ASIN", "ASINS"]
//! max_rows = 10
//! max_cols = 50
//!
//! [retry]
//! max_attempts = 3
//! ```

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::patch::{AliasSet, BatchOptions, SearchWindow};
use crate::sync::{DriveEndpoints, RetryConfig, SyncTarget};
use crate::sync::drive::{DEFAULT_API_BASE, DEFAULT_DOWNLOAD_BASE, DEFAULT_UPLOAD_BASE};

pub const ENV_ACCESS_TOKEN: &str = "SHEET_SYNC_ACCESS_TOKEN";
pub const ENV_FILE_ID: &str = "SHEET_SYNC_FILE_ID";
pub const ENV_REMOTE_NAME: &str = "SHEET_SYNC_REMOTE_NAME";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub remote: RemoteSettings,
    pub local: LocalSettings,
    pub header: HeaderSettings,
    pub retry: RetrySettings,
}

/// Kind of remote store
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RemoteKind {
    #[default]
    Drive,
    /// A plain directory, see `RemoteSettings::directory`
    Directory,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RemoteSettings {
    pub kind: RemoteKind,
    /// Id of the file to download; found by `name` when unset
    pub file_id: Option<String>,
    /// Remote file name used to publish
    pub name: String,
    /// Opaque bearer token for Google Drive
    pub access_token: Option<String>,
    /// Root directory when `kind = "directory"`
    pub directory: Option<PathBuf>,
    pub api_base: String,
    pub upload_base: String,
    pub download_base: String,
}

impl Default for RemoteSettings {
    fn default() -> Self {
        Self {
            kind: RemoteKind::Drive,
            file_id: None,
            name: "ICERWORKSHEET.xlsx".to_string(),
            access_token: None,
            directory: None,
            api_base: DEFAULT_API_BASE.to_string(),
            upload_base: DEFAULT_UPLOAD_BASE.to_string(),
            download_base: DEFAULT_DOWNLOAD_BASE.to_string(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LocalSettings {
    /// Where the edited workbook is written before publishing
    pub working_copy: Option<PathBuf>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeaderSettings {
    /// Accepted spellings of the key column
    pub key_aliases: Vec<String>,
    pub max_rows: u32,
    pub max_cols: u32,
    /// Require updated field names to be in the header row too
    pub strict: bool,
}

impl Default for HeaderSettings {
    fn default() -> Self {
        let window = SearchWindow::default();
        Self {
            key_aliases: vec!["ASIN".to_string(), "ASINS".to_string()],
            max_rows: window.max_rows,
            max_cols: window.max_cols,
            strict: false,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub backoff_multiplier: f64,
    pub jitter: bool,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let retry = RetryConfig::default();
        Self {
            max_attempts: retry.max_attempts,
            base_delay_ms: retry.base_delay.as_millis() as u64,
            max_delay_ms: retry.max_delay.as_millis() as u64,
            backoff_multiplier: retry.backoff_multiplier,
            jitter: retry.jitter,
        }
    }
}

impl AppConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("Invalid configuration")
    }

    /// `<config dir>/sheet-sync/config.toml`
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("sheet-sync").join("config.toml"))
    }

    /// Load from `explicit` (which must exist) or the default path (if it
    /// exists), then apply environment overrides
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let mut config = match explicit {
            Some(path) => Self::read(path)?,
            None => match Self::default_path().filter(|p| p.is_file()) {
                Some(path) => Self::read(&path)?,
                None => {
                    log::debug!("No configuration file, using defaults");
                    Self::default()
                }
            },
        };
        config.apply_env(|key| std::env::var(key).ok());
        Ok(config)
    }

    fn read(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config = Self::from_toml_str(&text)
            .with_context(|| format!("In config file: {}", path.display()))?;
        log::debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Override settings from environment variables, looked up through `lookup`
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        if let Some(token) = non_empty(ENV_ACCESS_TOKEN) {
            self.remote.access_token = Some(token);
        }
        if let Some(id) = non_empty(ENV_FILE_ID) {
            self.remote.file_id = Some(id);
        }
        if let Some(name) = non_empty(ENV_REMOTE_NAME) {
            self.remote.name = name;
        }
    }

    pub fn key_aliases(&self) -> AliasSet {
        AliasSet::new(&self.header.key_aliases)
    }

    pub fn batch_options(&self) -> BatchOptions {
        BatchOptions {
            window: self.search_window(),
            strict: self.header.strict,
        }
    }

    pub fn search_window(&self) -> SearchWindow {
        SearchWindow {
            max_rows: self.header.max_rows,
            max_cols: self.header.max_cols,
        }
    }

    pub fn retry_config(&self) -> RetryConfig {
        RetryConfig {
            max_attempts: self.retry.max_attempts,
            base_delay: Duration::from_millis(self.retry.base_delay_ms),
            max_delay: Duration::from_millis(self.retry.max_delay_ms),
            backoff_multiplier: self.retry.backoff_multiplier,
            jitter: self.retry.jitter,
        }
    }

    pub fn drive_endpoints(&self) -> DriveEndpoints {
        DriveEndpoints {
            api_base: self.remote.api_base.clone(),
            upload_base: self.remote.upload_base.clone(),
            download_base: self.remote.download_base.clone(),
        }
    }

    pub fn sync_target(&self) -> SyncTarget {
        SyncTarget {
            file_id: self.remote.file_id.clone(),
            remote_name: self.remote.name.clone(),
            local_copy: self.local.working_copy.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn test_defaults() {
        let config = AppConfig::from_toml_str("").unwrap();
        assert_eq!(config, AppConfig::default());
        assert_eq!(config.remote.kind, RemoteKind::Drive);
        assert!(config.key_aliases().matches("ASINS"));
        assert_eq!(config.search_window(), SearchWindow::default());
        assert_eq!(config.retry_config(), RetryConfig::default());
    }

    #[test]
    fn test_full_file() {
        let config = AppConfig::from_toml_str(
            r#"
            [remote]
            kind = "directory"
            directory = "/srv/sheets"
            name = "stock.xlsx"

            [local]
            working_copy = "out/stock.xlsx"

            [header]
            key_aliases = ["UPC"]
            max_rows = 4
            strict = true

            [retry]
            max_attempts = 1
            jitter = false
            "#,
        )
        .unwrap();

        assert_eq!(config.remote.kind, RemoteKind::Directory);
        assert_eq!(config.remote.directory, Some(PathBuf::from("/srv/sheets")));
        assert_eq!(config.header.max_cols, 50);
        assert!(config.batch_options().strict);
        assert_eq!(config.batch_options().window.max_rows, 4);
        assert!(config.key_aliases().matches("UPC"));
        assert!(!config.key_aliases().matches("ASIN"));
        assert_eq!(config.retry_config().max_attempts, 1);
        assert_eq!(
            config.sync_target().local_copy,
            Some(PathBuf::from("out/stock.xlsx"))
        );
    }

    #[test]
    fn test_env_overrides() {
        let env: HashMap<&str, &str> = HashMap::from([
            (ENV_ACCESS_TOKEN, "ya29.token"),
            (ENV_FILE_ID, "abc123"),
            (ENV_REMOTE_NAME, "  "),
        ]);
        let mut config = AppConfig::default();

        config.apply_env(|key| env.get(key).map(|v| v.to_string()));

        assert_eq!(config.remote.access_token.as_deref(), Some("ya29.token"));
        assert_eq!(config.sync_target().file_id.as_deref(), Some("abc123"));
        assert_eq!(config.remote.name, "ICERWORKSHEET.xlsx");
    }

    #[test]
    fn test_load_explicit_path() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "[header]\nmax_rows = 3\n").unwrap();

        assert_eq!(AppConfig::load(Some(&path)).unwrap().header.max_rows, 3);
        assert!(AppConfig::load(Some(&dir.path().join("missing.toml"))).is_err());

        std::fs::write(&path, "[header]\nmax_rows = \"ten\"\n").unwrap();
        assert!(AppConfig::load(Some(&path)).is_err());
    }
}
