//! Persistent settings shared with the controller.
//!
//! The controller and the daemon share one small JSON file. Only
//! `overwatchPath` is written by the daemon; the other fields belong to the
//! controller and are carried through untouched.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

/// Default config file, relative to the working directory.
pub const DEFAULT_CONFIG_FILE: &str = "config.json";

/// Default directory holding the `<region>.txt` lists.
pub const DEFAULT_IP_LIST_DIR: &str = "ips";

/// Prefix marking rules created by this daemon.
pub const DEFAULT_RULE_PREFIX: &str = "OW-VPN-";

/// Image name of the protected program.
pub const DEFAULT_PROGRAM_NAME: &str = "Overwatch.exe";

/// Firewall facility to drive.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    #[default]
    Auto,
    Netsh,
    Iptables,
}

/// Contents of `config.json`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct AppConfig {
    pub overwatch_path: String,
    pub use_github_source: bool,
    pub initial_setup_done: bool,
}

impl AppConfig {
    /// Configured program path, if set and still present on disk.
    pub fn program_path(&self) -> Option<PathBuf> {
        if self.overwatch_path.is_empty() {
            return None;
        }
        let path = PathBuf::from(&self.overwatch_path);
        path.is_file().then_some(path)
    }
}

/// Reads and writes [`AppConfig`] at a fixed location.
#[derive(Debug, Clone)]
pub struct ConfigStore {
    path: PathBuf,
}

impl ConfigStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read the config file strictly.
    pub fn read(&self) -> Result<AppConfig> {
        let content = fs::read_to_string(&self.path)
            .with_context(|| format!("Failed to read config file: {}", self.path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", self.path.display()))
    }

    /// Read the config file; a missing or broken file counts as unconfigured.
    pub fn load(&self) -> AppConfig {
        if !self.path.exists() {
            debug!("No config file at {}", self.path.display());
            return AppConfig::default();
        }
        match self.read() {
            Ok(config) => config,
            Err(e) => {
                warn!("Ignoring config file: {:#}", e);
                AppConfig::default()
            }
        }
    }

    /// Write the config atomically (temp file + rename).
    pub fn save(&self, config: &AppConfig) -> Result<()> {
        let content =
            serde_json::to_string_pretty(config).context("Failed to serialize config")?;

        let parent = match self.path.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create {}", parent.display()))?;

        let mut temp_file = tempfile::NamedTempFile::new_in(parent)
            .context("Failed to create temporary file for config")?;
        temp_file.write_all(content.as_bytes())?;
        temp_file.as_file().sync_all()?;
        temp_file
            .persist(&self.path)
            .with_context(|| format!("Failed to persist config file: {}", self.path.display()))?;
        Ok(())
    }

    /// Record a new program path, keeping the controller's fields.
    ///
    /// A readable file is updated in place. Without one, a fresh config is
    /// written with the initial setup marked as done.
    pub fn save_program_path(&self, path: &Path) -> Result<()> {
        let mut config = match self.read() {
            Ok(config) => config,
            Err(_) => AppConfig {
                initial_setup_done: true,
                ..AppConfig::default()
            },
        };
        config.overwatch_path = path.display().to_string();
        self.save(&config)
    }
}

/// Check a rule owner prefix.
///
/// The prefix is the only thing separating our rules from everybody
/// else's, so it must be non-empty and plain.
pub fn validate_rule_prefix(prefix: &str) -> Result<()> {
    if prefix.is_empty() {
        anyhow::bail!("Rule prefix cannot be empty");
    }
    if !prefix
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        anyhow::bail!(
            "Invalid rule prefix '{}'. Only ASCII letters, digits, '-' and '_' allowed",
            prefix
        );
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_json_field_names() {
        let config = AppConfig {
            overwatch_path: "C:\\Games\\Overwatch.exe".into(),
            use_github_source: false,
            initial_setup_done: true,
        };
        let json = serde_json::to_value(&config).unwrap();
        assert_eq!(json["overwatchPath"], "C:\\Games\\Overwatch.exe");
        assert_eq!(json["initialSetupDone"], true);
        assert_eq!(json["useGithubSource"], false);
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: AppConfig = serde_json::from_str(r#"{"overwatchPath": "x"}"#).unwrap();
        assert_eq!(config.overwatch_path, "x");
        assert!(!config.initial_setup_done);
    }

    #[test]
    fn test_load_missing_file() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("config.json"));
        assert_eq!(store.load(), AppConfig::default());
    }

    #[test]
    fn test_load_corrupt_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        let store = ConfigStore::new(&path);
        assert_eq!(store.load(), AppConfig::default());
        assert!(store.read().is_err());
    }

    #[test]
    fn test_program_path_requires_existing_file() {
        let dir = TempDir::new().unwrap();
        let exe = dir.path().join("game.exe");
        let config = AppConfig {
            overwatch_path: exe.display().to_string(),
            ..AppConfig::default()
        };
        assert_eq!(config.program_path(), None);

        fs::write(&exe, b"MZ").unwrap();
        assert_eq!(config.program_path(), Some(exe));
        assert_eq!(AppConfig::default().program_path(), None);
    }

    #[test]
    fn test_save_program_path_fresh_file() {
        let dir = TempDir::new().unwrap();
        let store = ConfigStore::new(dir.path().join("nested").join("config.json"));
        store.save_program_path(Path::new("/games/ow")).unwrap();

        let config = store.read().unwrap();
        assert_eq!(config.overwatch_path, "/games/ow");
        assert!(config.initial_setup_done);
    }

    #[test]
    fn test_save_program_path_keeps_other_fields() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.json");
        fs::write(
            &path,
            r#"{"overwatchPath": "/old", "useGithubSource": true, "initialSetupDone": false}"#,
        )
        .unwrap();

        let store = ConfigStore::new(&path);
        store.save_program_path(Path::new("/new")).unwrap();

        let config = store.read().unwrap();
        assert_eq!(config.overwatch_path, "/new");
        assert!(config.use_github_source);
        assert!(!config.initial_setup_done);
    }

    #[test]
    fn test_validate_rule_prefix() {
        assert!(validate_rule_prefix("OW-VPN-").is_ok());
        assert!(validate_rule_prefix("my_rules").is_ok());
        assert!(validate_rule_prefix("").is_err());
        assert!(validate_rule_prefix("bad prefix").is_err());
        assert!(validate_rule_prefix("a\"b").is_err());
    }
}
