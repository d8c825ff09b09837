use directories::{BaseDirs, ProjectDirs, UserDirs};
use log::warn;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::error::ConfigError;

pub const DEFAULT_MAX_UPLOAD_MB: u64 = 50;

fn default_max_upload_mb() -> u64 {
    DEFAULT_MAX_UPLOAD_MB
}

/// Settings shared by the chat core. Built once by the host and passed down
/// explicitly to the client, views and preparers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChatConfig {
    #[serde(default)]
    pub base_url: String,
    #[serde(default)]
    pub token: Option<String>,
    #[serde(default)]
    pub push_url: Option<String>,
    #[serde(default)]
    pub viewer_id: Option<String>,
    #[serde(default = "default_max_upload_mb")]
    pub max_upload_mb: u64,
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            base_url: String::new(),
            token: None,
            push_url: None,
            viewer_id: None,
            max_upload_mb: DEFAULT_MAX_UPLOAD_MB,
            download_dir: None,
        }
    }
}

impl ChatConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn max_upload_bytes(&self) -> u64 {
        self.max_upload_mb.saturating_mul(1024 * 1024)
    }

    pub fn is_configured(&self) -> bool {
        !self.base_url.trim().is_empty()
    }

    /// Configured download dir, else the user's Downloads folder, else the working dir.
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir
            .clone()
            .or_else(|| UserDirs::new().and_then(|u| u.download_dir().map(Path::to_path_buf)))
            .unwrap_or_else(|| PathBuf::from("."))
    }

    // TOML is the current format; a JSON file from older builds is converted on first load.
    pub fn toml_path() -> Option<PathBuf> {
        let base = BaseDirs::new()?;
        Some(base.config_dir().join("classchat.toml"))
    }

    fn legacy_json_path() -> Option<PathBuf> {
        let proj = ProjectDirs::from("com", "example", "ClassChat")?;
        Some(proj.config_dir().join("state.json"))
    }

    pub fn load() -> Self {
        if let Some(path) = Self::toml_path() {
            if path.exists() {
                match Self::load_from(&path) {
                    Ok(config) => return config,
                    Err(e) => warn!("ignoring {}: {e}", path.display()),
                }
            }
        }

        if let Some(legacy) = Self::legacy_json_path() {
            if let Ok(config) = Self::load_legacy(&legacy) {
                if let Some(path) = Self::toml_path() {
                    if let Err(e) = config.save_to(&path) {
                        warn!("could not migrate legacy config: {e}");
                    }
                }
                return config;
            }
        }

        Self::new()
    }

    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path)?;
        Ok(toml::from_str::<ChatConfig>(&text)?)
    }

    pub fn load_legacy(path: &Path) -> Result<Self, ConfigError> {
        let bytes = fs::read(path)?;
        Ok(serde_json::from_slice::<ChatConfig>(&bytes)?)
    }

    pub fn save(&self) -> Result<(), ConfigError> {
        let path = Self::toml_path().ok_or(ConfigError::NoConfigDir)?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        let toml = toml::to_string_pretty(self)?;
        fs::write(path, toml)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_toml_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("classchat.toml");
        let config = ChatConfig {
            base_url: "https://school.example/api".into(),
            token: Some("t0k".into()),
            viewer_id: Some("42".into()),
            max_upload_mb: 10,
            ..ChatConfig::default()
        };
        config.save_to(&path).unwrap();
        assert_eq!(ChatConfig::load_from(&path).unwrap(), config);
    }

    #[test]
    fn missing_fields_use_defaults() {
        let config: ChatConfig = toml::from_str("base_url = \"https://x\"").unwrap();
        assert_eq!(config.max_upload_mb, DEFAULT_MAX_UPLOAD_MB);
        assert_eq!(config.max_upload_bytes(), 50 * 1024 * 1024);
        assert!(config.is_configured());
        assert!(!ChatConfig::default().is_configured());
    }

    #[test]
    fn reads_legacy_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("state.json");
        fs::write(&path, r#"{"base_url":"https://old","token":null}"#).unwrap();
        let config = ChatConfig::load_legacy(&path).unwrap();
        assert_eq!(config.base_url, "https://old");
        assert_eq!(config.max_upload_mb, DEFAULT_MAX_UPLOAD_MB);
    }

    #[test]
    fn explicit_download_dir_wins() {
        let config = ChatConfig {
            download_dir: Some(PathBuf::from("/tmp/dl")),
            ..ChatConfig::default()
        };
        assert_eq!(config.download_dir(), PathBuf::from("/tmp/dl"));
    }
}
