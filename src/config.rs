//! Server settings: `settings.json` first, then `PRINTFLOW_*` environment
//! overrides. A missing file means defaults.

use serde::Deserialize;
use std::path::{Path, PathBuf};
use uuid::Uuid;

pub const SETTINGS_FILENAME: &str = "settings.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub tcp_socket_binding: String,
    pub tcp_socket_port: u16,
    pub save_file: PathBuf,
    pub static_dir: PathBuf,
    pub jwt_secret: String,
    pub jwt_expiration_in_minutes: i64,
    pub default_owner_username: String,
    pub default_owner_password: String,
    pub default_org_id: Uuid,
}

impl Default for Settings {
    fn default() -> Self {
        Settings {
            tcp_socket_binding: "0.0.0.0".to_string(),
            tcp_socket_port: 3000,
            save_file: PathBuf::from("printflow.redb"),
            static_dir: PathBuf::from("../frontend/dist"),
            jwt_secret: "change-me".to_string(),
            jwt_expiration_in_minutes: 24 * 60,
            default_owner_username: "admin".to_string(),
            default_owner_password: "admin".to_string(),
            default_org_id: Uuid::nil(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Read { path: PathBuf, source: std::io::Error },
    #[error("cannot parse {path}: {source}")]
    Parse { path: PathBuf, source: serde_json::Error },
    #[error("invalid {name}: {value}")]
    InvalidEnv { name: &'static str, value: String },
}

impl Settings {
    /// Load from `PRINTFLOW_SETTINGS` or `settings.json`, then apply env.
    pub fn load() -> Result<Settings, ConfigError> {
        let path = std::env::var_os("PRINTFLOW_SETTINGS")
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(SETTINGS_FILENAME));
        let mut settings = Settings::from_file(&path)?;
        settings.apply_env(|name| std::env::var(name).ok())?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Settings, ConfigError> {
        if !path.exists() {
            tracing::info!(path = %path.display(), "no settings file, using defaults");
            return Ok(Settings::default());
        }
        let content = std::fs::read_to_string(path)
            .map_err(|source| ConfigError::Read { path: path.to_path_buf(), source })?;
        let settings = serde_json::from_str(&content)
            .map_err(|source| ConfigError::Parse { path: path.to_path_buf(), source })?;
        tracing::info!(path = %path.display(), "loaded settings");
        Ok(settings)
    }

    /// `lookup` is the environment; injected so tests don't touch the
    /// process env.
    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<(), ConfigError> {
        if let Some(v) = lookup("PRINTFLOW_BIND") {
            self.tcp_socket_binding = v;
        }
        if let Some(v) = lookup("PRINTFLOW_PORT") {
            self.tcp_socket_port = v
                .parse()
                .map_err(|_| ConfigError::InvalidEnv { name: "PRINTFLOW_PORT", value: v.clone() })?;
        }
        if let Some(v) = lookup("PRINTFLOW_SAVE_FILE") {
            self.save_file = PathBuf::from(v);
        }
        if let Some(v) = lookup("PRINTFLOW_JWT_SECRET") {
            self.jwt_secret = v;
        }
        Ok(())
    }

    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.tcp_socket_binding, self.tcp_socket_port)
    }
}
