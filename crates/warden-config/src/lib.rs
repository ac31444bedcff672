#![deny(unsafe_code)]

//! Configuration loading and validation for warden.
//!
//! Loads TOML configuration files and validates them. [`AppConfig`] is the
//! central configuration structure; the `[control]` table describes the
//! control socket endpoint and the `[logging]` table the log filter.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Default filesystem path of the control socket.
pub const DEFAULT_SOCKET_PATH: &str = "/tmp/warden.sock";

/// Smallest frame the control protocol can carry (one header).
const MIN_FRAME_BYTES: usize = 16;

/// Errors that can occur during configuration loading and validation.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("validation error: {0}")]
    Validation(String),
}

/// Top-level application configuration.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Control socket configuration.
    #[serde(default)]
    pub control: ControlConfig,

    /// Logging configuration.
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Control socket configuration.
///
/// ## TOML Example
///
/// ```toml
/// [control]
/// socket_path = "/run/warden/control.sock"
/// instance_name = "vpn0"
/// backlog = 3
/// max_frame_bytes = 1048576
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ControlConfig {
    /// Filesystem path of the control socket. Falls back to
    /// [`DEFAULT_SOCKET_PATH`] when unset.
    #[serde(default)]
    pub socket_path: Option<String>,

    /// Human-readable instance name, used only in diagnostics.
    #[serde(default)]
    pub instance_name: Option<String>,

    /// Listen backlog for pending control connections.
    #[serde(default = "default_backlog")]
    pub backlog: u32,

    /// Largest request frame accepted before the connection is dropped.
    #[serde(default = "default_max_frame_bytes")]
    pub max_frame_bytes: usize,
}

impl Default for ControlConfig {
    fn default() -> Self {
        Self {
            socket_path: None,
            instance_name: None,
            backlog: default_backlog(),
            max_frame_bytes: default_max_frame_bytes(),
        }
    }
}

fn default_backlog() -> u32 {
    3
}

fn default_max_frame_bytes() -> usize {
    1024 * 1024 // 1 MiB
}

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level filter (e.g. "info", "debug", "trace").
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

impl AppConfig {
    /// Load configuration from a TOML file at the given path using async I/O.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let content = tokio::fs::read_to_string(path).await?;
        Self::parse(&content)
    }

    /// Parse configuration from a TOML string.
    pub fn parse(s: &str) -> Result<Self, ConfigError> {
        let config: AppConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if let Some(path) = &self.control.socket_path
            && path.is_empty()
        {
            return Err(ConfigError::Validation(
                "control.socket_path must not be empty".to_string(),
            ));
        }
        if let Some(name) = &self.control.instance_name
            && name.trim().is_empty()
        {
            return Err(ConfigError::Validation(
                "control.instance_name must not be blank".to_string(),
            ));
        }
        if self.control.backlog == 0 {
            return Err(ConfigError::Validation(
                "control.backlog must be at least 1".to_string(),
            ));
        }
        if self.control.max_frame_bytes < MIN_FRAME_BYTES {
            return Err(ConfigError::Validation(format!(
                "control.max_frame_bytes must be at least {MIN_FRAME_BYTES}, got {}",
                self.control.max_frame_bytes
            )));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(ConfigError::Validation(format!(
                "logging.level must be one of {:?}, got {:?}",
                valid_levels, self.logging.level
            )));
        }

        Ok(())
    }

    /// Resolve the control socket path from config or use the default.
    pub fn socket_path(&self) -> PathBuf {
        self.control
            .socket_path
            .as_deref()
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_SOCKET_PATH))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.control.socket_path, None);
        assert_eq!(config.control.instance_name, None);
        assert_eq!(config.control.backlog, 3);
        assert_eq!(config.control.max_frame_bytes, 1024 * 1024);
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.socket_path(), PathBuf::from(DEFAULT_SOCKET_PATH));
    }

    #[test]
    fn test_parse_minimal_toml() {
        let config = AppConfig::parse("").unwrap();
        assert_eq!(config.control.backlog, 3);
    }

    #[test]
    fn test_parse_full_toml() {
        let toml = r#"
            [control]
            socket_path = "/run/warden/control.sock"
            instance_name = "vpn0"
            backlog = 8
            max_frame_bytes = 4096

            [logging]
            level = "debug"
        "#;
        let config = AppConfig::parse(toml).unwrap();
        assert_eq!(
            config.socket_path(),
            PathBuf::from("/run/warden/control.sock")
        );
        assert_eq!(config.control.instance_name.as_deref(), Some("vpn0"));
        assert_eq!(config.control.backlog, 8);
        assert_eq!(config.control.max_frame_bytes, 4096);
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_validation_rejects_empty_socket_path() {
        let toml = r#"
            [control]
            socket_path = ""
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_blank_instance_name() {
        let toml = r#"
            [control]
            instance_name = "   "
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_zero_backlog() {
        let toml = r#"
            [control]
            backlog = 0
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_validation_rejects_frame_limit_below_header() {
        let toml = r#"
            [control]
            max_frame_bytes = 15
        "#;
        let err = AppConfig::parse(toml).unwrap_err();
        assert!(err.to_string().contains("max_frame_bytes"));
    }

    #[test]
    fn test_validation_rejects_unknown_log_level() {
        let toml = r#"
            [logging]
            level = "verbose"
        "#;
        assert!(AppConfig::parse(toml).is_err());
    }

    #[test]
    fn test_roundtrip_through_toml() {
        let mut config = AppConfig::default();
        config.control.instance_name = Some("edge".to_string());
        let rendered = toml::to_string_pretty(&config).unwrap();
        let parsed = AppConfig::parse(&rendered).unwrap();
        assert_eq!(parsed.control.instance_name.as_deref(), Some("edge"));
    }

    // ── Async file-based loading ──────────────────────────────────────

    #[tokio::test]
    async fn test_load_from_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("warden.toml");
        tokio::fs::write(
            &path,
            b"[control]\nsocket_path = \"/tmp/w.sock\"\nbacklog = 5\n",
        )
        .await
        .unwrap();

        let config = AppConfig::load(&path).await.unwrap();
        assert_eq!(config.socket_path(), PathBuf::from("/tmp/w.sock"));
        assert_eq!(config.control.backlog, 5);
    }

    #[tokio::test]
    async fn test_load_nonexistent_file() {
        let result = AppConfig::load(Path::new("/nonexistent/file.toml")).await;
        assert!(matches!(result, Err(ConfigError::Io(_))));
    }

    #[tokio::test]
    async fn test_load_invalid_toml_file() {
        let tmp = TempDir::new().unwrap();
        let path = tmp.path().join("bad.toml");
        tokio::fs::write(&path, b"not valid toml [[[").await.unwrap();

        let result = AppConfig::load(&path).await;
        assert!(matches!(result, Err(ConfigError::Parse(_))));
    }

    // ── Error display ─────────────────────────────────────────────────

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::Validation("bad value".to_string());
        assert_eq!(err.to_string(), "validation error: bad value");
    }
}
