//! Configuration builders for tests.
//!
//! Use [`TestConfigBuilder`] to create customised [`AppConfig`] values without
//! repeating boilerplate across crate boundaries.

use std::path::Path;

use warden_config::AppConfig;

/// Fluent builder for [`AppConfig`] in tests.
///
/// # Example
///
/// ```ignore
/// let config = TestConfigBuilder::new()
///     .socket_path(dir.path().join("control.sock"))
///     .instance_name("vpn0")
///     .build();
/// ```
pub struct TestConfigBuilder {
    config: AppConfig,
}

impl TestConfigBuilder {
    pub fn new() -> Self {
        Self {
            config: AppConfig::default(),
        }
    }

    pub fn socket_path(mut self, path: impl AsRef<Path>) -> Self {
        self.config.control.socket_path = Some(path.as_ref().display().to_string());
        self
    }

    pub fn instance_name(mut self, name: &str) -> Self {
        self.config.control.instance_name = Some(name.to_string());
        self
    }

    pub fn backlog(mut self, backlog: u32) -> Self {
        self.config.control.backlog = backlog;
        self
    }

    pub fn max_frame_bytes(mut self, limit: usize) -> Self {
        self.config.control.max_frame_bytes = limit;
        self
    }

    pub fn log_level(mut self, level: &str) -> Self {
        self.config.logging.level = level.to_string();
        self
    }

    /// Whether a socket path has been set explicitly.
    pub fn has_socket_path(&self) -> bool {
        self.config.control.socket_path.is_some()
    }

    pub fn build(self) -> AppConfig {
        self.config
    }
}

impl Default for TestConfigBuilder {
    fn default() -> Self {
        Self::new()
    }
}
