//! Daemon test helpers.
//!
//! [`TestDaemon`] runs a [`Daemon`] on a background task with its control
//! socket inside a temporary directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use tempfile::TempDir;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use warden_core::{ControlClient, Daemon, DaemonError, ShutdownSignal};

use crate::config::TestConfigBuilder;

/// How long helpers wait for the daemon to come up or go down.
const WAIT: Duration = Duration::from_secs(5);

/// A running daemon with an owned temp directory for its socket.
///
/// The temp directory is deleted automatically when this value is dropped,
/// guaranteeing cleanup even on panic. Dropping a still-running daemon asks
/// it to shut down.
pub struct TestDaemon {
    socket_path: PathBuf,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    handle: Option<JoinHandle<Result<(), DaemonError>>>,
    _temp_dir: TempDir,
}

impl TestDaemon {
    /// Start a daemon with default settings.
    pub async fn spawn() -> Self {
        Self::start(TestConfigBuilder::new(), |_| {}).await
    }

    /// Start a daemon from `builder`, letting `configure` register extra
    /// commands first. The socket lives in a fresh temp directory unless the
    /// builder already names one.
    pub async fn start(builder: TestConfigBuilder, configure: impl FnOnce(&mut Daemon)) -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp dir");
        let builder = if builder.has_socket_path() {
            builder
        } else {
            builder.socket_path(temp_dir.path().join("warden.sock"))
        };
        let config = builder.build();
        let socket_path = config.socket_path();

        let mut daemon = Daemon::new(config);
        configure(&mut daemon);
        let shutdown_tx = daemon.shutdown_sender();
        let handle = tokio::spawn(daemon.run());

        let this = Self {
            socket_path,
            shutdown_tx,
            handle: Some(handle),
            _temp_dir: temp_dir,
        };
        this.wait_ready().await;
        this
    }

    pub fn socket_path(&self) -> &Path {
        &self.socket_path
    }

    /// Open a control connection, greeting already consumed.
    pub async fn connect(&self) -> ControlClient {
        ControlClient::connect(&self.socket_path)
            .await
            .expect("failed to connect to test daemon")
    }

    /// Whether the daemon task is still running.
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Ask the daemon to shut down without going through the socket.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    /// Wait for the daemon task to finish and return its result.
    pub async fn join(mut self) -> Result<(), DaemonError> {
        let handle = self.handle.take().expect("daemon already joined");
        tokio::time::timeout(WAIT, handle)
            .await
            .expect("daemon did not stop in time")
            .expect("daemon task panicked")
    }

    async fn wait_ready(&self) {
        let deadline = tokio::time::Instant::now() + WAIT;
        loop {
            if ControlClient::connect(&self.socket_path).await.is_ok() {
                return;
            }
            if let Some(handle) = &self.handle
                && handle.is_finished()
            {
                panic!("daemon exited during startup");
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "daemon socket never became ready"
            );
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    }
}

impl Drop for TestDaemon {
    fn drop(&mut self) {
        if self.handle.is_some() {
            let _ = self.shutdown_tx.send(ShutdownSignal);
        }
    }
}
