//! Core daemon process: startup, shutdown, and main event loop.
//!
//! The daemon hosts the control subsystem on a single task. Readiness on
//! the listening socket and on every accepted connection is multiplexed
//! with [`StreamMap`]s, and every event is handed to the
//! [`ControlContext`] one at a time.

use std::collections::HashMap;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};

use futures::stream::{self, Stream};
use tokio::io::AsyncReadExt;
use tokio::net::UnixStream;
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::sync::broadcast;
use tokio_stream::{StreamExt, StreamMap};
use tracing::{debug, info, warn};

use warden_config::AppConfig;

use crate::build_info;
use crate::connection::Transport;
use crate::control::{Accepted, ControlContext, ControlOptions, ReadEvent};
use crate::dispatch::Dispatcher;
use crate::event::EventSource;
use crate::listener::InitError;
use crate::registry::ConnectionId;

/// Bytes requested from a connection per read.
const READ_CHUNK: usize = 4096;

/// Shutdown signal sent via broadcast channel.
#[derive(Debug, Clone)]
pub struct ShutdownSignal;

/// The warden daemon.
pub struct Daemon {
    config: AppConfig,
    dispatcher: Dispatcher,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
    /// Subscribed at construction so requests made before `run` are kept.
    shutdown_rx: broadcast::Receiver<ShutdownSignal>,
}

impl Daemon {
    /// Create a new daemon with the built-in command set.
    pub fn new(config: AppConfig) -> Self {
        let (shutdown_tx, shutdown_rx) = broadcast::channel(1);

        Self {
            config,
            dispatcher: Dispatcher::new(),
            shutdown_tx,
            shutdown_rx,
        }
    }

    /// Command table served on the control socket, for registering
    /// additional commands before [`Daemon::run`].
    pub fn dispatcher_mut(&mut self) -> &mut Dispatcher {
        &mut self.dispatcher
    }

    /// Bind the control socket and serve it until shutdown is requested by
    /// a STOP command, [`Daemon::shutdown`], or Ctrl-C.
    ///
    /// The socket file is removed and every control connection closed
    /// before this returns.
    pub async fn run(self) -> Result<(), DaemonError> {
        let options = ControlOptions::from_config(&self.config);
        let mut shutdown_rx = self.shutdown_rx;
        let events = LoopEvents::new(self.shutdown_tx.clone());

        let mut ctx = ControlContext::init(&options, self.dispatcher, events).await?;
        info!(
            path = %options.socket_path.display(),
            version = %build_info::version_string(),
            "warden daemon starting"
        );

        let mut driver = EventDriver::new();
        driver.apply(ctx.events().take());

        loop {
            tokio::select! {
                accepted = ctx.socket().accept(), if driver.accepting => {
                    let accepted = accepted.map(|stream| driver.adopt(stream));
                    ctx.on_accept(accepted);
                }
                Some((id, event)) = driver.readers.next(), if !driver.readers.is_empty() => {
                    ctx.on_read(id, event);
                }
                Some((id, ())) = driver.writers.next(), if !driver.writers.is_empty() => {
                    ctx.on_writable(id);
                }
                _ = shutdown_rx.recv() => {
                    info!("Shutdown signal received, stopping daemon");
                    break;
                }
                _ = tokio::signal::ctrl_c() => {
                    warn!("Ctrl-C received, initiating graceful shutdown");
                    break;
                }
            }
            driver.apply(ctx.events().take());
        }

        ctx.teardown();
        info!("Daemon stopped");
        Ok(())
    }

    /// Request a graceful shutdown of the daemon.
    pub fn shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }

    /// Sender that stops the daemon, before or during [`Daemon::run`].
    pub fn shutdown_sender(&self) -> broadcast::Sender<ShutdownSignal> {
        self.shutdown_tx.clone()
    }

    /// Observe shutdown requests, including STOP commands.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<ShutdownSignal> {
        self.shutdown_tx.subscribe()
    }

    /// Get a reference to the daemon's configuration.
    pub fn config(&self) -> &AppConfig {
        &self.config
    }
}

/// Errors from the daemon runtime.
#[derive(Debug, thiserror::Error)]
pub enum DaemonError {
    #[error("control socket setup failed: {0}")]
    Init(#[from] InitError),
}

/// Registration change requested by the control context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopCommand {
    WatchAccept,
    UnwatchAccept,
    WatchReadable(ConnectionId),
    WatchWritable(ConnectionId),
    Unwatch(ConnectionId),
}

/// [`EventSource`] backed by the daemon loop. Requests are queued and
/// applied by the loop after each event.
#[derive(Debug)]
struct LoopEvents {
    pending: Mutex<Vec<LoopCommand>>,
    shutdown_tx: broadcast::Sender<ShutdownSignal>,
}

impl LoopEvents {
    fn new(shutdown_tx: broadcast::Sender<ShutdownSignal>) -> Self {
        Self {
            pending: Mutex::new(Vec::new()),
            shutdown_tx,
        }
    }

    fn push(&self, command: LoopCommand) {
        if let Ok(mut pending) = self.pending.lock() {
            pending.push(command);
        }
    }

    fn take(&self) -> Vec<LoopCommand> {
        self.pending
            .lock()
            .map(|mut pending| std::mem::take(&mut *pending))
            .unwrap_or_default()
    }
}

impl EventSource for LoopEvents {
    fn watch_accept(&self) {
        self.push(LoopCommand::WatchAccept);
    }

    fn unwatch_accept(&self) {
        self.push(LoopCommand::UnwatchAccept);
    }

    fn watch_readable(&self, id: ConnectionId) {
        self.push(LoopCommand::WatchReadable(id));
    }

    fn watch_writable(&self, id: ConnectionId) {
        self.push(LoopCommand::WatchWritable(id));
    }

    fn unwatch(&self, id: ConnectionId) {
        self.push(LoopCommand::Unwatch(id));
    }

    fn request_shutdown(&self) {
        let _ = self.shutdown_tx.send(ShutdownSignal);
    }
}

type ReadStream = Pin<Box<dyn Stream<Item = ReadEvent> + Send>>;
type WriteReady = Pin<Box<dyn Stream<Item = ()> + Send>>;

/// Socket halves and readiness streams for every live connection.
struct EventDriver {
    accepting: bool,
    readers: StreamMap<ConnectionId, ReadStream>,
    writers: StreamMap<ConnectionId, WriteReady>,
    unclaimed: HashMap<ConnectionId, OwnedReadHalf>,
    write_halves: HashMap<ConnectionId, Arc<OwnedWriteHalf>>,
}

impl EventDriver {
    fn new() -> Self {
        Self {
            accepting: false,
            readers: StreamMap::new(),
            writers: StreamMap::new(),
            unclaimed: HashMap::new(),
            write_halves: HashMap::new(),
        }
    }

    /// Split an accepted stream and hand its write side to a transport.
    fn adopt(&mut self, stream: UnixStream) -> Accepted {
        let id = ConnectionId::next();
        let (read_half, write_half) = stream.into_split();
        let write_half = Arc::new(write_half);
        self.unclaimed.insert(id, read_half);
        self.write_halves.insert(id, Arc::clone(&write_half));
        Accepted {
            id,
            transport: Box::new(SocketTransport {
                half: Some(write_half),
            }),
        }
    }

    fn apply(&mut self, commands: Vec<LoopCommand>) {
        for command in commands {
            match command {
                LoopCommand::WatchAccept => self.accepting = true,
                LoopCommand::UnwatchAccept => self.accepting = false,
                LoopCommand::WatchReadable(id) => {
                    if let Some(half) = self.unclaimed.remove(&id) {
                        self.readers.insert(id, read_stream(half));
                    }
                }
                LoopCommand::WatchWritable(id) => {
                    if let Some(half) = self.write_halves.get(&id) {
                        self.writers.insert(id, write_ready(Arc::clone(half)));
                    }
                }
                LoopCommand::Unwatch(id) => {
                    self.readers.remove(&id);
                    self.writers.remove(&id);
                    self.unclaimed.remove(&id);
                    self.write_halves.remove(&id);
                }
            }
        }

        // Accepted but never registered: drop both halves.
        for (id, _half) in self.unclaimed.drain() {
            debug!(connection = %id, "releasing unregistered control connection");
            self.write_halves.remove(&id);
        }
    }
}

fn read_stream(half: OwnedReadHalf) -> ReadStream {
    Box::pin(stream::unfold(Some(half), |state| async move {
        let Some(mut half) = state else {
            return None;
        };
        let mut buf = vec![0u8; READ_CHUNK];
        match half.read(&mut buf).await {
            Ok(0) => Some((ReadEvent::Eof, None)),
            Ok(n) => {
                buf.truncate(n);
                Some((ReadEvent::Data(buf), Some(half)))
            }
            Err(err) => Some((ReadEvent::Error(err), None)),
        }
    }))
}

fn write_ready(half: Arc<OwnedWriteHalf>) -> WriteReady {
    Box::pin(stream::once(async move {
        let _ = half.writable().await;
    }))
}

/// Non-blocking writer over the write half of an accepted stream.
struct SocketTransport {
    half: Option<Arc<OwnedWriteHalf>>,
}

impl Transport for SocketTransport {
    fn try_send(&mut self, bytes: &[u8]) -> io::Result<usize> {
        match &self.half {
            Some(half) => half.try_write(bytes),
            None => Err(io::ErrorKind::NotConnected.into()),
        }
    }

    fn shutdown(&mut self) {
        self.half = None;
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::protocol::CommandCode;
    use tempfile::TempDir;

    fn config_in(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.control.socket_path = Some(dir.path().join("d.sock").display().to_string());
        config
    }

    #[tokio::test]
    async fn test_daemon_creation() {
        let daemon = Daemon::new(AppConfig::default());
        assert_eq!(daemon.config().control.backlog, 3);
    }

    #[tokio::test]
    async fn test_daemon_shutdown_is_observable() {
        let daemon = Daemon::new(AppConfig::default());
        let mut rx = daemon.subscribe_shutdown();

        daemon.shutdown();
        assert!(rx.recv().await.is_ok());
    }

    #[test]
    fn test_dispatcher_mut_registers_commands() {
        let mut daemon = Daemon::new(AppConfig::default());
        daemon
            .dispatcher_mut()
            .register_fn(CommandCode(7), |_, _, _| Ok(Vec::new()));
        assert!(daemon.dispatcher_mut().contains(CommandCode(7)));
        assert!(daemon.dispatcher_mut().contains(CommandCode::STOP));
    }

    #[test]
    fn test_loop_events_queue_in_order() {
        let (tx, mut rx) = broadcast::channel(1);
        let events = LoopEvents::new(tx);
        let id = ConnectionId::next();

        events.watch_accept();
        events.watch_readable(id);
        events.unwatch(id);
        events.request_shutdown();

        assert_eq!(
            events.take(),
            vec![
                LoopCommand::WatchAccept,
                LoopCommand::WatchReadable(id),
                LoopCommand::Unwatch(id),
            ]
        );
        assert!(events.take().is_empty());
        assert!(rx.try_recv().is_ok());
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown_and_unlinks_socket() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let path = config.socket_path();
        let daemon = Daemon::new(config);
        let shutdown = daemon.shutdown_sender();

        let handle = tokio::spawn(daemon.run());
        while !path.exists() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        shutdown.send(ShutdownSignal).unwrap();

        tokio::time::timeout(Duration::from_secs(5), handle)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_shutdown_requested_before_run_is_honored() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        let path = config.socket_path();
        let daemon = Daemon::new(config);

        daemon.shutdown();
        tokio::time::timeout(Duration::from_secs(5), daemon.run())
            .await
            .unwrap()
            .unwrap();
        assert!(!path.exists());
    }

    #[tokio::test]
    async fn test_run_reports_init_failure() {
        let dir = TempDir::new().unwrap();
        let config = config_in(&dir);
        std::fs::write(config.socket_path(), b"not a socket").unwrap();

        let err = Daemon::new(config).run().await.unwrap_err();
        assert!(matches!(err, DaemonError::Init(InitError::BindFailed { .. })));
    }
}
