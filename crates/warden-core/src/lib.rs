#![deny(unsafe_code)]

//! warden core: the control socket of a long-running daemon.
//!
//! A local administrator connects to a Unix-domain socket, receives a
//! protocol greeting, and sends fixed-header requests. The built-in command
//! set is STOP, which begins an orderly shutdown; any other command code is
//! answered with `EINVAL`. Stale socket files left by a crashed process are
//! detected and replaced, and a second instance refuses to start while the
//! first is alive.

/// Compile-time build metadata (version, git hash, profile).
pub mod build_info;
/// Growable byte queue for connection I/O.
pub mod buffer;
/// Client side of the control protocol.
pub mod client;
/// Connection registry, dispatcher and socket wired to an event source.
pub mod control;
/// Per-connection framing and request handling.
pub mod connection;
/// Async daemon runtime hosting the control socket.
pub mod daemon;
/// Command dispatch table.
pub mod dispatch;
/// Scheduler capability consumed by the control subsystem.
pub mod event;
/// Socket binding and stale-socket recovery.
pub mod listener;
/// In-memory log capture.
pub mod logging;
/// Wire format of the control protocol.
pub mod protocol;
/// Registry of live connections.
pub mod registry;

pub use client::{ControlClient, ControlClientError, Reply};
pub use control::{ControlContext, ControlOptions};
pub use daemon::{Daemon, DaemonError, ShutdownSignal};
pub use dispatch::{CommandContext, CommandHandler, CommandResult, Dispatcher};
pub use event::EventSource;
pub use listener::{ControlSocket, InitError};
pub use logging::{LogCollector, LogReader};
pub use protocol::{CommandCode, Errno, Greeting, PROTOCOL_VERSION, Request, Response};
pub use registry::ConnectionId;
