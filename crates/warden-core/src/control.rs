//! Control subsystem: ties the listening socket, connection registry and
//! command dispatcher to a host [`EventSource`].
//!
//! All state lives in one [`ControlContext`] value owned by the host loop.
//! The host turns readiness into calls on the context (`on_accept`,
//! `on_read`, `on_writable`) and calls [`ControlContext::teardown`] once
//! when the process shuts down.

use std::io;
use std::path::PathBuf;

use tracing::{debug, error, info};

use warden_config::AppConfig;

use crate::connection::{Connection, Transport};
use crate::dispatch::Dispatcher;
use crate::event::EventSource;
use crate::listener::{ControlSocket, InitError};
use crate::registry::{Close, ConnectionId, Registry};

/// Settings for the control socket, resolved from [`AppConfig`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControlOptions {
    pub socket_path: PathBuf,
    pub instance_name: Option<String>,
    pub backlog: u32,
    pub max_frame_bytes: usize,
}

impl ControlOptions {
    pub fn from_config(config: &AppConfig) -> Self {
        Self {
            socket_path: config.socket_path(),
            instance_name: config.control.instance_name.clone(),
            backlog: config.control.backlog,
            max_frame_bytes: config.control.max_frame_bytes,
        }
    }
}

/// A connection handed over by the host after `accept`.
pub struct Accepted {
    pub id: ConnectionId,
    pub transport: Box<dyn Transport>,
}

/// Outcome of one read on a connection.
#[derive(Debug)]
pub enum ReadEvent {
    Data(Vec<u8>),
    Eof,
    Error(io::Error),
}

/// Everything the control subsystem owns.
pub struct ControlContext<E: EventSource> {
    socket: ControlSocket,
    registry: Registry<Connection>,
    dispatcher: Dispatcher,
    events: E,
    max_frame_bytes: usize,
}

impl<E: EventSource> ControlContext<E> {
    /// Bind the control socket and start watching it for connections.
    pub async fn init(
        options: &ControlOptions,
        dispatcher: Dispatcher,
        events: E,
    ) -> Result<Self, InitError> {
        let socket = ControlSocket::bind(
            &options.socket_path,
            options.instance_name.as_deref(),
            options.backlog,
        )
        .await?;
        events.watch_accept();
        Ok(Self {
            socket,
            registry: Registry::new(),
            dispatcher,
            events,
            max_frame_bytes: options.max_frame_bytes,
        })
    }

    pub fn socket(&self) -> &ControlSocket {
        &self.socket
    }

    pub fn events(&self) -> &E {
        &self.events
    }

    pub fn connection_count(&self) -> usize {
        self.registry.len()
    }

    pub fn is_registered(&self, id: ConnectionId) -> bool {
        self.registry.contains(id)
    }

    /// Handle the result of accepting on the listening socket.
    ///
    /// An accept failure disables further accepts. Returns the id of the
    /// registered connection, if any.
    pub fn on_accept(&mut self, accepted: io::Result<Accepted>) -> Option<ConnectionId> {
        let accepted = match accepted {
            Ok(accepted) => accepted,
            Err(err) => {
                error!(error = %err, "Accepting a new control connection failed");
                self.events.unwatch_accept();
                return None;
            }
        };

        let id = accepted.id;
        let mut connection = Connection::new(id, accepted.transport, self.max_frame_bytes);
        if let Err(err) = connection.send_greeting() {
            debug!(connection = %id, error = %err, "Greeting failed, dropping control connection");
            connection.close();
            return None;
        }
        let pending = connection.has_pending_output();
        if let Err(err) = self.registry.insert(id, connection) {
            error!(error = %err, "Rejected control connection");
            return None;
        }
        self.events.watch_readable(id);
        if pending {
            self.events.watch_writable(id);
        }
        debug!(connection = %id, "New control connection");
        Some(id)
    }

    /// Handle a read event on a registered connection.
    pub fn on_read(&mut self, id: ConnectionId, event: ReadEvent) {
        let Some(connection) = self.registry.get_mut(id) else {
            return;
        };
        let bytes = match event {
            ReadEvent::Data(bytes) => bytes,
            ReadEvent::Eof => {
                debug!(connection = %id, "Control socket connection closed by peer");
                self.close_connection(id);
                return;
            }
            ReadEvent::Error(err) => {
                debug!(connection = %id, error = %err, "Error while reading from control socket");
                self.close_connection(id);
                return;
            }
        };

        match connection.receive(&bytes, &self.dispatcher, &self.events) {
            Ok(_) => {
                if connection.has_pending_output() {
                    self.events.watch_writable(id);
                }
            }
            Err(err) => {
                info!(connection = %id, error = %err, "Closing control socket on error");
                self.close_connection(id);
            }
        }
    }

    /// Handle write readiness on a connection with queued output.
    pub fn on_writable(&mut self, id: ConnectionId) {
        let Some(connection) = self.registry.get_mut(id) else {
            return;
        };
        match connection.flush() {
            Ok(()) => {
                if connection.has_pending_output() {
                    self.events.watch_writable(id);
                }
            }
            Err(err) => {
                info!(connection = %id, error = %err, "Closing control socket on error");
                self.close_connection(id);
            }
        }
    }

    /// Stop accepting, unlink the socket file and close every connection.
    pub fn teardown(mut self) {
        self.events.unwatch_accept();
        let ids: Vec<_> = self.registry.ids().collect();
        for id in ids {
            self.events.unwatch(id);
            // Last chance for queued replies, such as the STOP response.
            if let Some(connection) = self.registry.get_mut(id) {
                let _ = connection.flush();
            }
        }
        let path = self.socket.path().to_path_buf();
        self.socket.close();
        let closed = self.registry.close_all();
        info!(path = %path.display(), closed, "Control socket closed");
    }

    fn close_connection(&mut self, id: ConnectionId) {
        self.events.unwatch(id);
        self.registry.remove_and_close(id);
    }
}
