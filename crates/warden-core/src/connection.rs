//! Per-connection framing, dispatch and buffering.
//!
//! A [`Connection`] is fed raw bytes by the host event loop. It parses every
//! complete request in its inbound buffer, dispatches it, and queues the
//! response in its outbound buffer, which is flushed to the [`Transport`]
//! without blocking. Partial frames simply stay buffered until the next
//! read event.

use std::io;

use tracing::trace;

use crate::buffer::ByteBuffer;
use crate::dispatch::{CommandContext, Dispatcher};
use crate::event::EventSource;
use crate::protocol::{self, Errno, FrameError, Greeting, HEADER_SIZE, Response};
use crate::registry::{Close, ConnectionId};

/// Non-blocking byte sink for one accepted socket.
pub trait Transport: Send {
    /// Hand bytes to the socket. Returns how many were accepted, or
    /// `WouldBlock` when none can be accepted right now.
    fn try_send(&mut self, bytes: &[u8]) -> io::Result<usize>;

    /// Release the socket handle.
    fn shutdown(&mut self);
}

/// Protocol state of a connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitingHeader,
    Closed,
}

/// Errors that end a connection.
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("malformed frame: {0}")]
    Frame(#[from] FrameError),

    #[error("write failed: {0}")]
    Write(#[source] io::Error),

    #[error("out of memory while buffering {0} bytes")]
    OutOfMemory(usize),

    #[error("connection is closed")]
    Closed,
}

/// One accepted control client.
pub struct Connection {
    id: ConnectionId,
    state: ConnectionState,
    inbound: ByteBuffer,
    outbound: ByteBuffer,
    transport: Box<dyn Transport>,
    max_frame: usize,
}

impl Connection {
    pub fn new(id: ConnectionId, transport: Box<dyn Transport>, max_frame: usize) -> Self {
        Self {
            id,
            state: ConnectionState::AwaitingHeader,
            inbound: ByteBuffer::new(),
            outbound: ByteBuffer::new(),
            transport,
            max_frame,
        }
    }

    pub fn id(&self) -> ConnectionId {
        self.id
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    /// Bytes received but not yet consumed by a complete frame.
    pub fn buffered_input(&self) -> usize {
        self.inbound.len()
    }

    pub fn has_pending_output(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Queue the protocol greeting and try to send it.
    pub fn send_greeting(&mut self) -> Result<(), ConnectionError> {
        self.queue(&Greeting::current().encode())?;
        self.flush()
    }

    /// Append received bytes and serve every complete request.
    ///
    /// Returns the number of requests answered.
    pub fn receive(
        &mut self,
        bytes: &[u8],
        dispatcher: &Dispatcher,
        events: &dyn EventSource,
    ) -> Result<usize, ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        self.inbound
            .append(bytes)
            .map_err(|_| ConnectionError::OutOfMemory(bytes.len()))?;

        let mut served = 0;
        while let Some(request) = protocol::next_request(self.inbound.as_slice(), self.max_frame)? {
            let frame_len = request.length as usize;
            let mut response = Response::for_request(&request);
            let ctx = CommandContext {
                connection: self.id,
                events,
            };
            let payload = &self.inbound.as_slice()[HEADER_SIZE..frame_len];
            let mut body = match dispatcher.dispatch(&request, payload, &ctx) {
                Ok(body) => body,
                Err(errno) => {
                    response.fail(errno);
                    Vec::new()
                }
            };

            // The codec owns framing: the whole declared frame goes,
            // whatever the command made of its payload.
            self.inbound.drain(frame_len);

            if self.outbound.try_reserve(HEADER_SIZE + body.len()).is_err() {
                response.fail(Errno::OUT_OF_MEMORY);
                body = Vec::new();
            }
            response.set_payload_len(body.len());
            self.queue(&response.encode())?;
            self.queue(&body)?;
            self.flush()?;

            trace!(
                connection = %self.id,
                code = %request.code,
                id = request.id,
                res_errno = response.res_errno,
                "control request served"
            );
            served += 1;
        }
        Ok(served)
    }

    /// Push buffered output to the transport until it is drained or the
    /// socket would block.
    pub fn flush(&mut self) -> Result<(), ConnectionError> {
        if self.state == ConnectionState::Closed {
            return Err(ConnectionError::Closed);
        }
        while !self.outbound.is_empty() {
            match self.transport.try_send(self.outbound.as_slice()) {
                Ok(0) => {
                    return Err(ConnectionError::Write(io::ErrorKind::WriteZero.into()));
                }
                Ok(n) => {
                    self.outbound.drain(n);
                }
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => break,
                Err(error) if error.kind() == io::ErrorKind::Interrupted => continue,
                Err(error) => return Err(ConnectionError::Write(error)),
            }
        }
        Ok(())
    }

    fn queue(&mut self, bytes: &[u8]) -> Result<(), ConnectionError> {
        self.outbound
            .append(bytes)
            .map_err(|_| ConnectionError::OutOfMemory(bytes.len()))
    }
}

impl Close for Connection {
    fn close(&mut self) {
        if self.state == ConnectionState::Closed {
            return;
        }
        self.state = ConnectionState::Closed;
        self.transport.shutdown();
        self.inbound.clear();
        self.outbound.clear();
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("inbound", &self.inbound.len())
            .field("outbound", &self.outbound.len())
            .finish()
    }
}
