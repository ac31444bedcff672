//! Control client: connects to a running daemon over its Unix socket.
//!
//! Used by the CLI `stop` subcommand and by integration tests. A client
//! reads the greeting on connect, then sends one request at a time and
//! waits for the matching response.

use std::io;
use std::path::{Path, PathBuf};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tracing::debug;

use crate::protocol::{
    CommandCode, Errno, FrameError, GREETING_SIZE, Greeting, HEADER_SIZE, PROTOCOL_VERSION,
    Request, Response,
};

/// Errors from the control client.
#[derive(Debug, thiserror::Error)]
pub enum ControlClientError {
    #[error("daemon is not running (socket not found at {0})")]
    NotRunning(PathBuf),

    #[error("failed to connect to control socket at {path}: {source}")]
    Connect {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    #[error("bad frame from daemon: {0}")]
    Frame(#[from] FrameError),

    #[error("protocol version mismatch: expected {expected}, daemon speaks {actual}")]
    VersionMismatch { expected: u32, actual: u32 },

    #[error("response id {actual} does not match request id {expected}")]
    IdMismatch { expected: u32, actual: u32 },

    #[error("daemon rejected command {code}: {errno}")]
    Rejected { code: CommandCode, errno: Errno },

    #[error("payload of {0} bytes does not fit in a request frame")]
    PayloadTooLarge(usize),
}

/// A decoded response and its payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub response: Response,
    pub payload: Vec<u8>,
}

/// Connected control client.
#[derive(Debug)]
pub struct ControlClient {
    stream: UnixStream,
    version: u32,
    next_id: u32,
}

impl ControlClient {
    /// Connect and read the greeting.
    pub async fn connect(path: &Path) -> Result<Self, ControlClientError> {
        let mut stream = UnixStream::connect(path).await.map_err(|source| {
            if source.kind() == io::ErrorKind::NotFound {
                ControlClientError::NotRunning(path.to_path_buf())
            } else {
                ControlClientError::Connect {
                    path: path.to_path_buf(),
                    source,
                }
            }
        })?;

        let mut greeting = [0u8; GREETING_SIZE];
        stream.read_exact(&mut greeting).await?;
        let greeting = Greeting::decode(&greeting)?;
        if greeting.version != PROTOCOL_VERSION {
            return Err(ControlClientError::VersionMismatch {
                expected: PROTOCOL_VERSION,
                actual: greeting.version,
            });
        }
        debug!(path = %path.display(), version = greeting.version, "connected to control socket");

        Ok(Self {
            stream,
            version: greeting.version,
            next_id: 1,
        })
    }

    /// Protocol version announced by the daemon.
    pub fn protocol_version(&self) -> u32 {
        self.version
    }

    /// Send one request and wait for its response.
    ///
    /// A non-zero `res_errno` is returned in the [`Reply`], not as an error.
    pub async fn request(
        &mut self,
        code: CommandCode,
        payload: &[u8],
    ) -> Result<Reply, ControlClientError> {
        let length = frame_length(payload.len())?;
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);

        let request = Request { code, id, length };
        let mut frame = Vec::with_capacity(HEADER_SIZE + payload.len());
        frame.extend_from_slice(&request.encode());
        frame.extend_from_slice(payload);
        self.stream.write_all(&frame).await?;

        let reply = self.read_reply().await?;
        if reply.response.id != id {
            return Err(ControlClientError::IdMismatch {
                expected: id,
                actual: reply.response.id,
            });
        }
        Ok(reply)
    }

    /// Read the next response frame, whatever request it answers.
    pub async fn read_reply(&mut self) -> Result<Reply, ControlClientError> {
        let mut header = [0u8; HEADER_SIZE];
        self.stream.read_exact(&mut header).await?;
        let response = Response::decode(&header)?;
        let mut payload = vec![0u8; response.payload_len()];
        self.stream.read_exact(&mut payload).await?;
        Ok(Reply { response, payload })
    }

    /// Ask the daemon to shut down.
    pub async fn stop(&mut self) -> Result<(), ControlClientError> {
        let reply = self.request(CommandCode::STOP, &[]).await?;
        if !reply.response.is_success() {
            return Err(ControlClientError::Rejected {
                code: CommandCode::STOP,
                errno: Errno(reply.response.res_errno),
            });
        }
        Ok(())
    }

    /// Send raw bytes, bypassing request framing.
    pub async fn send_raw(&mut self, bytes: &[u8]) -> Result<(), ControlClientError> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    /// Read until the daemon closes the connection, returning what arrived.
    pub async fn read_to_close(&mut self) -> Result<Vec<u8>, ControlClientError> {
        let mut rest = Vec::new();
        self.stream.read_to_end(&mut rest).await?;
        Ok(rest)
    }
}

/// Total frame length for a payload, header included.
fn frame_length(payload_len: usize) -> Result<u32, ControlClientError> {
    HEADER_SIZE
        .checked_add(payload_len)
        .and_then(|total| u32::try_from(total).ok())
        .ok_or(ControlClientError::PayloadTooLarge(payload_len))
}
