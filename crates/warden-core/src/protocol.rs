//! Control protocol codec: greeting, request and response frames.
//!
//! Every frame starts with a fixed 16-byte header. All integers are
//! little-endian.
//!
//! ```text
//! request:  | type u32 | id u32 | reserved i32  | length u32 | payload ... |
//! response: | type u32 | id u32 | res_errno i32 | length u32 | payload ... |
//! greeting: | version u32 | reserved u32 |
//! ```
//!
//! `length` counts the whole frame, header included.

use std::fmt;

/// Protocol revision announced in the greeting.
pub const PROTOCOL_VERSION: u32 = 1;

/// Size of a request or response header on the wire.
pub const HEADER_SIZE: usize = 16;

/// Size of the greeting on the wire.
pub const GREETING_SIZE: usize = 8;

/// Errors produced while decoding frames.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum FrameError {
    #[error("frame declares length {length}, shorter than the {HEADER_SIZE}-byte header")]
    InvalidFrame { length: u32 },

    #[error("frame declares length {length}, above the {limit}-byte limit")]
    Oversized { length: u32, limit: usize },

    #[error("expected {expected} bytes, got {actual}")]
    Truncated { expected: usize, actual: usize },
}

/// Command code carried in the `type` field of a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CommandCode(pub u32);

impl CommandCode {
    /// Ask the process to begin an orderly shutdown.
    pub const STOP: Self = Self(0);
}

impl fmt::Display for CommandCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::STOP => f.write_str("stop"),
            Self(code) => write!(f, "{code}"),
        }
    }
}

/// OS-style error code carried in `res_errno`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Errno(pub i32);

impl Errno {
    pub const OUT_OF_MEMORY: Self = Self(12);
    pub const INVALID_ARGUMENT: Self = Self(22);
}

impl fmt::Display for Errno {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::OUT_OF_MEMORY => f.write_str("out of memory (12)"),
            Self::INVALID_ARGUMENT => f.write_str("invalid argument (22)"),
            Self(code) => write!(f, "errno {code}"),
        }
    }
}

/// Message sent to every client right after accept.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Greeting {
    pub version: u32,
}

impl Greeting {
    pub fn current() -> Self {
        Self {
            version: PROTOCOL_VERSION,
        }
    }

    pub fn encode(&self) -> [u8; GREETING_SIZE] {
        let mut out = [0u8; GREETING_SIZE];
        out[..4].copy_from_slice(&self.version.to_le_bytes());
        out
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        if bytes.len() < GREETING_SIZE {
            return Err(FrameError::Truncated {
                expected: GREETING_SIZE,
                actual: bytes.len(),
            });
        }
        Ok(Self {
            version: read_u32(bytes, 0),
        })
    }
}

/// Decoded request header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Request {
    pub code: CommandCode,
    pub id: u32,
    pub length: u32,
}

impl Request {
    /// A request with no payload.
    pub fn new(code: CommandCode, id: u32) -> Self {
        Self {
            code,
            id,
            length: HEADER_SIZE as u32,
        }
    }

    /// Number of payload bytes following the header.
    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_SIZE)
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        encode_header(self.code, self.id, 0, self.length)
    }

    /// Decode the header at the start of `bytes` without checking `length`.
    pub fn decode_header(bytes: &[u8]) -> Result<Self, FrameError> {
        check_header_len(bytes)?;
        Ok(Self {
            code: CommandCode(read_u32(bytes, 0)),
            id: read_u32(bytes, 4),
            length: read_u32(bytes, 12),
        })
    }
}

/// Response header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Response {
    pub code: CommandCode,
    pub id: u32,
    pub res_errno: i32,
    pub length: u32,
}

impl Response {
    /// Successful, payload-free response mirroring the request's type and id.
    pub fn for_request(request: &Request) -> Self {
        Self {
            code: request.code,
            id: request.id,
            res_errno: 0,
            length: HEADER_SIZE as u32,
        }
    }

    pub fn fail(&mut self, errno: Errno) {
        self.res_errno = errno.0;
    }

    pub fn set_payload_len(&mut self, payload_len: usize) {
        self.length = (HEADER_SIZE + payload_len) as u32;
    }

    pub fn is_success(&self) -> bool {
        self.res_errno == 0
    }

    pub fn payload_len(&self) -> usize {
        (self.length as usize).saturating_sub(HEADER_SIZE)
    }

    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        encode_header(self.code, self.id, self.res_errno, self.length)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self, FrameError> {
        check_header_len(bytes)?;
        let response = Self {
            code: CommandCode(read_u32(bytes, 0)),
            id: read_u32(bytes, 4),
            res_errno: read_u32(bytes, 8) as i32,
            length: read_u32(bytes, 12),
        };
        if (response.length as usize) < HEADER_SIZE {
            return Err(FrameError::InvalidFrame {
                length: response.length,
            });
        }
        Ok(response)
    }
}

/// Look for a complete request at the front of `buffered`.
///
/// Returns `Ok(None)` while more bytes are needed: either the header itself
/// is incomplete or the header declares a frame longer than what is
/// buffered. A frame declaring fewer bytes than a header, or more than
/// `max_frame`, is an error.
pub fn next_request(buffered: &[u8], max_frame: usize) -> Result<Option<Request>, FrameError> {
    if buffered.len() < HEADER_SIZE {
        return Ok(None);
    }
    let request = Request::decode_header(buffered)?;
    let length = request.length as usize;
    if length > max_frame {
        return Err(FrameError::Oversized {
            length: request.length,
            limit: max_frame,
        });
    }
    if buffered.len() < length {
        return Ok(None);
    }
    if length < HEADER_SIZE {
        return Err(FrameError::InvalidFrame {
            length: request.length,
        });
    }
    Ok(Some(request))
}

fn encode_header(code: CommandCode, id: u32, errno: i32, length: u32) -> [u8; HEADER_SIZE] {
    let mut out = [0u8; HEADER_SIZE];
    out[0..4].copy_from_slice(&code.0.to_le_bytes());
    out[4..8].copy_from_slice(&id.to_le_bytes());
    out[8..12].copy_from_slice(&errno.to_le_bytes());
    out[12..16].copy_from_slice(&length.to_le_bytes());
    out
}

fn check_header_len(bytes: &[u8]) -> Result<(), FrameError> {
    if bytes.len() < HEADER_SIZE {
        return Err(FrameError::Truncated {
            expected: HEADER_SIZE,
            actual: bytes.len(),
        });
    }
    Ok(())
}

fn read_u32(bytes: &[u8], offset: usize) -> u32 {
    let mut word = [0u8; 4];
    word.copy_from_slice(&bytes[offset..offset + 4]);
    u32::from_le_bytes(word)
}
