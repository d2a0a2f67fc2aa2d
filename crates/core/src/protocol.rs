//! The byte-level pipe protocol.
//!
//! Three pipe encodings meet here:
//!
//! - the registration FIFO carries pipe-delimited CONNECT records:
//!   `"1|<req_path>|<resp_path>|<notif_path>"`, no trailing newline
//!   required;
//! - a session's request pipe carries `"2"` (disconnect), `"3|<key>"`
//!   (subscribe) and `"4|<key>"` (unsubscribe);
//! - the server answers on the response pipe with fixed 2-byte frames
//!   `[op_code, status]`, and pushes notifications on the notification
//!   pipe as `"(key,value)"` followed by a single NUL, which is the
//!   client's framing delimiter.

use crate::limits::{MAX_PIPE_PATH_LENGTH, SERVER_RESPONSE_SIZE};
use thiserror::Error;

/// Operation codes shared by client and server.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpCode {
    /// Register a new session (registration pipe only)
    Connect = 1,
    /// End the session
    Disconnect = 2,
    /// Subscribe to change notifications for a key
    Subscribe = 3,
    /// Drop a subscription
    Unsubscribe = 4,
}

impl OpCode {
    /// Decode an opcode byte value.
    pub fn from_u8(value: u8) -> Option<OpCode> {
        match value {
            1 => Some(OpCode::Connect),
            2 => Some(OpCode::Disconnect),
            3 => Some(OpCode::Subscribe),
            4 => Some(OpCode::Unsubscribe),
            _ => None,
        }
    }
}

/// Status bytes carried in the second slot of a response frame.
pub mod status {
    /// Operation succeeded.
    pub const OK: u8 = 0;
    /// Operation failed: malformed request, unknown key, or cap reached.
    pub const ERROR: u8 = 1;
    /// Duplicate: session already connected, or already subscribed.
    pub const DUPLICATE: u8 = 3;
}

/// Build the fixed 2-byte response frame `[op_code, status]`.
pub fn response_frame(op_code: u8, status: u8) -> [u8; SERVER_RESPONSE_SIZE] {
    [op_code, status]
}

/// Build a notification frame: `"(key,value)"` plus a trailing NUL.
pub fn notification_frame(key: &str, value: &str) -> Vec<u8> {
    let mut frame = Vec::with_capacity(key.len() + value.len() + 4);
    frame.push(b'(');
    frame.extend_from_slice(key.as_bytes());
    frame.push(b',');
    frame.extend_from_slice(value.as_bytes());
    frame.push(b')');
    frame.push(0);
    frame
}

/// A parsed CONNECT record from the registration pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Path of the client's request pipe (server reads)
    pub req_pipe_path: String,
    /// Path of the client's response pipe (server writes)
    pub resp_pipe_path: String,
    /// Path of the client's notification pipe (server writes)
    pub notif_pipe_path: String,
}

impl ConnectRequest {
    /// Parse a registration record.
    ///
    /// Records with an opcode other than CONNECT parse to
    /// `ProtocolError::NotConnect` so the listener can ignore them.
    pub fn parse(raw: &[u8]) -> Result<ConnectRequest, ProtocolError> {
        let text = record_text(raw)?;
        let mut fields = text.split('|');

        let op_field = fields.next().unwrap_or("");
        let op = op_field
            .parse::<u8>()
            .map_err(|_| ProtocolError::BadOpCode(op_field.to_string()))?;
        if OpCode::from_u8(op) != Some(OpCode::Connect) {
            return Err(ProtocolError::NotConnect(op));
        }

        let req = pipe_path(fields.next(), "request")?;
        let resp = pipe_path(fields.next(), "response")?;
        let notif = pipe_path(fields.next(), "notification")?;

        Ok(ConnectRequest {
            req_pipe_path: req,
            resp_pipe_path: resp,
            notif_pipe_path: notif,
        })
    }

    /// Encode this record as the client would write it.
    pub fn encode(&self) -> Vec<u8> {
        format!(
            "{}|{}|{}|{}",
            OpCode::Connect as u8,
            self.req_pipe_path,
            self.resp_pipe_path,
            self.notif_pipe_path
        )
        .into_bytes()
    }
}

/// A parsed request from a session's request pipe.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionRequest {
    /// `"2"`
    Disconnect,
    /// `"3|<key>"`
    Subscribe(String),
    /// `"4|<key>"`
    Unsubscribe(String),
}

impl SessionRequest {
    /// Parse one request-pipe record.
    pub fn parse(raw: &[u8]) -> Result<SessionRequest, ProtocolError> {
        let text = record_text(raw)?;
        let mut fields = text.split('|');

        let op_field = fields.next().unwrap_or("");
        let op = op_field.parse::<u8>().unwrap_or(0);

        match OpCode::from_u8(op) {
            Some(OpCode::Disconnect) => Ok(SessionRequest::Disconnect),
            Some(OpCode::Subscribe) => Ok(SessionRequest::Subscribe(request_key(fields.next(), op)?)),
            Some(OpCode::Unsubscribe) => {
                Ok(SessionRequest::Unsubscribe(request_key(fields.next(), op)?))
            }
            // CONNECT is only meaningful on the registration pipe.
            Some(OpCode::Connect) | None => Err(ProtocolError::UnknownOpCode(op)),
        }
    }
}

fn record_text(raw: &[u8]) -> Result<&str, ProtocolError> {
    let trimmed = match raw.iter().position(|&b| b == 0) {
        Some(end) => &raw[..end],
        None => raw,
    };
    let text = std::str::from_utf8(trimmed).map_err(|_| ProtocolError::NotUtf8)?;
    let text = text.trim_end_matches('\n');
    if text.is_empty() {
        return Err(ProtocolError::EmptyRecord);
    }
    Ok(text)
}

fn pipe_path(field: Option<&str>, which: &'static str) -> Result<String, ProtocolError> {
    let path = field.ok_or(ProtocolError::MissingField(which))?;
    if path.is_empty() {
        return Err(ProtocolError::MissingField(which));
    }
    if path.len() > MAX_PIPE_PATH_LENGTH {
        return Err(ProtocolError::PathTooLong {
            which,
            actual: path.len(),
        });
    }
    Ok(path.to_string())
}

fn request_key(field: Option<&str>, op: u8) -> Result<String, ProtocolError> {
    match field {
        Some(key) if !key.is_empty() => Ok(key.to_string()),
        _ => Err(ProtocolError::MissingKey(op)),
    }
}

/// Wire decoding errors.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProtocolError {
    /// The record was empty after trimming
    #[error("empty record")]
    EmptyRecord,

    /// The record was not valid UTF-8
    #[error("record is not valid UTF-8")]
    NotUtf8,

    /// Leading field did not parse as an opcode
    #[error("bad opcode field: {0:?}")]
    BadOpCode(String),

    /// A well-formed record whose opcode is not CONNECT
    #[error("record opcode {0} is not CONNECT")]
    NotConnect(u8),

    /// Opcode not recognized on a session request pipe
    #[error("unknown operation code: {0}")]
    UnknownOpCode(u8),

    /// Subscribe/unsubscribe without a key field
    #[error("missing key for opcode {0}")]
    MissingKey(u8),

    /// A CONNECT record was missing a pipe path
    #[error("missing {0} pipe path")]
    MissingField(&'static str),

    /// A pipe path exceeded the record limit
    #[error("{which} pipe path too long: {actual} bytes")]
    PathTooLong {
        /// Which of the three paths overflowed
        which: &'static str,
        /// Length seen on the wire
        actual: usize,
    },
}

impl ProtocolError {
    /// The opcode to echo in an error response frame, where one applies.
    pub fn response_opcode(&self) -> Option<u8> {
        match self {
            ProtocolError::UnknownOpCode(op) | ProtocolError::MissingKey(op) => Some(*op),
            _ => None,
        }
    }
}
