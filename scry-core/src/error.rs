//! Domain-specific error types for the mirroring pipeline.
//!
//! Each failure class has its own enum so callers can tell fatal
//! conditions from recoverable ones without string matching.
//! [`ScryError`] folds them together at the session boundary.

use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

// ── ConnectionError ──────────────────────────────────────────────

/// Failures while establishing a session. The session never starts.
#[derive(Debug, Error)]
pub enum ConnectionError {
    /// The bridge utility could not be executed at all.
    #[error("bridge utility unavailable: {0}")]
    BridgeUnavailable(String),

    /// The bridge utility ran but exited unsuccessfully.
    #[error("bridge command `{command}` failed (exit status {status:?})")]
    BridgeFailed {
        command: String,
        status: Option<i32>,
    },

    /// No connected device matched the selector.
    #[error("no device matches {}", .selector.as_deref().unwrap_or("(any)"))]
    NoDevice { selector: Option<String> },

    /// Several devices are connected and none was selected explicitly.
    #[error("{count} devices connected; select one by serial")]
    AmbiguousDevice { count: usize },

    /// The local server binary to push was not found.
    #[error("server binary not found: {}", .0.display())]
    ServerMissing(PathBuf),

    /// A connection stage did not complete in time.
    #[error("{stage} timed out after {after:?}")]
    Timeout { stage: &'static str, after: Duration },

    /// The handshake header was malformed.
    #[error("invalid handshake: {0}")]
    Handshake(&'static str),

    /// The TCP/IO layer reported an error.
    #[error("connection I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── StreamError ──────────────────────────────────────────────────

/// Malformed or oversized video stream data. Fatal for the session.
#[derive(Debug, Error)]
pub enum StreamError {
    /// The packet header announced a payload above the configured bound.
    #[error("payload too large: {size} bytes (max {max})")]
    PayloadTooLarge { size: usize, max: usize },

    /// The flag byte carried bits this protocol does not define.
    #[error("invalid packet flags: {0:#04x}")]
    InvalidFlags(u8),

    /// The stream ended in the middle of a packet.
    #[error("stream truncated: {pending} bytes of an incomplete packet")]
    Truncated { pending: usize },

    /// The socket reported an error.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── DecodeError ──────────────────────────────────────────────────

/// Decode engine failures.
///
/// Everything except [`DecodeError::Fatal`] is recoverable: the packet
/// is skipped and the session continues.
#[derive(Debug, Error)]
pub enum DecodeError {
    /// A media packet arrived before any configuration packet.
    #[error("media packet before configuration data")]
    MissingConfig,

    /// The engine rejected this packet.
    #[error("corrupt packet: {0}")]
    Corrupt(String),

    /// The engine can no longer make progress.
    #[error("decoder failed: {0}")]
    Fatal(String),
}

impl DecodeError {
    /// Whether the session must stop because of this error.
    pub fn is_fatal(&self) -> bool {
        matches!(self, DecodeError::Fatal(_))
    }
}

// ── ProtocolError ────────────────────────────────────────────────

/// Control-channel encoding and decoding errors.
#[derive(Debug, Error)]
pub enum ProtocolError {
    /// A numeric value did not map to any known enum variant.
    #[error("unknown {type_name} discriminant: {value:#x}")]
    UnknownVariant { type_name: &'static str, value: u64 },

    /// Text exceeds the field's maximum length.
    #[error("text too long: {len} bytes (max {max})")]
    TextTooLong { len: usize, max: usize },

    /// Text bytes were not valid UTF-8.
    #[error("invalid utf-8: {0}")]
    InvalidUtf8(#[from] std::string::FromUtf8Error),

    /// The socket reported an error.
    #[error("control I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── SendError ────────────────────────────────────────────────────

/// The control channel can no longer deliver messages. Session-fatal.
#[derive(Debug, Error)]
pub enum SendError {
    /// The writer task has stopped.
    #[error("control channel closed")]
    Closed,

    /// Control is disabled for this session.
    #[error("device control is disabled")]
    Disabled,
}

// ── RecordError ──────────────────────────────────────────────────

/// Recording failures. These stop the recorder, not the session.
#[derive(Debug, Error)]
pub enum RecordError {
    /// No container could be derived from the target path.
    #[error("cannot infer recording format from {}", .0.display())]
    UnknownFormat(PathBuf),

    /// An explicit format name was not recognised.
    #[error("unsupported recording format: {0}")]
    UnsupportedFormat(String),

    /// The configuration packet lacked required parameter sets.
    #[error("invalid codec configuration: {0}")]
    InvalidConfig(&'static str),

    /// Writing to the container file failed.
    #[error("recording I/O error: {0}")]
    Io(#[from] std::io::Error),
}

// ── ScryError ────────────────────────────────────────────────────

/// The canonical session-level error.
#[derive(Debug, Error)]
pub enum ScryError {
    #[error(transparent)]
    Connection(#[from] ConnectionError),

    #[error(transparent)]
    Stream(#[from] StreamError),

    #[error(transparent)]
    Decode(#[from] DecodeError),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error(transparent)]
    Send(#[from] SendError),

    #[error(transparent)]
    Record(#[from] RecordError),

    /// The display sink failed to present or reconfigure.
    #[error("display error: {0}")]
    Display(String),

    /// A pipeline task panicked or was aborted.
    #[error("task {name} failed: {reason}")]
    Task { name: &'static str, reason: String },

    /// The session ended for the given reason.
    #[error("session terminated: {0}")]
    Terminated(String),
}
