//! Fixed-size headers of the video connection.
//!
//! ## Handshake (device → host, once, 68 bytes)
//! ```text
//! device_name:  [u8; 64]  UTF-8, NUL-padded
//! width:        u16
//! height:       u16
//! ```
//!
//! ## Video packet header (13 bytes, then `len` payload bytes)
//! ```text
//! flags:  u8    bit 0 = config, bit 1 = key frame
//! pts:    u64   presentation timestamp, µs
//! len:    u32   payload length
//! ```
//!
//! All integers are big-endian.

use std::time::Duration;

use tokio::io::{AsyncRead, AsyncReadExt};

use crate::error::{ConnectionError, StreamError};
use crate::flags::PacketFlags;

/// Length of the NUL-padded device name field.
pub const DEVICE_NAME_FIELD_LENGTH: usize = 64;

/// Upper bound on reading the handshake once both connections are up.
pub const HANDSHAKE_TIMEOUT: Duration = Duration::from_secs(10);

// ── FrameSize ────────────────────────────────────────────────────

/// Video dimensions in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct FrameSize {
    pub width: u32,
    pub height: u32,
}

impl FrameSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

// ── DeviceHeader ─────────────────────────────────────────────────

/// Device identity and natural screen size sent once on the video socket.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceHeader {
    pub device_name: String,
    pub frame_size: FrameSize,
}

impl DeviceHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = DEVICE_NAME_FIELD_LENGTH + 4;

    /// Serialize; names longer than the field are cut at a char boundary.
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        let mut end = self.device_name.len().min(DEVICE_NAME_FIELD_LENGTH - 1);
        while !self.device_name.is_char_boundary(end) {
            end -= 1;
        }
        buf[..end].copy_from_slice(&self.device_name.as_bytes()[..end]);
        let w = self.frame_size.width.min(u16::MAX as u32) as u16;
        let h = self.frame_size.height.min(u16::MAX as u32) as u16;
        buf[64..66].copy_from_slice(&w.to_be_bytes());
        buf[66..68].copy_from_slice(&h.to_be_bytes());
        buf
    }

    /// Deserialize from exactly [`Self::SIZE`] bytes.
    pub fn decode(data: &[u8; Self::SIZE]) -> Result<Self, ConnectionError> {
        let field = &data[..DEVICE_NAME_FIELD_LENGTH];
        let name_len = field.iter().position(|&b| b == 0).unwrap_or(field.len());
        let device_name = std::str::from_utf8(&field[..name_len])
            .map_err(|_| ConnectionError::Handshake("device name is not valid utf-8"))?
            .to_owned();

        let width = u16::from_be_bytes([data[64], data[65]]) as u32;
        let height = u16::from_be_bytes([data[66], data[67]]) as u32;
        if width == 0 || height == 0 {
            return Err(ConnectionError::Handshake("zero screen dimension"));
        }

        Ok(Self {
            device_name,
            frame_size: FrameSize::new(width, height),
        })
    }

    /// Read the handshake from the video connection within `timeout`.
    pub async fn read_from<R>(reader: &mut R, timeout: Duration) -> Result<Self, ConnectionError>
    where
        R: AsyncRead + Unpin,
    {
        let mut buf = [0u8; Self::SIZE];
        match tokio::time::timeout(timeout, reader.read_exact(&mut buf)).await {
            Err(_) => Err(ConnectionError::Timeout {
                stage: "handshake",
                after: timeout,
            }),
            Ok(Err(e)) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
                Err(ConnectionError::Handshake("connection closed before handshake"))
            }
            Ok(Err(e)) => Err(e.into()),
            Ok(Ok(_)) => Self::decode(&buf),
        }
    }
}

// ── PacketHeader ─────────────────────────────────────────────────

/// Metadata preceding each video packet payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub flags: PacketFlags,
    pub pts: u64,
    pub len: u32,
}

impl PacketHeader {
    /// Encoded size on the wire.
    pub const SIZE: usize = 13;

    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = self.flags.bits();
        buf[1..9].copy_from_slice(&self.pts.to_be_bytes());
        buf[9..13].copy_from_slice(&self.len.to_be_bytes());
        buf
    }

    pub fn decode(data: &[u8; Self::SIZE]) -> Result<Self, StreamError> {
        let flags = PacketFlags::from_bits(data[0]).ok_or(StreamError::InvalidFlags(data[0]))?;
        let mut pts = [0u8; 8];
        pts.copy_from_slice(&data[1..9]);
        let mut len = [0u8; 4];
        len.copy_from_slice(&data[9..13]);
        Ok(Self {
            flags,
            pts: u64::from_be_bytes(pts),
            len: u32::from_be_bytes(len),
        })
    }
}

// ── Tests ────────────────────────────────────────────────────────
