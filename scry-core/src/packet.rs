use bytes::Bytes;

use crate::flags::PacketFlags;

/// One encoded, not-yet-decoded chunk of the video stream.
///
/// Immutable once built. The payload is reference-counted so the
/// decoder and the recorder can share it without copying.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    flags: PacketFlags,
    pts: u64,
    payload: Bytes,
}

impl Packet {
    pub fn new(flags: PacketFlags, pts: u64, payload: Bytes) -> Self {
        Self {
            flags,
            pts,
            payload,
        }
    }

    /// A codec configuration packet. Its timestamp is meaningless.
    pub fn config(payload: impl Into<Bytes>) -> Self {
        Self::new(PacketFlags::CONFIG, 0, payload.into())
    }

    /// A media packet presented at `pts` microseconds.
    pub fn media(pts: u64, key_frame: bool, payload: impl Into<Bytes>) -> Self {
        let flags = if key_frame {
            PacketFlags::KEY_FRAME
        } else {
            PacketFlags::empty()
        };
        Self::new(flags, pts, payload.into())
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn is_config(&self) -> bool {
        self.flags.contains(PacketFlags::CONFIG)
    }

    pub fn is_key_frame(&self) -> bool {
        self.flags.contains(PacketFlags::KEY_FRAME)
    }

    pub fn pts(&self) -> u64 {
        self.pts
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn len(&self) -> usize {
        self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }
}
