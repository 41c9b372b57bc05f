//! `tokio_util` codecs for the two device connections.
//!
//! [`VideoCodec`] frames the video socket into [`Packet`]s.
//! [`ControlCodec`] is the host end of the control socket and
//! [`DeviceCodec`] is its mirror image, used where something has to
//! play the device (loopback tests, tooling).

use bytes::{Buf, BytesMut};
use tokio_util::codec::{Decoder, Encoder};

use crate::error::{ProtocolError, StreamError};
use crate::header::PacketHeader;
use crate::message::{ControlMessage, DeviceEvent};
use crate::packet::Packet;

/// Default upper bound on a single video payload.
pub const DEFAULT_MAX_PAYLOAD: usize = 16 * 1024 * 1024;

// ── VideoCodec ───────────────────────────────────────────────────

/// Splits the byte stream after the handshake into packets.
///
/// The header is parsed as soon as its 13 bytes are buffered, so an
/// oversized length is rejected before any of the payload arrives.
#[derive(Debug)]
pub struct VideoCodec {
    max_payload: usize,
    pending: Option<PacketHeader>,
}

impl VideoCodec {
    pub fn new(max_payload: usize) -> Self {
        Self {
            max_payload,
            pending: None,
        }
    }

    pub fn max_payload(&self) -> usize {
        self.max_payload
    }
}

impl Default for VideoCodec {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PAYLOAD)
    }
}

impl Decoder for VideoCodec {
    type Item = Packet;
    type Error = StreamError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, StreamError> {
        let header = match self.pending {
            Some(header) => header,
            None => {
                if src.len() < PacketHeader::SIZE {
                    return Ok(None);
                }
                let mut raw = [0u8; PacketHeader::SIZE];
                raw.copy_from_slice(&src[..PacketHeader::SIZE]);
                let header = PacketHeader::decode(&raw)?;
                let size = header.len as usize;
                if size > self.max_payload {
                    return Err(StreamError::PayloadTooLarge {
                        size,
                        max: self.max_payload,
                    });
                }
                src.advance(PacketHeader::SIZE);
                self.pending = Some(header);
                header
            }
        };

        let len = header.len as usize;
        if src.len() < len {
            src.reserve(len - src.len());
            return Ok(None);
        }

        self.pending = None;
        let payload = src.split_to(len).freeze();
        Ok(Some(Packet::new(header.flags, header.pts, payload)))
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<Packet>, StreamError> {
        if let Some(packet) = self.decode(src)? {
            return Ok(Some(packet));
        }
        let pending = src.len() + self.pending.map_or(0, |_| PacketHeader::SIZE);
        if pending == 0 {
            Ok(None)
        } else {
            Err(StreamError::Truncated { pending })
        }
    }
}

impl Encoder<Packet> for VideoCodec {
    type Error = StreamError;

    fn encode(&mut self, item: Packet, dst: &mut BytesMut) -> Result<(), StreamError> {
        if item.len() > self.max_payload {
            return Err(StreamError::PayloadTooLarge {
                size: item.len(),
                max: self.max_payload,
            });
        }
        let header = PacketHeader {
            flags: item.flags(),
            pts: item.pts(),
            len: item.len() as u32,
        };
        dst.reserve(PacketHeader::SIZE + item.len());
        dst.extend_from_slice(&header.encode());
        dst.extend_from_slice(item.payload());
        Ok(())
    }
}

// ── ControlCodec ─────────────────────────────────────────────────

/// Host side of the control socket: writes control messages, reads
/// device events.
#[derive(Debug, Default, Clone, Copy)]
pub struct ControlCodec;

impl Encoder<ControlMessage> for ControlCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: ControlMessage, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        item.serialize(dst)
    }
}

impl Decoder for ControlCodec {
    type Item = DeviceEvent;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<DeviceEvent>, ProtocolError> {
        match DeviceEvent::parse(src)? {
            Some((event, used)) => {
                src.advance(used);
                Ok(Some(event))
            }
            None => Ok(None),
        }
    }
}

// ── DeviceCodec ──────────────────────────────────────────────────

/// Device side of the control socket.
#[derive(Debug, Default, Clone, Copy)]
pub struct DeviceCodec;

impl Encoder<DeviceEvent> for DeviceCodec {
    type Error = ProtocolError;

    fn encode(&mut self, item: DeviceEvent, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        item.serialize(dst)
    }
}

impl Decoder for DeviceCodec {
    type Item = ControlMessage;
    type Error = ProtocolError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<ControlMessage>, ProtocolError> {
        match ControlMessage::parse(src)? {
            Some((msg, used)) => {
                src.advance(used);
                Ok(Some(msg))
            }
            None => Ok(None),
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────
