//! Control-channel message types and their binary layout.
//!
//! Every message starts with a one-byte tag followed by a fixed or
//! length-prefixed body. All integers are big-endian.
//!
//! ## Host → device ([`ControlMessage`])
//! ```text
//! 0  InjectKeycode      action u8, keycode u32, repeat u32, metastate u32
//! 1  InjectText         len u16, utf-8 [u8; len]
//! 2  InjectTouch        pointer_id u64, action u8, x u32, y u32, pressure u16
//! 3  InjectScroll       x u32, y u32, hscroll i32, vscroll i32
//! 4  BackOrScreenOn
//! 5  ExpandNotificationPanel
//! 6  CollapseNotificationPanel
//! 7  GetClipboard
//! 8  SetClipboard       sequence u64, paste u8, len u32, utf-8 [u8; len]
//! 9  SetScreenPowerMode mode u8
//! 10 RotateDevice
//! ```
//!
//! ## Device → host ([`DeviceEvent`])
//! ```text
//! 0  Clipboard          len u32, utf-8 [u8; len]
//! 1  AckClipboard       sequence u64
//! ```

use bytes::{Buf, BufMut, BytesMut};

use crate::error::ProtocolError;
use crate::fixed::{Position, UFixed16, UFixed32};
use crate::flags::MetaState;

/// Largest control message the device accepts, tag included.
pub const CONTROL_MSG_MAX_SIZE: usize = 1 << 18;
/// Longest text carried by a single `InjectText`.
pub const INJECT_TEXT_MAX_LENGTH: usize = 300;
/// Longest clipboard text the host may send.
pub const CLIPBOARD_TEXT_MAX_LENGTH: usize = CONTROL_MSG_MAX_SIZE - 14;
/// Largest device event, tag included.
pub const DEVICE_MSG_MAX_SIZE: usize = 1 << 18;
/// Longest clipboard text the device may send.
pub const DEVICE_CLIPBOARD_TEXT_MAX_LENGTH: usize = DEVICE_MSG_MAX_SIZE - 5;

const TYPE_INJECT_KEYCODE: u8 = 0;
const TYPE_INJECT_TEXT: u8 = 1;
const TYPE_INJECT_TOUCH: u8 = 2;
const TYPE_INJECT_SCROLL: u8 = 3;
const TYPE_BACK_OR_SCREEN_ON: u8 = 4;
const TYPE_EXPAND_NOTIFICATION_PANEL: u8 = 5;
const TYPE_COLLAPSE_NOTIFICATION_PANEL: u8 = 6;
const TYPE_GET_CLIPBOARD: u8 = 7;
const TYPE_SET_CLIPBOARD: u8 = 8;
const TYPE_SET_SCREEN_POWER_MODE: u8 = 9;
const TYPE_ROTATE_DEVICE: u8 = 10;

const TYPE_DEVICE_CLIPBOARD: u8 = 0;
const TYPE_DEVICE_ACK_CLIPBOARD: u8 = 1;

// ── Enumerations ─────────────────────────────────────────────────

/// Key press direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum KeyAction {
    Down = 0,
    Up = 1,
}

impl TryFrom<u8> for KeyAction {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(KeyAction::Down),
            1 => Ok(KeyAction::Up),
            v => Err(ProtocolError::UnknownVariant {
                type_name: "KeyAction",
                value: v as u64,
            }),
        }
    }
}

/// Touch pointer action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum TouchAction {
    Down = 0,
    Up = 1,
    Move = 2,
}

impl TryFrom<u8> for TouchAction {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(TouchAction::Down),
            1 => Ok(TouchAction::Up),
            2 => Ok(TouchAction::Move),
            v => Err(ProtocolError::UnknownVariant {
                type_name: "TouchAction",
                value: v as u64,
            }),
        }
    }
}

/// Physical screen power state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum ScreenPowerMode {
    Off = 0,
    Normal = 2,
}

impl TryFrom<u8> for ScreenPowerMode {
    type Error = ProtocolError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ScreenPowerMode::Off),
            2 => Ok(ScreenPowerMode::Normal),
            v => Err(ProtocolError::UnknownVariant {
                type_name: "ScreenPowerMode",
                value: v as u64,
            }),
        }
    }
}

// ── ControlMessage ───────────────────────────────────────────────

/// A user-intent event sent to the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ControlMessage {
    InjectKeycode {
        action: KeyAction,
        keycode: u32,
        repeat: u32,
        metastate: MetaState,
    },
    InjectText {
        text: String,
    },
    InjectTouch {
        pointer_id: u64,
        action: TouchAction,
        position: Position,
        pressure: UFixed16,
    },
    InjectScroll {
        position: Position,
        hscroll: i32,
        vscroll: i32,
    },
    BackOrScreenOn,
    ExpandNotificationPanel,
    CollapseNotificationPanel,
    GetClipboard,
    SetClipboard {
        sequence: u64,
        paste: bool,
        text: String,
    },
    SetScreenPowerMode {
        mode: ScreenPowerMode,
    },
    RotateDevice,
}

impl ControlMessage {
    /// The tag byte identifying this variant on the wire.
    pub fn tag(&self) -> u8 {
        match self {
            ControlMessage::InjectKeycode { .. } => TYPE_INJECT_KEYCODE,
            ControlMessage::InjectText { .. } => TYPE_INJECT_TEXT,
            ControlMessage::InjectTouch { .. } => TYPE_INJECT_TOUCH,
            ControlMessage::InjectScroll { .. } => TYPE_INJECT_SCROLL,
            ControlMessage::BackOrScreenOn => TYPE_BACK_OR_SCREEN_ON,
            ControlMessage::ExpandNotificationPanel => TYPE_EXPAND_NOTIFICATION_PANEL,
            ControlMessage::CollapseNotificationPanel => TYPE_COLLAPSE_NOTIFICATION_PANEL,
            ControlMessage::GetClipboard => TYPE_GET_CLIPBOARD,
            ControlMessage::SetClipboard { .. } => TYPE_SET_CLIPBOARD,
            ControlMessage::SetScreenPowerMode { .. } => TYPE_SET_SCREEN_POWER_MODE,
            ControlMessage::RotateDevice => TYPE_ROTATE_DEVICE,
        }
    }

    /// Append the wire form to `dst`. Nothing is written on error.
    pub fn serialize(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        match self {
            ControlMessage::InjectText { text } => {
                check_len(text, INJECT_TEXT_MAX_LENGTH)?;
            }
            ControlMessage::SetClipboard { text, .. } => {
                check_len(text, CLIPBOARD_TEXT_MAX_LENGTH)?;
            }
            _ => {}
        }

        dst.put_u8(self.tag());
        match self {
            ControlMessage::InjectKeycode {
                action,
                keycode,
                repeat,
                metastate,
            } => {
                dst.put_u8(*action as u8);
                dst.put_u32(*keycode);
                dst.put_u32(*repeat);
                dst.put_u32(metastate.bits());
            }
            ControlMessage::InjectText { text } => {
                dst.put_u16(text.len() as u16);
                dst.put_slice(text.as_bytes());
            }
            ControlMessage::InjectTouch {
                pointer_id,
                action,
                position,
                pressure,
            } => {
                dst.put_u64(*pointer_id);
                dst.put_u8(*action as u8);
                put_position(dst, position);
                dst.put_u16(pressure.to_bits());
            }
            ControlMessage::InjectScroll {
                position,
                hscroll,
                vscroll,
            } => {
                put_position(dst, position);
                dst.put_i32(*hscroll);
                dst.put_i32(*vscroll);
            }
            ControlMessage::SetClipboard {
                sequence,
                paste,
                text,
            } => {
                dst.put_u64(*sequence);
                dst.put_u8(*paste as u8);
                dst.put_u32(text.len() as u32);
                dst.put_slice(text.as_bytes());
            }
            ControlMessage::SetScreenPowerMode { mode } => {
                dst.put_u8(*mode as u8);
            }
            ControlMessage::BackOrScreenOn
            | ControlMessage::ExpandNotificationPanel
            | ControlMessage::CollapseNotificationPanel
            | ControlMessage::GetClipboard
            | ControlMessage::RotateDevice => {}
        }
        Ok(())
    }

    /// Parse one message from the front of `src`.
    ///
    /// Returns `Ok(None)` when `src` holds only part of a message, and
    /// the number of bytes consumed otherwise.
    pub fn parse(src: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        let Some((&tag, mut buf)) = src.split_first() else {
            return Ok(None);
        };

        let msg = match tag {
            TYPE_INJECT_KEYCODE => {
                if buf.remaining() < 13 {
                    return Ok(None);
                }
                let action = KeyAction::try_from(buf.get_u8())?;
                ControlMessage::InjectKeycode {
                    action,
                    keycode: buf.get_u32(),
                    repeat: buf.get_u32(),
                    metastate: MetaState::from_bits_retain(buf.get_u32()),
                }
            }
            TYPE_INJECT_TEXT => {
                if buf.remaining() < 2 {
                    return Ok(None);
                }
                let len = buf.get_u16() as usize;
                match take_text(&mut buf, len, INJECT_TEXT_MAX_LENGTH)? {
                    Some(text) => ControlMessage::InjectText { text },
                    None => return Ok(None),
                }
            }
            TYPE_INJECT_TOUCH => {
                if buf.remaining() < 19 {
                    return Ok(None);
                }
                let pointer_id = buf.get_u64();
                let action = TouchAction::try_from(buf.get_u8())?;
                ControlMessage::InjectTouch {
                    pointer_id,
                    action,
                    position: get_position(&mut buf),
                    pressure: UFixed16::from_bits(buf.get_u16()),
                }
            }
            TYPE_INJECT_SCROLL => {
                if buf.remaining() < 16 {
                    return Ok(None);
                }
                ControlMessage::InjectScroll {
                    position: get_position(&mut buf),
                    hscroll: buf.get_i32(),
                    vscroll: buf.get_i32(),
                }
            }
            TYPE_BACK_OR_SCREEN_ON => ControlMessage::BackOrScreenOn,
            TYPE_EXPAND_NOTIFICATION_PANEL => ControlMessage::ExpandNotificationPanel,
            TYPE_COLLAPSE_NOTIFICATION_PANEL => ControlMessage::CollapseNotificationPanel,
            TYPE_GET_CLIPBOARD => ControlMessage::GetClipboard,
            TYPE_SET_CLIPBOARD => {
                if buf.remaining() < 13 {
                    return Ok(None);
                }
                let sequence = buf.get_u64();
                let paste = buf.get_u8() != 0;
                let len = buf.get_u32() as usize;
                match take_text(&mut buf, len, CLIPBOARD_TEXT_MAX_LENGTH)? {
                    Some(text) => ControlMessage::SetClipboard {
                        sequence,
                        paste,
                        text,
                    },
                    None => return Ok(None),
                }
            }
            TYPE_SET_SCREEN_POWER_MODE => {
                if buf.remaining() < 1 {
                    return Ok(None);
                }
                ControlMessage::SetScreenPowerMode {
                    mode: ScreenPowerMode::try_from(buf.get_u8())?,
                }
            }
            TYPE_ROTATE_DEVICE => ControlMessage::RotateDevice,
            other => {
                return Err(ProtocolError::UnknownVariant {
                    type_name: "ControlMessage",
                    value: other as u64,
                });
            }
        };

        Ok(Some((msg, src.len() - buf.remaining())))
    }
}

// ── DeviceEvent ──────────────────────────────────────────────────

/// A message originating from the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceEvent {
    /// The device clipboard changed or was requested.
    Clipboard { text: String },
    /// The device applied the `SetClipboard` with this sequence number.
    AckClipboard { sequence: u64 },
}

impl DeviceEvent {
    pub fn tag(&self) -> u8 {
        match self {
            DeviceEvent::Clipboard { .. } => TYPE_DEVICE_CLIPBOARD,
            DeviceEvent::AckClipboard { .. } => TYPE_DEVICE_ACK_CLIPBOARD,
        }
    }

    /// Append the wire form to `dst`. Nothing is written on error.
    pub fn serialize(&self, dst: &mut BytesMut) -> Result<(), ProtocolError> {
        if let DeviceEvent::Clipboard { text } = self {
            check_len(text, DEVICE_CLIPBOARD_TEXT_MAX_LENGTH)?;
        }
        dst.put_u8(self.tag());
        match self {
            DeviceEvent::Clipboard { text } => {
                dst.put_u32(text.len() as u32);
                dst.put_slice(text.as_bytes());
            }
            DeviceEvent::AckClipboard { sequence } => dst.put_u64(*sequence),
        }
        Ok(())
    }

    /// Parse one event from the front of `src`; see [`ControlMessage::parse`].
    pub fn parse(src: &[u8]) -> Result<Option<(Self, usize)>, ProtocolError> {
        let Some((&tag, mut buf)) = src.split_first() else {
            return Ok(None);
        };

        let event = match tag {
            TYPE_DEVICE_CLIPBOARD => {
                if buf.remaining() < 4 {
                    return Ok(None);
                }
                let len = buf.get_u32() as usize;
                match take_text(&mut buf, len, DEVICE_CLIPBOARD_TEXT_MAX_LENGTH)? {
                    Some(text) => DeviceEvent::Clipboard { text },
                    None => return Ok(None),
                }
            }
            TYPE_DEVICE_ACK_CLIPBOARD => {
                if buf.remaining() < 8 {
                    return Ok(None);
                }
                DeviceEvent::AckClipboard {
                    sequence: buf.get_u64(),
                }
            }
            other => {
                return Err(ProtocolError::UnknownVariant {
                    type_name: "DeviceEvent",
                    value: other as u64,
                });
            }
        };

        Ok(Some((event, src.len() - buf.remaining())))
    }
}

// ── Helpers ──────────────────────────────────────────────────────

fn check_len(text: &str, max: usize) -> Result<(), ProtocolError> {
    if text.len() > max {
        return Err(ProtocolError::TextTooLong {
            len: text.len(),
            max,
        });
    }
    Ok(())
}

fn take_text(buf: &mut &[u8], len: usize, max: usize) -> Result<Option<String>, ProtocolError> {
    if len > max {
        return Err(ProtocolError::TextTooLong { len, max });
    }
    if buf.remaining() < len {
        return Ok(None);
    }
    let text = String::from_utf8(buf[..len].to_vec())?;
    buf.advance(len);
    Ok(Some(text))
}

fn put_position(dst: &mut BytesMut, position: &Position) {
    dst.put_u32(position.x.to_bits());
    dst.put_u32(position.y.to_bits());
}

fn get_position(buf: &mut &[u8]) -> Position {
    let x = UFixed32::from_bits(buf.get_u32());
    let y = UFixed32::from_bits(buf.get_u32());
    Position::new(x, y)
}

// ── Tests ────────────────────────────────────────────────────────
