//! Sink input → control messages.
//!
//! With `prefer_text` set, printable characters travel as text
//! injection: letter and space keys are left to the text path and
//! consecutive text is batched into as few `InjectText` messages as
//! possible. Without it those keys travel as keycodes and only other
//! characters go through text injection.

use tracing::{debug, warn};

use crate::fixed::{Position, UFixed16};
use crate::flags::MetaState;
use crate::header::FrameSize;
use crate::message::{
    CLIPBOARD_TEXT_MAX_LENGTH, ControlMessage, INJECT_TEXT_MAX_LENGTH, KeyAction,
    ScreenPowerMode, TouchAction,
};

use super::sink::{DeviceCommand, InputEvent, WindowGeometry};

pub const KEYCODE_HOME: u32 = 3;
pub const KEYCODE_BACK: u32 = 4;
pub const KEYCODE_VOLUME_UP: u32 = 24;
pub const KEYCODE_VOLUME_DOWN: u32 = 25;
pub const KEYCODE_POWER: u32 = 26;
pub const KEYCODE_A: u32 = 29;
pub const KEYCODE_Z: u32 = 54;
pub const KEYCODE_SPACE: u32 = 62;
pub const KEYCODE_MENU: u32 = 82;
pub const KEYCODE_APP_SWITCH: u32 = 187;

/// Keys whose effect the text path can reproduce.
fn is_text_key(keycode: u32) -> bool {
    (KEYCODE_A..=KEYCODE_Z).contains(&keycode) || keycode == KEYCODE_SPACE
}

fn is_text_char(text: &str) -> bool {
    let mut chars = text.chars();
    matches!((chars.next(), chars.next()), (Some(c), None) if c.is_ascii_alphabetic() || c == ' ')
}

#[derive(Debug, Default)]
pub struct InputTranslator {
    prefer_text: bool,
    pending: String,
    clipboard_sequence: u64,
}

impl InputTranslator {
    pub fn new(prefer_text: bool) -> Self {
        Self {
            prefer_text,
            ..Default::default()
        }
    }

    /// Append the messages for `event` to `out`.
    ///
    /// Window, file and lifecycle events produce nothing here.
    pub fn translate(
        &mut self,
        event: &InputEvent,
        geometry: &WindowGeometry,
        frame: FrameSize,
        out: &mut Vec<ControlMessage>,
    ) {
        match event {
            InputEvent::Key {
                action,
                keycode,
                repeat,
                metastate,
            } => {
                if self.prefer_text && is_text_key(*keycode) && !metastate.has_command_modifier() {
                    return;
                }
                self.flush(out);
                out.push(ControlMessage::InjectKeycode {
                    action: *action,
                    keycode: *keycode,
                    repeat: *repeat,
                    metastate: *metastate,
                });
            }
            InputEvent::Text(text) => {
                if self.prefer_text {
                    self.pending.push_str(text);
                } else if !is_text_char(text) {
                    push_text(text, out);
                }
            }
            InputEvent::Pointer {
                pointer_id,
                action,
                x,
                y,
                pressure,
            } => {
                let position = match geometry.to_device(frame, *x, *y) {
                    Some(p) => p,
                    // A release must reach the device even off-screen.
                    None if *action == TouchAction::Up => clamp_to_content(geometry, frame, *x, *y),
                    None => return,
                };
                self.flush(out);
                out.push(ControlMessage::InjectTouch {
                    pointer_id: *pointer_id,
                    action: *action,
                    position,
                    pressure: UFixed16::from_f32(*pressure),
                });
            }
            InputEvent::Scroll {
                x,
                y,
                hscroll,
                vscroll,
            } => {
                let Some(position) = geometry.to_device(frame, *x, *y) else {
                    return;
                };
                self.flush(out);
                out.push(ControlMessage::InjectScroll {
                    position,
                    hscroll: *hscroll,
                    vscroll: *vscroll,
                });
            }
            InputEvent::Command(command) => {
                self.flush(out);
                self.command(command, out);
            }
            InputEvent::Window(_)
            | InputEvent::FileDropped(_)
            | InputEvent::ToggleFps
            | InputEvent::Close => {}
        }
    }

    /// Emit any batched text.
    pub fn flush(&mut self, out: &mut Vec<ControlMessage>) {
        if !self.pending.is_empty() {
            push_text(&self.pending, out);
            self.pending.clear();
        }
    }

    fn command(&mut self, command: &DeviceCommand, out: &mut Vec<ControlMessage>) {
        let keycode = match command {
            DeviceCommand::Home => KEYCODE_HOME,
            DeviceCommand::AppSwitch => KEYCODE_APP_SWITCH,
            DeviceCommand::Menu => KEYCODE_MENU,
            DeviceCommand::VolumeUp => KEYCODE_VOLUME_UP,
            DeviceCommand::VolumeDown => KEYCODE_VOLUME_DOWN,
            DeviceCommand::Power => KEYCODE_POWER,
            DeviceCommand::Back => {
                out.push(ControlMessage::BackOrScreenOn);
                return;
            }
            DeviceCommand::ExpandNotificationPanel => {
                out.push(ControlMessage::ExpandNotificationPanel);
                return;
            }
            DeviceCommand::CollapseNotificationPanel => {
                out.push(ControlMessage::CollapseNotificationPanel);
                return;
            }
            DeviceCommand::RotateDevice => {
                out.push(ControlMessage::RotateDevice);
                return;
            }
            DeviceCommand::ScreenOff | DeviceCommand::ScreenOn => {
                let mode = if *command == DeviceCommand::ScreenOff {
                    ScreenPowerMode::Off
                } else {
                    ScreenPowerMode::Normal
                };
                out.push(ControlMessage::SetScreenPowerMode { mode });
                return;
            }
            DeviceCommand::GetClipboard => {
                out.push(ControlMessage::GetClipboard);
                return;
            }
            DeviceCommand::SetClipboard { text, paste } => {
                self.clipboard_sequence += 1;
                let clipped = truncate(text, CLIPBOARD_TEXT_MAX_LENGTH);
                if clipped.len() < text.len() {
                    warn!(len = text.len(), "host clipboard truncated");
                }
                out.push(ControlMessage::SetClipboard {
                    sequence: self.clipboard_sequence,
                    paste: *paste,
                    text: clipped.to_owned(),
                });
                return;
            }
        };
        for action in [KeyAction::Down, KeyAction::Up] {
            out.push(ControlMessage::InjectKeycode {
                action,
                keycode,
                repeat: 0,
                metastate: MetaState::empty(),
            });
        }
    }
}

/// Split `text` into `InjectText` messages within the size limit.
fn push_text(mut text: &str, out: &mut Vec<ControlMessage>) {
    while !text.is_empty() {
        let head = truncate(text, INJECT_TEXT_MAX_LENGTH);
        if head.is_empty() {
            debug!("dropping unsplittable text");
            return;
        }
        out.push(ControlMessage::InjectText {
            text: head.to_owned(),
        });
        text = &text[head.len()..];
    }
}

/// Longest prefix of `text` within `max` bytes, ending on a char boundary.
fn truncate(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

fn clamp_to_content(geometry: &WindowGeometry, frame: FrameSize, x: i32, y: i32) -> Position {
    let rect = geometry.content_rect(frame);
    let max_x = rect.width.saturating_sub(1) as i32;
    let max_y = rect.height.saturating_sub(1) as i32;
    let cx = (x - rect.x).clamp(0, max_x);
    let cy = (y - rect.y).clamp(0, max_y);
    Position::from_pixels(cx, cy, rect.width, rect.height).unwrap_or_default()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::UFixed32;

    const FRAME: FrameSize = FrameSize::new(100, 200);

    fn geometry() -> WindowGeometry {
        WindowGeometry::new("t", FRAME, 0, 0)
    }

    fn key(keycode: u32, metastate: MetaState) -> InputEvent {
        InputEvent::Key {
            action: KeyAction::Down,
            keycode,
            repeat: 0,
            metastate,
        }
    }

    fn run(t: &mut InputTranslator, events: &[InputEvent]) -> Vec<ControlMessage> {
        let g = geometry();
        let mut out = Vec::new();
        for e in events {
            t.translate(e, &g, FRAME, &mut out);
        }
        t.flush(&mut out);
        out
    }

    #[test]
    fn prefer_text_batches_characters() {
        let mut t = InputTranslator::new(true);
        let out = run(
            &mut t,
            &[
                key(KEYCODE_A + 7, MetaState::empty()),
                InputEvent::Text("h".into()),
                key(KEYCODE_A + 8, MetaState::empty()),
                InputEvent::Text("i".into()),
                InputEvent::Text("!".into()),
            ],
        );
        assert_eq!(out, vec![ControlMessage::InjectText { text: "hi!".into() }]);
    }

    #[test]
    fn shortcuts_stay_keys_with_prefer_text() {
        let mut t = InputTranslator::new(true);
        let out = run(
            &mut t,
            &[
                InputEvent::Text("a".into()),
                key(KEYCODE_A + 2, MetaState::CTRL_ON | MetaState::CTRL_LEFT_ON),
            ],
        );
        assert_eq!(out.len(), 2);
        assert_eq!(out[0], ControlMessage::InjectText { text: "a".into() });
        assert!(matches!(out[1], ControlMessage::InjectKeycode { keycode: 31, .. }));
    }

    #[test]
    fn without_prefer_text_letters_are_keys() {
        let mut t = InputTranslator::new(false);
        let out = run(
            &mut t,
            &[
                key(KEYCODE_A, MetaState::empty()),
                InputEvent::Text("a".into()),
                InputEvent::Text("é".into()),
            ],
        );
        assert!(matches!(out[0], ControlMessage::InjectKeycode { keycode: KEYCODE_A, .. }));
        assert_eq!(out[1], ControlMessage::InjectText { text: "é".into() });
        assert_eq!(out.len(), 2);
    }

    #[test]
    fn long_text_is_split() {
        let mut t = InputTranslator::new(true);
        let out = run(&mut t, &[InputEvent::Text("ü".repeat(200))]);
        assert_eq!(out.len(), 2);
        for m in &out {
            let ControlMessage::InjectText { text } = m else {
                panic!("expected text, got {m:?}");
            };
            assert!(text.len() <= INJECT_TEXT_MAX_LENGTH);
        }
    }

    #[test]
    fn pointer_maps_through_geometry() {
        let mut t = InputTranslator::new(false);
        let out = run(
            &mut t,
            &[
                InputEvent::Pointer {
                    pointer_id: 1,
                    action: TouchAction::Down,
                    x: 99,
                    y: 0,
                    pressure: 1.0,
                },
                InputEvent::Pointer {
                    pointer_id: 1,
                    action: TouchAction::Move,
                    x: 500,
                    y: 0,
                    pressure: 1.0,
                },
                InputEvent::Pointer {
                    pointer_id: 1,
                    action: TouchAction::Up,
                    x: 500,
                    y: -5,
                    pressure: 0.0,
                },
            ],
        );
        assert_eq!(out.len(), 2, "off-screen move is dropped");
        let expected = Position::new(UFixed32::ONE, UFixed32::ZERO);
        assert!(matches!(out[0], ControlMessage::InjectTouch { position, .. } if position == expected));
        assert!(matches!(out[1], ControlMessage::InjectTouch { action: TouchAction::Up, position, .. } if position == expected));
    }

    #[test]
    fn commands_map_to_messages() {
        let mut t = InputTranslator::new(false);
        let out = run(
            &mut t,
            &[
                InputEvent::Command(DeviceCommand::Home),
                InputEvent::Command(DeviceCommand::Back),
                InputEvent::Command(DeviceCommand::ScreenOff),
                InputEvent::Command(DeviceCommand::SetClipboard {
                    text: "x".into(),
                    paste: true,
                }),
                InputEvent::Command(DeviceCommand::SetClipboard {
                    text: "y".into(),
                    paste: false,
                }),
            ],
        );
        assert!(matches!(
            out[0],
            ControlMessage::InjectKeycode { action: KeyAction::Down, keycode: KEYCODE_HOME, .. }
        ));
        assert!(matches!(
            out[1],
            ControlMessage::InjectKeycode { action: KeyAction::Up, keycode: KEYCODE_HOME, .. }
        ));
        assert_eq!(out[2], ControlMessage::BackOrScreenOn);
        assert_eq!(
            out[3],
            ControlMessage::SetScreenPowerMode { mode: ScreenPowerMode::Off }
        );
        assert!(matches!(out[4], ControlMessage::SetClipboard { sequence: 1, paste: true, .. }));
        assert!(matches!(out[5], ControlMessage::SetClipboard { sequence: 2, .. }));
    }
}
