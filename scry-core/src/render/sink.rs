//! Display-sink seam: what the renderer draws to and reads input from.

use std::path::PathBuf;

use crate::error::ScryError;
use crate::fixed::Position;
use crate::flags::MetaState;
use crate::frame::Frame;
use crate::header::FrameSize;
use crate::message::{KeyAction, TouchAction};

/// Pointer id reported for the host mouse.
pub const POINTER_ID_MOUSE: u64 = u64::MAX;

// ── Input events ─────────────────────────────────────────────────

/// Device-level actions bound to host shortcuts.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeviceCommand {
    Home,
    Back,
    AppSwitch,
    Menu,
    VolumeUp,
    VolumeDown,
    Power,
    ExpandNotificationPanel,
    CollapseNotificationPanel,
    RotateDevice,
    /// Turn the device screen off, mirroring continues.
    ScreenOff,
    ScreenOn,
    /// Ask the device for its clipboard.
    GetClipboard,
    /// Copy host clipboard text to the device, optionally pasting it.
    SetClipboard { text: String, paste: bool },
}

/// Changes to the window that need no device round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowCommand {
    ToggleFullscreen,
    /// Remove black borders around the content.
    ResizeToFit,
    /// One device pixel per window pixel.
    PixelPerfect,
    ToggleAlwaysOnTop,
}

/// Raw events produced by a display sink.
#[derive(Debug, Clone, PartialEq)]
pub enum InputEvent {
    /// A key mapped to a device keycode.
    Key {
        action: KeyAction,
        keycode: u32,
        repeat: u32,
        metastate: MetaState,
    },
    /// Committed text from the host input method.
    Text(String),
    /// Pointer activity in window pixel coordinates.
    Pointer {
        pointer_id: u64,
        action: TouchAction,
        x: i32,
        y: i32,
        pressure: f32,
    },
    Scroll {
        x: i32,
        y: i32,
        hscroll: i32,
        vscroll: i32,
    },
    Command(DeviceCommand),
    Window(WindowCommand),
    FileDropped(PathBuf),
    ToggleFps,
    /// The operator closed the window.
    Close,
}

// ── Geometry ─────────────────────────────────────────────────────

/// A rectangle in window pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

/// Window placement and decoration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowGeometry {
    pub title: String,
    /// `None` lets the sink choose.
    pub x: Option<i32>,
    pub y: Option<i32>,
    pub width: u32,
    pub height: u32,
    pub borderless: bool,
    pub always_on_top: bool,
    pub fullscreen: bool,
}

impl WindowGeometry {
    /// Size the window after the frame, honoring a requested width or
    /// height (0 = derive from the other side, keeping the aspect ratio).
    pub fn new(title: impl Into<String>, frame: FrameSize, width: u32, height: u32) -> Self {
        let (width, height) = match (width, height) {
            (0, 0) => (frame.width, frame.height),
            (w, 0) => (w, scale(w, frame.height, frame.width)),
            (0, h) => (scale(h, frame.width, frame.height), h),
            (w, h) => (w, h),
        };
        Self {
            title: title.into(),
            x: None,
            y: None,
            width: width.max(1),
            height: height.max(1),
            borderless: false,
            always_on_top: false,
            fullscreen: false,
        }
    }

    /// Where the frame lands inside the window, letterboxed and centered.
    pub fn content_rect(&self, frame: FrameSize) -> Rect {
        if frame.is_empty() {
            return Rect::default();
        }
        let (ww, wh) = (self.width as u64, self.height as u64);
        let (fw, fh) = (frame.width as u64, frame.height as u64);
        let (cw, ch) = if ww * fh > wh * fw {
            ((wh * fw / fh) as u32, self.height)
        } else {
            (self.width, (ww * fh / fw) as u32)
        };
        Rect {
            x: ((self.width - cw) / 2) as i32,
            y: ((self.height - ch) / 2) as i32,
            width: cw,
            height: ch,
        }
    }

    /// Shrink the window to the content so no borders remain.
    pub fn resize_to_fit(&mut self, frame: FrameSize) {
        let content = self.content_rect(frame);
        if content.width > 0 && content.height > 0 {
            self.width = content.width;
            self.height = content.height;
        }
    }

    pub fn pixel_perfect(&mut self, frame: FrameSize) {
        if !frame.is_empty() {
            self.width = frame.width;
            self.height = frame.height;
        }
    }

    /// Follow a change of frame size, such as a device rotation.
    pub fn frame_changed(&mut self, old: FrameSize, new: FrameSize) {
        let was_portrait = old.height >= old.width;
        let is_portrait = new.height >= new.width;
        if was_portrait != is_portrait {
            std::mem::swap(&mut self.width, &mut self.height);
        }
        self.resize_to_fit(new);
    }

    /// Map a window pixel to a normalized device position.
    pub fn to_device(&self, frame: FrameSize, x: i32, y: i32) -> Option<Position> {
        let rect = self.content_rect(frame);
        Position::from_pixels(x - rect.x, y - rect.y, rect.width, rect.height)
    }
}

fn scale(value: u32, num: u32, den: u32) -> u32 {
    if den == 0 {
        return value;
    }
    ((value as u64 * num as u64) / den as u64) as u32
}

// ── DisplaySink ──────────────────────────────────────────────────

/// A presentation surface and its input source.
///
/// Only the renderer task touches a sink, so it need not be `Send`.
pub trait DisplaySink {
    /// Create or reconfigure the window.
    fn apply_geometry(&mut self, geometry: &WindowGeometry) -> Result<(), ScryError>;

    fn present(&mut self, frame: &Frame) -> Result<(), ScryError>;

    /// Input gathered since the last call. Must not block.
    fn poll_events(&mut self) -> Vec<InputEvent>;

    /// Replace the host clipboard with device text.
    fn set_clipboard(&mut self, text: &str) -> Result<(), ScryError>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fixed::UFixed32;

    const PHONE: FrameSize = FrameSize::new(1080, 2340);

    #[test]
    fn derives_missing_side() {
        let g = WindowGeometry::new("t", PHONE, 540, 0);
        assert_eq!((g.width, g.height), (540, 1170));
        let g = WindowGeometry::new("t", PHONE, 0, 0);
        assert_eq!((g.width, g.height), (1080, 2340));
    }

    #[test]
    fn letterboxes_content() {
        let g = WindowGeometry::new("t", PHONE, 1000, 1170);
        let r = g.content_rect(PHONE);
        assert_eq!(r, Rect { x: 230, y: 0, width: 540, height: 1170 });
    }

    #[test]
    fn resize_to_fit_removes_borders() {
        let mut g = WindowGeometry::new("t", PHONE, 1000, 1170);
        g.resize_to_fit(PHONE);
        assert_eq!((g.width, g.height), (540, 1170));
    }

    #[test]
    fn rotation_swaps_orientation() {
        let mut g = WindowGeometry::new("t", PHONE, 540, 1170);
        g.frame_changed(PHONE, FrameSize::new(2340, 1080));
        assert_eq!((g.width, g.height), (1170, 540));
    }

    #[test]
    fn maps_window_pixels_to_device() {
        let g = WindowGeometry::new("t", PHONE, 1000, 1170);
        assert_eq!(g.to_device(PHONE, 100, 10), None);
        let p = g.to_device(PHONE, 230, 0).unwrap();
        assert_eq!(p, Position::new(UFixed32::ZERO, UFixed32::ZERO));
        let p = g.to_device(PHONE, 769, 1169).unwrap();
        assert_eq!(p, Position::new(UFixed32::ONE, UFixed32::ONE));
    }
}
