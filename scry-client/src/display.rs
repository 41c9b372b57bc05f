//! Headless display sink.
//!
//! Used when there is no window to draw into: frames are counted rather
//! than shown, and input comes from the console instead of a window.

use tokio::sync::mpsc;
use tracing::{debug, info};

use scry_core::render::{DisplaySink, InputEvent, WindowGeometry};
use scry_core::{Frame, FrameSize, ScryError};

pub struct HeadlessSink {
    events: mpsc::UnboundedReceiver<InputEvent>,
    geometry: Option<WindowGeometry>,
    presented: u64,
    last_size: Option<FrameSize>,
    clipboard: Option<String>,
    input_closed: bool,
}

impl HeadlessSink {
    /// A sink fed with input from `events`.
    pub fn new(events: mpsc::UnboundedReceiver<InputEvent>) -> Self {
        Self {
            events,
            geometry: None,
            presented: 0,
            last_size: None,
            clipboard: None,
            input_closed: false,
        }
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    pub fn geometry(&self) -> Option<&WindowGeometry> {
        self.geometry.as_ref()
    }

    /// Last clipboard text received from the device.
    pub fn clipboard(&self) -> Option<&str> {
        self.clipboard.as_deref()
    }
}

impl DisplaySink for HeadlessSink {
    fn apply_geometry(&mut self, geometry: &WindowGeometry) -> Result<(), ScryError> {
        debug!(
            width = geometry.width,
            height = geometry.height,
            fullscreen = geometry.fullscreen,
            "geometry"
        );
        self.geometry = Some(geometry.clone());
        Ok(())
    }

    fn present(&mut self, frame: &Frame) -> Result<(), ScryError> {
        let size = FrameSize::new(frame.width, frame.height);
        if self.last_size != Some(size) {
            info!(width = size.width, height = size.height, "video size");
            self.last_size = Some(size);
        }
        self.presented += 1;
        Ok(())
    }

    fn poll_events(&mut self) -> Vec<InputEvent> {
        let mut out = Vec::new();
        loop {
            match self.events.try_recv() {
                Ok(event) => out.push(event),
                Err(mpsc::error::TryRecvError::Empty) => break,
                // Input is gone for good; treat it like closing the window.
                Err(mpsc::error::TryRecvError::Disconnected) => {
                    if !self.input_closed {
                        self.input_closed = true;
                        out.push(InputEvent::Close);
                    }
                    break;
                }
            }
        }
        out
    }

    fn set_clipboard(&mut self, text: &str) -> Result<(), ScryError> {
        info!(len = text.len(), "device clipboard: {text}");
        self.clipboard = Some(text.to_owned());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    #[test]
    fn counts_frames_and_drains_events() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sink = HeadlessSink::new(rx);
        let geometry = WindowGeometry::new("dev", FrameSize::new(100, 200), 0, 0);
        sink.apply_geometry(&geometry).unwrap();

        tx.send(InputEvent::ToggleFps).unwrap();
        tx.send(InputEvent::Text("hi".into())).unwrap();
        assert_eq!(sink.poll_events().len(), 2);
        assert!(sink.poll_events().is_empty());

        sink.present(&Frame::new(1, 100, 200, Bytes::new())).unwrap();
        sink.present(&Frame::new(2, 100, 200, Bytes::new())).unwrap();
        assert_eq!(sink.presented(), 2);

        sink.set_clipboard("copied").unwrap();
        assert_eq!(sink.clipboard(), Some("copied"));
    }

    #[test]
    fn closed_input_closes_once() {
        let (tx, rx) = mpsc::unbounded_channel();
        let mut sink = HeadlessSink::new(rx);
        sink.apply_geometry(&WindowGeometry::new("dev", FrameSize::new(1, 1), 0, 0))
            .unwrap();
        drop(tx);
        assert_eq!(sink.poll_events(), vec![InputEvent::Close]);
        assert!(sink.poll_events().is_empty());
    }
}
