//! The renderer loop.
//!
//! A single cooperative loop owns the display sink. Each pass drains
//! sink input into the controller, applies device events, then takes at
//! most one frame from the buffer and presents it. Between passes it
//! sleeps until a frame arrives, the session ends or a short tick
//! elapses so input stays responsive.

pub mod fps;
pub mod input;
pub mod sink;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::control::Controller;
use crate::error::{ScryError, SendError};
use crate::frame::FrameBuffer;
use crate::header::FrameSize;
use crate::message::{ControlMessage, DeviceEvent};
use crate::session::{Liveness, Terminal};

pub use fps::FpsCounter;
pub use input::InputTranslator;
pub use sink::{
    DeviceCommand, DisplaySink, InputEvent, POINTER_ID_MOUSE, Rect, WindowCommand, WindowGeometry,
};

/// Default upper bound on the wait between passes.
pub const DEFAULT_IDLE_TICK: Duration = Duration::from_millis(16);

#[derive(Debug, Clone)]
pub struct RendererConfig {
    pub prefer_text: bool,
    /// Start with the fps counter reporting.
    pub show_fps: bool,
    pub idle_tick: Duration,
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            prefer_text: false,
            show_fps: false,
            idle_tick: DEFAULT_IDLE_TICK,
        }
    }
}

pub struct RendererLoop<S> {
    sink: S,
    buffer: Arc<FrameBuffer>,
    controller: Controller,
    liveness: Liveness,
    geometry: WindowGeometry,
    frame_size: FrameSize,
    translator: InputTranslator,
    fps: FpsCounter,
    files: Option<mpsc::UnboundedSender<PathBuf>>,
    idle_tick: Duration,
    presented: u64,
}

impl<S: DisplaySink> RendererLoop<S> {
    pub fn new(
        sink: S,
        buffer: Arc<FrameBuffer>,
        controller: Controller,
        liveness: Liveness,
        geometry: WindowGeometry,
        frame_size: FrameSize,
        config: RendererConfig,
    ) -> Self {
        Self {
            sink,
            buffer,
            controller,
            liveness,
            geometry,
            frame_size,
            translator: InputTranslator::new(config.prefer_text),
            fps: FpsCounter::new(config.show_fps),
            files: None,
            idle_tick: config.idle_tick,
            presented: 0,
        }
    }

    /// Route dropped files to the pusher task.
    pub fn with_file_pusher(mut self, files: mpsc::UnboundedSender<PathBuf>) -> Self {
        self.files = Some(files);
        self
    }

    pub fn geometry(&self) -> &WindowGeometry {
        &self.geometry
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    pub fn presented(&self) -> u64 {
        self.presented
    }

    /// Run until the session ends. Returns why it ended.
    ///
    /// A sink failure terminates the session and is returned as the error.
    pub async fn run(mut self) -> Result<Terminal, ScryError> {
        info!(
            width = self.geometry.width,
            height = self.geometry.height,
            "renderer started"
        );
        let outcome = self.drive().await;
        if let Err(e) = &outcome {
            self.liveness.terminate(Terminal::Failed(e.to_string()));
        }
        outcome?;
        debug!(presented = self.presented, "renderer stopped");
        Ok(self.liveness.terminal().unwrap_or(Terminal::Quit))
    }

    async fn drive(&mut self) -> Result<(), ScryError> {
        self.sink.apply_geometry(&self.geometry)?;
        while self.step()? {
            tokio::select! {
                biased;
                _ = self.liveness.cancelled() => {}
                _ = self.buffer.notified() => {}
                _ = tokio::time::sleep(self.idle_tick) => {}
            }
        }
        Ok(())
    }

    /// One pass of the loop without waiting. Returns `false` once the
    /// session has ended.
    pub fn step(&mut self) -> Result<bool, ScryError> {
        let mut outgoing = Vec::new();
        for event in self.sink.poll_events() {
            self.handle_event(event, &mut outgoing)?;
        }
        self.translator.flush(&mut outgoing);
        self.dispatch(outgoing);

        while let Some(event) = self.controller.poll_device_event() {
            match event {
                DeviceEvent::Clipboard { text } => {
                    debug!(len = text.len(), "device clipboard");
                    self.sink.set_clipboard(&text)?;
                }
                DeviceEvent::AckClipboard { sequence } => {
                    debug!(sequence, "device acknowledged clipboard");
                }
            }
        }

        if self.liveness.is_terminated() {
            return Ok(false);
        }

        if let Some(frame) = self.buffer.take() {
            let size = FrameSize::new(frame.width, frame.height);
            if size != self.frame_size && !size.is_empty() {
                info!(width = size.width, height = size.height, "frame size changed");
                self.geometry.frame_changed(self.frame_size, size);
                self.frame_size = size;
                self.sink.apply_geometry(&self.geometry)?;
            }
            self.sink.present(&frame)?;
            self.presented += 1;
            self.fps.frame_rendered();
        }
        self.fps.frames_skipped(self.buffer.take_skipped());
        self.fps.report();
        Ok(true)
    }

    fn handle_event(
        &mut self,
        event: InputEvent,
        outgoing: &mut Vec<ControlMessage>,
    ) -> Result<(), ScryError> {
        match event {
            InputEvent::Close => {
                self.liveness.terminate(Terminal::Quit);
            }
            InputEvent::Window(command) => {
                match command {
                    WindowCommand::ToggleFullscreen => {
                        self.geometry.fullscreen = !self.geometry.fullscreen
                    }
                    WindowCommand::ResizeToFit => self.geometry.resize_to_fit(self.frame_size),
                    WindowCommand::PixelPerfect => self.geometry.pixel_perfect(self.frame_size),
                    WindowCommand::ToggleAlwaysOnTop => {
                        self.geometry.always_on_top = !self.geometry.always_on_top
                    }
                }
                self.sink.apply_geometry(&self.geometry)?;
            }
            InputEvent::FileDropped(path) => match &self.files {
                Some(files) if files.send(path.clone()).is_ok() => {
                    info!(path = %path.display(), "queued file for push");
                }
                _ => warn!(path = %path.display(), "file push unavailable"),
            },
            InputEvent::ToggleFps => {
                self.fps.toggle();
            }
            other => {
                if self.controller.is_enabled() {
                    self.translator
                        .translate(&other, &self.geometry, self.frame_size, outgoing);
                }
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, outgoing: Vec<ControlMessage>) {
        for msg in outgoing {
            match self.controller.send(msg) {
                Ok(()) => {}
                Err(SendError::Disabled) => {}
                Err(e @ SendError::Closed) => {
                    self.liveness.terminate(Terminal::Failed(e.to_string()));
                    return;
                }
            }
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::DeviceCodec;
    use crate::frame::{Frame, FramePolicy};
    use crate::message::TouchAction;
    use crate::task::TaskSet;
    use bytes::Bytes;
    use futures::{SinkExt, StreamExt};
    use std::collections::VecDeque;
    use tokio_util::codec::Framed;

    const PHONE: FrameSize = FrameSize::new(1080, 2340);

    #[derive(Default)]
    struct FakeSink {
        presented: Vec<u64>,
        geometries: Vec<WindowGeometry>,
        events: VecDeque<Vec<InputEvent>>,
        clipboard: Option<String>,
        fail_present: bool,
    }

    impl DisplaySink for FakeSink {
        fn apply_geometry(&mut self, geometry: &WindowGeometry) -> Result<(), ScryError> {
            self.geometries.push(geometry.clone());
            Ok(())
        }

        fn present(&mut self, frame: &Frame) -> Result<(), ScryError> {
            if self.fail_present {
                return Err(ScryError::Display("surface lost".into()));
            }
            self.presented.push(frame.pts);
            Ok(())
        }

        fn poll_events(&mut self) -> Vec<InputEvent> {
            self.events.pop_front().unwrap_or_default()
        }

        fn set_clipboard(&mut self, text: &str) -> Result<(), ScryError> {
            self.clipboard = Some(text.to_owned());
            Ok(())
        }
    }

    fn frame(pts: u64, size: FrameSize) -> Frame {
        Frame::new(pts, size.width, size.height, Bytes::from_static(b"px"))
    }

    fn renderer(sink: FakeSink, buffer: Arc<FrameBuffer>, controller: Controller, live: &Liveness) -> RendererLoop<FakeSink> {
        RendererLoop::new(
            sink,
            buffer,
            controller,
            live.clone(),
            WindowGeometry::new("test", PHONE, 540, 0),
            PHONE,
            RendererConfig::default(),
        )
    }

    #[tokio::test]
    async fn presents_only_latest_frame() {
        let buffer = Arc::new(FrameBuffer::new(FramePolicy::LatestOnly));
        let live = Liveness::new();
        let mut r = renderer(FakeSink::default(), Arc::clone(&buffer), Controller::disabled(), &live);
        for pts in [1000, 1016, 1033] {
            buffer.push(frame(pts, PHONE));
        }
        assert!(r.step().unwrap());
        assert!(r.step().unwrap());
        assert_eq!(r.sink().presented, vec![1033]);
    }

    #[tokio::test]
    async fn close_event_ends_run_with_quit() {
        let buffer = Arc::new(FrameBuffer::default());
        let live = Liveness::new();
        let mut sink = FakeSink::default();
        sink.events.push_back(vec![InputEvent::Close]);
        let r = renderer(sink, buffer, Controller::disabled(), &live);
        let terminal = tokio::time::timeout(Duration::from_secs(1), r.run())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(terminal, Terminal::Quit);
        assert!(live.is_terminated());
    }

    #[tokio::test]
    async fn external_termination_stops_run() {
        let buffer = Arc::new(FrameBuffer::default());
        let live = Liveness::new();
        let r = renderer(FakeSink::default(), buffer, Controller::disabled(), &live);
        let task = tokio::spawn(r.run());
        tokio::time::sleep(Duration::from_millis(20)).await;
        live.terminate(Terminal::DeviceDisconnected);
        let terminal = tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        assert_eq!(terminal, Terminal::DeviceDisconnected);
    }

    #[tokio::test]
    async fn sink_failure_is_fatal() {
        let buffer = Arc::new(FrameBuffer::default());
        buffer.push(frame(1, PHONE));
        let live = Liveness::new();
        let sink = FakeSink {
            fail_present: true,
            ..Default::default()
        };
        let r = renderer(sink, buffer, Controller::disabled(), &live);
        assert!(r.run().await.is_err());
        assert!(matches!(live.terminal(), Some(Terminal::Failed(_))));
    }

    #[tokio::test]
    async fn window_commands_reconfigure_without_restart() {
        let buffer = Arc::new(FrameBuffer::default());
        let live = Liveness::new();
        let mut sink = FakeSink::default();
        sink.events.push_back(vec![
            InputEvent::Window(WindowCommand::ToggleFullscreen),
            InputEvent::Window(WindowCommand::PixelPerfect),
        ]);
        let mut r = renderer(sink, Arc::clone(&buffer), Controller::disabled(), &live);
        r.step().unwrap();
        let last = r.sink().geometries.last().unwrap();
        assert!(last.fullscreen);
        assert_eq!((last.width, last.height), (1080, 2340));

        buffer.push(frame(5, FrameSize::new(2340, 1080)));
        r.step().unwrap();
        let last = r.sink().geometries.last().unwrap();
        assert!(last.width > last.height, "window follows rotation");
        assert_eq!(r.sink().presented, vec![5]);
    }

    #[tokio::test]
    async fn input_reaches_device_and_clipboard_comes_back() {
        let (host, device) = tokio::io::duplex(1024);
        let live = Liveness::new();
        let mut tasks = TaskSet::new();
        let controller = Controller::spawn(host, live.clone(), &mut tasks);
        let mut device = Framed::new(device, DeviceCodec);

        let mut sink = FakeSink::default();
        sink.events.push_back(vec![InputEvent::Pointer {
            pointer_id: POINTER_ID_MOUSE,
            action: TouchAction::Down,
            x: 0,
            y: 0,
            pressure: 1.0,
        }]);
        let buffer = Arc::new(FrameBuffer::default());
        let mut r = renderer(sink, buffer, controller, &live);
        r.step().unwrap();

        let msg = device.next().await.unwrap().unwrap();
        assert!(matches!(msg, ControlMessage::InjectTouch { pointer_id: POINTER_ID_MOUSE, .. }));

        device
            .send(DeviceEvent::Clipboard { text: "copied".into() })
            .await
            .unwrap();
        for _ in 0..100 {
            r.step().unwrap();
            if r.sink().clipboard.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        assert_eq!(r.sink().clipboard.as_deref(), Some("copied"));

        live.terminate(Terminal::Quit);
        tasks.join(Duration::from_secs(1)).await;
    }
}
