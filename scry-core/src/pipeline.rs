//! Wiring of one mirroring session.
//!
//! [`Pipeline::start`] takes a connected [`Session`] and spawns the fixed
//! task set: video ingest, the blocking decode driver, the blocking
//! recorder, the controller pair and the file pusher. The renderer loop
//! is built separately with [`Pipeline::renderer`] because it owns the
//! display sink and runs on the caller's task.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Duration;

use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::codec::DEFAULT_MAX_PAYLOAD;
use crate::control::{ControlSender, Controller};
use crate::decode::{DecodeDriver, PassthroughDecoder};
use crate::error::{ScryError, SendError};
use crate::frame::{FrameBuffer, FramePolicy};
use crate::header::FrameSize;
use crate::ingest::{IngestTargets, VideoIngest};
use crate::message::{ControlMessage, ScreenPowerMode};
use crate::record::{Recorder, RecordingSink};
use crate::render::{DisplaySink, RendererConfig, RendererLoop, WindowGeometry};
use crate::session::{Bridge, Liveness, Session, Terminal};
use crate::task::TaskSet;

/// Device directory dropped files are pushed to.
pub const DEFAULT_PUSH_TARGET: &str = "/sdcard/";

/// Packets queued between ingest and the decoder before ingest waits.
pub const DECODER_QUEUE_DEPTH: usize = 64;

/// How long [`Pipeline::shutdown`] waits for tasks.
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(2);

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub frame_policy: FramePolicy,
    pub max_payload: usize,
    /// Decode frames for a display. Off when only recording.
    pub display: bool,
    /// Send input to the device.
    pub control: bool,
    pub record: Option<RecordingSink>,
    pub renderer: RendererConfig,
    pub push_target: String,
    pub turn_screen_off: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            frame_policy: FramePolicy::default(),
            max_payload: DEFAULT_MAX_PAYLOAD,
            display: true,
            control: true,
            record: None,
            renderer: RendererConfig::default(),
            push_target: DEFAULT_PUSH_TARGET.to_owned(),
            turn_screen_off: false,
        }
    }
}

/// What the session looked like when it ended.
#[derive(Debug)]
pub struct PipelineReport {
    pub terminal: Terminal,
    pub task_failures: Vec<ScryError>,
    pub decode_errors: u64,
    pub frames_dropped: u64,
    pub recording_degraded: bool,
}

impl PipelineReport {
    /// A clean quit with every task stopping on its own.
    pub fn is_clean(&self) -> bool {
        self.terminal.is_clean() && self.task_failures.is_empty()
    }
}

pub struct Pipeline {
    session: Session,
    config: PipelineConfig,
    tasks: TaskSet,
    buffer: Arc<FrameBuffer>,
    controller: Option<Controller>,
    sender: ControlSender,
    files: mpsc::UnboundedSender<PathBuf>,
    decode_errors: Option<Arc<AtomicU64>>,
    recording_degraded: Option<Arc<AtomicBool>>,
    /// Control socket kept open but unused when control is off.
    idle_control: Option<TcpStream>,
}

impl Pipeline {
    /// Spawn every task of the session.
    ///
    /// Fails without spawning anything if the recording cannot be opened.
    pub async fn start(mut session: Session, config: PipelineConfig) -> Result<Self, ScryError> {
        let liveness = session.liveness().clone();
        let frame_size = session.frame_size();
        let video = session
            .take_video()
            .ok_or_else(|| ScryError::Terminated("video connection already taken".into()))?;
        let control = session.take_control();

        let mut recorder = None;
        if let Some(sink) = &config.record {
            let mut r = Recorder::new(frame_size);
            r.attach(sink.clone())?;
            recorder = Some(r);
        }

        let mut tasks = TaskSet::new();
        let buffer = Arc::new(FrameBuffer::new(config.frame_policy));
        let mut targets = IngestTargets::default();

        let mut decode_errors = None;
        if config.display {
            let (tx, rx) = mpsc::channel(DECODER_QUEUE_DEPTH);
            let driver = DecodeDriver::new(
                Box::new(PassthroughDecoder::new(frame_size)),
                Arc::clone(&buffer),
            );
            decode_errors = Some(driver.error_counter());
            let live = liveness.clone();
            tasks.spawn_blocking("decoder", move || driver.run_blocking(rx, live));
            targets.decoder = Some(tx);
        }

        let mut recording_degraded = None;
        if let Some(recorder) = recorder {
            let (tx, rx) = mpsc::unbounded_channel();
            recording_degraded = Some(recorder.degraded_flag());
            tasks.spawn_blocking("recorder", move || {
                if let Err(e) = recorder.run_blocking(rx) {
                    warn!(error = %e, "recording ended early");
                }
            });
            targets.recorder = Some(tx);
        }

        let ingest = VideoIngest::new(video, config.max_payload);
        tasks.spawn("video-ingest", ingest.run(liveness.clone(), targets));

        let mut idle_control = None;
        let controller = match control {
            Some(stream) if config.control => Controller::spawn(stream, liveness.clone(), &mut tasks),
            stream => {
                idle_control = stream;
                Controller::disabled()
            }
        };
        let sender = controller.sender();

        let (files, file_rx) = mpsc::unbounded_channel();
        tasks.spawn(
            "file-pusher",
            push_files(
                session.bridge(),
                session.serial().to_owned(),
                config.push_target.clone(),
                file_rx,
                liveness.clone(),
            ),
        );

        if config.turn_screen_off {
            let msg = ControlMessage::SetScreenPowerMode {
                mode: ScreenPowerMode::Off,
            };
            match sender.send(msg) {
                Ok(()) => info!("turning device screen off"),
                Err(SendError::Disabled) => warn!("cannot turn screen off without control"),
                Err(e) => return Err(e.into()),
            }
        }

        info!(
            device = %session.device_name(),
            width = frame_size.width,
            height = frame_size.height,
            tasks = tasks.len(),
            "pipeline started"
        );

        Ok(Self {
            session,
            config,
            tasks,
            buffer,
            controller: Some(controller),
            sender,
            files,
            decode_errors,
            recording_degraded,
            idle_control,
        })
    }

    pub fn liveness(&self) -> &Liveness {
        self.session.liveness()
    }

    pub fn frame_size(&self) -> FrameSize {
        self.session.frame_size()
    }

    pub fn device_name(&self) -> &str {
        self.session.device_name()
    }

    pub fn buffer(&self) -> Arc<FrameBuffer> {
        Arc::clone(&self.buffer)
    }

    /// A sender usable from outside the renderer.
    pub fn control_sender(&self) -> ControlSender {
        self.sender.clone()
    }

    /// Queue a local file for pushing to the device.
    pub fn push_file(&self, path: impl Into<PathBuf>) -> bool {
        self.files.send(path.into()).is_ok()
    }

    /// Build the renderer loop over `sink`. The controller moves into the
    /// first renderer built; later ones get a disabled controller.
    pub fn renderer<S: DisplaySink>(&mut self, sink: S, geometry: WindowGeometry) -> RendererLoop<S> {
        let controller = self.controller.take().unwrap_or_else(Controller::disabled);
        RendererLoop::new(
            sink,
            Arc::clone(&self.buffer),
            controller,
            self.session.liveness().clone(),
            geometry,
            self.session.frame_size(),
            self.config.renderer.clone(),
        )
        .with_file_pusher(self.files.clone())
    }

    /// Disconnect the session, wait for every task and summarize.
    pub async fn shutdown(mut self, grace: Duration) -> PipelineReport {
        let terminal = self.session.liveness().terminal();
        self.session.disconnect().await;
        self.idle_control = None;
        drop(self.controller.take());

        let Pipeline {
            tasks,
            buffer,
            decode_errors,
            recording_degraded,
            files,
            ..
        } = self;
        drop(files);

        let task_failures = tasks.join(grace).await;
        for failure in &task_failures {
            error!(error = %failure, "task failed");
        }

        let recording_degraded = recording_degraded.is_some_and(|f| f.load(Ordering::Relaxed));
        if recording_degraded {
            warn!("recording degraded: some timestamps were corrected");
        }

        let report = PipelineReport {
            terminal: terminal.unwrap_or(Terminal::Quit),
            task_failures,
            decode_errors: decode_errors.map_or(0, |c| c.load(Ordering::Relaxed)),
            frames_dropped: buffer.dropped_count(),
            recording_degraded,
        };
        info!(
            terminal = %report.terminal,
            decode_errors = report.decode_errors,
            frames_dropped = report.frames_dropped,
            "pipeline stopped"
        );
        report
    }
}

fn remote_path(target: &str, local: &Path) -> Option<String> {
    let name = local.file_name()?.to_str()?;
    if target.ends_with('/') {
        Some(format!("{target}{name}"))
    } else {
        Some(format!("{target}/{name}"))
    }
}

/// Push dropped files one at a time. A failed push is logged and the
/// session carries on.
async fn push_files(
    bridge: Arc<dyn Bridge>,
    serial: String,
    target: String,
    mut rx: mpsc::UnboundedReceiver<PathBuf>,
    liveness: Liveness,
) {
    loop {
        let path = tokio::select! {
            biased;
            _ = liveness.cancelled() => break,
            next = rx.recv() => match next {
                Some(path) => path,
                None => break,
            },
        };
        let Some(remote) = remote_path(&target, &path) else {
            warn!(path = %path.display(), "dropped file has no usable name");
            continue;
        };
        match bridge.push(&serial, &path, &remote).await {
            Ok(()) => info!(local = %path.display(), remote, "file pushed"),
            Err(e) => warn!(local = %path.display(), error = %e, "file push failed"),
        }
    }
    debug!("file pusher stopped");
}
