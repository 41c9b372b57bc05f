//! Stream recorder.
//!
//! Taps encoded packets before decoding and remuxes them into MP4 or
//! Matroska without re-encoding. Every packet is flushed as it is
//! written, so the file stays playable up to the last packet even if
//! the process dies. Timestamps reaching the container strictly
//! increase: a packet that would go backwards is moved to just after its
//! predecessor and the recording is flagged as degraded.

pub mod h264;
pub mod mkv;
pub mod mp4;

use std::fmt;
use std::fs::File;
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::RecordError;
use crate::header::FrameSize;
use crate::packet::Packet;

pub use h264::ParameterSets;
pub use mkv::MatroskaWriter;
pub use mp4::Mp4Writer;

/// Shift applied to a non-increasing timestamp, in microseconds.
pub const TIMESTAMP_EPSILON: u64 = 1;

// ── Format ───────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordFormat {
    Mp4,
    #[serde(rename = "mkv")]
    Matroska,
}

impl RecordFormat {
    /// Infer from the file extension.
    pub fn from_path(path: &Path) -> Result<Self, RecordError> {
        path.extension()
            .and_then(|ext| ext.to_str())
            .and_then(|ext| ext.parse().ok())
            .ok_or_else(|| RecordError::UnknownFormat(path.to_path_buf()))
    }

    pub fn extension(self) -> &'static str {
        match self {
            RecordFormat::Mp4 => "mp4",
            RecordFormat::Matroska => "mkv",
        }
    }
}

impl fmt::Display for RecordFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.extension())
    }
}

impl FromStr for RecordFormat {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "mp4" => Ok(RecordFormat::Mp4),
            "mkv" | "matroska" => Ok(RecordFormat::Matroska),
            other => Err(RecordError::UnsupportedFormat(other.to_owned())),
        }
    }
}

/// Target of a recording.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordingSink {
    pub path: PathBuf,
    pub format: RecordFormat,
}

impl RecordingSink {
    /// An explicit format wins over the extension.
    pub fn new(path: impl Into<PathBuf>, format: Option<RecordFormat>) -> Result<Self, RecordError> {
        let path = path.into();
        let format = match format {
            Some(format) => format,
            None => RecordFormat::from_path(&path)?,
        };
        Ok(Self { path, format })
    }
}

// ── Container seam ───────────────────────────────────────────────

/// A container muxer fed with Annex-B H.264.
pub trait ContainerWriter: Send {
    fn write_header(&mut self, params: &ParameterSets) -> Result<(), RecordError>;

    /// `pts` is in microseconds and strictly increasing.
    fn write_packet(&mut self, pts: u64, key_frame: bool, payload: &[u8]) -> Result<(), RecordError>;

    /// Flush everything pending. The writer is not used afterwards.
    fn finish(&mut self) -> Result<(), RecordError>;
}

fn open_container(
    sink: &RecordingSink,
    frame_size: FrameSize,
) -> Result<Box<dyn ContainerWriter>, RecordError> {
    let file = BufWriter::new(File::create(&sink.path)?);
    Ok(match sink.format {
        RecordFormat::Mp4 => Box::new(Mp4Writer::new(file, frame_size)),
        RecordFormat::Matroska => Box::new(MatroskaWriter::new(file, frame_size)),
    })
}

// ── Recorder ─────────────────────────────────────────────────────

struct Active {
    sink: RecordingSink,
    writer: Box<dyn ContainerWriter>,
    header_written: bool,
    written: u64,
}

pub struct Recorder {
    frame_size: FrameSize,
    active: Option<Active>,
    last_pts: Option<u64>,
    degraded: Arc<AtomicBool>,
    corrections: u64,
    in_burst: bool,
}

impl fmt::Debug for Recorder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Recorder")
            .field("sink", &self.active.as_ref().map(|a| &a.sink))
            .field("last_pts", &self.last_pts)
            .field("corrections", &self.corrections)
            .finish()
    }
}

impl Recorder {
    pub fn new(frame_size: FrameSize) -> Self {
        Self {
            frame_size,
            active: None,
            last_pts: None,
            degraded: Arc::new(AtomicBool::new(false)),
            corrections: 0,
            in_burst: false,
        }
    }

    /// Open `sink` for writing, finalizing any previous target first.
    pub fn attach(&mut self, sink: RecordingSink) -> Result<(), RecordError> {
        self.finalize()?;
        let writer = open_container(&sink, self.frame_size)?;
        info!(path = %sink.path.display(), format = %sink.format, "recording started");
        self.active = Some(Active {
            sink,
            writer,
            header_written: false,
            written: 0,
        });
        self.last_pts = None;
        Ok(())
    }

    /// Attach an already-open container, e.g. an in-memory one.
    pub fn attach_writer(&mut self, sink: RecordingSink, writer: Box<dyn ContainerWriter>) -> Result<(), RecordError> {
        self.finalize()?;
        self.active = Some(Active {
            sink,
            writer,
            header_written: false,
            written: 0,
        });
        self.last_pts = None;
        Ok(())
    }

    pub fn is_attached(&self) -> bool {
        self.active.is_some()
    }

    /// Set once any timestamp had to be corrected.
    pub fn is_degraded(&self) -> bool {
        self.degraded.load(Ordering::Relaxed)
    }

    /// Shared view of the degraded flag for the caller to report.
    pub fn degraded_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.degraded)
    }

    pub fn corrections(&self) -> u64 {
        self.corrections
    }

    pub fn last_pts(&self) -> Option<u64> {
        self.last_pts
    }

    /// Write one packet. Media before the first configuration packet
    /// is dropped since the container cannot describe it yet.
    ///
    /// On error the recording is finalized and detached.
    pub fn write(&mut self, packet: &Packet) -> Result<(), RecordError> {
        let result = self.write_inner(packet);
        if result.is_err() {
            if let Err(e) = self.finalize() {
                warn!(error = %e, "finalize after write failure also failed");
            }
        }
        result
    }

    fn write_inner(&mut self, packet: &Packet) -> Result<(), RecordError> {
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };

        if packet.is_config() {
            if active.header_written {
                debug!("ignoring repeated configuration packet");
            } else {
                let params = ParameterSets::from_annex_b(packet.payload())?;
                active.writer.write_header(&params)?;
                active.header_written = true;
            }
            return Ok(());
        }

        if !active.header_written {
            debug!(pts = packet.pts(), "dropping media packet before configuration");
            return Ok(());
        }

        let pts = self.correct(packet.pts());
        let Some(active) = self.active.as_mut() else {
            return Ok(());
        };
        active
            .writer
            .write_packet(pts, packet.is_key_frame(), packet.payload())?;
        active.written += 1;
        Ok(())
    }

    fn correct(&mut self, pts: u64) -> u64 {
        let out = match self.last_pts {
            Some(last) if pts <= last => {
                let fixed = last + TIMESTAMP_EPSILON;
                self.corrections += 1;
                self.degraded.store(true, Ordering::Relaxed);
                if !self.in_burst {
                    warn!(pts, last, corrected = fixed, "non-increasing timestamp; recording degraded");
                    self.in_burst = true;
                }
                fixed
            }
            _ => {
                if self.in_burst {
                    debug!(total = self.corrections, "timestamps increasing again");
                    self.in_burst = false;
                }
                pts
            }
        };
        self.last_pts = Some(out);
        out
    }

    /// Flush and close the container. Safe to call repeatedly.
    pub fn finalize(&mut self) -> Result<(), RecordError> {
        let Some(mut active) = self.active.take() else {
            return Ok(());
        };
        active.writer.finish()?;
        info!(
            path = %active.sink.path.display(),
            packets = active.written,
            degraded = self.is_degraded(),
            "recording finalized"
        );
        Ok(())
    }

    /// Stop recording; what was written stays playable.
    pub fn detach(&mut self) -> Result<(), RecordError> {
        self.finalize()
    }

    /// Write everything from `rx` until the sender is dropped, then finalize.
    pub fn run_blocking(mut self, mut rx: mpsc::UnboundedReceiver<Packet>) -> Result<(), RecordError> {
        while let Some(packet) = rx.blocking_recv() {
            if let Err(e) = self.write(&packet) {
                error!(error = %e, "recording stopped");
                return Err(e);
            }
        }
        self.finalize()
    }
}

impl Drop for Recorder {
    fn drop(&mut self) {
        if let Err(e) = self.finalize() {
            error!(error = %e, "failed to finalize recording");
        }
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use h264::tests::{CONFIG, IDR};
    use parking_lot::Mutex;

    #[derive(Clone, Default)]
    struct Log(Arc<Mutex<Vec<u64>>>);

    impl ContainerWriter for Log {
        fn write_header(&mut self, _: &ParameterSets) -> Result<(), RecordError> {
            Ok(())
        }
        fn write_packet(&mut self, pts: u64, _: bool, _: &[u8]) -> Result<(), RecordError> {
            self.0.lock().push(pts);
            Ok(())
        }
        fn finish(&mut self) -> Result<(), RecordError> {
            Ok(())
        }
    }

    fn recorder_with_log() -> (Recorder, Log) {
        let log = Log::default();
        let mut rec = Recorder::new(FrameSize::new(16, 16));
        let sink = RecordingSink::new("mem.mp4", None).unwrap();
        rec.attach_writer(sink, Box::new(log.clone())).unwrap();
        (rec, log)
    }

    #[test]
    fn format_from_extension_or_override() {
        assert_eq!(RecordFormat::from_path(Path::new("a/b.MP4")).unwrap(), RecordFormat::Mp4);
        assert_eq!(RecordFormat::from_path(Path::new("x.mkv")).unwrap(), RecordFormat::Matroska);
        assert!(matches!(
            RecordFormat::from_path(Path::new("x.avi")),
            Err(RecordError::UnknownFormat(_))
        ));
        let sink = RecordingSink::new("x.avi", Some(RecordFormat::Matroska)).unwrap();
        assert_eq!(sink.format, RecordFormat::Matroska);
        assert!("webm".parse::<RecordFormat>().is_err());
    }

    #[test]
    fn out_of_order_timestamps_become_strictly_increasing() {
        let (mut rec, log) = recorder_with_log();
        rec.write(&Packet::config(CONFIG.to_vec())).unwrap();
        for pts in [100, 200, 150, 200, 300, 300, 50, 400] {
            rec.write(&Packet::media(pts, false, IDR.to_vec())).unwrap();
        }
        let written = log.0.lock().clone();
        assert_eq!(written, vec![100, 200, 201, 202, 300, 301, 302, 400]);
        assert!(written.windows(2).all(|w| w[0] < w[1]));
        assert!(rec.is_degraded());
        assert_eq!(rec.corrections(), 4);
    }

    #[test]
    fn in_order_stream_is_not_degraded() {
        let (mut rec, log) = recorder_with_log();
        rec.write(&Packet::config(CONFIG.to_vec())).unwrap();
        for pts in [1000, 1016, 1033] {
            rec.write(&Packet::media(pts, true, IDR.to_vec())).unwrap();
        }
        assert_eq!(*log.0.lock(), vec![1000, 1016, 1033]);
        assert!(!rec.is_degraded());
    }

    #[test]
    fn media_before_config_is_dropped() {
        let (mut rec, log) = recorder_with_log();
        rec.write(&Packet::media(5, true, IDR.to_vec())).unwrap();
        rec.write(&Packet::config(CONFIG.to_vec())).unwrap();
        rec.write(&Packet::media(6, true, IDR.to_vec())).unwrap();
        assert_eq!(*log.0.lock(), vec![6]);
    }

    #[test]
    fn bad_config_detaches() {
        let (mut rec, _log) = recorder_with_log();
        assert!(rec.write(&Packet::config(vec![0, 0, 0, 1, 0x65])).is_err());
        assert!(!rec.is_attached());
        rec.write(&Packet::media(1, true, IDR.to_vec())).unwrap();
    }

    #[test]
    fn finalize_is_idempotent_and_files_are_written() {
        let dir = tempfile::tempdir().unwrap();
        for ext in ["mp4", "mkv"] {
            let path = dir.path().join(format!("out.{ext}"));
            let mut rec = Recorder::new(FrameSize::new(1080, 2340));
            rec.attach(RecordingSink::new(&path, None).unwrap()).unwrap();
            rec.write(&Packet::config(CONFIG.to_vec())).unwrap();
            rec.write(&Packet::media(1000, true, IDR.to_vec())).unwrap();
            rec.write(&Packet::media(1016, false, IDR.to_vec())).unwrap();
            rec.finalize().unwrap();
            rec.finalize().unwrap();
            let len = std::fs::metadata(&path).unwrap().len();
            assert!(len > 100, "{ext} output too small: {len}");
        }
    }

    #[test]
    fn run_blocking_finalizes_when_sender_drops() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.mkv");
        let mut rec = Recorder::new(FrameSize::new(16, 16));
        rec.attach(RecordingSink::new(&path, None).unwrap()).unwrap();
        let (tx, rx) = mpsc::unbounded_channel();
        tx.send(Packet::config(CONFIG.to_vec())).unwrap();
        tx.send(Packet::media(10, true, IDR.to_vec())).unwrap();
        drop(tx);
        rec.run_blocking(rx).unwrap();
        assert!(std::fs::metadata(&path).unwrap().len() > 0);
    }
}
