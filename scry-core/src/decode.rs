//! Decode-engine seam and the task that drives it.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::error::DecodeError;
use crate::frame::{Frame, FrameBuffer};
use crate::header::FrameSize;
use crate::packet::Packet;
use crate::session::{Liveness, Terminal};

/// A video decoder.
///
/// Packets arrive in stream order, configuration packets included.
/// Returning `Ok(None)` means the packet was consumed without producing
/// a picture yet.
pub trait DecodeEngine: Send {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Frame>, DecodeError>;
}

// ── PassthroughDecoder ───────────────────────────────────────────

/// Engine that wraps each media payload as a frame without decoding it.
///
/// Used when no real codec is linked in (headless recording) and in
/// tests. It still enforces configuration-before-media ordering.
#[derive(Debug)]
pub struct PassthroughDecoder {
    frame_size: FrameSize,
    config: Option<Bytes>,
}

impl PassthroughDecoder {
    pub fn new(frame_size: FrameSize) -> Self {
        Self {
            frame_size,
            config: None,
        }
    }

    pub fn config(&self) -> Option<&Bytes> {
        self.config.as_ref()
    }
}

impl DecodeEngine for PassthroughDecoder {
    fn decode(&mut self, packet: &Packet) -> Result<Option<Frame>, DecodeError> {
        if packet.is_config() {
            self.config = Some(packet.payload().clone());
            return Ok(None);
        }
        if self.config.is_none() {
            return Err(DecodeError::MissingConfig);
        }
        if packet.is_empty() {
            return Err(DecodeError::Corrupt("empty media packet".into()));
        }
        Ok(Some(Frame::new(
            packet.pts(),
            self.frame_size.width,
            self.frame_size.height,
            packet.payload().clone(),
        )))
    }
}

// ── DecodeDriver ─────────────────────────────────────────────────

/// Feeds packets to an engine and decoded frames to the buffer.
///
/// Recoverable engine errors skip the packet and bump a counter.
pub struct DecodeDriver {
    engine: Box<dyn DecodeEngine>,
    buffer: Arc<FrameBuffer>,
    errors: Arc<AtomicU64>,
    decoded: u64,
}

impl DecodeDriver {
    pub fn new(engine: Box<dyn DecodeEngine>, buffer: Arc<FrameBuffer>) -> Self {
        Self {
            engine,
            buffer,
            errors: Arc::new(AtomicU64::new(0)),
            decoded: 0,
        }
    }

    /// Shared counter of skipped packets, readable while the driver runs.
    pub fn error_counter(&self) -> Arc<AtomicU64> {
        Arc::clone(&self.errors)
    }

    pub fn decode_errors(&self) -> u64 {
        self.errors.load(Ordering::Relaxed)
    }

    /// Decode one packet. Only fatal engine errors are returned.
    pub fn feed(&mut self, packet: &Packet) -> Result<(), DecodeError> {
        match self.engine.decode(packet) {
            Ok(Some(frame)) => {
                self.decoded += 1;
                self.buffer.push(frame);
                Ok(())
            }
            Ok(None) => Ok(()),
            Err(e) if e.is_fatal() => Err(e),
            Err(e) => {
                let total = self.errors.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(error = %e, pts = packet.pts(), total, "skipping undecodable packet");
                Ok(())
            }
        }
    }

    /// Drain `rx` on a blocking thread until the sender goes away or
    /// the session ends.
    pub fn run_blocking(mut self, mut rx: mpsc::Receiver<Packet>, liveness: Liveness) {
        info!("decoder started");
        while let Some(packet) = rx.blocking_recv() {
            if liveness.is_terminated() {
                break;
            }
            if let Err(e) = self.feed(&packet) {
                error!(error = %e, "decoder failed");
                liveness.terminate(Terminal::Failed(e.to_string()));
                break;
            }
        }
        debug!(
            decoded = self.decoded,
            errors = self.decode_errors(),
            "decoder stopped"
        );
    }
}
