//! Decoded frames and the buffer between the decode and render sides.
//!
//! The buffer is the only state shared between those two tasks. Both
//! `push` and `take` are non-blocking; the renderer waits on
//! [`FrameBuffer::notified`] instead of polling.

use std::collections::VecDeque;

use bytes::Bytes;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::{debug, warn};

/// Queue length above which lossless mode starts warning.
const LOSSLESS_WARN_DEPTH: usize = 64;

/// One decoded picture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// Presentation timestamp in microseconds.
    pub pts: u64,
    pub width: u32,
    pub height: u32,
    pub data: Bytes,
}

impl Frame {
    pub fn new(pts: u64, width: u32, height: u32, data: Bytes) -> Self {
        Self {
            pts,
            width,
            height,
            data,
        }
    }
}

/// What happens to a frame nobody has taken yet when the next one arrives.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FramePolicy {
    /// Keep only the newest frame.
    #[default]
    LatestOnly,
    /// Keep everything, oldest first. Memory is unbounded.
    Lossless,
}

// ── FrameSlot ────────────────────────────────────────────────────

#[derive(Debug)]
enum FrameSlot {
    Latest(Option<Frame>),
    Queue(VecDeque<Frame>),
}

impl FrameSlot {
    fn new(policy: FramePolicy) -> Self {
        match policy {
            FramePolicy::LatestOnly => FrameSlot::Latest(None),
            FramePolicy::Lossless => FrameSlot::Queue(VecDeque::new()),
        }
    }

    /// Store `frame`; returns the frame it displaced, if any.
    fn put(&mut self, frame: Frame) -> Option<Frame> {
        match self {
            FrameSlot::Latest(slot) => slot.replace(frame),
            FrameSlot::Queue(queue) => {
                queue.push_back(frame);
                None
            }
        }
    }

    fn get(&mut self) -> Option<Frame> {
        match self {
            FrameSlot::Latest(slot) => slot.take(),
            FrameSlot::Queue(queue) => queue.pop_front(),
        }
    }

    fn len(&self) -> usize {
        match self {
            FrameSlot::Latest(slot) => slot.is_some() as usize,
            FrameSlot::Queue(queue) => queue.len(),
        }
    }
}

// ── FrameBuffer ──────────────────────────────────────────────────

#[derive(Debug)]
struct Inner {
    slot: FrameSlot,
    last_taken: Option<u64>,
    /// Frames discarded without being presented, lifetime total.
    dropped: u64,
    /// Same, since the last `take_skipped` call.
    skipped: u64,
    warn_depth: usize,
}

/// Synchronized frame storage with a fixed drop policy.
#[derive(Debug)]
pub struct FrameBuffer {
    policy: FramePolicy,
    inner: Mutex<Inner>,
    notify: Notify,
}

impl FrameBuffer {
    pub fn new(policy: FramePolicy) -> Self {
        if policy == FramePolicy::Lossless {
            warn!("lossless frame buffering enabled; memory grows without bound if rendering falls behind");
        }
        Self {
            policy,
            inner: Mutex::new(Inner {
                slot: FrameSlot::new(policy),
                last_taken: None,
                dropped: 0,
                skipped: 0,
                warn_depth: LOSSLESS_WARN_DEPTH,
            }),
            notify: Notify::new(),
        }
    }

    pub fn policy(&self) -> FramePolicy {
        self.policy
    }

    /// Store a frame and wake the renderer. Never blocks on the consumer.
    pub fn push(&self, frame: Frame) {
        {
            let mut inner = self.inner.lock();
            if let Some(stale) = inner.slot.put(frame) {
                inner.dropped += 1;
                inner.skipped += 1;
                debug!(pts = stale.pts, "frame replaced before presentation");
            }
            let depth = inner.slot.len();
            if depth > inner.warn_depth {
                warn!(depth, "frame queue keeps growing; renderer is falling behind");
                inner.warn_depth = depth.saturating_mul(2);
            }
        }
        self.notify.notify_one();
    }

    /// The next frame to present, or `None` when nothing is pending.
    ///
    /// Never returns a frame older than the previous one returned;
    /// such frames are counted as dropped.
    pub fn take(&self) -> Option<Frame> {
        let mut inner = self.inner.lock();
        while let Some(frame) = inner.slot.get() {
            if inner.last_taken.is_some_and(|last| frame.pts < last) {
                inner.dropped += 1;
                inner.skipped += 1;
                debug!(pts = frame.pts, "discarding frame older than last presented");
                continue;
            }
            inner.last_taken = Some(frame.pts);
            if inner.slot.len() <= LOSSLESS_WARN_DEPTH {
                inner.warn_depth = LOSSLESS_WARN_DEPTH;
            }
            return Some(frame);
        }
        None
    }

    /// Resolves after the next `push`, or immediately if one happened
    /// since the last wakeup.
    pub async fn notified(&self) {
        self.notify.notified().await
    }

    pub fn pending(&self) -> usize {
        self.inner.lock().slot.len()
    }

    pub fn dropped_count(&self) -> u64 {
        self.inner.lock().dropped
    }

    /// Frames dropped since the previous call.
    pub fn take_skipped(&self) -> u64 {
        std::mem::take(&mut self.inner.lock().skipped)
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new(FramePolicy::default())
    }
}

// ── Tests ────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    fn frame(pts: u64) -> Frame {
        Frame::new(pts, 4, 4, Bytes::from_static(&[0; 4]))
    }

    #[test]
    fn latest_only_keeps_newest() {
        let buf = FrameBuffer::new(FramePolicy::LatestOnly);
        assert!(buf.take().is_none());
        for pts in [1000, 1016, 1033] {
            buf.push(frame(pts));
        }
        assert_eq!(buf.take().map(|f| f.pts), Some(1033));
        assert!(buf.take().is_none());
        assert_eq!(buf.dropped_count(), 2);
        assert_eq!(buf.take_skipped(), 2);
        assert_eq!(buf.take_skipped(), 0);
    }

    #[test]
    fn latest_only_interleaved_never_shows_intermediates() {
        let buf = FrameBuffer::new(FramePolicy::LatestOnly);
        let mut seen = Vec::new();
        for pts in 0..100u64 {
            buf.push(frame(pts));
            if pts % 7 == 0 {
                if let Some(f) = buf.take() {
                    assert_eq!(f.pts, pts);
                    seen.push(f.pts);
                }
            }
        }
        assert!(seen.windows(2).all(|w| w[0] < w[1]));
    }

    #[test]
    fn lossless_is_fifo() {
        let buf = FrameBuffer::new(FramePolicy::Lossless);
        for pts in 0..200u64 {
            buf.push(frame(pts));
        }
        assert_eq!(buf.pending(), 200);
        let out: Vec<u64> = std::iter::from_fn(|| buf.take()).map(|f| f.pts).collect();
        assert_eq!(out, (0..200).collect::<Vec<_>>());
        assert_eq!(buf.dropped_count(), 0);
    }

    #[test]
    fn take_is_monotonic() {
        for policy in [FramePolicy::LatestOnly, FramePolicy::Lossless] {
            let buf = FrameBuffer::new(policy);
            buf.push(frame(50));
            assert_eq!(buf.take().unwrap().pts, 50);
            buf.push(frame(40));
            buf.push(frame(60));
            assert_eq!(buf.take().unwrap().pts, 60, "{policy:?}");
            assert!(buf.take().is_none());
        }
    }

    #[tokio::test]
    async fn push_wakes_waiter() {
        let buf = Arc::new(FrameBuffer::default());
        let waiter = {
            let buf = Arc::clone(&buf);
            tokio::spawn(async move {
                buf.notified().await;
                buf.take()
            })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        buf.push(frame(7));
        let got = tokio::time::timeout(Duration::from_secs(1), waiter)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(got.map(|f| f.pts), Some(7));
    }
}
