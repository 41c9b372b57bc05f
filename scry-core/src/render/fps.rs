//! Rolling frames-per-second counter for the renderer.
//!
//! Records the instant of each presented frame over a one-second
//! window. When enabled it logs `N fps (+M frames skipped)` once per
//! interval, where skipped frames are those the buffer discarded.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use tracing::info;

/// Rolling-window frame counter.
#[derive(Debug)]
pub struct FpsCounter {
    /// Presentation instants inside the window.
    samples: VecDeque<Instant>,
    window: Duration,
    enabled: bool,
    /// Frames skipped since the last report.
    skipped: u64,
    last_report: Option<Instant>,
}

impl FpsCounter {
    pub fn new(enabled: bool) -> Self {
        Self::with_window(enabled, Duration::from_secs(1))
    }

    pub fn with_window(enabled: bool, window: Duration) -> Self {
        Self {
            samples: VecDeque::with_capacity(128),
            window,
            enabled,
            skipped: 0,
            last_report: None,
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Flip reporting on or off; returns the new state.
    pub fn toggle(&mut self) -> bool {
        self.enabled = !self.enabled;
        self.last_report = None;
        self.skipped = 0;
        info!("fps counter {}", if self.enabled { "started" } else { "stopped" });
        self.enabled
    }

    pub fn frame_rendered(&mut self) {
        self.frame_rendered_at(Instant::now());
    }

    /// Record a presentation with an explicit timestamp (useful for testing).
    pub fn frame_rendered_at(&mut self, when: Instant) {
        self.samples.push_back(when);
        self.evict(when);
    }

    pub fn frames_skipped(&mut self, count: u64) {
        self.skipped += count;
    }

    /// Frames presented within the window ending at `now`.
    pub fn fps_at(&mut self, now: Instant) -> usize {
        self.evict(now);
        self.samples.len()
    }

    /// Log a report if one is due. Returns `(fps, skipped)` when it did.
    pub fn report(&mut self) -> Option<(usize, u64)> {
        self.report_at(Instant::now())
    }

    pub fn report_at(&mut self, now: Instant) -> Option<(usize, u64)> {
        if !self.enabled {
            return None;
        }
        let Some(last) = self.last_report else {
            self.last_report = Some(now);
            return None;
        };
        if now.duration_since(last) < self.window {
            return None;
        }
        let fps = self.fps_at(now);
        let skipped = std::mem::take(&mut self.skipped);
        self.last_report = Some(now);
        info!("{fps} fps (+{skipped} frames skipped)");
        Some((fps, skipped))
    }

    // ── Internal ─────────────────────────────────────────────────

    fn evict(&mut self, now: Instant) {
        while let Some(&ts) = self.samples.front() {
            if now.duration_since(ts) > self.window {
                self.samples.pop_front();
            } else {
                break;
            }
        }
    }
}

impl Default for FpsCounter {
    fn default() -> Self {
        Self::new(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_frames_in_window() {
        let mut fps = FpsCounter::new(true);
        let t0 = Instant::now();
        for i in 0..30 {
            fps.frame_rendered_at(t0 + Duration::from_millis(i * 10));
        }
        assert_eq!(fps.fps_at(t0 + Duration::from_millis(300)), 30);
        assert_eq!(fps.fps_at(t0 + Duration::from_millis(1250)), 3);
    }

    #[test]
    fn reports_once_per_window() {
        let mut fps = FpsCounter::new(true);
        let t0 = Instant::now();
        assert_eq!(fps.report_at(t0), None);
        fps.frame_rendered_at(t0 + Duration::from_millis(500));
        fps.frames_skipped(4);
        assert_eq!(fps.report_at(t0 + Duration::from_millis(900)), None);
        assert_eq!(fps.report_at(t0 + Duration::from_millis(1000)), Some((1, 4)));
        assert_eq!(fps.report_at(t0 + Duration::from_millis(1500)), None);
    }

    #[test]
    fn disabled_never_reports() {
        let mut fps = FpsCounter::default();
        let t0 = Instant::now();
        fps.report_at(t0);
        assert_eq!(fps.report_at(t0 + Duration::from_secs(5)), None);
        assert!(fps.toggle());
    }
}
