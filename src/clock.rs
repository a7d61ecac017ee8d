//! Time sources for the animation schedulers
//!
//! During timeline playback the live audio clock is the single source of
//! truth for elapsed time; everywhere else a coarser wall clock paces frame
//! advances. Both are behind small traits so the state machines can be
//! driven deterministically in tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Monotonic time source anchored at the instant audio playback starts
pub trait PlaybackClock: Send {
    /// Seconds elapsed since playback started
    fn elapsed_secs(&self) -> f64;
}

/// Wall-clock playback timing, anchored at construction
#[derive(Debug)]
pub struct WallClock {
    started: Instant,
}

impl WallClock {
    pub fn start() -> Self {
        Self {
            started: Instant::now(),
        }
    }
}

impl PlaybackClock for WallClock {
    fn elapsed_secs(&self) -> f64 {
        self.started.elapsed().as_secs_f64()
    }
}

/// Manually advanced clock for deterministic tests. Cloning shares the
/// underlying time, so a test can hold one handle while the scheduler owns
/// the other.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    micros: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance_secs(&self, secs: f64) {
        self.micros
            .fetch_add((secs * 1e6).round() as u64, Ordering::SeqCst);
    }

    pub fn set_secs(&self, secs: f64) {
        self.micros.store((secs * 1e6).round() as u64, Ordering::SeqCst);
    }
}

impl PlaybackClock for ManualClock {
    fn elapsed_secs(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1e6
    }
}

/// Frame-advance pacing against a coarse tick clock.
///
/// Advances once per frame duration, carrying the remainder
/// (`elapsed mod frame_duration`) instead of resetting outright so
/// scheduling jitter does not accumulate drift.
#[derive(Debug)]
pub struct FramePacer {
    frame_duration_ms: f64,
    last_advance_ms: f64,
}

impl FramePacer {
    pub fn new(frame_duration_ms: f64, now_ms: f64) -> Self {
        Self {
            frame_duration_ms,
            last_advance_ms: now_ms,
        }
    }

    /// Whether a frame advance is due at `now_ms`. On a due tick the
    /// reference point moves to `now - (elapsed mod frame_duration)`.
    pub fn due(&mut self, now_ms: f64) -> bool {
        let elapsed = now_ms - self.last_advance_ms;
        if elapsed >= self.frame_duration_ms {
            self.last_advance_ms = now_ms - elapsed.rem_euclid(self.frame_duration_ms);
            true
        } else {
            false
        }
    }

    /// Re-anchor without advancing, used when a new phase takes over the tick
    pub fn reset(&mut self, now_ms: f64) {
        self.last_advance_ms = now_ms;
    }
}
