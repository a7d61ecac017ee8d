//! Silence detection over decoded audio samples
//!
//! Scans a mono sample buffer in fixed 50 ms windows, comparing the mean
//! absolute amplitude of each window against a threshold, and emits the
//! silence runs long enough to switch the avatar into its idle loop.
//! Shorter runs are natural pauses within speech and are discarded.

use tracing::debug;

/// Mean absolute amplitude below which a window counts as silent
pub const SILENCE_THRESHOLD: f32 = 0.02;

/// Analysis window length in seconds (50 ms)
pub const WINDOW_SECS: f64 = 0.05;

/// Configuration for silence detection
#[derive(Debug, Clone)]
pub struct SilenceConfig {
    /// Minimum length of a silence run, in seconds, for it to be emitted
    /// as an interval rather than ignored as an in-speech pause
    pub min_silence_duration: f64,
}

impl Default for SilenceConfig {
    fn default() -> Self {
        Self {
            min_silence_duration: 0.7,
        }
    }
}

/// A half-open `[start, end)` span of silence, in seconds
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SilenceInterval {
    pub start: f64,
    pub end: f64,
}

impl SilenceInterval {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }
}

/// Result of scanning one sample buffer
#[derive(Debug, Clone, Default)]
pub struct SilenceScan {
    /// Emitted intervals, ordered by start, non-overlapping by construction
    pub intervals: Vec<SilenceInterval>,

    /// End timestamp of the last window at or above the threshold. Zero when
    /// the whole buffer is silent. Used to trim trailing silence from the
    /// effective timeline.
    pub last_sound_time: f64,
}

/// Scan a mono sample buffer for silence runs.
///
/// Deterministic: the result depends only on the inputs, no state survives
/// across calls. Windows are consecutive and non-overlapping; a trailing
/// partial window is analysed at its actual length.
pub fn detect_silence(samples: &[f32], sample_rate: u32, cfg: &SilenceConfig) -> SilenceScan {
    let mut scan = SilenceScan::default();
    if samples.is_empty() || sample_rate == 0 {
        return scan;
    }

    let window_size = ((sample_rate as f64) * WINDOW_SECS).floor() as usize;
    let window_size = window_size.max(1);
    let rate = sample_rate as f64;
    let total_duration = samples.len() as f64 / rate;

    // Start timestamp of the currently open silence run, if any
    let mut run_start: Option<f64> = None;

    let mut i = 0usize;
    while i < samples.len() {
        let end = (i + window_size).min(samples.len());
        let sum: f32 = samples[i..end].iter().map(|s| s.abs()).sum();
        let average = sum / (end - i) as f32;
        let window_time = i as f64 / rate;

        if average < SILENCE_THRESHOLD {
            if run_start.is_none() {
                run_start = Some(window_time);
            }
        } else {
            scan.last_sound_time = window_time + window_size as f64 / rate;
            if let Some(start) = run_start.take() {
                if window_time - start >= cfg.min_silence_duration {
                    scan.intervals.push(SilenceInterval {
                        start,
                        end: window_time,
                    });
                }
            }
        }

        i += window_size;
    }

    // Run still open at end of buffer: close against the total duration
    if let Some(start) = run_start {
        if total_duration - start >= cfg.min_silence_duration {
            scan.intervals.push(SilenceInterval {
                start,
                end: total_duration,
            });
        }
    }

    debug!(
        "silence scan: {} interval(s), last sound at {:.3}s of {:.3}s",
        scan.intervals.len(),
        scan.last_sound_time,
        total_duration
    );

    scan
}
