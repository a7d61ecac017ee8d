//! Animation timeline construction
//!
//! Converts a total audio duration plus the silence intervals found in it
//! into an ordered, contiguous sequence of speak/idle segments, each packed
//! with its own accordion cycle parameters. A timeline is built once per
//! audio response and never mutated afterwards.

use crate::events::Mode;
use crate::silence::SilenceScan;
use serde::{Deserialize, Serialize};
use smallvec::SmallVec;
use tracing::debug;

/// Timelines rarely exceed a handful of segments, so they live inline
type SegmentVec = SmallVec<[Segment; 8]>;

/// Nominal animation parameters shared by every timeline computation
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct AnimParams {
    /// Nominal frames per second of the sprite animation
    pub fps: u32,
    /// Number of frames in each sprite sheet
    pub frame_count: u32,
}

impl Default for AnimParams {
    fn default() -> Self {
        Self {
            fps: 30,
            frame_count: 150,
        }
    }
}

impl AnimParams {
    /// Duration of one frame in milliseconds
    pub fn frame_duration_ms(&self) -> f64 {
        1000.0 / self.fps as f64
    }
}

/// A timed span of the timeline with its accordion packing parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Segment {
    /// Sprite sheet this span plays from
    pub mode: Mode,
    /// Span start, seconds from audio start
    pub start: f64,
    /// Span end (exclusive), seconds from audio start
    pub end: f64,
    /// Full out-and-back cycles packed into the span, >= 1
    pub total_cycles: u32,
    /// Frames consumed by one full cycle at the nominal frame rate
    pub frames_per_cycle: f64,
    /// Frame reached at the apex of each cycle, in `[1, frame_count - 1]`
    pub max_frame: f64,
}

impl Segment {
    pub fn duration(&self) -> f64 {
        self.end - self.start
    }

    /// Whether `elapsed` (seconds from audio start) falls inside this span
    pub fn contains(&self, elapsed: f64) -> bool {
        elapsed >= self.start && elapsed < self.end
    }
}

/// Ordered, contiguous segments covering one response's effective duration
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    segments: SegmentVec,
}

impl Timeline {
    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// End of the last segment; zero for an empty timeline
    pub fn end_time(&self) -> f64 {
        self.segments.last().map_or(0.0, |s| s.end)
    }

    /// Linear scan for the segment containing `elapsed`, resuming from
    /// `hint`. Returns the segment index. Segment counts are small, so a
    /// forward scan is enough.
    pub fn segment_at(&self, elapsed: f64, hint: usize) -> Option<usize> {
        let from = hint.min(self.segments.len());
        self.segments[from..]
            .iter()
            .position(|s| s.contains(elapsed))
            .map(|i| from + i)
            .or_else(|| self.segments.iter().position(|s| s.contains(elapsed)))
    }
}

/// Build the timeline for one audio response.
///
/// The effective end time is the last sound timestamp when nonzero, which
/// drops the trailing speak span synthesized speech tends to leave over pure
/// silence. Zero-length spans are omitted, so the result can be empty when
/// the whole buffer was silent.
pub fn build_timeline(total_duration: f64, scan: &SilenceScan, params: &AnimParams) -> Timeline {
    let effective_end = if scan.last_sound_time > 0.0 {
        scan.last_sound_time.min(total_duration)
    } else {
        total_duration
    };

    let mut segments = SegmentVec::new();
    let mut cursor = 0.0f64;

    for silence in &scan.intervals {
        if silence.start > cursor {
            segments.push(pack_segment(Mode::Speak, cursor, silence.start, params));
        }
        if silence.end > silence.start {
            segments.push(pack_segment(Mode::Idle, silence.start, silence.end, params));
        }
        cursor = silence.end;
    }

    if cursor < effective_end {
        segments.push(pack_segment(Mode::Speak, cursor, effective_end, params));
    }

    debug!(
        "timeline: {} segment(s) over {:.3}s (audio {:.3}s)",
        segments.len(),
        segments.last().map_or(0.0, |s| s.end),
        total_duration
    );

    Timeline { segments }
}

/// Pack accordion cycles into one span.
///
/// Packs as many full-resolution cycles as fit, then adds one more
/// compressed cycle when the remainder is at least a second's worth of
/// frames, rather than leaving a truncated partial motion. Every span gets
/// at least one cycle so even very short segments animate once, and the
/// apex is clamped into the sprite range so it never overshoots and never
/// collapses to a frozen frame 0.
fn pack_segment(mode: Mode, start: f64, end: f64, params: &AnimParams) -> Segment {
    let duration = end - start;
    let total_frames = duration * params.fps as f64;

    // One full out-and-back at native resolution
    let full_cycle_frames = (params.frame_count * 2) as f64;
    let full_cycles = (total_frames / full_cycle_frames).floor() as u32;

    let total_cycles = if full_cycles == 0 {
        1
    } else {
        let remaining = total_frames - full_cycles as f64 * full_cycle_frames;
        if remaining >= params.fps as f64 {
            full_cycles + 1
        } else {
            full_cycles
        }
    };
    let total_cycles = total_cycles.max(1);

    let frames_per_cycle = total_frames / total_cycles as f64;
    let max_frame = (frames_per_cycle / 2.0)
        .min((params.frame_count - 1) as f64)
        .max(1.0);

    Segment {
        mode,
        start,
        end,
        total_cycles,
        frames_per_cycle,
        max_frame,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::silence::SilenceInterval;

    fn scan(intervals: &[(f64, f64)], last_sound_time: f64) -> SilenceScan {
        SilenceScan {
            intervals: intervals
                .iter()
                .map(|&(start, end)| SilenceInterval { start, end })
                .collect(),
            last_sound_time,
        }
    }

    fn assert_contiguous(tl: &Timeline) {
        for w in tl.segments().windows(2) {
            assert_eq!(w[0].end, w[1].start, "gap or overlap between segments");
        }
        if let Some(first) = tl.segments().first() {
            assert_eq!(first.start, 0.0);
        }
    }

    fn assert_packing_bounds(tl: &Timeline, params: &AnimParams) {
        for seg in tl.segments() {
            assert!(seg.total_cycles >= 1);
            assert!(seg.frames_per_cycle > 0.0);
            assert!(seg.max_frame >= 1.0);
            assert!(seg.max_frame <= (params.frame_count - 1) as f64);
            assert!(seg.duration() > 0.0);
        }
    }

    #[test]
    fn five_second_audio_with_one_pause() {
        let params = AnimParams::default();
        let tl = build_timeline(5.0, &scan(&[(2.0, 3.0)], 5.0), &params);

        let modes: Vec<(Mode, f64, f64)> =
            tl.segments().iter().map(|s| (s.mode, s.start, s.end)).collect();
        assert_eq!(
            modes,
            vec![
                (Mode::Speak, 0.0, 2.0),
                (Mode::Idle, 2.0, 3.0),
                (Mode::Speak, 3.0, 5.0),
            ]
        );
        assert_contiguous(&tl);
        assert_packing_bounds(&tl, &params);
    }

    #[test]
    fn very_short_audio_gets_one_compressed_cycle() {
        let params = AnimParams::default();
        let tl = build_timeline(0.1, &scan(&[], 0.1), &params);

        assert_eq!(tl.segments().len(), 1);
        let seg = tl.segments()[0];
        assert_eq!(seg.mode, Mode::Speak);
        assert_eq!(seg.total_cycles, 1);
        // 0.1s * 30fps / 2 = 1.5 frames at the apex
        assert!((seg.max_frame - 1.5).abs() < 1e-9);
        assert_packing_bounds(&tl, &params);
    }

    #[test]
    fn trailing_silence_is_trimmed_by_last_sound_time() {
        let params = AnimParams::default();
        // Speech ends at 4.2s, detector found trailing silence [4.2, 6.0)
        let tl = build_timeline(6.0, &scan(&[(4.2, 6.0)], 4.2), &params);

        // The idle segment covering the trailing silence is still stored;
        // no speak segment is emitted past the last sound.
        assert_eq!(tl.segments().len(), 2);
        assert_eq!(tl.segments()[0].mode, Mode::Speak);
        assert_eq!(tl.segments()[1].mode, Mode::Idle);
        assert_eq!(tl.segments()[1].end, 6.0);
    }

    #[test]
    fn silence_at_start_yields_leading_idle_segment() {
        let params = AnimParams::default();
        let tl = build_timeline(4.0, &scan(&[(0.0, 1.0)], 4.0), &params);
        assert_eq!(tl.segments()[0].mode, Mode::Idle);
        assert_eq!(tl.segments()[0].start, 0.0);
        assert_eq!(tl.segments()[1].mode, Mode::Speak);
        assert_contiguous(&tl);
    }

    #[test]
    fn fully_silent_audio_yields_idle_only() {
        let params = AnimParams::default();
        // last_sound_time == 0: whole buffer below threshold
        let tl = build_timeline(3.0, &scan(&[(0.0, 3.0)], 0.0), &params);
        // A single idle segment covering the silence is all that remains
        assert!(tl.segments().iter().all(|s| s.mode == Mode::Idle));
    }

    #[test]
    fn long_segment_packs_multiple_full_cycles() {
        let params = AnimParams::default();
        // 25s at 30fps = 750 frames; full cycle = 300 frames -> 2 full
        // cycles, remainder 150 >= 30 -> 3 cycles total
        let tl = build_timeline(25.0, &scan(&[], 25.0), &params);
        let seg = tl.segments()[0];
        assert_eq!(seg.total_cycles, 3);
        assert!((seg.frames_per_cycle - 250.0).abs() < 1e-9);
        assert!((seg.max_frame - 125.0).abs() < 1e-9);
    }

    #[test]
    fn small_remainder_does_not_add_a_cycle() {
        let params = AnimParams::default();
        // 20.5s at 30fps = 615 frames; 2 full cycles, remainder 15 < 30
        let tl = build_timeline(20.5, &scan(&[], 20.5), &params);
        assert_eq!(tl.segments()[0].total_cycles, 2);
    }

    #[test]
    fn segment_lookup_resumes_from_hint() {
        let params = AnimParams::default();
        let tl = build_timeline(5.0, &scan(&[(2.0, 3.0)], 5.0), &params);

        assert_eq!(tl.segment_at(0.5, 0), Some(0));
        assert_eq!(tl.segment_at(2.5, 0), Some(1));
        assert_eq!(tl.segment_at(4.0, 1), Some(2));
        // Stale hint past the target still finds the segment
        assert_eq!(tl.segment_at(0.5, 2), Some(0));
        assert_eq!(tl.segment_at(5.0, 0), None);
    }
}
