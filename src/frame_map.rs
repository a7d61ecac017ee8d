//! Time-to-frame quantization
//!
//! Maps elapsed playback time within a segment to a discrete sprite frame
//! via a triangular (ping-pong) waveform: a linear ramp from 0 up to the
//! segment's apex and back, repeating every `frames_per_cycle` frames. The
//! modulo repeats the cycle as many times as fit, so `total_cycles` only
//! mattered for packing, not for mapping.

use crate::timeline::Segment;

/// Map elapsed playback time (seconds from audio start) to the sprite frame
/// to show for `segment`. The result is always within
/// `[0, floor(segment.max_frame)]`.
pub fn map_time(segment: &Segment, elapsed: f64, fps: u32) -> u32 {
    let time_in_segment = elapsed - segment.start;
    let frames_elapsed = time_in_segment * fps as f64;

    let position = frames_elapsed.rem_euclid(segment.frames_per_cycle);
    let half = segment.frames_per_cycle / 2.0;

    let frame = if position < half {
        // Outbound leg: 0 -> max_frame
        ((position / half) * segment.max_frame).floor()
    } else {
        // Return leg: max_frame -> 0
        (segment.max_frame - ((position - half) / half) * segment.max_frame).floor()
    };

    let ceiling = segment.max_frame.floor();
    frame.clamp(0.0, ceiling) as u32
}
