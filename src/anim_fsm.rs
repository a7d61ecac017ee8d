//! Pure animation state machines
//!
//! Three mutually exclusive machines own the avatar's motion: the idle
//! accordion loop, the response-wait animation, and audio-synchronized
//! timeline playback. Each is a plain synchronous object advanced by the
//! engine driver's recurring tick, so their transition logic is fully
//! deterministic and unit-testable without a timer.

use crate::events::FrameUpdate;
use crate::frame_map::map_time;
use crate::timeline::Timeline;
use tracing::debug;

/// Lower bound of the wait machine's sustain loop; also the ease-in target.
/// Distinct from the eventual rest position 0.
pub const SUSTAIN_MIN: u32 = 10;

/// `[floor, ceil]` of the sustain ping-pong for a sheet of `frame_count`
/// frames. The nominal band is `[SUSTAIN_MIN, frame_count - 1 - SUSTAIN_MIN]`;
/// for sheets too small to carry the margins it degenerates to a single
/// in-range frame instead of wrapping.
fn sustain_bounds(frame_count: u32) -> (u32, u32) {
    let top = frame_count.saturating_sub(1);
    let floor = SUSTAIN_MIN.min(top);
    let ceil = frame_count.saturating_sub(1 + SUSTAIN_MIN).max(floor);
    (floor, ceil)
}

// ---------------------------------------------------------------------------
// Idle accordion loop
// ---------------------------------------------------------------------------

/// Outcome of one idle-loop frame advance
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IdleStep {
    /// Frame to show after the advance
    pub frame: u32,
    /// True when this advance bounced off frame 0 (safe point for deferred
    /// switches and for starting pending playback)
    pub at_origin: bool,
}

/// Ping-pong accordion over the idle sprite sheet, full or half amplitude.
///
/// The half-amplitude switch is queued and applied only at the zero
/// crossing so the change never happens mid-swing.
#[derive(Debug)]
pub struct IdleLoop {
    frame: u32,
    direction: i32,
    half_accordion: bool,
    pending_half: Option<bool>,
    frame_count: u32,
}

impl IdleLoop {
    pub fn new(frame_count: u32) -> Self {
        Self {
            frame: 0,
            direction: 1,
            half_accordion: false,
            pending_half: None,
            frame_count,
        }
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    pub fn direction(&self) -> i32 {
        self.direction
    }

    pub fn is_half_accordion(&self) -> bool {
        self.half_accordion
    }

    /// Queue an amplitude change, consumed at the next zero crossing
    pub fn request_half_accordion(&mut self, half: bool) {
        self.pending_half = Some(half);
    }

    fn max_frame(&self) -> u32 {
        if self.half_accordion {
            (self.frame_count / 2).saturating_sub(1)
        } else {
            self.frame_count.saturating_sub(1)
        }
    }

    /// Advance one frame in the current direction. Direction flips on
    /// arrival at either end, so one full cycle is exactly
    /// `2 * max_frame` ticks and the endpoints are never shown twice.
    pub fn step(&mut self) -> IdleStep {
        let mut at_origin = false;
        let next = self.frame as i64 + self.direction as i64;
        let max = self.max_frame() as i64;

        if self.direction == 1 && next >= max {
            self.frame = max as u32;
            self.direction = -1;
        } else if self.direction == -1 && next <= 0 {
            self.frame = 0;
            self.direction = 1;
            at_origin = true;
            if let Some(half) = self.pending_half.take() {
                debug!("idle loop: applying half-accordion={half} at zero crossing");
                self.half_accordion = half;
            }
        } else {
            self.frame = next as u32;
        }

        IdleStep {
            frame: self.frame,
            at_origin,
        }
    }
}

// ---------------------------------------------------------------------------
// Response wait animation
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitPhase {
    /// Forward ramp from rest up into the sustain band
    EaseIn,
    /// Ping-pong inside the sustain band while the response is pending
    Sustain,
    /// Monotonic descent to frame 0 once audio is ready
    ReturnToZero,
}

/// Outcome of one wait-machine tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStep {
    /// Frame advanced (or held); keep ticking
    Frame(u32),
    /// Reached frame 0 with audio ready; timeline playback may start
    ReachedOrigin,
}

/// "Thinking" animation bridging user input and audio playback.
///
/// Eases in from rest, sustains a ping-pong away from the rest position,
/// then descends deterministically to frame 0 the moment audio is ready so
/// playback always starts from a known origin. The readiness flag is polled
/// once per tick before any frame advance, so the descent also preempts the
/// ease-in.
#[derive(Debug)]
pub struct ResponseWait {
    frame: u32,
    direction: i32,
    phase: WaitPhase,
    audio_ready: bool,
    frame_count: u32,
}

impl ResponseWait {
    pub fn new(frame_count: u32) -> Self {
        Self::from_frame(0, frame_count)
    }

    /// Begin the wait animation from wherever the previous phase left the
    /// avatar: below the sustain band it eases in, inside or above it the
    /// sustain ping-pong takes over directly.
    pub fn from_frame(frame: u32, frame_count: u32) -> Self {
        let (floor, ceil) = sustain_bounds(frame_count);
        let (phase, direction) = if frame < floor {
            (WaitPhase::EaseIn, 1)
        } else if frame > ceil {
            (WaitPhase::Sustain, -1)
        } else {
            (WaitPhase::Sustain, 1)
        };
        Self {
            frame,
            direction,
            phase,
            audio_ready: false,
            frame_count,
        }
    }

    /// Resume from an arbitrary frame, used when a phase hands over while
    /// the avatar is away from rest and only the descent is wanted.
    pub fn returning_from(frame: u32, frame_count: u32) -> Self {
        Self {
            frame,
            direction: -1,
            phase: WaitPhase::ReturnToZero,
            audio_ready: true,
            frame_count,
        }
    }

    pub fn frame(&self) -> u32 {
        self.frame
    }

    /// Whether the machine is in its terminal descent
    pub fn is_returning(&self) -> bool {
        self.phase == WaitPhase::ReturnToZero
    }

    /// Audio became ready; force the descent regardless of current frame or
    /// direction. Takes effect on the next tick.
    pub fn notify_audio_ready(&mut self) {
        self.audio_ready = true;
    }

    fn sustain_bounds(&self) -> (u32, u32) {
        sustain_bounds(self.frame_count)
    }

    /// Advance one tick
    pub fn step(&mut self) -> WaitStep {
        if self.audio_ready && self.phase != WaitPhase::ReturnToZero {
            debug!("wait: audio ready at frame {}, returning to zero", self.frame);
            self.phase = WaitPhase::ReturnToZero;
            self.direction = -1;
        }

        match self.phase {
            WaitPhase::EaseIn => {
                let (floor, _) = self.sustain_bounds();
                self.frame += 1;
                if self.frame >= floor {
                    self.frame = floor;
                    self.phase = WaitPhase::Sustain;
                    self.direction = 1;
                }
                WaitStep::Frame(self.frame)
            }
            WaitPhase::Sustain => {
                let (floor, ceil) = self.sustain_bounds();
                let next = self.frame as i64 + self.direction as i64;
                if self.direction == 1 && next >= ceil as i64 {
                    self.frame = ceil;
                    self.direction = -1;
                } else if self.direction == -1 && next <= floor as i64 {
                    self.frame = floor;
                    self.direction = 1;
                } else {
                    self.frame = next as u32;
                }
                WaitStep::Frame(self.frame)
            }
            WaitPhase::ReturnToZero => {
                if self.frame == 0 {
                    WaitStep::ReachedOrigin
                } else {
                    self.frame -= 1;
                    if self.frame == 0 {
                        WaitStep::ReachedOrigin
                    } else {
                        WaitStep::Frame(self.frame)
                    }
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Timeline playback
// ---------------------------------------------------------------------------

/// Outcome of one playback tick
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlaybackStep {
    /// The visible frame or sprite sheet changed
    Changed(FrameUpdate),
    /// Same frame as the previous tick; nothing to emit
    Unchanged,
    /// Elapsed time ran past the audio; stop ticking
    Finished,
}

/// Maps the live audio clock onto the prepared timeline, one lookup and one
/// triangular-wave quantization per tick.
///
/// Runs for the full audio duration, not just the timeline: when trailing
/// silence shorter than the silence minimum was trimmed from the timeline,
/// the last frame is held until the audio tail actually ends.
#[derive(Debug)]
pub struct TimelinePlayback {
    timeline: Timeline,
    total_duration: f64,
    fps: u32,
    segment_hint: usize,
    last: Option<FrameUpdate>,
}

impl TimelinePlayback {
    pub fn new(timeline: Timeline, total_duration: f64, fps: u32) -> Self {
        let total_duration = total_duration.max(timeline.end_time());
        Self {
            timeline,
            total_duration,
            fps,
            segment_hint: 0,
            last: None,
        }
    }

    pub fn last_update(&self) -> Option<FrameUpdate> {
        self.last
    }

    /// Advance to `elapsed` seconds of audio playback
    pub fn step(&mut self, elapsed: f64) -> PlaybackStep {
        if elapsed >= self.total_duration || self.timeline.is_empty() {
            return PlaybackStep::Finished;
        }

        let Some(idx) = self.timeline.segment_at(elapsed, self.segment_hint) else {
            // Past the last segment but the audio is still playing: hold
            return PlaybackStep::Unchanged;
        };
        self.segment_hint = idx;
        let segment = self.timeline.segments()[idx];

        let update = FrameUpdate {
            frame: map_time(&segment, elapsed, self.fps),
            mode: segment.mode,
        };

        if self.last == Some(update) {
            PlaybackStep::Unchanged
        } else {
            if self.last.map(|u| u.mode) != Some(update.mode) {
                debug!("playback: mode -> {:?} at {:.3}s", update.mode, elapsed);
            }
            self.last = Some(update);
            PlaybackStep::Changed(update)
        }
    }
}
