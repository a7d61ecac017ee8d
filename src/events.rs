//! Shared event and state types for the animation engine

use crate::engine::PreparedPlayback;

/// Which sprite sheet the avatar is currently drawn from
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Breathing loop / pauses
    Idle,
    /// Mouth-moving loop during voiced audio
    Speak,
}

/// Frame-change notification emitted to the rendering sink.
///
/// The engine only emits on change; the sink maps `(mode, frame)` to an
/// image resource and must tolerate duplicates.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FrameUpdate {
    /// Sprite frame index, `0..FRAME_COUNT`
    pub frame: u32,
    /// Sprite sheet to draw from
    pub mode: Mode,
}

/// Which sub-state-machine owns the recurring scheduling tick.
///
/// Exactly one is active at any time; starting a phase cancels the other
/// phases' pending ticks.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SchedulerPhase {
    /// Full or half accordion loop while nothing is queued
    IdleLoop,
    /// "Thinking" animation between request sent and audio ready
    Waiting,
    /// Monotonic descent to frame 0 before playback starts
    ReturningToZero,
    /// Audio-clock-driven timeline playback
    TimelinePlayback,
}

/// Request-lifecycle events sent from the host into the engine driver
#[derive(Debug)]
pub enum ControlEvent {
    /// User input was dispatched; enter the wait animation
    RequestSent,
    /// Decoded audio and its timeline are ready to play
    AudioReady(PreparedPlayback),
    /// The request failed before audio was ready; abort to idle
    RequestFailed,
    /// Queue a switch to the half-amplitude idle accordion (applied at the
    /// next zero-crossing, never mid-swing)
    SetHalfAccordion(bool),
    /// Stop the driver loop
    Shutdown,
}
