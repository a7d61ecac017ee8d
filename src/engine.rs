//! Engine driver: phase ownership, frame pacing, and the tokio loop
//!
//! `AvatarEngine` owns exactly one animation phase at a time and mutates it
//! only from `tick`/`handle_control`, so phase transitions can never race:
//! replacing the `Phase` value wholesale is the cancellation discipline.
//! The synchronous core is driven either by the async `run` loop (real
//! timer, wall clock) or directly by tests (manual clock).

use crate::anim_fsm::{IdleLoop, PlaybackStep, ResponseWait, TimelinePlayback, WaitStep, SUSTAIN_MIN};
use crate::audio::{decode_wav_bytes, AudioOutput, DecodeError, SampleBuffer};
use crate::clock::{FramePacer, PlaybackClock};
use crate::events::{ControlEvent, FrameUpdate, Mode, SchedulerPhase};
use crate::silence::{detect_silence, SilenceConfig};
use crate::timeline::{build_timeline, AnimParams, Timeline};
use serde::{Deserialize, Serialize};
use std::time::Instant;
use tokio::sync::mpsc;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

/// Smallest sprite sheet for which the wait animation's sustain band keeps
/// its margin on both sides
pub const MIN_FRAME_COUNT: u32 = 2 * (SUSTAIN_MIN + 1);

/// Rejected host configuration
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("fps must be at least 1")]
    ZeroFps,

    #[error("frame_count must be at least {MIN_FRAME_COUNT}, got {0}")]
    FrameCountTooSmall(u32),

    #[error("min_silence_duration must be positive, got {0}")]
    BadSilenceDuration(f64),
}

/// Host-configurable engine parameters
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Nominal sprite animation frame rate
    pub fps: u32,
    /// Frames per sprite sheet
    pub frame_count: u32,
    /// Minimum silence run length (seconds) that switches the avatar to its
    /// idle loop mid-response. Read at `prepare_playback` time only, never
    /// mid-playback.
    pub min_silence_duration: f64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fps: 30,
            frame_count: 150,
            min_silence_duration: 0.7,
        }
    }
}

impl EngineConfig {
    /// Check the loaded values before handing them to the engine. Rejects
    /// frame rates and sheet sizes the animation arithmetic cannot carry.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.fps == 0 {
            return Err(ConfigError::ZeroFps);
        }
        if self.frame_count < MIN_FRAME_COUNT {
            return Err(ConfigError::FrameCountTooSmall(self.frame_count));
        }
        if !(self.min_silence_duration > 0.0) {
            return Err(ConfigError::BadSilenceDuration(self.min_silence_duration));
        }
        Ok(())
    }

    pub fn anim_params(&self) -> AnimParams {
        AnimParams {
            fps: self.fps,
            frame_count: self.frame_count,
        }
    }

    fn silence_config(&self) -> SilenceConfig {
        SilenceConfig {
            min_silence_duration: self.min_silence_duration,
        }
    }
}

/// Decoded audio plus the timeline built for it, ready to play as one unit
#[derive(Debug)]
pub struct PreparedPlayback {
    pub timeline: Timeline,
    pub samples: SampleBuffer,
}

/// Decode an encoded audio buffer and build its animation timeline.
///
/// Fails atomically: on a decode error nothing is retained and the caller
/// is expected to signal `RequestFailed` to the engine.
pub fn prepare_playback(bytes: &[u8], cfg: &EngineConfig) -> Result<PreparedPlayback, DecodeError> {
    let samples = decode_wav_bytes(bytes)?;
    let scan = detect_silence(samples.samples(), samples.sample_rate(), &cfg.silence_config());
    let timeline = build_timeline(samples.duration(), &scan, &cfg.anim_params());

    info!(
        "prepared playback: {:.3}s audio, {} silence interval(s), {} segment(s)",
        samples.duration(),
        scan.intervals.len(),
        timeline.segments().len()
    );

    Ok(PreparedPlayback { timeline, samples })
}

/// The single active animation phase. Replacing this value is what cancels
/// the previous phase's pending work.
enum Phase {
    Idle(IdleLoop),
    Waiting(ResponseWait),
    Playback {
        playback: TimelinePlayback,
        clock: Box<dyn PlaybackClock + Send>,
    },
}

/// Synchronous engine core. All state mutation happens inside `tick` and
/// `handle_control`, called from one driver loop.
pub struct AvatarEngine {
    cfg: EngineConfig,
    phase: Phase,
    pacer: FramePacer,
    output: Box<dyn AudioOutput>,
    /// Prepared audio waiting for the avatar to reach frame 0
    pending: Option<PreparedPlayback>,
    frame_tx: mpsc::UnboundedSender<FrameUpdate>,
    last_emitted: Option<FrameUpdate>,
}

impl AvatarEngine {
    pub fn new(
        cfg: EngineConfig,
        output: Box<dyn AudioOutput>,
        frame_tx: mpsc::UnboundedSender<FrameUpdate>,
    ) -> Self {
        Self {
            phase: Phase::Idle(IdleLoop::new(cfg.frame_count)),
            pacer: FramePacer::new(cfg.anim_params().frame_duration_ms(), 0.0),
            cfg,
            output,
            pending: None,
            frame_tx,
            last_emitted: None,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.cfg
    }

    pub fn scheduler_phase(&self) -> SchedulerPhase {
        match &self.phase {
            Phase::Idle(_) => SchedulerPhase::IdleLoop,
            Phase::Waiting(wait) if wait.is_returning() => SchedulerPhase::ReturningToZero,
            Phase::Waiting(_) => SchedulerPhase::Waiting,
            Phase::Playback { .. } => SchedulerPhase::TimelinePlayback,
        }
    }

    pub fn has_pending_playback(&self) -> bool {
        self.pending.is_some()
    }

    /// Frame last shown to the sink; rest position before anything emitted
    fn current_frame(&self) -> u32 {
        self.last_emitted.map_or(0, |u| u.frame)
    }

    /// Apply a host control event. Returns false when the driver should stop.
    pub fn handle_control(&mut self, event: ControlEvent, now_ms: f64) -> bool {
        match event {
            ControlEvent::RequestSent => {
                debug!("request sent, entering wait animation");
                self.pending = None;
                self.phase = Phase::Waiting(ResponseWait::from_frame(
                    self.current_frame(),
                    self.cfg.frame_count,
                ));
                self.pacer.reset(now_ms);
            }
            ControlEvent::AudioReady(prepared) => self.on_audio_ready(prepared, now_ms),
            ControlEvent::RequestFailed => {
                warn!("request failed, aborting to idle loop");
                self.pending = None;
                self.enter_idle(now_ms);
            }
            ControlEvent::SetHalfAccordion(half) => {
                if let Phase::Idle(idle) = &mut self.phase {
                    idle.request_half_accordion(half);
                } else {
                    debug!("half-accordion request ignored outside idle loop");
                }
            }
            ControlEvent::Shutdown => return false,
        }
        true
    }

    fn on_audio_ready(&mut self, prepared: PreparedPlayback, now_ms: f64) {
        if prepared.timeline.is_empty() {
            // Possible when trailing-silence trimming leaves nothing; not a
            // user-visible error
            warn!("audio ready with empty timeline, staying in idle loop");
            self.pending = None;
            self.enter_idle(now_ms);
            return;
        }

        if let Phase::Waiting(wait) = &mut self.phase {
            debug!("audio ready while waiting, descending to frame 0");
            self.pending = Some(prepared);
            wait.notify_audio_ready();
            return;
        }

        self.pending = Some(prepared);
        if self.current_frame() == 0 {
            // Already at rest: play from the known origin right away
            self.start_playback(now_ms);
        } else {
            // Mid-swing (idle loop, or superseding an active playback):
            // descend to frame 0 first so playback starts from rest
            debug!(
                "audio ready at frame {}, returning to rest first",
                self.current_frame()
            );
            self.phase = Phase::Waiting(ResponseWait::returning_from(
                self.current_frame(),
                self.cfg.frame_count,
            ));
            self.pacer.reset(now_ms);
        }
    }

    /// One scheduling tick. `now_ms` is the driver's coarse wall clock used
    /// for frame pacing; timeline playback reads its own audio clock.
    pub fn tick(&mut self, now_ms: f64) {
        match &mut self.phase {
            Phase::Idle(idle) => {
                if self.pacer.due(now_ms) {
                    let step = idle.step();
                    let update = FrameUpdate {
                        frame: step.frame,
                        mode: Mode::Idle,
                    };
                    Self::emit(&self.frame_tx, &mut self.last_emitted, update);
                    if step.at_origin && self.pending.is_some() {
                        self.start_playback(now_ms);
                    }
                }
            }
            Phase::Waiting(wait) => {
                if self.pacer.due(now_ms) {
                    match wait.step() {
                        WaitStep::Frame(frame) => {
                            let update = FrameUpdate {
                                frame,
                                mode: Mode::Idle,
                            };
                            Self::emit(&self.frame_tx, &mut self.last_emitted, update);
                        }
                        WaitStep::ReachedOrigin => {
                            let update = FrameUpdate {
                                frame: 0,
                                mode: Mode::Idle,
                            };
                            Self::emit(&self.frame_tx, &mut self.last_emitted, update);
                            if self.pending.is_some() {
                                self.start_playback(now_ms);
                            } else {
                                self.enter_idle(now_ms);
                            }
                        }
                    }
                }
            }
            Phase::Playback { playback, clock } => {
                let elapsed = clock.elapsed_secs();
                match playback.step(elapsed) {
                    PlaybackStep::Changed(update) => {
                        Self::emit(&self.frame_tx, &mut self.last_emitted, update);
                    }
                    PlaybackStep::Unchanged => {}
                    PlaybackStep::Finished => {
                        info!("timeline playback finished at {:.3}s", elapsed);
                        self.enter_idle(now_ms);
                    }
                }
            }
        }
    }

    /// Consume the pending playback: start audio output, adopt its clock,
    /// and show the first segment's frame 0 immediately.
    fn start_playback(&mut self, now_ms: f64) {
        debug_assert!(
            !matches!(self.phase, Phase::Playback { .. }),
            "playback started while another playback phase is active"
        );
        let Some(prepared) = self.pending.take() else {
            return;
        };

        info!(
            "starting timeline playback: {} segment(s), {:.3}s",
            prepared.timeline.segments().len(),
            prepared.timeline.end_time()
        );

        let clock = self.output.start(&prepared.samples);
        let mut playback =
            TimelinePlayback::new(prepared.timeline, prepared.samples.duration(), self.cfg.fps);

        // Emit the starting frame before the first tick so the sprite-sheet
        // swap happens in sync with audio start
        if let PlaybackStep::Changed(update) = playback.step(clock.elapsed_secs()) {
            Self::emit(&self.frame_tx, &mut self.last_emitted, update);
        }

        self.phase = Phase::Playback { playback, clock };
        self.pacer.reset(now_ms);
    }

    /// Reset to the full-amplitude idle loop at the rest position
    fn enter_idle(&mut self, now_ms: f64) {
        self.phase = Phase::Idle(IdleLoop::new(self.cfg.frame_count));
        self.pacer.reset(now_ms);
        let update = FrameUpdate {
            frame: 0,
            mode: Mode::Idle,
        };
        Self::emit(&self.frame_tx, &mut self.last_emitted, update);
    }

    fn emit(
        frame_tx: &mpsc::UnboundedSender<FrameUpdate>,
        last: &mut Option<FrameUpdate>,
        update: FrameUpdate,
    ) {
        if *last != Some(update) {
            *last = Some(update);
            let _ = frame_tx.send(update);
        }
    }
}

/// Handle for sending request-lifecycle events into a running engine
#[derive(Clone)]
pub struct EngineHandle {
    ctrl_tx: mpsc::UnboundedSender<ControlEvent>,
}

impl EngineHandle {
    pub fn request_sent(&self) {
        let _ = self.ctrl_tx.send(ControlEvent::RequestSent);
    }

    pub fn audio_ready(&self, prepared: PreparedPlayback) {
        let _ = self.ctrl_tx.send(ControlEvent::AudioReady(prepared));
    }

    pub fn request_failed(&self) {
        let _ = self.ctrl_tx.send(ControlEvent::RequestFailed);
    }

    pub fn set_half_accordion(&self, half: bool) {
        let _ = self.ctrl_tx.send(ControlEvent::SetHalfAccordion(half));
    }

    pub fn shutdown(&self) {
        let _ = self.ctrl_tx.send(ControlEvent::Shutdown);
    }
}

/// Spawn the engine driver on the current tokio runtime. Returns the control
/// handle, the frame-update stream for the rendering sink, and the driver
/// task handle.
pub fn spawn(
    cfg: EngineConfig,
    output: Box<dyn AudioOutput>,
) -> (
    EngineHandle,
    mpsc::UnboundedReceiver<FrameUpdate>,
    tokio::task::JoinHandle<()>,
) {
    let (frame_tx, frame_rx) = mpsc::unbounded_channel();
    let (ctrl_tx, ctrl_rx) = mpsc::unbounded_channel();
    let engine = AvatarEngine::new(cfg, output, frame_tx);
    let task = tokio::spawn(run(engine, ctrl_rx));
    (EngineHandle { ctrl_tx }, frame_rx, task)
}

/// Drive the engine with a real timer. Ticks at twice the nominal frame
/// rate so the pacer's remainder logic has headroom, the way a per-paint
/// callback outpaces a 30fps animation.
pub async fn run(mut engine: AvatarEngine, mut ctrl_rx: mpsc::UnboundedReceiver<ControlEvent>) {
    let period = std::time::Duration::from_secs_f64(1.0 / (engine.config().fps as f64 * 2.0));
    let mut ticker = tokio::time::interval(period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
    let started = Instant::now();

    info!("animation driver started, tick period {:?}", period);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                engine.tick(started.elapsed().as_secs_f64() * 1000.0);
            }
            event = ctrl_rx.recv() => {
                let now_ms = started.elapsed().as_secs_f64() * 1000.0;
                match event {
                    Some(event) => {
                        if !engine.handle_control(event, now_ms) {
                            break;
                        }
                    }
                    None => break,
                }
            }
        }
    }

    info!("animation driver stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::silence::{SilenceInterval, SilenceScan};

    /// Output whose clock is advanced manually by the test
    struct TestOutput {
        clock: ManualClock,
    }

    impl AudioOutput for TestOutput {
        fn start(&mut self, _samples: &SampleBuffer) -> Box<dyn PlaybackClock + Send> {
            Box::new(self.clock.clone())
        }
    }

    struct Rig {
        engine: AvatarEngine,
        frames: mpsc::UnboundedReceiver<FrameUpdate>,
        clock: ManualClock,
        now_ms: f64,
    }

    impl Rig {
        fn new() -> Self {
            let clock = ManualClock::new();
            let (frame_tx, frames) = mpsc::unbounded_channel();
            let engine = AvatarEngine::new(
                EngineConfig::default(),
                Box::new(TestOutput {
                    clock: clock.clone(),
                }),
                frame_tx,
            );
            Self {
                engine,
                frames,
                clock,
                now_ms: 0.0,
            }
        }

        /// One paced tick: wall clock jumps a full frame duration
        fn tick(&mut self) {
            self.now_ms += 1000.0 / 30.0 + 1.0;
            self.engine.tick(self.now_ms);
        }

        fn control(&mut self, event: ControlEvent) {
            assert!(self.engine.handle_control(event, self.now_ms));
        }

        fn drain(&mut self) -> Vec<FrameUpdate> {
            let mut out = Vec::new();
            while let Ok(update) = self.frames.try_recv() {
                out.push(update);
            }
            out
        }
    }

    fn prepared(duration: f64, silences: &[(f64, f64)]) -> PreparedPlayback {
        let scan = SilenceScan {
            intervals: silences
                .iter()
                .map(|&(start, end)| SilenceInterval { start, end })
                .collect(),
            last_sound_time: duration,
        };
        let params = AnimParams::default();
        let samples =
            SampleBuffer::new(vec![0.5; (duration * 16_000.0) as usize], 16_000).unwrap();
        PreparedPlayback {
            timeline: build_timeline(duration, &scan, &params),
            samples,
        }
    }

    #[test]
    fn config_rejects_unusable_values() {
        assert!(EngineConfig::default().validate().is_ok());

        let cfg = EngineConfig {
            frame_count: 10,
            ..EngineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::FrameCountTooSmall(10))
        ));

        let cfg = EngineConfig {
            fps: 0,
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ConfigError::ZeroFps)));

        let cfg = EngineConfig {
            min_silence_duration: 0.0,
            ..EngineConfig::default()
        };
        assert!(matches!(
            cfg.validate(),
            Err(ConfigError::BadSilenceDuration(_))
        ));
    }

    #[test]
    fn request_failure_aborts_to_idle() {
        let mut rig = Rig::new();
        rig.control(ControlEvent::RequestSent);
        assert_eq!(rig.engine.scheduler_phase(), SchedulerPhase::Waiting);

        rig.control(ControlEvent::RequestFailed);
        assert_eq!(rig.engine.scheduler_phase(), SchedulerPhase::IdleLoop);
        assert!(!rig.engine.has_pending_playback());
    }

    #[test]
    fn wait_to_playback_handoff_zeroes_first() {
        let mut rig = Rig::new();
        rig.control(ControlEvent::RequestSent);

        // Let the wait animation climb well into its sustain band
        for _ in 0..100 {
            rig.tick();
        }
        let climbed = rig.drain();
        let top = climbed.last().unwrap().frame;
        assert!(top > 10, "expected sustain frames, got {top}");

        rig.control(ControlEvent::AudioReady(prepared(5.0, &[(2.0, 3.0)])));
        assert_eq!(rig.engine.scheduler_phase(), SchedulerPhase::Waiting);

        // Descend deterministically; playback must not begin before frame 0
        let mut saw_zero = false;
        for _ in 0..200 {
            rig.tick();
            if rig.engine.scheduler_phase() == SchedulerPhase::TimelinePlayback {
                break;
            }
        }
        let descent = rig.drain();
        for update in &descent {
            if update.frame == 0 {
                saw_zero = true;
            }
            if update.mode == Mode::Speak {
                assert!(saw_zero, "speak frame emitted before reaching rest");
            }
        }
        assert!(saw_zero);
        assert_eq!(
            rig.engine.scheduler_phase(),
            SchedulerPhase::TimelinePlayback
        );
    }

    #[test]
    fn audio_ready_at_rest_starts_immediately() {
        let mut rig = Rig::new();
        rig.control(ControlEvent::AudioReady(prepared(5.0, &[(2.0, 3.0)])));
        assert_eq!(
            rig.engine.scheduler_phase(),
            SchedulerPhase::TimelinePlayback
        );
        let first = rig.drain();
        assert_eq!(first[0], FrameUpdate { frame: 0, mode: Mode::Speak });
    }

    #[test]
    fn playback_follows_audio_clock_modes() {
        let mut rig = Rig::new();
        rig.control(ControlEvent::AudioReady(prepared(5.0, &[(2.0, 3.0)])));
        rig.drain();

        rig.clock.set_secs(2.5);
        rig.tick();
        assert_eq!(rig.drain().last().unwrap().mode, Mode::Idle);

        rig.clock.set_secs(3.5);
        rig.tick();
        assert_eq!(rig.drain().last().unwrap().mode, Mode::Speak);
    }

    #[test]
    fn playback_end_returns_to_idle_rest() {
        let mut rig = Rig::new();
        rig.control(ControlEvent::AudioReady(prepared(1.0, &[])));
        rig.drain();

        rig.clock.set_secs(1.5);
        rig.tick();
        assert_eq!(rig.engine.scheduler_phase(), SchedulerPhase::IdleLoop);
        let last = rig.drain();
        assert_eq!(
            last.last().copied(),
            Some(FrameUpdate { frame: 0, mode: Mode::Idle })
        );
    }

    #[test]
    fn empty_timeline_falls_back_to_idle() {
        let mut rig = Rig::new();
        rig.control(ControlEvent::RequestSent);
        let samples = SampleBuffer::new(vec![0.0; 1600], 16_000).unwrap();
        rig.control(ControlEvent::AudioReady(PreparedPlayback {
            timeline: Timeline::default(),
            samples,
        }));
        assert_eq!(rig.engine.scheduler_phase(), SchedulerPhase::IdleLoop);
        assert!(!rig.engine.has_pending_playback());
    }

    #[test]
    fn audio_ready_mid_idle_swing_returns_to_rest_first() {
        let mut rig = Rig::new();
        // Swing the idle loop away from rest
        for _ in 0..25 {
            rig.tick();
        }
        assert!(rig.drain().last().unwrap().frame > 0);

        rig.control(ControlEvent::AudioReady(prepared(2.0, &[])));
        assert_eq!(
            rig.engine.scheduler_phase(),
            SchedulerPhase::ReturningToZero
        );

        for _ in 0..60 {
            rig.tick();
            if rig.engine.scheduler_phase() == SchedulerPhase::TimelinePlayback {
                break;
            }
        }
        assert_eq!(
            rig.engine.scheduler_phase(),
            SchedulerPhase::TimelinePlayback
        );
    }

    #[test]
    fn half_accordion_applies_in_idle_only() {
        let mut rig = Rig::new();
        rig.control(ControlEvent::SetHalfAccordion(true));
        // Run past one full half-range cycle; peak must stay under half
        let mut peak = 0;
        for _ in 0..400 {
            rig.tick();
        }
        for update in rig.drain() {
            peak = peak.max(update.frame);
        }
        // First swing is still full amplitude (the request is consumed at
        // the first zero crossing), so only assert the later half bound
        // by running another full cycle.
        for _ in 0..400 {
            rig.tick();
        }
        let mut later_peak = 0;
        for update in rig.drain() {
            later_peak = later_peak.max(update.frame);
        }
        assert_eq!(later_peak, 150 / 2 - 1);
        assert!(peak <= 149);
    }

    #[test]
    fn prepare_playback_builds_timeline_from_wav() {
        use std::io::Cursor;

        let spec = hound::WavSpec {
            channels: 1,
            sample_rate: 16_000,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut bytes = Vec::new();
        {
            let mut writer = hound::WavWriter::new(Cursor::new(&mut bytes), spec).unwrap();
            let spans: [(i16, f64); 3] = [(8000, 2.0), (0, 1.0), (8000, 2.0)];
            for (amp, secs) in spans {
                for i in 0..(secs * 16_000.0) as usize {
                    let s = if i % 2 == 0 { amp } else { -amp };
                    writer.write_sample(s).unwrap();
                }
            }
            writer.finalize().unwrap();
        }

        let prepared = prepare_playback(&bytes, &EngineConfig::default()).unwrap();
        let modes: Vec<Mode> = prepared
            .timeline
            .segments()
            .iter()
            .map(|s| s.mode)
            .collect();
        assert_eq!(modes, vec![Mode::Speak, Mode::Idle, Mode::Speak]);
    }

    #[test]
    fn decode_failure_prepares_nothing() {
        assert!(prepare_playback(b"garbage", &EngineConfig::default()).is_err());
    }
}
