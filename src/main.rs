//! Spriteline - audio-synchronized sprite avatar animation engine
//!
//! Drives a sprite-sheet avatar in lockstep with synthesized speech audio:
//! silence detection over decoded samples, a deterministic timeline of
//! speak/idle segments with per-segment accordion cycle packing, and a
//! real-time scheduler that maps the live audio clock to discrete sprite
//! frames. When no audio is queued the avatar breathes through an idle
//! ping-pong loop or a "thinking" wait animation.
//!
//! Running this binary plays a WAV file through the engine with simulated
//! audio output and logs every frame change:
//!
//! ```text
//! cargo run -- response.wav [config.json]
//! ```

#![forbid(unsafe_code)]

/// Pure animation state machines (idle loop, wait, timeline playback)
pub mod anim_fsm;
/// WAV decoding and the audio playback-clock seam
pub mod audio;
/// Playback clock trait and frame pacing
pub mod clock;
/// Engine driver, configuration, and the host-facing handle
pub mod engine;
/// Shared event and state types
pub mod events;
/// Triangular time-to-frame quantization
pub mod frame_map;
/// Silence detection over decoded samples
pub mod silence;
/// Timeline construction and cycle packing
pub mod timeline;

use anyhow::Context;
use audio::NullOutput;
use engine::EngineConfig;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let wav_path = std::env::args()
        .nth(1)
        .context("usage: spriteline <response.wav> [config.json]")?;
    let cfg = match std::env::args().nth(2) {
        Some(path) => {
            let raw = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config {path}"))?;
            serde_json::from_str(&raw).with_context(|| format!("parsing config {path}"))?
        }
        None => EngineConfig::default(),
    };
    cfg.validate().context("invalid engine config")?;

    info!(
        "starting avatar engine: fps={} frame_count={} min_silence={:.2}s",
        cfg.fps, cfg.frame_count, cfg.min_silence_duration
    );

    let bytes = std::fs::read(&wav_path).with_context(|| format!("reading {wav_path}"))?;
    let (handle, mut frames, driver) = engine::spawn(cfg, Box::new(NullOutput));

    // Log every frame change the rendering sink would receive
    let printer = tokio::spawn(async move {
        while let Some(update) = frames.recv().await {
            info!("frame {:>3} [{:?}]", update.frame, update.mode);
        }
    });

    // Simulate the request lifecycle: send, think briefly, then hand the
    // prepared audio over and let the timeline play out
    handle.request_sent();
    tokio::time::sleep(Duration::from_millis(600)).await;

    match engine::prepare_playback(&bytes, &cfg) {
        Ok(prepared) => {
            let duration = prepared.samples.duration();
            handle.audio_ready(prepared);
            tokio::time::sleep(Duration::from_secs_f64(duration + 1.0)).await;
        }
        Err(e) => {
            error!("could not prepare audio: {e}");
            handle.request_failed();
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
    }

    handle.shutdown();
    driver.await?;
    printer.abort();

    info!("spriteline demo finished");
    Ok(())
}
