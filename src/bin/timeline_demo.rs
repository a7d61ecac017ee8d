//! Offline timeline analysis demo
//!
//! Decodes a WAV file, prints the silence intervals the detector finds, and
//! dumps the animation timeline that would drive the avatar, followed by a
//! short sampled trace of the triangular frame mapping.

use anyhow::Context;
use spriteline::engine::{prepare_playback, EngineConfig};
use spriteline::frame_map::map_time;
use spriteline::silence::{detect_silence, SilenceConfig};

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .init();

    let path = std::env::args()
        .nth(1)
        .context("usage: timeline_demo <response.wav>")?;
    let bytes = std::fs::read(&path).with_context(|| format!("reading {path}"))?;

    let cfg = EngineConfig::default();
    let samples = spriteline::audio::decode_wav_bytes(&bytes)?;
    let scan = detect_silence(
        samples.samples(),
        samples.sample_rate(),
        &SilenceConfig {
            min_silence_duration: cfg.min_silence_duration,
        },
    );

    println!(
        "{path}: {:.3}s at {} Hz, last sound at {:.3}s",
        samples.duration(),
        samples.sample_rate(),
        scan.last_sound_time
    );

    println!("\nsilence intervals (>= {:.2}s):", cfg.min_silence_duration);
    if scan.intervals.is_empty() {
        println!("  none");
    }
    for interval in &scan.intervals {
        println!(
            "  [{:7.3}s .. {:7.3}s)  {:.3}s",
            interval.start,
            interval.end,
            interval.duration()
        );
    }

    let prepared = prepare_playback(&bytes, &cfg)?;
    println!("\ntimeline ({} segments):", prepared.timeline.segments().len());
    for seg in prepared.timeline.segments() {
        println!(
            "  {:5?} [{:7.3}s .. {:7.3}s)  cycles={:<2} frames/cycle={:7.2} apex={:6.2}",
            seg.mode,
            seg.start,
            seg.end,
            seg.total_cycles,
            seg.frames_per_cycle,
            seg.max_frame
        );
    }

    // Sampled frame trace over the first two seconds
    if let Some(first) = prepared.timeline.segments().first() {
        println!("\nframe trace (100ms steps):");
        let mut t = first.start;
        while t < prepared.timeline.end_time().min(2.0) {
            if let Some(idx) = prepared.timeline.segment_at(t, 0) {
                let seg = prepared.timeline.segments()[idx];
                println!("  t={:5.2}s -> frame {:>3} [{:?}]", t, map_time(&seg, t, cfg.fps), seg.mode);
            }
            t += 0.1;
        }
    }

    Ok(())
}
