//! Audio boundary: decoding and the playback-clock seam
//!
//! The engine itself never touches an audio device. This module provides
//! the concrete WAV decode capability (via `hound`) feeding the silence
//! detector, and the `AudioOutput` trait through which a host supplies real
//! playback; the engine only reads the clock the output hands back.

use crate::clock::{PlaybackClock, WallClock};
use std::io::Cursor;
use tracing::debug;

/// Error decoding an encoded audio buffer
#[derive(Debug, thiserror::Error)]
pub enum DecodeError {
    #[error("WAV parse error: {0}")]
    Wav(#[from] hound::Error),

    #[error("audio contains no samples")]
    Empty,

    #[error("unsupported sample rate: {0}")]
    BadRate(u32),
}

pub type Result<T> = std::result::Result<T, DecodeError>;

/// Decoded mono audio at a fixed sample rate. Immutable once produced.
#[derive(Debug, Clone)]
pub struct SampleBuffer {
    samples: Vec<f32>,
    sample_rate: u32,
}

impl SampleBuffer {
    pub fn new(samples: Vec<f32>, sample_rate: u32) -> Result<Self> {
        if sample_rate == 0 {
            return Err(DecodeError::BadRate(sample_rate));
        }
        if samples.is_empty() {
            return Err(DecodeError::Empty);
        }
        Ok(Self {
            samples,
            sample_rate,
        })
    }

    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Duration in seconds
    pub fn duration(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate as f64
    }
}

/// Decode a WAV byte buffer into a mono float sample buffer.
///
/// Multi-channel input is downmixed by averaging; integer formats are
/// normalized into `[-1, 1]`.
pub fn decode_wav_bytes(bytes: &[u8]) -> Result<SampleBuffer> {
    let mut reader = hound::WavReader::new(Cursor::new(bytes))?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => reader
            .samples::<f32>()
            .collect::<std::result::Result<_, _>>()?,
        hound::SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 * scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };

    let mono: Vec<f32> = if channels == 1 {
        interleaved
    } else {
        interleaved
            .chunks_exact(channels)
            .map(|frame| frame.iter().sum::<f32>() / channels as f32)
            .collect()
    };

    debug!(
        "decoded WAV: {} samples, {} Hz, {} channel(s)",
        mono.len(),
        spec.sample_rate,
        channels
    );

    SampleBuffer::new(mono, spec.sample_rate)
}

/// Playback seam: starting output for a sample buffer yields the live clock
/// the scheduler reads every tick.
pub trait AudioOutput: Send {
    /// Begin playback and return the clock anchored at its start
    fn start(&mut self, samples: &SampleBuffer) -> Box<dyn PlaybackClock + Send>;
}

/// No-device output: playback is simulated against the wall clock. Used by
/// the demo binaries and anywhere the frames matter but the sound does not.
#[derive(Debug, Default)]
pub struct NullOutput;

impl AudioOutput for NullOutput {
    fn start(&mut self, samples: &SampleBuffer) -> Box<dyn PlaybackClock + Send> {
        debug!("null output: simulating {:.3}s of playback", samples.duration());
        Box::new(WallClock::start())
    }
}
