//! A WAV file standing in for the microphone.
//!
//! Frames are released at the pace they would have been captured, so the
//! remote side sees the same cadence as a live input.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use tokio::sync::mpsc;

use crate::audio::buffer::FrameAccumulator;
use crate::audio::pcm::{self, EncodedFrame};
use crate::audio::resample::Resampler;
use crate::audio::{AudioSource, CaptureStream};
use crate::error::{LiveError, Result};

/// Interleaved samples read from a WAV file.
#[derive(Debug, Clone)]
pub struct WavClip {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
    pub channels: u16,
}

/// Read a WAV file as interleaved floats in [-1, 1].
pub fn read_wav(path: &Path) -> Result<WavClip> {
    let mut reader = hound::WavReader::open(path).map_err(|e| {
        LiveError::Audio(format!("failed to open WAV file {}: {e}", path.display()))
    })?;

    let spec = reader.spec();

    let samples: Vec<f32> = if spec.sample_format == hound::SampleFormat::Float {
        reader
            .samples::<f32>()
            .map(|s| s.map_err(|e| LiveError::Audio(format!("WAV read error: {e}"))))
            .collect::<Result<Vec<f32>>>()?
    } else {
        let scale = (1i64 << (spec.bits_per_sample.saturating_sub(1))) as f32;
        reader
            .samples::<i32>()
            .map(|s| {
                s.map(|v| v as f32 / scale)
                    .map_err(|e| LiveError::Audio(format!("WAV read error: {e}")))
            })
            .collect::<Result<Vec<f32>>>()?
    };

    Ok(WavClip {
        samples,
        sample_rate: spec.sample_rate,
        channels: spec.channels,
    })
}

/// Streams a WAV file as if it were the microphone.
pub struct WavFileSource {
    path: PathBuf,
    target_rate: u32,
    frame_samples: usize,
}

impl WavFileSource {
    #[must_use]
    pub const fn new(path: PathBuf, target_rate: u32, frame_samples: usize) -> Self {
        Self {
            path,
            target_rate,
            frame_samples,
        }
    }
}

impl AudioSource for WavFileSource {
    fn acquire(&mut self) -> Result<Box<dyn CaptureStream>> {
        let clip = read_wav(&self.path)?;
        tracing::info!(
            "streaming {} ({} Hz, {} channel(s), {:.1}s)",
            self.path.display(),
            clip.sample_rate,
            clip.channels,
            clip.samples.len() as f64
                / f64::from(clip.sample_rate)
                / f64::from(clip.channels.max(1))
        );

        let frames = frames_from_clip(&clip, self.target_rate, self.frame_samples)?;

        Ok(Box::new(WavStream {
            frames: Some(frames),
            frame_duration: Duration::from_secs_f64(
                self.frame_samples as f64 / f64::from(self.target_rate),
            ),
            stop: Arc::new(AtomicBool::new(false)),
        }))
    }
}

/// Resample a clip to `target_rate` mono and slice it into encoded frames.
pub fn frames_from_clip(
    clip: &WavClip,
    target_rate: u32,
    frame_samples: usize,
) -> Result<Vec<EncodedFrame>> {
    let mut resampler = Resampler::new(clip.sample_rate, target_rate, clip.channels)?;
    let mut mono = resampler.process(&clip.samples)?;
    mono.extend(resampler.finish()?);

    let mut accumulator = FrameAccumulator::new(frame_samples);
    let mut frames: Vec<EncodedFrame> = accumulator
        .feed(&mono)
        .iter()
        .map(|f| pcm::encode(f, target_rate))
        .collect();
    if let Some(tail) = accumulator.flush() {
        frames.push(pcm::encode(&tail, target_rate));
    }

    Ok(frames)
}

struct WavStream {
    frames: Option<Vec<EncodedFrame>>,
    frame_duration: Duration,
    stop: Arc<AtomicBool>,
}

impl CaptureStream for WavStream {
    fn start(&mut self, tx: mpsc::Sender<EncodedFrame>) -> Result<()> {
        let Some(frames) = self.frames.take() else {
            return Ok(());
        };

        let stop = Arc::clone(&self.stop);
        let frame_duration = self.frame_duration;

        std::thread::spawn(move || {
            let started = Instant::now();
            let total = frames.len();

            for (i, frame) in frames.into_iter().enumerate() {
                if stop.load(Ordering::Relaxed) {
                    break;
                }

                let due = started + frame_duration * i as u32;
                if let Some(wait) = due.checked_duration_since(Instant::now()) {
                    std::thread::sleep(wait);
                }

                if tx.blocking_send(frame).is_err() {
                    break;
                }
            }

            tracing::info!("finished streaming {total} frames from file");
        });

        Ok(())
    }
}

impl Drop for WavStream {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
    }
}
