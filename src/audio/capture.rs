use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Stream, StreamConfig};
use crossbeam_channel::{Receiver, bounded};
use tokio::sync::mpsc;

use crate::audio::buffer::FrameAccumulator;
use crate::audio::pcm::{self, EncodedFrame};
use crate::audio::resample::Resampler;
use crate::audio::{AudioSource, CaptureStream};
use crate::config::AudioConfig;
use crate::error::{LiveError, Result};

/// Manages microphone capture via cpal.
pub struct AudioCapture {
    stream: Stream,
    receiver: Receiver<Vec<f32>>,
    sample_rate: u32,
    channels: u16,
}

impl AudioCapture {
    /// Open the configured input device without starting it.
    ///
    /// A missing device or one that refuses to hand out a stream is reported
    /// as [`LiveError::PermissionDenied`]: the host gives no finer signal.
    pub fn new(config: &AudioConfig) -> Result<Self> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.device {
            host.input_devices()
                .map_err(|e| LiveError::Audio(format!("failed to enumerate input devices: {e}")))?
                .find(|d| device_name(d).as_deref() == Some(name.as_str()))
                .ok_or_else(|| LiveError::PermissionDenied(format!("input device not found: {name}")))?
        } else {
            host.default_input_device().ok_or_else(|| {
                LiveError::PermissionDenied("no default input device available".to_string())
            })?
        };

        let supported = device.default_input_config().map_err(|e| {
            LiveError::PermissionDenied(format!("input device refused configuration: {e}"))
        })?;

        let sample_rate = supported.sample_rate();
        let channels = supported.channels();

        let stream_config = StreamConfig {
            channels,
            sample_rate,
            buffer_size: cpal::BufferSize::Default,
        };

        // Bounded channel, try_send in audio callback to avoid blocking
        let (tx, rx) = bounded::<Vec<f32>>(64);

        let err_fn = |err: cpal::StreamError| {
            tracing::error!("input stream error: {err}");
        };

        let stream = device
            .build_input_stream(
                &stream_config,
                move |data: &[f32], _info: &cpal::InputCallbackInfo| {
                    if tx.try_send(data.to_vec()).is_err() {
                        tracing::debug!("capture queue full, dropping {} samples", data.len());
                    }
                },
                err_fn,
                None,
            )
            .map_err(|e| match e {
                cpal::BuildStreamError::DeviceNotAvailable => {
                    LiveError::PermissionDenied("input device not available".to_string())
                }
                other => LiveError::Audio(format!("failed to build input stream: {other}")),
            })?;

        Ok(Self {
            stream,
            receiver: rx,
            sample_rate,
            channels,
        })
    }

    /// Start the audio stream.
    pub fn start(&self) -> Result<()> {
        self.stream
            .play()
            .map_err(|e| LiveError::Audio(format!("failed to start input stream: {e}")))
    }

    /// Stop the audio stream.
    pub fn pause(&self) -> Result<()> {
        self.stream
            .pause()
            .map_err(|e| LiveError::Audio(format!("failed to pause input stream: {e}")))
    }

    #[must_use]
    pub fn receiver(&self) -> Receiver<Vec<f32>> {
        self.receiver.clone()
    }

    #[must_use]
    pub const fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    #[must_use]
    pub const fn channels(&self) -> u16 {
        self.channels
    }
}

/// The system microphone as an [`AudioSource`].
pub struct Microphone {
    config: AudioConfig,
}

impl Microphone {
    #[must_use]
    pub const fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl AudioSource for Microphone {
    fn acquire(&mut self) -> Result<Box<dyn CaptureStream>> {
        let capture = AudioCapture::new(&self.config)?;
        tracing::debug!(
            "acquired input: {} Hz, {} channel(s)",
            capture.sample_rate(),
            capture.channels()
        );
        Ok(Box::new(MicrophoneStream {
            capture,
            target_rate: self.config.input_sample_rate,
            frame_samples: self.config.frame_samples,
            started: false,
        }))
    }
}

struct MicrophoneStream {
    capture: AudioCapture,
    target_rate: u32,
    frame_samples: usize,
    started: bool,
}

impl CaptureStream for MicrophoneStream {
    fn start(&mut self, frames: mpsc::Sender<EncodedFrame>) -> Result<()> {
        if self.started {
            return Ok(());
        }

        let source_rate = self.capture.sample_rate();
        let channels = self.capture.channels();
        let target_rate = self.target_rate;
        let frame_samples = self.frame_samples;
        let raw_rx = self.capture.receiver();

        // Build the resampler up front so a bad rate fails the start.
        let mut resampler = Resampler::new(source_rate, target_rate, channels)?;

        std::thread::spawn(move || {
            tracing::debug!(
                "capture pipeline: source_rate={source_rate}, channels={channels}, target_rate={target_rate}, frame={frame_samples}"
            );

            let mut accumulator = FrameAccumulator::new(frame_samples);
            let mut sent = 0u64;
            let mut dropped = 0u64;

            while let Ok(raw_samples) = raw_rx.recv() {
                let mono = match resampler.process(&raw_samples) {
                    Ok(s) => s,
                    Err(e) => {
                        tracing::warn!("{e}");
                        continue;
                    }
                };

                for frame in accumulator.feed(&mono) {
                    match forward_frame(&frames, pcm::encode(&frame, target_rate)) {
                        Forwarded::Sent => sent += 1,
                        Forwarded::Dropped => {
                            dropped += 1;
                            tracing::warn!(
                                "session is not keeping up, dropped captured frame ({dropped} so far)"
                            );
                        }
                        Forwarded::Closed => {
                            tracing::debug!("frame receiver dropped, stopping capture pipeline");
                            return;
                        }
                    }
                }
            }

            tracing::debug!("capture pipeline exiting after {sent} frames, {dropped} dropped");
        });

        self.capture.start()?;
        self.started = true;
        Ok(())
    }
}

impl Drop for MicrophoneStream {
    fn drop(&mut self) {
        if self.started
            && let Err(e) = self.capture.pause()
        {
            tracing::debug!("{e}");
        }
    }
}

#[derive(Debug, PartialEq, Eq)]
enum Forwarded {
    Sent,
    Dropped,
    Closed,
}

/// Hand a frame to the session without waiting: a full queue drops the
/// frame so the capture thread keeps draining the device.
fn forward_frame(frames: &mpsc::Sender<EncodedFrame>, frame: EncodedFrame) -> Forwarded {
    match frames.try_send(frame) {
        Ok(()) => Forwarded::Sent,
        Err(mpsc::error::TrySendError::Full(_)) => Forwarded::Dropped,
        Err(mpsc::error::TrySendError::Closed(_)) => Forwarded::Closed,
    }
}

fn device_name(device: &cpal::Device) -> Option<String> {
    device
        .description()
        .ok()
        .map(|desc| desc.name().to_string())
}

/// Names of every input device the default host reports.
pub fn list_input_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .input_devices()
        .map_err(|e| LiveError::Audio(format!("failed to enumerate input devices: {e}")))?;
    Ok(devices.filter_map(|d| device_name(&d)).collect())
}

#[must_use]
pub fn default_input_device_name() -> Option<String> {
    cpal::default_host()
        .default_input_device()
        .and_then(|d| device_name(&d))
}
