use std::sync::{Arc, Mutex, MutexGuard};

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{SampleFormat, Stream, StreamConfig};
use tokio::sync::mpsc;

use crate::audio::pcm::PlaybackBuffer;
use crate::audio::{AudioSink, OpenedOutput, OutputDevice, VoiceId};
use crate::config::AudioConfig;
use crate::error::{LiveError, Result};

struct Voice {
    id: VoiceId,
    start_frame: u64,
    /// Buffer frames consumed per device frame.
    step: f64,
    /// Device frames the voice occupies.
    length: u64,
    buffer: PlaybackBuffer,
}

/// Sums scheduled voices into the device's interleaved output.
///
/// The count of rendered device frames is the output clock.
pub struct Mixer {
    device_rate: u32,
    device_channels: usize,
    rendered: u64,
    voices: Vec<Voice>,
    completions: mpsc::UnboundedSender<VoiceId>,
}

impl Mixer {
    #[must_use]
    pub fn new(
        device_rate: u32,
        device_channels: u16,
        completions: mpsc::UnboundedSender<VoiceId>,
    ) -> Self {
        Self {
            device_rate,
            device_channels: usize::from(device_channels.max(1)),
            rendered: 0,
            voices: Vec::new(),
            completions,
        }
    }

    /// Seconds of audio rendered so far.
    #[must_use]
    pub fn current_time(&self) -> f64 {
        self.rendered as f64 / f64::from(self.device_rate)
    }

    pub fn schedule(&mut self, id: VoiceId, buffer: PlaybackBuffer, at: f64) {
        let rate = f64::from(self.device_rate);
        let at = at.max(0.0);
        let requested = (at * rate).round() as u64;
        // Derived from the scheduled end time so back-to-back voices meet
        // on the same frame instead of rounding into each other.
        let end = ((at + buffer.duration()) * rate).round() as u64;
        let length = end.saturating_sub(requested);
        // A start time already in the past plays from the next rendered frame.
        let start_frame = requested.max(self.rendered);
        let step = f64::from(buffer.sample_rate) / rate;

        self.voices.push(Voice {
            id,
            start_frame,
            step,
            length,
            buffer,
        });
    }

    /// Drop a voice without a completion notification.
    pub fn stop(&mut self, id: VoiceId) {
        self.voices.retain(|v| v.id != id);
    }

    #[must_use]
    pub fn active(&self) -> usize {
        self.voices.len()
    }

    /// Fill `out` (interleaved) and advance the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        out.fill(0.0);
        let channels = self.device_channels;
        let frames = (out.len() / channels) as u64;
        let window_start = self.rendered;
        let window_end = window_start + frames;

        for voice in &self.voices {
            let voice_end = voice.start_frame + voice.length;
            if voice.start_frame >= window_end || voice_end <= window_start {
                continue;
            }

            let first = voice.start_frame.max(window_start);
            let last = voice_end.min(window_end);
            let source_channels = voice.buffer.channel_count();
            if source_channels == 0 {
                continue;
            }

            for t in first..last {
                let pos = (t - voice.start_frame) as f64 * voice.step;
                let base = (t - window_start) as usize * channels;
                for ch in 0..channels {
                    let source = &voice.buffer.channels[ch.min(source_channels - 1)];
                    out[base + ch] += interpolate(source, pos);
                }
            }
        }

        for sample in out.iter_mut() {
            *sample = sample.clamp(-1.0, 1.0);
        }

        self.rendered = window_end;

        let completions = &self.completions;
        self.voices.retain(|v| {
            let finished = v.start_frame + v.length <= window_end;
            if finished {
                let _ = completions.send(v.id);
            }
            !finished
        });
    }
}

fn interpolate(samples: &[f32], pos: f64) -> f32 {
    let index = pos.floor() as usize;
    let Some(&current) = samples.get(index) else {
        return 0.0;
    };
    let next = samples.get(index + 1).copied().unwrap_or(current);
    let frac = (pos - index as f64) as f32;
    current + (next - current) * frac
}

fn lock(mixer: &Mutex<Mixer>) -> MutexGuard<'_, Mixer> {
    mixer
        .lock()
        .unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// A cpal output stream driven by a [`Mixer`].
pub struct CpalOutput {
    _stream: Stream,
    mixer: Arc<Mutex<Mixer>>,
}

impl CpalOutput {
    pub fn open(config: &AudioConfig) -> Result<(Self, mpsc::UnboundedReceiver<VoiceId>)> {
        let host = cpal::default_host();

        let device = if let Some(ref name) = config.output_device {
            host.output_devices()
                .map_err(|e| LiveError::Audio(format!("failed to enumerate output devices: {e}")))?
                .find(|d| device_name(d).as_deref() == Some(name.as_str()))
                .ok_or_else(|| LiveError::Audio(format!("output device not found: {name}")))?
        } else {
            host.default_output_device().ok_or_else(|| {
                LiveError::Audio("no default output device available".to_string())
            })?
        };

        let rate = config.output_sample_rate;
        let preferred = device.supported_output_configs().ok().and_then(|mut configs| {
            configs
                .find(|c| {
                    c.sample_format() == SampleFormat::F32
                        && c.min_sample_rate() <= rate
                        && rate <= c.max_sample_rate()
                })
                .map(|c| c.with_sample_rate(rate))
        });

        let supported = match preferred {
            Some(c) => c,
            None => device.default_output_config().map_err(|e| {
                LiveError::Audio(format!("failed to get default output config: {e}"))
            })?,
        };

        let stream_config = StreamConfig {
            channels: supported.channels(),
            sample_rate: supported.sample_rate(),
            buffer_size: cpal::BufferSize::Default,
        };

        tracing::debug!(
            "output device: {} Hz, {} channel(s)",
            stream_config.sample_rate,
            stream_config.channels
        );

        let (completion_tx, completion_rx) = mpsc::unbounded_channel();
        let mixer = Arc::new(Mutex::new(Mixer::new(
            stream_config.sample_rate,
            stream_config.channels,
            completion_tx,
        )));

        let err_fn = |err: cpal::StreamError| {
            tracing::error!("output stream error: {err}");
        };

        let render_mixer = Arc::clone(&mixer);
        let stream = device
            .build_output_stream(
                &stream_config,
                move |data: &mut [f32], _info: &cpal::OutputCallbackInfo| {
                    lock(&render_mixer).render(data);
                },
                err_fn,
                None,
            )
            .map_err(|e| LiveError::Audio(format!("failed to build output stream: {e}")))?;

        stream
            .play()
            .map_err(|e| LiveError::Audio(format!("failed to start output stream: {e}")))?;

        Ok((
            Self {
                _stream: stream,
                mixer,
            },
            completion_rx,
        ))
    }
}

impl OutputDevice for CpalOutput {
    fn current_time(&self) -> f64 {
        lock(&self.mixer).current_time()
    }

    fn start(&mut self, id: VoiceId, buffer: PlaybackBuffer, at: f64) -> Result<()> {
        lock(&self.mixer).schedule(id, buffer, at);
        Ok(())
    }

    fn stop(&mut self, id: VoiceId) {
        lock(&self.mixer).stop(id);
    }
}

/// The system speakers as an [`AudioSink`].
pub struct Speaker {
    config: AudioConfig,
}

impl Speaker {
    #[must_use]
    pub const fn new(config: AudioConfig) -> Self {
        Self { config }
    }
}

impl AudioSink for Speaker {
    fn open(&mut self) -> Result<OpenedOutput> {
        let (device, completions) = CpalOutput::open(&self.config)?;
        Ok(OpenedOutput {
            device: Box::new(device),
            completions,
        })
    }
}

fn device_name(device: &cpal::Device) -> Option<String> {
    device
        .description()
        .ok()
        .map(|desc| desc.name().to_string())
}

/// Names of every output device the default host reports.
pub fn list_output_devices() -> Result<Vec<String>> {
    let host = cpal::default_host();
    let devices = host
        .output_devices()
        .map_err(|e| LiveError::Audio(format!("failed to enumerate output devices: {e}")))?;
    Ok(devices.filter_map(|d| device_name(&d)).collect())
}

#[must_use]
pub fn default_output_device_name() -> Option<String> {
    cpal::default_host()
        .default_output_device()
        .and_then(|d| device_name(&d))
}
