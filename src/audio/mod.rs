pub mod buffer;
pub mod capture;
pub mod file;
pub mod output;
pub mod pcm;
pub mod resample;

use tokio::sync::mpsc;

use crate::error::Result;

use self::pcm::{EncodedFrame, PlaybackBuffer};

/// Handle of one scheduled playback buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct VoiceId(pub u64);

/// Something that can be opened as an exclusive audio input.
pub trait AudioSource {
    /// Claim the input. Fails with `PermissionDenied` when no usable device
    /// is available to this process.
    fn acquire(&mut self) -> Result<Box<dyn CaptureStream>>;
}

/// An acquired input. Dropping it halts capture and releases the device.
pub trait CaptureStream {
    /// Begin delivering encoded frames; each frame is handed off without
    /// waiting on the consumer of the previous one.
    fn start(&mut self, frames: mpsc::Sender<EncodedFrame>) -> Result<()>;
}

/// An output clock that can play buffers at scheduled times.
pub trait OutputDevice {
    /// Monotonic seconds since the device opened.
    fn current_time(&self) -> f64;

    /// Play `buffer` starting at `at` seconds on the device clock.
    fn start(&mut self, id: VoiceId, buffer: PlaybackBuffer, at: f64) -> Result<()>;

    /// Silence a voice immediately. Unknown ids are ignored.
    fn stop(&mut self, id: VoiceId);
}

/// An opened output together with its natural-completion notifications.
pub struct OpenedOutput {
    pub device: Box<dyn OutputDevice>,
    pub completions: mpsc::UnboundedReceiver<VoiceId>,
}

/// Something that can be opened as an exclusive audio output.
pub trait AudioSink {
    fn open(&mut self) -> Result<OpenedOutput>;
}
