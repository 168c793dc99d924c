//! In-memory stand-ins for the audio devices and the transport.

use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::pcm::{self, EncodedFrame, PlaybackBuffer};
use crate::audio::{AudioSink, AudioSource, CaptureStream, OpenedOutput, OutputDevice, VoiceId};
use crate::error::{LiveError, Result};
use crate::net::{Connection, LiveSession, Outbound, SessionSetup, Transport, TransportEvent};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
}

/// Base64 PCM16 mono silence lasting `secs` at `rate`.
pub fn silence_chunk(rate: u32, secs: f64) -> String {
    let samples = (f64::from(rate) * secs).round() as usize;
    pcm::encode(&vec![0.0; samples], rate).data
}

#[derive(Default)]
struct OutputState {
    time: f64,
    started: Vec<(VoiceId, f64, f64)>,
    stopped: Vec<VoiceId>,
    completions: Option<mpsc::UnboundedSender<VoiceId>>,
}

/// Output device with a hand-driven clock that records what it was asked
/// to play and stop.
#[derive(Clone, Default)]
pub struct FakeOutput {
    state: Arc<Mutex<OutputState>>,
}

impl FakeOutput {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_time(&self, t: f64) {
        lock(&self.state).time = t;
    }

    /// `(id, start time, duration)` per started voice.
    pub fn started(&self) -> Vec<(VoiceId, f64, f64)> {
        lock(&self.state).started.clone()
    }

    pub fn stopped(&self) -> Vec<VoiceId> {
        lock(&self.state).stopped.clone()
    }

    /// Report `id` as finished, as the device would when it runs out.
    pub fn complete(&self, id: VoiceId) {
        if let Some(tx) = &lock(&self.state).completions {
            let _ = tx.send(id);
        }
    }
}

impl OutputDevice for FakeOutput {
    fn current_time(&self) -> f64 {
        lock(&self.state).time
    }

    fn start(&mut self, id: VoiceId, buffer: PlaybackBuffer, at: f64) -> Result<()> {
        lock(&self.state).started.push((id, at, buffer.duration()));
        Ok(())
    }

    fn stop(&mut self, id: VoiceId) {
        lock(&self.state).stopped.push(id);
    }
}

pub struct FakeSink {
    output: FakeOutput,
}

impl FakeSink {
    pub const fn new(output: FakeOutput) -> Self {
        Self { output }
    }
}

impl AudioSink for FakeSink {
    fn open(&mut self) -> Result<OpenedOutput> {
        let (tx, rx) = mpsc::unbounded_channel();
        lock(&self.output.state).completions = Some(tx);
        Ok(OpenedOutput {
            device: Box::new(self.output.clone()),
            completions: rx,
        })
    }
}

#[derive(Default)]
struct SourceState {
    deny: bool,
    fail_start: bool,
    released: usize,
    frames: Option<mpsc::Sender<EncodedFrame>>,
}

/// Input whose permission and capture outcome are set by the test.
#[derive(Clone, Default)]
pub struct FakeSource {
    state: Arc<Mutex<SourceState>>,
}

impl FakeSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn deny(&self, deny: bool) {
        lock(&self.state).deny = deny;
    }

    pub fn fail_start(&self, fail: bool) {
        lock(&self.state).fail_start = fail;
    }

    /// How many acquired captures have been dropped.
    pub fn released(&self) -> usize {
        lock(&self.state).released
    }

    pub fn capturing(&self) -> bool {
        lock(&self.state).frames.is_some()
    }

    /// Deliver one frame as if the microphone produced it.
    pub async fn emit(&self, frame: EncodedFrame) {
        let tx = lock(&self.state).frames.clone();
        if let Some(tx) = tx {
            let _ = tx.send(frame).await;
        }
    }
}

impl AudioSource for FakeSource {
    fn acquire(&mut self) -> Result<Box<dyn CaptureStream>> {
        if lock(&self.state).deny {
            return Err(LiveError::PermissionDenied("denied by test".to_string()));
        }
        Ok(Box::new(FakeCapture {
            state: Arc::clone(&self.state),
        }))
    }
}

struct FakeCapture {
    state: Arc<Mutex<SourceState>>,
}

impl CaptureStream for FakeCapture {
    fn start(&mut self, frames: mpsc::Sender<EncodedFrame>) -> Result<()> {
        let mut state = lock(&self.state);
        if state.fail_start {
            return Err(LiveError::Audio("capture refused to start".to_string()));
        }
        state.frames = Some(frames);
        Ok(())
    }
}

impl Drop for FakeCapture {
    fn drop(&mut self) {
        let mut state = lock(&self.state);
        state.frames = None;
        state.released += 1;
    }
}

#[derive(Default)]
struct TransportState {
    fail: bool,
    connects: usize,
    events: Option<mpsc::Sender<TransportEvent>>,
    outbound: Option<mpsc::UnboundedReceiver<Outbound>>,
}

/// Transport whose inbound events are pushed by the test and whose
/// outbound traffic is collected for inspection.
#[derive(Clone, Default)]
pub struct FakeTransport {
    state: Arc<Mutex<TransportState>>,
}

impl FakeTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, fail: bool) {
        lock(&self.state).fail = fail;
    }

    pub fn connects(&self) -> usize {
        lock(&self.state).connects
    }

    pub fn push(&self, event: TransportEvent) {
        if let Some(tx) = &lock(&self.state).events {
            let _ = tx.try_send(event);
        }
    }

    /// Drop the event sender, ending the inbound stream without a `Close`.
    pub fn hang_up(&self) {
        lock(&self.state).events = None;
    }

    /// Everything sent since the last call.
    pub fn outbound(&self) -> Vec<Outbound> {
        let mut state = lock(&self.state);
        let mut out = Vec::new();
        if let Some(rx) = state.outbound.as_mut() {
            while let Ok(item) = rx.try_recv() {
                out.push(item);
            }
        }
        out
    }
}

#[async_trait]
impl Transport for FakeTransport {
    async fn connect(&self, _setup: &SessionSetup) -> Result<Connection> {
        let mut state = lock(&self.state);
        state.connects += 1;
        if state.fail {
            return Err(LiveError::ConnectFailed("refused by test".to_string()));
        }

        let (event_tx, event_rx) = mpsc::channel(64);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        state.events = Some(event_tx);
        state.outbound = Some(outbound_rx);

        Ok(Connection {
            session: LiveSession::new(outbound_tx),
            events: event_rx,
        })
    }
}
