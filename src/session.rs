//! The conversation lifecycle as an explicit state machine.
//!
//! ```text
//! Idle ──start──▶ Connecting ──Open──▶ Active
//!  ▲                  │                  │
//!  └──── Closing ◀────┴── stop / Close ──┘
//! ```
//!
//! Each state owns exactly the resources that are live in it, so leaving a
//! state by any path (user stop, remote close, failure) releases the input,
//! the output and the transport by dropping them.

use std::mem;

use tokio::sync::mpsc;

use crate::audio::pcm::EncodedFrame;
use crate::audio::{AudioSink, AudioSource, CaptureStream, VoiceId};
use crate::config::{Config, ErrorPolicy};
use crate::error::{LiveError, Result};
use crate::net::{LiveSession, ServerMessage, SessionSetup, Transport, TransportEvent};
use crate::playback::PlaybackScheduler;
use crate::transcript::{Speaker, TranscriptLine, TranscriptLog};

/// Captured frames waiting for the loop to forward them.
const FRAME_BACKLOG: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Idle,
    Connecting,
    Active,
    Closing,
}

/// What the controller reports to whoever drives it.
#[derive(Debug)]
pub enum SessionEvent {
    Phase(SessionPhase),
    Transcript(TranscriptLine),
    Interrupted,
    TurnComplete,
    /// A failure or a remote close. Terminal kinds are followed by
    /// `Phase(Idle)`.
    Error(LiveError),
}

/// Everything one session holds exclusively.
struct Resources {
    capture: Box<dyn CaptureStream>,
    playback: PlaybackScheduler,
    completions: mpsc::UnboundedReceiver<VoiceId>,
    session: LiveSession,
    inbound: mpsc::Receiver<TransportEvent>,
}

impl Drop for Resources {
    fn drop(&mut self) {
        self.session.close();
    }
}

struct ActiveSession {
    resources: Resources,
    frames: mpsc::Receiver<EncodedFrame>,
}

enum State {
    Idle,
    /// Acquiring devices and dialing; nothing is owned yet.
    Starting,
    /// Dialed, waiting for the remote side to acknowledge the setup.
    Connecting(Resources),
    Active(ActiveSession),
    Closing,
}

enum Wake {
    Transport(TransportEvent),
    Frame(EncodedFrame),
    Completed(VoiceId),
}

pub struct SessionController {
    transport: Box<dyn Transport>,
    source: Box<dyn AudioSource>,
    sink: Box<dyn AudioSink>,
    setup: SessionSetup,
    output_sample_rate: u32,
    error_policy: ErrorPolicy,
    transcript: TranscriptLog,
    state: State,
    events: mpsc::UnboundedSender<SessionEvent>,
}

impl SessionController {
    pub fn new(
        transport: Box<dyn Transport>,
        source: Box<dyn AudioSource>,
        sink: Box<dyn AudioSink>,
        config: &Config,
    ) -> (Self, mpsc::UnboundedReceiver<SessionEvent>) {
        let (events, events_rx) = mpsc::unbounded_channel();
        let controller = Self {
            transport,
            source,
            sink,
            setup: SessionSetup::from(&config.session),
            output_sample_rate: config.audio.output_sample_rate,
            error_policy: config.session.on_transport_error,
            transcript: TranscriptLog::new(
                config.transcript.max_lines,
                &config.transcript.user_label,
                &config.transcript.model_label,
            ),
            state: State::Idle,
            events,
        };
        (controller, events_rx)
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        match self.state {
            State::Idle => SessionPhase::Idle,
            State::Starting | State::Connecting(_) => SessionPhase::Connecting,
            State::Active(_) => SessionPhase::Active,
            State::Closing => SessionPhase::Closing,
        }
    }

    #[must_use]
    pub const fn transcript(&self) -> &TranscriptLog {
        &self.transcript
    }

    /// The playback scheduler of the running session, if any.
    #[must_use]
    pub fn playback(&self) -> Option<&PlaybackScheduler> {
        match &self.state {
            State::Connecting(resources) => Some(&resources.playback),
            State::Active(active) => Some(&active.resources.playback),
            _ => None,
        }
    }

    /// Acquire the input and output and dial the transport.
    ///
    /// Only valid while idle. On any failure the controller is idle again
    /// and a later `start` begins clean. Start-up failures are only
    /// returned, never sent as `SessionEvent::Error`; the event stream
    /// carries just the `Connecting` and `Idle` phase changes.
    pub async fn start(&mut self) -> Result<()> {
        if !matches!(self.state, State::Idle) {
            return Err(LiveError::AlreadyActive);
        }

        self.transcript.clear();
        self.state = State::Starting;
        self.emit(SessionEvent::Phase(SessionPhase::Connecting));

        match self.open().await {
            Ok(resources) => {
                self.state = State::Connecting(resources);
                Ok(())
            }
            Err(e) => {
                tracing::warn!("session failed to start: {e}");
                self.state = State::Idle;
                self.emit(SessionEvent::Phase(SessionPhase::Idle));
                Err(e)
            }
        }
    }

    async fn open(&mut self) -> Result<Resources> {
        let capture = self.source.acquire()?;
        let output = self.sink.open()?;
        let connection = self.transport.connect(&self.setup).await?;

        Ok(Resources {
            capture,
            playback: PlaybackScheduler::new(output.device, self.output_sample_rate),
            completions: output.completions,
            session: connection.session,
            inbound: connection.events,
        })
    }

    /// Close the transport, halt capture, flush playback and go idle.
    /// A no-op when already idle.
    pub fn stop(&mut self) {
        if matches!(self.state, State::Idle) {
            return;
        }
        tracing::info!("stopping session");
        self.teardown();
    }

    /// Wait for the next thing the session must react to and handle it.
    ///
    /// Returns `false` without waiting when no session is running.
    pub async fn step(&mut self) -> bool {
        let wake = match &mut self.state {
            State::Idle | State::Starting | State::Closing => return false,
            State::Connecting(resources) => Wake::Transport(closed_if_none(
                resources.inbound.recv().await,
            )),
            State::Active(active) => {
                let resources = &mut active.resources;
                tokio::select! {
                    event = resources.inbound.recv() => Wake::Transport(closed_if_none(event)),
                    Some(frame) = active.frames.recv() => Wake::Frame(frame),
                    Some(id) = resources.completions.recv() => Wake::Completed(id),
                }
            }
        };

        self.dispatch(wake);
        true
    }

    /// Drive the session until it returns to idle.
    pub async fn run_until_idle(&mut self) {
        while self.step().await {}
    }

    fn dispatch(&mut self, wake: Wake) {
        match wake {
            Wake::Frame(frame) => {
                if let State::Active(active) = &self.state {
                    active.resources.session.send(frame);
                }
            }
            Wake::Completed(id) => {
                if let State::Active(active) = &mut self.state {
                    active.resources.playback.on_completed(id);
                }
            }
            Wake::Transport(event) => self.on_transport_event(event),
        }
    }

    fn on_transport_event(&mut self, event: TransportEvent) {
        match event {
            TransportEvent::Open => self.on_open(),
            TransportEvent::Message(msg) => match &mut self.state {
                State::Active(active) => Self::on_message(
                    active,
                    &mut self.transcript,
                    &self.events,
                    msg,
                ),
                _ => tracing::debug!("dropping message received before open"),
            },
            TransportEvent::Error(message) => {
                tracing::warn!("transport error: {message}");
                self.emit(SessionEvent::Error(LiveError::Transport(message)));
                if self.error_policy == ErrorPolicy::Stop {
                    self.teardown();
                }
            }
            TransportEvent::Close { reason } => {
                let error = match self.state {
                    State::Connecting(_) => LiveError::ConnectFailed(reason),
                    _ => LiveError::TransportClosed(reason),
                };
                self.emit(SessionEvent::Error(error));
                self.teardown();
            }
        }
    }

    fn on_open(&mut self) {
        let State::Connecting(_) = self.state else {
            tracing::debug!("ignoring open outside of connecting");
            return;
        };
        let State::Connecting(mut resources) = mem::replace(&mut self.state, State::Starting)
        else {
            return;
        };

        let (frames_tx, frames_rx) = mpsc::channel(FRAME_BACKLOG);
        if let Err(e) = resources.capture.start(frames_tx) {
            tracing::error!("failed to start capture: {e}");
            self.state = State::Connecting(resources);
            self.emit(SessionEvent::Error(e));
            self.teardown();
            return;
        }

        tracing::info!("session active");
        self.state = State::Active(ActiveSession {
            resources,
            frames: frames_rx,
        });
        self.emit(SessionEvent::Phase(SessionPhase::Active));
    }

    fn on_message(
        active: &mut ActiveSession,
        transcript: &mut TranscriptLog,
        events: &mpsc::UnboundedSender<SessionEvent>,
        msg: ServerMessage,
    ) {
        let playback = &mut active.resources.playback;

        for chunk in &msg.audio {
            if let Err(e) = playback.on_audio_chunk(chunk) {
                tracing::warn!("skipping audio chunk: {e}");
            }
        }

        if let Some(text) = msg.input_transcription {
            let line = transcript.push(Speaker::User, &text).clone();
            let _ = events.send(SessionEvent::Transcript(line));
        }
        if let Some(text) = msg.output_transcription {
            let line = transcript.push(Speaker::Model, &text).clone();
            let _ = events.send(SessionEvent::Transcript(line));
        }

        if msg.interrupted {
            playback.on_interrupted();
            let _ = events.send(SessionEvent::Interrupted);
        }

        if msg.turn_complete {
            let _ = events.send(SessionEvent::TurnComplete);
        }
    }

    fn teardown(&mut self) {
        let previous = mem::replace(&mut self.state, State::Closing);
        self.emit(SessionEvent::Phase(SessionPhase::Closing));
        drop(previous);
        self.state = State::Idle;
        self.emit(SessionEvent::Phase(SessionPhase::Idle));
    }

    fn emit(&self, event: SessionEvent) {
        let _ = self.events.send(event);
    }
}

fn closed_if_none(event: Option<TransportEvent>) -> TransportEvent {
    event.unwrap_or_else(|| TransportEvent::Close {
        reason: "event stream ended".to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Outbound;
    use crate::testing::{FakeOutput, FakeSink, FakeSource, FakeTransport, silence_chunk};

    struct Harness {
        controller: SessionController,
        events: mpsc::UnboundedReceiver<SessionEvent>,
        source: FakeSource,
        output: FakeOutput,
        transport: FakeTransport,
    }

    fn harness_with(config: &Config) -> Harness {
        let source = FakeSource::new();
        let output = FakeOutput::new();
        let transport = FakeTransport::new();
        let (controller, events) = SessionController::new(
            Box::new(transport.clone()),
            Box::new(source.clone()),
            Box::new(FakeSink::new(output.clone())),
            config,
        );
        Harness {
            controller,
            events,
            source,
            output,
            transport,
        }
    }

    fn harness() -> Harness {
        harness_with(&Config::default())
    }

    fn drain(events: &mut mpsc::UnboundedReceiver<SessionEvent>) -> Vec<SessionEvent> {
        let mut out = Vec::new();
        while let Ok(event) = events.try_recv() {
            out.push(event);
        }
        out
    }

    fn phases(events: &[SessionEvent]) -> Vec<SessionPhase> {
        events
            .iter()
            .filter_map(|e| match e {
                SessionEvent::Phase(p) => Some(*p),
                _ => None,
            })
            .collect()
    }

    async fn activate(h: &mut Harness) {
        h.controller.start().await.unwrap_or_else(|e| panic!("{e}"));
        h.transport.push(TransportEvent::Open);
        assert!(h.controller.step().await);
        assert_eq!(h.controller.phase(), SessionPhase::Active);
    }

    fn audio(chunks: Vec<String>) -> TransportEvent {
        TransportEvent::Message(ServerMessage {
            audio: chunks,
            ..ServerMessage::default()
        })
    }

    #[tokio::test]
    async fn microphone_denied_returns_to_idle_and_can_restart() {
        let mut h = harness();
        h.source.deny(true);

        let result = h.controller.start().await;
        assert!(matches!(result, Err(LiveError::PermissionDenied(_))));
        assert_eq!(h.controller.phase(), SessionPhase::Idle);
        let events = drain(&mut h.events);
        assert_eq!(
            phases(&events),
            vec![SessionPhase::Connecting, SessionPhase::Idle]
        );
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Error(_))));
        assert_eq!(h.transport.connects(), 0);

        h.source.deny(false);
        tokio_test::assert_ok!(h.controller.start().await);
        assert_eq!(h.controller.phase(), SessionPhase::Connecting);
    }

    #[tokio::test]
    async fn connect_failure_releases_devices() {
        let mut h = harness();
        h.transport.fail(true);

        let result = h.controller.start().await;
        assert!(matches!(result, Err(LiveError::ConnectFailed(_))));
        assert_eq!(h.controller.phase(), SessionPhase::Idle);
        let events = drain(&mut h.events);
        assert_eq!(
            phases(&events),
            vec![SessionPhase::Connecting, SessionPhase::Idle]
        );
        assert!(!events.iter().any(|e| matches!(e, SessionEvent::Error(_))));
        assert_eq!(h.source.released(), 1);
        assert!(h.controller.playback().is_none());
    }

    #[tokio::test]
    async fn open_starts_capture_and_forwards_frames() {
        let mut h = harness();
        h.controller.start().await.unwrap_or_else(|e| panic!("{e}"));
        assert!(!h.source.capturing());

        h.transport.push(TransportEvent::Open);
        assert!(h.controller.step().await);
        assert_eq!(h.controller.phase(), SessionPhase::Active);
        assert!(h.source.capturing());

        let frame = crate::audio::pcm::encode(&[0.1; 16], 16000);
        h.source.emit(frame.clone()).await;
        assert!(h.controller.step().await);

        assert_eq!(h.transport.outbound(), vec![Outbound::Frame(frame)]);
    }

    #[tokio::test]
    async fn second_start_is_rejected() {
        let mut h = harness();
        activate(&mut h).await;

        let result = h.controller.start().await;
        assert!(matches!(result, Err(LiveError::AlreadyActive)));
        assert_eq!(h.controller.phase(), SessionPhase::Active);
        assert_eq!(h.transport.connects(), 1);
    }

    #[tokio::test]
    async fn three_chunks_play_back_to_back() {
        let mut h = harness();
        activate(&mut h).await;
        h.output.set_time(4.0);

        let chunk = silence_chunk(24000, 0.5);
        for _ in 0..3 {
            h.transport.push(audio(vec![chunk.clone()]));
            assert!(h.controller.step().await);
        }

        let starts: Vec<f64> = h.output.started().iter().map(|s| s.1).collect();
        assert_eq!(starts.len(), 3);
        for (got, want) in starts.iter().zip([4.0, 4.5, 5.0]) {
            assert!((got - want).abs() < 1e-9, "{got} != {want}");
        }
    }

    #[tokio::test]
    async fn interruption_stops_playing_buffers() {
        let mut h = harness();
        activate(&mut h).await;

        let chunk = silence_chunk(24000, 0.5);
        h.transport.push(audio(vec![chunk.clone(), chunk]));
        assert!(h.controller.step().await);
        assert_eq!(h.controller.playback().map(PlaybackScheduler::active_count), Some(2));

        h.transport.push(TransportEvent::Message(ServerMessage {
            interrupted: true,
            ..ServerMessage::default()
        }));
        assert!(h.controller.step().await);

        assert_eq!(h.controller.playback().map(PlaybackScheduler::active_count), Some(0));
        assert_eq!(h.output.stopped().len(), 2);
        assert_eq!(h.controller.phase(), SessionPhase::Active);
        assert!(drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, SessionEvent::Interrupted)));
    }

    #[tokio::test]
    async fn stop_while_idle_is_a_no_op() {
        let mut h = harness();
        h.controller.stop();
        assert_eq!(h.controller.phase(), SessionPhase::Idle);
        assert!(drain(&mut h.events).is_empty());
        assert!(!h.controller.step().await);
    }

    #[tokio::test]
    async fn stop_releases_everything() {
        let mut h = harness();
        activate(&mut h).await;
        h.transport.push(audio(vec![silence_chunk(24000, 0.5)]));
        assert!(h.controller.step().await);
        drain(&mut h.events);

        h.controller.stop();

        assert_eq!(h.controller.phase(), SessionPhase::Idle);
        assert_eq!(
            phases(&drain(&mut h.events)),
            vec![SessionPhase::Closing, SessionPhase::Idle]
        );
        assert_eq!(h.source.released(), 1);
        assert_eq!(h.output.stopped().len(), 1);
        assert_eq!(h.transport.outbound(), vec![Outbound::Close]);

        h.controller.stop();
        assert!(drain(&mut h.events).is_empty());
    }

    #[tokio::test]
    async fn remote_close_returns_to_idle() {
        let mut h = harness();
        activate(&mut h).await;
        drain(&mut h.events);

        h.transport.push(TransportEvent::Close {
            reason: "bye".to_string(),
        });
        assert!(h.controller.step().await);

        assert_eq!(h.controller.phase(), SessionPhase::Idle);
        let events = drain(&mut h.events);
        assert!(matches!(
            events.first(),
            Some(SessionEvent::Error(LiveError::TransportClosed(_)))
        ));
        assert_eq!(h.source.released(), 1);

        // Restartable after a remote close.
        tokio_test::assert_ok!(h.controller.start().await);
    }

    #[tokio::test]
    async fn close_before_open_is_a_connect_failure() {
        let mut h = harness();
        h.controller.start().await.unwrap_or_else(|e| panic!("{e}"));
        drain(&mut h.events);

        h.transport.push(TransportEvent::Close {
            reason: "setup rejected".to_string(),
        });
        assert!(h.controller.step().await);

        assert_eq!(h.controller.phase(), SessionPhase::Idle);
        assert!(matches!(
            drain(&mut h.events).first(),
            Some(SessionEvent::Error(LiveError::ConnectFailed(_)))
        ));
    }

    #[tokio::test]
    async fn dropped_event_stream_counts_as_close() {
        let mut h = harness();
        activate(&mut h).await;

        h.transport.hang_up();
        assert!(h.controller.step().await);
        assert_eq!(h.controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn transport_error_keeps_session_by_default() {
        let mut h = harness();
        activate(&mut h).await;

        h.transport.push(TransportEvent::Error("hiccup".to_string()));
        assert!(h.controller.step().await);

        assert_eq!(h.controller.phase(), SessionPhase::Active);
        assert!(drain(&mut h.events)
            .iter()
            .any(|e| matches!(e, SessionEvent::Error(LiveError::Transport(_)))));
    }

    #[tokio::test]
    async fn transport_error_stops_when_configured() {
        let mut config = Config::default();
        config.session.on_transport_error = ErrorPolicy::Stop;
        let mut h = harness_with(&config);
        activate(&mut h).await;

        h.transport.push(TransportEvent::Error("hiccup".to_string()));
        assert!(h.controller.step().await);
        assert_eq!(h.controller.phase(), SessionPhase::Idle);
    }

    #[tokio::test]
    async fn transcripts_are_logged_in_order() {
        let mut h = harness();
        activate(&mut h).await;
        drain(&mut h.events);

        h.transport.push(TransportEvent::Message(ServerMessage {
            input_transcription: Some("namaste".to_string()),
            output_transcription: Some("radhe radhe".to_string()),
            ..ServerMessage::default()
        }));
        assert!(h.controller.step().await);

        let rendered = h.controller.transcript().to_string();
        assert_eq!(rendered, "You: namaste\nBolo: radhe radhe\n");

        let lines: Vec<Speaker> = drain(&mut h.events)
            .into_iter()
            .filter_map(|e| match e {
                SessionEvent::Transcript(line) => Some(line.speaker),
                _ => None,
            })
            .collect();
        assert_eq!(lines, vec![Speaker::User, Speaker::Model]);
    }

    #[tokio::test]
    async fn transcript_is_cleared_on_start() {
        let mut h = harness();
        activate(&mut h).await;
        h.transport.push(TransportEvent::Message(ServerMessage {
            output_transcription: Some("hello".to_string()),
            ..ServerMessage::default()
        }));
        assert!(h.controller.step().await);
        assert_eq!(h.controller.transcript().len(), 1);

        h.controller.stop();
        h.controller.start().await.unwrap_or_else(|e| panic!("{e}"));
        assert!(h.controller.transcript().is_empty());
    }

    #[tokio::test]
    async fn malformed_chunk_is_skipped() {
        let mut h = harness();
        activate(&mut h).await;

        h.transport.push(audio(vec!["AAAA".to_string(), silence_chunk(24000, 0.5)]));
        assert!(h.controller.step().await);

        assert_eq!(h.controller.phase(), SessionPhase::Active);
        assert_eq!(h.output.started().len(), 1);
    }

    #[tokio::test]
    async fn natural_completion_shrinks_active_set() {
        let mut h = harness();
        activate(&mut h).await;
        h.transport.push(audio(vec![silence_chunk(24000, 0.5)]));
        assert!(h.controller.step().await);

        let id = h.output.started()[0].0;
        h.output.complete(id);
        assert!(h.controller.step().await);
        assert_eq!(h.controller.playback().map(PlaybackScheduler::active_count), Some(0));
    }

    #[tokio::test]
    async fn messages_before_open_are_dropped() {
        let mut h = harness();
        h.controller.start().await.unwrap_or_else(|e| panic!("{e}"));

        h.transport.push(audio(vec![silence_chunk(24000, 0.5)]));
        assert!(h.controller.step().await);

        assert_eq!(h.controller.phase(), SessionPhase::Connecting);
        assert!(h.output.started().is_empty());
    }

    #[tokio::test]
    async fn capture_failure_on_open_tears_down() {
        let mut h = harness();
        h.source.fail_start(true);
        h.controller.start().await.unwrap_or_else(|e| panic!("{e}"));

        h.transport.push(TransportEvent::Open);
        assert!(h.controller.step().await);

        assert_eq!(h.controller.phase(), SessionPhase::Idle);
        assert_eq!(h.source.released(), 1);
    }
}
