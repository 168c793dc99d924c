pub mod client;
pub mod protocol;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::audio::pcm::EncodedFrame;
use crate::config::SessionConfig;
use crate::error::Result;

/// What the remote model is asked to be for one session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSetup {
    pub model: String,
    pub voice: String,
    pub system_instruction: String,
    pub input_transcription: bool,
    pub output_transcription: bool,
}

impl From<&SessionConfig> for SessionSetup {
    fn from(config: &SessionConfig) -> Self {
        Self {
            model: config.model.clone(),
            voice: config.voice.clone(),
            system_instruction: config.system_instruction.clone(),
            input_transcription: config.input_transcription,
            output_transcription: config.output_transcription,
        }
    }
}

/// One inbound server message, reduced to what the session acts on.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ServerMessage {
    /// Base64 PCM16 chunks, in the order the server listed them.
    pub audio: Vec<String>,
    pub input_transcription: Option<String>,
    pub output_transcription: Option<String>,
    pub interrupted: bool,
    pub turn_complete: bool,
}

/// Inbound events: at most one `Open`, any number of `Message`/`Error`,
/// then exactly one `Close`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Open,
    Message(ServerMessage),
    Error(String),
    Close { reason: String },
}

/// Outbound traffic for the transport's writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    Frame(EncodedFrame),
    Close,
}

/// Send half of an open session. Sends never wait on the network.
#[derive(Debug, Clone)]
pub struct LiveSession {
    outbound: mpsc::UnboundedSender<Outbound>,
}

impl LiveSession {
    #[must_use]
    pub const fn new(outbound: mpsc::UnboundedSender<Outbound>) -> Self {
        Self { outbound }
    }

    pub fn send(&self, frame: EncodedFrame) {
        if self.outbound.send(Outbound::Frame(frame)).is_err() {
            tracing::trace!("session writer gone, dropping frame");
        }
    }

    pub fn close(&self) {
        let _ = self.outbound.send(Outbound::Close);
    }
}

/// A connected session: the send half plus its inbound event stream.
pub struct Connection {
    pub session: LiveSession,
    pub events: mpsc::Receiver<TransportEvent>,
}

/// Opens bidirectional sessions with the remote model.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn connect(&self, setup: &SessionSetup) -> Result<Connection>;
}
