use std::time::Duration;

use async_trait::async_trait;
use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream, connect_async};

use crate::config::TransportConfig;
use crate::error::{LiveError, Result};
use crate::net::protocol::{ClientMessage, Decoded, decode_server_frame};
use crate::net::{Connection, LiveSession, Outbound, SessionSetup, Transport, TransportEvent};

type Socket = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Inbound events buffered between the socket reader and the session loop.
const EVENT_BACKLOG: usize = 64;

/// WebSocket client for the Live bidirectional streaming endpoint.
pub struct WebSocketTransport {
    endpoint: String,
    api_key: String,
    connect_timeout: Duration,
}

impl WebSocketTransport {
    pub fn new(config: &TransportConfig) -> Result<Self> {
        Ok(Self {
            endpoint: config.endpoint.clone(),
            api_key: config.resolve_api_key()?,
            connect_timeout: Duration::from_secs(config.connect_timeout_secs),
        })
    }

    fn url(&self) -> String {
        let sep = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{sep}key={}", self.endpoint, self.api_key)
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn connect(&self, setup: &SessionSetup) -> Result<Connection> {
        tracing::info!("connecting to {}", self.endpoint);

        let (socket, _response) = tokio::time::timeout(self.connect_timeout, connect_async(self.url()))
            .await
            .map_err(|_| {
                LiveError::ConnectFailed(format!(
                    "no answer from {} within {}s",
                    self.endpoint,
                    self.connect_timeout.as_secs()
                ))
            })?
            .map_err(|e| LiveError::ConnectFailed(format!("{}: {e}", self.endpoint)))?;

        let (mut sink, stream) = socket.split();

        let setup_json = ClientMessage::setup(setup).to_json()?;
        sink.send(Message::Text(setup_json))
            .await
            .map_err(|e| LiveError::ConnectFailed(format!("failed to send setup: {e}")))?;

        let (event_tx, event_rx) = mpsc::channel(EVENT_BACKLOG);
        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();

        tokio::spawn(write_loop(sink, outbound_rx));
        tokio::spawn(read_loop(stream, event_tx));

        Ok(Connection {
            session: LiveSession::new(outbound_tx),
            events: event_rx,
        })
    }
}

async fn write_loop(
    mut sink: SplitSink<Socket, Message>,
    mut outbound: mpsc::UnboundedReceiver<Outbound>,
) {
    while let Some(item) = outbound.recv().await {
        match item {
            Outbound::Frame(frame) => {
                let json = match ClientMessage::audio(frame).to_json() {
                    Ok(json) => json,
                    Err(e) => {
                        tracing::warn!("{e}");
                        continue;
                    }
                };
                if let Err(e) = sink.send(Message::Text(json)).await {
                    tracing::warn!("send failed, stopping writer: {e}");
                    break;
                }
            }
            Outbound::Close => break,
        }
    }

    if let Err(e) = sink.close().await {
        tracing::debug!("close handshake: {e}");
    }
    tracing::debug!("session writer exiting");
}

async fn read_loop(mut stream: SplitStream<Socket>, events: mpsc::Sender<TransportEvent>) {
    let reason = loop {
        let Some(message) = stream.next().await else {
            break "connection ended".to_string();
        };

        let payload = match message {
            Ok(Message::Text(text)) => text.into_bytes(),
            Ok(Message::Binary(bytes)) => bytes,
            Ok(Message::Close(frame)) => {
                break frame.map_or_else(
                    || "closed by server".to_string(),
                    |f| format!("{} {}", u16::from(f.code), f.reason),
                );
            }
            Ok(_) => continue,
            Err(e) => {
                let _ = events.send(TransportEvent::Error(e.to_string())).await;
                break format!("read failed: {e}");
            }
        };

        let event = match decode_server_frame(&payload) {
            Ok(Decoded::SetupComplete) => TransportEvent::Open,
            Ok(Decoded::Content(msg)) => TransportEvent::Message(msg),
            Ok(Decoded::GoAway(time_left)) => {
                tracing::warn!("server closing soon (time left: {time_left})");
                continue;
            }
            Ok(Decoded::Ignored) => continue,
            Err(e) => TransportEvent::Error(e.to_string()),
        };

        if events.send(event).await.is_err() {
            tracing::debug!("session dropped its event stream");
            return;
        }
    };

    tracing::info!("session closed: {reason}");
    let _ = events.send(TransportEvent::Close { reason }).await;
}
