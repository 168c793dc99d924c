use std::path::PathBuf;

use tokio::sync::mpsc;

use crate::audio::AudioSource;
use crate::audio::capture::Microphone;
use crate::audio::file::WavFileSource;
use crate::audio::output::Speaker;
use crate::config::Config;
use crate::error::{LiveError, Result};
use crate::net::client::WebSocketTransport;
use crate::session::{SessionController, SessionEvent, SessionPhase};

const MICROPHONE_REQUIRED: &str = "Microphone access is required for live conversation.";

enum Tick {
    Shutdown,
    Stepped(bool),
}

/// Hold one conversation until Ctrl+C or the remote side closes.
///
/// With `file`, the WAV clip stands in for the microphone.
pub async fn run_live(config: Config, file: Option<PathBuf>) -> Result<()> {
    let source: Box<dyn AudioSource> = match file {
        Some(path) => Box::new(WavFileSource::new(
            path,
            config.audio.input_sample_rate,
            config.audio.frame_samples,
        )),
        None => Box::new(Microphone::new(config.audio.clone())),
    };
    let transport = WebSocketTransport::new(&config.transport)?;

    let (mut controller, mut events) = SessionController::new(
        Box::new(transport),
        source,
        Box::new(Speaker::new(config.audio.clone())),
        &config,
    );

    tracing::info!(
        "starting live session with {} (voice {})",
        config.session.model,
        config.session.voice
    );

    if let Err(e) = controller.start().await {
        if matches!(e, LiveError::PermissionDenied(_)) {
            eprintln!("{MICROPHONE_REQUIRED}");
        }
        return Err(e);
    }

    let (shutdown_tx, mut shutdown_rx) = tokio::sync::oneshot::channel::<()>();
    tokio::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!("received Ctrl+C, shutting down...");
        let _ = shutdown_tx.send(());
    });

    let mut failure = None;
    loop {
        let tick = tokio::select! {
            _ = &mut shutdown_rx => Tick::Shutdown,
            running = controller.step() => Tick::Stepped(running),
        };

        match tick {
            Tick::Shutdown => controller.stop(),
            Tick::Stepped(true) => {}
            Tick::Stepped(false) => break,
        }

        if let Some(e) = report(&controller, &mut events) {
            failure = Some(e);
        }

        if controller.phase() == SessionPhase::Idle {
            break;
        }
    }

    tracing::info!("live session ended");
    failure.map_or(Ok(()), Err)
}

/// Print transcript lines and log the rest. Returns a terminal failure
/// worth reporting to the caller; a remote close is a normal ending.
fn report(
    controller: &SessionController,
    events: &mut mpsc::UnboundedReceiver<SessionEvent>,
) -> Option<LiveError> {
    let mut failure = None;

    while let Ok(event) = events.try_recv() {
        match event {
            SessionEvent::Transcript(line) => {
                println!("{}", controller.transcript().render_stamped(&line));
            }
            SessionEvent::Phase(phase) => tracing::debug!("session {phase:?}"),
            SessionEvent::Interrupted => tracing::debug!("playback interrupted"),
            SessionEvent::TurnComplete => tracing::debug!("turn complete"),
            SessionEvent::Error(LiveError::TransportClosed(reason)) => {
                tracing::info!("session closed by remote: {reason}");
            }
            SessionEvent::Error(e) if e.is_terminal() => {
                tracing::error!("{e}");
                failure = Some(e);
            }
            SessionEvent::Error(e) => tracing::warn!("{e}"),
        }
    }

    failure
}
