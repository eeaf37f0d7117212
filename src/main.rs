//! interview-coach: voice-driven interview practice daemon
//!
//! The daemon provides:
//! - A turn controller sequencing speech → completion request → reply
//! - Continuous speech capture feeding the controller
//! - Spoken playback of replies
//! - IPC server through which a shell renders the transcript, manages the
//!   API key and offers sample questions

mod capture;
mod completion;
mod config;
mod credential;
mod events;
mod ipc;
mod lifecycle;
mod playback;
mod samples;
mod state;

use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::sync::broadcast;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::capture::{CaptureAdapter, LineRecognizer, SpeechRecognizer, UnavailableRecognizer};
use crate::completion::HttpCompletionClient;
use crate::config::{Config, RecognizerKind};
use crate::credential::FileCredentialStore;
use crate::events::ConversationEvent;
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::playback::{CommandSynthesizer, PlaybackAdapter, SilentSynthesizer, SpeechSynthesizer};
use crate::state::TurnController;

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "interview-coach starting");

    // Load configuration
    let config = Config::load()?;
    config.ensure_dirs().context("failed to create data directory")?;
    info!(?config.socket_path, endpoint = %config.endpoint, model = %config.model, "configuration loaded");

    // Create shutdown signal handler
    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    // Controller -> IPC subscribers and the log below
    let (event_tx, _event_rx) = broadcast::channel::<ConversationEvent>(64);

    let synthesizer: Arc<dyn SpeechSynthesizer> = match config
        .tts_command
        .as_deref()
        .and_then(CommandSynthesizer::from_command_line)
    {
        Some(command) => {
            info!(?command, "speech output enabled");
            Arc::new(command)
        }
        None => {
            info!("no TTS command configured, speech output disabled");
            Arc::new(SilentSynthesizer)
        }
    };

    let credential_store = FileCredentialStore::new(&config.data_dir);
    info!(path = %credential_store.path().display(), "credential store");

    let controller = TurnController::new(
        Arc::new(HttpCompletionClient::new(&config.endpoint, &config.model)),
        Arc::new(credential_store),
        PlaybackAdapter::new(synthesizer),
        event_tx.clone(),
        config.sample_delay,
    );

    let recognizer: Arc<dyn SpeechRecognizer> = match config.recognizer {
        RecognizerKind::Stdin => Arc::new(LineRecognizer::stdin()),
        RecognizerKind::None => Arc::new(UnavailableRecognizer),
    };
    let capture = Arc::new(CaptureAdapter::new(recognizer, controller.clone()).await);

    // Listen straight away when a recognizer is present
    match capture.start().await {
        Ok(state) => info!(%state, "voice capture ready"),
        Err(e) => warn!(error = %e, "voice capture unavailable"),
    }

    if !controller.has_credential().await {
        warn!("no API key configured, set one from the shell before asking questions");
    }

    let server = Server::new(&config.socket_path, controller.clone(), Arc::clone(&capture))?;

    let mut log_event_rx = event_tx.subscribe();

    info!(
        processing = %controller.processing_state().await,
        recording = controller.is_recording().await,
        "daemon initialized, entering main loop"
    );

    // Main event loop
    tokio::select! {
        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
        }

        // Mirror conversation events into the log
        _ = async {
            loop {
                match log_event_rx.recv().await {
                    Ok(ConversationEvent::TurnAppended { turn }) => {
                        info!(speaker = %turn.speaker(), turn_id = %turn.id(), "{}", turn.text());
                    }
                    Ok(event) => info!(%event, "conversation event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "event log receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("event log exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received");
        }
    }

    // Cleanup
    info!("shutting down...");

    capture.stop().await;
    server.shutdown().await;

    info!("interview-coach stopped");

    Ok(())
}
