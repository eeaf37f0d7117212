//! Capture adapter: Stopped/Listening state machine over a recognizer

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::state::TurnController;

use super::recognizer::{CaptureError, RecognizerEvent, SpeechRecognizer};
use super::{CaptureState, RECOGNITION_LANG};

/// Continuous speech capture feeding the turn controller
pub struct CaptureAdapter {
    recognizer: Arc<dyn SpeechRecognizer>,
    controller: TurnController,
    supported: bool,
    listening: Arc<AtomicBool>,
    /// Bumped on every start/stop so a stale session cannot reset a newer one
    generation: Arc<AtomicU64>,
}

impl CaptureAdapter {
    /// Probe the recognizer once; an unavailable one disables capture for
    /// the rest of the session
    pub async fn new(recognizer: Arc<dyn SpeechRecognizer>, controller: TurnController) -> Self {
        let supported = recognizer.is_available();
        if !supported {
            warn!("speech recognition unavailable, voice capture disabled");
            controller.set_capture_state(CaptureState::Unsupported).await;
        }

        Self {
            recognizer,
            controller,
            supported,
            listening: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn state(&self) -> CaptureState {
        if !self.supported {
            CaptureState::Unsupported
        } else if self.listening.load(Ordering::SeqCst) {
            CaptureState::Listening
        } else {
            CaptureState::Stopped
        }
    }

    /// Start listening; no-op when already listening
    pub async fn start(&self) -> Result<CaptureState, CaptureError> {
        if !self.supported {
            return Err(CaptureError::Unsupported);
        }

        if self.listening.swap(true, Ordering::SeqCst) {
            debug!("capture already listening");
            return Ok(CaptureState::Listening);
        }

        let (event_tx, event_rx) = mpsc::channel(32);
        if let Err(e) = self.recognizer.start(RECOGNITION_LANG, event_tx) {
            self.listening.store(false, Ordering::SeqCst);
            warn!(error = %e, "failed to start recognizer");
            return Err(e);
        }

        let session = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        info!(session, lang = RECOGNITION_LANG, "capture session started");

        // Partial text is cleared at the start of every session
        self.controller.publish_partial("");
        self.controller
            .set_capture_state(CaptureState::Listening)
            .await;

        tokio::spawn(run_session(
            event_rx,
            self.controller.clone(),
            Arc::clone(&self.listening),
            Arc::clone(&self.generation),
            session,
        ));

        Ok(CaptureState::Listening)
    }

    /// Stop listening; no-op when already stopped
    pub async fn stop(&self) -> CaptureState {
        if !self.listening.swap(false, Ordering::SeqCst) {
            return self.state();
        }

        self.generation.fetch_add(1, Ordering::SeqCst);
        self.recognizer.stop();
        info!("capture session stopped");
        self.controller.set_capture_state(CaptureState::Stopped).await;

        CaptureState::Stopped
    }

    /// Start when stopped, stop when listening
    pub async fn toggle(&self) -> Result<CaptureState, CaptureError> {
        if self.listening.load(Ordering::SeqCst) {
            Ok(self.stop().await)
        } else {
            self.start().await
        }
    }
}

/// Drain one session's recognizer events until it ends
async fn run_session(
    mut events: mpsc::Receiver<RecognizerEvent>,
    controller: TurnController,
    listening: Arc<AtomicBool>,
    generation: Arc<AtomicU64>,
    session: u64,
) {
    while let Some(event) = events.recv().await {
        match event {
            RecognizerEvent::Result(segments) => {
                let mut final_text = String::new();
                let mut interim_text = String::new();
                for segment in segments {
                    if segment.is_final {
                        final_text.push_str(&segment.text);
                    } else {
                        interim_text.push_str(&segment.text);
                    }
                }

                if final_text.is_empty() {
                    controller.publish_partial(&interim_text);
                    continue;
                }

                // Finalized: submit and drop any pending partial text
                controller.publish_partial("");
                debug!(session, chars = final_text.len(), "final transcript");
                let controller = controller.clone();
                tokio::spawn(async move {
                    controller.submit_user_utterance(&final_text).await;
                });
            }
            RecognizerEvent::Error(message) => {
                warn!(session, error = %message, "speech recognition error");
                break;
            }
            RecognizerEvent::End => {
                debug!(session, "speech recognition ended");
                break;
            }
        }
    }

    // Only the current session may flip the flag back
    if generation
        .compare_exchange(session, session + 1, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        listening.store(false, Ordering::SeqCst);
        controller.publish_partial("");
        controller.set_capture_state(CaptureState::Stopped).await;
        info!(session, "capture session ended");
    }
}
