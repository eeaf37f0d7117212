//! Turn controller: the processing state machine
//!
//! Sequences user input → completion request → assistant turn → playback.
//! Every completion failure becomes an ordinary assistant turn.

use std::sync::Arc;
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, RwLock};
use tracing::{debug, error, info, warn};

use crate::capture::CaptureState;
use crate::completion::{CompletionClient, CompletionError};
use crate::credential::{Credential, CredentialStore};
use crate::events::ConversationEvent;
use crate::playback::PlaybackAdapter;

use super::transcript::{Speaker, Transcript, Turn};

/// Whether a completion request is in flight
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingState {
    #[default]
    Idle,
    AwaitingReply,
}

impl std::fmt::Display for ProcessingState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessingState::Idle => write!(f, "Idle"),
            ProcessingState::AwaitingReply => write!(f, "AwaitingReply"),
        }
    }
}

/// Where a submission came from
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitSource {
    /// Finalized speech from the capture adapter
    Voice,
    /// A canned prompt picked in the shell
    Sample,
}

/// What a submit call did; the transcript remains the source of truth
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitOutcome {
    /// Blank input, nothing appended
    Ignored,
    /// A reply was already pending, nothing appended
    Rejected,
    /// Reply appended and spoken
    Answered,
    /// Error message appended as the assistant turn
    Failed,
}

/// Snapshot for status queries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerStatus {
    pub processing: ProcessingState,
    pub capture: CaptureState,
    pub credential_configured: bool,
    pub turns: usize,
}

struct ConversationState {
    transcript: Transcript,
    processing: ProcessingState,
    /// Time when AwaitingReply was entered
    state_entered_at: Option<Instant>,
    credential: Option<Credential>,
    capture: CaptureState,
}

struct Shared {
    state: RwLock<ConversationState>,
    completion: Arc<dyn CompletionClient>,
    credentials: Arc<dyn CredentialStore>,
    playback: PlaybackAdapter,
    event_tx: broadcast::Sender<ConversationEvent>,
    sample_delay: Duration,
}

/// Single authority over the transcript and the processing flag.
///
/// Cheap to clone; every clone drives the same conversation.
#[derive(Clone)]
pub struct TurnController {
    shared: Arc<Shared>,
}

impl TurnController {
    /// Create a controller, reading the stored credential once
    pub fn new(
        completion: Arc<dyn CompletionClient>,
        credentials: Arc<dyn CredentialStore>,
        playback: PlaybackAdapter,
        event_tx: broadcast::Sender<ConversationEvent>,
        sample_delay: Duration,
    ) -> Self {
        let credential = match credentials.load() {
            Ok(credential) => credential,
            Err(e) => {
                warn!(error = %e, "failed to load stored credential, starting without one");
                None
            }
        };

        info!(
            credential_configured = credential.is_some(),
            "turn controller started in Idle state"
        );

        Self {
            shared: Arc::new(Shared {
                state: RwLock::new(ConversationState {
                    transcript: Transcript::new(),
                    processing: ProcessingState::Idle,
                    state_entered_at: None,
                    credential,
                    capture: CaptureState::Stopped,
                }),
                completion,
                credentials,
                playback,
                event_tx,
                sample_delay,
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.shared.event_tx.subscribe()
    }

    /// Submit finalized speech
    pub async fn submit_user_utterance(&self, text: &str) -> SubmitOutcome {
        self.submit(text, SubmitSource::Voice).await
    }

    /// Submit a canned prompt; dispatch waits for the configured sample delay
    pub async fn submit_sample_question(&self, text: &str) -> SubmitOutcome {
        self.submit(text, SubmitSource::Sample).await
    }

    async fn submit(&self, text: &str, source: SubmitSource) -> SubmitOutcome {
        let text = text.trim();
        if text.is_empty() {
            debug!(?source, "ignoring blank submission");
            return SubmitOutcome::Ignored;
        }

        let credential = {
            let mut state = self.shared.state.write().await;

            if state.processing == ProcessingState::AwaitingReply {
                warn!(?source, "reply already pending, rejecting submission");
                self.emit(ConversationEvent::SubmissionRejected {
                    text: text.to_string(),
                });
                return SubmitOutcome::Rejected;
            }

            let turn = state.transcript.append(text, Speaker::User);
            info!(turn_id = %turn.id(), ?source, "user turn appended");
            self.emit(ConversationEvent::TurnAppended { turn });
            self.transition_to(&mut state, ProcessingState::AwaitingReply);

            state.credential.clone()
        };

        if source == SubmitSource::Sample && !self.shared.sample_delay.is_zero() {
            tokio::time::sleep(self.shared.sample_delay).await;
        }

        let result = match credential {
            Some(credential) => self.shared.completion.complete(&credential, text).await,
            None => Err(CompletionError::MissingCredential),
        };

        let (reply, outcome) = match result {
            Ok(reply) => (reply, SubmitOutcome::Answered),
            Err(e) => {
                error!(code = e.code(), error = %e, "error getting completion");
                (error_reply(&e), SubmitOutcome::Failed)
            }
        };

        {
            let mut state = self.shared.state.write().await;
            let turn = state.transcript.append(reply.as_str(), Speaker::Assistant);
            info!(turn_id = %turn.id(), ?outcome, "assistant turn appended");
            self.emit(ConversationEvent::TurnAppended { turn });
            self.transition_to(&mut state, ProcessingState::Idle);
        }

        if outcome == SubmitOutcome::Answered {
            self.shared.playback.speak(&reply);
        }

        outcome
    }

    /// Snapshot of every turn so far
    pub async fn transcript(&self) -> Vec<Turn> {
        self.shared.state.read().await.transcript.turns().to_vec()
    }

    pub async fn processing_state(&self) -> ProcessingState {
        self.shared.state.read().await.processing
    }

    pub async fn is_recording(&self) -> bool {
        self.shared.state.read().await.capture == CaptureState::Listening
    }

    pub async fn status(&self) -> ControllerStatus {
        let state = self.shared.state.read().await;
        ControllerStatus {
            processing: state.processing,
            capture: state.capture,
            credential_configured: state.credential.is_some(),
            turns: state.transcript.len(),
        }
    }

    pub async fn has_credential(&self) -> bool {
        self.shared.state.read().await.credential.is_some()
    }

    /// Save a credential; a blank value clears it. Returns whether one is set.
    pub async fn set_credential(&self, value: &str) -> bool {
        let credential = Credential::new(value);
        let configured = credential.is_some();

        // Memory wins even if the disk write fails
        if let Err(e) = self.shared.credentials.save(credential.as_ref()) {
            warn!(error = %e, "failed to persist credential");
        }

        self.shared.state.write().await.credential = credential;
        info!(configured, "credential updated");
        self.emit(ConversationEvent::CredentialChanged { configured });
        configured
    }

    pub async fn clear_credential(&self) {
        self.set_credential("").await;
    }

    /// Recording-state observer for the capture adapter
    pub async fn set_capture_state(&self, capture: CaptureState) {
        let mut state = self.shared.state.write().await;
        if state.capture == capture {
            return;
        }

        info!(from = %state.capture, to = %capture, "capture state changed");
        state.capture = capture;
        self.emit(ConversationEvent::CaptureChanged { state: capture });
    }

    /// Forward interim recognizer text for live display
    pub fn publish_partial(&self, text: &str) {
        self.emit(ConversationEvent::TranscriptPartial {
            text: text.to_string(),
        });
    }

    /// Perform a processing state transition
    fn transition_to(&self, state: &mut ConversationState, new_state: ProcessingState) {
        let old_state = state.processing;
        let duration_ms = state
            .state_entered_at
            .map(|t| t.elapsed().as_millis() as u64)
            .unwrap_or(0);

        info!(
            from = %old_state,
            to = %new_state,
            duration_ms = duration_ms,
            "processing transition"
        );

        state.processing = new_state;
        state.state_entered_at = if new_state == ProcessingState::AwaitingReply {
            Some(Instant::now())
        } else {
            None
        };

        self.emit(ConversationEvent::ProcessingChanged {
            state: new_state,
            duration_ms,
        });
    }

    fn emit(&self, event: ConversationEvent) {
        debug!(%event, "emitting event");
        // No subscribers is fine
        let _ = self.shared.event_tx.send(event);
    }
}

/// Text of the assistant turn that reports a failed completion
fn error_reply(error: &CompletionError) -> String {
    format!("Sorry, I encountered an error: {error}. Please check your API key and try again.")
}


#[cfg(test)]
mod tests {
    use tokio::sync::Semaphore;

    use super::fake::ScriptedCompletion;
    use super::*;
    use crate::credential::memory::MemoryCredentialStore;
    use crate::playback::fake::RecordingSynthesizer;

    struct Harness {
        controller: TurnController,
        completion: Arc<ScriptedCompletion>,
        synth: Arc<RecordingSynthesizer>,
        events: broadcast::Receiver<ConversationEvent>,
    }

    fn harness_with(completion: ScriptedCompletion, store: MemoryCredentialStore) -> Harness {
        let completion = Arc::new(completion);
        let synth = Arc::new(RecordingSynthesizer::default());
        let (event_tx, events) = broadcast::channel(64);
        let controller = TurnController::new(
            completion.clone(),
            Arc::new(store),
            PlaybackAdapter::new(synth.clone()),
            event_tx,
            Duration::ZERO,
        );
        Harness {
            controller,
            completion,
            synth,
            events,
        }
    }

    fn harness(replies: Vec<Result<String, CompletionError>>) -> Harness {
        harness_with(
            ScriptedCompletion::replying(replies),
            MemoryCredentialStore::with("gsk_test"),
        )
    }

    async fn wait_for_awaiting(events: &mut broadcast::Receiver<ConversationEvent>) {
        loop {
            if let ConversationEvent::ProcessingChanged {
                state: ProcessingState::AwaitingReply,
                ..
            } = events.recv().await.unwrap()
            {
                return;
            }
        }
    }

    #[tokio::test]
    async fn test_initial_state() {
        let h = harness(vec![]);
        assert_eq!(h.controller.processing_state().await, ProcessingState::Idle);
        assert!(h.controller.transcript().await.is_empty());
        assert!(h.controller.has_credential().await);
        assert!(!h.controller.is_recording().await);
    }

    #[tokio::test]
    async fn test_success_appends_user_then_assistant_and_speaks() {
        let h = harness(vec![Ok("I break big problems into small ones.".to_string())]);

        let outcome = h
            .controller
            .submit_user_utterance("What's your superpower?")
            .await;
        assert_eq!(outcome, SubmitOutcome::Answered);

        let turns = h.controller.transcript().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0].speaker(), Speaker::User);
        assert_eq!(turns[0].text(), "What's your superpower?");
        assert_eq!(turns[1].speaker(), Speaker::Assistant);
        assert_eq!(turns[1].text(), "I break big problems into small ones.");

        assert_eq!(h.synth.spoken(), vec!["I break big problems into small ones.".to_string()]);
        assert_eq!(h.controller.processing_state().await, ProcessingState::Idle);
    }

    #[tokio::test]
    async fn test_blank_input_is_ignored() {
        let mut h = harness(vec![]);

        for text in ["", "   ", "\n\t"] {
            assert_eq!(
                h.controller.submit_user_utterance(text).await,
                SubmitOutcome::Ignored
            );
            assert_eq!(
                h.controller.submit_sample_question(text).await,
                SubmitOutcome::Ignored
            );
        }

        assert!(h.controller.transcript().await.is_empty());
        assert_eq!(h.controller.processing_state().await, ProcessingState::Idle);
        assert_eq!(h.completion.calls(), 0);
        assert!(h.events.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_missing_credential_skips_network() {
        let h = harness_with(
            ScriptedCompletion::default(),
            MemoryCredentialStore::default(),
        );

        let outcome = h.controller.submit_user_utterance("Tell me about yourself").await;
        assert_eq!(outcome, SubmitOutcome::Failed);
        assert_eq!(h.completion.calls(), 0);

        let turns = h.controller.transcript().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].speaker(), Speaker::Assistant);
        assert!(turns[1].text().contains("API key not configured"));
        assert!(h.synth.spoken().is_empty());
    }

    #[tokio::test]
    async fn test_errors_become_assistant_turns() {
        let h = harness(vec![
            Err(CompletionError::InvalidCredential),
            Err(CompletionError::RateLimited),
            Err(CompletionError::ServiceUnavailable),
        ]);

        for _ in 0..3 {
            assert_eq!(
                h.controller.submit_user_utterance("hello").await,
                SubmitOutcome::Failed
            );
        }

        let replies: Vec<_> = h
            .controller
            .transcript()
            .await
            .into_iter()
            .filter(|t| t.speaker() == Speaker::Assistant)
            .map(|t| t.text().to_string())
            .collect();
        assert_eq!(replies.len(), 3);
        assert!(replies[0].starts_with("Sorry, I encountered an error: Invalid API key."));
        assert!(replies[1].contains("Rate limit exceeded"));
        assert!(replies[2].contains("temporarily unavailable"));
        assert!(h.synth.spoken().is_empty());
        assert_eq!(h.controller.processing_state().await, ProcessingState::Idle);
    }

    #[tokio::test]
    async fn test_user_turn_visible_while_awaiting_reply() {
        let gate = Arc::new(Semaphore::new(0));
        let mut h = harness_with(
            ScriptedCompletion::replying(vec![Ok("done".to_string())]).gated(gate.clone()),
            MemoryCredentialStore::with("gsk_test"),
        );

        let controller = h.controller.clone();
        let pending =
            tokio::spawn(async move { controller.submit_user_utterance("first").await });

        wait_for_awaiting(&mut h.events).await;
        let turns = h.controller.transcript().await;
        assert_eq!(turns.len(), 1);
        assert_eq!(turns[0].text(), "first");
        assert_eq!(
            h.controller.processing_state().await,
            ProcessingState::AwaitingReply
        );

        gate.add_permits(1);
        assert_eq!(pending.await.unwrap(), SubmitOutcome::Answered);
        assert_eq!(h.controller.transcript().await.len(), 2);
        assert_eq!(h.controller.processing_state().await, ProcessingState::Idle);
    }

    #[tokio::test]
    async fn test_overlapping_submission_is_rejected() {
        let gate = Arc::new(Semaphore::new(0));
        let mut h = harness_with(
            ScriptedCompletion::default().gated(gate.clone()),
            MemoryCredentialStore::with("gsk_test"),
        );

        let controller = h.controller.clone();
        let pending =
            tokio::spawn(async move { controller.submit_user_utterance("spoken").await });
        wait_for_awaiting(&mut h.events).await;

        let outcome = h
            .controller
            .submit_sample_question("What's your #1 superpower?")
            .await;
        assert_eq!(outcome, SubmitOutcome::Rejected);
        assert_eq!(h.controller.transcript().await.len(), 1);

        gate.add_permits(1);
        pending.await.unwrap();

        let turns = h.controller.transcript().await;
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].text(), "answer to spoken");
        assert_eq!(h.completion.calls(), 1);
    }

    #[tokio::test]
    async fn test_sequential_submissions_keep_order() {
        let h = harness(vec![]);
        for q in ["one", "two", "three"] {
            h.controller.submit_user_utterance(q).await;
        }

        let texts: Vec<_> = h
            .controller
            .transcript()
            .await
            .iter()
            .map(|t| t.text().to_string())
            .collect();
        assert_eq!(
            texts,
            vec![
                "one",
                "answer to one",
                "two",
                "answer to two",
                "three",
                "answer to three"
            ]
        );
        assert_eq!(h.completion.questions(), vec!["one", "two", "three"]);
    }

    #[tokio::test]
    async fn test_reading_transcript_is_idempotent() {
        let h = harness(vec![]);
        h.controller.submit_user_utterance("hello").await;

        let first = h.controller.transcript().await;
        let second = h.controller.transcript().await;
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn test_sample_question_waits_then_dispatches() {
        let completion = Arc::new(ScriptedCompletion::default());
        let (event_tx, _) = broadcast::channel(16);
        let controller = TurnController::new(
            completion.clone(),
            Arc::new(MemoryCredentialStore::with("gsk_test")),
            PlaybackAdapter::new(Arc::new(RecordingSynthesizer::default())),
            event_tx,
            Duration::from_millis(20),
        );

        let started = Instant::now();
        let outcome = controller
            .submit_sample_question("How do you handle feedback and criticism?")
            .await;

        assert_eq!(outcome, SubmitOutcome::Answered);
        assert!(started.elapsed() >= Duration::from_millis(20));
        assert_eq!(completion.calls(), 1);
    }

    #[tokio::test]
    async fn test_submitted_text_is_trimmed() {
        let h = harness(vec![]);
        h.controller.submit_user_utterance("  padded question \n").await;

        assert_eq!(h.completion.questions(), vec!["padded question"]);
        assert_eq!(h.controller.transcript().await[0].text(), "padded question");
    }

    #[tokio::test]
    async fn test_set_and_clear_credential() {
        let h = harness_with(
            ScriptedCompletion::default(),
            MemoryCredentialStore::default(),
        );
        assert!(!h.controller.has_credential().await);

        assert!(h.controller.set_credential(" gsk_new ").await);
        assert!(h.controller.has_credential().await);
        assert_eq!(
            h.controller.submit_user_utterance("hi").await,
            SubmitOutcome::Answered
        );

        h.controller.clear_credential().await;
        assert!(!h.controller.has_credential().await);
        assert!(!h.controller.status().await.credential_configured);
    }

    #[tokio::test]
    async fn test_capture_state_changes_emit_once() {
        let mut h = harness(vec![]);

        h.controller.set_capture_state(CaptureState::Listening).await;
        h.controller.set_capture_state(CaptureState::Listening).await;
        assert!(h.controller.is_recording().await);

        assert!(matches!(
            h.events.try_recv().unwrap(),
            ConversationEvent::CaptureChanged {
                state: CaptureState::Listening
            }
        ));
        assert!(h.events.try_recv().is_err());

        h.controller.set_capture_state(CaptureState::Stopped).await;
        assert!(!h.controller.is_recording().await);
    }

    #[tokio::test]
    async fn test_status_snapshot() {
        let h = harness(vec![]);
        h.controller.submit_user_utterance("hello").await;

        let status = h.controller.status().await;
        assert_eq!(status.processing, ProcessingState::Idle);
        assert_eq!(status.capture, CaptureState::Stopped);
        assert!(status.credential_configured);
        assert_eq!(status.turns, 2);
    }
}
