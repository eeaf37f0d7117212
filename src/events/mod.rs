//! Events module for conversation state changes
//!
//! Everything the Presentation Shell renders is derived from these events:
//! transcript appends, processing flag flips, capture state and live partial
//! transcripts.

use serde::{Deserialize, Serialize};

use crate::capture::CaptureState;
use crate::state::{ProcessingState, Turn};

/// Events broadcast by the turn controller and capture adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ConversationEvent {
    /// A turn was appended to the transcript
    TurnAppended { turn: Turn },

    /// Processing flag changed
    ProcessingChanged {
        state: ProcessingState,
        /// Milliseconds spent in the previous state (0 when leaving Idle)
        duration_ms: u64,
    },

    /// A submission arrived while a reply was pending and was dropped
    SubmissionRejected { text: String },

    /// Capture adapter started or stopped listening
    CaptureChanged { state: CaptureState },

    /// Interim recognizer text; empty once the segment is finalized
    TranscriptPartial { text: String },

    /// Credential was saved or cleared
    CredentialChanged { configured: bool },
}

impl std::fmt::Display for ConversationEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConversationEvent::TurnAppended { turn } => {
                write!(f, "TURN_APPENDED ({} #{})", turn.speaker(), turn.id())
            }
            ConversationEvent::ProcessingChanged { state, duration_ms } => {
                write!(f, "PROCESSING_CHANGED ({state}, {duration_ms}ms)")
            }
            ConversationEvent::SubmissionRejected { .. } => write!(f, "SUBMISSION_REJECTED"),
            ConversationEvent::CaptureChanged { state } => write!(f, "CAPTURE_CHANGED ({state})"),
            ConversationEvent::TranscriptPartial { .. } => write!(f, "TRANSCRIPT_PARTIAL"),
            ConversationEvent::CredentialChanged { configured } => {
                write!(f, "CREDENTIAL_CHANGED (configured={configured})")
            }
        }
    }
}
