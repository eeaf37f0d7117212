//! IPC message protocol definitions
//!
//! All messages are JSON-encoded, prefixed with a 4-byte little-endian length.

use serde::{Deserialize, Serialize};

use crate::capture::CaptureState;
use crate::events::ConversationEvent;
use crate::state::{ControllerStatus, ProcessingState, SubmitOutcome, Turn};

/// Largest accepted frame body
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Requests from the shell to the daemon
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Request {
    /// Ping to check connectivity
    Ping,

    /// Request current daemon status
    GetStatus,

    /// Request every turn so far
    GetTranscript,

    /// Request the canned prompts
    ListSampleQuestions,

    /// Submit typed or externally transcribed text
    SubmitUtterance { text: String },

    /// Submit a canned prompt, by position in the list or spelled out.
    /// `index` wins when both are given.
    SubmitSample {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        index: Option<usize>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        text: Option<String>,
    },

    /// Save the credential; blank clears it
    SetCredential { value: String },

    ClearCredential,

    StartCapture,

    StopCapture,

    /// Start when stopped, stop when listening
    ToggleCapture,

    /// Subscribe to conversation event notifications
    Subscribe,
}

/// Responses from daemon to the shell
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    /// Pong response to ping
    Pong,

    /// Current daemon status
    Status(DaemonStatus),

    Transcript { turns: Vec<Turn> },

    SampleQuestions { questions: Vec<String> },

    /// The submission settled (or was ignored/rejected)
    Submitted { outcome: SubmitOutcome },

    CredentialUpdated { configured: bool },

    Capture { state: CaptureState },

    /// Subscription confirmed
    Subscribed,

    /// Error response
    Error { code: String, message: String },
}

/// Push notification from daemon to subscribed clients
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Notification {
    Event { event: ConversationEvent },
}

/// Full daemon status snapshot
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    /// Daemon version
    pub version: String,

    pub processing: ProcessingState,

    pub capture: CaptureState,

    pub credential_configured: bool,

    /// Number of turns in the transcript
    pub turns: usize,

    /// Uptime in seconds
    pub uptime_secs: u64,
}

impl DaemonStatus {
    pub fn new(status: ControllerStatus, uptime_secs: u64) -> Self {
        Self {
            version: env!("CARGO_PKG_VERSION").to_string(),
            processing: status.processing,
            capture: status.capture,
            credential_configured: status.credential_configured,
            turns: status.turns,
            uptime_secs,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_serialization() {
        let req = Request::SubmitUtterance {
            text: "What's your #1 superpower?".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("submit_utterance"));
        assert!(json.contains("superpower"));
    }

    #[test]
    fn test_sample_request_by_index_or_text() {
        let req: Request = serde_json::from_str(r#"{"type":"submit_sample","index":2}"#).unwrap();
        assert!(matches!(
            req,
            Request::SubmitSample {
                index: Some(2),
                text: None
            }
        ));

        let req: Request =
            serde_json::from_str(r#"{"type":"submit_sample","text":"Why us?"}"#).unwrap();
        assert!(matches!(
            req,
            Request::SubmitSample {
                index: None,
                text: Some(ref text)
            } if text == "Why us?"
        ));
    }

    #[test]
    fn test_response_serialization() {
        let status = ControllerStatus {
            processing: ProcessingState::AwaitingReply,
            capture: CaptureState::Stopped,
            credential_configured: true,
            turns: 3,
        };
        let resp = Response::Status(DaemonStatus::new(status, 42));
        let json = serde_json::to_string(&resp).unwrap();
        assert!(json.contains("\"type\":\"status\""));
        assert!(json.contains("awaiting_reply"));
        assert!(json.contains("\"uptime_secs\":42"));
    }

    #[test]
    fn test_notification_serialization() {
        let note = Notification::Event {
            event: ConversationEvent::CredentialChanged { configured: false },
        };
        let json = serde_json::to_string(&note).unwrap();
        assert!(json.contains("\"type\":\"event\""));
        assert!(json.contains("credential_changed"));
    }
}
