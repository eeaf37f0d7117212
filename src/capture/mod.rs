//! Capture module for continuous speech input
//!
//! Wraps a host speech recognizer. Partial text is forwarded for live
//! display; each finalized segment becomes a user submission.

mod adapter;
mod recognizer;

use serde::{Deserialize, Serialize};

pub use adapter::CaptureAdapter;
pub use recognizer::{
    CaptureError, LineRecognizer, RecognitionSegment, RecognizerEvent, SpeechRecognizer,
    UnavailableRecognizer,
};

#[cfg(test)]
pub use recognizer::fake;

/// Recognition language for every capture session
pub const RECOGNITION_LANG: &str = "en-US";

/// Capture adapter state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CaptureState {
    #[default]
    Stopped,
    Listening,
    /// No recognizer on this host; permanent for the session
    Unsupported,
}

impl std::fmt::Display for CaptureState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CaptureState::Stopped => write!(f, "Stopped"),
            CaptureState::Listening => write!(f, "Listening"),
            CaptureState::Unsupported => write!(f, "Unsupported"),
        }
    }
}
