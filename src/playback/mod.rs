//! Playback module for spoken replies
//!
//! One-way command: the controller hands text over and moves on. Nothing
//! reports back when (or whether) the audio finished.

mod synthesizer;

use std::sync::Arc;

use tracing::debug;

pub use synthesizer::{CommandSynthesizer, SilentSynthesizer, SpeechSynthesizer};

#[cfg(test)]
pub use synthesizer::fake;

/// Fixed voice profile applied to every utterance
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpeechProfile {
    pub rate: f32,
    pub pitch: f32,
    pub volume: f32,
}

impl Default for SpeechProfile {
    fn default() -> Self {
        Self {
            rate: 0.9,
            pitch: 1.0,
            volume: 0.8,
        }
    }
}

/// Queues speech on the host synthesizer with the fixed profile
#[derive(Clone)]
pub struct PlaybackAdapter {
    synthesizer: Arc<dyn SpeechSynthesizer>,
    profile: SpeechProfile,
}

impl PlaybackAdapter {
    pub fn new(synthesizer: Arc<dyn SpeechSynthesizer>) -> Self {
        Self {
            synthesizer,
            profile: SpeechProfile::default(),
        }
    }

    /// Best-effort; failures are the synthesizer's to log
    pub fn speak(&self, text: &str) {
        debug!(chars = text.len(), "queueing speech");
        self.synthesizer.speak(text, &self.profile);
    }
}
