//! Configuration loading and management

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};

use crate::completion::{DEFAULT_ENDPOINT, DEFAULT_MODEL};

const DEFAULT_SAMPLE_DELAY_MS: u64 = 500;

/// Which host recognizer to use for voice capture
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecognizerKind {
    /// One finalized utterance per stdin line
    Stdin,
    /// No recognizer; capture reports unsupported
    None,
}

/// Daemon configuration
#[derive(Debug, Clone)]
pub struct Config {
    /// Path to the Unix domain socket for IPC
    pub socket_path: PathBuf,

    /// Directory for runtime data and the stored credential
    pub data_dir: PathBuf,

    /// Chat-completion endpoint URL
    pub endpoint: String,

    /// Model identifier sent with every request
    pub model: String,

    /// Cosmetic pause before a sample question is dispatched
    pub sample_delay: Duration,

    /// TTS command line; `None` keeps playback silent
    pub tts_command: Option<String>,

    pub recognizer: RecognizerKind,
}

impl Config {
    /// Load configuration from environment and defaults
    pub fn load() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let data_dir = match lookup("INTERVIEW_COACH_DATA_DIR") {
            Some(dir) => PathBuf::from(dir),
            None => {
                let home = lookup("HOME").context("HOME is not set")?;
                PathBuf::from(home)
                    .join(".local")
                    .join("share")
                    .join("interview-coach")
            }
        };

        let socket_path = data_dir.join("daemon.sock");

        let sample_delay_ms = match lookup("INTERVIEW_COACH_SAMPLE_DELAY_MS") {
            Some(ms) => ms
                .trim()
                .parse()
                .with_context(|| format!("invalid INTERVIEW_COACH_SAMPLE_DELAY_MS: {ms}"))?,
            None => DEFAULT_SAMPLE_DELAY_MS,
        };

        let recognizer = match lookup("INTERVIEW_COACH_RECOGNIZER").as_deref().map(str::trim) {
            None | Some("stdin") => RecognizerKind::Stdin,
            Some("none") => RecognizerKind::None,
            Some(other) => anyhow::bail!("unknown INTERVIEW_COACH_RECOGNIZER: {other}"),
        };

        Ok(Self {
            socket_path,
            data_dir,
            endpoint: lookup("INTERVIEW_COACH_ENDPOINT")
                .unwrap_or_else(|| DEFAULT_ENDPOINT.to_string()),
            model: lookup("INTERVIEW_COACH_MODEL").unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            sample_delay: Duration::from_millis(sample_delay_ms),
            tts_command: lookup("INTERVIEW_COACH_TTS_COMMAND").filter(|c| !c.trim().is_empty()),
            recognizer,
        })
    }

    /// Ensure data directory exists
    pub fn ensure_dirs(&self) -> Result<()> {
        std::fs::create_dir_all(&self.data_dir)?;
        Ok(())
    }
}
