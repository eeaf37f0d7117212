//! Host text-to-speech backends

use std::process::Stdio;

use tokio::process::Command;
use tracing::{debug, warn};

use super::SpeechProfile;

/// Host text-to-speech capability
pub trait SpeechSynthesizer: Send + Sync {
    /// Start speaking and return immediately
    fn speak(&self, text: &str, profile: &SpeechProfile);
}

/// Runs an external TTS program (`espeak`, `espeak-ng`, `say`, ...) with the
/// text as its last argument
#[derive(Debug, Clone)]
pub struct CommandSynthesizer {
    program: String,
    args: Vec<String>,
}

impl CommandSynthesizer {
    /// Parse a whitespace-separated command line; `None` when blank
    pub fn from_command_line(command: &str) -> Option<Self> {
        let mut parts = command.split_whitespace().map(str::to_string);
        let program = parts.next()?;
        Some(Self {
            program,
            args: parts.collect(),
        })
    }

    /// Translate the profile into flags the known programs understand
    fn profile_args(&self, profile: &SpeechProfile) -> Vec<String> {
        let name = std::path::Path::new(&self.program)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(&self.program);

        // Both default to ~175 words per minute at rate 1.0
        let wpm = (175.0 * profile.rate).round() as u32;
        match name {
            "espeak" | "espeak-ng" => vec![
                "-s".to_string(),
                wpm.to_string(),
                "-p".to_string(),
                ((50.0 * profile.pitch).round() as u32).to_string(),
                "-a".to_string(),
                ((100.0 * profile.volume).round() as u32).to_string(),
            ],
            "say" => vec!["-r".to_string(), wpm.to_string()],
            _ => Vec::new(),
        }
    }

    fn build(&self, text: &str, profile: &SpeechProfile) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args)
            .args(self.profile_args(profile))
            .arg(text)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .kill_on_drop(false);
        cmd
    }
}

impl SpeechSynthesizer for CommandSynthesizer {
    fn speak(&self, text: &str, profile: &SpeechProfile) {
        let mut child = match self.build(text, profile).spawn() {
            Ok(child) => child,
            Err(e) => {
                warn!(program = %self.program, error = %e, "failed to start speech synthesizer");
                return;
            }
        };

        // Reap in the background; nobody waits on the result
        let program = self.program.clone();
        tokio::spawn(async move {
            match child.wait().await {
                Ok(status) if !status.success() => {
                    warn!(%program, %status, "speech synthesizer exited with failure");
                }
                Ok(_) => debug!(%program, "speech finished"),
                Err(e) => warn!(%program, error = %e, "failed to wait on speech synthesizer"),
            }
        });
    }
}

/// Used when no TTS program is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentSynthesizer;

impl SpeechSynthesizer for SilentSynthesizer {
    fn speak(&self, text: &str, _profile: &SpeechProfile) {
        debug!(chars = text.len(), "speech output disabled, dropping utterance");
    }
}
