//! Host speech recognizers

use std::sync::{Arc, Mutex};

use thiserror::Error;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info};

#[derive(Debug, Error)]
pub enum CaptureError {
    #[error("speech recognition is not supported on this host")]
    Unsupported,

    #[error("recognizer error: {0}")]
    Recognizer(String),
}

/// One piece of a recognition result
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecognitionSegment {
    pub text: String,
    pub is_final: bool,
}

impl RecognitionSegment {
    pub fn partial(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: false,
        }
    }

    pub fn finalized(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            is_final: true,
        }
    }
}

/// Raw recognizer callbacks, delivered in order over a channel
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecognizerEvent {
    /// Segments that changed since the previous result
    Result(Vec<RecognitionSegment>),
    /// Recognition failed; the session is over
    Error(String),
    /// Natural end of speech; the session is over
    End,
}

/// Host speech-to-text capability
pub trait SpeechRecognizer: Send + Sync {
    fn is_available(&self) -> bool;

    /// Begin a continuous session, delivering events to `events` until
    /// stopped, failed or ended
    fn start(&self, lang: &str, events: mpsc::Sender<RecognizerEvent>) -> Result<(), CaptureError>;

    fn stop(&self);
}

type LineSource = Arc<tokio::sync::Mutex<Box<dyn AsyncBufRead + Send + Unpin>>>;

/// Treats each input line as one finalized utterance.
///
/// End of input ends the session. The reader is shared across sessions so
/// a restart picks up where the last one stopped.
pub struct LineRecognizer {
    source: LineSource,
    session: Mutex<Option<JoinHandle<()>>>,
}

impl LineRecognizer {
    pub fn stdin() -> Self {
        Self::from_reader(BufReader::new(tokio::io::stdin()))
    }

    pub fn from_reader(reader: impl AsyncBufRead + Send + Unpin + 'static) -> Self {
        Self {
            source: Arc::new(tokio::sync::Mutex::new(Box::new(reader))),
            session: Mutex::new(None),
        }
    }

    async fn read_lines(source: LineSource, events: mpsc::Sender<RecognizerEvent>) {
        let mut reader = source.lock().await;
        loop {
            let mut line = String::new();
            let event = match reader.read_line(&mut line).await {
                Ok(0) => RecognizerEvent::End,
                Ok(_) => RecognizerEvent::Result(vec![RecognitionSegment::finalized(
                    line.trim_end_matches(|c| c == '\r' || c == '\n'),
                )]),
                Err(e) => RecognizerEvent::Error(e.to_string()),
            };

            let done = !matches!(event, RecognizerEvent::Result(_));
            if events.send(event).await.is_err() || done {
                break;
            }
        }
        debug!("line recognizer session finished");
    }
}

impl SpeechRecognizer for LineRecognizer {
    fn is_available(&self) -> bool {
        true
    }

    fn start(&self, lang: &str, events: mpsc::Sender<RecognizerEvent>) -> Result<(), CaptureError> {
        let mut session = self
            .session
            .lock()
            .map_err(|_| CaptureError::Recognizer("session lock poisoned".to_string()))?;

        if let Some(previous) = session.take() {
            previous.abort();
        }

        info!(lang, "line recognizer listening on input");
        *session = Some(tokio::spawn(Self::read_lines(
            Arc::clone(&self.source),
            events,
        )));
        Ok(())
    }

    fn stop(&self) {
        if let Ok(mut session) = self.session.lock() {
            if let Some(handle) = session.take() {
                handle.abort();
                debug!("line recognizer stopped");
            }
        }
    }
}

/// Host without a recognizer
#[derive(Debug, Default, Clone, Copy)]
pub struct UnavailableRecognizer;

impl SpeechRecognizer for UnavailableRecognizer {
    fn is_available(&self) -> bool {
        false
    }

    fn start(&self, _lang: &str, _events: mpsc::Sender<RecognizerEvent>) -> Result<(), CaptureError> {
        Err(CaptureError::Unsupported)
    }

    fn stop(&self) {}
}
