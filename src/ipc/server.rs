//! Unix domain socket server for IPC
//!
//! Provides request-response communication with the Presentation Shell and
//! pushes conversation events to subscribed clients.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use anyhow::{Context, Result};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::unix::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, error, info, warn};

use crate::capture::{CaptureAdapter, CaptureError, CaptureState};
use crate::events::ConversationEvent;
use crate::samples::{sample_question, SAMPLE_QUESTIONS};
use crate::state::TurnController;

use super::protocol::{DaemonStatus, Notification, Request, Response, MAX_FRAME_LEN};

/// Parsed request, or the reason the frame was unreadable
type Incoming = std::result::Result<Request, String>;

/// IPC Server handling client connections
pub struct Server {
    socket_path: PathBuf,
    listener: Option<UnixListener>,
    context: Arc<ServerContext>,
    shutdown_tx: broadcast::Sender<()>,
}

/// How a request is answered
enum Reply {
    /// Answer right away
    Now(Response),
    /// Answer right away and start pushing events
    Subscribe(Response),
    /// Answer arrives later on the connection's reply channel
    Pending,
}

/// What every client handler needs
struct ServerContext {
    controller: TurnController,
    capture: Arc<CaptureAdapter>,
    start_time: Instant,
}

impl Server {
    /// Create a new IPC server
    pub fn new(
        socket_path: &Path,
        controller: TurnController,
        capture: Arc<CaptureAdapter>,
    ) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = socket_path.parent() {
            std::fs::create_dir_all(parent).context("failed to create socket directory")?;
        }

        // Remove stale socket if it exists
        if socket_path.exists() {
            std::fs::remove_file(socket_path).context("failed to remove stale socket")?;
        }

        let listener = UnixListener::bind(socket_path).context("failed to bind Unix socket")?;

        // Set socket permissions to owner-only (0600)
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(socket_path, std::fs::Permissions::from_mode(0o600))?;
        }

        let (shutdown_tx, _) = broadcast::channel(1);

        info!(?socket_path, "IPC server listening");

        Ok(Self {
            socket_path: socket_path.to_owned(),
            listener: Some(listener),
            context: Arc::new(ServerContext {
                controller,
                capture,
                start_time: Instant::now(),
            }),
            shutdown_tx,
        })
    }

    /// Run the server, accepting connections
    pub async fn run(&self) -> Result<()> {
        let listener = self.listener.as_ref().context("server not initialized")?;

        loop {
            match listener.accept().await {
                Ok((stream, _addr)) => {
                    debug!("client connected");
                    let context = Arc::clone(&self.context);
                    let mut shutdown_rx = self.shutdown_tx.subscribe();

                    tokio::spawn(async move {
                        tokio::select! {
                            result = Self::handle_client(stream, context) => {
                                if let Err(e) = result {
                                    warn!(?e, "client handler error");
                                }
                            }
                            _ = shutdown_rx.recv() => {
                                debug!("client handler shutting down");
                            }
                        }
                    });
                }
                Err(e) => {
                    error!(?e, "accept error");
                }
            }
        }
    }

    /// Handle a single client connection
    async fn handle_client(stream: UnixStream, context: Arc<ServerContext>) -> Result<()> {
        let (reader, mut writer) = stream.into_split();

        // Frames are read on their own task so a half-read frame is never
        // lost when an event arrives
        let (request_tx, mut request_rx) = mpsc::channel::<Incoming>(8);
        let reader_task = tokio::spawn(Self::read_requests(reader, request_tx));

        // Submissions settle on their own tasks; their responses come back here
        let (reply_tx, mut reply_rx) = mpsc::channel::<Response>(8);

        let mut events: Option<broadcast::Receiver<ConversationEvent>> = None;

        let result = loop {
            tokio::select! {
                incoming = request_rx.recv() => {
                    let response = match incoming {
                        None => {
                            debug!("client disconnected");
                            break Ok(());
                        }
                        Some(Ok(request)) => {
                            debug!(?request, "received request");
                            match Self::process_request(request, &context, &reply_tx).await {
                                Reply::Now(response) => response,
                                Reply::Subscribe(response) => {
                                    if events.is_none() {
                                        events = Some(context.controller.subscribe());
                                        debug!("client subscribed to notifications");
                                    }
                                    response
                                }
                                Reply::Pending => continue,
                            }
                        }
                        Some(Err(message)) => Response::Error {
                            code: "bad_request".to_string(),
                            message,
                        },
                    };

                    if let Err(e) = Self::send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }

                Some(response) = reply_rx.recv() => {
                    if let Err(e) = Self::send_message(&mut writer, &response).await {
                        break Err(e);
                    }
                }

                event = next_event(&mut events) => {
                    match event {
                        Ok(event) => {
                            let note = Notification::Event { event };
                            if let Err(e) = Self::send_message(&mut writer, &note).await {
                                break Err(e);
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(n)) => {
                            warn!(skipped = n, "subscriber lagged, events dropped");
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            events = None;
                        }
                    }
                }
            }
        };

        reader_task.abort();
        result
    }

    /// Read length-prefixed JSON requests until the client hangs up
    async fn read_requests(mut reader: OwnedReadHalf, requests: mpsc::Sender<Incoming>) {
        let mut len_buf = [0u8; 4];

        loop {
            // Read message length (4-byte little-endian)
            match reader.read_exact(&mut len_buf).await {
                Ok(_) => {}
                Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return,
                Err(e) => {
                    warn!(?e, "failed to read frame length");
                    return;
                }
            }

            let len = u32::from_le_bytes(len_buf) as usize;
            if len > MAX_FRAME_LEN {
                warn!(len, "message too large, disconnecting");
                return;
            }

            // Read message body
            let mut msg_buf = vec![0u8; len];
            if let Err(e) = reader.read_exact(&mut msg_buf).await {
                warn!(?e, "failed to read frame body");
                return;
            }

            let incoming = serde_json::from_slice::<Request>(&msg_buf)
                .map_err(|e| format!("failed to parse request: {e}"));

            if requests.send(incoming).await.is_err() {
                return;
            }
        }
    }

    /// Send a length-prefixed JSON message
    async fn send_message<T: serde::Serialize>(writer: &mut OwnedWriteHalf, msg: &T) -> Result<()> {
        let msg_bytes = serde_json::to_vec(msg)?;
        let msg_len = (msg_bytes.len() as u32).to_le_bytes();

        writer.write_all(&msg_len).await?;
        writer.write_all(&msg_bytes).await?;

        Ok(())
    }

    /// Process a request.
    ///
    /// Submissions run on their own task so the connection keeps serving
    /// requests and events while a reply is pending.
    async fn process_request(
        request: Request,
        context: &ServerContext,
        replies: &mpsc::Sender<Response>,
    ) -> Reply {
        let controller = &context.controller;

        let response = match request {
            Request::Ping => Response::Pong,

            Request::GetStatus => {
                let uptime_secs = context.start_time.elapsed().as_secs();
                Response::Status(DaemonStatus::new(controller.status().await, uptime_secs))
            }

            Request::GetTranscript => Response::Transcript {
                turns: controller.transcript().await,
            },

            Request::ListSampleQuestions => Response::SampleQuestions {
                questions: SAMPLE_QUESTIONS.iter().map(|q| q.to_string()).collect(),
            },

            Request::SubmitUtterance { text } => {
                let controller = controller.clone();
                spawn_reply(replies, async move {
                    Response::Submitted {
                        outcome: controller.submit_user_utterance(&text).await,
                    }
                });
                return Reply::Pending;
            }

            Request::SubmitSample { index, text } => {
                let question = match (index, text) {
                    (Some(index), _) => sample_question(index).map(str::to_string).ok_or_else(|| {
                        error_response("unknown_sample", format!("no sample question at index {index}"))
                    }),
                    (None, Some(text)) => Ok(text),
                    (None, None) => Err(error_response(
                        "bad_request",
                        "submit_sample needs an index or text".to_string(),
                    )),
                };

                match question {
                    Ok(question) => {
                        let controller = controller.clone();
                        spawn_reply(replies, async move {
                            Response::Submitted {
                                outcome: controller.submit_sample_question(&question).await,
                            }
                        });
                        return Reply::Pending;
                    }
                    Err(response) => response,
                }
            }

            Request::SetCredential { value } => Response::CredentialUpdated {
                configured: controller.set_credential(&value).await,
            },

            Request::ClearCredential => {
                controller.clear_credential().await;
                Response::CredentialUpdated { configured: false }
            }

            Request::StartCapture => capture_response(context.capture.start().await),

            Request::ToggleCapture => capture_response(context.capture.toggle().await),

            Request::StopCapture => Response::Capture {
                state: context.capture.stop().await,
            },

            Request::Subscribe => return Reply::Subscribe(Response::Subscribed),
        };

        Reply::Now(response)
    }

    /// Gracefully shutdown the server
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(());

        // Remove socket file
        if self.socket_path.exists() {
            if let Err(e) = std::fs::remove_file(&self.socket_path) {
                warn!(?e, "failed to remove socket file");
            }
        }

        info!("IPC server shutdown complete");
    }
}

/// Run a deferred request and hand its response to the connection
fn spawn_reply<F>(replies: &mpsc::Sender<Response>, reply: F)
where
    F: Future<Output = Response> + Send + 'static,
{
    let replies = replies.clone();
    tokio::spawn(async move {
        let response = reply.await;
        if replies.send(response).await.is_err() {
            debug!("client disconnected before the reply settled");
        }
    });
}

fn capture_response(result: std::result::Result<CaptureState, CaptureError>) -> Response {
    match result {
        Ok(state) => Response::Capture { state },
        Err(e @ CaptureError::Unsupported) => error_response("capture_unsupported", e.to_string()),
        Err(e) => error_response("capture_failed", e.to_string()),
    }
}

fn error_response(code: &str, message: String) -> Response {
    Response::Error {
        code: code.to_string(),
        message,
    }
}

/// Next event for a subscribed client; never resolves otherwise
async fn next_event(
    events: &mut Option<broadcast::Receiver<ConversationEvent>>,
) -> std::result::Result<ConversationEvent, broadcast::error::RecvError> {
    match events {
        Some(rx) => rx.recv().await,
        None => std::future::pending().await,
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::Value;
    use tokio::sync::Semaphore;

    use super::*;
    use crate::capture::fake::ChannelRecognizer;
    use crate::credential::memory::MemoryCredentialStore;
    use crate::playback::fake::RecordingSynthesizer;
    use crate::playback::PlaybackAdapter;
    use crate::state::fake::ScriptedCompletion;

    struct Fixture {
        _dir: tempfile::TempDir,
        socket_path: PathBuf,
        server: Arc<Server>,
    }

    async fn start_server() -> Fixture {
        start_server_with(ScriptedCompletion::default(), MemoryCredentialStore::default()).await
    }

    async fn start_server_with(
        completion: ScriptedCompletion,
        store: MemoryCredentialStore,
    ) -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("daemon.sock");

        let (event_tx, _) = broadcast::channel(64);
        let controller = TurnController::new(
            Arc::new(completion),
            Arc::new(store),
            PlaybackAdapter::new(Arc::new(RecordingSynthesizer::default())),
            event_tx,
            Duration::ZERO,
        );
        let capture = Arc::new(
            CaptureAdapter::new(Arc::new(ChannelRecognizer::default()), controller.clone()).await,
        );

        let server = Arc::new(Server::new(&socket_path, controller, capture).unwrap());
        let running = Arc::clone(&server);
        tokio::spawn(async move {
            let _ = running.run().await;
        });

        Fixture {
            _dir: dir,
            socket_path,
            server,
        }
    }

    async fn send(stream: &mut UnixStream, request: Value) {
        let bytes = serde_json::to_vec(&request).unwrap();
        stream
            .write_all(&(bytes.len() as u32).to_le_bytes())
            .await
            .unwrap();
        stream.write_all(&bytes).await.unwrap();
    }

    async fn recv(stream: &mut UnixStream) -> Value {
        let mut len_buf = [0u8; 4];
        tokio::time::timeout(Duration::from_secs(5), stream.read_exact(&mut len_buf))
            .await
            .expect("timed out waiting for frame")
            .unwrap();
        let mut body = vec![0u8; u32::from_le_bytes(len_buf) as usize];
        stream.read_exact(&mut body).await.unwrap();
        serde_json::from_slice(&body).unwrap()
    }

    async fn request(stream: &mut UnixStream, request: Value) -> Value {
        send(stream, request).await;
        recv(stream).await
    }

    #[tokio::test]
    async fn test_ping_and_status() {
        let fixture = start_server().await;
        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();

        let pong = request(&mut stream, serde_json::json!({ "type": "ping" })).await;
        assert_eq!(pong["type"], "pong");

        let status = request(&mut stream, serde_json::json!({ "type": "get_status" })).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["processing"], "idle");
        assert_eq!(status["capture"], "stopped");
        assert_eq!(status["credential_configured"], false);
    }

    #[tokio::test]
    async fn test_submit_sample_and_read_transcript() {
        let fixture = start_server().await;
        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();

        let updated = request(
            &mut stream,
            serde_json::json!({ "type": "set_credential", "value": "gsk_test" }),
        )
        .await;
        assert_eq!(updated["configured"], true);

        let submitted = request(
            &mut stream,
            serde_json::json!({ "type": "submit_sample", "index": 1 }),
        )
        .await;
        assert_eq!(submitted["type"], "submitted");
        assert_eq!(submitted["outcome"], "answered");

        let transcript =
            request(&mut stream, serde_json::json!({ "type": "get_transcript" })).await;
        let turns = transcript["turns"].as_array().unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[0]["text"], "What's your #1 superpower?");
        assert_eq!(turns[0]["speaker"], "user");
        assert_eq!(turns[1]["speaker"], "assistant");
    }

    #[tokio::test]
    async fn test_unknown_sample_and_bad_frame() {
        let fixture = start_server().await;
        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();

        let err = request(
            &mut stream,
            serde_json::json!({ "type": "submit_sample", "index": 99 }),
        )
        .await;
        assert_eq!(err["type"], "error");
        assert_eq!(err["code"], "unknown_sample");

        let err = request(&mut stream, serde_json::json!({ "type": "dance" })).await;
        assert_eq!(err["code"], "bad_request");

        // Connection survives a bad frame
        let pong = request(&mut stream, serde_json::json!({ "type": "ping" })).await;
        assert_eq!(pong["type"], "pong");
    }

    #[tokio::test]
    async fn test_subscriber_receives_events() {
        let fixture = start_server().await;
        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();

        let subscribed = request(&mut stream, serde_json::json!({ "type": "subscribe" })).await;
        assert_eq!(subscribed["type"], "subscribed");

        send(
            &mut stream,
            serde_json::json!({ "type": "submit_utterance", "text": "Why this company?" }),
        )
        .await;

        // No credential, so the reply is an error turn. Events queued while
        // the submission settled may arrive before or after the response.
        let mut appended = 0;
        let mut outcome = None;
        while appended < 2 || outcome.is_none() {
            let frame = recv(&mut stream).await;
            match frame["type"].as_str() {
                Some("event") if frame["event"]["type"] == "turn_appended" => appended += 1,
                Some("event") => {}
                Some("submitted") => outcome = Some(frame["outcome"].clone()),
                other => panic!("unexpected frame {other:?}"),
            }
        }
        assert_eq!(appended, 2);
        assert_eq!(outcome.unwrap(), "failed");
    }

    #[tokio::test]
    async fn test_connection_stays_live_while_reply_pending() {
        let gate = Arc::new(Semaphore::new(0));
        let fixture = start_server_with(
            ScriptedCompletion::default().gated(Arc::clone(&gate)),
            MemoryCredentialStore::with("gsk_test"),
        )
        .await;
        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();

        let subscribed = request(&mut stream, serde_json::json!({ "type": "subscribe" })).await;
        assert_eq!(subscribed["type"], "subscribed");

        send(
            &mut stream,
            serde_json::json!({ "type": "submit_utterance", "text": "Tell me about yourself" }),
        )
        .await;

        // The user turn and the awaiting flip are pushed before the reply exists
        let mut user_turn = false;
        let mut awaiting = false;
        while !(user_turn && awaiting) {
            let frame = recv(&mut stream).await;
            assert_eq!(frame["type"], "event", "unexpected frame {frame}");
            match frame["event"]["type"].as_str() {
                Some("turn_appended") => {
                    assert_eq!(frame["event"]["turn"]["speaker"], "user");
                    user_turn = true;
                }
                Some("processing_changed") => {
                    assert_eq!(frame["event"]["state"], "awaiting_reply");
                    awaiting = true;
                }
                other => panic!("unexpected event {other:?}"),
            }
        }

        let status = request(&mut stream, serde_json::json!({ "type": "get_status" })).await;
        assert_eq!(status["type"], "status");
        assert_eq!(status["processing"], "awaiting_reply");

        gate.add_permits(1);

        let mut outcome = None;
        while outcome.is_none() {
            let frame = recv(&mut stream).await;
            if frame["type"] == "submitted" {
                outcome = Some(frame["outcome"].clone());
            }
        }
        assert_eq!(outcome.unwrap(), "answered");
    }

    #[tokio::test]
    async fn test_capture_toggle_over_ipc() {
        let fixture = start_server().await;
        let mut stream = UnixStream::connect(&fixture.socket_path).await.unwrap();

        let started = request(&mut stream, serde_json::json!({ "type": "start_capture" })).await;
        assert_eq!(started["state"], "listening");

        let stopped = request(&mut stream, serde_json::json!({ "type": "stop_capture" })).await;
        assert_eq!(stopped["state"], "stopped");

        let toggled = request(&mut stream, serde_json::json!({ "type": "toggle_capture" })).await;
        assert_eq!(toggled["state"], "listening");
    }

    #[tokio::test]
    async fn test_shutdown_removes_socket() {
        let fixture = start_server().await;
        assert!(fixture.socket_path.exists());

        fixture.server.shutdown().await;
        assert!(!fixture.socket_path.exists());
    }
}
