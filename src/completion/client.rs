//! HTTP client for OpenAI-compatible chat-completion endpoints

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

use crate::credential::Credential;

use super::error::CompletionError;
use super::prompt::SYSTEM_PROMPT;
use super::CompletionClient;

pub const DEFAULT_ENDPOINT: &str = "https://api.groq.com/openai/v1/chat/completions";
pub const DEFAULT_MODEL: &str = "llama3-70b-8192";

const TEMPERATURE: f32 = 0.7;
const MAX_TOKENS: u32 = 200;

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: [ChatMessage<'a>; 2],
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<Choice>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Option<ChoiceMessage>,
}

#[derive(Debug, Deserialize)]
struct ChoiceMessage {
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ErrorBody {
    error: Option<ErrorDetail>,
}

#[derive(Debug, Deserialize)]
struct ErrorDetail {
    message: Option<String>,
}

/// Completion client speaking the chat-completions wire format
pub struct HttpCompletionClient {
    client: reqwest::Client,
    endpoint: String,
    model: String,
}

impl HttpCompletionClient {
    pub fn new(endpoint: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            model: model.into(),
        }
    }

    /// Pull `error.message` out of a failure body, if the server sent one
    async fn server_message(response: reqwest::Response) -> Option<String> {
        let body = response.text().await.ok()?;
        serde_json::from_str::<ErrorBody>(&body)
            .ok()
            .and_then(|b| b.error)
            .and_then(|e| e.message)
            .filter(|m| !m.is_empty())
    }
}

#[async_trait]
impl CompletionClient for HttpCompletionClient {
    async fn complete(
        &self,
        credential: &Credential,
        question: &str,
    ) -> Result<String, CompletionError> {
        let request = ChatRequest {
            model: &self.model,
            messages: [
                ChatMessage {
                    role: "system",
                    content: SYSTEM_PROMPT,
                },
                ChatMessage {
                    role: "user",
                    content: question,
                },
            ],
            temperature: TEMPERATURE,
            max_tokens: MAX_TOKENS,
        };

        debug!(endpoint = %self.endpoint, model = %self.model, "sending completion request");

        let response = self
            .client
            .post(&self.endpoint)
            .bearer_auth(credential.expose())
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                error!(error = %e, "completion request failed");
                CompletionError::Network(e)
            })?;

        let status = response.status();
        debug!(status = %status, "received response");

        if !status.is_success() {
            let server_message = Self::server_message(response).await;
            let err = CompletionError::from_status(status, server_message);
            error!(status = %status, code = err.code(), "completion API error");
            return Err(err);
        }

        let body: ChatResponse = response.json().await.map_err(|e| {
            if e.is_decode() {
                error!(error = %e, "failed to parse completion response");
                CompletionError::MalformedResponse
            } else {
                error!(error = %e, "failed to read completion response");
                CompletionError::Network(e)
            }
        })?;

        let reply = body
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message)
            .and_then(|m| m.content)
            .filter(|content| !content.trim().is_empty())
            .ok_or(CompletionError::MalformedResponse)?;

        info!(reply_chars = reply.len(), "completion received");
        Ok(reply)
    }
}
