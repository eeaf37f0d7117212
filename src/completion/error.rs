//! Completion failure taxonomy

use thiserror::Error;

/// Errors from the completion path, surfaced to the user as assistant turns
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("API key not configured")]
    MissingCredential,

    #[error("Invalid API key. Please check your Groq API key in settings.")]
    InvalidCredential,

    #[error("Rate limit exceeded. Please try again in a moment.")]
    RateLimited,

    #[error("Groq service is temporarily unavailable. Please try again later.")]
    ServiceUnavailable,

    #[error("Invalid response format from API")]
    MalformedResponse,

    #[error("Network error. Please check your internet connection.")]
    Network(#[source] reqwest::Error),

    /// Any other non-success status; `message` is the server's text when it
    /// sent one, otherwise the status line
    #[error("{message}")]
    Http { status: u16, message: String },
}

impl CompletionError {
    /// Map a non-success status to an error, preferring the server's message
    /// for statuses without a fixed explanation
    pub fn from_status(status: reqwest::StatusCode, server_message: Option<String>) -> Self {
        match status.as_u16() {
            401 => Self::InvalidCredential,
            429 => Self::RateLimited,
            code if code >= 500 => Self::ServiceUnavailable,
            code => Self::Http {
                status: code,
                message: server_message.unwrap_or_else(|| {
                    format!(
                        "HTTP {code}: {}",
                        status.canonical_reason().unwrap_or("Unknown Status")
                    )
                }),
            },
        }
    }

    /// Short machine-readable name used in logs and IPC
    pub fn code(&self) -> &'static str {
        match self {
            Self::MissingCredential => "missing_credential",
            Self::InvalidCredential => "invalid_credential",
            Self::RateLimited => "rate_limited",
            Self::ServiceUnavailable => "service_unavailable",
            Self::MalformedResponse => "malformed_response",
            Self::Network(_) => "network",
            Self::Http { .. } => "http",
        }
    }
}
