//! Completion module for the remote chat-completion endpoint
//!
//! Every call is stateless: one persona instruction plus the newest user
//! utterance, no replayed history.

mod client;
mod error;
mod prompt;

use async_trait::async_trait;

pub use client::{HttpCompletionClient, DEFAULT_ENDPOINT, DEFAULT_MODEL};
pub use error::CompletionError;

use crate::credential::Credential;

/// Sends one question to a completion service and returns the reply text
#[async_trait]
pub trait CompletionClient: Send + Sync {
    async fn complete(
        &self,
        credential: &Credential,
        question: &str,
    ) -> Result<String, CompletionError>;
}
