//! Conversation state module
//!
//! Owns the transcript and the processing state machine:
//! - Idle: no reply pending, submissions accepted
//! - AwaitingReply: one completion request in flight, further submissions
//!   are rejected until it settles

mod machine;
mod transcript;

pub use machine::{ControllerStatus, ProcessingState, SubmitOutcome, TurnController};
pub use transcript::Turn;

#[cfg(test)]
pub(crate) use machine::fake;
#[cfg(test)]
pub(crate) use transcript::Speaker;
