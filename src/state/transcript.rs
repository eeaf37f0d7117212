//! Append-only conversation record

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Who produced a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Speaker {
    User,
    Assistant,
}

impl std::fmt::Display for Speaker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Speaker::User => write!(f, "user"),
            Speaker::Assistant => write!(f, "assistant"),
        }
    }
}

/// Time-based turn identifier, unique and ordered by creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TurnId(u64);

/// Last id handed out, shared by every transcript in the process
static LAST_TURN_ID: AtomicU64 = AtomicU64::new(0);

impl TurnId {
    /// Allocate the next id from the wall clock.
    ///
    /// Two turns created in the same millisecond get consecutive ids.
    pub fn next(now: DateTime<Utc>) -> Self {
        let millis = u64::try_from(now.timestamp_millis()).unwrap_or(0);
        let mut last = LAST_TURN_ID.load(Ordering::Relaxed);
        loop {
            let candidate = millis.max(last + 1);
            match LAST_TURN_ID.compare_exchange_weak(
                last,
                candidate,
                Ordering::Relaxed,
                Ordering::Relaxed,
            ) {
                Ok(_) => return Self(candidate),
                Err(current) => last = current,
            }
        }
    }
}

impl std::fmt::Display for TurnId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One immutable unit of conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Turn {
    id: TurnId,
    text: String,
    speaker: Speaker,
    created_at: DateTime<Utc>,
}

impl Turn {
    fn new(text: String, speaker: Speaker) -> Self {
        let created_at = Utc::now();
        Self {
            id: TurnId::next(created_at),
            text,
            speaker,
            created_at,
        }
    }

    pub fn id(&self) -> TurnId {
        self.id
    }

    pub fn text(&self) -> &str {
        &self.text
    }

    pub fn speaker(&self) -> Speaker {
        self.speaker
    }
}

/// Ordered sequence of turns; insertion order is conversation order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a new turn and return a copy of it.
    ///
    /// Callers guarantee `text` is non-empty.
    pub fn append(&mut self, text: impl Into<String>, speaker: Speaker) -> Turn {
        let turn = Turn::new(text.into(), speaker);
        self.turns.push(turn.clone());
        turn
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }
}
