//! Bounded conversation history for one connection

use std::collections::VecDeque;

use serde::Serialize;

/// Who said a turn
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of the conversation
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
        }
    }
}

/// Chronological turns, capped with oldest-first eviction
#[derive(Debug)]
pub struct ConversationState {
    turns: VecDeque<Turn>,
    cap: usize,
}

impl ConversationState {
    #[must_use]
    pub fn new(cap: usize) -> Self {
        Self {
            turns: VecDeque::with_capacity(cap.min(64)),
            cap,
        }
    }

    pub fn append_user(&mut self, text: impl Into<String>) {
        self.push(Turn::user(text));
    }

    pub fn append_assistant(&mut self, text: impl Into<String>) {
        self.push(Turn::assistant(text));
    }

    fn push(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.cap {
            self.turns.pop_front();
        }
    }

    /// The last `max_rounds` rounds (two entries each), oldest first
    #[must_use]
    pub fn recent_history(&self, max_rounds: usize) -> Vec<Turn> {
        let keep = max_rounds.saturating_mul(2).min(self.turns.len());
        self.turns
            .iter()
            .skip(self.turns.len() - keep)
            .cloned()
            .collect()
    }

    pub fn clear(&mut self) {
        self.turns.clear();
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.turns.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }
}
