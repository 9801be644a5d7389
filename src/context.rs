//! Conversation context: bounded turn history and prompt windows.
//!
//! The core never stores conversations. Callers send the history with every
//! request; it is rebuilt here, extended with the new turns, and handed back.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::sentiment::SentimentLabel;

/// Default maximum number of turns kept in a conversation.
pub const DEFAULT_MAX_TURNS: usize = 20;

/// Who authored a turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    #[serde(alias = "assistant")]
    Bot,
}

impl Role {
    /// Speaker tag used when serializing a window into a prompt.
    pub fn speaker(&self) -> &'static str {
        match self {
            Self::User => "User",
            Self::Bot => "Assistant",
        }
    }
}

/// One message in a conversation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    #[serde(alias = "text")]
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<SentimentLabel>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
}

impl Turn {
    /// A user turn stamped with the current time.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sentiment: None,
            timestamp: Some(Utc::now()),
        }
    }

    /// A bot turn stamped with the current time.
    pub fn bot(content: impl Into<String>) -> Self {
        Self {
            role: Role::Bot,
            content: content.into(),
            sentiment: None,
            timestamp: Some(Utc::now()),
        }
    }

    pub fn with_sentiment(mut self, label: SentimentLabel) -> Self {
        self.sentiment = Some(label);
        self
    }

    /// Cut `content` to at most `max_chars` characters.
    pub fn truncated(mut self, max_chars: usize) -> Self {
        if let Some((end, _)) = self.content.char_indices().nth(max_chars) {
            self.content.truncate(end);
        }
        self
    }
}

/// Ordered turn history with FIFO eviction.
#[derive(Debug, Clone)]
pub struct Conversation {
    turns: VecDeque<Turn>,
    max_turns: usize,
}

impl Conversation {
    /// Create an empty conversation holding at most `max_turns` turns.
    ///
    /// A cap of zero is treated as one.
    pub fn new(max_turns: usize) -> Self {
        let max_turns = max_turns.max(1);
        Self {
            turns: VecDeque::with_capacity(max_turns),
            max_turns,
        }
    }

    /// Rebuild a conversation from caller-supplied history, keeping the newest turns.
    pub fn from_history(history: impl IntoIterator<Item = Turn>, max_turns: usize) -> Self {
        let mut conversation = Self::new(max_turns);
        for turn in history {
            conversation.append(turn);
        }
        conversation
    }

    /// Append a turn, evicting the oldest ones past the cap.
    pub fn append(&mut self, turn: Turn) {
        self.turns.push_back(turn);
        while self.turns.len() > self.max_turns {
            self.turns.pop_front();
        }
    }

    /// The newest `max_turns` turns, oldest first.
    pub fn window(&self, max_turns: usize) -> Vec<&Turn> {
        let skip = self.turns.len().saturating_sub(max_turns);
        self.turns.iter().skip(skip).collect()
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn max_turns(&self) -> usize {
        self.max_turns
    }

    pub fn turns(&self) -> impl Iterator<Item = &Turn> {
        self.turns.iter()
    }

    pub fn into_turns(self) -> Vec<Turn> {
        self.turns.into()
    }
}

impl Default for Conversation {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_TURNS)
    }
}
