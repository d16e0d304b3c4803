use serde::{Deserialize, Serialize};
use std::fmt;

/// Identifier of a message inside one character's ledger.
///
/// IDs start at 1 (the seeded greeting), grow with every append and are
/// never handed out twice, even after the message they named is deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MessageId(pub u64);

impl MessageId {
    pub const FIRST: MessageId = MessageId(1);

    pub fn next(self) -> MessageId {
        MessageId(self.0 + 1)
    }
}

impl fmt::Display for MessageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for MessageId {
    type Err = std::num::ParseIntError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim().parse::<u64>().map(MessageId)
    }
}

/// Correlation data Character AI needs to edit or delete a turn remotely.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteTurn {
    pub turn_id: String,
    pub candidate_id: String,
}

/// One entry of `chat_content`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub author_name: String,
    pub is_user: bool,
    pub text: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub turn_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub candidate_id: Option<String>,
}

impl Message {
    pub fn new(author_name: impl Into<String>, is_user: bool, text: impl Into<String>) -> Self {
        Self {
            author_name: author_name.into(),
            is_user,
            text: text.into(),
            turn_id: None,
            candidate_id: None,
        }
    }

    pub fn with_remote(mut self, remote: RemoteTurn) -> Self {
        self.turn_id = Some(remote.turn_id);
        self.candidate_id = Some(remote.candidate_id);
        self
    }

    pub fn remote(&self) -> Option<RemoteTurn> {
        match (&self.turn_id, &self.candidate_id) {
            (Some(turn_id), Some(candidate_id)) => Some(RemoteTurn {
                turn_id: turn_id.clone(),
                candidate_id: candidate_id.clone(),
            }),
            _ => None,
        }
    }
}

/// A (user turn, character turn) pair referencing ledger entries by ID.
///
/// Either side may be absent: a greeting has no user side and an
/// unanswered user message has no character side.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HistoryPair {
    pub user: Option<MessageId>,
    pub character: Option<MessageId>,
}

/// The textual form of a [`HistoryPair`], as written to `chat_history`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HistoryText {
    pub user: String,
    pub character: String,
}

impl HistoryText {
    pub fn new(user: impl Into<String>, character: impl Into<String>) -> Self {
        Self {
            user: user.into(),
            character: character.into(),
        }
    }
}

/// Role of a message sent to a stateless chat-completions endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContextRole {
    System,
    User,
    Assistant,
}

impl ContextRole {
    pub fn as_str(self) -> &'static str {
        match self {
            ContextRole::System => "system",
            ContextRole::User => "user",
            ContextRole::Assistant => "assistant",
        }
    }
}

/// Role-tagged message in the context handed to a stateless provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContextMessage {
    pub role: ContextRole,
    pub content: String,
}

impl ContextMessage {
    pub fn new(role: ContextRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }

    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ContextRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ContextRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ContextRole::Assistant, content)
    }
}
