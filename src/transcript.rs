//! Folding of a chat history into the two strings the upstream API takes.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Roles accepted on inbound chat messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    Developer,
    User,
    Assistant,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::System, Role::Developer, Role::User, Role::Assistant];

    pub fn as_str(self) -> &'static str {
        match self {
            Role::System => "system",
            Role::Developer => "developer",
            Role::User => "user",
            Role::Assistant => "assistant",
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownRole(pub String);

impl fmt::Display for UnknownRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown role {:?}", self.0)
    }
}

impl std::error::Error for UnknownRole {}

impl FromStr for Role {
    type Err = UnknownRole;

    /// Case-sensitive: only the four lowercase names are accepted.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Role::ALL
            .into_iter()
            .find(|role| role.as_str() == s)
            .ok_or_else(|| UnknownRole(s.to_string()))
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// Result of [`fold`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FoldedTranscript {
    /// System and developer contents, newline-joined. `None` when there were none.
    pub instructions: Option<String>,

    /// `User: ...` / `Assistant: ...` lines, newline-joined. Empty when there were none.
    pub conversation: String,
}

/// Fold messages, in order, into instructions and a readable conversation.
pub fn fold(messages: &[Message]) -> FoldedTranscript {
    let mut instructions = Vec::new();
    let mut conversation = Vec::new();

    for message in messages {
        match message.role {
            Role::System | Role::Developer => instructions.push(message.content.clone()),
            Role::User => conversation.push(format!("User: {}", message.content)),
            Role::Assistant => conversation.push(format!("Assistant: {}", message.content)),
        }
    }

    FoldedTranscript {
        instructions: (!instructions.is_empty()).then(|| instructions.join("\n")),
        conversation: conversation.join("\n"),
    }
}
