//! Host-agnostic job output types.
//!
//! A [`QueryOutput`] is what a notebook host receives for a statement or a
//! whole script: a status plus an ordered list of typed messages. The host
//! decides how to render each message kind.

use serde::{Deserialize, Serialize};

use crate::error::StageError;

/// Overall outcome of a statement or job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputStatus {
    Success,
    Error,
}

/// Rendering hint for one message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Plain text.
    Text,
    /// Tab-separated table, header row first.
    Table,
    /// Base64-encoded image.
    Img,
}

/// One typed message of an output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputMessage {
    pub kind: MessageKind,
    pub data: String,
}

/// Structured, user-facing result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryOutput {
    pub status: OutputStatus,
    pub messages: Vec<OutputMessage>,
}

impl QueryOutput {
    /// An empty successful output.
    pub fn success() -> Self {
        Self {
            status: OutputStatus::Success,
            messages: Vec::new(),
        }
    }

    /// A successful output with one text message.
    pub fn text(msg: impl Into<String>) -> Self {
        Self::success().with(MessageKind::Text, msg)
    }

    /// A failed output with one text message.
    pub fn error(msg: impl Into<String>) -> Self {
        Self {
            status: OutputStatus::Error,
            messages: Vec::new(),
        }
        .with(MessageKind::Text, msg)
    }

    /// Appends a message, builder style.
    pub fn with(mut self, kind: MessageKind, data: impl Into<String>) -> Self {
        self.push(kind, data);
        self
    }

    /// Appends a message.
    pub fn push(&mut self, kind: MessageKind, data: impl Into<String>) {
        self.messages.push(OutputMessage {
            kind,
            data: data.into(),
        });
    }

    /// Returns true if the output reports success.
    pub fn is_success(&self) -> bool {
        self.status == OutputStatus::Success
    }

    /// Returns true if any message contains `needle`.
    pub fn contains(&self, needle: &str) -> bool {
        self.messages.iter().any(|m| m.data.contains(needle))
    }

    /// Returns the messages of the given kind.
    pub fn messages_of(&self, kind: MessageKind) -> impl Iterator<Item = &OutputMessage> {
        self.messages.iter().filter(move |m| m.kind == kind)
    }

    /// Renders the output as plain text, one message per block.
    pub fn to_plain_text(&self) -> String {
        self.messages
            .iter()
            .map(|m| match m.kind {
                MessageKind::Img => format!("<image: {} base64 chars>", m.data.len()),
                _ => m.data.clone(),
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

impl From<StageError> for QueryOutput {
    fn from(e: StageError) -> Self {
        Self::error(e.message())
    }
}
