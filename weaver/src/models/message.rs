//! Message model representing one entry in a session transcript.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::protocol::TokenUsage;

/// Role of a message sender.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MessageRole {
    /// Message from the user.
    User,
    /// Message from the assistant.
    Assistant,
    /// System message.
    System,
}

impl MessageRole {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::User => "user",
            Self::Assistant => "assistant",
            Self::System => "system",
        }
    }

    /// Parse a role as the session API spells it.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "user" => Some(Self::User),
            "assistant" => Some(Self::Assistant),
            "system" => Some(Self::System),
            _ => None,
        }
    }
}

impl std::fmt::Display for MessageRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// One unit of streamed output inside a message.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ContentBlock {
    /// Accumulated assistant or user text.
    Text { text: String },
    /// Model reasoning. Rendered collapsed, never as plain text.
    Thinking {
        #[serde(default)]
        content: String,
    },
    /// A tool invocation.
    ToolUse {
        id: String,
        name: String,
        #[serde(default)]
        input: Value,
    },
    /// The outcome of a tool invocation.
    ToolResult {
        tool_use_id: String,
        #[serde(default)]
        content: String,
        #[serde(default)]
        is_error: bool,
    },
}

impl ContentBlock {
    pub fn text(text: impl Into<String>) -> Self {
        Self::Text { text: text.into() }
    }

    pub const fn type_label(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolUse { .. } => "tool_use",
            Self::ToolResult { .. } => "tool_result",
        }
    }
}

/// Lifecycle of a message. Only the in-progress assistant message is ever
/// `Streaming` or `InterruptPending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageStatus {
    /// Still receiving content.
    Streaming,
    /// An interrupt was requested and is waiting for acknowledgment.
    InterruptPending,
    /// Finished normally with a `result`.
    Complete,
    /// Finished early with a truncation marker.
    Interrupted,
    /// Aborted by an error.
    Failed,
}

impl MessageStatus {
    /// Whether the message can still change.
    pub const fn is_open(self) -> bool {
        matches!(self, Self::Streaming | Self::InterruptPending)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Streaming => "streaming",
            Self::InterruptPending => "interrupt_pending",
            Self::Complete => "complete",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for MessageStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A message in a session transcript.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    /// Unique identifier for the message.
    pub id: String,
    /// Role of the message sender.
    pub role: MessageRole,
    /// Content blocks in arrival order.
    pub content: Vec<ContentBlock>,
    /// When the message was created.
    pub timestamp: DateTime<Utc>,
    /// Current lifecycle state.
    pub status: MessageStatus,
    /// Token usage reported by the `result` that completed this message.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<TokenUsage>,
    /// Cost in USD reported with the usage.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_usd: Option<f64>,
    /// Displayable error for failed messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Truncation marker text for interrupted messages.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notice: Option<String>,
}

impl Message {
    /// Create a committed message with the given content.
    pub fn new(role: MessageRole, content: Vec<ContentBlock>) -> Self {
        Self {
            id: uuid::Uuid::now_v7().to_string(),
            role,
            content,
            timestamp: Utc::now(),
            status: MessageStatus::Complete,
            usage: None,
            cost_usd: None,
            error: None,
            notice: None,
        }
    }

    /// Create a user message holding plain text.
    pub fn user(text: impl Into<String>) -> Self {
        Self::new(MessageRole::User, vec![ContentBlock::text(text)])
    }

    /// Create an empty assistant message that is still streaming.
    pub fn streaming_assistant() -> Self {
        Self {
            status: MessageStatus::Streaming,
            ..Self::new(MessageRole::Assistant, Vec::new())
        }
    }

    /// All text blocks joined in order, without separators.
    pub fn text(&self) -> String {
        self.content
            .iter()
            .filter_map(|block| match block {
                ContentBlock::Text { text } => Some(text.as_str()),
                _ => None,
            })
            .collect()
    }

    /// Whether this message holds a `tool_use` block with the given id.
    pub fn has_tool_use(&self, tool_use_id: &str) -> bool {
        self.content
            .iter()
            .any(|block| matches!(block, ContentBlock::ToolUse { id, .. } if id == tool_use_id))
    }
}
