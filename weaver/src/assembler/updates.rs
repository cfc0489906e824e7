//! Notifications emitted by the transcript as it changes.

use crate::error::TurnError;
use crate::models::ToolStatus;
use crate::protocol::Question;

/// How a turn ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    Interrupted,
    Failed,
}

impl TurnOutcome {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Completed => "completed",
            Self::Interrupted => "interrupted",
            Self::Failed => "failed",
        }
    }
}

impl std::fmt::Display for TurnOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A question the assistant is waiting on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingQuestion {
    pub tool_use_id: String,
    pub questions: Vec<Question>,
}

/// One observable change to a transcript.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TranscriptUpdate {
    MessageAdded { message_id: String },
    MessageUpdated { message_id: String },
    ToolStatusChanged { tool_use_id: String, status: ToolStatus },
    TurnFinished { message_id: String, outcome: TurnOutcome },
    /// The thinking indicator turned on or off.
    Thinking(bool),
    QuestionPending { tool_use_id: String },
    QuestionCleared,
    /// A turn-scoped error to show the user.
    Error(TurnError),
    /// The server no longer knows this session.
    SessionNotFound,
    /// The transcript was replaced wholesale.
    HistoryLoaded { message_count: usize },
}
