//! Tool execution model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Status of a tool execution.
///
/// Statuses only ever move forward: `Pending` → `Executing` →
/// `Success` | `Error`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ToolStatus {
    /// Announced by `tool_use_start`, not yet running.
    Pending,
    /// The server reported the tool is running.
    Executing,
    /// The tool finished successfully.
    Success,
    /// The tool finished with an error.
    Error,
}

impl ToolStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Executing => "executing",
            Self::Success => "success",
            Self::Error => "error",
        }
    }

    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Error)
    }

    /// Position in the lifecycle. Both terminal states share a rank.
    const fn rank(self) -> u8 {
        match self {
            Self::Pending => 0,
            Self::Executing => 1,
            Self::Success | Self::Error => 2,
        }
    }

    /// Whether moving from `self` to `next` is a strictly forward step.
    pub const fn can_advance_to(self, next: Self) -> bool {
        next.rank() > self.rank()
    }
}

impl std::fmt::Display for ToolStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// The tracked lifecycle of one tool invocation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolExecution {
    /// The `tool_use_id` this execution belongs to.
    pub tool_use_id: String,
    /// Tool name.
    pub name: String,
    /// Tool input payload.
    pub input: Value,
    /// Current status.
    pub status: ToolStatus,
    /// Output of a successful run.
    pub output: Option<String>,
    /// Output of a failed run.
    pub error: Option<String>,
    /// When `tool_use_start` arrived.
    pub started_at: DateTime<Utc>,
    /// When `tool_result` arrived.
    pub ended_at: Option<DateTime<Utc>>,
}

impl ToolExecution {
    pub fn new(tool_use_id: String, name: String, input: Value, started_at: DateTime<Utc>) -> Self {
        Self {
            tool_use_id,
            name,
            input,
            status: ToolStatus::Pending,
            output: None,
            error: None,
            started_at,
            ended_at: None,
        }
    }
}
