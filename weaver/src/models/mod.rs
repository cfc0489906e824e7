//! Data models for sessions, transcripts, and tool executions.

mod message;
mod session;
mod tool;

pub use message::{ContentBlock, Message, MessageRole, MessageStatus};
pub(crate) use session::parse_timestamp;
pub use session::{Session, SessionStatus};
pub use tool::{ToolExecution, ToolStatus};
