//! Chat protocol events.
//!
//! The channel carries one JSON object per frame. Every object has a `type`
//! discriminator; the remaining fields depend on the type.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::ProtocolViolation;

/// Token usage statistics.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    #[serde(default)]
    pub input_tokens: u64,
    #[serde(default)]
    pub output_tokens: u64,
}

/// A file attached to a chat message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileAttachment {
    pub path: String,
    pub content: String,
}

/// One choice offered by a `user_question`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionOption {
    pub label: String,
    #[serde(default)]
    pub description: String,
}

/// A question the assistant asks the user mid-turn.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Question {
    pub question: String,
    #[serde(default)]
    pub header: String,
    #[serde(default)]
    pub options: Vec<QuestionOption>,
    #[serde(default, rename = "multiSelect")]
    pub multi_select: bool,
}

/// Events sent from the client to the server.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Start a new turn.
    Chat {
        content: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        files: Option<Vec<FileAttachment>>,
    },
    /// Ask the server to stop the in-flight turn.
    Interrupt,
    /// Ask the server to resume streaming a turn it is still processing.
    Resume,
    /// Ask the server whether a turn is being processed.
    GetState,
    /// Reply to a server `ping`.
    Pong {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        timestamp: Option<f64>,
    },
    /// Answer a pending `user_question`. Keys are question indexes.
    QuestionAnswer {
        tool_use_id: String,
        answers: BTreeMap<String, String>,
    },
}

impl ClientEvent {
    pub fn chat(content: impl Into<String>) -> Self {
        Self::Chat {
            content: content.into(),
            files: None,
        }
    }

    /// Encode as a single text frame.
    pub fn to_frame(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }

    pub const fn type_label(&self) -> &'static str {
        match self {
            Self::Chat { .. } => "chat",
            Self::Interrupt => "interrupt",
            Self::Resume => "resume",
            Self::GetState => "get_state",
            Self::Pong { .. } => "pong",
            Self::QuestionAnswer { .. } => "question_answer",
        }
    }
}

/// Events sent from the server to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    /// A chunk of assistant text.
    Text { content: String },
    /// The assistant is reasoning. Content is optional and usually absent.
    Thinking {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        content: Option<String>,
    },
    /// A tool invocation was announced.
    ToolUseStart {
        tool_use_id: String,
        tool: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        input: Option<Value>,
    },
    /// A tool started running.
    ToolExecuting {
        tool_use_id: String,
        tool: String,
        #[serde(default)]
        input: Value,
    },
    /// A tool finished.
    ToolResult {
        tool_use_id: String,
        success: bool,
        #[serde(default)]
        output: String,
    },
    /// The turn completed.
    Result {
        #[serde(default)]
        usage: TokenUsage,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        cost: Option<f64>,
    },
    /// The turn failed. The text lives in `message` or `error`.
    Error {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        message: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        error: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        code: Option<String>,
    },
    /// The turn stopped because of an interrupt request.
    Interrupted {
        #[serde(default)]
        message: String,
    },
    /// The server picked a still-running turn back up.
    ResumeStarted {
        #[serde(default)]
        sdk_session_id: Option<String>,
    },
    /// A resume was requested but nothing was running.
    ResumeNotNeeded {
        #[serde(default)]
        message: String,
    },
    /// A resume was requested but could not be performed.
    ResumeFailed {
        #[serde(default)]
        error: String,
    },
    /// The assistant needs an answer before it can continue.
    UserQuestion {
        tool_use_id: String,
        #[serde(default)]
        questions: Vec<Question>,
    },
    /// The server accepted the connection.
    Connected {
        #[serde(default)]
        session_id: Option<String>,
    },
    /// Keepalive. Answer with `pong`.
    Ping {
        #[serde(default)]
        timestamp: Option<f64>,
    },
    /// Reply to `get_state`.
    State {
        #[serde(default)]
        is_processing: bool,
        #[serde(default)]
        has_partial_response: bool,
    },
}

impl ServerEvent {
    /// Parse one inbound frame.
    ///
    /// Frames whose `type` this client does not know are reported as
    /// [`ProtocolViolation::UnknownEvent`] so they can be dropped.
    pub fn parse(frame: &str) -> Result<Self, ProtocolViolation> {
        let frame = frame.trim();
        let value: Value = serde_json::from_str(frame)
            .map_err(|e| ProtocolViolation::Malformed(e.to_string()))?;

        let Some(kind) = value.get("type").and_then(Value::as_str) else {
            return Err(ProtocolViolation::Malformed("missing `type`".into()));
        };
        if !Self::is_known_type(kind) {
            return Err(ProtocolViolation::UnknownEvent(kind.to_string()));
        }

        serde_json::from_value(value).map_err(|e| ProtocolViolation::Malformed(e.to_string()))
    }

    fn is_known_type(kind: &str) -> bool {
        matches!(
            kind,
            "text"
                | "thinking"
                | "tool_use_start"
                | "tool_executing"
                | "tool_result"
                | "result"
                | "error"
                | "interrupted"
                | "resume_started"
                | "resume_not_needed"
                | "resume_failed"
                | "user_question"
                | "connected"
                | "ping"
                | "state"
        )
    }

    /// Get the event type as a string for logging.
    pub const fn type_label(&self) -> &'static str {
        match self {
            Self::Text { .. } => "text",
            Self::Thinking { .. } => "thinking",
            Self::ToolUseStart { .. } => "tool_use_start",
            Self::ToolExecuting { .. } => "tool_executing",
            Self::ToolResult { .. } => "tool_result",
            Self::Result { .. } => "result",
            Self::Error { .. } => "error",
            Self::Interrupted { .. } => "interrupted",
            Self::ResumeStarted { .. } => "resume_started",
            Self::ResumeNotNeeded { .. } => "resume_not_needed",
            Self::ResumeFailed { .. } => "resume_failed",
            Self::UserQuestion { .. } => "user_question",
            Self::Connected { .. } => "connected",
            Self::Ping { .. } => "ping",
            Self::State { .. } => "state",
        }
    }

    /// Whether this event ends the turn it belongs to.
    pub const fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Result { .. } | Self::Error { .. } | Self::Interrupted { .. }
        )
    }

    /// Displayable text of an `error` event.
    pub fn error_text(&self) -> Option<&str> {
        match self {
            Self::Error { message, error, .. } => Some(
                message
                    .as_deref()
                    .or(error.as_deref())
                    .unwrap_or("Unknown error"),
            ),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parse_text() {
        let event = ServerEvent::parse(r#"{"type":"text","content":"Hello"}"#).unwrap();
        assert_eq!(event, ServerEvent::Text { content: "Hello".into() });
        assert_eq!(event.type_label(), "text");
    }

    #[test]
    fn parse_bare_thinking() {
        let event = ServerEvent::parse(r#"{"type":"thinking"}"#).unwrap();
        assert_eq!(event, ServerEvent::Thinking { content: None });
    }

    #[test]
    fn parse_tool_use_start_without_input() {
        let event =
            ServerEvent::parse(r#"{"type":"tool_use_start","tool_use_id":"t1","tool":"Grep"}"#)
                .unwrap();
        assert_eq!(
            event,
            ServerEvent::ToolUseStart {
                tool_use_id: "t1".into(),
                tool: "Grep".into(),
                input: None,
            }
        );
    }

    #[test]
    fn parse_result_with_extra_fields() {
        let event = ServerEvent::parse(
            r#"{"type":"result","usage":{"input_tokens":10,"output_tokens":5},"cost":0.01,"interrupted":false,"timestamp":1.0}"#,
        )
        .unwrap();
        let ServerEvent::Result { usage, cost } = event else {
            panic!("expected result");
        };
        assert_eq!(usage.input_tokens, 10);
        assert_eq!(usage.output_tokens, 5);
        assert_eq!(cost, Some(0.01));
    }

    #[test]
    fn error_text_prefers_message_then_error() {
        let a = ServerEvent::parse(r#"{"type":"error","message":"boom","error":"other"}"#).unwrap();
        assert_eq!(a.error_text(), Some("boom"));
        let b = ServerEvent::parse(r#"{"type":"error","error":"bad","code":"E1"}"#).unwrap();
        assert_eq!(b.error_text(), Some("bad"));
        let c = ServerEvent::parse(r#"{"type":"error"}"#).unwrap();
        assert_eq!(c.error_text(), Some("Unknown error"));
    }

    #[test]
    fn parse_user_question() {
        let event = ServerEvent::parse(
            r#"{"type":"user_question","tool_use_id":"q1","questions":[{"question":"Which?","header":"Pick","options":[{"label":"A","description":"first"}],"multiSelect":false}],"timestamp":2.0}"#,
        )
        .unwrap();
        let ServerEvent::UserQuestion { questions, .. } = event else {
            panic!("expected user_question");
        };
        assert_eq!(questions[0].options[0].label, "A");
        assert!(!questions[0].multi_select);
    }

    #[test]
    fn unknown_type_is_a_violation() {
        let err = ServerEvent::parse(r#"{"type":"telemetry","x":1}"#).unwrap_err();
        assert_eq!(err, ProtocolViolation::UnknownEvent("telemetry".into()));
    }

    #[test]
    fn malformed_frames_are_violations() {
        assert!(matches!(
            ServerEvent::parse("not json"),
            Err(ProtocolViolation::Malformed(_))
        ));
        assert!(matches!(
            ServerEvent::parse(r#"{"content":"no type"}"#),
            Err(ProtocolViolation::Malformed(_))
        ));
        assert!(matches!(
            ServerEvent::parse(r#"{"type":"tool_result","tool_use_id":"t1"}"#),
            Err(ProtocolViolation::Malformed(_))
        ));
    }

    #[test]
    fn client_events_encode_with_type_tag() {
        let chat = serde_json::to_value(ClientEvent::chat("hi")).unwrap();
        assert_eq!(chat, json!({"type": "chat", "content": "hi"}));

        let interrupt = ClientEvent::Interrupt.to_frame().unwrap();
        assert_eq!(interrupt, r#"{"type":"interrupt"}"#);

        let state = ClientEvent::GetState.to_frame().unwrap();
        assert_eq!(state, r#"{"type":"get_state"}"#);

        let mut answers = BTreeMap::new();
        answers.insert("0".to_string(), "1".to_string());
        let answer = serde_json::to_value(ClientEvent::QuestionAnswer {
            tool_use_id: "q1".into(),
            answers,
        })
        .unwrap();
        assert_eq!(answer["type"], "question_answer");
        assert_eq!(answer["answers"]["0"], "1");
    }

    #[test]
    fn pong_carries_fractional_timestamp() {
        let pong = ClientEvent::Pong {
            timestamp: Some(12.5),
        };
        let back: ClientEvent = serde_json::from_str(&pong.to_frame().unwrap()).unwrap();
        assert_eq!(back, pong);
        assert_ne!(
            back,
            ClientEvent::Pong {
                timestamp: Some(12.0)
            }
        );
    }

    #[test]
    fn chat_with_files() {
        let event = ClientEvent::Chat {
            content: "see file".into(),
            files: Some(vec![FileAttachment {
                path: "src/lib.rs".into(),
                content: "fn main() {}".into(),
            }]),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["files"][0]["path"], "src/lib.rs");
    }
}
