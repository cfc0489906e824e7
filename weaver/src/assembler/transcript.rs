//! Transcript state and the reducer that folds server events into it.

use chrono::{DateTime, Utc};
use serde_json::{json, Value};

use super::updates::{PendingQuestion, TranscriptUpdate, TurnOutcome};
use crate::error::{ProtocolViolation, TurnError};
use crate::models::{ContentBlock, Message, MessageRole, MessageStatus, ToolStatus};
use crate::protocol::ServerEvent;
use crate::tracker::ToolExecutionTracker;

/// Error code the server uses when a session no longer exists.
const SESSION_NOT_FOUND_CODE: &str = "SESSION_NOT_FOUND";

/// Notice attached to interrupted messages when the server sends none.
const DEFAULT_INTERRUPT_NOTICE: &str = "Interrupted";

/// The ordered conversation for one session.
///
/// At most one assistant message is in progress at a time. Every other
/// message is committed and never changes again.
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    messages: Vec<Message>,
    /// Index of the in-progress assistant message, if a turn is open.
    in_progress: Option<usize>,
    tools: ToolExecutionTracker,
    thinking: bool,
    pending_question: Option<PendingQuestion>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a transcript from server history.
    pub fn from_history(messages: Vec<Message>) -> Self {
        let mut transcript = Self::new();
        let _ = transcript.load_history(messages);
        transcript
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub const fn tools(&self) -> &ToolExecutionTracker {
        &self.tools
    }

    /// The assistant message currently streaming, if any.
    pub fn in_progress(&self) -> Option<&Message> {
        self.in_progress.and_then(|idx| self.messages.get(idx))
    }

    pub const fn is_turn_open(&self) -> bool {
        self.in_progress.is_some()
    }

    pub const fn is_thinking(&self) -> bool {
        self.thinking
    }

    pub const fn pending_question(&self) -> Option<&PendingQuestion> {
        self.pending_question.as_ref()
    }

    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    /// Open a turn for a message the user is sending.
    ///
    /// Pushes the committed user message and an empty streaming assistant
    /// message. Rejected while another turn is open.
    pub fn begin_turn(
        &mut self,
        content: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TranscriptUpdate>, TurnError> {
        if self.is_turn_open() {
            return Err(TurnError::TurnInProgress);
        }

        let mut user = Message::user(content);
        user.timestamp = now;
        let user_id = user.id.clone();
        self.messages.push(user);

        let mut updates = vec![TranscriptUpdate::MessageAdded { message_id: user_id }];
        updates.extend(self.open_assistant(now));
        Ok(updates)
    }

    fn open_assistant(&mut self, now: DateTime<Utc>) -> Vec<TranscriptUpdate> {
        let mut assistant = Message::streaming_assistant();
        assistant.timestamp = now;
        let message_id = assistant.id.clone();
        self.messages.push(assistant);
        self.in_progress = Some(self.messages.len() - 1);

        let mut updates = vec![TranscriptUpdate::MessageAdded { message_id }];
        updates.extend(self.set_thinking(true));
        updates
    }

    /// Fold one server event into the transcript.
    ///
    /// On `Err` the transcript is unchanged.
    pub fn apply(
        &mut self,
        event: &ServerEvent,
        now: DateTime<Utc>,
    ) -> Result<Vec<TranscriptUpdate>, ProtocolViolation> {
        match event {
            ServerEvent::Text { content } => self.apply_text(content),
            ServerEvent::Thinking { content } => self.apply_thinking(content.as_deref()),
            ServerEvent::ToolUseStart {
                tool_use_id,
                tool,
                input,
            } => self.apply_tool_use_start(tool_use_id, tool, input.clone(), now),
            ServerEvent::ToolExecuting {
                tool_use_id, input, ..
            } => {
                self.require_turn("tool_executing")?;
                let execution = self.tools.mark_executing(tool_use_id, Some(input.clone()))?;
                Ok(vec![TranscriptUpdate::ToolStatusChanged {
                    tool_use_id: tool_use_id.clone(),
                    status: execution.status,
                }])
            }
            ServerEvent::ToolResult {
                tool_use_id,
                success,
                output,
            } => self.apply_tool_result(tool_use_id, *success, output, now),
            ServerEvent::Result { usage, cost } => {
                let idx = self.require_turn("result")?;
                let message = &mut self.messages[idx];
                message.usage = Some(*usage);
                message.cost_usd = *cost;
                Ok(self.close_turn(MessageStatus::Complete))
            }
            ServerEvent::Error { code, .. } => {
                let text = event.error_text().unwrap_or_default().to_string();
                Ok(self.apply_error(text, code.clone()))
            }
            ServerEvent::Interrupted { message } => {
                let idx = self.require_turn("interrupted")?;
                let notice = if message.is_empty() {
                    DEFAULT_INTERRUPT_NOTICE.to_string()
                } else {
                    message.clone()
                };
                self.messages[idx].notice = Some(notice);
                Ok(self.close_turn(MessageStatus::Interrupted))
            }
            ServerEvent::ResumeStarted { .. } => {
                if self.is_turn_open() {
                    Ok(Vec::new())
                } else {
                    Ok(self.open_assistant(now))
                }
            }
            ServerEvent::ResumeFailed { error } => {
                Ok(self.fail_turn(TurnError::ResumeFailed(error.clone())))
            }
            ServerEvent::UserQuestion {
                tool_use_id,
                questions,
            } => {
                self.require_turn("user_question")?;
                self.pending_question = Some(PendingQuestion {
                    tool_use_id: tool_use_id.clone(),
                    questions: questions.clone(),
                });
                Ok(vec![TranscriptUpdate::QuestionPending {
                    tool_use_id: tool_use_id.clone(),
                }])
            }
            ServerEvent::ResumeNotNeeded { .. }
            | ServerEvent::Connected { .. }
            | ServerEvent::Ping { .. }
            | ServerEvent::State { .. } => Ok(Vec::new()),
        }
    }

    fn require_turn(&self, event: &'static str) -> Result<usize, ProtocolViolation> {
        self.in_progress
            .ok_or(ProtocolViolation::NoTurnInProgress { event })
    }

    fn apply_text(&mut self, content: &str) -> Result<Vec<TranscriptUpdate>, ProtocolViolation> {
        let idx = self.require_turn("text")?;
        let message = &mut self.messages[idx];
        match message.content.last_mut() {
            Some(ContentBlock::Text { text }) => text.push_str(content),
            _ => message.content.push(ContentBlock::text(content)),
        }
        let message_id = message.id.clone();

        let mut updates = self.set_thinking(false);
        updates.push(TranscriptUpdate::MessageUpdated { message_id });
        Ok(updates)
    }

    fn apply_thinking(
        &mut self,
        content: Option<&str>,
    ) -> Result<Vec<TranscriptUpdate>, ProtocolViolation> {
        let idx = self.require_turn("thinking")?;
        let message = &mut self.messages[idx];
        match message.content.last_mut() {
            Some(ContentBlock::Thinking { content: existing }) => {
                existing.push_str(content.unwrap_or_default());
            }
            _ => message.content.push(ContentBlock::Thinking {
                content: content.unwrap_or_default().to_string(),
            }),
        }
        let message_id = message.id.clone();

        let mut updates = self.set_thinking(true);
        updates.push(TranscriptUpdate::MessageUpdated { message_id });
        Ok(updates)
    }

    fn apply_tool_use_start(
        &mut self,
        tool_use_id: &str,
        tool: &str,
        input: Option<Value>,
        now: DateTime<Utc>,
    ) -> Result<Vec<TranscriptUpdate>, ProtocolViolation> {
        let idx = self.require_turn("tool_use_start")?;
        let input = input.unwrap_or_else(|| json!({}));
        self.tools.start(tool_use_id, tool, input.clone(), now)?;

        let message = &mut self.messages[idx];
        message.content.push(ContentBlock::ToolUse {
            id: tool_use_id.to_string(),
            name: tool.to_string(),
            input,
        });
        let message_id = message.id.clone();

        let mut updates = self.set_thinking(false);
        updates.push(TranscriptUpdate::MessageUpdated { message_id });
        updates.push(TranscriptUpdate::ToolStatusChanged {
            tool_use_id: tool_use_id.to_string(),
            status: ToolStatus::Pending,
        });
        Ok(updates)
    }

    fn apply_tool_result(
        &mut self,
        tool_use_id: &str,
        success: bool,
        output: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<TranscriptUpdate>, ProtocolViolation> {
        let idx = self.require_turn("tool_result")?;
        let status = self
            .tools
            .finish(tool_use_id, success, output.to_string(), now)?
            .status;

        let message = &mut self.messages[idx];
        message.content.push(ContentBlock::ToolResult {
            tool_use_id: tool_use_id.to_string(),
            content: output.to_string(),
            is_error: !success,
        });
        let message_id = message.id.clone();

        Ok(vec![
            TranscriptUpdate::MessageUpdated { message_id },
            TranscriptUpdate::ToolStatusChanged {
                tool_use_id: tool_use_id.to_string(),
                status,
            },
        ])
    }

    fn apply_error(&mut self, text: String, code: Option<String>) -> Vec<TranscriptUpdate> {
        let session_missing = code.as_deref() == Some(SESSION_NOT_FOUND_CODE) || {
            let lower = text.to_lowercase();
            lower.contains("session") && lower.contains("not found")
        };

        let mut updates = self.fail_turn(TurnError::Server {
            message: text,
            code,
        });
        if session_missing {
            updates.push(TranscriptUpdate::SessionNotFound);
        }
        updates
    }

    /// Abort the open turn with `error`. The error is surfaced even when no
    /// turn is open.
    pub fn fail_turn(&mut self, error: TurnError) -> Vec<TranscriptUpdate> {
        let mut updates = Vec::new();
        if let Some(idx) = self.in_progress {
            self.messages[idx].error = Some(error.to_string());
            updates = self.close_turn(MessageStatus::Failed);
        }
        updates.push(TranscriptUpdate::Error(error));
        updates
    }

    fn close_turn(&mut self, status: MessageStatus) -> Vec<TranscriptUpdate> {
        let Some(idx) = self.in_progress.take() else {
            return Vec::new();
        };
        let message = &mut self.messages[idx];
        message.status = status;
        let message_id = message.id.clone();

        let outcome = match status {
            MessageStatus::Interrupted => TurnOutcome::Interrupted,
            MessageStatus::Failed => TurnOutcome::Failed,
            _ => TurnOutcome::Completed,
        };

        let mut updates = self.set_thinking(false);
        if self.pending_question.take().is_some() {
            updates.push(TranscriptUpdate::QuestionCleared);
        }
        updates.push(TranscriptUpdate::TurnFinished {
            message_id,
            outcome,
        });
        updates
    }

    fn set_thinking(&mut self, thinking: bool) -> Vec<TranscriptUpdate> {
        if self.thinking == thinking {
            return Vec::new();
        }
        self.thinking = thinking;
        vec![TranscriptUpdate::Thinking(thinking)]
    }

    /// Put the in-progress message into the pending-interrupt sub-state.
    ///
    /// Returns the message id, or `None` when there is no streaming message
    /// or an interrupt is already pending.
    pub fn mark_interrupt_pending(&mut self) -> Option<String> {
        let idx = self.in_progress?;
        let message = &mut self.messages[idx];
        if message.status != MessageStatus::Streaming {
            return None;
        }
        message.status = MessageStatus::InterruptPending;
        Some(message.id.clone())
    }

    /// Remove the pending question if it matches `tool_use_id`.
    pub fn take_question(&mut self, tool_use_id: &str) -> Option<PendingQuestion> {
        if self
            .pending_question
            .as_ref()
            .is_some_and(|q| q.tool_use_id == tool_use_id)
        {
            self.pending_question.take()
        } else {
            None
        }
    }

    /// Replace the whole transcript with server history.
    ///
    /// Tool executions are rebuilt from the historical `tool_use` and
    /// `tool_result` blocks, so a result without a matching use is dropped
    /// from tracking.
    pub fn load_history(&mut self, messages: Vec<Message>) -> Vec<TranscriptUpdate> {
        self.tools.clear();
        self.in_progress = None;
        self.pending_question = None;
        self.thinking = false;

        for message in &messages {
            for block in &message.content {
                match block {
                    ContentBlock::ToolUse { id, name, input } => {
                        let _ = self.tools.start(id, name, input.clone(), message.timestamp);
                    }
                    ContentBlock::ToolResult {
                        tool_use_id,
                        content,
                        is_error,
                    } => {
                        let _ = self.tools.finish(
                            tool_use_id,
                            !is_error,
                            content.clone(),
                            message.timestamp,
                        );
                    }
                    ContentBlock::Text { .. } | ContentBlock::Thinking { .. } => {}
                }
            }
        }

        self.messages = messages;
        vec![TranscriptUpdate::HistoryLoaded {
            message_count: self.messages.len(),
        }]
    }

    /// Number of committed user turns.
    pub fn user_turns(&self) -> usize {
        self.messages
            .iter()
            .filter(|m| m.role == MessageRole::User)
            .count()
    }
}

/// Pure form of [`Transcript::apply`]: `(state, event) -> state'`.
///
/// A rejected event returns the input state untouched alongside the
/// violation.
pub fn reduce(
    mut state: Transcript,
    event: &ServerEvent,
    now: DateTime<Utc>,
) -> (Transcript, Result<Vec<TranscriptUpdate>, ProtocolViolation>) {
    let outcome = state.apply(event, now);
    (state, outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::TokenUsage;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    fn parse(frames: &[&str]) -> Vec<ServerEvent> {
        frames
            .iter()
            .map(|f| ServerEvent::parse(f).unwrap())
            .collect()
    }

    fn open() -> Transcript {
        let mut t = Transcript::new();
        t.begin_turn("find the bug", now()).unwrap();
        t
    }

    fn text(content: &str) -> ServerEvent {
        ServerEvent::Text {
            content: content.into(),
        }
    }

    #[test]
    fn begin_turn_adds_user_and_streaming_assistant() {
        let mut t = Transcript::new();
        let updates = t.begin_turn("hello", now()).unwrap();

        assert_eq!(t.messages().len(), 2);
        assert_eq!(t.messages()[0].role, MessageRole::User);
        assert_eq!(t.messages()[0].text(), "hello");
        assert_eq!(t.in_progress().unwrap().status, MessageStatus::Streaming);
        assert!(t.is_thinking());
        assert!(updates.contains(&TranscriptUpdate::Thinking(true)));
        assert_eq!(t.begin_turn("again", now()), Err(TurnError::TurnInProgress));
    }

    #[test]
    fn text_chunks_concatenate_in_arrival_order() {
        let chunks = ["Hel", "lo", ", ", "", "wor", "ld\n", "```rs", "\n"];
        let mut t = open();
        for chunk in chunks {
            t.apply(&text(chunk), now()).unwrap();
        }

        let message = t.in_progress().unwrap();
        assert_eq!(message.content.len(), 1);
        assert_eq!(message.text(), chunks.concat());
    }

    #[test]
    fn text_after_tool_block_opens_new_text_block() {
        let mut t = open();
        let events = parse(&[
            r#"{"type":"text","content":"Let me look. "}"#,
            r#"{"type":"tool_use_start","tool_use_id":"t1","tool":"Read","input":{"path":"a.rs"}}"#,
            r#"{"type":"tool_result","tool_use_id":"t1","success":true,"output":"fn a() {}"}"#,
            r#"{"type":"text","content":"Found it."}"#,
        ]);
        for e in &events {
            t.apply(e, now()).unwrap();
        }

        let kinds: Vec<_> = t
            .in_progress()
            .unwrap()
            .content
            .iter()
            .map(ContentBlock::type_label)
            .collect();
        assert_eq!(kinds, ["text", "tool_use", "tool_result", "text"]);
        assert_eq!(t.in_progress().unwrap().text(), "Let me look. Found it.");
    }

    #[test]
    fn thinking_opens_then_continues_one_block() {
        let mut t = open();
        t.apply(&ServerEvent::Thinking { content: None }, now()).unwrap();
        t.apply(
            &ServerEvent::Thinking {
                content: Some("hmm".into()),
            },
            now(),
        )
        .unwrap();
        let content = &t.in_progress().unwrap().content;
        assert_eq!(content.len(), 1);
        assert_eq!(
            content[0],
            ContentBlock::Thinking {
                content: "hmm".into()
            }
        );

        t.apply(&text("answer"), now()).unwrap();
        assert!(!t.is_thinking());
    }

    #[test]
    fn grep_scenario_yields_paired_blocks_and_success() {
        let mut t = open();
        let events = parse(&[
            r#"{"type":"tool_use_start","tool_use_id":"1","tool":"grep"}"#,
            r#"{"type":"tool_executing","tool_use_id":"1","tool":"grep","input":{"pattern":"TODO"}}"#,
            r#"{"type":"tool_result","tool_use_id":"1","success":true,"output":"3 matches"}"#,
            r#"{"type":"result","usage":{"input_tokens":10,"output_tokens":5}}"#,
        ]);
        let mut finished = Vec::new();
        for e in &events {
            for update in t.apply(e, now()).unwrap() {
                if let TranscriptUpdate::TurnFinished { outcome, .. } = update {
                    finished.push(outcome);
                }
            }
        }

        let assistants: Vec<_> = t
            .messages()
            .iter()
            .filter(|m| m.role == MessageRole::Assistant)
            .collect();
        assert_eq!(assistants.len(), 1);
        let message = assistants[0];
        assert_eq!(message.status, MessageStatus::Complete);
        assert_eq!(
            message.usage,
            Some(TokenUsage {
                input_tokens: 10,
                output_tokens: 5
            })
        );
        assert_eq!(message.content.len(), 2);
        assert!(matches!(
            &message.content[0],
            ContentBlock::ToolUse { id, name, .. } if id == "1" && name == "grep"
        ));
        assert!(matches!(
            &message.content[1],
            ContentBlock::ToolResult { tool_use_id, content, is_error: false }
                if tool_use_id == "1" && content == "3 matches"
        ));

        let execution = t.tools().get("1").unwrap();
        assert_eq!(execution.status, ToolStatus::Success);
        assert_eq!(execution.input["pattern"], "TODO");
        assert_eq!(finished, [TurnOutcome::Completed]);
        assert!(!t.is_turn_open());
    }

    #[test]
    fn tool_result_for_unknown_id_adds_no_block() {
        let mut t = open();
        let err = t
            .apply(
                &ServerEvent::ToolResult {
                    tool_use_id: "ghost".into(),
                    success: true,
                    output: "x".into(),
                },
                now(),
            )
            .unwrap_err();
        assert_eq!(err, ProtocolViolation::UnknownToolUse("ghost".into()));
        assert!(t.in_progress().unwrap().content.is_empty());
        assert!(t.tools().is_empty());
    }

    #[test]
    fn duplicate_tool_use_start_adds_no_second_block() {
        let mut t = open();
        let start = ServerEvent::ToolUseStart {
            tool_use_id: "t1".into(),
            tool: "Bash".into(),
            input: None,
        };
        t.apply(&start, now()).unwrap();
        assert_eq!(
            t.apply(&start, now()).unwrap_err(),
            ProtocolViolation::DuplicateToolUse("t1".into())
        );
        assert_eq!(t.in_progress().unwrap().content.len(), 1);
    }

    #[test]
    fn failed_tool_does_not_end_turn() {
        let mut t = open();
        let events = parse(&[
            r#"{"type":"tool_use_start","tool_use_id":"t1","tool":"Bash"}"#,
            r#"{"type":"tool_result","tool_use_id":"t1","success":false,"output":"permission denied"}"#,
            r#"{"type":"text","content":"That failed, trying another way."}"#,
        ]);
        for e in &events {
            t.apply(e, now()).unwrap();
        }
        assert!(t.is_turn_open());
        assert_eq!(t.tools().status("t1"), Some(ToolStatus::Error));
        assert!(matches!(
            &t.in_progress().unwrap().content[1],
            ContentBlock::ToolResult { is_error: true, .. }
        ));
    }

    #[test]
    fn text_after_result_is_rejected() {
        let mut t = open();
        t.apply(&text("done"), now()).unwrap();
        t.apply(
            &ServerEvent::Result {
                usage: TokenUsage::default(),
                cost: None,
            },
            now(),
        )
        .unwrap();

        let err = t.apply(&text(" late"), now()).unwrap_err();
        assert_eq!(err, ProtocolViolation::NoTurnInProgress { event: "text" });
        assert_eq!(t.messages().last().unwrap().text(), "done");

        // A later turn does not pick up the stray chunk either.
        t.begin_turn("next", now()).unwrap();
        assert_eq!(t.in_progress().unwrap().text(), "");
    }

    #[test]
    fn interrupted_marks_truncation_not_result() {
        let mut t = open();
        t.apply(&text("partial"), now()).unwrap();
        assert!(t.mark_interrupt_pending().is_some());
        assert_eq!(
            t.in_progress().unwrap().status,
            MessageStatus::InterruptPending
        );
        assert!(t.mark_interrupt_pending().is_none());

        t.apply(
            &ServerEvent::Interrupted {
                message: "stopped".into(),
            },
            now(),
        )
        .unwrap();

        let message = t.messages().last().unwrap();
        assert_eq!(message.status, MessageStatus::Interrupted);
        assert_eq!(message.notice.as_deref(), Some("stopped"));
        assert!(message.usage.is_none());
        assert_eq!(message.text(), "partial");
    }

    #[test]
    fn error_fails_turn_but_session_stays_usable() {
        let mut t = open();
        let updates = t
            .apply(
                &ServerEvent::parse(r#"{"type":"error","error":"rate limited","code":"E429"}"#)
                    .unwrap(),
                now(),
            )
            .unwrap();

        let message = t.messages().last().unwrap();
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.error.as_deref(), Some("rate limited"));
        assert!(updates.contains(&TranscriptUpdate::Error(TurnError::Server {
            message: "rate limited".into(),
            code: Some("E429".into()),
        })));
        assert!(!updates.contains(&TranscriptUpdate::SessionNotFound));
        assert!(t.begin_turn("retry", now()).is_ok());
    }

    #[test]
    fn error_without_turn_is_still_surfaced() {
        let mut t = Transcript::new();
        let updates = t
            .apply(
                &ServerEvent::parse(r#"{"type":"error","message":"Session not found"}"#).unwrap(),
                now(),
            )
            .unwrap();
        assert!(t.messages().is_empty());
        assert!(updates.contains(&TranscriptUpdate::SessionNotFound));
        assert!(matches!(updates[0], TranscriptUpdate::Error(_)));
    }

    #[test]
    fn content_without_turn_is_rejected() {
        let mut t = Transcript::new();
        for frame in [
            r#"{"type":"text","content":"x"}"#,
            r#"{"type":"thinking"}"#,
            r#"{"type":"tool_use_start","tool_use_id":"t","tool":"Read"}"#,
            r#"{"type":"interrupted","message":"x"}"#,
        ] {
            assert!(matches!(
                t.apply(&ServerEvent::parse(frame).unwrap(), now()),
                Err(ProtocolViolation::NoTurnInProgress { .. })
            ));
        }
        assert!(t.messages().is_empty());
        assert!(t.tools().is_empty());
    }

    #[test]
    fn resume_started_opens_turn_once() {
        let mut t = Transcript::new();
        let started = ServerEvent::ResumeStarted {
            sdk_session_id: Some("sdk".into()),
        };
        let updates = t.apply(&started, now()).unwrap();
        assert!(matches!(updates[0], TranscriptUpdate::MessageAdded { .. }));
        assert!(t.is_turn_open());
        assert_eq!(t.user_turns(), 0);

        assert!(t.apply(&started, now()).unwrap().is_empty());
        assert_eq!(t.messages().len(), 1);
    }

    #[test]
    fn resume_failed_fails_open_turn() {
        let mut t = Transcript::new();
        t.apply(&ServerEvent::ResumeStarted { sdk_session_id: None }, now())
            .unwrap();
        t.apply(
            &ServerEvent::ResumeFailed {
                error: "timeout".into(),
            },
            now(),
        )
        .unwrap();
        assert_eq!(t.messages()[0].status, MessageStatus::Failed);
        assert!(!t.is_turn_open());
    }

    #[test]
    fn user_question_cleared_on_answer_or_turn_end() {
        let mut t = open();
        let frame = r#"{"type":"user_question","tool_use_id":"q1","questions":[{"question":"Proceed?","header":"","options":[],"multiSelect":false}]}"#;
        t.apply(&ServerEvent::parse(frame).unwrap(), now()).unwrap();
        assert_eq!(t.pending_question().unwrap().tool_use_id, "q1");
        assert!(t.take_question("other").is_none());
        assert!(t.take_question("q1").is_some());
        assert!(t.pending_question().is_none());

        t.apply(&ServerEvent::parse(frame).unwrap(), now()).unwrap();
        let updates = t
            .apply(&ServerEvent::Interrupted { message: String::new() }, now())
            .unwrap();
        assert!(updates.contains(&TranscriptUpdate::QuestionCleared));
        assert_eq!(
            t.messages().last().unwrap().notice.as_deref(),
            Some(DEFAULT_INTERRUPT_NOTICE)
        );
    }

    #[test]
    fn user_question_without_turn_is_rejected() {
        let mut t = Transcript::new();
        let frame = r#"{"type":"user_question","tool_use_id":"q1","questions":[{"question":"Proceed?","header":"","options":[],"multiSelect":false}]}"#;
        let err = t
            .apply(&ServerEvent::parse(frame).unwrap(), now())
            .unwrap_err();
        assert_eq!(
            err,
            ProtocolViolation::NoTurnInProgress {
                event: "user_question"
            }
        );
        assert!(t.pending_question().is_none());
    }

    #[test]
    fn history_seeds_tool_tracker() {
        let mut assistant = Message::new(
            MessageRole::Assistant,
            vec![
                ContentBlock::ToolUse {
                    id: "h1".into(),
                    name: "Read".into(),
                    input: json!({}),
                },
                ContentBlock::ToolResult {
                    tool_use_id: "h1".into(),
                    content: "boom".into(),
                    is_error: true,
                },
                ContentBlock::ToolUse {
                    id: "h2".into(),
                    name: "Bash".into(),
                    input: json!({}),
                },
            ],
        );
        assistant.status = MessageStatus::Complete;
        let t = Transcript::from_history(vec![Message::user("hi"), assistant]);

        assert_eq!(t.messages().len(), 2);
        assert!(!t.is_turn_open());
        assert_eq!(t.tools().status("h1"), Some(ToolStatus::Error));
        assert_eq!(t.tools().status("h2"), Some(ToolStatus::Pending));
    }

    #[test]
    fn reduce_returns_unchanged_state_on_violation() {
        let state = Transcript::new();
        let (state, outcome) = reduce(state, &text("orphan"), now());
        assert!(outcome.is_err());
        assert!(state.messages().is_empty());

        let mut state = state;
        state.begin_turn("q", now()).unwrap();
        let (state, outcome) = reduce(state, &text("a"), now());
        assert!(outcome.is_ok());
        assert_eq!(state.in_progress().unwrap().text(), "a");
    }
}
