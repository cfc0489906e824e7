//! Tool execution tracker.
//!
//! One state machine per `tool_use_id`. Transitions only move forward; any
//! event that would move an execution backward, restart it, or touch an id
//! that was never started is rejected and the tracked state is left as is.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde_json::Value;

use crate::error::ProtocolViolation;
use crate::models::{ToolExecution, ToolStatus};

/// Tracks every tool execution seen during a session's lifetime.
#[derive(Debug, Default, Clone)]
pub struct ToolExecutionTracker {
    executions: HashMap<String, ToolExecution>,
    /// Start order of `tool_use_id`s.
    order: Vec<String>,
}

impl ToolExecutionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a new execution in `Pending`.
    ///
    /// A second start for the same id is rejected; the first is retained.
    pub fn start(
        &mut self,
        tool_use_id: &str,
        name: &str,
        input: Value,
        now: DateTime<Utc>,
    ) -> Result<&ToolExecution, ProtocolViolation> {
        if self.executions.contains_key(tool_use_id) {
            return Err(ProtocolViolation::DuplicateToolUse(tool_use_id.to_string()));
        }

        let execution =
            ToolExecution::new(tool_use_id.to_string(), name.to_string(), input, now);
        self.order.push(tool_use_id.to_string());
        Ok(&*self
            .executions
            .entry(tool_use_id.to_string())
            .or_insert(execution))
    }

    /// Move an execution to `Executing`, refreshing its input when the
    /// server sent a non-empty one.
    pub fn mark_executing(
        &mut self,
        tool_use_id: &str,
        input: Option<Value>,
    ) -> Result<&ToolExecution, ProtocolViolation> {
        let execution = self.advance(tool_use_id, ToolStatus::Executing)?;
        if let Some(input) = input.filter(|v| !v.is_null()) {
            execution.input = input;
        }
        Ok(&*execution)
    }

    /// Move an execution to its terminal state.
    pub fn finish(
        &mut self,
        tool_use_id: &str,
        success: bool,
        output: String,
        now: DateTime<Utc>,
    ) -> Result<&ToolExecution, ProtocolViolation> {
        let next = if success {
            ToolStatus::Success
        } else {
            ToolStatus::Error
        };
        let execution = self.advance(tool_use_id, next)?;
        if success {
            execution.output = Some(output);
        } else {
            execution.error = Some(output);
        }
        execution.ended_at = Some(now);
        Ok(&*execution)
    }

    fn advance(
        &mut self,
        tool_use_id: &str,
        next: ToolStatus,
    ) -> Result<&mut ToolExecution, ProtocolViolation> {
        let execution = self
            .executions
            .get_mut(tool_use_id)
            .ok_or_else(|| ProtocolViolation::UnknownToolUse(tool_use_id.to_string()))?;

        if !execution.status.can_advance_to(next) {
            return Err(ProtocolViolation::BackwardTransition {
                tool_use_id: tool_use_id.to_string(),
                from: execution.status,
                to: next,
            });
        }

        execution.status = next;
        Ok(execution)
    }

    pub fn get(&self, tool_use_id: &str) -> Option<&ToolExecution> {
        self.executions.get(tool_use_id)
    }

    pub fn status(&self, tool_use_id: &str) -> Option<ToolStatus> {
        self.executions.get(tool_use_id).map(|e| e.status)
    }

    pub fn contains(&self, tool_use_id: &str) -> bool {
        self.executions.contains_key(tool_use_id)
    }

    /// Executions in the order they were started.
    pub fn iter(&self) -> impl Iterator<Item = &ToolExecution> {
        self.order.iter().filter_map(|id| self.executions.get(id))
    }

    /// Executions that have not reached a terminal state.
    pub fn in_flight(&self) -> impl Iterator<Item = &ToolExecution> {
        self.iter().filter(|e| !e.status.is_terminal())
    }

    pub fn len(&self) -> usize {
        self.executions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.executions.is_empty()
    }

    /// Forget every execution. Only used when the whole transcript is
    /// replaced.
    pub fn clear(&mut self) {
        self.executions.clear();
        self.order.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn now() -> DateTime<Utc> {
        Utc::now()
    }

    #[test]
    fn new_is_empty() {
        let tracker = ToolExecutionTracker::new();
        assert!(tracker.is_empty());
        assert_eq!(tracker.len(), 0);
    }

    #[test]
    fn full_lifecycle_to_success() {
        let mut tracker = ToolExecutionTracker::new();
        tracker.start("t1", "Grep", json!({"pattern": "fn"}), now()).unwrap();
        assert_eq!(tracker.status("t1"), Some(ToolStatus::Pending));

        tracker.mark_executing("t1", None).unwrap();
        assert_eq!(tracker.status("t1"), Some(ToolStatus::Executing));

        let done = tracker.finish("t1", true, "3 matches".into(), now()).unwrap();
        assert_eq!(done.status, ToolStatus::Success);
        assert_eq!(done.output.as_deref(), Some("3 matches"));
        assert!(done.ended_at.is_some());
        assert_eq!(tracker.in_flight().count(), 0);
    }

    #[test]
    fn failed_result_records_error_text() {
        let mut tracker = ToolExecutionTracker::new();
        tracker.start("t1", "Bash", json!({}), now()).unwrap();
        let done = tracker.finish("t1", false, "exit 1".into(), now()).unwrap();
        assert_eq!(done.status, ToolStatus::Error);
        assert_eq!(done.error.as_deref(), Some("exit 1"));
        assert!(done.output.is_none());
    }

    #[test]
    fn duplicate_start_keeps_first() {
        let mut tracker = ToolExecutionTracker::new();
        tracker.start("t1", "Read", json!({"path": "a"}), now()).unwrap();
        tracker.mark_executing("t1", None).unwrap();

        let err = tracker.start("t1", "Write", json!({}), now()).unwrap_err();
        assert_eq!(err, ProtocolViolation::DuplicateToolUse("t1".into()));

        let kept = tracker.get("t1").unwrap();
        assert_eq!(kept.name, "Read");
        assert_eq!(kept.status, ToolStatus::Executing);
        assert_eq!(tracker.len(), 1);
    }

    #[test]
    fn executing_after_terminal_is_ignored() {
        let mut tracker = ToolExecutionTracker::new();
        tracker.start("t1", "Read", json!({}), now()).unwrap();
        tracker.finish("t1", true, "ok".into(), now()).unwrap();

        let err = tracker.mark_executing("t1", None).unwrap_err();
        assert!(matches!(
            err,
            ProtocolViolation::BackwardTransition {
                from: ToolStatus::Success,
                to: ToolStatus::Executing,
                ..
            }
        ));
        assert_eq!(tracker.status("t1"), Some(ToolStatus::Success));
    }

    #[test]
    fn second_result_is_ignored() {
        let mut tracker = ToolExecutionTracker::new();
        tracker.start("t1", "Read", json!({}), now()).unwrap();
        tracker.finish("t1", true, "first".into(), now()).unwrap();

        assert!(tracker.finish("t1", false, "second".into(), now()).is_err());
        let kept = tracker.get("t1").unwrap();
        assert_eq!(kept.status, ToolStatus::Success);
        assert_eq!(kept.output.as_deref(), Some("first"));
        assert!(kept.error.is_none());
    }

    #[test]
    fn unknown_ids_are_rejected() {
        let mut tracker = ToolExecutionTracker::new();
        assert_eq!(
            tracker.mark_executing("nope", None).unwrap_err(),
            ProtocolViolation::UnknownToolUse("nope".into())
        );
        assert!(tracker.finish("nope", true, String::new(), now()).is_err());
        assert!(tracker.is_empty());
    }

    #[test]
    fn executing_refreshes_input() {
        let mut tracker = ToolExecutionTracker::new();
        tracker.start("t1", "Edit", json!({}), now()).unwrap();
        tracker
            .mark_executing("t1", Some(json!({"file": "main.rs"})))
            .unwrap();
        assert_eq!(tracker.get("t1").unwrap().input["file"], "main.rs");
    }

    #[test]
    fn iter_follows_start_order() {
        let mut tracker = ToolExecutionTracker::new();
        for id in ["c", "a", "b"] {
            tracker.start(id, "Glob", json!({}), now()).unwrap();
        }
        tracker.finish("a", true, String::new(), now()).unwrap();

        let ids: Vec<_> = tracker.iter().map(|e| e.tool_use_id.as_str()).collect();
        assert_eq!(ids, ["c", "a", "b"]);
        let in_flight: Vec<_> = tracker.in_flight().map(|e| e.tool_use_id.as_str()).collect();
        assert_eq!(in_flight, ["c", "b"]);
    }

    #[test]
    fn observed_statuses_are_monotonic() {
        // Throw a noisy event sequence at one id and record every status seen.
        let mut tracker = ToolExecutionTracker::new();
        let mut seen = Vec::new();
        tracker.start("t1", "Bash", json!({}), now()).unwrap();
        seen.push(tracker.status("t1").unwrap());

        let _ = tracker.mark_executing("t1", None);
        seen.push(tracker.status("t1").unwrap());
        let _ = tracker.mark_executing("t1", None);
        seen.push(tracker.status("t1").unwrap());
        let _ = tracker.finish("t1", false, "x".into(), now());
        seen.push(tracker.status("t1").unwrap());
        let _ = tracker.mark_executing("t1", None);
        let _ = tracker.finish("t1", true, "y".into(), now());
        seen.push(tracker.status("t1").unwrap());

        seen.dedup();
        assert_eq!(
            seen,
            [ToolStatus::Pending, ToolStatus::Executing, ToolStatus::Error]
        );
    }
}
