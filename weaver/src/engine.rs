//! Per-session engine.
//!
//! One actor task owns the transcript, the tool tracker and the interrupt
//! controller for a session. Channel events and user commands are handled
//! one at a time on that task, so session state has a single writer.
//! Observers get a broadcast of [`EngineUpdate`]s.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::api::HistorySource;
use crate::assembler::{Transcript, TranscriptUpdate};
use crate::channel::{ChannelEvent, ChannelHandle, ChannelManager, ConnectionStatus};
use crate::error::{ApiError, ChannelError, EngineError, InterruptTimeout, TurnError};
use crate::interrupt::{InterruptController, DEFAULT_INTERRUPT_TIMEOUT};
use crate::protocol::{ClientEvent, FileAttachment, ServerEvent};

const COMMAND_BUFFER: usize = 32;
const UPDATE_BUFFER: usize = 1024;

/// What observers of a session see.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineUpdate {
    Transcript(TranscriptUpdate),
    Connection(ConnectionStatus),
    /// An interrupt went unacknowledged. The turn keeps streaming.
    InterruptTimeout(InterruptTimeout),
    /// The channel gave up; the session needs to be reopened.
    ChannelFailed(String),
    Stopped,
}

#[derive(Debug, Clone)]
pub struct EngineOptions {
    pub interrupt_timeout: Duration,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            interrupt_timeout: DEFAULT_INTERRUPT_TIMEOUT,
        }
    }
}

enum Command {
    Send {
        content: String,
        files: Option<Vec<FileAttachment>>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Interrupt {
        reply: oneshot::Sender<bool>,
    },
    Answer {
        tool_use_id: String,
        answers: BTreeMap<String, String>,
        reply: oneshot::Sender<Result<(), EngineError>>,
    },
    Snapshot {
        reply: oneshot::Sender<Transcript>,
    },
}

/// Handle to a running session engine.
pub struct SessionEngine {
    session_id: String,
    commands: mpsc::Sender<Command>,
    updates: broadcast::Sender<EngineUpdate>,
    task: JoinHandle<Transcript>,
}

impl SessionEngine {
    /// Load history, open the channel and start the actor.
    ///
    /// The returned receiver is subscribed before anything is processed,
    /// so it sees every update.
    pub async fn start(
        session_id: &str,
        mut manager: ChannelManager,
        history: Option<Arc<dyn HistorySource>>,
        options: EngineOptions,
    ) -> Result<(Self, broadcast::Receiver<EngineUpdate>), EngineError> {
        let mut transcript = Transcript::new();
        if let Some(source) = &history {
            match source.history(session_id).await {
                Ok(messages) => {
                    tracing::info!(session_id, messages = messages.len(), "loaded history");
                    let _ = transcript.load_history(messages);
                }
                Err(ApiError::NotFound(_)) => {
                    return Err(EngineError::SessionNotFound(session_id.to_string()));
                }
                Err(e) => tracing::warn!(session_id, error = %e, "could not load history"),
            }
        }

        let channel = manager.open(session_id).await?;
        let (commands, commands_rx) = mpsc::channel(COMMAND_BUFFER);
        let (updates, updates_rx) = broadcast::channel(UPDATE_BUFFER);

        let actor = EngineActor {
            session_id: session_id.to_string(),
            manager,
            channel,
            channel_open: true,
            status_open: true,
            history,
            transcript,
            interrupts: InterruptController::new(options.interrupt_timeout),
            updates: updates.clone(),
            commands: commands_rx,
            refetch_after_turn: false,
            turns_started: 0,
            state_request: None,
        };
        let task = tokio::spawn(actor.run());

        Ok((
            Self {
                session_id: session_id.to_string(),
                commands,
                updates,
                task,
            },
            updates_rx,
        ))
    }

    pub fn session_id(&self) -> &str {
        &self.session_id
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineUpdate> {
        self.updates.subscribe()
    }

    async fn request<T>(
        &self,
        build: impl FnOnce(oneshot::Sender<T>) -> Command,
    ) -> Result<T, EngineError> {
        let (reply, rx) = oneshot::channel();
        self.commands
            .send(build(reply))
            .await
            .map_err(|_| EngineError::Stopped)?;
        rx.await.map_err(|_| EngineError::Stopped)
    }

    /// Start a new turn with `content`.
    pub async fn send(&self, content: impl Into<String>) -> Result<(), EngineError> {
        self.send_with_files(content, None).await
    }

    pub async fn send_with_files(
        &self,
        content: impl Into<String>,
        files: Option<Vec<FileAttachment>>,
    ) -> Result<(), EngineError> {
        let content = content.into();
        self.request(|reply| Command::Send {
            content,
            files,
            reply,
        })
        .await?
    }

    /// Ask the server to stop the current turn. Returns whether a request
    /// was sent; `false` when idle or already pending.
    pub async fn interrupt(&self) -> Result<bool, EngineError> {
        self.request(|reply| Command::Interrupt { reply }).await
    }

    /// Answer a pending question.
    pub async fn answer(
        &self,
        tool_use_id: impl Into<String>,
        answers: BTreeMap<String, String>,
    ) -> Result<(), EngineError> {
        let tool_use_id = tool_use_id.into();
        self.request(|reply| Command::Answer {
            tool_use_id,
            answers,
            reply,
        })
        .await?
    }

    /// A copy of the current transcript.
    pub async fn snapshot(&self) -> Result<Transcript, EngineError> {
        self.request(|reply| Command::Snapshot { reply }).await
    }

    /// Close the channel, stop the actor and return the final transcript.
    pub async fn shutdown(self) -> Result<Transcript, EngineError> {
        let Self { commands, task, .. } = self;
        drop(commands);
        task.await.map_err(|e| {
            tracing::error!(error = %e, "session engine task failed");
            EngineError::Stopped
        })
    }
}

struct EngineActor {
    session_id: String,
    manager: ChannelManager,
    channel: ChannelHandle,
    channel_open: bool,
    status_open: bool,
    history: Option<Arc<dyn HistorySource>>,
    transcript: Transcript,
    interrupts: InterruptController,
    updates: broadcast::Sender<EngineUpdate>,
    commands: mpsc::Receiver<Command>,
    /// Chunks were lost while disconnected; re-fetch once the turn ends.
    refetch_after_turn: bool,
    turns_started: u64,
    /// `turns_started` when the outstanding `get_state` was sent.
    state_request: Option<u64>,
}

impl EngineActor {
    async fn run(mut self) -> Transcript {
        self.request_state().await;

        loop {
            let deadline = self.interrupts.deadline();
            tokio::select! {
                cmd = self.commands.recv() => match cmd {
                    Some(cmd) => self.on_command(cmd).await,
                    None => break,
                },
                event = self.channel.events.recv(), if self.channel_open => match event {
                    Some(event) => self.on_channel_event(event).await,
                    None => self.on_channel_closed(None),
                },
                changed = self.channel.status.changed(), if self.channel_open && self.status_open => {
                    if changed.is_ok() {
                        let status = *self.channel.status.borrow_and_update();
                        self.publish(EngineUpdate::Connection(status));
                    } else {
                        self.status_open = false;
                    }
                },
                () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                    if let Some(timeout) = self.interrupts.check_timeout(Instant::now()) {
                        tracing::warn!(session_id = %self.session_id, message_id = %timeout.message_id, "interrupt not acknowledged");
                        self.publish(EngineUpdate::InterruptTimeout(timeout));
                    }
                }
            }
        }

        self.manager.close().await;
        tracing::info!(session_id = %self.session_id, "session engine stopped");
        self.publish(EngineUpdate::Stopped);
        self.transcript
    }

    fn publish(&self, update: EngineUpdate) {
        let _ = self.updates.send(update);
    }

    async fn send(&self, event: &ClientEvent) -> Result<(), ChannelError> {
        let result = self.channel.sender.send(event).await;
        match &result {
            Ok(()) => tracing::debug!(session_id = %self.session_id, event = event.type_label(), "sent"),
            Err(e) => tracing::warn!(session_id = %self.session_id, event = event.type_label(), error = %e, "send failed"),
        }
        result
    }

    async fn request_state(&mut self) {
        if self.send(&ClientEvent::GetState).await.is_ok() {
            self.state_request = Some(self.turns_started);
        }
    }

    async fn on_command(&mut self, cmd: Command) {
        match cmd {
            Command::Send {
                content,
                files,
                reply,
            } => {
                let _ = reply.send(self.begin_turn(content, files).await);
            }
            Command::Interrupt { reply } => {
                let sent = match self.interrupts.request(&mut self.transcript, Instant::now()) {
                    Some(event) => {
                        if let Some(message) = self.transcript.in_progress() {
                            self.publish(EngineUpdate::Transcript(TranscriptUpdate::MessageUpdated {
                                message_id: message.id.clone(),
                            }));
                        }
                        if let Err(e) = self.send(&event).await {
                            if let Some(timeout) = self.interrupts.report_unsent() {
                                tracing::warn!(
                                    session_id = %self.session_id,
                                    message_id = %timeout.message_id,
                                    error = %e,
                                    "interrupt not delivered"
                                );
                                self.publish(EngineUpdate::InterruptTimeout(timeout));
                            }
                        }
                        true
                    }
                    None => false,
                };
                let _ = reply.send(sent);
            }
            Command::Answer {
                tool_use_id,
                answers,
                reply,
            } => {
                let _ = reply.send(self.answer(tool_use_id, answers).await);
            }
            Command::Snapshot { reply } => {
                let _ = reply.send(self.transcript.clone());
            }
        }
    }

    async fn begin_turn(
        &mut self,
        content: String,
        files: Option<Vec<FileAttachment>>,
    ) -> Result<(), EngineError> {
        if self.transcript.is_turn_open() {
            return Err(TurnError::TurnInProgress.into());
        }
        self.send(&ClientEvent::Chat {
            content: content.clone(),
            files,
        })
        .await?;

        let updates = self.transcript.begin_turn(&content, Utc::now())?;
        self.turns_started += 1;
        tracing::info!(session_id = %self.session_id, "turn started");
        self.apply_updates(updates).await;
        Ok(())
    }

    async fn answer(
        &mut self,
        tool_use_id: String,
        answers: BTreeMap<String, String>,
    ) -> Result<(), EngineError> {
        if self
            .transcript
            .pending_question()
            .is_none_or(|q| q.tool_use_id != tool_use_id)
        {
            return Err(EngineError::NoPendingQuestion(tool_use_id));
        }
        self.send(&ClientEvent::QuestionAnswer {
            tool_use_id: tool_use_id.clone(),
            answers,
        })
        .await?;
        if self.transcript.take_question(&tool_use_id).is_some() {
            self.publish(EngineUpdate::Transcript(TranscriptUpdate::QuestionCleared));
        }
        Ok(())
    }

    async fn on_channel_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::Frame(frame) => self.on_frame(&frame).await,
            ChannelEvent::Reconnected => {
                tracing::info!(session_id = %self.session_id, turn_open = self.transcript.is_turn_open(), "reconciling after reconnect");
                if self.transcript.is_turn_open() {
                    self.refetch_after_turn = true;
                }
                self.request_state().await;
            }
            ChannelEvent::Closed(error) => self.on_channel_closed(error),
        }
    }

    fn on_channel_closed(&mut self, error: Option<ChannelError>) {
        self.channel_open = false;
        if let Some(e) = &error {
            tracing::error!(session_id = %self.session_id, error = %e, "channel failed");
        }
        if self.transcript.is_turn_open() {
            let updates = self.transcript.fail_turn(TurnError::ConnectionLost);
            self.interrupts.on_turn_finished();
            for update in updates {
                self.publish(EngineUpdate::Transcript(update));
            }
        }
        let status = *self.channel.status.borrow_and_update();
        self.publish(EngineUpdate::Connection(status));
        if let Some(e) = error {
            self.publish(EngineUpdate::ChannelFailed(e.to_string()));
        }
    }

    async fn on_frame(&mut self, frame: &str) {
        let event = match ServerEvent::parse(frame) {
            Ok(event) => event,
            Err(violation) => {
                tracing::warn!(session_id = %self.session_id, %violation, "dropped frame");
                return;
            }
        };
        tracing::debug!(session_id = %self.session_id, event = event.type_label(), "received");

        match &event {
            ServerEvent::Ping { timestamp } => {
                let _ = self
                    .send(&ClientEvent::Pong {
                        timestamp: *timestamp,
                    })
                    .await;
                return;
            }
            ServerEvent::State { is_processing, .. } => {
                self.reconcile(*is_processing).await;
                return;
            }
            ServerEvent::Connected { .. } => {
                tracing::info!(session_id = %self.session_id, "server acknowledged connection");
                return;
            }
            _ => {}
        }

        match self.transcript.apply(&event, Utc::now()) {
            Ok(updates) => self.apply_updates(updates).await,
            Err(violation) => {
                tracing::warn!(
                    session_id = %self.session_id,
                    event = event.type_label(),
                    %violation,
                    "dropped server event"
                );
            }
        }
    }

    /// Act on the server's answer to `get_state`.
    async fn reconcile(&mut self, is_processing: bool) {
        let Some(turns_at_request) = self.state_request.take() else {
            tracing::debug!(session_id = %self.session_id, "ignoring unsolicited state");
            return;
        };
        if turns_at_request != self.turns_started {
            // A turn began after the request; the answer predates it.
            return;
        }

        match (self.transcript.is_turn_open(), is_processing) {
            (true, false) => {
                tracing::info!(session_id = %self.session_id, "turn finished while disconnected");
                if !self.refetch().await {
                    self.refetch_after_turn = false;
                    let updates = self.transcript.fail_turn(TurnError::ConnectionLost);
                    self.apply_updates(updates).await;
                }
            }
            (false, true) => {
                tracing::info!(session_id = %self.session_id, "server is mid-turn; resuming");
                let _ = self.send(&ClientEvent::Resume).await;
            }
            (true, true) | (false, false) => {}
        }
    }

    /// Replace the transcript with server history. Returns `false` when
    /// there is no history source or the fetch failed.
    async fn refetch(&mut self) -> bool {
        let Some(source) = self.history.clone() else {
            return false;
        };
        match source.history(&self.session_id).await {
            Ok(messages) => {
                let updates = self.transcript.load_history(messages);
                self.refetch_after_turn = false;
                self.interrupts.on_turn_finished();
                for update in updates {
                    self.publish(EngineUpdate::Transcript(update));
                }
                true
            }
            Err(e) => {
                tracing::warn!(session_id = %self.session_id, error = %e, "history re-fetch failed");
                false
            }
        }
    }

    async fn apply_updates(&mut self, updates: Vec<TranscriptUpdate>) {
        let mut turn_finished = false;
        let mut session_gone = false;
        for update in updates {
            match &update {
                TranscriptUpdate::TurnFinished { outcome, .. } => {
                    tracing::info!(session_id = %self.session_id, %outcome, "turn finished");
                    self.interrupts.on_turn_finished();
                    turn_finished = true;
                }
                TranscriptUpdate::Error(e) => {
                    tracing::warn!(session_id = %self.session_id, error = %e, "turn error");
                }
                TranscriptUpdate::SessionNotFound => session_gone = true,
                _ => {}
            }
            self.publish(EngineUpdate::Transcript(update));
        }

        if turn_finished && self.refetch_after_turn {
            self.refetch().await;
        }
        if session_gone {
            tracing::warn!(session_id = %self.session_id, "session not found; closing channel");
            self.manager.close().await;
            self.on_channel_closed(None);
        }
    }
}
