//! `weaver chat`: send one message and stream the reply.

use std::collections::BTreeMap;
use std::io::Write;
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_stream::wrappers::errors::BroadcastStreamRecvError;
use tokio_stream::wrappers::BroadcastStream;
use tokio_stream::StreamExt;

use weaver::api::HistorySource;
use weaver::assembler::{PendingQuestion, TranscriptUpdate, TurnOutcome};
use weaver::cache::refresh_session;
use weaver::channel::ChannelManager;
use weaver::draft::DraftAutosave;
use weaver::models::{Message, MessageRole};
use weaver::{Config, EngineUpdate, SessionEngine};

pub async fn run(config: &Config, session_id: &str, words: Vec<String>) -> Result<()> {
    let drafts = config.drafts().context("Failed to locate drafts directory")?;
    let mut message = words.join(" ");
    if message.is_empty() {
        message = drafts
            .load(session_id)
            .context("Failed to read draft")?
            .unwrap_or_default();
        if message.trim().is_empty() {
            bail!("Message is required (no saved draft for {session_id})");
        }
        eprintln!("Sending saved draft.");
    }

    let autosave = DraftAutosave::spawn(session_id, Arc::new(drafts), config.draft_debounce);
    autosave.edit(message.clone());

    let cache_file = config.cache_file().context("Failed to locate session cache")?;
    let mut store = cache_file
        .load(config.cache_expiry)
        .context("Failed to load session cache")?;

    let api = config.api();
    match refresh_session(&api, &mut store, session_id).await {
        Ok(Some(session)) => eprintln!("Session: {}", session.display_name()),
        Ok(None) => {
            cache_file.save(&store).context("Failed to save session cache")?;
            autosave.shutdown().await;
            bail!("Session {session_id} not found");
        }
        Err(e) => tracing::warn!(session_id, error = %e, "could not refresh session"),
    }
    store.set_current(Some(session_id));

    let history: Arc<dyn HistorySource> = Arc::new(api);
    let manager = ChannelManager::new(Arc::new(config.connector()), config.reconnect.clone());
    let (engine, updates) =
        SessionEngine::start(session_id, manager, Some(history), config.engine_options())
            .await
            .with_context(|| format!("Failed to open session {session_id}"))?;

    if let Err(e) = engine.send(message).await {
        autosave.shutdown().await;
        let _ = engine.shutdown().await;
        return Err(e).context("Failed to send message");
    }
    autosave.edit("");
    autosave.shutdown().await;

    stream_turn(&engine, updates).await?;

    let transcript = engine.shutdown().await.context("Session engine stopped")?;
    if let Err(e) = store.store_transcript(session_id, transcript.messages().to_vec()) {
        tracing::warn!(session_id, error = %e, "transcript not cached");
    }
    cache_file.save(&store).context("Failed to save session cache")?;

    if let Some(last) = transcript.messages().last() {
        print_summary(last);
    }
    Ok(())
}

/// Print the assistant reply as it streams until the turn ends.
async fn stream_turn(
    engine: &SessionEngine,
    updates: tokio::sync::broadcast::Receiver<EngineUpdate>,
) -> Result<()> {
    let mut updates = BroadcastStream::new(updates);
    let mut printer = Printer::default();
    let mut interrupted = false;

    loop {
        let update = tokio::select! {
            update = updates.next() => update,
            _ = tokio::signal::ctrl_c() => {
                if interrupted {
                    eprintln!("\nExiting without waiting for the server.");
                    return Ok(());
                }
                interrupted = true;
                if engine.interrupt().await? {
                    eprintln!("\nInterrupting... (Ctrl-C again to quit)");
                }
                continue;
            }
        };

        let update = match update {
            Some(Ok(update)) => update,
            Some(Err(BroadcastStreamRecvError::Lagged(n))) => {
                tracing::warn!(skipped = n, "display fell behind");
                continue;
            }
            None => return Ok(()),
        };

        match update {
            EngineUpdate::Transcript(TranscriptUpdate::MessageUpdated { message_id }) => {
                let transcript = engine.snapshot().await?;
                if let Some(message) = transcript.message(&message_id) {
                    printer.show(message);
                }
            }
            EngineUpdate::Transcript(TranscriptUpdate::ToolStatusChanged {
                tool_use_id,
                status,
            }) => {
                let transcript = engine.snapshot().await?;
                let name = transcript
                    .tools()
                    .get(&tool_use_id)
                    .map_or("tool", |t| t.name.as_str());
                printer.break_line();
                eprintln!("[{name}: {status}]");
            }
            EngineUpdate::Transcript(TranscriptUpdate::HistoryLoaded { .. }) => {
                let transcript = engine.snapshot().await?;
                if let Some(message) = transcript
                    .messages()
                    .iter()
                    .rev()
                    .find(|m| m.role == MessageRole::Assistant)
                {
                    printer.show(message);
                }
                if !transcript.is_turn_open() {
                    printer.break_line();
                    return Ok(());
                }
            }
            EngineUpdate::Transcript(TranscriptUpdate::QuestionPending { .. }) => {
                let transcript = engine.snapshot().await?;
                if let Some(question) = transcript.pending_question().cloned() {
                    printer.break_line();
                    let answers = ask(&question).await?;
                    engine.answer(question.tool_use_id, answers).await?;
                }
            }
            EngineUpdate::Transcript(TranscriptUpdate::Error(e)) => {
                printer.break_line();
                eprintln!("Error: {e}");
            }
            EngineUpdate::Transcript(TranscriptUpdate::TurnFinished { message_id, outcome }) => {
                let transcript = engine.snapshot().await?;
                if let Some(message) = transcript.message(&message_id) {
                    printer.show(message);
                    printer.break_line();
                    if outcome == TurnOutcome::Interrupted {
                        eprintln!("[{}]", message.notice.as_deref().unwrap_or("Interrupted"));
                    }
                }
                return Ok(());
            }
            EngineUpdate::Transcript(TranscriptUpdate::SessionNotFound) => {
                bail!("Session no longer exists on the server");
            }
            EngineUpdate::InterruptTimeout(timeout) => {
                printer.break_line();
                eprintln!("Warning: {timeout}");
            }
            EngineUpdate::ChannelFailed(reason) => {
                printer.break_line();
                bail!("Connection lost: {reason}");
            }
            EngineUpdate::Connection(status) => tracing::debug!(%status, "connection status"),
            EngineUpdate::Stopped => return Ok(()),
            EngineUpdate::Transcript(_) => {}
        }
    }
}

/// Writes only the text a message gained since it was last shown.
#[derive(Default)]
struct Printer {
    message_id: Option<String>,
    shown: String,
}

impl Printer {
    fn show(&mut self, message: &Message) {
        if message.role != MessageRole::Assistant {
            return;
        }
        if self.message_id.as_deref() != Some(message.id.as_str()) {
            self.break_line();
            self.message_id = Some(message.id.clone());
            self.shown.clear();
        }

        let text = message.text();
        let fresh = match text.strip_prefix(self.shown.as_str()) {
            Some(rest) => rest.to_string(),
            None => {
                // Replaced by server history; show it again in full.
                self.break_line();
                text.clone()
            }
        };
        if !fresh.is_empty() {
            print!("{fresh}");
            let _ = std::io::stdout().flush();
        }
        self.shown = text;
    }

    fn break_line(&mut self) {
        if !self.shown.is_empty() && !self.shown.ends_with('\n') {
            println!();
            self.shown.push('\n');
        }
    }
}

/// Prompt on stderr and read one answer per question from stdin. A number
/// picks an option; anything else is sent as typed.
async fn ask(pending: &PendingQuestion) -> Result<BTreeMap<String, String>> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut answers = BTreeMap::new();

    for (idx, question) in pending.questions.iter().enumerate() {
        eprintln!("? {}", question.question);
        for (n, option) in question.options.iter().enumerate() {
            if option.description.is_empty() {
                eprintln!("  {}. {}", n + 1, option.label);
            } else {
                eprintln!("  {}. {} - {}", n + 1, option.label, option.description);
            }
        }
        eprint!("> ");

        let line = lines
            .next_line()
            .await
            .context("Failed to read answer")?
            .unwrap_or_default();
        let line = line.trim();
        let answer = line
            .parse::<usize>()
            .ok()
            .and_then(|n| n.checked_sub(1))
            .and_then(|n| question.options.get(n))
            .map_or_else(|| line.to_string(), |option| option.label.clone());
        answers.insert(idx.to_string(), answer);
    }
    Ok(answers)
}

fn print_summary(message: &Message) {
    if let Some(usage) = message.usage {
        eprintln!(
            "Tokens: {} in / {} out",
            usage.input_tokens, usage.output_tokens
        );
    }
    if let Some(cost) = message.cost_usd {
        eprintln!("Cost: ${cost:.4}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use weaver::models::ContentBlock;

    fn assistant(text: &str) -> Message {
        Message::new(MessageRole::Assistant, vec![ContentBlock::text(text)])
    }

    #[test]
    fn printer_tracks_growth() {
        let mut printer = Printer::default();
        let mut message = assistant("Hel");
        printer.show(&message);
        message.content = vec![ContentBlock::text("Hello")];
        printer.show(&message);
        assert_eq!(printer.shown, "Hello");
    }

    #[test]
    fn printer_ignores_user_messages() {
        let mut printer = Printer::default();
        printer.show(&Message::user("hi"));
        assert!(printer.message_id.is_none());
    }

    #[test]
    fn printer_restarts_on_replaced_text() {
        let mut printer = Printer::default();
        let mut message = assistant("partial answ");
        printer.show(&message);
        message.content = vec![ContentBlock::text("full answer")];
        printer.show(&message);
        assert_eq!(printer.shown, "full answer");
    }
}
