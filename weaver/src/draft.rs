//! Unsent message drafts, saved with a debounce.
//!
//! Edits are written 500 ms after the last one by default. Whatever is
//! still pending when the autosave is shut down or dropped is written
//! immediately, so the last keystrokes are never lost.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

use crate::error::CacheError;

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);

/// Where drafts end up.
pub trait DraftSink: Send + Sync {
    /// Persist `text` for `session_id`. Empty text removes the draft.
    fn save(&self, session_id: &str, text: &str) -> Result<(), CacheError>;
}

/// One text file per session under a drafts directory.
#[derive(Debug, Clone)]
pub struct FileDraftSink {
    dir: PathBuf,
}

impl FileDraftSink {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    fn path(&self, session_id: &str) -> PathBuf {
        self.dir
            .join(format!("{}.txt", urlencoding::encode(session_id)))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// The saved draft, if there is one.
    pub fn load(&self, session_id: &str) -> Result<Option<String>, CacheError> {
        let path = self.path(session_id);
        match std::fs::read_to_string(&path) {
            Ok(text) => Ok(Some(text)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(io_error(&path, source)),
        }
    }
}

fn io_error(path: &Path, source: std::io::Error) -> CacheError {
    CacheError::Io {
        path: path.display().to_string(),
        source,
    }
}

impl DraftSink for FileDraftSink {
    fn save(&self, session_id: &str, text: &str) -> Result<(), CacheError> {
        let path = self.path(session_id);
        if text.is_empty() {
            return match std::fs::remove_file(&path) {
                Err(e) if e.kind() != std::io::ErrorKind::NotFound => Err(io_error(&path, e)),
                _ => Ok(()),
            };
        }
        std::fs::create_dir_all(&self.dir).map_err(|e| io_error(&self.dir, e))?;
        std::fs::write(&path, text).map_err(|e| io_error(&path, e))
    }
}

enum DraftCommand {
    Edit(String),
    Flush(oneshot::Sender<()>),
}

/// Debounced draft writer for one session.
pub struct DraftAutosave {
    tx: mpsc::UnboundedSender<DraftCommand>,
    task: JoinHandle<()>,
}

impl DraftAutosave {
    pub fn spawn(session_id: impl Into<String>, sink: Arc<dyn DraftSink>, debounce: Duration) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(run(session_id.into(), sink, debounce, rx));
        Self { tx, task }
    }

    /// Record the latest draft text.
    pub fn edit(&self, text: impl Into<String>) {
        let _ = self.tx.send(DraftCommand::Edit(text.into()));
    }

    /// Write any pending edit now.
    pub async fn flush(&self) {
        let (ack, done) = oneshot::channel();
        if self.tx.send(DraftCommand::Flush(ack)).is_ok() {
            let _ = done.await;
        }
    }

    /// Write any pending edit and stop.
    pub async fn shutdown(self) {
        let Self { tx, task } = self;
        drop(tx);
        if let Err(e) = task.await {
            tracing::warn!(error = %e, "draft autosave task failed");
        }
    }
}

async fn run(
    session_id: String,
    sink: Arc<dyn DraftSink>,
    debounce: Duration,
    mut rx: mpsc::UnboundedReceiver<DraftCommand>,
) {
    let mut pending: Option<String> = None;
    let mut deadline: Option<Instant> = None;

    loop {
        tokio::select! {
            cmd = rx.recv() => match cmd {
                Some(DraftCommand::Edit(text)) => {
                    pending = Some(text);
                    deadline = Some(Instant::now() + debounce);
                }
                Some(DraftCommand::Flush(ack)) => {
                    write(&session_id, sink.as_ref(), &mut pending);
                    deadline = None;
                    let _ = ack.send(());
                }
                None => {
                    write(&session_id, sink.as_ref(), &mut pending);
                    return;
                }
            },
            () = tokio::time::sleep_until(deadline.unwrap_or_else(Instant::now)), if deadline.is_some() => {
                write(&session_id, sink.as_ref(), &mut pending);
                deadline = None;
            }
        }
    }
}

fn write(session_id: &str, sink: &dyn DraftSink, pending: &mut Option<String>) {
    let Some(text) = pending.take() else {
        return;
    };
    match sink.save(session_id, &text) {
        Ok(()) => tracing::debug!(session_id, len = text.len(), "draft saved"),
        Err(e) => tracing::warn!(session_id, error = %e, "failed to save draft"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    #[derive(Default)]
    struct RecordingSink {
        saves: Mutex<Vec<String>>,
    }

    impl RecordingSink {
        fn saves(&self) -> Vec<String> {
            self.saves.lock().unwrap().clone()
        }
    }

    impl DraftSink for RecordingSink {
        fn save(&self, _session_id: &str, text: &str) -> Result<(), CacheError> {
            self.saves.lock().unwrap().push(text.to_string());
            Ok(())
        }
    }

    fn spawn() -> (Arc<RecordingSink>, DraftAutosave) {
        let sink = Arc::new(RecordingSink::default());
        let autosave = DraftAutosave::spawn("s1", sink.clone(), DEFAULT_DEBOUNCE);
        (sink, autosave)
    }

    #[tokio::test(start_paused = true)]
    async fn edits_within_debounce_coalesce() {
        let (sink, autosave) = spawn();
        autosave.edit("h");
        tokio::time::sleep(Duration::from_millis(200)).await;
        autosave.edit("he");
        tokio::time::sleep(Duration::from_millis(200)).await;
        autosave.edit("hey");
        tokio::time::sleep(Duration::from_millis(400)).await;
        assert!(sink.saves().is_empty());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert_eq!(sink.saves(), ["hey"]);
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_flushes_without_waiting() {
        let (sink, autosave) = spawn();
        let start = Instant::now();
        autosave.edit("last keystrokes");
        autosave.shutdown().await;

        assert_eq!(sink.saves(), ["last keystrokes"]);
        assert!(start.elapsed() < DEFAULT_DEBOUNCE);
    }

    #[tokio::test(start_paused = true)]
    async fn drop_still_flushes() {
        let (sink, autosave) = spawn();
        autosave.edit("unsaved");
        drop(autosave);
        tokio::time::sleep(Duration::from_millis(1)).await;
        assert_eq!(sink.saves(), ["unsaved"]);
    }

    #[tokio::test(start_paused = true)]
    async fn nothing_pending_writes_nothing() {
        let (sink, autosave) = spawn();
        autosave.edit("x");
        autosave.flush().await;
        autosave.shutdown().await;
        assert_eq!(sink.saves(), ["x"]);
    }

    #[test]
    fn file_sink_saves_loads_and_clears() {
        let dir = TempDir::new().unwrap();
        let sink = FileDraftSink::new(dir.path().join("drafts"));

        assert!(sink.load("a/b").unwrap().is_none());
        sink.save("a/b", "draft text").unwrap();
        assert_eq!(sink.load("a/b").unwrap().as_deref(), Some("draft text"));

        sink.save("a/b", "").unwrap();
        assert!(sink.load("a/b").unwrap().is_none());
        sink.save("a/b", "").unwrap();
    }
}
