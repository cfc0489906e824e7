//! Connection lifecycle for one session at a time.
//!
//! The manager owns a background task per open channel. That task is the
//! only place that reads from or writes to the connection, and it forwards
//! inbound frames one at a time, in arrival order, over a bounded queue.

use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;

use super::backoff::ReconnectPolicy;
use super::transport::{Connection, Connector};
use crate::error::ChannelError;
use crate::protocol::ClientEvent;

/// Inbound queue depth. A slow consumer applies backpressure to the socket.
const EVENT_BUFFER: usize = 256;

/// Connection status signal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionStatus {
    Connecting,
    Connected,
    Disconnected,
    Error,
}

impl ConnectionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Connecting => "connecting",
            Self::Connected => "connected",
            Self::Disconnected => "disconnected",
            Self::Error => "error",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// What the channel delivers, in order.
#[derive(Debug)]
pub enum ChannelEvent {
    /// One inbound text frame.
    Frame(String),
    /// The connection dropped and was re-established. Frames after this
    /// belong to the new connection.
    Reconnected,
    /// The channel is finished. `Some` when reconnecting gave up.
    Closed(Option<ChannelError>),
}

struct Outbound {
    frame: String,
    ack: oneshot::Sender<Result<(), ChannelError>>,
}

/// Cloneable write half of an open channel.
#[derive(Clone)]
pub struct ChannelSender {
    outbound: mpsc::UnboundedSender<Outbound>,
    status: watch::Receiver<ConnectionStatus>,
}

impl ChannelSender {
    /// Send one event. Fails with [`ChannelError::NotConnected`] while the
    /// connection is down; nothing is queued for later.
    pub async fn send(&self, event: &ClientEvent) -> Result<(), ChannelError> {
        if *self.status.borrow() != ConnectionStatus::Connected {
            return Err(ChannelError::NotConnected);
        }
        let frame = event.to_frame()?;
        let (ack, done) = oneshot::channel();
        self.outbound
            .send(Outbound { frame, ack })
            .map_err(|_| ChannelError::Closed)?;
        done.await.map_err(|_| ChannelError::NotConnected)?
    }

    pub fn status(&self) -> ConnectionStatus {
        *self.status.borrow()
    }
}

/// Read half and status of an open channel, handed to the session's owner.
pub struct ChannelHandle {
    pub session_id: String,
    pub sender: ChannelSender,
    pub events: mpsc::Receiver<ChannelEvent>,
    pub status: watch::Receiver<ConnectionStatus>,
}

struct ActiveChannel {
    session_id: String,
    shutdown: oneshot::Sender<()>,
    task: JoinHandle<()>,
}

/// Keeps at most one connection open.
pub struct ChannelManager {
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    active: Option<ActiveChannel>,
}

impl ChannelManager {
    pub fn new(connector: Arc<dyn Connector>, policy: ReconnectPolicy) -> Self {
        Self {
            connector,
            policy,
            active: None,
        }
    }

    /// Session id of the open channel, if any.
    pub fn active_session(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.session_id.as_str())
    }

    /// Open a channel for `session_id`, closing any channel already open.
    ///
    /// A failure on this first attempt is returned immediately and is not
    /// retried.
    pub async fn open(&mut self, session_id: &str) -> Result<ChannelHandle, ChannelError> {
        if let Some(previous) = self.active_session() {
            tracing::info!(previous, next = session_id, "closing previous channel");
        }
        self.close().await;

        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Connecting);
        let conn = match self.connector.connect(session_id).await {
            Ok(conn) => conn,
            Err(e) => {
                tracing::warn!(session_id, error = %e, "initial connection failed");
                let _ = status_tx.send(ConnectionStatus::Error);
                return Err(e);
            }
        };
        let _ = status_tx.send(ConnectionStatus::Connected);
        tracing::info!(session_id, "channel connected");

        let (outbound_tx, outbound_rx) = mpsc::unbounded_channel();
        let (events_tx, events_rx) = mpsc::channel(EVENT_BUFFER);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();

        let task = tokio::spawn(
            ChannelTask {
                session_id: session_id.to_string(),
                connector: Arc::clone(&self.connector),
                policy: self.policy.clone(),
                outbound: outbound_rx,
                events: events_tx,
                status: status_tx,
                shutdown: shutdown_rx,
            }
            .run(conn),
        );

        self.active = Some(ActiveChannel {
            session_id: session_id.to_string(),
            shutdown: shutdown_tx,
            task,
        });

        Ok(ChannelHandle {
            session_id: session_id.to_string(),
            sender: ChannelSender {
                outbound: outbound_tx,
                status: status_rx.clone(),
            },
            events: events_rx,
            status: status_rx,
        })
    }

    /// Close the open channel, if any, and wait for its task to finish.
    pub async fn close(&mut self) {
        let Some(active) = self.active.take() else {
            return;
        };
        let _ = active.shutdown.send(());
        if let Err(e) = active.task.await {
            tracing::warn!(session_id = %active.session_id, error = %e, "channel task failed");
        }
    }
}

impl Drop for ChannelManager {
    fn drop(&mut self) {
        if let Some(active) = self.active.take() {
            let _ = active.shutdown.send(());
        }
    }
}

/// Why the connected loop stopped.
enum Stop {
    Shutdown,
    Dropped(String),
}

struct ChannelTask {
    session_id: String,
    connector: Arc<dyn Connector>,
    policy: ReconnectPolicy,
    outbound: mpsc::UnboundedReceiver<Outbound>,
    events: mpsc::Sender<ChannelEvent>,
    status: watch::Sender<ConnectionStatus>,
    shutdown: oneshot::Receiver<()>,
}

impl ChannelTask {
    async fn run(mut self, mut conn: Box<dyn Connection>) {
        loop {
            match self.pump(conn.as_mut()).await {
                Stop::Shutdown => {
                    conn.close().await;
                    let _ = self.status.send(ConnectionStatus::Disconnected);
                    // The owner may be waiting on `close`; never block here.
                    let _ = self.events.try_send(ChannelEvent::Closed(None));
                    tracing::info!(session_id = %self.session_id, "channel closed");
                    return;
                }
                Stop::Dropped(reason) => {
                    tracing::warn!(session_id = %self.session_id, %reason, "connection dropped");
                    let _ = self.status.send(ConnectionStatus::Disconnected);
                }
            }

            match self.reconnect().await {
                Ok(Some(next)) => {
                    conn = next;
                    let _ = self.status.send(ConnectionStatus::Connected);
                    if self.events.send(ChannelEvent::Reconnected).await.is_err() {
                        conn.close().await;
                        return;
                    }
                }
                Ok(None) => {
                    let _ = self.status.send(ConnectionStatus::Disconnected);
                    return;
                }
                Err(e) => {
                    tracing::error!(session_id = %self.session_id, error = %e, "channel failed");
                    let _ = self.status.send(ConnectionStatus::Error);
                    let _ = self.events.send(ChannelEvent::Closed(Some(e))).await;
                    return;
                }
            }
        }
    }

    /// Shuttle frames until the connection drops or the channel is shut
    /// down.
    async fn pump(&mut self, conn: &mut dyn Connection) -> Stop {
        loop {
            tokio::select! {
                _ = &mut self.shutdown => return Stop::Shutdown,
                inbound = conn.recv() => match inbound {
                    Some(Ok(frame)) => {
                        tracing::trace!(session_id = %self.session_id, %frame, "frame received");
                        tokio::select! {
                            sent = self.events.send(ChannelEvent::Frame(frame)) => {
                                if sent.is_err() {
                                    return Stop::Shutdown;
                                }
                            }
                            _ = &mut self.shutdown => return Stop::Shutdown,
                        }
                    }
                    Some(Err(e)) => return Stop::Dropped(e.to_string()),
                    None => return Stop::Dropped("closed by server".into()),
                },
                outbound = self.outbound.recv() => {
                    let Some(Outbound { frame, ack }) = outbound else {
                        return Stop::Shutdown;
                    };
                    let result = conn.send(frame).await;
                    let failed = result.as_ref().err().map(ToString::to_string);
                    let _ = ack.send(result);
                    if let Some(reason) = failed {
                        return Stop::Dropped(reason);
                    }
                }
            }
        }
    }

    /// Retry with backoff. `Ok(None)` means the channel was shut down while
    /// waiting.
    async fn reconnect(&mut self) -> Result<Option<Box<dyn Connection>>, ChannelError> {
        let mut attempt = 0;
        while self.policy.allows(attempt) {
            let delay = self.policy.delay_for(attempt);
            tracing::info!(
                session_id = %self.session_id,
                attempt = attempt + 1,
                delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                "reconnecting"
            );
            if !self.wait(delay).await {
                return Ok(None);
            }

            let _ = self.status.send(ConnectionStatus::Connecting);
            match self.connector.connect(&self.session_id).await {
                Ok(conn) => {
                    tracing::info!(session_id = %self.session_id, attempt = attempt + 1, "reconnected");
                    return Ok(Some(conn));
                }
                Err(e) => {
                    tracing::warn!(session_id = %self.session_id, attempt = attempt + 1, error = %e, "reconnect failed");
                    let _ = self.status.send(ConnectionStatus::Disconnected);
                }
            }
            attempt += 1;
        }

        Err(ChannelError::RetriesExhausted {
            session_id: self.session_id.clone(),
            attempts: attempt,
        })
    }

    /// Sleep for `delay`, refusing sends meanwhile. Returns `false` on
    /// shutdown.
    async fn wait(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);
        loop {
            tokio::select! {
                () = &mut sleep => return true,
                _ = &mut self.shutdown => return false,
                outbound = self.outbound.recv() => match outbound {
                    Some(Outbound { ack, .. }) => {
                        let _ = ack.send(Err(ChannelError::NotConnected));
                    }
                    None => return false,
                },
            }
        }
    }
}
