//! In-memory transport for exercising the channel and engine without a
//! socket.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tokio::sync::mpsc;

use super::transport::{Connection, Connector};
use crate::error::ChannelError;

/// Server end of one in-memory connection.
pub struct MemoryPeer {
    pub session_id: String,
    to_client: mpsc::UnboundedSender<String>,
    from_client: mpsc::UnboundedReceiver<String>,
}

impl MemoryPeer {
    /// Push a frame to the client.
    pub fn push(&self, frame: impl Into<String>) {
        let _ = self.to_client.send(frame.into());
    }

    /// Next frame the client sent.
    pub async fn next_sent(&mut self) -> Option<String> {
        self.from_client.recv().await
    }

    /// Drain whatever the client has sent so far.
    pub fn drain_sent(&mut self) -> Vec<String> {
        let mut frames = Vec::new();
        while let Ok(frame) = self.from_client.try_recv() {
            frames.push(frame);
        }
        frames
    }
}

/// Connector that hands each accepted connection's peer to the test.
pub struct MemoryConnector {
    /// Scripted outcomes for upcoming attempts; empty means accept.
    script: Mutex<VecDeque<bool>>,
    peers: mpsc::UnboundedSender<MemoryPeer>,
    attempts: AtomicU32,
}

impl MemoryConnector {
    pub fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<MemoryPeer>) {
        let (peers, rx) = mpsc::unbounded_channel();
        let connector = Arc::new(Self {
            script: Mutex::new(VecDeque::new()),
            peers,
            attempts: AtomicU32::new(0),
        });
        (connector, rx)
    }

    /// Make the next `n` connection attempts fail.
    pub fn fail_next(&self, n: usize) {
        let mut script = self.script.lock().unwrap();
        script.extend(std::iter::repeat_n(false, n));
    }

    pub fn attempts(&self) -> u32 {
        self.attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, session_id: &str) -> Result<Box<dyn Connection>, ChannelError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let accept = self.script.lock().unwrap().pop_front().unwrap_or(true);
        if !accept {
            return Err(ChannelError::Connect {
                session_id: session_id.to_string(),
                reason: "refused".into(),
            });
        }

        let (to_client, inbound) = mpsc::unbounded_channel();
        let (outbound, from_client) = mpsc::unbounded_channel();
        let _ = self.peers.send(MemoryPeer {
            session_id: session_id.to_string(),
            to_client,
            from_client,
        });
        Ok(Box::new(MemoryConnection { inbound, outbound }))
    }
}

struct MemoryConnection {
    inbound: mpsc::UnboundedReceiver<String>,
    outbound: mpsc::UnboundedSender<String>,
}

#[async_trait]
impl Connection for MemoryConnection {
    async fn send(&mut self, frame: String) -> Result<(), ChannelError> {
        self.outbound
            .send(frame)
            .map_err(|_| ChannelError::Send("peer dropped".into()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        self.inbound.recv().await.map(Ok)
    }

    async fn close(&mut self) {
        self.inbound.close();
    }
}
