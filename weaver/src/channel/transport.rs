//! Transport seam between the channel manager and the network.

use std::sync::Arc;

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::header::AUTHORIZATION;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

use crate::auth::{bearer, TokenSource};
use crate::error::ChannelError;

/// One open duplex connection carrying text frames.
#[async_trait]
pub trait Connection: Send {
    async fn send(&mut self, frame: String) -> Result<(), ChannelError>;

    /// Next inbound text frame. `None` once the peer has closed.
    ///
    /// Must be cancel safe: the manager polls it inside `select!`.
    async fn recv(&mut self) -> Option<Result<String, ChannelError>>;

    async fn close(&mut self);
}

/// Opens connections to a session's chat endpoint.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, session_id: &str) -> Result<Box<dyn Connection>, ChannelError>;
}

/// Chat endpoint for `session_id` under `ws_base`.
pub fn chat_url(ws_base: &str, session_id: &str) -> String {
    format!(
        "{}/ws/chat/{}",
        ws_base.trim_end_matches('/'),
        urlencoding::encode(session_id)
    )
}

/// WebSocket connector backed by `tokio-tungstenite`.
#[derive(Clone)]
pub struct WsConnector {
    ws_base: String,
    tokens: Option<Arc<dyn TokenSource>>,
}

impl WsConnector {
    pub fn new(ws_base: impl Into<String>, tokens: Option<Arc<dyn TokenSource>>) -> Self {
        Self {
            ws_base: ws_base.into(),
            tokens,
        }
    }
}

#[async_trait]
impl Connector for WsConnector {
    async fn connect(&self, session_id: &str) -> Result<Box<dyn Connection>, ChannelError> {
        let url = chat_url(&self.ws_base, session_id);
        let connect_err = |reason: String| ChannelError::Connect {
            session_id: session_id.to_string(),
            reason,
        };

        let mut request = url
            .as_str()
            .into_client_request()
            .map_err(|e| connect_err(e.to_string()))?;
        if let Some(auth) = bearer(self.tokens.as_ref()) {
            let value = HeaderValue::from_str(&auth).map_err(|e| connect_err(e.to_string()))?;
            request.headers_mut().insert(AUTHORIZATION, value);
        }

        tracing::debug!(%url, "opening websocket");
        let (stream, _) = connect_async(request)
            .await
            .map_err(|e| connect_err(e.to_string()))?;
        Ok(Box::new(WsConnection { stream }))
    }
}

struct WsConnection {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl Connection for WsConnection {
    async fn send(&mut self, frame: String) -> Result<(), ChannelError> {
        self.stream
            .send(Message::Text(frame.into()))
            .await
            .map_err(|e| ChannelError::Send(e.to_string()))
    }

    async fn recv(&mut self) -> Option<Result<String, ChannelError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Close(_)) => return None,
                // Control frames are answered by tungstenite itself.
                Ok(_) => {}
                Err(e) => return Some(Err(ChannelError::Receive(e.to_string()))),
            }
        }
    }

    async fn close(&mut self) {
        let _ = self.stream.close(None).await;
    }
}
