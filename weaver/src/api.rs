//! HTTP client for the session API.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::auth::{bearer, TokenSource};
use crate::error::ApiError;
use crate::models::{parse_timestamp, ContentBlock, Message, MessageRole, Session};

/// Where a session's authoritative history comes from.
#[async_trait]
pub trait HistorySource: Send + Sync {
    async fn history(&self, session_id: &str) -> Result<Vec<Message>, ApiError>;
}

/// A message as the session API stores it.
#[derive(Debug, Clone, Deserialize)]
pub struct ApiMessage {
    pub id: String,
    #[serde(default)]
    pub session_id: String,
    pub role: String,
    /// A JSON array of content blocks, or plain text.
    #[serde(default)]
    pub content: String,
    #[serde(default)]
    pub tokens: Option<u64>,
    pub created_at: String,
}

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    messages: Vec<ApiMessage>,
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Deserialize)]
struct SessionsResponse {
    sessions: Vec<Session>,
}

#[derive(Debug, Serialize)]
struct SessionBody<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    name: Option<&'a str>,
}

impl ApiMessage {
    /// Convert to a committed transcript message. Unknown roles are read as
    /// `system`; unparseable timestamps fall back to now.
    pub fn into_message(self) -> Message {
        let role = MessageRole::parse(&self.role).unwrap_or(MessageRole::System);
        let mut message = Message::new(role, parse_content(&self.content));
        message.id = self.id;
        message.timestamp = parse_timestamp(&self.created_at).unwrap_or_else(Utc::now);
        message
    }
}

/// Decode stored message content into blocks.
///
/// A JSON array is read block by block, skipping unknown block types.
/// Anything else is a single text block.
pub fn parse_content(raw: &str) -> Vec<ContentBlock> {
    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Array(items)) => items.iter().filter_map(block_from_value).collect(),
        _ if raw.is_empty() => Vec::new(),
        _ => vec![ContentBlock::text(raw)],
    }
}

fn block_from_value(value: &Value) -> Option<ContentBlock> {
    let str_field = |key: &str| value.get(key).and_then(Value::as_str);
    match str_field("type")? {
        "text" => Some(ContentBlock::text(str_field("text")?)),
        "thinking" => Some(ContentBlock::Thinking {
            content: str_field("thinking")
                .or_else(|| str_field("content"))
                .unwrap_or_default()
                .to_string(),
        }),
        "tool_use" => Some(ContentBlock::ToolUse {
            id: str_field("id")?.to_string(),
            name: str_field("name")?.to_string(),
            input: value.get("input").cloned().unwrap_or_else(|| json!({})),
        }),
        "tool_result" => Some(ContentBlock::ToolResult {
            tool_use_id: str_field("tool_use_id")?.to_string(),
            content: flatten_result(value.get("content")),
            is_error: value
                .get("is_error")
                .and_then(Value::as_bool)
                .unwrap_or(false),
        }),
        _ => None,
    }
}

/// Tool result content may be a string or a list of text parts.
fn flatten_result(content: Option<&Value>) -> String {
    match content {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(Value::Array(parts)) => parts
            .iter()
            .map(|part| match part.get("text").and_then(Value::as_str) {
                Some(text) => text.to_string(),
                None => part.to_string(),
            })
            .collect::<Vec<_>>()
            .join("\n"),
        Some(other) => other.to_string(),
    }
}

/// Client for the session endpoints.
#[derive(Clone)]
pub struct SessionApi {
    client: reqwest::Client,
    base_url: String,
    tokens: Option<Arc<dyn TokenSource>>,
}

impl SessionApi {
    pub fn new(base_url: impl Into<String>, tokens: Option<Arc<dyn TokenSource>>) -> Self {
        let base_url: String = base_url.into();
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.trim_end_matches('/').to_string(),
            tokens,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{path}", self.base_url)
    }

    fn authorize(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match bearer(self.tokens.as_ref()) {
            Some(auth) => request.header(reqwest::header::AUTHORIZATION, auth),
            None => request,
        }
    }

    /// Send and check the status. 404 becomes [`ApiError::NotFound`] naming
    /// `subject`.
    async fn execute(
        &self,
        request: reqwest::RequestBuilder,
        url: &str,
        subject: &str,
    ) -> Result<reqwest::Response, ApiError> {
        let resp = self
            .authorize(request)
            .send()
            .await
            .map_err(|source| ApiError::Request {
                url: url.to_string(),
                source,
            })?;

        let status = resp.status();
        if status == reqwest::StatusCode::NOT_FOUND {
            return Err(ApiError::NotFound(subject.to_string()));
        }
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(ApiError::Status {
                url: url.to_string(),
                status: status.as_u16(),
                body,
            });
        }
        Ok(resp)
    }

    async fn decode<T: serde::de::DeserializeOwned>(
        resp: reqwest::Response,
        url: &str,
    ) -> Result<T, ApiError> {
        resp.json().await.map_err(|source| ApiError::Request {
            url: url.to_string(),
            source,
        })
    }

    /// `GET /api/projects/{project}/sessions`
    pub async fn list_sessions(&self, project_id: &str) -> Result<Vec<Session>, ApiError> {
        let url = self.url(&format!(
            "/api/projects/{}/sessions",
            urlencoding::encode(project_id)
        ));
        let resp = self.execute(self.client.get(&url), &url, project_id).await?;
        let body: SessionsResponse = Self::decode(resp, &url).await?;
        tracing::debug!(project_id, count = body.sessions.len(), "listed sessions");
        Ok(body.sessions)
    }

    /// `POST /api/projects/{project}/sessions`
    pub async fn create_session(
        &self,
        project_id: &str,
        name: Option<&str>,
    ) -> Result<Session, ApiError> {
        let url = self.url(&format!(
            "/api/projects/{}/sessions",
            urlencoding::encode(project_id)
        ));
        let request = self.client.post(&url).json(&SessionBody { name });
        let resp = self.execute(request, &url, project_id).await?;
        let session: Session = Self::decode(resp, &url).await?;
        tracing::info!(session_id = %session.id, project_id, "created session");
        Ok(session)
    }

    /// `GET /api/sessions/{id}`
    pub async fn get_session(&self, session_id: &str) -> Result<Session, ApiError> {
        let url = self.session_url(session_id, "");
        let resp = self.execute(self.client.get(&url), &url, session_id).await?;
        Self::decode(resp, &url).await
    }

    /// `PUT /api/sessions/{id}` with a new name.
    pub async fn rename_session(&self, session_id: &str, name: &str) -> Result<Session, ApiError> {
        let url = self.session_url(session_id, "");
        let request = self.client.put(&url).json(&SessionBody { name: Some(name) });
        let resp = self.execute(request, &url, session_id).await?;
        Self::decode(resp, &url).await
    }

    /// `DELETE /api/sessions/{id}`
    pub async fn delete_session(&self, session_id: &str) -> Result<(), ApiError> {
        let url = self.session_url(session_id, "");
        self.execute(self.client.delete(&url), &url, session_id)
            .await?;
        tracing::info!(session_id, "deleted session");
        Ok(())
    }

    /// `GET /api/sessions/{id}/messages`
    pub async fn messages(&self, session_id: &str) -> Result<Vec<Message>, ApiError> {
        let url = self.session_url(session_id, "/messages");
        let resp = self.execute(self.client.get(&url), &url, session_id).await?;
        let body: MessagesResponse = Self::decode(resp, &url).await?;
        tracing::debug!(
            session_id,
            count = body.messages.len(),
            total = body.total,
            "fetched history"
        );
        Ok(body
            .messages
            .into_iter()
            .map(ApiMessage::into_message)
            .collect())
    }

    fn session_url(&self, session_id: &str, suffix: &str) -> String {
        self.url(&format!(
            "/api/sessions/{}{suffix}",
            urlencoding::encode(session_id)
        ))
    }
}

#[async_trait]
impl HistorySource for SessionApi {
    async fn history(&self, session_id: &str) -> Result<Vec<Message>, ApiError> {
        self.messages(session_id).await
    }
}
