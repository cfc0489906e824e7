//! Session model representing one conversation with the assistant.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Lifecycle status of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SessionStatus {
    /// Session accepts new turns.
    #[serde(alias = "idle", alias = "processing")]
    Active,
    /// Session timed out on the server.
    Expired,
    /// Session was closed.
    #[serde(alias = "closed")]
    Terminated,
}

impl SessionStatus {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Expired => "expired",
            Self::Terminated => "terminated",
        }
    }
}

impl std::fmt::Display for SessionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Session metadata as served by the session API.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Session {
    /// Unique session identifier.
    pub id: String,
    /// Project this session belongs to.
    pub project_id: String,
    /// Display name.
    #[serde(default)]
    pub name: Option<String>,
    /// Lifecycle status.
    pub status: SessionStatus,
    #[serde(with = "timestamp")]
    pub created_at: DateTime<Utc>,
    #[serde(with = "timestamp")]
    pub updated_at: DateTime<Utc>,
    #[serde(default, with = "timestamp::option")]
    pub last_activity_at: Option<DateTime<Utc>>,
    #[serde(default, with = "timestamp::option")]
    pub expires_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub message_count: u32,
    /// Selected model.
    #[serde(default)]
    pub model: String,
    /// Server-side workspace directory.
    #[serde(default)]
    pub workspace_path: Option<String>,
    #[serde(default)]
    pub total_tokens: Option<u64>,
    #[serde(default)]
    pub total_cost_usd: Option<f64>,
}

impl Session {
    /// Create a session locally, before the server has confirmed it.
    pub fn new(id: String, project_id: String) -> Self {
        let now = Utc::now();
        Self {
            id,
            project_id,
            name: None,
            status: SessionStatus::Active,
            created_at: now,
            updated_at: now,
            last_activity_at: None,
            expires_at: None,
            message_count: 0,
            model: String::new(),
            workspace_path: None,
            total_tokens: None,
            total_cost_usd: None,
        }
    }

    /// Name to show in listings.
    pub fn display_name(&self) -> &str {
        self.name.as_deref().unwrap_or(&self.id)
    }
}

/// Timestamps from the server may be RFC 3339 or naive ISO-8601 without an
/// offset. Naive values are UTC.
mod timestamp {
    use chrono::{DateTime, NaiveDateTime, Utc};
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn parse(raw: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(raw)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| {
                NaiveDateTime::parse_from_str(raw, "%Y-%m-%dT%H:%M:%S%.f")
                    .ok()
                    .map(|naive| naive.and_utc())
            })
    }

    pub fn serialize<S: Serializer>(value: &DateTime<Utc>, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&value.to_rfc3339())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<DateTime<Utc>, D::Error> {
        let raw = String::deserialize(d)?;
        parse(&raw).ok_or_else(|| serde::de::Error::custom(format!("invalid timestamp `{raw}`")))
    }

    pub mod option {
        use chrono::{DateTime, Utc};
        use serde::{Deserialize, Deserializer, Serializer};

        pub fn serialize<S: Serializer>(
            value: &Option<DateTime<Utc>>,
            s: S,
        ) -> Result<S::Ok, S::Error> {
            match value {
                Some(dt) => s.serialize_str(&dt.to_rfc3339()),
                None => s.serialize_none(),
            }
        }

        pub fn deserialize<'de, D: Deserializer<'de>>(
            d: D,
        ) -> Result<Option<DateTime<Utc>>, D::Error> {
            match Option::<String>::deserialize(d)? {
                Some(raw) => super::parse(&raw).map(Some).ok_or_else(|| {
                    serde::de::Error::custom(format!("invalid timestamp `{raw}`"))
                }),
                None => Ok(None),
            }
        }
    }
}

pub(crate) use timestamp::parse as parse_timestamp;
