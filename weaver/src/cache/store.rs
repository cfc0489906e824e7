//! Session cache: the sessions list, per-session freshness stamps, the
//! current-session pointer and saved transcripts.

use std::collections::BTreeMap;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};

use crate::error::CacheError;
use crate::models::{Message, Session};

/// Default age after which a cached session is stale.
pub const DEFAULT_EXPIRY: TimeDelta = TimeDelta::days(7);

/// Everything the cache persists.
///
/// The sessions list and the stamp map are only ever changed together,
/// inside one `&mut` call on [`SessionCacheStore`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CacheState {
    #[serde(default)]
    pub sessions: Vec<Session>,
    #[serde(default)]
    pub current_session_id: Option<String>,
    #[serde(default)]
    pub cached_at: BTreeMap<String, DateTime<Utc>>,
    #[serde(default)]
    pub transcripts: BTreeMap<String, Vec<Message>>,
}

#[derive(Debug, Clone)]
pub struct SessionCacheStore {
    state: CacheState,
    expiry: TimeDelta,
}

impl Default for SessionCacheStore {
    fn default() -> Self {
        Self::new(DEFAULT_EXPIRY)
    }
}

impl SessionCacheStore {
    pub fn new(expiry: TimeDelta) -> Self {
        Self {
            state: CacheState::default(),
            expiry,
        }
    }

    /// Adopt persisted state, repairing it first.
    pub fn from_state(state: CacheState, expiry: TimeDelta) -> Self {
        let mut store = Self { state, expiry };
        for problem in store.repair() {
            tracing::warn!(%problem, "repaired session cache");
        }
        store
    }

    pub const fn state(&self) -> &CacheState {
        &self.state
    }

    pub const fn expiry(&self) -> TimeDelta {
        self.expiry
    }

    /// Merge `sessions` into the cache.
    ///
    /// Known ids get their data replaced but keep their stamp. New ids are
    /// appended and stamped with `now`.
    pub fn upsert(&mut self, sessions: Vec<Session>) {
        self.upsert_at(sessions, Utc::now());
    }

    pub fn upsert_at(&mut self, sessions: Vec<Session>, now: DateTime<Utc>) {
        for session in sessions {
            if let Some(existing) = self.state.sessions.iter_mut().find(|s| s.id == session.id) {
                *existing = session;
            } else {
                self.state.cached_at.entry(session.id.clone()).or_insert(now);
                self.state.sessions.push(session);
            }
        }
    }

    /// Optimistically add a session the user just created and make it
    /// current.
    pub fn add(&mut self, session: Session) {
        self.add_at(session, Utc::now());
    }

    pub fn add_at(&mut self, session: Session, now: DateTime<Utc>) {
        self.state.sessions.retain(|s| s.id != session.id);
        self.state.cached_at.insert(session.id.clone(), now);
        self.state.current_session_id = Some(session.id.clone());
        self.state.sessions.insert(0, session);
    }

    /// The session, unless it is missing or stale.
    pub fn get(&self, id: &str) -> Option<&Session> {
        self.get_at(id, Utc::now())
    }

    pub fn get_at(&self, id: &str, now: DateTime<Utc>) -> Option<&Session> {
        if !self.is_fresh(id, now) {
            return None;
        }
        self.state.sessions.iter().find(|s| s.id == id)
    }

    pub fn is_cached(&self, id: &str) -> bool {
        self.is_cached_at(id, Utc::now())
    }

    pub fn is_cached_at(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.get_at(id, now).is_some()
    }

    fn is_fresh(&self, id: &str, now: DateTime<Utc>) -> bool {
        self.state
            .cached_at
            .get(id)
            .is_some_and(|stamp| now.signed_duration_since(*stamp) < self.expiry)
    }

    /// Sessions in list order, stale ones included.
    pub fn sessions(&self) -> &[Session] {
        &self.state.sessions
    }

    pub fn cached_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.state.cached_at.get(id).copied()
    }

    /// Remove a session with its stamp and transcript.
    pub fn remove(&mut self, id: &str) -> Option<Session> {
        let idx = self.state.sessions.iter().position(|s| s.id == id)?;
        let session = self.state.sessions.remove(idx);
        self.forget_ids(&[id.to_string()]);
        Some(session)
    }

    /// Rename a cached session.
    pub fn rename(&mut self, id: &str, name: impl Into<String>) -> bool {
        match self.state.sessions.iter_mut().find(|s| s.id == id) {
            Some(session) => {
                session.name = Some(name.into());
                true
            }
            None => false,
        }
    }

    /// Refresh a session's stamp after a successful re-fetch.
    pub fn touch(&mut self, id: &str) -> bool {
        self.touch_at(id, Utc::now())
    }

    pub fn touch_at(&mut self, id: &str, now: DateTime<Utc>) -> bool {
        if !self.state.sessions.iter().any(|s| s.id == id) {
            return false;
        }
        self.state.cached_at.insert(id.to_string(), now);
        true
    }

    /// Drop every stale session. Returns the removed ids.
    pub fn sweep_expired(&mut self) -> Vec<String> {
        self.sweep_expired_at(Utc::now())
    }

    pub fn sweep_expired_at(&mut self, now: DateTime<Utc>) -> Vec<String> {
        let stale: Vec<String> = self
            .state
            .sessions
            .iter()
            .filter(|s| !self.is_fresh(&s.id, now))
            .map(|s| s.id.clone())
            .collect();
        if stale.is_empty() {
            return stale;
        }

        self.state.sessions.retain(|s| !stale.contains(&s.id));
        self.forget_ids(&stale);
        tracing::info!(removed = stale.len(), "swept expired sessions");
        stale
    }

    fn forget_ids(&mut self, ids: &[String]) {
        for id in ids {
            self.state.cached_at.remove(id);
            self.state.transcripts.remove(id);
        }
        if self
            .state
            .current_session_id
            .as_ref()
            .is_some_and(|current| ids.contains(current))
        {
            self.state.current_session_id = None;
        }
    }

    pub fn set_current(&mut self, id: Option<&str>) {
        self.state.current_session_id = id.map(str::to_string);
    }

    pub fn current(&self) -> Option<&str> {
        self.state.current_session_id.as_deref()
    }

    /// Save a transcript for a cached session.
    pub fn store_transcript(&mut self, id: &str, messages: Vec<Message>) -> Result<(), CacheError> {
        if !self.state.sessions.iter().any(|s| s.id == id) {
            return Err(CacheError::Integrity(format!(
                "transcript for uncached session {id}"
            )));
        }
        self.state.transcripts.insert(id.to_string(), messages);
        Ok(())
    }

    /// Saved transcript, unless the session is missing or stale.
    pub fn transcript(&self, id: &str) -> Option<&[Message]> {
        self.transcript_at(id, Utc::now())
    }

    pub fn transcript_at(&self, id: &str, now: DateTime<Utc>) -> Option<&[Message]> {
        if !self.is_fresh(id, now) {
            return None;
        }
        self.state.transcripts.get(id).map(Vec::as_slice)
    }

    pub fn clear(&mut self) {
        self.state = CacheState::default();
    }

    /// Bring the sessions list and the side maps back into agreement.
    ///
    /// A session with no stamp stays listed but is stale. Stamps,
    /// transcripts and a current pointer that name no session are dropped.
    /// Returns a description of each repair.
    pub fn repair(&mut self) -> Vec<CacheError> {
        let mut problems = Vec::new();
        let known: Vec<String> = self.state.sessions.iter().map(|s| s.id.clone()).collect();

        for session in &self.state.sessions {
            if !self.state.cached_at.contains_key(&session.id) {
                problems.push(CacheError::Integrity(format!(
                    "session {} has no cache stamp; treating as stale",
                    session.id
                )));
            }
        }

        let orphan_stamps: Vec<String> = self
            .state
            .cached_at
            .keys()
            .filter(|id| !known.contains(id))
            .cloned()
            .collect();
        for id in orphan_stamps {
            self.state.cached_at.remove(&id);
            problems.push(CacheError::Integrity(format!("dropped stamp for unknown session {id}")));
        }

        let orphan_transcripts: Vec<String> = self
            .state
            .transcripts
            .keys()
            .filter(|id| !known.contains(id))
            .cloned()
            .collect();
        for id in orphan_transcripts {
            self.state.transcripts.remove(&id);
            problems.push(CacheError::Integrity(format!(
                "dropped transcript for unknown session {id}"
            )));
        }

        if let Some(current) = self.state.current_session_id.clone() {
            if !known.contains(&current) {
                self.state.current_session_id = None;
                problems.push(CacheError::Integrity(format!(
                    "cleared current pointer to unknown session {current}"
                )));
            }
        }

        problems
    }
}
