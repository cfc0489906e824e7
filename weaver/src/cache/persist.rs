//! On-disk persistence for the session cache.
//!
//! The file holds a single JSON object with one namespaced key, so it can
//! sit beside auth and preference files without sharing any of them.

use std::path::{Path, PathBuf};

use chrono::TimeDelta;
use serde::{Deserialize, Serialize};

use super::store::{CacheState, SessionCacheStore};
use crate::error::CacheError;

/// Namespace key for session cache state.
pub const STORAGE_KEY: &str = "session-storage";

const FILE_NAME: &str = "session-storage.json";
const FORMAT_VERSION: u32 = 1;

#[derive(Serialize, Deserialize)]
struct Document {
    #[serde(rename = "session-storage")]
    state: CacheState,
    #[serde(default)]
    version: u32,
}

/// A cache file on disk.
#[derive(Debug, Clone)]
pub struct CacheFile {
    path: PathBuf,
}

impl CacheFile {
    /// `session-storage.json` inside `dir`, or inside the platform data
    /// directory when `dir` is `None`.
    pub fn locate(dir: Option<&Path>) -> Result<Self, CacheError> {
        let dir = match dir {
            Some(dir) => dir.to_path_buf(),
            None => dirs::data_dir()
                .ok_or(CacheError::NoDataDir)?
                .join("weaver"),
        };
        Ok(Self::at(dir.join(FILE_NAME)))
    }

    pub const fn at(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the cache, sweeping stale entries and repairing integrity. A
    /// missing file is an empty cache.
    pub fn load(&self, expiry: TimeDelta) -> Result<SessionCacheStore, CacheError> {
        let raw = match std::fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::debug!(path = %self.path.display(), "no session cache yet");
                return Ok(SessionCacheStore::new(expiry));
            }
            Err(source) => return Err(self.io_error(source)),
        };

        let document: Document = serde_json::from_str(&raw).map_err(|source| CacheError::Decode {
            path: self.path.display().to_string(),
            source,
        })?;
        if document.version > FORMAT_VERSION {
            tracing::warn!(
                version = document.version,
                "session cache written by a newer version"
            );
        }

        let mut store = SessionCacheStore::from_state(document.state, expiry);
        store.sweep_expired();
        Ok(store)
    }

    /// Write the cache through a temp file and rename.
    pub fn save(&self, store: &SessionCacheStore) -> Result<(), CacheError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| self.io_error(source))?;
        }

        let document = Document {
            state: store.state().clone(),
            version: FORMAT_VERSION,
        };
        let json = serde_json::to_string_pretty(&document).map_err(|source| CacheError::Encode {
            path: self.path.display().to_string(),
            source,
        })?;

        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|source| self.io_error(source))?;
        std::fs::rename(&tmp, &self.path).map_err(|source| self.io_error(source))?;
        tracing::debug!(path = %self.path.display(), sessions = store.sessions().len(), "saved session cache");
        Ok(())
    }

    fn io_error(&self, source: std::io::Error) -> CacheError {
        CacheError::Io {
            path: self.path.display().to_string(),
            source,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::DEFAULT_EXPIRY;
    use crate::models::{Message, Session};
    use chrono::Utc;
    use tempfile::TempDir;

    fn session(id: &str) -> Session {
        Session::new(id.into(), "proj".into())
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let file = CacheFile::locate(Some(dir.path())).unwrap();
        let store = file.load(DEFAULT_EXPIRY).unwrap();
        assert!(store.sessions().is_empty());
    }

    #[test]
    fn save_then_load_keeps_state() {
        let dir = TempDir::new().unwrap();
        let file = CacheFile::locate(Some(dir.path())).unwrap();

        let mut store = SessionCacheStore::default();
        store.add(session("a"));
        store.store_transcript("a", vec![Message::user("hello")]).unwrap();
        file.save(&store).unwrap();

        let loaded = file.load(DEFAULT_EXPIRY).unwrap();
        assert_eq!(loaded.current(), Some("a"));
        assert_eq!(loaded.transcript("a").unwrap()[0].text(), "hello");
        assert!(!dir.path().join("session-storage.json.tmp").exists());
    }

    #[test]
    fn document_is_namespaced() {
        let dir = TempDir::new().unwrap();
        let file = CacheFile::locate(Some(dir.path())).unwrap();
        file.save(&SessionCacheStore::default()).unwrap();

        let raw = std::fs::read_to_string(file.path()).unwrap();
        let value: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert!(value.get(STORAGE_KEY).is_some());
        assert_eq!(value["version"], FORMAT_VERSION);
    }

    #[test]
    fn load_sweeps_stale_and_repairs() {
        let dir = TempDir::new().unwrap();
        let file = CacheFile::locate(Some(dir.path())).unwrap();

        let now = Utc::now();
        let mut store = SessionCacheStore::default();
        store.upsert_at(vec![session("old")], now - TimeDelta::days(8));
        store.upsert_at(vec![session("new")], now);
        store.set_current(Some("old"));
        file.save(&store).unwrap();

        let loaded = file.load(DEFAULT_EXPIRY).unwrap();
        let ids: Vec<_> = loaded.sessions().iter().map(|s| s.id.as_str()).collect();
        assert_eq!(ids, ["new"]);
        assert!(loaded.current().is_none());
    }

    #[test]
    fn corrupt_file_is_a_decode_error() {
        let dir = TempDir::new().unwrap();
        let file = CacheFile::locate(Some(dir.path())).unwrap();
        std::fs::write(file.path(), "{not json").unwrap();
        assert!(matches!(
            file.load(DEFAULT_EXPIRY),
            Err(CacheError::Decode { .. })
        ));
    }
}
