//! Client configuration.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::TimeDelta;

use crate::api::SessionApi;
use crate::auth::{StaticToken, TokenSource};
use crate::cache::{CacheFile, DEFAULT_EXPIRY};
use crate::channel::{ReconnectPolicy, WsConnector};
use crate::draft::{FileDraftSink, DEFAULT_DEBOUNCE};
use crate::engine::EngineOptions;
use crate::error::CacheError;
use crate::interrupt::DEFAULT_INTERRUPT_TIMEOUT;

pub const DEFAULT_API_URL: &str = "http://localhost:8000";
pub const DEFAULT_WS_URL: &str = "ws://localhost:8000";

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub ws_url: String,
    pub token: Option<String>,
    pub reconnect: ReconnectPolicy,
    pub interrupt_timeout: Duration,
    pub draft_debounce: Duration,
    pub cache_expiry: TimeDelta,
    /// `None` uses the platform data directory.
    pub cache_dir: Option<PathBuf>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            ws_url: DEFAULT_WS_URL.to_string(),
            token: None,
            reconnect: ReconnectPolicy::default(),
            interrupt_timeout: DEFAULT_INTERRUPT_TIMEOUT,
            draft_debounce: DEFAULT_DEBOUNCE,
            cache_expiry: DEFAULT_EXPIRY,
            cache_dir: None,
        }
    }
}

impl Config {
    pub fn tokens(&self) -> Option<Arc<dyn TokenSource>> {
        StaticToken::shared(self.token.clone())
    }

    pub fn api(&self) -> SessionApi {
        SessionApi::new(self.api_url.clone(), self.tokens())
    }

    pub fn connector(&self) -> WsConnector {
        WsConnector::new(self.ws_url.clone(), self.tokens())
    }

    pub fn engine_options(&self) -> EngineOptions {
        EngineOptions {
            interrupt_timeout: self.interrupt_timeout,
        }
    }

    pub fn cache_file(&self) -> Result<CacheFile, CacheError> {
        CacheFile::locate(self.cache_dir.as_deref())
    }

    /// Drafts live in a `drafts` directory beside the cache file.
    pub fn drafts(&self) -> Result<FileDraftSink, CacheError> {
        let file = self.cache_file()?;
        let dir = file.path().parent().map_or_else(PathBuf::new, Path::to_path_buf);
        Ok(FileDraftSink::new(dir.join("drafts")))
    }
}
