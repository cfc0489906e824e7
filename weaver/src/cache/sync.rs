//! Bringing the cache up to date from the session API.

use crate::api::SessionApi;
use crate::error::ApiError;
use crate::models::Session;

use super::store::SessionCacheStore;

/// Upsert every session the server lists for `project_id`. Returns how
/// many sessions the server listed.
pub async fn sync_project(
    api: &SessionApi,
    cache: &mut SessionCacheStore,
    project_id: &str,
) -> Result<usize, ApiError> {
    let sessions = api.list_sessions(project_id).await?;
    let count = sessions.len();
    cache.upsert(sessions);
    Ok(count)
}

/// Re-fetch one session and mark it fresh.
///
/// A session the server no longer knows is dropped from the cache and
/// `None` is returned.
pub async fn refresh_session(
    api: &SessionApi,
    cache: &mut SessionCacheStore,
    session_id: &str,
) -> Result<Option<Session>, ApiError> {
    match api.get_session(session_id).await {
        Ok(session) => {
            cache.upsert(vec![session.clone()]);
            cache.touch(session_id);
            Ok(Some(session))
        }
        Err(ApiError::NotFound(_)) => {
            tracing::info!(session_id, "session gone on server; dropping from cache");
            cache.remove(session_id);
            Ok(None)
        }
        Err(e) => Err(e),
    }
}
