//! Local session cache with freshness stamps and on-disk persistence.

mod persist;
mod store;
mod sync;

pub use persist::{CacheFile, STORAGE_KEY};
pub use store::{CacheState, SessionCacheStore, DEFAULT_EXPIRY};
pub use sync::{refresh_session, sync_project};
