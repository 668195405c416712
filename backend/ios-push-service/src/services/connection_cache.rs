//! Cached gateway sessions keyed by (application, purpose)
//!
//! One lock guards the whole map. It is held only for the lookup or mutation
//! itself, never across a send.

use std::collections::HashMap;
use std::time::Duration;

use apns_gateway::{Purpose, SharedConnection};
use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::debug;

/// Sessions idle for longer than this are not reused
pub const DEFAULT_IDLE_TTL: Duration = Duration::from_secs(20 * 60);

struct CacheEntry {
    connection: SharedConnection,
    last_access: Instant,
}

pub struct ConnectionCache {
    idle_ttl: Duration,
    entries: Mutex<HashMap<(i64, Purpose), CacheEntry>>,
}

impl Default for ConnectionCache {
    fn default() -> Self {
        Self::new(DEFAULT_IDLE_TTL)
    }
}

impl ConnectionCache {
    pub fn new(idle_ttl: Duration) -> Self {
        Self {
            idle_ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    /// Live session for the key, refreshing its last access time.
    ///
    /// A stale entry reads as absent but stays in the map until the next
    /// `set` overwrites it.
    pub fn get(&self, app_id: i64, purpose: Purpose) -> Option<SharedConnection> {
        let now = Instant::now();
        let mut entries = self.entries.lock();
        let entry = entries.get_mut(&(app_id, purpose))?;

        if now.duration_since(entry.last_access) > self.idle_ttl {
            debug!(app_id, %purpose, "Cached APNs connection idle past TTL");
            return None;
        }

        entry.last_access = now;
        Some(entry.connection.clone())
    }

    pub fn set(&self, app_id: i64, purpose: Purpose, connection: SharedConnection) {
        let entry = CacheEntry {
            connection,
            last_access: Instant::now(),
        };
        self.entries.lock().insert((app_id, purpose), entry);
    }

    /// Returns whether an entry was present
    pub fn remove(&self, app_id: i64, purpose: Purpose) -> bool {
        let removed = self.entries.lock().remove(&(app_id, purpose)).is_some();
        if removed {
            debug!(app_id, %purpose, "Dropped cached APNs connection");
        }
        removed
    }

    /// Number of entries, stale ones included
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
