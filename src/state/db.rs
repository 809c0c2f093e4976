//! Pending-video store trait and SQLite implementation.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use async_trait::async_trait;
use chrono::Utc;
use rusqlite::Connection;

use super::error::StateError;
use super::schema;

/// Registry of videos awaiting a manual operator download.
///
/// Object-safe so the sync engine can hold an `Arc<dyn PendingStore>` and
/// tests can substitute an in-memory database.
#[async_trait]
pub trait PendingStore: Send + Sync {
    /// All pending videos as an id → expected-basename map.
    async fn all(&self) -> Result<HashMap<String, String>, StateError>;

    /// Record a video as pending. Returns `true` if it was newly recorded,
    /// `false` if it was already pending (the operator must not be
    /// re-prompted in that case).
    async fn insert(&self, id: &str, basename: &str) -> Result<bool, StateError>;

    /// Clear a video from the registry, e.g. once its file exists locally.
    async fn remove(&self, id: &str) -> Result<(), StateError>;
}

/// SQLite-backed registry, stored in the state directory next to the
/// checkpoint file.
pub struct SqlitePendingStore {
    /// Wrapped in a Mutex because rusqlite::Connection is not Sync. All
    /// queries are point lookups on a tiny table, so the lock is never held
    /// long and never across an await.
    conn: Mutex<Connection>,
    path: PathBuf,
}

impl std::fmt::Debug for SqlitePendingStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SqlitePendingStore")
            .field("path", &self.path)
            .finish_non_exhaustive()
    }
}

impl SqlitePendingStore {
    /// Open or create the registry at `<state_dir>/pending-videos.db`.
    pub fn open(state_dir: &Path) -> Result<Self, StateError> {
        let path = state_dir.join("pending-videos.db");
        let conn = Connection::open(&path).map_err(|e| StateError::Open {
            path: path.clone(),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path,
        })
    }

    /// In-memory registry for tests.
    #[cfg(test)]
    pub fn open_in_memory() -> Result<Self, StateError> {
        let conn = Connection::open_in_memory().map_err(|e| StateError::Open {
            path: PathBuf::from(":memory:"),
            source: e,
        })?;
        schema::migrate(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
            path: PathBuf::from(":memory:"),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Connection> {
        // A poisoned lock means another query panicked; the connection
        // itself is still usable.
        self.conn.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl PendingStore for SqlitePendingStore {
    async fn all(&self) -> Result<HashMap<String, String>, StateError> {
        let conn = self.lock();
        let mut stmt = conn
            .prepare("SELECT id, basename FROM pending_videos")
            .map_err(StateError::query)?;
        let rows = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))
            .map_err(StateError::query)?;

        let mut map = HashMap::new();
        for row in rows {
            let (id, basename) = row.map_err(StateError::query)?;
            map.insert(id, basename);
        }
        Ok(map)
    }

    async fn insert(&self, id: &str, basename: &str) -> Result<bool, StateError> {
        let conn = self.lock();
        let inserted = conn
            .execute(
                "INSERT OR IGNORE INTO pending_videos (id, basename, noted_at)
                 VALUES (?1, ?2, ?3)",
                (id, basename, Utc::now().to_rfc3339()),
            )
            .map_err(StateError::query)?;
        Ok(inserted > 0)
    }

    async fn remove(&self, id: &str) -> Result<(), StateError> {
        let conn = self.lock();
        conn.execute("DELETE FROM pending_videos WHERE id = ?1", [id])
            .map_err(StateError::query)?;
        Ok(())
    }
}
