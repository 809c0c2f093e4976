//! Schema for the pending-video registry.

use rusqlite::Connection;

use super::error::StateError;

/// Current schema version, stored in SQLite's `user_version` pragma.
const SCHEMA_VERSION: i32 = 1;

/// Create or upgrade the schema. Refuses to touch a database written by a
/// newer version of this tool.
pub(crate) fn migrate(conn: &Connection) -> Result<(), StateError> {
    let found: i32 = conn
        .query_row("PRAGMA user_version", [], |row| row.get(0))
        .map_err(StateError::Migration)?;

    if found > SCHEMA_VERSION {
        return Err(StateError::UnsupportedSchemaVersion {
            found,
            expected: SCHEMA_VERSION,
        });
    }

    if found < 1 {
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS pending_videos (
                 id        TEXT PRIMARY KEY,
                 basename  TEXT NOT NULL,
                 noted_at  TEXT NOT NULL
             );",
        )
        .map_err(StateError::Migration)?;
    }

    conn.pragma_update(None, "user_version", SCHEMA_VERSION)
        .map_err(StateError::Migration)?;

    Ok(())
}
