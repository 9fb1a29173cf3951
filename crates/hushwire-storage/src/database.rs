//! SQLite database for Hushwire
//!
//! Stores ratchet session state keyed by peer device id, plus a small
//! settings table. Session state blobs are written by the session layer;
//! each save is a single upsert, so a read-modify-write under the caller's
//! per-peer lock is atomic with respect to other peers.

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use std::path::Path;

use crate::error::Result;

/// Parse an RFC 3339 timestamp string, returning a rusqlite-compatible
/// error. Suitable for use inside rusqlite row-mapping closures.
fn parse_timestamp_row(s: &str) -> std::result::Result<DateTime<Utc>, rusqlite::Error> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| {
            rusqlite::Error::FromSqlConversionFailure(0, rusqlite::types::Type::Text, Box::new(e))
        })
}

/// Stored ratchet session state
#[derive(Clone, Debug)]
pub struct StoredSession {
    pub peer_device_id: String,
    /// Serialized ratchet state blob
    pub state: Vec<u8>,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,
}

/// Hushwire database
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create a database at the given path
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let conn = Connection::open(path)?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory database (tests)
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS sessions (
                peer_device_id TEXT PRIMARY KEY,
                state BLOB NOT NULL,
                created_at TEXT NOT NULL,
                last_activity TEXT NOT NULL
            );
            CREATE TABLE IF NOT EXISTS settings (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );",
        )?;
        Ok(())
    }

    /// Insert or replace a session, preserving the original creation time
    pub fn save_session(&self, peer_device_id: &str, state: &[u8]) -> Result<()> {
        let now = Utc::now().to_rfc3339();
        self.conn.execute(
            "INSERT INTO sessions (peer_device_id, state, created_at, last_activity)
             VALUES (?1, ?2, ?3, ?3)
             ON CONFLICT(peer_device_id)
             DO UPDATE SET state = excluded.state, last_activity = excluded.last_activity",
            params![peer_device_id, state, now],
        )?;
        Ok(())
    }

    /// Load a session by peer device id
    pub fn load_session(&self, peer_device_id: &str) -> Result<Option<StoredSession>> {
        let session = self
            .conn
            .query_row(
                "SELECT peer_device_id, state, created_at, last_activity
                 FROM sessions WHERE peer_device_id = ?1",
                params![peer_device_id],
                |row| {
                    Ok(StoredSession {
                        peer_device_id: row.get(0)?,
                        state: row.get(1)?,
                        created_at: parse_timestamp_row(&row.get::<_, String>(2)?)?,
                        last_activity: parse_timestamp_row(&row.get::<_, String>(3)?)?,
                    })
                },
            )
            .optional()?;
        Ok(session)
    }

    /// Delete a session
    pub fn delete_session(&self, peer_device_id: &str) -> Result<()> {
        self.conn.execute(
            "DELETE FROM sessions WHERE peer_device_id = ?1",
            params![peer_device_id],
        )?;
        Ok(())
    }

    /// All peer device ids with a stored session
    pub fn list_sessions(&self) -> Result<Vec<String>> {
        let mut stmt = self
            .conn
            .prepare("SELECT peer_device_id FROM sessions ORDER BY peer_device_id")?;
        let ids = stmt
            .query_map([], |row| row.get(0))?
            .collect::<std::result::Result<Vec<String>, _>>()?;
        Ok(ids)
    }

    /// Set a settings value
    pub fn set_setting(&self, key: &str, value: &str) -> Result<()> {
        self.conn.execute(
            "INSERT INTO settings (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    /// Get a settings value
    pub fn get_setting(&self, key: &str) -> Result<Option<String>> {
        let value = self
            .conn
            .query_row(
                "SELECT value FROM settings WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_round_trip() {
        let db = Database::open_in_memory().unwrap();

        db.save_session("peer-1", b"state-blob").unwrap();
        let loaded = db.load_session("peer-1").unwrap().unwrap();

        assert_eq!(loaded.peer_device_id, "peer-1");
        assert_eq!(loaded.state, b"state-blob");
    }

    #[test]
    fn test_session_overwrite_keeps_created_at() {
        let db = Database::open_in_memory().unwrap();

        db.save_session("peer-1", b"v1").unwrap();
        let first = db.load_session("peer-1").unwrap().unwrap();

        db.save_session("peer-1", b"v2").unwrap();
        let second = db.load_session("peer-1").unwrap().unwrap();

        assert_eq!(second.state, b"v2");
        assert_eq!(second.created_at, first.created_at);
    }

    #[test]
    fn test_missing_session_is_none() {
        let db = Database::open_in_memory().unwrap();
        assert!(db.load_session("nobody").unwrap().is_none());
    }

    #[test]
    fn test_delete_session() {
        let db = Database::open_in_memory().unwrap();

        db.save_session("peer-1", b"state").unwrap();
        db.delete_session("peer-1").unwrap();
        assert!(db.load_session("peer-1").unwrap().is_none());
    }

    #[test]
    fn test_list_sessions() {
        let db = Database::open_in_memory().unwrap();

        db.save_session("b-peer", b"x").unwrap();
        db.save_session("a-peer", b"y").unwrap();

        assert_eq!(db.list_sessions().unwrap(), vec!["a-peer", "b-peer"]);
    }

    #[test]
    fn test_settings() {
        let db = Database::open_in_memory().unwrap();

        assert!(db.get_setting("name").unwrap().is_none());
        db.set_setting("name", "alice").unwrap();
        assert_eq!(db.get_setting("name").unwrap().unwrap(), "alice");

        db.set_setting("name", "bob").unwrap();
        assert_eq!(db.get_setting("name").unwrap().unwrap(), "bob");
    }
}
