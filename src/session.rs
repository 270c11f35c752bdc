//! Conversation history persisted in a local SQLite file.
//!
//! Every completed run is appended as one row; the agent reads back the most
//! recent runs of a session to seed the next conversation.

use crate::error::{Error, Result};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rusqlite::{Connection, params};
use serde::Serialize;
use std::path::Path;
use tracing::debug;

const SCHEMA: &str = "CREATE TABLE IF NOT EXISTS runs (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    session_id TEXT NOT NULL,
    input TEXT NOT NULL,
    output TEXT NOT NULL,
    created_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_runs_session ON runs (session_id, id);";

/// One question/answer exchange.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunRecord {
    pub session_id: String,
    pub input: String,
    pub output: String,
    pub created_at: DateTime<Utc>,
}

pub struct SessionStore {
    conn: Mutex<Connection>,
}

impl SessionStore {
    /// Open (or create) the store at `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        debug!(path = %path.display(), "opening session store");
        let conn = Connection::open(path)
            .and_then(|conn| conn.execute_batch(SCHEMA).map(|_| conn))
            .map_err(|e| Error::session(format!("cannot open {}: {e}", path.display())))?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn record_run(&self, session_id: &str, input: &str, output: &str) -> Result<()> {
        self.conn.lock().execute(
            "INSERT INTO runs (session_id, input, output, created_at) VALUES (?1, ?2, ?3, ?4)",
            params![session_id, input, output, Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }

    /// The last `limit` runs of a session, oldest first.
    pub fn recent_runs(&self, session_id: &str, limit: usize) -> Result<Vec<RunRecord>> {
        if limit == 0 {
            return Ok(Vec::new());
        }
        let conn = self.conn.lock();
        let mut stmt = conn.prepare(
            "SELECT session_id, input, output, created_at FROM runs \
             WHERE session_id = ?1 ORDER BY id DESC LIMIT ?2",
        )?;
        let rows = stmt.query_map(params![session_id, limit as i64], |row| {
            let created_at: String = row.get(3)?;
            Ok(RunRecord {
                session_id: row.get(0)?,
                input: row.get(1)?,
                output: row.get(2)?,
                created_at: DateTime::parse_from_rfc3339(&created_at)
                    .map(|t| t.with_timezone(&Utc))
                    .unwrap_or_default(),
            })
        })?;

        let mut runs = rows.collect::<std::result::Result<Vec<_>, _>>()?;
        runs.reverse();
        Ok(runs)
    }
}
