pub mod ledger;
pub mod outcome_store;
pub mod session_store;

pub use ledger::Ledger;
pub use outcome_store::OutcomeStore;
pub use session_store::SessionStore;

use crate::error::{AscendError, Result};
use crate::types::SessionStatus;
use bitcoin::Amount;
use chrono::Utc;
use rusqlite::{params, Connection};
use std::path::Path;
use std::time::Duration;
use tokio::sync::Mutex;

/// How long a statement waits on a lock held by another process
/// (the CLI and the monitor share one database file).
const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

pub struct Storage {
    conn: Mutex<Connection>,
}

impl Storage {
    /// Open (or create) the database. `pot_initial` seeds the pot only when
    /// the pot row does not exist yet.
    pub async fn new(db_path: &Path, pot_initial: Amount) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = db_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| AscendError::internal(format!("Failed to create directory: {}", e)))?;
        }

        let conn = Connection::open(db_path)?;
        conn.busy_timeout(BUSY_TIMEOUT)?;
        let journal: String =
            conn.pragma_update_and_check(None, "journal_mode", "WAL", |row| row.get(0))?;
        tracing::debug!("Opened {} (journal_mode={})", db_path.display(), journal);
        conn.pragma_update(None, "foreign_keys", true)?;

        let storage = Self {
            conn: Mutex::new(conn),
        };

        storage.init_schema(pot_initial).await?;
        Ok(storage)
    }

    async fn init_schema(&self, pot_initial: Amount) -> Result<()> {
        let conn = self.conn.lock().await;

        // Pot table, single row
        conn.execute(
            "CREATE TABLE IF NOT EXISTS pot (
                id INTEGER PRIMARY KEY CHECK (id = 1),
                balance_sats INTEGER NOT NULL DEFAULT 0 CHECK (balance_sats >= 0),
                updated_at INTEGER NOT NULL
            )",
            [],
        )?;

        // Sessions table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS sessions (
                id TEXT PRIMARY KEY,
                status TEXT NOT NULL DEFAULT 'pending'
                    CHECK (status IN ('pending', 'active', 'playing', 'ended')),
                ante_sats INTEGER NOT NULL CHECK (ante_sats >= 0),
                account_id TEXT,
                payout_destination TEXT,
                email TEXT,
                access_token TEXT NOT NULL,
                created_at INTEGER NOT NULL,
                started_at INTEGER,
                ended_at INTEGER,
                outcome_id INTEGER
            )",
            [],
        )?;

        // At most one live session per external account
        conn.execute(
            &format!(
                "CREATE UNIQUE INDEX IF NOT EXISTS idx_sessions_live_account
                 ON sessions(account_id)
                 WHERE account_id IS NOT NULL AND status IN ({})",
                live_statuses()
            ),
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_sessions_status ON sessions(status)",
            [],
        )?;

        // Outcomes table
        conn.execute(
            "CREATE TABLE IF NOT EXISTS outcomes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                session_id TEXT UNIQUE NOT NULL REFERENCES sessions(id),
                account_id TEXT NOT NULL,
                character_name TEXT NOT NULL,
                ascended INTEGER NOT NULL,
                cheat_mode TEXT,
                score INTEGER NOT NULL,
                turns INTEGER NOT NULL,
                death TEXT NOT NULL,
                end_time INTEGER NOT NULL,
                recorded_at INTEGER NOT NULL,
                payout_status TEXT NOT NULL,
                payout_sats INTEGER,
                payout_reference TEXT,
                payout_error TEXT
            )",
            [],
        )?;
        conn.execute(
            "CREATE INDEX IF NOT EXISTS idx_outcomes_ascended ON outcomes(ascended)",
            [],
        )?;

        conn.execute(
            "INSERT OR IGNORE INTO pot (id, balance_sats, updated_at) VALUES (1, ?1, ?2)",
            params![pot_initial.to_sat() as i64, Utc::now().timestamp()],
        )?;

        Ok(())
    }

    pub async fn get_connection(&self) -> tokio::sync::MutexGuard<'_, Connection> {
        self.conn.lock().await
    }
}

/// Unix seconds column to `DateTime<Utc>`.
/// Quoted, comma separated SQL list, e.g. `'active', 'playing'`.
pub(crate) fn sql_list<I>(values: I) -> String
where
    I: IntoIterator<Item = &'static str>,
{
    values
        .into_iter()
        .map(|value| format!("'{}'", value))
        .collect::<Vec<_>>()
        .join(", ")
}

pub(crate) fn live_statuses() -> String {
    sql_list(SessionStatus::live().iter().map(|status| status.as_str()))
}

pub(crate) fn timestamp_to_datetime(ts: i64) -> chrono::DateTime<Utc> {
    chrono::DateTime::from_timestamp(ts, 0).unwrap_or_else(Utc::now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_sql_lists() {
        assert_eq!(live_statuses(), "'active', 'playing'");
        assert_eq!(sql_list(["pending"]), "'pending'");
    }

    #[tokio::test]
    async fn test_pot_seeded_once() {
        let temp_dir = tempdir().unwrap();
        let db_path = temp_dir.path().join("nested").join("ascend.db");

        let storage = Storage::new(&db_path, Amount::from_sat(10_000)).await.unwrap();
        let ledger = Ledger::new(std::sync::Arc::new(storage));
        assert_eq!(ledger.balance().await.unwrap(), Amount::from_sat(10_000));
        ledger.set(Amount::from_sat(42)).await.unwrap();
        drop(ledger);

        // Reopening never reseeds an existing pot
        let storage = Storage::new(&db_path, Amount::from_sat(10_000)).await.unwrap();
        let ledger = Ledger::new(std::sync::Arc::new(storage));
        assert_eq!(ledger.balance().await.unwrap(), Amount::from_sat(42));
    }
}
