//! Persistent deal store
//!
//! Keeps one row per deal whose stop-loss has been armed by the monitor, with
//! the profit and stop-loss values seen at the last push. The SQLite file is
//! opened in exclusive locking mode so only one monitor can use a data
//! directory at a time.

use chrono::{DateTime, Utc};
use rusqlite::{params, params_from_iter, Connection, OpenFlags, OptionalExtension, Row};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

use crate::config::PROGRAM;
use crate::error::{Error, Result};

/// A deal the monitor has armed a stop-loss for
#[derive(Debug, Clone, PartialEq)]
pub struct TrackedDeal {
    pub deal_id: u64,
    pub bot_id: u64,
    pub last_profit_percentage: f64,
    pub last_stop_loss_percentage: f64,
    pub updated_at: DateTime<Utc>,
}

impl TrackedDeal {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        let updated_at: String = row.get(4)?;
        Ok(Self {
            deal_id: row.get::<_, i64>(0)? as u64,
            bot_id: row.get::<_, i64>(1)? as u64,
            last_profit_percentage: row.get(2)?,
            last_stop_loss_percentage: row.get(3)?,
            updated_at: DateTime::parse_from_rfc3339(&updated_at)
                .map(|t| t.with_timezone(&Utc))
                .unwrap_or_default(),
        })
    }
}

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS deals (
    dealid INTEGER PRIMARY KEY,
    botid INTEGER NOT NULL,
    last_profit_percentage REAL NOT NULL,
    last_stop_loss_percentage REAL NOT NULL,
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_deals_botid ON deals(botid);
"#;

const SCHEMA_VERSION: i32 = 1;

/// How long to wait for a lock held by another process before giving up
const LOCK_WAIT_MS: u64 = 250;

const SELECT_COLUMNS: &str =
    "SELECT dealid, botid, last_profit_percentage, last_stop_loss_percentage, updated_at FROM deals";

/// Path of the database file inside a data directory
pub fn store_path(datadir: &Path) -> PathBuf {
    datadir.join(format!("{}.sqlite3", PROGRAM))
}

/// SQLite backed store of tracked deals
pub struct DealStore {
    conn: Connection,
}

impl DealStore {
    /// Open the store, creating the file and schema on first use
    ///
    /// Fails with `Error::StoreLocked` when another process holds the file.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let existed = path.exists();

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_CREATE,
        )?;

        // Take the exclusive lock now and keep it for the lifetime of the connection
        conn.busy_timeout(Duration::from_millis(LOCK_WAIT_MS))?;
        conn.pragma_update(None, "locking_mode", "EXCLUSIVE")?;
        conn.execute_batch("BEGIN EXCLUSIVE; COMMIT;")
            .map_err(|e| match Error::from(e) {
                Error::StoreLocked(_) => Error::StoreLocked(path.display().to_string()),
                other => other,
            })?;

        let store = Self { conn };
        store.init_schema()?;
        // A write makes sure the lock is held even when the schema already existed
        store.conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        if existed {
            info!("Database '{}' opened successfully", path.display());
        } else {
            info!("Database '{}' created successfully", path.display());
        }

        Ok(store)
    }

    /// Open a throwaway in-memory store
    pub fn open_in_memory() -> Result<Self> {
        let store = Self {
            conn: Connection::open_in_memory()?,
        };
        store.init_schema()?;
        Ok(store)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn.execute_batch(SCHEMA)?;
        Ok(())
    }

    /// Look up a tracked deal
    pub fn get(&self, deal_id: u64) -> Result<Option<TrackedDeal>> {
        let deal = self
            .conn
            .query_row(
                &format!("{} WHERE dealid = ?1", SELECT_COLUMNS),
                params![deal_id as i64],
                TrackedDeal::from_row,
            )
            .optional()?;
        Ok(deal)
    }

    /// Insert or overwrite the tracking values of a deal
    pub fn upsert(
        &self,
        deal_id: u64,
        bot_id: u64,
        profit_percentage: f64,
        stop_loss_percentage: f64,
    ) -> Result<()> {
        self.conn.execute(
            "INSERT INTO deals (dealid, botid, last_profit_percentage, last_stop_loss_percentage, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT(dealid) DO UPDATE SET
                last_profit_percentage = excluded.last_profit_percentage,
                last_stop_loss_percentage = excluded.last_stop_loss_percentage,
                updated_at = excluded.updated_at",
            params![
                deal_id as i64,
                bot_id as i64,
                profit_percentage,
                stop_loss_percentage,
                Utc::now().to_rfc3339()
            ],
        )?;
        debug!(
            "Stored deal {} (bot {}): profit {}%, SL {}%",
            deal_id, bot_id, profit_percentage, stop_loss_percentage
        );
        Ok(())
    }

    /// Stop tracking a deal. Returns true if a row was removed.
    pub fn delete(&self, deal_id: u64) -> Result<bool> {
        let removed = self
            .conn
            .execute("DELETE FROM deals WHERE dealid = ?1", params![deal_id as i64])?;
        Ok(removed > 0)
    }

    /// Remove every deal of a bot except the ones in `keep_ids`
    ///
    /// Returns the number of removed rows.
    pub fn delete_where(&mut self, bot_id: u64, keep_ids: &[u64]) -> Result<usize> {
        if keep_ids.is_empty() {
            return self.delete_all(bot_id);
        }

        let keep: HashSet<u64> = keep_ids.iter().copied().collect();
        let tx = self.conn.transaction()?;

        let stale: Vec<i64> = {
            let mut stmt = tx.prepare("SELECT dealid FROM deals WHERE botid = ?1")?;
            let ids = stmt
                .query_map(params![bot_id as i64], |row| row.get::<_, i64>(0))?
                .collect::<rusqlite::Result<Vec<_>>>()?;
            ids.into_iter()
                .filter(|id| !keep.contains(&(*id as u64)))
                .collect()
        };

        if !stale.is_empty() {
            let placeholders = vec!["?"; stale.len()].join(", ");
            tx.execute(
                &format!("DELETE FROM deals WHERE dealid IN ({})", placeholders),
                params_from_iter(stale.iter()),
            )?;
        }

        tx.commit()?;
        Ok(stale.len())
    }

    /// Remove every deal of a bot. Returns the number of removed rows.
    pub fn delete_all(&self, bot_id: u64) -> Result<usize> {
        let removed = self
            .conn
            .execute("DELETE FROM deals WHERE botid = ?1", params![bot_id as i64])?;
        Ok(removed)
    }

    /// All tracked deals of one bot
    pub fn list_for_bot(&self, bot_id: u64) -> Result<Vec<TrackedDeal>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} WHERE botid = ?1 ORDER BY dealid", SELECT_COLUMNS))?;
        let deals = stmt
            .query_map(params![bot_id as i64], TrackedDeal::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(deals)
    }

    /// All tracked deals, ordered by bot and deal
    pub fn all(&self) -> Result<Vec<TrackedDeal>> {
        let mut stmt = self
            .conn
            .prepare(&format!("{} ORDER BY botid, dealid", SELECT_COLUMNS))?;
        let deals = stmt
            .query_map([], TrackedDeal::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(deals)
    }

    /// Number of tracked deals
    pub fn count(&self) -> Result<usize> {
        let count: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM deals", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Remove the table so every later statement fails
    #[cfg(test)]
    pub(crate) fn break_schema(&self) {
        self.conn.execute_batch("DROP TABLE deals").unwrap();
    }
}
