pub mod holdings;
pub mod migrations;
pub mod operations;
pub mod prices;
pub mod rates;
pub mod tokens;

use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::errors::CoreError;

/// Tables the Deduplication Maintainer knows how to clean, with their
/// logical row keys.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DedupTable {
    /// Price rows, keyed by (timestamp, token)
    Market,
    /// Fiat rate rows, keyed by (timestamp, pair)
    Currency,
}

impl DedupTable {
    fn name(&self) -> &'static str {
        match self {
            DedupTable::Market => "Market",
            DedupTable::Currency => "Currency",
        }
    }

    fn key_columns(&self) -> &'static str {
        match self {
            DedupTable::Market => "timestamp, token",
            DedupTable::Currency => "timestamp, pair",
        }
    }
}

/// Handle to the SQLite database shared by all stores.
///
/// The pool is cheap to clone; each store holds its own clone. All multi-row
/// mutations run inside explicit transactions so a crash mid-update leaves
/// either the pre-update or the fully-updated state.
#[derive(Debug, Clone)]
pub struct Database {
    pool: SqlitePool,
    /// Path of the database file; `None` for in-memory databases.
    path: Option<String>,
}

impl Database {
    /// Open (creating if missing) the database file and apply any pending
    /// schema migrations.
    pub async fn open(path: &str) -> Result<Self, CoreError> {
        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePoolOptions::new().connect_with(options).await?;
        let db = Self {
            pool,
            path: Some(path.to_string()),
        };
        migrations::run(&db.pool).await?;
        Ok(db)
    }

    /// In-memory database for tests. Limited to a single connection so every
    /// query sees the same memory store.
    pub async fn open_in_memory() -> Result<Self, CoreError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect("sqlite::memory:")
            .await?;
        let db = Self { pool, path: None };
        migrations::run(&db.pool).await?;
        Ok(db)
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // ── Deduplication Maintainer ────────────────────────────────────

    /// Remove duplicate rows from `table`, keeping exactly the
    /// first-inserted row (minimum rowid) per logical key.
    ///
    /// Idempotent: a second run in a row deletes nothing. Safe to run
    /// standalone at any time; runs automatically after bulk imports and
    /// price updates.
    pub async fn drop_duplicates(&self, table: DedupTable) -> Result<u64, CoreError> {
        let sql = format!(
            "DELETE FROM {t} WHERE rowid NOT IN \
             (SELECT MIN(rowid) FROM {t} GROUP BY {keys})",
            t = table.name(),
            keys = table.key_columns(),
        );
        let mut tx = self.pool.begin().await?;
        let result = sqlx::query(&sql).execute(&mut *tx).await?;
        tx.commit().await?;

        let removed = result.rows_affected();
        if removed > 0 {
            info!(table = table.name(), removed, "dropped duplicate rows");
        } else {
            debug!(table = table.name(), "no duplicate rows");
        }
        Ok(removed)
    }

    // ── Metadata (key/value) ────────────────────────────────────────

    /// Read a value from the `Metadata` key/value table.
    pub async fn get_meta(&self, name: &str) -> Result<Option<String>, CoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT value FROM Metadata WHERE name = ?")
                .bind(name)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|(v,)| v))
    }

    /// Insert or replace a value in the `Metadata` key/value table.
    pub async fn set_meta(&self, name: &str, value: &str, kind: &str) -> Result<(), CoreError> {
        sqlx::query("INSERT OR REPLACE INTO Metadata (name, value, kind) VALUES (?, ?, ?)")
            .bind(name)
            .bind(value)
            .bind(kind)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    // ── Backup ──────────────────────────────────────────────────────

    /// Copy the database file to a timestamped `.bak` sibling before a
    /// destructive batch update. Returns the backup path, or `None` for
    /// in-memory databases.
    pub fn backup(&self) -> Result<Option<String>, CoreError> {
        let Some(path) = &self.path else {
            return Ok(None);
        };
        let stamp = chrono::Utc::now().format("%Y%m%d_%H%M%S");
        let backup_path = format!("{path}_{stamp}.bak");
        std::fs::copy(path, &backup_path)?;
        info!(backup = %backup_path, "database backed up");
        Ok(Some(backup_path))
    }
}
