//! Versioned schema migrations.
//!
//! The current schema version is stored in the `Metadata` table under the
//! `db_version` key. On startup, pending steps are applied sequentially,
//! each inside its own transaction, and the counter is advanced after each
//! step. Steps are idempotent so a crash between apply and record leaves a
//! re-runnable database.

use sqlx::{Sqlite, SqlitePool, Transaction};
use tracing::info;

use crate::errors::CoreError;

/// Highest schema version this build knows about.
pub const CURRENT_VERSION: u32 = 3;

/// Apply all pending migrations and return the resulting schema version.
pub async fn run(pool: &SqlitePool) -> Result<u32, CoreError> {
    ensure_metadata(pool).await?;
    let mut version = current_version(pool).await?;

    while version < CURRENT_VERSION {
        let next = version + 1;
        let mut tx = pool.begin().await?;
        apply_step(&mut tx, next)
            .await
            .map_err(|e| CoreError::Migration {
                version: next,
                message: e.to_string(),
            })?;
        sqlx::query("INSERT OR REPLACE INTO Metadata (name, value, kind) VALUES ('db_version', ?, 'int')")
            .bind(next.to_string())
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(version = next, "applied schema migration");
        version = next;
    }

    Ok(version)
}

/// Bootstrap: the `Metadata` table must exist before `db_version` can be
/// read.
async fn ensure_metadata(pool: &SqlitePool) -> Result<(), CoreError> {
    sqlx::query(
        "CREATE TABLE IF NOT EXISTS Metadata (
            name  TEXT PRIMARY KEY,
            value TEXT NOT NULL,
            kind  TEXT NOT NULL
        )",
    )
    .execute(pool)
    .await?;
    Ok(())
}

async fn current_version(pool: &SqlitePool) -> Result<u32, CoreError> {
    let row: Option<(String,)> =
        sqlx::query_as("SELECT value FROM Metadata WHERE name = 'db_version'")
            .fetch_optional(pool)
            .await?;
    Ok(row
        .and_then(|(v,)| v.parse().ok())
        .unwrap_or(0))
}

async fn apply_step(tx: &mut Transaction<'_, Sqlite>, version: u32) -> Result<(), CoreError> {
    match version {
        1 => migrate_v1(tx).await,
        2 => migrate_v2(tx).await,
        3 => migrate_v3(tx).await,
        other => Err(CoreError::Migration {
            version: other,
            message: "unknown migration step".into(),
        }),
    }
}

/// v1 — base schema: all tables.
async fn migrate_v1(tx: &mut Transaction<'_, Sqlite>) -> Result<(), CoreError> {
    let statements = [
        "CREATE TABLE IF NOT EXISTS Market (
            timestamp INTEGER NOT NULL,
            token     TEXT    NOT NULL,
            price     REAL    NOT NULL,
            currency  TEXT    NOT NULL DEFAULT 'USD',
            source    TEXT    NOT NULL DEFAULT ''
        )",
        "CREATE TABLE IF NOT EXISTS Currency (
            timestamp INTEGER NOT NULL,
            pair      TEXT    NOT NULL,
            rate      REAL    NOT NULL
        )",
        "CREATE INDEX IF NOT EXISTS idx_currency ON Currency (timestamp, pair)",
        "CREATE TABLE IF NOT EXISTS Operations (
            id            INTEGER PRIMARY KEY AUTOINCREMENT,
            kind          TEXT    NOT NULL,
            source_amount REAL    NOT NULL,
            dest_amount   REAL    NOT NULL,
            source_unit   TEXT    NOT NULL,
            dest_unit     TEXT    NOT NULL,
            timestamp     INTEGER NOT NULL,
            portfolio     TEXT    NOT NULL
        )",
        "CREATE TABLE IF NOT EXISTS TokenMetadata (
            token                 TEXT PRIMARY KEY,
            status                TEXT NOT NULL DEFAULT 'active',
            delisting_date        INTEGER,
            last_valid_price_date INTEGER,
            notes                 TEXT,
            created_at            INTEGER NOT NULL DEFAULT (strftime('%s', 'now')),
            updated_at            INTEGER NOT NULL DEFAULT (strftime('%s', 'now'))
        )",
        "CREATE TABLE IF NOT EXISTS Holdings (
            portfolio    TEXT    NOT NULL,
            token        TEXT    NOT NULL,
            quantity     REAL    NOT NULL,
            avg_cost     REAL    NOT NULL,
            last_updated INTEGER NOT NULL,
            PRIMARY KEY (portfolio, token)
        )",
    ];
    for sql in statements {
        sqlx::query(sql).execute(&mut **tx).await?;
    }
    Ok(())
}

/// v2 — provider columns on TokenMetadata. Tolerates databases where the
/// columns already exist (pre-versioning installs).
async fn migrate_v2(tx: &mut Transaction<'_, Sqlite>) -> Result<(), CoreError> {
    for (col, typedef) in [("provider_id", "INTEGER"), ("name", "TEXT")] {
        let sql = format!("ALTER TABLE TokenMetadata ADD COLUMN {col} {typedef}");
        if let Err(e) = sqlx::query(&sql).execute(&mut **tx).await {
            let msg = e.to_string();
            if !msg.contains("duplicate column") {
                return Err(e.into());
            }
        }
    }
    Ok(())
}

/// v3 — lookup index for nearest-prior price queries.
async fn migrate_v3(tx: &mut Transaction<'_, Sqlite>) -> Result<(), CoreError> {
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_market ON Market (token, timestamp)")
        .execute(&mut **tx)
        .await?;
    Ok(())
}
