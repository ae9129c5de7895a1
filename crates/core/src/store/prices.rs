use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::errors::CoreError;
use crate::models::price::{PricePoint, PriceRow};
use crate::models::token::TokenStatus;

/// Append-mostly store for the `Market` price table.
///
/// Rows are never mutated in place: new fetches append new timestamped rows.
/// The only removal paths are exact-duplicate deduplication and the guarded
/// administrative cleanup of zero-price rows for delisted tokens.
#[derive(Debug, Clone)]
pub struct PriceStore {
    pool: SqlitePool,
}

impl PriceStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ── Writes ──────────────────────────────────────────────────────

    /// Append a batch of price rows in a single transaction. This is the
    /// shared insert contract used by adapters and bulk import alike —
    /// importers must run the Deduplication Maintainer afterwards.
    pub async fn insert_rows(&self, rows: &[PriceRow]) -> Result<(), CoreError> {
        if rows.is_empty() {
            return Ok(());
        }
        let mut tx = self.pool.begin().await?;
        for row in rows {
            sqlx::query(
                "INSERT INTO Market (timestamp, token, price, currency, source)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(row.timestamp)
            .bind(&row.token)
            .bind(row.price)
            .bind(&row.currency)
            .bind(&row.source)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(count = rows.len(), "inserted price rows");
        Ok(())
    }

    // ── Reads ───────────────────────────────────────────────────────

    /// Price series for a token within [from, to], ascending by timestamp.
    pub async fn history(
        &self,
        token: &str,
        from: i64,
        to: i64,
    ) -> Result<Vec<PricePoint>, CoreError> {
        let rows: Vec<(i64, f64)> = sqlx::query_as(
            "SELECT timestamp, price FROM Market
             WHERE token = ? AND timestamp >= ? AND timestamp <= ?
             ORDER BY timestamp",
        )
        .bind(token)
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(timestamp, price)| PricePoint { timestamp, price })
            .collect())
    }

    /// Nearest price at or before `timestamp` (as-of lookup, never a future
    /// price).
    pub async fn price_at(
        &self,
        token: &str,
        timestamp: i64,
    ) -> Result<Option<PricePoint>, CoreError> {
        let row: Option<(i64, f64)> = sqlx::query_as(
            "SELECT timestamp, price FROM Market
             WHERE token = ? AND timestamp <= ?
             ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(token)
        .bind(timestamp)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(timestamp, price)| PricePoint { timestamp, price }))
    }

    /// Most recent stored price for a token.
    pub async fn latest(&self, token: &str) -> Result<Option<PricePoint>, CoreError> {
        let row: Option<(i64, f64)> = sqlx::query_as(
            "SELECT timestamp, price FROM Market
             WHERE token = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(timestamp, price)| PricePoint { timestamp, price }))
    }

    /// The stored points straddling `timestamp`: nearest at-or-before and
    /// nearest at-or-after. Used by the display-only interpolation helper.
    pub async fn surrounding(
        &self,
        token: &str,
        timestamp: i64,
    ) -> Result<(Option<PricePoint>, Option<PricePoint>), CoreError> {
        let low = self.price_at(token, timestamp).await?;
        let high: Option<(i64, f64)> = sqlx::query_as(
            "SELECT timestamp, price FROM Market
             WHERE token = ? AND timestamp >= ?
             ORDER BY timestamp ASC LIMIT 1",
        )
        .bind(token)
        .bind(timestamp)
        .fetch_optional(&self.pool)
        .await?;
        Ok((
            low,
            high.map(|(timestamp, price)| PricePoint { timestamp, price }),
        ))
    }

    /// Latest timestamp across the whole table, if any rows exist.
    pub async fn last_timestamp(&self) -> Result<Option<i64>, CoreError> {
        let row: (Option<i64>,) = sqlx::query_as("SELECT MAX(timestamp) FROM Market")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    /// Latest stored timestamp for one token — the backfill checkpoint.
    pub async fn last_timestamp_for(&self, token: &str) -> Result<Option<i64>, CoreError> {
        let row: (Option<i64>,) =
            sqlx::query_as("SELECT MAX(timestamp) FROM Market WHERE token = ?")
                .bind(token)
                .fetch_one(&self.pool)
                .await?;
        Ok(row.0)
    }

    /// All distinct tokens present in the price table, sorted.
    pub async fn tokens(&self) -> Result<Vec<String>, CoreError> {
        let rows: Vec<(String,)> =
            sqlx::query_as("SELECT DISTINCT token FROM Market ORDER BY token")
                .fetch_all(&self.pool)
                .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    /// Full rows for a token (import/export and diagnostics).
    pub async fn rows_for(&self, token: &str) -> Result<Vec<PriceRow>, CoreError> {
        let rows: Vec<(i64, String, f64, String, String)> = sqlx::query_as(
            "SELECT timestamp, token, price, currency, source FROM Market
             WHERE token = ? ORDER BY timestamp",
        )
        .bind(token)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(timestamp, token, price, currency, source)| PriceRow {
                timestamp,
                token,
                price,
                currency,
                source,
            })
            .collect())
    }

    /// Total row count (diagnostics and dedup reporting).
    pub async fn row_count(&self) -> Result<i64, CoreError> {
        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM Market")
            .fetch_one(&self.pool)
            .await?;
        Ok(row.0)
    }

    // ── Administrative cleanup ──────────────────────────────────────

    /// Remove zero-price rows for a token. Permitted for delisted tokens
    /// only: a zero price on a listed token may be a real airdrop leg or a
    /// provider error under investigation, and deleting it would destroy
    /// evidence. Returns the number of rows removed.
    pub async fn purge_zero_prices(&self, token: &str) -> Result<u64, CoreError> {
        let status: Option<(String,)> =
            sqlx::query_as("SELECT status FROM TokenMetadata WHERE token = ?")
                .bind(token)
                .fetch_optional(&self.pool)
                .await?;
        let delisted = status
            .and_then(|(s,)| TokenStatus::parse(&s))
            .map(|s| s == TokenStatus::Delisted)
            .unwrap_or(false);
        if !delisted {
            return Err(CoreError::InvariantViolation(format!(
                "zero-price cleanup is restricted to delisted tokens; {token} is not delisted"
            )));
        }

        let mut tx = self.pool.begin().await?;
        let result = sqlx::query("DELETE FROM Market WHERE token = ? AND price = 0.0")
            .bind(token)
            .execute(&mut *tx)
            .await?;
        tx.commit().await?;
        info!(token, removed = result.rows_affected(), "purged zero-price rows");
        Ok(result.rows_affected())
    }
}
