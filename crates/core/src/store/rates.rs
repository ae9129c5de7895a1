use chrono::NaiveDate;
use sqlx::SqlitePool;

use crate::errors::CoreError;
use crate::models::config::FiatPair;
use crate::models::price::PricePoint;

/// Store for historical fiat rates (`Currency` table).
///
/// Historical entries are immutable once fetched and never expire — only the
/// current rate lives in the TTL cache file. Rows are keyed by (timestamp,
/// pair) and deduplicated by the shared maintainer.
#[derive(Debug, Clone)]
pub struct RateStore {
    pool: SqlitePool,
}

impl RateStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub async fn insert(&self, timestamp: i64, pair: &FiatPair, rate: f64) -> Result<(), CoreError> {
        sqlx::query("INSERT INTO Currency (timestamp, pair, rate) VALUES (?, ?, ?)")
            .bind(timestamp)
            .bind(pair.label())
            .bind(rate)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    /// Rate series for a pair within [from, to], ascending by timestamp.
    /// This is the input to the single-pass as-of join in series conversion.
    pub async fn range(
        &self,
        pair: &FiatPair,
        from: i64,
        to: i64,
    ) -> Result<Vec<PricePoint>, CoreError> {
        let rows: Vec<(i64, f64)> = sqlx::query_as(
            "SELECT timestamp, rate FROM Currency
             WHERE pair = ? AND timestamp >= ? AND timestamp <= ?
             ORDER BY timestamp",
        )
        .bind(pair.label())
        .bind(from)
        .bind(to)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(timestamp, price)| PricePoint { timestamp, price })
            .collect())
    }

    /// Nearest rate at or before `timestamp`.
    pub async fn rate_at(
        &self,
        pair: &FiatPair,
        timestamp: i64,
    ) -> Result<Option<PricePoint>, CoreError> {
        let row: Option<(i64, f64)> = sqlx::query_as(
            "SELECT timestamp, rate FROM Currency
             WHERE pair = ? AND timestamp <= ?
             ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(pair.label())
        .bind(timestamp)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(timestamp, price)| PricePoint { timestamp, price }))
    }

    /// Any stored rate falling on the given UTC calendar date.
    pub async fn rate_on_date(
        &self,
        pair: &FiatPair,
        date: NaiveDate,
    ) -> Result<Option<f64>, CoreError> {
        let day_start = date
            .and_hms_opt(0, 0, 0)
            .map(|dt| dt.and_utc().timestamp())
            .unwrap_or_default();
        let day_end = day_start + 86_400;
        let row: Option<(f64,)> = sqlx::query_as(
            "SELECT rate FROM Currency
             WHERE pair = ? AND timestamp >= ? AND timestamp < ?
             ORDER BY timestamp LIMIT 1",
        )
        .bind(pair.label())
        .bind(day_start)
        .bind(day_end)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(r,)| r))
    }

    /// Most recent stored rate for a pair.
    pub async fn latest(&self, pair: &FiatPair) -> Result<Option<PricePoint>, CoreError> {
        let row: Option<(i64, f64)> = sqlx::query_as(
            "SELECT timestamp, rate FROM Currency
             WHERE pair = ? ORDER BY timestamp DESC LIMIT 1",
        )
        .bind(pair.label())
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|(timestamp, price)| PricePoint { timestamp, price }))
    }
}
