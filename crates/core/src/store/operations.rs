use sqlx::{Row, SqlitePool};
use tracing::debug;

use crate::errors::CoreError;
use crate::models::operation::{Operation, OperationKind};

/// Read/write access to the `Operations` log.
///
/// The log is owned by the transaction subsystem; the valuation pipeline
/// consumes it read-only to derive holdings. Operations are immutable once
/// recorded — there is no update-in-place, and deletion is guarded by the
/// airdrop invariant.
#[derive(Debug, Clone)]
pub struct OperationStore {
    pool: SqlitePool,
}

impl OperationStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Record a new operation. Returns the assigned id.
    pub async fn insert(&self, op: &Operation) -> Result<i64, CoreError> {
        let result = sqlx::query(
            "INSERT INTO Operations
             (kind, source_amount, dest_amount, source_unit, dest_unit, timestamp, portfolio)
             VALUES (?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(op.kind.as_str())
        .bind(op.source_amount)
        .bind(op.dest_amount)
        .bind(&op.source_unit)
        .bind(&op.dest_unit)
        .bind(op.timestamp)
        .bind(&op.portfolio)
        .execute(&self.pool)
        .await?;
        Ok(result.last_insert_rowid())
    }

    /// Fetch one operation by id.
    pub async fn get(&self, id: i64) -> Result<Operation, CoreError> {
        let row = sqlx::query(
            "SELECT id, kind, source_amount, dest_amount, source_unit, dest_unit,
                    timestamp, portfolio
             FROM Operations WHERE id = ?",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        match row {
            Some(row) => row_to_operation(&row),
            None => Err(CoreError::NotFound(format!("operation {id}"))),
        }
    }

    /// List operations for a portfolio, optionally filtered by token (either
    /// leg) and timestamp range. Ordered ascending by timestamp — the order
    /// the holdings derivation consumes.
    pub async fn list(
        &self,
        portfolio: &str,
        token_filter: Option<&str>,
        date_range: Option<(i64, i64)>,
    ) -> Result<Vec<Operation>, CoreError> {
        let mut sql = String::from(
            "SELECT id, kind, source_amount, dest_amount, source_unit, dest_unit,
                    timestamp, portfolio
             FROM Operations WHERE portfolio = ?",
        );
        if token_filter.is_some() {
            sql.push_str(" AND (source_unit = ? OR dest_unit = ?)");
        }
        if date_range.is_some() {
            sql.push_str(" AND timestamp >= ? AND timestamp <= ?");
        }
        sql.push_str(" ORDER BY timestamp, id");

        let mut query = sqlx::query(&sql).bind(portfolio);
        if let Some(token) = token_filter {
            query = query.bind(token).bind(token);
        }
        if let Some((from, to)) = date_range {
            query = query.bind(from).bind(to);
        }

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(row_to_operation).collect()
    }

    /// Delete an operation.
    ///
    /// Guarded: an airdrop (buy with zero source amount) must never be
    /// removed by cleanup — the zero-cost leg IS the record that the tokens
    /// were received for free. Attempting it is an `InvariantViolation` and
    /// nothing is written.
    pub async fn delete(&self, id: i64) -> Result<(), CoreError> {
        let op = self.get(id).await?;
        if op.is_airdrop() {
            return Err(CoreError::InvariantViolation(format!(
                "operation {id} is an airdrop ({} {}) and cannot be deleted",
                op.dest_amount, op.dest_unit
            )));
        }
        sqlx::query("DELETE FROM Operations WHERE id = ?")
            .bind(id)
            .execute(&self.pool)
            .await?;
        debug!(id, "operation deleted");
        Ok(())
    }

    /// Distinct token symbols appearing on either leg of a portfolio's
    /// operations. Fiat symbols are included — callers strip them.
    pub async fn distinct_tokens(&self, portfolio: &str) -> Result<Vec<String>, CoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT unit FROM (
                 SELECT source_unit AS unit FROM Operations WHERE portfolio = ?
                 UNION
                 SELECT dest_unit AS unit FROM Operations WHERE portfolio = ?
             ) ORDER BY unit",
        )
        .bind(portfolio)
        .bind(portfolio)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    /// Sum of fiat spent on buys for a portfolio. Airdrops have a zero
    /// source leg and therefore contribute nothing.
    pub async fn sum_invested(&self, portfolio: &str) -> Result<f64, CoreError> {
        let row: (Option<f64>,) = sqlx::query_as(
            "SELECT SUM(source_amount) FROM Operations WHERE portfolio = ? AND kind = 'buy'",
        )
        .bind(portfolio)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.0.unwrap_or(0.0))
    }
}

fn row_to_operation(row: &sqlx::sqlite::SqliteRow) -> Result<Operation, CoreError> {
    let kind_raw: String = row.try_get("kind")?;
    let kind = OperationKind::parse(&kind_raw)
        .ok_or_else(|| CoreError::Database(format!("unknown operation kind '{kind_raw}'")))?;
    Ok(Operation {
        id: row.try_get("id")?,
        kind,
        source_amount: row.try_get("source_amount")?,
        dest_amount: row.try_get("dest_amount")?,
        source_unit: row.try_get("source_unit")?,
        dest_unit: row.try_get("dest_unit")?,
        timestamp: row.try_get("timestamp")?,
        portfolio: row.try_get("portfolio")?,
    })
}
