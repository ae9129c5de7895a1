use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{Row, SqlitePool};
use std::collections::BTreeSet;
use tracing::debug;

use crate::errors::CoreError;
use crate::models::token::{Token, TokenStatus};

/// Token Lifecycle Store.
///
/// Owns the `TokenMetadata` table exclusively: per-token lifecycle status and
/// the mapping between local symbols and the historical provider's numeric
/// identifiers. No other component writes token metadata.
///
/// Unknown tokens are treated as active — lookups fail open so freshly
/// imported symbols show up immediately — but a token explicitly marked
/// delisted is always excluded from active views.
#[derive(Debug, Clone)]
pub struct TokenStore {
    pool: SqlitePool,
}

impl TokenStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    // ── Predicates ──────────────────────────────────────────────────

    /// True iff the token's stored status is active, or the token has no
    /// metadata record at all (active by default).
    pub async fn is_active(&self, symbol: &str) -> Result<bool, CoreError> {
        Ok(match self.status_of(symbol).await? {
            None => true,
            Some(status) => status == TokenStatus::Active,
        })
    }

    /// True iff the token is explicitly marked delisted.
    pub async fn is_delisted(&self, symbol: &str) -> Result<bool, CoreError> {
        Ok(self.status_of(symbol).await? == Some(TokenStatus::Delisted))
    }

    /// Filter a symbol set down to active tokens. Duplicates are collapsed;
    /// output is sorted for deterministic results.
    pub async fn filter_active(&self, symbols: &[String]) -> Result<Vec<String>, CoreError> {
        let unique: BTreeSet<&String> = symbols.iter().collect();
        let mut active = Vec::with_capacity(unique.len());
        for symbol in unique {
            if self.is_active(symbol).await? {
                active.push(symbol.clone());
            }
        }
        Ok(active)
    }

    // ── Lookups ─────────────────────────────────────────────────────

    /// Full metadata record for a symbol. `NotFound` when no record exists.
    pub async fn get_info(&self, symbol: &str) -> Result<Token, CoreError> {
        let row = sqlx::query(
            "SELECT token, status, delisting_date, last_valid_price_date, notes,
                    provider_id, name, created_at, updated_at
             FROM TokenMetadata WHERE token = ?",
        )
        .bind(symbol)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_token(&row),
            None => Err(CoreError::NotFound(symbol.to_string())),
        }
    }

    /// Metadata record looked up by the historical provider's numeric id.
    pub async fn get_info_by_provider_id(&self, provider_id: i64) -> Result<Token, CoreError> {
        let row = sqlx::query(
            "SELECT token, status, delisting_date, last_valid_price_date, notes,
                    provider_id, name, created_at, updated_at
             FROM TokenMetadata WHERE provider_id = ?",
        )
        .bind(provider_id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(row) => row_to_token(&row),
            None => Err(CoreError::NotFound(format!("provider_id {provider_id}"))),
        }
    }

    /// All symbols with the given status.
    pub async fn tokens_with_status(
        &self,
        status: TokenStatus,
    ) -> Result<Vec<String>, CoreError> {
        let rows: Vec<(String,)> = sqlx::query_as(
            "SELECT DISTINCT token FROM TokenMetadata WHERE status = ? ORDER BY token",
        )
        .bind(status.as_str())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|(t,)| t).collect())
    }

    /// Every metadata record, ordered by status then symbol.
    pub async fn all_metadata(&self) -> Result<Vec<Token>, CoreError> {
        let rows = sqlx::query(
            "SELECT token, status, delisting_date, last_valid_price_date, notes,
                    provider_id, name, created_at, updated_at
             FROM TokenMetadata ORDER BY status, token",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(row_to_token).collect()
    }

    // ── Mutations ───────────────────────────────────────────────────

    /// Insert a token (status active) or update its provider id and display
    /// name.
    ///
    /// On an existing record only `provider_id` and `name` change: `status`,
    /// `delisting_date` and `notes` are preserved. An upsert must never
    /// silently reactivate a delisted token — status changes go through
    /// [`set_status`](Self::set_status) only.
    pub async fn upsert(
        &self,
        symbol: &str,
        provider_id: Option<i64>,
        name: Option<&str>,
    ) -> Result<(), CoreError> {
        let now = Utc::now().timestamp();
        let result = sqlx::query(
            "UPDATE TokenMetadata
             SET provider_id = COALESCE(?, provider_id),
                 name = COALESCE(?, name),
                 updated_at = ?
             WHERE token = ?",
        )
        .bind(provider_id)
        .bind(name)
        .bind(now)
        .bind(symbol)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO TokenMetadata (token, status, provider_id, name, created_at, updated_at)
                 VALUES (?, 'active', ?, ?, ?, ?)",
            )
            .bind(symbol)
            .bind(provider_id)
            .bind(name)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
            debug!(token = symbol, "created token metadata record");
        }
        Ok(())
    }

    /// Explicit status update — the only path that changes lifecycle state.
    /// Optional fields update only when provided; existing values survive.
    pub async fn set_status(
        &self,
        symbol: &str,
        status: TokenStatus,
        delisting_date: Option<NaiveDate>,
        last_valid_price_date: Option<NaiveDate>,
        notes: Option<&str>,
    ) -> Result<(), CoreError> {
        let now = Utc::now().timestamp();
        let delisting_ts = delisting_date.map(date_to_timestamp);
        let last_valid_ts = last_valid_price_date.map(date_to_timestamp);

        let result = sqlx::query(
            "UPDATE TokenMetadata
             SET status = ?,
                 delisting_date = COALESCE(?, delisting_date),
                 last_valid_price_date = COALESCE(?, last_valid_price_date),
                 notes = COALESCE(?, notes),
                 updated_at = ?
             WHERE token = ?",
        )
        .bind(status.as_str())
        .bind(delisting_ts)
        .bind(last_valid_ts)
        .bind(notes)
        .bind(now)
        .bind(symbol)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            sqlx::query(
                "INSERT INTO TokenMetadata
                 (token, status, delisting_date, last_valid_price_date, notes, created_at, updated_at)
                 VALUES (?, ?, ?, ?, ?, ?, ?)",
            )
            .bind(symbol)
            .bind(status.as_str())
            .bind(delisting_ts)
            .bind(last_valid_ts)
            .bind(notes)
            .bind(now)
            .bind(now)
            .execute(&self.pool)
            .await?;
        }
        debug!(token = symbol, status = %status, "token status updated");
        Ok(())
    }

    /// Administrative removal of the metadata record. Price history is NOT
    /// touched — it lives in the `Market` table and survives independently.
    pub async fn delete(&self, symbol: &str) -> Result<bool, CoreError> {
        let result = sqlx::query("DELETE FROM TokenMetadata WHERE token = ?")
            .bind(symbol)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    // ── Internal ────────────────────────────────────────────────────

    async fn status_of(&self, symbol: &str) -> Result<Option<TokenStatus>, CoreError> {
        let row: Option<(String,)> =
            sqlx::query_as("SELECT status FROM TokenMetadata WHERE token = ?")
                .bind(symbol)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.and_then(|(s,)| TokenStatus::parse(&s)))
    }
}

fn date_to_timestamp(date: NaiveDate) -> i64 {
    date.and_hms_opt(0, 0, 0)
        .map(|dt| dt.and_utc().timestamp())
        .unwrap_or_default()
}

fn timestamp_to_date(ts: i64) -> Option<NaiveDate> {
    DateTime::<Utc>::from_timestamp(ts, 0).map(|dt| dt.date_naive())
}

fn row_to_token(row: &sqlx::sqlite::SqliteRow) -> Result<Token, CoreError> {
    let status_raw: String = row.try_get("status")?;
    let status = TokenStatus::parse(&status_raw)
        .ok_or_else(|| CoreError::Database(format!("unknown token status '{status_raw}'")))?;
    Ok(Token {
        symbol: row.try_get("token")?,
        status,
        delisting_date: row
            .try_get::<Option<i64>, _>("delisting_date")?
            .and_then(timestamp_to_date),
        last_valid_price_date: row
            .try_get::<Option<i64>, _>("last_valid_price_date")?
            .and_then(timestamp_to_date),
        notes: row.try_get("notes")?,
        provider_id: row.try_get("provider_id")?,
        name: row.try_get("name")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}
