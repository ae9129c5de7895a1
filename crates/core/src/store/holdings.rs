use sqlx::SqlitePool;

use crate::errors::CoreError;
use crate::models::holding::Holding;

/// Store for the `Holdings` cache table (composite key portfolio + token).
///
/// Rows here are derived data — the operation log is the source of truth —
/// so the only write path replaces a portfolio's rows wholesale inside a
/// transaction.
#[derive(Debug, Clone)]
pub struct HoldingStore {
    pool: SqlitePool,
}

impl HoldingStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// Replace all cached holdings of a portfolio with a fresh recompute.
    pub async fn replace_all(
        &self,
        portfolio: &str,
        holdings: &[Holding],
    ) -> Result<(), CoreError> {
        let mut tx = self.pool.begin().await?;
        sqlx::query("DELETE FROM Holdings WHERE portfolio = ?")
            .bind(portfolio)
            .execute(&mut *tx)
            .await?;
        for h in holdings {
            sqlx::query(
                "INSERT INTO Holdings (portfolio, token, quantity, avg_cost, last_updated)
                 VALUES (?, ?, ?, ?, ?)",
            )
            .bind(&h.portfolio)
            .bind(&h.token)
            .bind(h.quantity)
            .bind(h.avg_cost)
            .bind(h.last_updated)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        Ok(())
    }

    /// Cached holdings of a portfolio, sorted by token.
    pub async fn list(&self, portfolio: &str) -> Result<Vec<Holding>, CoreError> {
        let rows: Vec<(String, String, f64, f64, i64)> = sqlx::query_as(
            "SELECT portfolio, token, quantity, avg_cost, last_updated
             FROM Holdings WHERE portfolio = ? ORDER BY token",
        )
        .bind(portfolio)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(portfolio, token, quantity, avg_cost, last_updated)| Holding {
                portfolio,
                token,
                quantity,
                avg_cost,
                last_updated,
            })
            .collect())
    }
}
