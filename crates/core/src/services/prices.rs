use chrono::Utc;
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::sync::Arc;
use tracing::{info, warn};

use crate::errors::CoreError;
use crate::models::config::FiatPair;
use crate::models::price::{PricePoint, PriceRow};
use crate::models::valuation::SkippedToken;
use crate::providers::registry::SourceRegistry;
use crate::store::prices::PriceStore;
use crate::store::tokens::TokenStore;
use crate::store::{Database, DedupTable};

/// Backfill windows are committed one at a time so an interrupted run
/// resumes from the last stored timestamp instead of refetching everything.
const BACKFILL_WINDOW_SECS: i64 = 90 * 86_400;

/// Outcome of one price-update invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateSummary {
    /// Capture timestamp shared by every row of this batch
    pub timestamp: i64,
    /// Tokens that received a fresh price row
    pub updated: Vec<String>,
    /// Tokens that could not be priced, with reasons
    pub skipped: Vec<SkippedToken>,
}

/// Outcome of a historical backfill batch.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackfillSummary {
    /// Rows inserted per token
    pub inserted: Vec<(String, u64)>,
    /// Tokens skipped (unresolved symbol, no provider id, source failure)
    pub skipped: Vec<SkippedToken>,
}

/// Fetches prices from the source registry into the local store.
///
/// Within one invocation the pipeline is strictly sequential:
/// fetch → insert (transaction) → dedup. Callers never observe a
/// partially-deduplicated batch.
pub struct PriceService {
    registry: Arc<SourceRegistry>,
    db: Database,
    prices: PriceStore,
    tokens: TokenStore,
    pair: FiatPair,
}

impl PriceService {
    pub fn new(registry: Arc<SourceRegistry>, db: Database, pair: FiatPair) -> Self {
        let prices = PriceStore::new(db.pool().clone());
        let tokens = TokenStore::new(db.pool().clone());
        Self {
            registry,
            db,
            prices,
            tokens,
            pair,
        }
    }

    // ── Spot updates ────────────────────────────────────────────────

    /// Update current prices for the given tokens plus every token already
    /// known to the store.
    ///
    /// Fiat symbols are stripped (they are rates, not market prices),
    /// non-active tokens are filtered through the lifecycle store, and all
    /// rows of the batch share one capture timestamp. Appends run in a
    /// transaction, `last_update` is recorded, and the Deduplication
    /// Maintainer runs before returning.
    pub async fn update_market(&self, requested: &[String]) -> Result<UpdateSummary, CoreError> {
        // Snapshot before the batch touches the store (no-op in memory).
        let _ = self.db.backup()?;

        let mut universe: BTreeSet<String> = requested.iter().cloned().collect();
        universe.extend(self.prices.tokens().await?);
        universe.retain(|t| t != &self.pair.base && t != &self.pair.quote);

        let symbols: Vec<String> = universe.into_iter().collect();
        let active = self.tokens.filter_active(&symbols).await?;

        let mut skipped: Vec<SkippedToken> = symbols
            .iter()
            .filter(|s| !active.contains(s))
            .map(|s| SkippedToken {
                token: s.clone(),
                reason: "not active (lifecycle status)".into(),
            })
            .collect();

        if active.is_empty() {
            info!("no active tokens to update");
            return Ok(UpdateSummary {
                timestamp: Utc::now().timestamp(),
                updated: Vec::new(),
                skipped,
            });
        }

        let (prices, source_name) = self.fetch_latest(&active).await?;

        // One capture timestamp for the whole batch keeps the pivot rows
        // aligned across tokens.
        let timestamp = Utc::now().timestamp();
        let mut rows = Vec::new();
        let mut updated = Vec::new();
        for symbol in &active {
            match prices.get(symbol) {
                Some(price) => {
                    rows.push(PriceRow {
                        timestamp,
                        token: symbol.clone(),
                        price: *price,
                        currency: self.pair.base.clone(),
                        source: source_name.clone(),
                    });
                    updated.push(symbol.clone());
                }
                None => {
                    warn!(token = %symbol, "no quote in provider response");
                    skipped.push(SkippedToken {
                        token: symbol.clone(),
                        reason: "no quote returned by provider".into(),
                    });
                }
            }
        }

        self.prices.insert_rows(&rows).await?;
        self.db
            .set_meta("last_update", &timestamp.to_string(), "int")
            .await?;
        self.db.drop_duplicates(DedupTable::Market).await?;

        info!(updated = updated.len(), skipped = skipped.len(), "market updated");
        Ok(UpdateSummary { timestamp, updated, skipped })
    }

    /// Fetch latest quotes with fallback across registered spot sources.
    /// Transient network failures are retried once per source before moving
    /// on to the next.
    async fn fetch_latest(
        &self,
        symbols: &[String],
    ) -> Result<(std::collections::HashMap<String, f64>, String), CoreError> {
        let sources = self.registry.spot_sources();
        if sources.is_empty() {
            return Err(CoreError::NoSource("spot prices".into()));
        }

        let mut last_error = None;
        for source in sources {
            let mut result = source.latest(symbols, &self.pair.base).await;
            if matches!(result, Err(CoreError::Network(_))) {
                warn!(source = source.name(), "network failure, retrying once");
                result = source.latest(symbols, &self.pair.base).await;
            }
            match result {
                Ok(prices) => return Ok((prices, source.name().to_string())),
                Err(e) => {
                    warn!(source = source.name(), error = %e, "spot source failed");
                    last_error = Some(CoreError::SourceUnavailable {
                        provider: source.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Err(last_error.unwrap_or_else(|| CoreError::NoSource("spot prices".into())))
    }

    // ── Historical backfill ─────────────────────────────────────────

    /// Backfill one token's history for [from, to].
    ///
    /// The symbol is resolved to the provider's numeric id through the
    /// lifecycle store. Fetching resumes from the last stored timestamp
    /// (checkpoint) and proceeds in bounded windows, each committed in its
    /// own transaction — an interrupted run never refetches committed
    /// windows. Returns the number of rows inserted.
    pub async fn backfill_history(
        &self,
        symbol: &str,
        from: i64,
        to: i64,
    ) -> Result<u64, CoreError> {
        let info = self.tokens.get_info(symbol).await?;
        let provider_id = info.provider_id.ok_or_else(|| {
            CoreError::Validation(format!("{symbol} has no provider id; run catalog sync first"))
        })?;

        let effective_from = match self.prices.last_timestamp_for(symbol).await? {
            Some(last) if last >= from => last + 1,
            _ => from,
        };
        if effective_from > to {
            info!(token = symbol, "backfill already up to date");
            return Ok(0);
        }

        let sources = self.registry.history_sources();
        if sources.is_empty() {
            return Err(CoreError::NoSource("price history".into()));
        }

        let mut inserted = 0u64;
        let mut window_start = effective_from;
        while window_start <= to {
            let window_end = (window_start + BACKFILL_WINDOW_SECS - 1).min(to);
            let points = self
                .fetch_history(provider_id, window_start, window_end)
                .await?;

            let rows: Vec<PriceRow> = points
                .iter()
                .map(|p| PriceRow {
                    timestamp: p.timestamp,
                    token: symbol.to_string(),
                    price: p.price,
                    currency: self.pair.base.clone(),
                    source: "backfill".into(),
                })
                .collect();
            self.prices.insert_rows(&rows).await?;
            inserted += rows.len() as u64;

            window_start = window_end + 1;
        }

        self.db.drop_duplicates(DedupTable::Market).await?;
        info!(token = symbol, inserted, "backfill complete");
        Ok(inserted)
    }

    /// Backfill a batch of tokens. Unresolved symbols are skipped with a
    /// logged omission — one unknown token never aborts the batch.
    pub async fn backfill_all(
        &self,
        symbols: &[String],
        from: i64,
        to: i64,
    ) -> Result<BackfillSummary, CoreError> {
        let mut summary = BackfillSummary {
            inserted: Vec::new(),
            skipped: Vec::new(),
        };
        for symbol in symbols {
            match self.backfill_history(symbol, from, to).await {
                Ok(count) => summary.inserted.push((symbol.clone(), count)),
                Err(e @ (CoreError::NotFound(_) | CoreError::Validation(_))) => {
                    warn!(token = %symbol, error = %e, "skipping backfill");
                    summary.skipped.push(SkippedToken {
                        token: symbol.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e @ CoreError::SourceUnavailable { .. }) => {
                    warn!(token = %symbol, error = %e, "source failed, skipping token");
                    summary.skipped.push(SkippedToken {
                        token: symbol.clone(),
                        reason: e.to_string(),
                    });
                }
                Err(e) => return Err(e),
            }
        }
        Ok(summary)
    }

    async fn fetch_history(
        &self,
        provider_id: i64,
        from: i64,
        to: i64,
    ) -> Result<Vec<PricePoint>, CoreError> {
        let mut last_error = None;
        for source in self.registry.history_sources() {
            let mut result = source.history(provider_id, from, to).await;
            if matches!(result, Err(CoreError::Network(_))) {
                warn!(source = source.name(), "network failure, retrying once");
                result = source.history(provider_id, from, to).await;
            }
            match result {
                Ok(mut points) => {
                    // Adapters sort already; enforce the ordering contract
                    // anyway before rows reach the store.
                    if points.windows(2).any(|w| w[0].timestamp > w[1].timestamp) {
                        points.sort_by_key(|p| p.timestamp);
                    }
                    return Ok(points);
                }
                Err(e) => {
                    warn!(source = source.name(), error = %e, "history source failed");
                    last_error = Some(CoreError::SourceUnavailable {
                        provider: source.name().to_string(),
                        message: e.to_string(),
                    });
                }
            }
        }
        Err(last_error.unwrap_or_else(|| CoreError::NoSource("price history".into())))
    }
}
