use chrono::Utc;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use tracing::{debug, info, warn};

use crate::errors::CoreError;
use crate::models::config::FiatPair;
use crate::models::holding::Holding;
use crate::models::operation::{Operation, OperationKind};
use crate::models::valuation::{
    SkippedToken, ValuationMatrix, ValuationReport, ValueEntry,
};
use crate::services::currency::CurrencyService;
use crate::services::fiat_cache::FiatRateCache;
use crate::store::holdings::HoldingStore;
use crate::store::operations::OperationStore;
use crate::store::prices::PriceStore;
use crate::store::rates::RateStore;
use crate::store::tokens::TokenStore;
use crate::store::Database;

/// Valuation Aggregator.
///
/// Derives holdings from the operation log, multiplies them into each
/// token's currency-normalized price series, and pivots the resulting
/// long-format table into a wide (timestamp × token) matrix in one pass.
/// Per-token failures are collected, not propagated — a partial result with
/// a visible skip list always beats a silent wrong total.
pub struct ValuationService {
    operations: OperationStore,
    prices: PriceStore,
    rates: RateStore,
    tokens: TokenStore,
    holdings: HoldingStore,
    currency: CurrencyService,
    pair: FiatPair,
    display_currency: String,
}

impl ValuationService {
    pub fn new(db: &Database, pair: FiatPair, display_currency: String) -> Self {
        let pool = db.pool().clone();
        Self {
            operations: OperationStore::new(pool.clone()),
            prices: PriceStore::new(pool.clone()),
            rates: RateStore::new(pool.clone()),
            tokens: TokenStore::new(pool.clone()),
            holdings: HoldingStore::new(pool),
            currency: CurrencyService::new(pair.clone()),
            pair,
            display_currency,
        }
    }

    // ── Wide-format valuation ───────────────────────────────────────

    /// Compute the portfolio's value matrix over [from, to] in the display
    /// currency.
    ///
    /// Pipeline per token: raw price series → currency normalization
    /// (historical as-of rates) → quantity-held walk over the operation log
    /// → long-format (timestamp, token, value) rows. The combined long table
    /// is pivoted once at the end.
    pub async fn compute_series(
        &self,
        cache: &FiatRateCache,
        portfolio: &str,
        from: i64,
        to: i64,
    ) -> Result<ValuationReport, CoreError> {
        let mut skipped = Vec::new();
        let mut degraded = false;

        let units = self.operations.distinct_tokens(portfolio).await?;
        let symbols: Vec<String> = units
            .into_iter()
            .filter(|u| u != &self.pair.base && u != &self.pair.quote)
            .collect();

        let active = self.tokens.filter_active(&symbols).await?;
        for symbol in &symbols {
            if !active.contains(symbol) {
                skipped.push(SkippedToken {
                    token: symbol.clone(),
                    reason: "excluded by lifecycle status".into(),
                });
            }
        }

        let mut long_rows: Vec<ValueEntry> = Vec::new();
        for token in &active {
            let raw = self.prices.history(token, from, to).await?;
            if raw.is_empty() {
                skipped.push(SkippedToken {
                    token: token.clone(),
                    reason: format!("no price data between {from} and {to}"),
                });
                continue;
            }

            let series = if self.display_currency == self.pair.base {
                raw
            } else {
                let conversion = match self
                    .currency
                    .convert_series(&self.rates, cache, &raw, &self.pair.base, &self.display_currency)
                    .await
                {
                    Ok(c) => c,
                    Err(e) => {
                        warn!(token = %token, error = %e, "conversion failed, skipping token");
                        skipped.push(SkippedToken {
                            token: token.clone(),
                            reason: format!("currency conversion failed: {e}"),
                        });
                        continue;
                    }
                };
                degraded |= conversion.fallback.is_degraded();
                conversion.points
            };

            // Walk the operation log alongside the price series: both are
            // sorted, so quantity-held advances in one linear pass.
            let ops = self.operations.list(portfolio, Some(token), None).await?;
            let mut quantity = 0.0;
            let mut op_idx = 0usize;
            for point in &series {
                while op_idx < ops.len() && ops[op_idx].timestamp <= point.timestamp {
                    quantity += ops[op_idx].quantity_delta(token);
                    op_idx += 1;
                }
                long_rows.push(ValueEntry {
                    timestamp: point.timestamp,
                    token: token.clone(),
                    value: point.price * quantity,
                });
            }
        }

        let matrix = pivot(&long_rows);
        let totals = matrix.totals();
        info!(
            portfolio,
            rows = matrix.timestamps.len(),
            tokens = matrix.tokens.len(),
            skipped = skipped.len(),
            "valuation computed"
        );
        Ok(ValuationReport {
            matrix,
            totals,
            currency: self.display_currency.clone(),
            skipped,
            degraded_accuracy: degraded,
        })
    }

    // ── Holdings ────────────────────────────────────────────────────

    /// Token quantities held at a timestamp, derived from the operation log.
    /// Fiat legs are ignored; dust below 1e-12 is dropped.
    pub async fn holdings_at(
        &self,
        portfolio: &str,
        timestamp: i64,
    ) -> Result<HashMap<String, f64>, CoreError> {
        let ops = self.operations.list(portfolio, None, None).await?;
        Ok(derive_quantities(&ops, &self.pair, timestamp))
    }

    /// Recompute the `Holdings` cache rows for a portfolio from scratch and
    /// persist them (single transaction). Returns the fresh rows.
    pub async fn recompute_holdings(&self, portfolio: &str) -> Result<Vec<Holding>, CoreError> {
        let ops = self.operations.list(portfolio, None, None).await?;
        let now = Utc::now().timestamp();
        let quantities = derive_quantities(&ops, &self.pair, now);

        // Average cost: fiat spent on buys divided by units bought. Airdrop
        // buys add units at zero cost and pull the average down — that is
        // the point of recording them.
        let mut invested: HashMap<&str, f64> = HashMap::new();
        let mut bought: HashMap<&str, f64> = HashMap::new();
        for op in &ops {
            if op.kind == OperationKind::Buy {
                *invested.entry(op.dest_unit.as_str()).or_insert(0.0) += op.source_amount;
                *bought.entry(op.dest_unit.as_str()).or_insert(0.0) += op.dest_amount;
            }
        }

        let mut rows: Vec<Holding> = quantities
            .into_iter()
            .map(|(token, quantity)| {
                let units = bought.get(token.as_str()).copied().unwrap_or(0.0);
                let cost = invested.get(token.as_str()).copied().unwrap_or(0.0);
                Holding {
                    portfolio: portfolio.to_string(),
                    token,
                    quantity,
                    avg_cost: if units > 0.0 { cost / units } else { 0.0 },
                    last_updated: now,
                }
            })
            .collect();
        rows.sort_by(|a, b| a.token.cmp(&b.token));

        self.holdings.replace_all(portfolio, &rows).await?;
        debug!(portfolio, tokens = rows.len(), "holdings recomputed");
        Ok(rows)
    }

    /// Total fiat invested into a portfolio (buy source legs; airdrops are
    /// zero-cost and contribute nothing).
    pub async fn invested_total(&self, portfolio: &str) -> Result<f64, CoreError> {
        self.operations.sum_invested(portfolio).await
    }

    /// Current portfolio value in the display currency, from the latest
    /// stored prices. Tokens without any price land in the skip list.
    pub async fn current_value(
        &self,
        cache: &FiatRateCache,
        portfolio: &str,
    ) -> Result<(f64, Vec<SkippedToken>), CoreError> {
        let now = Utc::now().timestamp();
        let quantities = self.holdings_at(portfolio, now).await?;
        let mut total = 0.0;
        let mut skipped = Vec::new();

        for (token, quantity) in quantities {
            match self.prices.latest(&token).await? {
                Some(point) => {
                    let value_base = point.price * quantity;
                    let value = self
                        .currency
                        .convert_spot(cache, value_base, &self.pair.base, &self.display_currency)
                        .await?;
                    total += value;
                }
                None => skipped.push(SkippedToken {
                    token,
                    reason: "no stored price".into(),
                }),
            }
        }
        Ok((total, skipped))
    }

    /// Rate between two tokens at a timestamp — values token-to-token
    /// swaps.
    pub async fn swap_rate(
        &self,
        cache: &FiatRateCache,
        token_from: &str,
        token_to: &str,
        timestamp: i64,
    ) -> Result<f64, CoreError> {
        self.currency
            .cross_convert(&self.prices, &self.rates, cache, token_from, token_to, timestamp)
            .await
    }

    // ── Display-only interpolation ──────────────────────────────────

    /// Linearly interpolated price at a timestamp, from the stored points
    /// straddling it.
    ///
    /// Display only: financial totals use raw stored prices with as-of
    /// matching, never interpolated values.
    pub async fn interpolated_price_at(
        &self,
        token: &str,
        timestamp: i64,
    ) -> Result<Option<f64>, CoreError> {
        let (low, high) = self.prices.surrounding(token, timestamp).await?;
        Ok(match (low, high) {
            (Some(l), Some(h)) => Some(interpolate(
                l.timestamp, l.price, h.timestamp, h.price, timestamp,
            )),
            (Some(l), None) => Some(l.price),
            (None, _) => None,
        })
    }
}

/// Linear time-indexed interpolation between two known points.
pub fn interpolate(t0: i64, v0: f64, t1: i64, v1: f64, t: i64) -> f64 {
    if t1 == t0 {
        return v0;
    }
    let span = (t1 - t0) as f64;
    let offset = (t - t0) as f64;
    v0 + (v1 - v0) * (offset / span)
}

/// Pivot the long-format (timestamp, token, value) table into a wide matrix
/// in a single pass.
///
/// Row and column label sets are collected first, then every entry lands
/// directly in its cell; absent combinations keep the neutral 0.0. Memory is
/// bounded by the output size — there is no intermediate join product. This
/// replaces the iterative pairwise outer-merge, whose intermediate frames
/// grow quadratically with token count.
///
/// Expects at most one entry per (timestamp, token); upstream deduplication
/// guarantees that for stored data.
pub fn pivot(entries: &[ValueEntry]) -> ValuationMatrix {
    if entries.is_empty() {
        return ValuationMatrix::empty();
    }

    let mut timestamp_set: BTreeSet<i64> = BTreeSet::new();
    let mut token_set: BTreeSet<&str> = BTreeSet::new();
    for entry in entries {
        timestamp_set.insert(entry.timestamp);
        token_set.insert(&entry.token);
    }

    let timestamps: Vec<i64> = timestamp_set.into_iter().collect();
    let tokens: Vec<String> = token_set.into_iter().map(String::from).collect();

    let row_index: BTreeMap<i64, usize> = timestamps
        .iter()
        .enumerate()
        .map(|(i, ts)| (*ts, i))
        .collect();
    let col_index: BTreeMap<&str, usize> = tokens
        .iter()
        .enumerate()
        .map(|(i, t)| (t.as_str(), i))
        .collect();

    let mut values = vec![vec![0.0; tokens.len()]; timestamps.len()];
    for entry in entries {
        let row = row_index[&entry.timestamp];
        let col = col_index[entry.token.as_str()];
        values[row][col] = entry.value;
    }

    ValuationMatrix { timestamps, tokens, values }
}

/// Signed quantity per token at `timestamp` from an ordered operation list.
fn derive_quantities(
    ops: &[Operation],
    pair: &FiatPair,
    timestamp: i64,
) -> HashMap<String, f64> {
    let mut quantities: HashMap<String, f64> = HashMap::new();
    for op in ops {
        if op.timestamp > timestamp {
            continue;
        }
        if op.dest_unit != pair.base && op.dest_unit != pair.quote {
            *quantities.entry(op.dest_unit.clone()).or_insert(0.0) += op.dest_amount;
        }
        if op.source_unit != pair.base && op.source_unit != pair.quote {
            *quantities.entry(op.source_unit.clone()).or_insert(0.0) -= op.source_amount;
        }
    }
    quantities.retain(|_, q| q.abs() > 1e-12);
    quantities
}
