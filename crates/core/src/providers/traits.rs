use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::HashMap;

use crate::errors::CoreError;
use crate::models::config::FiatPair;
use crate::models::price::PricePoint;

/// Trait boundary for live-quote providers.
///
/// One implementation per external API. If a provider stops working or
/// changes its wire format, only that one implementation is replaced — the
/// rest of the codebase is untouched.
#[async_trait]
pub trait SpotPriceSource: Send + Sync {
    /// Human-readable name of this provider (for logs/errors).
    fn name(&self) -> &str;

    /// Current prices for a batch of symbols, denominated in `currency`.
    /// Symbols the provider does not know are simply absent from the map —
    /// missing entries are not an error for the batch.
    async fn latest(
        &self,
        symbols: &[String],
        currency: &str,
    ) -> Result<HashMap<String, f64>, CoreError>;
}

/// Trait boundary for historical time-series providers.
///
/// Tokens are addressed by the provider's numeric identifier; resolving a
/// local symbol to that id goes through the Token Lifecycle Store before the
/// call.
#[async_trait]
pub trait HistoryPriceSource: Send + Sync {
    fn name(&self) -> &str;

    /// Price series for [from, to]. The adapter follows cursor pagination
    /// transparently until exhaustion and yields one logically continuous
    /// sequence, sorted ascending by timestamp regardless of provider-side
    /// order. Restartable from scratch; not seekable mid-stream.
    async fn history(
        &self,
        provider_id: i64,
        from: i64,
        to: i64,
    ) -> Result<Vec<PricePoint>, CoreError>;
}

/// Trait boundary for fiat exchange-rate providers.
#[async_trait]
pub trait FiatRateSource: Send + Sync {
    fn name(&self) -> &str;

    /// Current rate for the pair (how many quote units per 1 base unit).
    async fn current_rate(&self, pair: &FiatPair) -> Result<f64, CoreError>;

    /// Rate on a specific historical date. Providers without historical data
    /// return `RateUnavailable`.
    async fn historical_rate(&self, pair: &FiatPair, date: NaiveDate) -> Result<f64, CoreError>;
}
