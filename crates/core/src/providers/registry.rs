use std::sync::Arc;
use std::time::Duration;

use super::coinmarketcap::CoinMarketCapProvider;
use super::market_api::MarketApiProvider;
use super::ratesdb::RatesDbProvider;
use super::traits::{FiatRateSource, HistoryPriceSource, SpotPriceSource};
use crate::models::config::TrackerConfig;

/// Registry of all configured price/rate sources.
///
/// Sources are ordered by registration: the first entry is the primary, the
/// rest are fallbacks tried in order when the primary fails. New providers
/// can be added without touching existing code.
pub struct SourceRegistry {
    spot: Vec<Arc<dyn SpotPriceSource>>,
    history: Vec<Arc<dyn HistoryPriceSource>>,
    fiat: Vec<Arc<dyn FiatRateSource>>,
}

impl SourceRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self {
            spot: Vec::new(),
            history: Vec::new(),
            fiat: Vec::new(),
        }
    }

    /// Create a registry with all default providers wired from the config.
    pub fn new_with_defaults(config: &TrackerConfig) -> Self {
        Self::with_market_api(config).0
    }

    /// Like [`new_with_defaults`](Self::new_with_defaults), but also hands
    /// back the concrete market-api client for callers that need its
    /// catalog endpoint.
    pub fn with_market_api(config: &TrackerConfig) -> (Self, Arc<MarketApiProvider>) {
        let mut registry = Self::new();

        // CoinMarketCap — live quotes, requires an API key
        if let Some(key) = &config.quote_api_key {
            let cmc = Arc::new(CoinMarketCapProvider::new(key.clone()));
            registry.register_spot(cmc.clone());
            registry.register_fiat(cmc);
        }

        // Market history service — historical series + current fiat rate
        let market_api = Arc::new(MarketApiProvider::new(
            config.market_api_url.clone(),
            config.market_api_key.clone(),
        ));
        registry.register_history(market_api.clone());
        registry.register_fiat(market_api.clone());

        // ratesdb — rate-limited fallback, the only historical fiat source
        registry.register_fiat(Arc::new(RatesDbProvider::new(Duration::from_secs(
            config.rate_limit_delay_secs,
        ))));

        (registry, market_api)
    }

    pub fn register_spot(&mut self, source: Arc<dyn SpotPriceSource>) {
        self.spot.push(source);
    }

    pub fn register_history(&mut self, source: Arc<dyn HistoryPriceSource>) {
        self.history.push(source);
    }

    pub fn register_fiat(&mut self, source: Arc<dyn FiatRateSource>) {
        self.fiat.push(source);
    }

    /// All spot sources in fallback order.
    pub fn spot_sources(&self) -> &[Arc<dyn SpotPriceSource>] {
        &self.spot
    }

    /// All history sources in fallback order.
    pub fn history_sources(&self) -> &[Arc<dyn HistoryPriceSource>] {
        &self.history
    }

    /// All fiat-rate sources in fallback order.
    pub fn fiat_sources(&self) -> &[Arc<dyn FiatRateSource>] {
        &self.fiat
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::new()
    }
}
