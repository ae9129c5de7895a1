use serde::{Deserialize, Serialize};

use crate::errors::CoreError;

/// The fiat pair the rate cache natively tracks, as base → quote.
/// A rate of 0.9 for USD→EUR means 1 USD = 0.9 EUR.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FiatPair {
    pub base: String,
    pub quote: String,
}

impl FiatPair {
    pub fn new(base: impl Into<String>, quote: impl Into<String>) -> Self {
        Self {
            base: base.into().to_uppercase(),
            quote: quote.into().to_uppercase(),
        }
    }

    /// Cache key / log label, e.g. "USD/EUR".
    pub fn label(&self) -> String {
        format!("{}/{}", self.base, self.quote)
    }
}

impl std::fmt::Display for FiatPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.base, self.quote)
    }
}

fn default_cache_ttl() -> u64 {
    3600
}

fn default_rate_limit_delay() -> u64 {
    1
}

/// Tracker configuration.
///
/// Every recognized field is enumerated here and validated at load time —
/// there is no dynamic settings dictionary. Unknown currencies, zero TTLs
/// and empty URLs are rejected before any service is built.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Currency all portfolio values are displayed in (e.g., "EUR")
    pub display_currency: String,

    /// Fiat pair tracked by the rate cache, base → quote
    pub fiat_pair: FiatPair,

    /// TTL for current-rate cache entries, seconds
    #[serde(default = "default_cache_ttl")]
    pub cache_ttl_secs: u64,

    /// Minimum delay between consecutive requests to the rate-limited
    /// fallback provider, seconds
    #[serde(default = "default_rate_limit_delay")]
    pub rate_limit_delay_secs: u64,

    /// Base URL of the historical market-data service
    pub market_api_url: String,

    /// API key for the market-data service, if it requires one
    #[serde(default)]
    pub market_api_key: Option<String>,

    /// API key for the live-quote provider
    #[serde(default)]
    pub quote_api_key: Option<String>,

    /// Path to the SQLite database file
    pub db_path: String,

    /// Path to the fiat-rate cache file
    pub cache_file: String,
}

impl TrackerConfig {
    /// Load and validate a configuration from a JSON file.
    pub fn load(path: &str) -> Result<Self, CoreError> {
        let raw = std::fs::read_to_string(path)?;
        let config: TrackerConfig = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    /// Validate all fields. Called by `load`; call it directly when building
    /// a config in code.
    pub fn validate(&self) -> Result<(), CoreError> {
        for code in [
            &self.display_currency,
            &self.fiat_pair.base,
            &self.fiat_pair.quote,
        ] {
            if code.len() != 3 || !code.chars().all(|c| c.is_ascii_uppercase()) {
                return Err(CoreError::Validation(format!(
                    "Invalid currency code '{code}': must be exactly 3 uppercase ASCII letters"
                )));
            }
        }
        if self.fiat_pair.base == self.fiat_pair.quote {
            return Err(CoreError::Validation(format!(
                "Fiat pair base and quote must differ (got {})",
                self.fiat_pair
            )));
        }
        if self.cache_ttl_secs == 0 {
            return Err(CoreError::Validation(
                "cache_ttl_secs must be greater than zero".into(),
            ));
        }
        if self.market_api_url.trim().is_empty() {
            return Err(CoreError::Validation("market_api_url must not be empty".into()));
        }
        if self.db_path.trim().is_empty() {
            return Err(CoreError::Validation("db_path must not be empty".into()));
        }
        Ok(())
    }

    /// True when the symbol is one of the configured fiat currencies rather
    /// than a token.
    pub fn is_fiat(&self, symbol: &str) -> bool {
        symbol == self.fiat_pair.base || symbol == self.fiat_pair.quote
    }
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            display_currency: "EUR".to_string(),
            fiat_pair: FiatPair::new("USD", "EUR"),
            cache_ttl_secs: default_cache_ttl(),
            rate_limit_delay_secs: default_rate_limit_delay(),
            market_api_url: "http://localhost:8080".to_string(),
            market_api_key: None,
            quote_api_key: None,
            db_path: "data/db.sqlite3".to_string(),
            cache_file: "data/fiat_cache.json".to_string(),
        }
    }
}
