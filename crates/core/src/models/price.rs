use serde::{Deserialize, Serialize};

/// A single price observation (unix timestamp → price).
///
/// **Note on precision**: prices are `f64` (~15-17 significant decimal
/// digits). Rounding happens at presentation time only — stored
/// intermediates are never rounded.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PricePoint {
    pub timestamp: i64,
    pub price: f64,
}

/// A fully-qualified stored price row: which token, in which currency basis,
/// from which source. A `price` of 0.0 is a legal value (airdrop leg or a
/// documented provider error) — validity is judged against the token's
/// lifecycle record, never against the number alone.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceRow {
    pub timestamp: i64,
    pub token: String,
    pub price: f64,
    /// Currency the price is denominated in (e.g., "USD")
    pub currency: String,
    /// Provider that produced the row (e.g., "coinmarketcap", "import")
    pub source: String,
}

/// How a series conversion obtained its rates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RateFallback {
    /// Every point matched a historical rate at or before its timestamp,
    /// and a later rate bounded the match.
    None,
    /// No historical rate existed for the range; the current rate was
    /// applied uniformly. Accuracy is degraded.
    CurrentRate,
    /// Some points lie beyond the last known historical rate and reuse it
    /// as an unbounded extrapolation. Lists the affected timestamps.
    Stale(Vec<i64>),
}

impl RateFallback {
    pub fn is_degraded(&self) -> bool {
        !matches!(self, RateFallback::None)
    }
}

/// Result of converting a price series between currencies: the converted
/// points plus an explicit record of any accuracy degradation. Callers must
/// inspect `fallback` — a degraded conversion is never silent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeriesConversion {
    pub points: Vec<PricePoint>,
    pub fallback: RateFallback,
}
