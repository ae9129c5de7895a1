use tracing::{debug, warn};

use crate::errors::CoreError;
use crate::models::config::FiatPair;
use crate::models::price::{PricePoint, RateFallback, SeriesConversion};
use crate::services::fiat_cache::FiatRateCache;
use crate::store::prices::PriceStore;
use crate::store::rates::RateStore;

/// Which way a conversion runs relative to the cache's native pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Direction {
    /// from → to matches base → quote: multiply by the rate.
    Native,
    /// from → to matches quote → base: divide by the rate.
    Inverse,
}

/// Currency Conversion Engine.
///
/// Converts single prices (current rate) or whole series (historical rates
/// with backward as-of matching) between the two currencies of the
/// configured fiat pair. Token↔token cross rates are derived from a common
/// fiat basis.
///
/// All arithmetic stays in `f64`; rounding is presentation-layer business.
pub struct CurrencyService {
    pair: FiatPair,
}

impl CurrencyService {
    pub fn new(pair: FiatPair) -> Self {
        Self { pair }
    }

    fn direction(&self, from: &str, to: &str) -> Result<Direction, CoreError> {
        if from == self.pair.base && to == self.pair.quote {
            Ok(Direction::Native)
        } else if from == self.pair.quote && to == self.pair.base {
            Ok(Direction::Inverse)
        } else {
            Err(CoreError::Validation(format!(
                "unsupported conversion {from}→{to}: only {} and its inverse are configured",
                self.pair
            )))
        }
    }

    fn apply(direction: Direction, price: f64, rate: f64) -> f64 {
        match direction {
            Direction::Native => price * rate,
            Direction::Inverse => price / rate,
        }
    }

    // ── Spot conversion ─────────────────────────────────────────────

    /// Convert a single amount at the current rate. Identical currencies are
    /// a no-op; anything outside the configured pair is rejected rather than
    /// silently passed through.
    pub async fn convert_spot(
        &self,
        cache: &FiatRateCache,
        price: f64,
        from: &str,
        to: &str,
    ) -> Result<f64, CoreError> {
        if from == to {
            return Ok(price);
        }
        let direction = self.direction(from, to)?;
        let rate = cache.current_rate(&self.pair).await?;
        Ok(Self::apply(direction, price, rate))
    }

    // ── Series conversion (historical, as-of) ───────────────────────

    /// Convert an ordered price series using historical rates.
    ///
    /// The covering rate series is loaded once, then both sorted sequences
    /// are walked in a single merge pass: every price point takes the
    /// nearest rate with timestamp ≤ its own (backward as-of, never a future
    /// rate). This is one linear scan, not a per-point query.
    ///
    /// Degradation is explicit, never silent:
    /// - points with no rate of their own at-or-after (stale tail) or
    ///   at-or-before (before first fixing) their timestamp reuse the
    ///   nearest known rate and are listed in `RateFallback::Stale`;
    /// - with no historical rate in range at all, the current rate applies
    ///   uniformly and the result carries `RateFallback::CurrentRate`.
    pub async fn convert_series(
        &self,
        rate_store: &RateStore,
        cache: &FiatRateCache,
        series: &[PricePoint],
        from: &str,
        to: &str,
    ) -> Result<SeriesConversion, CoreError> {
        if series.is_empty() || from == to {
            return Ok(SeriesConversion {
                points: series.to_vec(),
                fallback: RateFallback::None,
            });
        }
        let direction = self.direction(from, to)?;

        let first_ts = series.first().map(|p| p.timestamp).unwrap_or_default();
        let last_ts = series.last().map(|p| p.timestamp).unwrap_or_default();

        // Rates inside the range, plus the one fixing just before it so the
        // leading points have an as-of match.
        let mut rates = Vec::new();
        if let Some(prior) = rate_store.rate_at(&self.pair, first_ts).await? {
            rates.push(prior);
        }
        for rate in rate_store.range(&self.pair, first_ts, last_ts).await? {
            if rates.last().map(|r: &PricePoint| r.timestamp) != Some(rate.timestamp) {
                rates.push(rate);
            }
        }

        if rates.is_empty() {
            // No historical data for the whole range: fall back to the
            // current rate, uniformly, and say so.
            let rate = cache.current_rate(&self.pair).await?;
            warn!(pair = %self.pair, from, to,
                  "no historical rates for range, converting with current rate");
            let points = series
                .iter()
                .map(|p| PricePoint {
                    timestamp: p.timestamp,
                    price: Self::apply(direction, p.price, rate),
                })
                .collect();
            return Ok(SeriesConversion {
                points,
                fallback: RateFallback::CurrentRate,
            });
        }

        let last_rate_ts = rates.last().map(|r| r.timestamp).unwrap_or_default();
        let first_rate_ts = rates.first().map(|r| r.timestamp).unwrap_or_default();

        let mut points = Vec::with_capacity(series.len());
        let mut stale = Vec::new();
        let mut idx = 0usize;

        for point in series {
            while idx + 1 < rates.len() && rates[idx + 1].timestamp <= point.timestamp {
                idx += 1;
            }
            let rate = rates[idx].price;
            if point.timestamp > last_rate_ts || point.timestamp < first_rate_ts {
                stale.push(point.timestamp);
            }
            points.push(PricePoint {
                timestamp: point.timestamp,
                price: Self::apply(direction, point.price, rate),
            });
        }

        let fallback = if stale.is_empty() {
            RateFallback::None
        } else {
            warn!(pair = %self.pair, count = stale.len(),
                  "series conversion reused boundary rates for uncovered points");
            RateFallback::Stale(stale)
        };

        debug!(pair = %self.pair, points = points.len(), rates = rates.len(),
               "series converted");
        Ok(SeriesConversion { points, fallback })
    }

    // ── Cross rates ─────────────────────────────────────────────────

    /// Rate between two tokens at a timestamp: price(from) / price(to) in
    /// the common fiat basis (the pair's base currency). Values
    /// token-to-token swaps. Fiat legs resolve through the rate store — the
    /// base currency is 1.0 by definition.
    pub async fn cross_convert(
        &self,
        price_store: &PriceStore,
        rate_store: &RateStore,
        cache: &FiatRateCache,
        token_from: &str,
        token_to: &str,
        timestamp: i64,
    ) -> Result<f64, CoreError> {
        let price_from = self
            .price_in_base(price_store, rate_store, cache, token_from, timestamp)
            .await?;
        let price_to = self
            .price_in_base(price_store, rate_store, cache, token_to, timestamp)
            .await?;
        if price_to == 0.0 {
            return Err(CoreError::Validation(format!(
                "cannot derive {token_from}/{token_to} rate: {token_to} price is zero"
            )));
        }
        let rate = price_from / price_to;
        debug!(token_from, token_to, timestamp, rate, "cross rate");
        Ok(rate)
    }

    /// Price of a unit (token or fiat) in the pair's base currency at a
    /// timestamp, by nearest-prior lookup.
    async fn price_in_base(
        &self,
        price_store: &PriceStore,
        rate_store: &RateStore,
        cache: &FiatRateCache,
        unit: &str,
        timestamp: i64,
    ) -> Result<f64, CoreError> {
        if unit == self.pair.base {
            return Ok(1.0);
        }
        if unit == self.pair.quote {
            // 1 quote = 1/rate base units.
            let rate = match rate_store.rate_at(&self.pair, timestamp).await? {
                Some(point) => point.price,
                None => {
                    warn!(pair = %self.pair, timestamp,
                          "no historical rate at timestamp, using current rate");
                    cache.current_rate(&self.pair).await?
                }
            };
            if rate == 0.0 {
                return Err(CoreError::Validation(format!(
                    "zero {} rate at {timestamp}",
                    self.pair
                )));
            }
            return Ok(1.0 / rate);
        }
        match price_store.price_at(unit, timestamp).await? {
            Some(point) => Ok(point.price),
            None => Err(CoreError::PriceNotAvailable {
                token: unit.to_string(),
                timestamp,
            }),
        }
    }
}
