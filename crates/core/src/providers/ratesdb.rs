use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;
use tracing::debug;

use super::traits::FiatRateSource;
use crate::errors::CoreError;
use crate::models::config::FiatPair;

const BASE_URL: &str = "https://free.ratesdb.com/v1";

/// ratesdb.com provider for per-date fiat exchange rates.
///
/// - **Free**: no API key, but rate limited — consecutive requests must be
///   spaced by a minimum delay (default 1 s, configurable).
/// - **Endpoint**: `/rates?from={base}&to={quote}&date={YYYY-MM-DD}`.
/// - Used as the fallback for historical dates the primary services cannot
///   serve; backfilling a long gap issues one request per missing date, so
///   the throttle matters.
pub struct RatesDbProvider {
    client: Client,
    min_delay: Duration,
    /// Completion time of the most recent request; the throttle gate.
    last_request: Mutex<Option<Instant>>,
}

impl RatesDbProvider {
    pub fn new(min_delay: Duration) -> Self {
        let builder = Client::builder().timeout(Duration::from_secs(10));
        Self {
            client: builder.build().unwrap_or_else(|_| Client::new()),
            min_delay,
            last_request: Mutex::new(None),
        }
    }

    /// Enforce the minimum inter-request delay. Holding the lock across the
    /// sleep serializes concurrent callers so bursts cannot slip through.
    async fn throttle(&self) {
        let mut last = self.last_request.lock().await;
        if let Some(at) = *last {
            let elapsed = at.elapsed();
            if elapsed < self.min_delay {
                tokio::time::sleep(self.min_delay - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn fetch_rate(&self, pair: &FiatPair, date: Option<NaiveDate>) -> Result<f64, CoreError> {
        self.throttle().await;

        let mut query: Vec<(&str, String)> = vec![
            ("from", pair.base.clone()),
            ("to", pair.quote.clone()),
        ];
        if let Some(d) = date {
            query.push(("date", d.format("%Y-%m-%d").to_string()));
        }

        let resp: RatesResponse = self
            .client
            .get(format!("{BASE_URL}/rates"))
            .query(&query)
            .send()
            .await?
            .json()
            .await
            .map_err(|e| CoreError::Api {
                provider: "ratesdb".into(),
                message: format!("Failed to parse rates response for {pair}: {e}"),
            })?;

        resp.data
            .rates
            .get(&pair.quote)
            .copied()
            .ok_or_else(|| match date {
                Some(d) => CoreError::RateUnavailable { pair: pair.label(), date: d },
                None => CoreError::Api {
                    provider: "ratesdb".into(),
                    message: format!("No rate found for {pair}"),
                },
            })
    }
}

// ── ratesdb API response types ──────────────────────────────────────

#[derive(Deserialize)]
struct RatesResponse {
    data: RatesData,
}

#[derive(Deserialize)]
struct RatesData {
    rates: HashMap<String, f64>,
}

#[async_trait]
impl FiatRateSource for RatesDbProvider {
    fn name(&self) -> &str {
        "ratesdb"
    }

    async fn current_rate(&self, pair: &FiatPair) -> Result<f64, CoreError> {
        let rate = self.fetch_rate(pair, None).await?;
        debug!(pair = %pair, rate, "current rate fetched");
        Ok(rate)
    }

    async fn historical_rate(&self, pair: &FiatPair, date: NaiveDate) -> Result<f64, CoreError> {
        let rate = self.fetch_rate(pair, Some(date)).await?;
        debug!(pair = %pair, %date, rate, "historical rate fetched");
        Ok(rate)
    }
}
