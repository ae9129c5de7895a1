use async_trait::async_trait;
use chrono::{DateTime, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

use super::traits::{FiatRateSource, HistoryPriceSource};
use crate::errors::CoreError;
use crate::models::config::FiatPair;
use crate::models::price::PricePoint;

const API_KEY_HEADER: &str = "X-API-KEY";

/// Client for the self-hosted market-history service.
///
/// - **Coverage**: per-token price history (addressed by the service's
///   numeric token id), latest fiat rate, coin catalog.
/// - **Pagination**: history responses carry a `next` cursor; pages are
///   followed transparently until exhaustion and surfaced to callers as one
///   continuous ordered series.
/// - The service may return pages in arbitrary order — results are sorted
///   defensively before being returned.
pub struct MarketApiProvider {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl MarketApiProvider {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let builder = Client::builder().timeout(Duration::from_secs(30));
        Self {
            client: builder.build().unwrap_or_else(|_| Client::new()),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            api_key,
        }
    }

    fn get(&self, path: &str) -> reqwest::RequestBuilder {
        let mut req = self.client.get(format!("{}{path}", self.base_url));
        if let Some(key) = &self.api_key {
            req = req.header(API_KEY_HEADER, key.as_str());
        }
        req
    }

    /// One page of history. Exposed for the transparent cursor loop below.
    async fn history_page(
        &self,
        provider_id: i64,
        from: i64,
        to: i64,
        cursor: Option<&str>,
    ) -> Result<HistoryPage, CoreError> {
        let mut req = self
            .get(&format!("/api/v1/crypto/{provider_id}/history"))
            .query(&[("from", from.to_string()), ("to", to.to_string())]);
        if let Some(c) = cursor {
            req = req.query(&[("cursor", c)]);
        }
        let page: HistoryPage = req
            .send()
            .await?
            .json()
            .await
            .map_err(|e| CoreError::Api {
                provider: "MarketApi".into(),
                message: format!("Failed to parse history page for id {provider_id}: {e}"),
            })?;
        Ok(page)
    }

    /// Coin catalog: the service's numeric ids with symbols and names.
    /// Feeds the Token Lifecycle Store's symbol → id mapping.
    pub async fn coins(&self) -> Result<Vec<CoinEntry>, CoreError> {
        let coins: Vec<CoinEntry> = self
            .get("/api/v1/coins")
            .send()
            .await?
            .json()
            .await
            .map_err(|e| CoreError::Api {
                provider: "MarketApi".into(),
                message: format!("Failed to parse coin catalog: {e}"),
            })?;
        Ok(coins)
    }
}

// ── Market API response types ───────────────────────────────────────

#[derive(Deserialize)]
struct HistoryPage {
    data: Vec<HistoryEntry>,
    next: Option<String>,
}

#[derive(Deserialize)]
struct HistoryEntry {
    timestamp: i64,
    price: f64,
}

#[derive(Deserialize)]
struct FiatLatestEntry {
    date: DateTime<Utc>,
    rate: f64,
}

/// One row of the coin catalog.
#[derive(Debug, Clone, Deserialize)]
pub struct CoinEntry {
    pub id: i64,
    pub symbol: String,
    pub name: Option<String>,
}

#[async_trait]
impl HistoryPriceSource for MarketApiProvider {
    fn name(&self) -> &str {
        "MarketApi"
    }

    async fn history(
        &self,
        provider_id: i64,
        from: i64,
        to: i64,
    ) -> Result<Vec<PricePoint>, CoreError> {
        let mut points: Vec<PricePoint> = Vec::new();
        let mut cursor: Option<String> = None;
        let mut pages = 0usize;

        loop {
            let page = self
                .history_page(provider_id, from, to, cursor.as_deref())
                .await?;
            pages += 1;
            points.extend(
                page.data
                    .iter()
                    .map(|e| PricePoint { timestamp: e.timestamp, price: e.price }),
            );
            match page.next {
                // A cursor that does not advance would loop forever.
                Some(next) if cursor.as_deref() == Some(next.as_str()) => {
                    return Err(CoreError::Api {
                        provider: "MarketApi".into(),
                        message: format!("history cursor did not advance (id {provider_id})"),
                    });
                }
                Some(next) => cursor = Some(next),
                None => break,
            }
        }

        // Never trust provider-side ordering.
        points.sort_by_key(|p| p.timestamp);
        debug!(provider_id, pages, points = points.len(), "history fetched");
        Ok(points)
    }
}

#[async_trait]
impl FiatRateSource for MarketApiProvider {
    fn name(&self) -> &str {
        "MarketApi"
    }

    async fn current_rate(&self, pair: &FiatPair) -> Result<f64, CoreError> {
        let entries: Vec<FiatLatestEntry> = self
            .get("/api/v1/fiat/latest")
            .query(&[("base", pair.base.as_str()), ("quote", pair.quote.as_str())])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| CoreError::Api {
                provider: "MarketApi".into(),
                message: format!("Failed to parse fiat/latest response: {e}"),
            })?;

        // The service returns an ordered list; the last entry is freshest.
        match entries.last() {
            Some(entry) => {
                debug!(pair = %pair, rate = entry.rate, date = %entry.date, "fiat latest rate");
                Ok(entry.rate)
            }
            None => {
                warn!(pair = %pair, "fiat/latest returned no data");
                Err(CoreError::Api {
                    provider: "MarketApi".into(),
                    message: format!("No fiat data available for {pair}"),
                })
            }
        }
    }

    async fn historical_rate(&self, pair: &FiatPair, date: NaiveDate) -> Result<f64, CoreError> {
        // The service only exposes current fiat rates; historical dates are
        // served by the fallback provider.
        Err(CoreError::RateUnavailable { pair: pair.label(), date })
    }
}
