use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Duration;
use tracing::warn;

use super::traits::{FiatRateSource, SpotPriceSource};
use crate::errors::CoreError;
use crate::models::config::FiatPair;

const BASE_URL: &str = "https://pro-api.coinmarketcap.com/v2";
const API_KEY_HEADER: &str = "X-CMC_PRO_API_KEY";

/// CoinMarketCap provider for live quotes.
///
/// - **Requires**: API key (free tier available).
/// - **Endpoints**: `/cryptocurrency/quotes/latest` (batch by symbol),
///   `/tools/price-conversion` (fiat cross rate).
/// - Quotes for a whole token batch cost one request; symbols unknown to the
///   provider are absent from the result rather than failing the batch.
pub struct CoinMarketCapProvider {
    client: Client,
    api_key: String,
}

impl CoinMarketCapProvider {
    pub fn new(api_key: String) -> Self {
        let builder = Client::builder().timeout(Duration::from_secs(30));
        Self {
            client: builder.build().unwrap_or_else(|_| Client::new()),
            api_key,
        }
    }
}

// ── CoinMarketCap API response types ────────────────────────────────

#[derive(Deserialize)]
struct QuotesResponse {
    /// symbol → list of matching assets (CMC v2 returns a list per symbol)
    data: HashMap<String, Vec<QuoteEntry>>,
}

#[derive(Deserialize)]
struct QuoteEntry {
    quote: HashMap<String, QuoteValue>,
}

#[derive(Deserialize)]
struct QuoteValue {
    price: Option<f64>,
}

#[derive(Deserialize)]
struct ConversionResponse {
    data: Vec<ConversionEntry>,
}

#[derive(Deserialize)]
struct ConversionEntry {
    quote: HashMap<String, QuoteValue>,
}

#[async_trait]
impl SpotPriceSource for CoinMarketCapProvider {
    fn name(&self) -> &str {
        "CoinMarketCap"
    }

    async fn latest(
        &self,
        symbols: &[String],
        currency: &str,
    ) -> Result<HashMap<String, f64>, CoreError> {
        if symbols.is_empty() {
            return Ok(HashMap::new());
        }
        let joined = symbols.join(",");
        let url = format!("{BASE_URL}/cryptocurrency/quotes/latest");
        let target = currency.to_uppercase();

        let resp: QuotesResponse = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .query(&[("symbol", joined.as_str()), ("convert", target.as_str())])
            .send()
            .await?
            .error_for_status()
            .map_err(|e| CoreError::Api {
                provider: "CoinMarketCap".into(),
                message: format!("quotes/latest failed: {}", e.status().map(|s| s.to_string()).unwrap_or_default()),
            })?
            .json()
            .await
            .map_err(|e| CoreError::Api {
                provider: "CoinMarketCap".into(),
                message: format!("Failed to parse quotes response: {e}"),
            })?;

        let mut prices = HashMap::new();
        for symbol in symbols {
            let upper = symbol.to_uppercase();
            let Some(entries) = resp.data.get(&upper) else {
                warn!(token = %upper, "no quote returned, skipping");
                continue;
            };
            // The first entry is the highest-ranked asset for the symbol;
            // namesake low-rank tokens come later.
            let price = entries
                .first()
                .and_then(|e| e.quote.get(&target))
                .and_then(|q| q.price);
            match price {
                Some(p) => {
                    prices.insert(upper, p);
                }
                None => warn!(token = %upper, "quote entry without price, skipping"),
            }
        }
        Ok(prices)
    }
}

#[async_trait]
impl FiatRateSource for CoinMarketCapProvider {
    fn name(&self) -> &str {
        "CoinMarketCap"
    }

    async fn current_rate(&self, pair: &FiatPair) -> Result<f64, CoreError> {
        let url = format!("{BASE_URL}/tools/price-conversion");
        let resp: ConversionResponse = self
            .client
            .get(&url)
            .header(API_KEY_HEADER, self.api_key.as_str())
            .query(&[
                ("amount", "1"),
                ("symbol", pair.base.as_str()),
                ("convert", pair.quote.as_str()),
            ])
            .send()
            .await?
            .json()
            .await
            .map_err(|e| CoreError::Api {
                provider: "CoinMarketCap".into(),
                message: format!("Failed to parse price-conversion response: {e}"),
            })?;

        resp.data
            .first()
            .and_then(|e| e.quote.get(&pair.quote))
            .and_then(|q| q.price)
            .ok_or_else(|| CoreError::Api {
                provider: "CoinMarketCap".into(),
                message: format!("No conversion rate for {pair}"),
            })
    }

    async fn historical_rate(&self, pair: &FiatPair, date: NaiveDate) -> Result<f64, CoreError> {
        // Historical conversions are a paid CMC tier; the fallback provider
        // covers this path.
        Err(CoreError::RateUnavailable { pair: pair.label(), date })
    }
}
