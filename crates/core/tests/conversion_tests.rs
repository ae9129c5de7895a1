// ═══════════════════════════════════════════════════════════════════
// Conversion Tests — CurrencyService spot/series/cross conversion,
// FiatRateCache TTL + fallback behavior
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::NaiveDate;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use cryptofolio_core::errors::CoreError;
use cryptofolio_core::models::config::FiatPair;
use cryptofolio_core::models::price::{PricePoint, RateFallback, PriceRow};
use cryptofolio_core::providers::traits::FiatRateSource;
use cryptofolio_core::services::currency::CurrencyService;
use cryptofolio_core::services::fiat_cache::FiatRateCache;
use cryptofolio_core::store::prices::PriceStore;
use cryptofolio_core::store::rates::RateStore;
use cryptofolio_core::store::Database;

// ═══════════════════════════════════════════════════════════════════
// Mock fiat-rate sources
// ═══════════════════════════════════════════════════════════════════

/// Fixed-rate source that counts how often it is queried.
struct MockFiatSource {
    rate: f64,
    current_calls: AtomicUsize,
    historical_calls: AtomicUsize,
    /// When true, every call fails (for fallback tests).
    failing: bool,
}

impl MockFiatSource {
    fn new(rate: f64) -> Arc<Self> {
        Arc::new(Self {
            rate,
            current_calls: AtomicUsize::new(0),
            historical_calls: AtomicUsize::new(0),
            failing: false,
        })
    }

    fn failing() -> Arc<Self> {
        Arc::new(Self {
            rate: 0.0,
            current_calls: AtomicUsize::new(0),
            historical_calls: AtomicUsize::new(0),
            failing: true,
        })
    }
}

#[async_trait]
impl FiatRateSource for MockFiatSource {
    fn name(&self) -> &str {
        "MockFiat"
    }

    async fn current_rate(&self, pair: &FiatPair) -> Result<f64, CoreError> {
        self.current_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(CoreError::SourceUnavailable {
                provider: "MockFiat".into(),
                message: format!("simulated failure for {pair}"),
            });
        }
        Ok(self.rate)
    }

    async fn historical_rate(&self, pair: &FiatPair, date: NaiveDate) -> Result<f64, CoreError> {
        self.historical_calls.fetch_add(1, Ordering::SeqCst);
        if self.failing {
            return Err(CoreError::RateUnavailable { pair: pair.label(), date });
        }
        Ok(self.rate)
    }
}

fn pair() -> FiatPair {
    FiatPair::new("USD", "EUR")
}

fn as_sources(mocks: Vec<Arc<MockFiatSource>>) -> Vec<Arc<dyn FiatRateSource>> {
    mocks
        .into_iter()
        .map(|m| m as Arc<dyn FiatRateSource>)
        .collect()
}

async fn setup(
    sources: Vec<Arc<MockFiatSource>>,
    ttl_secs: u64,
) -> (Database, RateStore, FiatRateCache, tempfile::TempDir) {
    let db = Database::open_in_memory().await.unwrap();
    let rates = RateStore::new(db.pool().clone());
    let dir = tempfile::tempdir().unwrap();
    let cache = FiatRateCache::new(
        dir.path().join("fiat_cache.json"),
        ttl_secs,
        rates.clone(),
        as_sources(sources),
    );
    (db, rates, cache, dir)
}

// ═══════════════════════════════════════════════════════════════════
// Spot conversion
// ═══════════════════════════════════════════════════════════════════

mod spot {
    use super::*;

    #[tokio::test]
    async fn same_currency_is_identity() {
        let (_db, _rates, cache, _dir) = setup(vec![MockFiatSource::new(0.9)], 3600).await;
        let svc = CurrencyService::new(pair());
        let out = svc.convert_spot(&cache, 123.45, "USD", "USD").await.unwrap();
        assert_eq!(out, 123.45);
    }

    #[tokio::test]
    async fn native_direction_multiplies_inverse_divides() {
        let (_db, _rates, cache, _dir) = setup(vec![MockFiatSource::new(0.9)], 3600).await;
        let svc = CurrencyService::new(pair());

        let eur = svc.convert_spot(&cache, 100.0, "USD", "EUR").await.unwrap();
        assert!((eur - 90.0).abs() < 1e-9);

        let usd = svc.convert_spot(&cache, 90.0, "EUR", "USD").await.unwrap();
        assert!((usd - 100.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn round_trip_recovers_the_input() {
        let (_db, _rates, cache, _dir) = setup(vec![MockFiatSource::new(0.8563)], 3600).await;
        let svc = CurrencyService::new(pair());

        for x in [0.01, 1.0, 99.99, 50_000.0, 1.23e9] {
            let there = svc.convert_spot(&cache, x, "USD", "EUR").await.unwrap();
            let back = svc.convert_spot(&cache, there, "EUR", "USD").await.unwrap();
            assert!((back - x).abs() / x < 1e-12, "round trip drifted for {x}");
        }
    }

    #[tokio::test]
    async fn unsupported_pair_is_rejected() {
        let (_db, _rates, cache, _dir) = setup(vec![MockFiatSource::new(0.9)], 3600).await;
        let svc = CurrencyService::new(pair());
        let err = svc.convert_spot(&cache, 1.0, "USD", "GBP").await.unwrap_err();
        assert!(matches!(err, CoreError::Validation(_)));
    }
}

// ═══════════════════════════════════════════════════════════════════
// Series conversion (as-of)
// ═══════════════════════════════════════════════════════════════════

mod series {
    use super::*;

    #[tokio::test]
    async fn single_early_rate_applies_to_all_and_flags_stale_tail() {
        let (_db, rates, cache, _dir) = setup(vec![MockFiatSource::new(0.5)], 3600).await;
        let svc = CurrencyService::new(pair());

        let t1 = 1_000;
        let t2 = 2_000;
        rates.insert(t1, &pair(), 0.9).await.unwrap();

        let series = [
            PricePoint { timestamp: t1, price: 100.0 },
            PricePoint { timestamp: t2, price: 110.0 },
        ];
        let out = svc
            .convert_series(&rates, &cache, &series, "USD", "EUR")
            .await
            .unwrap();

        // Both points take the t1 rate (backward as-of)
        assert!((out.points[0].price - 90.0).abs() < 1e-9);
        assert!((out.points[1].price - 99.0).abs() < 1e-9);
        // t2 has no rate at-or-after it: degraded, visibly
        assert_eq!(out.fallback, RateFallback::Stale(vec![t2]));
        assert!(out.fallback.is_degraded());
    }

    #[tokio::test]
    async fn fully_covered_series_is_not_degraded() {
        let (_db, rates, cache, _dir) = setup(vec![MockFiatSource::new(0.5)], 3600).await;
        let svc = CurrencyService::new(pair());

        rates.insert(1_000, &pair(), 0.9).await.unwrap();
        rates.insert(2_000, &pair(), 0.8).await.unwrap();

        let series = [
            PricePoint { timestamp: 1_000, price: 100.0 },
            PricePoint { timestamp: 1_500, price: 100.0 },
            PricePoint { timestamp: 2_000, price: 100.0 },
        ];
        let out = svc
            .convert_series(&rates, &cache, &series, "USD", "EUR")
            .await
            .unwrap();

        assert_eq!(out.fallback, RateFallback::None);
        assert!((out.points[0].price - 90.0).abs() < 1e-9);
        // Mid point uses the prior rate, never the future one
        assert!((out.points[1].price - 90.0).abs() < 1e-9);
        assert!((out.points[2].price - 80.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn no_rates_at_all_falls_back_to_current_rate() {
        let source = MockFiatSource::new(0.5);
        let (_db, rates, cache, _dir) = setup(vec![source.clone()], 3600).await;
        let svc = CurrencyService::new(pair());

        let series = [
            PricePoint { timestamp: 1_000, price: 100.0 },
            PricePoint { timestamp: 2_000, price: 200.0 },
        ];
        let out = svc
            .convert_series(&rates, &cache, &series, "USD", "EUR")
            .await
            .unwrap();

        assert_eq!(out.fallback, RateFallback::CurrentRate);
        assert!((out.points[0].price - 50.0).abs() < 1e-9);
        assert!((out.points[1].price - 100.0).abs() < 1e-9);
        assert_eq!(source.current_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn empty_series_is_a_no_op() {
        let (_db, rates, cache, _dir) = setup(vec![MockFiatSource::new(0.5)], 3600).await;
        let svc = CurrencyService::new(pair());
        let out = svc
            .convert_series(&rates, &cache, &[], "USD", "EUR")
            .await
            .unwrap();
        assert!(out.points.is_empty());
        assert_eq!(out.fallback, RateFallback::None);
    }

    #[tokio::test]
    async fn prior_rate_just_before_the_range_is_used() {
        let (_db, rates, cache, _dir) = setup(vec![MockFiatSource::new(0.5)], 3600).await;
        let svc = CurrencyService::new(pair());

        // Rate fixed before the first price point
        rates.insert(500, &pair(), 0.9).await.unwrap();
        rates.insert(1_500, &pair(), 0.8).await.unwrap();

        let series = [
            PricePoint { timestamp: 1_000, price: 100.0 },
            PricePoint { timestamp: 1_500, price: 100.0 },
        ];
        let out = svc
            .convert_series(&rates, &cache, &series, "USD", "EUR")
            .await
            .unwrap();

        assert_eq!(out.fallback, RateFallback::None);
        assert!((out.points[0].price - 90.0).abs() < 1e-9);
        assert!((out.points[1].price - 80.0).abs() < 1e-9);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Cross conversion
// ═══════════════════════════════════════════════════════════════════

mod cross {
    use super::*;

    #[tokio::test]
    async fn token_to_token_rate_from_common_basis() {
        let (db, rates, cache, _dir) = setup(vec![MockFiatSource::new(0.9)], 3600).await;
        let prices = PriceStore::new(db.pool().clone());
        let svc = CurrencyService::new(pair());

        prices
            .insert_rows(&[
                PriceRow {
                    timestamp: 1_000,
                    token: "BTC".into(),
                    price: 50_000.0,
                    currency: "USD".into(),
                    source: "test".into(),
                },
                PriceRow {
                    timestamp: 1_000,
                    token: "ETH".into(),
                    price: 2_500.0,
                    currency: "USD".into(),
                    source: "test".into(),
                },
            ])
            .await
            .unwrap();

        let rate = svc
            .cross_convert(&prices, &rates, &cache, "BTC", "ETH", 1_500)
            .await
            .unwrap();
        assert!((rate - 20.0).abs() < 1e-9);
    }

    #[tokio::test]
    async fn missing_price_surfaces_as_price_not_available() {
        let (db, rates, cache, _dir) = setup(vec![MockFiatSource::new(0.9)], 3600).await;
        let prices = PriceStore::new(db.pool().clone());
        let svc = CurrencyService::new(pair());

        let err = svc
            .cross_convert(&prices, &rates, &cache, "BTC", "ETH", 1_000)
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::PriceNotAvailable { .. }));
    }

    #[tokio::test]
    async fn fiat_leg_resolves_through_rate_store() {
        let (db, rates, cache, _dir) = setup(vec![MockFiatSource::new(0.9)], 3600).await;
        let prices = PriceStore::new(db.pool().clone());
        let svc = CurrencyService::new(pair());

        rates.insert(900, &pair(), 0.8).await.unwrap();
        prices
            .insert_rows(&[PriceRow {
                timestamp: 1_000,
                token: "BTC".into(),
                price: 40_000.0,
                currency: "USD".into(),
                source: "test".into(),
            }])
            .await
            .unwrap();

        // 1 EUR = 1/0.8 USD = 1.25 USD → BTC/EUR = 40000 / 1.25 = 32000
        let rate = svc
            .cross_convert(&prices, &rates, &cache, "BTC", "EUR", 1_000)
            .await
            .unwrap();
        assert!((rate - 32_000.0).abs() < 1e-6);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Fiat Rate Cache
// ═══════════════════════════════════════════════════════════════════

mod fiat_cache {
    use super::*;

    #[tokio::test]
    async fn fresh_entry_short_circuits_the_provider() {
        let source = MockFiatSource::new(0.9);
        let (_db, _rates, cache, _dir) = setup(vec![source.clone()], 3600).await;

        let first = cache.current_rate(&pair()).await.unwrap();
        let second = cache.current_rate(&pair()).await.unwrap();
        assert_eq!(first, 0.9);
        assert_eq!(second, 0.9);
        assert_eq!(source.current_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn cache_survives_a_new_cache_instance_over_the_same_file() {
        let source = MockFiatSource::new(0.9);
        let db = Database::open_in_memory().await.unwrap();
        let rates = RateStore::new(db.pool().clone());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fiat_cache.json");

        let cache = FiatRateCache::new(
            path.clone(),
            3600,
            rates.clone(),
            as_sources(vec![source.clone()]),
        );
        cache.current_rate(&pair()).await.unwrap();

        // "Process restart": new cache over the same file, fresh source
        let source2 = MockFiatSource::new(0.5);
        let cache2 = FiatRateCache::new(path, 3600, rates, as_sources(vec![source2.clone()]));
        let rate = cache2.current_rate(&pair()).await.unwrap();
        assert_eq!(rate, 0.9); // persisted entry, not the new source's value
        assert_eq!(source2.current_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn expired_entry_is_served_when_every_source_fails() {
        let good = MockFiatSource::new(0.9);
        let db = Database::open_in_memory().await.unwrap();
        let rates = RateStore::new(db.pool().clone());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fiat_cache.json");

        // Seed the cache with a 1-second TTL, then let it expire
        let cache = FiatRateCache::new(path.clone(), 1, rates.clone(), as_sources(vec![good]));
        cache.current_rate(&pair()).await.unwrap();
        tokio::time::sleep(std::time::Duration::from_millis(1_100)).await;

        // Same file, only failing sources now
        let failing = MockFiatSource::failing();
        let cache = FiatRateCache::new(path, 1, rates, as_sources(vec![failing]));
        let rate = cache.current_rate(&pair()).await.unwrap();
        assert_eq!(rate, 0.9); // degraded, but better than nothing
    }

    #[tokio::test]
    async fn no_entry_and_failing_sources_is_rate_unavailable() {
        let (_db, _rates, cache, _dir) = setup(vec![MockFiatSource::failing()], 3600).await;
        let err = cache.current_rate(&pair()).await.unwrap_err();
        assert!(matches!(err, CoreError::RateUnavailable { .. }));
    }

    #[tokio::test]
    async fn historical_rates_never_expire_and_fetch_once() {
        let source = MockFiatSource::new(0.85);
        let (_db, _rates, cache, _dir) = setup(vec![source.clone()], 3600).await;
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let first = cache.historical_rate(&pair(), date).await.unwrap();
        let second = cache.historical_rate(&pair(), date).await.unwrap();
        assert_eq!(first, 0.85);
        assert_eq!(second, 0.85);
        // Stored in the Currency table after the first fetch
        assert_eq!(source.historical_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn stored_historical_rate_is_preferred_over_the_provider() {
        let source = MockFiatSource::new(0.85);
        let (_db, rates, cache, _dir) = setup(vec![source.clone()], 3600).await;
        let date = NaiveDate::from_ymd_opt(2024, 3, 15).unwrap();

        let ts = date.and_hms_opt(14, 30, 0).unwrap().and_utc().timestamp();
        rates.insert(ts, &pair(), 0.91).await.unwrap();

        let rate = cache.historical_rate(&pair(), date).await.unwrap();
        assert_eq!(rate, 0.91);
        assert_eq!(source.historical_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_historical_rate_is_distinguishable_from_zero() {
        let (_db, _rates, cache, _dir) = setup(vec![MockFiatSource::failing()], 3600).await;
        let date = NaiveDate::from_ymd_opt(2020, 1, 1).unwrap();
        let err = cache.historical_rate(&pair(), date).await.unwrap_err();
        match err {
            CoreError::RateUnavailable { pair: p, date: d } => {
                assert_eq!(p, "USD/EUR");
                assert_eq!(d, date);
            }
            other => panic!("expected RateUnavailable, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn corrupted_cache_file_resets_instead_of_failing() {
        let source = MockFiatSource::new(0.9);
        let db = Database::open_in_memory().await.unwrap();
        let rates = RateStore::new(db.pool().clone());
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("fiat_cache.json");
        std::fs::write(&path, b"{ not json !!").unwrap();

        let cache = FiatRateCache::new(path, 3600, rates, as_sources(vec![source]));
        let rate = cache.current_rate(&pair()).await.unwrap();
        assert_eq!(rate, 0.9);
    }
}
