// ═══════════════════════════════════════════════════════════════════
// Valuation Tests — pivot vs. naive-merge equivalence, holdings
// derivation, airdrop & delisted-token scenarios, interpolation
// ═══════════════════════════════════════════════════════════════════

use async_trait::async_trait;
use chrono::NaiveDate;
use std::collections::BTreeMap;
use std::sync::Arc;

use cryptofolio_core::errors::CoreError;
use cryptofolio_core::models::config::{FiatPair, TrackerConfig};
use cryptofolio_core::models::operation::{Operation, OperationKind};
use cryptofolio_core::models::price::PriceRow;
use cryptofolio_core::models::token::TokenStatus;
use cryptofolio_core::models::valuation::{ValuationMatrix, ValueEntry};
use cryptofolio_core::providers::traits::FiatRateSource;
use cryptofolio_core::services::fiat_cache::FiatRateCache;
use cryptofolio_core::services::valuation::{interpolate, pivot, ValuationService};
use cryptofolio_core::store::rates::RateStore;
use cryptofolio_core::store::Database;
use cryptofolio_core::PortfolioTracker;

fn test_config(dir: &tempfile::TempDir) -> TrackerConfig {
    TrackerConfig {
        display_currency: "USD".to_string(),
        fiat_pair: FiatPair::new("USD", "EUR"),
        cache_ttl_secs: 3600,
        rate_limit_delay_secs: 1,
        market_api_url: "http://localhost:0".to_string(),
        market_api_key: None,
        quote_api_key: None,
        db_path: "unused-in-memory".to_string(),
        cache_file: dir.path().join("fiat_cache.json").to_string_lossy().into_owned(),
    }
}

fn row(timestamp: i64, token: &str, price: f64) -> PriceRow {
    PriceRow {
        timestamp,
        token: token.to_string(),
        price,
        currency: "USD".to_string(),
        source: "test".to_string(),
    }
}

fn buy(portfolio: &str, fiat: f64, amount: f64, token: &str, timestamp: i64) -> Operation {
    Operation {
        id: 0,
        kind: OperationKind::Buy,
        source_amount: fiat,
        dest_amount: amount,
        source_unit: "USD".to_string(),
        dest_unit: token.to_string(),
        timestamp,
        portfolio: portfolio.to_string(),
    }
}

// ═══════════════════════════════════════════════════════════════════
// Pivot — equivalence with a reference naive merge
// ═══════════════════════════════════════════════════════════════════

mod pivot_equivalence {
    use super::*;

    /// Reference implementation: the iterative pairwise outer-merge the
    /// pivot replaces. Joins one token column at a time into an
    /// ever-growing table, exactly like chained DataFrame outer merges.
    fn naive_merge(entries: &[ValueEntry]) -> ValuationMatrix {
        let mut tokens: Vec<String> = entries.iter().map(|e| e.token.clone()).collect();
        tokens.sort();
        tokens.dedup();

        // merged: timestamp → per-column cells, grown one join at a time
        let mut merged: BTreeMap<i64, Vec<Option<f64>>> = BTreeMap::new();
        for (col, token) in tokens.iter().enumerate() {
            let series: Vec<(i64, f64)> = entries
                .iter()
                .filter(|e| &e.token == token)
                .map(|e| (e.timestamp, e.value))
                .collect();

            // outer join: existing rows widen by one column...
            for cells in merged.values_mut() {
                cells.push(None);
            }
            // ...and the new column's rows merge in
            for (ts, value) in series {
                let cells = merged.entry(ts).or_insert_with(|| vec![None; col + 1]);
                while cells.len() < col + 1 {
                    cells.push(None);
                }
                cells[col] = Some(value);
            }
        }

        let timestamps: Vec<i64> = merged.keys().copied().collect();
        let values: Vec<Vec<f64>> = merged
            .values()
            .map(|cells| {
                let mut filled: Vec<f64> = cells.iter().map(|c| c.unwrap_or(0.0)).collect();
                filled.resize(tokens.len(), 0.0);
                filled
            })
            .collect();
        ValuationMatrix { timestamps, tokens, values }
    }

    /// Small deterministic generator so the property is exercised over an
    /// irregular, gappy table without external crates.
    fn generate_entries(seed: u64, tokens: usize, timestamps: usize) -> Vec<ValueEntry> {
        let mut state = seed;
        let mut next = move || {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            state >> 33
        };
        let mut entries = Vec::new();
        for t in 0..tokens {
            for i in 0..timestamps {
                // ~30% gaps
                if next() % 10 < 3 {
                    continue;
                }
                entries.push(ValueEntry {
                    timestamp: 1_000 + (i as i64) * 3_600,
                    token: format!("TOK{t}"),
                    value: (next() % 1_000_000) as f64 / 100.0,
                });
            }
        }
        entries
    }

    #[test]
    fn pivot_equals_naive_merge_on_generated_tables() {
        for seed in [1, 7, 42, 1337] {
            let entries = generate_entries(seed, 8, 50);
            let fast = pivot(&entries);
            let reference = naive_merge(&entries);
            assert_eq!(fast.timestamps, reference.timestamps, "seed {seed}");
            assert_eq!(fast.tokens, reference.tokens, "seed {seed}");
            assert_eq!(fast.values, reference.values, "seed {seed}");
        }
    }

    #[test]
    fn pivot_fills_missing_combinations_with_zero() {
        let entries = vec![
            ValueEntry { timestamp: 100, token: "BTC".into(), value: 10.0 },
            ValueEntry { timestamp: 200, token: "ETH".into(), value: 20.0 },
        ];
        let matrix = pivot(&entries);
        assert_eq!(matrix.timestamps, vec![100, 200]);
        assert_eq!(matrix.tokens, vec!["BTC".to_string(), "ETH".to_string()]);
        assert_eq!(matrix.values, vec![vec![10.0, 0.0], vec![0.0, 20.0]]);
    }

    #[test]
    fn pivot_of_empty_input_is_empty() {
        let matrix = pivot(&[]);
        assert!(matrix.is_empty());
        assert!(matrix.totals().is_empty());
    }

    #[test]
    fn totals_are_row_sums() {
        let entries = vec![
            ValueEntry { timestamp: 100, token: "BTC".into(), value: 10.0 },
            ValueEntry { timestamp: 100, token: "ETH".into(), value: 5.0 },
            ValueEntry { timestamp: 200, token: "BTC".into(), value: 7.0 },
        ];
        let matrix = pivot(&entries);
        assert_eq!(matrix.totals(), vec![(100, 15.0), (200, 7.0)]);
        assert_eq!(matrix.column("ETH").unwrap(), vec![(100, 5.0), (200, 0.0)]);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Scenario: airdrops
// ═══════════════════════════════════════════════════════════════════

mod airdrops {
    use super::*;

    #[tokio::test]
    async fn airdrop_has_zero_cost_but_full_quantity() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = PortfolioTracker::open_in_memory(test_config(&dir)).await.unwrap();

        // 1 BTC bought at 50 000, then 100 TOKENX airdropped
        tracker
            .record_operation(&buy("main", 50_000.0, 1.0, "BTC", 100))
            .await
            .unwrap();
        tracker
            .record_operation(&buy("main", 0.0, 100.0, "TOKENX", 150))
            .await
            .unwrap();

        // Invested reflects only the BTC purchase
        assert_eq!(tracker.invested_total("main").await.unwrap(), 50_000.0);

        // TOKENX still appears in holdings with its full quantity
        let holdings = tracker.recompute_holdings("main").await.unwrap();
        let tokenx = holdings.iter().find(|h| h.token == "TOKENX").unwrap();
        assert_eq!(tokenx.quantity, 100.0);
        assert_eq!(tokenx.avg_cost, 0.0);
        let btc = holdings.iter().find(|h| h.token == "BTC").unwrap();
        assert_eq!(btc.quantity, 1.0);
        assert_eq!(btc.avg_cost, 50_000.0);
    }

    #[tokio::test]
    async fn zero_priced_airdrop_token_contributes_zero_value() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = PortfolioTracker::open_in_memory(test_config(&dir)).await.unwrap();

        tracker
            .record_operation(&buy("main", 50_000.0, 1.0, "BTC", 100))
            .await
            .unwrap();
        tracker
            .record_operation(&buy("main", 0.0, 100.0, "TOKENX", 100))
            .await
            .unwrap();
        tracker
            .import_price_rows(&[row(200, "BTC", 50_000.0), row(200, "TOKENX", 0.0)])
            .await
            .unwrap();

        let report = tracker.compute_series("main", 0, 1_000).await.unwrap();
        // TOKENX is a real column, not an error — its value is just zero
        assert_eq!(
            report.matrix.tokens,
            vec!["BTC".to_string(), "TOKENX".to_string()]
        );
        assert_eq!(report.totals, vec![(200, 50_000.0)]);
        assert!(report.skipped.is_empty());
    }
}

// ═══════════════════════════════════════════════════════════════════
// Scenario: delisted tokens
// ═══════════════════════════════════════════════════════════════════

mod delisted {
    use super::*;

    #[tokio::test]
    async fn delisted_token_is_excluded_but_history_remains() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = PortfolioTracker::open_in_memory(test_config(&dir)).await.unwrap();

        tracker
            .record_operation(&buy("main", 1_000.0, 500.0, "MATIC", 100))
            .await
            .unwrap();
        tracker
            .record_operation(&buy("main", 50_000.0, 1.0, "BTC", 100))
            .await
            .unwrap();
        tracker
            .import_price_rows(&[row(200, "MATIC", 0.4), row(200, "BTC", 50_000.0)])
            .await
            .unwrap();
        tracker
            .set_token_status(
                "MATIC",
                TokenStatus::Delisted,
                NaiveDate::from_ymd_opt(2024, 9, 1),
                None,
                None,
            )
            .await
            .unwrap();

        // filter_active drops it
        let active = tracker
            .filter_active(&["BTC".to_string(), "MATIC".to_string()])
            .await
            .unwrap();
        assert_eq!(active, vec!["BTC".to_string()]);

        // the valuation skips it, visibly
        let report = tracker.compute_series("main", 0, 1_000).await.unwrap();
        assert_eq!(report.matrix.tokens, vec!["BTC".to_string()]);
        assert!(report
            .skipped
            .iter()
            .any(|s| s.token == "MATIC" && s.reason.contains("lifecycle")));

        // but direct history queries still serve its rows
        let history = tracker.price_store().history("MATIC", 0, 1_000).await.unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].price, 0.4);
    }

    #[tokio::test]
    async fn token_without_prices_is_skipped_not_fatal() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = PortfolioTracker::open_in_memory(test_config(&dir)).await.unwrap();

        tracker
            .record_operation(&buy("main", 100.0, 10.0, "GHOST", 100))
            .await
            .unwrap();
        tracker
            .record_operation(&buy("main", 50_000.0, 1.0, "BTC", 100))
            .await
            .unwrap();
        tracker.import_price_rows(&[row(200, "BTC", 50_000.0)]).await.unwrap();

        let report = tracker.compute_series("main", 0, 1_000).await.unwrap();
        assert_eq!(report.matrix.tokens, vec!["BTC".to_string()]);
        assert!(report.skipped.iter().any(|s| s.token == "GHOST"));
        assert_eq!(report.totals, vec![(200, 50_000.0)]);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Holdings over time & sells
// ═══════════════════════════════════════════════════════════════════

mod holdings {
    use super::*;

    #[tokio::test]
    async fn quantity_held_tracks_buys_and_sells_over_the_series() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = PortfolioTracker::open_in_memory(test_config(&dir)).await.unwrap();

        tracker
            .record_operation(&buy("main", 10_000.0, 2.0, "ETH", 100))
            .await
            .unwrap();
        tracker
            .record_operation(&Operation {
                id: 0,
                kind: OperationKind::Sell,
                source_amount: 1.0,
                dest_amount: 6_000.0,
                source_unit: "ETH".to_string(),
                dest_unit: "USD".to_string(),
                timestamp: 250,
                portfolio: "main".to_string(),
            })
            .await
            .unwrap();
        tracker
            .import_price_rows(&[
                row(200, "ETH", 5_000.0),
                row(300, "ETH", 6_000.0),
            ])
            .await
            .unwrap();

        let report = tracker.compute_series("main", 0, 1_000).await.unwrap();
        // At t=200 two ETH are held; after the sell at t=250 only one
        assert_eq!(report.totals, vec![(200, 10_000.0), (300, 6_000.0)]);
    }

    #[tokio::test]
    async fn swap_moves_quantity_between_tokens() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = PortfolioTracker::open_in_memory(test_config(&dir)).await.unwrap();

        tracker
            .record_operation(&buy("main", 50_000.0, 1.0, "BTC", 100))
            .await
            .unwrap();
        tracker
            .record_operation(&Operation {
                id: 0,
                kind: OperationKind::Swap,
                source_amount: 0.5,
                dest_amount: 8.0,
                source_unit: "BTC".to_string(),
                dest_unit: "ETH".to_string(),
                timestamp: 200,
                portfolio: "main".to_string(),
            })
            .await
            .unwrap();

        let holdings = tracker.recompute_holdings("main").await.unwrap();
        let btc = holdings.iter().find(|h| h.token == "BTC").unwrap();
        let eth = holdings.iter().find(|h| h.token == "ETH").unwrap();
        assert_eq!(btc.quantity, 0.5);
        assert_eq!(eth.quantity, 8.0);
    }

    #[tokio::test]
    async fn swap_rate_is_derived_from_the_common_basis() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = PortfolioTracker::open_in_memory(test_config(&dir)).await.unwrap();
        tracker
            .import_price_rows(&[row(100, "BTC", 50_000.0), row(100, "ETH", 2_500.0)])
            .await
            .unwrap();

        let rate = tracker.swap_rate("BTC", "ETH", 150).await.unwrap();
        assert!((rate - 20.0).abs() < 1e-9);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Degraded-accuracy propagation
// ═══════════════════════════════════════════════════════════════════

mod degraded {
    use super::*;

    struct FixedRate(f64);

    #[async_trait]
    impl FiatRateSource for FixedRate {
        fn name(&self) -> &str {
            "FixedRate"
        }
        async fn current_rate(&self, _pair: &FiatPair) -> Result<f64, CoreError> {
            Ok(self.0)
        }
        async fn historical_rate(
            &self,
            pair: &FiatPair,
            date: NaiveDate,
        ) -> Result<f64, CoreError> {
            Err(CoreError::RateUnavailable { pair: pair.label(), date })
        }
    }

    #[tokio::test]
    async fn conversion_fallback_marks_the_report_degraded() {
        let db = Database::open_in_memory().await.unwrap();
        let pair = FiatPair::new("USD", "EUR");
        let dir = tempfile::tempdir().unwrap();
        let cache = FiatRateCache::new(
            dir.path().join("fiat_cache.json"),
            3600,
            RateStore::new(db.pool().clone()),
            vec![Arc::new(FixedRate(0.9)) as Arc<dyn FiatRateSource>],
        );
        // Display in EUR so every series must be converted from USD
        let svc = ValuationService::new(&db, pair, "EUR".to_string());

        let ops = cryptofolio_core::store::operations::OperationStore::new(db.pool().clone());
        ops.insert(&buy("main", 50_000.0, 1.0, "BTC", 100)).await.unwrap();
        let prices = cryptofolio_core::store::prices::PriceStore::new(db.pool().clone());
        prices.insert_rows(&[row(200, "BTC", 50_000.0)]).await.unwrap();

        // No historical rates exist → current-rate fallback → degraded
        let report = svc.compute_series(&cache, "main", 0, 1_000).await.unwrap();
        assert!(report.degraded_accuracy);
        assert_eq!(report.currency, "EUR");
        assert_eq!(report.totals, vec![(200, 45_000.0)]);
    }
}

// ═══════════════════════════════════════════════════════════════════
// Interpolation (display only)
// ═══════════════════════════════════════════════════════════════════

mod interpolation {
    use super::*;

    #[test]
    fn linear_between_two_points() {
        assert_eq!(interpolate(0, 10.0, 10, 20.0, 5), 15.0);
        assert_eq!(interpolate(0, 10.0, 10, 20.0, 0), 10.0);
        assert_eq!(interpolate(0, 10.0, 10, 20.0, 10), 20.0);
    }

    #[test]
    fn degenerate_span_returns_the_known_value() {
        assert_eq!(interpolate(5, 42.0, 5, 99.0, 5), 42.0);
    }

    #[tokio::test]
    async fn interpolated_price_between_stored_points() {
        let db = Database::open_in_memory().await.unwrap();
        let svc = ValuationService::new(&db, FiatPair::new("USD", "EUR"), "USD".to_string());
        let prices = cryptofolio_core::store::prices::PriceStore::new(db.pool().clone());
        prices
            .insert_rows(&[row(100, "BTC", 10.0), row(200, "BTC", 20.0)])
            .await
            .unwrap();

        // Between two points: linear
        assert_eq!(svc.interpolated_price_at("BTC", 150).await.unwrap(), Some(15.0));
        // Past the last point: the last known value
        assert_eq!(svc.interpolated_price_at("BTC", 300).await.unwrap(), Some(20.0));
        // Before any data: nothing to show
        assert_eq!(svc.interpolated_price_at("BTC", 50).await.unwrap(), None);
    }
}
