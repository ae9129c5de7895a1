pub mod errors;
pub mod models;
pub mod providers;
pub mod services;
pub mod store;

use chrono::NaiveDate;
use std::sync::Arc;

use errors::CoreError;
use models::config::TrackerConfig;
use models::holding::Holding;
use models::operation::Operation;
use models::price::PriceRow;
use models::token::{Token, TokenStatus};
use models::valuation::{SkippedToken, ValuationReport};
use providers::market_api::MarketApiProvider;
use providers::registry::SourceRegistry;
use services::fiat_cache::FiatRateCache;
use services::prices::{BackfillSummary, PriceService, UpdateSummary};
use services::valuation::ValuationService;
use store::operations::OperationStore;
use store::prices::PriceStore;
use store::rates::RateStore;
use store::tokens::TokenStore;
use store::{Database, DedupTable};

/// Main entry point for the cryptofolio core library.
///
/// Owns the database handle, the provider registry and all services; the UI
/// and batch-script collaborators talk only to this facade. All caches are
/// explicit members — there is no ambient global state.
#[must_use]
pub struct PortfolioTracker {
    config: TrackerConfig,
    db: Database,
    tokens: TokenStore,
    prices: PriceStore,
    operations: OperationStore,
    fiat_cache: FiatRateCache,
    market_api: Arc<MarketApiProvider>,
    price_service: PriceService,
    valuation_service: ValuationService,
}

impl std::fmt::Debug for PortfolioTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortfolioTracker")
            .field("display_currency", &self.config.display_currency)
            .field("fiat_pair", &self.config.fiat_pair)
            .field("db_path", &self.config.db_path)
            .finish()
    }
}

impl PortfolioTracker {
    /// Open the tracker against the database file named in the config,
    /// applying pending schema migrations.
    pub async fn open(config: TrackerConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let db = Database::open(&config.db_path).await?;
        Ok(Self::build(config, db))
    }

    /// Tracker backed by an in-memory database (tests, dry runs).
    pub async fn open_in_memory(config: TrackerConfig) -> Result<Self, CoreError> {
        config.validate()?;
        let db = Database::open_in_memory().await?;
        Ok(Self::build(config, db))
    }

    // ── Prices ──────────────────────────────────────────────────────

    /// Refresh current prices for the given tokens plus every token already
    /// tracked. Appends rows, records `last_update`, deduplicates.
    pub async fn update_prices(&self, tokens: &[String]) -> Result<UpdateSummary, CoreError> {
        self.price_service.update_market(tokens).await
    }

    /// Backfill historical prices for a batch of tokens over [from, to]
    /// (unix seconds). Unresolved symbols are skipped, not fatal.
    pub async fn backfill_history(
        &self,
        tokens: &[String],
        from: i64,
        to: i64,
    ) -> Result<BackfillSummary, CoreError> {
        self.price_service.backfill_all(tokens, from, to).await
    }

    /// Pull the provider's coin catalog and upsert symbol → provider-id
    /// mappings into the lifecycle store. Existing statuses are preserved.
    /// Returns the number of catalog entries processed.
    pub async fn sync_token_catalog(&self) -> Result<usize, CoreError> {
        let coins = self.market_api.coins().await?;
        for coin in &coins {
            self.tokens
                .upsert(&coin.symbol.to_uppercase(), Some(coin.id), coin.name.as_deref())
                .await?;
        }
        Ok(coins.len())
    }

    /// Bulk-import price rows (CSV import collaborator entry point). Uses
    /// the same insert contract as the adapters and runs the Deduplication
    /// Maintainer afterwards.
    pub async fn import_price_rows(&self, rows: &[PriceRow]) -> Result<u64, CoreError> {
        self.prices.insert_rows(rows).await?;
        self.db.drop_duplicates(DedupTable::Market).await
    }

    /// Run the Deduplication Maintainer standalone. Idempotent.
    pub async fn drop_duplicates(&self, table: DedupTable) -> Result<u64, CoreError> {
        self.db.drop_duplicates(table).await
    }

    // ── Valuation ───────────────────────────────────────────────────

    /// Wide-format valuation of a portfolio over [from, to] in the display
    /// currency: matrix, totals, and the list of tokens that could not be
    /// computed.
    pub async fn compute_series(
        &self,
        portfolio: &str,
        from: i64,
        to: i64,
    ) -> Result<ValuationReport, CoreError> {
        self.valuation_service
            .compute_series(&self.fiat_cache, portfolio, from, to)
            .await
    }

    /// Current portfolio value from the latest stored prices.
    pub async fn current_value(
        &self,
        portfolio: &str,
    ) -> Result<(f64, Vec<SkippedToken>), CoreError> {
        self.valuation_service
            .current_value(&self.fiat_cache, portfolio)
            .await
    }

    /// Recompute and persist the derived holdings of a portfolio.
    pub async fn recompute_holdings(&self, portfolio: &str) -> Result<Vec<Holding>, CoreError> {
        self.valuation_service.recompute_holdings(portfolio).await
    }

    /// Total fiat invested into a portfolio (airdrops cost nothing).
    pub async fn invested_total(&self, portfolio: &str) -> Result<f64, CoreError> {
        self.valuation_service.invested_total(portfolio).await
    }

    /// Token-to-token rate at a timestamp, for valuing swaps.
    pub async fn swap_rate(
        &self,
        token_from: &str,
        token_to: &str,
        timestamp: i64,
    ) -> Result<f64, CoreError> {
        self.valuation_service
            .swap_rate(&self.fiat_cache, token_from, token_to, timestamp)
            .await
    }

    // ── Token lifecycle ─────────────────────────────────────────────

    /// Active subset of the given symbols (duplicates collapsed, sorted).
    pub async fn filter_active(&self, symbols: &[String]) -> Result<Vec<String>, CoreError> {
        self.tokens.filter_active(symbols).await
    }

    /// Metadata record for a symbol; `NotFound` when absent.
    pub async fn token_info(&self, symbol: &str) -> Result<Token, CoreError> {
        self.tokens.get_info(symbol).await
    }

    /// Explicit lifecycle status change — the only way a token's status
    /// moves.
    pub async fn set_token_status(
        &self,
        symbol: &str,
        status: TokenStatus,
        delisting_date: Option<NaiveDate>,
        last_valid_price_date: Option<NaiveDate>,
        notes: Option<&str>,
    ) -> Result<(), CoreError> {
        self.tokens
            .set_status(symbol, status, delisting_date, last_valid_price_date, notes)
            .await
    }

    /// Administrative removal of a token's metadata. Its price history is
    /// untouched and stays queryable.
    pub async fn delete_token(&self, symbol: &str) -> Result<bool, CoreError> {
        self.tokens.delete(symbol).await
    }

    // ── Operations ──────────────────────────────────────────────────

    /// Record an operation; returns its id.
    pub async fn record_operation(&self, op: &Operation) -> Result<i64, CoreError> {
        self.operations.insert(op).await
    }

    /// Operations of a portfolio, optionally narrowed by token and range,
    /// ordered by timestamp.
    pub async fn list_operations(
        &self,
        portfolio: &str,
        token_filter: Option<&str>,
        date_range: Option<(i64, i64)>,
    ) -> Result<Vec<Operation>, CoreError> {
        self.operations.list(portfolio, token_filter, date_range).await
    }

    /// Delete an operation. Airdrops are protected by the store's
    /// invariant guard.
    pub async fn delete_operation(&self, id: i64) -> Result<(), CoreError> {
        self.operations.delete(id).await
    }

    // ── Accessors ───────────────────────────────────────────────────

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    /// Direct read access to stored prices (diagnostics, exports, delisted
    /// token history).
    pub fn price_store(&self) -> &PriceStore {
        &self.prices
    }

    /// Unix timestamp of the last completed price update, if any.
    pub async fn last_update(&self) -> Result<Option<i64>, CoreError> {
        Ok(self
            .db
            .get_meta("last_update")
            .await?
            .and_then(|v| v.parse().ok()))
    }

    // ── Internal ────────────────────────────────────────────────────

    fn build(config: TrackerConfig, db: Database) -> Self {
        let (registry, market_api) = SourceRegistry::with_market_api(&config);
        let registry = Arc::new(registry);

        let pool = db.pool().clone();
        let tokens = TokenStore::new(pool.clone());
        let prices = PriceStore::new(pool.clone());
        let rates = RateStore::new(pool.clone());
        let operations = OperationStore::new(pool);

        let fiat_cache = FiatRateCache::new(
            config.cache_file.clone(),
            config.cache_ttl_secs,
            rates.clone(),
            registry.fiat_sources().to_vec(),
        );
        let price_service =
            PriceService::new(registry.clone(), db.clone(), config.fiat_pair.clone());
        let valuation_service = ValuationService::new(
            &db,
            config.fiat_pair.clone(),
            config.display_currency.clone(),
        );

        Self {
            config,
            db,
            tokens,
            prices,
            operations,
            fiat_cache,
            market_api,
            price_service,
            valuation_service,
        }
    }
}
