use chrono::{NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::errors::CoreError;
use crate::models::config::FiatPair;
use crate::providers::traits::FiatRateSource;
use crate::store::rates::RateStore;

/// Maximum number of current-rate entries before the oldest are evicted.
const MAX_CACHE_ENTRIES: usize = 100;

/// Historical rates are stamped at 14:30 UTC, the reference fixing time, so
/// one date always maps to the same row timestamp.
const FIXING_SECS_INTO_DAY: i64 = 14 * 3600 + 30 * 60;

/// Fiat Rate Cache: avoids redundant calls to the fiat-rate providers.
///
/// Two tiers:
/// - **Current rates** live in a JSON cache file with TTL expiry. A fresh
///   entry short-circuits the network; on provider failure the most recent
///   expired entry is served with a warning rather than failing the caller.
/// - **Historical rates** live in the `Currency` table and never expire —
///   a past date's rate does not change. A miss fetches exactly that date
///   from the provider chain and stores the result.
///
/// Fetch-then-store is serialized per key (pair, or pair+date) so two
/// concurrent callers cannot trigger duplicate provider calls for the same
/// rate; different keys proceed independently.
pub struct FiatRateCache {
    cache_file: PathBuf,
    ttl_secs: u64,
    rate_store: RateStore,
    sources: Vec<Arc<dyn FiatRateSource>>,
    locks: StdMutex<HashMap<String, Arc<Mutex<()>>>>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CacheEntry {
    timestamp: i64,
    expiry: i64,
    rate: f64,
}

impl FiatRateCache {
    pub fn new(
        cache_file: impl Into<PathBuf>,
        ttl_secs: u64,
        rate_store: RateStore,
        sources: Vec<Arc<dyn FiatRateSource>>,
    ) -> Self {
        Self {
            cache_file: cache_file.into(),
            ttl_secs,
            rate_store,
            sources,
            locks: StdMutex::new(HashMap::new()),
        }
    }

    // ── Current rate (TTL-cached) ───────────────────────────────────

    /// Current rate for the pair. Cached entry younger than the TTL wins;
    /// otherwise the provider chain is queried and the result stored. When
    /// every provider fails, the most recent expired entry is returned with
    /// degraded accuracy (logged), else `RateUnavailable`.
    pub async fn current_rate(&self, pair: &FiatPair) -> Result<f64, CoreError> {
        let key = pair.label();

        if let Some(entry) = self.fresh_entry(&key) {
            debug!(pair = %pair, rate = entry.rate, "fiat cache hit");
            return Ok(entry.rate);
        }

        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        // Another caller may have fetched while we waited on the lock.
        if let Some(entry) = self.fresh_entry(&key) {
            return Ok(entry.rate);
        }

        for source in &self.sources {
            match source.current_rate(pair).await {
                Ok(rate) => {
                    self.store_entry(&key, rate);
                    debug!(pair = %pair, rate, source = source.name(), "current rate fetched");
                    return Ok(rate);
                }
                Err(e) => {
                    warn!(pair = %pair, source = source.name(), error = %e,
                          "current-rate source failed, trying next");
                }
            }
        }

        // Every source failed — an expired rate beats no rate, but the
        // degradation must be visible.
        if let Some(entry) = self.any_entry(&key) {
            warn!(pair = %pair, rate = entry.rate,
                  "all sources failed; serving EXPIRED cached rate");
            return Ok(entry.rate);
        }

        Err(CoreError::RateUnavailable {
            pair: key,
            date: Utc::now().date_naive(),
        })
    }

    // ── Historical rate (never expires) ─────────────────────────────

    /// Rate for the pair on a specific past date. Stored entries are
    /// immutable and never refetched; a miss queries the provider chain for
    /// exactly that date. Failure is `RateUnavailable` — explicitly
    /// distinguishable from a genuine zero rate.
    pub async fn historical_rate(
        &self,
        pair: &FiatPair,
        date: NaiveDate,
    ) -> Result<f64, CoreError> {
        if let Some(rate) = self.rate_store.rate_on_date(pair, date).await? {
            return Ok(rate);
        }

        let key = format!("{}@{}", pair.label(), date);
        let lock = self.key_lock(&key);
        let _guard = lock.lock().await;

        if let Some(rate) = self.rate_store.rate_on_date(pair, date).await? {
            return Ok(rate);
        }

        for source in &self.sources {
            match source.historical_rate(pair, date).await {
                Ok(rate) => {
                    let ts = date
                        .and_hms_opt(0, 0, 0)
                        .map(|dt| dt.and_utc().timestamp())
                        .unwrap_or_default()
                        + FIXING_SECS_INTO_DAY;
                    self.rate_store.insert(ts, pair, rate).await?;
                    debug!(pair = %pair, %date, rate, source = source.name(),
                           "historical rate fetched");
                    return Ok(rate);
                }
                Err(CoreError::RateUnavailable { .. }) => {
                    // This source has no historical data; try the next one
                    // without noise.
                }
                Err(e) => {
                    warn!(pair = %pair, %date, source = source.name(), error = %e,
                          "historical-rate source failed, trying next");
                }
            }
        }

        Err(CoreError::RateUnavailable { pair: pair.label(), date })
    }

    // ── Cache file handling ─────────────────────────────────────────

    fn key_lock(&self, key: &str) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|e| e.into_inner());
        locks.entry(key.to_string()).or_default().clone()
    }

    fn fresh_entry(&self, key: &str) -> Option<CacheEntry> {
        let entry = self.load_cache().remove(key)?;
        let now = Utc::now().timestamp();
        (now < entry.expiry).then_some(entry)
    }

    fn any_entry(&self, key: &str) -> Option<CacheEntry> {
        self.load_cache().remove(key)
    }

    fn store_entry(&self, key: &str, rate: f64) {
        let now = Utc::now().timestamp();
        let mut cache = self.load_cache();
        cache.insert(
            key.to_string(),
            CacheEntry {
                timestamp: now,
                expiry: now + self.ttl_secs as i64,
                rate,
            },
        );
        // Evict the oldest entries when the file grows past the cap.
        if cache.len() > MAX_CACHE_ENTRIES {
            let mut stamped: Vec<(String, i64)> = cache
                .iter()
                .map(|(k, e)| (k.clone(), e.timestamp))
                .collect();
            stamped.sort_by_key(|(_, ts)| *ts);
            for (old_key, _) in stamped.iter().take(cache.len() - MAX_CACHE_ENTRIES) {
                cache.remove(old_key);
            }
        }
        if let Err(e) = self.save_cache(&cache) {
            error!(error = %e, "failed to persist fiat cache");
        }
    }

    /// Load the cache file; a corrupted file is preserved for inspection and
    /// the cache resets to empty.
    fn load_cache(&self) -> HashMap<String, CacheEntry> {
        if !self.cache_file.exists() {
            return HashMap::new();
        }
        match std::fs::read_to_string(&self.cache_file)
            .map_err(CoreError::from)
            .and_then(|raw| serde_json::from_str(&raw).map_err(CoreError::from))
        {
            Ok(cache) => cache,
            Err(e) => {
                let backup = self.cache_file.with_extension("corrupted");
                let _ = std::fs::rename(&self.cache_file, &backup);
                error!(error = %e, backup = %backup.display(),
                       "fiat cache file corrupted, resetting");
                HashMap::new()
            }
        }
    }

    /// Atomic write: temp file in the same directory, then rename, so a
    /// crash mid-write cannot corrupt the cache.
    fn save_cache(&self, cache: &HashMap<String, CacheEntry>) -> Result<(), CoreError> {
        if let Some(dir) = self.cache_file.parent() {
            if !dir.as_os_str().is_empty() && !dir.exists() {
                std::fs::create_dir_all(dir)?;
            }
        }
        let tmp = self.cache_file.with_extension("tmp");
        std::fs::write(&tmp, serde_json::to_string_pretty(cache)?)?;
        std::fs::rename(&tmp, &self.cache_file)?;
        Ok(())
    }

    /// Path of the backing cache file.
    pub fn cache_path(&self) -> &Path {
        &self.cache_file
    }
}
