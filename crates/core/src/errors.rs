use chrono::NaiveDate;
use thiserror::Error;

/// Unified error type for the entire cryptofolio-core library.
/// Every public function returns `Result<T, CoreError>`.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Storage ─────────────────────────────────────────────────────
    #[error("Database error: {0}")]
    Database(String),

    #[error("Migration failed at v{version}: {message}")]
    Migration { version: u32, message: String },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("File I/O error: {0}")]
    FileIO(String),

    // ── API / Network ───────────────────────────────────────────────
    /// A provider is unreachable or kept failing after the single retry.
    /// Callers fall back to cache or the next adapter where one exists;
    /// batch operations continue for the remaining tokens.
    #[error("Source unavailable ({provider}): {message}")]
    SourceUnavailable {
        provider: String,
        message: String,
    },

    #[error("API error ({provider}): {message}")]
    Api {
        provider: String,
        message: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("No source registered for: {0}")]
    NoSource(String),

    // ── Business Logic ──────────────────────────────────────────────
    /// No historical fiat rate exists for the requested date. Distinct from
    /// a genuine zero rate; callers may fall back to the current rate but
    /// must flag the degraded accuracy.
    #[error("No {pair} rate available for {date}")]
    RateUnavailable {
        pair: String,
        date: NaiveDate,
    },

    #[error("Token not found: {0}")]
    NotFound(String),

    /// A mutation that would break a documented data invariant (deleting an
    /// airdrop operation, purging zero prices of a listed token, ...).
    /// Programming-contract error: the specific operation is aborted before
    /// any write happens.
    #[error("Invariant violation: {0}")]
    InvariantViolation(String),

    #[error("Validation failed: {0}")]
    Validation(String),

    #[error("Price not available for {token} at {timestamp}")]
    PriceNotAvailable {
        token: String,
        timestamp: i64,
    },
}

// ── Conversion helpers (From impls) ─────────────────────────────────

impl From<sqlx::Error> for CoreError {
    fn from(e: sqlx::Error) -> Self {
        CoreError::Database(e.to_string())
    }
}

impl From<std::io::Error> for CoreError {
    fn from(e: std::io::Error) -> Self {
        CoreError::FileIO(e.to_string())
    }
}

impl From<serde_json::Error> for CoreError {
    fn from(e: serde_json::Error) -> Self {
        CoreError::Serialization(e.to_string())
    }
}

impl From<reqwest::Error> for CoreError {
    fn from(e: reqwest::Error) -> Self {
        // Sanitize error message: strip query parameters from URLs to prevent
        // API key leakage. reqwest errors often contain full URLs with secrets.
        let msg = e.to_string();
        let sanitized = if let Some(idx) = msg.find('?') {
            format!("{}?<query redacted>", &msg[..idx])
        } else {
            msg
        };
        CoreError::Network(sanitized)
    }
}
