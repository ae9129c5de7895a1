use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

/// Lifecycle status of a tracked token.
///
/// Drives which tokens appear in active-portfolio views. Historical price
/// rows of non-active tokens are retained regardless of status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TokenStatus {
    /// Normally traded token — included everywhere.
    Active,
    /// No longer traded; excluded from active views, history retained.
    Delisted,
    /// Still traded but superseded (e.g. old contract); excluded from
    /// active views.
    Deprecated,
    /// Replaced by another token through a migration/swap.
    Migrated,
}

impl TokenStatus {
    /// Stable string form used in the database.
    pub fn as_str(&self) -> &'static str {
        match self {
            TokenStatus::Active => "active",
            TokenStatus::Delisted => "delisted",
            TokenStatus::Deprecated => "deprecated",
            TokenStatus::Migrated => "migrated",
        }
    }

    /// Parse the database string form.
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "active" => Some(TokenStatus::Active),
            "delisted" => Some(TokenStatus::Delisted),
            "deprecated" => Some(TokenStatus::Deprecated),
            "migrated" => Some(TokenStatus::Migrated),
            _ => None,
        }
    }
}

impl std::fmt::Display for TokenStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Metadata record for a single token.
///
/// Owned exclusively by the Token Lifecycle Store. `symbol` is the unique
/// key; `provider_id` is the numeric identifier used by the historical
/// time-series provider (absent until discovered).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Token {
    /// Ticker symbol, uppercased (e.g., "BTC", "ETH")
    pub symbol: String,

    /// Lifecycle status
    pub status: TokenStatus,

    /// Date the token was delisted, if applicable
    pub delisting_date: Option<NaiveDate>,

    /// Last date a price for this token is considered valid
    pub last_valid_price_date: Option<NaiveDate>,

    /// Free-text notes (delisting reason, migration target, ...)
    pub notes: Option<String>,

    /// Numeric id on the historical-series provider
    pub provider_id: Option<i64>,

    /// Human-readable name (e.g., "Bitcoin")
    pub name: Option<String>,

    /// Unix timestamp of record creation
    pub created_at: i64,

    /// Unix timestamp of last update
    pub updated_at: i64,
}
