use serde::{Deserialize, Serialize};

/// Derived holding of one token in one portfolio.
///
/// A cached aggregate, recomputable from the operation log at any time —
/// never the source of truth. `quantity` is the signed sum of all matching
/// operation legs (destinations positive, sources negative).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Holding {
    pub portfolio: String,
    pub token: String,
    pub quantity: f64,
    /// Average fiat cost per unit over all buys (0 when only airdrops)
    pub avg_cost: f64,
    /// Unix timestamp of the last recomputation
    pub last_updated: i64,
}
