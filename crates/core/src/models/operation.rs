use serde::{Deserialize, Serialize};

/// Kind of portfolio operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OperationKind {
    /// Acquiring a token for fiat. A buy with `source_amount == 0` is an
    /// airdrop.
    Buy,
    /// Disposing of a token for fiat.
    Sell,
    /// Token-to-token exchange.
    Swap,
    /// Moving a token between wallets; no fiat leg.
    Transfer,
    /// Locking a token for staking rewards.
    Stake,
    /// Paying a network or exchange fee.
    Fee,
}

impl OperationKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            OperationKind::Buy => "buy",
            OperationKind::Sell => "sell",
            OperationKind::Swap => "swap",
            OperationKind::Transfer => "transfer",
            OperationKind::Stake => "stake",
            OperationKind::Fee => "fee",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "buy" => Some(OperationKind::Buy),
            "sell" => Some(OperationKind::Sell),
            "swap" => Some(OperationKind::Swap),
            "transfer" => Some(OperationKind::Transfer),
            "stake" => Some(OperationKind::Stake),
            "fee" => Some(OperationKind::Fee),
            _ => None,
        }
    }
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A single recorded operation.
///
/// `source_*` describes what was given, `dest_*` what was received. A buy of
/// 0.5 BTC for 20 000 EUR has `source_amount = 20000`, `source_unit = "EUR"`,
/// `dest_amount = 0.5`, `dest_unit = "BTC"`. Operations are immutable once
/// recorded; edits go through explicit update, never in-place mutation by
/// cleanup jobs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    /// Database id (0 until inserted)
    pub id: i64,

    pub kind: OperationKind,

    /// Amount given (fiat for buys, token for sells/swaps)
    pub source_amount: f64,

    /// Amount received
    pub dest_amount: f64,

    /// Unit of the source leg (currency code or token symbol)
    pub source_unit: String,

    /// Unit of the destination leg
    pub dest_unit: String,

    /// Unix timestamp of the operation
    pub timestamp: i64,

    /// Owning portfolio name
    pub portfolio: String,
}

impl Operation {
    /// An airdrop is a buy with a zero source amount: tokens received at no
    /// cost. Such operations must never be removed by automated cleanup.
    pub fn is_airdrop(&self) -> bool {
        self.kind == OperationKind::Buy && self.source_amount == 0.0
    }

    /// Signed quantity this operation contributes to holdings of `token`.
    /// Destination legs add, source legs subtract; fiat legs are ignored by
    /// callers that only track token quantities.
    pub fn quantity_delta(&self, token: &str) -> f64 {
        let mut delta = 0.0;
        if self.dest_unit == token {
            delta += self.dest_amount;
        }
        if self.source_unit == token {
            delta -= self.source_amount;
        }
        delta
    }
}
