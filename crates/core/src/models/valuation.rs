use serde::{Deserialize, Serialize};

/// One (timestamp, token, value) triple of the long-format valuation table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValueEntry {
    pub timestamp: i64,
    pub token: String,
    pub value: f64,
}

/// Wide-format valuation matrix: rows are timestamps, columns are tokens,
/// cells are values in the display currency. Missing (timestamp, token)
/// combinations hold a neutral 0.0.
///
/// Built by a single pivot pass over the long-format table — never by
/// iterative pairwise outer-joins over the token set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationMatrix {
    /// Row labels, strictly ascending
    pub timestamps: Vec<i64>,
    /// Column labels, sorted for deterministic output
    pub tokens: Vec<String>,
    /// `values[row][col]` — same ordering as `timestamps` / `tokens`
    pub values: Vec<Vec<f64>>,
}

impl ValuationMatrix {
    /// Empty matrix (no rows, no columns).
    pub fn empty() -> Self {
        Self {
            timestamps: Vec::new(),
            tokens: Vec::new(),
            values: Vec::new(),
        }
    }

    /// Row-sum across columns: total portfolio value per timestamp.
    pub fn totals(&self) -> Vec<(i64, f64)> {
        self.timestamps
            .iter()
            .zip(&self.values)
            .map(|(ts, row)| (*ts, row.iter().sum()))
            .collect()
    }

    /// Per-token value series (a single column), if the token is present.
    pub fn column(&self, token: &str) -> Option<Vec<(i64, f64)>> {
        let col = self.tokens.iter().position(|t| t == token)?;
        Some(
            self.timestamps
                .iter()
                .zip(&self.values)
                .map(|(ts, row)| (*ts, row[col]))
                .collect(),
        )
    }

    pub fn is_empty(&self) -> bool {
        self.timestamps.is_empty()
    }
}

/// Why a token was left out of a valuation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SkippedToken {
    pub token: String,
    pub reason: String,
}

/// Outcome of a valuation run: the matrix plus everything that could NOT be
/// computed. A single bad token never fails the whole run — it lands here,
/// visibly, instead of silently skewing the totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValuationReport {
    pub matrix: ValuationMatrix,
    /// Portfolio total per timestamp (row sums of `matrix`)
    pub totals: Vec<(i64, f64)>,
    /// Display currency all values are denominated in
    pub currency: String,
    /// Tokens excluded from this run, with reasons
    pub skipped: Vec<SkippedToken>,
    /// True when any currency conversion fell back to a degraded rate
    pub degraded_accuracy: bool,
}
