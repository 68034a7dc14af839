/// Unsupervised outlier detection over the per-site sub-score matrix.
///
/// The scorer sees one six-column row per site and needs the whole run at
/// once, so it is the synchronization barrier between per-site scoring and
/// profile assembly. Implementations sit behind `AnomalyScorer` so the
/// pipeline does not depend on a particular algorithm.

pub mod isolation_forest;

pub use isolation_forest::IsolationForest;

use crate::model::FeatureRow;

/// Per-row anomaly scores and flags, index-aligned with the input rows.
///
/// Scores follow the decision-function convention: normal rows sit near or
/// above 0, outliers are negative. `flags[i]` is set iff row `i` is an
/// outlier.
#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyOutcome {
    pub scores: Vec<f64>,
    pub flags: Vec<bool>,
}

impl AnomalyOutcome {
    /// Uniform zero scores and no flags, for inputs with nothing to isolate.
    pub fn degenerate(n: usize) -> Self {
        Self {
            scores: vec![0.0; n],
            flags: vec![false; n],
        }
    }

    pub fn flagged_count(&self) -> usize {
        self.flags.iter().filter(|&&f| f).count()
    }
}

pub trait AnomalyScorer: Send + Sync {
    /// Trains on `rows` and scores the same rows.
    fn fit(&self, rows: &[FeatureRow]) -> AnomalyOutcome;
}
