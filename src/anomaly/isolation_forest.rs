/// Isolation forest (Liu, Ting & Zhou 2008).
///
/// Each tree isolates a random sub-sample by recursive random axis-aligned
/// splits; rows that isolate in few splits are outliers. Scores use the
/// decision-function convention `score_samples − offset`, where
/// `score_samples = −2^(−E[h(x)] / c(ψ))` and `offset` is the contamination
/// percentile of the training scores, so exactly the most isolated
/// `contamination` share of rows comes out negative.
///
/// Determinism: a master `StdRng` seeded from the configured seed draws one
/// seed per tree; trees are built on a thread pool and put back in index
/// order before scoring, so the worker count never changes the result.

use rand::rngs::StdRng;
use rand::{Rng, RngCore, SeedableRng};
use std::sync::{Arc, mpsc};
use threadpool::ThreadPool;
use tracing::{debug, warn};

use crate::anomaly::{AnomalyOutcome, AnomalyScorer};
use crate::config::AnomalyConfig;
use crate::model::FeatureRow;

/// Euler-Mascheroni constant.
const EULER_GAMMA: f64 = 0.577_215_664_901_532_9;

#[derive(Debug, Clone)]
enum IsolationNode {
    Internal {
        feature: usize,
        split: f64,
        left: Box<IsolationNode>,
        right: Box<IsolationNode>,
    },
    Leaf {
        size: usize,
    },
}

#[derive(Debug, Clone)]
struct IsolationTree {
    root: IsolationNode,
}

impl IsolationTree {
    fn build(data: &[FeatureRow], sample: Vec<usize>, max_depth: usize, rng: &mut StdRng) -> Self {
        Self {
            root: Self::build_node(data, sample, 0, max_depth, rng),
        }
    }

    fn build_node(
        data: &[FeatureRow],
        rows: Vec<usize>,
        depth: usize,
        max_depth: usize,
        rng: &mut StdRng,
    ) -> IsolationNode {
        if depth >= max_depth || rows.len() <= 1 {
            return IsolationNode::Leaf { size: rows.len() };
        }

        // Only features that still vary inside this node can split it.
        let ranges: Vec<(usize, f64, f64)> = (0..FEATURES)
            .filter_map(|f| {
                let (lo, hi) = rows.iter().fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &r| {
                    (lo.min(data[r][f]), hi.max(data[r][f]))
                });
                (hi > lo).then_some((f, lo, hi))
            })
            .collect();
        if ranges.is_empty() {
            return IsolationNode::Leaf { size: rows.len() };
        }

        let (feature, lo, hi) = ranges[rng.gen_range(0..ranges.len())];
        let split = rng.gen_range(lo..hi);

        let (left, right): (Vec<usize>, Vec<usize>) = rows.into_iter().partition(|&r| data[r][feature] < split);

        IsolationNode::Internal {
            feature,
            split,
            left: Box::new(Self::build_node(data, left, depth + 1, max_depth, rng)),
            right: Box::new(Self::build_node(data, right, depth + 1, max_depth, rng)),
        }
    }

    /// Depth at which `row` lands, plus the expected depth of the rest of
    /// its leaf.
    fn path_length(&self, row: &FeatureRow) -> f64 {
        let mut node = &self.root;
        let mut depth = 0usize;
        loop {
            match node {
                IsolationNode::Leaf { size } => return depth as f64 + average_path_length(*size),
                IsolationNode::Internal { feature, split, left, right } => {
                    node = if row[*feature] < *split { left } else { right };
                    depth += 1;
                }
            }
        }
    }
}

const FEATURES: usize = 6;

/// Upper bound applied to `contamination` when fitting.
const MAX_CONTAMINATION: f64 = 0.5;

/// Average path length of an unsuccessful BST search over `n` points:
/// `c(n) = 2 H(n−1) − 2(n−1)/n`, with `c(1) = 0` and `c(2) = 1`.
pub fn average_path_length(n: usize) -> f64 {
    match n {
        0 | 1 => 0.0,
        2 => 1.0,
        _ => {
            let n = n as f64;
            2.0 * ((n - 1.0).ln() + EULER_GAMMA) - 2.0 * (n - 1.0) / n
        }
    }
}

/// Linear-interpolated percentile (`q` in [0, 100]) of unsorted values.
fn percentile(values: &[f64], q: f64) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let last = sorted.len() - 1;
    let pos = (q.clamp(0.0, 100.0) / 100.0) * last as f64;
    let lo = (pos.floor() as usize).min(last);
    let hi = (pos.ceil() as usize).min(last);
    sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64)
}

// ---------------------------------------------------------------------------
// Forest
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct IsolationForest {
    pub n_estimators: usize,
    pub contamination: f64,
    pub max_samples: usize,
    pub seed: u64,
    pub workers: usize,
}

impl Default for IsolationForest {
    fn default() -> Self {
        Self::from_config(&AnomalyConfig::default(), 1)
    }
}

impl IsolationForest {
    pub fn from_config(config: &AnomalyConfig, workers: usize) -> Self {
        Self {
            n_estimators: config.n_estimators,
            contamination: config.contamination,
            max_samples: config.max_samples,
            seed: config.seed,
            workers: workers.max(1),
        }
    }

    fn build_trees(&self, data: Arc<Vec<FeatureRow>>, psi: usize, max_depth: usize) -> Vec<IsolationTree> {
        let mut master = StdRng::seed_from_u64(self.seed);
        let seeds: Vec<u64> = (0..self.n_estimators).map(|_| master.next_u64()).collect();

        let pool = ThreadPool::new(self.workers.min(self.n_estimators).max(1));
        let (tx, rx) = mpsc::channel();

        for (i, seed) in seeds.into_iter().enumerate() {
            let tx = tx.clone();
            let data = Arc::clone(&data);
            pool.execute(move || {
                let mut rng = StdRng::seed_from_u64(seed);
                let sample = rand::seq::index::sample(&mut rng, data.len(), psi).into_vec();
                let tree = IsolationTree::build(&data, sample, max_depth, &mut rng);
                // Receiver outlives the pool; a send error means the run was abandoned.
                let _ = tx.send((i, tree));
            });
        }
        drop(tx);

        let mut trees: Vec<(usize, IsolationTree)> = rx.iter().collect();
        if trees.len() < self.n_estimators {
            warn!(built = trees.len(), expected = self.n_estimators, "some isolation trees failed to build");
        }
        trees.sort_by_key(|(i, _)| *i);
        trees.into_iter().map(|(_, tree)| tree).collect()
    }
}

impl AnomalyScorer for IsolationForest {
    fn fit(&self, rows: &[FeatureRow]) -> AnomalyOutcome {
        let n = rows.len();
        let data: Vec<FeatureRow> = rows
            .iter()
            .map(|row| row.map(|v| if v.is_finite() { v } else { 0.0 }))
            .collect();

        if n < 2 || data.iter().all(|row| row == &data[0]) {
            debug!(rows = n, "degenerate anomaly input; all scores 0");
            return AnomalyOutcome::degenerate(n);
        }

        let psi = self.max_samples.min(n);
        let max_depth = (psi.max(2) as f64).log2().ceil() as usize;
        let data = Arc::new(data);
        let trees = self.build_trees(Arc::clone(&data), psi, max_depth);
        if trees.is_empty() {
            return AnomalyOutcome::degenerate(n);
        }

        let c_psi = average_path_length(psi);
        let score_samples: Vec<f64> = data
            .iter()
            .map(|row| {
                let mean_depth = trees.iter().map(|t| t.path_length(row)).sum::<f64>() / trees.len() as f64;
                -(2f64.powf(-mean_depth / c_psi))
            })
            .collect();

        let contamination = self.contamination.clamp(0.0, MAX_CONTAMINATION);
        let offset = percentile(&score_samples, 100.0 * contamination);
        let scores: Vec<f64> = score_samples.iter().map(|s| s - offset).collect();
        let flags: Vec<bool> = scores.iter().map(|&s| s < 0.0).collect();

        let outcome = AnomalyOutcome { scores, flags };
        debug!(
            rows = n,
            trees = trees.len(),
            sub_sample = psi,
            max_depth,
            offset,
            flagged = outcome.flagged_count(),
            "isolation forest fitted"
        );
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Deterministic cluster around 0.2 with a handful of far outliers.
    fn population(normal: usize, outliers: usize) -> Vec<FeatureRow> {
        let mut rng = StdRng::seed_from_u64(7);
        let mut rows: Vec<FeatureRow> = (0..normal)
            .map(|_| std::array::from_fn(|_| 0.2 + rng.gen_range(-0.03..0.03)))
            .collect();
        rows.extend((0..outliers).map(|i| [0.95, 0.9, 0.97 - i as f64 * 0.01, 0.9, 0.92, 1.0]));
        rows
    }

    #[test]
    fn test_average_path_length_values() {
        assert_eq!(average_path_length(1), 0.0);
        assert_eq!(average_path_length(2), 1.0);
        // c(256) from the isolation forest paper, ~10.24
        assert!((average_path_length(256) - 10.2448).abs() < 1e-3);
    }

    #[test]
    fn test_percentile_interpolates() {
        assert_eq!(percentile(&[4.0, 1.0, 3.0, 2.0], 0.0), 1.0);
        assert_eq!(percentile(&[4.0, 1.0, 3.0, 2.0], 100.0), 4.0);
        assert!((percentile(&[1.0, 2.0, 3.0, 4.0, 5.0], 10.0) - 1.4).abs() < 1e-12);
        assert_eq!(percentile(&[1.0, 2.0, 3.0], 250.0), 3.0);
        assert_eq!(percentile(&[1.0, 2.0, 3.0], -5.0), 1.0);
    }

    #[test]
    fn test_contamination_above_range_is_capped() {
        let rows = population(40, 2);
        let capped = IsolationForest { contamination: 3.0, ..IsolationForest::default() }.fit(&rows);
        let half = IsolationForest { contamination: 0.5, ..IsolationForest::default() }.fit(&rows);
        assert_eq!(capped, half);
        assert!(capped.flagged_count() <= rows.len() / 2);
    }

    #[test]
    fn test_outliers_are_flagged() {
        let rows = population(90, 3);
        let outcome = IsolationForest::default().fit(&rows);
        for i in 90..93 {
            assert!(outcome.flags[i], "outlier row {i} not flagged (score {})", outcome.scores[i]);
            assert!(outcome.scores[i] < 0.0);
        }
    }

    #[test]
    fn test_flag_share_tracks_contamination() {
        let rows = population(200, 0);
        let outcome = IsolationForest::default().fit(&rows);
        let share = outcome.flagged_count() as f64 / rows.len() as f64;
        assert!(share > 0.05 && share <= 0.10, "flagged share {share}");
    }

    #[test]
    fn test_deterministic_across_worker_counts() {
        let rows = population(60, 2);
        let single = IsolationForest::default().fit(&rows);
        let parallel = IsolationForest { workers: 8, ..IsolationForest::default() }.fit(&rows);
        assert_eq!(single, parallel, "tree order must not depend on scheduling");
    }

    #[test]
    fn test_degenerate_inputs() {
        let forest = IsolationForest::default();
        assert_eq!(forest.fit(&[]), AnomalyOutcome::degenerate(0));
        assert_eq!(forest.fit(&[[0.5; 6]]), AnomalyOutcome::degenerate(1));
        assert_eq!(forest.fit(&vec![[0.1; 6]; 40]), AnomalyOutcome::degenerate(40));
    }

    #[test]
    fn test_seed_changes_scores() {
        let rows = population(50, 1);
        let a = IsolationForest::default().fit(&rows);
        let b = IsolationForest { seed: 43, ..IsolationForest::default() }.fit(&rows);
        assert_ne!(a.scores, b.scores);
    }
}
