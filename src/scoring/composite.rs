/// Weighted composite of the six sub-scores and its risk band.

use crate::config::RiskWeights;
use crate::model::{RiskLevel, SubScores};

pub const MEDIUM_THRESHOLD: f64 = 0.25;
pub const HIGH_THRESHOLD: f64 = 0.50;
pub const CRITICAL_THRESHOLD: f64 = 0.75;

/// `Σ wᵢ·sᵢ`, clamped to [0, 1].
pub fn composite_score(scores: &SubScores, weights: &RiskWeights) -> f64 {
    let sum: f64 = scores
        .as_row()
        .iter()
        .zip(weights.as_row())
        .map(|(s, w)| s * w)
        .sum();
    if sum.is_finite() { sum.clamp(0.0, 1.0) } else { 0.0 }
}

/// Half-open bands: low [0, .25), medium [.25, .5), high [.5, .75),
/// critical [.75, 1].
pub fn classify(composite: f64) -> RiskLevel {
    if composite >= CRITICAL_THRESHOLD {
        RiskLevel::Critical
    } else if composite >= HIGH_THRESHOLD {
        RiskLevel::High
    } else if composite >= MEDIUM_THRESHOLD {
        RiskLevel::Medium
    } else {
        RiskLevel::Low
    }
}

/// Band level, raised to critical when the site is an outlier.
pub fn final_level(composite: f64, is_anomaly: bool) -> RiskLevel {
    if is_anomaly { RiskLevel::Critical } else { classify(composite) }
}
