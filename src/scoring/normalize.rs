/// Batch-relative normalization of raw aggregates.
///
/// Raw aggregates are compressed with `log1p` and then min-max scaled
/// across all sites in the run, so a handful of extreme sites cannot
/// collapse everyone else to zero. Scores are only comparable within a run.

use tracing::warn;

/// Replaces non-finite or negative raw values with 0.
pub fn sanitize_raw(value: f64) -> f64 {
    if value.is_finite() && value > 0.0 { value } else { 0.0 }
}

/// `log1p` then min-max to [0, 1]. All-zero or constant batches map to 0.
pub fn log_minmax(raw: &[f64]) -> Vec<f64> {
    let non_finite = raw.iter().filter(|v| !v.is_finite()).count();
    if non_finite > 0 {
        warn!(count = non_finite, "non-finite raw aggregates substituted with 0");
    }

    let logged: Vec<f64> = raw.iter().map(|&v| sanitize_raw(v).ln_1p()).collect();
    let (min, max) = logged
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)));

    let range = max - min;
    if logged.is_empty() || !(range > 0.0) {
        return vec![0.0; logged.len()];
    }
    logged
        .into_iter()
        .map(|v| ((v - min) / range).clamp(0.0, 1.0))
        .collect()
}

/// Min / max / mean of a score column, for run logs.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ScoreSummary {
    pub min: f64,
    pub max: f64,
    pub mean: f64,
}

pub fn summarize(scores: &[f64]) -> ScoreSummary {
    if scores.is_empty() {
        return ScoreSummary::default();
    }
    let (min, max, sum) = scores.iter().fold(
        (f64::INFINITY, f64::NEG_INFINITY, 0.0),
        |(lo, hi, sum), &v| (lo.min(v), hi.max(v), sum + v),
    );
    ScoreSummary {
        min,
        max,
        mean: sum / scores.len() as f64,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extremes_map_to_zero_and_one() {
        let scores = log_minmax(&[0.0, 10.0, 1_000.0]);
        assert_eq!(scores[0], 0.0);
        assert_eq!(scores[2], 1.0);
        let expected = 11f64.ln() / 1001f64.ln();
        assert!((scores[1] - expected).abs() < 1e-12);
    }

    #[test]
    fn test_log_compression_lifts_middle_values() {
        let scores = log_minmax(&[0.0, 100.0, 1e9]);
        assert!(scores[1] > 0.2, "linear scaling would give ~1e-7, got {}", scores[1]);
    }

    #[test]
    fn test_all_zero_and_constant_batches() {
        assert_eq!(log_minmax(&[0.0, 0.0, 0.0]), vec![0.0, 0.0, 0.0]);
        assert_eq!(log_minmax(&[5.0, 5.0]), vec![0.0, 0.0]);
        assert!(log_minmax(&[]).is_empty());
    }

    #[test]
    fn test_non_finite_and_negative_become_zero() {
        let scores = log_minmax(&[f64::NAN, -3.0, f64::INFINITY, 4.0]);
        assert_eq!(scores, vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_summary() {
        let s = summarize(&[0.0, 0.5, 1.0]);
        assert_eq!(s, ScoreSummary { min: 0.0, max: 1.0, mean: 0.5 });
        assert_eq!(summarize(&[]), ScoreSummary::default());
    }
}
