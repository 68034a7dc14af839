/// Kernel density of urban build-out.
///
/// A fixed-bandwidth Gaussian KDE over the metric anchors of urban features,
/// evaluated at each feature's own location. Per-site summaries aggregate
/// the self-densities of features within the summary radius. This is an
/// auxiliary annotation; it never feeds the composite score.

use serde::Serialize;
use std::collections::HashMap;
use std::f64::consts::PI;

use crate::model::{HazardCategory, MetricPoint, ObservationId, SiteId};
use crate::spatial::index::GridIndex;
use crate::spatial::radius::{group_by_site, radius_join};
use crate::spatial::{AnchoredObservation, SitePoint};

pub trait DensityEstimator: Send + Sync {
    /// Density at each input point, index-aligned with `points`.
    fn evaluate(&self, points: &[MetricPoint]) -> Vec<f64>;
}

/// `density(p) = (1/n) Σ exp(−|p − pᵢ|² / 2h²) / (2πh²)`, truncated at
/// `cutoff_bandwidths × h`.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct GaussianKde {
    pub bandwidth_m: f64,
    pub cutoff_bandwidths: f64,
}

impl Default for GaussianKde {
    fn default() -> Self {
        Self {
            bandwidth_m: 1000.0,
            cutoff_bandwidths: 8.0,
        }
    }
}

impl GaussianKde {
    pub fn new(bandwidth_m: f64, cutoff_bandwidths: f64) -> Self {
        Self { bandwidth_m, cutoff_bandwidths }
    }

    fn kernel(&self, d2: f64) -> f64 {
        let h2 = self.bandwidth_m * self.bandwidth_m;
        (-d2 / (2.0 * h2)).exp() / (2.0 * PI * h2)
    }
}

impl DensityEstimator for GaussianKde {
    fn evaluate(&self, points: &[MetricPoint]) -> Vec<f64> {
        if points.is_empty() {
            return Vec::new();
        }
        let cutoff = self.bandwidth_m * self.cutoff_bandwidths;
        let index = GridIndex::from_points(cutoff, points.iter().enumerate().map(|(i, p)| (*p, i)));
        let n = points.len() as f64;

        points
            .iter()
            .map(|p| {
                let sum: f64 = index
                    .within(*p, cutoff)
                    .into_iter()
                    .map(|(_, d)| self.kernel(d * d))
                    .sum();
                sum / n
            })
            .collect()
    }
}

// ---------------------------------------------------------------------------
// Per-feature and per-site outputs
// ---------------------------------------------------------------------------

/// Self-density of one urban feature, as written back to the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct FeatureDensity {
    pub observation_id: ObservationId,
    pub density: f64,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SiteDensitySummary {
    pub site_id: SiteId,
    pub feature_count: usize,
    pub mean: f64,
    pub max: f64,
    /// Sample standard deviation; 0 with fewer than two features.
    pub std_dev: f64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DensityReport {
    pub features: Vec<FeatureDensity>,
    pub sites: Vec<SiteDensitySummary>,
}

/// Evaluates self-densities for `features` and summarises them per site
/// within `summary_radius_m`. Site summaries follow `sites` order.
pub fn analyze(
    estimator: &dyn DensityEstimator,
    sites: &[SitePoint],
    features: &[AnchoredObservation],
    summary_radius_m: f64,
) -> DensityReport {
    let points: Vec<MetricPoint> = features.iter().map(|f| f.point).collect();
    let densities = estimator.evaluate(&points);

    let mut feature_densities: Vec<FeatureDensity> = features
        .iter()
        .zip(&densities)
        .map(|(f, &density)| FeatureDensity { observation_id: f.id, density })
        .collect();
    feature_densities.sort_by_key(|f| f.observation_id);

    let by_id: HashMap<ObservationId, f64> =
        feature_densities.iter().map(|f| (f.observation_id, f.density)).collect();
    let associations = radius_join(sites, features, HazardCategory::Urban, summary_radius_m);
    let grouped = group_by_site(&associations);

    let site_summaries = sites
        .iter()
        .map(|site| {
            let values: Vec<f64> = grouped
                .get(&site.site_id)
                .map(|assocs| assocs.iter().filter_map(|a| by_id.get(&a.observation_id).copied()).collect())
                .unwrap_or_default();
            summarize(site.site_id, &values)
        })
        .collect();

    DensityReport {
        features: feature_densities,
        sites: site_summaries,
    }
}

fn summarize(site_id: SiteId, values: &[f64]) -> SiteDensitySummary {
    if values.is_empty() {
        return SiteDensitySummary { site_id, ..SiteDensitySummary::default() };
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let std_dev = if values.len() > 1 {
        (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt()
    } else {
        0.0
    };
    SiteDensitySummary {
        site_id,
        feature_count: values.len(),
        mean,
        max,
        std_dev,
    }
}
