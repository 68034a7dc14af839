/// One scoring run, end to end.
///
/// ```text
/// load sites ──► project ──┐
/// load hazards ─► anchor ──┼─► attribute nearest ─► record_attributions
///                          └─► radius join ─► per-site raw aggregates (thread pool)
///                                               │        density (scoped thread)
///                                               ▼                 │
///                                     log1p + min-max, coastal    │
///                                               ▼                 │
///                                 composite ─► anomaly ─► level   │
///                                               ▼                 ▼
///                                 batched upsert_profiles   store_feature_densities
/// ```
///
/// The repository is injected; the pipeline holds no connection state and
/// its configuration is immutable once constructed.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use std::collections::BTreeMap;
use std::sync::{Arc, mpsc};
use std::thread;
use std::time::Duration;
use thiserror::Error;
use threadpool::ThreadPool;
use tracing::{debug, info, warn};

use crate::anomaly::{AnomalyOutcome, AnomalyScorer, IsolationForest};
use crate::config::{CoastalConfig, ConfigError, RiskConfig};
use crate::density::{self, DensityEstimator, DensityReport, GaussianKde, SiteDensitySummary};
use crate::model::{HazardCategory, ProximityAssociation, RiskLevel, RiskProfile, Site, SubScores};
use crate::projection::{Projection, ProjectionError};
use crate::repository::{RepositoryError, RiskRepository};
use crate::scoring::composite::{composite_score, final_level};
use crate::scoring::normalize::{log_minmax, summarize};
use crate::scoring::{HazardSet, SiteBreakdown, breakdown_site};
use crate::spatial::nearest::attribute_nearest;
use crate::spatial::radius::{group_by_site, radius_join};
use crate::spatial::{
    AnchoredObservation, REPORTING_RING_RADII_M, SiteBuffer, SitePoint, anchor_observations, buffer_rings,
    feature_collection, project_sites,
};

#[derive(Debug, Error)]
pub enum RunError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("projection error: {0}")]
    Projection(#[from] ProjectionError),
    #[error("repository error: {0}")]
    Repository(#[from] RepositoryError),
    #[error("failed to persist profile batch {batch} after {attempts} attempts: {source}")]
    Persistence {
        batch: usize,
        attempts: u32,
        #[source]
        source: RepositoryError,
    },
    #[error("scoring workers returned {received} of {expected} site results")]
    WorkerLost { expected: usize, received: usize },
}

#[derive(Debug, Clone, Copy)]
pub struct RunOptions {
    /// Compute everything, write nothing.
    pub dry_run: bool,
    /// Stamped on every profile. Re-running with the same value reproduces
    /// the same profiles.
    pub run_at: DateTime<Utc>,
}

impl RunOptions {
    pub fn new(run_at: DateTime<Utc>) -> Self {
        Self { dry_run: false, run_at }
    }

    pub fn now() -> Self {
        Self::new(Utc::now())
    }

    pub fn dry_run(mut self) -> Self {
        self.dry_run = true;
        self
    }
}

/// Everything a run computed, plus what it wrote.
#[derive(Debug, Clone, Serialize)]
pub struct RunReport {
    pub run_at: DateTime<Utc>,
    pub dry_run: bool,
    /// In site load order.
    pub profiles: Vec<RiskProfile>,
    /// Raw aggregates, index-aligned with `profiles`.
    pub breakdowns: Vec<SiteBreakdown>,
    pub density: Vec<SiteDensitySummary>,
    pub level_counts: BTreeMap<RiskLevel, usize>,
    pub anomaly_count: usize,
    pub association_counts: BTreeMap<HazardCategory, usize>,
    pub skipped_observations: BTreeMap<HazardCategory, usize>,
    pub unprojectable_sites: usize,
    pub persisted_profiles: usize,
    pub persisted_attributions: usize,
    pub persisted_densities: usize,
}

impl RunReport {
    /// Flagged sites, most anomalous first.
    pub fn top_anomalies(&self, n: usize) -> Vec<&RiskProfile> {
        let mut flagged: Vec<&RiskProfile> = self.profiles.iter().filter(|p| p.is_anomaly).collect();
        flagged.sort_by(|a, b| {
            a.anomaly_score
                .total_cmp(&b.anomaly_score)
                .then(a.site_id.cmp(&b.site_id))
        });
        flagged.truncate(n);
        flagged
    }

    pub fn profile(&self, site_id: i64) -> Option<&RiskProfile> {
        self.profiles.iter().find(|p| p.site_id == site_id)
    }
}

// ---------------------------------------------------------------------------
// Pipeline
// ---------------------------------------------------------------------------

pub struct RiskPipeline {
    config: RiskConfig,
    projection: Projection,
    scorer: Box<dyn AnomalyScorer>,
    estimator: Box<dyn DensityEstimator>,
}

/// Joined inputs for the scoring stage.
struct JoinedInputs {
    sites: Vec<Site>,
    hazards: Arc<HazardSet>,
    associations: Vec<ProximityAssociation>,
    urban_anchors: Vec<AnchoredObservation>,
    site_points: Vec<SitePoint>,
    association_counts: BTreeMap<HazardCategory, usize>,
    skipped_observations: BTreeMap<HazardCategory, usize>,
    unprojectable_sites: usize,
    persisted_attributions: usize,
}

impl RiskPipeline {
    /// Validates `config` and the projection reference distances, then wires
    /// the default isolation forest and Gaussian KDE.
    pub fn new(config: RiskConfig) -> Result<Self, RunError> {
        config.validate()?;

        let projection = Projection::new(config.projection);
        for check in projection.check_reference_distances()? {
            if !check.passed() {
                return Err(ConfigError::ProjectionCheck {
                    pair: check.name,
                    computed_m: check.computed_m,
                    expected_m: check.expected_m,
                }
                .into());
            }
            debug!(pair = check.name, computed_m = check.computed_m, "projection reference check passed");
        }

        let workers = config.execution.worker_count();
        let scorer: Box<dyn AnomalyScorer> = Box::new(IsolationForest::from_config(&config.anomaly, workers));
        let estimator: Box<dyn DensityEstimator> = Box::new(GaussianKde::new(
            config.density.bandwidth_m,
            config.density.cutoff_bandwidths,
        ));

        Ok(Self {
            config,
            projection,
            scorer,
            estimator,
        })
    }

    pub fn with_scorer(mut self, scorer: Box<dyn AnomalyScorer>) -> Self {
        self.scorer = scorer;
        self
    }

    pub fn with_estimator(mut self, estimator: Box<dyn DensityEstimator>) -> Self {
        self.estimator = estimator;
        self
    }

    pub fn config(&self) -> &RiskConfig {
        &self.config
    }

    pub fn projection(&self) -> &Projection {
        &self.projection
    }

    pub fn run<R: RiskRepository + ?Sized>(
        &self,
        repo: &mut R,
        options: &RunOptions,
    ) -> Result<RunReport, RunError> {
        info!(run_at = %options.run_at, dry_run = options.dry_run, "starting risk run");

        let inputs = self.load_and_join(repo, options)?;
        let summary_radius_m = self.config.density.summary_radius_km * 1000.0;

        // Density only needs urban anchors, so it overlaps per-site scoring.
        let (breakdowns, density_report) = thread::scope(|s| {
            let density_handle = s.spawn(|| {
                density::analyze(
                    self.estimator.as_ref(),
                    &inputs.site_points,
                    &inputs.urban_anchors,
                    summary_radius_m,
                )
            });
            let breakdowns = self.compute_breakdowns(&inputs);
            let density_report: DensityReport = density_handle
                .join()
                .unwrap_or_else(|panic| std::panic::resume_unwind(panic));
            (breakdowns, density_report)
        });
        let breakdowns = breakdowns?;

        let scores = self.normalize(&breakdowns);
        let composites: Vec<f64> = scores
            .iter()
            .map(|s| composite_score(s, &self.config.weights))
            .collect();

        let rows: Vec<_> = scores.iter().map(SubScores::as_row).collect();
        let mut outcome = self.scorer.fit(&rows);
        if outcome.scores.len() != rows.len() || outcome.flags.len() != rows.len() {
            warn!(
                expected = rows.len(),
                scores = outcome.scores.len(),
                "anomaly scorer returned misaligned output; treating run as non-anomalous"
            );
            outcome = AnomalyOutcome::degenerate(rows.len());
        }

        let profiles: Vec<RiskProfile> = inputs
            .sites
            .iter()
            .zip(&scores)
            .zip(&composites)
            .enumerate()
            .map(|(i, ((site, scores), &composite))| RiskProfile {
                site_id: site.id,
                scores: *scores,
                composite,
                level: final_level(composite, outcome.flags[i]),
                anomaly_score: outcome.scores[i],
                is_anomaly: outcome.flags[i],
                computed_at: options.run_at,
            })
            .collect();

        let mut level_counts: BTreeMap<RiskLevel, usize> = RiskLevel::ALL.iter().map(|&l| (l, 0)).collect();
        for p in &profiles {
            *level_counts.entry(p.level).or_default() += 1;
        }
        let anomaly_count = outcome.flagged_count();
        let composite_summary = summarize(&composites);
        info!(
            sites = profiles.len(),
            anomalies = anomaly_count,
            composite_min = composite_summary.min,
            composite_max = composite_summary.max,
            composite_mean = composite_summary.mean,
            "profiles computed"
        );
        for (level, count) in &level_counts {
            info!(%level, count, "risk level distribution");
        }

        let mut report = RunReport {
            run_at: options.run_at,
            dry_run: options.dry_run,
            profiles,
            breakdowns,
            density: density_report.sites,
            level_counts,
            anomaly_count,
            association_counts: inputs.association_counts,
            skipped_observations: inputs.skipped_observations,
            unprojectable_sites: inputs.unprojectable_sites,
            persisted_profiles: 0,
            persisted_attributions: inputs.persisted_attributions,
            persisted_densities: 0,
        };

        if options.dry_run {
            info!("dry run: nothing persisted");
            return Ok(report);
        }

        report.persisted_profiles = self.persist_profiles(repo, &report.profiles)?;
        report.persisted_densities = repo.store_feature_densities(&density_report.features)?;
        info!(
            profiles = report.persisted_profiles,
            densities = report.persisted_densities,
            "run persisted"
        );
        Ok(report)
    }

    /// Concentric reporting rings around every site as one GeoJSON
    /// FeatureCollection. Sites whose rings cannot be built are skipped.
    pub fn reporting_buffers(&self, sites: &[Site]) -> Value {
        let mut buffers: Vec<SiteBuffer> = Vec::new();
        for site in sites {
            match buffer_rings(&self.projection, site, &REPORTING_RING_RADII_M) {
                Ok(rings) => buffers.extend(rings),
                Err(e) => warn!(site_id = site.id, error = %e, "could not build reporting rings"),
            }
        }
        feature_collection(&buffers)
    }

    // -----------------------------------------------------------------------
    // Stages
    // -----------------------------------------------------------------------

    fn load_and_join<R: RiskRepository + ?Sized>(
        &self,
        repo: &mut R,
        options: &RunOptions,
    ) -> Result<JoinedInputs, RunError> {
        let region = self.config.region.bbox();
        let sites = repo.load_sites(region.as_ref())?;
        let site_points = project_sites(&self.projection, &sites);
        let unprojectable_sites = sites.len() - site_points.len();
        info!(sites = sites.len(), unprojectable = unprojectable_sites, "sites loaded");

        let mut observations = Vec::new();
        let mut associations = Vec::new();
        let mut urban_anchors = Vec::new();
        let mut association_counts = BTreeMap::new();
        let mut skipped_observations = BTreeMap::new();
        let mut persisted_attributions = 0;

        for category in HazardCategory::ALL {
            let loaded = repo.load_hazards(category, region.as_ref())?;
            let (anchored, skipped) = anchor_observations(&self.projection, &loaded);

            let attribution_radius_m = self.config.attribution.radius_m(category);
            let attributions = attribute_nearest(&site_points, &anchored, attribution_radius_m);
            if !options.dry_run {
                persisted_attributions += repo.record_attributions(category, &attributions)?;
            }

            let scoring_radius_m = self.config.scoring_radii.radius_m(category);
            let joined = radius_join(&site_points, &anchored, category, scoring_radius_m);
            info!(
                %category,
                loaded = loaded.len(),
                skipped,
                associations = joined.len(),
                scoring_radius_km = scoring_radius_m / 1000.0,
                "hazards joined"
            );

            association_counts.insert(category, joined.len());
            skipped_observations.insert(category, skipped);
            associations.extend(joined);
            if category == HazardCategory::Urban {
                urban_anchors = anchored;
            }
            observations.extend(loaded);
        }

        Ok(JoinedInputs {
            hazards: Arc::new(HazardSet::from_observations(&self.projection, observations)),
            sites,
            associations,
            urban_anchors,
            site_points,
            association_counts,
            skipped_observations,
            unprojectable_sites,
            persisted_attributions,
        })
    }

    /// Raw aggregates per site on the worker pool, reassembled in site
    /// order.
    fn compute_breakdowns(&self, inputs: &JoinedInputs) -> Result<Vec<SiteBreakdown>, RunError> {
        let expected = inputs.sites.len();
        if expected == 0 {
            return Ok(Vec::new());
        }

        let coastal: Arc<CoastalConfig> = Arc::new(self.config.coastal.clone());
        let mut grouped = group_by_site(&inputs.associations);

        let workers = self.config.execution.worker_count().min(expected).max(1);
        let pool = ThreadPool::new(workers);
        let (tx, rx) = mpsc::channel();

        for (idx, site) in inputs.sites.iter().enumerate() {
            let tx = tx.clone();
            let site = site.clone();
            let associations = grouped.remove(&site.id).unwrap_or_default();
            let hazards = Arc::clone(&inputs.hazards);
            let coastal = Arc::clone(&coastal);
            pool.execute(move || {
                let breakdown = breakdown_site(&site, &associations, &hazards, &coastal);
                // The receiver outlives the pool.
                let _ = tx.send((idx, breakdown));
            });
        }
        drop(tx);

        let mut results: Vec<(usize, SiteBreakdown)> = rx.iter().collect();
        if results.len() != expected {
            return Err(RunError::WorkerLost {
                expected,
                received: results.len(),
            });
        }
        results.sort_by_key(|(idx, _)| *idx);
        debug!(sites = expected, workers, "per-site aggregates computed");
        Ok(results.into_iter().map(|(_, b)| b).collect())
    }

    /// Min-max normalizes each raw column across the run; coastal passes
    /// through.
    fn normalize(&self, breakdowns: &[SiteBreakdown]) -> Vec<SubScores> {
        const COLUMNS: [&str; 5] = ["urban_density", "climate_anomaly", "seismic", "fire", "flood"];

        let raw_rows: Vec<[f64; 5]> = breakdowns.iter().map(SiteBreakdown::raw_row).collect();
        let columns: Vec<Vec<f64>> = (0..COLUMNS.len())
            .map(|c| {
                let raw: Vec<f64> = raw_rows.iter().map(|row| row[c]).collect();
                log_minmax(&raw)
            })
            .collect();

        for (name, column) in COLUMNS.iter().zip(&columns) {
            let s = summarize(column);
            info!(score = *name, min = s.min, max = s.max, mean = s.mean, "sub-score normalized");
        }

        breakdowns
            .iter()
            .enumerate()
            .map(|(i, b)| SubScores {
                urban_density: columns[0][i],
                climate_anomaly: columns[1][i],
                seismic: columns[2][i],
                fire: columns[3][i],
                flood: columns[4][i],
                coastal: b.coastal.score,
            })
            .collect()
    }

    /// Upserts in `batch_size` chunks; a failed chunk is retried with linear
    /// backoff up to `max_attempts` times.
    fn persist_profiles<R: RiskRepository + ?Sized>(
        &self,
        repo: &mut R,
        profiles: &[RiskProfile],
    ) -> Result<usize, RunError> {
        let persistence = &self.config.persistence;
        let max_attempts = persistence.max_attempts.max(1);
        let mut written = 0;

        for (batch, chunk) in profiles.chunks(persistence.batch_size.max(1)).enumerate() {
            let mut attempt = 1;
            loop {
                match repo.upsert_profiles(chunk) {
                    Ok(n) => {
                        written += n;
                        debug!(batch, rows = n, attempt, "profile batch committed");
                        break;
                    }
                    Err(e) if attempt < max_attempts => {
                        warn!(batch, attempt, error = %e, "profile batch failed; retrying");
                        thread::sleep(Duration::from_millis(persistence.retry_backoff_ms * attempt as u64));
                        attempt += 1;
                    }
                    Err(source) => {
                        return Err(RunError::Persistence {
                            batch,
                            attempts: attempt,
                            source,
                        });
                    }
                }
            }
        }
        Ok(written)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::InMemoryRepository;
    use crate::spatial::test_support::site;
    use chrono::TimeZone;

    fn run_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
    }

    fn profile(site_id: i64, score: f64, is_anomaly: bool) -> RiskProfile {
        RiskProfile {
            site_id,
            scores: SubScores::default(),
            composite: 0.0,
            level: RiskLevel::Low,
            anomaly_score: score,
            is_anomaly,
            computed_at: run_at(),
        }
    }

    #[test]
    fn test_top_anomalies_most_negative_first() {
        let report = RunReport {
            run_at: run_at(),
            dry_run: true,
            profiles: vec![
                profile(1, -0.05, true),
                profile(2, 0.10, false),
                profile(3, -0.20, true),
                profile(4, -0.05, true),
            ],
            breakdowns: Vec::new(),
            density: Vec::new(),
            level_counts: BTreeMap::new(),
            anomaly_count: 3,
            association_counts: BTreeMap::new(),
            skipped_observations: BTreeMap::new(),
            unprojectable_sites: 0,
            persisted_profiles: 0,
            persisted_attributions: 0,
            persisted_densities: 0,
        };
        let ids: Vec<i64> = report.top_anomalies(2).iter().map(|p| p.site_id).collect();
        assert_eq!(ids, vec![3, 1], "ties broken by site id");
        assert_eq!(report.top_anomalies(10).len(), 3, "unflagged sites never listed");
    }

    #[test]
    fn test_invalid_weights_rejected_at_construction() {
        let mut config = RiskConfig::default();
        config.weights.urban_density = 0.9;
        assert!(matches!(
            RiskPipeline::new(config),
            Err(RunError::Config(ConfigError::WeightSum { .. }))
        ));
    }

    #[test]
    fn test_empty_repository_yields_empty_report() {
        let pipeline = RiskPipeline::new(RiskConfig::default()).unwrap();
        let mut repo = InMemoryRepository::new();
        let report = pipeline.run(&mut repo, &RunOptions::new(run_at())).unwrap();
        assert!(report.profiles.is_empty());
        assert_eq!(report.level_counts.values().sum::<usize>(), 0);
        assert_eq!(report.persisted_profiles, 0);
    }

    #[test]
    fn test_reporting_buffers_four_rings_per_site() {
        let pipeline = RiskPipeline::new(RiskConfig::default()).unwrap();
        let fc = pipeline.reporting_buffers(&[site(1, 12.49, 41.89), site(2, 2.35, 48.86)]);
        let features = fc["features"].as_array().unwrap();
        assert_eq!(features.len(), 8);
        assert_eq!(features[0]["properties"]["radius_m"], 5_000.0);
        assert_eq!(features[3]["properties"]["radius_m"], 50_000.0);
    }
}
