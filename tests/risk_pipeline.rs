/// End-to-end scoring runs against the in-memory repository
///
/// These tests verify:
/// 1. Every score lands in [0, 1] and levels follow the composite bands
/// 2. Re-running with the same timestamp is an idempotent upsert
/// 3. Sites with no nearby hazards score zero
/// 4. An anomaly flag forces the level to critical
/// 5. Invalid weights stop the run before anything is written
/// 6. Transient write failures are retried; persistent ones surface
///    without leaving a partial batch
/// 7. Advisory attributions and feature densities are written back
///
/// Run with: cargo test --test risk_pipeline

use chrono::{DateTime, NaiveDate, TimeZone, Utc};
use heritage_risk::anomaly::{AnomalyOutcome, AnomalyScorer};
use heritage_risk::config::{ConfigError, RiskConfig};
use heritage_risk::geometry::Geometry;
use heritage_risk::model::{
    FeatureRow, FireDetection, FloodCell, GeoPoint, HazardCategory, HazardObservation, RiskLevel,
    SeismicEvent, Site, SiteCategory, UrbanFeature,
};
use heritage_risk::pipeline::{RiskPipeline, RunError, RunOptions};
use heritage_risk::repository::{InMemoryRepository, RepositoryError};
use heritage_risk::scoring::composite::final_level;

// ---------------------------------------------------------------------------
// Fixtures
// ---------------------------------------------------------------------------

const ROME: i64 = 1;
const UMBRIA: i64 = 2;
const PARIS: i64 = 3;
const VENICE: i64 = 4;

fn run_at() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

fn site(id: i64, lon: f64, lat: f64, elevation_m: Option<f64>) -> Site {
    let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
    Site {
        id,
        name: format!("Site {id}"),
        location: GeoPoint::new(lon, lat),
        category: SiteCategory::Cultural,
        country: "Italy".to_string(),
        elevation_m,
        coast_distance_km: None,
        in_danger: false,
        created_at: ts,
        updated_at: ts,
    }
}

fn point(lon: f64, lat: f64) -> Option<Geometry> {
    Some(Geometry::Point(GeoPoint::new(lon, lat)))
}

fn quake(id: i64, lon: f64, lat: f64, magnitude: f64) -> HazardObservation {
    HazardObservation::Seismic(SeismicEvent {
        id,
        geometry: point(lon, lat),
        event_time: Utc.with_ymd_and_hms(2016, 8, 24, 1, 36, 0).unwrap(),
        magnitude,
        depth_km: Some(10.0),
        nearest: None,
    })
}

fn fire(id: i64, lon: f64, lat: f64) -> HazardObservation {
    HazardObservation::Fire(FireDetection {
        id,
        geometry: point(lon, lat),
        acquired_on: NaiveDate::from_ymd_opt(2023, 7, 20).unwrap(),
        frp_mw: 40.0,
        confidence_pct: 80.0,
        nearest: None,
    })
}

fn flood(id: i64, lon: f64, lat: f64, day: u32) -> HazardObservation {
    HazardObservation::Flood(FloodCell {
        id,
        geometry: point(lon, lat),
        event_date: NaiveDate::from_ymd_opt(2019, 11, day),
        intensity: 1.5,
        nearest: None,
    })
}

fn building(id: i64, lon: f64, lat: f64) -> HazardObservation {
    let d = 0.0005;
    HazardObservation::Urban(UrbanFeature {
        id,
        geometry: Some(Geometry::Polygon(vec![
            GeoPoint::new(lon, lat),
            GeoPoint::new(lon + d, lat),
            GeoPoint::new(lon + d, lat + d),
            GeoPoint::new(lon, lat + d),
        ])),
        feature_type: "building".to_string(),
        nearest: None,
    })
}

/// Rome has a nearby quake, fires, floods and buildings; Umbria (~144 km
/// north) sees the quake from afar; Paris sees nothing; Venice sits 2 m
/// above sea level.
fn repository() -> InMemoryRepository {
    InMemoryRepository::new()
        .with_sites(vec![
            site(ROME, 12.4964, 41.9028, Some(21.0)),
            site(UMBRIA, 12.4964, 43.2, Some(400.0)),
            site(PARIS, 2.3522, 48.8566, None),
            site(VENICE, 12.3155, 45.4408, Some(2.0)),
        ])
        .with_hazards(vec![
            quake(100, 12.4964, 41.95, 5.5),
            fire(200, 12.55, 41.92),
            fire(201, 12.45, 41.88),
            flood(300, 12.48, 41.91, 12),
            flood(301, 12.50, 41.89, 13),
            building(400, 12.4970, 41.9035),
            building(401, 12.4990, 41.9010),
            building(402, 12.4930, 41.9050),
        ])
}

fn config() -> RiskConfig {
    let mut config = RiskConfig::default();
    config.anomaly.n_estimators = 50;
    config.persistence.retry_backoff_ms = 0;
    config.execution.workers = Some(2);
    config
}

/// Scorer that never flags anything.
struct Calm;

impl AnomalyScorer for Calm {
    fn fit(&self, rows: &[FeatureRow]) -> AnomalyOutcome {
        AnomalyOutcome::degenerate(rows.len())
    }
}

/// Flags exactly the first row.
struct FlagFirst;

impl AnomalyScorer for FlagFirst {
    fn fit(&self, rows: &[FeatureRow]) -> AnomalyOutcome {
        let mut outcome = AnomalyOutcome::degenerate(rows.len());
        if let Some(first) = outcome.flags.first_mut() {
            *first = true;
            outcome.scores[0] = -0.3;
        }
        outcome
    }
}

fn calm_pipeline(config: RiskConfig) -> RiskPipeline {
    RiskPipeline::new(config).unwrap().with_scorer(Box::new(Calm))
}

// ---------------------------------------------------------------------------
// Score bounds and levels
// ---------------------------------------------------------------------------

#[test]
fn test_scores_bounded_and_levels_follow_composite() {
    let pipeline = RiskPipeline::new(config()).unwrap();
    let mut repo = repository();
    let report = pipeline.run(&mut repo, &RunOptions::new(run_at())).unwrap();

    assert_eq!(report.profiles.len(), 4);
    for p in &report.profiles {
        for s in p.scores.as_row() {
            assert!((0.0..=1.0).contains(&s), "sub-score {} out of range for site {}", s, p.site_id);
        }
        assert!((0.0..=1.0).contains(&p.composite), "composite out of range for site {}", p.site_id);
        assert_eq!(p.level, final_level(p.composite, p.is_anomaly));
        assert_eq!(p.computed_at, run_at());
        if p.is_anomaly {
            assert_eq!(p.level, RiskLevel::Critical, "anomalies are always critical");
        }
    }
    assert_eq!(report.level_counts.values().sum::<usize>(), 4);
    assert_eq!(
        report.anomaly_count,
        report.profiles.iter().filter(|p| p.is_anomaly).count()
    );
    assert_eq!(report.persisted_profiles, 4);
    assert_eq!(repo.profiles().len(), 4);
}

#[test]
fn test_closer_quake_scores_higher() {
    let pipeline = calm_pipeline(config());
    let report = pipeline.run(&mut repository(), &RunOptions::new(run_at()).dry_run()).unwrap();

    let rome = report.profile(ROME).unwrap();
    let umbria = report.profile(UMBRIA).unwrap();
    assert_eq!(rome.scores.seismic, 1.0, "nearest site tops the seismic column");
    assert!(
        umbria.scores.seismic > 0.0 && umbria.scores.seismic < 1.0,
        "distant site within 200 km gets a partial score, got {}",
        umbria.scores.seismic
    );
    assert_eq!(rome.scores.fire, 1.0);
    assert_eq!(rome.scores.flood, 1.0);
    assert_eq!(rome.scores.urban_density, 1.0);

    let breakdown = &report.breakdowns[0];
    assert_eq!(breakdown.site_id, ROME);
    assert_eq!(breakdown.seismic.event_count, 1);
    assert_eq!(breakdown.fire.detection_count, 2);
    assert_eq!(breakdown.urban.building_count, 3);
    assert_eq!(breakdown.flood.event_frequency, 2, "two distinct dates");
}

#[test]
fn test_site_without_hazards_scores_zero() {
    let pipeline = calm_pipeline(config());
    let report = pipeline.run(&mut repository(), &RunOptions::new(run_at())).unwrap();

    let paris = report.profile(PARIS).unwrap();
    assert_eq!(paris.scores.as_row(), [0.0; 6]);
    assert_eq!(paris.composite, 0.0);
    assert_eq!(paris.level, RiskLevel::Low);
    assert!(!paris.is_anomaly);
}

#[test]
fn test_quiet_majority_site_stays_low_under_isolation_forest() {
    // Ten sites along 36°N, each ~11 km from its own quake of rising
    // magnitude and ~450 km from the next; twenty quiet inland sites at 60°N.
    const QUIET: i64 = 99;
    let mut sites = Vec::new();
    let mut hazards = Vec::new();
    for i in 0..10 {
        let lon = -9.0 + 5.0 * i as f64;
        sites.push(site(10 + i, lon, 36.0, Some(400.0)));
        hazards.push(quake(500 + i, lon, 36.1, 4.0 + 0.3 * i as f64));
    }
    for i in 0..20 {
        let id = if i == 0 { QUIET } else { 100 + i };
        sites.push(site(id, -5.0 + i as f64, 60.0, Some(400.0)));
    }
    let mut repo = InMemoryRepository::new().with_sites(sites).with_hazards(hazards);

    let pipeline = RiskPipeline::new(config()).unwrap();
    let report = pipeline.run(&mut repo, &RunOptions::new(run_at())).unwrap();

    let quiet = report.profile(QUIET).unwrap();
    assert_eq!(quiet.scores.as_row(), [0.0; 6]);
    assert_eq!(quiet.composite, 0.0);
    assert!(!quiet.is_anomaly, "anomaly score was {}", quiet.anomaly_score);
    assert_eq!(quiet.level, RiskLevel::Low);
    assert!(
        report.profiles.iter().filter(|p| p.is_anomaly).all(|p| p.scores.seismic > 0.0),
        "only the exposed sites can stand out"
    );
}

#[test]
fn test_low_lying_site_gets_coastal_score() {
    let pipeline = calm_pipeline(config());
    let report = pipeline.run(&mut repository(), &RunOptions::new(run_at())).unwrap();

    let venice = report.profile(VENICE).unwrap();
    assert!((venice.scores.coastal - 0.8).abs() < 1e-12, "2 m elevation → 0.8");
    assert_eq!(report.profile(ROME).unwrap().scores.coastal, 0.0, "21 m is above the zero-risk line");
    assert_eq!(report.profile(PARIS).unwrap().scores.coastal, 0.0, "unknown elevation");
}

// ---------------------------------------------------------------------------
// Anomalies
// ---------------------------------------------------------------------------

#[test]
fn test_anomaly_forces_critical() {
    let pipeline = RiskPipeline::new(config()).unwrap().with_scorer(Box::new(FlagFirst));
    let report = pipeline.run(&mut repository(), &RunOptions::new(run_at())).unwrap();

    let rome = report.profile(ROME).unwrap();
    assert!(rome.is_anomaly);
    assert_eq!(rome.level, RiskLevel::Critical);
    assert_eq!(rome.anomaly_score, -0.3);
    assert_eq!(report.anomaly_count, 1);
    assert_eq!(report.top_anomalies(5).len(), 1);
    assert_eq!(report.profile(PARIS).unwrap().level, RiskLevel::Low);
}

// ---------------------------------------------------------------------------
// Idempotence and dry runs
// ---------------------------------------------------------------------------

#[test]
fn test_rerun_is_idempotent() {
    let pipeline = RiskPipeline::new(config()).unwrap();
    let mut repo = repository();
    let options = RunOptions::new(run_at());

    let first = pipeline.run(&mut repo, &options).unwrap();
    let stored: Vec<_> = repo.profiles().into_iter().cloned().collect();
    let second = pipeline.run(&mut repo, &options).unwrap();

    assert_eq!(first.profiles, second.profiles, "same inputs and timestamp → same profiles");
    assert_eq!(repo.profiles().len(), 4, "upsert by site id, no duplicates");
    let restored: Vec<_> = repo.profiles().into_iter().cloned().collect();
    assert_eq!(stored, restored);
}

#[test]
fn test_dry_run_writes_nothing() {
    let pipeline = calm_pipeline(config());
    let mut repo = repository();
    let report = pipeline.run(&mut repo, &RunOptions::new(run_at()).dry_run()).unwrap();

    assert_eq!(report.profiles.len(), 4);
    assert!(report.dry_run);
    assert_eq!(repo.upsert_calls(), 0);
    assert!(repo.profiles().is_empty());
    assert_eq!(repo.attribution_count(), 0);
    assert_eq!(repo.feature_density(400), None);
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

#[test]
fn test_invalid_weights_abort_before_any_write() {
    let toml = r#"
        [weights]
        urban_density = 0.5
        climate_anomaly = 0.5
        seismic = 0.2
        fire = 0.0
        flood = 0.0
        coastal = 0.0
    "#;
    assert!(matches!(RiskConfig::from_toml_str(toml), Err(ConfigError::WeightSum { .. })));

    let mut bad = config();
    bad.weights.seismic = -0.1;
    bad.weights.urban_density = 0.55;
    let repo = repository();
    let result = RiskPipeline::new(bad);
    assert!(matches!(result, Err(RunError::Config(ConfigError::InvalidWeight { name: "seismic", .. }))));
    assert_eq!(repo.upsert_calls(), 0);
    assert_eq!(repo.attribution_count(), 0);
}

// ---------------------------------------------------------------------------
// Persistence
// ---------------------------------------------------------------------------

#[test]
fn test_transient_failure_is_retried() {
    let mut cfg = config();
    cfg.persistence.batch_size = 2;
    let pipeline = calm_pipeline(cfg);
    let mut repo = repository();
    repo.fail_next_upserts(1);

    let report = pipeline.run(&mut repo, &RunOptions::new(run_at())).unwrap();
    assert_eq!(report.persisted_profiles, 4);
    assert_eq!(repo.committed_batches(), 2);
    assert_eq!(repo.upsert_calls(), 3, "one retry for the first batch");
}

#[test]
fn test_persistent_failure_leaves_no_partial_batch() {
    let mut cfg = config();
    cfg.persistence.batch_size = 2;
    cfg.persistence.max_attempts = 3;
    let pipeline = calm_pipeline(cfg);
    let mut repo = repository();
    repo.poison_site(PARIS);

    let err = pipeline.run(&mut repo, &RunOptions::new(run_at())).unwrap_err();
    match err {
        RunError::Persistence { batch, attempts, source } => {
            assert_eq!(batch, 1, "sites 3 and 4 form the second batch");
            assert_eq!(attempts, 3);
            assert!(matches!(source, RepositoryError::WriteRejected(_)));
        }
        other => panic!("expected a persistence error, got {other}"),
    }

    assert!(repo.profile(ROME).is_some(), "first batch committed");
    assert!(repo.profile(UMBRIA).is_some());
    assert!(repo.profile(PARIS).is_none(), "failed batch wrote nothing");
    assert!(repo.profile(VENICE).is_none(), "failed batch wrote nothing");
    assert_eq!(repo.upsert_calls(), 4);
}

// ---------------------------------------------------------------------------
// Write-back and data errors
// ---------------------------------------------------------------------------

#[test]
fn test_attributions_and_densities_written_back() {
    let pipeline = calm_pipeline(config());
    let mut repo = repository();
    let report = pipeline.run(&mut repo, &RunOptions::new(run_at())).unwrap();

    let quake = repo.attribution(HazardCategory::Seismic, 100).expect("quake attributed");
    assert_eq!(quake.site_id, ROME);
    assert!(quake.distance_m > 5_000.0 && quake.distance_m < 5_600.0, "got {}", quake.distance_m);
    assert_eq!(
        repo.attribution(HazardCategory::Urban, 400).map(|a| a.site_id),
        Some(ROME)
    );

    for id in [400, 401, 402] {
        let density = repo.feature_density(id).expect("density stored");
        assert!(density > 0.0);
    }
    assert_eq!(report.persisted_densities, 3);

    let rome_density = report.density.iter().find(|d| d.site_id == ROME).unwrap();
    assert_eq!(rome_density.feature_count, 3);
    let paris_density = report.density.iter().find(|d| d.site_id == PARIS).unwrap();
    assert_eq!(paris_density.feature_count, 0);
}

#[test]
fn test_bad_geometry_is_skipped_not_fatal() {
    let mut repo = repository().with_hazards(vec![
        HazardObservation::Flood(FloodCell {
            id: 900,
            geometry: Some(Geometry::Polygon(vec![
                GeoPoint::new(12.49, 41.90),
                GeoPoint::new(12.50, 41.90),
            ])),
            event_date: None,
            intensity: 9.0,
            nearest: None,
        }),
        HazardObservation::Flood(FloodCell {
            id: 901,
            geometry: None,
            event_date: None,
            intensity: 9.0,
            nearest: None,
        }),
    ]);
    let pipeline = calm_pipeline(config());
    let report = pipeline.run(&mut repo, &RunOptions::new(run_at())).unwrap();

    assert_eq!(report.skipped_observations[&HazardCategory::Flood], 2);
    assert_eq!(report.association_counts[&HazardCategory::Flood], 2, "only the two valid cells join");
    assert_eq!(report.profiles.len(), 4);
}
