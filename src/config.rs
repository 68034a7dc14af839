/// Engine configuration loader - parses risk.toml
///
/// Keeps radii, weights and estimator parameters out of the code so a
/// deployment can retune them without recompiling. Every section is
/// optional; missing sections and keys fall back to the defaults below.
/// The loaded value is validated once and treated as immutable afterwards.

use serde::Deserialize;
use std::fs;
use std::path::Path;
use thiserror::Error;

use crate::geometry::BoundingBox;
use crate::model::{FeatureRow, HazardCategory, SubScores};
use crate::projection::ProjectionParams;

/// Default config file name, resolved against the working directory.
pub const DEFAULT_CONFIG_PATH: &str = "risk.toml";

/// Tolerance on the weight sum.
pub const WEIGHT_SUM_TOLERANCE: f64 = 1e-6;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("risk weights must sum to 1.0 (±{tolerance}), got {sum}")]
    WeightSum { sum: f64, tolerance: f64 },
    #[error("risk weight '{name}' must be non-negative and finite, got {value}")]
    InvalidWeight { name: &'static str, value: f64 },
    #[error("radius '{name}' must be positive and finite, got {value}")]
    InvalidRadius { name: String, value: f64 },
    #[error("contamination must be in (0, 0.5], got {0}")]
    Contamination(f64),
    #[error("{name} must be at least 1")]
    ZeroCount { name: &'static str },
    #[error("{name} must be positive and finite, got {value}")]
    NonPositive { name: &'static str, value: f64 },
    #[error("region bounding box is empty or out of range: {0:?}")]
    InvalidRegion(BoundingBox),
    #[error("projection check failed: {pair} measured {computed_m:.0} m, expected {expected_m:.0} m")]
    ProjectionCheck {
        pair: &'static str,
        computed_m: f64,
        expected_m: f64,
    },
}

// ---------------------------------------------------------------------------
// Sections
// ---------------------------------------------------------------------------

/// Root of risk.toml.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiskConfig {
    pub projection: ProjectionParams,
    pub region: RegionConfig,
    pub attribution: AttributionConfig,
    pub scoring_radii: ScoringRadiiConfig,
    pub weights: RiskWeights,
    pub coastal: CoastalConfig,
    pub anomaly: AnomalyConfig,
    pub density: DensityConfig,
    pub persistence: PersistenceConfig,
    pub execution: ExecutionConfig,
}

/// Coarse lon/lat pre-filter applied to repository reads.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct RegionConfig {
    pub enabled: bool,
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl Default for RegionConfig {
    /// Europe, including the Canaries, Iceland and Cyprus.
    fn default() -> Self {
        Self {
            enabled: true,
            min_lon: -25.0,
            min_lat: 34.0,
            max_lon: 45.0,
            max_lat: 72.0,
        }
    }
}

impl RegionConfig {
    pub fn bbox(&self) -> Option<BoundingBox> {
        self.enabled.then_some(BoundingBox {
            min_lon: self.min_lon,
            min_lat: self.min_lat,
            max_lon: self.max_lon,
            max_lat: self.max_lat,
        })
    }
}

/// Nearest-site attribution radii (km). The effective radius for a category
/// is `min(category radius, max_search_km)`.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AttributionConfig {
    pub urban_km: f64,
    pub climate_km: f64,
    pub seismic_km: f64,
    pub fire_km: f64,
    pub flood_km: f64,
    pub max_search_km: f64,
}

impl Default for AttributionConfig {
    fn default() -> Self {
        Self {
            urban_km: 5.0,
            climate_km: 10.0,
            seismic_km: 50.0,
            fire_km: 25.0,
            flood_km: 50.0,
            max_search_km: 100.0,
        }
    }
}

impl AttributionConfig {
    /// Configured radius for a category, before the global cap.
    pub fn category_km(&self, category: HazardCategory) -> f64 {
        match category {
            HazardCategory::Urban => self.urban_km,
            HazardCategory::Climate => self.climate_km,
            HazardCategory::Seismic => self.seismic_km,
            HazardCategory::Fire => self.fire_km,
            HazardCategory::Flood => self.flood_km,
        }
    }

    /// Effective attribution radius in meters.
    pub fn radius_m(&self, category: HazardCategory) -> f64 {
        self.category_km(category).min(self.max_search_km) * 1000.0
    }
}

/// Radius-bounded join radii (km) feeding the sub-score calculators.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct ScoringRadiiConfig {
    pub urban_km: f64,
    pub climate_km: f64,
    pub seismic_km: f64,
    pub fire_km: f64,
    pub flood_km: f64,
}

impl Default for ScoringRadiiConfig {
    fn default() -> Self {
        Self {
            urban_km: 10.0,
            climate_km: 10.0,
            seismic_km: 200.0,
            fire_km: 100.0,
            flood_km: 100.0,
        }
    }
}

impl ScoringRadiiConfig {
    pub fn radius_m(&self, category: HazardCategory) -> f64 {
        let km = match category {
            HazardCategory::Urban => self.urban_km,
            HazardCategory::Climate => self.climate_km,
            HazardCategory::Seismic => self.seismic_km,
            HazardCategory::Fire => self.fire_km,
            HazardCategory::Flood => self.flood_km,
        };
        km * 1000.0
    }
}

/// Composite weights, one per sub-score.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize)]
#[serde(default)]
pub struct RiskWeights {
    pub urban_density: f64,
    pub climate_anomaly: f64,
    pub seismic: f64,
    pub fire: f64,
    pub flood: f64,
    pub coastal: f64,
}

impl Default for RiskWeights {
    fn default() -> Self {
        Self {
            urban_density: 0.25,
            climate_anomaly: 0.20,
            seismic: 0.20,
            fire: 0.15,
            flood: 0.10,
            coastal: 0.10,
        }
    }
}

impl RiskWeights {
    const NAMES: [&'static str; 6] = [
        "urban_density",
        "climate_anomaly",
        "seismic",
        "fire",
        "flood",
        "coastal",
    ];

    pub fn as_row(&self) -> FeatureRow {
        SubScores {
            urban_density: self.urban_density,
            climate_anomaly: self.climate_anomaly,
            seismic: self.seismic,
            fire: self.fire,
            flood: self.flood,
            coastal: self.coastal,
        }
        .as_row()
    }

    /// Every weight non-negative and finite; sum within tolerance of 1.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let row = self.as_row();
        for (name, value) in Self::NAMES.into_iter().zip(row) {
            if !value.is_finite() || value < 0.0 {
                return Err(ConfigError::InvalidWeight { name, value });
            }
        }
        let sum: f64 = row.iter().sum();
        if (sum - 1.0).abs() > WEIGHT_SUM_TOLERANCE {
            return Err(ConfigError::WeightSum {
                sum,
                tolerance: WEIGHT_SUM_TOLERANCE,
            });
        }
        Ok(())
    }
}

/// Coastal exposure from elevation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct CoastalConfig {
    /// Sites at or above this elevation are not coastal-eligible.
    pub eligibility_elevation_m: f64,
    /// Sites farther than this from the coast are not eligible (when known).
    pub max_coast_distance_km: f64,
    /// Elevation at which the score reaches zero.
    pub zero_risk_elevation_m: f64,
}

impl Default for CoastalConfig {
    fn default() -> Self {
        Self {
            eligibility_elevation_m: 50.0,
            max_coast_distance_km: 50.0,
            zero_risk_elevation_m: 10.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct AnomalyConfig {
    pub n_estimators: usize,
    pub contamination: f64,
    pub max_samples: usize,
    pub seed: u64,
}

impl Default for AnomalyConfig {
    fn default() -> Self {
        Self {
            n_estimators: 200,
            contamination: 0.10,
            max_samples: 256,
            seed: 42,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct DensityConfig {
    pub bandwidth_m: f64,
    /// Neighbours beyond `cutoff_bandwidths * bandwidth_m` are ignored.
    pub cutoff_bandwidths: f64,
    /// Radius of the per-site density summary.
    pub summary_radius_km: f64,
}

impl Default for DensityConfig {
    fn default() -> Self {
        Self {
            bandwidth_m: 1000.0,
            cutoff_bandwidths: 8.0,
            summary_radius_km: 5.0,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct PersistenceConfig {
    pub batch_size: usize,
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl Default for PersistenceConfig {
    fn default() -> Self {
        Self {
            batch_size: 500,
            max_attempts: 3,
            retry_backoff_ms: 250,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Worker threads; `None` uses the available parallelism.
    pub workers: Option<usize>,
}

impl ExecutionConfig {
    pub fn worker_count(&self) -> usize {
        self.workers.filter(|&n| n > 0).unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl RiskConfig {
    /// Reads, parses and validates a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml_str(&contents)
    }

    /// Loads `risk.toml` from the working directory if present, defaults
    /// otherwise.
    pub fn load_default() -> Result<Self, ConfigError> {
        if Path::new(DEFAULT_CONFIG_PATH).exists() {
            Self::load(DEFAULT_CONFIG_PATH)
        } else {
            let config = Self::default();
            config.validate()?;
            Ok(config)
        }
    }

    pub fn from_toml_str(contents: &str) -> Result<Self, ConfigError> {
        let config: RiskConfig = toml::from_str(contents)?;
        config.validate()?;
        Ok(config)
    }

    /// Checks every constraint; the first violation is returned.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.weights.validate()?;

        for category in HazardCategory::ALL {
            check_radius(
                format!("attribution.{}_km", category),
                self.attribution.category_km(category),
            )?;
            check_radius(
                format!("scoring_radii.{}_km", category),
                self.scoring_radii.radius_m(category),
            )?;
        }
        check_radius("attribution.max_search_km".to_string(), self.attribution.max_search_km)?;
        check_radius(
            "density.summary_radius_km".to_string(),
            self.density.summary_radius_km,
        )?;

        let c = self.anomaly.contamination;
        if !(c > 0.0 && c <= 0.5) {
            return Err(ConfigError::Contamination(c));
        }
        if self.anomaly.n_estimators == 0 {
            return Err(ConfigError::ZeroCount { name: "anomaly.n_estimators" });
        }
        if self.anomaly.max_samples == 0 {
            return Err(ConfigError::ZeroCount { name: "anomaly.max_samples" });
        }

        check_positive("density.bandwidth_m", self.density.bandwidth_m)?;
        check_positive("density.cutoff_bandwidths", self.density.cutoff_bandwidths)?;
        check_positive("coastal.zero_risk_elevation_m", self.coastal.zero_risk_elevation_m)?;
        check_positive("coastal.max_coast_distance_km", self.coastal.max_coast_distance_km)?;
        if !self.coastal.eligibility_elevation_m.is_finite() {
            return Err(ConfigError::NonPositive {
                name: "coastal.eligibility_elevation_m",
                value: self.coastal.eligibility_elevation_m,
            });
        }

        if self.persistence.batch_size == 0 {
            return Err(ConfigError::ZeroCount { name: "persistence.batch_size" });
        }
        if self.persistence.max_attempts == 0 {
            return Err(ConfigError::ZeroCount { name: "persistence.max_attempts" });
        }

        if let Some(bbox) = self.region.bbox() {
            let ordered = bbox.min_lon < bbox.max_lon && bbox.min_lat < bbox.max_lat;
            let in_range = (-180.0..=180.0).contains(&bbox.min_lon)
                && (-180.0..=180.0).contains(&bbox.max_lon)
                && (-90.0..=90.0).contains(&bbox.min_lat)
                && (-90.0..=90.0).contains(&bbox.max_lat);
            if !ordered || !in_range {
                return Err(ConfigError::InvalidRegion(bbox));
            }
        }

        Ok(())
    }
}

fn check_radius(name: String, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::InvalidRadius { name, value })
    }
}

fn check_positive(name: &'static str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::NonPositive { name, value })
    }
}
