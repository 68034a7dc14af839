/// Shared data types for the heritage site risk engine.
///
/// Sites and hazard observations arrive from the repository and are
/// read-only from the engine's point of view. `ProximityAssociation`s are
/// produced fresh by every run and `RiskProfile`s are the only records the
/// engine writes back.

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use crate::geometry::Geometry;

pub type SiteId = i64;
pub type ObservationId = i64;

// ---------------------------------------------------------------------------
// Coordinates
// ---------------------------------------------------------------------------

/// WGS84 longitude/latitude in decimal degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lon: f64,
    pub lat: f64,
}

impl GeoPoint {
    pub fn new(lon: f64, lat: f64) -> Self {
        Self { lon, lat }
    }
}

/// Easting/northing in meters in the engine's projected CRS.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub x: f64,
    pub y: f64,
}

impl MetricPoint {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance_to(&self, other: &MetricPoint) -> f64 {
        (self.x - other.x).hypot(self.y - other.y)
    }
}

// ---------------------------------------------------------------------------
// Sites
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SiteCategory {
    Cultural,
    Natural,
    Mixed,
}

impl SiteCategory {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "cultural" => Some(SiteCategory::Cultural),
            "natural" => Some(SiteCategory::Natural),
            "mixed" => Some(SiteCategory::Mixed),
            _ => None,
        }
    }
}

/// A heritage site whose exposure is being scored.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Site {
    pub id: SiteId,
    pub name: String,
    pub location: GeoPoint,
    pub category: SiteCategory,
    pub country: String,
    /// Ground elevation in meters, if a DEM sample was available.
    pub elevation_m: Option<f64>,
    /// Distance to the nearest coastline in kilometers, if known.
    pub coast_distance_km: Option<f64>,
    pub in_danger: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

// ---------------------------------------------------------------------------
// Hazard observations
// ---------------------------------------------------------------------------

/// Hazard families handled by the join engine. Coastal risk is derived from
/// elevation alone and has no observations.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum HazardCategory {
    Urban,
    Climate,
    Seismic,
    Fire,
    Flood,
}

impl HazardCategory {
    pub const ALL: [HazardCategory; 5] = [
        HazardCategory::Urban,
        HazardCategory::Climate,
        HazardCategory::Seismic,
        HazardCategory::Fire,
        HazardCategory::Flood,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            HazardCategory::Urban => "urban",
            HazardCategory::Climate => "climate",
            HazardCategory::Seismic => "seismic",
            HazardCategory::Fire => "fire",
            HazardCategory::Flood => "flood",
        }
    }
}

impl fmt::Display for HazardCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Advisory nearest-site cache carried by an observation. Reporting only;
/// scoring always goes through the radius-bounded join.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Attribution {
    pub site_id: SiteId,
    pub distance_m: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SeismicEvent {
    pub id: ObservationId,
    pub geometry: Option<Geometry>,
    pub event_time: DateTime<Utc>,
    pub magnitude: f64,
    pub depth_km: Option<f64>,
    pub nearest: Option<Attribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FireDetection {
    pub id: ObservationId,
    pub geometry: Option<Geometry>,
    pub acquired_on: NaiveDate,
    /// Fire radiative power in MW.
    pub frp_mw: f64,
    /// Detection confidence in percent (0-100).
    pub confidence_pct: f64,
    pub nearest: Option<Attribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FloodCell {
    pub id: ObservationId,
    pub geometry: Option<Geometry>,
    pub event_date: Option<NaiveDate>,
    pub intensity: f64,
    pub nearest: Option<Attribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UrbanFeature {
    pub id: ObservationId,
    pub geometry: Option<Geometry>,
    /// OSM feature family, e.g. "building" or "landuse".
    pub feature_type: String,
    pub nearest: Option<Attribution>,
}

impl UrbanFeature {
    pub fn is_building(&self) -> bool {
        self.feature_type.eq_ignore_ascii_case("building")
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClimateDayRecord {
    pub id: ObservationId,
    pub geometry: Option<Geometry>,
    pub date: NaiveDate,
    pub temp_max_c: Option<f64>,
    pub precipitation_mm: Option<f64>,
    pub wind_max_ms: Option<f64>,
    pub nearest: Option<Attribution>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum HazardObservation {
    Seismic(SeismicEvent),
    Fire(FireDetection),
    Flood(FloodCell),
    Urban(UrbanFeature),
    Climate(ClimateDayRecord),
}

impl HazardObservation {
    pub fn id(&self) -> ObservationId {
        match self {
            HazardObservation::Seismic(o) => o.id,
            HazardObservation::Fire(o) => o.id,
            HazardObservation::Flood(o) => o.id,
            HazardObservation::Urban(o) => o.id,
            HazardObservation::Climate(o) => o.id,
        }
    }

    pub fn category(&self) -> HazardCategory {
        match self {
            HazardObservation::Seismic(_) => HazardCategory::Seismic,
            HazardObservation::Fire(_) => HazardCategory::Fire,
            HazardObservation::Flood(_) => HazardCategory::Flood,
            HazardObservation::Urban(_) => HazardCategory::Urban,
            HazardObservation::Climate(_) => HazardCategory::Climate,
        }
    }

    pub fn geometry(&self) -> Option<&Geometry> {
        match self {
            HazardObservation::Seismic(o) => o.geometry.as_ref(),
            HazardObservation::Fire(o) => o.geometry.as_ref(),
            HazardObservation::Flood(o) => o.geometry.as_ref(),
            HazardObservation::Urban(o) => o.geometry.as_ref(),
            HazardObservation::Climate(o) => o.geometry.as_ref(),
        }
    }

    pub fn nearest(&self) -> Option<Attribution> {
        match self {
            HazardObservation::Seismic(o) => o.nearest,
            HazardObservation::Fire(o) => o.nearest,
            HazardObservation::Flood(o) => o.nearest,
            HazardObservation::Urban(o) => o.nearest,
            HazardObservation::Climate(o) => o.nearest,
        }
    }

    pub fn set_nearest(&mut self, nearest: Option<Attribution>) {
        match self {
            HazardObservation::Seismic(o) => o.nearest = nearest,
            HazardObservation::Fire(o) => o.nearest = nearest,
            HazardObservation::Flood(o) => o.nearest = nearest,
            HazardObservation::Urban(o) => o.nearest = nearest,
            HazardObservation::Climate(o) => o.nearest = nearest,
        }
    }
}

/// Result of nearest-site attribution for one observation, as written back
/// to the store.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ObservationAttribution {
    pub observation_id: ObservationId,
    pub nearest: Option<Attribution>,
}

// ---------------------------------------------------------------------------
// Join output
// ---------------------------------------------------------------------------

/// One row of the radius-bounded many-to-many join. Never persisted.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProximityAssociation {
    pub site_id: SiteId,
    pub observation_id: ObservationId,
    pub category: HazardCategory,
    pub distance_m: f64,
    pub radius_m: f64,
}

// ---------------------------------------------------------------------------
// Risk profile
// ---------------------------------------------------------------------------

/// Discrete risk band derived from the composite score.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskLevel {
    pub const ALL: [RiskLevel; 4] = [
        RiskLevel::Low,
        RiskLevel::Medium,
        RiskLevel::High,
        RiskLevel::Critical,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RiskLevel::Low => "low",
            RiskLevel::Medium => "medium",
            RiskLevel::High => "high",
            RiskLevel::Critical => "critical",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The six normalized sub-scores, each in [0, 1].
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct SubScores {
    pub urban_density: f64,
    pub climate_anomaly: f64,
    pub seismic: f64,
    pub fire: f64,
    pub flood: f64,
    pub coastal: f64,
}

/// Sub-scores laid out as an anomaly-model feature row.
pub type FeatureRow = [f64; 6];

impl SubScores {
    pub fn as_row(&self) -> FeatureRow {
        [
            self.urban_density,
            self.climate_anomaly,
            self.seismic,
            self.fire,
            self.flood,
            self.coastal,
        ]
    }
}

/// Per-site risk profile, overwritten wholesale on each run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RiskProfile {
    pub site_id: SiteId,
    pub scores: SubScores,
    pub composite: f64,
    pub level: RiskLevel,
    /// Isolation-forest decision value; negative means anomalous.
    pub anomaly_score: f64,
    pub is_anomaly: bool,
    pub computed_at: DateTime<Utc>,
}
