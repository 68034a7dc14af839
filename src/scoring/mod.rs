/// Sub-score calculators and the composite model.
///
/// Each calculator turns one site's radius-joined observations into a raw
/// aggregate. Raw aggregates are normalized across the whole run by
/// `normalize::log_minmax`; coastal risk is already in [0, 1] and bypasses
/// normalization. `composite` combines the six sub-scores.
///
/// Submodules:
/// - `normalize` — log1p + batch min-max
/// - `urban`, `climate`, `seismic`, `fire`, `flood`, `coastal` — calculators
/// - `composite` — weighted sum and level bands

pub mod climate;
pub mod coastal;
pub mod composite;
pub mod fire;
pub mod flood;
pub mod normalize;
pub mod seismic;
pub mod urban;

use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

use crate::config::CoastalConfig;
use crate::model::{
    ClimateDayRecord, FireDetection, FloodCell, HazardCategory, HazardObservation, ObservationId,
    ProximityAssociation, SeismicEvent, Site, SiteId, UrbanFeature,
};
use crate::projection::Projection;

/// Attenuation distances are floored at 100 m.
pub const MIN_ATTENUATION_KM: f64 = 0.1;

pub fn attenuation_km(distance_m: f64) -> f64 {
    (distance_m / 1000.0).max(MIN_ATTENUATION_KM)
}

/// An observation joined to a site, with its metric distance.
#[derive(Debug)]
pub struct Joined<'a, T> {
    pub obs: &'a T,
    pub distance_m: f64,
}

impl<T> Clone for Joined<'_, T> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<T> Copy for Joined<'_, T> {}

// ---------------------------------------------------------------------------
// Observation lookup
// ---------------------------------------------------------------------------

/// Observations of a run keyed by id, plus pre-computed building footprint
/// areas. Shared read-only by the scoring workers.
#[derive(Debug, Default)]
pub struct HazardSet {
    pub seismic: HashMap<ObservationId, SeismicEvent>,
    pub fire: HashMap<ObservationId, FireDetection>,
    pub flood: HashMap<ObservationId, FloodCell>,
    pub urban: HashMap<ObservationId, UrbanFeature>,
    pub climate: HashMap<ObservationId, ClimateDayRecord>,
    pub footprint_areas_m2: HashMap<ObservationId, f64>,
}

impl HazardSet {
    pub fn from_observations(projection: &Projection, observations: Vec<HazardObservation>) -> Self {
        let mut set = HazardSet::default();
        for obs in observations {
            match obs {
                HazardObservation::Seismic(o) => {
                    set.seismic.insert(o.id, o);
                }
                HazardObservation::Fire(o) => {
                    set.fire.insert(o.id, o);
                }
                HazardObservation::Flood(o) => {
                    set.flood.insert(o.id, o);
                }
                HazardObservation::Urban(o) => {
                    let area = urban::footprint_area_m2(projection, &o);
                    if area > 0.0 {
                        set.footprint_areas_m2.insert(o.id, area);
                    }
                    set.urban.insert(o.id, o);
                }
                HazardObservation::Climate(o) => {
                    set.climate.insert(o.id, o);
                }
            }
        }
        set
    }

    pub fn len(&self, category: HazardCategory) -> usize {
        match category {
            HazardCategory::Seismic => self.seismic.len(),
            HazardCategory::Fire => self.fire.len(),
            HazardCategory::Flood => self.flood.len(),
            HazardCategory::Urban => self.urban.len(),
            HazardCategory::Climate => self.climate.len(),
        }
    }
}

fn resolve<'a, T>(
    map: &'a HashMap<ObservationId, T>,
    associations: &[ProximityAssociation],
    category: HazardCategory,
) -> Vec<Joined<'a, T>> {
    associations
        .iter()
        .filter(|a| a.category == category)
        .filter_map(|a| match map.get(&a.observation_id) {
            Some(obs) => Some(Joined { obs, distance_m: a.distance_m }),
            None => {
                warn!(%category, observation_id = a.observation_id, "association references unknown observation");
                None
            }
        })
        .collect()
}

// ---------------------------------------------------------------------------
// Per-site breakdown
// ---------------------------------------------------------------------------

/// Raw aggregates for one site, before normalization.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SiteBreakdown {
    pub site_id: SiteId,
    pub urban: urban::UrbanAggregate,
    pub climate: climate::ClimateAggregate,
    pub seismic: seismic::SeismicAggregate,
    pub fire: fire::FireAggregate,
    pub flood: flood::FloodAggregate,
    pub coastal: coastal::CoastalAssessment,
}

impl SiteBreakdown {
    /// Raw values of the five normalized sub-scores, in `SubScores` order.
    pub fn raw_row(&self) -> [f64; 5] {
        [
            self.urban.raw(),
            self.climate.raw(),
            self.seismic.raw(),
            self.fire.raw(),
            self.flood.raw(),
        ]
    }
}

/// Computes every raw aggregate for one site from its associations (all
/// categories mixed).
pub fn breakdown_site(
    site: &Site,
    associations: &[ProximityAssociation],
    hazards: &HazardSet,
    coastal_config: &CoastalConfig,
) -> SiteBreakdown {
    let urban_joined = resolve(&hazards.urban, associations, HazardCategory::Urban);
    let climate_joined = resolve(&hazards.climate, associations, HazardCategory::Climate);
    let seismic_joined = resolve(&hazards.seismic, associations, HazardCategory::Seismic);
    let fire_joined = resolve(&hazards.fire, associations, HazardCategory::Fire);
    let flood_joined = resolve(&hazards.flood, associations, HazardCategory::Flood);

    SiteBreakdown {
        site_id: site.id,
        urban: urban::aggregate(&urban_joined, &hazards.footprint_areas_m2),
        climate: climate::aggregate(&climate_joined),
        seismic: seismic::aggregate(&seismic_joined),
        fire: fire::aggregate(&fire_joined),
        flood: flood::aggregate(&flood_joined),
        coastal: coastal::assess(site, coastal_config),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::geometry::Geometry;
    use crate::model::GeoPoint;
    use crate::spatial::test_support::site;
    use chrono::{NaiveDate, TimeZone, Utc};

    fn assoc(category: HazardCategory, observation_id: i64, distance_m: f64) -> ProximityAssociation {
        ProximityAssociation {
            site_id: 1,
            observation_id,
            category,
            distance_m,
            radius_m: 200_000.0,
        }
    }

    #[test]
    fn test_attenuation_floor() {
        assert_eq!(attenuation_km(0.0), 0.1);
        assert_eq!(attenuation_km(50.0), 0.1);
        assert_eq!(attenuation_km(2_500.0), 2.5);
    }

    #[test]
    fn test_breakdown_routes_categories() {
        let proj = Projection::etrs89_laea();
        let observations = vec![
            HazardObservation::Seismic(SeismicEvent {
                id: 1,
                geometry: Some(Geometry::Point(GeoPoint::new(13.0, 42.0))),
                event_time: Utc.with_ymd_and_hms(2016, 8, 24, 1, 36, 0).unwrap(),
                magnitude: 2.0,
                depth_km: None,
                nearest: None,
            }),
            HazardObservation::Flood(FloodCell {
                id: 1,
                geometry: Some(Geometry::Point(GeoPoint::new(13.0, 42.0))),
                event_date: NaiveDate::from_ymd_opt(2023, 5, 16),
                intensity: 4.0,
                nearest: None,
            }),
        ];
        let hazards = HazardSet::from_observations(&proj, observations);
        assert_eq!(hazards.len(HazardCategory::Seismic), 1);
        assert_eq!(hazards.len(HazardCategory::Flood), 1);

        let associations = [
            assoc(HazardCategory::Seismic, 1, 10_000.0),
            assoc(HazardCategory::Flood, 1, 10_000.0),
            assoc(HazardCategory::Fire, 42, 10_000.0),
        ];
        let b = breakdown_site(&site(1, 13.1, 42.0), &associations, &hazards, &CoastalConfig::default());

        assert_eq!(b.seismic.event_count, 1);
        assert!((b.seismic.raw() - 1_000.0 / 100.0).abs() < 1e-9);
        assert_eq!(b.flood.cell_count, 1);
        assert_eq!(b.fire.detection_count, 0, "unknown fire id is ignored");
        assert_eq!(b.urban.feature_count, 0);
    }

    #[test]
    fn test_empty_site_has_zero_raws() {
        let b = breakdown_site(&site(3, 0.0, 45.0), &[], &HazardSet::default(), &CoastalConfig::default());
        assert_eq!(b.raw_row(), [0.0; 5]);
        assert_eq!(b.coastal.score, 0.0);
    }
}
