/// Coastal exposure from ground elevation.
///
/// A site is coastal-eligible when its elevation is known and below
/// `eligibility_elevation_m` and, if its distance to the coast is known,
/// that distance is within `max_coast_distance_km`. Eligible sites score
/// `max(0, 1 − elevation / zero_risk_elevation_m)`; sites below sea level
/// score 1. The score is already in [0, 1] and is not normalized.

use serde::Serialize;
use tracing::debug;

use crate::config::CoastalConfig;
use crate::model::Site;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct CoastalAssessment {
    pub elevation_m: Option<f64>,
    pub eligible: bool,
    pub score: f64,
}

pub fn coastal_score(elevation_m: f64, config: &CoastalConfig) -> f64 {
    if elevation_m < 0.0 {
        return 1.0;
    }
    (1.0 - elevation_m / config.zero_risk_elevation_m).clamp(0.0, 1.0)
}

pub fn assess(site: &Site, config: &CoastalConfig) -> CoastalAssessment {
    let Some(elevation) = site.elevation_m.filter(|e| e.is_finite()) else {
        debug!(site_id = site.id, "no elevation; coastal score 0");
        return CoastalAssessment::default();
    };

    let near_coast = site
        .coast_distance_km
        .filter(|d| d.is_finite())
        .is_none_or(|d| d <= config.max_coast_distance_km);
    let eligible = elevation < config.eligibility_elevation_m && near_coast;

    CoastalAssessment {
        elevation_m: Some(elevation),
        eligible,
        score: if eligible { coastal_score(elevation, config) } else { 0.0 },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::spatial::test_support::site;

    fn at_elevation(elevation: Option<f64>, coast_km: Option<f64>) -> Site {
        let mut s = site(1, 12.33, 45.44);
        s.elevation_m = elevation;
        s.coast_distance_km = coast_km;
        s
    }

    #[test]
    fn test_two_metres_scores_point_eight() {
        let a = assess(&at_elevation(Some(2.0), None), &CoastalConfig::default());
        assert!(a.eligible);
        assert!((a.score - 0.8).abs() < 1e-12);
    }

    #[test]
    fn test_linear_on_zero_to_ten() {
        let config = CoastalConfig::default();
        for e in [0.0, 1.0, 2.5, 5.0, 9.99, 10.0] {
            let expected = (1.0 - e / 10.0_f64).max(0.0);
            assert!((coastal_score(e, &config) - expected).abs() < 1e-12, "elevation {e}");
        }
        assert_eq!(coastal_score(35.0, &config), 0.0);
    }

    #[test]
    fn test_below_sea_level_scores_one() {
        let a = assess(&at_elevation(Some(-4.0), None), &CoastalConfig::default());
        assert_eq!(a.score, 1.0);
    }

    #[test]
    fn test_ineligible_sites_score_zero() {
        let config = CoastalConfig::default();
        assert_eq!(assess(&at_elevation(None, None), &config).score, 0.0);
        assert_eq!(assess(&at_elevation(Some(f64::NAN), None), &config).score, 0.0);

        let inland = assess(&at_elevation(Some(3.0), Some(120.0)), &config);
        assert!(!inland.eligible, "120 km from the coast");
        assert_eq!(inland.score, 0.0);

        let upland = assess(&at_elevation(Some(450.0), Some(5.0)), &config);
        assert!(!upland.eligible);
    }
}
