/// Nearest-site attribution.
///
/// Each observation is tagged with the single closest site inside a bounded
/// search radius. The tag is an advisory cache for reporting; scoring never
/// reads it.

use std::collections::HashMap;

use tracing::debug;

use crate::model::{Attribution, HazardObservation, ObservationAttribution};
use crate::spatial::index::GridIndex;
use crate::spatial::{AnchoredObservation, SitePoint};

/// Attributes every anchored observation to its nearest site within
/// `radius_m`, or to nothing. Output is ordered by observation id.
pub fn attribute_nearest(
    sites: &[SitePoint],
    observations: &[AnchoredObservation],
    radius_m: f64,
) -> Vec<ObservationAttribution> {
    let index = GridIndex::from_points(radius_m, sites.iter().map(|s| (s.point, s.site_id)));

    let mut out: Vec<ObservationAttribution> = observations
        .iter()
        .map(|obs| ObservationAttribution {
            observation_id: obs.id,
            nearest: index
                .nearest_within(obs.point, radius_m)
                .map(|(site_id, distance_m)| Attribution { site_id, distance_m }),
        })
        .collect();
    out.sort_by_key(|a| a.observation_id);

    let attributed = out.iter().filter(|a| a.nearest.is_some()).count();
    debug!(
        observations = out.len(),
        attributed,
        radius_m,
        "nearest-site attribution complete"
    );
    out
}

/// Writes attribution results into the observations' advisory cache.
/// Observations without a result are left untouched.
pub fn apply_attributions(observations: &mut [HazardObservation], attributions: &[ObservationAttribution]) {
    let by_id: HashMap<_, _> = attributions
        .iter()
        .map(|a| (a.observation_id, a.nearest))
        .collect();
    for obs in observations {
        if let Some(nearest) = by_id.get(&obs.id()) {
            obs.set_nearest(*nearest);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{MetricPoint, SeismicEvent};
    use chrono::{TimeZone, Utc};

    fn site(id: i64, x: f64, y: f64) -> SitePoint {
        SitePoint { site_id: id, point: MetricPoint::new(x, y) }
    }

    fn obs(id: i64, x: f64, y: f64) -> AnchoredObservation {
        AnchoredObservation { id, point: MetricPoint::new(x, y) }
    }

    #[test]
    fn test_picks_closest_site() {
        let sites = [site(1, 0.0, 0.0), site(2, 10_000.0, 0.0)];
        let result = attribute_nearest(&sites, &[obs(100, 7_000.0, 0.0)], 50_000.0);
        assert_eq!(
            result[0].nearest,
            Some(Attribution { site_id: 2, distance_m: 3_000.0 })
        );
    }

    #[test]
    fn test_exact_tie_goes_to_lower_site_id() {
        let sites = [site(8, 2_000.0, 0.0), site(3, -2_000.0, 0.0)];
        let result = attribute_nearest(&sites, &[obs(1, 0.0, 0.0)], 5_000.0);
        assert_eq!(result[0].nearest.map(|a| a.site_id), Some(3));
    }

    #[test]
    fn test_beyond_radius_is_unset() {
        let sites = [site(1, 0.0, 0.0)];
        let result = attribute_nearest(&sites, &[obs(1, 5_000.5, 0.0), obs(2, 5_000.0, 0.0)], 5_000.0);
        assert_eq!(result[0].nearest, None, "5000.5 m is outside a 5 km bound");
        assert!(result[1].nearest.is_some(), "5000 m is on the boundary");
    }

    #[test]
    fn test_output_ordered_by_observation_id() {
        let sites = [site(1, 0.0, 0.0)];
        let result = attribute_nearest(&sites, &[obs(30, 1.0, 0.0), obs(10, 2.0, 0.0), obs(20, 3.0, 0.0)], 100.0);
        let ids: Vec<i64> = result.iter().map(|a| a.observation_id).collect();
        assert_eq!(ids, vec![10, 20, 30]);
    }

    #[test]
    fn test_apply_sets_and_clears_cache() {
        let event = |id| {
            HazardObservation::Seismic(SeismicEvent {
                id,
                geometry: None,
                event_time: Utc.with_ymd_and_hms(2023, 2, 6, 1, 17, 0).unwrap(),
                magnitude: 5.0,
                depth_km: None,
                nearest: Some(Attribution { site_id: 99, distance_m: 1.0 }),
            })
        };
        let mut observations = vec![event(1), event(2), event(3)];
        apply_attributions(
            &mut observations,
            &[
                ObservationAttribution {
                    observation_id: 1,
                    nearest: Some(Attribution { site_id: 5, distance_m: 40.0 }),
                },
                ObservationAttribution { observation_id: 2, nearest: None },
            ],
        );
        assert_eq!(observations[0].nearest().map(|a| a.site_id), Some(5));
        assert_eq!(observations[1].nearest(), None, "stale cache is cleared");
        assert_eq!(observations[2].nearest().map(|a| a.site_id), Some(99), "untouched");
    }
}
