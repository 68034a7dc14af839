/// Urban encroachment: how much has been built around a site.
///
/// `raw = feature count + building footprint area (km²)`.

use serde::Serialize;
use std::collections::HashMap;
use tracing::warn;

use crate::geometry::Geometry;
use crate::model::{ObservationId, UrbanFeature};
use crate::projection::Projection;
use crate::scoring::Joined;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct UrbanAggregate {
    pub feature_count: usize,
    pub building_count: usize,
    pub building_area_m2: f64,
}

impl UrbanAggregate {
    pub fn raw(&self) -> f64 {
        self.feature_count as f64 + self.building_area_m2 / 1e6
    }
}

/// Footprint area of a building polygon in m². Points, non-building
/// features and unprojectable polygons contribute 0.
pub fn footprint_area_m2(projection: &Projection, feature: &UrbanFeature) -> f64 {
    if !feature.is_building() {
        return 0.0;
    }
    match &feature.geometry {
        Some(Geometry::Polygon(ring)) => match projection.polygon_area_m2(ring) {
            Ok(area) => area,
            Err(e) => {
                warn!(observation_id = feature.id, error = %e, "building footprint area unavailable");
                0.0
            }
        },
        _ => 0.0,
    }
}

/// `areas` holds pre-computed footprint areas keyed by feature id.
pub fn aggregate(features: &[Joined<UrbanFeature>], areas: &HashMap<ObservationId, f64>) -> UrbanAggregate {
    let mut agg = UrbanAggregate {
        feature_count: features.len(),
        ..UrbanAggregate::default()
    };
    for joined in features {
        if joined.obs.is_building() {
            agg.building_count += 1;
            agg.building_area_m2 += areas.get(&joined.obs.id).copied().unwrap_or(0.0);
        }
    }
    agg
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{GeoPoint, MetricPoint};

    fn feature(id: i64, kind: &str, geometry: Geometry) -> UrbanFeature {
        UrbanFeature {
            id,
            geometry: Some(geometry),
            feature_type: kind.to_string(),
            nearest: None,
        }
    }

    fn square(proj: &Projection, center: GeoPoint, half_side_m: f64) -> Geometry {
        let c = proj.to_metric(center).unwrap();
        let h = half_side_m;
        Geometry::Polygon(
            [(-h, -h), (h, -h), (h, h), (-h, h)]
                .iter()
                .map(|(dx, dy)| proj.to_geographic(MetricPoint::new(c.x + dx, c.y + dy)).unwrap())
                .collect(),
        )
    }

    #[test]
    fn test_only_building_polygons_have_area() {
        let proj = Projection::etrs89_laea();
        let center = GeoPoint::new(4.9, 52.37);
        let building = feature(1, "building", square(&proj, center, 50.0));
        let landuse = feature(2, "landuse", square(&proj, center, 500.0));
        let point_building = feature(3, "building", Geometry::Point(center));

        assert!((footprint_area_m2(&proj, &building) - 10_000.0).abs() < 0.5);
        assert_eq!(footprint_area_m2(&proj, &landuse), 0.0);
        assert_eq!(footprint_area_m2(&proj, &point_building), 0.0);
    }

    #[test]
    fn test_raw_is_count_plus_square_kilometres() {
        let proj = Projection::etrs89_laea();
        let center = GeoPoint::new(4.9, 52.37);
        let features = [
            feature(1, "building", square(&proj, center, 500.0)),
            feature(2, "landuse", Geometry::Point(center)),
            feature(3, "Building", Geometry::Point(center)),
        ];
        let areas: HashMap<ObservationId, f64> = features
            .iter()
            .map(|f| (f.id, footprint_area_m2(&proj, f)))
            .collect();
        let joined: Vec<Joined<UrbanFeature>> = features
            .iter()
            .map(|obs| Joined { obs, distance_m: 100.0 })
            .collect();

        let agg = aggregate(&joined, &areas);
        assert_eq!(agg.feature_count, 3);
        assert_eq!(agg.building_count, 2);
        assert!((agg.raw() - 4.0).abs() < 1e-3, "3 features + 1 km², got {}", agg.raw());
    }

    #[test]
    fn test_no_features_is_zero() {
        assert_eq!(aggregate(&[], &HashMap::new()).raw(), 0.0);
    }
}
