/// Buffer & join engine.
///
/// Everything here works on points that have already been projected to
/// metric space by `Projection`. Sites become `SitePoint`s and observations
/// become `AnchoredObservation`s (polygons anchored at their centroid); the
/// joins themselves never see degrees.
///
/// Submodules:
/// - `index`   — uniform grid index over metric points
/// - `nearest` — nearest-site attribution (advisory cache)
/// - `radius`  — radius-bounded many-to-many join feeding the calculators

pub mod index;
pub mod nearest;
pub mod radius;

use serde_json::{Value, json};
use tracing::warn;

use crate::geometry::ring_to_positions;
use crate::model::{GeoPoint, HazardObservation, MetricPoint, ObservationId, Site, SiteId};
use crate::projection::{Projection, ProjectionError};

/// Radii of the concentric reporting rings drawn around each site.
pub const REPORTING_RING_RADII_M: [f64; 4] = [5_000.0, 10_000.0, 25_000.0, 50_000.0];

// ---------------------------------------------------------------------------
// Projected inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SitePoint {
    pub site_id: SiteId,
    pub point: MetricPoint,
}

/// An observation reduced to its metric anchor point.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchoredObservation {
    pub id: ObservationId,
    pub point: MetricPoint,
}

/// Projects site locations. Sites that cannot be projected are logged and
/// left out of every join, so they score zero.
pub fn project_sites(projection: &Projection, sites: &[Site]) -> Vec<SitePoint> {
    sites
        .iter()
        .filter_map(|site| match projection.to_metric(site.location) {
            Ok(point) => Some(SitePoint { site_id: site.id, point }),
            Err(e) => {
                warn!(site_id = site.id, error = %e, "site location cannot be projected; excluded from joins");
                None
            }
        })
        .collect()
}

/// Anchors observations in metric space. Returns the anchored set and the
/// number skipped for missing or invalid geometry.
pub fn anchor_observations(
    projection: &Projection,
    observations: &[HazardObservation],
) -> (Vec<AnchoredObservation>, usize) {
    let mut anchored = Vec::with_capacity(observations.len());
    let mut skipped = 0;

    for obs in observations {
        let Some(geometry) = obs.geometry() else {
            warn!(category = %obs.category(), observation_id = obs.id(), "observation has no geometry; skipped");
            skipped += 1;
            continue;
        };
        let point = geometry
            .validate()
            .map_err(|e| e.to_string())
            .and_then(|_| projection.anchor(geometry).map_err(|e| e.to_string()));
        match point {
            Ok(point) => anchored.push(AnchoredObservation { id: obs.id(), point }),
            Err(e) => {
                warn!(category = %obs.category(), observation_id = obs.id(), error = %e, "invalid observation geometry; skipped");
                skipped += 1;
            }
        }
    }

    (anchored, skipped)
}

// ---------------------------------------------------------------------------
// Buffers
// ---------------------------------------------------------------------------

/// Circular buffer around a site, in geographic coordinates.
#[derive(Debug, Clone, PartialEq)]
pub struct SiteBuffer {
    pub site_id: SiteId,
    pub radius_m: f64,
    pub ring: Vec<GeoPoint>,
}

impl SiteBuffer {
    /// GeoJSON Feature with `site_id` and `radius_m` properties.
    pub fn to_geojson(&self) -> Value {
        json!({
            "type": "Feature",
            "properties": {
                "site_id": self.site_id,
                "radius_m": self.radius_m,
            },
            "geometry": {
                "type": "Polygon",
                "coordinates": [ring_to_positions(&self.ring)],
            },
        })
    }
}

/// One buffer per site at a single radius. Sites whose buffer cannot be
/// built are logged and omitted.
pub fn buffer_sites(projection: &Projection, sites: &[Site], radius_m: f64) -> Vec<SiteBuffer> {
    sites
        .iter()
        .filter_map(|site| match projection.buffer_polygon(site.location, radius_m) {
            Ok(ring) => Some(SiteBuffer { site_id: site.id, radius_m, ring }),
            Err(e) => {
                warn!(site_id = site.id, radius_m, error = %e, "could not buffer site");
                None
            }
        })
        .collect()
}

/// Concentric rings around one site, innermost first.
pub fn buffer_rings(
    projection: &Projection,
    site: &Site,
    radii_m: &[f64],
) -> Result<Vec<SiteBuffer>, ProjectionError> {
    let mut radii = radii_m.to_vec();
    radii.sort_by(f64::total_cmp);
    radii
        .into_iter()
        .map(|radius_m| {
            Ok(SiteBuffer {
                site_id: site.id,
                radius_m,
                ring: projection.buffer_polygon(site.location, radius_m)?,
            })
        })
        .collect()
}

pub fn feature_collection(buffers: &[SiteBuffer]) -> Value {
    json!({
        "type": "FeatureCollection",
        "features": buffers.iter().map(SiteBuffer::to_geojson).collect::<Vec<_>>(),
    })
}

#[cfg(test)]
pub(crate) mod test_support {
    use chrono::{TimeZone, Utc};

    use crate::model::{GeoPoint, Site, SiteCategory};

    pub fn site(id: i64, lon: f64, lat: f64) -> Site {
        let ts = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        Site {
            id,
            name: format!("Site {id}"),
            location: GeoPoint::new(lon, lat),
            category: SiteCategory::Cultural,
            country: "Italy".to_string(),
            elevation_m: None,
            coast_distance_km: None,
            in_danger: false,
            created_at: ts,
            updated_at: ts,
        }
    }
}
