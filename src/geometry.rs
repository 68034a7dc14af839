/// Geographic geometries carried by sites and hazard observations.
///
/// Observations are either points (earthquake epicentres, fire pixels,
/// climate grid points) or small polygons (building footprints, flood
/// cells). Geometries arrive from the store as GeoJSON text and are
/// validated before they reach the join engine; anything malformed is a
/// data error for that one observation.

use geo::{BoundingRect, LineString};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use thiserror::Error;

use crate::model::GeoPoint;

#[derive(Debug, Error, PartialEq)]
pub enum GeometryError {
    #[error("invalid GeoJSON: {0}")]
    InvalidJson(String),
    #[error("unsupported geometry type '{0}'")]
    UnsupportedType(String),
    #[error("coordinate ({lon}, {lat}) is out of range or not finite")]
    InvalidCoordinate { lon: f64, lat: f64 },
    #[error("polygon ring has {0} distinct vertices, need at least 3")]
    DegenerateRing(usize),
}

/// Point or simple polygon (exterior ring only) in WGS84 degrees.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Geometry {
    Point(GeoPoint),
    Polygon(Vec<GeoPoint>),
}

impl Geometry {
    /// Checks coordinate ranges and ring shape.
    pub fn validate(&self) -> Result<(), GeometryError> {
        match self {
            Geometry::Point(p) => check_coordinate(p),
            Geometry::Polygon(ring) => {
                for p in ring {
                    check_coordinate(p)?;
                }
                let distinct = open_ring(ring).len();
                if distinct < 3 {
                    return Err(GeometryError::DegenerateRing(distinct));
                }
                Ok(())
            }
        }
    }

    /// The same shape as a `geo` geometry, in degrees.
    pub fn to_geo(&self) -> geo::Geometry<f64> {
        match self {
            Geometry::Point(p) => geo::Point::new(p.lon, p.lat).into(),
            Geometry::Polygon(ring) => {
                let exterior: LineString<f64> = open_ring(ring).iter().map(|p| (p.lon, p.lat)).collect();
                geo::Polygon::new(exterior, vec![]).into()
            }
        }
    }

    /// Degree-space envelope, used only for coarse region pre-filtering.
    /// An empty ring yields an inverted box that intersects nothing.
    pub fn bounds(&self) -> BoundingBox {
        match self.to_geo().bounding_rect() {
            Some(rect) => BoundingBox {
                min_lon: rect.min().x,
                min_lat: rect.min().y,
                max_lon: rect.max().x,
                max_lat: rect.max().y,
            },
            None => BoundingBox {
                min_lon: f64::INFINITY,
                min_lat: f64::INFINITY,
                max_lon: f64::NEG_INFINITY,
                max_lat: f64::NEG_INFINITY,
            },
        }
    }

    /// Parses a GeoJSON geometry object (as produced by `ST_AsGeoJSON`).
    ///
    /// `MultiPolygon` inputs keep their first polygon; interior rings are
    /// dropped.
    pub fn from_geojson(text: &str) -> Result<Geometry, GeometryError> {
        let value: Value =
            serde_json::from_str(text).map_err(|e| GeometryError::InvalidJson(e.to_string()))?;

        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or_else(|| GeometryError::InvalidJson("missing 'type'".to_string()))?;
        let coords = value
            .get("coordinates")
            .ok_or_else(|| GeometryError::InvalidJson("missing 'coordinates'".to_string()))?;

        let geometry = match kind {
            "Point" => Geometry::Point(parse_position(coords)?),
            "Polygon" => Geometry::Polygon(parse_exterior_ring(coords)?),
            "MultiPolygon" => {
                let first = coords
                    .as_array()
                    .and_then(|polys| polys.first())
                    .ok_or_else(|| GeometryError::InvalidJson("empty MultiPolygon".to_string()))?;
                Geometry::Polygon(parse_exterior_ring(first)?)
            }
            other => return Err(GeometryError::UnsupportedType(other.to_string())),
        };

        geometry.validate()?;
        Ok(geometry)
    }

    pub fn to_geojson(&self) -> Value {
        match self {
            Geometry::Point(p) => json!({
                "type": "Point",
                "coordinates": [p.lon, p.lat],
            }),
            Geometry::Polygon(ring) => json!({
                "type": "Polygon",
                "coordinates": [ring_to_positions(ring)],
            }),
        }
    }
}

/// Coarse lon/lat envelope used to pre-filter store reads.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct BoundingBox {
    pub min_lon: f64,
    pub min_lat: f64,
    pub max_lon: f64,
    pub max_lat: f64,
}

impl BoundingBox {
    pub fn contains(&self, p: &GeoPoint) -> bool {
        p.lon >= self.min_lon && p.lon <= self.max_lon && p.lat >= self.min_lat && p.lat <= self.max_lat
    }

    pub fn intersects(&self, other: &BoundingBox) -> bool {
        self.min_lon <= other.max_lon
            && other.min_lon <= self.max_lon
            && self.min_lat <= other.max_lat
            && other.min_lat <= self.max_lat
    }
}

/// Ring without its closing vertex (GeoJSON rings repeat the first point).
pub fn open_ring(ring: &[GeoPoint]) -> &[GeoPoint] {
    match (ring.first(), ring.last()) {
        (Some(first), Some(last)) if ring.len() > 1 && first == last => &ring[..ring.len() - 1],
        _ => ring,
    }
}

/// Serializes a ring as closed GeoJSON positions.
pub fn ring_to_positions(ring: &[GeoPoint]) -> Vec<[f64; 2]> {
    let open = open_ring(ring);
    let mut positions: Vec<[f64; 2]> = open.iter().map(|p| [p.lon, p.lat]).collect();
    if let Some(first) = open.first() {
        positions.push([first.lon, first.lat]);
    }
    positions
}

fn check_coordinate(p: &GeoPoint) -> Result<(), GeometryError> {
    let ok = p.lon.is_finite()
        && p.lat.is_finite()
        && (-180.0..=180.0).contains(&p.lon)
        && (-90.0..=90.0).contains(&p.lat);
    if ok {
        Ok(())
    } else {
        Err(GeometryError::InvalidCoordinate { lon: p.lon, lat: p.lat })
    }
}

fn parse_position(value: &Value) -> Result<GeoPoint, GeometryError> {
    let pair = value
        .as_array()
        .filter(|a| a.len() >= 2)
        .ok_or_else(|| GeometryError::InvalidJson("position must be [lon, lat]".to_string()))?;
    let lon = pair[0]
        .as_f64()
        .ok_or_else(|| GeometryError::InvalidJson("longitude is not a number".to_string()))?;
    let lat = pair[1]
        .as_f64()
        .ok_or_else(|| GeometryError::InvalidJson("latitude is not a number".to_string()))?;
    Ok(GeoPoint::new(lon, lat))
}

fn parse_exterior_ring(value: &Value) -> Result<Vec<GeoPoint>, GeometryError> {
    let exterior = value
        .as_array()
        .and_then(|rings| rings.first())
        .and_then(Value::as_array)
        .ok_or_else(|| GeometryError::InvalidJson("polygon has no exterior ring".to_string()))?;
    exterior.iter().map(parse_position).collect()
}
