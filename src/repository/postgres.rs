/// PostgreSQL / PostGIS repository.
///
/// Reads the `unesco_risk` tables with geometries serialized through
/// `ST_AsGeoJSON`, and writes risk scores with `INSERT ... ON CONFLICT
/// (site_id) DO UPDATE` inside one transaction per batch. A failed statement
/// drops the transaction, which rolls the whole batch back.

use ::postgres::types::ToSql;
use ::postgres::{Client, Row};
use chrono::{DateTime, NaiveDate, Utc};
use tracing::{debug, warn};

use crate::db;
use crate::density::FeatureDensity;
use crate::geometry::{BoundingBox, Geometry};
use crate::model::{
    Attribution, ClimateDayRecord, FireDetection, FloodCell, GeoPoint, HazardCategory,
    HazardObservation, ObservationAttribution, RiskProfile, SeismicEvent, Site, SiteCategory,
    UrbanFeature,
};
use crate::repository::{RepositoryError, RiskRepository};

pub struct PgRepository {
    client: Client,
}

/// Table and nearest-site distance column for each hazard category. The
/// multiplier converts meters to the column's unit.
fn cache_columns(category: HazardCategory) -> (&'static str, &'static str, f64) {
    match category {
        HazardCategory::Urban => ("unesco_risk.urban_features", "distance_to_site_m", 1.0),
        HazardCategory::Climate => ("unesco_risk.climate_events", "distance_to_site_km", 0.001),
        HazardCategory::Seismic => ("unesco_risk.earthquake_events", "distance_to_site_km", 0.001),
        HazardCategory::Fire => ("unesco_risk.fire_events", "distance_to_site_km", 0.001),
        HazardCategory::Flood => ("unesco_risk.flood_zones", "distance_to_site_km", 0.001),
    }
}

const UPSERT_PROFILE: &str = "
    INSERT INTO unesco_risk.risk_scores (
        site_id, urban_density_score, climate_anomaly_score, seismic_risk_score,
        fire_risk_score, flood_risk_score, coastal_risk_score, composite_risk_score,
        isolation_forest_score, is_anomaly, risk_level, calculated_at
    )
    VALUES ($1::bigint, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
    ON CONFLICT (site_id) DO UPDATE SET
        urban_density_score = EXCLUDED.urban_density_score,
        climate_anomaly_score = EXCLUDED.climate_anomaly_score,
        seismic_risk_score = EXCLUDED.seismic_risk_score,
        fire_risk_score = EXCLUDED.fire_risk_score,
        flood_risk_score = EXCLUDED.flood_risk_score,
        coastal_risk_score = EXCLUDED.coastal_risk_score,
        composite_risk_score = EXCLUDED.composite_risk_score,
        isolation_forest_score = EXCLUDED.isolation_forest_score,
        is_anomaly = EXCLUDED.is_anomaly,
        risk_level = EXCLUDED.risk_level,
        calculated_at = EXCLUDED.calculated_at";

impl PgRepository {
    /// Connects via `DATABASE_URL` and verifies PostGIS and the schema.
    pub fn connect() -> Result<Self, RepositoryError> {
        Ok(Self::from_client(db::connect_and_verify()?))
    }

    pub fn from_client(client: Client) -> Self {
        Self { client }
    }

    /// Runs `sql` with an optional trailing bounding-box filter on
    /// `geom_expr`. The filter binds `$1..$4`.
    fn query_region(
        &mut self,
        sql: &str,
        geom_expr: &str,
        region: Option<&BoundingBox>,
    ) -> Result<Vec<Row>, RepositoryError> {
        let rows = match region {
            Some(bbox) => {
                let filtered = format!(
                    "{sql} WHERE {geom_expr} && ST_MakeEnvelope($1, $2, $3, $4, 4326) ORDER BY 1"
                );
                let params: [&(dyn ToSql + Sync); 4] =
                    [&bbox.min_lon, &bbox.min_lat, &bbox.max_lon, &bbox.max_lat];
                self.client.query(filtered.as_str(), &params)?
            }
            None => self.client.query(format!("{sql} ORDER BY 1").as_str(), &[])?,
        };
        Ok(rows)
    }
}

fn parse_geometry(category: HazardCategory, id: i64, geojson: Option<String>) -> Option<Geometry> {
    let text = geojson?;
    match Geometry::from_geojson(&text) {
        Ok(g) => Some(g),
        Err(e) => {
            debug!(%category, observation_id = id, error = %e, "unreadable geometry");
            None
        }
    }
}

fn read_nearest(row: &Row, site_idx: usize, dist_idx: usize, to_meters: f64) -> Result<Option<Attribution>, RepositoryError> {
    let site: Option<i64> = row.try_get(site_idx)?;
    let dist: Option<f64> = row.try_get(dist_idx)?;
    Ok(match (site, dist) {
        (Some(site_id), Some(d)) => Some(Attribution { site_id, distance_m: d * to_meters }),
        _ => None,
    })
}

fn read_hazard(category: HazardCategory, row: &Row) -> Result<HazardObservation, RepositoryError> {
    let id: i64 = row.try_get(0)?;
    let geometry = parse_geometry(category, id, row.try_get(1)?);
    let obs = match category {
        HazardCategory::Seismic => HazardObservation::Seismic(SeismicEvent {
            id,
            geometry,
            event_time: row.try_get::<_, DateTime<Utc>>(2)?,
            magnitude: row.try_get(3)?,
            depth_km: row.try_get(4)?,
            nearest: read_nearest(row, 5, 6, 1000.0)?,
        }),
        HazardCategory::Fire => HazardObservation::Fire(FireDetection {
            id,
            geometry,
            acquired_on: row.try_get::<_, NaiveDate>(2)?,
            frp_mw: row.try_get(3)?,
            confidence_pct: row.try_get(4)?,
            nearest: read_nearest(row, 5, 6, 1000.0)?,
        }),
        HazardCategory::Flood => HazardObservation::Flood(FloodCell {
            id,
            geometry,
            event_date: row.try_get(2)?,
            intensity: row.try_get(3)?,
            nearest: read_nearest(row, 4, 5, 1000.0)?,
        }),
        HazardCategory::Urban => HazardObservation::Urban(UrbanFeature {
            id,
            geometry,
            feature_type: row.try_get(2)?,
            nearest: read_nearest(row, 3, 4, 1.0)?,
        }),
        HazardCategory::Climate => HazardObservation::Climate(ClimateDayRecord {
            id,
            geometry,
            date: row.try_get(2)?,
            temp_max_c: row.try_get(3)?,
            precipitation_mm: row.try_get(4)?,
            wind_max_ms: row.try_get(5)?,
            nearest: read_nearest(row, 6, 7, 1000.0)?,
        }),
    };
    Ok(obs)
}

/// SELECT list and geometry expression per category, in `read_hazard`
/// column order.
fn hazard_query(category: HazardCategory) -> (&'static str, &'static str) {
    match category {
        HazardCategory::Seismic => (
            "SELECT id::bigint, ST_AsGeoJSON(geom), event_time, magnitude, depth_km,
                    nearest_site_id::bigint, distance_to_site_km
             FROM unesco_risk.earthquake_events",
            "geom",
        ),
        HazardCategory::Fire => (
            "SELECT id::bigint, ST_AsGeoJSON(geom), acq_date,
                    COALESCE(frp, 0)::double precision, COALESCE(confidence, 0)::double precision,
                    nearest_site_id::bigint, distance_to_site_km
             FROM unesco_risk.fire_events",
            "geom",
        ),
        HazardCategory::Flood => (
            "SELECT id::bigint, ST_AsGeoJSON(geom), event_date,
                    COALESCE(flood_intensity, 0)::double precision,
                    nearest_site_id::bigint, distance_to_site_km
             FROM unesco_risk.flood_zones",
            "geom",
        ),
        HazardCategory::Urban => (
            "SELECT id::bigint, ST_AsGeoJSON(geom), feature_type,
                    nearest_site_id::bigint, distance_to_site_m
             FROM unesco_risk.urban_features",
            "geom",
        ),
        // Climate rows without their own point sit at the site they were fetched for.
        HazardCategory::Climate => (
            "SELECT ce.id::bigint, ST_AsGeoJSON(COALESCE(ce.geom, hs.geom)), ce.event_date,
                    ce.temp_max_c, ce.precipitation_mm, ce.wind_max_ms,
                    ce.nearest_site_id::bigint, ce.distance_to_site_km
             FROM unesco_risk.climate_events ce
             JOIN unesco_risk.heritage_sites hs ON hs.id = ce.site_id",
            "COALESCE(ce.geom, hs.geom)",
        ),
    }
}

impl RiskRepository for PgRepository {
    fn load_sites(&mut self, region: Option<&BoundingBox>) -> Result<Vec<Site>, RepositoryError> {
        let rows = self.query_region(
            "SELECT id::bigint, name, category, COALESCE(country, ''), elevation_m, coast_distance_km,
                    COALESCE(in_danger, FALSE), ST_X(geom), ST_Y(geom),
                    COALESCE(created_at, now()), COALESCE(updated_at, now())
             FROM unesco_risk.heritage_sites",
            "geom",
            region,
        )?;

        let mut sites = Vec::with_capacity(rows.len());
        for row in rows {
            let id: i64 = row.try_get(0)?;
            let raw_category: Option<String> = row.try_get(2)?;
            let Some(category) = raw_category.as_deref().and_then(SiteCategory::parse) else {
                warn!(site_id = id, category = ?raw_category, "unknown site category; site skipped");
                continue;
            };
            sites.push(Site {
                id,
                name: row.try_get(1)?,
                location: GeoPoint::new(row.try_get(7)?, row.try_get(8)?),
                category,
                country: row.try_get(3)?,
                elevation_m: row.try_get(4)?,
                coast_distance_km: row.try_get(5)?,
                in_danger: row.try_get(6)?,
                created_at: row.try_get(9)?,
                updated_at: row.try_get(10)?,
            });
        }
        Ok(sites)
    }

    fn load_hazards(
        &mut self,
        category: HazardCategory,
        region: Option<&BoundingBox>,
    ) -> Result<Vec<HazardObservation>, RepositoryError> {
        let (sql, geom_expr) = hazard_query(category);
        let rows = self.query_region(sql, geom_expr, region)?;
        rows.iter().map(|row| read_hazard(category, row)).collect()
    }

    fn upsert_profiles(&mut self, profiles: &[RiskProfile]) -> Result<usize, RepositoryError> {
        let mut tx = self.client.transaction()?;
        let stmt = tx.prepare(UPSERT_PROFILE)?;
        let mut written = 0;
        for p in profiles {
            let level = p.level.as_str();
            written += tx.execute(
                &stmt,
                &[
                    &p.site_id,
                    &p.scores.urban_density,
                    &p.scores.climate_anomaly,
                    &p.scores.seismic,
                    &p.scores.fire,
                    &p.scores.flood,
                    &p.scores.coastal,
                    &p.composite,
                    &p.anomaly_score,
                    &p.is_anomaly,
                    &level,
                    &p.computed_at,
                ],
            )? as usize;
        }
        tx.commit()?;
        Ok(written)
    }

    fn record_attributions(
        &mut self,
        category: HazardCategory,
        attributions: &[ObservationAttribution],
    ) -> Result<usize, RepositoryError> {
        let (table, column, scale) = cache_columns(category);
        let sql = format!(
            "UPDATE {table} SET nearest_site_id = $1::bigint, {column} = $2 WHERE id = $3::bigint"
        );

        let mut tx = self.client.transaction()?;
        let stmt = tx.prepare(&sql)?;
        let mut written = 0;
        for a in attributions {
            let site_id = a.nearest.map(|n| n.site_id);
            let distance = a.nearest.map(|n| n.distance_m * scale);
            written += tx.execute(&stmt, &[&site_id, &distance, &a.observation_id])? as usize;
        }
        tx.commit()?;
        Ok(written)
    }

    fn store_feature_densities(&mut self, densities: &[FeatureDensity]) -> Result<usize, RepositoryError> {
        let mut tx = self.client.transaction()?;
        let stmt = tx.prepare("UPDATE unesco_risk.urban_features SET density_score = $1 WHERE id = $2::bigint")?;
        let mut written = 0;
        for d in densities {
            written += tx.execute(&stmt, &[&d.density, &d.observation_id])? as usize;
        }
        tx.commit()?;
        Ok(written)
    }
}
