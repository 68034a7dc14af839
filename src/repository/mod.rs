/// Store boundary for the risk engine.
///
/// The pipeline reads sites and hazard observations and writes risk
/// profiles (plus the advisory attribution cache and feature densities)
/// through `RiskRepository` only. Implementations:
/// - `InMemoryRepository` — vectors and maps, with write-failure injection
///   for exercising batch atomicity and retries
/// - `postgres::PgRepository` — PostGIS tables in the `unesco_risk` schema

pub mod postgres;

use std::collections::{BTreeMap, HashMap, HashSet};
use thiserror::Error;

use crate::db::DbConfigError;
use crate::density::FeatureDensity;
use crate::geometry::BoundingBox;
use crate::model::{
    Attribution, HazardCategory, HazardObservation, ObservationAttribution, ObservationId,
    RiskProfile, Site, SiteId,
};

#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error(transparent)]
    Connection(#[from] DbConfigError),
    #[error("database error: {0}")]
    Database(#[from] ::postgres::Error),
    #[error("write rejected: {0}")]
    WriteRejected(String),
}

pub trait RiskRepository {
    /// All sites, optionally pre-filtered to a coarse lon/lat box.
    fn load_sites(&mut self, region: Option<&BoundingBox>) -> Result<Vec<Site>, RepositoryError>;

    /// Observations of one category. The region filter may be coarse; the
    /// join engine re-filters by exact radius.
    fn load_hazards(
        &mut self,
        category: HazardCategory,
        region: Option<&BoundingBox>,
    ) -> Result<Vec<HazardObservation>, RepositoryError>;

    /// Upserts a batch of profiles by site id in a single transaction: the
    /// whole batch commits or none of it does. Returns rows written.
    fn upsert_profiles(&mut self, profiles: &[RiskProfile]) -> Result<usize, RepositoryError>;

    /// Overwrites the advisory nearest-site cache of the given observations.
    fn record_attributions(
        &mut self,
        category: HazardCategory,
        attributions: &[ObservationAttribution],
    ) -> Result<usize, RepositoryError>;

    fn store_feature_densities(&mut self, densities: &[FeatureDensity]) -> Result<usize, RepositoryError>;
}

// ---------------------------------------------------------------------------
// In-memory implementation
// ---------------------------------------------------------------------------

#[derive(Debug, Default)]
pub struct InMemoryRepository {
    sites: Vec<Site>,
    hazards: HashMap<HazardCategory, Vec<HazardObservation>>,
    profiles: BTreeMap<SiteId, RiskProfile>,
    attributions: HashMap<(HazardCategory, ObservationId), Option<Attribution>>,
    feature_densities: BTreeMap<ObservationId, f64>,
    upsert_calls: usize,
    committed_batches: usize,
    transient_failures: usize,
    poisoned_sites: HashSet<SiteId>,
}

impl InMemoryRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_sites(mut self, sites: Vec<Site>) -> Self {
        self.sites = sites;
        self
    }

    pub fn with_hazards(mut self, observations: Vec<HazardObservation>) -> Self {
        for obs in observations {
            self.hazards.entry(obs.category()).or_default().push(obs);
        }
        self
    }

    /// The next `n` profile upserts fail before writing anything.
    pub fn fail_next_upserts(&mut self, n: usize) {
        self.transient_failures = n;
    }

    /// Any batch containing this site fails, on every attempt.
    pub fn poison_site(&mut self, site_id: SiteId) {
        self.poisoned_sites.insert(site_id);
    }

    pub fn profiles(&self) -> Vec<&RiskProfile> {
        self.profiles.values().collect()
    }

    pub fn profile(&self, site_id: SiteId) -> Option<&RiskProfile> {
        self.profiles.get(&site_id)
    }

    pub fn attribution(&self, category: HazardCategory, observation_id: ObservationId) -> Option<Attribution> {
        self.attributions.get(&(category, observation_id)).copied().flatten()
    }

    pub fn attribution_count(&self) -> usize {
        self.attributions.len()
    }

    pub fn feature_density(&self, observation_id: ObservationId) -> Option<f64> {
        self.feature_densities.get(&observation_id).copied()
    }

    pub fn upsert_calls(&self) -> usize {
        self.upsert_calls
    }

    pub fn committed_batches(&self) -> usize {
        self.committed_batches
    }
}

impl RiskRepository for InMemoryRepository {
    fn load_sites(&mut self, region: Option<&BoundingBox>) -> Result<Vec<Site>, RepositoryError> {
        Ok(self
            .sites
            .iter()
            .filter(|s| region.is_none_or(|r| r.contains(&s.location)))
            .cloned()
            .collect())
    }

    fn load_hazards(
        &mut self,
        category: HazardCategory,
        region: Option<&BoundingBox>,
    ) -> Result<Vec<HazardObservation>, RepositoryError> {
        let Some(observations) = self.hazards.get(&category) else {
            return Ok(Vec::new());
        };
        Ok(observations
            .iter()
            .filter(|o| match (region, o.geometry()) {
                (Some(r), Some(g)) => r.intersects(&g.bounds()),
                _ => true,
            })
            .cloned()
            .collect())
    }

    fn upsert_profiles(&mut self, profiles: &[RiskProfile]) -> Result<usize, RepositoryError> {
        self.upsert_calls += 1;
        if self.transient_failures > 0 {
            self.transient_failures -= 1;
            return Err(RepositoryError::WriteRejected("injected transient failure".to_string()));
        }
        if let Some(p) = profiles.iter().find(|p| self.poisoned_sites.contains(&p.site_id)) {
            return Err(RepositoryError::WriteRejected(format!(
                "batch contains poisoned site {}",
                p.site_id
            )));
        }
        for p in profiles {
            self.profiles.insert(p.site_id, p.clone());
        }
        self.committed_batches += 1;
        Ok(profiles.len())
    }

    fn record_attributions(
        &mut self,
        category: HazardCategory,
        attributions: &[ObservationAttribution],
    ) -> Result<usize, RepositoryError> {
        for a in attributions {
            self.attributions.insert((category, a.observation_id), a.nearest);
        }
        if let Some(observations) = self.hazards.get_mut(&category) {
            crate::spatial::nearest::apply_attributions(observations, attributions);
        }
        Ok(attributions.len())
    }

    fn store_feature_densities(&mut self, densities: &[FeatureDensity]) -> Result<usize, RepositoryError> {
        for d in densities {
            self.feature_densities.insert(d.observation_id, d.density);
        }
        Ok(densities.len())
    }
}
