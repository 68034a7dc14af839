/// Radius-bounded many-to-many join.
///
/// For each site, every observation whose anchor lies within the category's
/// scoring radius (boundary inclusive). An observation can land on any
/// number of sites. This is the only path by which observations reach the
/// sub-score calculators.

use std::collections::HashMap;

use crate::model::{HazardCategory, ProximityAssociation, SiteId};
use crate::spatial::index::GridIndex;
use crate::spatial::{AnchoredObservation, SitePoint};

/// Joins observations to sites. Output follows site order, then observation
/// id.
pub fn radius_join(
    sites: &[SitePoint],
    observations: &[AnchoredObservation],
    category: HazardCategory,
    radius_m: f64,
) -> Vec<ProximityAssociation> {
    let index = GridIndex::from_points(radius_m, observations.iter().map(|o| (o.point, o.id)));
    let mut out = Vec::new();

    for site in sites {
        let mut hits = index.within(site.point, radius_m);
        hits.sort_by_key(|(id, _)| *id);
        out.extend(hits.into_iter().map(|(observation_id, distance_m)| ProximityAssociation {
            site_id: site.site_id,
            observation_id,
            category,
            distance_m,
            radius_m,
        }));
    }

    out
}

/// Groups associations by site, preserving their order within each site.
pub fn group_by_site(associations: &[ProximityAssociation]) -> HashMap<SiteId, Vec<ProximityAssociation>> {
    let mut grouped: HashMap<SiteId, Vec<ProximityAssociation>> = HashMap::new();
    for assoc in associations {
        grouped.entry(assoc.site_id).or_default().push(*assoc);
    }
    grouped
}
