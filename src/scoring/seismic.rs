/// Seismic exposure from Gutenberg-Richter energy, attenuated by the square
/// of hypocentral distance.

use serde::Serialize;

use crate::model::SeismicEvent;
use crate::scoring::{Joined, attenuation_km};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct SeismicAggregate {
    pub event_count: usize,
    pub max_magnitude: Option<f64>,
    pub total_energy: f64,
}

impl SeismicAggregate {
    pub fn raw(&self) -> f64 {
        self.total_energy
    }
}

/// Energy proxy `10^(1.5 M)`.
pub fn energy_proxy(magnitude: f64) -> f64 {
    10f64.powf(1.5 * magnitude)
}

/// Hypocentral distance in km when depth is known, epicentral otherwise.
pub fn hypocentral_km(epicentral_m: f64, depth_km: Option<f64>) -> f64 {
    let epi_km = epicentral_m / 1000.0;
    match depth_km.filter(|d| d.is_finite()) {
        Some(depth) => epi_km.hypot(depth.max(0.0)),
        None => epi_km,
    }
}

pub fn aggregate(events: &[Joined<SeismicEvent>]) -> SeismicAggregate {
    let mut agg = SeismicAggregate::default();
    for joined in events {
        let e = joined.obs;
        if !e.magnitude.is_finite() {
            continue;
        }
        let d_km = attenuation_km(hypocentral_km(joined.distance_m, e.depth_km) * 1000.0);
        agg.event_count += 1;
        agg.total_energy += energy_proxy(e.magnitude) / (d_km * d_km);
        agg.max_magnitude = Some(agg.max_magnitude.map_or(e.magnitude, |m| m.max(e.magnitude)));
    }
    agg
}
