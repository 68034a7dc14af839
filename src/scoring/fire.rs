/// Fire exposure: confidence-weighted radiative power, inverse distance.

use serde::Serialize;

use crate::model::FireDetection;
use crate::scoring::{Joined, attenuation_km};

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FireAggregate {
    pub detection_count: usize,
    pub total_frp_mw: f64,
    pub weighted_risk: f64,
}

impl FireAggregate {
    pub fn raw(&self) -> f64 {
        self.weighted_risk
    }
}

/// `FRP × confidence / 100 / max(d_km, 0.1)`. Negative or missing FRP and
/// confidence count as 0; confidence is capped at 100.
pub fn contribution(detection: &FireDetection, distance_m: f64) -> f64 {
    let frp = if detection.frp_mw.is_finite() { detection.frp_mw.max(0.0) } else { 0.0 };
    let confidence = if detection.confidence_pct.is_finite() {
        detection.confidence_pct.clamp(0.0, 100.0)
    } else {
        0.0
    };
    frp * (confidence / 100.0) / attenuation_km(distance_m)
}

pub fn aggregate(detections: &[Joined<FireDetection>]) -> FireAggregate {
    let mut agg = FireAggregate::default();
    for joined in detections {
        agg.detection_count += 1;
        if joined.obs.frp_mw.is_finite() {
            agg.total_frp_mw += joined.obs.frp_mw.max(0.0);
        }
        agg.weighted_risk += contribution(joined.obs, joined.distance_m);
    }
    agg
}
