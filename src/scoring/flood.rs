/// Flood exposure: event frequency blended with mean intensity.
///
/// `raw = 0.5 × distinct event dates + 0.5 × mean intensity`. Cells without
/// a date each count as their own event.

use serde::Serialize;
use std::collections::HashSet;

use crate::model::FloodCell;
use crate::scoring::Joined;

pub const FREQUENCY_WEIGHT: f64 = 0.5;
pub const INTENSITY_WEIGHT: f64 = 0.5;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct FloodAggregate {
    pub cell_count: usize,
    pub event_frequency: usize,
    pub mean_intensity: f64,
}

impl FloodAggregate {
    pub fn raw(&self) -> f64 {
        FREQUENCY_WEIGHT * self.event_frequency as f64 + INTENSITY_WEIGHT * self.mean_intensity
    }
}

pub fn aggregate(cells: &[Joined<FloodCell>]) -> FloodAggregate {
    let mut dates = HashSet::new();
    let mut undated = 0;
    let mut intensity_sum = 0.0;
    let mut intensity_n = 0usize;

    for joined in cells {
        let cell = joined.obs;
        match cell.event_date {
            Some(date) => {
                dates.insert(date);
            }
            None => undated += 1,
        }
        if cell.intensity.is_finite() {
            intensity_sum += cell.intensity.max(0.0);
            intensity_n += 1;
        }
    }

    FloodAggregate {
        cell_count: cells.len(),
        event_frequency: dates.len() + undated,
        mean_intensity: if intensity_n > 0 { intensity_sum / intensity_n as f64 } else { 0.0 },
    }
}
