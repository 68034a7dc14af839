/// Climate anomaly: how often and how far a site's daily weather departs
/// from its own long-run distribution.
///
/// Per site and per variable (max temperature, precipitation, max wind) the
/// sample mean and standard deviation are taken over the joined records. A
/// day is extreme when `z_temp > 2`, `z_precip > 3` or `z_wind > 3`; its
/// magnitude is the largest exceeding z. `raw = Σ magnitudes / record count`.

use serde::Serialize;

use crate::model::ClimateDayRecord;
use crate::scoring::Joined;

pub const TEMP_Z_THRESHOLD: f64 = 2.0;
pub const PRECIP_Z_THRESHOLD: f64 = 3.0;
pub const WIND_Z_THRESHOLD: f64 = 3.0;

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ClimateAggregate {
    pub record_count: usize,
    pub extreme_days: usize,
    pub magnitude_sum: f64,
}

impl ClimateAggregate {
    pub fn raw(&self) -> f64 {
        if self.record_count == 0 {
            0.0
        } else {
            self.magnitude_sum / self.record_count as f64
        }
    }
}

/// Sample mean and standard deviation of one variable.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Moments {
    mean: f64,
    std: f64,
}

impl Moments {
    /// `None` with fewer than two finite values or zero spread.
    fn of(values: impl Iterator<Item = f64>) -> Option<Self> {
        let values: Vec<f64> = values.filter(|v| v.is_finite()).collect();
        if values.len() < 2 {
            return None;
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0);
        let std = var.sqrt();
        (std > 0.0).then_some(Moments { mean, std })
    }

    /// z-score if it exceeds `threshold`.
    fn exceedance(&self, value: Option<f64>, threshold: f64) -> Option<f64> {
        let z = (value.filter(|v| v.is_finite())? - self.mean) / self.std;
        (z > threshold).then_some(z)
    }
}

pub fn aggregate(records: &[Joined<ClimateDayRecord>]) -> ClimateAggregate {
    let temp = Moments::of(records.iter().filter_map(|r| r.obs.temp_max_c));
    let precip = Moments::of(records.iter().filter_map(|r| r.obs.precipitation_mm));
    let wind = Moments::of(records.iter().filter_map(|r| r.obs.wind_max_ms));

    let mut agg = ClimateAggregate {
        record_count: records.len(),
        ..ClimateAggregate::default()
    };

    for joined in records {
        let r = joined.obs;
        let magnitude = [
            temp.and_then(|m| m.exceedance(r.temp_max_c, TEMP_Z_THRESHOLD)),
            precip.and_then(|m| m.exceedance(r.precipitation_mm, PRECIP_Z_THRESHOLD)),
            wind.and_then(|m| m.exceedance(r.wind_max_ms, WIND_Z_THRESHOLD)),
        ]
        .into_iter()
        .flatten()
        .fold(None, |best: Option<f64>, z| Some(best.map_or(z, |b| b.max(z))));

        if let Some(z) = magnitude {
            agg.extreme_days += 1;
            agg.magnitude_sum += z;
        }
    }

    agg
}
