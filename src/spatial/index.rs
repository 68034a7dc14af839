/// Uniform grid index over metric points.
///
/// Cells are square with side `cell_size`; a query of radius `r` visits
/// `ceil(r / cell_size)` rings of cells around the query cell, so with
/// `cell_size == r` a lookup touches the 3x3 neighbourhood only and the
/// cost is bounded by the local density, not by the size of the index.

use std::collections::HashMap;

use crate::model::MetricPoint;

type CellKey = (i64, i64);

#[derive(Debug, Clone)]
pub struct GridIndex<T> {
    cell_size: f64,
    cells: HashMap<CellKey, Vec<(MetricPoint, T)>>,
    len: usize,
}

impl<T: Copy> GridIndex<T> {
    /// `cell_size` must be positive and finite; callers pass validated radii.
    pub fn new(cell_size: f64) -> Self {
        debug_assert!(cell_size.is_finite() && cell_size > 0.0, "cell size {cell_size}");
        Self {
            cell_size,
            cells: HashMap::new(),
            len: 0,
        }
    }

    pub fn from_points(cell_size: f64, points: impl IntoIterator<Item = (MetricPoint, T)>) -> Self {
        let mut index = Self::new(cell_size);
        for (point, item) in points {
            index.insert(point, item);
        }
        index
    }

    /// Non-finite points are ignored.
    pub fn insert(&mut self, point: MetricPoint, item: T) {
        if !point.x.is_finite() || !point.y.is_finite() {
            return;
        }
        self.cells.entry(self.key(point)).or_default().push((point, item));
        self.len += 1;
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every item within `radius` of `center`, boundary inclusive, with its
    /// distance. Order is unspecified.
    pub fn within(&self, center: MetricPoint, radius: f64) -> Vec<(T, f64)> {
        let mut hits = Vec::new();
        self.visit(center, radius, |item, d| hits.push((item, d)));
        hits
    }

    fn visit(&self, center: MetricPoint, radius: f64, mut f: impl FnMut(T, f64)) {
        if !(radius >= 0.0) || !center.x.is_finite() || !center.y.is_finite() {
            return;
        }
        let (cx, cy) = self.key(center);
        let span = (radius / self.cell_size).ceil() as i64;
        for gx in (cx - span)..=(cx + span) {
            for gy in (cy - span)..=(cy + span) {
                let Some(bucket) = self.cells.get(&(gx, gy)) else {
                    continue;
                };
                for (point, item) in bucket {
                    let d = center.distance_to(point);
                    if d <= radius {
                        f(*item, d);
                    }
                }
            }
        }
    }

    fn key(&self, p: MetricPoint) -> CellKey {
        (
            (p.x / self.cell_size).floor() as i64,
            (p.y / self.cell_size).floor() as i64,
        )
    }
}

impl<T: Copy + Ord> GridIndex<T> {
    /// Closest item within `radius` (inclusive). Equal distances resolve to
    /// the smaller item.
    pub fn nearest_within(&self, center: MetricPoint, radius: f64) -> Option<(T, f64)> {
        let mut best: Option<(T, f64)> = None;
        self.visit(center, radius, |item, d| {
            let better = match best {
                None => true,
                Some((b_item, b_d)) => d < b_d || (d == b_d && item < b_item),
            };
            if better {
                best = Some((item, d));
            }
        });
        best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_within_is_inclusive_at_boundary() {
        let index = GridIndex::from_points(
            1_000.0,
            vec![
                (MetricPoint::new(1_000.0, 0.0), 1),
                (MetricPoint::new(1_000.001, 0.0), 2),
            ],
        );
        let hits = index.within(MetricPoint::new(0.0, 0.0), 1_000.0);
        assert_eq!(hits, vec![(1, 1_000.0)]);
    }

    #[test]
    fn test_within_crosses_cell_boundaries() {
        let center = MetricPoint::new(4_321_500.0, 3_210_500.0);
        let points: Vec<(MetricPoint, u32)> = (0..8)
            .map(|i| {
                let theta = i as f64 * std::f64::consts::FRAC_PI_4;
                (MetricPoint::new(center.x + 900.0 * theta.cos(), center.y + 900.0 * theta.sin()), i)
            })
            .collect();
        let index = GridIndex::from_points(1_000.0, points);
        let mut hits: Vec<u32> = index.within(center, 1_000.0).into_iter().map(|(i, _)| i).collect();
        hits.sort();
        assert_eq!(hits, (0..8).collect::<Vec<_>>(), "all 8 neighbours must be found");
    }

    #[test]
    fn test_query_radius_larger_than_cell() {
        let index = GridIndex::from_points(100.0, vec![(MetricPoint::new(950.0, 0.0), 7)]);
        assert_eq!(index.within(MetricPoint::new(0.0, 0.0), 1_000.0).len(), 1);
    }

    #[test]
    fn test_nearest_tie_breaks_on_lower_item() {
        let index = GridIndex::from_points(
            500.0,
            vec![
                (MetricPoint::new(300.0, 0.0), 9_i64),
                (MetricPoint::new(-300.0, 0.0), 4_i64),
                (MetricPoint::new(0.0, 450.0), 1_i64),
            ],
        );
        assert_eq!(index.nearest_within(MetricPoint::new(0.0, 0.0), 500.0), Some((4, 300.0)));
        assert_eq!(index.nearest_within(MetricPoint::new(0.0, 0.0), 200.0), None);
    }

    #[test]
    fn test_non_finite_points_ignored() {
        let mut index = GridIndex::new(10.0);
        index.insert(MetricPoint::new(f64::NAN, 0.0), 1);
        index.insert(MetricPoint::new(1.0, 1.0), 2);
        assert_eq!(index.len(), 1);
        assert!(index.nearest_within(MetricPoint::new(f64::INFINITY, 0.0), 10.0).is_none());
    }
}
