//! Distance helpers and the shape-segment index used for corridor ranking.

use std::collections::{BTreeMap, HashMap};

use crate::config::Zone;

const EARTH_RADIUS_M: f64 = 6_371_000.0;
const METRES_PER_DEGREE: f64 = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;

/// Great-circle distance in metres between two lat/lon points in degrees.
pub fn haversine_m(lat1: f64, lon1: f64, lat2: f64, lon2: f64) -> f64 {
    let lat1 = lat1.to_radians();
    let lat2 = lat2.to_radians();
    let dlat = lat2 - lat1;
    let dlon = (lon2 - lon1).to_radians();
    let a = (dlat / 2.0).sin().powi(2) + lat1.cos() * lat2.cos() * (dlon / 2.0).sin().powi(2);
    2.0 * EARTH_RADIUS_M * a.sqrt().atan2((1.0 - a).sqrt())
}

/// The zone whose centre is closest to the point. The first zone wins ties.
pub fn nearest_zone(lat: f64, lon: f64, zones: &[Zone]) -> Option<&Zone> {
    let mut best: Option<(&Zone, f64)> = None;
    for zone in zones {
        let d = haversine_m(lat, lon, zone.lat, zone.lon);
        match best {
            Some((_, best_d)) if d >= best_d => {}
            _ => best = Some((zone, d)),
        }
    }
    best.map(|(zone, _)| zone)
}

/// One straight piece of a shape, between points `seq` and `seq + 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct Segment {
    pub segment_id: String,
    pub shape_id: String,
    pub seq: usize,
    pub start: (f64, f64),
    pub end: (f64, f64),
}

impl Segment {
    /// Distance in metres from the point to the closest point on the segment.
    ///
    /// Uses an equirectangular projection centred on the query point, which
    /// is accurate at the tens-of-metres scale snapping works at.
    pub fn distance_m(&self, lat: f64, lon: f64) -> f64 {
        let cos_lat = lat.to_radians().cos();
        let project = |(plat, plon): (f64, f64)| {
            (
                (plon - lon) * cos_lat * METRES_PER_DEGREE,
                (plat - lat) * METRES_PER_DEGREE,
            )
        };
        let (ax, ay) = project(self.start);
        let (bx, by) = project(self.end);
        let (dx, dy) = (bx - ax, by - ay);
        let len2 = dx * dx + dy * dy;
        let t = if len2 == 0.0 {
            0.0
        } else {
            (-(ax * dx + ay * dy) / len2).clamp(0.0, 1.0)
        };
        let (cx, cy) = (ax + t * dx, ay + t * dy);
        (cx * cx + cy * cy).sqrt()
    }
}

/// Grid index over shape segments for nearest-segment lookups.
pub struct SegmentIndex {
    segments: Vec<Segment>,
    cells: HashMap<(i64, i64), Vec<usize>>,
    cell_deg: f64,
}

impl SegmentIndex {
    /// Grid cell edge in degrees (about 550 m north-south).
    pub const DEFAULT_CELL_DEG: f64 = 0.005;

    /// Splits each shape (points already in sequence order) into segments.
    pub fn build(shapes: &BTreeMap<String, Vec<(f64, f64)>>) -> Self {
        Self::with_cell_size(shapes, Self::DEFAULT_CELL_DEG)
    }

    pub fn with_cell_size(shapes: &BTreeMap<String, Vec<(f64, f64)>>, cell_deg: f64) -> Self {
        let mut index = Self {
            segments: Vec::new(),
            cells: HashMap::new(),
            cell_deg,
        };

        for (shape_id, points) in shapes {
            for (seq, pair) in points.windows(2).enumerate() {
                index.insert(Segment {
                    segment_id: format!("{shape_id}_{seq}"),
                    shape_id: shape_id.clone(),
                    seq,
                    start: pair[0],
                    end: pair[1],
                });
            }
        }

        index
    }

    fn cell_of(&self, lat: f64, lon: f64) -> (i64, i64) {
        (
            (lat / self.cell_deg).floor() as i64,
            (lon / self.cell_deg).floor() as i64,
        )
    }

    fn insert(&mut self, segment: Segment) {
        let idx = self.segments.len();
        let (lat0, lon0) = self.cell_of(
            segment.start.0.min(segment.end.0),
            segment.start.1.min(segment.end.1),
        );
        let (lat1, lon1) = self.cell_of(
            segment.start.0.max(segment.end.0),
            segment.start.1.max(segment.end.1),
        );
        for cy in lat0..=lat1 {
            for cx in lon0..=lon1 {
                self.cells.entry((cy, cx)).or_default().push(idx);
            }
        }
        self.segments.push(segment);
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }

    /// Nearest segment within `max_m` of the point, with its distance.
    pub fn snap(&self, lat: f64, lon: f64, max_m: f64) -> Option<(&Segment, f64)> {
        let dlat = max_m / METRES_PER_DEGREE;
        let dlon = max_m / (METRES_PER_DEGREE * lat.to_radians().cos().max(1e-6));
        let (lat0, lon0) = self.cell_of(lat - dlat, lon - dlon);
        let (lat1, lon1) = self.cell_of(lat + dlat, lon + dlon);

        let mut best: Option<(usize, f64)> = None;
        for cy in lat0..=lat1 {
            for cx in lon0..=lon1 {
                let Some(candidates) = self.cells.get(&(cy, cx)) else {
                    continue;
                };
                for &idx in candidates {
                    let d = self.segments[idx].distance_m(lat, lon);
                    if d > max_m {
                        continue;
                    }
                    let better = match best {
                        None => true,
                        Some((best_idx, best_d)) => d < best_d || (d == best_d && idx < best_idx),
                    };
                    if better {
                        best = Some((idx, d));
                    }
                }
            }
        }

        best.map(|(idx, d)| (&self.segments[idx], d))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_haversine_zero_distance() {
        assert_eq!(haversine_m(53.35, -6.26, 53.35, -6.26), 0.0);
    }

    #[test]
    fn test_haversine_one_degree_latitude() {
        let d = haversine_m(53.0, -6.26, 54.0, -6.26);
        assert!((d - 111_195.0).abs() < 10.0, "got {d}");
    }

    #[test]
    fn test_nearest_zone() {
        let zones = vec![
            Zone::new("north", 53.38, -6.26),
            Zone::new("centre", 53.34, -6.26),
            Zone::new("south", 53.29, -6.26),
        ];
        assert_eq!(nearest_zone(53.40, -6.20, &zones).unwrap().name, "north");
        assert_eq!(nearest_zone(53.345, -6.27, &zones).unwrap().name, "centre");
        assert_eq!(nearest_zone(53.10, -6.26, &zones).unwrap().name, "south");
        assert!(nearest_zone(53.0, -6.0, &[]).is_none());
    }

    #[test]
    fn test_nearest_zone_tie_goes_to_first() {
        let zones = vec![Zone::new("a", 53.0, -6.0), Zone::new("b", 53.0, -6.0)];
        assert_eq!(nearest_zone(53.1, -6.0, &zones).unwrap().name, "a");
    }

    #[test]
    fn test_segment_distance_perpendicular_and_endpoint() {
        let seg = Segment {
            segment_id: "s_0".to_string(),
            shape_id: "s".to_string(),
            seq: 0,
            start: (53.35, -6.27),
            end: (53.35, -6.25),
        };
        // ~0.0003 deg north of the middle: about 33 m.
        let d = seg.distance_m(53.3503, -6.26);
        assert!((d - 33.4).abs() < 1.0, "got {d}");

        // Beyond the end: distance to the end point.
        let beyond = seg.distance_m(53.35, -6.24);
        let expected = haversine_m(53.35, -6.24, 53.35, -6.25);
        assert!((beyond - expected).abs() < 1.0);
    }

    fn two_shapes() -> BTreeMap<String, Vec<(f64, f64)>> {
        BTreeMap::from([
            (
                "shpA".to_string(),
                vec![(53.35, -6.27), (53.35, -6.26), (53.35, -6.25)],
            ),
            ("shpB".to_string(), vec![(53.30, -6.27), (53.30, -6.25)]),
        ])
    }

    #[test]
    fn test_index_builds_segments() {
        let index = SegmentIndex::build(&two_shapes());
        assert_eq!(index.len(), 3);
        assert!(!index.is_empty());
    }

    #[test]
    fn test_snap_nearest_within_limit() {
        let index = SegmentIndex::build(&two_shapes());

        let (seg, d) = index.snap(53.3502, -6.255, 50.0).unwrap();
        assert_eq!(seg.segment_id, "shpA_1");
        assert!(d < 30.0);

        let (seg, _) = index.snap(53.3001, -6.26, 50.0).unwrap();
        assert_eq!(seg.segment_id, "shpB_0");
    }

    #[test]
    fn test_snap_rejects_far_points() {
        let index = SegmentIndex::build(&two_shapes());
        assert!(index.snap(53.325, -6.26, 50.0).is_none());
    }

    #[test]
    fn test_snap_across_cell_boundary() {
        // Tiny cells force the candidate to live in a neighbouring cell.
        let index = SegmentIndex::with_cell_size(&two_shapes(), 0.0001);
        let (seg, _) = index.snap(53.3503, -6.265, 50.0).unwrap();
        assert_eq!(seg.shape_id, "shpA");
    }
}
