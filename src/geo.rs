//! Pure spatial predicates: containment, great-circle distance and
//! nearest-neighbor selection. No I/O, no clocks.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Mean earth radius in meters (spherical approximation).
pub const EARTH_RADIUS_M: f64 = 6_371_000.0;

/// Tolerance used when deciding whether a point sits on a polygon edge.
const EDGE_EPSILON: f64 = 1e-9;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub lat: f64,
    pub lng: f64,
}

impl Point {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_finite(&self) -> bool {
        self.lat.is_finite() && self.lng.is_finite()
    }

    /// Finite and within [-90, 90] latitude, [-180, 180] longitude.
    pub fn in_bounds(&self) -> bool {
        self.is_finite()
            && (-90.0..=90.0).contains(&self.lat)
            && (-180.0..=180.0).contains(&self.lng)
    }
}

/// Great-circle distance in meters between two coordinates, haversine
/// formula on a spherical earth. Symmetric, zero for identical points.
/// Inputs are validated finite at the service boundary; NaN propagates
/// for unvalidated input.
pub fn haversine_m(a: Point, b: Point) -> f64 {
    let phi1 = a.lat.to_radians();
    let phi2 = b.lat.to_radians();
    let delta_phi = (b.lat - a.lat).to_radians();
    let delta_lambda = (b.lng - a.lng).to_radians();

    let h = (delta_phi / 2.0).sin().powi(2)
        + phi1.cos() * phi2.cos() * (delta_lambda / 2.0).sin().powi(2);
    let c = 2.0 * h.sqrt().atan2((1.0 - h).sqrt());

    EARTH_RADIUS_M * c
}

/// Even-odd (ray casting) containment over a closed ring (first vertex
/// repeated last). Points exactly on an edge count as inside: boundary
/// ties break toward inclusion so customers right on an area border are
/// never refused service.
pub fn point_in_polygon(p: Point, ring: &[Point]) -> bool {
    // A closed ring carries at least 4 entries (3 distinct + closure).
    if ring.len() < 4 {
        return false;
    }

    let mut inside = false;
    for edge in ring.windows(2) {
        let (a, b) = (edge[0], edge[1]);
        if on_segment(p, a, b) {
            return true;
        }
        if (a.lat > p.lat) != (b.lat > p.lat) {
            let crossing_lng = a.lng + (p.lat - a.lat) / (b.lat - a.lat) * (b.lng - a.lng);
            if p.lng < crossing_lng {
                inside = !inside;
            }
        }
    }
    inside
}

fn on_segment(p: Point, a: Point, b: Point) -> bool {
    let cross = (b.lat - a.lat) * (p.lng - a.lng) - (b.lng - a.lng) * (p.lat - a.lat);
    if cross.abs() > EDGE_EPSILON {
        return false;
    }
    let within_lat =
        p.lat >= a.lat.min(b.lat) - EDGE_EPSILON && p.lat <= a.lat.max(b.lat) + EDGE_EPSILON;
    let within_lng =
        p.lng >= a.lng.min(b.lng) - EDGE_EPSILON && p.lng <= a.lng.max(b.lng) + EDGE_EPSILON;
    within_lat && within_lng
}

/// True iff `p` lies within `radius_m` meters of `center`, boundary
/// inclusive.
pub fn point_in_circle(p: Point, center: Point, radius_m: f64) -> bool {
    haversine_m(p, center) <= radius_m
}

/// Anything with a fixed anchor coordinate that can compete in a
/// nearest-neighbor scan.
pub trait NearestCandidate {
    fn anchor(&self) -> Point;
    fn priority(&self) -> i32;
    fn candidate_id(&self) -> Uuid;
    fn is_active(&self) -> bool;
}

/// Linear scan over active candidates, minimizing haversine distance to
/// `p`. Distance ties go to the lowest `priority`, then the lowest id,
/// so repeated scans over the same data always pick the same winner.
pub fn nearest_of<'a, C, I>(p: Point, candidates: I) -> Option<(&'a C, f64)>
where
    C: NearestCandidate,
    I: IntoIterator<Item = &'a C>,
{
    let mut best: Option<(&C, f64)> = None;
    for candidate in candidates.into_iter().filter(|c| c.is_active()) {
        let distance = haversine_m(p, candidate.anchor());
        best = match best {
            None => Some((candidate, distance)),
            Some((leader, leading)) => {
                let wins = distance < leading
                    || (distance == leading
                        && (candidate.priority(), candidate.candidate_id())
                            < (leader.priority(), leader.candidate_id()));
                if wins {
                    Some((candidate, distance))
                } else {
                    Some((leader, leading))
                }
            }
        };
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Anchor {
        id: Uuid,
        at: Point,
        priority: i32,
        active: bool,
    }

    impl NearestCandidate for Anchor {
        fn anchor(&self) -> Point {
            self.at
        }
        fn priority(&self) -> i32 {
            self.priority
        }
        fn candidate_id(&self) -> Uuid {
            self.id
        }
        fn is_active(&self) -> bool {
            self.active
        }
    }

    fn closed_unit_square() -> Vec<Point> {
        vec![
            Point::new(0.0, 0.0),
            Point::new(0.0, 2.0),
            Point::new(2.0, 2.0),
            Point::new(2.0, 0.0),
            Point::new(0.0, 0.0),
        ]
    }

    #[test]
    fn haversine_is_zero_on_identical_points() {
        let p = Point::new(-6.2088, 106.8456);
        assert_eq!(haversine_m(p, p), 0.0);
    }

    #[test]
    fn haversine_is_symmetric() {
        let jakarta = Point::new(-6.2088, 106.8456);
        let bandung = Point::new(-6.9175, 107.6191);
        assert_eq!(haversine_m(jakarta, bandung), haversine_m(bandung, jakarta));
    }

    #[test]
    fn haversine_matches_known_city_distance() {
        // Jakarta to Bandung is roughly 120-130 km.
        let jakarta = Point::new(-6.2088, 106.8456);
        let bandung = Point::new(-6.9175, 107.6191);
        let d = haversine_m(jakarta, bandung);
        assert!(d > 100_000.0 && d < 150_000.0, "got {d}");
    }

    #[test]
    fn polygon_contains_interior_point() {
        assert!(point_in_polygon(Point::new(1.0, 1.0), &closed_unit_square()));
    }

    #[test]
    fn polygon_excludes_far_point() {
        assert!(!point_in_polygon(Point::new(5.0, 5.0), &closed_unit_square()));
    }

    #[test]
    fn polygon_boundary_counts_as_inside() {
        let ring = closed_unit_square();
        assert!(point_in_polygon(Point::new(0.0, 1.0), &ring));
        assert!(point_in_polygon(Point::new(2.0, 2.0), &ring));
    }

    #[test]
    fn degenerate_ring_contains_nothing() {
        let line = vec![Point::new(0.0, 0.0), Point::new(1.0, 1.0), Point::new(0.0, 0.0)];
        assert!(!point_in_polygon(Point::new(0.5, 0.5), &line));
    }

    #[test]
    fn circle_membership_straddles_the_radius() {
        let center = Point::new(10.0, 20.0);
        // Along a meridian the haversine distance is exactly R * delta_phi.
        let meters_per_degree = EARTH_RADIUS_M * std::f64::consts::PI / 180.0;
        let near = Point::new(10.0 + 999.0 / meters_per_degree, 20.0);
        let far = Point::new(10.0 + 1001.0 / meters_per_degree, 20.0);
        assert!(point_in_circle(near, center, 1000.0));
        assert!(!point_in_circle(far, center, 1000.0));
    }

    #[test]
    fn circle_agrees_with_haversine() {
        let center = Point::new(10.0, 20.0);
        let p = Point::new(10.009, 20.0);
        let r = 1000.0;
        assert_eq!(point_in_circle(p, center, r), haversine_m(p, center) <= r);
    }

    #[test]
    fn nearest_skips_inactive_candidates() {
        let origin = Point::new(0.0, 0.0);
        let candidates = vec![
            Anchor {
                id: Uuid::new_v4(),
                at: Point::new(0.001, 0.0),
                priority: 0,
                active: false,
            },
            Anchor {
                id: Uuid::new_v4(),
                at: Point::new(0.5, 0.0),
                priority: 0,
                active: true,
            },
        ];
        let (winner, _) = nearest_of(origin, &candidates).unwrap();
        assert_eq!(winner.at.lat, 0.5);
    }

    #[test]
    fn nearest_breaks_distance_ties_by_priority_then_id() {
        let origin = Point::new(0.0, 0.0);
        let spot = Point::new(1.0, 1.0);
        let low = Uuid::from_u128(1);
        let high = Uuid::from_u128(2);
        let candidates = vec![
            Anchor {
                id: high,
                at: spot,
                priority: 5,
                active: true,
            },
            Anchor {
                id: low,
                at: spot,
                priority: 2,
                active: true,
            },
        ];
        let (winner, _) = nearest_of(origin, &candidates).unwrap();
        assert_eq!(winner.candidate_id(), low);

        let same_priority = vec![
            Anchor {
                id: high,
                at: spot,
                priority: 2,
                active: true,
            },
            Anchor {
                id: low,
                at: spot,
                priority: 2,
                active: true,
            },
        ];
        let (winner, _) = nearest_of(origin, &same_priority).unwrap();
        assert_eq!(winner.candidate_id(), low);
    }

    #[test]
    fn nearest_of_nothing_is_none() {
        let empty: Vec<Anchor> = vec![];
        assert!(nearest_of(Point::new(0.0, 0.0), &empty).is_none());
    }
}
