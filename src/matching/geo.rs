//! Haversine distance filtering and final result ranking.
//!
//! All distances are in miles throughout the system. Candidates without
//! coordinates are never dropped by a radius filter since an unknown
//! location is not a far location; they sort after every known distance.

use crate::eid::Eid;

/// Mean earth radius in miles.
const EARTH_RADIUS_MILES: f64 = 3958.8;

/// A location-bounded query: center point plus radius.
#[derive(Debug, Clone, Copy)]
pub struct GeoQuery {
    pub lat: f64,
    pub lng: f64,
    pub radius_miles: f64,
}

/// A retrieval hit carrying the candidate's coordinates, if it has any.
#[derive(Debug, Clone)]
pub struct GeoCandidate {
    pub id: Eid,
    pub similarity: f32,
    pub lat: Option<f64>,
    pub lng: Option<f64>,
}

/// Final ranked result, annotated with the distance to the query point
/// when both sides had coordinates.
#[derive(Debug, Clone)]
pub struct RankedResult {
    pub id: Eid,
    pub similarity: f32,
    pub distance_miles: Option<f64>,
}

/// Great-circle distance between two points, in miles.
pub fn haversine_miles(lat1: f64, lng1: f64, lat2: f64, lng2: f64) -> f64 {
    let d_lat = (lat2 - lat1).to_radians();
    let d_lng = (lng2 - lng1).to_radians();

    let a = (d_lat / 2.0).sin().powi(2)
        + lat1.to_radians().cos() * lat2.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());

    EARTH_RADIUS_MILES * c
}

/// Apply the optional radius filter, rank, and bound to one result page.
///
/// With a `query`: candidates with coordinates beyond the radius are
/// dropped, the rest annotated with their distance. Ranking is similarity
/// descending, with similarities closer than `epsilon` treated as a tie
/// and broken by distance ascending (unknown distance last), then by id.
/// Without a `query`: pure similarity order, no distances.
pub fn filter_and_rank(
    candidates: Vec<GeoCandidate>,
    query: Option<&GeoQuery>,
    epsilon: f32,
    page_size: usize,
) -> Vec<RankedResult> {
    let mut ranked: Vec<RankedResult> = candidates
        .into_iter()
        .filter_map(|c| {
            let distance_miles = match (query, c.lat, c.lng) {
                (Some(q), Some(lat), Some(lng)) => {
                    let d = haversine_miles(q.lat, q.lng, lat, lng);
                    if d > q.radius_miles {
                        return None;
                    }
                    Some(d)
                }
                _ => None,
            };

            Some(RankedResult {
                id: c.id,
                similarity: c.similarity,
                distance_miles,
            })
        })
        .collect();

    // Quantize similarity so near-equal scores form a bucket; within a
    // bucket closer items win. Quantizing keeps the comparator a total
    // order, which a pairwise epsilon test would not be.
    let bucket = |s: f32| -> i64 { (s / epsilon).round() as i64 };

    ranked.sort_by(|a, b| {
        bucket(b.similarity)
            .cmp(&bucket(a.similarity))
            .then_with(|| match (a.distance_miles, b.distance_miles) {
                (Some(x), Some(y)) => x.partial_cmp(&y).unwrap_or(std::cmp::Ordering::Equal),
                (Some(_), None) => std::cmp::Ordering::Less,
                (None, Some(_)) => std::cmp::Ordering::Greater,
                (None, None) => std::cmp::Ordering::Equal,
            })
            .then_with(|| a.id.cmp(&b.id))
    });
    ranked.truncate(page_size);

    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(id: &str, similarity: f32, coords: Option<(f64, f64)>) -> GeoCandidate {
        GeoCandidate {
            id: Eid::from(id),
            similarity,
            lat: coords.map(|c| c.0),
            lng: coords.map(|c| c.1),
        }
    }

    #[test]
    fn test_haversine_identity() {
        assert!(haversine_miles(40.7, -74.0, 40.7, -74.0) < 1e-9);
    }

    #[test]
    fn test_haversine_symmetry() {
        let ab = haversine_miles(40.7, -74.0, 34.0, -118.2);
        let ba = haversine_miles(34.0, -118.2, 40.7, -74.0);
        assert!((ab - ba).abs() < 1e-9);
    }

    #[test]
    fn test_haversine_one_equatorial_degree() {
        // one degree of longitude at the equator is about 69.1 miles
        let d = haversine_miles(0.0, 0.0, 0.0, 1.0);
        assert!((d - 69.0).abs() < 0.5, "got {d}");
    }

    #[test]
    fn test_radius_drops_far_candidates() {
        let query = GeoQuery {
            lat: 0.0,
            lng: 0.0,
            radius_miles: 100.0,
        };
        let candidates = vec![
            candidate("near", 0.9, Some((0.0, 0.5))),  // ~35 mi
            candidate("far", 0.95, Some((0.0, 10.0))), // ~690 mi
        ];

        let ranked = filter_and_rank(candidates, Some(&query), 0.01, 10);
        assert_eq!(ranked.len(), 1);
        assert_eq!(ranked[0].id, Eid::from("near"));
        assert!(ranked[0].distance_miles.unwrap() < 40.0);
    }

    #[test]
    fn test_no_coords_kept_and_sorted_last() {
        let query = GeoQuery {
            lat: 0.0,
            lng: 0.0,
            radius_miles: 100.0,
        };
        // equal similarity: known distance must outrank unknown
        let candidates = vec![
            candidate("unknown", 0.9, None),
            candidate("known", 0.9, Some((0.0, 0.5))),
        ];

        let ranked = filter_and_rank(candidates, Some(&query), 0.01, 10);
        assert_eq!(ranked.len(), 2);
        assert_eq!(ranked[0].id, Eid::from("known"));
        assert_eq!(ranked[1].id, Eid::from("unknown"));
        assert!(ranked[1].distance_miles.is_none());
    }

    #[test]
    fn test_epsilon_tie_broken_by_distance() {
        let query = GeoQuery {
            lat: 0.0,
            lng: 0.0,
            radius_miles: 1000.0,
        };
        // similarities within epsilon of each other; the closer one wins
        let candidates = vec![
            candidate("farish", 0.903, Some((0.0, 5.0))),
            candidate("close", 0.900, Some((0.0, 0.1))),
        ];

        let ranked = filter_and_rank(candidates, Some(&query), 0.01, 10);
        assert_eq!(ranked[0].id, Eid::from("close"));
    }

    #[test]
    fn test_clear_similarity_gap_beats_distance() {
        let query = GeoQuery {
            lat: 0.0,
            lng: 0.0,
            radius_miles: 1000.0,
        };
        let candidates = vec![
            candidate("close", 0.70, Some((0.0, 0.1))),
            candidate("better", 0.95, Some((0.0, 5.0))),
        ];

        let ranked = filter_and_rank(candidates, Some(&query), 0.01, 10);
        assert_eq!(ranked[0].id, Eid::from("better"));
    }

    #[test]
    fn test_without_query_pure_similarity_order() {
        let candidates = vec![
            candidate("b", 0.8, Some((0.0, 0.0))),
            candidate("a", 0.9, None),
        ];

        let ranked = filter_and_rank(candidates, None, 0.01, 10);
        assert_eq!(ranked[0].id, Eid::from("a"));
        // no query point: nothing gets a distance
        assert!(ranked.iter().all(|r| r.distance_miles.is_none()));
    }

    #[test]
    fn test_page_bound() {
        let candidates: Vec<_> = (0..25)
            .map(|i| candidate(&format!("{i:02}"), 1.0 - i as f32 * 0.02, None))
            .collect();

        let ranked = filter_and_rank(candidates, None, 0.01, 10);
        assert_eq!(ranked.len(), 10);
        assert_eq!(ranked[0].id, Eid::from("00"));
    }
}
