//! Reassembles the flat ring list of a Polygon record into polygons.
//!
//! Shapefiles carry no shell/hole linkage. A ring's winding says what it is:
//! clockwise rings are exteriors, counter-clockwise rings are holes. Each
//! hole is handed to the first exterior that seems to contain it.

use crate::geo::{Polygon, Ring};

/// What one ring of a record turned out to be.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RingClass {
    pub is_exterior: bool,
    /// For an interior ring, the index of the exterior ring that claimed it.
    pub mother: Option<usize>,
}

/// Tests whether exterior `outer` seems to contain interior `inner`.
///
/// The bounding boxes must nest, and then either `inner`'s first point or its
/// middle point must fall within `outer`. This can mis-pair rings that are
/// nested several levels deep.
fn seems_to_contain(outer: &Ring, inner: &Ring) -> bool {
    if inner.is_empty() || !outer.mbr().contains(&inner.mbr()) {
        return false;
    }
    let coords = inner.coords();
    let first = &coords[0];
    let middle = &coords[coords.len() / 2];
    outer.contains_point(first.x, first.y) || outer.contains_point(middle.x, middle.y)
}

/// Classifies every ring and pairs each interior ring with an exterior.
///
/// Exteriors are tried in input order and the first match wins. Interior
/// rings that no exterior claims are promoted to exteriors.
pub fn arrange_rings(rings: &[Ring]) -> Vec<RingClass> {
    let mut classes: Vec<RingClass> = rings.iter()
        .map(|r| RingClass { is_exterior: r.is_clockwise(), mother: None })
        .collect();

    for e in 0..rings.len() {
        if !classes[e].is_exterior {
            continue;
        }
        for i in 0..rings.len() {
            if classes[i].is_exterior || classes[i].mother.is_some() {
                continue;
            }
            if seems_to_contain(&rings[e], &rings[i]) {
                classes[i].mother = Some(e);
            }
        }
    }

    for class in classes.iter_mut() {
        if !class.is_exterior && class.mother.is_none() {
            class.is_exterior = true;
        }
    }

    classes
}

/// Builds one polygon per exterior ring, in input order, each with the
/// interior rings that claimed it.
pub fn build_polygons(rings: Vec<Ring>) -> Vec<Polygon> {
    let classes = arrange_rings(&rings);
    let mut slots: Vec<Option<Ring>> = rings.into_iter().map(Some).collect();
    let mut polygons = Vec::new();

    for (e, class) in classes.iter().enumerate() {
        if !class.is_exterior {
            continue;
        }
        let exterior = match slots[e].take() {
            Some(ring) => ring,
            None => continue,
        };
        let mut polygon = Polygon::new(exterior);
        for (i, child) in classes.iter().enumerate() {
            if child.mother == Some(e) {
                if let Some(ring) = slots[i].take() {
                    polygon.interiors.push(ring);
                }
            }
        }
        polygons.push(polygon);
    }

    polygons
}

/// Counts the polygons `build_polygons` would produce.
pub fn count_exteriors(rings: &[Ring]) -> usize {
    arrange_rings(rings).iter().filter(|c| c.is_exterior).count()
}

/// Forces the exterior clockwise and every interior counter-clockwise.
pub fn normalize_winding(polygon: &mut Polygon) {
    if !polygon.exterior.is_clockwise() {
        polygon.exterior.reverse();
    }
    for ring in polygon.interiors.iter_mut() {
        if ring.is_clockwise() {
            ring.reverse();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::geo::Coord;

    fn clockwise_square(x0: f64, y0: f64, size: f64) -> Ring {
        Ring(vec![
            Coord::xy(x0, y0),
            Coord::xy(x0, y0 + size),
            Coord::xy(x0 + size, y0 + size),
            Coord::xy(x0 + size, y0),
            Coord::xy(x0, y0),
        ])
    }

    fn counter_clockwise_square(x0: f64, y0: f64, size: f64) -> Ring {
        let mut ring = clockwise_square(x0, y0, size);
        ring.reverse();
        ring
    }

    #[test]
    fn test_single_exterior() {
        let polygons = build_polygons(vec![ clockwise_square(0.0, 0.0, 10.0) ]);
        assert_eq!(1, polygons.len());
        assert!(polygons[0].interiors.is_empty());
    }

    #[test]
    fn test_hole_after_shell() {
        let rings = vec![ clockwise_square(0.0, 0.0, 10.0), counter_clockwise_square(2.0, 2.0, 2.0) ];
        let classes = arrange_rings(&rings);
        assert_eq!(RingClass { is_exterior: true, mother: None }, classes[0]);
        assert_eq!(RingClass { is_exterior: false, mother: Some(0) }, classes[1]);

        let polygons = build_polygons(rings.clone());
        assert_eq!(1, polygons.len());
        assert_eq!(rings[0], polygons[0].exterior);
        assert_eq!(vec![ rings[1].clone() ], polygons[0].interiors);
    }

    #[test]
    fn test_hole_before_shell() {
        let polygons = build_polygons(vec![ counter_clockwise_square(2.0, 2.0, 2.0), clockwise_square(0.0, 0.0, 10.0) ]);
        assert_eq!(1, polygons.len());
        assert_eq!(1, polygons[0].interiors.len());
    }

    #[test]
    fn test_two_shells_each_with_hole() {
        let polygons = build_polygons(vec![
            clockwise_square(0.0, 0.0, 10.0),
            clockwise_square(20.0, 0.0, 10.0),
            counter_clockwise_square(22.0, 2.0, 2.0),
            counter_clockwise_square(2.0, 2.0, 2.0),
        ]);
        assert_eq!(2, polygons.len());
        assert_eq!(counter_clockwise_square(2.0, 2.0, 2.0), polygons[0].interiors[0]);
        assert_eq!(counter_clockwise_square(22.0, 2.0, 2.0), polygons[1].interiors[0]);
    }

    #[test]
    fn test_orphan_hole_promoted() {
        let polygons = build_polygons(vec![
            clockwise_square(0.0, 0.0, 10.0),
            counter_clockwise_square(50.0, 50.0, 2.0),
        ]);
        assert_eq!(2, polygons.len());
        assert_eq!(counter_clockwise_square(50.0, 50.0, 2.0), polygons[1].exterior);
    }

    #[test]
    fn test_first_containing_exterior_wins() {
        // The hole sits inside both shells; the earlier one claims it.
        let polygons = build_polygons(vec![
            clockwise_square(0.0, 0.0, 100.0),
            clockwise_square(10.0, 10.0, 50.0),
            counter_clockwise_square(20.0, 20.0, 5.0),
        ]);
        assert_eq!(2, polygons.len());
        assert_eq!(1, polygons[0].interiors.len());
        assert!(polygons[1].interiors.is_empty());
    }

    #[test]
    fn test_count_exteriors() {
        assert_eq!(0, count_exteriors(&[]));
        assert_eq!(2, count_exteriors(&[ clockwise_square(0.0, 0.0, 1.0), clockwise_square(5.0, 5.0, 1.0) ]));
    }

    #[test]
    fn test_normalize_winding() {
        let mut polygon = Polygon {
            exterior: counter_clockwise_square(0.0, 0.0, 10.0),
            interiors: vec![ clockwise_square(2.0, 2.0, 2.0) ],
        };
        normalize_winding(&mut polygon);
        assert!(polygon.exterior.is_clockwise());
        assert!(!polygon.interiors[0].is_clockwise());
    }
}
