//! The small geometry model the Shapefile codec reads into and writes from.
//!
//! Coordinates are plain `f64`. Every `Coord` carries Z and M slots; whether
//! they mean anything is decided by the `Dims` of the session that produced
//! or consumes the geometry.

use std::cmp::Ordering;
use std::f64;
use std::fmt;
use itertools::{Itertools, MinMaxResult};

/// Which ordinates beyond X/Y a geometry carries.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Dims {
    Xy,
    Xyz,
    Xym,
    Xyzm,
}

impl Dims {
    pub fn has_z(self) -> bool {
        self == Dims::Xyz || self == Dims::Xyzm
    }

    pub fn has_m(self) -> bool {
        self == Dims::Xym || self == Dims::Xyzm
    }
}

/// The in-memory geometry kinds a Shapefile entity maps onto.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum GeometryType {
    Point,
    LineString,
    MultiLineString,
    Polygon,
    MultiPolygon,
    MultiPoint,
}

#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Coord {
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub m: f64,
}

impl Coord {
    pub fn xy(x: f64, y: f64) -> Coord {
        Coord { x: x, y: y, z: 0.0, m: 0.0 }
    }

    pub fn xyz(x: f64, y: f64, z: f64) -> Coord {
        Coord { x: x, y: y, z: z, m: 0.0 }
    }

    pub fn xym(x: f64, y: f64, m: f64) -> Coord {
        Coord { x: x, y: y, z: 0.0, m: m }
    }

    pub fn xyzm(x: f64, y: f64, z: f64, m: f64) -> Coord {
        Coord { x: x, y: y, z: z, m: m }
    }
}

impl fmt::Display for Coord {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "({},{})", self.x, self.y)
    }
}

/// Minimum bounding rectangle.
///
/// `Mbr::empty()` is inverted (min > max) so that folding any coordinate into
/// it yields that coordinate's box.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Mbr {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl Mbr {
    pub fn empty() -> Mbr {
        Mbr {
            min_x: f64::MAX,
            min_y: f64::MAX,
            max_x: -f64::MAX,
            max_y: -f64::MAX,
        }
    }

    pub fn new(min_x: f64, min_y: f64, max_x: f64, max_y: f64) -> Mbr {
        Mbr { min_x: min_x, min_y: min_y, max_x: max_x, max_y: max_y }
    }

    pub fn is_empty(&self) -> bool {
        self.min_x > self.max_x || self.min_y > self.max_y
    }

    pub fn add_coord(&mut self, c: &Coord) {
        self.min_x = self.min_x.min(c.x);
        self.min_y = self.min_y.min(c.y);
        self.max_x = self.max_x.max(c.x);
        self.max_y = self.max_y.max(c.y);
    }

    pub fn add_mbr(&mut self, other: &Mbr) {
        if other.is_empty() {
            return;
        }
        self.min_x = self.min_x.min(other.min_x);
        self.min_y = self.min_y.min(other.min_y);
        self.max_x = self.max_x.max(other.max_x);
        self.max_y = self.max_y.max(other.max_y);
    }

    pub fn of_coords<'a, T: IntoIterator<Item=&'a Coord>>(coords: T) -> Mbr {
        let mut mbr = Mbr::empty();
        for c in coords {
            mbr.add_coord(c);
        }
        mbr
    }

    /// True iff `other` lies entirely within (or on the edge of) `self`.
    pub fn contains(&self, other: &Mbr) -> bool {
        other.min_x >= self.min_x && other.min_x <= self.max_x
            && other.max_x >= self.min_x && other.max_x <= self.max_x
            && other.min_y >= self.min_y && other.min_y <= self.max_y
            && other.max_y >= self.min_y && other.max_y <= self.max_y
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindingOrder {
    Clockwise,
    CounterClockwise,
}

/// Returns 2*area, negative iff the points run clockwise.
///
/// Assumes Y grows **upward** (WGS84-style, as in Shapefiles). The last point
/// is joined back to the first, so the ring need not repeat its start point.
pub fn signed_area2<'a, T: IntoIterator<Item=&'a Coord>>(coords: T) -> f64 {
    // https://en.wikipedia.org/wiki/Shoelace_formula
    let coords: Vec<&Coord> = coords.into_iter().collect();
    let first = coords.first().cloned();

    let mut a = 0.0;
    for (p1, p2) in coords.iter().cloned().chain(first).tuple_windows() {
        a += p1.x * p2.y - p2.x * p1.y;
    }
    a
}

/// Returns winding order.
///
/// A zero-area ring is considered to be CounterClockwise.
pub fn winding_order<'a, T: IntoIterator<Item=&'a Coord>>(coords: T) -> WindingOrder {
    if signed_area2(coords) < 0.0 {
        WindingOrder::Clockwise
    } else {
        WindingOrder::CounterClockwise
    }
}

/// An open path of two or more coordinates.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct LineString(pub Vec<Coord>);

impl LineString {
    pub fn mbr(&self) -> Mbr {
        Mbr::of_coords(&self.0)
    }
}

/// A closed path: the last coordinate repeats the first.
///
/// The codec does not enforce closure; it reproduces whatever the file holds.
#[derive(Clone, Debug, PartialEq, Default)]
pub struct Ring(pub Vec<Coord>);

impl Ring {
    pub fn coords(&self) -> &[Coord] {
        &self.0
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn mbr(&self) -> Mbr {
        Mbr::of_coords(&self.0)
    }

    pub fn winding_order(&self) -> WindingOrder {
        winding_order(&self.0)
    }

    pub fn is_clockwise(&self) -> bool {
        self.winding_order() == WindingOrder::Clockwise
    }

    pub fn reverse(&mut self) {
        self.0.reverse();
    }

    /// Tests whether (x, y) falls inside the ring, using the even-odd
    /// crossing rule.
    ///
    /// The last vertex is ignored: it is assumed to repeat the first.
    pub fn contains_point(&self, x: f64, y: f64) -> bool {
        if self.0.len() < 3 {
            return false;
        }
        let vertices = &self.0[..self.0.len() - 1];

        let mbr = Mbr::of_coords(vertices);
        if x < mbr.min_x || x > mbr.max_x || y < mbr.min_y || y > mbr.max_y {
            return false;
        }

        // "Point in Polygon Strategies", Eric Haines, Graphics Gems IV
        let mut inside = false;
        let mut j = vertices.len() - 1;
        for i in 0..vertices.len() {
            let (vi, vj) = (&vertices[i], &vertices[j]);
            if ((vi.y <= y && y < vj.y) || (vj.y <= y && y < vi.y))
                && x < (vj.x - vi.x) * (y - vi.y) / (vj.y - vi.y) + vi.x
            {
                inside = !inside;
            }
            j = i;
        }
        inside
    }
}

impl fmt::Display for Ring {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{}]", self.0.iter().join(","))
    }
}

#[derive(Clone, Debug, PartialEq, Default)]
pub struct Polygon {
    pub exterior: Ring,
    pub interiors: Vec<Ring>,
}

impl Polygon {
    pub fn new(exterior: Ring) -> Polygon {
        Polygon { exterior: exterior, interiors: Vec::new() }
    }

    /// All rings, exterior first.
    pub fn rings(&self) -> impl Iterator<Item=&Ring> {
        Some(&self.exterior).into_iter().chain(self.interiors.iter())
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum Geometry {
    Point(Coord),
    LineString(LineString),
    MultiLineString(Vec<LineString>),
    Polygon(Polygon),
    MultiPolygon(Vec<Polygon>),
    MultiPoint(Vec<Coord>),
}

impl Geometry {
    pub fn geometry_type(&self) -> GeometryType {
        match *self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::LineString(_) => GeometryType::LineString,
            Geometry::MultiLineString(_) => GeometryType::MultiLineString,
            Geometry::Polygon(_) => GeometryType::Polygon,
            Geometry::MultiPolygon(_) => GeometryType::MultiPolygon,
            Geometry::MultiPoint(_) => GeometryType::MultiPoint,
        }
    }

    /// Every coordinate, in file order (polygons: exterior then interiors).
    pub fn coords<'a>(&'a self) -> Box<dyn Iterator<Item=&'a Coord> + 'a> {
        match *self {
            Geometry::Point(ref c) => Box::new(Some(c).into_iter()),
            Geometry::LineString(ref l) => Box::new(l.0.iter()),
            Geometry::MultiLineString(ref ls) => Box::new(ls.iter().flat_map(|l| l.0.iter())),
            Geometry::Polygon(ref p) => Box::new(p.rings().flat_map(|r| r.0.iter())),
            Geometry::MultiPolygon(ref ps) => Box::new(ps.iter().flat_map(|p| p.rings()).flat_map(|r| r.0.iter())),
            Geometry::MultiPoint(ref cs) => Box::new(cs.iter()),
        }
    }

    pub fn mbr(&self) -> Mbr {
        Mbr::of_coords(self.coords())
    }

    /// (min, max) over Z; (0, 0) for a geometry with no coordinates.
    pub fn z_range(&self) -> (f64, f64) {
        range(self.coords().map(|c| c.z))
    }

    /// (min, max) over M; (0, 0) for a geometry with no coordinates.
    pub fn m_range(&self) -> (f64, f64) {
        range(self.coords().map(|c| c.m))
    }
}

fn range<T: Iterator<Item=f64>>(values: T) -> (f64, f64) {
    match values.minmax_by(|a, b| a.partial_cmp(b).unwrap_or(Ordering::Equal)) {
        MinMaxResult::NoElements => (0.0, 0.0),
        MinMaxResult::OneElement(v) => (v, v),
        MinMaxResult::MinMax(min, max) => (min, max),
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn square(x0: f64, y0: f64, size: f64) -> Ring {
        // clockwise with Y up: left edge upward, then right
        Ring(vec![
            Coord::xy(x0, y0),
            Coord::xy(x0, y0 + size),
            Coord::xy(x0 + size, y0 + size),
            Coord::xy(x0 + size, y0),
            Coord::xy(x0, y0),
        ])
    }

    #[test]
    fn test_winding_order_clockwise() {
        assert_eq!(WindingOrder::Clockwise, square(0.0, 0.0, 10.0).winding_order());
    }

    #[test]
    fn test_winding_order_reversed() {
        let mut ring = square(0.0, 0.0, 10.0);
        ring.reverse();
        assert_eq!(WindingOrder::CounterClockwise, ring.winding_order());
    }

    #[test]
    fn test_zero_area_is_counter_clockwise() {
        let ring = Ring(vec![ Coord::xy(0.0, 0.0), Coord::xy(1.0, 1.0), Coord::xy(0.0, 0.0) ]);
        assert!(!ring.is_clockwise());
    }

    #[test]
    fn test_contains_point() {
        let ring = square(0.0, 0.0, 10.0);
        assert!(ring.contains_point(5.0, 5.0));
        assert!(!ring.contains_point(15.0, 5.0));
        assert!(!ring.contains_point(5.0, -0.5));
    }

    #[test]
    fn test_contains_point_degenerate_ring() {
        let ring = Ring(vec![ Coord::xy(0.0, 0.0), Coord::xy(0.0, 0.0) ]);
        assert!(!ring.contains_point(0.0, 0.0));
    }

    #[test]
    fn test_mbr_contains() {
        let outer = Mbr::new(0.0, 0.0, 10.0, 10.0);
        assert!(outer.contains(&Mbr::new(1.0, 1.0, 2.0, 2.0)));
        assert!(outer.contains(&outer));
        assert!(!outer.contains(&Mbr::new(-1.0, 1.0, 2.0, 2.0)));
    }

    #[test]
    fn test_geometry_mbr_and_ranges() {
        let geom = Geometry::MultiPoint(vec![
            Coord::xyzm(1.0, 5.0, -2.0, 7.0),
            Coord::xyzm(-3.0, 2.0, 4.0, 1.0),
        ]);
        assert_eq!(Mbr::new(-3.0, 2.0, 1.0, 5.0), geom.mbr());
        assert_eq!((-2.0, 4.0), geom.z_range());
        assert_eq!((1.0, 7.0), geom.m_range());
    }

    #[test]
    fn test_empty_mbr_does_not_widen() {
        let mut mbr = Mbr::new(0.0, 0.0, 1.0, 1.0);
        mbr.add_mbr(&Mbr::empty());
        assert_eq!(Mbr::new(0.0, 0.0, 1.0, 1.0), mbr);
    }
}
