//! Reads and writes ESRI ".shp" and ".shx" files, as per
//! https://www.esri.com/library/whitepapers/pdfs/shapefile.pdf

use std::io::{self, Read};
use thiserror::Error;
use crate::geo::{Coord, Dims, Geometry, GeometryType, LineString, Mbr, Polygon, Ring};
use super::endian::{self, Endian};
use super::rings;

pub const SHP_HEADER_LENGTH: usize = 100;
pub const SHP_RECORD_HEADER_LENGTH: usize = 8;
pub const SHX_RECORD_LENGTH: usize = 8;
const SHP_MAGIC_NUMBER: i32 = 9994;
const SHP_VERSION: i32 = 1000;
const SHP_POINT_LENGTH: usize = 16;

/// M values below this mean "no data" and read back as 0.
const M_NO_DATA: f64 = -1.0e38;

#[derive(Error, Debug)]
pub enum ShpError {
    #[error("unable to open '{path}' for reading: {source}")]
    OpenRead { path: String, source: io::Error },

    #[error("unable to open '{path}' for writing: {source}")]
    OpenWrite { path: String, source: io::Error },

    #[error("'{path}' is corrupted / has invalid format")]
    Corrupted { path: String },

    #[error("'{path}' shape={shape} is not supported")]
    UnsupportedShape { path: String, shape: i32 },

    #[error("a {found:?} geometry cannot be written to a {expected:?} shapefile")]
    GeometryMismatch { expected: ShapeType, found: GeometryType },

    #[error("cannot write an empty {0:?} geometry")]
    EmptyGeometry(GeometryType),

    #[error(transparent)]
    Io(#[from] io::Error),
}

fn corrupted(path: &str) -> ShpError {
    ShpError::Corrupted { path: path.to_string() }
}

/// The geometry family of a shape type, ignoring Z and M.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeKind {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
}

impl ShapeKind {
    /// True iff a geometry of this type can be stored in this kind of shape.
    pub fn accepts(self, geometry_type: GeometryType) -> bool {
        match (self, geometry_type) {
            (ShapeKind::Point, GeometryType::Point) => true,
            (ShapeKind::PolyLine, GeometryType::LineString) => true,
            (ShapeKind::PolyLine, GeometryType::MultiLineString) => true,
            (ShapeKind::Polygon, GeometryType::Polygon) => true,
            (ShapeKind::Polygon, GeometryType::MultiPolygon) => true,
            (ShapeKind::MultiPoint, GeometryType::MultiPoint) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShapeType {
    Null,
    Point,
    PolyLine,
    Polygon,
    MultiPoint,
    PointZ,
    PolyLineZ,
    PolygonZ,
    MultiPointZ,
    PointM,
    PolyLineM,
    PolygonM,
    MultiPointM,
}

impl ShapeType {
    /// Decodes an on-disk shape code. MultiPatch (31) is not supported.
    pub fn from_code(code: i32) -> Option<ShapeType> {
        match code {
            0  => Some(ShapeType::Null),
            1  => Some(ShapeType::Point),
            3  => Some(ShapeType::PolyLine),
            5  => Some(ShapeType::Polygon),
            8  => Some(ShapeType::MultiPoint),
            11 => Some(ShapeType::PointZ),
            13 => Some(ShapeType::PolyLineZ),
            15 => Some(ShapeType::PolygonZ),
            18 => Some(ShapeType::MultiPointZ),
            21 => Some(ShapeType::PointM),
            23 => Some(ShapeType::PolyLineM),
            25 => Some(ShapeType::PolygonM),
            28 => Some(ShapeType::MultiPointM),
            _ => None,
        }
    }

    pub fn code(self) -> i32 {
        match self {
            ShapeType::Null => 0,
            ShapeType::Point => 1,
            ShapeType::PolyLine => 3,
            ShapeType::Polygon => 5,
            ShapeType::MultiPoint => 8,
            ShapeType::PointZ => 11,
            ShapeType::PolyLineZ => 13,
            ShapeType::PolygonZ => 15,
            ShapeType::MultiPointZ => 18,
            ShapeType::PointM => 21,
            ShapeType::PolyLineM => 23,
            ShapeType::PolygonM => 25,
            ShapeType::MultiPointM => 28,
        }
    }

    pub fn kind(self) -> ShapeKind {
        match self {
            ShapeType::Null => ShapeKind::Null,
            ShapeType::Point | ShapeType::PointZ | ShapeType::PointM => ShapeKind::Point,
            ShapeType::PolyLine | ShapeType::PolyLineZ | ShapeType::PolyLineM => ShapeKind::PolyLine,
            ShapeType::Polygon | ShapeType::PolygonZ | ShapeType::PolygonM => ShapeKind::Polygon,
            ShapeType::MultiPoint | ShapeType::MultiPointZ | ShapeType::MultiPointM => ShapeKind::MultiPoint,
        }
    }

    pub fn is_z(self) -> bool {
        match self {
            ShapeType::PointZ | ShapeType::PolyLineZ | ShapeType::PolygonZ | ShapeType::MultiPointZ => true,
            _ => false,
        }
    }

    pub fn is_m(self) -> bool {
        match self {
            ShapeType::PointM | ShapeType::PolyLineM | ShapeType::PolygonM | ShapeType::MultiPointM => true,
            _ => false,
        }
    }

    /// The dimensions a record of this type is assumed to carry until a full
    /// scan says otherwise: Z types are assumed to carry M too.
    pub fn dims(self) -> Dims {
        if self.is_z() {
            Dims::Xyzm
        } else if self.is_m() {
            Dims::Xym
        } else {
            Dims::Xy
        }
    }

    /// The geometry type records are assumed to decode to until a full scan
    /// says otherwise: PolyLine and Polygon are assumed to be "multi".
    pub fn geometry_type(self) -> Option<GeometryType> {
        match self.kind() {
            ShapeKind::Null => None,
            ShapeKind::Point => Some(GeometryType::Point),
            ShapeKind::PolyLine => Some(GeometryType::MultiLineString),
            ShapeKind::Polygon => Some(GeometryType::MultiPolygon),
            ShapeKind::MultiPoint => Some(GeometryType::MultiPoint),
        }
    }

    /// The shape type to write a geometry type with the given dimensions as.
    ///
    /// XYZ and XYZM both become Z types.
    pub fn for_geometry(geometry_type: GeometryType, dims: Dims) -> ShapeType {
        let kind = match geometry_type {
            GeometryType::Point => ShapeKind::Point,
            GeometryType::LineString | GeometryType::MultiLineString => ShapeKind::PolyLine,
            GeometryType::Polygon | GeometryType::MultiPolygon => ShapeKind::Polygon,
            GeometryType::MultiPoint => ShapeKind::MultiPoint,
        };
        match (kind, dims) {
            (ShapeKind::Point, Dims::Xy) => ShapeType::Point,
            (ShapeKind::Point, Dims::Xym) => ShapeType::PointM,
            (ShapeKind::Point, _) => ShapeType::PointZ,
            (ShapeKind::PolyLine, Dims::Xy) => ShapeType::PolyLine,
            (ShapeKind::PolyLine, Dims::Xym) => ShapeType::PolyLineM,
            (ShapeKind::PolyLine, _) => ShapeType::PolyLineZ,
            (ShapeKind::Polygon, Dims::Xy) => ShapeType::Polygon,
            (ShapeKind::Polygon, Dims::Xym) => ShapeType::PolygonM,
            (ShapeKind::Polygon, _) => ShapeType::PolygonZ,
            (ShapeKind::MultiPoint, Dims::Xy) => ShapeType::MultiPoint,
            (ShapeKind::MultiPoint, Dims::Xym) => ShapeType::MultiPointM,
            (ShapeKind::MultiPoint, _) => ShapeType::MultiPointZ,
            (ShapeKind::Null, _) => ShapeType::Null,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ShpHeader {
    /// File length in 16-bit words, header included.
    pub file_words: usize,
    pub shape_type: ShapeType,
    pub bounding_box: Mbr,
}

/// Reads the first 100 bytes of a ".shp" or ".shx" file.
///
/// Side-effect: advances the file cursor 100 bytes.
///
/// Returns Ok iff the magic number is right and the shape type is one of the
/// twelve supported Point/PolyLine/Polygon/MultiPoint types.
pub fn read_shp_header<R: Read>(file: &mut R, path: &str, arch: Endian) -> Result<ShpHeader, ShpError> {
    let mut buf = [ 0u8; SHP_HEADER_LENGTH ];
    file.read_exact(&mut buf).map_err(|_| corrupted(path))?;

    if endian::import32(&buf[0..4], Endian::Big, arch) != SHP_MAGIC_NUMBER {
        return Err(corrupted(path));
    }

    let code = endian::import32(&buf[32..36], Endian::Little, arch);
    let shape_type = match ShapeType::from_code(code) {
        Some(ShapeType::Null) | None => {
            return Err(ShpError::UnsupportedShape { path: path.to_string(), shape: code });
        }
        Some(shape_type) => shape_type,
    };

    Ok(ShpHeader {
        file_words: endian::import32(&buf[24..28], Endian::Big, arch) as u32 as usize,
        shape_type: shape_type,
        bounding_box: Mbr::new(
            endian::import64(&buf[36..44], Endian::Little, arch),
            endian::import64(&buf[44..52], Endian::Little, arch),
            endian::import64(&buf[52..60], Endian::Little, arch),
            endian::import64(&buf[60..68], Endian::Little, arch),
        ),
    })
}

/// Builds a 100-byte ".shp" or ".shx" header. An empty bounding box is
/// written as zeros.
pub fn encode_shp_header(header: &ShpHeader, arch: Endian) -> [ u8; SHP_HEADER_LENGTH ] {
    let mut buf = [ 0u8; SHP_HEADER_LENGTH ];
    endian::export32(&mut buf[0..4], SHP_MAGIC_NUMBER, Endian::Big, arch);
    endian::export32(&mut buf[24..28], header.file_words as i32, Endian::Big, arch);
    endian::export32(&mut buf[28..32], SHP_VERSION, Endian::Little, arch);
    endian::export32(&mut buf[32..36], header.shape_type.code(), Endian::Little, arch);

    let bbox = if header.bounding_box.is_empty() {
        Mbr::new(0.0, 0.0, 0.0, 0.0)
    } else {
        header.bounding_box
    };
    endian::export64(&mut buf[36..44], bbox.min_x, Endian::Little, arch);
    endian::export64(&mut buf[44..52], bbox.min_y, Endian::Little, arch);
    endian::export64(&mut buf[52..60], bbox.max_x, Endian::Little, arch);
    endian::export64(&mut buf[60..68], bbox.max_y, Endian::Little, arch);
    // 68..100: Z and M ranges, left zero
    buf
}

/// One ".shx" entry: where a record starts and how long its content is, both
/// in 16-bit words.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShxEntry {
    pub offset_words: usize,
    pub content_words: usize,
}

impl ShxEntry {
    pub fn decode(buf: &[u8], arch: Endian) -> ShxEntry {
        ShxEntry {
            offset_words: endian::import32(&buf[0..4], Endian::Big, arch) as u32 as usize,
            content_words: endian::import32(&buf[4..8], Endian::Big, arch) as u32 as usize,
        }
    }

    pub fn encode(&self, arch: Endian) -> [ u8; SHX_RECORD_LENGTH ] {
        let mut buf = [ 0u8; SHX_RECORD_LENGTH ];
        endian::export32(&mut buf[0..4], self.offset_words as i32, Endian::Big, arch);
        endian::export32(&mut buf[4..8], self.content_words as i32, Endian::Big, arch);
        buf
    }
}

/// The coordinate arrays of one record, before they become a Geometry.
#[derive(Debug, Clone, PartialEq)]
pub struct ShapeParts {
    pub shape_type: ShapeType,
    /// One entry per part (PolyLine/Polygon), or a single entry holding every
    /// point (Point/MultiPoint).
    pub parts: Vec<Vec<Coord>>,
    /// True iff the record carries an M value for every point.
    pub has_m: bool,
}

/// Bounds-checked little-endian reads from a record's content.
struct ContentReader<'a> {
    buf: &'a [u8],
    path: &'a str,
    arch: Endian,
}

impl<'a> ContentReader<'a> {
    fn i32_at(&self, offset: usize) -> Result<i32, ShpError> {
        self.buf.get(offset..offset + 4)
            .map(|b| endian::import32(b, Endian::Little, self.arch))
            .ok_or_else(|| corrupted(self.path))
    }

    fn count_at(&self, offset: usize) -> Result<usize, ShpError> {
        let n = self.i32_at(offset)?;
        if n < 0 {
            return Err(corrupted(self.path));
        }
        Ok(n as usize)
    }

    fn f64_at(&self, offset: usize) -> Result<f64, ShpError> {
        self.buf.get(offset..offset + 8)
            .map(|b| endian::import64(b, Endian::Little, self.arch))
            .ok_or_else(|| corrupted(self.path))
    }

    fn words(&self) -> usize {
        self.buf.len() / 2
    }

    /// Reads `n` (x, y) pairs starting at `offset`.
    fn xy_array(&self, offset: usize, n: usize) -> Result<Vec<Coord>, ShpError> {
        if self.buf.len() < offset + n * SHP_POINT_LENGTH {
            return Err(corrupted(self.path));
        }
        (0..n)
            .map(|i| {
                let at = offset + i * SHP_POINT_LENGTH;
                Ok(Coord::xy(self.f64_at(at)?, self.f64_at(at + 8)?))
            })
            .collect()
    }

    /// Reads `n` doubles starting at `offset`, past their 16-byte range.
    fn ordinate_array(&self, offset: usize, n: usize) -> Result<Vec<f64>, ShpError> {
        let start = offset + 16;
        if self.buf.len() < start + n * 8 {
            return Err(corrupted(self.path));
        }
        (0..n).map(|i| self.f64_at(start + i * 8)).collect()
    }
}

fn normalize_m(m: f64) -> f64 {
    if m < M_NO_DATA { 0.0 } else { m }
}

/// Reads the optional Z block and M block after `n` points ending at `base`.
///
/// `min_words` is the smallest legal content size; the M block is present iff
/// the content is exactly `max_words` long.
fn read_zm(reader: &ContentReader, shape_type: ShapeType, points: &mut [Coord], base: usize, min_words: usize, max_words: usize) -> Result<bool, ShpError> {
    let n = points.len();
    let words = reader.words();
    if words < min_words {
        return Err(corrupted(reader.path));
    }
    let has_m = shape_type.is_m() || shape_type.is_z();
    let has_m = has_m && words == max_words;

    let mut offset = base;
    if shape_type.is_z() {
        let zs = reader.ordinate_array(offset, n)?;
        for (p, z) in points.iter_mut().zip(zs) {
            p.z = z;
        }
        offset += 16 + 8 * n;
    }
    if has_m {
        let ms = reader.ordinate_array(offset, n)?;
        for (p, m) in points.iter_mut().zip(ms) {
            p.m = normalize_m(m);
        }
    }
    Ok(has_m)
}

/// Decodes the content of one record (shape type first) into raw parts.
///
/// Returns Ok(None) for a Null record. A record whose shape type is neither
/// Null nor `shape_type` is corrupt.
pub fn decode_parts(content: &[u8], shape_type: ShapeType, path: &str, arch: Endian) -> Result<Option<ShapeParts>, ShpError> {
    let reader = ContentReader { buf: content, path: path, arch: arch };
    let code = reader.i32_at(0)?;
    match ShapeType::from_code(code) {
        Some(ShapeType::Null) => return Ok(None),
        Some(t) if t == shape_type => {}
        _ => return Err(corrupted(path)),
    }

    match shape_type.kind() {
        ShapeKind::Null => Ok(None),
        ShapeKind::Point => {
            let mut c = Coord::xy(reader.f64_at(4)?, reader.f64_at(12)?);
            let mut has_m = false;
            if shape_type.is_z() {
                c.z = reader.f64_at(20)?;
                // some writers stop after Z
                if content.len() >= 36 {
                    c.m = normalize_m(reader.f64_at(28)?);
                    has_m = true;
                }
            } else if shape_type.is_m() {
                c.m = normalize_m(reader.f64_at(20)?);
                has_m = true;
            }
            Ok(Some(ShapeParts { shape_type: shape_type, parts: vec![ vec![ c ] ], has_m: has_m }))
        }
        ShapeKind::MultiPoint => {
            let n = reader.count_at(36)?;
            let base = 40 + n * SHP_POINT_LENGTH;
            let mut points = reader.xy_array(40, n)?;
            let (min_words, max_words) = if shape_type.is_z() {
                (28 + 12 * n, 36 + 16 * n)
            } else if shape_type.is_m() {
                (20 + 8 * n, 28 + 12 * n)
            } else {
                (20 + 8 * n, 20 + 8 * n)
            };
            let has_m = read_zm(&reader, shape_type, &mut points, base, min_words, max_words)?;
            Ok(Some(ShapeParts { shape_type: shape_type, parts: vec![ points ], has_m: has_m }))
        }
        ShapeKind::PolyLine | ShapeKind::Polygon => {
            let n_parts = reader.count_at(36)?;
            let n_points = reader.count_at(40)?;
            let points_at = 44 + 4 * n_parts;
            let base = points_at + n_points * SHP_POINT_LENGTH;
            if content.len() < base {
                return Err(corrupted(path));
            }

            let mut starts = Vec::with_capacity(n_parts + 1);
            for i in 0..n_parts {
                starts.push(reader.count_at(44 + 4 * i)?);
            }
            starts.push(n_points);
            if starts.windows(2).any(|w| w[0] > w[1]) {
                return Err(corrupted(path));
            }

            let mut points = reader.xy_array(points_at, n_points)?;
            let (min_words, max_words) = if shape_type.is_z() {
                (30 + 2 * n_parts + 12 * n_points, 38 + 2 * n_parts + 16 * n_points)
            } else if shape_type.is_m() {
                (22 + 2 * n_parts + 8 * n_points, 30 + 2 * n_parts + 12 * n_points)
            } else {
                (22 + 2 * n_parts + 8 * n_points, 22 + 2 * n_parts + 8 * n_points)
            };
            let has_m = read_zm(&reader, shape_type, &mut points, base, min_words, max_words)?;

            let parts = starts.windows(2)
                .map(|w| points[w[0]..w[1]].to_vec())
                .collect();
            Ok(Some(ShapeParts { shape_type: shape_type, parts: parts, has_m: has_m }))
        }
    }
}

/// Turns decoded parts into the geometry the session reports.
///
/// `effective_type` picks single vs. multi: a single LineString/Polygon is
/// returned only when it is asked for and there is exactly one.
pub fn assemble(parts: ShapeParts, effective_type: GeometryType, dims: Dims) -> Geometry {
    let ShapeParts { shape_type, parts, .. } = parts;
    let mut parts = parts;
    for c in parts.iter_mut().flat_map(|p| p.iter_mut()) {
        if !dims.has_z() {
            c.z = 0.0;
        }
        if !dims.has_m() {
            c.m = 0.0;
        }
    }

    match shape_type.kind() {
        ShapeKind::Point => {
            let c = parts.into_iter().flat_map(|p| p.into_iter()).next().unwrap_or_default();
            Geometry::Point(c)
        }
        ShapeKind::MultiPoint => Geometry::MultiPoint(parts.into_iter().flat_map(|p| p.into_iter()).collect()),
        ShapeKind::PolyLine => {
            let mut lines: Vec<LineString> = parts.into_iter().map(LineString).collect();
            if effective_type == GeometryType::LineString && lines.len() == 1 {
                Geometry::LineString(lines.remove(0))
            } else {
                Geometry::MultiLineString(lines)
            }
        }
        ShapeKind::Polygon | ShapeKind::Null => {
            let mut polygons = rings::build_polygons(parts.into_iter().map(Ring).collect());
            if effective_type == GeometryType::Polygon && polygons.len() == 1 {
                Geometry::Polygon(polygons.remove(0))
            } else {
                Geometry::MultiPolygon(polygons)
            }
        }
    }
}

/// Little-endian writes onto the end of a record buffer.
struct RecordWriter<'a> {
    buf: &'a mut Vec<u8>,
    arch: Endian,
}

impl<'a> RecordWriter<'a> {
    fn i32(&mut self, value: i32, target: Endian) {
        let at = self.buf.len();
        self.buf.resize(at + 4, 0);
        endian::export32(&mut self.buf[at..], value, target, self.arch);
    }

    fn f64(&mut self, value: f64) {
        let at = self.buf.len();
        self.buf.resize(at + 8, 0);
        endian::export64(&mut self.buf[at..], value, Endian::Little, self.arch);
    }

    fn mbr(&mut self, mbr: &Mbr) {
        self.f64(mbr.min_x);
        self.f64(mbr.min_y);
        self.f64(mbr.max_x);
        self.f64(mbr.max_y);
    }

    fn range_and_values<I: Iterator<Item=f64>>(&mut self, range: (f64, f64), values: I) {
        self.f64(range.0);
        self.f64(range.1);
        for v in values {
            self.f64(v);
        }
    }
}

/// Collects the parts of a PolyLine or Polygon geometry, in file order.
///
/// Polygon rings are rewound first: exteriors clockwise, interiors
/// counter-clockwise.
fn geometry_parts(geometry: &Geometry) -> Vec<Vec<Coord>> {
    let polygon_parts = |polygons: Vec<Polygon>| -> Vec<Vec<Coord>> {
        polygons.into_iter()
            .flat_map(|mut p| {
                rings::normalize_winding(&mut p);
                let Polygon { exterior, interiors } = p;
                Some(exterior).into_iter().chain(interiors).map(|r| r.0)
            })
            .collect()
    };

    match *geometry {
        Geometry::Point(c) => vec![ vec![ c ] ],
        Geometry::MultiPoint(ref cs) => vec![ cs.clone() ],
        Geometry::LineString(ref l) => vec![ l.0.clone() ],
        Geometry::MultiLineString(ref ls) => ls.iter().map(|l| l.0.clone()).collect(),
        Geometry::Polygon(ref p) => polygon_parts(vec![ p.clone() ]),
        Geometry::MultiPolygon(ref ps) => polygon_parts(ps.clone()),
    }
}

/// Encodes one ".shp" record, record header included, into `buf`.
///
/// `id` is the 1-based record number. A `None` geometry writes a Null record.
/// Returns the content length in 16-bit words.
///
/// Side-effect: `buf` is cleared first; its capacity is kept.
pub fn encode_record(buf: &mut Vec<u8>, id: usize, shape_type: ShapeType, geometry: Option<&Geometry>, dims: Dims, arch: Endian) -> Result<usize, ShpError> {
    buf.clear();
    let mut w = RecordWriter { buf: &mut *buf, arch: arch };
    w.i32(id as i32, Endian::Big);
    w.i32(0, Endian::Big); // patched below

    let geometry = match geometry {
        None => {
            w.i32(ShapeType::Null.code(), Endian::Little);
            return finish_record(buf, arch);
        }
        Some(g) => g,
    };

    let kind = shape_type.kind();
    if !kind.accepts(geometry.geometry_type()) {
        return Err(ShpError::GeometryMismatch { expected: shape_type, found: geometry.geometry_type() });
    }

    w.i32(shape_type.code(), Endian::Little);

    if kind == ShapeKind::Point {
        if let Geometry::Point(c) = *geometry {
            w.f64(c.x);
            w.f64(c.y);
            if shape_type.is_z() {
                w.f64(c.z);
                w.f64(c.m);
            } else if shape_type.is_m() {
                w.f64(c.m);
            }
        }
        return finish_record(buf, arch);
    }

    let parts = geometry_parts(geometry);
    let points: Vec<Coord> = parts.iter().flat_map(|p| p.iter().cloned()).collect();
    if points.is_empty() {
        return Err(ShpError::EmptyGeometry(geometry.geometry_type()));
    }

    w.mbr(&geometry.mbr());
    if kind == ShapeKind::MultiPoint {
        w.i32(points.len() as i32, Endian::Little);
    } else {
        w.i32(parts.len() as i32, Endian::Little);
        w.i32(points.len() as i32, Endian::Little);
        let mut start = 0;
        for part in parts.iter() {
            w.i32(start as i32, Endian::Little);
            start += part.len();
        }
    }
    for c in points.iter() {
        w.f64(c.x);
        w.f64(c.y);
    }
    if shape_type.is_z() {
        w.range_and_values(geometry.z_range(), points.iter().map(|c| c.z));
    }
    if shape_type.is_m() || (shape_type.is_z() && dims.has_m()) {
        w.range_and_values(geometry.m_range(), points.iter().map(|c| c.m));
    }

    finish_record(buf, arch)
}

/// Patches the content length into the record header; returns it in words.
fn finish_record(buf: &mut Vec<u8>, arch: Endian) -> Result<usize, ShpError> {
    let words = (buf.len() - SHP_RECORD_HEADER_LENGTH) / 2;
    endian::export32(&mut buf[4..8], words as i32, Endian::Big, arch);
    Ok(words)
}

#[cfg(test)]
mod test {
    use super::*;
    use std::io::Cursor;
    use byteorder::{BigEndian, ByteOrder, LittleEndian};

    fn arch() -> Endian {
        Endian::native()
    }

    fn decode(buf: &[u8], shape_type: ShapeType) -> Result<Option<ShapeParts>, ShpError> {
        decode_parts(&buf[SHP_RECORD_HEADER_LENGTH..], shape_type, "t.shp", arch())
    }

    fn square() -> Vec<Coord> {
        vec![
            Coord::xyzm(0.0, 0.0, 1.0, 10.0),
            Coord::xyzm(0.0, 1.0, 2.0, 11.0),
            Coord::xyzm(1.0, 1.0, 3.0, 12.0),
            Coord::xyzm(1.0, 0.0, 4.0, 13.0),
            Coord::xyzm(0.0, 0.0, 1.0, 10.0),
        ]
    }

    #[test]
    fn test_shape_type_codes() {
        for code in &[ 0, 1, 3, 5, 8, 11, 13, 15, 18, 21, 23, 25, 28 ] {
            assert_eq!(*code, ShapeType::from_code(*code).unwrap().code());
        }
        assert_eq!(None, ShapeType::from_code(31));
    }

    #[test]
    fn test_optimistic_mapping() {
        assert_eq!(Some(GeometryType::MultiLineString), ShapeType::PolyLineZ.geometry_type());
        assert_eq!(Dims::Xyzm, ShapeType::PolyLineZ.dims());
        assert_eq!(Dims::Xym, ShapeType::MultiPointM.dims());
        assert_eq!(Some(GeometryType::MultiPolygon), ShapeType::Polygon.geometry_type());
    }

    #[test]
    fn test_for_geometry() {
        assert_eq!(ShapeType::PolyLineZ, ShapeType::for_geometry(GeometryType::LineString, Dims::Xyz));
        assert_eq!(ShapeType::PolygonZ, ShapeType::for_geometry(GeometryType::MultiPolygon, Dims::Xyzm));
        assert_eq!(ShapeType::PointM, ShapeType::for_geometry(GeometryType::Point, Dims::Xym));
        assert_eq!(ShapeType::MultiPoint, ShapeType::for_geometry(GeometryType::MultiPoint, Dims::Xy));
    }

    #[test]
    fn test_header_roundtrip() {
        let header = ShpHeader {
            file_words: 78,
            shape_type: ShapeType::PolygonM,
            bounding_box: Mbr::new(-1.0, -2.0, 3.0, 4.0),
        };
        let buf = encode_shp_header(&header, arch());
        assert_eq!(9994, BigEndian::read_i32(&buf[0..4]));
        assert_eq!(1000, LittleEndian::read_i32(&buf[28..32]));
        assert_eq!(header, read_shp_header(&mut Cursor::new(&buf[..]), "t.shp", arch()).unwrap());
    }

    #[test]
    fn test_header_rejects_multipatch() {
        let mut buf = encode_shp_header(&ShpHeader { file_words: 50, shape_type: ShapeType::Point, bounding_box: Mbr::empty() }, arch());
        LittleEndian::write_i32(&mut buf[32..36], 31);
        let err = read_shp_header(&mut Cursor::new(&buf[..]), "t.shp", arch()).unwrap_err();
        assert_eq!("'t.shp' shape=31 is not supported", err.to_string());
    }

    #[test]
    fn test_header_rejects_bad_magic() {
        let buf = [ 0u8; 100 ];
        let err = read_shp_header(&mut Cursor::new(&buf[..]), "t.shp", arch()).unwrap_err();
        assert_eq!("'t.shp' is corrupted / has invalid format", err.to_string());
    }

    #[test]
    fn test_empty_bbox_written_as_zeros() {
        let buf = encode_shp_header(&ShpHeader { file_words: 50, shape_type: ShapeType::Point, bounding_box: Mbr::empty() }, arch());
        assert!(buf[36..100].iter().all(|&b| b == 0));
    }

    #[test]
    fn test_shx_entry() {
        let entry = ShxEntry { offset_words: 50, content_words: 10 };
        let buf = entry.encode(arch());
        assert_eq!(50, BigEndian::read_i32(&buf[0..4]));
        assert_eq!(entry, ShxEntry::decode(&buf, arch()));
    }

    #[test]
    fn test_point_sizes() {
        let mut buf = Vec::new();
        let p = Geometry::Point(Coord::xyzm(1.0, 2.0, 3.0, 4.0));
        assert_eq!(10, encode_record(&mut buf, 1, ShapeType::Point, Some(&p), Dims::Xy, arch()).unwrap());
        assert_eq!(18, encode_record(&mut buf, 1, ShapeType::PointZ, Some(&p), Dims::Xyz, arch()).unwrap());
        assert_eq!(14, encode_record(&mut buf, 1, ShapeType::PointM, Some(&p), Dims::Xym, arch()).unwrap());
        assert_eq!(8 + 28, buf.len());

        let parts = decode(&buf, ShapeType::PointM).unwrap().unwrap();
        assert_eq!(vec![ vec![ Coord::xym(1.0, 2.0, 4.0) ] ], parts.parts);
    }

    #[test]
    fn test_point_z_without_m() {
        let mut buf = Vec::new();
        let p = Geometry::Point(Coord::xyzm(1.0, 2.0, 3.0, 4.0));
        encode_record(&mut buf, 1, ShapeType::PointZ, Some(&p), Dims::Xyzm, arch()).unwrap();
        buf.truncate(8 + 28);
        let parts = decode(&buf, ShapeType::PointZ).unwrap().unwrap();
        assert_eq!(Coord::xyz(1.0, 2.0, 3.0), parts.parts[0][0]);
        assert!(!parts.has_m);
    }

    #[test]
    fn test_null_record() {
        let mut buf = Vec::new();
        assert_eq!(2, encode_record(&mut buf, 7, ShapeType::Polygon, None, Dims::Xy, arch()).unwrap());
        assert_eq!(12, buf.len());
        assert_eq!(7, BigEndian::read_i32(&buf[0..4]));
        assert_eq!(None, decode(&buf, ShapeType::Polygon).unwrap());
    }

    #[test]
    fn test_polyline_sizes() {
        let mut buf = Vec::new();
        let line = Geometry::LineString(LineString(square()));
        // 22 + 2n + 8v with n = 1, v = 5
        assert_eq!(64, encode_record(&mut buf, 1, ShapeType::PolyLine, Some(&line), Dims::Xy, arch()).unwrap());
        assert_eq!(120, encode_record(&mut buf, 1, ShapeType::PolyLineZ, Some(&line), Dims::Xyzm, arch()).unwrap());
        assert!(decode(&buf, ShapeType::PolyLineZ).unwrap().unwrap().has_m);
        assert_eq!(92, encode_record(&mut buf, 1, ShapeType::PolyLineZ, Some(&line), Dims::Xyz, arch()).unwrap());
        assert!(!decode(&buf, ShapeType::PolyLineZ).unwrap().unwrap().has_m);
        assert_eq!(92, encode_record(&mut buf, 1, ShapeType::PolyLineM, Some(&line), Dims::Xym, arch()).unwrap());
        assert!(decode(&buf, ShapeType::PolyLineM).unwrap().unwrap().has_m);
    }

    #[test]
    fn test_multipoint_sizes() {
        let mut buf = Vec::new();
        let mp = Geometry::MultiPoint(square());
        assert_eq!(60, encode_record(&mut buf, 1, ShapeType::MultiPoint, Some(&mp), Dims::Xy, arch()).unwrap());
        assert_eq!(116, encode_record(&mut buf, 1, ShapeType::MultiPointZ, Some(&mp), Dims::Xyzm, arch()).unwrap());
        let parts = decode(&buf, ShapeType::MultiPointZ).unwrap().unwrap();
        assert!(parts.has_m);
        assert_eq!(square(), parts.parts[0]);
        assert_eq!(88, encode_record(&mut buf, 1, ShapeType::MultiPointM, Some(&mp), Dims::Xym, arch()).unwrap());
    }

    #[test]
    fn test_polyline_m_without_m_block() {
        // a PolyLineM record may legally stop before its M block
        let mut buf = Vec::new();
        let line = Geometry::LineString(LineString(square()));
        encode_record(&mut buf, 1, ShapeType::PolyLineM, Some(&line), Dims::Xym, arch()).unwrap();
        buf.truncate(8 + 2 * 64);
        let parts = decode(&buf, ShapeType::PolyLineM).unwrap().unwrap();
        assert!(!parts.has_m);
        assert_eq!(0.0, parts.parts[0][0].m);
    }

    #[test]
    fn test_m_no_data_normalized() {
        let mut buf = Vec::new();
        let p = Geometry::Point(Coord::xym(1.0, 2.0, -1.0e39));
        encode_record(&mut buf, 1, ShapeType::PointM, Some(&p), Dims::Xym, arch()).unwrap();
        let parts = decode(&buf, ShapeType::PointM).unwrap().unwrap();
        assert_eq!(0.0, parts.parts[0][0].m);
    }

    #[test]
    fn test_polygon_rewound_on_write() {
        let mut ring = square();
        ring.reverse();
        let polygon = Geometry::Polygon(Polygon::new(Ring(ring)));
        let mut buf = Vec::new();
        encode_record(&mut buf, 1, ShapeType::Polygon, Some(&polygon), Dims::Xy, arch()).unwrap();
        let parts = decode(&buf, ShapeType::Polygon).unwrap().unwrap();
        assert!(Ring(parts.parts[0].clone()).is_clockwise());
    }

    #[test]
    fn test_mismatched_geometry_rejected() {
        let mut buf = Vec::new();
        let line = Geometry::LineString(LineString(square()));
        match encode_record(&mut buf, 1, ShapeType::Point, Some(&line), Dims::Xy, arch()) {
            Err(ShpError::GeometryMismatch { expected: ShapeType::Point, found: GeometryType::LineString }) => {}
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_empty_geometry_rejected() {
        let mut buf = Vec::new();
        let empty = Geometry::MultiLineString(vec![]);
        assert!(encode_record(&mut buf, 1, ShapeType::PolyLine, Some(&empty), Dims::Xy, arch()).is_err());
    }

    #[test]
    fn test_wrong_record_shape_is_corrupt() {
        let mut buf = Vec::new();
        let p = Geometry::Point(Coord::xy(1.0, 2.0));
        encode_record(&mut buf, 1, ShapeType::Point, Some(&p), Dims::Xy, arch()).unwrap();
        assert!(decode(&buf, ShapeType::MultiPoint).is_err());
    }

    #[test]
    fn test_truncated_record_is_corrupt() {
        let mut buf = Vec::new();
        let line = Geometry::LineString(LineString(square()));
        encode_record(&mut buf, 1, ShapeType::PolyLine, Some(&line), Dims::Xy, arch()).unwrap();
        buf.truncate(buf.len() - 16);
        assert!(decode(&buf, ShapeType::PolyLine).is_err());
    }

    #[test]
    fn test_part_index_past_points_is_corrupt() {
        let mut buf = Vec::new();
        let line = Geometry::LineString(LineString(square()));
        encode_record(&mut buf, 1, ShapeType::PolyLine, Some(&line), Dims::Xy, arch()).unwrap();
        LittleEndian::write_i32(&mut buf[8 + 44..8 + 48], 6);
        assert!(decode(&buf, ShapeType::PolyLine).is_err());
    }

    #[test]
    fn test_assemble_single_vs_multi() {
        let parts = ShapeParts { shape_type: ShapeType::PolyLine, parts: vec![ square() ], has_m: false };
        match assemble(parts.clone(), GeometryType::LineString, Dims::Xy) {
            Geometry::LineString(l) => assert_eq!(5, l.0.len()),
            other => panic!("unexpected {:?}", other),
        }
        match assemble(parts, GeometryType::MultiLineString, Dims::Xy) {
            Geometry::MultiLineString(ls) => assert_eq!(1, ls.len()),
            other => panic!("unexpected {:?}", other),
        }
    }
}
