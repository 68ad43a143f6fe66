use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use encoding::EncodingRef;
use thiserror::Error;
use tracing::debug;
use crate::geo::{Dims, GeometryType, Mbr, Ring};
use super::dbf::{self, DateMode, DbfError, DbfHeader, DbfList};
use super::endian::Endian;
use super::rings;
use super::shp::{self, ShapeKind, ShapeParts, ShapeType, ShpError, ShpHeader, ShxEntry};

const INITIAL_SHP_BUFFER: usize = 1024;
const HEADER_WORDS: usize = shp::SHP_HEADER_LENGTH / 2;

#[derive(Error, Debug)]
pub enum ShapefileError {
    #[error(transparent)]
    Shp(#[from] ShpError),

    #[error(transparent)]
    Dbf(#[from] DbfError),

    #[error("attempting to reopen an already opened Shapefile")]
    AlreadyOpen,

    #[error("Shapefile is not open")]
    NotOpen,

    #[error("Shapefile is open for reading only")]
    ReadOnly,

    #[error("Shapefile is open for writing only")]
    WriteOnly,
}

impl From<io::Error> for ShapefileError {
    fn from(err: io::Error) -> ShapefileError {
        ShapefileError::Shp(ShpError::Io(err))
    }
}

enum Files {
    Read {
        shp: BufReader<File>,
        shx: BufReader<File>,
        dbf: BufReader<File>,
    },
    Write {
        shp: BufWriter<File>,
        shx: BufWriter<File>,
        dbf: BufWriter<File>,
    },
}

fn open_reader(path: &str) -> Result<BufReader<File>, ShapefileError> {
    File::open(path)
        .map(BufReader::new)
        .map_err(|e| ShpError::OpenRead { path: path.to_string(), source: e }.into())
}

fn create_writer(path: &str) -> Result<BufWriter<File>, ShapefileError> {
    File::create(path)
        .map(BufWriter::new)
        .map_err(|e| ShpError::OpenWrite { path: path.to_string(), source: e }.into())
}

/// Grows `buf` to at least `len` bytes. Never shrinks it.
fn ensure_len(buf: &mut Vec<u8>, len: usize) {
    if buf.len() < len {
        buf.resize(len, 0);
    }
}

/// One shapefile: a ".shp", ".shx" and ".dbf" sharing a base path, opened
/// together for reading or for writing.
///
/// Rows are read by index with `read_entity()`, which fills `entity()`.
/// Writing appends one row per `write_entity()` call; `close()` writes the
/// final headers.
///
/// # Example
///
/// ```no_run
/// use shapecodec::shapefile::Shapefile;
///
/// let mut shapefile = Shapefile::new();
/// shapefile.open_read("data/countries", "utf-8").unwrap();
///
/// let mut row = 0;
/// while shapefile.read_entity(row).unwrap() {
///     let entity = shapefile.entity().unwrap();
///     println!("{:?} {:?}", entity.value("NAME"), entity.geometry);
///     row += 1;
/// }
/// shapefile.close().unwrap();
/// ```
///
/// Every fallible call also records its error text, readable through
/// `last_error()` until the next successful call.
pub struct Shapefile {
    path: Option<String>,
    files: Option<Files>,
    shape: ShapeType,
    effective_type: Option<GeometryType>,
    dims: Dims,
    encoding: Option<EncodingRef>,
    dbf: Option<DbfList>,
    dbf_header: DbfHeader,
    shp_buf: Vec<u8>,
    dbf_buf: Vec<u8>,
    /// Running ".shp" length in 16-bit words, header included.
    shp_size: usize,
    /// Running ".shx" length in 16-bit words, header included.
    shx_size: usize,
    bbox: Mbr,
    arch: Endian,
    date_mode: DateMode,
    strict_width: bool,
    last_error: Option<String>,
}

impl Default for Shapefile {
    fn default() -> Shapefile {
        Shapefile::new()
    }
}

impl Shapefile {
    pub fn new() -> Shapefile {
        Shapefile {
            path: None,
            files: None,
            shape: ShapeType::Null,
            effective_type: None,
            dims: Dims::Xy,
            encoding: None,
            dbf: None,
            dbf_header: DbfHeader::default(),
            shp_buf: Vec::new(),
            dbf_buf: Vec::new(),
            shp_size: HEADER_WORDS,
            shx_size: HEADER_WORDS,
            bbox: Mbr::empty(),
            arch: Endian::native(),
            date_mode: DateMode::default(),
            strict_width: false,
            last_error: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.files.is_some()
    }

    pub fn is_read_only(&self) -> bool {
        match self.files {
            Some(Files::Read { .. }) => true,
            _ => false,
        }
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_ref().map(|s| s.as_str())
    }

    /// The declared shape type; `Null` when not open.
    pub fn shape_type(&self) -> ShapeType {
        self.shape
    }

    /// The geometry type rows decode to. See `analyze()`.
    pub fn effective_type(&self) -> Option<GeometryType> {
        self.effective_type
    }

    pub fn dims(&self) -> Dims {
        self.dims
    }

    /// The whole-file bounding box: read from the header, or accumulated over
    /// every geometry written so far.
    pub fn bbox(&self) -> Mbr {
        self.bbox
    }

    /// Rows in the ".dbf" (read) or rows written so far (write).
    pub fn n_records(&self) -> usize {
        self.dbf_header.n_records
    }

    /// The field layout, with the values and geometry of the last row read.
    pub fn entity(&self) -> Option<&DbfList> {
        self.dbf.as_ref()
    }

    pub fn set_date_mode(&mut self, date_mode: DateMode) {
        self.date_mode = date_mode;
    }

    /// When set, a number too wide for its field fails the write instead of
    /// being dropped.
    pub fn set_strict_width(&mut self, strict_width: bool) {
        self.strict_width = strict_width;
    }

    fn record<T>(&mut self, result: Result<T, ShapefileError>) -> Result<T, ShapefileError> {
        self.last_error = result.as_ref().err().map(|e| e.to_string());
        result
    }

    fn file_path(&self, extension: &str) -> String {
        format!("{}.{}", self.path.as_ref().map(|s| s.as_str()).unwrap_or(""), extension)
    }

    /// Opens `<path>.shp`, `<path>.shx` and `<path>.dbf` for reading.
    ///
    /// `charset` is the WHATWG label of the ".dbf" text encoding. On failure
    /// the session is left closed.
    pub fn open_read(&mut self, path: &str, charset: &str) -> Result<(), ShapefileError> {
        let result = self.try_open_read(path, charset);
        if result.is_err() && !matches!(result, Err(ShapefileError::AlreadyOpen)) {
            self.release();
        }
        self.record(result)
    }

    fn try_open_read(&mut self, path: &str, charset: &str) -> Result<(), ShapefileError> {
        if self.is_open() {
            return Err(ShapefileError::AlreadyOpen);
        }
        let encoding = dbf::resolve_charset(charset)?;
        self.path = Some(path.to_string());

        let shx_path = self.file_path("shx");
        let shp_path = self.file_path("shp");
        let dbf_path = self.file_path("dbf");
        let mut shx = open_reader(&shx_path)?;
        let mut shp = open_reader(&shp_path)?;
        let mut dbf = open_reader(&dbf_path)?;

        shp::read_shp_header(&mut shx, &shx_path, self.arch)?;
        let header = shp::read_shp_header(&mut shp, &shp_path, self.arch)?;
        let (dbf_header, list) = dbf::read_dbf_meta(&mut dbf, &dbf_path, encoding)?;

        debug!(path = path, shape = ?header.shape_type, n_records = dbf_header.n_records, "opened Shapefile for reading");

        self.shape = header.shape_type;
        self.effective_type = header.shape_type.geometry_type();
        self.dims = header.shape_type.dims();
        self.bbox = header.bounding_box;
        self.shp_size = header.file_words;
        self.encoding = Some(encoding);
        self.dbf = Some(list);
        self.dbf_header = dbf_header;
        ensure_len(&mut self.shp_buf, INITIAL_SHP_BUFFER);
        ensure_len(&mut self.dbf_buf, dbf_header.n_bytes_per_record);
        self.files = Some(Files::Read { shp: shp, shx: shx, dbf: dbf });
        Ok(())
    }

    /// Creates `<path>.shp`, `<path>.shx` and `<path>.dbf`.
    ///
    /// The shape type follows from `geometry_type` and `dims`: XYZ and XYZM
    /// write Z shapes, XYM writes M shapes. `fields` gives the ".dbf" layout;
    /// its values are ignored. On failure the session is left closed.
    pub fn open_write(&mut self, path: &str, geometry_type: GeometryType, dims: Dims, fields: &DbfList, charset: &str) -> Result<(), ShapefileError> {
        let result = self.try_open_write(path, geometry_type, dims, fields, charset);
        if result.is_err() && !matches!(result, Err(ShapefileError::AlreadyOpen)) {
            self.release();
        }
        self.record(result)
    }

    fn try_open_write(&mut self, path: &str, geometry_type: GeometryType, dims: Dims, fields: &DbfList, charset: &str) -> Result<(), ShapefileError> {
        if self.is_open() {
            return Err(ShapefileError::AlreadyOpen);
        }
        let encoding = dbf::resolve_charset(charset)?;
        if !fields.is_valid() {
            return Err(DbfError::InvalidFieldList.into());
        }
        self.path = Some(path.to_string());

        let mut shx = create_writer(&self.file_path("shx"))?;
        let mut shp = create_writer(&self.file_path("shp"))?;
        let mut dbf = create_writer(&self.file_path("dbf"))?;

        let shape = ShapeType::for_geometry(geometry_type, dims);
        // placeholders until flush_headers()
        let placeholder = [ 0u8; shp::SHP_HEADER_LENGTH ];
        shp.write_all(&placeholder)?;
        shx.write_all(&placeholder)?;

        let mut layout = fields.clone();
        layout.recompute_offsets();
        layout.reset();
        let dbf_header = dbf::write_dbf_meta(&mut dbf, &layout, encoding)?;

        debug!(path = path, shape = ?shape, n_fields = layout.fields.len(), "opened Shapefile for writing");

        self.shape = shape;
        self.effective_type = Some(geometry_type);
        self.dims = dims;
        self.bbox = Mbr::empty();
        self.shp_size = HEADER_WORDS;
        self.shx_size = HEADER_WORDS;
        self.encoding = Some(encoding);
        self.dbf = Some(layout);
        self.dbf_header = dbf_header;
        ensure_len(&mut self.shp_buf, INITIAL_SHP_BUFFER);
        ensure_len(&mut self.dbf_buf, dbf_header.n_bytes_per_record);
        self.files = Some(Files::Write { shp: shp, shx: shx, dbf: dbf });
        Ok(())
    }

    /// Reads the ".shx" entry and ".shp" record of `row` into `shp_buf`.
    ///
    /// Returns the content length in bytes, or Ok(None) past the last row.
    fn read_shape_content(&mut self, row: usize) -> Result<Option<usize>, ShapefileError> {
        let shp_path = self.file_path("shp");
        let (shp, shx) = match self.files {
            Some(Files::Read { ref mut shp, ref mut shx, .. }) => (shp, shx),
            Some(Files::Write { .. }) => return Err(ShapefileError::WriteOnly),
            None => return Err(ShapefileError::NotOpen),
        };
        let corrupted = || ShapefileError::from(ShpError::Corrupted { path: shp_path.clone() });

        let mut entry = [ 0u8; shp::SHX_RECORD_LENGTH ];
        let shx_offset = match row
            .checked_mul(shp::SHX_RECORD_LENGTH)
            .and_then(|o| o.checked_add(shp::SHP_HEADER_LENGTH))
        {
            Some(offset) => offset as u64,
            None => return Ok(None),
        };
        if shx.seek(SeekFrom::Start(shx_offset)).is_err() || shx.read_exact(&mut entry).is_err() {
            return Ok(None);
        }
        let entry = ShxEntry::decode(&entry, self.arch);

        let mut record_header = [ 0u8; shp::SHP_RECORD_HEADER_LENGTH ];
        shp.seek(SeekFrom::Start(entry.offset_words as u64 * 2)).map_err(|_| corrupted())?;
        shp.read_exact(&mut record_header).map_err(|_| corrupted())?;
        let content_words = ShxEntry::decode(&record_header, self.arch).content_words;
        let record_end = entry.offset_words as u64 + (shp::SHP_RECORD_HEADER_LENGTH / 2) as u64 + content_words as u64;
        if record_end > self.shp_size as u64 {
            return Err(corrupted());
        }
        let len = content_words * 2;

        ensure_len(&mut self.shp_buf, len);
        shp.read_exact(&mut self.shp_buf[..len]).map_err(|_| corrupted())?;
        Ok(Some(len))
    }

    /// Reads row `row` (0-based) into `entity()`.
    ///
    /// Returns Ok(false) past the last row. A Null shape leaves the geometry
    /// empty; the attributes are still read.
    pub fn read_entity(&mut self, row: usize) -> Result<bool, ShapefileError> {
        let result = self.try_read_entity(row);
        self.record(result)
    }

    fn try_read_entity(&mut self, row: usize) -> Result<bool, ShapefileError> {
        let len = match self.read_shape_content(row)? {
            Some(len) => len,
            None => return Ok(false),
        };
        let shp_path = self.file_path("shp");
        let geometry = match shp::decode_parts(&self.shp_buf[..len], self.shape, &shp_path, self.arch)? {
            Some(parts) => {
                let effective_type = self.effective_type.unwrap_or(GeometryType::MultiPolygon);
                Some(shp::assemble(parts, effective_type, self.dims))
            }
            None => None,
        };

        let dbf_path = self.file_path("dbf");
        let reader = match self.files {
            Some(Files::Read { ref mut dbf, .. }) => dbf,
            _ => return Err(ShapefileError::NotOpen),
        };
        let (list, encoding) = match (self.dbf.as_mut(), self.encoding) {
            (Some(list), Some(encoding)) => (list, encoding),
            _ => return Err(ShapefileError::NotOpen),
        };

        let reclen = self.dbf_header.n_bytes_per_record;
        let corrupted = || ShapefileError::from(DbfError::Corrupted { path: dbf_path.clone() });
        let offset = self.dbf_header.row_offset(row).ok_or_else(corrupted)?;
        if reader.seek(SeekFrom::Start(offset)).is_err() || reader.read_exact(&mut self.dbf_buf[..reclen]).is_err() {
            return Err(corrupted());
        }

        list.reset();
        dbf::decode_record(&self.dbf_buf[..reclen], list, self.date_mode, encoding)?;
        list.row_id = Some(row);
        list.geometry = geometry;
        Ok(true)
    }

    /// Appends one entity: `entity.geometry` (or a Null shape) plus one row
    /// whose values are taken from `entity.fields` by position.
    ///
    /// Nothing is written if the geometry does not fit the shape type or a
    /// value cannot be encoded.
    pub fn write_entity(&mut self, entity: &DbfList) -> Result<(), ShapefileError> {
        let result = self.try_write_entity(entity);
        self.record(result)
    }

    fn try_write_entity(&mut self, entity: &DbfList) -> Result<(), ShapefileError> {
        let (shp, shx, dbf) = match self.files {
            Some(Files::Write { ref mut shp, ref mut shx, ref mut dbf }) => (shp, shx, dbf),
            Some(Files::Read { .. }) => return Err(ShapefileError::ReadOnly),
            None => return Err(ShapefileError::NotOpen),
        };
        let (layout, encoding) = match (self.dbf.as_ref(), self.encoding) {
            (Some(layout), Some(encoding)) => (layout, encoding),
            _ => return Err(ShapefileError::NotOpen),
        };

        let id = self.dbf_header.n_records + 1;
        let geometry = entity.geometry.as_ref();
        let content_words = shp::encode_record(&mut self.shp_buf, id, self.shape, geometry, self.dims, self.arch)?;
        let reclen = self.dbf_header.n_bytes_per_record;
        dbf::encode_record(&mut self.dbf_buf[..reclen], layout, entity, encoding, self.strict_width)?;

        let entry = ShxEntry { offset_words: self.shp_size, content_words: content_words };
        shx.write_all(&entry.encode(self.arch))?;
        shp.write_all(&self.shp_buf)?;
        dbf.write_all(&self.dbf_buf[..reclen])?;

        self.shx_size += shp::SHX_RECORD_LENGTH / 2;
        self.shp_size += shp::SHP_RECORD_HEADER_LENGTH / 2 + content_words;
        self.dbf_header.n_records += 1;
        if let Some(g) = geometry {
            self.bbox.add_mbr(&g.mbr());
        }
        Ok(())
    }

    /// Walks every record once to find the tightest geometry type and dims.
    ///
    /// PolyLine files holding only single-part records decode to LineString;
    /// Polygon files whose records each rebuild to one polygon decode to
    /// Polygon. PolyLineZ, PolygonZ and MultiPointZ files without M arrays
    /// decode as XYZ. The walk stops at the first unreadable record.
    pub fn analyze(&mut self) -> Result<(), ShapefileError> {
        let result = self.try_analyze();
        self.record(result)
    }

    fn try_analyze(&mut self) -> Result<(), ShapefileError> {
        if !self.is_read_only() {
            return Err(if self.is_open() { ShapefileError::WriteOnly } else { ShapefileError::NotOpen });
        }
        let shp_path = self.file_path("shp");
        let mut multi = false;
        let mut has_m = false;

        let mut row = 0;
        loop {
            let len = match self.read_shape_content(row) {
                Ok(Some(len)) => len,
                _ => break,
            };
            let parts: ShapeParts = match shp::decode_parts(&self.shp_buf[..len], self.shape, &shp_path, self.arch) {
                Ok(Some(parts)) => parts,
                Ok(None) => {
                    row += 1;
                    continue;
                }
                Err(_) => break,
            };

            match self.shape.kind() {
                ShapeKind::PolyLine => multi |= parts.parts.len() > 1,
                ShapeKind::Polygon => {
                    let rings: Vec<_> = parts.parts.into_iter().map(Ring).collect();
                    multi |= rings::count_exteriors(&rings) > 1;
                }
                _ => {}
            }
            has_m |= parts.has_m;
            row += 1;
        }

        match self.shape.kind() {
            ShapeKind::PolyLine => {
                self.effective_type = Some(if multi { GeometryType::MultiLineString } else { GeometryType::LineString });
            }
            ShapeKind::Polygon => {
                self.effective_type = Some(if multi { GeometryType::MultiPolygon } else { GeometryType::Polygon });
            }
            _ => {}
        }
        match self.shape {
            ShapeType::PolyLineZ | ShapeType::PolygonZ | ShapeType::MultiPointZ => {
                self.dims = if has_m { Dims::Xyzm } else { Dims::Xyz };
            }
            _ => {}
        }

        debug!(n_rows = row, effective_type = ?self.effective_type, dims = ?self.dims, "analyzed Shapefile");
        Ok(())
    }

    /// Writes the final ".shp" and ".shx" headers (file lengths and bounding
    /// box) and the ".dbf" header (record count).
    ///
    /// More entities may be written afterwards; flush again before closing.
    pub fn flush_headers(&mut self) -> Result<(), ShapefileError> {
        let result = self.try_flush_headers();
        self.record(result)
    }

    fn try_flush_headers(&mut self) -> Result<(), ShapefileError> {
        let (shp, shx, dbf) = match self.files {
            Some(Files::Write { ref mut shp, ref mut shx, ref mut dbf }) => (shp, shx, dbf),
            Some(Files::Read { .. }) => return Err(ShapefileError::ReadOnly),
            None => return Err(ShapefileError::NotOpen),
        };

        let mut header = ShpHeader { file_words: self.shp_size, shape_type: self.shape, bounding_box: self.bbox };
        shp.seek(SeekFrom::Start(0))?;
        shp.write_all(&shp::encode_shp_header(&header, self.arch))?;
        shp.seek(SeekFrom::Start(self.shp_size as u64 * 2))?;
        shp.flush()?;

        header.file_words = self.shx_size;
        shx.seek(SeekFrom::Start(0))?;
        shx.write_all(&shp::encode_shp_header(&header, self.arch))?;
        shx.seek(SeekFrom::Start(self.shx_size as u64 * 2))?;
        shx.flush()?;

        dbf::flush_dbf_header(dbf, &self.dbf_header)?;
        dbf.seek(SeekFrom::Start(self.dbf_header.data_end()))?;
        dbf.flush()?;
        Ok(())
    }

    /// Flushes a shapefile opened for writing, then closes every file and
    /// releases the field list.
    pub fn close(&mut self) -> Result<(), ShapefileError> {
        let result = match self.files {
            Some(Files::Write { .. }) => self.flush_headers(),
            _ => Ok(()),
        };
        if let Some(ref path) = self.path {
            debug!(path = path.as_str(), n_records = self.dbf_header.n_records, "closed Shapefile");
        }
        self.release();
        result
    }

    fn release(&mut self) {
        self.path = None;
        self.files = None;
        self.shape = ShapeType::Null;
        self.effective_type = None;
        self.dims = Dims::Xy;
        self.encoding = None;
        self.dbf = None;
        self.dbf_header = DbfHeader::default();
        self.shp_size = HEADER_WORDS;
        self.shx_size = HEADER_WORDS;
        self.bbox = Mbr::empty();
    }
}

impl Drop for Shapefile {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
