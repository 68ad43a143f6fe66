//! Reads and writes xBase ".dbf" attribute tables, as per
//! https://www.clicketyclick.dk/databases/xbase/format/dbf.html

use std::fmt;
use std::fs::File;
use std::io::{self, BufReader, BufWriter, Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use encoding::{DecoderTrap, EncoderTrap, EncodingRef};
use encoding::all::ASCII;
use encoding::label::encoding_from_whatwg_label;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};
use crate::geo::Geometry;
use super::endian::{self, Endian};
use super::names;

pub const DBF_HEADER_LENGTH: usize = 32;
pub const DBF_FIELD_DESCRIPTOR_LENGTH: usize = 32;
const DBF_HEADER_TERMINATOR: u8 = 0x0D;
const DBF_EOF_MARKER: u8 = 0x1A;
const DBF_MAGIC: u8 = 0x03;
const DELETED_MARKER: u8 = b'*';
const MAX_CHARACTER_BYTES: usize = 512;

lazy_static! {
    static ref DATE_REGEX: Regex = Regex::new(r"^(\d{4})(\d{2})(\d{2})$").unwrap();
    static ref INTEGER_PREFIX_REGEX: Regex = Regex::new(r"^\s*([+-]?\d+)").unwrap();
    static ref FLOAT_PREFIX_REGEX: Regex =
        Regex::new(r"^\s*([+-]?(?:\d+\.?\d*|\.\d+)(?:[eE][+-]?\d+)?)").unwrap();
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbfType {
    Character,
    Numeric,
    Logical,
    Date,
    Float,
}

impl DbfType {
    pub fn tag(self) -> u8 {
        match self {
            DbfType::Character => b'C',
            DbfType::Numeric => b'N',
            DbfType::Logical => b'L',
            DbfType::Date => b'D',
            DbfType::Float => b'F',
        }
    }

    pub fn from_tag(tag: u8) -> Option<DbfType> {
        match tag {
            b'C' => Some(DbfType::Character),
            b'N' => Some(DbfType::Numeric),
            b'L' => Some(DbfType::Logical),
            b'D' => Some(DbfType::Date),
            b'F' => Some(DbfType::Float),
            _ => None,
        }
    }
}

/// A decoded attribute value.
///
/// Logical fields decode to `Integer(1)` or `Integer(0)`; Julian dates decode
/// to `Double`.
#[derive(Debug, Clone, PartialEq)]
pub enum DbfValue {
    Null,
    Integer(i64),
    Double(f64),
    Text(String),
}

impl DbfValue {
    pub fn is_null(&self) -> bool {
        *self == DbfValue::Null
    }

    pub fn as_i64(&self) -> Option<i64> {
        match *self {
            DbfValue::Integer(i) => Some(i),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match *self {
            DbfValue::Double(d) => Some(d),
            DbfValue::Integer(i) => Some(i as f64),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match *self {
            DbfValue::Text(ref s) => Some(s),
            _ => None,
        }
    }
}

impl Default for DbfValue {
    fn default() -> DbfValue {
        DbfValue::Null
    }
}

impl fmt::Display for DbfValue {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match *self {
            DbfValue::Null => write!(f, "NULL"),
            DbfValue::Integer(i) => write!(f, "{}", i),
            DbfValue::Double(d) => write!(f, "{}", d),
            DbfValue::Text(ref s) => write!(f, "{:?}", s),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct DbfField {
    pub name: String,
    pub field_type: DbfType,
    /// Byte offset within a record, not counting the deletion marker.
    pub offset: usize,
    pub length: u8,
    pub decimals: u8,
    pub value: DbfValue,
}

impl DbfField {
    pub fn new(name: &str, field_type: DbfType, offset: usize, length: u8, decimals: u8) -> DbfField {
        DbfField {
            name: name.to_string(),
            field_type: field_type,
            offset: offset,
            length: length,
            decimals: decimals,
            value: DbfValue::Null,
        }
    }
}

/// An ordered list of fields, plus the "current row": one value per field and
/// an optional geometry.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct DbfList {
    pub fields: Vec<DbfField>,
    pub row_id: Option<usize>,
    pub geometry: Option<Geometry>,
}

impl DbfList {
    pub fn new() -> DbfList {
        DbfList::default()
    }

    /// Appends a field after the last one. Returns its offset.
    pub fn add_field(&mut self, name: &str, field_type: DbfType, length: u8, decimals: u8) -> usize {
        let offset = self.fields.last().map(|f| f.offset + f.length as usize).unwrap_or(0);
        self.fields.push(DbfField::new(name, field_type, offset, length, decimals));
        offset
    }

    pub fn field(&self, name: &str) -> Option<&DbfField> {
        self.fields.iter().find(|f| f.name == name)
    }

    pub fn value(&self, name: &str) -> Option<&DbfValue> {
        self.field(name).map(|f| &f.value)
    }

    /// Sets the value of the named field. Returns false if there is no such
    /// field.
    pub fn set_value(&mut self, name: &str, value: DbfValue) -> bool {
        match self.fields.iter_mut().find(|f| f.name == name) {
            Some(field) => {
                field.value = value;
                true
            }
            None => false,
        }
    }

    /// Clears every value and the geometry, keeping the field layout.
    pub fn reset(&mut self) {
        for field in self.fields.iter_mut() {
            field.value = DbfValue::Null;
        }
        self.row_id = None;
        self.geometry = None;
    }

    /// Bytes per record: one deletion marker plus every field.
    pub fn record_length(&self) -> usize {
        1 + self.fields.iter().map(|f| f.length as usize).sum::<usize>()
    }

    /// True iff the list can describe a table: at least one field, no empty
    /// names, no zero-width fields.
    pub fn is_valid(&self) -> bool {
        !self.fields.is_empty()
            && self.fields.iter().all(|f| !f.name.is_empty() && f.length > 0)
    }

    /// Lays fields out back to back, in order.
    pub(crate) fn recompute_offsets(&mut self) {
        let mut offset = 0;
        for field in self.fields.iter_mut() {
            field.offset = offset;
            offset += field.length as usize;
        }
    }
}

/// The dBASE family a rejected magic byte belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DbfVariant {
    FoxBase,
    FoxPro2,
    VisualFoxPro,
    DBaseIv,
    Unknown,
}

impl DbfVariant {
    /// Returns None for the accepted dBASE III magic bytes.
    pub fn diagnose(magic: u8) -> Option<DbfVariant> {
        match magic {
            0x03 | 0x83 => None,
            0x02 | 0xF8 => Some(DbfVariant::FoxBase),
            0xF5 => Some(DbfVariant::FoxPro2),
            0x30 | 0x31 | 0x32 => Some(DbfVariant::VisualFoxPro),
            0x43 | 0x63 | 0xBB | 0xCB => Some(DbfVariant::DBaseIv),
            _ => Some(DbfVariant::Unknown),
        }
    }
}

impl fmt::Display for DbfVariant {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match *self {
            DbfVariant::FoxBase => "FoxBASE format",
            DbfVariant::FoxPro2 => "FoxPro 2.x (or earlier) format",
            DbfVariant::VisualFoxPro => "Visual FoxPro format",
            DbfVariant::DBaseIv => "dBASE IV format",
            DbfVariant::Unknown => "unknown format",
        })
    }
}

/// How Date ('D') fields decode.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DateMode {
    /// `Double` Julian day number; invalid dates decode to `Null`.
    Julian,
    /// The raw `YYYYMMDD` text.
    Text,
}

impl Default for DateMode {
    fn default() -> DateMode {
        DateMode::Julian
    }
}

#[derive(Error, Debug)]
pub enum DbfError {
    #[error("unable to open '{path}' for reading: {source}")]
    OpenRead { path: String, source: io::Error },

    #[error("unable to open '{path}' for writing: {source}")]
    OpenWrite { path: String, source: io::Error },

    #[error("'{path}'\ninvalid magic number {magic:02x} [{variant}]")]
    InvalidMagic { path: String, magic: u8, variant: DbfVariant },

    #[error("'{path}' is corrupted / has invalid format")]
    Corrupted { path: String },

    #[error("'{path}' contains unsupported data types")]
    UnsupportedType { path: String },

    #[error("field name: invalid character sequence")]
    InvalidFieldName,

    #[error("Invalid character sequence")]
    InvalidCharacters,

    #[error("value for field '{field}' does not fit {length} bytes")]
    ValueTooWide { field: String, length: u8 },

    #[error("entity has {found} fields; the table has {expected}")]
    FieldCountMismatch { expected: usize, found: usize },

    #[error("unsupported charset '{0}'")]
    UnsupportedCharset(String),

    #[error("invalid DBF field list")]
    InvalidFieldList,

    #[error("attempting to reopen an already opened DBF")]
    AlreadyOpen,

    #[error("DBF is not open")]
    NotOpen,

    #[error("DBF is open read-only")]
    ReadOnly,

    #[error("DBF is open for writing only")]
    WriteOnly,

    #[error(transparent)]
    Io(#[from] io::Error),
}

/// Resolves a WHATWG charset label such as "utf-8" or "windows-1252".
/// Looks up a charset by its WHATWG label.
///
/// "ascii" and "us-ascii" are 7-bit ASCII here. WHATWG maps both to
/// windows-1252, which would accept any byte.
pub fn resolve_charset(label: &str) -> Result<EncodingRef, DbfError> {
    let trimmed = label.trim();
    if trimmed.eq_ignore_ascii_case("ascii") || trimmed.eq_ignore_ascii_case("us-ascii") {
        return Ok(ASCII);
    }
    encoding_from_whatwg_label(trimmed).ok_or_else(|| DbfError::UnsupportedCharset(label.to_string()))
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DbfHeader {
    pub n_records: usize,
    pub n_header_bytes: usize,
    pub n_bytes_per_record: usize,
}

impl DbfHeader {
    /// Byte offset of the given row, or None if it does not fit in a u64.
    pub fn row_offset(&self, row: usize) -> Option<u64> {
        (row as u64)
            .checked_mul(self.n_bytes_per_record as u64)?
            .checked_add(self.n_header_bytes as u64)
    }

    /// Byte offset just past the last row.
    pub fn data_end(&self) -> u64 {
        (self.n_records as u64)
            .saturating_mul(self.n_bytes_per_record as u64)
            .saturating_add(self.n_header_bytes as u64)
    }
}

fn le16(buf: &[u8]) -> usize {
    endian::import16(buf, Endian::Little, Endian::native()) as u16 as usize
}

fn le32(buf: &[u8]) -> usize {
    endian::import32(buf, Endian::Little, Endian::native()) as u32 as usize
}

/// Reads the first 32 bytes of the file.
///
/// Side-effect: advances the file cursor 32 bytes.
pub fn read_dbf_header<R: Read>(file: &mut R, path: &str) -> Result<DbfHeader, DbfError> {
    let mut buf = [ 0u8; DBF_HEADER_LENGTH ];
    file.read_exact(&mut buf).map_err(|_| DbfError::Corrupted { path: path.to_string() })?;

    if let Some(variant) = DbfVariant::diagnose(buf[0]) {
        return Err(DbfError::InvalidMagic { path: path.to_string(), magic: buf[0], variant: variant });
    }

    Ok(DbfHeader {
        n_records: le32(&buf[4..8]),
        n_header_bytes: le16(&buf[8..10]),
        n_bytes_per_record: le16(&buf[10..12]),
    })
}

/// Reads all field definitions from the file.
///
/// Assumes exactly DBF_HEADER_LENGTH bytes of the file have been read already.
/// In other words, call this after read_dbf_header().
///
/// MEMO fields are skipped but still take up their width in every record.
///
/// Side-effect: advances the file cursor to the first data record.
pub fn read_dbf_fields<R: Read>(file: &mut R, header: &DbfHeader, path: &str, encoding: EncodingRef) -> Result<DbfList, DbfError> {
    let corrupted = || DbfError::Corrupted { path: path.to_string() };

    if header.n_header_bytes <= DBF_HEADER_LENGTH {
        return Err(corrupted());
    }
    let mut buf = vec![ 0u8; header.n_header_bytes - DBF_HEADER_LENGTH ];
    file.read_exact(&mut buf).map_err(|_| corrupted())?;

    let mut list = DbfList::new();
    let mut offset = 0usize;
    let mut unsupported = false;

    let mut ind = DBF_HEADER_LENGTH;
    while ind < header.n_header_bytes - 1 {
        let start = ind - DBF_HEADER_LENGTH;
        ind += DBF_FIELD_DESCRIPTOR_LENGTH;

        if buf[start] == DBF_HEADER_TERMINATOR {
            break;
        }
        let descriptor = buf.get(start..start + DBF_FIELD_DESCRIPTOR_LENGTH).ok_or_else(corrupted)?;

        let name_len = descriptor[..11].iter().position(|&b| b == 0).unwrap_or(11);
        let name = encoding.decode(&descriptor[..name_len], DecoderTrap::Strict)
            .map_err(|_| DbfError::InvalidFieldName)?;
        let tag = descriptor[11];
        let length = descriptor[16];
        let decimals = descriptor[17];

        if tag == b'M' {
            warn!(field = %name, path = path, "skipping MEMO field");
        } else {
            match DbfType::from_tag(tag) {
                Some(field_type) => {
                    list.fields.push(DbfField::new(&name, field_type, offset, length, decimals));
                }
                None => unsupported = true,
            }
        }
        offset += length as usize;
    }

    if unsupported {
        return Err(DbfError::UnsupportedType { path: path.to_string() });
    }
    if list.fields.is_empty() || 1 + offset > header.n_bytes_per_record {
        return Err(corrupted());
    }

    Ok(list)
}

/// Reads the header, including field definitions, from a ".dbf" file.
///
/// Assumes the cursor is at the start of the file.
///
/// Side-effect: advances the file cursor to the first data record.
pub fn read_dbf_meta<R: Read>(file: &mut R, path: &str, encoding: EncodingRef) -> Result<(DbfHeader, DbfList), DbfError> {
    let header = read_dbf_header(file, path)?;
    let list = read_dbf_fields(file, &header, path, encoding)?;
    Ok((header, list))
}

/// Returns the 11-byte descriptor names for `list`, transcoded.
///
/// Long names are shortened; a name that cannot be shortened or transcoded
/// becomes `FLD#<n>`.
fn descriptor_names(list: &DbfList, encoding: EncodingRef) -> Vec<Vec<u8>> {
    let utf8: Vec<String> = list.fields.iter().map(|f| f.name.clone()).collect();
    let mut n_fallbacks = 0;

    names::shorten_names(&utf8).into_iter()
        .zip(utf8.iter())
        .map(|(short, original)| {
            let encoded = short.and_then(|s| encoding.encode(&s, EncoderTrap::Strict).ok());
            match encoded {
                Some(ref bytes) if bytes.len() <= names::MAX_NAME_LEN => bytes.clone(),
                _ => {
                    n_fallbacks += 1;
                    let fallback = format!("FLD#{}", n_fallbacks);
                    warn!(field = %original, name = %fallback, "field name does not fit; renamed");
                    fallback.into_bytes()
                }
            }
        })
        .collect()
}

/// Writes a zeroed header, the field descriptors and the header terminator.
///
/// The header is patched by flush_dbf_header() once the record count is known.
pub fn write_dbf_meta<W: Write>(file: &mut W, list: &DbfList, encoding: EncodingRef) -> Result<DbfHeader, DbfError> {
    if !list.is_valid() {
        return Err(DbfError::InvalidFieldList);
    }
    let header = DbfHeader {
        n_records: 0,
        n_header_bytes: DBF_HEADER_LENGTH + DBF_FIELD_DESCRIPTOR_LENGTH * list.fields.len() + 1,
        n_bytes_per_record: list.record_length(),
    };
    if header.n_header_bytes > u16::max_value() as usize || header.n_bytes_per_record > u16::max_value() as usize {
        return Err(DbfError::InvalidFieldList);
    }

    file.write_all(&[ 0u8; DBF_HEADER_LENGTH ])?;

    for (field, name) in list.fields.iter().zip(descriptor_names(list, encoding)) {
        let mut descriptor = [ 0u8; DBF_FIELD_DESCRIPTOR_LENGTH ];
        descriptor[..name.len()].copy_from_slice(&name);
        descriptor[11] = field.field_type.tag();
        descriptor[16] = field.length;
        descriptor[17] = field.decimals;
        file.write_all(&descriptor)?;
    }

    file.write_all(&[ DBF_HEADER_TERMINATOR ])?;
    Ok(header)
}

/// Writes the end-of-file marker and the final 32-byte header.
///
/// Safe to call more than once: a later row overwrites the marker, and a later
/// flush writes it again.
pub fn flush_dbf_header<W: Write + Seek>(file: &mut W, header: &DbfHeader) -> io::Result<()> {
    let arch = Endian::native();

    file.seek(SeekFrom::Start(header.data_end()))?;
    file.write_all(&[ DBF_EOF_MARKER ])?;

    let mut buf = [ 0u8; DBF_HEADER_LENGTH ];
    buf[0] = DBF_MAGIC;
    buf[1] = 1;
    buf[2] = 1;
    buf[3] = 1;
    endian::export32(&mut buf[4..8], header.n_records as i32, Endian::Little, arch);
    endian::export16(&mut buf[8..10], header.n_header_bytes as u16 as i16, Endian::Little, arch);
    endian::export16(&mut buf[10..12], header.n_bytes_per_record as u16 as i16, Endian::Little, arch);
    file.seek(SeekFrom::Start(0))?;
    file.write_all(&buf)?;
    file.flush()
}

/// Converts a Gregorian date to a Julian day number.
///
/// Returns None for invalid dates and for years outside 1900..=2400.
pub fn to_julian(year: i32, month: i32, day: i32) -> Option<f64> {
    if year < 1900 || year > 2400 || month < 1 || month > 12 || day < 1 {
        return None;
    }
    let leap = (year % 4 == 0 && year % 100 != 0) || year % 400 == 0;
    let max_day = match month {
        2 => if leap { 29 } else { 28 },
        4 | 6 | 9 | 11 => 30,
        _ => 31,
    };
    if day > max_day {
        return None;
    }

    let (y, m) = if month <= 2 { (year - 1, month + 12) } else { (year, month) };
    let a = y / 100;
    let b = 2 - a + a / 4;
    let x1 = 36525 * (y + 4716) / 100;
    let x2 = 306001 * (m + 1) / 10000;
    Some((x1 + x2 + day + b) as f64 - 1524.5)
}

/// Converts a Julian day number back to (year, month, day).
pub fn from_julian(julian: f64) -> (i32, i32, i32) {
    let z = (julian + 0.5).floor();
    let alpha = ((z - 1867216.25) / 36524.25).floor();
    let a = z + 1.0 + alpha - (alpha / 4.0).floor();
    let b = a + 1524.0;
    let c = ((b - 122.1) / 365.25).floor();
    let d = (365.25 * c).floor();
    let e = ((b - d) / 30.6001).floor();

    let day = (b - d - (30.6001 * e).floor()) as i32;
    let month = (if e < 14.0 { e - 1.0 } else { e - 13.0 }) as i32;
    let year = (if month > 2 { c - 4716.0 } else { c - 4715.0 }) as i32;
    (year, month, day)
}

/// Parses the leading integer of `s` the way C's atoll() does: 0 if none.
fn parse_integer_prefix(s: &str) -> i64 {
    INTEGER_PREFIX_REGEX.captures(s)
        .and_then(|c| c[1].trim_start_matches('+').parse().ok())
        .unwrap_or(0)
}

/// Parses the leading number of `s` the way C's atof() does: 0.0 if none.
fn parse_float_prefix(s: &str) -> f64 {
    FLOAT_PREFIX_REGEX.captures(s)
        .and_then(|c| c[1].parse().ok())
        .unwrap_or(0.0)
}

fn decode_date(raw: &[u8], date_mode: DateMode, encoding: EncodingRef) -> Result<DbfValue, DbfError> {
    match date_mode {
        DateMode::Text => {
            let text = encoding.decode(raw, DecoderTrap::Strict).map_err(|_| DbfError::InvalidCharacters)?;
            Ok(DbfValue::Text(text))
        }
        DateMode::Julian => {
            let text = String::from_utf8_lossy(raw);
            let julian = DATE_REGEX.captures(&text).and_then(|c| {
                let year = c[1].parse().ok()?;
                let month = c[2].parse().ok()?;
                let day = c[3].parse().ok()?;
                to_julian(year, month, day)
            });
            Ok(julian.map(DbfValue::Double).unwrap_or(DbfValue::Null))
        }
    }
}

/// Decodes one field from its raw window.
fn decode_value(field: &DbfField, window: &[u8], date_mode: DateMode, encoding: EncodingRef) -> Result<DbfValue, DbfError> {
    let end = window.iter().position(|&b| b == 0).unwrap_or(window.len());
    let raw = &window[..end];

    if raw.iter().all(|&b| b == b' ') {
        return Ok(DbfValue::Null);
    }

    let value = match field.field_type {
        DbfType::Numeric => {
            let text = String::from_utf8_lossy(raw);
            if field.decimals > 0 || field.length > 18 {
                DbfValue::Double(parse_float_prefix(&text))
            } else {
                DbfValue::Integer(parse_integer_prefix(&text))
            }
        }
        DbfType::Float => DbfValue::Double(parse_float_prefix(&String::from_utf8_lossy(raw))),
        DbfType::Date => decode_date(raw, date_mode, encoding)?,
        DbfType::Logical => {
            let truthy = match raw[0] {
                b'1' | b't' | b'T' | b'Y' | b'y' => 1,
                _ => 0,
            };
            DbfValue::Integer(truthy)
        }
        DbfType::Character => {
            let trimmed = match raw.iter().rposition(|&b| b != b' ') {
                Some(i) => &raw[..i + 1],
                None => &raw[..0],
            };
            let text = encoding.decode(trimmed, DecoderTrap::Strict).map_err(|_| DbfError::InvalidCharacters)?;
            DbfValue::Text(text)
        }
    };
    Ok(value)
}

/// Decodes a whole record into the value slots of `list`.
///
/// Assumes `buf` holds one full record, deletion marker first.
pub fn decode_record(buf: &[u8], list: &mut DbfList, date_mode: DateMode, encoding: EncodingRef) -> Result<(), DbfError> {
    for field in list.fields.iter_mut() {
        let start = 1 + field.offset;
        let window = buf.get(start..start + field.length as usize).ok_or(DbfError::InvalidFieldList)?;
        field.value = decode_value(field, window, date_mode, encoding)?;
    }
    Ok(())
}

/// Formats a Numeric or Float value; None if the value has no numeric form.
fn format_number(value: &DbfValue, decimals: u8) -> Option<String> {
    match *value {
        DbfValue::Integer(i) => Some(i.to_string()),
        DbfValue::Double(d) => Some(format!("{:.*}", decimals as usize, d)),
        _ => None,
    }
}

/// Transcodes `text` into at most `max` bytes without splitting a character.
///
/// Input beyond 512 bytes is ignored.
fn encode_character(text: &str, max: usize, encoding: EncodingRef) -> Result<Vec<u8>, DbfError> {
    let text = names::byte_prefix(text, MAX_CHARACTER_BYTES);
    let mut out = Vec::with_capacity(max);
    let mut scratch = [ 0u8; 4 ];
    for c in text.chars() {
        let bytes = encoding.encode(c.encode_utf8(&mut scratch), EncoderTrap::Strict)
            .map_err(|_| DbfError::InvalidCharacters)?;
        if out.len() + bytes.len() > max {
            break;
        }
        out.extend_from_slice(&bytes);
    }
    Ok(out)
}

/// Encodes the values of `entity` into `buf` using the layout of `layout`.
///
/// Values are matched to fields by position. A number that does not fit its
/// field is dropped with a warning, or rejected when `strict_width` is set.
pub fn encode_record(buf: &mut [u8], layout: &DbfList, entity: &DbfList, encoding: EncodingRef, strict_width: bool) -> Result<(), DbfError> {
    if layout.fields.len() != entity.fields.len() {
        return Err(DbfError::FieldCountMismatch { expected: layout.fields.len(), found: entity.fields.len() });
    }
    if buf.len() < layout.record_length() {
        return Err(DbfError::InvalidFieldList);
    }

    for b in buf.iter_mut() {
        *b = 0;
    }
    buf[0] = b' ';

    for (field, value) in layout.fields.iter().zip(entity.fields.iter().map(|f| &f.value)) {
        let start = 1 + field.offset;
        let window = &mut buf[start..start + field.length as usize];

        match field.field_type {
            DbfType::Logical => {
                window[0] = match *value {
                    DbfValue::Integer(0) => b'N',
                    DbfValue::Integer(_) => b'Y',
                    _ => b'?',
                };
            }
            DbfType::Date => {
                for b in window.iter_mut().take(8) {
                    *b = b'0';
                }
                let text = match *value {
                    DbfValue::Text(ref s) if s.len() == 8 => Some(s.clone()),
                    DbfValue::Double(julian) => {
                        let (y, m, d) = from_julian(julian);
                        if y >= 0 && y <= 9999 { Some(format!("{:04}{:02}{:02}", y, m, d)) } else { None }
                    }
                    _ => None,
                };
                if let Some(text) = text {
                    let n = window.len().min(8);
                    window[..n].copy_from_slice(&text.as_bytes()[..n]);
                }
            }
            DbfType::Character => {
                for b in window.iter_mut() {
                    *b = b' ';
                }
                if let DbfValue::Text(ref s) = *value {
                    let bytes = encode_character(s, window.len(), encoding)?;
                    window[..bytes.len()].copy_from_slice(&bytes);
                }
            }
            DbfType::Numeric | DbfType::Float => {
                if let Some(text) = format_number(value, field.decimals) {
                    if text.len() <= window.len() {
                        window[..text.len()].copy_from_slice(text.as_bytes());
                    } else if strict_width {
                        return Err(DbfError::ValueTooWide { field: field.name.clone(), length: field.length });
                    } else {
                        warn!(field = %field.name, value = %text, length = field.length, "value does not fit; dropped");
                    }
                }
            }
        }
    }

    Ok(())
}

/// Whether a row read from a standalone table is live or soft-deleted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RowStatus {
    Active,
    Deleted,
}

enum DbfHandle {
    Read(BufReader<File>),
    Write(BufWriter<File>),
}

/// A lone ".dbf" table, opened for reading or for writing.
///
/// Every fallible call also records its error text, readable through
/// `last_error()` until the next successful call.
pub struct Dbf {
    path: Option<PathBuf>,
    handle: Option<DbfHandle>,
    encoding: Option<EncodingRef>,
    list: Option<DbfList>,
    header: DbfHeader,
    buf: Vec<u8>,
    date_mode: DateMode,
    strict_width: bool,
    last_error: Option<String>,
}

impl Default for Dbf {
    fn default() -> Dbf {
        Dbf::new()
    }
}

impl Dbf {
    pub fn new() -> Dbf {
        Dbf {
            path: None,
            handle: None,
            encoding: None,
            list: None,
            header: DbfHeader::default(),
            buf: Vec::new(),
            date_mode: DateMode::default(),
            strict_width: false,
            last_error: None,
        }
    }

    pub fn is_open(&self) -> bool {
        self.handle.is_some()
    }

    pub fn last_error(&self) -> Option<&str> {
        self.last_error.as_ref().map(|s| s.as_str())
    }

    /// Number of rows in the table (read) or written so far (write).
    pub fn n_records(&self) -> usize {
        self.header.n_records
    }

    /// The field layout, with the values of the last row read.
    pub fn entity(&self) -> Option<&DbfList> {
        self.list.as_ref()
    }

    pub fn set_date_mode(&mut self, date_mode: DateMode) {
        self.date_mode = date_mode;
    }

    pub fn set_strict_width(&mut self, strict_width: bool) {
        self.strict_width = strict_width;
    }

    fn record<T>(&mut self, result: Result<T, DbfError>) -> Result<T, DbfError> {
        self.last_error = result.as_ref().err().map(|e| e.to_string());
        result
    }

    pub fn open_read(&mut self, path: &Path, charset: &str) -> Result<(), DbfError> {
        let result = self.try_open_read(path, charset);
        if result.is_err() && !matches!(result, Err(DbfError::AlreadyOpen)) {
            self.release();
        }
        self.record(result)
    }

    fn try_open_read(&mut self, path: &Path, charset: &str) -> Result<(), DbfError> {
        if self.is_open() {
            return Err(DbfError::AlreadyOpen);
        }
        let encoding = resolve_charset(charset)?;
        let shown = path.display().to_string();
        let file = File::open(path).map_err(|e| DbfError::OpenRead { path: shown.clone(), source: e })?;
        let mut reader = BufReader::new(file);
        let (header, list) = read_dbf_meta(&mut reader, &shown, encoding)?;

        debug!(path = %shown, n_records = header.n_records, n_fields = list.fields.len(), "opened DBF for reading");
        self.buf = vec![ 0u8; header.n_bytes_per_record ];
        self.path = Some(path.to_path_buf());
        self.handle = Some(DbfHandle::Read(reader));
        self.encoding = Some(encoding);
        self.list = Some(list);
        self.header = header;
        Ok(())
    }

    pub fn open_write(&mut self, path: &Path, list: &DbfList, charset: &str) -> Result<(), DbfError> {
        let result = self.try_open_write(path, list, charset);
        if result.is_err() && !matches!(result, Err(DbfError::AlreadyOpen)) {
            self.release();
        }
        self.record(result)
    }

    fn try_open_write(&mut self, path: &Path, list: &DbfList, charset: &str) -> Result<(), DbfError> {
        if self.is_open() {
            return Err(DbfError::AlreadyOpen);
        }
        let encoding = resolve_charset(charset)?;
        let shown = path.display().to_string();
        let file = File::create(path).map_err(|e| DbfError::OpenWrite { path: shown.clone(), source: e })?;
        let mut writer = BufWriter::new(file);

        let mut layout = list.clone();
        layout.recompute_offsets();
        layout.reset();
        let header = write_dbf_meta(&mut writer, &layout, encoding)?;

        debug!(path = %shown, n_fields = layout.fields.len(), "opened DBF for writing");
        self.buf = vec![ 0u8; header.n_bytes_per_record ];
        self.path = Some(path.to_path_buf());
        self.handle = Some(DbfHandle::Write(writer));
        self.encoding = Some(encoding);
        self.list = Some(layout);
        self.header = header;
        Ok(())
    }

    /// Reads one row into `entity()`.
    ///
    /// Returns Ok(None) past the last row. A soft-deleted row is reported as
    /// `RowStatus::Deleted` and its values are left null.
    pub fn read_entity(&mut self, row: usize) -> Result<Option<RowStatus>, DbfError> {
        let result = self.try_read_entity(row);
        self.record(result)
    }

    fn try_read_entity(&mut self, row: usize) -> Result<Option<RowStatus>, DbfError> {
        let offset = self.header.row_offset(row);
        let reader = match self.handle {
            Some(DbfHandle::Read(ref mut r)) => r,
            Some(DbfHandle::Write(_)) => return Err(DbfError::WriteOnly),
            None => return Err(DbfError::NotOpen),
        };
        let (list, encoding) = match (self.list.as_mut(), self.encoding) {
            (Some(list), Some(encoding)) => (list, encoding),
            _ => return Err(DbfError::NotOpen),
        };

        let offset = match offset {
            Some(offset) => offset,
            None => return Ok(None),
        };
        if reader.seek(SeekFrom::Start(offset)).is_err() || reader.read_exact(&mut self.buf).is_err() {
            return Ok(None);
        }

        list.reset();
        list.row_id = Some(row);
        if self.buf[0] == DELETED_MARKER {
            return Ok(Some(RowStatus::Deleted));
        }
        decode_record(&self.buf, list, self.date_mode, encoding)?;
        Ok(Some(RowStatus::Active))
    }

    /// Appends one row, taking values positionally from `entity`.
    pub fn write_entity(&mut self, entity: &DbfList) -> Result<(), DbfError> {
        let result = self.try_write_entity(entity);
        self.record(result)
    }

    fn try_write_entity(&mut self, entity: &DbfList) -> Result<(), DbfError> {
        let offset = self.header.data_end();
        let writer = match self.handle {
            Some(DbfHandle::Write(ref mut w)) => w,
            Some(DbfHandle::Read(_)) => return Err(DbfError::ReadOnly),
            None => return Err(DbfError::NotOpen),
        };
        let (layout, encoding) = match (self.list.as_ref(), self.encoding) {
            (Some(list), Some(encoding)) => (list, encoding),
            _ => return Err(DbfError::NotOpen),
        };

        encode_record(&mut self.buf, layout, entity, encoding, self.strict_width)?;
        writer.seek(SeekFrom::Start(offset))?;
        writer.write_all(&self.buf)?;
        self.header.n_records += 1;
        Ok(())
    }

    /// Patches the header with the current record count.
    pub fn flush_header(&mut self) -> Result<(), DbfError> {
        let header = self.header;
        let result = match self.handle {
            Some(DbfHandle::Write(ref mut w)) => flush_dbf_header(w, &header).map_err(DbfError::from),
            Some(DbfHandle::Read(_)) => Err(DbfError::ReadOnly),
            None => Err(DbfError::NotOpen),
        };
        self.record(result)
    }

    /// Flushes a table opened for writing, then releases everything.
    pub fn close(&mut self) -> Result<(), DbfError> {
        let result = match self.handle {
            Some(DbfHandle::Write(_)) => self.flush_header(),
            _ => Ok(()),
        };
        if let Some(ref path) = self.path {
            debug!(path = %path.display(), n_records = self.header.n_records, "closed DBF");
        }
        self.release();
        result
    }

    fn release(&mut self) {
        self.path = None;
        self.handle = None;
        self.encoding = None;
        self.list = None;
        self.header = DbfHeader::default();
    }
}

impl Drop for Dbf {
    fn drop(&mut self) {
        let _ = self.close();
    }
}
