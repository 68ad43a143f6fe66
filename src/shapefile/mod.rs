//! Reads and writes ESRI Shapefiles: ".shp" geometry, ".shx" index and
//! ".dbf" attributes.
//!
//! There are two pieces of information these files _don't_ contain:
//!
//! * The _projection_ isn't specified. Sometimes there's a ".prj" file that
//!   contains that information; this library ignores it and works in plain
//!   `f64` coordinates.
//! * The _text encoding_ of the ".dbf" isn't reliably specified either. The
//!   caller names it with a WHATWG label ("utf-8", "windows-1252", ...);
//!   in memory, text is always UTF-8.
//!
//! # Examples
//!
//! Read every row:
//!
//! ```no_run
//! use shapecodec::shapefile;
//!
//! let mut reader = shapefile::open_read_utf8("data/rivers").unwrap();
//! reader.analyze().unwrap();
//!
//! let mut row = 0;
//! while reader.read_entity(row).unwrap() {
//!     println!("{:?}", reader.entity().unwrap().geometry);
//!     row += 1;
//! }
//! ```
//!
//! Write a Point shapefile:
//!
//! ```no_run
//! use shapecodec::geo::{Coord, Dims, Geometry, GeometryType};
//! use shapecodec::shapefile::{DbfList, DbfType, DbfValue, Shapefile};
//!
//! let mut fields = DbfList::new();
//! fields.add_field("NAME", DbfType::Character, 20, 0);
//!
//! let mut writer = Shapefile::new();
//! writer.open_write("out/cities", GeometryType::Point, Dims::Xy, &fields, "utf-8").unwrap();
//!
//! let mut entity = fields.clone();
//! entity.set_value("NAME", DbfValue::Text("Montréal".to_string()));
//! entity.geometry = Some(Geometry::Point(Coord::xy(-73.57, 45.50)));
//! writer.write_entity(&entity).unwrap();
//! writer.close().unwrap();
//! ```

pub mod dbf;
pub mod endian;
pub mod names;
pub mod rings;
pub mod shapefile;
pub mod shp;

pub use self::dbf::{DateMode, Dbf, DbfError, DbfField, DbfList, DbfType, DbfValue, RowStatus};
pub use self::shp::{ShapeType, ShpError};
pub use self::shapefile::{Shapefile, ShapefileError};

fn open_read(path: &str, charset: &str) -> Result<Shapefile, ShapefileError> {
    let mut shapefile = Shapefile::new();
    shapefile.open_read(path, charset)?;
    Ok(shapefile)
}

/// Opens `<path>.shp` and friends, decoding ".dbf" text as ASCII.
pub fn open_read_ascii(path: &str) -> Result<Shapefile, ShapefileError> {
    open_read(path, "ascii")
}

pub fn open_read_utf8(path: &str) -> Result<Shapefile, ShapefileError> {
    open_read(path, "utf-8")
}

pub fn open_read_windows1252(path: &str) -> Result<Shapefile, ShapefileError> {
    open_read(path, "windows-1252")
}
