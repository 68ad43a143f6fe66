#![allow(dead_code)]

use std::fs;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use shapecodec::geo::{Coord, Dims, Geometry, GeometryType, Ring};
use shapecodec::shapefile::{DbfList, DbfType, DbfValue, Shapefile};

pub fn temp_dir(prefix: &str) -> PathBuf {
    let nanos = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap()
        .as_nanos();
    let pid = std::process::id();
    let dir = std::env::temp_dir().join(format!("shapecodec_{}_{}_{}", prefix, pid, nanos));
    fs::create_dir_all(&dir).unwrap();
    dir
}

/// `<temp dir>/<name>`, as a base path without extension.
pub fn base_path(prefix: &str, name: &str) -> String {
    temp_dir(prefix).join(name).to_str().unwrap().to_string()
}

pub fn file_len(base: &str, extension: &str) -> u64 {
    fs::metadata(format!("{}.{}", base, extension)).unwrap().len()
}

pub fn name_field() -> DbfList {
    let mut fields = DbfList::new();
    fields.add_field("NAME", DbfType::Character, 16, 0);
    fields
}

pub fn entity(fields: &DbfList, name: &str, geometry: Option<Geometry>) -> DbfList {
    let mut entity = fields.clone();
    entity.set_value("NAME", DbfValue::Text(name.to_string()));
    entity.geometry = geometry;
    entity
}

/// Clockwise with Y up.
pub fn square(x0: f64, y0: f64, size: f64) -> Ring {
    Ring(vec![
        Coord::xy(x0, y0),
        Coord::xy(x0, y0 + size),
        Coord::xy(x0 + size, y0 + size),
        Coord::xy(x0 + size, y0),
        Coord::xy(x0, y0),
    ])
}

pub fn reversed(mut ring: Ring) -> Ring {
    ring.reverse();
    ring
}

/// Writes `geometries` (one entity each) and closes the session.
pub fn write_all(base: &str, geometry_type: GeometryType, dims: Dims, geometries: &[Option<Geometry>]) {
    let fields = name_field();
    let mut writer = Shapefile::new();
    writer.open_write(base, geometry_type, dims, &fields, "utf-8").unwrap();
    for (i, geometry) in geometries.iter().enumerate() {
        writer.write_entity(&entity(&fields, &format!("row{}", i), geometry.clone())).unwrap();
    }
    writer.close().unwrap();
}

/// Reads every entity back, optionally after a full analyze pass.
pub fn read_all(base: &str, analyze: bool) -> (Shapefile, Vec<DbfList>) {
    let mut reader = Shapefile::new();
    reader.open_read(base, "utf-8").unwrap();
    if analyze {
        reader.analyze().unwrap();
    }
    let mut rows = Vec::new();
    while reader.read_entity(rows.len()).unwrap() {
        rows.push(reader.entity().unwrap().clone());
    }
    (reader, rows)
}
