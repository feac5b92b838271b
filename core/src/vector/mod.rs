//! Vector layer contract
//!
//! The core never parses shapefiles itself. It exchanges [`VectorLayer`]
//! values with a [`VectorStore`] collaborator:
//!
//! - [`GeoJsonStore`]: GeoJSON FeatureCollections read and written in-process
//! - [`FileVectorStore`]: dispatches on extension, routing `.shp` through `ogr2ogr`
//!
//! All attribute fields are integers, as in the per-class layers users edit.

mod geojson;
mod merge;
mod ogr;

pub use geojson::GeoJsonStore;
pub use merge::{merge_layers, ClassLayer};
pub use ogr::FileVectorStore;

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Sidecar extensions that make up one ESRI Shapefile dataset
const SHAPEFILE_PARTS: &[&str] = &["shp", "shx", "dbf", "prj", "cpg", "qix", "sbn", "sbx"];

/// A 2D coordinate in the layer's spatial reference
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

/// Feature geometry. Polygons hold a single closed exterior ring.
#[derive(Debug, Clone, PartialEq)]
pub enum Geometry {
    Point(Point),
    Polygon(Vec<Point>),
}

impl Geometry {
    pub fn geometry_type(&self) -> GeometryType {
        match self {
            Geometry::Point(_) => GeometryType::Point,
            Geometry::Polygon(_) => GeometryType::Polygon,
        }
    }

    pub fn as_point(&self) -> Option<Point> {
        match self {
            Geometry::Point(p) => Some(*p),
            Geometry::Polygon(_) => None,
        }
    }

    pub fn ring(&self) -> Option<&[Point]> {
        match self {
            Geometry::Polygon(ring) => Some(ring),
            Geometry::Point(_) => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GeometryType {
    Point,
    Polygon,
}

impl GeometryType {
    /// Name understood by `ogr2ogr -nlt`
    pub fn ogr_name(&self) -> &'static str {
        match self {
            GeometryType::Point => "POINT",
            GeometryType::Polygon => "POLYGON",
        }
    }
}

/// Named spatial reference system, e.g. `EPSG:32631`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpatialRef(String);

impl SpatialRef {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// GeoJSON's implicit reference system
    pub fn wgs84() -> Self {
        Self::new("EPSG:4326")
    }

    pub fn name(&self) -> &str {
        &self.0
    }

    /// Whether coordinates are expressed in degrees rather than meters
    pub fn is_geographic(&self) -> bool {
        let name = self.0.to_ascii_uppercase();
        name.ends_with(":4326") || name.ends_with("::4326") || name.contains("CRS84")
    }
}

impl std::fmt::Display for SpatialRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One feature of a vector layer
#[derive(Debug, Clone, PartialEq)]
pub struct Feature {
    /// Feature ID assigned by the store
    pub id: u64,
    pub geometry: Option<Geometry>,
    /// Integer attributes in schema order; `None` is a null value
    pub properties: Vec<(String, Option<i64>)>,
}

impl Feature {
    pub fn property(&self, name: &str) -> Option<i64> {
        self.properties
            .iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, value)| *value)
    }
}

/// In-memory content of a vector dataset
#[derive(Debug, Clone, PartialEq)]
pub struct VectorLayer {
    pub srs: SpatialRef,
    pub geometry_type: GeometryType,
    /// Field names in schema order
    pub fields: Vec<String>,
    pub features: Vec<Feature>,
}

impl VectorLayer {
    /// Create an empty layer with the given schema
    pub fn new(srs: SpatialRef, geometry_type: GeometryType, fields: Vec<String>) -> Self {
        Self {
            srs,
            geometry_type,
            fields,
            features: Vec::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.features.len()
    }

    pub fn is_empty(&self) -> bool {
        self.features.is_empty()
    }
}

/// Vector store collaborator
pub trait VectorStore {
    /// Read a whole layer
    fn read(&self, path: &Path) -> Result<VectorLayer>;

    /// Write a layer, replacing any dataset already at `path`
    fn write(&self, path: &Path, layer: &VectorLayer) -> Result<()>;
}

/// Remove a dataset and, for shapefiles, every sidecar file next to it
pub fn remove_dataset(path: &Path) -> Result<()> {
    let is_shapefile = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.eq_ignore_ascii_case("shp"))
        .unwrap_or(false);

    if is_shapefile {
        for ext in SHAPEFILE_PARTS {
            let part = path.with_extension(ext);
            if part.exists() {
                fs::remove_file(&part)?;
            }
        }
    } else if path.exists() {
        fs::remove_file(path)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_geographic_detection() {
        assert!(SpatialRef::wgs84().is_geographic());
        assert!(SpatialRef::new("urn:ogc:def:crs:OGC:1.3:CRS84").is_geographic());
        assert!(!SpatialRef::new("EPSG:32631").is_geographic());
    }

    #[test]
    fn test_feature_property_lookup() {
        let feature = Feature {
            id: 3,
            geometry: Some(Geometry::Point(Point::new(1.0, 2.0))),
            properties: vec![("class".to_string(), Some(2)), ("expand".to_string(), None)],
        };
        assert_eq!(feature.property("class"), Some(2));
        assert_eq!(feature.property("expand"), None);
        assert_eq!(feature.property("missing"), None);
    }

    #[test]
    fn test_remove_shapefile_sidecars() {
        let dir = TempDir::new().unwrap();
        let shp = dir.path().join("land.shp");
        for ext in ["shp", "shx", "dbf", "prj"] {
            fs::write(shp.with_extension(ext), b"x").unwrap();
        }
        fs::write(dir.path().join("water.shp"), b"x").unwrap();

        remove_dataset(&shp).unwrap();

        for ext in ["shp", "shx", "dbf", "prj"] {
            assert!(!shp.with_extension(ext).exists());
        }
        assert!(dir.path().join("water.shp").exists());
    }
}
