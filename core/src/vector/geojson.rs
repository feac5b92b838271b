//! GeoJSON FeatureCollection store
//!
//! Besides the standard members, collections carry two foreign members so
//! that empty layers keep their schema: `fields` (ordered field names) and
//! `geometry_type`. The legacy named `crs` member records the spatial
//! reference; its absence means WGS84.

use super::{Feature, Geometry, GeometryType, Point, SpatialRef, VectorLayer, VectorStore};
use crate::error::{AlcdError, Result};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fs;
use std::path::Path;
use tracing::debug;

#[derive(Debug, Default, Clone, Copy)]
pub struct GeoJsonStore;

impl GeoJsonStore {
    pub fn new() -> Self {
        Self
    }

    /// Parse a FeatureCollection document
    pub fn parse(path: &Path, text: &str) -> Result<VectorLayer> {
        let doc: JsonCollection = serde_json::from_str(text)
            .map_err(|e| AlcdError::vector(path, format!("invalid GeoJSON: {}", e)))?;
        if doc.kind != "FeatureCollection" {
            return Err(AlcdError::vector(
                path,
                format!("expected a FeatureCollection, found {}", doc.kind),
            ));
        }

        let srs = doc
            .crs
            .map(|crs| SpatialRef::new(crs.properties.name))
            .unwrap_or_else(SpatialRef::wgs84);

        // Schema: declared fields first, then any key seen on a feature
        let mut fields = doc.fields.unwrap_or_default();
        for feature in &doc.features {
            if let Some(props) = &feature.properties {
                for key in props.keys() {
                    if !fields.iter().any(|f| f == key) {
                        fields.push(key.clone());
                    }
                }
            }
        }

        let mut features = Vec::with_capacity(doc.features.len());
        for (index, raw) in doc.features.into_iter().enumerate() {
            let id = raw.id.unwrap_or(index as u64);
            let geometry = raw.geometry.map(|g| g.into_geometry(path)).transpose()?;
            let props = raw.properties.unwrap_or_default();
            let mut properties = Vec::with_capacity(fields.len());
            for field in &fields {
                let value = match props.get(field) {
                    None | Some(Value::Null) => None,
                    Some(value) => Some(integer_value(path, field, value)?),
                };
                properties.push((field.clone(), value));
            }
            features.push(Feature {
                id,
                geometry,
                properties,
            });
        }

        let geometry_type = doc
            .geometry_type
            .or_else(|| {
                features
                    .iter()
                    .find_map(|f| f.geometry.as_ref().map(Geometry::geometry_type))
            })
            .unwrap_or(GeometryType::Point);

        Ok(VectorLayer {
            srs,
            geometry_type,
            fields,
            features,
        })
    }

    /// Render a layer as a FeatureCollection document
    pub fn render(layer: &VectorLayer) -> Result<String> {
        let features = layer
            .features
            .iter()
            .map(|feature| {
                let mut properties = Map::new();
                for (name, value) in &feature.properties {
                    properties.insert(name.clone(), value.map(Value::from).unwrap_or(Value::Null));
                }
                JsonFeature {
                    kind: "Feature".to_string(),
                    id: Some(feature.id),
                    properties: Some(properties),
                    geometry: feature.geometry.as_ref().map(JsonGeometry::from_geometry),
                }
            })
            .collect();

        let doc = JsonCollection {
            kind: "FeatureCollection".to_string(),
            crs: Some(JsonCrs {
                kind: "name".to_string(),
                properties: JsonCrsProperties {
                    name: layer.srs.name().to_string(),
                },
            }),
            fields: Some(layer.fields.clone()),
            geometry_type: Some(layer.geometry_type),
            features,
        };
        Ok(serde_json::to_string_pretty(&doc)?)
    }
}

impl VectorStore for GeoJsonStore {
    fn read(&self, path: &Path) -> Result<VectorLayer> {
        if !path.exists() {
            return Err(AlcdError::vector(path, "layer does not exist"));
        }
        let text = fs::read_to_string(path)?;
        let layer = Self::parse(path, &text)?;
        debug!(path = %path.display(), features = layer.len(), "Read GeoJSON layer");
        Ok(layer)
    }

    fn write(&self, path: &Path, layer: &VectorLayer) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, Self::render(layer)?)?;
        debug!(path = %path.display(), features = layer.len(), "Wrote GeoJSON layer");
        Ok(())
    }
}

fn integer_value(path: &Path, field: &str, value: &Value) -> Result<i64> {
    let parsed = match value {
        Value::Bool(b) => Some(i64::from(*b)),
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64)),
        Value::String(s) => s.trim().parse::<i64>().ok(),
        _ => None,
    };
    parsed.ok_or_else(|| {
        AlcdError::vector(
            path,
            format!("field `{}` holds non-integer value {}", field, value),
        )
    })
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonCollection {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    crs: Option<JsonCrs>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    fields: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    geometry_type: Option<GeometryType>,
    #[serde(default)]
    features: Vec<JsonFeature>,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonCrs {
    #[serde(rename = "type")]
    kind: String,
    properties: JsonCrsProperties,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonCrsProperties {
    name: String,
}

#[derive(Debug, Serialize, Deserialize)]
struct JsonFeature {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    id: Option<u64>,
    #[serde(default)]
    properties: Option<Map<String, Value>>,
    #[serde(default)]
    geometry: Option<JsonGeometry>,
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(tag = "type", content = "coordinates")]
enum JsonGeometry {
    Point(Vec<f64>),
    Polygon(Vec<Vec<Vec<f64>>>),
}

impl JsonGeometry {
    fn from_geometry(geometry: &Geometry) -> Self {
        match geometry {
            Geometry::Point(p) => JsonGeometry::Point(vec![p.x, p.y]),
            Geometry::Polygon(ring) => {
                JsonGeometry::Polygon(vec![ring.iter().map(|p| vec![p.x, p.y]).collect()])
            }
        }
    }

    fn into_geometry(self, path: &Path) -> Result<Geometry> {
        match self {
            JsonGeometry::Point(coords) => Ok(Geometry::Point(coordinate(path, &coords)?)),
            JsonGeometry::Polygon(rings) => {
                let exterior = rings
                    .first()
                    .ok_or_else(|| AlcdError::vector(path, "polygon without exterior ring"))?;
                let ring = exterior
                    .iter()
                    .map(|c| coordinate(path, c))
                    .collect::<Result<Vec<_>>>()?;
                Ok(Geometry::Polygon(ring))
            }
        }
    }
}

fn coordinate(path: &Path, coords: &[f64]) -> Result<Point> {
    match coords {
        [x, y, ..] => Ok(Point::new(*x, *y)),
        _ => Err(AlcdError::vector(path, "coordinate with fewer than two values")),
    }
}
