//! Labelled point samples
//!
//! A [`SampleStore`] is the in-memory view of the merged layer. It keeps the
//! source schema so subsets can be written back with every attribute intact.

use crate::error::{AlcdError, Result};
use crate::vector::{Feature, Geometry, GeometryType, SpatialRef, VectorLayer, VectorStore};
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use tracing::{info, warn};

pub const CLASS_FIELD: &str = "class";
pub const EXPAND_FIELD: &str = "expand";

/// One labelled observation
#[derive(Debug, Clone, PartialEq)]
pub struct Sample {
    pub id: u64,
    pub class_label: u32,
    pub geometry: Geometry,
    pub expand: bool,
    /// Extra integer fields inherited from the source layer, in schema order
    pub attributes: Vec<(String, Option<i64>)>,
}

impl Sample {
    pub fn new(id: u64, class_label: u32, geometry: Geometry) -> Self {
        Self {
            id,
            class_label,
            geometry,
            expand: false,
            attributes: Vec::new(),
        }
    }

    pub fn with_expand(mut self, expand: bool) -> Self {
        self.expand = expand;
        self
    }

    pub fn with_attribute(mut self, name: impl Into<String>, value: Option<i64>) -> Self {
        self.attributes.push((name.into(), value));
        self
    }

    fn attribute(&self, name: &str) -> Option<i64> {
        self.attributes
            .iter()
            .find(|(field, _)| field == name)
            .and_then(|(_, value)| *value)
    }
}

/// Ordered samples sharing one spatial reference
#[derive(Debug, Clone, PartialEq)]
pub struct SampleStore {
    srs: SpatialRef,
    geometry_type: GeometryType,
    fields: Vec<String>,
    samples: Vec<Sample>,
    ids: BTreeSet<u64>,
    skipped: usize,
}

impl SampleStore {
    /// Empty store. `class` is always part of the schema.
    pub fn new(srs: SpatialRef, geometry_type: GeometryType, fields: Vec<String>) -> Self {
        let mut fields = fields;
        if !fields.iter().any(|f| f == CLASS_FIELD) {
            fields.insert(0, CLASS_FIELD.to_string());
        }
        Self {
            srs,
            geometry_type,
            fields,
            samples: Vec::new(),
            ids: BTreeSet::new(),
            skipped: 0,
        }
    }

    /// Interpret a vector layer as samples.
    ///
    /// Features without a positive `class` value or without geometry are
    /// skipped and counted. Duplicate feature IDs are an error.
    pub fn from_layer(layer: VectorLayer, source: &Path) -> Result<Self> {
        let mut store = Self::new(layer.srs, layer.geometry_type, layer.fields);
        let mut seen = BTreeSet::new();

        for feature in layer.features {
            let Feature {
                id,
                geometry,
                properties,
            } = feature;

            if !seen.insert(id) {
                return Err(AlcdError::vector(source, format!("duplicate feature id {}", id)));
            }

            let class_label = properties
                .iter()
                .find(|(name, _)| name == CLASS_FIELD)
                .and_then(|(_, value)| *value)
                .and_then(|value| u32::try_from(value).ok())
                .filter(|label| *label > 0);

            let (Some(class_label), Some(geometry)) = (class_label, geometry) else {
                store.skipped += 1;
                continue;
            };

            let mut expand = false;
            let mut attributes = Vec::new();
            for (name, value) in properties {
                if name == CLASS_FIELD {
                    continue;
                }
                if name == EXPAND_FIELD {
                    expand = value.map(|v| v != 0).unwrap_or(false);
                    continue;
                }
                attributes.push((name, value));
            }

            store.ids.insert(id);
            store.samples.push(Sample {
                id,
                class_label,
                geometry,
                expand,
                attributes,
            });
        }

        if store.skipped > 0 {
            warn!(
                source = %source.display(),
                skipped = store.skipped,
                "Skipped features without class label or geometry"
            );
        }
        Ok(store)
    }

    /// Read a layer through the vector store
    pub fn load(vectors: &dyn VectorStore, path: &Path) -> Result<Self> {
        let layer = vectors.read(path)?;
        let store = Self::from_layer(layer, path)?;
        info!(path = %path.display(), samples = store.len(), "Loaded samples");
        Ok(store)
    }

    /// Append a sample. Fails if its ID is already present.
    pub fn push(&mut self, sample: Sample) -> Result<()> {
        if !self.ids.insert(sample.id) {
            return Err(AlcdError::config(format!("duplicate sample id {}", sample.id)));
        }
        for (name, _) in &sample.attributes {
            if !self.fields.iter().any(|f| f == name) {
                self.fields.push(name.clone());
            }
        }
        if sample.expand && !self.fields.iter().any(|f| f == EXPAND_FIELD) {
            self.fields.push(EXPAND_FIELD.to_string());
        }
        self.samples.push(sample);
        Ok(())
    }

    pub fn srs(&self) -> &SpatialRef {
        &self.srs
    }

    pub fn geometry_type(&self) -> GeometryType {
        self.geometry_type
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    /// Number of source features rejected by [`SampleStore::from_layer`]
    pub fn skipped(&self) -> usize {
        self.skipped
    }

    pub fn ids(&self) -> BTreeSet<u64> {
        self.ids.clone()
    }

    /// Sample IDs grouped by class, each group in store order
    pub fn ids_by_class(&self) -> BTreeMap<u32, Vec<u64>> {
        let mut groups: BTreeMap<u32, Vec<u64>> = BTreeMap::new();
        for sample in &self.samples {
            groups.entry(sample.class_label).or_default().push(sample.id);
        }
        groups
    }

    pub fn class_counts(&self) -> BTreeMap<u32, usize> {
        self.ids_by_class()
            .into_iter()
            .map(|(class, ids)| (class, ids.len()))
            .collect()
    }

    /// Per-class counts restricted to a set of IDs
    pub fn class_counts_of(&self, ids: &BTreeSet<u64>) -> BTreeMap<u32, usize> {
        let mut counts = BTreeMap::new();
        for sample in self.samples.iter().filter(|s| ids.contains(&s.id)) {
            *counts.entry(sample.class_label).or_insert(0) += 1;
        }
        counts
    }

    /// New store holding only the samples whose ID is in `ids`
    pub fn subset(&self, ids: &BTreeSet<u64>) -> SampleStore {
        SampleStore {
            srs: self.srs.clone(),
            geometry_type: self.geometry_type,
            fields: self.fields.clone(),
            samples: self
                .samples
                .iter()
                .filter(|s| ids.contains(&s.id))
                .cloned()
                .collect(),
            ids: self.ids.intersection(ids).copied().collect(),
            skipped: 0,
        }
    }

    /// Vector layer with the source schema for the samples in `ids`
    pub fn to_layer(&self, ids: &BTreeSet<u64>) -> VectorLayer {
        let mut layer = VectorLayer::new(self.srs.clone(), self.geometry_type, self.fields.clone());
        for sample in self.samples.iter().filter(|s| ids.contains(&s.id)) {
            let properties = self
                .fields
                .iter()
                .map(|field| {
                    let value = match field.as_str() {
                        CLASS_FIELD => Some(i64::from(sample.class_label)),
                        EXPAND_FIELD => Some(i64::from(sample.expand)),
                        other => sample.attribute(other),
                    };
                    (field.clone(), value)
                })
                .collect();
            layer.features.push(Feature {
                id: sample.id,
                geometry: Some(sample.geometry.clone()),
                properties,
            });
        }
        layer
    }

    /// Write the samples in `ids` to `destination`, replacing what is there
    pub fn write(
        &self,
        vectors: &dyn VectorStore,
        ids: &BTreeSet<u64>,
        destination: &Path,
    ) -> Result<()> {
        let layer = self.to_layer(ids);
        vectors.write(destination, &layer)?;
        info!(path = %destination.display(), samples = layer.len(), "Wrote samples");
        Ok(())
    }

    /// Write every sample
    pub fn write_all(&self, vectors: &dyn VectorStore, destination: &Path) -> Result<()> {
        self.write(vectors, &self.ids(), destination)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::{GeoJsonStore, Point};
    use tempfile::TempDir;

    fn merged_layer() -> VectorLayer {
        let mut layer = VectorLayer::new(
            SpatialRef::new("EPSG:32631"),
            GeometryType::Point,
            vec!["class".to_string(), "expand".to_string(), "confidence".to_string()],
        );
        let rows = [
            (10, Some(2), Some(1), Some(80)),
            (11, Some(2), None, None),
            (12, None, Some(0), Some(50)),
            (13, Some(4), Some(0), Some(60)),
        ];
        for (id, class, expand, confidence) in rows {
            layer.features.push(Feature {
                id,
                geometry: Some(Geometry::Point(Point::new(id as f64, 0.0))),
                properties: vec![
                    ("class".to_string(), class),
                    ("expand".to_string(), expand),
                    ("confidence".to_string(), confidence),
                ],
            });
        }
        layer
    }

    #[test]
    fn test_load_skips_unlabelled() {
        let store = SampleStore::from_layer(merged_layer(), Path::new("merged.geojson")).unwrap();

        assert_eq!(store.len(), 3);
        assert_eq!(store.skipped(), 1);
        assert!(!store.ids().contains(&12));
        assert!(store.samples()[0].expand);
        assert!(!store.samples()[1].expand);
        assert_eq!(store.samples()[0].attributes, vec![("confidence".to_string(), Some(80))]);
        assert_eq!(store.class_counts(), BTreeMap::from([(2, 2), (4, 1)]));
        assert_eq!(store.ids_by_class()[&2], vec![10, 11]);
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let mut layer = merged_layer();
        layer.features[1].id = 10;
        let result = SampleStore::from_layer(layer, Path::new("merged.geojson"));
        assert!(matches!(result, Err(AlcdError::Vector { .. })));
    }

    #[test]
    fn test_push_rejects_duplicates_in_large_store() {
        let mut store = SampleStore::new(SpatialRef::new("EPSG:32631"), GeometryType::Point, vec![]);
        for id in 0..5_000u64 {
            let point = Point::new(id as f64, 0.0);
            store.push(Sample::new(id, 1 + (id % 3) as u32, Geometry::Point(point))).unwrap();
        }
        let again = Sample::new(2_500, 2, Geometry::Point(Point::new(0.0, 0.0)));
        let err = store.push(again).unwrap_err();
        assert!(matches!(err, AlcdError::Configuration(_)));
        assert_eq!(store.len(), 5_000);
        assert_eq!(store.ids().len(), 5_000);

        let subset = store.subset(&BTreeSet::from([1, 2, 9_999]));
        assert_eq!(subset.ids(), BTreeSet::from([1, 2]));
    }

    #[test]
    fn test_write_subset_preserves_schema() {
        let dir = TempDir::new().unwrap();
        let vectors = GeoJsonStore::new();
        let store = SampleStore::from_layer(merged_layer(), Path::new("merged.geojson")).unwrap();

        let dest = dir.path().join("train.geojson");
        std::fs::write(&dest, "stale content").unwrap();
        store.write(&vectors, &BTreeSet::from([10, 13]), &dest).unwrap();

        let back = SampleStore::load(&vectors, &dest).unwrap();
        assert_eq!(back.fields(), store.fields());
        assert_eq!(back.ids(), BTreeSet::from([10, 13]));
        assert_eq!(back.samples()[0], store.samples()[0]);
        assert_eq!(back.samples()[1].attributes, vec![("confidence".to_string(), Some(60))]);
    }

    #[test]
    fn test_subset_and_counts_of() {
        let store = SampleStore::from_layer(merged_layer(), Path::new("merged.geojson")).unwrap();
        let ids = BTreeSet::from([11, 13]);
        assert_eq!(store.subset(&ids).len(), 2);
        assert_eq!(store.class_counts_of(&ids), BTreeMap::from([(2, 1), (4, 1)]));
    }
}
