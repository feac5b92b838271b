use super::{Feature, Geometry, GeometryType, VectorLayer, VectorStore};
use crate::error::{AlcdError, Result};
use crate::samples::{CLASS_FIELD, EXPAND_FIELD};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// A per-class point layer and the label its points receive
#[derive(Debug, Clone, PartialEq)]
pub struct ClassLayer {
    pub name: String,
    pub path: PathBuf,
    pub class_label: u32,
}

/// Merge per-class point layers into a single labelled layer.
///
/// The class label comes from the layer, never from the feature's own
/// `class` attribute. `expand` is carried over as 0/1. Feature IDs are
/// renumbered from 0 in layer order.
pub fn merge_layers(
    store: &dyn VectorStore,
    layers: &[ClassLayer],
    out: &Path,
) -> Result<VectorLayer> {
    let mut merged: Option<VectorLayer> = None;
    let mut next_id = 0u64;

    for class_layer in layers {
        if !class_layer.path.exists() {
            return Err(AlcdError::missing("split", &class_layer.path));
        }
        let layer = store.read(&class_layer.path)?;

        let target = merged.get_or_insert_with(|| {
            VectorLayer::new(
                layer.srs.clone(),
                GeometryType::Point,
                vec![CLASS_FIELD.to_string(), EXPAND_FIELD.to_string()],
            )
        });
        if layer.srs != target.srs {
            return Err(AlcdError::vector(
                &class_layer.path,
                format!(
                    "spatial reference {} differs from {} used by the other layers",
                    layer.srs, target.srs
                ),
            ));
        }

        let mut kept = 0usize;
        for feature in layer.features {
            let point = match feature.geometry {
                Some(Geometry::Point(p)) => p,
                _ => {
                    warn!(
                        layer = %class_layer.name,
                        feature = feature.id,
                        "Skipping feature without point geometry"
                    );
                    continue;
                }
            };
            let expand = feature.property(EXPAND_FIELD).map(|v| v != 0).unwrap_or(false);
            target.features.push(Feature {
                id: next_id,
                geometry: Some(Geometry::Point(point)),
                properties: vec![
                    (CLASS_FIELD.to_string(), Some(i64::from(class_layer.class_label))),
                    (EXPAND_FIELD.to_string(), Some(i64::from(expand))),
                ],
            });
            next_id += 1;
            kept += 1;
        }
        info!(layer = %class_layer.name, class = class_layer.class_label, points = kept, "Merged layer");
    }

    let merged = merged.ok_or_else(|| AlcdError::config("no class layers configured"))?;
    store.write(out, &merged)?;
    Ok(merged)
}
