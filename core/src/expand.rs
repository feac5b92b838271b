//! Point-to-region expansion
//!
//! Each sample becomes an axis-aligned rectangle centred on its point. The
//! `expand` flag selects the large neighbourhood; otherwise the default
//! half extent (about one pixel) is used.

use crate::error::{AlcdError, Result};
use crate::samples::{Sample, SampleStore, CLASS_FIELD, EXPAND_FIELD};
use crate::vector::{Geometry, GeometryType, Point};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

/// Half width and half height of a region
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HalfExtent {
    pub x: f64,
    pub y: f64,
}

impl HalfExtent {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn square(d: f64) -> Self {
        Self { x: d, y: d }
    }

    fn is_valid(&self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.x > 0.0 && self.y > 0.0
    }
}

/// Closed rectangle ring around `center`:
/// top-left, top-right, bottom-right, bottom-left, top-left.
pub fn rectangle_ring(center: Point, half: HalfExtent) -> Vec<Point> {
    let left = center.x - half.x;
    let right = center.x + half.x;
    let top = center.y + half.y;
    let bottom = center.y - half.y;
    vec![
        Point::new(left, top),
        Point::new(right, top),
        Point::new(right, bottom),
        Point::new(left, bottom),
        Point::new(left, top),
    ]
}

#[derive(Debug, Clone)]
pub struct RegionExpander {
    default_extent: HalfExtent,
    expand_distance: f64,
}

impl RegionExpander {
    pub fn new(default_extent: HalfExtent, expand_distance: f64) -> Result<Self> {
        if !default_extent.is_valid() {
            return Err(AlcdError::config(format!(
                "default half extent must be positive, got ({}, {})",
                default_extent.x, default_extent.y
            )));
        }
        if !(expand_distance.is_finite() && expand_distance > 0.0) {
            return Err(AlcdError::config(format!(
                "expansion distance must be positive, got {}",
                expand_distance
            )));
        }
        Ok(Self {
            default_extent,
            expand_distance,
        })
    }

    /// Half extent applied to a sample
    pub fn extent_for(&self, sample: &Sample) -> HalfExtent {
        if sample.expand {
            HalfExtent::square(self.expand_distance)
        } else {
            self.default_extent
        }
    }

    /// Build the region store. Only `class` and `expand` are carried over.
    pub fn expand(&self, store: &SampleStore) -> SampleStore {
        if store.srs().is_geographic() {
            warn!(
                srs = %store.srs(),
                "Samples use a geographic reference system, distances are applied in degrees"
            );
        }

        let mut regions = SampleStore::new(
            store.srs().clone(),
            GeometryType::Polygon,
            vec![CLASS_FIELD.to_string(), EXPAND_FIELD.to_string()],
        );
        let mut expanded = 0usize;

        for sample in store.samples() {
            let Some(center) = sample.geometry.as_point() else {
                warn!(id = sample.id, "Sample has no point geometry, not expanded");
                continue;
            };
            if sample.expand {
                expanded += 1;
            }
            let ring = rectangle_ring(center, self.extent_for(sample));
            let region = Sample::new(sample.id, sample.class_label, Geometry::Polygon(ring))
                .with_expand(sample.expand);
            // IDs come from a store that already guarantees uniqueness
            if let Err(e) = regions.push(region) {
                warn!(id = sample.id, error = %e, "Region not added");
            }
        }

        info!(
            regions = regions.len(),
            expanded,
            "Expanded samples into regions"
        );
        regions
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vector::SpatialRef;

    fn point_store(samples: &[(u64, f64, f64, bool)]) -> SampleStore {
        let mut store = SampleStore::new(
            SpatialRef::new("EPSG:32631"),
            GeometryType::Point,
            vec!["class".to_string(), "expand".to_string(), "source".to_string()],
        );
        for (id, x, y, expand) in samples {
            store
                .push(
                    Sample::new(*id, 3, Geometry::Point(Point::new(*x, *y)))
                        .with_expand(*expand)
                        .with_attribute("source", Some(7)),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn test_default_region_corners() {
        let store = point_store(&[(0, 100.0, 200.0, false)]);
        let expander = RegionExpander::new(HalfExtent::square(10.0), 60.0).unwrap();
        let regions = expander.expand(&store);

        let ring = regions.samples()[0].geometry.ring().unwrap().to_vec();
        let expected: Vec<Point> = [(90.0, 210.0), (110.0, 210.0), (110.0, 190.0), (90.0, 190.0), (90.0, 210.0)]
            .iter()
            .map(|(x, y)| Point::new(*x, *y))
            .collect();
        assert_eq!(ring, expected);
    }

    #[test]
    fn test_expand_flag_selects_large_extent() {
        let store = point_store(&[(0, 0.0, 0.0, true), (1, 1000.0, 1000.0, false)]);
        let expander = RegionExpander::new(HalfExtent::new(15.0, 30.0), 250.0).unwrap();
        let regions = expander.expand(&store);

        for (source, region) in store.samples().iter().zip(regions.samples()) {
            let center = source.geometry.as_point().unwrap();
            let half = expander.extent_for(source);
            let ring = region.geometry.ring().unwrap();
            assert_eq!(ring.len(), 5);
            assert_eq!(ring[0], ring[4]);
            assert_eq!((ring[1].x - ring[0].x) / 2.0, half.x);
            assert_eq!((ring[0].y - ring[3].y) / 2.0, half.y);
            assert_eq!((ring[0].x + ring[1].x) / 2.0, center.x);
            assert_eq!((ring[0].y + ring[3].y) / 2.0, center.y);
            assert_eq!(region.expand, source.expand);
            assert_eq!(region.class_label, source.class_label);
        }
        assert_eq!(expander.extent_for(&store.samples()[0]), HalfExtent::square(250.0));
    }

    #[test]
    fn test_regions_drop_extra_attributes() {
        let store = point_store(&[(4, 5.0, 5.0, false)]);
        let regions = RegionExpander::new(HalfExtent::square(30.0), 100.0)
            .unwrap()
            .expand(&store);

        assert_eq!(regions.geometry_type(), GeometryType::Polygon);
        assert_eq!(regions.fields(), ["class", "expand"]);
        assert!(regions.samples()[0].attributes.is_empty());
        assert_eq!(regions.samples()[0].id, 4);
    }

    #[test]
    fn test_rejects_non_positive_distances() {
        assert!(RegionExpander::new(HalfExtent::square(0.0), 10.0).is_err());
        assert!(RegionExpander::new(HalfExtent::square(10.0), -1.0).is_err());
        assert!(RegionExpander::new(HalfExtent::square(10.0), f64::INFINITY).is_err());
    }
}
