//! Run directory layout
//!
//! ```text
//! <main_dir>/
//!   In_data/{Image,Masks}   scene composite, per-class layers, no-data mask
//!   Intermediate/           merged, split and expanded layers
//!   Statistics/             statistics, confusion matrix, reports, K_fold_<k>/
//!   Samples/  Models/  Out/ extracted pixels, model, classification maps
//!   Other/                  iteration state
//!   Previous_iterations/    SAVE_<n> snapshots
//! ```

use crate::config::RunConfig;
use crate::error::Result;
use crate::vector::ClassLayer;
use std::fs;
use std::path::{Path, PathBuf};

pub const IN_DATA: &str = "In_data";
pub const MASKS: &str = "In_data/Masks";
pub const IMAGE: &str = "In_data/Image";
pub const STATISTICS: &str = "Statistics";
pub const SAMPLES: &str = "Samples";
pub const MODELS: &str = "Models";
pub const OUT: &str = "Out";
pub const OTHER: &str = "Other";
pub const INTERMEDIATE: &str = "Intermediate";
pub const PREVIOUS_ITERATIONS: &str = "Previous_iterations";

/// Working directories copied into every snapshot
pub const SNAPSHOT_DIRS: [&str; 5] = [MASKS, STATISTICS, SAMPLES, MODELS, OUT];

const ALL_DIRS: [&str; 12] = [
    IN_DATA,
    MASKS,
    IMAGE,
    STATISTICS,
    "Statistics/correlations",
    "Statistics/features",
    SAMPLES,
    MODELS,
    OUT,
    OTHER,
    INTERMEDIATE,
    PREVIOUS_ITERATIONS,
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    main_dir: PathBuf,
}

impl RunLayout {
    pub fn new(main_dir: impl Into<PathBuf>) -> Self {
        Self {
            main_dir: main_dir.into(),
        }
    }

    pub fn main_dir(&self) -> &Path {
        &self.main_dir
    }

    pub fn dir(&self, relative: &str) -> PathBuf {
        self.main_dir.join(relative)
    }

    pub fn masks_dir(&self) -> PathBuf {
        self.dir(MASKS)
    }

    pub fn image_dir(&self) -> PathBuf {
        self.dir(IMAGE)
    }

    pub fn statistics_dir(&self) -> PathBuf {
        self.dir(STATISTICS)
    }

    pub fn previous_iterations_dir(&self) -> PathBuf {
        self.dir(PREVIOUS_ITERATIONS)
    }

    /// Scratch directory of fold `k`
    pub fn kfold_dir(&self, k: usize) -> PathBuf {
        self.statistics_dir().join(format!("K_fold_{}", k))
    }

    pub fn state_file(&self) -> PathBuf {
        self.dir(OTHER).join("iteration_state.json")
    }

    /// Create every working directory; returns the ones that were missing
    pub fn create_directories(&self) -> Result<Vec<PathBuf>> {
        let mut created = Vec::new();
        for relative in ALL_DIRS {
            let dir = self.dir(relative);
            if !dir.is_dir() {
                fs::create_dir_all(&dir)?;
                created.push(dir);
            }
        }
        Ok(created)
    }
}

/// Every artifact path of a run, resolved from the `general` names
#[derive(Debug, Clone, PartialEq)]
pub struct Artifacts {
    pub raw_image: PathBuf,
    /// Raster no-data mask written by the feature composer
    pub no_data_raster: PathBuf,
    /// Unsimplified no-data polygons
    pub no_data_raw: PathBuf,
    pub no_data_mask: PathBuf,
    /// No-data polygons rasterized on the scene grid
    pub no_data_mask_raster: PathBuf,
    pub class_layers: Vec<ClassLayer>,
    pub merged: PathBuf,
    pub training: PathBuf,
    pub validation: PathBuf,
    pub training_extended: PathBuf,
    pub validation_extended: PathBuf,
    pub image_statistics: PathBuf,
    pub class_statistics: PathBuf,
    pub sampling_rates: PathBuf,
    pub samples_location: PathBuf,
    pub samples_extracted: PathBuf,
    pub model: PathBuf,
    pub labeled: PathBuf,
    pub confidence: PathBuf,
    pub confidence_enhanced: PathBuf,
    pub regularized: PathBuf,
    pub colorized: PathBuf,
    pub contours: PathBuf,
    pub contour_overlay: PathBuf,
    pub confusion_matrix: PathBuf,
    pub model_metrics: PathBuf,
    pub iteration_report: PathBuf,
    pub kfold_summary: PathBuf,
    pub used_global_parameters: PathBuf,
}

impl Artifacts {
    pub fn resolve(layout: &RunLayout, config: &RunConfig) -> Self {
        let general = &config.general;
        let masks = layout.masks_dir();
        let stats = layout.statistics_dir();
        let inter = layout.dir(INTERMEDIATE);
        let out = layout.dir(OUT);
        let no_data_mask = masks.join(&general.no_data_mask);
        let no_data_ext = no_data_mask
            .extension()
            .and_then(|e| e.to_str())
            .unwrap_or("geojson")
            .to_string();

        let class_layers = config
            .masks
            .iter()
            .map(|(name, mask)| ClassLayer {
                name: name.clone(),
                path: masks.join(&mask.shp),
                class_label: mask.class_label,
            })
            .collect();

        let raw_img = if config.user_choices.raw_img.is_empty() {
            format!("{}_bands.tif", config.user_choices.location)
        } else {
            config.user_choices.raw_img.clone()
        };

        Self {
            raw_image: layout.image_dir().join(raw_img),
            no_data_raster: layout.image_dir().join("no_data.tif"),
            no_data_raw: inter.join(format!("no_data_raw.{}", no_data_ext)),
            no_data_mask_raster: no_data_mask.with_extension("tif"),
            no_data_mask,
            class_layers,
            merged: inter.join(&general.merged_layers),
            training: inter.join(&general.training_shp),
            validation: inter.join(&general.validation_shp),
            training_extended: inter.join(&general.training_shp_extended),
            validation_extended: inter.join(&general.validation_shp_extended),
            image_statistics: stats.join(&general.img_stats),
            class_statistics: stats.join(&general.class_stats),
            sampling_rates: stats.join("rates.csv"),
            samples_location: layout.dir(SAMPLES).join(&general.training_samples_location),
            samples_extracted: layout.dir(SAMPLES).join(&general.training_samples_extracted),
            model: layout
                .dir(MODELS)
                .join(format!("model.{}", config.classification.method)),
            labeled: out.join(&general.img_labeled),
            confidence: out.join("confidence.tif"),
            confidence_enhanced: out.join("confidence_enhanced.tif"),
            regularized: out.join(&general.img_labeled_regularized),
            colorized: out.join("colorized_classif.png"),
            contours: out.join("contours.tif"),
            contour_overlay: out.join("contours_superposition.png"),
            confusion_matrix: stats.join(&config.postprocessing.confusion_matrix),
            model_metrics: stats.join(&config.postprocessing.model_metrics),
            iteration_report: stats.join("iteration_report.json"),
            kfold_summary: stats.join("kfold_summary.json"),
            used_global_parameters: layout.dir(IN_DATA).join("used_global_parameters.json"),
        }
    }

    /// Outputs copied into each `K_fold_<k>` directory
    pub fn fold_outputs(&self) -> Vec<&Path> {
        vec![
            self.labeled.as_path(),
            self.regularized.as_path(),
            self.contour_overlay.as_path(),
            self.colorized.as_path(),
            self.confusion_matrix.as_path(),
            self.model_metrics.as_path(),
            self.iteration_report.as_path(),
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::test_support::GLOBAL_PARAMETERS;
    use tempfile::TempDir;

    #[test]
    fn test_create_directories_once() {
        let dir = TempDir::new().unwrap();
        let layout = RunLayout::new(dir.path().join("Orleans_31UDP_20180214"));

        let created = layout.create_directories().unwrap();
        assert_eq!(created.len(), 12);
        assert!(layout.masks_dir().is_dir());
        assert!(layout.dir("Statistics/correlations").is_dir());
        assert!(layout.create_directories().unwrap().is_empty());
    }

    #[test]
    fn test_artifact_paths() {
        let mut config: RunConfig = serde_json::from_str(GLOBAL_PARAMETERS).unwrap();
        config.user_choices.raw_img = "Orleans_bands.tif".to_string();
        let layout = RunLayout::new("/run");
        let artifacts = Artifacts::resolve(&layout, &config);

        assert_eq!(artifacts.raw_image, PathBuf::from("/run/In_data/Image/Orleans_bands.tif"));
        assert_eq!(artifacts.no_data_mask, PathBuf::from("/run/In_data/Masks/no_data.geojson"));
        assert_eq!(artifacts.no_data_mask_raster, PathBuf::from("/run/In_data/Masks/no_data.tif"));
        assert_eq!(artifacts.no_data_raw, PathBuf::from("/run/Intermediate/no_data_raw.geojson"));
        assert_eq!(artifacts.model, PathBuf::from("/run/Models/model.rf_otb"));
        assert_eq!(artifacts.class_layers.len(), 3);
        assert_eq!(artifacts.class_layers[0].name, "land");
        assert_eq!(artifacts.class_layers[0].class_label, 2);
        assert_eq!(layout.kfold_dir(2), PathBuf::from("/run/Statistics/K_fold_2"));
    }
}
