//! Run configuration documents
//!
//! Three JSON documents drive a run:
//!
//! - global parameters ([`RunConfig`]): class layers, artifact names,
//!   training parameters and the user's scene choice
//! - paths parameters ([`PathsConfig`]): L1C archive, data root, tile map
//! - model parameters ([`ModelsConfig`]): classifier hyperparameters
//!
//! They are read once per run and passed by reference to every stage.

use crate::dates::parse_date;
use crate::error::{AlcdError, Result};
use crate::expand::HalfExtent;
use crate::external::{ClassifierMethod, SamplingStrategy};
use crate::partition::ProportionType;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::path::{Path, PathBuf};

fn read_document<T: serde::de::DeserializeOwned>(path: &Path, what: &str) -> Result<T> {
    if !path.exists() {
        return Err(AlcdError::config(format!(
            "{} file not found: {}",
            what,
            path.display()
        )));
    }
    let text = fs::read_to_string(path)?;
    serde_json::from_str(&text)
        .map_err(|e| AlcdError::config(format!("invalid {} {}: {}", what, path.display(), e)))
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    /// Method tag such as `rf_otb`
    pub method: String,
}

/// Feature selection, passed through to the feature composer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct Features {
    #[serde(rename = "DTM", default)]
    pub dtm: Value,
    #[serde(default)]
    pub original_bands: Vec<Value>,
    #[serde(default)]
    pub ratios: Vec<String>,
    #[serde(default)]
    pub special_indices: Vec<String>,
    #[serde(default)]
    pub textures: Value,
    #[serde(default)]
    pub time_difference_bands: Vec<Value>,
}

/// Artifact file names inside the run directory
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct General {
    pub class_stats: String,
    pub img_labeled: String,
    pub img_labeled_regularized: String,
    pub img_stats: String,
    pub merged_layers: String,
    pub no_data_mask: String,
    pub training_samples_extracted: String,
    pub training_samples_location: String,
    pub training_sampling: String,
    pub training_shp: String,
    pub training_shp_extended: String,
    pub validation_shp: String,
    pub validation_shp_extended: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LocalPaths {
    pub copy_folder: String,
    pub current_server: String,
}

/// One per-class point layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskLayer {
    #[serde(rename = "class", alias = "class_name")]
    pub class_label: u32,
    pub shp: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PostProcessing {
    #[serde(default)]
    pub binary_confusion_matrix: Option<String>,
    pub confusion_matrix: String,
    pub model_metrics: String,
}

fn default_half_resolution() -> f64 {
    30.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainingParameters {
    #[serde(rename = "Kfold")]
    pub kfold: usize,
    pub dilatation_radius: u32,
    /// Half extent of regions around points flagged `expand`
    pub expansion_distance: f64,
    pub regularization_radius: u32,
    pub training_proportion: f64,
    /// Half extent of regions around ordinary points
    #[serde(default = "default_half_resolution")]
    pub half_resolution: f64,
    #[serde(default)]
    pub proportion_type: ProportionType,
}

/// Scene selection; empty until [`RunConfig::initialize`] fills it
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
pub struct UserChoices {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_function: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_module: Option<String>,
    #[serde(default)]
    pub clear_date: String,
    #[serde(default)]
    pub current_date: String,
    #[serde(default)]
    pub location: String,
    #[serde(default)]
    pub main_dir: String,
    #[serde(default)]
    pub raw_img: String,
    #[serde(default)]
    pub tile: String,
}

/// Global parameters document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunConfig {
    pub classification: Classification,
    #[serde(default)]
    pub color_tables: BTreeMap<String, PathBuf>,
    #[serde(default)]
    pub features: Features,
    pub general: General,
    pub masks: BTreeMap<String, MaskLayer>,
    pub postprocessing: PostProcessing,
    pub training_parameters: TrainingParameters,
    #[serde(default)]
    pub user_choices: UserChoices,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_paths: Option<LocalPaths>,
}

impl RunConfig {
    /// Load and validate a global parameters file
    pub fn load(path: &Path) -> Result<Self> {
        let config: Self = read_document(path, "global parameters")?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        let tp = &self.training_parameters;
        if !(tp.training_proportion > 0.0 && tp.training_proportion <= 1.0) {
            return Err(AlcdError::config(format!(
                "training_proportion must be in (0, 1], got {}",
                tp.training_proportion
            )));
        }
        if tp.kfold < 2 {
            return Err(AlcdError::config(format!("Kfold must be at least 2, got {}", tp.kfold)));
        }
        if !(tp.expansion_distance > 0.0) {
            return Err(AlcdError::config("expansion_distance must be positive"));
        }
        if !(tp.half_resolution > 0.0) {
            return Err(AlcdError::config("half_resolution must be positive"));
        }
        if self.masks.is_empty() {
            return Err(AlcdError::config("no class layers defined in `masks`"));
        }
        let mut labels = BTreeSet::new();
        for (name, mask) in &self.masks {
            if mask.class_label == 0 {
                return Err(AlcdError::config(format!("mask `{}` has class 0", name)));
            }
            if !labels.insert(mask.class_label) {
                return Err(AlcdError::config(format!(
                    "class {} is used by more than one mask",
                    mask.class_label
                )));
            }
        }
        self.method()?;
        self.sampling_strategy()?;
        for date in [&self.user_choices.current_date, &self.user_choices.clear_date] {
            if !date.is_empty() {
                parse_date(date)?;
            }
        }
        Ok(())
    }

    /// Return a copy with the scene choice filled in. The tile comes from
    /// the paths document; the run directory is
    /// `<data_alcd>/<location>_<tile>_<current_date>`.
    pub fn initialize(
        &self,
        paths: &PathsConfig,
        location: &str,
        current_date: &str,
        clear_date: &str,
    ) -> Result<RunConfig> {
        parse_date(current_date)?;
        parse_date(clear_date)?;
        let tile = paths.tile(location)?;
        let main_dir = paths
            .data_paths
            .data_alcd
            .join(format!("{}_{}_{}", location, tile, current_date));

        let mut config = self.clone();
        config.user_choices = UserChoices {
            user_function: self.user_choices.user_function.clone(),
            user_module: self.user_choices.user_module.clone(),
            clear_date: clear_date.to_string(),
            current_date: current_date.to_string(),
            location: location.to_string(),
            main_dir: main_dir.display().to_string(),
            raw_img: format!("{}_bands.tif", location),
            tile: tile.to_string(),
        };
        Ok(config)
    }

    /// Run directory. Fails until the scene has been chosen.
    pub fn main_dir(&self) -> Result<PathBuf> {
        if self.user_choices.main_dir.is_empty() {
            return Err(AlcdError::config(
                "user_choices.main_dir is empty: give a location and dates to initialize the run",
            ));
        }
        Ok(PathBuf::from(&self.user_choices.main_dir))
    }

    pub fn method(&self) -> Result<ClassifierMethod> {
        self.classification
            .method
            .parse()
            .map_err(AlcdError::Configuration)
    }

    pub fn sampling_strategy(&self) -> Result<SamplingStrategy> {
        self.general
            .training_sampling
            .parse()
            .map_err(AlcdError::Configuration)
    }

    pub fn default_extent(&self) -> HalfExtent {
        HalfExtent::square(self.training_parameters.half_resolution)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalChainsPaths {
    #[serde(rename = "L1C")]
    pub l1c: PathBuf,
    /// Other processing chains, kept for the feature composer
    #[serde(flatten)]
    pub others: BTreeMap<String, Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DataPaths {
    pub data_alcd: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_pcc: Option<PathBuf>,
}

/// Paths parameters document
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PathsConfig {
    pub global_chains_paths: GlobalChainsPaths,
    pub data_paths: DataPaths,
    pub tile_location: BTreeMap<String, String>,
}

impl PathsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_document(path, "paths parameters")
    }

    pub fn tile(&self, location: &str) -> Result<&str> {
        self.tile_location
            .get(location)
            .map(String::as_str)
            .ok_or_else(|| AlcdError::config(format!("unknown location `{}`", location)))
    }
}

/// Model parameters document: method → hyperparameters
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(transparent)]
pub struct ModelsConfig(pub BTreeMap<String, BTreeMap<String, Value>>);

impl ModelsConfig {
    pub fn load(path: &Path) -> Result<Self> {
        read_document(path, "model parameters")
    }

    /// Hyperparameters for a method, looked up by full tag first, then by
    /// algorithm name. Values are rendered as command-line strings.
    pub fn hyperparameters(&self, method: &ClassifierMethod) -> Vec<(String, String)> {
        let params = self
            .0
            .get(&method.to_string())
            .or_else(|| self.0.get(&method.algorithm));
        params
            .map(|map| {
                map.iter()
                    .map(|(name, value)| {
                        let rendered = match value {
                            Value::String(s) => s.clone(),
                            other => other.to_string(),
                        };
                        (name.clone(), rendered)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }
}


#[cfg(test)]
mod tests {
    use super::test_support::*;
    use super::*;
    use crate::external::ClassifierKind;
    use tempfile::TempDir;

    fn run_config() -> RunConfig {
        serde_json::from_str(GLOBAL_PARAMETERS).unwrap()
    }

    #[test]
    fn test_defaults_for_added_parameters() {
        let config = run_config();
        assert_eq!(config.training_parameters.half_resolution, 30.0);
        assert_eq!(config.training_parameters.proportion_type, ProportionType::ByClass);
        assert_eq!(config.masks["low_clouds"].class_label, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_validation_errors() {
        let mut config = run_config();
        config.training_parameters.training_proportion = 0.0;
        assert!(matches!(config.validate(), Err(AlcdError::Configuration(_))));

        let mut config = run_config();
        config.training_parameters.kfold = 1;
        assert!(config.validate().is_err());

        let mut config = run_config();
        config.masks.get_mut("water").unwrap().class_label = 2;
        assert!(config.validate().is_err());

        let mut config = run_config();
        config.general.training_sampling = "periodic".to_string();
        assert!(config.validate().is_err());

        let mut config = run_config();
        config.user_choices.current_date = "20181345".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_initialize_returns_new_value() {
        let config = run_config();
        let paths: PathsConfig = serde_json::from_str(PATHS_PARAMETERS).unwrap();

        let run = config.initialize(&paths, "Orleans", "20180214", "20180319").unwrap();

        assert!(config.user_choices.main_dir.is_empty());
        assert!(config.main_dir().is_err());
        assert_eq!(run.main_dir().unwrap(), PathBuf::from("/data/alcd/Orleans_31UDP_20180214"));
        assert_eq!(run.user_choices.raw_img, "Orleans_bands.tif");
        assert_eq!(run.user_choices.tile, "31UDP");
        assert!(config.initialize(&paths, "Paris", "20180214", "20180319").is_err());
        assert!(config.initialize(&paths, "Orleans", "2018-02-14", "20180319").is_err());
    }

    #[test]
    fn test_paths_keep_other_chains() {
        let paths: PathsConfig = serde_json::from_str(PATHS_PARAMETERS).unwrap();
        assert_eq!(paths.global_chains_paths.l1c, PathBuf::from("/data/L1C"));
        assert!(paths.global_chains_paths.others.contains_key("maja"));
    }

    #[test]
    fn test_hyperparameters_lookup() {
        let models: ModelsConfig = serde_json::from_str(
            r#"{ "rf": { "max": 25, "min": 5, "ra": "0.0" }, "svm_scikit": { "C": 1.5 } }"#,
        )
        .unwrap();

        let rf: ClassifierMethod = "rf_otb".parse().unwrap();
        let params = models.hyperparameters(&rf);
        assert!(params.contains(&("max".to_string(), "25".to_string())));
        assert!(params.contains(&("ra".to_string(), "0.0".to_string())));

        let svm: ClassifierMethod = "svm_scikit".parse().unwrap();
        assert_eq!(svm.kind, ClassifierKind::Scikit);
        assert_eq!(models.hyperparameters(&svm), vec![("C".to_string(), "1.5".to_string())]);
    }

    #[test]
    fn test_load_reports_missing_file() {
        let dir = TempDir::new().unwrap();
        let result = RunConfig::load(&dir.path().join("global_parameters.json"));
        assert!(matches!(result, Err(AlcdError::Configuration(_))));

        let path = dir.path().join("global_parameters.json");
        fs::write(&path, GLOBAL_PARAMETERS).unwrap();
        assert_eq!(RunConfig::load(&path).unwrap(), run_config());
    }
}
