//! Classifier backends
//!
//! The method tag from the global parameters (`rf_otb`, `svm_scikit`, ...)
//! selects a [`ClassifierKind`]; both kinds expose the same train/predict
//! capability.

use super::{CommandRunner, ToolCommand};
use crate::error::{AlcdError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use tracing::info;

/// Classifier backend family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ClassifierKind {
    /// Orfeo Toolbox `TrainVectorClassifier` / `ImageClassifier`
    #[default]
    Otb,
    /// scikit-learn through an external Python script
    Scikit,
}

impl fmt::Display for ClassifierKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Otb => write!(f, "otb"),
            Self::Scikit => write!(f, "scikit"),
        }
    }
}

impl std::str::FromStr for ClassifierKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "otb" => Ok(Self::Otb),
            "scikit" | "sklearn" | "scikit-learn" => Ok(Self::Scikit),
            _ => Err(format!("Unknown classifier backend: {}. Valid: otb, scikit", s)),
        }
    }
}

/// Parsed `classification.method`: algorithm plus backend
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClassifierMethod {
    pub algorithm: String,
    pub kind: ClassifierKind,
}

impl fmt::Display for ClassifierMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}_{}", self.algorithm, self.kind)
    }
}

impl std::str::FromStr for ClassifierMethod {
    type Err = String;

    /// `rf_otb` and `rf_scikit` name the backend explicitly; a bare
    /// algorithm name such as `rf` uses OTB.
    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        let method = s.trim().to_lowercase();
        if method.is_empty() {
            return Err("classification method is empty".to_string());
        }
        let (algorithm, kind) = match method.rsplit_once('_') {
            Some((algorithm, suffix)) => match suffix.parse::<ClassifierKind>() {
                Ok(kind) => (algorithm.to_string(), kind),
                Err(_) => (method.clone(), ClassifierKind::Otb),
            },
            None => (method.clone(), ClassifierKind::Otb),
        };
        if algorithm.is_empty() {
            return Err(format!("classification method `{}` has no algorithm", s));
        }
        Ok(Self { algorithm, kind })
    }
}

/// Inputs for training
#[derive(Debug, Clone)]
pub struct TrainJob<'a> {
    /// Extracted samples: one row per pixel, `band_<i>` columns plus `class`
    pub samples: &'a Path,
    /// Image statistics used to normalise features
    pub image_statistics: &'a Path,
    pub features: &'a [String],
    pub hyperparameters: &'a [(String, String)],
    pub model_out: &'a Path,
}

/// Inputs for full-scene prediction
#[derive(Debug, Clone)]
pub struct PredictJob<'a> {
    pub model: &'a Path,
    pub image: &'a Path,
    pub image_statistics: &'a Path,
    /// Validity mask; zero pixels are not classified
    pub mask: &'a Path,
    pub labels_out: &'a Path,
    pub confidence_out: &'a Path,
}

/// Train/predict capability shared by all backends
pub trait Classifier {
    fn kind(&self) -> ClassifierKind;

    /// Fit a model and write it to `job.model_out`
    fn train(&self, job: &TrainJob<'_>) -> Result<()>;

    /// Produce the label and confidence rasters
    fn predict(&self, job: &PredictJob<'_>) -> Result<()>;
}

/// Orfeo Toolbox backend
pub struct OtbClassifier<R> {
    runner: R,
    algorithm: String,
}

impl<R: CommandRunner> OtbClassifier<R> {
    pub fn new(runner: R, algorithm: impl Into<String>) -> Self {
        Self {
            runner,
            algorithm: algorithm.into(),
        }
    }

    pub fn train_command(&self, job: &TrainJob<'_>) -> ToolCommand {
        let mut cmd = ToolCommand::new("otbcli_TrainVectorClassifier")
            .flag_path("-io.vd", job.samples)
            .flag_path("-io.stats", job.image_statistics)
            .arg("-feat");
        for feature in job.features {
            cmd = cmd.arg(feature.as_str());
        }
        cmd = cmd
            .flag("-cfield", "class")
            .flag("-classifier", self.algorithm.as_str());
        for (name, value) in job.hyperparameters {
            cmd = cmd.flag(&format!("-classifier.{}.{}", self.algorithm, name), value.as_str());
        }
        cmd.flag_path("-io.out", job.model_out)
    }

    pub fn predict_command(&self, job: &PredictJob<'_>) -> ToolCommand {
        ToolCommand::new("otbcli_ImageClassifier")
            .flag_path("-in", job.image)
            .flag_path("-model", job.model)
            .flag_path("-imstat", job.image_statistics)
            .flag_path("-mask", job.mask)
            .flag_path("-out", job.labels_out)
            .flag_path("-confmap", job.confidence_out)
    }
}

impl<R: CommandRunner> Classifier for OtbClassifier<R> {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Otb
    }

    fn train(&self, job: &TrainJob<'_>) -> Result<()> {
        self.runner.run(&self.train_command(job))?;
        info!(algorithm = %self.algorithm, model = %job.model_out.display(), "Model trained");
        Ok(())
    }

    fn predict(&self, job: &PredictJob<'_>) -> Result<()> {
        self.runner.run(&self.predict_command(job))?;
        info!(labels = %job.labels_out.display(), "Scene classified");
        Ok(())
    }
}

/// Where to find the scikit-learn bridge script
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScikitSettings {
    pub python: String,
    pub script: Option<PathBuf>,
}

impl Default for ScikitSettings {
    fn default() -> Self {
        Self {
            python: "python3".to_string(),
            script: None,
        }
    }
}

/// scikit-learn backend
pub struct ScikitClassifier<R> {
    runner: R,
    algorithm: String,
    python: String,
    script: PathBuf,
}

impl<R: CommandRunner> ScikitClassifier<R> {
    pub fn new(runner: R, algorithm: impl Into<String>, settings: &ScikitSettings) -> Result<Self> {
        let script = settings.script.clone().ok_or_else(|| {
            AlcdError::config("scikit backend selected but no scikit script is configured")
        })?;
        Ok(Self {
            runner,
            algorithm: algorithm.into(),
            python: settings.python.clone(),
            script,
        })
    }

    pub fn train_command(&self, job: &TrainJob<'_>) -> Result<ToolCommand> {
        let params: serde_json::Map<String, serde_json::Value> = job
            .hyperparameters
            .iter()
            .map(|(k, v)| (k.clone(), serde_json::Value::String(v.clone())))
            .collect();
        Ok(ToolCommand::new(self.python.as_str())
            .arg_path(&self.script)
            .arg("train")
            .flag("--algorithm", self.algorithm.as_str())
            .flag_path("--samples", job.samples)
            .flag("--features", job.features.join(","))
            .flag("--class-field", "class")
            .flag("--params", serde_json::to_string(&params)?)
            .flag_path("--model", job.model_out))
    }

    pub fn predict_command(&self, job: &PredictJob<'_>) -> ToolCommand {
        ToolCommand::new(self.python.as_str())
            .arg_path(&self.script)
            .arg("predict")
            .flag_path("--model", job.model)
            .flag_path("--image", job.image)
            .flag_path("--mask", job.mask)
            .flag_path("--labels", job.labels_out)
            .flag_path("--confidence", job.confidence_out)
    }
}

impl<R: CommandRunner> Classifier for ScikitClassifier<R> {
    fn kind(&self) -> ClassifierKind {
        ClassifierKind::Scikit
    }

    fn train(&self, job: &TrainJob<'_>) -> Result<()> {
        self.runner.run(&self.train_command(job)?)?;
        info!(algorithm = %self.algorithm, model = %job.model_out.display(), "Model trained");
        Ok(())
    }

    fn predict(&self, job: &PredictJob<'_>) -> Result<()> {
        self.runner.run(&self.predict_command(job))?;
        info!(labels = %job.labels_out.display(), "Scene classified");
        Ok(())
    }
}

/// Create the backend named by a method tag
pub fn create_classifier<R: CommandRunner + 'static>(
    method: &ClassifierMethod,
    runner: R,
    scikit: &ScikitSettings,
) -> Result<Box<dyn Classifier>> {
    match method.kind {
        ClassifierKind::Otb => Ok(Box::new(OtbClassifier::new(runner, method.algorithm.as_str()))),
        ClassifierKind::Scikit => Ok(Box::new(ScikitClassifier::new(
            runner,
            method.algorithm.as_str(),
            scikit,
        )?)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::external::testing::RecordingRunner;

    #[test]
    fn test_method_from_str() {
        let m: ClassifierMethod = "rf_otb".parse().unwrap();
        assert_eq!(m.algorithm, "rf");
        assert_eq!(m.kind, ClassifierKind::Otb);

        let m: ClassifierMethod = "svm_scikit".parse().unwrap();
        assert_eq!(m.algorithm, "svm");
        assert_eq!(m.kind, ClassifierKind::Scikit);

        let m: ClassifierMethod = "rf".parse().unwrap();
        assert_eq!(m, ClassifierMethod { algorithm: "rf".to_string(), kind: ClassifierKind::Otb });

        let m: ClassifierMethod = "libsvm_linear".parse().unwrap();
        assert_eq!(m.algorithm, "libsvm_linear");

        assert!("".parse::<ClassifierMethod>().is_err());
        assert!("_otb".parse::<ClassifierMethod>().is_err());
    }

    #[test]
    fn test_otb_train_command() {
        let runner = RecordingRunner::new();
        let classifier = OtbClassifier::new(runner.clone(), "rf");
        let features = vec!["band_0".to_string(), "band_1".to_string()];
        let params = vec![("max".to_string(), "25".to_string())];
        let job = TrainJob {
            samples: Path::new("Samples/extracted.sqlite"),
            image_statistics: Path::new("Statistics/img_stats.xml"),
            features: &features,
            hyperparameters: &params,
            model_out: Path::new("Models/model.rf"),
        };

        classifier.train(&job).unwrap();

        let commands = runner.commands.borrow();
        assert_eq!(
            commands[0].display(),
            "otbcli_TrainVectorClassifier -io.vd Samples/extracted.sqlite \
             -io.stats Statistics/img_stats.xml -feat band_0 band_1 -cfield class \
             -classifier rf -classifier.rf.max 25 -io.out Models/model.rf"
        );
    }

    #[test]
    fn test_factory_selects_backend() {
        let settings = ScikitSettings {
            python: "python3".to_string(),
            script: Some(PathBuf::from("/opt/alcd/scikit_bridge.py")),
        };
        let otb = create_classifier(&"rf_otb".parse().unwrap(), RecordingRunner::new(), &settings)
            .unwrap();
        assert_eq!(otb.kind(), ClassifierKind::Otb);
        let scikit =
            create_classifier(&"rf_scikit".parse().unwrap(), RecordingRunner::new(), &settings)
                .unwrap();
        assert_eq!(scikit.kind(), ClassifierKind::Scikit);
    }

    #[test]
    fn test_scikit_requires_script() {
        let result = create_classifier(
            &"rf_scikit".parse().unwrap(),
            RecordingRunner::new(),
            &ScikitSettings::default(),
        );
        assert!(matches!(result, Err(AlcdError::Configuration(_))));
    }

    #[test]
    fn test_scikit_predict_command() {
        let runner = RecordingRunner::new();
        let settings = ScikitSettings {
            python: "python3".to_string(),
            script: Some(PathBuf::from("bridge.py")),
        };
        let classifier = ScikitClassifier::new(runner.clone(), "rf", &settings).unwrap();
        let job = PredictJob {
            model: Path::new("model.pkl"),
            image: Path::new("image.tif"),
            image_statistics: Path::new("stats.xml"),
            mask: Path::new("no_data.tif"),
            labels_out: Path::new("labeled.tif"),
            confidence_out: Path::new("confidence.tif"),
        };
        classifier.predict(&job).unwrap();
        assert_eq!(
            runner.commands.borrow()[0].display(),
            "python3 bridge.py predict --model model.pkl --image image.tif --mask no_data.tif \
             --labels labeled.tif --confidence confidence.tif"
        );
    }
}
