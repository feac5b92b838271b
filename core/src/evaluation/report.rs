//! Iteration Report Generation
//!
//! Collects split counts and classification metrics for one iteration (or
//! one fold) and turns them into recommendations for the next round of
//! sample editing.

use super::ClassificationMetrics;
use crate::error::{AlcdError, Result};
use crate::partition::DegenerateClass;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

/// F1 below which a class is flagged for more samples
const WEAK_CLASS_F1: f64 = 0.7;

/// Report recommendation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Recommendation {
    /// Recommendation type (info, warning, error)
    pub level: String,
    pub message: String,
}

impl Recommendation {
    pub fn info(message: impl Into<String>) -> Self {
        Self { level: "info".to_string(), message: message.into() }
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self { level: "warning".to_string(), message: message.into() }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self { level: "error".to_string(), message: message.into() }
    }
}

/// Report for one iteration or one fold
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IterationReport {
    /// in_progress, success, warning or failed
    pub status: String,
    pub iteration: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fold: Option<usize>,
    /// Seed of the random source used for the split
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
    pub train_counts: BTreeMap<u32, usize>,
    pub validation_counts: BTreeMap<u32, usize>,
    #[serde(default)]
    pub degenerate_classes: Vec<DegenerateClass>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metrics: Option<ClassificationMetrics>,
    #[serde(default)]
    pub recommendations: Vec<Recommendation>,
}

impl IterationReport {
    pub fn new(iteration: u32) -> Self {
        Self {
            status: "in_progress".to_string(),
            iteration,
            fold: None,
            seed: None,
            train_counts: BTreeMap::new(),
            validation_counts: BTreeMap::new(),
            degenerate_classes: Vec::new(),
            metrics: None,
            recommendations: Vec::new(),
        }
    }

    pub fn with_fold(mut self, fold: usize) -> Self {
        self.fold = Some(fold);
        self
    }

    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = Some(seed);
        self
    }

    /// Record the outcome of the split stage
    pub fn record_split(
        &mut self,
        train_counts: BTreeMap<u32, usize>,
        validation_counts: BTreeMap<u32, usize>,
        degenerate_classes: Vec<DegenerateClass>,
    ) {
        self.train_counts = train_counts;
        self.validation_counts = validation_counts;
        self.degenerate_classes = degenerate_classes;
    }

    /// Attach metrics, set the status and generate recommendations
    pub fn finalize(&mut self, metrics: ClassificationMetrics) {
        self.status = if metrics.overall_accuracy >= 0.9 {
            "success"
        } else if metrics.overall_accuracy >= 0.8 {
            "warning"
        } else {
            "failed"
        }
        .to_string();
        self.metrics = Some(metrics);
        self.generate_recommendations();
    }

    fn generate_recommendations(&mut self) {
        self.recommendations.clear();
        let Some(metrics) = &self.metrics else {
            return;
        };

        let accuracy = metrics.overall_accuracy * 100.0;
        if metrics.overall_accuracy >= 0.95 {
            self.recommendations.push(Recommendation::info(format!(
                "Excellent overall accuracy: {:.1}%, the mask may be final",
                accuracy
            )));
        } else if metrics.overall_accuracy >= 0.9 {
            self.recommendations.push(Recommendation::info(format!(
                "Good overall accuracy: {:.1}%",
                accuracy
            )));
        } else if metrics.overall_accuracy >= 0.8 {
            self.recommendations.push(Recommendation::warning(format!(
                "Overall accuracy {:.1}% may be improved by correcting samples",
                accuracy
            )));
        } else {
            self.recommendations.push(Recommendation::error(format!(
                "Low overall accuracy: {:.1}%. Check class layers for mislabelled points.",
                accuracy
            )));
        }

        let weak: Vec<(u32, f64)> = metrics
            .per_class
            .iter()
            .filter(|c| c.support > 0 && c.f1 < WEAK_CLASS_F1)
            .map(|c| (c.class_label, c.f1))
            .collect();
        for (class, f1) in weak {
            self.recommendations.push(Recommendation::warning(format!(
                "Class {} is weak (F1 {:.2}), add samples where it is confused",
                class, f1
            )));
        }

        let without_validation: Vec<u32> = self
            .train_counts
            .keys()
            .filter(|c| self.validation_counts.get(c).copied().unwrap_or(0) == 0)
            .copied()
            .collect();
        for class in without_validation {
            self.recommendations.push(Recommendation::warning(format!(
                "Class {} has no validation sample, its scores are not measured",
                class
            )));
        }
    }

    /// Get summary line
    pub fn summary(&self) -> String {
        let train: usize = self.train_counts.values().sum();
        let validation: usize = self.validation_counts.values().sum();
        match &self.metrics {
            Some(m) => format!(
                "{}: iteration {}, train={}, validation={}, accuracy={:.1}%, kappa={:.3}",
                self.status.to_uppercase(),
                self.iteration,
                train,
                validation,
                m.overall_accuracy * 100.0,
                m.kappa
            ),
            None => format!(
                "{}: iteration {}, train={}, validation={}",
                self.status.to_uppercase(),
                self.iteration,
                train,
                validation
            ),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_json()?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AlcdError::missing("evaluate", path));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

/// Mean and standard deviation over folds
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SummaryStat {
    pub mean: f64,
    pub std: f64,
}

impl SummaryStat {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return Self { mean: 0.0, std: 0.0 };
        }
        let n = values.len() as f64;
        let mean = values.iter().sum::<f64>() / n;
        let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
        Self { mean, std: var.sqrt() }
    }
}

/// Cross-validation summary
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct KFoldSummary {
    pub folds: usize,
    pub overall_accuracy: SummaryStat,
    pub kappa: SummaryStat,
    /// F1 per class over the folds in which the class had reference pixels
    pub class_f1: BTreeMap<u32, SummaryStat>,
}

impl KFoldSummary {
    pub fn from_folds(folds: &[ClassificationMetrics]) -> Self {
        let accuracy: Vec<f64> = folds.iter().map(|m| m.overall_accuracy).collect();
        let kappa: Vec<f64> = folds.iter().map(|m| m.kappa).collect();

        let mut per_class: BTreeMap<u32, Vec<f64>> = BTreeMap::new();
        for metrics in folds {
            for class in metrics.per_class.iter().filter(|c| c.support > 0) {
                per_class.entry(class.class_label).or_default().push(class.f1);
            }
        }

        Self {
            folds: folds.len(),
            overall_accuracy: SummaryStat::from_values(&accuracy),
            kappa: SummaryStat::from_values(&kappa),
            class_f1: per_class
                .into_iter()
                .map(|(class, values)| (class, SummaryStat::from_values(&values)))
                .collect(),
        }
    }

    pub fn summary(&self) -> String {
        format!(
            "{} folds: accuracy={:.1}% ± {:.1}, kappa={:.3} ± {:.3}",
            self.folds,
            self.overall_accuracy.mean * 100.0,
            self.overall_accuracy.std * 100.0,
            self.kappa.mean,
            self.kappa.std
        )
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AlcdError::missing("kfold", path));
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::evaluation::ClassMetrics;
    use tempfile::TempDir;

    fn metrics(accuracy: f64, f1s: &[(u32, f64, u64)]) -> ClassificationMetrics {
        ClassificationMetrics {
            overall_accuracy: accuracy,
            kappa: accuracy - 0.1,
            total: 100,
            per_class: f1s
                .iter()
                .map(|(class, f1, support)| ClassMetrics {
                    class_label: *class,
                    precision: *f1,
                    recall: *f1,
                    f1: *f1,
                    support: *support,
                })
                .collect(),
        }
    }

    #[test]
    fn test_report_creation() {
        let report = IterationReport::new(2).with_fold(1).with_seed(99);
        assert_eq!(report.status, "in_progress");
        assert_eq!(report.fold, Some(1));
        assert_eq!(report.seed, Some(99));
    }

    #[test]
    fn test_finalize_flags_weak_and_unvalidated_classes() {
        let mut report = IterationReport::new(0);
        report.record_split(
            BTreeMap::from([(2, 7), (3, 3)]),
            BTreeMap::from([(2, 3)]),
            Vec::new(),
        );
        report.finalize(metrics(0.85, &[(2, 0.9, 60), (3, 0.5, 40)]));

        assert_eq!(report.status, "warning");
        let warnings: Vec<&str> = report
            .recommendations
            .iter()
            .filter(|r| r.level == "warning")
            .map(|r| r.message.as_str())
            .collect();
        assert_eq!(warnings.len(), 3);
        assert!(warnings.iter().any(|m| m.starts_with("Class 3 is weak")));
        assert!(warnings.iter().any(|m| m.starts_with("Class 3 has no validation")));
    }

    #[test]
    fn test_finalize_status_levels() {
        let mut report = IterationReport::new(0);
        report.finalize(metrics(0.97, &[]));
        assert_eq!(report.status, "success");
        report.finalize(metrics(0.6, &[]));
        assert_eq!(report.status, "failed");
        assert_eq!(report.recommendations[0].level, "error");
    }

    #[test]
    fn test_save_and_load() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Statistics").join("iteration_report.json");
        let mut report = IterationReport::new(3).with_seed(5);
        report.record_split(BTreeMap::from([(1, 4)]), BTreeMap::from([(1, 2)]), Vec::new());
        report.save(&path).unwrap();

        let json = std::fs::read_to_string(&path).unwrap();
        assert!(json.contains("\"iteration\": 3"));
        assert_eq!(IterationReport::load(&path).unwrap(), report);
    }

    #[test]
    fn test_summary() {
        let mut report = IterationReport::new(1);
        report.record_split(BTreeMap::from([(1, 4)]), BTreeMap::from([(1, 2)]), Vec::new());
        assert_eq!(report.summary(), "IN_PROGRESS: iteration 1, train=4, validation=2");
        report.finalize(metrics(0.92, &[(1, 0.92, 10)]));
        assert!(report.summary().starts_with("SUCCESS"));
    }

    #[test]
    fn test_kfold_summary() {
        let folds = vec![
            metrics(0.8, &[(2, 0.6, 10), (3, 0.9, 10)]),
            metrics(0.9, &[(2, 0.8, 10), (3, 0.0, 0)]),
        ];
        let summary = KFoldSummary::from_folds(&folds);

        assert_eq!(summary.folds, 2);
        assert!((summary.overall_accuracy.mean - 0.85).abs() < 1e-12);
        assert!((summary.overall_accuracy.std - 0.05).abs() < 1e-12);
        assert!((summary.class_f1[&2].mean - 0.7).abs() < 1e-12);
        // Class 3 had no reference pixels in the second fold
        assert_eq!(summary.class_f1[&3], SummaryStat { mean: 0.9, std: 0.0 });
    }
}
