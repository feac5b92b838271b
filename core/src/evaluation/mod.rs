//! Classification quality
//!
//! Reads the confusion matrix written by `otbcli_ComputeConfusionMatrix`
//! and derives accuracy figures for the iteration report.

mod report;

pub use report::{IterationReport, KFoldSummary, Recommendation, SummaryStat};

use crate::error::{AlcdError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt::Write as _;
use std::fs;
use std::path::Path;

const REFERENCE_HEADER: &str = "#Reference labels (rows):";
const PRODUCED_HEADER: &str = "#Produced labels (columns):";

/// Square confusion matrix over the union of reference and produced labels.
/// Rows are reference classes, columns produced classes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConfusionMatrix {
    pub labels: Vec<u32>,
    pub counts: Vec<Vec<u64>>,
}

impl ConfusionMatrix {
    /// Parse the OTB CSV layout
    pub fn parse(text: &str) -> Result<Self> {
        let mut reference: Option<Vec<u32>> = None;
        let mut produced: Option<Vec<u32>> = None;
        let mut rows: Vec<Vec<u64>> = Vec::new();

        for line in text.lines().map(str::trim).filter(|l| !l.is_empty()) {
            if let Some(rest) = line.strip_prefix(REFERENCE_HEADER) {
                reference = Some(parse_list(rest)?);
            } else if let Some(rest) = line.strip_prefix(PRODUCED_HEADER) {
                produced = Some(parse_list(rest)?);
            } else if line.starts_with('#') {
                continue;
            } else {
                rows.push(parse_list(line)?);
            }
        }

        let reference =
            reference.ok_or_else(|| AlcdError::config("confusion matrix lacks reference labels"))?;
        let produced =
            produced.ok_or_else(|| AlcdError::config("confusion matrix lacks produced labels"))?;
        if rows.len() != reference.len() || rows.iter().any(|r| r.len() != produced.len()) {
            return Err(AlcdError::config(format!(
                "confusion matrix shape does not match its labels ({} x {})",
                reference.len(),
                produced.len()
            )));
        }

        let labels: Vec<u32> = reference
            .iter()
            .chain(produced.iter())
            .copied()
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect();
        let index = |label: u32| labels.iter().position(|l| *l == label).unwrap_or(0);

        let mut counts = vec![vec![0u64; labels.len()]; labels.len()];
        for (r, row) in rows.iter().enumerate() {
            for (c, value) in row.iter().enumerate() {
                counts[index(reference[r])][index(produced[c])] += value;
            }
        }
        Ok(Self { labels, counts })
    }

    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(AlcdError::missing("evaluate", path));
        }
        Self::parse(&fs::read_to_string(path)?)
    }

    pub fn total(&self) -> u64 {
        self.counts.iter().flatten().sum()
    }

    fn row_sum(&self, i: usize) -> u64 {
        self.counts[i].iter().sum()
    }

    fn column_sum(&self, j: usize) -> u64 {
        self.counts.iter().map(|row| row[j]).sum()
    }

    pub fn metrics(&self) -> ClassificationMetrics {
        let total = self.total();
        let n = self.labels.len();
        let correct: u64 = (0..n).map(|i| self.counts[i][i]).sum();

        let ratio = |a: f64, b: f64| if b > 0.0 { a / b } else { 0.0 };
        let overall_accuracy = ratio(correct as f64, total as f64);

        let expected: f64 = (0..n)
            .map(|i| self.row_sum(i) as f64 * self.column_sum(i) as f64)
            .sum::<f64>();
        let expected = ratio(expected, (total as f64).powi(2));
        let kappa = if expected < 1.0 {
            (overall_accuracy - expected) / (1.0 - expected)
        } else {
            0.0
        };

        let per_class = (0..n)
            .map(|i| {
                let tp = self.counts[i][i] as f64;
                let precision = ratio(tp, self.column_sum(i) as f64);
                let recall = ratio(tp, self.row_sum(i) as f64);
                ClassMetrics {
                    class_label: self.labels[i],
                    precision,
                    recall,
                    f1: ratio(2.0 * precision * recall, precision + recall),
                    support: self.row_sum(i),
                }
            })
            .collect();

        ClassificationMetrics {
            overall_accuracy,
            kappa,
            total,
            per_class,
        }
    }
}

fn parse_list<T: std::str::FromStr>(text: &str) -> Result<Vec<T>> {
    text.split(',')
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .map(|v| {
            v.parse::<T>()
                .map_err(|_| AlcdError::config(format!("bad confusion matrix value `{}`", v)))
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassMetrics {
    pub class_label: u32,
    pub precision: f64,
    pub recall: f64,
    pub f1: f64,
    /// Reference pixels of this class
    pub support: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClassificationMetrics {
    pub overall_accuracy: f64,
    pub kappa: f64,
    pub total: u64,
    pub per_class: Vec<ClassMetrics>,
}

impl ClassificationMetrics {
    pub fn class(&self, label: u32) -> Option<&ClassMetrics> {
        self.per_class.iter().find(|c| c.class_label == label)
    }

    /// CSV with one row per class followed by the global figures
    pub fn to_csv(&self) -> String {
        let mut out = String::from("class,precision,recall,f1,support\n");
        for c in &self.per_class {
            let _ = writeln!(
                out,
                "{},{:.4},{:.4},{:.4},{}",
                c.class_label, c.precision, c.recall, c.f1, c.support
            );
        }
        let _ = writeln!(out, "overall_accuracy,{:.4},,,{}", self.overall_accuracy, self.total);
        let _ = writeln!(out, "kappa,{:.4},,,", self.kappa);
        out
    }

    pub fn save_csv(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, self.to_csv())?;
        Ok(())
    }
}
