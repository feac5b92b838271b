//! Active-learning iteration control
//!
//! The orchestrator runs six stages, each invoked on its own by the driver:
//!
//! 1. `layers`   create the run directory, compose the scene, empty class layers
//! 2. `split`    merge class layers, split, expand, rasterize the no-data mask
//! 3. `features` image and class statistics, sample selection and extraction
//! 4. `model`    train, classify, enhance confidence, regularize
//! 5. `evaluate` confusion matrix, metrics, iteration report
//! 6. `contour`  class boundaries over a quicklook
//!
//! Progress is kept in `Other/iteration_state.json` so stages can be resumed
//! from a new process.

mod kfold;
mod orchestrator;

pub use orchestrator::{Collaborators, ConfigSources, Orchestrator};

use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Layers,
    Split,
    Features,
    Model,
    Evaluate,
    Contour,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Layers,
        Stage::Split,
        Stage::Features,
        Stage::Model,
        Stage::Evaluate,
        Stage::Contour,
    ];

    /// Stages run by one iteration
    pub const ITERATION: [Stage; 5] = [
        Stage::Split,
        Stage::Features,
        Stage::Model,
        Stage::Evaluate,
        Stage::Contour,
    ];

    /// Step number used by the driver (1..6)
    pub fn number(&self) -> u8 {
        match self {
            Stage::Layers => 1,
            Stage::Split => 2,
            Stage::Features => 3,
            Stage::Model => 4,
            Stage::Evaluate => 5,
            Stage::Contour => 6,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Stage::Layers => "layers",
            Stage::Split => "split",
            Stage::Features => "features",
            Stage::Model => "model",
            Stage::Evaluate => "evaluate",
            Stage::Contour => "contour",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl std::str::FromStr for Stage {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "layers" | "1" => Ok(Stage::Layers),
            "split" | "2" => Ok(Stage::Split),
            "features" | "3" => Ok(Stage::Features),
            "model" | "4" => Ok(Stage::Model),
            "evaluate" | "5" => Ok(Stage::Evaluate),
            "contour" | "contours" | "6" => Ok(Stage::Contour),
            _ => Err(format!(
                "Unknown stage: {}. Valid: layers, split, features, model, evaluate, contour",
                s
            )),
        }
    }
}

/// Where the run stands
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    #[default]
    Init,
    LayersReady,
    SplitReady,
    FeaturesReady,
    ModelReady,
    Evaluated,
    Contoured,
    /// Waiting for the user to edit layers or decide on another iteration
    AwaitUserReview,
}

impl RunState {
    /// State reached once `stage` completes
    pub fn after(stage: Stage, iteration: u32) -> Self {
        match stage {
            Stage::Layers if iteration == 0 => RunState::AwaitUserReview,
            Stage::Layers => RunState::LayersReady,
            Stage::Split => RunState::SplitReady,
            Stage::Features => RunState::FeaturesReady,
            Stage::Model => RunState::ModelReady,
            Stage::Evaluate => RunState::Evaluated,
            Stage::Contour => RunState::Contoured,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RunState::Init => "init",
            RunState::LayersReady => "layers ready",
            RunState::SplitReady => "split ready",
            RunState::FeaturesReady => "features ready",
            RunState::ModelReady => "model ready",
            RunState::Evaluated => "evaluated",
            RunState::Contoured => "contoured",
            RunState::AwaitUserReview => "awaiting user review",
        };
        write!(f, "{}", name)
    }
}

/// Result of asking for a stage
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageOutcome {
    Completed,
    /// Outputs already existed and `force` was not set
    AlreadyPresent,
}

/// Persistent progress of a run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct IterationState {
    pub iteration: u32,
    pub state: RunState,
    /// Stages completed in the current iteration, in stage order
    pub completed: Vec<Stage>,
    /// Snapshot ids taken so far
    #[serde(default)]
    pub snapshots: Vec<u32>,
    /// Seed of the last split
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub seed: Option<u64>,
}

impl IterationState {
    /// Load the state file; a missing file is a fresh run
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        Ok(serde_json::from_str(&fs::read_to_string(path)?)?)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    pub fn is_completed(&self, stage: Stage) -> bool {
        self.completed.contains(&stage)
    }

    /// Record `stage` as done. Later stages no longer count as completed.
    pub fn mark_completed(&mut self, stage: Stage) {
        self.completed.retain(|s| *s < stage);
        self.completed.push(stage);
        self.state = RunState::after(stage, self.iteration);
    }

    /// An iteration is finished once every stage from `split` to `contour`
    /// has completed
    pub fn iteration_finished(&self) -> bool {
        Stage::ITERATION.iter().all(|stage| self.is_completed(*stage))
    }

    /// Hand control back to the user at the end of an iteration
    pub fn await_review(&mut self) {
        self.state = RunState::AwaitUserReview;
    }

    /// Move to the next iteration, keeping only the layer setup
    pub fn begin_next_iteration(&mut self, snapshot: u32) {
        self.iteration += 1;
        self.snapshots.push(snapshot);
        self.completed.retain(|s| *s == Stage::Layers);
        self.state = RunState::LayersReady;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_stage_from_str() {
        assert_eq!("split".parse::<Stage>().unwrap(), Stage::Split);
        assert_eq!("6".parse::<Stage>().unwrap(), Stage::Contour);
        assert!("train".parse::<Stage>().is_err());
        assert_eq!(Stage::Evaluate.number(), 5);
    }

    #[test]
    fn test_forced_stage_invalidates_later_ones() {
        let mut state = IterationState::default();
        for stage in Stage::ALL {
            state.mark_completed(stage);
        }
        assert_eq!(state.state, RunState::Contoured);

        state.mark_completed(Stage::Features);
        assert_eq!(state.completed, vec![Stage::Layers, Stage::Split, Stage::Features]);
        assert_eq!(state.state, RunState::FeaturesReady);
        assert!(!state.iteration_finished());
    }

    #[test]
    fn test_iteration_unfinished_until_contoured() {
        let mut state = IterationState::default();
        for stage in &Stage::ALL[..5] {
            state.mark_completed(*stage);
        }
        assert!(state.is_completed(Stage::Evaluate));
        assert!(!state.iteration_finished());

        state.mark_completed(Stage::Contour);
        assert!(state.iteration_finished());
    }

    #[test]
    fn test_first_iteration_waits_after_layers() {
        let mut state = IterationState::default();
        state.mark_completed(Stage::Layers);
        assert_eq!(state.state, RunState::AwaitUserReview);

        state.begin_next_iteration(0);
        state.mark_completed(Stage::Layers);
        assert_eq!(state.state, RunState::LayersReady);
    }

    #[test]
    fn test_begin_next_iteration() {
        let mut state = IterationState::default();
        for stage in Stage::ALL {
            state.mark_completed(stage);
        }
        state.begin_next_iteration(0);
        assert_eq!(state.iteration, 1);
        assert_eq!(state.completed, vec![Stage::Layers]);
        assert_eq!(state.snapshots, vec![0]);
    }

    #[test]
    fn test_state_file_round_trip() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("Other").join("iteration_state.json");
        assert_eq!(IterationState::load(&path).unwrap(), IterationState::default());

        let mut state = IterationState::default();
        state.mark_completed(Stage::Layers);
        state.seed = Some(12);
        state.save(&path).unwrap();
        assert_eq!(IterationState::load(&path).unwrap(), state);
    }
}
