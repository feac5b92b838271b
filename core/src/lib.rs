//! ALCD Core - Active-learning cloud detection
//!
//! This crate holds the logic of the ALCD reference-mask workflow: labelled
//! points are split into training and validation sets, expanded into square
//! regions, and pushed through raster and classifier tools that run out of
//! process. The user reviews each classification and edits the labels before
//! the next iteration.
//!
//! # Modules
//!
//! - **samples / vector**: labelled point layers and their on-disk formats
//! - **partition**: stratified train/validation split and K-fold partitioning
//! - **expand**: point to square region expansion
//! - **external**: Orfeo Toolbox, GDAL and helper script invocations
//! - **pipeline**: the six stages, iteration state and snapshots
//! - **evaluation**: confusion matrix metrics and iteration reports
//!
//! # Example
//!
//! ```rust,ignore
//! use alcd_core::{Orchestrator, Stage};
//!
//! let mut orchestrator = Orchestrator::new(config, models, sources, collaborators)?
//!     .with_seed(42);
//! orchestrator.run_stage(Stage::Layers, false)?;
//! // ... the user labels points in the class layers ...
//! orchestrator.run_iteration(false)?;
//! ```

pub mod config;
pub mod dates;
pub mod error;
pub mod evaluation;
pub mod expand;
pub mod external;
pub mod layout;
pub mod partition;
pub mod pipeline;
pub mod samples;
pub mod snapshot;
pub mod vector;

pub use config::{ModelsConfig, PathsConfig, RunConfig};
pub use error::{AlcdError, Result};
pub use evaluation::{ClassificationMetrics, ConfusionMatrix, IterationReport, KFoldSummary};
pub use expand::{HalfExtent, RegionExpander};
pub use external::{
    create_classifier, Classifier, ClassifierMethod, CommandRunner, OtbRasterEngine, RasterEngine,
    ScikitSettings, SystemRunner,
};
pub use layout::{Artifacts, RunLayout};
pub use partition::{KFoldSplitter, PartitionResult, ProportionType, StratifiedSplitter};
pub use pipeline::{
    Collaborators, ConfigSources, IterationState, Orchestrator, RunState, Stage, StageOutcome,
};
pub use samples::{Sample, SampleStore};
pub use snapshot::IterationSnapshot;
pub use vector::{FileVectorStore, GeoJsonStore, VectorStore};
