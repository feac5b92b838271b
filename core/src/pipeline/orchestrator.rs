use super::{IterationState, Stage, StageOutcome};
use crate::config::{ModelsConfig, RunConfig};
use crate::error::{AlcdError, Result};
use crate::evaluation::{ClassificationMetrics, ConfusionMatrix, IterationReport};
use crate::expand::RegionExpander;
use crate::external::{band_count, Classifier, PredictJob, RasterEngine, RasterJob, RasterOp, TrainJob};
use crate::layout::{Artifacts, RunLayout};
use crate::partition::{DegenerateClass, StratifiedSplitter};
use crate::samples::{SampleStore, CLASS_FIELD, EXPAND_FIELD};
use crate::snapshot::{self, IterationSnapshot};
use crate::vector::{merge_layers, remove_dataset, GeometryType, VectorLayer, VectorStore};
use rand::rngs::StdRng;
use rand::SeedableRng;
use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Tolerance used to simplify the no-data polygons, in map units
const NO_DATA_SIMPLIFY_TOLERANCE: f64 = 100.0;
/// Median filter radius applied to the confidence map
const CONFIDENCE_MEDIAN_RADIUS: u32 = 5;

/// On-disk configuration documents the run was started from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigSources {
    pub global_parameters: PathBuf,
    pub paths_parameters: PathBuf,
}

/// Out-of-process collaborators used by the stages
pub struct Collaborators {
    pub vectors: Box<dyn VectorStore>,
    pub raster: Box<dyn RasterEngine>,
    pub classifier: Box<dyn Classifier>,
}

/// Drives the stages of one run directory.
///
/// At most one orchestrator should operate on a run directory at a time;
/// nothing is locked.
pub struct Orchestrator {
    config: RunConfig,
    models: ModelsConfig,
    sources: ConfigSources,
    layout: RunLayout,
    artifacts: Artifacts,
    tools: Collaborators,
    pub(super) rng: StdRng,
    seed: u64,
}

impl Orchestrator {
    /// Create an orchestrator for an initialized configuration. The random
    /// source is seeded from system entropy; see [`Orchestrator::with_seed`].
    pub fn new(
        config: RunConfig,
        models: ModelsConfig,
        sources: ConfigSources,
        tools: Collaborators,
    ) -> Result<Self> {
        config.validate()?;
        let layout = RunLayout::new(config.main_dir()?);
        let artifacts = Artifacts::resolve(&layout, &config);
        let seed = rand::random::<u64>();
        Ok(Self {
            config,
            models,
            sources,
            layout,
            artifacts,
            tools,
            rng: StdRng::seed_from_u64(seed),
            seed,
        })
    }

    /// Use a fixed seed for every split made by this orchestrator
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn config(&self) -> &RunConfig {
        &self.config
    }

    pub fn layout(&self) -> &RunLayout {
        &self.layout
    }

    pub fn artifacts(&self) -> &Artifacts {
        &self.artifacts
    }

    pub(crate) fn vectors(&self) -> &dyn VectorStore {
        self.tools.vectors.as_ref()
    }

    pub fn state(&self) -> Result<IterationState> {
        IterationState::load(&self.layout.state_file())
    }

    pub(crate) fn save_state(&self, state: &IterationState) -> Result<()> {
        state.save(&self.layout.state_file())
    }

    /// Run one stage.
    ///
    /// Without `force`, a stage that already completed in this iteration and
    /// whose outputs exist is skipped. Asking for `split` once every stage of
    /// the iteration has completed starts the next iteration: the working
    /// directories are snapshotted and stale K-fold directories removed
    /// first. `contour` hands control back to the user.
    pub fn run_stage(&mut self, stage: Stage, force: bool) -> Result<StageOutcome> {
        let mut state = self.state()?;

        if stage == Stage::Split && state.iteration_finished() {
            self.start_new_iteration(&mut state)?;
            self.save_state(&state)?;
        }

        if !force && state.is_completed(stage) && self.outputs_present(stage) {
            info!(stage = %stage, iteration = state.iteration, "Outputs already present");
            return Ok(StageOutcome::AlreadyPresent);
        }

        self.check_inputs(stage)?;
        info!(stage = %stage, step = stage.number(), iteration = state.iteration, force, "Running stage");

        match stage {
            Stage::Layers => self.run_layers(force)?,
            Stage::Split => {
                self.run_split(state.iteration)?;
                state.seed = Some(self.seed);
            }
            Stage::Features => self.run_features(force)?,
            Stage::Model => self.run_model()?,
            Stage::Evaluate => {
                self.run_evaluate(state.iteration)?;
            }
            Stage::Contour => self.run_contour()?,
        }

        state.mark_completed(stage);
        if stage == Stage::Contour {
            state.await_review();
        }
        self.save_state(&state)?;
        Ok(StageOutcome::Completed)
    }

    /// Stages `split` to `contour`, then hand control back to the user.
    ///
    /// An iteration left incomplete by a failure is resumed: stages already
    /// completed are skipped. A new iteration starts only once the current
    /// one has run to `contour`.
    pub fn run_iteration(&mut self, force: bool) -> Result<Vec<(Stage, StageOutcome)>> {
        let mut outcomes = Vec::with_capacity(Stage::ITERATION.len());
        for stage in Stage::ITERATION {
            outcomes.push((stage, self.run_stage(stage, force)?));
        }
        let mut state = self.state()?;
        state.await_review();
        self.save_state(&state)?;
        Ok(outcomes)
    }

    pub fn snapshots(&self) -> Result<Vec<IterationSnapshot>> {
        snapshot::list(&self.layout)
    }

    /// Snapshot the working directories without changing iteration
    pub fn take_snapshot(&self) -> Result<IterationSnapshot> {
        let taken = snapshot::take(&self.layout)?;
        let mut state = self.state()?;
        state.snapshots.push(taken.id);
        self.save_state(&state)?;
        Ok(taken)
    }

    /// Bring back snapshot `id`.
    ///
    /// Split layers are not part of a snapshot, so the current ones are
    /// removed and only `layers` stays completed. The next iteration
    /// re-splits the labels.
    pub fn restore_snapshot(&self, id: u32) -> Result<IterationSnapshot> {
        let restored = snapshot::restore(&self.layout, id)?;
        let a = &self.artifacts;
        for stale in [
            &a.merged,
            &a.training,
            &a.validation,
            &a.training_extended,
            &a.validation_extended,
        ] {
            remove_dataset(stale)?;
        }

        let mut state = self.state()?;
        state.completed.clear();
        if self.outputs_present(Stage::Layers) {
            state.completed.push(Stage::Layers);
        }
        state.await_review();
        self.save_state(&state)?;
        Ok(restored)
    }

    pub(crate) fn start_new_iteration(&self, state: &mut IterationState) -> Result<()> {
        let taken = snapshot::take(&self.layout)?;
        snapshot::purge_kfold_dirs(&self.layout)?;
        state.begin_next_iteration(taken.id);
        info!(iteration = state.iteration, snapshot = taken.id, "Starting new iteration");
        Ok(())
    }

    fn required_inputs(&self, stage: Stage) -> Vec<&Path> {
        let a = &self.artifacts;
        match stage {
            Stage::Layers => vec![
                self.sources.global_parameters.as_path(),
                self.sources.paths_parameters.as_path(),
            ],
            Stage::Split => vec![a.raw_image.as_path(), a.no_data_mask.as_path()],
            Stage::Features => vec![
                a.raw_image.as_path(),
                a.training_extended.as_path(),
                a.no_data_mask_raster.as_path(),
            ],
            Stage::Model => vec![
                a.samples_extracted.as_path(),
                a.image_statistics.as_path(),
                a.raw_image.as_path(),
                a.no_data_mask_raster.as_path(),
            ],
            Stage::Evaluate => vec![a.regularized.as_path(), a.validation_extended.as_path()],
            Stage::Contour => vec![a.regularized.as_path(), a.raw_image.as_path()],
        }
    }

    fn outputs(&self, stage: Stage) -> Vec<&Path> {
        let a = &self.artifacts;
        match stage {
            Stage::Layers => {
                let mut paths = vec![
                    a.raw_image.as_path(),
                    a.no_data_mask.as_path(),
                    a.used_global_parameters.as_path(),
                ];
                paths.extend(a.class_layers.iter().map(|l| l.path.as_path()));
                paths
            }
            Stage::Split => vec![
                a.merged.as_path(),
                a.training.as_path(),
                a.validation.as_path(),
                a.training_extended.as_path(),
                a.validation_extended.as_path(),
                a.no_data_mask_raster.as_path(),
            ],
            Stage::Features => vec![
                a.image_statistics.as_path(),
                a.class_statistics.as_path(),
                a.samples_location.as_path(),
                a.samples_extracted.as_path(),
            ],
            Stage::Model => vec![
                a.model.as_path(),
                a.labeled.as_path(),
                a.confidence.as_path(),
                a.regularized.as_path(),
            ],
            Stage::Evaluate => vec![
                a.confusion_matrix.as_path(),
                a.model_metrics.as_path(),
                a.iteration_report.as_path(),
            ],
            Stage::Contour => vec![a.contours.as_path(), a.contour_overlay.as_path()],
        }
    }

    fn outputs_present(&self, stage: Stage) -> bool {
        self.outputs(stage).iter().all(|p| p.exists())
    }

    pub(crate) fn check_inputs(&self, stage: Stage) -> Result<()> {
        match self.required_inputs(stage).into_iter().find(|p| !p.exists()) {
            Some(missing) => Err(AlcdError::missing(stage.name(), missing)),
            None => Ok(()),
        }
    }

    fn raster(&self, op: RasterOp, inputs: &[&Path], output: &Path) -> Result<()> {
        let job = RasterJob::new(op, inputs.iter().map(|p| p.to_path_buf()).collect(), output);
        self.tools.raster.run(&job)
    }

    /// Relative color table paths are taken from the global parameters' directory
    fn color_table(&self) -> Option<PathBuf> {
        let table = self.config.color_tables.get("otb")?;
        if table.is_absolute() {
            return Some(table.clone());
        }
        let base = self
            .sources
            .global_parameters
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_default();
        Some(base.join(table))
    }

    fn run_layers(&self, force: bool) -> Result<()> {
        let a = &self.artifacts;
        let created = self.layout.create_directories()?;
        info!(main_dir = %self.layout.main_dir().display(), created = created.len(), "Run directory ready");

        fs::copy(&self.sources.global_parameters, &a.used_global_parameters)?;

        if force || !a.raw_image.exists() {
            self.raster(
                RasterOp::ComposeFeatures {
                    global_parameters: self.sources.global_parameters.clone(),
                    paths_parameters: self.sources.paths_parameters.clone(),
                    no_data_mask: a.no_data_raster.clone(),
                },
                &[],
                &a.raw_image,
            )?;
        }

        let srs = self.tools.raster.spatial_ref(&a.raw_image)?;
        let empty = VectorLayer::new(
            srs,
            GeometryType::Point,
            vec![CLASS_FIELD.to_string(), EXPAND_FIELD.to_string()],
        );
        // Class layers hold the user's labels and are never overwritten
        for layer in &a.class_layers {
            if layer.path.exists() {
                info!(layer = %layer.name, "Keeping existing class layer");
                continue;
            }
            self.tools.vectors.write(&layer.path, &empty)?;
            info!(layer = %layer.name, path = %layer.path.display(), "Created empty class layer");
        }

        if force || !a.no_data_mask.exists() {
            self.raster(RasterOp::Polygonize, &[&a.no_data_raster], &a.no_data_raw)?;
            self.raster(
                RasterOp::Simplify {
                    tolerance: NO_DATA_SIMPLIFY_TOLERANCE,
                },
                &[&a.no_data_raw],
                &a.no_data_mask,
            )?;
        }

        info!(masks = %self.layout.masks_dir().display(), "Edit the class layers before the first iteration");
        Ok(())
    }

    /// Merge the class layers into a sample store
    pub(crate) fn load_samples(&self) -> Result<SampleStore> {
        let a = &self.artifacts;
        let merged = merge_layers(self.vectors(), &a.class_layers, &a.merged)?;
        let store = SampleStore::from_layer(merged, &a.merged)?;
        if store.is_empty() {
            warn!("No labelled samples in the class layers");
        }
        Ok(store)
    }

    fn run_split(&mut self, iteration: u32) -> Result<()> {
        let store = self.load_samples()?;
        let tp = &self.config.training_parameters;
        let splitter =
            StratifiedSplitter::new(tp.training_proportion)?.with_proportion_type(tp.proportion_type);

        info!(seed = self.seed, iteration, samples = store.len(), "Splitting samples");
        let partition = splitter.split(&store, &mut self.rng);
        self.materialize_split(&store, &partition.train, &partition.validation)?;

        self.write_split_report(
            IterationReport::new(iteration).with_seed(self.seed),
            &store,
            &partition.train,
            &partition.validation,
            partition.warnings,
        )
    }

    pub(crate) fn write_split_report(
        &self,
        mut report: IterationReport,
        store: &SampleStore,
        train: &BTreeSet<u64>,
        validation: &BTreeSet<u64>,
        warnings: Vec<DegenerateClass>,
    ) -> Result<()> {
        report.record_split(store.class_counts_of(train), store.class_counts_of(validation), warnings);
        report.save(&self.artifacts.iteration_report)
    }

    /// Write the point and region layers of a split and rasterize the
    /// no-data mask
    pub(crate) fn materialize_split(
        &self,
        store: &SampleStore,
        train: &BTreeSet<u64>,
        validation: &BTreeSet<u64>,
    ) -> Result<()> {
        let a = &self.artifacts;
        let vectors = self.vectors();
        store.write(vectors, train, &a.training)?;
        store.write(vectors, validation, &a.validation)?;

        let expander = RegionExpander::new(
            self.config.default_extent(),
            self.config.training_parameters.expansion_distance,
        )?;
        expander
            .expand(&store.subset(train))
            .write_all(vectors, &a.training_extended)?;
        expander
            .expand(&store.subset(validation))
            .write_all(vectors, &a.validation_extended)?;

        self.raster(
            RasterOp::Rasterize {
                reference: a.raw_image.clone(),
            },
            &[&a.no_data_mask],
            &a.no_data_mask_raster,
        )
    }

    pub(crate) fn run_features(&self, force: bool) -> Result<()> {
        let a = &self.artifacts;
        if force || !a.image_statistics.exists() {
            self.raster(RasterOp::ImageStatistics, &[&a.raw_image], &a.image_statistics)?;
        }
        self.raster(
            RasterOp::ClassStatistics {
                mask: a.no_data_mask_raster.clone(),
            },
            &[&a.raw_image, &a.training_extended],
            &a.class_statistics,
        )?;
        self.raster(
            RasterOp::SampleSelection {
                mask: a.no_data_mask_raster.clone(),
                class_statistics: a.class_statistics.clone(),
                rates: a.sampling_rates.clone(),
                strategy: self.config.sampling_strategy()?,
            },
            &[&a.raw_image, &a.training_extended],
            &a.samples_location,
        )?;
        self.raster(
            RasterOp::SampleExtraction,
            &[&a.raw_image, &a.samples_location],
            &a.samples_extracted,
        )
    }

    pub(crate) fn run_model(&self) -> Result<()> {
        let a = &self.artifacts;
        let bands = band_count(&fs::read_to_string(&a.image_statistics)?)?;
        if bands == 0 {
            return Err(AlcdError::config(format!(
                "image statistics {} describe no band",
                a.image_statistics.display()
            )));
        }
        let features: Vec<String> = (0..bands).map(|i| format!("band_{}", i)).collect();
        let method = self.config.method()?;
        let hyperparameters = self.models.hyperparameters(&method);

        self.tools.classifier.train(&TrainJob {
            samples: &a.samples_extracted,
            image_statistics: &a.image_statistics,
            features: &features,
            hyperparameters: &hyperparameters,
            model_out: &a.model,
        })?;
        self.tools.classifier.predict(&PredictJob {
            model: &a.model,
            image: &a.raw_image,
            image_statistics: &a.image_statistics,
            mask: &a.no_data_mask_raster,
            labels_out: &a.labeled,
            confidence_out: &a.confidence,
        })?;

        self.raster(
            RasterOp::ConfidenceEnhance {
                radius: CONFIDENCE_MEDIAN_RADIUS,
            },
            &[&a.confidence],
            &a.confidence_enhanced,
        )?;
        self.raster(
            RasterOp::Regularize {
                radius: self.config.training_parameters.regularization_radius,
            },
            &[&a.labeled],
            &a.regularized,
        )
    }

    pub(crate) fn run_evaluate(&self, iteration: u32) -> Result<ClassificationMetrics> {
        let a = &self.artifacts;
        self.raster(
            RasterOp::ConfusionMatrix {
                reference: a.validation_extended.clone(),
            },
            &[&a.regularized],
            &a.confusion_matrix,
        )?;

        match self.color_table() {
            Some(lut) => self.raster(RasterOp::ColorMapping { lut }, &[&a.regularized], &a.colorized)?,
            None => warn!("No `otb` color table configured, skipping the colorized map"),
        }

        let metrics = ConfusionMatrix::load(&a.confusion_matrix)?.metrics();
        metrics.save_csv(&a.model_metrics)?;

        let mut report = if a.iteration_report.exists() {
            IterationReport::load(&a.iteration_report)?
        } else {
            IterationReport::new(iteration)
        };
        report.finalize(metrics.clone());
        report.save(&a.iteration_report)?;
        info!(iteration, summary = %report.summary(), "Evaluation done");
        Ok(metrics)
    }

    pub(crate) fn run_contour(&self) -> Result<()> {
        let a = &self.artifacts;
        self.raster(
            RasterOp::Contours {
                dilatation_radius: self.config.training_parameters.dilatation_radius,
            },
            &[&a.regularized],
            &a.contours,
        )?;
        self.raster(
            RasterOp::ContourOverlay {
                contours: a.contours.clone(),
            },
            &[&a.raw_image],
            &a.contour_overlay,
        )
    }
}
