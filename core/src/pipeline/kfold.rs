//! K-fold cross-validation over the current labels

use super::{Orchestrator, Stage};
use crate::error::Result;
use crate::evaluation::{IterationReport, KFoldSummary};
use crate::partition::KFoldSplitter;
use crate::snapshot;
use std::fs;
use tracing::{info, warn};

impl Orchestrator {
    /// Split the labels once into K folds and run features, model,
    /// evaluation and contours for each of them.
    ///
    /// Fold layers and per-fold outputs are kept in `Statistics/K_fold_<k>`.
    /// Without `force`, an existing summary with all its fold directories is
    /// returned as is. A failing fold stops the run; earlier folds stay on
    /// disk.
    pub fn run_kfold(
        &mut self,
        force: bool,
        on_fold: &mut dyn FnMut(usize, usize),
    ) -> Result<KFoldSummary> {
        let k = self.config().training_parameters.kfold;
        let summary_path = self.artifacts().kfold_summary.clone();
        if !force
            && summary_path.exists()
            && (0..k).all(|fold| self.layout().kfold_dir(fold).is_dir())
        {
            info!(folds = k, "K-fold outputs already present");
            return KFoldSummary::load(&summary_path);
        }

        let mut state = self.state()?;
        if state.iteration_finished() {
            self.start_new_iteration(&mut state)?;
            self.save_state(&state)?;
        }
        self.check_inputs(Stage::Split)?;
        snapshot::purge_kfold_dirs(self.layout())?;

        let store = self.load_samples()?;
        let splitter = KFoldSplitter::new(k)?;
        info!(folds = k, seed = self.seed(), samples = store.len(), "Splitting samples into folds");
        let partition = splitter.k_split(&store, &mut self.rng);
        for warning in &partition.warnings {
            warn!(%warning, "Degenerate class in K-fold split");
        }

        let training_name = file_name(&self.artifacts().training);
        let validation_name = file_name(&self.artifacts().validation);
        for (fold, split) in partition.iter().enumerate() {
            let dir = self.layout().kfold_dir(fold);
            fs::create_dir_all(&dir)?;
            store.write(self.vectors(), &split.train, &dir.join(&training_name))?;
            store.write(self.vectors(), &split.validation, &dir.join(&validation_name))?;
        }

        let mut fold_metrics = Vec::with_capacity(partition.k());
        for (fold, split) in partition.iter().enumerate() {
            info!(fold, folds = partition.k(), "Running fold");
            self.materialize_split(&store, &split.train, &split.validation)?;
            self.write_split_report(
                IterationReport::new(state.iteration)
                    .with_fold(fold)
                    .with_seed(self.seed()),
                &store,
                &split.train,
                &split.validation,
                partition.warnings.clone(),
            )?;

            // Image statistics only depend on the scene
            self.run_features(force && fold == 0)?;
            self.run_model()?;
            fold_metrics.push(self.run_evaluate(state.iteration)?);
            self.run_contour()?;

            let dir = self.layout().kfold_dir(fold);
            for output in self.artifacts().fold_outputs() {
                if output.exists() {
                    fs::copy(output, dir.join(file_name(output)))?;
                }
            }
            on_fold(fold + 1, partition.k());
        }

        let summary = KFoldSummary::from_folds(&fold_metrics);
        summary.save(&summary_path)?;
        info!(summary = %summary.summary(), "K-fold done");

        for stage in Stage::ITERATION {
            state.mark_completed(stage);
        }
        state.seed = Some(self.seed());
        state.await_review();
        self.save_state(&state)?;
        Ok(summary)
    }
}

fn file_name(path: &std::path::Path) -> std::ffi::OsString {
    path.file_name().map(|n| n.to_os_string()).unwrap_or_default()
}
