//! Semi-supervised, cross validated re-scoring of peak groups.
//!
//! Decoys are known negatives, targets are an unknown mix of true and false
//! detections. Every iteration, for every fold `f`:
//!
//! 1. All decoys outside `f` plus the best scoring targets outside `f` form a
//!    confidently labelled training set.
//! 2. A fresh classifier is trained on that set.
//! 3. The classifier re-scores the rows of fold `f`, which it never saw.
//!
//! So the final score of every row comes from a model that was not trained on
//! its fold, the same held-out idea as the cross validated booster this
//! grew out of.

use std::borrow::Cow;

use rayon::prelude::*;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
    warn,
};

use crate::errors::{
    Result,
    ScoringError,
    check_finite,
};
use crate::folds::FoldAssignment;
use crate::ml::{
    Classifier,
    ClassifierFactory,
    FeatureMatrix,
};
use crate::normalize::{
    QuantileTransform,
    normalize_scores,
};
use crate::table::{
    PeakGroupTable,
    TargetDecoy,
};

/// Standard deviations below this are treated as zero when standardizing.
const MIN_DECOY_STD: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LearnerConfig {
    /// Feature used as the initial ranking.
    pub primary_feature: String,
    pub num_iterations: usize,
    /// Fraction of the targets (ranked by current score) used as positives.
    pub confident_target_fraction: f64,
    /// Folds with fewer confident rows than this keep their previous scores.
    pub min_training_rows: usize,
    /// Stop once the confident sets stop changing between iterations.
    pub early_stop: bool,
    /// Center (and scale) each fold's scores on its classifier's training decoys.
    pub standardize_on_decoys: bool,
    /// Keep every superseded score column in the output.
    pub keep_history: bool,
    /// Quantile normalize scores across runs after every iteration.
    pub normalize_between_iterations: bool,
    /// Features handed to the classifier, all of them when unset.
    pub features: Option<Vec<String>>,
}

impl Default for LearnerConfig {
    fn default() -> Self {
        Self {
            primary_feature: "main_var_xx_swath_prelim_score".to_string(),
            num_iterations: 10,
            confident_target_fraction: 0.15,
            min_training_rows: 10,
            early_stop: false,
            standardize_on_decoys: true,
            keep_history: false,
            normalize_between_iterations: false,
            features: None,
        }
    }
}

impl LearnerConfig {
    pub fn validate(&self) -> Result<()> {
        if self.num_iterations == 0 {
            return Err(ScoringError::config("at least one learner iteration is needed"));
        }
        if !(self.confident_target_fraction > 0.0 && self.confident_target_fraction <= 1.0) {
            return Err(ScoringError::config(format!(
                "confident_target_fraction must be in (0, 1], got {}",
                self.confident_target_fraction
            )));
        }
        if self.min_training_rows < 2 {
            return Err(ScoringError::config(format!(
                "min_training_rows must be at least 2, got {}",
                self.min_training_rows
            )));
        }
        if let Some(features) = &self.features {
            if features.is_empty() {
                return Err(ScoringError::config("empty training feature list"));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct IterationRecord {
    pub iteration: usize,
    pub trained_folds: Vec<u8>,
    pub skipped_folds: Vec<u8>,
    /// Confident targets summed over the training sets of all folds.
    pub confident_targets: usize,
    /// Scores produced by this iteration, only kept with `keep_history`.
    pub scores: Option<Vec<f64>>,
}

#[derive(Debug, Clone)]
pub struct LearnerOutput {
    /// Input table with the final `score` column.
    pub table: PeakGroupTable,
    pub iterations: Vec<IterationRecord>,
    /// Recoverable problems, [`ScoringError::InsufficientData`] for skipped folds.
    pub warnings: Vec<ScoringError>,
    /// Whether the loop stopped early because the confident sets settled.
    pub converged: bool,
}

enum FoldResult {
    Scored(Vec<f64>),
    Skipped(ScoringError),
}

pub struct SemiSupervisedLearner<'a> {
    config: LearnerConfig,
    normalizer: Option<&'a dyn QuantileTransform>,
}

impl<'a> SemiSupervisedLearner<'a> {
    pub fn new(config: LearnerConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            normalizer: None,
        })
    }

    /// Transform used when `normalize_between_iterations` is set.
    pub fn with_normalizer(mut self, normalizer: &'a dyn QuantileTransform) -> Self {
        self.normalizer = Some(normalizer);
        self
    }

    pub fn config(&self) -> &LearnerConfig {
        &self.config
    }

    /// Runs the configured number of iterations.
    pub fn fit<F: ClassifierFactory>(
        &self,
        table: &PeakGroupTable,
        folds: &FoldAssignment,
        classifier_factory: &F,
    ) -> Result<LearnerOutput> {
        self.fit_score(table, folds, self.config.num_iterations, classifier_factory)
    }

    pub fn fit_score<F: ClassifierFactory>(
        &self,
        table: &PeakGroupTable,
        folds: &FoldAssignment,
        num_iterations: usize,
        classifier_factory: &F,
    ) -> Result<LearnerOutput> {
        if num_iterations == 0 {
            return Err(ScoringError::config("at least one learner iteration is needed"));
        }
        let flag = self.config.normalize_between_iterations;
        let iteration_normalizer = match (flag, self.normalizer) {
            (false, _) => None,
            (true, Some(transform)) => Some(transform),
            (true, None) => {
                return Err(ScoringError::config(
                    "normalize_between_iterations is set but no quantile transform was given",
                ));
            }
        };
        if table.num_decoys() == 0 {
            return Err(ScoringError::InsufficientDecoys);
        }
        let primary = table.feature_index(&self.config.primary_feature).ok_or_else(|| {
            ScoringError::config(format!(
                "primary feature '{}' is not in the table",
                self.config.primary_feature
            ))
        })?;
        let feature_table: Cow<'_, PeakGroupTable> = match &self.config.features {
            Some(names) => Cow::Owned(table.select_features(names)?),
            None => Cow::Borrowed(table),
        };
        let row_folds = folds.row_folds(table)?;

        let mut fold_rows: Vec<Vec<usize>> = vec![Vec::new(); folds.n_folds() as usize];
        for (i, &f) in row_folds.iter().enumerate() {
            fold_rows[f as usize].push(i);
        }

        let mut scores: Vec<f64> = (0..table.nrows())
            .map(|i| table.features_row(i)[primary])
            .collect();
        check_finite(&scores, "primary feature")?;

        info!(
            "Starting semi-supervised scoring of {} peak groups ({} decoys) over {} folds",
            table.nrows(),
            table.num_decoys(),
            folds.n_folds()
        );

        let run_partitions = table.run_partitions();
        let mut records = Vec::with_capacity(num_iterations);
        let mut warnings = Vec::new();
        let mut previous_selection: Option<Vec<Vec<usize>>> = None;
        let mut converged = false;

        for iteration in 0..num_iterations {
            let selection: Vec<Vec<usize>> = (0..folds.n_folds())
                .map(|f| self.confident_rows(table.decoys(), &row_folds, &scores, f))
                .collect();

            if self.config.early_stop && previous_selection.as_ref() == Some(&selection) {
                info!(
                    "Confident sets unchanged, stopping after {} iterations",
                    iteration
                );
                converged = true;
                break;
            }

            // Barrier: every fold finishes before scores are replaced.
            let results = (0..folds.n_folds())
                .into_par_iter()
                .map(|f| {
                    self.fit_fold(
                        &feature_table,
                        &selection[f as usize],
                        &fold_rows[f as usize],
                        f,
                        iteration,
                        classifier_factory,
                    )
                })
                .collect::<Result<Vec<FoldResult>>>()?;

            let mut new_scores = scores.clone();
            let mut trained_folds = Vec::new();
            let mut skipped_folds = Vec::new();
            for (f, result) in results.into_iter().enumerate() {
                match result {
                    FoldResult::Scored(preds) => {
                        for (&row, pred) in fold_rows[f].iter().zip(preds) {
                            new_scores[row] = pred;
                        }
                        trained_folds.push(f as u8);
                    }
                    FoldResult::Skipped(warning) => {
                        warn!("{}, keeping previous scores", warning);
                        warnings.push(warning);
                        skipped_folds.push(f as u8);
                    }
                }
            }

            if let Some(transform) = iteration_normalizer.filter(|_| run_partitions.len() > 1) {
                new_scores = normalize_scores(&run_partitions, &new_scores, transform)?;
            }

            let confident_targets = selection
                .iter()
                .flatten()
                .filter(|&&r| !table.decoys()[r])
                .count();
            debug!(
                "Iteration {}: trained folds {:?}, skipped folds {:?}, {} confident targets",
                iteration, trained_folds, skipped_folds, confident_targets
            );

            records.push(IterationRecord {
                iteration,
                trained_folds,
                skipped_folds,
                confident_targets,
                scores: self.config.keep_history.then(|| new_scores.clone()),
            });
            scores = new_scores;
            previous_selection = Some(selection);
        }

        info!(
            "Finished scoring after {} iterations with {} warnings",
            records.len(),
            warnings.len()
        );

        Ok(LearnerOutput {
            table: table.clone().with_scores(scores)?,
            iterations: records,
            warnings,
            converged,
        })
    }

    /// Training rows for fold `fold`: every decoy outside the fold plus the top
    /// fraction of the targets outside the fold. Targets tied with the last
    /// selected score are kept too. Sorted by row index.
    fn confident_rows(
        &self,
        decoys: &[bool],
        row_folds: &[u8],
        scores: &[f64],
        fold: u8,
    ) -> Vec<usize> {
        let outside = (0..decoys.len()).filter(|&i| row_folds[i] != fold);
        let (mut out, mut targets): (Vec<usize>, Vec<usize>) = outside.partition(|&i| decoys[i]);

        if !targets.is_empty() {
            targets.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
            let wanted = targets.len() as f64 * self.config.confident_target_fraction;
            let ncut = (wanted.ceil() as usize).clamp(1, targets.len());
            let boundary = scores[targets[ncut - 1]];
            out.extend(targets.into_iter().take_while(|&i| scores[i] >= boundary));
        }

        out.sort_unstable();
        out
    }

    fn fit_fold<F: ClassifierFactory>(
        &self,
        feature_table: &PeakGroupTable,
        training_rows: &[usize],
        scoring_rows: &[usize],
        fold: u8,
        iteration: usize,
        classifier_factory: &F,
    ) -> Result<FoldResult> {
        let labels: Vec<TargetDecoy> = training_rows
            .iter()
            .map(|&r| TargetDecoy::from_is_decoy(feature_table.decoys()[r]))
            .collect();
        let ntargets = labels.iter().filter(|&&l| l == TargetDecoy::Target).count();
        let ndecoys = labels.len() - ntargets;

        if training_rows.len() < self.config.min_training_rows || ntargets == 0 || ndecoys == 0 {
            return Ok(FoldResult::Skipped(ScoringError::InsufficientData {
                fold,
                iteration,
                rows: training_rows.len(),
                required: self.config.min_training_rows,
            }));
        }

        let train_features = FeatureMatrix::from_table_rows(feature_table, training_rows);
        let model = classifier_factory.train(&train_features, &labels)?;

        let context = format!("fold {} iteration {}", fold, iteration);
        let mut preds = model.predict(&FeatureMatrix::from_table_rows(feature_table, scoring_rows));
        if preds.len() != scoring_rows.len() {
            return Err(ScoringError::Classifier {
                msg: format!(
                    "{} predictions for {} rows in {}",
                    preds.len(),
                    scoring_rows.len(),
                    context
                ),
            });
        }
        check_finite(&preds, &context)?;

        if self.config.standardize_on_decoys {
            let train_preds = model.predict(&train_features);
            check_finite(&train_preds, &context)?;
            let decoy_preds: Vec<f64> = train_preds
                .iter()
                .zip(labels.iter())
                .filter(|(_, l)| **l == TargetDecoy::Decoy)
                .map(|(p, _)| *p)
                .collect();
            let (mean, std) = mean_std(&decoy_preds);
            let scale = if std > MIN_DECOY_STD { std } else { 1.0 };
            preds.iter_mut().for_each(|p| *p = (*p - mean) / scale);
            check_finite(&preds, &context)?;
        }

        debug!(
            "Fold {} iteration {}: trained on {} targets and {} decoys, scored {} rows",
            fold,
            iteration,
            ntargets,
            ndecoys,
            scoring_rows.len()
        );
        Ok(FoldResult::Scored(preds))
    }
}

/// Convenience wrapper over [`SemiSupervisedLearner::fit_score`].
pub fn fit_score<F: ClassifierFactory>(
    table: &PeakGroupTable,
    folds: &FoldAssignment,
    num_iterations: usize,
    classifier_factory: &F,
    config: LearnerConfig,
) -> Result<LearnerOutput> {
    SemiSupervisedLearner::new(config)?.fit_score(table, folds, num_iterations, classifier_factory)
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if values.len() < 2 {
        return (mean, 0.0);
    }
    let var = values.iter().map(|x| (x - mean).powi(2)).sum::<f64>() / (n - 1.0);
    (mean, var.sqrt())
}
