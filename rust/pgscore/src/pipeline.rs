//! End to end scoring: folds, semi-supervised learning, optional cross-run
//! normalization and error statistics.

use std::time::Instant;

use serde::{
    Deserialize,
    Serialize,
};
use tracing::info;

use crate::errors::{
    Result,
    ScoringError,
};
use crate::folds::{
    FoldConfig,
    assign_folds,
};
use crate::learner::{
    IterationRecord,
    LearnerConfig,
    SemiSupervisedLearner,
};
use crate::ml::{
    ClassifierConfig,
    ClassifierFactory,
};
use crate::normalize::{
    NormalizationConfig,
    QuantileTransform,
    ReferenceQuantileTransform,
    normalize,
};
use crate::stats::{
    ErrorStatistics,
    ErrorStatisticsConfig,
    ErrorStatisticsEstimator,
};
use crate::table::PeakGroupTable;

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoringConfig {
    pub folds: FoldConfig,
    pub learner: LearnerConfig,
    pub classifier: ClassifierConfig,
    pub error_statistics: ErrorStatisticsConfig,
    pub normalization: NormalizationConfig,
}

impl ScoringConfig {
    pub fn validate(&self) -> Result<()> {
        self.folds.validate()?;
        self.learner.validate()?;
        self.classifier.validate()?;
        self.error_statistics.validate()?;
        if self.learner.normalize_between_iterations && !self.normalization.enabled {
            return Err(ScoringError::config(
                "normalize_between_iterations needs normalization to be enabled",
            ));
        }
        Ok(())
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let config: ScoringConfig = serde_json::from_str(json)
            .map_err(|e| ScoringError::config(format!("unable to parse scoring config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| ScoringError::config(format!("unable to serialize scoring config: {}", e)))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineOutput {
    /// Input table with `score`, `q_value` and `p_value` (and `pep`) attached.
    pub table: PeakGroupTable,
    pub statistics: ErrorStatistics,
    pub iterations: Vec<IterationRecord>,
    pub warnings: Vec<ScoringError>,
    pub converged: bool,
}

#[derive(Debug, Clone)]
pub struct ScoringPipeline {
    config: ScoringConfig,
}

impl ScoringPipeline {
    pub fn new(config: ScoringConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ScoringConfig {
        &self.config
    }

    /// Runs with the configured classifier and the bundled quantile transform.
    pub fn run(&self, table: &PeakGroupTable) -> Result<PipelineOutput> {
        let factory = self.config.classifier.build_factory();
        self.run_with(table, &factory, &ReferenceQuantileTransform)
    }

    pub fn run_with<F: ClassifierFactory>(
        &self,
        table: &PeakGroupTable,
        classifier_factory: &F,
        transform: &dyn QuantileTransform,
    ) -> Result<PipelineOutput> {
        let start = Instant::now();
        if table.num_decoys() == 0 {
            return Err(ScoringError::InsufficientDecoys);
        }

        let folds = assign_folds(table, self.config.folds.n_folds, self.config.folds.seed)?;
        info!(
            "Assigned {} transition groups to folds of sizes {:?}",
            folds.num_groups(),
            folds.fold_sizes()
        );

        let learner = SemiSupervisedLearner::new(self.config.learner.clone())?;
        let learner = if self.config.normalization.enabled {
            learner.with_normalizer(transform)
        } else {
            learner
        };
        let learned = learner.fit(table, &folds, classifier_factory)?;

        let scored = if self.config.normalization.enabled && table.run_partitions().len() > 1 {
            normalize(&learned.table, transform)?
        } else {
            learned.table
        };

        let estimator = ErrorStatisticsEstimator::new(self.config.error_statistics.clone())?;
        let (table, statistics) = estimator.assign(&scored)?;

        info!("Scoring pipeline finished in {:?}", start.elapsed());
        Ok(PipelineOutput {
            table,
            statistics,
            iterations: learned.iterations,
            warnings: learned.warnings,
            converged: learned.converged,
        })
    }
}
