//! Gradient boosted trees (forust) as a classifier factory.

use std::collections::HashSet;

pub use forust_ml::errors::ForustError;
pub use forust_ml::gradientbooster::{
    GrowPolicy,
    MissingNodeTreatment,
};
pub use forust_ml::objective::ObjectiveType;
pub use forust_ml::sampler::SampleMethod;
pub use forust_ml::{
    GradientBooster,
    Matrix,
};
use serde::{
    Deserialize,
    Serialize,
};

use super::{
    Classifier,
    ClassifierFactory,
    FeatureMatrix,
    check_training_input,
};
use crate::errors::{
    Result,
    ScoringError,
};
use crate::table::TargetDecoy;

impl From<ForustError> for ScoringError {
    fn from(x: ForustError) -> Self {
        ScoringError::Classifier { msg: x.to_string() }
    }
}

/// The knobs of the booster worth exposing; everything else uses the forust
/// defaults we settled on for peak group data.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GbmConfig {
    pub iterations: usize,
    pub learning_rate: f32,
    pub max_depth: usize,
    pub l2: f32,
    pub min_leaf_weight: f32,
    pub subsample: f32,
    pub seed: u64,
    pub parallel: bool,
}

impl Default for GbmConfig {
    fn default() -> Self {
        GbmConfig {
            iterations: 100,
            learning_rate: 0.3,
            max_depth: 6,
            l2: 1.,
            min_leaf_weight: 2.,
            subsample: 1.0,
            seed: 0,
            // Folds already train in parallel
            parallel: false,
        }
    }
}

impl GbmConfig {
    pub fn validate(&self) -> Result<()> {
        if self.iterations == 0 {
            return Err(ScoringError::config("gbm needs at least one iteration"));
        }
        if !(self.learning_rate > 0.0) {
            return Err(ScoringError::config(format!(
                "gbm learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return Err(ScoringError::config(format!(
                "gbm subsample must be in (0, 1], got {}",
                self.subsample
            )));
        }
        Ok(())
    }

    fn try_build(&self) -> std::result::Result<GradientBooster, ForustError> {
        let Self {
            iterations,
            learning_rate,
            max_depth,
            l2,
            min_leaf_weight,
            subsample,
            seed,
            parallel,
        } = self;

        GradientBooster::new(
            ObjectiveType::LogLoss,
            *iterations,
            *learning_rate,
            *max_depth,
            usize::MAX,
            0.,
            *l2,
            0.,
            0.,
            *min_leaf_weight,
            0.5,
            256,
            *parallel,
            true,
            None,
            *subsample,
            0.1,
            0.2,
            1.0,
            *seed,
            f64::NAN,
            false,
            SampleMethod::None,
            GrowPolicy::DepthWise,
            None,
            None,
            true,
            HashSet::new(),
            MissingNodeTreatment::AssignToParent,
            0,
            false,
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct GradientBoosting {
    config: GbmConfig,
}

impl GradientBoosting {
    pub fn new(config: GbmConfig) -> Self {
        Self { config }
    }
}

pub struct GbmModel {
    booster: GradientBooster,
    parallel: bool,
}

impl Classifier for GbmModel {
    fn predict(&self, features: &FeatureMatrix) -> Vec<f64> {
        if features.nrows() == 0 {
            return Vec::new();
        }
        // forust matrices are feature-major
        let buffer = features.to_column_major();
        let matrix = Matrix::new(buffer.as_slice(), features.nrows(), features.ncols());
        self.booster.predict(&matrix, self.parallel)
    }
}

impl ClassifierFactory for GradientBoosting {
    type Model = GbmModel;

    fn train(&self, features: &FeatureMatrix, labels: &[TargetDecoy]) -> Result<GbmModel> {
        check_training_input(features, labels)?;
        let mut booster = self.config.try_build()?;

        let buffer = features.to_column_major();
        let matrix = Matrix::new(buffer.as_slice(), features.nrows(), features.ncols());
        let response: Vec<f64> = labels.iter().map(|l| l.as_response()).collect();

        // Balance the classes, the confident target set is usually much
        // smaller than the decoy set.
        let ntargets = labels.iter().filter(|&&l| l == TargetDecoy::Target).count() as f64;
        let ndecoys = labels.len() as f64 - ntargets;
        let total = labels.len() as f64;
        let sample_weight: Vec<f64> = labels
            .iter()
            .map(|l| match l {
                TargetDecoy::Target => total / (2.0 * ntargets),
                TargetDecoy::Decoy => total / (2.0 * ndecoys),
            })
            .collect();

        booster.fit(&matrix, &response, &sample_weight, None)?;
        Ok(GbmModel {
            booster,
            parallel: self.config.parallel,
        })
    }
}
