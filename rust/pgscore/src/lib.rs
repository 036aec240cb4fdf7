pub mod errors;
pub mod folds;
pub mod learner;
pub mod ml;
pub mod normalize;
pub mod pipeline;
pub mod stats;
pub mod table;

pub use errors::{
    Result,
    ScoringError,
};
pub use folds::{
    FoldAssignment,
    FoldConfig,
    assign_folds,
};
pub use learner::{
    LearnerConfig,
    LearnerOutput,
    SemiSupervisedLearner,
    fit_score,
};
pub use ml::{
    Classifier,
    ClassifierConfig,
    ClassifierFactory,
    FeatureMatrix,
};
pub use normalize::{
    QuantileTransform,
    ReferenceQuantileTransform,
    normalize,
};
pub use pipeline::{
    PipelineOutput,
    ScoringConfig,
    ScoringPipeline,
};
pub use stats::{
    ErrorStatistics,
    ErrorStatisticsConfig,
    ErrorStatisticsEstimator,
    Pi0Method,
    estimate,
};
pub use table::{
    PeakGroupTable,
    TargetDecoy,
};
