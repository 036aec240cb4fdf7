//! Classifier capability used by the semi-supervised learner.
//!
//! The learner only needs two things from a model family: a way to train a
//! fresh model on a labelled feature matrix ([`ClassifierFactory::train`]) and
//! a way to score rows with it ([`Classifier::predict`]). Higher predictions
//! mean "more target like".

#[cfg(feature = "gbm")]
pub mod gbm;
pub mod lda;

use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::{
    Result,
    ScoringError,
};
use crate::table::{
    PeakGroupTable,
    TargetDecoy,
};

pub use lda::{
    LdaConfig,
    LinearDiscriminant,
    LinearModel,
};

/// Dense row-major feature matrix handed to classifiers.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct FeatureMatrix {
    values: Vec<f64>,
    nrows: usize,
    ncols: usize,
}

impl FeatureMatrix {
    pub fn new(values: Vec<f64>, nrows: usize, ncols: usize) -> Result<Self> {
        if values.len() != nrows * ncols {
            return Err(ScoringError::schema(format!(
                "feature matrix of {} values cannot be {} x {}",
                values.len(),
                nrows,
                ncols
            )));
        }
        Ok(Self {
            values,
            nrows,
            ncols,
        })
    }

    /// Copies the feature rows `rows` of `table`.
    pub fn from_table_rows(table: &PeakGroupTable, rows: &[usize]) -> Self {
        let ncols = table.nfeatures();
        let mut values = Vec::with_capacity(rows.len() * ncols);
        for &r in rows {
            values.extend_from_slice(table.features_row(r));
        }
        Self {
            values,
            nrows: rows.len(),
            ncols,
        }
    }

    pub fn nrows(&self) -> usize {
        self.nrows
    }

    pub fn ncols(&self) -> usize {
        self.ncols
    }

    pub fn row(&self, i: usize) -> &[f64] {
        &self.values[i * self.ncols..(i + 1) * self.ncols]
    }

    pub fn rows(&self) -> impl Iterator<Item = &[f64]> + '_ {
        (0..self.nrows).map(move |i| self.row(i))
    }

    /// Feature-major copy of the values (all rows of feature 0, then feature 1 ...).
    pub fn to_column_major(&self) -> Vec<f64> {
        let mut out = vec![0.0; self.values.len()];
        for (row_idx, row) in self.rows().enumerate() {
            for (feature_idx, v) in row.iter().enumerate() {
                out[feature_idx * self.nrows + row_idx] = *v;
            }
        }
        out
    }
}

/// A trained model.
pub trait Classifier: Send + Sync {
    /// One score per row of `features`.
    fn predict(&self, features: &FeatureMatrix) -> Vec<f64>;
}

/// Produces freshly trained [`Classifier`]s.
pub trait ClassifierFactory: Sync {
    type Model: Classifier;

    fn train(&self, features: &FeatureMatrix, labels: &[TargetDecoy]) -> Result<Self::Model>;
}

/// Serializable choice of the model family.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClassifierConfig {
    #[serde(rename = "lda")]
    Lda(LdaConfig),
    #[cfg(feature = "gbm")]
    #[serde(rename = "gbm")]
    Gbm(gbm::GbmConfig),
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig::Lda(LdaConfig::default())
    }
}

impl ClassifierConfig {
    pub fn validate(&self) -> Result<()> {
        match self {
            ClassifierConfig::Lda(x) => x.validate(),
            #[cfg(feature = "gbm")]
            ClassifierConfig::Gbm(x) => x.validate(),
        }
    }

    pub fn build_factory(&self) -> AnyClassifierFactory {
        match self {
            ClassifierConfig::Lda(x) => {
                AnyClassifierFactory::Lda(LinearDiscriminant::new(x.clone()))
            }
            #[cfg(feature = "gbm")]
            ClassifierConfig::Gbm(x) => {
                AnyClassifierFactory::Gbm(gbm::GradientBoosting::new(x.clone()))
            }
        }
    }
}

/// Factory chosen at runtime from a [`ClassifierConfig`].
#[derive(Debug, Clone)]
pub enum AnyClassifierFactory {
    Lda(LinearDiscriminant),
    #[cfg(feature = "gbm")]
    Gbm(gbm::GradientBoosting),
}

pub enum AnyClassifier {
    Lda(LinearModel),
    #[cfg(feature = "gbm")]
    Gbm(gbm::GbmModel),
}

impl Classifier for AnyClassifier {
    fn predict(&self, features: &FeatureMatrix) -> Vec<f64> {
        match self {
            AnyClassifier::Lda(x) => x.predict(features),
            #[cfg(feature = "gbm")]
            AnyClassifier::Gbm(x) => x.predict(features),
        }
    }
}

impl ClassifierFactory for AnyClassifierFactory {
    type Model = AnyClassifier;

    fn train(&self, features: &FeatureMatrix, labels: &[TargetDecoy]) -> Result<Self::Model> {
        match self {
            AnyClassifierFactory::Lda(x) => Ok(AnyClassifier::Lda(x.train(features, labels)?)),
            #[cfg(feature = "gbm")]
            AnyClassifierFactory::Gbm(x) => Ok(AnyClassifier::Gbm(x.train(features, labels)?)),
        }
    }
}

/// Shared input checks for the bundled factories.
pub(crate) fn check_training_input(
    features: &FeatureMatrix,
    labels: &[TargetDecoy],
) -> Result<()> {
    if features.nrows() != labels.len() {
        return Err(ScoringError::schema(format!(
            "{} feature rows but {} labels",
            features.nrows(),
            labels.len()
        )));
    }
    let ntargets = labels.iter().filter(|&&l| l == TargetDecoy::Target).count();
    if ntargets == 0 || ntargets == labels.len() {
        return Err(ScoringError::Classifier {
            msg: format!(
                "both classes are needed to train, got {} targets and {} decoys",
                ntargets,
                labels.len() - ntargets
            ),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_column_major_layout() {
        let m = FeatureMatrix::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2).unwrap();
        assert_eq!(m.row(1), &[3.0, 4.0]);
        assert_eq!(m.to_column_major(), vec![1.0, 3.0, 5.0, 2.0, 4.0, 6.0]);
        assert!(FeatureMatrix::new(vec![1.0], 2, 2).is_err());
    }

    #[test]
    fn test_classifier_config_json() {
        let conf: ClassifierConfig =
            serde_json::from_str(r#"{"type": "lda", "ridge": 0.01}"#).unwrap();
        assert_eq!(conf, ClassifierConfig::Lda(LdaConfig { ridge: 0.01 }));
        assert!(conf.validate().is_ok());
    }
}
