//! Two class (Fisher) linear discriminant.
//!
//! `w = (S_w + λI)^-1 (μ_target - μ_decoy)`, where `S_w` is the pooled
//! within-class covariance. The weights are scaled to unit length and the
//! intercept puts the midpoint between the class means at zero.

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

/// Pivots smaller than this are treated as a singular system.
const MIN_PIVOT: f64 = 1e-12;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LdaConfig {
    /// Ridge added to the covariance diagonal, relative to its mean variance.
    pub ridge: f64,
}

impl Default for LdaConfig {
    fn default() -> Self {
        Self { ridge: 1e-3 }
    }
}

impl LdaConfig {
    pub fn validate(&self) -> Result<()> {
        if !(self.ridge.is_finite() && self.ridge > 0.0) {
            return Err(ScoringError::config(format!(
                "lda ridge must be positive and finite, got {}",
                self.ridge
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct LinearDiscriminant {
    config: LdaConfig,
}

impl LinearDiscriminant {
    pub fn new(config: LdaConfig) -> Self {
        Self { config }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct LinearModel {
    weights: Vec<f64>,
    intercept: f64,
}

impl LinearModel {
    pub fn weights(&self) -> &[f64] {
        &self.weights
    }

    pub fn intercept(&self) -> f64 {
        self.intercept
    }

    pub fn score_row(&self, row: &[f64]) -> f64 {
        dot(&self.weights, row) + self.intercept
    }
}

impl Classifier for LinearModel {
    fn predict(&self, features: &FeatureMatrix) -> Vec<f64> {
        features.rows().map(|r| self.score_row(r)).collect()
    }
}

impl ClassifierFactory for LinearDiscriminant {
    type Model = LinearModel;

    fn train(&self, features: &FeatureMatrix, labels: &[TargetDecoy]) -> Result<LinearModel> {
        check_training_input(features, labels)?;
        let p = features.ncols();

        let mut target_mean = vec![0.0; p];
        let mut decoy_mean = vec![0.0; p];
        let mut ntargets = 0usize;
        let mut ndecoys = 0usize;
        for (row, label) in features.rows().zip(labels.iter()) {
            let (acc, n) = match label {
                TargetDecoy::Target => (&mut target_mean, &mut ntargets),
                TargetDecoy::Decoy => (&mut decoy_mean, &mut ndecoys),
            };
            acc.iter_mut().zip(row.iter()).for_each(|(a, v)| *a += v);
            *n += 1;
        }
        target_mean.iter_mut().for_each(|x| *x /= ntargets as f64);
        decoy_mean.iter_mut().for_each(|x| *x /= ndecoys as f64);

        // Pooled within class scatter, row major p x p
        let mut cov = vec![0.0; p * p];
        for (row, label) in features.rows().zip(labels.iter()) {
            let mean = match label {
                TargetDecoy::Target => &target_mean,
                TargetDecoy::Decoy => &decoy_mean,
            };
            for i in 0..p {
                let di = row[i] - mean[i];
                for j in 0..p {
                    cov[i * p + j] += di * (row[j] - mean[j]);
                }
            }
        }
        let dof = (features.nrows().saturating_sub(2)).max(1) as f64;
        cov.iter_mut().for_each(|x| *x /= dof);

        let mean_var = (0..p).map(|i| cov[i * p + i]).sum::<f64>() / p.max(1) as f64;
        let lambda = self.config.ridge * (1.0 + mean_var);
        for i in 0..p {
            cov[i * p + i] += lambda;
        }

        let delta: Vec<f64> = target_mean
            .iter()
            .zip(decoy_mean.iter())
            .map(|(t, d)| t - d)
            .collect();
        let mut weights = solve(cov, delta, p)?;

        let norm = dot(&weights, &weights).sqrt();
        if norm > 0.0 {
            weights.iter_mut().for_each(|w| *w /= norm);
        }
        let midpoint: Vec<f64> = target_mean
            .iter()
            .zip(decoy_mean.iter())
            .map(|(t, d)| (t + d) / 2.0)
            .collect();
        let intercept = -dot(&weights, &midpoint);

        if !weights.iter().all(|w| w.is_finite()) || !intercept.is_finite() {
            return Err(ScoringError::numeric("lda weights"));
        }

        Ok(LinearModel { weights, intercept })
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b.iter()).map(|(x, y)| x * y).sum()
}

/// Solves `a x = b` (a is n x n, row major) by Gaussian elimination with
/// partial pivoting.
fn solve(mut a: Vec<f64>, mut b: Vec<f64>, n: usize) -> Result<Vec<f64>> {
    for col in 0..n {
        let pivot_row = (col..n)
            .max_by(|&x, &y| a[x * n + col].abs().total_cmp(&a[y * n + col].abs()))
            .unwrap_or(col);
        if a[pivot_row * n + col].abs() < MIN_PIVOT {
            return Err(ScoringError::Classifier {
                msg: "singular covariance matrix".to_string(),
            });
        }
        if pivot_row != col {
            for j in 0..n {
                a.swap(col * n + j, pivot_row * n + j);
            }
            b.swap(col, pivot_row);
        }

        for row in (col + 1)..n {
            let factor = a[row * n + col] / a[col * n + col];
            if factor == 0.0 {
                continue;
            }
            for j in col..n {
                a[row * n + j] -= factor * a[col * n + j];
            }
            b[row] -= factor * b[col];
        }
    }

    let mut x = vec![0.0; n];
    for row in (0..n).rev() {
        let tail: f64 = ((row + 1)..n).map(|j| a[row * n + j] * x[j]).sum();
        x[row] = (b[row] - tail) / a[row * n + row];
    }
    Ok(x)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn close(a: f64, b: f64) -> bool {
        (a - b).abs() < 1e-9
    }

    #[test]
    fn test_solve_small_system() {
        // 2x + y = 5, x + 3y = 10  => x = 1, y = 3
        let x = solve(vec![2.0, 1.0, 1.0, 3.0], vec![5.0, 10.0], 2).unwrap();
        assert!(close(x[0], 1.0) && close(x[1], 3.0), "{:?}", x);

        let singular = solve(vec![1.0, 2.0, 2.0, 4.0], vec![1.0, 2.0], 2);
        assert!(singular.is_err());
    }

    #[test]
    fn test_lda_separates_classes() {
        // Second feature is pure noise shared by both classes
        let rows = vec![
            (vec![3.0, 1.0], TargetDecoy::Target),
            (vec![4.0, -1.0], TargetDecoy::Target),
            (vec![5.0, 0.5], TargetDecoy::Target),
            (vec![0.0, 1.0], TargetDecoy::Decoy),
            (vec![1.0, -1.0], TargetDecoy::Decoy),
            (vec![-1.0, 0.5], TargetDecoy::Decoy),
        ];
        let labels: Vec<TargetDecoy> = rows.iter().map(|x| x.1).collect();
        let values: Vec<f64> = rows.iter().flat_map(|x| x.0.clone()).collect();
        let features = FeatureMatrix::new(values, 6, 2).unwrap();

        let model = LinearDiscriminant::default()
            .train(&features, &labels)
            .unwrap();
        assert!(close(
            model.weights().iter().map(|w| w * w).sum::<f64>(),
            1.0
        ));
        assert!(model.weights()[0] > 0.8, "{:?}", model.weights());

        let preds = model.predict(&features);
        assert!(preds[..3].iter().all(|&x| x > 0.0), "{:?}", preds);
        assert!(preds[3..].iter().all(|&x| x < 0.0), "{:?}", preds);
    }

    #[test]
    fn test_lda_single_rows_per_class() {
        // Zero within class variance is handled by the ridge
        let features = FeatureMatrix::new(vec![0.9, 0.1], 2, 1).unwrap();
        let model = LinearDiscriminant::default()
            .train(&features, &[TargetDecoy::Target, TargetDecoy::Decoy])
            .unwrap();
        assert!(close(model.weights()[0], 1.0));
        assert!(close(model.intercept(), -0.5));
    }

    #[test]
    fn test_lda_needs_both_classes() {
        let features = FeatureMatrix::new(vec![0.9, 0.1], 2, 1).unwrap();
        let err = LinearDiscriminant::default()
            .train(&features, &[TargetDecoy::Target, TargetDecoy::Target])
            .unwrap_err();
        assert!(matches!(err, ScoringError::Classifier { .. }));
    }

    #[test]
    fn test_lda_config_validation() {
        assert!(LdaConfig { ridge: 0.0 }.validate().is_err());
        assert!(LdaConfig { ridge: f64::NAN }.validate().is_err());
        assert!(LdaConfig::default().validate().is_ok());
    }
}
