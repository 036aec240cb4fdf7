use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::{
    Result,
    ScoringError,
};

/// How the fraction of null targets (π0) is obtained.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pi0Method {
    /// A fixed value in (0, 1]. 1.0 is the conservative choice.
    Fixed(f64),
    /// `min(1, decoys / targets)`.
    DecoyRatio,
    /// Storey's estimator on the target p-values:
    /// `#(p > λ) / (n (1 - λ))`.
    Storey { lambda: f64 },
}

impl Default for Pi0Method {
    fn default() -> Self {
        Pi0Method::Fixed(1.0)
    }
}

impl Pi0Method {
    pub fn validate(&self) -> Result<()> {
        match *self {
            Pi0Method::Fixed(v) if !(v > 0.0 && v <= 1.0) => Err(ScoringError::config(format!(
                "fixed pi0 must be in (0, 1], got {}",
                v
            ))),
            Pi0Method::Storey { lambda } if !(0.0..1.0).contains(&lambda) => {
                Err(ScoringError::config(format!(
                    "storey lambda must be in [0, 1), got {}",
                    lambda
                )))
            }
            _ => Ok(()),
        }
    }

    /// Estimates π0 from the counts and the target p-values.
    ///
    /// Estimates are clamped to `(0, 1]`; the lower bound is one target.
    pub fn estimate(
        &self,
        num_targets: usize,
        num_decoys: usize,
        target_p_values: &[f64],
    ) -> Result<f64> {
        self.validate()?;
        let floor = 1.0 / num_targets.max(1) as f64;
        let pi0 = match *self {
            Pi0Method::Fixed(v) => return Ok(v),
            Pi0Method::DecoyRatio => {
                if num_targets == 0 {
                    1.0
                } else {
                    num_decoys as f64 / num_targets as f64
                }
            }
            Pi0Method::Storey { lambda } => {
                if target_p_values.is_empty() {
                    1.0
                } else {
                    let above = target_p_values.iter().filter(|&&p| p > lambda).count();
                    above as f64 / (target_p_values.len() as f64 * (1.0 - lambda))
                }
            }
        };
        Ok(pi0.clamp(floor, 1.0))
    }
}
