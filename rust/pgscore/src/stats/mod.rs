//! Target-decoy error statistics over a scored peak group table.
//!
//! Decoys model the score distribution of false detections, so the number of
//! decoys passing a threshold estimates the number of false targets passing it.

pub mod pep;
pub mod pi0;
pub mod qvalues;

pub use pep::{
    DensityGrid,
    GaussianKde,
    local_fdr,
};
pub use pi0::Pi0Method;
pub use qvalues::{
    LabelledScore,
    ThresholdRow,
    assign_qval,
};
use serde::{
    Deserialize,
    Serialize,
};
use tracing::{
    debug,
    info,
};

use crate::errors::{
    Result,
    ScoringError,
    check_finite,
};
use crate::table::{
    PeakGroupTable,
    TargetDecoy,
};

pub const P_VALUE_COLUMN: &str = "p_value";
pub const PEP_COLUMN: &str = "pep";

pub const DEFAULT_SUMMARY_CUTOFFS: [f64; 9] = [0.0, 0.01, 0.02, 0.05, 0.1, 0.2, 0.3, 0.4, 0.5];

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ErrorStatisticsConfig {
    pub pi0: Pi0Method,
    /// Also estimate the posterior error probability of every row.
    pub compute_local_fdr: bool,
    /// q-value cutoffs reported by [`ErrorStatistics::summary`].
    pub summary_cutoffs: Vec<f64>,
}

impl Default for ErrorStatisticsConfig {
    fn default() -> Self {
        Self {
            pi0: Pi0Method::default(),
            compute_local_fdr: false,
            summary_cutoffs: DEFAULT_SUMMARY_CUTOFFS.to_vec(),
        }
    }
}

impl ErrorStatisticsConfig {
    pub fn validate(&self) -> Result<()> {
        self.pi0.validate()?;
        if let Some(bad) = self
            .summary_cutoffs
            .iter()
            .find(|c| !(0.0..=1.0).contains(*c))
        {
            return Err(ScoringError::config(format!(
                "summary cutoffs must be in [0, 1], got {}",
                bad
            )));
        }
        Ok(())
    }
}

/// One line of the q-value cutoff summary.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ErrorSummaryRow {
    pub q_value_cutoff: f64,
    pub targets: usize,
    pub decoys: usize,
    pub false_positives: f64,
    pub true_positives: f64,
}

/// Result of [`ErrorStatisticsEstimator::estimate`]; per-row vectors follow
/// the row order of the estimated table.
#[derive(Debug, Clone, PartialEq)]
pub struct ErrorStatistics {
    pub pi0: f64,
    /// One row per distinct score, strictest threshold first.
    pub thresholds: Vec<ThresholdRow>,
    pub q_values: Vec<f64>,
    pub p_values: Vec<f64>,
    pub local_fdr: Option<Vec<f64>>,
    pub labels: Vec<TargetDecoy>,
    pub num_targets: usize,
    pub num_decoys: usize,
}

impl ErrorStatistics {
    /// q-value of accepting everything scoring at least `score`.
    ///
    /// `None` only when there are no thresholds.
    pub fn q_value_at(&self, score: f64) -> Option<f64> {
        let passing = self.thresholds.partition_point(|r| r.threshold >= score);
        match passing {
            0 => self.thresholds.first().map(|r| r.q_value),
            n => Some(self.thresholds[n - 1].q_value),
        }
    }

    pub fn summary(&self, cutoffs: &[f64]) -> Vec<ErrorSummaryRow> {
        cutoffs
            .iter()
            .map(|&cutoff| {
                let mut targets = 0;
                let mut decoys = 0;
                for (&q, label) in self.q_values.iter().zip(self.labels.iter()) {
                    if q <= cutoff {
                        match label {
                            TargetDecoy::Target => targets += 1,
                            TargetDecoy::Decoy => decoys += 1,
                        }
                    }
                }
                let false_positives = cutoff * targets as f64;
                ErrorSummaryRow {
                    q_value_cutoff: cutoff,
                    targets,
                    decoys,
                    false_positives,
                    true_positives: targets as f64 - false_positives,
                }
            })
            .collect()
    }

    /// Attaches `q_value`, `p_value` and (when computed) `pep` to `table`.
    pub fn assign(&self, table: &PeakGroupTable) -> Result<PeakGroupTable> {
        if table.nrows() != self.q_values.len() {
            return Err(ScoringError::schema(format!(
                "statistics cover {} rows but the table has {}",
                self.q_values.len(),
                table.nrows()
            )));
        }
        let mut out = table
            .clone()
            .with_q_values(self.q_values.clone())?
            .with_column(P_VALUE_COLUMN, self.p_values.clone())?;
        if let Some(pep) = &self.local_fdr {
            out = out.with_column(PEP_COLUMN, pep.clone())?;
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Default)]
pub struct ErrorStatisticsEstimator {
    config: ErrorStatisticsConfig,
}

impl ErrorStatisticsEstimator {
    pub fn new(config: ErrorStatisticsConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ErrorStatisticsConfig {
        &self.config
    }

    pub fn estimate(&self, table: &PeakGroupTable) -> Result<ErrorStatistics> {
        let scores = table.require_score("error estimation")?;
        let num_decoys = table.num_decoys();
        if num_decoys == 0 {
            return Err(ScoringError::InsufficientDecoys);
        }
        check_finite(scores, "scores for error estimation")?;
        let num_targets = table.num_targets();
        let labels: Vec<TargetDecoy> = table.labels().collect();

        let p_values = empirical_p_values(scores, &labels);
        let target_p_values: Vec<f64> = p_values
            .iter()
            .zip(labels.iter())
            .filter(|(_, l)| **l == TargetDecoy::Target)
            .map(|(p, _)| *p)
            .collect();
        let pi0 = self
            .config
            .pi0
            .estimate(num_targets, num_decoys, &target_p_values)?;
        debug!(
            "pi0 = {:.4} from {} targets and {} decoys",
            pi0, num_targets, num_decoys
        );

        let mut order: Vec<usize> = (0..scores.len()).collect();
        order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
        let mut sorted: Vec<(f64, TargetDecoy, f64)> = order
            .iter()
            .map(|&i| (scores[i], labels[i], f64::NAN))
            .collect();
        let thresholds = assign_qval(&mut sorted, pi0);

        let mut q_values = vec![1.0; scores.len()];
        for (&i, scored) in order.iter().zip(sorted.iter()) {
            q_values[i] = scored.get_qval();
        }

        let pep = self
            .config
            .compute_local_fdr
            .then(|| local_fdr(scores, &labels, pi0));

        let stats = ErrorStatistics {
            pi0,
            thresholds,
            q_values,
            p_values,
            local_fdr: pep,
            labels,
            num_targets,
            num_decoys,
        };
        if let Some(row) = stats.summary(&[0.01]).first() {
            info!("{} targets pass a q-value of 0.01", row.targets);
        }
        Ok(stats)
    }

    /// [`Self::estimate`] followed by [`ErrorStatistics::assign`].
    pub fn assign(&self, table: &PeakGroupTable) -> Result<(PeakGroupTable, ErrorStatistics)> {
        let stats = self.estimate(table)?;
        let out = stats.assign(table)?;
        Ok((out, stats))
    }
}

/// Estimates error statistics with the default configuration.
pub fn estimate(table: &PeakGroupTable) -> Result<ErrorStatistics> {
    ErrorStatisticsEstimator::default().estimate(table)
}

/// `#(decoys scoring >= s) / #decoys` for every row, floored at one decoy.
fn empirical_p_values(scores: &[f64], labels: &[TargetDecoy]) -> Vec<f64> {
    let mut decoy_scores: Vec<f64> = scores
        .iter()
        .zip(labels.iter())
        .filter(|(_, l)| **l == TargetDecoy::Decoy)
        .map(|(s, _)| *s)
        .collect();
    if decoy_scores.is_empty() {
        return vec![1.0; scores.len()];
    }
    decoy_scores.sort_by(|a, b| a.total_cmp(b));
    let n = decoy_scores.len();
    scores
        .iter()
        .map(|&s| {
            let below = decoy_scores.partition_point(|&d| d < s);
            (n - below).max(1) as f64 / n as f64
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::Q_VALUE_COLUMN;

    fn scored_table(rows: &[(&str, bool, f64)]) -> PeakGroupTable {
        let mut builder = PeakGroupTable::builder(vec!["main".into()]);
        for (group, decoy, score) in rows {
            builder.push("run", *group, *decoy, &[*score]).unwrap();
        }
        let scores = rows.iter().map(|r| r.2).collect();
        builder.build().unwrap().with_scores(scores).unwrap()
    }

    fn ladder() -> PeakGroupTable {
        scored_table(&[
            ("1", false, 10.0),
            ("2", false, 9.0),
            ("3", true, 8.0),
            ("4", false, 7.0),
            ("5", false, 6.0),
            ("6", false, 5.0),
            ("7", true, 4.0),
            ("8", true, 3.0),
        ])
    }

    #[test]
    fn test_qvalues_never_decrease_with_threshold() {
        let stats = estimate(&ladder()).unwrap();
        assert_eq!(stats.num_targets, 5);
        assert_eq!(stats.num_decoys, 3);
        assert_eq!(stats.q_values, vec![0.0, 0.0, 0.2, 0.2, 0.2, 0.2, 0.4, 0.6]);
        for w in stats.thresholds.windows(2) {
            assert!(w[0].threshold > w[1].threshold);
            assert!(w[0].q_value <= w[1].q_value);
        }
        assert!(stats.q_values.iter().all(|q| (0.0..=1.0).contains(q)));
    }

    #[test]
    fn test_rows_keep_input_order() {
        let table = scored_table(&[
            ("1", true, 1.0),
            ("2", false, 3.0),
            ("1", false, 2.0),
        ]);
        let stats = estimate(&table).unwrap();
        assert_eq!(stats.q_values, vec![0.5, 0.0, 0.0]);
        assert_eq!(stats.labels[0], TargetDecoy::Decoy);
    }

    #[test]
    fn test_requires_decoys_before_anything_else() {
        let mut builder = PeakGroupTable::builder(vec!["main".into()]);
        builder.push("run", "1", false, &[1.0]).unwrap();
        let table = builder.build().unwrap().with_scores(vec![f64::NAN]).unwrap();
        assert_eq!(estimate(&table).unwrap_err(), ScoringError::InsufficientDecoys);
    }

    #[test]
    fn test_errors() {
        let mut builder = PeakGroupTable::builder(vec!["main".into()]);
        builder.push("run", "1", false, &[1.0]).unwrap();
        builder.push("run", "1", true, &[1.0]).unwrap();
        let table = builder.build().unwrap();
        assert!(matches!(estimate(&table), Err(ScoringError::Schema { .. })));

        let table = table.with_scores(vec![1.0, f64::INFINITY]).unwrap();
        assert!(matches!(
            estimate(&table),
            Err(ScoringError::NumericInstability { .. })
        ));
    }

    #[test]
    fn test_fdr_at_loosest_threshold_is_decoy_target_ratio() {
        let stats = estimate(&ladder()).unwrap();
        let last = stats.thresholds.last().unwrap();
        assert_eq!(last.targets_ge, 5);
        assert_eq!(last.decoys_ge, 3);
        assert_eq!(last.fdr, 3.0 / 5.0);
    }

    #[test]
    fn test_tied_scores_share_q_value() {
        let table = scored_table(&[
            ("1", false, 2.0),
            ("2", false, 1.0),
            ("2", true, 1.0),
            ("3", true, 0.0),
        ]);
        let stats = estimate(&table).unwrap();
        assert_eq!(stats.q_values[1], stats.q_values[2]);
        assert_eq!(stats.thresholds.len(), 3);
    }

    #[test]
    fn test_p_values() {
        let stats = estimate(&ladder()).unwrap();
        // Decoys at 8, 4, 3
        let third = 1.0 / 3.0;
        let expected = [third, third, third, third, third, third, 2.0 * third, 1.0];
        for (p, e) in stats.p_values.iter().zip(expected.iter()) {
            assert!((p - e).abs() < 1e-12, "{} vs {}", p, e);
        }
    }

    #[test]
    fn test_q_value_at() {
        let stats = estimate(&ladder()).unwrap();
        assert_eq!(stats.q_value_at(100.0), Some(0.0));
        assert_eq!(stats.q_value_at(9.5), Some(0.0));
        assert_eq!(stats.q_value_at(8.0), Some(0.2));
        assert_eq!(stats.q_value_at(3.5), Some(0.4));
        assert_eq!(stats.q_value_at(-1.0), Some(0.6));
    }

    #[test]
    fn test_summary() {
        let stats = estimate(&ladder()).unwrap();
        let rows = stats.summary(&[0.0, 0.2, 0.5]);
        assert_eq!(rows[0].targets, 2);
        assert_eq!(rows[0].decoys, 0);
        assert_eq!(rows[0].false_positives, 0.0);
        assert_eq!(rows[1].targets, 5);
        assert_eq!(rows[1].decoys, 1);
        assert!((rows[1].false_positives - 1.0).abs() < 1e-12);
        assert!((rows[1].true_positives - 4.0).abs() < 1e-12);
        assert_eq!(rows[2].decoys, 2);
    }

    #[test]
    fn test_assign_attaches_columns() {
        let config = ErrorStatisticsConfig {
            compute_local_fdr: true,
            ..Default::default()
        };
        let estimator = ErrorStatisticsEstimator::new(config).unwrap();
        let table = ladder();
        let (out, stats) = estimator.assign(&table).unwrap();
        assert_eq!(out.q_values().unwrap(), stats.q_values.as_slice());
        assert!(out.extra_column(P_VALUE_COLUMN).is_some());
        assert!(out.extra_column(PEP_COLUMN).is_some());
        assert!(out.column_names().contains(&Q_VALUE_COLUMN));
        assert_eq!(out.decoys(), table.decoys());
    }

    #[test]
    fn test_pi0_scales_fdr() {
        let config = ErrorStatisticsConfig {
            pi0: Pi0Method::Fixed(0.5),
            ..Default::default()
        };
        let stats = ErrorStatisticsEstimator::new(config)
            .unwrap()
            .estimate(&ladder())
            .unwrap();
        assert_eq!(stats.pi0, 0.5);
        assert_eq!(*stats.q_values.last().unwrap(), 0.3);
    }

    #[test]
    fn test_config_validation() {
        let mut config = ErrorStatisticsConfig::default();
        assert!(config.validate().is_ok());
        config.summary_cutoffs.push(1.5);
        assert!(config.validate().is_err());
    }
}
