//! Cross-run quantile normalization of scores.
//!
//! The engine only extracts the per-run score columns, hands them to a
//! [`QuantileTransform`] and puts the results back in row order. The bundled
//! [`ReferenceQuantileTransform`] maps every run onto the average quantile
//! function of all runs.

use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

use crate::errors::{
    Result,
    ScoringError,
    check_finite,
};
use crate::table::PeakGroupTable;

/// One column of values per run; columns may differ in length.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RunColumns {
    pub columns: Vec<Vec<f64>>,
}

impl RunColumns {
    pub fn shape(&self) -> Vec<usize> {
        self.columns.iter().map(|c| c.len()).collect()
    }
}

/// Column-wise quantile transform; must preserve the shape of its input.
pub trait QuantileTransform: Sync {
    fn transform(&self, columns: RunColumns) -> Result<RunColumns>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum GroupBy {
    #[default]
    #[serde(rename = "run_id")]
    Run,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct NormalizationConfig {
    /// Normalize the final scores across runs before error estimation.
    pub enabled: bool,
    pub group_by: GroupBy,
}

/// Classic quantile normalization, generalised to runs of different sizes.
///
/// Every run's sorted values are read as a quantile function on `[0, 1]`.
/// The reference is the mean of those functions on a grid as fine as the
/// largest run, and each value is replaced by the reference at its own
/// quantile position. Tied values share their mean rank.
#[derive(Debug, Clone, Copy, Default)]
pub struct ReferenceQuantileTransform;

impl QuantileTransform for ReferenceQuantileTransform {
    fn transform(&self, columns: RunColumns) -> Result<RunColumns> {
        let grid_len = columns.columns.iter().map(|c| c.len()).max().unwrap_or(0);
        let non_empty: Vec<&Vec<f64>> = columns.columns.iter().filter(|c| !c.is_empty()).collect();
        if grid_len == 0 || non_empty.is_empty() {
            return Ok(columns);
        }

        let sorted: Vec<Vec<f64>> = non_empty
            .iter()
            .map(|c| {
                let mut s = c.to_vec();
                s.sort_by(|a, b| a.total_cmp(b));
                s
            })
            .collect();

        let reference: Vec<f64> = (0..grid_len)
            .map(|j| {
                let q = grid_position(j, grid_len);
                sorted.iter().map(|s| interpolate(s, q)).sum::<f64>() / sorted.len() as f64
            })
            .collect();

        let out = columns
            .columns
            .iter()
            .map(|column| {
                quantile_positions(column)
                    .into_iter()
                    .map(|q| interpolate(&reference, q))
                    .collect()
            })
            .collect();

        Ok(RunColumns { columns: out })
    }
}

fn grid_position(j: usize, len: usize) -> f64 {
    if len < 2 {
        0.5
    } else {
        j as f64 / (len - 1) as f64
    }
}

/// Linear interpolation into a sorted sample at quantile `q`.
fn interpolate(sorted: &[f64], q: f64) -> f64 {
    match sorted.len() {
        0 => f64::NAN,
        1 => sorted[0],
        n => {
            let pos = q.clamp(0.0, 1.0) * (n - 1) as f64;
            let lo = pos.floor() as usize;
            let hi = (lo + 1).min(n - 1);
            let frac = pos - lo as f64;
            sorted[lo] + (sorted[hi] - sorted[lo]) * frac
        }
    }
}

/// Quantile position of every value of `column` (mean rank for ties).
fn quantile_positions(column: &[f64]) -> Vec<f64> {
    let n = column.len();
    let mut order: Vec<usize> = (0..n).collect();
    order.sort_by(|&a, &b| column[a].total_cmp(&column[b]));

    let mut out = vec![0.0; n];
    let mut start = 0;
    while start < n {
        let mut end = start + 1;
        while end < n && column[order[end]] == column[order[start]] {
            end += 1;
        }
        let mean_rank = (start + end - 1) as f64 / 2.0;
        for &i in &order[start..end] {
            out[i] = if n < 2 { 0.5 } else { mean_rank / (n - 1) as f64 };
        }
        start = end;
    }
    out
}

/// Normalizes `scores` across the row partitions (one per run).
pub(crate) fn normalize_scores(
    partitions: &[(&str, Vec<usize>)],
    scores: &[f64],
    transform: &dyn QuantileTransform,
) -> Result<Vec<f64>> {
    check_finite(scores, "scores before normalization")?;
    let columns = RunColumns {
        columns: partitions
            .iter()
            .map(|(_, rows)| rows.iter().map(|&r| scores[r]).collect())
            .collect(),
    };
    let expected_shape = columns.shape();
    let transformed = transform.transform(columns)?;
    if transformed.shape() != expected_shape {
        return Err(ScoringError::schema(format!(
            "quantile transform changed the shape from {:?} to {:?}",
            expected_shape,
            transformed.shape()
        )));
    }

    let mut out = scores.to_vec();
    for ((_, rows), column) in partitions.iter().zip(transformed.columns) {
        for (&r, v) in rows.iter().zip(column) {
            out[r] = v;
        }
    }
    check_finite(&out, "normalized scores")?;
    Ok(out)
}

/// Quantile normalizes the score column of `table` across runs.
pub fn normalize(
    table: &PeakGroupTable,
    transform: &dyn QuantileTransform,
) -> Result<PeakGroupTable> {
    let scores = table.require_score("normalization")?;
    let partitions = table.run_partitions();
    debug!("Normalizing scores across {} runs", partitions.len());
    let normalized = normalize_scores(&partitions, scores, transform)?;
    table.clone().with_scores(normalized)
}
