use serde::Serialize;

use crate::table::TargetDecoy;

pub trait LabelledScore {
    fn get_score(&self) -> f64;
    fn get_label(&self) -> TargetDecoy;
    fn assign_qval(&mut self, q: f64);
    fn get_qval(&self) -> f64;
}

impl LabelledScore for (f64, TargetDecoy, f64) {
    fn get_score(&self) -> f64 {
        self.0
    }

    fn get_label(&self) -> TargetDecoy {
        self.1
    }

    fn assign_qval(&mut self, q: f64) {
        self.2 = q
    }

    fn get_qval(&self) -> f64 {
        self.2
    }
}

/// Error rates when accepting everything scoring at least `threshold`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct ThresholdRow {
    pub threshold: f64,
    pub targets_ge: usize,
    pub decoys_ge: usize,
    /// `π0 · decoys_ge / targets_ge`, not monotone.
    pub fdr: f64,
    pub q_value: f64,
}

/// Assign q_values in place, returning one row per distinct score.
///
/// # Invariants
/// * `scores` must be sorted in descending order (e.g. best peak group is first)
///
/// Tied scores form a single threshold, so they always share a q-value.
///
/// Implementation derived from the Sage implementation of qval (Thanks Mike) github.com/lazear/sage
pub fn assign_qval<T: LabelledScore>(scores: &mut [T], pi0: f64) -> Vec<ThresholdRow> {
    // FDR Calculation:
    // * Sort by score, descending
    // * Estimate FDR at every distinct score
    // * Calculate q-value
    //
    let (Some(first_score), Some(last_score)) = (scores.first(), scores.last()) else {
        return Vec::new();
    };
    assert!(first_score.get_score() >= last_score.get_score());

    let mut decoy = 0usize;
    let mut target = 0usize;
    let mut rows: Vec<ThresholdRow> = Vec::new();
    // Index of the threshold row of every element
    let mut bucket_of = Vec::with_capacity(scores.len());

    for score in scores.iter() {
        match score.get_label() {
            TargetDecoy::Decoy => decoy += 1,
            TargetDecoy::Target => target += 1,
        }
        let fdr = if target == 0 {
            1.0
        } else {
            pi0 * decoy as f64 / target as f64
        };

        match rows.last_mut() {
            Some(last) if last.threshold == score.get_score() => {
                last.targets_ge = target;
                last.decoys_ge = decoy;
                last.fdr = fdr;
            }
            _ => rows.push(ThresholdRow {
                threshold: score.get_score(),
                targets_ge: target,
                decoys_ge: decoy,
                fdr,
                q_value: f64::NAN,
            }),
        }
        bucket_of.push(rows.len() - 1);
    }

    // Reverse, and calculate the cumulative minimum
    let mut q_min = 1.0f64;
    for row in rows.iter_mut().rev() {
        q_min = q_min.min(row.fdr);
        row.q_value = q_min;
    }

    for (score, bucket) in scores.iter_mut().zip(bucket_of) {
        score.assign_qval(rows[bucket].q_value);
    }

    rows
}
