use std::collections::HashMap;

use rand::SeedableRng;
use rand::seq::SliceRandom;
use rand_chacha::ChaCha8Rng;
use serde::{
    Deserialize,
    Serialize,
};
use tracing::debug;

use crate::errors::{
    Result,
    ScoringError,
};
use crate::table::PeakGroupTable;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FoldConfig {
    pub n_folds: u8,
    pub seed: u64,
}

impl Default for FoldConfig {
    fn default() -> Self {
        Self {
            n_folds: 3,
            seed: 42,
        }
    }
}

impl FoldConfig {
    pub fn validate(&self) -> Result<()> {
        if self.n_folds < 2 {
            return Err(ScoringError::config(format!(
                "at least 2 folds are needed, got {}",
                self.n_folds
            )));
        }
        Ok(())
    }
}

/// Mapping of every transition group of a table to its cross validation fold.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FoldAssignment {
    n_folds: u8,
    folds: HashMap<String, u8>,
}

impl FoldAssignment {
    pub fn n_folds(&self) -> u8 {
        self.n_folds
    }

    pub fn num_groups(&self) -> usize {
        self.folds.len()
    }

    pub fn fold_of(&self, transition_group_id: &str) -> Option<u8> {
        self.folds.get(transition_group_id).copied()
    }

    /// Fold of every row of `table`, in row order.
    pub fn row_folds(&self, table: &PeakGroupTable) -> Result<Vec<u8>> {
        table
            .transition_group_ids()
            .iter()
            .map(|g| {
                self.fold_of(g).ok_or_else(|| {
                    ScoringError::schema(format!(
                        "transition group '{}' has no fold assigned",
                        g
                    ))
                })
            })
            .collect()
    }

    /// Number of transition groups in each fold.
    pub fn fold_sizes(&self) -> Vec<usize> {
        let mut out = vec![0; self.n_folds as usize];
        for &f in self.folds.values() {
            out[f as usize] += 1;
        }
        out
    }
}

/// Splits the transition groups of `table` into `k` folds.
///
/// Groups are sorted, shuffled with a ChaCha RNG seeded from `seed` and dealt
/// round robin, so the same `(table, k, seed)` always gives the same folds and
/// every row of a group lands in the same fold.
pub fn assign_folds(table: &PeakGroupTable, k: u8, seed: u64) -> Result<FoldAssignment> {
    FoldConfig { n_folds: k, seed }.validate()?;

    let mut groups = table.distinct_groups();
    if (k as usize) > groups.len() {
        return Err(ScoringError::config(format!(
            "{} folds requested but only {} transition groups are present",
            k,
            groups.len()
        )));
    }

    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    groups.shuffle(&mut rng);

    let folds: HashMap<String, u8> = groups
        .into_iter()
        .enumerate()
        .map(|(i, g)| (g.to_string(), (i % k as usize) as u8))
        .collect();

    let out = FoldAssignment { n_folds: k, folds };
    debug!("Assigned folds, groups per fold: {:?}", out.fold_sizes());
    Ok(out)
}
