//! Columnar container for candidate peak groups.
//!
//! A [`PeakGroupTable`] holds one row per candidate peak group. Identifier
//! columns (`run_id`, `transition_group_id`, `decoy`) are fixed at
//! construction; the feature schema is shared by every row; the `score` and
//! `q_value` columns (and any derived float column) are attached later through
//! the validated [`PeakGroupTable::with_column`] path, which always produces a
//! new table value.

use std::borrow::Cow;
use std::collections::{
    BTreeSet,
    HashMap,
    HashSet,
};

use serde::{
    Deserialize,
    Serialize,
};

use crate::errors::{
    Result,
    ScoringError,
};

pub const RUN_ID_COLUMN: &str = "run_id";
pub const GROUP_ID_COLUMN: &str = "transition_group_id";
pub const DECOY_COLUMN: &str = "decoy";
pub const SCORE_COLUMN: &str = "score";
pub const Q_VALUE_COLUMN: &str = "q_value";

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TargetDecoy {
    Target,
    Decoy,
}

impl TargetDecoy {
    pub fn from_is_decoy(is_decoy: bool) -> Self {
        if is_decoy {
            TargetDecoy::Decoy
        } else {
            TargetDecoy::Target
        }
    }

    /// Response value used when training classifiers (targets are positives).
    pub fn as_response(&self) -> f64 {
        match self {
            TargetDecoy::Target => 1.0,
            TargetDecoy::Decoy => 0.0,
        }
    }
}

/// Borrowed view over a single row of a [`PeakGroupTable`].
#[derive(Debug, Clone, Copy)]
pub struct PeakGroupRow<'a> {
    pub index: usize,
    pub run_id: &'a str,
    pub transition_group_id: &'a str,
    pub is_decoy: bool,
    pub features: &'a [f64],
    pub score: Option<f64>,
    pub q_value: Option<f64>,
}

impl PeakGroupRow<'_> {
    pub fn label(&self) -> TargetDecoy {
        TargetDecoy::from_is_decoy(self.is_decoy)
    }
}

/// A column looked up by name.
#[derive(Debug, Clone, PartialEq)]
pub enum Column<'a> {
    Text(&'a [String]),
    Flag(&'a [bool]),
    /// Features are stored row-major so they come back as an owned copy.
    Float(Cow<'a, [f64]>),
}

impl Column<'_> {
    pub fn len(&self) -> usize {
        match self {
            Column::Text(x) => x.len(),
            Column::Flag(x) => x.len(),
            Column::Float(x) => x.len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn as_floats(&self) -> Option<&[f64]> {
        match self {
            Column::Float(x) => Some(x.as_ref()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PeakGroupTable {
    run_ids: Vec<String>,
    group_ids: Vec<String>,
    decoys: Vec<bool>,
    feature_names: Vec<String>,
    // Row major, nrows * feature_names.len()
    features: Vec<f64>,
    score: Option<Vec<f64>>,
    q_value: Option<Vec<f64>>,
    extra: Vec<(String, Vec<f64>)>,
}

impl PeakGroupTable {
    /// Builds a table from its identifier columns and a row-major feature buffer.
    pub fn new(
        run_ids: Vec<String>,
        group_ids: Vec<String>,
        decoys: Vec<bool>,
        feature_names: Vec<String>,
        features: Vec<f64>,
    ) -> Result<Self> {
        let nrows = run_ids.len();
        if group_ids.len() != nrows || decoys.len() != nrows {
            return Err(ScoringError::schema(format!(
                "identifier columns differ in length: {} run ids, {} group ids, {} decoy flags",
                nrows,
                group_ids.len(),
                decoys.len()
            )));
        }
        if features.len() != nrows * feature_names.len() {
            return Err(ScoringError::schema(format!(
                "feature buffer has {} values, expected {} rows x {} features",
                features.len(),
                nrows,
                feature_names.len()
            )));
        }

        let mut seen = HashSet::new();
        for name in feature_names.iter() {
            if is_reserved(name) {
                return Err(ScoringError::schema(format!(
                    "feature name '{}' collides with a reserved column",
                    name
                )));
            }
            if !seen.insert(name.as_str()) {
                return Err(ScoringError::schema(format!(
                    "duplicated feature name '{}'",
                    name
                )));
            }
        }

        // One target per transition group and run.
        let mut targets = HashSet::new();
        for ((run, group), decoy) in run_ids.iter().zip(group_ids.iter()).zip(decoys.iter()) {
            if !decoy && !targets.insert((run.as_str(), group.as_str())) {
                return Err(ScoringError::schema(format!(
                    "transition group '{}' has more than one target in run '{}'",
                    group, run
                )));
            }
        }

        Ok(Self {
            run_ids,
            group_ids,
            decoys,
            feature_names,
            features,
            score: None,
            q_value: None,
            extra: Vec::new(),
        })
    }

    pub fn builder(feature_names: Vec<String>) -> PeakGroupTableBuilder {
        PeakGroupTableBuilder::new(feature_names)
    }

    pub fn nrows(&self) -> usize {
        self.run_ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.run_ids.is_empty()
    }

    pub fn nfeatures(&self) -> usize {
        self.feature_names.len()
    }

    pub fn feature_names(&self) -> &[String] {
        &self.feature_names
    }

    pub fn feature_index(&self, name: &str) -> Option<usize> {
        self.feature_names.iter().position(|x| x == name)
    }

    pub fn run_ids(&self) -> &[String] {
        &self.run_ids
    }

    pub fn transition_group_ids(&self) -> &[String] {
        &self.group_ids
    }

    pub fn decoys(&self) -> &[bool] {
        &self.decoys
    }

    pub fn labels(&self) -> impl Iterator<Item = TargetDecoy> + '_ {
        self.decoys.iter().map(|&d| TargetDecoy::from_is_decoy(d))
    }

    pub fn num_decoys(&self) -> usize {
        self.decoys.iter().filter(|&&d| d).count()
    }

    pub fn num_targets(&self) -> usize {
        self.nrows() - self.num_decoys()
    }

    pub fn features_row(&self, row: usize) -> &[f64] {
        let n = self.nfeatures();
        &self.features[row * n..(row + 1) * n]
    }

    pub fn score(&self) -> Option<&[f64]> {
        self.score.as_deref()
    }

    pub fn q_values(&self) -> Option<&[f64]> {
        self.q_value.as_deref()
    }

    pub fn extra_column(&self, name: &str) -> Option<&[f64]> {
        self.extra
            .iter()
            .find(|(n, _)| n == name)
            .map(|(_, v)| v.as_slice())
    }

    /// Names of every column, identifiers first.
    pub fn column_names(&self) -> Vec<&str> {
        let mut out = vec![RUN_ID_COLUMN, GROUP_ID_COLUMN, DECOY_COLUMN];
        out.extend(self.feature_names.iter().map(|x| x.as_str()));
        if self.score.is_some() {
            out.push(SCORE_COLUMN);
        }
        if self.q_value.is_some() {
            out.push(Q_VALUE_COLUMN);
        }
        out.extend(self.extra.iter().map(|(n, _)| n.as_str()));
        out
    }

    pub fn column(&self, name: &str) -> Option<Column<'_>> {
        match name {
            RUN_ID_COLUMN => return Some(Column::Text(&self.run_ids)),
            GROUP_ID_COLUMN => return Some(Column::Text(&self.group_ids)),
            DECOY_COLUMN => return Some(Column::Flag(&self.decoys)),
            SCORE_COLUMN => return self.score().map(|x| Column::Float(Cow::Borrowed(x))),
            Q_VALUE_COLUMN => return self.q_values().map(|x| Column::Float(Cow::Borrowed(x))),
            _ => {}
        }
        if let Some(idx) = self.feature_index(name) {
            return Some(Column::Float(Cow::Owned(self.feature_column(idx))));
        }
        self.extra_column(name)
            .map(|x| Column::Float(Cow::Borrowed(x)))
    }

    fn feature_column(&self, idx: usize) -> Vec<f64> {
        let n = self.nfeatures();
        self.features.iter().skip(idx).step_by(n).copied().collect()
    }

    pub fn row(&self, index: usize) -> Option<PeakGroupRow<'_>> {
        if index >= self.nrows() {
            return None;
        }
        Some(PeakGroupRow {
            index,
            run_id: &self.run_ids[index],
            transition_group_id: &self.group_ids[index],
            is_decoy: self.decoys[index],
            features: self.features_row(index),
            score: self.score.as_ref().map(|x| x[index]),
            q_value: self.q_value.as_ref().map(|x| x[index]),
        })
    }

    pub fn rows(&self) -> impl Iterator<Item = PeakGroupRow<'_>> + '_ {
        (0..self.nrows()).filter_map(move |i| self.row(i))
    }

    /// Distinct transition group identifiers, sorted.
    pub fn distinct_groups(&self) -> Vec<&str> {
        self.group_ids
            .iter()
            .map(|x| x.as_str())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect()
    }

    /// Row indices of every run, runs in order of first appearance.
    pub fn run_partitions(&self) -> Vec<(&str, Vec<usize>)> {
        let mut out: Vec<(&str, Vec<usize>)> = Vec::new();
        let mut index: HashMap<&str, usize> = HashMap::new();
        for (i, run) in self.run_ids.iter().enumerate() {
            let slot = *index.entry(run.as_str()).or_insert_with(|| {
                out.push((run.as_str(), Vec::new()));
                out.len() - 1
            });
            out[slot].1.push(i);
        }
        out
    }

    /// Keeps the rows matching `predicate`, carrying every column along.
    pub fn filter<F>(&self, predicate: F) -> Self
    where
        F: Fn(&PeakGroupRow<'_>) -> bool,
    {
        let keep: Vec<usize> = self
            .rows()
            .filter(|r| predicate(r))
            .map(|r| r.index)
            .collect();
        self.take_rows(&keep)
    }

    pub fn decoy_rows(&self) -> Self {
        self.filter(|r| r.is_decoy)
    }

    pub fn target_rows(&self) -> Self {
        self.filter(|r| !r.is_decoy)
    }

    fn take_rows(&self, keep: &[usize]) -> Self {
        fn pick<T: Clone>(v: &[T], keep: &[usize]) -> Vec<T> {
            keep.iter().map(|&i| v[i].clone()).collect()
        }

        let mut features = Vec::with_capacity(keep.len() * self.nfeatures());
        for &i in keep {
            features.extend_from_slice(self.features_row(i));
        }

        Self {
            run_ids: pick(&self.run_ids, keep),
            group_ids: pick(&self.group_ids, keep),
            decoys: pick(&self.decoys, keep),
            feature_names: self.feature_names.clone(),
            features,
            score: self.score.as_ref().map(|x| pick(x, keep)),
            q_value: self.q_value.as_ref().map(|x| pick(x, keep)),
            extra: self
                .extra
                .iter()
                .map(|(n, v)| (n.clone(), pick(v, keep)))
                .collect(),
        }
    }

    /// Restricts the feature schema to `names`, in the given order.
    pub fn select_features<S: AsRef<str>>(&self, names: &[S]) -> Result<Self> {
        let indices = names
            .iter()
            .map(|n| {
                self.feature_index(n.as_ref()).ok_or_else(|| {
                    ScoringError::schema(format!("unknown feature '{}'", n.as_ref()))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let mut features = Vec::with_capacity(self.nrows() * indices.len());
        for row in 0..self.nrows() {
            let values = self.features_row(row);
            features.extend(indices.iter().map(|&i| values[i]));
        }

        let mut out = Self::new(
            self.run_ids.clone(),
            self.group_ids.clone(),
            self.decoys.clone(),
            names.iter().map(|x| x.as_ref().to_string()).collect(),
            features,
        )?;
        out.score = self.score.clone();
        out.q_value = self.q_value.clone();
        out.extra = self.extra.clone();
        Ok(out)
    }

    /// Adds or replaces a float column.
    ///
    /// `score` and `q_value` set the dedicated columns, a feature name replaces
    /// that feature's values and any other name is attached as a derived
    /// column. Identifier columns cannot be replaced.
    pub fn with_column(mut self, name: &str, values: Vec<f64>) -> Result<Self> {
        if values.len() != self.nrows() {
            return Err(ScoringError::schema(format!(
                "column '{}' has {} values but the table has {} rows",
                name,
                values.len(),
                self.nrows()
            )));
        }

        match name {
            RUN_ID_COLUMN | GROUP_ID_COLUMN | DECOY_COLUMN => {
                return Err(ScoringError::schema(format!(
                    "identifier column '{}' cannot be replaced",
                    name
                )));
            }
            SCORE_COLUMN => self.score = Some(values),
            Q_VALUE_COLUMN => self.q_value = Some(values),
            _ => {
                if let Some(idx) = self.feature_index(name) {
                    let n = self.nfeatures();
                    for (row, v) in values.into_iter().enumerate() {
                        self.features[row * n + idx] = v;
                    }
                } else if let Some((_, col)) = self.extra.iter_mut().find(|(n, _)| n == name) {
                    *col = values;
                } else {
                    self.extra.push((name.to_string(), values));
                }
            }
        }
        Ok(self)
    }

    pub fn with_scores(self, scores: Vec<f64>) -> Result<Self> {
        self.with_column(SCORE_COLUMN, scores)
    }

    pub fn with_q_values(self, q_values: Vec<f64>) -> Result<Self> {
        self.with_column(Q_VALUE_COLUMN, q_values)
    }

    /// The score column, or a [`ScoringError::Schema`] naming the caller.
    pub fn require_score(&self, context: &str) -> Result<&[f64]> {
        self.score().ok_or_else(|| {
            ScoringError::schema(format!("{} requires a score column", context))
        })
    }
}

fn is_reserved(name: &str) -> bool {
    matches!(
        name,
        RUN_ID_COLUMN | GROUP_ID_COLUMN | DECOY_COLUMN | SCORE_COLUMN | Q_VALUE_COLUMN
    )
}

/// Row by row construction of a [`PeakGroupTable`].
#[derive(Debug, Default)]
pub struct PeakGroupTableBuilder {
    run_ids: Vec<String>,
    group_ids: Vec<String>,
    decoys: Vec<bool>,
    feature_names: Vec<String>,
    features: Vec<f64>,
}

impl PeakGroupTableBuilder {
    pub fn new(feature_names: Vec<String>) -> Self {
        Self {
            feature_names,
            ..Default::default()
        }
    }

    pub fn push(
        &mut self,
        run_id: impl Into<String>,
        transition_group_id: impl Into<String>,
        is_decoy: bool,
        features: &[f64],
    ) -> Result<&mut Self> {
        if features.len() != self.feature_names.len() {
            return Err(ScoringError::schema(format!(
                "row {} has {} features, expected {}",
                self.run_ids.len(),
                features.len(),
                self.feature_names.len()
            )));
        }
        self.run_ids.push(run_id.into());
        self.group_ids.push(transition_group_id.into());
        self.decoys.push(is_decoy);
        self.features.extend_from_slice(features);
        Ok(self)
    }

    pub fn build(self) -> Result<PeakGroupTable> {
        PeakGroupTable::new(
            self.run_ids,
            self.group_ids,
            self.decoys,
            self.feature_names,
            self.features,
        )
    }
}
