use std::collections::HashSet;
use std::sync::{
    Arc,
    Mutex,
};

use pgscore::ml::LinearDiscriminant;
use pgscore::{
    Classifier,
    ClassifierFactory,
    FeatureMatrix,
    LearnerConfig,
    PeakGroupTable,
    ScoringConfig,
    ScoringError,
    ScoringPipeline,
    TargetDecoy,
    assign_folds,
    estimate,
    fit_score,
};

fn learner_config() -> LearnerConfig {
    LearnerConfig {
        primary_feature: "main".to_string(),
        min_training_rows: 2,
        ..Default::default()
    }
}

fn four_rows() -> PeakGroupTable {
    let mut builder = PeakGroupTable::builder(vec!["main".into()]);
    builder.push("r1", "1", false, &[0.8]).unwrap();
    builder.push("r1", "1", true, &[0.3]).unwrap();
    builder.push("r1", "2", false, &[0.9]).unwrap();
    builder.push("r1", "2", true, &[0.1]).unwrap();
    builder.build().unwrap()
}

/// `ngroups` target/decoy pairs per run, targets well above decoys on `main`.
fn synthetic_table(runs: &[&str], ngroups: usize) -> PeakGroupTable {
    let mut builder = PeakGroupTable::builder(vec!["main".into(), "var_shape".into()]);
    for (r, run) in runs.iter().enumerate() {
        for i in 0..ngroups {
            let group = format!("PEPTIDE_{}", i);
            let jitter = ((i * 7 + r * 3) % 10) as f64 / 10.0;
            let shape = ((i * 13 + r) % 17) as f64 / 17.0;
            builder
                .push(*run, &group, false, &[2.0 + jitter + r as f64, shape])
                .unwrap();
            builder
                .push(*run, &group, true, &[jitter + r as f64, 1.0 - shape])
                .unwrap();
        }
    }
    builder.build().unwrap()
}

#[test]
fn test_four_row_scenario_end_to_end() {
    let table = four_rows();
    let folds = assign_folds(&table, 2, 0).unwrap();
    let learned = fit_score(&table, &folds, 1, &LinearDiscriminant::default(), learner_config())
        .unwrap();
    let stats = estimate(&learned.table).unwrap();

    assert_eq!(stats.q_values[0], 0.0);
    assert_eq!(stats.q_values[2], 0.0);
    assert!(stats.q_values[1] > 0.0);
    assert!(stats.q_values[3] > 0.0);
}

#[test]
fn test_pipeline_on_four_rows() {
    let mut config = ScoringConfig::default();
    config.folds.n_folds = 2;
    config.learner = LearnerConfig {
        num_iterations: 1,
        ..learner_config()
    };
    let out = ScoringPipeline::new(config).unwrap().run(&four_rows()).unwrap();

    let q = out.table.q_values().unwrap();
    assert_eq!(q[0], 0.0);
    assert_eq!(q[2], 0.0);
    assert!(out.warnings.is_empty());
}

/// Remembers which rows (through a `row_id` feature) each model was trained on
/// and which rows it was asked to score.
#[derive(Default)]
struct RecordingFactory {
    log: Arc<Mutex<Vec<(Vec<usize>, Vec<usize>)>>>,
}

struct RecordingModel {
    trained_on: Vec<usize>,
    log: Arc<Mutex<Vec<(Vec<usize>, Vec<usize>)>>>,
}

fn row_ids(features: &FeatureMatrix) -> Vec<usize> {
    features.rows().map(|r| r[1] as usize).collect()
}

impl Classifier for RecordingModel {
    fn predict(&self, features: &FeatureMatrix) -> Vec<f64> {
        self.log
            .lock()
            .unwrap()
            .push((self.trained_on.clone(), row_ids(features)));
        features.rows().map(|r| r[0]).collect()
    }
}

impl ClassifierFactory for RecordingFactory {
    type Model = RecordingModel;

    fn train(
        &self,
        features: &FeatureMatrix,
        _labels: &[TargetDecoy],
    ) -> pgscore::Result<RecordingModel> {
        Ok(RecordingModel {
            trained_on: row_ids(features),
            log: self.log.clone(),
        })
    }
}

#[test]
fn test_rows_are_never_scored_by_a_model_trained_on_their_fold() {
    let mut builder = PeakGroupTable::builder(vec!["main".into(), "row_id".into()]);
    for i in 0..20 {
        let group = format!("G{}", i);
        builder
            .push("run", &group, false, &[1.0 + i as f64 * 0.1, (2 * i) as f64])
            .unwrap();
        builder
            .push("run", &group, true, &[i as f64 * 0.05, (2 * i + 1) as f64])
            .unwrap();
    }
    let table = builder.build().unwrap();
    let folds = assign_folds(&table, 3, 7).unwrap();
    let row_folds = folds.row_folds(&table).unwrap();

    let factory = RecordingFactory::default();
    let config = LearnerConfig {
        standardize_on_decoys: false,
        ..learner_config()
    };
    let out = fit_score(&table, &folds, 2, &factory, config).unwrap();
    assert!(out.warnings.is_empty(), "{:?}", out.warnings);

    let log = factory.log.lock().unwrap();
    assert_eq!(log.len(), 3 * 2);
    for (trained, scored) in log.iter() {
        let scored_folds: HashSet<u8> = scored.iter().map(|&r| row_folds[r]).collect();
        assert_eq!(scored_folds.len(), 1);
        let fold = *scored_folds.iter().next().unwrap();
        assert!(trained.iter().all(|&r| row_folds[r] != fold));

        let trained_groups: HashSet<&str> = trained
            .iter()
            .map(|&r| table.transition_group_ids()[r].as_str())
            .collect();
        assert!(
            scored
                .iter()
                .all(|&r| !trained_groups.contains(table.transition_group_ids()[r].as_str()))
        );
    }
}

#[test]
fn test_pipeline_keeps_schema_and_populates_outputs() {
    let table = synthetic_table(&["run_a", "run_b"], 30);
    let mut config = ScoringConfig::default();
    config.learner.primary_feature = "main".into();
    config.learner.num_iterations = 3;
    config.normalization.enabled = true;
    config.error_statistics.compute_local_fdr = true;

    let out = ScoringPipeline::new(config).unwrap().run(&table).unwrap();
    let scored = &out.table;

    assert_eq!(scored.nrows(), table.nrows());
    assert_eq!(scored.run_ids(), table.run_ids());
    assert_eq!(scored.transition_group_ids(), table.transition_group_ids());
    assert_eq!(scored.decoys(), table.decoys());
    assert_eq!(scored.feature_names(), table.feature_names());
    for i in 0..table.nrows() {
        assert_eq!(scored.features_row(i), table.features_row(i));
    }

    let scores = scored.score().unwrap();
    let q = scored.q_values().unwrap();
    assert!(scores.iter().all(|s| s.is_finite()));
    assert!(q.iter().all(|v| (0.0..=1.0).contains(v)));
    assert!(scored.extra_column("p_value").is_some());
    assert!(scored.extra_column("pep").is_some());
    assert_eq!(out.iterations.len(), 3);

    // Lower scores never get a lower q-value
    let mut order: Vec<usize> = (0..scores.len()).collect();
    order.sort_by(|&a, &b| scores[b].total_cmp(&scores[a]));
    for w in order.windows(2) {
        assert!(q[w[0]] <= q[w[1]]);
    }

    // Separable data: every target passes before any decoy
    let summary = out.statistics.summary(&[0.0]);
    assert_eq!(summary[0].targets, table.num_targets());
    assert_eq!(summary[0].decoys, 0);
}

#[test]
fn test_fdr_at_loosest_threshold_equals_decoy_ratio() {
    let table = synthetic_table(&["run"], 25);
    let scores: Vec<f64> = (0..table.nrows())
        .map(|i| table.features_row(i)[1])
        .collect();
    let table = table.with_scores(scores).unwrap();
    let stats = estimate(&table).unwrap();
    let loosest = stats.thresholds.last().unwrap();
    assert_eq!(loosest.targets_ge, table.num_targets());
    assert_eq!(loosest.decoys_ge, table.num_decoys());
    let ratio = table.num_decoys() as f64 / table.num_targets() as f64;
    assert_eq!(loosest.fdr, ratio);
    assert!(loosest.q_value <= loosest.fdr);
}

struct NanFactory;
struct NanModel;

impl Classifier for NanModel {
    fn predict(&self, features: &FeatureMatrix) -> Vec<f64> {
        vec![f64::NAN; features.nrows()]
    }
}

impl ClassifierFactory for NanFactory {
    type Model = NanModel;

    fn train(&self, _: &FeatureMatrix, _: &[TargetDecoy]) -> pgscore::Result<NanModel> {
        Ok(NanModel)
    }
}

#[test]
fn test_nan_scores_abort_with_numeric_instability() {
    let table = four_rows();
    let folds = assign_folds(&table, 2, 0).unwrap();
    let err = fit_score(&table, &folds, 1, &NanFactory, learner_config()).unwrap_err();
    assert!(matches!(err, ScoringError::NumericInstability { .. }), "{}", err);
}

#[test]
fn test_fold_assignment_is_deterministic() {
    let table = synthetic_table(&["a", "b"], 40);
    let first = assign_folds(&table, 4, 123).unwrap();
    let second = assign_folds(&table, 4, 123).unwrap();
    assert_eq!(first, second);
    assert_eq!(first.num_groups(), 40);
    assert_eq!(first.fold_sizes(), vec![10, 10, 10, 10]);

    let err = assign_folds(&table, 41, 0).unwrap_err();
    assert!(matches!(err, ScoringError::Config { .. }));
}
