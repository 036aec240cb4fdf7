use indicatif::{
    ProgressBar,
    ProgressStyle,
};
use pgscore::stats::{
    ErrorSummaryRow,
    P_VALUE_COLUMN,
    PEP_COLUMN,
};
use pgscore::table::{
    DECOY_COLUMN,
    GROUP_ID_COLUMN,
    Q_VALUE_COLUMN,
    RUN_ID_COLUMN,
    SCORE_COLUMN,
};
use pgscore::{
    PeakGroupTable,
    PipelineOutput,
    ScoringPipeline,
};
use rayon::prelude::*;
use serde::Serialize;
use std::fs::File;
use std::io::{
    BufReader,
    BufWriter,
    Read,
    Write,
};
use std::path::Path;
use std::time::{
    Duration,
    Instant,
};
use tracing::{
    debug,
    info,
    warn,
};

use crate::config::{
    Config,
    InputConfig,
    OutputConfig,
};
use crate::errors::CliError;

const SCORED_FILE: &str = "scored.tsv";
const REPORT_FILE: &str = "error_statistics.json";

fn io_error(e: std::io::Error, path: &Path) -> CliError {
    CliError::Io {
        source: e.to_string(),
        path: Some(path.to_string_lossy().to_string()),
    }
}

fn parse_decoy(value: &str) -> Option<bool> {
    match value.trim() {
        "1" | "true" | "True" | "TRUE" => Some(true),
        "0" | "false" | "False" | "FALSE" => Some(false),
        _ => None,
    }
}

/// Reads a delimited peak group table.
///
/// Identifier columns are required, features are every column starting with
/// `feature_prefix` plus `primary_feature`.
pub fn read_table<R: Read>(
    reader: R,
    delimiter: u8,
    feature_prefix: &str,
    primary_feature: &str,
) -> Result<PeakGroupTable, CliError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .from_reader(reader);

    let headers: Vec<String> = csv_reader
        .headers()?
        .iter()
        .map(|s| s.trim().to_string())
        .collect();
    let find = |name: &str| -> Result<usize, CliError> {
        headers
            .iter()
            .position(|h| h == name)
            .ok_or_else(|| CliError::DataReading {
                source: format!("missing required column '{}'", name),
            })
    };
    let run_idx = find(RUN_ID_COLUMN)?;
    let group_idx = find(GROUP_ID_COLUMN)?;
    let decoy_idx = find(DECOY_COLUMN)?;

    let (feature_idx, feature_names): (Vec<usize>, Vec<String>) = headers
        .iter()
        .enumerate()
        .filter(|(_, h)| h.starts_with(feature_prefix) || h.as_str() == primary_feature)
        .map(|(i, h)| (i, h.clone()))
        .unzip();
    if feature_names.is_empty() {
        return Err(CliError::DataReading {
            source: format!(
                "no feature columns found (prefix '{}', primary '{}')",
                feature_prefix, primary_feature
            ),
        });
    }
    debug!("Using {} feature columns: {:?}", feature_names.len(), feature_names);

    let mut builder = PeakGroupTable::builder(feature_names.clone());
    let mut values = vec![0.0; feature_idx.len()];
    for (line, record) in csv_reader.records().enumerate() {
        let record = record?;
        // Header is line 1
        let line = line + 2;
        let field = |i: usize| record.get(i).unwrap_or("");

        let decoy = parse_decoy(field(decoy_idx)).ok_or_else(|| CliError::DataReading {
            source: format!("line {}: invalid decoy flag '{}'", line, field(decoy_idx)),
        })?;
        let columns = feature_idx.iter().zip(feature_names.iter());
        for (v, (&i, name)) in values.iter_mut().zip(columns) {
            *v = field(i)
                .trim()
                .parse::<f64>()
                .map_err(|_| CliError::DataReading {
                    source: format!("line {}: invalid value '{}' for {}", line, field(i), name),
                })?;
        }
        builder.push(field(run_idx), field(group_idx), decoy, &values)?;
    }
    Ok(builder.build()?)
}

pub fn read_table_file(
    input: &InputConfig,
    primary_feature: &str,
) -> Result<PeakGroupTable, CliError> {
    let file = File::open(&input.path).map_err(|e| io_error(e, &input.path))?;
    read_table(
        BufReader::new(file),
        input.delimiter_byte()?,
        &input.feature_prefix,
        primary_feature,
    )
}

/// Writes identifiers, decoy flag and every score derived column.
pub fn write_scored<W: Write>(table: &PeakGroupTable, writer: W) -> Result<(), CliError> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(b'\t')
        .from_writer(writer);

    let mut float_columns: Vec<(&str, &[f64])> = Vec::new();
    if let Some(x) = table.score() {
        float_columns.push((SCORE_COLUMN, x));
    }
    if let Some(x) = table.q_values() {
        float_columns.push((Q_VALUE_COLUMN, x));
    }
    for name in [P_VALUE_COLUMN, PEP_COLUMN] {
        if let Some(x) = table.extra_column(name) {
            float_columns.push((name, x));
        }
    }

    let mut headers = vec![RUN_ID_COLUMN, GROUP_ID_COLUMN, DECOY_COLUMN];
    headers.extend(float_columns.iter().map(|(n, _)| *n));
    wtr.write_record(&headers)?;

    let records = (0..table.nrows())
        .into_par_iter()
        .map(|i| {
            let mut record = csv::StringRecord::new();
            record.push_field(&table.run_ids()[i]);
            record.push_field(&table.transition_group_ids()[i]);
            record.push_field(if table.decoys()[i] { "1" } else { "0" });
            for (_, col) in float_columns.iter() {
                record.push_field(&col[i].to_string());
            }
            record
        })
        .collect::<Vec<csv::StringRecord>>();
    for record in records.iter() {
        wtr.write_record(record)?;
    }
    wtr.flush().map_err(|e| CliError::Io {
        source: e.to_string(),
        path: None,
    })?;
    Ok(())
}

#[derive(Debug, Serialize)]
pub struct ErrorReport {
    pub pi0: f64,
    pub num_targets: usize,
    pub num_decoys: usize,
    pub iterations: usize,
    pub converged: bool,
    pub warnings: Vec<String>,
    pub summary: Vec<ErrorSummaryRow>,
}

impl ErrorReport {
    pub fn new(output: &PipelineOutput, cutoffs: &[f64]) -> Self {
        Self {
            pi0: output.statistics.pi0,
            num_targets: output.statistics.num_targets,
            num_decoys: output.statistics.num_decoys,
            iterations: output.iterations.len(),
            converged: output.converged,
            warnings: output.warnings.iter().map(|w| w.to_string()).collect(),
            summary: output.statistics.summary(cutoffs),
        }
    }
}

pub fn process(config: &Config) -> Result<(), CliError> {
    let (Some(input), Some(output)) = (&config.input, &config.output) else {
        return Err(CliError::Config {
            source: "Both an input and an output directory are needed".to_string(),
        });
    };
    let start = Instant::now();

    info!("Reading peak groups from {:?}", input.path);
    let table = read_table_file(input, &config.scoring.learner.primary_feature)?;
    info!(
        "Read {} peak groups ({} targets, {} decoys) with {} features",
        table.nrows(),
        table.num_targets(),
        table.num_decoys(),
        table.nfeatures()
    );

    let pipeline = ScoringPipeline::new(config.scoring.clone())?;
    let style = ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
        .unwrap_or_else(|_| ProgressStyle::default_spinner());
    let spinner = ProgressBar::new_spinner().with_style(style);
    spinner.set_message("Scoring peak groups");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let result = pipeline.run(&table);
    spinner.finish_and_clear();
    let result = result?;

    if !result.warnings.is_empty() {
        warn!("{} folds could not be trained and kept their scores", result.warnings.len());
    }
    write_outputs(&result, config, output)?;
    info!("Finished in {:?}", start.elapsed());
    Ok(())
}

fn write_outputs(
    result: &PipelineOutput,
    config: &Config,
    output: &OutputConfig,
) -> Result<(), CliError> {
    let scored_path = output.directory.join(SCORED_FILE);
    let file = File::create(&scored_path).map_err(|e| io_error(e, &scored_path))?;
    write_scored(&result.table, BufWriter::new(file))?;
    info!("Wrote scored peak groups to {:?}", scored_path);

    let report = ErrorReport::new(result, &config.scoring.error_statistics.summary_cutoffs);
    for row in report.summary.iter() {
        info!(
            "q-value <= {:.3}: {} targets, {} decoys",
            row.q_value_cutoff, row.targets, row.decoys
        );
    }
    let report_path = output.directory.join(REPORT_FILE);
    let file = File::create(&report_path).map_err(|e| io_error(e, &report_path))?;
    serde_json::to_writer_pretty(BufWriter::new(file), &report).map_err(|e| CliError::Io {
        source: e.to_string(),
        path: Some(report_path.to_string_lossy().to_string()),
    })?;
    info!("Wrote error statistics to {:?}", report_path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    const TABLE: &str = "\
run_id\ttransition_group_id\tdecoy\tmain_var_xx_swath_prelim_score\tvar_a\tother
r1\t1\t0\t0.8\t1.0\tx
r1\t1\t1\t0.3\t2.0\tx
r1\t2\tfalse\t0.9\t3.0\tx
r1\t2\ttrue\t0.1\t4.0\tx
";

    #[test]
    fn test_read_table() {
        let table = read_table(TABLE.as_bytes(), b'\t', "var_", "main_var_xx_swath_prelim_score")
            .unwrap();
        assert_eq!(table.nrows(), 4);
        assert_eq!(table.feature_names(), &["main_var_xx_swath_prelim_score", "var_a"]);
        assert_eq!(table.decoys(), &[false, true, false, true]);
        assert_eq!(table.features_row(2), &[0.9, 3.0]);
        assert_eq!(table.transition_group_ids()[3], "2");
    }

    #[test]
    fn test_read_table_errors() {
        let missing = "run_id\tdecoy\tvar_a\nr1\t0\t1.0\n";
        let err = read_table(missing.as_bytes(), b'\t', "var_", "main").unwrap_err();
        assert!(matches!(err, CliError::DataReading { .. }));

        let bad_flag = "run_id,transition_group_id,decoy,var_a\nr1,1,maybe,1.0\n";
        let err = read_table(bad_flag.as_bytes(), b',', "var_", "main").unwrap_err();
        assert!(err.to_string().contains("line 2"), "{}", err);

        let bad_value = "run_id,transition_group_id,decoy,var_a\nr1,1,0,abc\n";
        assert!(read_table(bad_value.as_bytes(), b',', "var_", "main").is_err());

        // Two targets for one group in one run
        let dup = "run_id,transition_group_id,decoy,var_a\nr1,1,0,1.0\nr1,1,0,2.0\n";
        let err = read_table(dup.as_bytes(), b',', "var_", "main").unwrap_err();
        assert!(matches!(err, CliError::Scoring { .. }));
    }

    #[test]
    fn test_write_scored() {
        let table = read_table(TABLE.as_bytes(), b'\t', "var_", "main_var_xx_swath_prelim_score")
            .unwrap()
            .with_scores(vec![1.0, 0.0, 2.0, -1.0])
            .unwrap()
            .with_q_values(vec![0.0, 0.5, 0.0, 1.0])
            .unwrap();
        let mut out = Vec::new();
        write_scored(&table, &mut out).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[0], "run_id\ttransition_group_id\tdecoy\tscore\tq_value");
        assert_eq!(lines[2], "r1\t1\t1\t0\t0.5");
        assert_eq!(lines.len(), 5);
    }
}
