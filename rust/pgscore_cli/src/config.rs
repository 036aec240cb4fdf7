use pgscore::ScoringConfig;
use serde::{
    Deserialize,
    Serialize,
};
use std::path::{
    Path,
    PathBuf,
};

use crate::cli::Cli;
use crate::errors::CliError;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Config {
    pub input: Option<InputConfig>,
    #[serde(default)]
    pub scoring: ScoringConfig,
    pub output: Option<OutputConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct InputConfig {
    pub path: PathBuf,
    /// Columns starting with this prefix are used as features.
    #[serde(default = "default_feature_prefix")]
    pub feature_prefix: String,
    /// Field delimiter, guessed from the extension when unset.
    #[serde(default)]
    pub delimiter: Option<char>,
}

fn default_feature_prefix() -> String {
    "var_".to_string()
}

impl InputConfig {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            feature_prefix: default_feature_prefix(),
            delimiter: None,
        }
    }

    pub fn delimiter_byte(&self) -> Result<u8, CliError> {
        match self.delimiter {
            Some(c) if c.is_ascii() => Ok(c as u8),
            Some(c) => Err(CliError::Config {
                source: format!("delimiter must be a single ascii character, got {:?}", c),
            }),
            None => Ok(guess_delimiter(&self.path)),
        }
    }
}

fn guess_delimiter(path: &Path) -> u8 {
    match path.extension().and_then(|x| x.to_str()) {
        Some("csv") => b',',
        _ => b'\t',
    }
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OutputConfig {
    pub directory: PathBuf,
}

impl Config {
    pub fn from_reader<R: std::io::Read>(reader: R) -> Result<Self, CliError> {
        serde_json::from_reader(reader).map_err(|e| CliError::ParseError { msg: e.to_string() })
    }

    /// Command line values win over the config file.
    pub fn apply_cli_args(&mut self, args: &Cli) {
        if let Some(input) = &args.input {
            match &mut self.input {
                Some(x) => x.path = input.clone(),
                None => self.input = Some(InputConfig::new(input.clone())),
            }
        }
        if let Some(output_dir) = &args.output_dir {
            self.output = Some(OutputConfig {
                directory: output_dir.clone(),
            });
        }
        if let Some(seed) = args.seed {
            self.scoring.folds.seed = seed;
        }
        if let Some(iterations) = args.iterations {
            self.scoring.learner.num_iterations = iterations;
        }
        if let Some(folds) = args.folds {
            self.scoring.folds.n_folds = folds;
        }
    }

    pub fn validate(&self) -> Result<(), CliError> {
        if self.input.is_none() {
            return Err(CliError::Config {
                source: "No input provided, please provide one in either the config file or with the --input flag".to_string(),
            });
        }
        if self.output.is_none() {
            return Err(CliError::Config {
                source: "No output directory provided, please provide one in either the config file or with the --output-dir flag".to_string(),
            });
        }
        self.scoring.validate()?;
        Ok(())
    }
}
