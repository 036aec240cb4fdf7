use clap::Parser;
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to the JSON configuration file
    #[arg(short, long)]
    pub config: PathBuf,

    /// Peak group table to score, tab or comma separated (will over-write the config file)
    #[arg(short, long)]
    pub input: Option<PathBuf>,

    /// Path to the output directory
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Seed for the fold assignment (will over-write the config file)
    #[arg(long)]
    pub seed: Option<u64>,

    /// Number of semi-supervised iterations (will over-write the config file)
    #[arg(long)]
    pub iterations: Option<usize>,

    /// Number of cross validation folds (will over-write the config file)
    #[arg(long)]
    pub folds: Option<u8>,
}
