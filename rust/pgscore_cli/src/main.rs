mod cli;
mod config;
mod errors;
mod processing;

use clap::Parser;
use tracing::info;
use tracing::level_filters::LevelFilter;
use tracing_subscriber::EnvFilter;

use cli::Cli;
use config::Config;

fn main() -> std::result::Result<(), errors::CliError> {
    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::builder()
                .with_default_directive(LevelFilter::INFO.into())
                .from_env_lossy(),
        ) // This uses RUST_LOG environment variable
        .init();

    let args = Cli::parse();

    let conf = match std::fs::File::open(&args.config) {
        Ok(x) => x,
        Err(e) => {
            return Err(errors::CliError::Io {
                source: e.to_string(),
                path: Some(args.config.to_string_lossy().to_string()),
            });
        }
    };
    let mut config = Config::from_reader(std::io::BufReader::new(conf))?;
    config.apply_cli_args(&args);
    config.validate()?;
    info!("Parsed configuration: {:#?}", config);

    if let Some(output) = &config.output {
        std::fs::create_dir_all(&output.directory).map_err(|e| errors::CliError::Io {
            source: e.to_string(),
            path: Some(output.directory.to_string_lossy().to_string()),
        })?;
    }

    processing::process(&config)
}
