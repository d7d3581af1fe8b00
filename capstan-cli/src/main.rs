//! Capstan CLI - Command-line tools for capability manifests

use anyhow::{Context, Result};
use capstan_core::config::CapstanConfig;
use capstan_core::declaration::BuildMode;
use capstan_core::manifest::Manifest;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::debug;

#[derive(Parser)]
#[command(name = "capstan")]
#[command(about = "Capstan capability manifest tools", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Validate a capability manifest
    Check {
        /// Manifest file (.toml, .yaml, .yml or .json)
        manifest: PathBuf,
        /// Report errors without failing, as a lenient build would
        #[arg(long)]
        lenient: bool,
    },
    /// Print the effective configuration
    Config {
        /// Configuration file (defaults to capstan.toml and CAPSTAN_CONFIG_PATH)
        #[arg(short, long, env = "CAPSTAN_CONFIG_PATH")]
        file: Option<PathBuf>,
    },
    /// Version information
    Version,
}

fn check(path: &PathBuf, lenient: bool) -> Result<ExitCode> {
    let manifest = Manifest::load(path).with_context(|| format!("Failed to load {}", path.display()))?;
    let declared = manifest.len();
    let registry = manifest.into_registry()?;

    let mode = if lenient { BuildMode::Lenient } else { BuildMode::Strict };
    debug!(path = %path.display(), declared, ?mode, "Validating manifest");
    let report = registry.validate(mode);

    for error in &report.errors {
        println!("error: {}", error);
    }
    for warning in &report.warnings {
        println!("warning: {}", warning);
    }
    println!(
        "{}: {} declarations, {} errors, {} warnings",
        path.display(),
        declared,
        report.errors.len(),
        report.warnings.len()
    );

    if report.is_ok() || lenient {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // stdout is reserved for command output
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { manifest, lenient } => check(&manifest, lenient),
        Commands::Config { file } => {
            let config = match file {
                Some(path) => CapstanConfig::from_file(&path)?,
                None => CapstanConfig::load()?,
            };
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Version => {
            println!("capstan {}", env!("CARGO_PKG_VERSION"));
            println!("capstan-core {}", capstan_core::VERSION);
            Ok(ExitCode::SUCCESS)
        }
    }
}
