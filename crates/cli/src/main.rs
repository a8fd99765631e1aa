//! Experiment engine CLI
//!
//! Offline tooling for the experiment allocation engine.

use abtest_cli::commands::{BucketCommand, SampleSizeCommand, SimulateCommand};
use abtest_config::{EngineConfig, ObservabilityConfig};
use clap::{Parser, Subcommand};
use colored::Colorize;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(
    name = "abtest",
    version,
    about = "Deterministic experiment allocation and statistical decisions",
    long_about = "Command-line tools for the experiment allocation engine.\n\n\
                  Features:\n\
                  - Inspect the bucket and variant of a subject\n\
                  - Plan the sample size of an experiment\n\
                  - Simulate an experiment end to end"
)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true, help = "Enable verbose output")]
    verbose: bool,

    /// Configuration file
    #[arg(
        short,
        long,
        global = true,
        value_name = "FILE",
        env = "ABTEST_CONFIG",
        help = "Path to configuration file"
    )]
    config: Option<std::path::PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the bucket and variant of a subject
    #[command(name = "bucket", about = "Show where a subject is allocated")]
    Bucket(BucketCommand),

    /// Visitors needed per variant
    #[command(name = "sample-size", about = "Calculate the required sample size")]
    SampleSize(SampleSizeCommand),

    /// Run a synthetic experiment
    #[command(name = "simulate", about = "Simulate an experiment in memory")]
    Simulate(SimulateCommand),
}

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = EngineConfig::load(cli.config.clone())?;
    init_tracing(cli.verbose, &config.observability);

    match &cli.command {
        Commands::Bucket(cmd) => cmd.execute()?,
        Commands::SampleSize(cmd) => cmd.execute(config.ab_testing.significance_level)?,
        Commands::Simulate(cmd) => cmd.execute(&config).await?,
    }

    Ok(())
}

/// Initialize tracing/logging on stderr
fn init_tracing(verbose: bool, observability: &ObservabilityConfig) {
    let filter = if verbose {
        EnvFilter::new("decision=debug,abtest_store=debug,abtest_cli=debug,info")
    } else {
        EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(&observability.log_level))
    };

    let registry = tracing_subscriber::registry().with(filter);
    if observability.json_logging {
        registry
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        registry
            .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
            .init();
    }
}
