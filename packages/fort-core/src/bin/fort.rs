//! fORT CLI - Command line interface for portfolio back-tests.
//!
//! Reads a JSON price table, runs every configured portfolio group, and
//! prints the results as JSON or a plain-text summary.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fort_core::{
    engine::run_backtest,
    provider::JsonFileProvider,
    report::{JsonSink, PresentationSink, SummarySink},
    universe::resolve_universe,
    ApiResponse, EngineConfig, Period,
};
use serde_json::json;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "fort")]
#[command(about = "fORT - buy-and-hold ETF portfolio back-tests")]
#[command(version)]
struct Cli {
    /// Configuration file (defaults to ~/.fort/config.toml or FORT_CONFIG)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a back-test
    Run {
        /// JSON price table
        #[arg(short, long)]
        prices: PathBuf,
        /// Lookback window (ytd, 6mo, 1y, 2y, 5y, max)
        #[arg(long)]
        period: Option<Period>,
        /// Deduct dividend withholding tax drag
        #[arg(long)]
        tax: bool,
        /// Output format
        #[arg(short, long, value_enum, default_value_t = Format::Json)]
        format: Format,
    },
    /// List every symbol the configured portfolios need
    Universe,
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Json,
    Text,
}

fn main() -> ExitCode {
    // Logs go to stderr so stdout stays machine-readable
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(tracing_subscriber::fmt::layer().with_writer(io::stderr))
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{:#}", e);
            if let Ok(output) = serde_json::to_string_pretty(&ApiResponse::<()>::err(format!("{:#}", e))) {
                println!("{}", output);
            }
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Run {
            prices,
            period,
            tax,
            format,
        } => handle_run(config, &prices, period, tax, format),
        Commands::Universe => handle_universe(&config),
        Commands::Config => {
            print!("{}", config.to_toml()?);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let path = EngineConfig::default_path();
            EngineConfig::load_or_default(&path)
                .with_context(|| format!("failed to load config from {}", path.display()))
        }
    }
}

fn handle_run(
    mut config: EngineConfig,
    prices: &Path,
    period: Option<Period>,
    tax: bool,
    format: Format,
) -> Result<()> {
    if let Some(period) = period {
        config.period = period;
    }
    config.apply_tax |= tax;

    let provider = JsonFileProvider::new(prices);
    let report = run_backtest(&config, &provider).context("back-test failed")?;

    let stdout = io::stdout().lock();
    match format {
        Format::Json => JsonSink::new(stdout).present(&report)?,
        Format::Text => SummarySink::new(stdout).present(&report)?,
    }
    Ok(())
}

fn handle_universe(config: &EngineConfig) -> Result<()> {
    let symbols = resolve_universe(config.portfolios(), &config.fx_symbol);
    println!(
        "{}",
        serde_json::to_string_pretty(&ApiResponse::ok(json!({
            "symbols": symbols,
            "fx_symbol": config.fx_symbol,
        })))?
    );
    Ok(())
}
