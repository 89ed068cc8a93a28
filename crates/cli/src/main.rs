//! Food Freshness CLI
//!
//! Classifies food photos locally or through a running freshness server.
//! Results are printed as JSON on stdout; logs go to stderr.
//!
//! Exit codes: 0 on a labelled result, 1 when the image could not be
//! classified, 2 when the command could not run at all.

mod client;
mod commands;
mod config;
mod output;

use anyhow::{Context, Result};
use clap::error::ErrorKind;
use clap::{Parser, Subcommand};
use commands::{fetch_model, predict, remote};
use freshness_lib::model::DEFAULT_DOWNLOAD_TIMEOUT;
use freshness_lib::PredictionResult;
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Food Freshness CLI
#[derive(Parser)]
#[command(name = "freshness")]
#[command(author, version, about = "CLI for the Food Freshness classifier", long_about = None)]
pub struct Cli {
    /// Output format
    #[arg(long, short, global = true, default_value = "json")]
    pub format: output::OutputFormat,

    /// Enable verbose logging on stderr
    #[arg(long, short, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Classify an image locally
    Predict {
        /// Image file to classify
        #[arg(long, short)]
        image: PathBuf,

        /// Model artifact (ONNX)
        #[arg(long, env = "FOOD_FRESHNESS_MODEL")]
        model: Option<PathBuf>,

        /// URL to download the model from when it is missing
        #[arg(long, env = "FOOD_FRESHNESS_MODEL_URL")]
        model_url: Option<String>,

        /// Model download timeout in seconds
        #[arg(long, default_value_t = DEFAULT_DOWNLOAD_TIMEOUT.as_secs())]
        timeout_secs: u64,
    },

    /// Classify an image with a running freshness server
    Remote {
        /// Image file to upload
        #[arg(long, short)]
        image: PathBuf,

        /// Server endpoint
        #[arg(long, env = "FRESHNESS_API_URL")]
        api_url: Option<String>,
    },

    /// Download and validate the model artifact
    FetchModel {
        /// Where to store the model artifact
        #[arg(long, env = "FOOD_FRESHNESS_MODEL")]
        model: Option<PathBuf>,

        /// URL to download the model from
        #[arg(long, env = "FOOD_FRESHNESS_MODEL_URL")]
        model_url: Option<String>,

        /// Model download timeout in seconds
        #[arg(long, default_value_t = DEFAULT_DOWNLOAD_TIMEOUT.as_secs())]
        timeout_secs: u64,
    },
}

fn main() -> ExitCode {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => return usage_failure(e),
    };

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let runtime = match tokio::runtime::Runtime::new().context("Failed to start async runtime") {
        Ok(runtime) => runtime,
        Err(e) => return environment_failure(e),
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => environment_failure(e),
    }
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let config = config::Config::load()?;

    match cli.command {
        Commands::Predict {
            image,
            model,
            model_url,
            timeout_secs,
        } => {
            let result = predict::predict_image(
                image,
                config.model_path(model),
                config.model_url(model_url),
                timeout(timeout_secs)?,
            )
            .await?;
            report(&result, cli.format)
        }
        Commands::Remote { image, api_url } => {
            let result = remote::predict_remote(&config.api_url(api_url), &image).await?;
            report(&result, cli.format)
        }
        Commands::FetchModel {
            model,
            model_url,
            timeout_secs,
        } => {
            let model_url = config
                .model_url(model_url)
                .context("No model URL given (use --model-url or FOOD_FRESHNESS_MODEL_URL)")?;
            let status = fetch_model::fetch_model(
                config.model_path(model),
                Some(model_url),
                timeout(timeout_secs)?,
            )
            .await?;
            output::print_status(&status, cli.format)?;
            Ok(if status.is_loaded() {
                ExitCode::SUCCESS
            } else {
                ExitCode::from(1)
            })
        }
    }
}

fn timeout(secs: u64) -> Result<Duration> {
    if secs == 0 {
        anyhow::bail!("--timeout-secs must be greater than zero");
    }
    Ok(Duration::from_secs(secs))
}

fn report(result: &PredictionResult, format: output::OutputFormat) -> Result<ExitCode> {
    output::print_result(result, format)?;
    Ok(if result.is_terminal_error() {
        ExitCode::from(1)
    } else {
        ExitCode::SUCCESS
    })
}

/// Print `{"error": ...}` and exit 2
fn environment_failure(e: anyhow::Error) -> ExitCode {
    println!("{}", serde_json::json!({ "error": format!("{:#}", e) }));
    ExitCode::from(2)
}

/// Help and version print as usual; bad arguments are an environment failure
fn usage_failure(e: clap::Error) -> ExitCode {
    match e.kind() {
        ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => e.exit(),
        _ => {
            let rendered = e.to_string();
            let message = rendered
                .lines()
                .next()
                .unwrap_or_default()
                .trim_start_matches("error: ");
            environment_failure(anyhow::anyhow!("invalid arguments: {}", message))
        }
    }
}
