//! Output formatting utilities

use anyhow::Result;
use clap::ValueEnum;
use colored::Colorize;
use freshness_lib::{ClassLabel, PredictionResult, PredictionSource, ProviderStatus};
use serde::Serialize;
use tabled::{settings::Style, Table, Tabled};

/// Output format for CLI commands
#[derive(Debug, Clone, Copy, Default, ValueEnum)]
pub enum OutputFormat {
    /// Single-line JSON (default)
    #[default]
    Json,
    /// Human-readable table
    Table,
}

/// Row for the probability table
#[derive(Tabled)]
struct ProbabilityRow {
    #[tabled(rename = "Class")]
    class: String,
    #[tabled(rename = "Probability")]
    probability: String,
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string(value)?);
    Ok(())
}

/// Print a prediction result
pub fn print_result(result: &PredictionResult, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(result),
        OutputFormat::Table => {
            let (Some(label), Some(probabilities)) = (result.label, result.probabilities) else {
                print_error(result.error.as_deref().unwrap_or("prediction failed"));
                return Ok(());
            };

            let source = match result.source {
                Some(PredictionSource::Primary) => "primary model".green(),
                Some(PredictionSource::Fallback) => "heuristic fallback".yellow(),
                None => "unknown".normal(),
            };
            println!("{} {} ({})", "Label:".bold(), color_label(label), source);

            let rows: Vec<ProbabilityRow> = probabilities
                .iter()
                .map(|(class, probability)| ProbabilityRow {
                    class: class.to_string(),
                    probability: format_probability(probability),
                })
                .collect();
            let table = Table::new(rows).with(Style::rounded()).to_string();
            println!("{}", table);

            if let Some(diagnostic) = &result.error {
                print_warning(diagnostic);
            }
            Ok(())
        }
    }
}

/// Print the model provider status
pub fn print_status(status: &ProviderStatus, format: OutputFormat) -> Result<()> {
    match format {
        OutputFormat::Json => print_json(status),
        OutputFormat::Table => {
            match status {
                ProviderStatus::Loaded { model } => {
                    print_success(&format!("Model ready at {}", model.path.display()));
                    println!("Checksum:    {}", model.checksum);
                    println!("Size:        {}", format_bytes(model.size_bytes));
                    println!("Input shape: {:?}", model.input_shape);
                }
                ProviderStatus::Unavailable { reason } | ProviderStatus::Corrupt { reason } => {
                    print_error(reason);
                }
                ProviderStatus::Unloaded | ProviderStatus::Loading => {
                    print_warning("Model not loaded");
                }
            }
            Ok(())
        }
    }
}

/// Print a success message
pub fn print_success(message: &str) {
    println!("{} {}", "✓".green().bold(), message);
}

/// Print an error message
pub fn print_error(message: &str) {
    eprintln!("{} {}", "✗".red().bold(), message);
}

/// Print a warning message
pub fn print_warning(message: &str) {
    println!("{} {}", "⚠".yellow().bold(), message);
}

/// Format bytes as human-readable string
pub fn format_bytes(bytes: u64) -> String {
    const KB: u64 = 1024;
    const MB: u64 = KB * 1024;

    if bytes >= MB {
        format!("{:.2}Mi", bytes as f64 / MB as f64)
    } else if bytes >= KB {
        format!("{:.2}Ki", bytes as f64 / KB as f64)
    } else {
        format!("{}B", bytes)
    }
}

/// Format a probability as percentage
pub fn format_probability(probability: f32) -> String {
    format!("{:.1}%", probability * 100.0)
}

/// Color a label from green (fresh) to red (rotten)
pub fn color_label(label: ClassLabel) -> String {
    let name = label.as_str();
    match label {
        ClassLabel::Fresh => name.green().bold().to_string(),
        ClassLabel::SlightlyAged => name.green().to_string(),
        ClassLabel::Stale => name.yellow().to_string(),
        ClassLabel::Spoiled => name.red().to_string(),
        ClassLabel::Rotten => name.red().bold().to_string(),
    }
}
