//! # Output Formatting
//!
//! Every data command renders through [`emit`], which picks between
//! human-readable text and machine-readable JSON:
//!
//! - **Text**: aligned, colored rows for terminals
//! - **JSON**: one pretty-printed document
//! - **JSONL**: one compact JSON object per line, for streaming into `jq`
//!
//! ```bash
//! fleetdesk list --format json | jq '.[].name'
//! fleetdesk search llama --format jsonl | head -3
//! ```

use anyhow::Result;
use clap::Args;
use colored::Colorize;
use fleetdesk_core::{HistoryRecord, Instance, OperationType, Status};
use is_terminal::IsTerminal;
use serde::Serialize;

/// Output format options supported by the CLI
#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    /// Pretty text output (default on terminals)
    Text,
    /// Single JSON document
    Json,
    /// Newline-delimited JSON
    Jsonl,
}

impl OutputFormat {
    pub const fn is_machine(self) -> bool {
        matches!(self, Self::Json | Self::Jsonl)
    }
}

/// Shared clap argument for commands that accept an output format.
#[derive(Args, Clone, Debug, PartialEq, Eq)]
pub struct FormatArg {
    /// Output format (`--format` / `-f`)
    #[arg(short = 'f', long = "format", value_enum, env = "FLEETDESK_OUTPUT_FORMAT")]
    pub format: Option<OutputFormat>,
}

impl FormatArg {
    /// The explicit format, else text on a terminal and JSON when piped.
    #[must_use]
    pub fn resolve(&self) -> OutputFormat {
        if let Some(format) = self.format {
            return format;
        }
        if std::io::stdout().is_terminal() {
            OutputFormat::Text
        } else {
            OutputFormat::Json
        }
    }
}

/// Render `items` in `format`, using `text` for the human-readable form.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn emit<T, F>(format: OutputFormat, items: &[T], text: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce(&[T]),
{
    match format {
        OutputFormat::Text => text(items),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(items)?),
        OutputFormat::Jsonl => {
            for item in items {
                println!("{}", serde_json::to_string(item)?);
            }
        },
    }
    Ok(())
}

/// Render one value; JSONL prints it as a single line.
///
/// # Errors
///
/// Returns an error if serialization fails.
pub fn emit_one<T, F>(format: OutputFormat, item: &T, text: F) -> Result<()>
where
    T: Serialize,
    F: FnOnce(&T),
{
    match format {
        OutputFormat::Text => text(item),
        OutputFormat::Json => println!("{}", serde_json::to_string_pretty(item)?),
        OutputFormat::Jsonl => println!("{}", serde_json::to_string(item)?),
    }
    Ok(())
}

pub fn status_label(status: Option<Status>) -> String {
    let Some(status) = status else {
        return "-".bright_black().to_string();
    };
    let label = status.as_str();
    match status {
        Status::Active => label.green().to_string(),
        Status::Inactive | Status::Unknown => label.bright_black().to_string(),
        Status::Pending => label.yellow().to_string(),
        Status::Error => label.red().to_string(),
    }
}

pub fn operation_label(operation: OperationType) -> String {
    let label = operation.as_str();
    match operation {
        OperationType::Create => label.green().to_string(),
        OperationType::Update => label.cyan().to_string(),
        OperationType::Delete => label.red().to_string(),
        OperationType::Rollback => label.magenta().to_string(),
        OperationType::Unknown => label.bright_black().to_string(),
    }
}

/// One-line summary of an instance.
pub fn instance_row(instance: &Instance) -> String {
    format!(
        "{:>6}  {}  {}  {}  {}",
        instance.id.to_string().bright_black(),
        instance.name.bold(),
        instance.model_name,
        instance.cluster_name.bright_black(),
        status_label(instance.status),
    )
}

/// Full multi-line view of an instance.
pub fn print_instance_detail(instance: &Instance) {
    println!("{} {}", instance.name.bold(), format!("#{}", instance.id).bright_black());
    let field = |label: &str, value: String| {
        if !value.is_empty() {
            println!("  {:<22} {value}", format!("{label}:").bright_black());
        }
    };
    field("status", status_label(instance.status));
    field("model", instance.model_name.clone());
    field("model version", instance.model_version.clone().unwrap_or_default());
    field("cluster", instance.cluster_name.clone());
    field("image", instance.image_tag.clone());
    field("checkpoint", instance.checkpoint_path.clone().unwrap_or_default());
    field("pipeline mode", instance.pipeline_mode.clone().unwrap_or_default());
    field("priority", instance.priority().to_string());
    field("replicas", optional(instance.replicas));
    field("workers", optional(instance.n_workers));
    field(
        "parallelism (pp/cp/tp)",
        if instance.pp.is_some() || instance.cp.is_some() || instance.tp.is_some() {
            format!(
                "{}/{}/{}",
                optional(instance.pp),
                optional(instance.cp),
                optional(instance.tp)
            )
        } else {
            String::new()
        },
    );
    field("fps", optional(instance.fps));
    field("description", instance.description_text().to_string());
    field(
        "updated",
        instance
            .updated_at
            .or(instance.created_at)
            .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
            .unwrap_or_default(),
    );
}

/// One-line summary of a history record.
pub fn history_row(record: &HistoryRecord) -> String {
    let when = record
        .operation_timestamp
        .map_or_else(|| "-".to_string(), |t| t.format("%Y-%m-%d %H:%M:%S").to_string());
    format!(
        "{:>6}  {}  {:<8}  {} {}",
        record.history_id.to_string().bright_black(),
        when,
        operation_label(record.operation_type),
        record.snapshot.name.bold(),
        format!("#{}", record.original_id).bright_black(),
    )
}

fn optional(value: Option<i64>) -> String {
    value.map(|v| v.to_string()).unwrap_or_default()
}
