//! History command implementation

use anyhow::{Result, anyhow};
use colored::Colorize;
use fleetdesk_core::{HistoryQuery, OperationType};

use crate::Access;
use crate::error::CliError;
use crate::output::{OutputFormat, emit, emit_one, history_row};

/// What part of the history to show.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum View {
    Page {
        operation: Option<OperationType>,
        limit: u32,
        offset: u32,
    },
    Latest,
    Count,
}

pub async fn execute(
    access: &Access,
    instance_id: Option<i64>,
    view: View,
    format: OutputFormat,
) -> Result<()> {
    match (view, instance_id) {
        (View::Page { operation, limit, offset }, _) => {
            let query = HistoryQuery {
                instance_id,
                limit,
                offset,
                operation_type: operation,
                ..HistoryQuery::default()
            };
            let page = access.list_history(&query).await?;
            emit(format, &page.records, |records| {
                if records.is_empty() {
                    println!("No history records.");
                    return;
                }
                for record in records {
                    println!("{}", history_row(record));
                }
                if page.has_more {
                    let next = page.offset as usize + records.len();
                    println!("{}", format!("more with --offset {next}").bright_black());
                }
            })
        },
        (View::Latest, Some(id)) => {
            let latest = access.latest_history(id).await?;
            emit_one(format, &latest, |latest| match latest {
                Some(record) => println!("{}", history_row(record)),
                None => println!("Instance #{id} has no history."),
            })
        },
        (View::Count, Some(id)) => {
            let count = access.history_count(id).await?;
            emit_one(format, &count, |count| println!("{count}"))
        },
        (View::Latest | View::Count, None) => {
            Err(CliError::usage(anyhow!("--latest and --count need an instance id")).into())
        },
    }
}
