//! List command implementation

use anyhow::Result;
use colored::Colorize;
use fleetdesk_core::InstanceQuery;

use crate::Access;
use crate::output::{OutputFormat, emit, instance_row};

/// Execute the list command
pub async fn execute(access: &Access, query: &InstanceQuery, format: OutputFormat) -> Result<()> {
    let page = access.list_instances(query).await?;

    emit(format, &page.records, |records| {
        if records.is_empty() {
            println!("No instances match.");
            return;
        }
        for instance in records {
            println!("{}", instance_row(instance));
        }
        let shown = page.offset as usize + records.len();
        let footer = if page.has_more {
            format!("{shown} of {} shown, more with --offset {shown}", page.total_count)
        } else {
            format!("{shown} of {} shown", page.total_count)
        };
        println!("{}", footer.bright_black());
    })
}
