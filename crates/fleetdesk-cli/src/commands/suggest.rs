//! Suggest command implementation

use anyhow::Result;
use fleetdesk_core::InstanceQuery;

use super::WIDE_PAGE;
use crate::Access;
use crate::output::{OutputFormat, emit};

pub async fn execute(
    access: &Access,
    partial: &str,
    fields: &[String],
    format: OutputFormat,
) -> Result<()> {
    let query = InstanceQuery {
        limit: WIDE_PAGE,
        ..InstanceQuery::default()
    };
    let fields = (!fields.is_empty()).then_some(fields);
    let suggestions = access.suggest_instances(partial, &query, fields).await?;
    emit(format, &suggestions, |suggestions| {
        for suggestion in suggestions {
            println!("{suggestion}");
        }
    })
}
