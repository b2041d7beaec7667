//! Copy command implementation

use anyhow::Result;
use colored::Colorize;
use fleetdesk_core::CopyRequest;

use crate::Access;
use crate::output::{OutputFormat, emit_one, instance_row};

pub async fn execute(
    access: &Access,
    source_id: i64,
    new_name: Option<String>,
    format: OutputFormat,
) -> Result<()> {
    let request = CopyRequest {
        source_instance_id: source_id,
        new_name,
    };
    let copy = access.copy_instance(&request).await?;
    emit_one(format, &copy, |copy| {
        println!("{} instance #{source_id}", "Copied".green());
        println!("{}", instance_row(copy));
    })
}
