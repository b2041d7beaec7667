//! Delete command implementation

use anyhow::{Result, anyhow};
use colored::Colorize;

use crate::Access;
use crate::error::CliError;

/// Delete an instance. Without `yes` nothing is deleted; the instance is
/// looked up so the user can confirm they have the right one.
pub async fn execute(access: &Access, id: i64, yes: bool) -> Result<()> {
    let instance = access.get_instance(id).await?;
    if !yes {
        return Err(CliError::usage(anyhow!(
            "refusing to delete '{}' (#{id}) without --yes",
            instance.name
        ))
        .into());
    }
    access.delete_instance(id).await?;
    println!("{} '{}' (#{id})", "Deleted".red(), instance.name);
    Ok(())
}
