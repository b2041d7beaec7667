//! Get command implementation

use anyhow::{Result, anyhow};
use fleetdesk_core::{Error, Instance, InstanceQuery};

use super::WIDE_PAGE;
use crate::Access;
use crate::error::CliError;
use crate::output::{OutputFormat, emit_one, print_instance_detail};
use crate::utils::suggest::closest_names;

const MAX_HINTS: usize = 3;

/// Show one instance by id, or by exact name with hints on a miss.
pub async fn execute(
    access: &Access,
    id: Option<i64>,
    name: Option<&str>,
    format: OutputFormat,
) -> Result<()> {
    let instance = match (id, name) {
        (_, Some(name)) => by_name(access, name).await?,
        (Some(id), None) => access.get_instance(id).await?,
        (None, None) => return Err(CliError::usage(anyhow!("an id or --name is required")).into()),
    };
    emit_one(format, &instance, print_instance_detail)
}

async fn by_name(access: &Access, name: &str) -> Result<Instance> {
    match access.get_instance_by_name(name).await {
        Ok(instance) => Ok(instance),
        Err(Error::NotFound(_)) => {
            let query = InstanceQuery {
                limit: WIDE_PAGE,
                ..InstanceQuery::default()
            };
            let page = access.list_instances(&query).await?;
            let names = page.records.iter().map(|i| i.name.as_str());
            let hints = closest_names(name, names, MAX_HINTS);
            Err(CliError::not_found(anyhow!("{}", not_found_message(name, &hints))).into())
        },
        Err(e) => Err(e.into()),
    }
}

fn not_found_message(name: &str, hints: &[String]) -> String {
    if hints.is_empty() {
        format!("Instance '{name}' not found")
    } else {
        format!("Instance '{name}' not found. Did you mean: {}?", hints.join(", "))
    }
}
