//! Value parsers for clap arguments.

use fleetdesk_core::{OperationType, Status};

/// Parse an instance status, rejecting anything outside the known set.
pub fn parse_status(raw: &str) -> Result<Status, String> {
    let status = match raw.trim().to_ascii_lowercase().as_str() {
        "active" => Status::Active,
        "inactive" => Status::Inactive,
        "pending" => Status::Pending,
        "error" => Status::Error,
        other => {
            return Err(format!(
                "unknown status '{other}' (expected active, inactive, pending or error)"
            ));
        },
    };
    Ok(status)
}

/// Parse a history operation type.
pub fn parse_operation(raw: &str) -> Result<OperationType, String> {
    let operation = match raw.trim().to_ascii_lowercase().as_str() {
        "create" => OperationType::Create,
        "update" => OperationType::Update,
        "delete" => OperationType::Delete,
        "rollback" => OperationType::Rollback,
        other => {
            return Err(format!(
                "unknown operation '{other}' (expected create, update, delete or rollback)"
            ));
        },
    };
    Ok(operation)
}
