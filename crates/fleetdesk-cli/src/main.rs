//! fleetdesk CLI - console for inference service instances

use std::process::ExitCode;

use colored::Colorize;
use fleetdesk_cli::error::exit_code_from_error;

#[tokio::main]
async fn main() -> ExitCode {
    match fleetdesk_cli::run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("{} {err:#}", "error:".red().bold());
            ExitCode::from(exit_code_from_error(&err))
        },
    }
}
