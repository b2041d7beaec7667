//! fleetdesk CLI library entry point.
//!
//! The binary in `main.rs` only maps the result of [`run`] to an exit code.

use anyhow::Result;
use clap::Parser;
use fleetdesk_core::{Config, DataAccess, HttpBackend};
use tracing::debug;

pub mod cli;
pub mod commands;
pub mod error;
pub mod output;
pub mod utils;

use cli::{Cli, Commands};
use error::CliError;
use utils::logging::initialize_logging;

/// The facade every command works through.
pub type Access = DataAccess<HttpBackend>;

/// Parse arguments, run the selected command and report diagnostics.
///
/// # Errors
///
/// Returns the command's error; [`error::exit_code_from_error`] turns it into
/// an exit code.
pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    initialize_logging(&cli)?;

    let config = load_config(&cli)?;
    debug!(base_url = %config.backend.base_url, "using backend");
    let backend = HttpBackend::new(&config.backend).map_err(CliError::from)?;
    let access = DataAccess::new(backend, config);

    execute_command(&cli, &access).await?;

    if cli.debug {
        eprintln!("{}", serde_json::to_string_pretty(&access.stats())?);
    }
    Ok(())
}

/// Configuration from `--config` or the platform default, then `--base-url`.
///
/// # Errors
///
/// Returns a usage error for unreadable or invalid configuration.
pub fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_from(path),
        None => Config::load(),
    }
    .map_err(CliError::from)?;

    if let Some(url) = &cli.base_url {
        config.backend.base_url.clone_from(url);
        config.validate().map_err(CliError::from)?;
    }
    Ok(config)
}

async fn execute_command(cli: &Cli, access: &Access) -> Result<()> {
    match &cli.command {
        Commands::List {
            name,
            model,
            cluster,
            status,
            priority,
            limit,
            offset,
            format,
        } => {
            let query = fleetdesk_core::InstanceQuery {
                limit: *limit,
                offset: *offset,
                name: name.clone(),
                model_name: model.clone(),
                cluster_name: cluster.clone(),
                status: *status,
                priority: priority.clone(),
            };
            commands::list::execute(access, &query, format.resolve()).await
        },
        Commands::Get { id, name, format } => {
            commands::get::execute(access, *id, name.as_deref(), format.resolve()).await
        },
        Commands::History {
            id,
            operation,
            latest,
            count,
            limit,
            offset,
            format,
        } => {
            let view = if *latest {
                commands::history::View::Latest
            } else if *count {
                commands::history::View::Count
            } else {
                commands::history::View::Page {
                    operation: *operation,
                    limit: *limit,
                    offset: *offset,
                }
            };
            commands::history::execute(access, *id, view, format.resolve()).await
        },
        Commands::Search(args) => commands::search::execute(access, args).await,
        Commands::Suggest {
            partial,
            fields,
            format,
        } => commands::suggest::execute(access, partial, fields, format.resolve()).await,
        Commands::Delete { id, yes } => commands::delete::execute(access, *id, *yes).await,
        Commands::Copy { id, name, format } => {
            commands::copy::execute(access, *id, name.clone(), format.resolve()).await
        },
        Commands::Stats { format } => commands::stats::execute(access, cli, format.resolve()).await,
    }
}
