//! Logging initialization and color control.

use anyhow::Result;
use colored::control as color_control;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

use crate::cli::Cli;
use crate::output::OutputFormat;

/// Pick the log level from the global flags and the command's output format.
///
/// Machine-readable output keeps stderr to errors only unless verbose or
/// debug logging was asked for explicitly.
pub fn log_level(cli: &Cli) -> (Level, bool) {
    if cli.verbose || cli.debug {
        return (Level::DEBUG, false);
    }
    let machine_output = cli
        .command
        .format_arg()
        .is_some_and(|format| format.resolve().is_machine());
    if cli.quiet || machine_output {
        (Level::ERROR, machine_output)
    } else {
        (Level::WARN, false)
    }
}

/// Install the global subscriber, writing to stderr.
///
/// # Errors
///
/// Returns an error if the global tracing subscriber cannot be set.
pub fn initialize_logging(cli: &Cli) -> Result<()> {
    let (level, machine_output) = log_level(cli);

    let subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr)
        .finish();

    tracing::subscriber::set_global_default(subscriber)?;

    let env_no_color = std::env::var_os("NO_COLOR").is_some();
    if cli.no_color || env_no_color || machine_output {
        color_control::set_override(false);
    }
    Ok(())
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    #[test]
    fn test_json_output_quiets_logs() {
        let cli = parse(&["fleetdesk", "list", "--format", "json"]);
        assert_eq!(log_level(&cli), (Level::ERROR, true));
    }

    #[test]
    fn test_verbose_wins_over_machine_output() {
        let cli = parse(&["fleetdesk", "-v", "list", "--format", "jsonl"]);
        assert_eq!(log_level(&cli), (Level::DEBUG, false));
    }

    #[test]
    fn test_text_output_defaults_to_warn() {
        let cli = parse(&["fleetdesk", "delete", "3"]);
        assert_eq!(log_level(&cli), (Level::WARN, false));
        let quiet = parse(&["fleetdesk", "--quiet", "delete", "3"]);
        assert_eq!(log_level(&quiet), (Level::ERROR, false));
    }
}
