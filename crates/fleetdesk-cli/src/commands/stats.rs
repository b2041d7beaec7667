//! Stats command implementation

use std::path::PathBuf;

use anyhow::Result;
use colored::Colorize;
use fleetdesk_core::{Config, DataAccessStats, InstanceQuery};
use serde::Serialize;

use crate::Access;
use crate::cli::Cli;
use crate::output::{OutputFormat, emit_one};

#[derive(Serialize)]
struct StatsReport<'a> {
    config_path: Option<PathBuf>,
    backend_url: &'a str,
    instances: u64,
    config: Config,
    caches: DataAccessStats,
}

/// Probe the backend, then report effective configuration and cache state.
pub async fn execute(access: &Access, cli: &Cli, format: OutputFormat) -> Result<()> {
    let query = InstanceQuery {
        limit: 1,
        ..InstanceQuery::default()
    };
    // Twice, so the report shows the second read being served from cache.
    let page = access.list_instances(&query).await?;
    access.list_instances(&query).await?;

    let config = access.config();
    let report = StatsReport {
        config_path: cli.config.clone().or_else(|| Config::config_path().ok()),
        backend_url: &config.backend.base_url,
        instances: page.total_count,
        config: redacted(config),
        caches: access.stats(),
    };

    emit_one(format, &report, print_text)
}

fn redacted(config: &Config) -> Config {
    let mut shown = config.clone();
    if shown.backend.password.is_some() {
        shown.backend.password = Some("********".to_string());
    }
    shown
}

fn print_text(report: &StatsReport<'_>) {
    let label = |text: &str| format!("{text:<18}").bright_black();
    println!("{}", "fleetdesk".bold());
    println!(
        "  {}{}",
        label("config"),
        report
            .config_path
            .as_ref()
            .map_or_else(|| "(defaults)".to_string(), |p| p.display().to_string())
    );
    println!("  {}{}", label("backend"), report.backend_url);
    println!("  {}{}", label("instances"), report.instances);

    let caches = &report.caches;
    println!("{}", "request cache".bold());
    println!("  {}{}", label("entries"), caches.request_cache.entries);
    println!(
        "  {}{} hits / {} misses",
        label("lookups"),
        caches.request_cache.hits,
        caches.request_cache.misses
    );

    println!("{}", "result cache".bold());
    for (tier, stats) in [
        ("primary", &caches.result_cache.primary),
        ("search", &caches.result_cache.search),
    ] {
        println!(
            "  {}{}/{} entries, {:.0}% hit rate, {} evicted",
            label(tier),
            stats.entries,
            stats.max_entries,
            stats.hit_rate() * 100.0,
            stats.evictions
        );
    }

    println!("{}", "batching".bold());
    println!("  {}{}", label("batches flushed"), caches.batches.batches_flushed);
    println!("  {}{}", label("largest batch"), caches.batches.largest_batch);
    let queued: usize = caches.batches.queue_depths.values().sum();
    println!("  {}{}", label("queued"), queued);

    println!("{}", "debouncing".bold());
    println!(
        "  {}{} ({} pending)",
        label("functions"),
        caches.debounced,
        caches.debounce_pending
    );
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_password_is_never_reported() {
        let mut config = Config::default();
        config.backend.username = Some("admin".into());
        config.backend.password = Some("secret".into());

        let shown = redacted(&config);

        assert_eq!(shown.backend.username.as_deref(), Some("admin"));
        assert_eq!(shown.backend.password.as_deref(), Some("********"));
        assert_eq!(redacted(&Config::default()).backend.password, None);
    }
}
