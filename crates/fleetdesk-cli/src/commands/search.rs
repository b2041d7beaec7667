//! Search command implementation

use std::collections::BTreeSet;

use anyhow::Result;
use colored::Colorize;
use fleetdesk_core::search::Matcher;
use fleetdesk_core::{
    HighlightMarkers, HistoryQuery, InstanceQuery, RankedRecord, SearchMatch, SearchOptions,
    highlight_field,
};
use serde::Serialize;

use super::WIDE_PAGE;
use crate::Access;
use crate::cli::SearchArgs;
use crate::error::CliError;
use crate::output::{OutputFormat, emit, history_row, instance_row};

/// Execute the search command
pub async fn execute(access: &Access, args: &SearchArgs) -> Result<()> {
    validate_term(args)?;

    let options = options_from(access.search_options(), args);
    let format = args.format.resolve();
    let markers = (!args.no_highlight).then(|| markers_for(format));

    if args.history {
        let query = HistoryQuery {
            limit: WIDE_PAGE,
            ..HistoryQuery::default()
        };
        let mut hits = access.search_history(&args.term, &query, &options).await?;
        hits.truncate(args.limit);
        render(format, &hits, markers.as_ref(), |record| history_row(record))
    } else {
        let query = InstanceQuery {
            limit: WIDE_PAGE,
            ..InstanceQuery::default()
        };
        let mut hits = access.search_instances(&args.term, &query, &options).await?;
        hits.truncate(args.limit);
        render(format, &hits, markers.as_ref(), |instance| instance_row(instance))
    }
}

/// Reject a broken pattern up front; the engine would quietly return nothing.
///
/// Compiles the trimmed term, which is what the engine searches with.
fn validate_term(args: &SearchArgs) -> Result<()> {
    Matcher::new(args.term.trim(), args.mode, args.case_sensitive).map_err(CliError::from)?;
    Ok(())
}

fn options_from(mut options: SearchOptions, args: &SearchArgs) -> SearchOptions {
    options = options.with_mode(args.mode);
    if args.case_sensitive {
        options = options.case_sensitive(true);
    }
    if let Some(min_score) = args.min_score {
        options = options.with_min_score(min_score);
    }
    if !args.fields.is_empty() {
        options = options.with_fields(args.fields.iter().cloned());
    }
    options
}

/// Terminal highlighting for text, HTML-style marks for machine output.
fn markers_for(format: OutputFormat) -> HighlightMarkers {
    if format.is_machine() {
        HighlightMarkers::default()
    } else if colored::control::SHOULD_COLORIZE.should_colorize() {
        HighlightMarkers::new("\u{1b}[1;33m", "\u{1b}[0m")
    } else {
        HighlightMarkers::new("[", "]")
    }
}

/// A search hit with its highlighted fields, as printed.
#[derive(Serialize)]
struct Hit<'a, R> {
    #[serde(flatten)]
    ranked: &'a RankedRecord<R>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    highlighted: Vec<HighlightedField>,
}

#[derive(Serialize)]
struct HighlightedField {
    field: String,
    text: String,
}

fn highlighted_fields(
    matches: &[SearchMatch],
    markers: Option<&HighlightMarkers>,
) -> Vec<HighlightedField> {
    let Some(markers) = markers else {
        return Vec::new();
    };
    let fields: BTreeSet<&str> = matches.iter().map(|m| m.field.as_str()).collect();
    fields
        .into_iter()
        .filter_map(|field| {
            highlight_field(matches, field, markers).map(|text| HighlightedField {
                field: field.to_string(),
                text,
            })
        })
        .collect()
}

fn render<R, F>(
    format: OutputFormat,
    hits: &[RankedRecord<R>],
    markers: Option<&HighlightMarkers>,
    row: F,
) -> Result<()>
where
    R: Serialize,
    F: Fn(&R) -> String,
{
    let shown: Vec<Hit<'_, R>> = hits
        .iter()
        .map(|ranked| Hit {
            ranked,
            highlighted: highlighted_fields(&ranked.matches, markers),
        })
        .collect();

    emit(format, &shown, |shown| {
        if shown.is_empty() {
            println!("No matches.");
            return;
        }
        for hit in shown {
            println!(
                "{}  {}",
                format!("{:>6.2}", hit.ranked.score).cyan(),
                row(&hit.ranked.record)
            );
            if hit.highlighted.is_empty() {
                let fields: BTreeSet<&str> =
                    hit.ranked.matches.iter().map(|m| m.field.as_str()).collect();
                let fields: Vec<&str> = fields.into_iter().collect();
                println!("        {}", format!("matched {}", fields.join(", ")).bright_black());
            }
            for field in &hit.highlighted {
                println!("        {} {}", format!("{}:", field.field).bright_black(), field.text);
            }
        }
    })
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use clap::Parser;
    use fleetdesk_core::{Instance, MatchMode, search};

    use crate::cli::{Cli, Commands};

    fn search_args(args: &[&str]) -> SearchArgs {
        let mut argv = vec!["fleetdesk", "search"];
        argv.extend_from_slice(args);
        match Cli::try_parse_from(argv).unwrap().command {
            Commands::Search(args) => args,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn test_flags_flow_into_options() {
        // Given: Search flags narrowing fields and score
        let args = search_args(&["db", "--mode", "exact", "--min-score", "2", "--field", "name"]);

        // When: Options are derived from the defaults
        let options = options_from(SearchOptions::default(), &args);

        // Then: Each flag is reflected
        assert_eq!(options.mode, MatchMode::Exact);
        assert!((options.min_score - 2.0).abs() < f64::EPSILON);
        assert_eq!(options.fields, Some(vec!["name".to_string()]));
    }

    #[test]
    fn test_pattern_is_validated_as_searched() {
        // Given: A pattern whose trailing space is escaped, so it only compiles untrimmed
        let args = search_args(&["prod\\ ", "--mode", "pattern"]);

        // When/Then: The trimmed form ends in a bare backslash and is rejected
        let err = validate_term(&args).unwrap_err();
        assert!(err.to_string().contains("Invalid search pattern"));

        // Given: Padding around an otherwise valid pattern
        let args = search_args(&["  ^prod-(web|db)  ", "--mode", "pattern"]);

        // Then: It is accepted
        assert!(validate_term(&args).is_ok());
    }

    #[test]
    fn test_highlighting_marks_each_matched_field() {
        let mut instance = Instance::new(1, "prod-db-2");
        instance.description = Some("primary prod database".into());
        let records = vec![instance];
        let results = search(&records, "prod", &SearchOptions::default());
        let matches = &results[0].matches;

        let markers = HighlightMarkers::new("[", "]");
        let fields = highlighted_fields(matches, Some(&markers));

        let texts: Vec<(&str, &str)> = fields
            .iter()
            .map(|f| (f.field.as_str(), f.text.as_str()))
            .collect();
        assert_eq!(
            texts,
            [("description", "primary [prod] database"), ("name", "[prod]-db-2")]
        );
        assert!(highlighted_fields(matches, None).is_empty());
    }
}
