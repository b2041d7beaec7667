//! Weighted multi-field text search.
//!
//! Records expose their text through [`Searchable`]. For each configured
//! field, every non-overlapping match of the term contributes the field's
//! weight to the record's score. A match spanning the whole field value earns
//! [`SearchOptions::exact_bonus`], and every matched field beyond the first
//! earns [`SearchOptions::field_bonus`]. Results are sorted by descending
//! score; ties keep their input order.
//!
//! ```rust
//! use fleetdesk_core::{Instance, SearchOptions, search};
//!
//! let records = vec![
//!     Instance::new(1, "prod-web-1"),
//!     Instance::new(2, "test-api-2"),
//!     Instance::new(3, "prod-db-4"),
//! ];
//! let results = search(&records, "prod", &SearchOptions::default());
//! let names: Vec<_> = results.iter().map(|r| r.record.name.as_str()).collect();
//! assert_eq!(names, ["prod-web-1", "prod-db-4"]);
//! ```

mod highlight;
mod matcher;
mod suggest;

use std::borrow::Cow;
use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::warn;

pub use highlight::{HighlightMarkers, highlight, highlight_field};
pub use matcher::{MatchMode, Matcher};
pub use suggest::suggestions;

use crate::config::{SearchConfig, default_weights};

/// A record field's value as seen by the search engine.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum FieldValue<'a> {
    Text(&'a str),
    /// Joined with `", "`.
    List(&'a [String]),
    /// Strings are used as-is; everything else is rendered as JSON.
    Json(&'a Value),
    Missing,
}

impl<'a> FieldValue<'a> {
    /// Text the matcher runs against.
    pub fn to_text(&self) -> Cow<'a, str> {
        match *self {
            Self::Text(text) => Cow::Borrowed(text),
            Self::List(items) => Cow::Owned(items.join(", ")),
            Self::Json(Value::Null) | Self::Missing => Cow::Borrowed(""),
            Self::Json(Value::String(text)) => Cow::Borrowed(text.as_str()),
            Self::Json(other) => Cow::Owned(other.to_string()),
        }
    }
}

/// Narrow read access to the text fields of a record.
pub trait Searchable {
    /// Field name and value pairs, in a stable order.
    fn searchable_fields(&self) -> Vec<(&'static str, FieldValue<'_>)>;

    /// Text of one field, empty when the record has no such field.
    fn field_text(&self, field: &str) -> String {
        self.searchable_fields()
            .into_iter()
            .find(|(name, _)| *name == field)
            .map(|(_, value)| value.to_text().into_owned())
            .unwrap_or_default()
    }
}

/// Search parameters.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SearchOptions {
    /// Fields to search; `None` searches every field the record exposes.
    pub fields: Option<Vec<String>>,
    pub weights: BTreeMap<String, f64>,
    pub mode: MatchMode,
    pub case_sensitive: bool,
    pub min_score: f64,
    pub exact_bonus: f64,
    pub field_bonus: f64,
    pub context_chars: usize,
}

impl Default for SearchOptions {
    fn default() -> Self {
        Self::from(&SearchConfig::default())
    }
}

impl From<&SearchConfig> for SearchOptions {
    fn from(config: &SearchConfig) -> Self {
        Self {
            fields: None,
            weights: config.weights.clone(),
            mode: MatchMode::Substring,
            case_sensitive: config.case_sensitive,
            min_score: config.min_score,
            exact_bonus: config.exact_bonus,
            field_bonus: config.field_bonus,
            context_chars: config.context_chars,
        }
    }
}

impl SearchOptions {
    #[must_use]
    pub fn with_fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let fields: Vec<String> = fields.into_iter().map(Into::into).collect();
        self.fields = (!fields.is_empty()).then_some(fields);
        self
    }

    #[must_use]
    pub const fn with_mode(mut self, mode: MatchMode) -> Self {
        self.mode = mode;
        self
    }

    #[must_use]
    pub const fn with_min_score(mut self, min_score: f64) -> Self {
        self.min_score = min_score;
        self
    }

    #[must_use]
    pub const fn case_sensitive(mut self, case_sensitive: bool) -> Self {
        self.case_sensitive = case_sensitive;
        self
    }

    /// Weight of `field`, 1.0 when unlisted.
    pub fn weight(&self, field: &str) -> f64 {
        self.weights.get(field).copied().unwrap_or(1.0)
    }

    fn includes(&self, field: &str) -> bool {
        self.fields
            .as_ref()
            .is_none_or(|fields| fields.iter().any(|f| f == field))
    }

    /// Restore the built-in weights.
    #[must_use]
    pub fn with_default_weights(mut self) -> Self {
        self.weights = default_weights();
        self
    }
}

/// One match inside one field.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SearchMatch {
    pub field: String,
    /// Full text of the field.
    pub value: String,
    pub matched: String,
    /// Byte offset into `value`.
    pub start: usize,
    pub end: usize,
    /// Surrounding text with `...` where it was cut.
    pub context: String,
}

/// A matching record borrowed from the searched slice.
#[derive(Debug, Clone, PartialEq)]
pub struct SearchResult<'a, R> {
    pub record: &'a R,
    pub matches: Vec<SearchMatch>,
    pub score: f64,
}

impl<R: Clone> SearchResult<'_, R> {
    /// Detach from the searched slice.
    pub fn into_owned(self) -> RankedRecord<R> {
        RankedRecord {
            record: self.record.clone(),
            matches: self.matches,
            score: self.score,
        }
    }
}

/// Owned search result, suitable for caching.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RankedRecord<R> {
    pub record: R,
    pub matches: Vec<SearchMatch>,
    pub score: f64,
}

/// Rank `records` against `term`.
///
/// An empty term, or a pattern that fails to compile, yields no results.
pub fn search<'a, R: Searchable>(
    records: &'a [R],
    term: &str,
    options: &SearchOptions,
) -> Vec<SearchResult<'a, R>> {
    let term = term.trim();
    if term.is_empty() {
        return Vec::new();
    }
    let matcher = match Matcher::new(term, options.mode, options.case_sensitive) {
        Ok(matcher) => matcher,
        Err(e) => {
            warn!(error = %e, "search pattern rejected, returning no matches");
            return Vec::new();
        },
    };
    search_with(records, &matcher, options)
}

/// [`search`] with a precompiled matcher.
pub fn search_with<'a, R: Searchable>(
    records: &'a [R],
    matcher: &Matcher,
    options: &SearchOptions,
) -> Vec<SearchResult<'a, R>> {
    let mut results: Vec<SearchResult<'a, R>> = records
        .iter()
        .filter_map(|record| score_record(record, matcher, options))
        .filter(|result| result.score >= options.min_score)
        .collect();
    // Stable: equal scores keep input order.
    results.sort_by(|a, b| b.score.total_cmp(&a.score));
    results
}

/// Score one record; `None` when nothing matched.
pub fn score_record<'a, R: Searchable>(
    record: &'a R,
    matcher: &Matcher,
    options: &SearchOptions,
) -> Option<SearchResult<'a, R>> {
    let mut matches = Vec::new();
    let mut score = 0.0;
    let mut matched_fields = 0_u32;

    for (field, value) in record.searchable_fields() {
        if !options.includes(field) {
            continue;
        }
        let text = value.to_text();
        if text.is_empty() {
            continue;
        }
        let spans = matcher.find_all(&text);
        if spans.is_empty() {
            continue;
        }
        matched_fields += 1;
        let weight = options.weight(field);
        for (start, end) in spans {
            score += weight;
            if start == 0 && end == text.len() {
                score += options.exact_bonus;
            }
            matches.push(SearchMatch {
                field: field.to_string(),
                value: text.to_string(),
                matched: text[start..end].to_string(),
                start,
                end,
                context: snippet(&text, start, end, options.context_chars),
            });
        }
    }

    if matches.is_empty() {
        return None;
    }
    score += options.field_bonus * f64::from(matched_fields - 1);
    Some(SearchResult {
        record,
        matches,
        score,
    })
}

fn snippet(text: &str, start: usize, end: usize, context_chars: usize) -> String {
    let from = text[..start]
        .char_indices()
        .rev()
        .nth(context_chars.saturating_sub(1))
        .map_or(0, |(i, _)| i);
    let from = if context_chars == 0 { start } else { from };
    let to = text[end..]
        .char_indices()
        .nth(context_chars)
        .map_or(text.len(), |(i, _)| end + i);

    let mut out = String::with_capacity(to - from + 6);
    if from > 0 {
        out.push_str("...");
    }
    out.push_str(&text[from..to]);
    if to < text.len() {
        out.push_str("...");
    }
    out
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::panic)]
mod tests {
    use super::*;
    use crate::types::{HistoryRecord, Instance, OperationType};
    use proptest::prelude::*;

    fn named(names: &[&str]) -> Vec<Instance> {
        names
            .iter()
            .zip(1..)
            .map(|(name, id)| Instance::new(id, *name))
            .collect()
    }

    #[test]
    fn test_prod_ranking() {
        // Given: Three instances, two of them prod
        let records = named(&["prod-web-1", "test-api-2", "prod-db-4"]);

        // When: Searching for "prod"
        let results = search(&records, "prod", &SearchOptions::default());

        // Then: Both prod records match, the test record does not
        let ids: Vec<i64> = results.iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec![1, 3]);
        assert!(results.iter().all(|r| (r.score - 3.0).abs() < f64::EPSILON));
        assert_eq!(results[0].matches[0].matched, "prod");
        assert_eq!(results[0].matches[0].field, "name");
    }

    #[test]
    fn test_exact_bonus_ranks_whole_value_first() {
        // Given: History snapshots instance-1..instance-1010
        let records: Vec<HistoryRecord> = (1..=1010)
            .map(|i| HistoryRecord {
                history_id: i,
                original_id: i,
                operation_type: OperationType::Update,
                operation_timestamp: None,
                snapshot: Instance::new(i, format!("instance-{i}")),
            })
            .collect();

        // When: Searching for one specific name
        let results = search(&records, "instance-100", &SearchOptions::default());

        // Then: The exact name wins, the longer prefixes follow in input order
        let names: Vec<&str> = results
            .iter()
            .map(|r| r.record.snapshot.name.as_str())
            .collect();
        assert_eq!(names[0], "instance-100");
        assert_eq!(&names[1..3], &["instance-1000", "instance-1001"][..]);
        assert!(results[0].score > results[1].score);
        assert_eq!(results.len(), 11);
    }

    #[test]
    fn test_field_weights_and_field_bonus() {
        let mut gpu = Instance::new(1, "gpu-runner");
        gpu.cluster_name = "gpu-a".into();
        let mut other = Instance::new(2, "runner");
        other.cluster_name = "gpu-b".into();
        let records = vec![other, gpu];

        let results = search(&records, "gpu", &SearchOptions::default());

        // name (3.0) + cluster (2.0) + one extra field (0.5)
        assert_eq!(results[0].record.id, 1);
        assert!((results[0].score - 5.5).abs() < f64::EPSILON);
        assert!((results[1].score - 2.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_min_score_and_field_selection() {
        let mut a = Instance::new(1, "alpha");
        a.image_tag = "llama-v2".into();
        let b = Instance::new(2, "llama-serving");
        let records = vec![a, b];

        let only_high = SearchOptions::default().with_min_score(2.0);
        let results = search(&records, "llama", &only_high);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, 2);

        let tags_only = SearchOptions::default().with_fields(["image_tag"]);
        let results = search(&records, "llama", &tags_only);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].record.id, 1);
    }

    #[test]
    fn test_lists_and_json_are_searchable() {
        let mut instance = Instance::new(1, "batch");
        instance.priorities = vec!["low".into(), "urgent".into()];
        instance.envs = serde_json::json!([{"CUDA_VISIBLE_DEVICES": "0,1"}]);
        let records = vec![instance];

        let results = search(&records, "low, urgent", &SearchOptions::default());
        assert_eq!(results.len(), 1);
        let results = search(&records, "CUDA_VISIBLE", &SearchOptions::default());
        assert_eq!(results[0].matches[0].field, "envs");
    }

    #[test]
    fn test_bad_pattern_degrades_to_no_results() {
        let records = named(&["prod-web-1"]);
        let options = SearchOptions::default().with_mode(MatchMode::Pattern);

        assert!(search(&records, "prod-(", &options).is_empty());
        assert!(search(&records, "^", &options).is_empty());
        assert_eq!(search(&records, "prod-\\w+-\\d", &options).len(), 1);
    }

    #[test]
    fn test_empty_term_matches_nothing() {
        let records = named(&["a", "b"]);
        assert!(search(&records, "   ", &SearchOptions::default()).is_empty());
    }

    #[test]
    fn test_multiple_matches_accumulate() {
        let records = named(&["web-web-web", "web"]);
        let results = search(&records, "web", &SearchOptions::default());
        // Three partial matches outscore one whole-value match
        assert_eq!(results[0].record.id, 1);
        assert_eq!(results[0].matches.len(), 3);
        assert!((results[0].score - 9.0).abs() < f64::EPSILON);
        assert!((results[1].score - 5.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_snippet_marks_truncation() {
        let text = "the quick brown fox jumps over the lazy dog";
        let start = text.find("fox").unwrap();
        let context = snippet(text, start, start + 3, 6);
        assert_eq!(context, "...brown fox jumps...");
        assert_eq!(snippet("fox", 0, 3, 10), "fox");
    }

    #[test]
    fn test_into_owned_keeps_score() {
        let records = named(&["prod-web-1"]);
        let owned: Vec<RankedRecord<Instance>> = search(&records, "web", &SearchOptions::default())
            .into_iter()
            .map(SearchResult::into_owned)
            .collect();
        assert_eq!(owned[0].record.name, "prod-web-1");
        assert_eq!(owned[0].matches[0].start, 5);
    }

    proptest! {
        #[test]
        fn test_results_sorted_and_stable(names in proptest::collection::vec("[a-c]{1,6}", 0..40)) {
            let records: Vec<Instance> = names
                .iter()
                .zip(0..)
                .map(|(name, id)| Instance::new(id, name.clone()))
                .collect();

            let results = search(&records, "ab", &SearchOptions::default());

            for pair in results.windows(2) {
                prop_assert!(pair[0].score >= pair[1].score);
                if (pair[0].score - pair[1].score).abs() < f64::EPSILON {
                    prop_assert!(pair[0].record.id < pair[1].record.id);
                }
            }
            for result in &results {
                prop_assert!(result.record.name.contains("ab"));
            }
        }
    }
}
