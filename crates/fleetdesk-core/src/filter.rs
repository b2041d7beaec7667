//! Declarative record filtering.
//!
//! [`ExtendedFilterCriteria`] is a plain value object of optional predicates.
//! A record passes when it satisfies every populated predicate; unset
//! predicates impose nothing, so default criteria keep every record in its
//! original order.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::search::{MatchMode, Matcher, SearchOptions, Searchable, score_record};

/// Typed field access used by the filter engine.
pub trait Filterable: Searchable {
    /// Values for set-membership checks. Empty when the field is unset.
    fn values(&self, field: &str) -> Vec<String>;

    fn number(&self, field: &str) -> Option<f64>;

    fn flag(&self, field: &str) -> Option<bool>;

    fn timestamp(&self, field: &str) -> Option<DateTime<Utc>>;

    /// Whether the field holds any value.
    fn is_present(&self, field: &str) -> bool {
        !self.values(field).is_empty()
            || self.number(field).is_some()
            || self.flag(field).is_some()
            || self.timestamp(field).is_some()
    }
}

/// Boolean predicate that distinguishes "don't care" from "must be false".
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TriState {
    #[default]
    Any,
    True,
    /// Also satisfied by an unset flag.
    False,
}

impl TriState {
    pub const fn is_set(self) -> bool {
        !matches!(self, Self::Any)
    }

    pub const fn accepts(self, value: Option<bool>) -> bool {
        match self {
            Self::Any => true,
            Self::True => matches!(value, Some(true)),
            Self::False => !matches!(value, Some(true)),
        }
    }
}

impl From<Option<bool>> for TriState {
    fn from(value: Option<bool>) -> Self {
        match value {
            None => Self::Any,
            Some(true) => Self::True,
            Some(false) => Self::False,
        }
    }
}

/// Inclusive numeric bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct NumericRange {
    pub min: Option<f64>,
    pub max: Option<f64>,
}

impl NumericRange {
    pub const fn new(min: Option<f64>, max: Option<f64>) -> Self {
        Self { min, max }
    }

    pub const fn is_set(&self) -> bool {
        self.min.is_some() || self.max.is_some()
    }

    pub fn contains(&self, value: f64) -> bool {
        self.min.is_none_or(|min| value >= min) && self.max.is_none_or(|max| value <= max)
    }
}

/// Inclusive time bounds.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeRange {
    pub from: Option<DateTime<Utc>>,
    pub to: Option<DateTime<Utc>>,
}

impl TimeRange {
    pub const fn is_set(&self) -> bool {
        self.from.is_some() || self.to.is_some()
    }

    pub fn contains(&self, value: DateTime<Utc>) -> bool {
        self.from.is_none_or(|from| value >= from) && self.to.is_none_or(|to| value <= to)
    }
}

/// Free-text predicate evaluated with the search engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextPredicate {
    pub term: String,
    #[serde(default)]
    pub mode: MatchMode,
    #[serde(default)]
    pub fields: Option<Vec<String>>,
    /// Minimum search score a record needs to pass.
    #[serde(default)]
    pub min_score: f64,
}

impl TextPredicate {
    pub fn new(term: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            mode: MatchMode::Substring,
            fields: None,
            min_score: 0.0,
        }
    }
}

/// Optional predicates combined conjunctively.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExtendedFilterCriteria {
    pub text: Option<TextPredicate>,
    /// Field must hold one of the listed values (case-insensitive).
    pub any_of: BTreeMap<String, Vec<String>>,
    pub ranges: BTreeMap<String, NumericRange>,
    pub flags: BTreeMap<String, TriState>,
    /// `true`: field must be set; `false`: field must be unset.
    pub present: BTreeMap<String, bool>,
    pub time_ranges: BTreeMap<String, TimeRange>,
}

impl ExtendedFilterCriteria {
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_text(mut self, text: TextPredicate) -> Self {
        self.text = Some(text);
        self
    }

    #[must_use]
    pub fn any_of<I, S>(mut self, field: &str, values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.any_of
            .insert(field.to_string(), values.into_iter().map(Into::into).collect());
        self
    }

    #[must_use]
    pub fn range(mut self, field: &str, min: Option<f64>, max: Option<f64>) -> Self {
        self.ranges
            .insert(field.to_string(), NumericRange::new(min, max));
        self
    }

    #[must_use]
    pub fn flag(mut self, field: &str, state: TriState) -> Self {
        self.flags.insert(field.to_string(), state);
        self
    }

    #[must_use]
    pub fn require_present(mut self, field: &str, present: bool) -> Self {
        self.present.insert(field.to_string(), present);
        self
    }

    #[must_use]
    pub fn time_range(
        mut self,
        field: &str,
        from: Option<DateTime<Utc>>,
        to: Option<DateTime<Utc>>,
    ) -> Self {
        self.time_ranges
            .insert(field.to_string(), TimeRange { from, to });
        self
    }

    /// Whether no predicate is populated.
    pub fn is_empty(&self) -> bool {
        self.text
            .as_ref()
            .is_none_or(|text| text.term.trim().is_empty())
            && self.any_of.values().all(Vec::is_empty)
            && self.ranges.values().all(|r| !r.is_set())
            && self.flags.values().all(|f| !f.is_set())
            && self.present.is_empty()
            && self.time_ranges.values().all(|r| !r.is_set())
    }

    /// Check one record. `text` is the compiled text predicate, if any.
    pub fn matches<R: Filterable>(&self, record: &R, text: Option<&TextFilter>) -> bool {
        self.any_of.iter().all(|(field, allowed)| {
            allowed.is_empty()
                || record
                    .values(field)
                    .iter()
                    .any(|v| allowed.iter().any(|a| a.eq_ignore_ascii_case(v)))
        }) && self.ranges.iter().all(|(field, range)| {
            !range.is_set() || record.number(field).is_some_and(|v| range.contains(v))
        }) && self
            .flags
            .iter()
            .all(|(field, state)| state.accepts(record.flag(field)))
            && self
                .present
                .iter()
                .all(|(field, wanted)| record.is_present(field) == *wanted)
            && self.time_ranges.iter().all(|(field, range)| {
                !range.is_set() || record.timestamp(field).is_some_and(|t| range.contains(t))
            })
            && text.is_none_or(|text| text.accepts(record))
    }
}

/// A compiled [`TextPredicate`].
#[derive(Debug, Clone)]
pub struct TextFilter {
    matcher: Matcher,
    options: SearchOptions,
}

impl TextFilter {
    /// Compile `predicate`; `None` when its pattern is invalid.
    pub fn compile(predicate: &TextPredicate) -> Option<Self> {
        let mut options = SearchOptions::default()
            .with_mode(predicate.mode)
            .with_min_score(predicate.min_score);
        options.fields.clone_from(&predicate.fields);
        match Matcher::new(predicate.term.trim(), predicate.mode, options.case_sensitive) {
            Ok(matcher) => Some(Self { matcher, options }),
            Err(e) => {
                warn!(error = %e, "filter text pattern rejected, no records will match");
                None
            },
        }
    }

    pub fn accepts<R: Searchable>(&self, record: &R) -> bool {
        score_record(record, &self.matcher, &self.options)
            .is_some_and(|result| result.score >= self.options.min_score)
    }
}

/// Records satisfying every populated predicate of `criteria`, in input order.
pub fn filter<'a, R: Filterable>(
    records: &'a [R],
    criteria: &ExtendedFilterCriteria,
) -> Vec<&'a R> {
    let text = match criteria
        .text
        .as_ref()
        .filter(|text| !text.term.trim().is_empty())
    {
        Some(predicate) => match TextFilter::compile(predicate) {
            Some(compiled) => Some(compiled),
            None => return Vec::new(),
        },
        None => None,
    };

    records
        .iter()
        .filter(|record| criteria.matches(*record, text.as_ref()))
        .collect()
}
