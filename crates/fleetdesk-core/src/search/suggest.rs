use std::collections::HashSet;
use std::sync::LazyLock;

use regex::Regex;

use super::Searchable;

/// Separators between words inside a field value. Hyphens, underscores and
/// dots stay inside words so names like `prod-web-1` survive whole.
///
/// SAFETY: Pattern is a compile-time constant that is known to be valid.
#[allow(clippy::unwrap_used)]
static WORD_DELIMITERS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"[\s,;:/|=()\[\]{}"'`]+"#).unwrap());

/// Completion candidates for a partially typed term.
///
/// Collects whole field values and delimited words that contain `partial`
/// (case-insensitively), removes duplicates, then orders candidates that start
/// with `partial` before the rest and shorter before longer. At most `limit`
/// are returned.
pub fn suggestions<R: Searchable>(
    records: &[R],
    partial: &str,
    fields: Option<&[String]>,
    limit: usize,
) -> Vec<String> {
    let needle = partial.trim().to_lowercase();
    if needle.is_empty() || limit == 0 {
        return Vec::new();
    }

    let mut seen = HashSet::new();
    let mut candidates = Vec::new();
    let mut offer = |candidate: &str| {
        let candidate = candidate.trim();
        if !candidate.is_empty()
            && candidate.to_lowercase().contains(&needle)
            && seen.insert(candidate.to_string())
        {
            candidates.push(candidate.to_string());
        }
    };

    for record in records {
        for (field, value) in record.searchable_fields() {
            if fields.is_some_and(|wanted| !wanted.iter().any(|f| f == field)) {
                continue;
            }
            let text = value.to_text();
            if !text.to_lowercase().contains(&needle) {
                continue;
            }
            offer(&*text);
            for word in WORD_DELIMITERS.split(&text) {
                offer(word);
            }
        }
    }

    candidates.sort_by_key(|c| (!c.to_lowercase().starts_with(&needle), c.chars().count()));
    candidates.truncate(limit);
    candidates
}
