//! "Did you mean" hints for names that were not found.

use fuzzy_matcher::FuzzyMatcher;
use fuzzy_matcher::skim::SkimMatcherV2;

/// Names closest to `wanted`, best first, at most `limit` of them.
pub fn closest_names<'a, I>(wanted: &str, names: I, limit: usize) -> Vec<String>
where
    I: IntoIterator<Item = &'a str>,
{
    let matcher = SkimMatcherV2::default();
    let query = wanted.trim().to_lowercase();
    if query.is_empty() {
        return Vec::new();
    }

    let mut scored: Vec<(i64, &str)> = names
        .into_iter()
        .filter_map(|name| {
            matcher
                .fuzzy_match(&name.to_lowercase(), &query)
                .map(|score| (score, name))
        })
        .collect();
    // Ties go to the shorter, then alphabetically first name.
    scored.sort_by(|a, b| {
        b.0.cmp(&a.0)
            .then(a.1.len().cmp(&b.1.len()))
            .then(a.1.cmp(b.1))
    });
    scored.dedup_by(|a, b| a.1 == b.1);
    scored
        .into_iter()
        .take(limit)
        .map(|(_, name)| name.to_string())
        .collect()
}
