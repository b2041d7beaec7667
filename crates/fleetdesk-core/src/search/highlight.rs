use serde::{Deserialize, Serialize};

use super::SearchMatch;

/// Strings wrapped around each highlighted span.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HighlightMarkers {
    pub open: String,
    pub close: String,
}

impl HighlightMarkers {
    pub fn new(open: impl Into<String>, close: impl Into<String>) -> Self {
        Self {
            open: open.into(),
            close: close.into(),
        }
    }
}

impl Default for HighlightMarkers {
    fn default() -> Self {
        Self::new("<mark>", "</mark>")
    }
}

/// Wrap each byte span of `text` with `markers`.
///
/// Spans are applied in order of their start offset. A span overlapping an
/// earlier one, or not on a char boundary, is skipped.
pub fn highlight(text: &str, spans: &[(usize, usize)], markers: &HighlightMarkers) -> String {
    let mut sorted: Vec<(usize, usize)> = spans.to_vec();
    sorted.sort_unstable();

    let mut out = String::with_capacity(text.len() + spans.len() * 16);
    let mut cursor = 0;
    for (start, end) in sorted {
        if start < cursor
            || start >= end
            || end > text.len()
            || !text.is_char_boundary(start)
            || !text.is_char_boundary(end)
        {
            continue;
        }
        out.push_str(&text[cursor..start]);
        out.push_str(&markers.open);
        out.push_str(&text[start..end]);
        out.push_str(&markers.close);
        cursor = end;
    }
    out.push_str(&text[cursor..]);
    out
}

/// Highlight every match recorded for `field`, or `None` if it had none.
pub fn highlight_field(
    matches: &[SearchMatch],
    field: &str,
    markers: &HighlightMarkers,
) -> Option<String> {
    let in_field: Vec<&SearchMatch> = matches.iter().filter(|m| m.field == field).collect();
    let value = &in_field.first()?.value;
    let spans: Vec<(usize, usize)> = in_field.iter().map(|m| (m.start, m.end)).collect();
    Some(highlight(value, &spans, markers))
}
