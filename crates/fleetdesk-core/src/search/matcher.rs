use std::fmt;
use std::str::FromStr;

use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};

use crate::{Error, Result};

/// Upper bound on compiled pattern size; user patterns past this are rejected.
const PATTERN_SIZE_LIMIT: usize = 1 << 20;

/// How a search term is interpreted.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MatchMode {
    /// The term appears anywhere in the field.
    #[default]
    Substring,
    /// The term appears as a whole word.
    Exact,
    /// The term is a regular expression.
    Pattern,
}

impl MatchMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Substring => "substring",
            Self::Exact => "exact",
            Self::Pattern => "pattern",
        }
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for MatchMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "substring" | "contains" => Ok(Self::Substring),
            "exact" | "word" => Ok(Self::Exact),
            "pattern" | "regex" => Ok(Self::Pattern),
            other => Err(Error::Config(format!("unknown match mode '{other}'"))),
        }
    }
}

/// A compiled search term.
#[derive(Debug, Clone)]
pub struct Matcher {
    regex: Regex,
    mode: MatchMode,
}

impl Matcher {
    /// Compile `term` for `mode`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidPattern`] when a pattern-mode term is not a
    /// valid regular expression or is too large.
    pub fn new(term: &str, mode: MatchMode, case_sensitive: bool) -> Result<Self> {
        let source = match mode {
            MatchMode::Substring => regex::escape(term),
            MatchMode::Exact => format!(r"\b{}\b", regex::escape(term)),
            MatchMode::Pattern => term.to_string(),
        };
        let regex = RegexBuilder::new(&source)
            .case_insensitive(!case_sensitive)
            .size_limit(PATTERN_SIZE_LIMIT)
            .build()
            .map_err(|e| Error::InvalidPattern(format!("{term}: {e}")))?;
        Ok(Self { regex, mode })
    }

    pub const fn mode(&self) -> MatchMode {
        self.mode
    }

    /// Non-overlapping, non-empty match spans as byte offsets.
    pub fn find_all(&self, text: &str) -> Vec<(usize, usize)> {
        self.regex
            .find_iter(text)
            .filter(|m| !m.is_empty())
            .map(|m| (m.start(), m.end()))
            .collect()
    }

    pub fn is_match(&self, text: &str) -> bool {
        self.regex.find_iter(text).any(|m| !m.is_empty())
    }
}
