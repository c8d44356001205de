use serde::{Deserialize, Serialize};
use std::fmt;

/// Human-readable form of the citation grammar, used in issue messages and prompts.
pub const PATHLINE_GRAMMAR: &str = "path:line(-line)";

/// A `path:line` or `path:line-line` reference.
///
/// Comparisons operate on the `(path, lo, hi)` triple. The span is always stored with
/// `lo <= hi`, even when the source text wrote the range backwards.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CitationToken {
    pub path: String,
    pub lo: u64,
    pub hi: u64,
}

impl CitationToken {
    #[must_use]
    pub fn new(path: impl Into<String>, a: u64, b: u64) -> Self {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        Self {
            path: path.into(),
            lo,
            hi,
        }
    }

    /// Parse text that already matches `^[^\s:]+(?:/[^\s:]+)*:\d+(?:-\d+)?$`.
    ///
    /// Returns `None` for anything else; callers normalize decoration away first.
    #[must_use]
    pub fn parse(text: &str) -> Option<Self> {
        let (path, span) = text.split_once(':')?;
        if path.is_empty() || path.chars().any(char::is_whitespace) {
            return None;
        }
        let (a, b) = match span.split_once('-') {
            Some((a, b)) => (parse_line(a)?, parse_line(b)?),
            None => {
                let a = parse_line(span)?;
                (a, a)
            }
        };
        Some(Self::new(path, a, b))
    }

    /// Half-open style overlap test: not `(hi < alo) or (ahi < lo)`.
    #[must_use]
    pub fn overlaps(&self, other: &Self) -> bool {
        self.path == other.path && !(self.hi < other.lo || other.hi < self.lo)
    }
}

impl fmt::Display for CitationToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.lo == self.hi {
            write!(f, "{}:{}", self.path, self.lo)
        } else {
            write!(f, "{}:{}-{}", self.path, self.lo, self.hi)
        }
    }
}

fn parse_line(raw: &str) -> Option<u64> {
    if raw.is_empty() || !raw.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    raw.parse().ok()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_single_line_and_range() {
        assert_eq!(
            CitationToken::parse("src/lib.rs:42"),
            Some(CitationToken::new("src/lib.rs", 42, 42))
        );
        assert_eq!(
            CitationToken::parse("src/lib.rs:10-5"),
            Some(CitationToken::new("src/lib.rs", 5, 10))
        );
    }

    #[test]
    fn rejects_off_grammar_text() {
        for bad in [
            "src/lib.rs",
            ":12",
            "src lib.rs:1",
            "src/lib.rs:1:2",
            "src/lib.rs:a",
            "src/lib.rs:1-",
            "NONE",
        ] {
            assert_eq!(CitationToken::parse(bad), None, "{bad}");
        }
    }

    #[test]
    fn display_is_canonical() {
        assert_eq!(CitationToken::new("a.rs", 7, 7).to_string(), "a.rs:7");
        assert_eq!(CitationToken::new("a.rs", 9, 3).to_string(), "a.rs:3-9");
    }

    #[test]
    fn overlap_requires_same_path() {
        let allowed = CitationToken::new("p.rs", 5, 10);
        assert!(CitationToken::new("p.rs", 7, 7).overlaps(&allowed));
        assert!(CitationToken::new("p.rs", 10, 12).overlaps(&allowed));
        assert!(!CitationToken::new("p.rs", 11, 12).overlaps(&allowed));
        assert!(!CitationToken::new("q.rs", 7, 7).overlaps(&allowed));
    }
}
