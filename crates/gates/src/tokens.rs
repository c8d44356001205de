//! Citation and path token extraction.
//!
//! Models decorate citations in many ways (`- file:src/a.rs:3`, `` `a.rs:3` ``,
//! `CITE=Q1_x.json:1`, `a.rs::file anchor 9:4`). Everything here reduces those to the
//! one grammar `path:line(-line)` so the gates compare like with like.

use grounding_protocol::file_paths::find_file_paths;
use grounding_protocol::CitationToken;
use once_cell::sync::Lazy;
use regex::Regex;

const MAX_NORMALIZE_PASSES: usize = 8;

/// Loose token shape used to scan free text (evidence blocks, bullet sections).
pub static CITATION_TOKEN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:(?:file|path):)?[A-Za-z0-9_./\-]+:\d+(?:-\d+)?").expect("static citation regex")
});

/// The strict grammar a normalized token must match.
pub static PATHLINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<path>[^\s:]+(?:/[^\s:]+)*):(?P<a>\d+)(?:-(?P<b>\d+))?$")
        .expect("static pathline regex")
});

static BULLET_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^\s*[-*]\s+").expect("static bullet regex"));

static PREFIX_RES: Lazy<Vec<Regex>> = Lazy::new(|| {
    [
        r"(?i)^\s*file:\s*",
        r"(?i)^\s*path:\s*",
        r"(?i)^\s*cite\s*=\s*",
        r"(?i)^\s*section:\s*",
        r"(?i)^\s*artifact:\s*",
    ]
    .iter()
    .map(|p| Regex::new(p).expect("static prefix regex"))
    .collect()
});

static PAREN_SUFFIX_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\s*\([^)]*\)\s*$").expect("static paren regex"));

static FILE_ANCHOR_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)^(?P<path>[^:]+)::file anchor\s+(?P<a>\d+):(?P<b>\d+)\s*$")
        .expect("static anchor regex")
});

/// Run artifact names (`Q1_unsafe.json`, `R_SAFE_1_scan.json`) cite line 1 implicitly.
static ARTIFACT_NAME_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[A-Z][A-Z0-9_]*_[A-Za-z0-9_.\-]+\.json$").expect("static artifact regex")
});

static CITATIONS_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*CITATIONS[ \t]*[=:][ \t]*(.*)$").expect("static citations regex"));

static CITATIONS_HEADER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?m)^[ \t]*CITATIONS[ \t]*[=:]?[ \t]*$").expect("static citations header regex"));

static CITE_ANCHOR_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\bCITE\s*=\s*(\S+)").expect("static cite regex"));

static HEADER_LINE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^\s*\*{0,2}(?:VERDICT|CITATIONS)\*{0,2}\b").expect("static header regex"));

fn normalize_once(raw: &str) -> String {
    let mut t = raw.trim().to_string();
    if t.is_empty() {
        return t;
    }
    t = BULLET_RE.replace(&t, "").into_owned();
    t = t.trim_matches('`').to_string();
    for re in PREFIX_RES.iter() {
        t = re.replace(&t, "").into_owned();
    }
    t = PAREN_SUFFIX_RE.replace(&t, "").into_owned();
    if let Some(caps) = FILE_ANCHOR_RE.captures(&t) {
        let a: u64 = caps["a"].parse().unwrap_or(0);
        let b: u64 = caps["b"].parse().unwrap_or(0);
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        t = format!("{}:{lo}-{hi}", &caps["path"]);
    }
    if !t.contains(':') && ARTIFACT_NAME_RE.is_match(&t) {
        t.push_str(":1");
    }
    t.trim().to_string()
}

/// Strip decoration from a raw citation token.
///
/// The result is not guaranteed to match the grammar; use [`normalize`] for that.
/// Blank input yields an empty string.
#[must_use]
pub fn normalize_token(raw: &str) -> String {
    let mut current = normalize_once(raw);
    for _ in 0..MAX_NORMALIZE_PASSES {
        let next = normalize_once(&current);
        if next == current {
            break;
        }
        current = next;
    }
    current
}

/// Normalize and parse; `None` when the token does not reduce to `path:line(-line)`.
#[must_use]
pub fn normalize(raw: &str) -> Option<CitationToken> {
    let text = normalize_token(raw);
    if !is_pathline(&text) {
        return None;
    }
    CitationToken::parse(&text)
}

#[must_use]
pub fn is_pathline(text: &str) -> bool {
    PATHLINE_RE.is_match(text)
}

/// The path part of a `path:...` token.
#[must_use]
pub fn token_path(token: &str) -> Option<&str> {
    token.split_once(':').map(|(path, _)| path.trim())
}

/// Comma-separated citation list, normalized, blanks dropped.
#[must_use]
pub fn parse_citations_value(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|t| !t.is_empty())
        .map(normalize_token)
        .filter(|t| !t.is_empty())
        .collect()
}

/// Answer text with markdown bold markers removed.
#[must_use]
pub fn strip_emphasis(answer: &str) -> String {
    answer.replace("**", "")
}

/// Normalized tokens from the answer's `CITATIONS=` line.
///
/// A standalone `CITATIONS:` header followed by a bullet section is read leniently
/// (up to the next blank line) so the provenance gate can still check what was cited.
#[must_use]
pub fn extract_citations(answer: &str) -> Vec<String> {
    let clean = strip_emphasis(answer);
    let inline = CITATIONS_LINE_RE
        .captures(&clean)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim().to_string())
        .unwrap_or_default();
    let raw = if inline.is_empty() {
        match CITATIONS_HEADER_RE.find(&clean) {
            Some(header) => {
                let after = &clean[header.end()..];
                let section = after.trim_start_matches('\n').split("\n\n").next().unwrap_or("");
                scan_citation_tokens(section).join(", ")
            }
            None => String::new(),
        }
    } else {
        inline
    };
    if raw.is_empty() {
        return Vec::new();
    }
    parse_citations_value(&raw)
}

/// Every loose citation-shaped token in `text`, raw.
#[must_use]
pub fn scan_citation_tokens(text: &str) -> Vec<&str> {
    CITATION_TOKEN_RE.find_iter(text).map(|m| m.as_str()).collect()
}

/// Values of `CITE=...` anchors in `text`, raw.
#[must_use]
pub fn cite_anchors(text: &str) -> Vec<&str> {
    CITE_ANCHOR_RE
        .captures_iter(text)
        .filter_map(|caps| caps.get(1).map(|m| m.as_str()))
        .collect()
}

/// Distinct file paths mentioned in `text`, in order of first appearance.
#[must_use]
pub fn extract_paths(text: &str) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for path in find_file_paths(text) {
        if !out.iter().any(|p| p == path) {
            out.push(path.to_string());
        }
    }
    out
}

/// The answer without its VERDICT/CITATIONS header lines.
#[must_use]
pub fn strip_header_lines(answer: &str) -> String {
    answer
        .lines()
        .filter(|line| !HEADER_LINE_RE.is_match(line))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn strips_decoration_and_prefixes() {
        assert_eq!(normalize_token("- `src/lib.rs:12`"), "src/lib.rs:12");
        assert_eq!(normalize_token("file:crates/foo.rs:12"), "crates/foo.rs:12");
        assert_eq!(normalize_token("PATH: crates/foo.rs:3-4"), "crates/foo.rs:3-4");
        assert_eq!(normalize_token("CITE=Q1_unsafe.json:1"), "Q1_unsafe.json:1");
        assert_eq!(normalize_token("section:a.md:7 (intro)"), "a.md:7");
        assert_eq!(normalize_token("path:file:x.rs:1"), "x.rs:1");
        assert_eq!(normalize_token("   "), "");
    }

    #[test]
    fn file_anchor_form_becomes_ordered_range() {
        assert_eq!(
            normalize_token("crates/a.rs::file anchor 30:12"),
            "crates/a.rs:12-30"
        );
    }

    #[test]
    fn bare_artifact_name_cites_line_one() {
        assert_eq!(normalize_token("Q1_unsafe.json"), "Q1_unsafe.json:1");
        assert_eq!(normalize_token("notes.json"), "notes.json");
    }

    #[test]
    fn normalize_rejects_off_grammar() {
        assert_eq!(
            normalize("`a.rs:9-3`"),
            Some(CitationToken::new("a.rs", 3, 9))
        );
        assert_eq!(normalize("NONE"), None);
        assert_eq!(normalize("a.rs"), None);
        assert_eq!(normalize("a b.rs:1"), None);
    }

    #[test]
    fn citations_line_is_preferred() {
        let answer = "**VERDICT**=TRUE_POSITIVE\n**CITATIONS**=a.rs:1, file:b.rs:2\n\nbody";
        assert_eq!(extract_citations(answer), vec!["a.rs:1", "b.rs:2"]);
    }

    #[test]
    fn bullet_section_is_read_up_to_blank_line() {
        let answer = "VERDICT=TRUE_POSITIVE\nCITATIONS:\n- a.rs:1\n- b.rs:2-3\n\nc.rs:9 in body";
        assert_eq!(extract_citations(answer), vec!["a.rs:1", "b.rs:2-3"]);
    }

    #[test]
    fn header_lines_are_stripped_from_body() {
        let answer = "VERDICT=TRUE_POSITIVE\n**CITATIONS**=a.rs:1\nsrc/x.rs is fine";
        assert_eq!(strip_header_lines(answer), "src/x.rs is fine");
    }

    #[test]
    fn anchors_and_paths_are_found() {
        let block = "[Preflight scan]:\nCITE=Q1_scan.json:1\n  1. src/x.rs:4 | count=2";
        assert_eq!(cite_anchors(block), vec!["Q1_scan.json:1"]);
        assert_eq!(scan_citation_tokens(block), vec!["Q1_scan.json:1", "src/x.rs:4"]);
        assert_eq!(extract_paths(block), vec!["Q1_scan.json", "src/x.rs"]);
    }

    proptest! {
        #[test]
        fn normalization_is_idempotent(raw in "[-*` ]{0,3}((file|path|cite=|section|artifact):)?[a-z_/.]{1,16}:[0-9]{1,4}(-[0-9]{1,4})?( \\([a-z ]{0,8}\\))?`?") {
            let once = normalize_token(&raw);
            prop_assert_eq!(normalize_token(&once), once.clone());
            if let Some(token) = normalize(&raw) {
                prop_assert_eq!(normalize(&token.to_string()), Some(token));
            }
        }
    }
}
