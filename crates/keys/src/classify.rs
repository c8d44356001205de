//! Field-name and field-value classifiers.
//!
//! Every rule that decides "this field looks like a path/line/snippet/count" lives
//! here as a named predicate so it can be tested without a payload.

use grounding_protocol::file_paths::contains_file_path;

pub const PATH_HINT_TERMS: &[&str] = &["path", "file", "uri", "title"];
pub const SNIPPET_HINT_TERMS: &[&str] = &[
    "snippet",
    "text",
    "source",
    "doc",
    "signature",
    "content",
    "body",
];
pub const ROW_CONTAINER_HINT_TERMS: &[&str] = &[
    "rows", "results", "entities", "items", "files", "sources", "hits", "matches", "data",
];

const PATH_EXACT: &[&str] = &[
    "file",
    "path",
    "file_path",
    "doc_path",
    "target_file_path",
    "canonical_path",
    "title",
];
const LINE_EXACT: &[&str] = &["line", "line_number", "line_start", "line_end", "lineno"];
const SNIPPET_EXACT: &[&str] = &[
    "snippet",
    "text",
    "source_text",
    "line_text",
    "doc_comment",
    "entity_doc_comment",
    "signature",
];
const COUNT_EXACT: &[&str] = &[
    "total",
    "matches",
    "matched",
    "num_results",
    "result_count",
    "hit_count",
];
const METRIC_SUFFIXES: &[&str] = &[
    "_count", "_size", "_mtime", "_hash", "_version", "_json", "_bytes", "_total",
];
const METRIC_TOKENS: &[&str] = &["count", "size", "mtime", "hash", "version", "bytes"];

fn normalized(name: &str) -> String {
    name.trim().to_ascii_lowercase()
}

#[must_use]
pub fn looks_like_key_name(name: &str, hints: &[&str]) -> bool {
    let n = normalized(name);
    !n.is_empty() && hints.iter().any(|h| n.contains(h))
}

/// Names that carry a measurement rather than a location (`has_unsafe_count`,
/// `file_size`, `content_hash`).
#[must_use]
pub fn is_metricish_key_name(name: &str) -> bool {
    let n = normalized(name);
    if n.is_empty() {
        return false;
    }
    n.starts_with("has_")
        || METRIC_SUFFIXES.iter().any(|s| n.ends_with(s))
        || METRIC_TOKENS.iter().any(|t| n.contains(t))
}

#[must_use]
pub fn is_path_key_candidate(name: &str) -> bool {
    let n = normalized(name);
    if n.is_empty() {
        return false;
    }
    if PATH_EXACT.contains(&n.as_str()) || n.ends_with("_path") || n.ends_with("_file") {
        return true;
    }
    !is_metricish_key_name(&n) && looks_like_key_name(&n, PATH_HINT_TERMS)
}

#[must_use]
pub fn is_line_key_candidate(name: &str) -> bool {
    let n = normalized(name);
    if n.is_empty() {
        return false;
    }
    LINE_EXACT.contains(&n.as_str())
        || ["line_start", "line_end", "line_number", "lineno"]
            .iter()
            .any(|t| n.contains(t))
        || n.starts_with("line_")
        || n.ends_with("_line")
}

#[must_use]
pub fn is_snippet_key_candidate(name: &str) -> bool {
    let n = normalized(name);
    if n.is_empty() {
        return false;
    }
    if SNIPPET_EXACT.contains(&n.as_str()) {
        return true;
    }
    !is_metricish_key_name(&n) && looks_like_key_name(&n, SNIPPET_HINT_TERMS)
}

#[must_use]
pub fn is_count_key_name(name: &str) -> bool {
    let n = normalized(name);
    n.contains("count") || COUNT_EXACT.contains(&n.as_str())
}

#[must_use]
pub fn looks_like_row_container_name(name: &str) -> bool {
    looks_like_key_name(name, ROW_CONTAINER_HINT_TERMS)
}

/// Whether a string value reads like a repository-relative file path.
#[must_use]
pub fn looks_like_repo_path_text(value: &str) -> bool {
    let txt = value.trim().replace('\\', "/");
    if txt.is_empty() {
        return false;
    }
    if contains_file_path(&txt) || txt.starts_with("./") || txt.starts_with("../") {
        return true;
    }
    match txt.rsplit_once('/') {
        Some((_, last)) => last.contains('.'),
        None => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metric_names_are_never_paths() {
        assert!(is_metricish_key_name("has_unsafe_count"));
        assert!(!is_path_key_candidate("has_unsafe_count"));
        assert!(!is_path_key_candidate("file_size"));
        assert!(is_path_key_candidate("file_path"));
        assert!(is_path_key_candidate("source_file"));
        assert!(is_path_key_candidate("doc_uri"));
    }

    #[test]
    fn line_candidates_cover_suffixes_and_prefixes() {
        for name in ["line", "LINE_START", "decl_line", "line_hint", "start_lineno"] {
            assert!(is_line_key_candidate(name), "{name}");
        }
        assert!(!is_line_key_candidate("pipeline"));
    }

    #[test]
    fn snippet_candidates_skip_metrics() {
        assert!(is_snippet_key_candidate("signature"));
        assert!(is_snippet_key_candidate("body_text"));
        assert!(!is_snippet_key_candidate("content_hash"));
    }

    #[test]
    fn count_names() {
        assert!(is_count_key_name("unsafe_block_count"));
        assert!(is_count_key_name("total"));
        assert!(!is_count_key_name("totals_by_file"));
    }

    #[test]
    fn repo_path_values() {
        assert!(looks_like_repo_path_text("src/x.rs"));
        assert!(looks_like_repo_path_text("./bin"));
        assert!(looks_like_repo_path_text("docs\\guide.txt"));
        assert!(!looks_like_repo_path_text("hello world"));
        assert!(!looks_like_repo_path_text("a/b"));
        assert!(!looks_like_repo_path_text("   "));
    }

    #[test]
    fn row_container_hints() {
        assert!(looks_like_row_container_name("Results"));
        assert!(!looks_like_row_container_name("summary"));
    }
}
