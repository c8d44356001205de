//! Bare repository file path detection in free text.
//!
//! A file path is a run of `/`-separated segments drawn from `[A-Za-z0-9_.-]`, whose last
//! segment carries one of [`FILE_EXTENSIONS`], and which is not glued to further
//! segment characters on either side. `foo.rs.bak` and `xmain.rsx` are not paths;
//! `/abs/x.rs` yields `abs/x.rs`.

use once_cell::sync::Lazy;
use regex::Regex;

pub const FILE_EXTENSIONS: &[&str] = &[
    "rs", "toml", "yaml", "yml", "json", "md", "lock", "sh", "py",
];

static PATH_RUN_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"[A-Za-z0-9_.\-/]+").expect("static path-run regex"));

#[must_use]
fn segment_has_file_extension(segment: &str) -> bool {
    FILE_EXTENSIONS.iter().any(|ext| {
        segment.len() > ext.len() + 1
            && segment.ends_with(ext)
            && segment.as_bytes()[segment.len() - ext.len() - 1] == b'.'
    })
}

/// Push the longest path that starts at the head of `chain` (segments joined by single
/// slashes), if any segment in it carries a file extension.
fn push_chain_match<'a>(chain: &[&'a str], run: &'a str, start: usize, out: &mut Vec<&'a str>) {
    let Some(last_valid) = chain.iter().rposition(|s| segment_has_file_extension(s)) else {
        return;
    };
    let len: usize = chain[..=last_valid].iter().map(|s| s.len()).sum::<usize>() + last_valid;
    out.push(&run[start..start + len]);
}

/// All file path mentions in `text`, in order of appearance (duplicates kept).
#[must_use]
pub fn find_file_paths(text: &str) -> Vec<&str> {
    let mut out = Vec::new();
    for run in PATH_RUN_RE.find_iter(text) {
        let run = run.as_str();
        let mut chain: Vec<&str> = Vec::new();
        let mut chain_start = 0usize;
        let mut offset = 0usize;
        for segment in run.split('/') {
            if segment.is_empty() {
                if !chain.is_empty() {
                    push_chain_match(&chain, run, chain_start, &mut out);
                    chain.clear();
                }
                offset += 1;
                chain_start = offset;
                continue;
            }
            if chain.is_empty() {
                chain_start = offset;
            }
            chain.push(segment);
            offset += segment.len() + 1;
        }
        if !chain.is_empty() {
            push_chain_match(&chain, run, chain_start, &mut out);
        }
    }
    out
}

#[must_use]
pub fn contains_file_path(text: &str) -> bool {
    !find_file_paths(text).is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    #[test]
    fn finds_paths_with_line_suffixes_and_punctuation() {
        let text = "See src/lib.rs:42, and (crates/x/Cargo.toml) plus README.md here.";
        assert_eq!(
            find_file_paths(text),
            vec!["src/lib.rs", "crates/x/Cargo.toml", "README.md"]
        );
    }

    #[test]
    fn trailing_dot_glues_to_the_extension() {
        assert!(find_file_paths("see README.md.").is_empty());
        assert!(contains_file_path("see README.md"));
    }

    #[test]
    fn rejects_glued_extensions() {
        assert!(find_file_paths("foo.rs.bak xmain.rsx notes.jsonl").is_empty());
    }

    #[test]
    fn absolute_paths_drop_leading_slash() {
        assert_eq!(find_file_paths("/abs/path/x.rs"), vec!["abs/path/x.rs"]);
    }

    #[test]
    fn stops_at_last_segment_with_extension() {
        assert_eq!(find_file_paths("src/lib.rs/extra"), vec!["src/lib.rs"]);
        assert_eq!(find_file_paths("a.md/b.rs/c"), vec!["a.md/b.rs"]);
    }

    #[test]
    fn double_slash_splits_chains() {
        assert_eq!(find_file_paths("a//b.rs"), vec!["b.rs"]);
    }

    #[test]
    fn bare_extension_is_not_a_path() {
        assert!(find_file_paths(".rs").is_empty());
        assert_eq!(find_file_paths("..rs"), vec!["..rs"]);
    }

    proptest! {
        #[test]
        fn proptest_found_paths_end_with_known_extension(text in "[a-z/ .:]{0,40}(rs|md)?") {
            for path in find_file_paths(&text) {
                let has_known_ext = FILE_EXTENSIONS.iter().any(|ext| path.ends_with(&format!(".{ext}")));
                prop_assert!(has_known_ext);
                prop_assert!(!path.starts_with('/'));
            }
        }
    }
}
