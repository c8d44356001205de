pub mod file_paths;
pub mod path_filters;

mod citation;
mod issue;

pub use citation::{CitationToken, PATHLINE_GRAMMAR};
pub use issue::{IssueKind, RetryAttempt, RetryPhase, ValidationIssue};

/// Returns the longest prefix of `text` holding at most `max_chars` characters.
///
/// Budgets in this workspace count characters, never bytes, so a cut can not land
/// inside a multi-byte sequence.
#[must_use]
pub fn truncate_chars(text: &str, max_chars: usize) -> &str {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

#[must_use]
pub fn char_len(text: &str) -> usize {
    text.chars().count()
}

/// Truncate to `max_chars` characters, appending `...` when something was cut.
#[must_use]
pub fn shorten(text: &str, max_chars: usize) -> String {
    if char_len(text) <= max_chars {
        return text.to_string();
    }
    format!("{}...", truncate_chars(text, max_chars))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate_chars("héllo", 2), "hé");
        assert_eq!(truncate_chars("abc", 10), "abc");
        assert_eq!(truncate_chars("abc", 0), "");
    }

    #[test]
    fn shorten_appends_ellipsis_only_when_cut() {
        assert_eq!(shorten("abcdef", 3), "abc...");
        assert_eq!(shorten("abc", 3), "abc");
    }
}
