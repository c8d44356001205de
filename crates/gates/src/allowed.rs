use crate::paths::is_low_confidence_path;
use crate::tokens::{cite_anchors, extract_paths, normalize_token, scan_citation_tokens, token_path, PATHLINE_RE};
use grounding_protocol::CitationToken;
use std::collections::{BTreeMap, BTreeSet};

/// Everything citeable in one question's injected evidence.
///
/// Built once from the rendered blocks before the first model call and rebuilt only
/// when evidence is widened by a retry.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowedTokenSet {
    tokens: BTreeSet<String>,
    spans: BTreeMap<String, Vec<(u64, u64)>>,
    paths: BTreeSet<String>,
    tokens_by_path: BTreeMap<String, Vec<String>>,
}

impl AllowedTokenSet {
    pub fn from_blocks<S: AsRef<str>>(blocks: &[S]) -> Self {
        let blob = blocks
            .iter()
            .map(AsRef::as_ref)
            .collect::<Vec<_>>()
            .join("\n");
        let mut set = Self::default();

        for raw in scan_citation_tokens(&blob) {
            let token = normalize_token(raw);
            set.add_by_path(&token);
            let Some(caps) = PATHLINE_RE.captures(&token) else {
                continue;
            };
            if is_low_confidence_path(&caps["path"]) {
                continue;
            }
            if let Some(parsed) = CitationToken::parse(&token) {
                set.spans
                    .entry(parsed.path.clone())
                    .or_default()
                    .push((parsed.lo, parsed.hi));
                set.paths.insert(parsed.path);
            }
            set.tokens.insert(token);
        }

        for raw in cite_anchors(&blob) {
            let token = normalize_token(raw);
            set.add_by_path(&token);
            match token_path(&token) {
                Some(path) => {
                    if !is_low_confidence_path(path) {
                        set.paths.insert(path.to_string());
                    }
                }
                None => {
                    if !extract_paths(&token).is_empty() && !is_low_confidence_path(&token) {
                        set.paths.insert(token);
                    }
                }
            }
        }

        for path in extract_paths(&blob) {
            if !is_low_confidence_path(&path) {
                set.paths.insert(path);
            }
        }
        set
    }

    fn add_by_path(&mut self, token: &str) {
        let Some(path) = token_path(token) else {
            return;
        };
        if path.is_empty() || is_low_confidence_path(path) {
            return;
        }
        let list = self.tokens_by_path.entry(path.to_string()).or_default();
        if !list.iter().any(|t| t == token) {
            list.push(token.to_string());
        }
    }

    /// No citeable `path:line` token was found.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }

    /// Citeable tokens in sorted order.
    pub fn tokens(&self) -> impl Iterator<Item = &str> {
        self.tokens.iter().map(String::as_str)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.tokens.len()
    }

    /// Paths derivable from evidence: token paths, `CITE=` anchors and bare file paths.
    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.paths.iter().map(String::as_str)
    }

    #[must_use]
    pub fn has_path(&self, path: &str) -> bool {
        self.paths.contains(path)
    }

    /// The first evidence token seen for `path`, used by citation autocomplete.
    #[must_use]
    pub fn first_token_for(&self, path: &str) -> Option<&str> {
        self.tokens_by_path
            .get(path)
            .and_then(|list| list.first())
            .map(String::as_str)
    }

    /// Known means an exact token, an overlapping span on the same path, or any
    /// token on the same path at all (engines that only expose `path:1` anchors).
    #[must_use]
    pub fn is_known(&self, token: &str) -> bool {
        self.knows(token, true)
    }

    /// Like [`Self::is_known`]; with `allow_path_only` off, a line range must
    /// overlap one seen for its path.
    #[must_use]
    pub fn knows(&self, token: &str, allow_path_only: bool) -> bool {
        if self.tokens.contains(token) {
            return true;
        }
        if !PATHLINE_RE.is_match(token) {
            return false;
        }
        let Some(cited) = CitationToken::parse(token) else {
            return false;
        };
        let Some(spans) = self.spans.get(&cited.path) else {
            return false;
        };
        if allow_path_only && !spans.is_empty() {
            return true;
        }
        spans.iter().any(|&(lo, hi)| !(cited.hi < lo || hi < cited.lo))
    }

    /// Tokens not known to the evidence, in input order.
    #[must_use]
    pub fn unknown<'a, S: AsRef<str>>(&self, tokens: &'a [S]) -> Vec<&'a str> {
        self.unknown_with(tokens, true)
    }

    #[must_use]
    pub fn unknown_with<'a, S: AsRef<str>>(&self, tokens: &'a [S], allow_path_only: bool) -> Vec<&'a str> {
        if self.is_empty() {
            return tokens.iter().map(AsRef::as_ref).collect();
        }
        tokens
            .iter()
            .map(AsRef::as_ref)
            .filter(|t| !self.knows(t, allow_path_only))
            .collect()
    }
}
