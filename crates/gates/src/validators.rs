//! Per-question answer rules loaded from TOML.
//!
//! ```toml
//! [[validators.Q1]]
//! type = "ban_regex"
//! regex = "(?i)no unsafe"
//! message = "Q1: do not deny unsafe without evidence"
//! ```

use crate::error::{GateError, Result};
use grounding_protocol::{IssueKind, ValidationIssue};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;

static RS_FILELINE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9_.\-/]+\.rs:\d+(?:-\d+)?").expect("static rs file-line regex")
});

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ValidatorRule {
    /// The answer must not match `regex`.
    BanRegex {
        regex: String,
        #[serde(default)]
        message: Option<String>,
    },
    /// `regex` must match at least `min_count` times.
    RequireMinInlineRegexCount {
        regex: String,
        #[serde(default)]
        min_count: usize,
        #[serde(default)]
        message: Option<String>,
    },
    /// Like `RequireMinInlineRegexCount`, only when `if_regex` matches.
    RequireMinInlineRegexCountIfRegex {
        if_regex: String,
        regex: String,
        #[serde(default)]
        min_count: usize,
        #[serde(default)]
        message: Option<String>,
    },
    /// When `trigger_regex` matches, the answer must cite at least one `.rs` file
    /// outside test paths, unless `clean_outcome_regex` also matches.
    RequireNonTestFilelineCitationsIfRegex {
        trigger_regex: String,
        #[serde(default)]
        clean_outcome_regex: Option<String>,
        #[serde(default)]
        message_no_citations: Option<String>,
        #[serde(default)]
        message_all_test: Option<String>,
        #[serde(default)]
        test_path_patterns: Option<Vec<String>>,
    },
}

/// Rule lists keyed by question id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionValidators {
    #[serde(default)]
    pub validators: BTreeMap<String, Vec<ValidatorRule>>,
}

struct RuleCheck<'a> {
    qid: &'a str,
    issues: Vec<ValidationIssue>,
}

impl RuleCheck<'_> {
    fn compile(&mut self, pattern: &str, label: &str) -> Option<Regex> {
        match Regex::new(pattern) {
            Ok(re) => Some(re),
            Err(err) => {
                self.push(format!(
                    "{}: invalid {label} regex: {pattern:?} ({err})",
                    self.qid
                ));
                None
            }
        }
    }

    fn push(&mut self, message: String) {
        self.issues
            .push(ValidationIssue::new(IssueKind::QuestionValidator, message));
    }

    fn message(&self, custom: &Option<String>, fallback: &str) -> String {
        custom
            .as_deref()
            .filter(|m| !m.trim().is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| format!("{}: {fallback}", self.qid))
    }
}

fn is_test_path(path: &str, patterns: &[Regex]) -> bool {
    let norm = path.replace('\\', "/");
    patterns.iter().any(|re| re.is_match(&norm))
}

fn compile_test_patterns(patterns: &[String]) -> Vec<Regex> {
    patterns
        .iter()
        .filter(|p| !p.trim().is_empty())
        .filter_map(|p| match Regex::new(p) {
            Ok(re) => Some(re),
            Err(err) => {
                log::warn!("validators.test_path_pattern.invalid pattern={p:?} error={err}");
                None
            }
        })
        .collect()
}

impl QuestionValidators {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).map_err(|err| GateError::config("question validators", err))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|err| GateError::Io {
            path: path.to_path_buf(),
            source: err,
        })?;
        Self::from_toml_str(&text)
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.validators.values().all(Vec::is_empty)
    }

    #[must_use]
    pub fn rules_for(&self, qid: &str) -> &[ValidatorRule] {
        self.validators.get(qid).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Apply the rules for `qid`. `default_test_patterns` are used by rules that
    /// do not name their own.
    #[must_use]
    pub fn check(
        &self,
        qid: &str,
        answer: &str,
        default_test_patterns: &[String],
    ) -> Vec<ValidationIssue> {
        let rules = self.rules_for(qid);
        if answer.is_empty() || rules.is_empty() {
            return Vec::new();
        }
        let mut check = RuleCheck {
            qid,
            issues: Vec::new(),
        };
        for rule in rules {
            match rule {
                ValidatorRule::BanRegex { regex, message } => {
                    if let Some(re) = check.compile(regex, "ban_regex.regex") {
                        if re.is_match(answer) {
                            let msg = check.message(message, "banned regex matched");
                            check.push(msg);
                        }
                    }
                }
                ValidatorRule::RequireMinInlineRegexCount {
                    regex,
                    min_count,
                    message,
                } => {
                    if let Some(re) = check.compile(regex, "require_min_inline_regex_count.regex") {
                        if re.find_iter(answer).count() < *min_count {
                            let msg = check.message(message, "require_min_inline_regex_count failed");
                            check.push(msg);
                        }
                    }
                }
                ValidatorRule::RequireMinInlineRegexCountIfRegex {
                    if_regex,
                    regex,
                    min_count,
                    message,
                } => {
                    let cond = check.compile(if_regex, "require_min_inline_regex_count_if_regex.if_regex");
                    let re = check.compile(regex, "require_min_inline_regex_count_if_regex.regex");
                    if let (Some(cond), Some(re)) = (cond, re) {
                        if cond.is_match(answer) && re.find_iter(answer).count() < *min_count {
                            let msg =
                                check.message(message, "require_min_inline_regex_count_if_regex failed");
                            check.push(msg);
                        }
                    }
                }
                ValidatorRule::RequireNonTestFilelineCitationsIfRegex {
                    trigger_regex,
                    clean_outcome_regex,
                    message_no_citations,
                    message_all_test,
                    test_path_patterns,
                } => {
                    let trigger = check.compile(
                        trigger_regex,
                        "require_non_test_fileline_citations_if_regex.trigger_regex",
                    );
                    let clean = clean_outcome_regex
                        .as_deref()
                        .filter(|p| !p.is_empty())
                        .and_then(|p| {
                            check.compile(
                                p,
                                "require_non_test_fileline_citations_if_regex.clean_outcome_regex",
                            )
                        });
                    let Some(trigger) = trigger else {
                        continue;
                    };
                    if !trigger.is_match(answer) {
                        continue;
                    }
                    let hits: Vec<&str> = RS_FILELINE_RE.find_iter(answer).map(|m| m.as_str()).collect();
                    if hits.is_empty() {
                        let msg = check.message(message_no_citations, "missing required non-test citations");
                        check.push(msg);
                        continue;
                    }
                    let patterns = match test_path_patterns {
                        Some(list) => compile_test_patterns(list),
                        None => compile_test_patterns(default_test_patterns),
                    };
                    let any_non_test = hits.iter().any(|hit| {
                        let path = hit.split_once(':').map_or(*hit, |(p, _)| p);
                        !is_test_path(path, &patterns)
                    });
                    let clean_outcome = clean.is_some_and(|re| re.is_match(answer));
                    if !any_non_test && !clean_outcome {
                        let msg = check.message(message_all_test, "citations are all in test paths");
                        check.push(msg);
                    }
                }
            }
        }
        if !check.issues.is_empty() {
            log::debug!("validators.issues qid={qid} count={}", check.issues.len());
        }
        check.issues
    }
}
