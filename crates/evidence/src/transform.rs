//! Declarative per-step row filters.
//!
//! ```text
//! rows ─> include_path_regex ─> exclude_path_regex ─> exclude_test_files
//!      ─> exclude_comments ─> require_contains ─> require_regex
//!      ─> group_by_path_top_n ─> filter_fn ─> filtered rows
//! ```
//!
//! The order is fixed. A transform only ever drops rows; it never edits them.

use crate::error::{EvidenceError, Result};
use crate::render::RenderMode;
use grounding_keys::{value_as_i64, KeyRegistry, Row};
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;

/// Filter keys in application order.
pub const TRANSFORM_FILTER_KEYS: [&str; 8] = [
    "include_path_regex",
    "exclude_path_regex",
    "exclude_test_files",
    "exclude_comments",
    "require_contains",
    "require_regex",
    "group_by_path_top_n",
    "filter_fn",
];

pub const DEFAULT_EXCLUDE_PATH_REGEX: &[&str] =
    &[r"(^|/)audit_runs(/|$)", r"(^|/)xref_state(/|$)"];

pub const DEFAULT_TEST_PATH_PATTERNS: &[&str] = &[
    r"(^|/)(tests)(/|$)",
    r"(^|/)(testdata|fixtures)(/|$)",
    r"(^|/)[^/]*_tests?\.rs$",
    r"(^|/)test_[^/]+\.rs$",
];

const SUMMARY_PATTERN_SAMPLE: usize = 8;

/// Filtered rows of earlier steps in the same question, by step name.
pub type RowsByStep = HashMap<String, Vec<Row>>;

/// A regex field that accepts either one pattern or a list of them.
///
/// Blank entries are dropped.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "OneOrMany", into = "Vec<String>")]
pub struct PatternList(Vec<String>);

#[derive(Deserialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
}

impl From<OneOrMany> for PatternList {
    fn from(raw: OneOrMany) -> Self {
        let items = match raw {
            OneOrMany::One(one) => vec![one],
            OneOrMany::Many(many) => many,
        };
        Self(
            items
                .into_iter()
                .map(|p| p.trim().to_string())
                .filter(|p| !p.is_empty())
                .collect(),
        )
    }
}

impl From<Vec<String>> for PatternList {
    fn from(items: Vec<String>) -> Self {
        Self::from(OneOrMany::Many(items))
    }
}

impl From<PatternList> for Vec<String> {
    fn from(list: PatternList) -> Self {
        list.0
    }
}

impl PatternList {
    #[must_use]
    pub fn as_slice(&self) -> &[String] {
        &self.0
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }
}

/// Keep rows whose paths rank in the top N of another step's rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupByPathTopN {
    #[serde(default)]
    pub from: String,
    #[serde(default = "default_group_limit")]
    pub top_n: usize,
    #[serde(default = "default_group_limit")]
    pub per_path: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sort_key: Option<String>,
}

fn default_group_limit() -> usize {
    5
}

/// Named row predicates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilterFn {
    /// Keep rows that carry a real doc comment
    CompactDocs,
}

impl FilterFn {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::CompactDocs => "compact_docs",
        }
    }
}

/// A step's `transform` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TransformSpec {
    pub include_path_regex: PatternList,

    /// `None` means "not set", which applies the run defaults. An explicit empty
    /// list disables them.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exclude_path_regex: Option<PatternList>,

    pub exclude_test_files: bool,
    pub test_path_patterns: Vec<String>,
    pub exclude_comments: bool,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub require_contains: Option<String>,

    pub require_regex: PatternList,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub group_by_path_top_n: Option<GroupByPathTopN>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub filter_fn: Option<FilterFn>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_items: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_chars: Option<usize>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub render: Option<RenderMode>,
}

impl TransformSpec {
    fn require_contains(&self) -> Option<&str> {
        self.require_contains
            .as_deref()
            .filter(|needle| !needle.trim().is_empty())
    }

    /// Filter keys that are set, in application order.
    #[must_use]
    pub fn filters_used(&self) -> Vec<&'static str> {
        let set = [
            !self.include_path_regex.is_empty(),
            self.exclude_path_regex.as_ref().is_some_and(|p| !p.is_empty()),
            self.exclude_test_files,
            self.exclude_comments,
            self.require_contains().is_some(),
            !self.require_regex.is_empty(),
            self.group_by_path_top_n.is_some(),
            self.filter_fn.is_some(),
        ];
        TRANSFORM_FILTER_KEYS
            .iter()
            .zip(set)
            .filter_map(|(key, on)| on.then_some(*key))
            .collect()
    }
}

/// Run-wide pattern defaults injected into every step's transform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterDefaults {
    pub exclude_path_regex: Vec<String>,
    pub test_path_patterns: Vec<String>,
}

impl Default for FilterDefaults {
    fn default() -> Self {
        Self {
            exclude_path_regex: DEFAULT_EXCLUDE_PATH_REGEX.iter().map(|s| s.to_string()).collect(),
            test_path_patterns: DEFAULT_TEST_PATH_PATTERNS.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternSource {
    Explicit,
    Default,
    Fallback,
    Disabled,
    None,
}

/// Compact description of a transform for logs and reports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TransformSummary {
    pub filters_used: Vec<&'static str>,
    pub include_pattern_count: usize,
    pub include_patterns: Vec<String>,
    pub exclude_pattern_count: usize,
    pub exclude_patterns: Vec<String>,
    pub exclude_pattern_source: PatternSource,
    pub exclude_test_files: bool,
    pub test_pattern_count: usize,
    pub test_pattern_source: PatternSource,
    pub exclude_comments: bool,
    pub require_contains: Option<String>,
    pub require_regex_count: usize,
    pub require_regex_patterns: Vec<String>,
    pub group_by_path_top_n: Option<GroupByPathTopN>,
    pub filter_fn: Option<&'static str>,
}

impl TransformSummary {
    /// `key=value` pairs for log lines.
    #[must_use]
    pub fn log_fields(&self) -> String {
        format!(
            "filters_used={:?} include_pattern_count={} exclude_pattern_count={} exclude_pattern_source={:?} test_pattern_source={:?}",
            self.filters_used,
            self.include_pattern_count,
            self.exclude_pattern_count,
            self.exclude_pattern_source,
            self.test_pattern_source,
        )
    }
}

/// A transform with every regex compiled, ready to apply.
#[derive(Debug, Clone)]
pub struct CompiledTransform {
    spec: TransformSpec,
    include: Vec<Regex>,
    exclude: Vec<Regex>,
    exclude_patterns: Vec<String>,
    exclude_source: PatternSource,
    tests: Vec<Regex>,
    test_patterns: Vec<String>,
    test_source: PatternSource,
    require: Vec<Regex>,
}

impl CompiledTransform {
    /// Compile `spec` against the run defaults. Any invalid regex is fatal.
    pub fn compile(spec: &TransformSpec, defaults: &FilterDefaults) -> Result<Self> {
        let include = compile_all(spec.include_path_regex.as_slice(), "include_path_regex")?;

        let (exclude_patterns, exclude_source) = match &spec.exclude_path_regex {
            Some(explicit) => (explicit.as_slice().to_vec(), PatternSource::Explicit),
            None if !defaults.exclude_path_regex.is_empty() => {
                (defaults.exclude_path_regex.clone(), PatternSource::Default)
            }
            None => (Vec::new(), PatternSource::None),
        };
        let exclude = compile_all(&exclude_patterns, "exclude_path_regex")?;

        let non_blank = |patterns: &[String]| -> Vec<String> {
            patterns
                .iter()
                .filter(|p| !p.trim().is_empty())
                .cloned()
                .collect()
        };
        let (test_patterns, test_source) = if !spec.exclude_test_files {
            (Vec::new(), PatternSource::Disabled)
        } else if !non_blank(&spec.test_path_patterns).is_empty() {
            (non_blank(&spec.test_path_patterns), PatternSource::Explicit)
        } else if !non_blank(&defaults.test_path_patterns).is_empty() {
            (non_blank(&defaults.test_path_patterns), PatternSource::Default)
        } else {
            (
                DEFAULT_TEST_PATH_PATTERNS.iter().map(|s| s.to_string()).collect(),
                PatternSource::Fallback,
            )
        };
        let tests = compile_all(&test_patterns, "test_path_patterns")?;

        let require = compile_all(spec.require_regex.as_slice(), "require_regex")?;

        Ok(Self {
            spec: spec.clone(),
            include,
            exclude,
            exclude_patterns,
            exclude_source,
            tests,
            test_patterns,
            test_source,
            require,
        })
    }

    #[must_use]
    pub fn spec(&self) -> &TransformSpec {
        &self.spec
    }

    /// Apply every filter in order. `prior` holds the filtered rows of earlier steps.
    #[must_use]
    pub fn apply(&self, registry: &KeyRegistry, rows: Vec<Row>, prior: &RowsByStep) -> Vec<Row> {
        let path_of = |row: &Row| registry.row_path(row).unwrap_or_default();
        let text_of = |row: &Row| registry.row_snippet(row).unwrap_or("").to_string();
        let mut rows = rows;

        if !self.include.is_empty() {
            rows.retain(|row| match registry.row_path(row) {
                Some(path) => self.include.iter().any(|re| re.is_match(&path)),
                None => false,
            });
        }
        if !self.exclude.is_empty() {
            rows.retain(|row| {
                let path = path_of(row);
                !self.exclude.iter().any(|re| re.is_match(&path))
            });
        }
        if !self.tests.is_empty() {
            rows.retain(|row| !is_test_path(&path_of(row), &self.tests));
        }
        if self.spec.exclude_comments {
            rows.retain(|row| !is_comment_line(&text_of(row)));
        }
        if let Some(needle) = self.spec.require_contains() {
            rows.retain(|row| text_of(row).contains(needle));
        }
        if !self.require.is_empty() {
            rows.retain(|row| {
                let haystack = format!("{}\n{}", path_of(row), text_of(row));
                self.require.iter().any(|re| re.is_match(&haystack))
            });
        }
        if let Some(group) = &self.spec.group_by_path_top_n {
            rows = apply_group_by(registry, rows, group, prior);
        }
        if self.spec.filter_fn == Some(FilterFn::CompactDocs) {
            rows.retain(has_real_doc);
        }
        rows
    }

    #[must_use]
    pub fn summary(&self) -> TransformSummary {
        let spec = &self.spec;
        let include = spec.include_path_regex.as_slice();
        let require = spec.require_regex.as_slice();
        let sample = |items: &[String]| -> Vec<String> {
            items.iter().take(SUMMARY_PATTERN_SAMPLE).cloned().collect()
        };
        TransformSummary {
            filters_used: spec.filters_used(),
            include_pattern_count: include.len(),
            include_patterns: sample(include),
            exclude_pattern_count: self.exclude_patterns.len(),
            exclude_patterns: sample(&self.exclude_patterns),
            exclude_pattern_source: self.exclude_source,
            exclude_test_files: spec.exclude_test_files,
            test_pattern_count: self.test_patterns.len(),
            test_pattern_source: self.test_source,
            exclude_comments: spec.exclude_comments,
            require_contains: spec.require_contains().map(str::to_string),
            require_regex_count: require.len(),
            require_regex_patterns: sample(require),
            group_by_path_top_n: spec.group_by_path_top_n.clone(),
            filter_fn: spec.filter_fn.map(FilterFn::as_str),
        }
    }
}

fn compile_all(patterns: &[String], context: &str) -> Result<Vec<Regex>> {
    patterns
        .iter()
        .map(|pattern| {
            Regex::new(pattern).map_err(|err| {
                log::error!(
                    "preflight.transform.invalid_regex context={context} pattern={pattern:?} error={err}"
                );
                EvidenceError::invalid_regex(context, pattern.as_str(), err)
            })
        })
        .collect()
}

fn apply_group_by(
    registry: &KeyRegistry,
    rows: Vec<Row>,
    group: &GroupByPathTopN,
    prior: &RowsByStep,
) -> Vec<Row> {
    let Some(reference) = prior.get(&group.from) else {
        if !group.from.is_empty() {
            log::warn!(
                "preflight.transform.group_by_path_top_n.missing_from from_name={}",
                group.from
            );
        }
        return rows;
    };
    if reference.is_empty() {
        return rows;
    }
    let allowed = top_paths(registry, reference, group.top_n, group.sort_key.as_deref());
    let mut per_path: HashMap<String, usize> = HashMap::new();
    rows.into_iter()
        .filter(|row| {
            let path = registry.row_path(row).unwrap_or_default();
            if !allowed.contains(&path) {
                return false;
            }
            let seen = per_path.entry(path).or_insert(0);
            if *seen >= group.per_path {
                return false;
            }
            *seen += 1;
            true
        })
        .collect()
}

/// The `top_n` paths with the highest score, ties kept in row order.
#[must_use]
pub fn top_paths(
    registry: &KeyRegistry,
    rows: &[Row],
    top_n: usize,
    sort_key: Option<&str>,
) -> Vec<String> {
    let mut scored: Vec<(String, i64)> = rows
        .iter()
        .filter_map(|row| {
            let path = registry.row_path(row)?;
            let score = match sort_key {
                Some(key) => row.get(key).and_then(value_as_i64).unwrap_or(0),
                None => registry.row_count(row),
            };
            Some((path, score))
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().take(top_n).map(|(path, _)| path).collect()
}

/// Problems with `group_by_path_top_n.from` references in one question's steps.
///
/// Each reference must name a step that appears earlier in `steps`.
#[must_use]
pub fn validate_group_by_dependencies<'a>(
    steps: impl IntoIterator<Item = (&'a str, Option<&'a TransformSpec>)>,
) -> Vec<String> {
    let mut seen: Vec<&str> = Vec::new();
    let mut issues = Vec::new();
    for (idx, (name, transform)) in steps.into_iter().enumerate() {
        let name = name.trim();
        if let Some(group) = transform.and_then(|t| t.group_by_path_top_n.as_ref()) {
            let label = if name.is_empty() { "(unnamed)" } else { name };
            let from = group.from.trim();
            if from.is_empty() {
                issues.push(format!(
                    "step[{}] '{label}': group_by_path_top_n.from is required",
                    idx + 1
                ));
            } else if !seen.contains(&from) {
                issues.push(format!(
                    "step[{}] '{label}': group_by_path_top_n.from='{from}' references a missing or later step",
                    idx + 1
                ));
            }
        }
        if !name.is_empty() {
            seen.push(name);
        }
    }
    issues
}

/// Whether `path` matches any test-path pattern.
#[must_use]
pub fn is_test_path(path: &str, patterns: &[Regex]) -> bool {
    let normalized = path.replace('\\', "/");
    patterns.iter().any(|re| re.is_match(&normalized))
}

#[must_use]
pub fn is_comment_line(text: &str) -> bool {
    let stripped = text.trim();
    stripped.starts_with("//") || stripped.starts_with("/*") || stripped.starts_with("* ")
}

/// A row documents something: a structured `doc` with text, a doc string, or `has_doc`.
#[must_use]
pub fn has_real_doc(row: &Row) -> bool {
    match row.get("doc") {
        Some(Value::Object(doc)) => {
            if !doc.get("has_doc").is_some_and(is_truthy) {
                return false;
            }
            ["text", "content"]
                .iter()
                .filter_map(|key| doc.get(*key))
                .find(|value| is_truthy(value))
                .is_some_and(|value| !grounding_keys::scalar_text(value).trim().is_empty())
        }
        Some(Value::String(doc)) => !doc.trim().is_empty(),
        _ => row.get("has_doc").is_some_and(is_truthy),
    }
}

/// Loose truthiness used by payload flags: `false`, `0`, `""`, `[]`, `{}` and null are false.
#[must_use]
pub fn is_truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(obj) => !obj.is_empty(),
    }
}
