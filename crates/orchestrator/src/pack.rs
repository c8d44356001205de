//! Question packs: the TOML file that lists questions and their preflight steps.

use crate::error::{OrchestratorError, Result};
use grounding_evidence::{validate_group_by_dependencies, EvidenceError, PreflightStep};
use grounding_gates::ValidationPolicy;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::path::Path;

pub const REQUIRED_PACK_KEYS: &[&str] = &[
    "version",
    "pack_type",
    "engine",
    "response_schema",
    "defaults",
    "questions",
];
const REQUIRED_QUESTION_FIELDS: &[&str] = &["id", "title", "category", "question"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerMode {
    /// The model answers and the ladder validates
    #[default]
    Llm,
    /// A synthesizer answers from evidence; no model call
    Deterministic,
}

impl AnswerMode {
    pub const ALL: [&'static str; 2] = ["deterministic", "llm"];
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AdviceMode {
    #[default]
    None,
    Llm,
}

impl AdviceMode {
    pub const ALL: [&'static str; 2] = ["llm", "none"];
}

/// Pack-wide model defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PackDefaults {
    pub chat_top_k: usize,
    pub max_tokens: usize,
    pub temperature: f64,
}

impl Default for PackDefaults {
    fn default() -> Self {
        Self {
            chat_top_k: 12,
            max_tokens: 1024,
            temperature: 0.0,
        }
    }
}

/// A question's `[questions.chat]` table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    pub strict_response_template: String,
    pub schema_retry_attempts: usize,
    /// Accepted for older packs. Any `schema_retry_attempts > 0` already turns
    /// retries on, and without attempts there is nothing to retry.
    pub retry_on_schema_fail: bool,
    pub top_k: Option<usize>,
    pub advice_top_k: Option<usize>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Question {
    pub id: String,
    pub title: String,
    pub category: String,
    pub question: String,
    #[serde(default)]
    pub top_k: Option<usize>,
    #[serde(default)]
    pub preflight: Vec<PreflightStep>,
    #[serde(default)]
    pub chat: ChatConfig,
    /// Verdict a reviewer expects; agreement is recorded, never gated on.
    #[serde(default)]
    pub expected_verdict: Option<String>,
    #[serde(default)]
    pub answer_mode: AnswerMode,
    #[serde(default)]
    pub advice_mode: AdviceMode,
    #[serde(default)]
    pub advice_prompt: Option<String>,
}

impl Question {
    /// Widest retrieval breadth the question allows.
    #[must_use]
    pub fn top_k_max(&self, defaults: &PackDefaults) -> usize {
        self.top_k
            .or(self.chat.top_k)
            .unwrap_or(defaults.chat_top_k)
            .max(1)
    }

    #[must_use]
    pub fn advice_top_k(&self, defaults: &PackDefaults, cap: usize) -> usize {
        self.chat
            .advice_top_k
            .unwrap_or_else(|| cap.min(self.top_k_max(defaults)))
            .max(1)
    }

    #[must_use]
    pub fn strict_template(&self) -> Option<&str> {
        let template = self.chat.strict_response_template.trim();
        (!template.is_empty()).then_some(template)
    }

    /// Schema retries this question may spend.
    #[must_use]
    pub fn schema_retry_attempts(&self) -> usize {
        self.chat.schema_retry_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Pack {
    pub version: u32,
    pub pack_type: String,
    pub engine: String,
    pub response_schema: String,
    pub defaults: PackDefaults,
    #[serde(default)]
    pub validation: ValidationPolicy,
    pub questions: Vec<Question>,
}

impl Pack {
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| OrchestratorError::io(path, e))?;
        Self::from_toml_str(&text)
    }

    /// Parse and validate a pack. Every problem found is fatal.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let value: toml::Value = toml::from_str(text).map_err(|e| OrchestratorError::invalid_pack(e.to_string()))?;
        let table = value
            .as_table()
            .ok_or_else(|| OrchestratorError::invalid_pack("pack must be a table"))?;

        let missing: Vec<&str> = REQUIRED_PACK_KEYS
            .iter()
            .copied()
            .filter(|key| !table.contains_key(*key))
            .collect();
        if !missing.is_empty() {
            return Err(OrchestratorError::invalid_pack(format!(
                "Pack missing required keys: {missing:?}"
            )));
        }
        let issues = raw_question_issues(table);
        if !issues.is_empty() {
            return Err(OrchestratorError::invalid_pack(issues.join("; ")));
        }

        let pack: Pack = value
            .try_into()
            .map_err(|e: toml::de::Error| OrchestratorError::invalid_pack(e.to_string()))?;
        pack.validate()?;
        Ok(pack)
    }

    /// Checks that need the typed pack: unique ids and step dependencies.
    pub fn validate(&self) -> Result<()> {
        if self.questions.is_empty() {
            return Err(OrchestratorError::invalid_pack("Pack has no questions"));
        }
        let mut seen = HashSet::new();
        for question in &self.questions {
            if !seen.insert(question.id.as_str()) {
                return Err(OrchestratorError::invalid_pack(format!(
                    "Duplicate question id: {}",
                    question.id
                )));
            }
        }

        let mut dependency_issues = Vec::new();
        for question in &self.questions {
            let issues = validate_group_by_dependencies(
                question
                    .preflight
                    .iter()
                    .map(|s| (s.name.as_str(), s.transform.as_ref())),
            );
            dependency_issues.extend(issues.into_iter().map(|it| format!("{}: {it}", question.id)));
        }
        if !dependency_issues.is_empty() {
            log::error!(
                "pack.preflight.transform_dependency.invalid issue_count={} sample={:?}",
                dependency_issues.len(),
                dependency_issues.iter().take(3).collect::<Vec<_>>()
            );
            return Err(EvidenceError::GroupByDependency(dependency_issues).into());
        }
        Ok(())
    }
}

/// Field and enum checks on the untyped questions, so messages name the question.
fn raw_question_issues(table: &toml::Table) -> Vec<String> {
    let Some(questions) = table.get("questions").and_then(toml::Value::as_array) else {
        return vec!["questions must be an array of tables".to_string()];
    };
    let mut issues = Vec::new();
    for (idx, question) in questions.iter().enumerate() {
        let Some(q) = question.as_table() else {
            issues.push(format!("questions[{idx}] must be a table"));
            continue;
        };
        let id = q
            .get("id")
            .and_then(toml::Value::as_str)
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map_or_else(|| format!("questions[{idx}]"), str::to_string);
        for field in REQUIRED_QUESTION_FIELDS {
            let present = q
                .get(*field)
                .and_then(toml::Value::as_str)
                .is_some_and(|s| !s.trim().is_empty());
            if !present {
                issues.push(format!("Question {id} has empty or missing `{field}`"));
            }
        }
        check_mode(q, "answer_mode", &AnswerMode::ALL, &id, &mut issues);
        check_mode(q, "advice_mode", &AdviceMode::ALL, &id, &mut issues);
    }
    issues
}

fn check_mode(q: &toml::Table, key: &str, allowed: &[&str], id: &str, issues: &mut Vec<String>) {
    let Some(raw) = q.get(key) else {
        return;
    };
    match raw.as_str() {
        Some(mode) if allowed.contains(&mode) => {}
        Some(mode) => issues.push(format!(
            "Invalid question.{key} for {id}: '{mode}' (expected one of {allowed:?})"
        )),
        None => issues.push(format!(
            "Invalid question.{key} for {id}: {raw} (expected one of {allowed:?})"
        )),
    }
}
