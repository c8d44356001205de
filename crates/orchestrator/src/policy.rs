//! Run-wide policy, loaded from TOML with every field defaulted.

use crate::error::{OrchestratorError, Result};
use crate::prompts::PromptTexts;
use crate::repair::RepairPolicy;
use grounding_evidence::EvidencePolicy;
use grounding_gates::{AdvicePolicy, QuestionValidators};
use grounding_keys::DiscoveryPolicy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// When evidence-first prompting replaces the quoting procedure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuoteBypassMode {
    /// On whenever the question has usable evidence
    #[default]
    Auto,
    On,
    Off,
}

impl QuoteBypassMode {
    #[must_use]
    pub fn is_active(self, has_usable_evidence: bool) -> bool {
        match self {
            Self::Auto => has_usable_evidence,
            Self::On => true,
            Self::Off => false,
        }
    }
}

impl std::str::FromStr for QuoteBypassMode {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "auto" => Ok(Self::Auto),
            "on" => Ok(Self::On),
            "off" => Ok(Self::Off),
            other => Err(format!("unknown quote-bypass mode '{other}' (expected auto|on|off)")),
        }
    }
}

/// What happens when a question has no usable evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidencePresenceGate {
    /// Abort the run instead of answering without evidence
    pub fail_on_empty_evidence: bool,
    /// Abort at the first starving question rather than at the end
    pub fail_fast: bool,
    /// Without the strict gate, answer NOT FOUND and skip the model
    pub answer_not_found: bool,
}

impl Default for EvidencePresenceGate {
    fn default() -> Self {
        Self {
            fail_on_empty_evidence: true,
            fail_fast: true,
            answer_not_found: true,
        }
    }
}

/// Everything the runner needs beyond the pack.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunnerPolicy {
    pub evidence: EvidencePolicy,
    pub discovery: DiscoveryPolicy,
    pub evidence_presence_gate: EvidencePresenceGate,
    pub quote_bypass: QuoteBypassMode,

    /// Start at `chat_top_k_initial` and rerun once at the question maximum
    pub adaptive_top_k: bool,
    pub chat_top_k_initial: usize,

    pub advice_quality_gate: AdvicePolicy,
    pub deterministic: RepairPolicy,
    pub prompts: PromptTexts,

    /// Missing evidence paths in the corpus universe fail the run
    pub fail_on_missing_evidence_paths: bool,

    /// Per-question validator rules, relative to the policy file
    pub question_validators_path: Option<PathBuf>,
    #[serde(skip)]
    pub question_validators: QuestionValidators,
}

impl Default for RunnerPolicy {
    fn default() -> Self {
        Self {
            evidence: EvidencePolicy::default(),
            discovery: DiscoveryPolicy::default(),
            evidence_presence_gate: EvidencePresenceGate::default(),
            quote_bypass: QuoteBypassMode::Auto,
            adaptive_top_k: false,
            chat_top_k_initial: 8,
            advice_quality_gate: AdvicePolicy::default(),
            deterministic: RepairPolicy::default(),
            prompts: PromptTexts::default(),
            fail_on_missing_evidence_paths: true,
            question_validators_path: None,
            question_validators: QuestionValidators::default(),
        }
    }
}

impl RunnerPolicy {
    /// Load and validate a policy file, then its question validators if named.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| OrchestratorError::io(path, e))?;
        let mut policy = Self::from_toml_str(&text)?;
        if let Some(rel) = policy.question_validators_path.clone() {
            let resolved = match path.parent() {
                Some(dir) if rel.is_relative() => dir.join(&rel),
                _ => rel,
            };
            policy.question_validators = QuestionValidators::load(&resolved)?;
            log::info!(
                "policy.question_validators.loaded path={} questions={}",
                resolved.display(),
                policy.question_validators.validators.len()
            );
        }
        Ok(policy)
    }

    pub fn from_toml_str(text: &str) -> Result<Self> {
        let policy: Self = toml::from_str(text).map_err(|e| OrchestratorError::invalid_policy(e.to_string()))?;
        policy.validate()?;
        Ok(policy)
    }

    /// Reject zero budgets and patterns that do not compile.
    pub fn validate(&self) -> Result<()> {
        let mut problems = Vec::new();
        if self.evidence.preflight_max_chars == 0 {
            problems.push("evidence.preflight_max_chars must be > 0".to_string());
        }
        if self.chat_top_k_initial == 0 {
            problems.push("chat_top_k_initial must be > 0".to_string());
        }
        if self.discovery.max_keys_per_role == 0 {
            problems.push("discovery.max_keys_per_role must be > 0".to_string());
        }
        if self.prompts.max_issue_bullets == 0 {
            problems.push("prompts.max_issue_bullets must be > 0".to_string());
        }
        if self.deterministic.default_verdict.trim().is_empty() {
            problems.push("deterministic.default_verdict must not be empty".to_string());
        }
        let patterns = self
            .evidence
            .filters
            .exclude_path_regex
            .iter()
            .map(|p| ("evidence.filters.exclude_path_regex", p))
            .chain(
                self.evidence
                    .filters
                    .test_path_patterns
                    .iter()
                    .map(|p| ("evidence.filters.test_path_patterns", p)),
            )
            .chain(std::iter::once((
                "advice_quality_gate.mission_pack_type_regex",
                &self.advice_quality_gate.mission_pack_type_regex,
            )));
        for (field, pattern) in patterns {
            if let Err(err) = Regex::new(pattern) {
                problems.push(format!("{field}: invalid regex {pattern:?} ({err})"));
            }
        }
        if problems.is_empty() {
            Ok(())
        } else {
            Err(OrchestratorError::invalid_policy(problems.join("; ")))
        }
    }
}
