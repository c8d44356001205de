//! The per-question retry ladder.
//!
//! ```text
//! evidence ──> AllowedTokenSet
//!                 │
//! primary ──> [adaptive rerun]? ──> [schema retry]* ──> [strict repair]? ──> final gates
//!                                                                              │
//!                                                            [advice ──> advice retry*]?
//! ```
//!
//! Every candidate answer passes through Gate B autocomplete before its issues are
//! computed. Each rung that fires is recorded in the [`RetryLedger`].

use crate::backend::{DispatchPhase, ModelBackend, ModelRequest};
use crate::error::Result;
use crate::ledger::{RetryCounts, RetryLedger};
use crate::pack::{AdviceMode, AnswerMode, Pack, Question};
use crate::policy::RunnerPolicy;
use crate::repair::repair_strict_contract;
use crate::report::RunReport;
use crate::synth::{SynthesisInput, SynthesisSource, SynthesizerRegistry};
use grounding_evidence::QuestionEvidence;
use grounding_gates::{
    answer_verdict, autocomplete_citations, check_answer, extract_required_keys, validate_advice,
    validate_required_key_lines, AllowedTokenSet, EvidenceAudit, PathUniverse,
};
use grounding_keys::KeyRegistry;
use grounding_protocol::{RetryPhase, ValidationIssue};
use serde::Serialize;

/// Run-wide inputs shared by every question.
pub struct QuestionContext<'a> {
    pub pack: &'a Pack,
    pub policy: &'a RunnerPolicy,
    pub synthesizers: &'a SynthesizerRegistry,
    pub universe: Option<&'a PathUniverse>,
    /// Mission packs make leftover advice issues fatal
    pub mission: bool,
}

/// How the final answer was produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerSource {
    Model,
    Synthesized(SynthesisSource),
    /// Evidence was empty; NOT FOUND without a model call
    EvidenceEmpty,
}

/// One prompt sent to the backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DispatchRecord {
    pub phase: DispatchPhase,
    pub top_k: usize,
    pub prompt_chars: usize,
    pub answer: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct AdviceOutcome {
    pub text: String,
    pub issues: Vec<ValidationIssue>,
    pub top_k: usize,
}

/// Terminal state of one question.
#[derive(Debug, Clone, Serialize)]
pub struct QuestionOutcome {
    pub qid: String,
    pub answer_mode: AnswerMode,
    pub source: AnswerSource,
    pub answer: String,
    /// Final issues, in gate order, validators last
    pub issues: Vec<ValidationIssue>,
    pub retries: RetryCounts,
    pub ledger: RetryLedger,
    pub repair_notes: Vec<String>,
    pub autocompleted: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub advice: Option<AdviceOutcome>,
    pub evidence_blocks: usize,
    pub usable_blocks: usize,
    pub cache_hits: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub audit: Option<EvidenceAudit>,
    pub top_k: usize,
    pub dispatches: Vec<DispatchRecord>,
    /// Whether the final verdict equals the question's `expected_verdict`
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expected_verdict_match: Option<bool>,
    pub passed: bool,
}

impl QuestionOutcome {
    #[must_use]
    pub fn advice_issues(&self) -> &[ValidationIssue] {
        self.advice.as_ref().map_or(&[], |a| a.issues.as_slice())
    }
}

/// Drives one question from evidence to a terminal outcome.
pub struct QuestionPipeline<'a> {
    ctx: &'a QuestionContext<'a>,
    question: &'a Question,
    evidence: &'a QuestionEvidence,
    allowed: AllowedTokenSet,
    required_keys: Vec<String>,
    ledger: RetryLedger,
    autocompleted: Vec<String>,
    dispatches: Vec<DispatchRecord>,
}

impl<'a> QuestionPipeline<'a> {
    /// The allowed token set is built here, once, before any model call.
    pub fn new(ctx: &'a QuestionContext<'a>, question: &'a Question, evidence: &'a QuestionEvidence) -> Self {
        let allowed = AllowedTokenSet::from_blocks(&evidence.block_texts());
        let required_keys = question
            .strict_template()
            .map(extract_required_keys)
            .unwrap_or_default();
        Self {
            ctx,
            question,
            evidence,
            allowed,
            required_keys,
            ledger: RetryLedger::default(),
            autocompleted: Vec::new(),
            dispatches: Vec::new(),
        }
    }

    #[must_use]
    pub fn allowed(&self) -> &AllowedTokenSet {
        &self.allowed
    }

    /// Issues the ladder works from: schema, provenance, path gates, and the
    /// strict template's required key lines.
    #[must_use]
    pub fn issues(&self, answer: &str) -> Vec<ValidationIssue> {
        let mut issues = check_answer(answer, &self.allowed, &self.ctx.pack.validation);
        if !self.required_keys.is_empty() {
            issues.extend(validate_required_key_lines(answer, &self.required_keys));
        }
        issues
    }

    /// Ladder issues plus the per-question validators.
    #[must_use]
    pub fn final_issues(&self, answer: &str) -> Vec<ValidationIssue> {
        let mut issues = self.issues(answer);
        let validation = &self.ctx.pack.validation;
        if validation.apply_question_validators {
            issues.extend(self.ctx.policy.question_validators.check(
                &self.question.id,
                answer,
                &self.ctx.policy.evidence.filters.test_path_patterns,
            ));
        }
        issues
    }

    pub fn run(
        mut self,
        registry: &KeyRegistry,
        backend: &mut dyn ModelBackend,
        report: &mut RunReport,
    ) -> Result<QuestionOutcome> {
        let ctx = self.ctx;
        let question = self.question;
        let qid = question.id.clone();
        let policy = ctx.policy;
        let top_k_max = question.top_k_max(&ctx.pack.defaults);
        let mut top_k = top_k_max;
        let mut repair_notes: Vec<String> = Vec::new();

        let (raw, source) = match question.answer_mode {
            AnswerMode::Deterministic => {
                let input = SynthesisInput {
                    question,
                    evidence: self.evidence,
                    allowed: &self.allowed,
                    registry,
                };
                let (answer, from) =
                    ctx.synthesizers
                        .synthesize(&input, &ctx.pack.validation, &policy.deterministic);
                report.line(format!("- Answer mode: deterministic ({from:?}); model call skipped"));
                (answer, AnswerSource::Synthesized(from))
            }
            AnswerMode::Llm
                if !self.evidence.has_usable_evidence() && policy.evidence_presence_gate.answer_not_found =>
            {
                report.line("- Evidence gate: no usable deterministic evidence; model call skipped (NOT FOUND)");
                log::warn!("question.evidence_empty.not_found qid={qid}");
                (policy.prompts.evidence_empty_answer.clone(), AnswerSource::EvidenceEmpty)
            }
            AnswerMode::Llm => {
                let (answer, used_top_k) = self.answer_with_model(backend, report, top_k_max)?;
                top_k = used_top_k;
                (answer, AnswerSource::Model)
            }
        };
        let mut answer = self.candidate(raw);

        if question.answer_mode == AnswerMode::Llm && question.strict_template().is_some() {
            let (fixed, notes) = repair_strict_contract(
                &qid,
                &answer,
                &self.allowed,
                &ctx.pack.validation,
                &policy.deterministic,
            );
            if !notes.is_empty() {
                let before = self.issues(&answer);
                self.ledger.record(RetryPhase::DeterministicRepair, before);
                report.line(format!("- Strict contract repair applied: {}", notes.join(", ")));
                log::warn!("question.strict_contract.repaired qid={qid} notes={notes:?}");
                repair_notes.extend(notes.iter().map(|n| n.to_string()));
            }
            if fixed != answer {
                answer = self.candidate(fixed);
            }
        }

        report.section("Answer");
        report.line(answer.trim().to_string());

        let issues = self.final_issues(&answer);
        if issues.is_empty() {
            log::info!("question.validator.ok qid={qid}");
        } else {
            report.section("Validator issues");
            report.extend(issues.iter().map(|it| format!("- Response schema: {it}")));
            log::warn!(
                "question.validator.issues qid={qid} issue_count={} sample={:?}",
                issues.len(),
                issues.iter().take(3).map(ToString::to_string).collect::<Vec<_>>()
            );
        }

        let advice = if question.advice_mode == AdviceMode::Llm {
            self.advise(&answer, backend, report)?
        } else {
            None
        };

        let expected_verdict_match = question.expected_verdict.as_deref().map(|expected| {
            let actual = answer_verdict(&answer);
            let matched = actual.is_some_and(|v| v.eq_ignore_ascii_case(expected.trim()));
            if !matched {
                report.line(format!(
                    "- Expected verdict {expected}, answer gave {}",
                    actual.unwrap_or("none")
                ));
                log::info!("question.expected_verdict.mismatch qid={qid} expected={expected} actual={actual:?}");
            }
            matched
        });

        let audit = ctx.universe.map(|universe| EvidenceAudit::new(&self.allowed, universe));
        let advice_ok = advice.as_ref().map_or(true, |a| a.issues.is_empty());
        let passed = issues.is_empty() && advice_ok;
        log::info!(
            "question.done qid={qid} passed={passed} issues={} retries={}",
            issues.len(),
            self.ledger.counts().total()
        );
        Ok(QuestionOutcome {
            qid,
            answer_mode: question.answer_mode,
            source,
            answer,
            issues,
            retries: self.ledger.counts(),
            ledger: self.ledger,
            repair_notes,
            autocompleted: self.autocompleted,
            advice,
            evidence_blocks: self.evidence.blocks.len(),
            usable_blocks: self.evidence.usable_blocks,
            cache_hits: self.evidence.cache_hits(),
            audit,
            top_k,
            dispatches: self.dispatches,
            expected_verdict_match,
            passed,
        })
    }

    /// Primary call, adaptive rerun, then the schema retry loop.
    fn answer_with_model(
        &mut self,
        backend: &mut dyn ModelBackend,
        report: &mut RunReport,
        top_k_max: usize,
    ) -> Result<(String, usize)> {
        let ctx = self.ctx;
        let question = self.question;
        let qid = question.id.clone();
        let policy = ctx.policy;
        let prompts = &policy.prompts;
        let blocks = self.evidence.block_texts();
        let schema = Some(ctx.pack.response_schema.as_str());
        let quote_bypass = policy.quote_bypass.is_active(self.evidence.has_usable_evidence());
        let mut base = if quote_bypass && !blocks.is_empty() {
            prompts.quote_bypass(&blocks, &question.question, schema)
        } else {
            prompts.augmented(&blocks, &question.question, schema, quote_bypass)
        };
        let template = question.strict_template();
        if let Some(template) = template {
            base = prompts.with_strict_template(template, &base);
        }

        let mut top_k = if policy.adaptive_top_k {
            policy.chat_top_k_initial.max(1).min(top_k_max)
        } else {
            top_k_max
        };
        log::info!(
            "question.chat.prepare qid={qid} quote_bypass={quote_bypass} top_k={top_k} top_k_max={top_k_max} \
             strict_response_template={} schema_retry_attempts={}",
            template.is_some(),
            question.schema_retry_attempts()
        );
        let raw = self.dispatch(backend, DispatchPhase::Primary, base.clone(), top_k)?;
        let mut answer = self.candidate(raw);

        if policy.adaptive_top_k && top_k < top_k_max {
            let issues = self.issues(&answer);
            if !issues.is_empty() {
                report.line(format!(
                    "- Adaptive rerun: validator issues={} (top_k={top_k} → {top_k_max})",
                    issues.len()
                ));
                log::warn!(
                    "question.chat.adaptive_rerun qid={qid} issue_count={} top_k_before={top_k} top_k_after={top_k_max}",
                    issues.len()
                );
                let prompt = prompts.adaptive_rerun(
                    &base,
                    &issues,
                    ctx.pack.validation.issue_caps.adaptive_rerun_bullets,
                );
                self.ledger.record(RetryPhase::AdaptiveRerun, issues);
                top_k = top_k_max;
                let raw = self.dispatch(backend, DispatchPhase::AdaptiveRerun, prompt, top_k)?;
                answer = self.candidate(raw);
            }
        }

        let total = question.schema_retry_attempts();
        for attempt in 1..=total {
            let issues = self.issues(&answer);
            if issues.is_empty() {
                log::info!("question.chat.schema_retry.satisfied qid={qid} attempt={}", attempt - 1);
                break;
            }
            report.line(format!(
                "- Schema retry {attempt}/{total}: validator issues={}",
                issues.len()
            ));
            log::warn!(
                "question.schema_retry qid={qid} attempt={attempt}/{total} issue_count={}",
                issues.len()
            );
            let prompt = prompts.schema_retry(&base, template, &issues, attempt, total);
            self.ledger.record(RetryPhase::SchemaRetry, issues);
            let raw = self.dispatch(backend, DispatchPhase::SchemaRetry, prompt, top_k)?;
            answer = self.candidate(raw);
        }

        report.line(format!("- Chat: {} dispatch(es) (top_k={top_k})", self.dispatches.len()));
        Ok((answer, top_k))
    }

    /// Advice call and bounded advice retries. Skipped when evidence is empty.
    fn advise(
        &mut self,
        answer: &str,
        backend: &mut dyn ModelBackend,
        report: &mut RunReport,
    ) -> Result<Option<AdviceOutcome>> {
        let ctx = self.ctx;
        let question = self.question;
        let qid = question.id.clone();
        let blocks = self.evidence.block_texts();
        if blocks.is_empty() {
            report.line("- Advice: skipped (no evidence blocks available)");
            return Ok(None);
        }
        let policy = ctx.policy;
        let gate = &policy.advice_quality_gate;
        let caps = &ctx.pack.validation.issue_caps;
        let top_k = question.advice_top_k(&ctx.pack.defaults, caps.advice_top_k_cap);
        let base = question
            .advice_prompt
            .clone()
            .unwrap_or_else(|| policy.prompts.advice(&qid, &question.question, answer, &blocks));
        log::info!("question.advice.prepare qid={qid} advice_top_k={top_k}");

        let mut text = self.dispatch(backend, DispatchPhase::Advice, base.clone(), top_k)?;
        let mut issues = validate_advice(&text, &self.allowed, gate, caps);
        let total = if ctx.mission && gate.retry_on_validation_fail {
            gate.retry_attempts
        } else {
            0
        };
        for attempt in 1..=total {
            if issues.is_empty() {
                log::info!("question.advice.retry.satisfied qid={qid} attempt={}", attempt - 1);
                break;
            }
            report.line(format!(
                "- Advice retry {attempt}/{total}: validator issues={}",
                issues.len()
            ));
            log::warn!(
                "question.advice.retry qid={qid} attempt={attempt}/{total} issue_count={}",
                issues.len()
            );
            let prompt = policy
                .prompts
                .advice_retry(&base, &issues, gate.retry_issue_bullets, attempt, total);
            self.ledger.record(RetryPhase::AdviceRetry, issues);
            text = self.dispatch(backend, DispatchPhase::AdviceRetry, prompt, top_k)?;
            issues = validate_advice(&text, &self.allowed, gate, caps);
        }

        if !text.trim().is_empty() {
            report.section("Improvement Suggestions (LLM)");
            report.line(text.trim().to_string());
        }
        if !issues.is_empty() {
            report.section("Advice validator issues");
            report.extend(issues.iter().map(|it| format!("- Advice quality: {it}")));
            log::warn!(
                "question.advice.validator.issues qid={qid} issue_count={} mission={}",
                issues.len(),
                ctx.mission
            );
        }
        Ok(Some(AdviceOutcome { text, issues, top_k }))
    }

    fn dispatch(
        &mut self,
        backend: &mut dyn ModelBackend,
        phase: DispatchPhase,
        prompt: String,
        top_k: usize,
    ) -> Result<String> {
        let request = ModelRequest {
            qid: self.question.id.clone(),
            phase,
            prompt,
            top_k,
        };
        log::info!(
            "question.chat.dispatch qid={} phase={phase} top_k={top_k} prompt_chars={}",
            request.qid,
            request.prompt.chars().count()
        );
        let answer = backend.complete(&request)?;
        self.dispatches.push(DispatchRecord {
            phase,
            top_k,
            prompt_chars: request.prompt.chars().count(),
            answer: answer.clone(),
        });
        Ok(answer)
    }

    /// Gate B autocomplete, applied to every candidate answer.
    fn candidate(&mut self, raw: String) -> String {
        let (answer, added) = autocomplete_citations(&raw, &self.allowed, &self.ctx.pack.validation);
        if !added.is_empty() {
            log::info!(
                "question.path_gate.autocomplete qid={} added={added:?}",
                self.question.id
            );
            for token in added {
                if !self.autocompleted.contains(&token) {
                    self.autocompleted.push(token);
                }
            }
        }
        answer
    }
}
