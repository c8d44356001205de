//! Whole-pack runs: evidence assembly, run-level gates, the ladder per question,
//! and the report.

use crate::backend::ModelBackend;
use crate::error::{OrchestratorError, Result, EMPTY_EVIDENCE_MESSAGE};
use crate::ledger::RetryCounts;
use crate::manifest::RunManifest;
use crate::pack::{AdviceMode, Pack, Question};
use crate::pipeline::{DispatchRecord, QuestionContext, QuestionOutcome, QuestionPipeline};
use crate::policy::RunnerPolicy;
use crate::report::{write_text, RunReport, RunSummary, KEY_MAP_FILE};
use crate::synth::SynthesizerRegistry;
use grounding_evidence::{EvidenceAssembler, PreflightRunner, QuestionEvidence};
use grounding_gates::PathUniverse;
use grounding_keys::KeyRegistry;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// One run over a question pack.
///
/// The [`KeyRegistry`] is injected by the caller and keeps learning across
/// questions; nothing else is shared between them.
pub struct Runner {
    pack: Pack,
    policy: RunnerPolicy,
    registry: KeyRegistry,
    assembler: EvidenceAssembler,
    synthesizers: SynthesizerRegistry,
    universe: Option<PathUniverse>,
    out_dir: PathBuf,
    report: RunReport,
    manifest_inputs: Vec<(String, PathBuf)>,
    mission: bool,
}

/// `{qid}_chat.json`: every prompt dispatch of a question and its final answer.
#[derive(Serialize)]
struct ChatArtifact<'a> {
    qid: &'a str,
    top_k: usize,
    dispatches: &'a [DispatchRecord],
    answer: &'a str,
}

/// Run-level failures collected while questions keep going.
#[derive(Default)]
struct Fatal {
    contract: Vec<String>,
    advice: Vec<String>,
}

impl Runner {
    pub fn new(pack: Pack, policy: RunnerPolicy, registry: KeyRegistry, out_dir: impl Into<PathBuf>) -> Result<Self> {
        policy.validate()?;
        let out_dir = out_dir.into();
        let mission = policy.advice_quality_gate.is_mission_pack_type(&pack.pack_type);
        if mission && policy.advice_quality_gate.require_llm_advice_mode {
            let offenders: Vec<&str> = pack
                .questions
                .iter()
                .filter(|q| q.advice_mode != AdviceMode::Llm)
                .map(|q| q.id.as_str())
                .collect();
            if !offenders.is_empty() {
                return Err(OrchestratorError::invalid_pack(format!(
                    "Mission pack '{}' requires advice_mode=llm for every question; offending: {offenders:?}",
                    pack.pack_type
                )));
            }
        }
        let assembler = EvidenceAssembler::new(policy.evidence.clone(), out_dir.clone(), Vec::new());
        Ok(Self {
            report: RunReport::new(out_dir.clone()),
            pack,
            policy,
            registry,
            assembler,
            synthesizers: SynthesizerRegistry::new(),
            universe: None,
            out_dir,
            manifest_inputs: Vec::new(),
            mission,
        })
    }

    /// Files whose mtime and size invalidate cached preflight artifacts.
    #[must_use]
    pub fn with_signature_inputs(mut self, inputs: Vec<PathBuf>) -> Self {
        self.assembler = EvidenceAssembler::new(self.policy.evidence.clone(), self.out_dir.clone(), inputs);
        self
    }

    /// Labeled files hashed into `RUN_MANIFEST.json`, e.g. the pack and policy.
    #[must_use]
    pub fn with_manifest_inputs(mut self, inputs: Vec<(String, PathBuf)>) -> Self {
        self.manifest_inputs = inputs;
        self
    }

    #[must_use]
    pub fn with_synthesizers(mut self, synthesizers: SynthesizerRegistry) -> Self {
        self.synthesizers = synthesizers;
        self
    }

    /// Audit evidence paths against the corpus path universe.
    #[must_use]
    pub fn with_path_universe(mut self, universe: PathUniverse) -> Self {
        self.universe = Some(universe);
        self
    }

    #[must_use]
    pub fn registry(&self) -> &KeyRegistry {
        &self.registry
    }

    #[must_use]
    pub fn out_dir(&self) -> &Path {
        &self.out_dir
    }

    #[must_use]
    pub fn is_mission(&self) -> bool {
        self.mission
    }

    /// Run every question. Gate aborts flush the partial report first.
    ///
    /// Returns the summary when the run is clean. Contract or advice issues that
    /// survive the ladder fail the run after everything has been written.
    pub fn run(
        &mut self,
        backend: &mut dyn ModelBackend,
        preflight: &mut dyn PreflightRunner,
    ) -> Result<RunSummary> {
        std::fs::create_dir_all(&self.out_dir).map_err(|e| OrchestratorError::io(&self.out_dir, e))?;
        self.report_header();
        log::info!(
            "run.start pack_type={} engine={} questions={} mission={} out_dir={}",
            self.pack.pack_type,
            self.pack.engine,
            self.pack.questions.len(),
            self.mission,
            self.out_dir.display()
        );

        let mut fatal = Fatal::default();
        let mut outcomes: Vec<QuestionOutcome> = Vec::new();
        let questions = self.pack.questions.clone();
        for question in &questions {
            match self.run_question(question, backend, preflight, &mut fatal) {
                Ok(Some(outcome)) => outcomes.push(outcome),
                Ok(None) => {}
                Err(err) => return Err(self.abort(err, outcomes, fatal)),
            }
        }

        let summary = self.summarize(outcomes, fatal, None);
        self.finish(&summary)?;
        if !summary.fatal_advice_issues.is_empty() {
            return Err(OrchestratorError::AdviceFatal {
                issues: summary.fatal_advice_issues,
            });
        }
        if !summary.fatal_contract_issues.is_empty() {
            return Err(OrchestratorError::ContractFailed {
                issues: summary.fatal_contract_issues,
            });
        }
        Ok(summary)
    }

    /// `Ok(None)` means the question was stopped by a non-fail-fast gate.
    fn run_question(
        &mut self,
        question: &Question,
        backend: &mut dyn ModelBackend,
        preflight: &mut dyn PreflightRunner,
        fatal: &mut Fatal,
    ) -> Result<Option<QuestionOutcome>> {
        let qid = question.id.as_str();
        self.report.line(String::new());
        self.report.line(format!("## {qid}: {}", question.title));
        self.report.line(String::new());
        self.report.line(format!("- Category: {}", question.category));
        log::info!("question.start qid={qid} steps={}", question.preflight.len());

        let evidence =
            self.assembler
                .assemble(qid, &question.preflight, &mut self.registry, preflight)?;
        self.report.extend(evidence.report_lines.iter().cloned());
        self.report.line(format!(
            "- Evidence: blocks={} usable={} cache_hits={}",
            evidence.blocks.len(),
            evidence.usable_blocks,
            evidence.cache_hits()
        ));

        if let Some(source) = evidence.starvation_error() {
            self.report.line(format!("- ⛔ Preflight starvation gate: {source}"));
            let gate = &self.policy.evidence_presence_gate;
            if gate.fail_fast {
                log::error!("run.abort.filtered_to_zero qid={qid}");
                return Err(OrchestratorError::FilteredToZero {
                    qid: qid.to_string(),
                    source,
                });
            }
            fatal.contract.push(format!("{qid}: {source}"));
            return Ok(None);
        }

        if self.empty_evidence_gate(qid, &evidence, fatal)? {
            return Ok(None);
        }

        let ctx = QuestionContext {
            pack: &self.pack,
            policy: &self.policy,
            synthesizers: &self.synthesizers,
            universe: self.universe.as_ref(),
            mission: self.mission,
        };
        let outcome = QuestionPipeline::new(&ctx, question, &evidence).run(&self.registry, backend, &mut self.report)?;

        if self.pack.validation.fail_on_missing_citations {
            fatal
                .contract
                .extend(outcome.issues.iter().map(|it| format!("{qid}: {it}")));
        }
        if self.mission {
            fatal
                .advice
                .extend(outcome.advice_issues().iter().map(|it| format!("{qid}: {it}")));
        }
        if let Some(audit) = outcome.audit.as_ref().filter(|a| a.missing_path_count > 0) {
            self.report.line(format!(
                "- Evidence audit: missing_paths={} sample={:?}",
                audit.missing_path_count, audit.missing_paths_sample
            ));
            if self.policy.fail_on_missing_evidence_paths {
                fatal.contract.push(format!(
                    "{qid}: Evidence audit: missing_paths={} sample={:?}",
                    audit.missing_path_count, audit.missing_paths_sample
                ));
            }
        }
        self.write_chat_artifact(&outcome)?;
        Ok(Some(outcome))
    }

    /// Strict evidence gate. `Ok(true)` stops the question without aborting.
    fn empty_evidence_gate(&mut self, qid: &str, evidence: &QuestionEvidence, fatal: &mut Fatal) -> Result<bool> {
        let gate = &self.policy.evidence_presence_gate;
        if evidence.has_usable_evidence() || !gate.fail_on_empty_evidence {
            return Ok(false);
        }
        self.report.line(
            "- ⛔ Strict evidence gate: no usable deterministic evidence extracted (model/advice skipped, run aborted)",
        );
        self.report.section("Validator issues");
        self.report.line(format!("- Evidence gate: {EMPTY_EVIDENCE_MESSAGE}"));
        if gate.fail_fast {
            log::error!("run.abort.empty_evidence qid={qid}");
            return Err(OrchestratorError::EmptyEvidence { qid: qid.to_string() });
        }
        log::error!("question.evidence_empty.fatal qid={qid}");
        fatal.contract.push(format!("{qid}: {EMPTY_EVIDENCE_MESSAGE}"));
        Ok(true)
    }

    fn write_chat_artifact(&self, outcome: &QuestionOutcome) -> Result<()> {
        if outcome.dispatches.is_empty() {
            return Ok(());
        }
        let path = self.out_dir.join(format!("{}_chat.json", outcome.qid));
        let artifact = ChatArtifact {
            qid: &outcome.qid,
            top_k: outcome.top_k,
            dispatches: &outcome.dispatches,
            answer: &outcome.answer,
        };
        write_text(&path, &serde_json::to_string_pretty(&artifact)?)
    }

    fn report_header(&mut self) {
        let header = [
            format!("# Run report: {}", self.pack.pack_type),
            String::new(),
            format!("- engine={}", self.pack.engine),
            format!("- questions={}", self.pack.questions.len()),
            format!("- mission_advice_gate_enabled={}", self.mission),
            format!(
                "- adaptive_top_k={} chat_top_k_initial={}",
                self.policy.adaptive_top_k, self.policy.chat_top_k_initial
            ),
            format!("- quote_bypass={:?}", self.policy.quote_bypass),
        ];
        self.report.extend(header);
    }

    fn summarize(&self, questions: Vec<QuestionOutcome>, fatal: Fatal, aborted: Option<String>) -> RunSummary {
        let mut retries = RetryCounts::default();
        for outcome in &questions {
            retries += outcome.retries;
        }
        RunSummary {
            pack_type: self.pack.pack_type.clone(),
            engine: self.pack.engine.clone(),
            mission: self.mission,
            total: self.pack.questions.len(),
            passed: questions.iter().filter(|q| q.passed).count(),
            retries,
            fatal_contract_issues: fatal.contract,
            fatal_advice_issues: fatal.advice,
            aborted,
            questions,
        }
    }

    /// Key map, report, summary and manifest, in that order.
    fn finish(&self, summary: &RunSummary) -> Result<()> {
        let key_map = self.out_dir.join(KEY_MAP_FILE);
        write_text(&key_map, &self.registry.snapshot().to_json_pretty()?)?;
        let report = self.report.flush()?;
        let summary_path = summary.write(&self.out_dir)?;
        let manifest = RunManifest::build(&self.pack, summary, &self.manifest_inputs, &self.out_dir);
        let manifest_path = manifest.write(&self.out_dir)?;
        log::info!(
            "run.done report={} summary={} manifest={} passed={}/{} retries={} fatal_contract_issues={} fatal_advice_issues={}",
            report.display(),
            summary_path.display(),
            manifest_path.display(),
            summary.passed,
            summary.total,
            summary.retries.total(),
            summary.fatal_contract_issues.len(),
            summary.fatal_advice_issues.len()
        );
        Ok(())
    }

    /// Flush whatever exists, then hand back the error that stopped the run.
    fn abort(&mut self, err: OrchestratorError, outcomes: Vec<QuestionOutcome>, fatal: Fatal) -> OrchestratorError {
        self.report.line(String::new());
        self.report.line(format!("**Run aborted:** {err}"));
        let summary = self.summarize(outcomes, fatal, Some(err.to_string()));
        if let Err(flush_err) = self.finish(&summary) {
            log::error!("run.abort.flush_failed error={flush_err}");
        }
        log::error!("run.aborted error={err}");
        err
    }
}
