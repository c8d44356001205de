//! # Grounding Orchestrator
//!
//! Drives each question of a pack from preflight evidence to a terminal PASS or
//! FAIL through a bounded retry/repair ladder.
//!
//! ```text
//! Pack ──> Runner ──> EvidenceAssembler ──> starvation / empty-evidence gates
//!             │                                        │
//!             │                                        ▼
//!             │        QuestionPipeline: primary ─> adaptive rerun ─> schema retries
//!             │                          ─> strict repair ─> final gates ─> advice
//!             ▼                                        │
//!      REPORT.md, RUN_SUMMARY.json, RUN_MANIFEST.json  <── QuestionOutcome (answer, issues, RetryLedger)
//! ```
//!
//! The model sits behind [`ModelBackend`]; preflight commands sit behind
//! [`grounding_evidence::PreflightRunner`]. Both calls are blocking.

mod backend;
mod error;
mod ledger;
mod manifest;
mod pack;
mod pipeline;
mod policy;
mod prompts;
mod repair;
mod report;
mod run;
mod synth;

pub use backend::{answer_from_response, DispatchPhase, ModelBackend, ModelRequest, ReplayBackend};
pub use error::{OrchestratorError, Result, EMPTY_EVIDENCE_MESSAGE};
pub use ledger::{RetryCounts, RetryLedger};
pub use manifest::{GitInfo, InputFile, ManifestOutputs, PackInfo, RunManifest, MANIFEST_FILE};
pub use pack::{AdviceMode, AnswerMode, ChatConfig, Pack, PackDefaults, Question, REQUIRED_PACK_KEYS};
pub use pipeline::{
    AdviceOutcome, AnswerSource, DispatchRecord, QuestionContext, QuestionOutcome, QuestionPipeline,
};
pub use policy::{EvidencePresenceGate, QuoteBypassMode, RunnerPolicy};
pub use prompts::PromptTexts;
pub use repair::{
    repair_strict_contract, seed_answer, RepairPolicy, DETERMINISTIC_NOTE, NOTE_REPAIRED_CITATIONS,
    NOTE_REPAIRED_VERDICT,
};
pub use report::{RunReport, RunSummary, KEY_MAP_FILE, REPORT_FILE, SUMMARY_FILE};
pub use run::Runner;
pub use synth::{SynthesisInput, SynthesisSource, Synthesizer, SynthesizerRegistry};
