//! # Grounding Evidence
//!
//! Turns raw preflight command output into citeable evidence blocks.
//!
//! ```text
//! PreflightRunner ──> PreflightArtifact ({qid}_{step}.json, signature-cached)
//!                            │
//!                            ▼
//!                 rows ──> CompiledTransform ──> filtered rows (rows_by_step)
//!                                                     │
//!                                                     ▼
//!                  has_hits / filtered-to-zero gate ──> EvidenceBlock
//!                                                     [Preflight {label}]:
//!                                                     CITE={qid}_{step}.json:1
//! ```
//!
//! Row shapes are never hard-coded: every accessor goes through a
//! [`grounding_keys::KeyRegistry`] owned by the run.

mod artifact;
mod assembler;
mod error;
mod hits;
mod render;
mod rows;
mod transform;

pub use artifact::{
    artifact_signature, parse_stdout, ArtifactCache, CacheHit, CmdOutput, PreflightArtifact,
    PreflightRunner,
};
pub use assembler::{
    EvidenceAssembler, EvidencePolicy, FilteredToZero, PreflightStep, QuestionEvidence,
    StepRecord,
};
pub use error::{EvidenceError, Result};
pub use hits::{has_hits, is_nonempty, parse_json_maybe};
pub use render::{
    anchor_for, artifact_file_name, doc_summary, format_block_rows, format_evidence_block,
    format_json_rows, format_lines_rows, format_list_rows, format_zero_results, EvidenceBlock,
    RenderMode, RenderOptions, DEFAULT_BLOCK_MAX_CHARS, DOC_ANALYSIS_STEP,
};
pub use rows::{
    is_filtered_to_zero, owned_rows, replace_rows, rows, unique_paths, FilteredPayload,
    FILTERED_COUNT_KEY, FILTERED_ROWS_KEY, FILTERED_TO_ZERO_KEY,
};
pub use transform::{
    has_real_doc, is_comment_line, is_test_path, is_truthy, top_paths,
    validate_group_by_dependencies, CompiledTransform, FilterDefaults, FilterFn, GroupByPathTopN,
    PatternList, PatternSource, RowsByStep, TransformSpec, TransformSummary,
    DEFAULT_EXCLUDE_PATH_REGEX, DEFAULT_TEST_PATH_PATTERNS, TRANSFORM_FILTER_KEYS,
};
