//! Per-question evidence assembly.
//!
//! ```text
//! steps ──> execute (or cache) ──> filter pass ──> injection pass ──> QuestionEvidence
//!              │                      │                 │
//!          artifacts            rows_by_step      blocks, usable count,
//!                                                 filtered-to-zero failures
//! ```

use crate::artifact::{artifact_signature, ArtifactCache, PreflightArtifact, PreflightRunner};
use crate::error::{EvidenceError, Result};
use crate::hits::{has_hits, is_nonempty};
use crate::render::{
    doc_summary, format_evidence_block, format_zero_results, EvidenceBlock, RenderMode,
    RenderOptions, DEFAULT_BLOCK_MAX_CHARS, DOC_ANALYSIS_STEP,
};
use crate::rows::{owned_rows, replace_rows, rows, unique_paths, FilteredPayload};
use crate::transform::{
    validate_group_by_dependencies, CompiledTransform, FilterDefaults, RowsByStep, TransformSpec,
    TransformSummary,
};
use grounding_keys::{KeyRegistry, Row};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;

const PATH_SAMPLE_ITEMS: usize = 8;

/// One deterministic extraction step of a question.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PreflightStep {
    pub name: String,
    pub cmd: Vec<String>,
    #[serde(default)]
    pub stop_if_nonempty: bool,
    #[serde(default)]
    pub render: RenderMode,
    #[serde(default)]
    pub fence_lang: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_max_chars: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub transform: Option<TransformSpec>,
}

/// Run-wide evidence knobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EvidencePolicy {
    /// Block budget when neither the step nor its transform sets one
    pub preflight_max_chars: usize,

    /// Reuse artifacts already present in the output directory
    pub reuse_cached_artifacts: bool,

    /// Honor `stop_if_nonempty`
    pub short_circuit_preflights: bool,

    /// Record steps whose raw hits were all filtered away
    pub filtered_to_zero_fail: bool,
    pub filtered_to_zero_threshold: usize,

    pub filters: FilterDefaults,
}

impl Default for EvidencePolicy {
    fn default() -> Self {
        Self {
            preflight_max_chars: DEFAULT_BLOCK_MAX_CHARS,
            reuse_cached_artifacts: true,
            short_circuit_preflights: true,
            filtered_to_zero_fail: true,
            filtered_to_zero_threshold: 20,
            filters: FilterDefaults::default(),
        }
    }
}

impl EvidencePolicy {
    #[must_use]
    pub fn threshold(&self) -> usize {
        self.filtered_to_zero_threshold.max(1)
    }
}

/// A step whose many raw hits were filtered down to no usable evidence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FilteredToZero {
    pub step: String,
    pub rows_before: usize,
    pub filters: TransformSummary,
}

/// What happened to one step, for summaries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StepRecord {
    pub name: String,
    pub returncode: i32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub cache: Option<&'static str>,
    pub rows_before: usize,
    pub rows_after: usize,
    pub has_hits: bool,
}

/// Everything one question's preflights produced.
#[derive(Debug, Clone, Default)]
pub struct QuestionEvidence {
    pub qid: String,
    pub blocks: Vec<EvidenceBlock>,
    /// Blocks whose payload has at least one hit
    pub usable_blocks: usize,
    pub filtered_to_zero: Vec<FilteredToZero>,
    /// Filtered rows per step, in the shape synthesizers consume
    pub rows_by_step: RowsByStep,
    pub steps: Vec<StepRecord>,
    pub report_lines: Vec<String>,
    threshold: usize,
}

impl QuestionEvidence {
    /// Rendered blocks, exactly as they are injected into prompts.
    #[must_use]
    pub fn block_texts(&self) -> Vec<String> {
        self.blocks.iter().map(ToString::to_string).collect()
    }

    #[must_use]
    pub fn has_usable_evidence(&self) -> bool {
        self.usable_blocks > 0
    }

    #[must_use]
    pub fn cache_hits(&self) -> usize {
        self.steps.iter().filter(|s| s.cache.is_some()).count()
    }

    /// The starvation gate verdict, when any step collapsed to zero.
    #[must_use]
    pub fn starvation_error(&self) -> Option<EvidenceError> {
        if self.filtered_to_zero.is_empty() {
            return None;
        }
        let steps: Vec<String> = self
            .filtered_to_zero
            .iter()
            .map(|f| format!("{}({})", f.step, f.rows_before))
            .collect();
        Some(EvidenceError::FilteredToZero {
            threshold: self.threshold,
            steps: steps.join(", "),
        })
    }
}

struct Executed<'s> {
    step: &'s PreflightStep,
    transform: CompiledTransform,
    path: PathBuf,
    artifact: PreflightArtifact,
    cache: Option<&'static str>,
}

/// Runs, caches, filters and renders the preflight steps of each question.
pub struct EvidenceAssembler {
    policy: EvidencePolicy,
    cache: ArtifactCache,
    signature_inputs: Vec<PathBuf>,
}

impl EvidenceAssembler {
    /// `signature_inputs` are the files whose mtime/size invalidate cached artifacts.
    pub fn new(policy: EvidencePolicy, out_dir: impl Into<PathBuf>, signature_inputs: Vec<PathBuf>) -> Self {
        let cache = ArtifactCache::new(out_dir, policy.reuse_cached_artifacts);
        Self {
            policy,
            cache,
            signature_inputs,
        }
    }

    #[must_use]
    pub fn policy(&self) -> &EvidencePolicy {
        &self.policy
    }

    /// Assemble the evidence for question `qid`.
    ///
    /// Configuration problems (bad dependencies, bad regexes) fail before any step runs.
    pub fn assemble(
        &mut self,
        qid: &str,
        steps: &[PreflightStep],
        registry: &mut KeyRegistry,
        runner: &mut dyn PreflightRunner,
    ) -> Result<QuestionEvidence> {
        let mut evidence = QuestionEvidence {
            qid: qid.to_string(),
            threshold: self.policy.threshold(),
            ..Default::default()
        };

        let issues = validate_group_by_dependencies(
            steps.iter().map(|s| (s.name.as_str(), s.transform.as_ref())),
        );
        if !issues.is_empty() {
            log::error!(
                "question.preflight.transform_dependency.invalid qid={qid} issue_count={} sample={:?}",
                issues.len(),
                issues.iter().take(3).collect::<Vec<_>>()
            );
            return Err(EvidenceError::GroupByDependency(issues));
        }

        let default_spec = TransformSpec::default();
        let mut compiled = Vec::with_capacity(steps.len());
        for step in steps {
            let spec = step.transform.as_ref().unwrap_or(&default_spec);
            compiled.push(CompiledTransform::compile(spec, &self.policy.filters)?);
        }

        let executed = self.execute(qid, steps, compiled, registry, runner, &mut evidence)?;
        let executed = self.filter_pass(qid, executed, registry, &mut evidence)?;
        self.injection_pass(qid, &executed, registry, &mut evidence);

        log::info!(
            "question.evidence.assembled qid={qid} blocks={} usable={} filtered_to_zero={}",
            evidence.blocks.len(),
            evidence.usable_blocks,
            evidence.filtered_to_zero.len()
        );
        Ok(evidence)
    }

    fn execute<'s>(
        &mut self,
        qid: &str,
        steps: &'s [PreflightStep],
        compiled: Vec<CompiledTransform>,
        registry: &mut KeyRegistry,
        runner: &mut dyn PreflightRunner,
        evidence: &mut QuestionEvidence,
    ) -> Result<Vec<Executed<'s>>> {
        let mut executed = Vec::new();
        for (step, transform) in steps.iter().zip(compiled) {
            let name = step.name.trim();
            if name.is_empty() || step.cmd.is_empty() {
                continue;
            }
            let path = self.cache.artifact_path(qid, name);
            let file_name = path
                .file_name()
                .map(|f| f.to_string_lossy().into_owned())
                .unwrap_or_default();
            let signature = artifact_signature(&step.cmd, &self.signature_inputs)?;
            log::info!(
                "preflight.step.start qid={qid} step={name} cmd={:?}",
                step.cmd.join(" ")
            );

            if let Some((artifact, hit)) = self.cache.lookup(&path, &signature) {
                evidence
                    .report_lines
                    .push(format!("- Preflight `{name}`: {} → {file_name}", hit.label()));
                log::info!(
                    "preflight.step.cached qid={qid} step={name} returncode={} artifact={}",
                    artifact.returncode,
                    path.display()
                );
                registry.learn_from_payload(&artifact.stdout);
                let stop = self.should_stop(step, &artifact, registry);
                executed.push(Executed {
                    step,
                    transform,
                    path,
                    artifact,
                    cache: Some(hit.label()),
                });
                if stop {
                    evidence
                        .report_lines
                        .push("  - ⤷ short-circuit: stop_if_nonempty (cached)".to_string());
                    log::info!("preflight.step.short_circuit qid={qid} step={name} cached=true");
                    break;
                }
                continue;
            }

            let output = runner
                .run(&step.cmd)
                .map_err(|err| EvidenceError::preflight(name, err))?;
            let artifact = PreflightArtifact::from_output(signature, output);
            registry.learn_from_payload(&artifact.stdout);
            self.cache.store(&path, &artifact)?;
            evidence.report_lines.push(format!(
                "- Preflight `{name}`: rc={} → {file_name}",
                artifact.returncode
            ));
            log::info!(
                "preflight.step.done qid={qid} step={name} returncode={} artifact={} stdout_row_est={}",
                artifact.returncode,
                path.display(),
                rows(registry, &artifact.stdout).len()
            );

            let stop = if artifact.succeeded() {
                self.should_stop(step, &artifact, registry)
            } else {
                evidence
                    .report_lines
                    .push("  - ⚠️ preflight failed (see stderr in artifact)".to_string());
                log::warn!(
                    "preflight.step.failed qid={qid} step={name} stderr_preview={:?}",
                    grounding_protocol::shorten(artifact.stderr.trim(), 240)
                );
                false
            };
            executed.push(Executed {
                step,
                transform,
                path,
                artifact,
                cache: None,
            });
            if stop {
                evidence
                    .report_lines
                    .push("  - ⤷ short-circuit: stop_if_nonempty".to_string());
                log::info!("preflight.step.short_circuit qid={qid} step={name} cached=false");
                break;
            }
        }
        Ok(executed)
    }

    fn should_stop(&self, step: &PreflightStep, artifact: &PreflightArtifact, registry: &KeyRegistry) -> bool {
        self.policy.short_circuit_preflights
            && step.stop_if_nonempty
            && artifact.succeeded()
            && has_hits(registry, &artifact.stdout)
    }

    /// Filter every successful step from its raw payload, persisting the filtered
    /// payload next to the raw one and collecting `rows_by_step` for cross-step
    /// transforms. Cached artifacts are refiltered under the current transform.
    fn filter_pass<'s>(
        &mut self,
        qid: &str,
        mut executed: Vec<Executed<'s>>,
        registry: &mut KeyRegistry,
        evidence: &mut QuestionEvidence,
    ) -> Result<Vec<Executed<'s>>> {
        for item in &mut executed {
            if !item.artifact.succeeded() {
                continue;
            }
            let name = item.step.name.trim().to_string();
            let source: Value = item
                .artifact
                .stdout_raw
                .clone()
                .unwrap_or_else(|| item.artifact.stdout.clone());
            registry.learn_from_payload(&source);

            let raw_rows = owned_rows(registry, &source);
            let raw_paths = unique_paths(registry, &raw_rows);
            let kept: Vec<Row> = item.transform.apply(registry, raw_rows, &evidence.rows_by_step);
            let kept_paths = unique_paths(registry, &kept);
            evidence.rows_by_step.insert(name.clone(), kept.clone());

            if !(source.is_object() || source.is_array()) {
                continue;
            }
            let payload = FilteredPayload::new(registry, source, &kept);
            let (raw_count, kept_count, filtered_to_zero) =
                (payload.rows_before, payload.rows_after, payload.filtered_to_zero);
            let refreshed = item.artifact.with_filtered(payload);
            if refreshed == item.artifact {
                continue;
            }
            self.cache.store(&item.path, &refreshed)?;
            item.artifact = refreshed;

            let dropped: Vec<&String> = raw_paths.iter().filter(|p| !kept_paths.contains(p)).collect();
            let summary = item.transform.summary();
            log::info!(
                "preflight.step.filtered qid={qid} step={name} rows_before={raw_count} rows_after={kept_count} \
                 unique_paths_before={} unique_paths_after={} dropped_paths={} dropped_path_sample={:?} {}",
                raw_paths.len(),
                kept_paths.len(),
                dropped.len(),
                dropped.iter().take(PATH_SAMPLE_ITEMS).collect::<Vec<_>>(),
                summary.log_fields()
            );
            if filtered_to_zero {
                log::warn!(
                    "preflight.step.filtered_to_zero qid={qid} step={name} rows_before={raw_count} \
                     unique_paths_before={} artifact={} {}",
                    raw_paths.len(),
                    item.path.display(),
                    summary.log_fields()
                );
            }
        }
        Ok(executed)
    }

    fn injection_pass(
        &self,
        qid: &str,
        executed: &[Executed<'_>],
        registry: &mut KeyRegistry,
        evidence: &mut QuestionEvidence,
    ) {
        for item in executed {
            let step = item.step;
            let name = step.name.trim();
            let artifact = &item.artifact;
            let succeeded = artifact.succeeded();
            let mut record = StepRecord {
                name: name.to_string(),
                returncode: artifact.returncode,
                cache: item.cache,
                rows_before: artifact.rows_before_filter.unwrap_or(0),
                rows_after: artifact.rows_after_filter.unwrap_or(0),
                has_hits: false,
            };
            if !succeeded {
                evidence.steps.push(record);
                continue;
            }

            let payload = &artifact.stdout;
            registry.learn_from_payload(payload);
            let shown_rows = rows(registry, payload);
            let pre_filter_count = artifact.rows_before_filter.unwrap_or(shown_rows.len());
            record.rows_before = pre_filter_count;
            if !is_nonempty(registry, payload) && pre_filter_count == 0 {
                evidence.steps.push(record);
                continue;
            }

            let spec = item.transform.spec();
            if name == DOC_ANALYSIS_STEP && payload.is_object() {
                let summary = doc_summary(payload, spec.max_items);
                evidence.blocks.push(EvidenceBlock::doc_summary(qid, summary));
            }

            let mut max_chars = step.block_max_chars.unwrap_or(self.policy.preflight_max_chars);
            let mut shown: Value = payload.clone();
            if !shown_rows.is_empty() {
                let mut kept: Vec<Row> = shown_rows.into_iter().cloned().collect();
                if let Some(max_items) = spec.max_items.filter(|n| *n > 0) {
                    kept.truncate(max_items);
                }
                if let Some(limit) = spec.max_chars.filter(|n| *n > 0) {
                    max_chars = limit;
                }
                let container_key = payload
                    .as_object()
                    .and_then(|obj| registry.row_container_key(obj))
                    .map(str::to_string);
                shown = replace_rows(
                    payload,
                    &kept,
                    container_key.as_deref(),
                    pre_filter_count > 0 && kept.is_empty(),
                );
            }
            let mode = spec.render.unwrap_or(step.render);

            let step_has_hits = has_hits(registry, &shown);
            record.has_hits = step_has_hits;
            record.rows_after = rows(registry, &shown).len();
            if step_has_hits {
                evidence.usable_blocks += 1;
            } else if self.policy.filtered_to_zero_fail && pre_filter_count >= self.policy.threshold() {
                let summary = item.transform.summary();
                log::error!(
                    "preflight.step.filtered_to_zero.fail_gate qid={qid} step={name} rows_before={pre_filter_count} \
                     threshold={} artifact={} {}",
                    self.policy.threshold(),
                    item.path.display(),
                    summary.log_fields()
                );
                evidence.filtered_to_zero.push(FilteredToZero {
                    step: name.to_string(),
                    rows_before: pre_filter_count,
                    filters: summary,
                });
            }

            let body = if pre_filter_count > 0 && !step_has_hits {
                format_zero_results(name, pre_filter_count, &spec.filters_used())
            } else {
                let options = RenderOptions {
                    mode,
                    max_chars,
                    fence_lang: step.fence_lang.clone(),
                };
                format_evidence_block(registry, name, &shown, &options)
            };
            evidence.blocks.push(EvidenceBlock::for_step(qid, name, body));
            evidence.steps.push(record);
        }
    }
}
