use crate::allowed::AllowedTokenSet;
use crate::paths::PathUniverse;
use serde::{Deserialize, Serialize};

const SAMPLE_ITEMS: usize = 12;

/// Which evidence paths the corpus actually knows about.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceAudit {
    pub cite_token_count: usize,
    pub injected_path_count: usize,
    pub matched_path_count: usize,
    pub missing_path_count: usize,
    pub missing_paths_sample: Vec<String>,
    pub ignored_low_confidence: usize,
}

impl EvidenceAudit {
    /// Compare evidence paths against `universe`, skipping run artifacts and
    /// paths the strict filter rejects.
    #[must_use]
    pub fn new(allowed: &AllowedTokenSet, universe: &PathUniverse) -> Self {
        let mut audit = Self {
            cite_token_count: allowed.len(),
            ..Self::default()
        };
        let mut missing: Vec<&str> = Vec::new();
        for path in allowed.paths() {
            if is_run_artifact(path) {
                continue;
            }
            if universe.is_low_confidence(path) {
                audit.ignored_low_confidence += 1;
                continue;
            }
            audit.injected_path_count += 1;
            if universe.contains(path) {
                audit.matched_path_count += 1;
            } else {
                missing.push(path);
            }
        }
        audit.missing_path_count = missing.len();
        audit.missing_paths_sample = missing
            .into_iter()
            .take(SAMPLE_ITEMS)
            .map(str::to_string)
            .collect();
        if audit.missing_path_count > 0 {
            log::warn!(
                "evidence.audit.missing_paths count={} sample={:?}",
                audit.missing_path_count,
                audit.missing_paths_sample
            );
        }
        audit
    }
}

/// `{qid}_{step}.json` artifacts written by the run itself.
fn is_run_artifact(path: &str) -> bool {
    !path.contains('/')
        && path.ends_with(".json")
        && path.chars().next().is_some_and(|c| c.is_ascii_uppercase())
        && path.contains('_')
}
