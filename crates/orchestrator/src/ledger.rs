use grounding_protocol::{RetryAttempt, RetryPhase, ValidationIssue};
use serde::Serialize;
use std::ops::AddAssign;

/// Per-phase retry counts, the run-health signal callers watch.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RetryCounts {
    pub adaptive_reruns: usize,
    pub schema_retries: usize,
    pub deterministic_repairs: usize,
    pub advice_retries: usize,
}

impl RetryCounts {
    #[must_use]
    pub fn total(&self) -> usize {
        self.adaptive_reruns + self.schema_retries + self.deterministic_repairs + self.advice_retries
    }
}

impl AddAssign for RetryCounts {
    fn add_assign(&mut self, rhs: Self) {
        self.adaptive_reruns += rhs.adaptive_reruns;
        self.schema_retries += rhs.schema_retries;
        self.deterministic_repairs += rhs.deterministic_repairs;
        self.advice_retries += rhs.advice_retries;
    }
}

/// Every retry attempt of one question, in the order they fired.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RetryLedger {
    attempts: Vec<RetryAttempt>,
}

impl RetryLedger {
    /// Record an attempt and return its 1-based ordinal.
    pub fn record(&mut self, phase: RetryPhase, issues: Vec<ValidationIssue>) -> usize {
        let ordinal = self.attempts.len() + 1;
        self.attempts.push(RetryAttempt {
            ordinal,
            phase,
            issues,
        });
        ordinal
    }

    #[must_use]
    pub fn attempts(&self) -> &[RetryAttempt] {
        &self.attempts
    }

    #[must_use]
    pub fn count(&self, phase: RetryPhase) -> usize {
        self.attempts.iter().filter(|a| a.phase == phase).count()
    }

    #[must_use]
    pub fn counts(&self) -> RetryCounts {
        RetryCounts {
            adaptive_reruns: self.count(RetryPhase::AdaptiveRerun),
            schema_retries: self.count(RetryPhase::SchemaRetry),
            deterministic_repairs: self.count(RetryPhase::DeterministicRepair),
            advice_retries: self.count(RetryPhase::AdviceRetry),
        }
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.attempts.is_empty()
    }
}
