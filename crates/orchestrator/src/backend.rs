//! The seam between the ladder and whatever model answers prompts.

use crate::error::{OrchestratorError, Result};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, VecDeque};
use std::fmt;

/// Why a prompt is being sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DispatchPhase {
    Primary,
    AdaptiveRerun,
    SchemaRetry,
    Advice,
    AdviceRetry,
}

impl fmt::Display for DispatchPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Primary => "primary",
            Self::AdaptiveRerun => "adaptive_rerun",
            Self::SchemaRetry => "schema_retry",
            Self::Advice => "advice",
            Self::AdviceRetry => "advice_retry",
        };
        f.write_str(name)
    }
}

/// One prompt dispatch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelRequest {
    pub qid: String,
    pub phase: DispatchPhase,
    pub prompt: String,
    /// Retrieval breadth the backend should use
    pub top_k: usize,
}

/// Anything that turns a prompt into answer text.
///
/// Calls are blocking; timeouts belong to the implementation.
pub trait ModelBackend {
    fn complete(&mut self, request: &ModelRequest) -> Result<String>;
}

/// Answer text from a backend response: the `answer`, `response` or `text` field of
/// a JSON object, otherwise the raw text.
#[must_use]
pub fn answer_from_response(raw: &str) -> String {
    let trimmed = raw.trim();
    if trimmed.starts_with('{') {
        if let Ok(Value::Object(obj)) = serde_json::from_str::<Value>(trimmed) {
            return ["answer", "response", "text"]
                .iter()
                .filter_map(|key| obj.get(*key))
                .filter_map(Value::as_str)
                .find(|s| !s.is_empty())
                .unwrap_or_default()
                .to_string();
        }
    }
    raw.to_string()
}

/// Replays recorded answers per question, in order.
///
/// The file shape is `{"Q1": ["first answer", "retry answer"], ...}`. A question
/// that runs out of answers keeps receiving its last one.
#[derive(Debug, Clone, Default)]
pub struct ReplayBackend {
    answers: BTreeMap<String, VecDeque<String>>,
    last: BTreeMap<String, String>,
    calls: Vec<ModelRequest>,
}

impl ReplayBackend {
    pub fn new(answers: BTreeMap<String, Vec<String>>) -> Self {
        Self {
            answers: answers
                .into_iter()
                .map(|(qid, list)| (qid, list.into_iter().collect()))
                .collect(),
            ..Self::default()
        }
    }

    pub fn from_json_str(text: &str) -> Result<Self> {
        let answers: BTreeMap<String, Vec<String>> = serde_json::from_str(text)?;
        Ok(Self::new(answers))
    }

    /// Every request seen so far.
    #[must_use]
    pub fn calls(&self) -> &[ModelRequest] {
        &self.calls
    }
}

impl ModelBackend for ReplayBackend {
    fn complete(&mut self, request: &ModelRequest) -> Result<String> {
        self.calls.push(request.clone());
        let next = self
            .answers
            .get_mut(&request.qid)
            .and_then(VecDeque::pop_front);
        let answer = match next {
            Some(answer) => {
                self.last.insert(request.qid.clone(), answer.clone());
                answer
            }
            None => self.last.get(&request.qid).cloned().ok_or_else(|| {
                OrchestratorError::backend(
                    request.phase,
                    format!("no recorded answer for {}", request.qid),
                )
            })?,
        };
        Ok(answer_from_response(&answer))
    }
}
