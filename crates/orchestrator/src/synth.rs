//! Deterministic answer synthesis for `answer_mode = "deterministic"` questions.

use crate::pack::Question;
use crate::repair::{seed_answer, RepairPolicy};
use grounding_evidence::QuestionEvidence;
use grounding_gates::{AllowedTokenSet, ValidationPolicy};
use grounding_keys::KeyRegistry;
use serde::Serialize;
use std::collections::HashMap;

/// Everything a synthesizer may read. Synthesizers never see the model.
pub struct SynthesisInput<'a> {
    pub question: &'a Question,
    pub evidence: &'a QuestionEvidence,
    pub allowed: &'a AllowedTokenSet,
    pub registry: &'a KeyRegistry,
}

/// Builds an answer from evidence; `None` defers to the seed answer.
pub type Synthesizer = Box<dyn Fn(&SynthesisInput<'_>) -> Option<String>>;

/// Where a deterministic answer came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SynthesisSource {
    Registered,
    Seed,
}

/// Question id to synthesizer, with the seed answer as the default.
#[derive(Default)]
pub struct SynthesizerRegistry {
    by_qid: HashMap<String, Synthesizer>,
}

impl SynthesizerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<F>(&mut self, qid: impl Into<String>, synthesizer: F) -> &mut Self
    where
        F: Fn(&SynthesisInput<'_>) -> Option<String> + 'static,
    {
        self.by_qid.insert(qid.into(), Box::new(synthesizer));
        self
    }

    #[must_use]
    pub fn contains(&self, qid: &str) -> bool {
        self.by_qid.contains_key(qid)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.by_qid.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.by_qid.is_empty()
    }

    /// Run the synthesizer registered for the question, else the seed answer.
    pub fn synthesize(
        &self,
        input: &SynthesisInput<'_>,
        validation: &ValidationPolicy,
        repair: &RepairPolicy,
    ) -> (String, SynthesisSource) {
        let qid = input.question.id.as_str();
        if let Some(answer) = self.by_qid.get(qid).and_then(|f| f(input)) {
            log::info!("question.deterministic.synthesized qid={qid} source=registered");
            return (answer, SynthesisSource::Registered);
        }
        log::info!("question.deterministic.synthesized qid={qid} source=seed");
        (seed_answer(qid, input.allowed, validation, repair), SynthesisSource::Seed)
    }
}

impl std::fmt::Debug for SynthesizerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut qids: Vec<&String> = self.by_qid.keys().collect();
        qids.sort();
        f.debug_struct("SynthesizerRegistry").field("qids", &qids).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pack::{AdviceMode, AnswerMode, ChatConfig};
    use grounding_keys::DiscoveryPolicy;

    fn question(id: &str) -> Question {
        Question {
            id: id.to_string(),
            title: "t".into(),
            category: "c".into(),
            question: "q".into(),
            top_k: None,
            preflight: Vec::new(),
            chat: ChatConfig::default(),
            expected_verdict: None,
            answer_mode: AnswerMode::Deterministic,
            advice_mode: AdviceMode::None,
            advice_prompt: None,
        }
    }

    #[test]
    fn registered_synthesizer_wins_and_none_falls_back() {
        let mut synths = SynthesizerRegistry::new();
        synths
            .register("Q1", |input| Some(format!("VERDICT=TRUE_POSITIVE\nCITATIONS={}_x.json:1\n", input.question.id)))
            .register("Q2", |_| None);
        let evidence = QuestionEvidence::default();
        let allowed = AllowedTokenSet::default();
        let registry = KeyRegistry::new(DiscoveryPolicy::lenient(), "test");
        let policy = ValidationPolicy::default();
        let repair = RepairPolicy::default();

        for (qid, expected) in [
            ("Q1", SynthesisSource::Registered),
            ("Q2", SynthesisSource::Seed),
            ("Q3", SynthesisSource::Seed),
        ] {
            let q = question(qid);
            let input = SynthesisInput {
                question: &q,
                evidence: &evidence,
                allowed: &allowed,
                registry: &registry,
            };
            let (answer, source) = synths.synthesize(&input, &policy, &repair);
            assert_eq!(source, expected, "{qid}");
            assert!(answer.starts_with("VERDICT="));
        }
        assert_eq!(synths.len(), 2);
    }
}
