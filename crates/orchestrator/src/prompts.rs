//! Prompt builders for every dispatch the ladder makes.
//!
//! All wording lives in [`PromptTexts`] so a policy file can override it.

use grounding_protocol::ValidationIssue;
use serde::{Deserialize, Serialize};

const ADVICE_TEMPLATE: &str = "RUST IMPROVEMENT ADVICE MODE\n\n\
You are a strict Rust reviewer for mission-grade systems.\n\
Your job is corrective guidance, not praise.\n\
Do not restate the audit answer.\n\n\
REQUIRED OUTPUT FORMAT (plain text):\n\
ISSUE_1=...\n\
WHY_IT_MATTERS_1=...\n\
PATCH_SKETCH_1=...\n\
TEST_PLAN_1=...\n\
CITATIONS_1=<copy citation tokens from evidence, e.g. crates/engine/src/store.rs:25-30>\n\
ISSUE_2=... (optional)\n\
WHY_IT_MATTERS_2=... (optional)\n\
PATCH_SKETCH_2=... (optional)\n\
TEST_PLAN_2=... (optional)\n\
CITATIONS_2=<copy citation tokens from evidence> (optional)\n\
ISSUE_3=... (optional)\n\
WHY_IT_MATTERS_3=... (optional)\n\
PATCH_SKETCH_3=... (optional)\n\
TEST_PLAN_3=... (optional)\n\
CITATIONS_3=<copy citation tokens from evidence> (optional)\n\n\
RULES:\n\
- Return at least ISSUE_1 and ISSUE_2 unless evidence is insufficient.\n\
- Max 3 issues.\n\
- Do not write compliments or generic praise.\n\
- Each ISSUE must be an imperative fix statement (for example: \"Replace panic path with Result propagation\").\n\
- Prefer Rust-idiomatic suggestions (error conversions, trait boundaries, async/thread safety, testing seams).\n\
- PATCH_SKETCH should name concrete Rust targets (module/function/type/test names) when evidence allows.\n\
- TEST_PLAN must include at least one failing test condition and one success condition.\n\
- CITATIONS_n must be copied verbatim from evidence tokens (look for lines starting with \"CITE=\"); do NOT invent tokens.\n\
- Every issue must include at least one such citation token.\n\
- If evidence is insufficient for an issue, do not include that issue.\n";

/// Overridable prompt wording, as the policy's `[prompts]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptTexts {
    pub sources_header: String,
    pub mandatory_procedure: String,
    pub response_format_header: String,
    pub cite_rule: String,
    pub question_header: String,

    pub quote_bypass_title: String,
    pub quote_bypass_preamble: String,
    pub quote_bypass_evidence_header: String,
    pub quote_bypass_instructions: Vec<String>,

    pub strict_override: String,
    pub strict_template_header: String,

    pub adaptive_rerun_preamble: String,
    pub adaptive_rerun_issues_header: String,

    pub schema_retry_preamble: String,
    pub schema_retry_issues_header: String,
    pub max_issue_bullets: usize,

    pub advice_template: String,
    pub advice_no_evidence: String,
    pub advice_retry_preamble: String,
    pub advice_retry_issues_header: String,

    pub evidence_empty_answer: String,
}

impl Default for PromptTexts {
    fn default() -> Self {
        Self {
            sources_header: "RETRIEVED SOURCES (authoritative; cite these sections):".to_string(),
            mandatory_procedure: "MANDATORY PROCEDURE:\n\
                1) Before any explanation, paste the required quoted code/text verbatim from the Sections above.\n\
                2) If you cannot quote it verbatim, output NOT FOUND and stop.\n\
                3) After quoting, provide the answer body."
                .to_string(),
            response_format_header: "RESPONSE FORMAT (MUST FOLLOW EXACTLY):".to_string(),
            cite_rule: "If evidence provides CITE=..., cite that token verbatim (without the CITE= prefix)."
                .to_string(),
            question_header: "QUESTION:".to_string(),

            quote_bypass_title: "QUOTE-BYPASS MODE".to_string(),
            quote_bypass_preamble: "The following evidence has been deterministically extracted from the corpus.\n\
                You MUST NOT output 'NOT FOUND' - the evidence IS present below.\n\
                Your task: Use the evidence and answer the question."
                .to_string(),
            quote_bypass_evidence_header: "EVIDENCE (authoritative):".to_string(),
            quote_bypass_instructions: vec![
                "1. Reference the evidence above to answer the question.".to_string(),
                "2. If the question asks for text/definitions, repeat the relevant parts from Evidence.".to_string(),
                "3. If evidence is insufficient, say INSUFFICIENT EVIDENCE and list what's missing.".to_string(),
            ],

            strict_override: "OUTPUT CONTRACT OVERRIDE:\n\
                - Return plain text only (no markdown headers/bullets).\n\
                - First line must be VERDICT=...\n\
                - Second line must be CITATIONS=...\n\
                - CITATIONS must only use tokens from CITE= evidence lines."
                .to_string(),
            strict_template_header: "STRICT RESPONSE TEMPLATE (MUST MATCH):".to_string(),

            adaptive_rerun_preamble: "IMPORTANT:\n\
                - Follow the required response schema exactly (VERDICT/CITATIONS first).\n\
                - If evidence is present, do not output NOT FOUND.\n\
                - Ensure CITATIONS tokens are path:line(-line)."
                .to_string(),
            adaptive_rerun_issues_header: "Validation issues to fix in this rerun:".to_string(),

            schema_retry_preamble: "SCHEMA RETRY MODE:\n\
                - Fix all validation issues listed below.\n\
                - Preserve factual claims; only repair format/citations as needed.\n\
                - Return plain text only."
                .to_string(),
            schema_retry_issues_header: "Validation issues to fix in this retry:".to_string(),
            max_issue_bullets: 8,

            advice_template: ADVICE_TEMPLATE.to_string(),
            advice_no_evidence: "(no evidence blocks available)".to_string(),
            advice_retry_preamble: "ADVICE RETRY MODE:\n\
                - Fix all advice validation issues listed below.\n\
                - Preserve factual grounding and cite only evidence tokens from CITE= blocks.\n\
                - Return plain text only and follow ISSUE_n field format exactly."
                .to_string(),
            advice_retry_issues_header: "Advice validation issues to fix in this retry:".to_string(),

            evidence_empty_answer: "**NOT FOUND**\n\n\
                Deterministic evidence extraction returned no results. Model call skipped."
                .to_string(),
        }
    }
}

fn bullets(issues: &[ValidationIssue], cap: usize) -> Vec<String> {
    issues.iter().take(cap).map(|it| format!("- {it}")).collect()
}

/// The text of a block after its `[Preflight ...]:` frame line.
fn block_body(block: &str) -> &str {
    block.split_once("]:\n").map_or(block, |(_, body)| body).trim()
}

impl PromptTexts {
    /// Grounding prompt: sources, quoting procedure, response format, question.
    ///
    /// Without blocks the question goes out alone.
    #[must_use]
    pub fn augmented(
        &self,
        blocks: &[String],
        question: &str,
        response_schema: Option<&str>,
        quote_bypass: bool,
    ) -> String {
        if blocks.is_empty() {
            return question.to_string();
        }
        let mut out = format!("{}\n\n{}\n\n---\n\n", self.sources_header, blocks.join("\n\n"));
        if !quote_bypass {
            out.push_str(&self.mandatory_procedure);
            out.push_str("\n\n");
        }
        if let Some(schema) = response_schema.map(str::trim).filter(|s| !s.is_empty()) {
            out.push_str(&format!(
                "{}\n{}\n\n{schema}\n\n",
                self.response_format_header, self.cite_rule
            ));
        }
        out.push_str(&format!("{}\n\n{question}", self.question_header));
        out
    }

    /// Evidence-first prompt used when quoting requirements are waived.
    #[must_use]
    pub fn quote_bypass(&self, blocks: &[String], question: &str, response_schema: Option<&str>) -> String {
        let combined: Vec<&str> = blocks.iter().map(|b| block_body(b)).collect();
        let schema_section = response_schema
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|schema| {
                format!(
                    "---\n\n{}\n{}\n\n{schema}\n\n",
                    self.response_format_header, self.cite_rule
                )
            })
            .unwrap_or_default();
        format!(
            "{title}\n\n{preamble}\n\n---\n\n{evidence_header}\n\n{combined}\n\n{schema_section}---\n\n{question_header}\n\n{question}\n\n---\n\nINSTRUCTIONS:\n{instructions}\n",
            title = self.quote_bypass_title,
            preamble = self.quote_bypass_preamble,
            evidence_header = self.quote_bypass_evidence_header,
            combined = combined.join("\n\n---\n\n"),
            question_header = self.question_header,
            instructions = self.quote_bypass_instructions.join("\n"),
        )
    }

    /// Prepend the output contract and the question's strict template.
    #[must_use]
    pub fn with_strict_template(&self, template: &str, base: &str) -> String {
        format!(
            "{}\n\n{}\n{template}\n\n{base}",
            self.strict_override, self.strict_template_header
        )
    }

    #[must_use]
    pub fn adaptive_rerun(&self, base: &str, issues: &[ValidationIssue], cap: usize) -> String {
        format!(
            "{}\n\n{}\n{}\n\n{base}",
            self.adaptive_rerun_preamble.trim(),
            self.adaptive_rerun_issues_header,
            bullets(issues, cap).join("\n")
        )
    }

    #[must_use]
    pub fn schema_retry(
        &self,
        base: &str,
        template: Option<&str>,
        issues: &[ValidationIssue],
        attempt: usize,
        total: usize,
    ) -> String {
        let mut parts = vec![self.schema_retry_preamble.trim().to_string()];
        if let Some(template) = template {
            parts.extend([String::new(), self.strict_template_header.clone(), template.to_string()]);
        }
        if !issues.is_empty() {
            parts.push(String::new());
            parts.push(self.schema_retry_issues_header.clone());
            parts.extend(bullets(issues, self.max_issue_bullets));
        }
        parts.extend([
            String::new(),
            format!("RETRY_ATTEMPT={attempt}/{total}"),
            String::new(),
            base.to_string(),
        ]);
        parts.join("\n")
    }

    #[must_use]
    pub fn advice(&self, qid: &str, question: &str, answer: &str, blocks: &[String]) -> String {
        let evidence = if blocks.is_empty() {
            self.advice_no_evidence.clone()
        } else {
            blocks.join("\n\n")
        };
        format!(
            "{}\n\nQUESTION_ID={qid}\n\nORIGINAL QUESTION:\n{question}\n\nDETERMINISTIC AUDIT ANSWER:\n{answer}\n\nEVIDENCE:\n{evidence}\n",
            self.advice_template.trim_end()
        )
    }

    #[must_use]
    pub fn advice_retry(
        &self,
        base: &str,
        issues: &[ValidationIssue],
        cap: usize,
        attempt: usize,
        total: usize,
    ) -> String {
        let mut parts = vec![self.advice_retry_preamble.trim().to_string()];
        if !issues.is_empty() {
            parts.push(String::new());
            parts.push(self.advice_retry_issues_header.clone());
            parts.extend(bullets(issues, cap));
        }
        parts.extend([
            String::new(),
            format!("RETRY_ATTEMPT={attempt}/{total}"),
            String::new(),
            base.to_string(),
        ]);
        parts.join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const BLOCK: &str = "[Preflight unsafe]:\nCITE=Q1_unsafe.json:1\n[unsafe] 1 results:\n  1. src/x.rs:1";

    #[test]
    fn no_blocks_sends_the_bare_question() {
        let texts = PromptTexts::default();
        assert_eq!(texts.augmented(&[], "Why?", Some("VERDICT="), false), "Why?");
    }

    #[test]
    fn augmented_prompt_orders_sections() {
        let texts = PromptTexts::default();
        let prompt = texts.augmented(&[BLOCK.to_string()], "Why?", Some("VERDICT=..."), false);
        let sources = prompt.find("RETRIEVED SOURCES").unwrap();
        let procedure = prompt.find("MANDATORY PROCEDURE").unwrap();
        let format = prompt.find("RESPONSE FORMAT").unwrap();
        let question = prompt.find("QUESTION:\n\nWhy?").unwrap();
        assert!(sources < procedure && procedure < format && format < question);

        let bypassed = texts.augmented(&[BLOCK.to_string()], "Why?", None, true);
        assert!(!bypassed.contains("MANDATORY PROCEDURE"));
        assert!(!bypassed.contains("RESPONSE FORMAT"));
    }

    #[test]
    fn quote_bypass_strips_block_frames() {
        let prompt = PromptTexts::default().quote_bypass(&[BLOCK.to_string()], "Why?", None);
        assert!(prompt.starts_with("QUOTE-BYPASS MODE\n\n"));
        assert!(prompt.contains("EVIDENCE (authoritative):\n\nCITE=Q1_unsafe.json:1\n"));
        assert!(!prompt.contains("[Preflight unsafe]"));
        assert!(prompt.ends_with("list what's missing.\n"));
    }

    #[test]
    fn schema_retry_prompt_layout() {
        let issues = vec![ValidationIssue::schema("VERDICT must appear exactly once")];
        let prompt = PromptTexts::default().schema_retry("BASE", Some("VERDICT=<v>"), &issues, 1, 2);
        assert_eq!(
            prompt,
            "SCHEMA RETRY MODE:\n\
             - Fix all validation issues listed below.\n\
             - Preserve factual claims; only repair format/citations as needed.\n\
             - Return plain text only.\n\
             \n\
             STRICT RESPONSE TEMPLATE (MUST MATCH):\n\
             VERDICT=<v>\n\
             \n\
             Validation issues to fix in this retry:\n\
             - VERDICT must appear exactly once\n\
             \n\
             RETRY_ATTEMPT=1/2\n\
             \n\
             BASE"
        );
    }

    #[test]
    fn adaptive_rerun_caps_bullets() {
        let issues: Vec<ValidationIssue> = (0..12)
            .map(|i| ValidationIssue::schema(format!("issue {i}")))
            .collect();
        let prompt = PromptTexts::default().adaptive_rerun("Q", &issues, 8);
        assert_eq!(prompt.matches("\n- issue ").count(), 8);
        assert!(prompt.ends_with("\n\nQ"));
    }

    #[test]
    fn advice_prompt_carries_answer_and_evidence() {
        let prompt = PromptTexts::default().advice("Q1", "Why?", "VERDICT=X", &[]);
        assert!(prompt.contains("\n\nQUESTION_ID=Q1\n\nORIGINAL QUESTION:\nWhy?\n\n"));
        assert!(prompt.ends_with("EVIDENCE:\n(no evidence blocks available)\n"));
    }
}
