use crate::rows::rows;
use grounding_keys::{scalar_text, KeyRegistry, KeyRole, Row};
use grounding_protocol::{char_len, shorten, truncate_chars};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

const SHORTEN_SIGNATURE: usize = 120;
const SHORTEN_DOC: usize = 100;
const SHORTEN_LINE_TEXT: usize = 200;
const MAX_REMAINING_FIELDS: usize = 5;

/// Default body budget for a preflight block.
pub const DEFAULT_BLOCK_MAX_CHARS: usize = 1600;

/// How rows are laid out inside an evidence block.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// One compact summary line per row
    #[default]
    List,
    /// A fenced source excerpt per row
    Block,
    /// One bare source line per row, location first
    Lines,
    /// The rows as indented JSON
    Json,
}

impl RenderMode {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::List => "list",
            Self::Block => "block",
            Self::Lines => "lines",
            Self::Json => "json",
        }
    }

    /// Built-in body budget when a caller does not pick one.
    #[must_use]
    pub fn default_max_chars(self) -> usize {
        match self {
            Self::List => 1600,
            Self::Block => 8000,
            Self::Lines => 4000,
            Self::Json => 10000,
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "list" => Ok(Self::List),
            "block" => Ok(Self::Block),
            "lines" => Ok(Self::Lines),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "unknown render mode '{other}' (expected list|block|lines|json)"
            )),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderOptions {
    pub mode: RenderMode,
    pub max_chars: usize,
    pub fence_lang: String,
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            mode: RenderMode::List,
            max_chars: DEFAULT_BLOCK_MAX_CHARS,
            fence_lang: String::new(),
        }
    }
}

/// One citeable unit of injected evidence.
///
/// Whatever the body holds, the block carries exactly one `CITE=` anchor, and that
/// anchor always points at line 1 of the step's artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceBlock {
    pub label: String,
    pub anchor: String,
    pub body: String,
}

impl EvidenceBlock {
    /// Block for preflight step `step` of question `qid`.
    pub fn for_step(qid: &str, step: &str, body: impl Into<String>) -> Self {
        Self {
            label: step.to_string(),
            anchor: anchor_for(qid, step),
            body: body.into(),
        }
    }

    /// The doc summary block, anchored to the `doc_analysis` artifact.
    pub fn doc_summary(qid: &str, summary: impl Into<String>) -> Self {
        Self {
            label: "DOC_SUMMARY".to_string(),
            anchor: anchor_for(qid, DOC_ANALYSIS_STEP),
            body: summary.into(),
        }
    }

    #[must_use]
    pub fn artifact_name(&self) -> &str {
        self.anchor.strip_suffix(":1").unwrap_or(&self.anchor)
    }
}

impl fmt::Display for EvidenceBlock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[Preflight {}]:\nCITE={}\n{}", self.label, self.anchor, self.body)
    }
}

/// Artifact file name for a step: `{qid}_{step}.json`.
#[must_use]
pub fn artifact_file_name(qid: &str, step: &str) -> String {
    format!("{qid}_{step}.json")
}

#[must_use]
pub fn anchor_for(qid: &str, step: &str) -> String {
    format!("{}:1", artifact_file_name(qid, step))
}

/// Render a payload as an evidence body: `[name] N results:` and the rows.
///
/// Payloads without rows fall back to compact JSON cut to `max_chars`.
#[must_use]
pub fn format_evidence_block(
    registry: &KeyRegistry,
    name: &str,
    payload: &Value,
    options: &RenderOptions,
) -> String {
    let rows = rows(registry, payload);
    if rows.is_empty() {
        let compact = serde_json::to_string(payload).unwrap_or_else(|_| payload.to_string());
        return truncate_chars(&compact, options.max_chars).to_string();
    }
    let header = format!("[{name}] {} results:", rows.len());
    let budget = options.max_chars.saturating_sub(char_len(&header) + 2);
    let body = match options.mode {
        RenderMode::List => format_list_rows(registry, &rows, budget),
        RenderMode::Block => format_block_rows(registry, &rows, &options.fence_lang, budget),
        RenderMode::Lines => format_lines_rows(registry, &rows, budget),
        RenderMode::Json => format_json_rows(&rows, budget),
    };
    format!("{header}\n{body}")
}

/// Body used when filters removed every raw hit.
#[must_use]
pub fn format_zero_results(name: &str, raw_hits: usize, filters_used: &[&str]) -> String {
    format!(
        "[{name}] 0 results (filtered {raw_hits} raw hits; filters: {})",
        filters_used.join(", ")
    )
}

pub fn format_list_rows(registry: &KeyRegistry, rows: &[&Row], max_chars: usize) -> String {
    let path_keys = registry.keys(KeyRole::Path);
    let line_keys = registry.keys(KeyRole::Line);
    let snippet_keys = registry.keys(KeyRole::Snippet);

    let mut out: Vec<String> = Vec::with_capacity(rows.len());
    for (idx, row) in rows.iter().enumerate() {
        let mut parts: Vec<String> = Vec::new();
        parts.push(match registry.row_location(row) {
            Some(loc) => format!("{}. {loc}", idx + 1),
            None => format!("{}.", idx + 1),
        });

        let counts = extract_counts(row);
        if !counts.is_empty() {
            let rendered: Vec<String> = counts.iter().map(|(k, v)| format!("{k}={v}")).collect();
            parts.push(rendered.join(" "));
        }
        let signature = extract_signature(row);
        if !signature.is_empty() {
            parts.push(format!("sig: {}", shorten(&signature, SHORTEN_SIGNATURE)));
        }
        let doc = extract_doc_text(row);
        if !doc.is_empty() {
            parts.push(format!("doc: {}", shorten(&doc, SHORTEN_DOC)));
        }
        let line_text = registry.row_snippet(row).unwrap_or("");
        if !line_text.is_empty() {
            let flat = line_text.replace('\n', " ");
            parts.push(shorten(flat.trim(), SHORTEN_LINE_TEXT));
        }

        let mut extracted: HashSet<&str> = counts.iter().map(|(k, _)| k.as_str()).collect();
        if !signature.is_empty() {
            extracted.extend(["signature", "signature_meta"]);
        }
        if !doc.is_empty() {
            extracted.extend(["doc", "has_doc"]);
        }
        if !line_text.is_empty() {
            extracted.extend(snippet_keys.iter().copied());
        }
        let remaining: Vec<String> = row
            .iter()
            .filter(|(key, value)| {
                let key = key.as_str();
                !path_keys.contains(&key)
                    && !line_keys.contains(&key)
                    && key != "line_end"
                    && !extracted.contains(key)
                    && !is_blank_field(value)
            })
            .take(MAX_REMAINING_FIELDS)
            .map(|(key, value)| format!("{key}={}", field_repr(value)))
            .collect();
        if !remaining.is_empty() {
            parts.push(format!("+{}", remaining.join(",")));
        }

        out.push(format!("  {}", parts.join(" | ")));
    }
    truncate_chars(&out.join("\n"), max_chars).to_string()
}

pub fn format_block_rows(
    registry: &KeyRegistry,
    rows: &[&Row],
    fence_lang: &str,
    max_chars: usize,
) -> String {
    let mut out: Vec<String> = Vec::new();
    let mut total = 0usize;
    for (idx, row) in rows.iter().enumerate() {
        let source = registry
            .row_snippet(row)
            .map(str::to_string)
            .or_else(|| {
                ["source_text", "text"]
                    .iter()
                    .filter_map(|key| row.get(*key))
                    .find(|value| crate::transform::is_truthy(value))
                    .map(scalar_text)
            })
            .unwrap_or_default();
        if source.is_empty() {
            continue;
        }
        let header = match registry.row_location(row) {
            Some(loc) => format!("### {loc}"),
            None => format!("### Block {}", idx + 1),
        };
        let fence = if fence_lang.is_empty() {
            "```".to_string()
        } else {
            format!("```{fence_lang}")
        };
        let block = format!("{header}\n{fence}\n{source}\n```\n");
        let block_len = char_len(&block);
        if total + block_len > max_chars {
            out.push(format!("... ({} more rows truncated)", rows.len() - idx));
            break;
        }
        total += block_len;
        out.push(block);
    }
    out.join("\n")
}

/// One bare line per row: `  [path:line] text`, so the text ends at end-of-line.
pub fn format_lines_rows(registry: &KeyRegistry, rows: &[&Row], max_chars: usize) -> String {
    let mut parts: Vec<String> = Vec::new();
    let mut total = 0usize;
    for row in rows {
        let mut text = registry.row_snippet(row).unwrap_or("").to_string();
        if text.is_empty() {
            text = extract_signature(row);
        }
        if text.is_empty() {
            continue;
        }
        let text = text.replace('\n', " ");
        let text = text.trim();
        let line = match registry.row_location(row) {
            Some(loc) => format!("  [{loc}] {text}"),
            None => format!("  {text}"),
        };
        total += char_len(&line) + 1;
        if total > max_chars {
            parts.push(format!("  ... ({} more)", rows.len() - parts.len()));
            break;
        }
        parts.push(line);
    }
    parts.join("\n")
}

pub fn format_json_rows(rows: &[&Row], max_chars: usize) -> String {
    let rendered = to_json_indent1(rows);
    if char_len(&rendered) > max_chars {
        return format!("{}\n... (truncated)", truncate_chars(&rendered, max_chars));
    }
    rendered
}

fn to_json_indent1<T: Serialize + ?Sized>(value: &T) -> String {
    let mut buf = Vec::new();
    let formatter = serde_json::ser::PrettyFormatter::with_indent(b" ");
    let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
    match value.serialize(&mut ser) {
        Ok(()) => String::from_utf8(buf).unwrap_or_default(),
        Err(_) => String::new(),
    }
}

/// Visibility and doc counts over the rows shown for a `doc_analysis` step.
///
/// Every count is suffixed `_shown` because it describes the injected slice, not the
/// whole repository.
#[must_use]
pub fn doc_summary(payload: &Value, max_items: Option<usize>) -> String {
    let max_items = match max_items {
        Some(n) => format!("max_items_configured={n}"),
        None => "max_items_configured=(unset)".to_string(),
    };
    let Some(entities) = payload.get("entities").and_then(Value::as_array) else {
        return format!("DOC_SUMMARY: unavailable (schema mismatch: missing entities list) {max_items}");
    };

    let mut pub_shown = 0;
    let mut pub_doc_shown = 0;
    let mut pub_undoc_shown = 0;
    let mut pub_crate_shown = 0;
    let mut private_shown = 0;
    let mut other_vis_shown = 0;
    for entity in entities.iter().filter_map(Value::as_object) {
        let visibility = entity
            .get("visibility")
            .and_then(Value::as_str)
            .unwrap_or("")
            .trim();
        match visibility {
            "pub" => {
                pub_shown += 1;
                let has_doc = entity
                    .get("doc")
                    .and_then(|doc| doc.get("has_doc"))
                    .is_some_and(crate::transform::is_truthy);
                if has_doc {
                    pub_doc_shown += 1;
                } else {
                    pub_undoc_shown += 1;
                }
            }
            "pub(crate)" => pub_crate_shown += 1,
            "private" => private_shown += 1,
            _ => other_vis_shown += 1,
        }
    }

    let (mut module_docs_shown, mut module_docs_with_shown, mut module_docs_without_shown) = (0, 0, 0);
    if let Some(modules) = payload.get("module_docs").and_then(Value::as_array) {
        module_docs_shown = modules.len();
        for module in modules {
            if module
                .get("has_doc")
                .is_some_and(crate::transform::is_truthy)
            {
                module_docs_with_shown += 1;
            } else {
                module_docs_without_shown += 1;
            }
        }
    }

    format!(
        "DOC_SUMMARY: entities_shown={} {max_items} pub_shown={pub_shown} pub_doc_shown={pub_doc_shown} \
         pub_undoc_shown={pub_undoc_shown} pub_crate_shown={pub_crate_shown} private_shown={private_shown} \
         other_vis_shown={other_vis_shown} module_docs_shown={module_docs_shown} \
         module_docs_with_shown={module_docs_with_shown} module_docs_without_shown={module_docs_without_shown}",
        entities.len()
    )
}

/// Name of the step that gets a DOC_SUMMARY block.
pub const DOC_ANALYSIS_STEP: &str = "doc_analysis";

fn extract_counts(row: &Row) -> Vec<(String, i64)> {
    row.iter()
        .filter(|(key, value)| key.ends_with("_count") && value.is_number())
        .filter_map(|(key, value)| grounding_keys::value_as_i64(value).map(|n| (key.clone(), n)))
        .collect()
}

fn extract_signature(row: &Row) -> String {
    ["signature", "signature_meta"]
        .iter()
        .filter_map(|key| row.get(*key))
        .find(|value| crate::transform::is_truthy(value))
        .map(scalar_text)
        .unwrap_or_default()
}

fn extract_doc_text(row: &Row) -> String {
    match row.get("doc") {
        Some(Value::Object(doc)) => ["text", "content"]
            .iter()
            .filter_map(|key| doc.get(*key))
            .find(|value| crate::transform::is_truthy(value))
            .map(scalar_text)
            .unwrap_or_default(),
        Some(Value::String(doc)) => doc.clone(),
        _ => match row.get("has_doc") {
            Some(Value::Bool(has_doc)) => format!("(has_doc={has_doc})"),
            _ => String::new(),
        },
    }
}

fn is_blank_field(value: &Value) -> bool {
    match value {
        Value::Null | Value::Bool(false) => true,
        Value::String(s) => s.is_empty(),
        Value::Number(n) => n.as_f64() == Some(0.0),
        _ => false,
    }
}

/// Strings in single quotes, everything else as compact JSON.
fn field_repr(value: &Value) -> String {
    match value {
        Value::String(s) => format!("'{}'", s.replace('\\', "\\\\").replace('\'', "\\'")),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use grounding_keys::DiscoveryPolicy;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    fn registry() -> KeyRegistry {
        let mut registry = KeyRegistry::new(DiscoveryPolicy::lenient(), "test");
        registry.add(KeyRole::Path, "file_path");
        registry.add(KeyRole::Line, "line_start");
        registry.add(KeyRole::Snippet, "snippet");
        registry
    }

    fn opts(mode: RenderMode, max_chars: usize) -> RenderOptions {
        RenderOptions {
            mode,
            max_chars,
            fence_lang: String::new(),
        }
    }

    #[test]
    fn list_mode_summarizes_each_row() {
        let payload = json!([
            {"file_path": "src/x.rs", "line_start": 3, "line_end": 5, "unsafe_block_count": 2,
             "signature": "fn x()", "snippet": "unsafe {\n  y()\n}", "kind": "fn", "extra": 0}
        ]);
        let out = format_evidence_block(&registry(), "unsafe", &payload, &opts(RenderMode::List, 1600));
        assert_eq!(
            out,
            "[unsafe] 1 results:\n  1. src/x.rs:3-5 | unsafe_block_count=2 | sig: fn x() | unsafe {   y() } | +kind='fn'"
        );
    }

    #[test]
    fn list_mode_without_location() {
        let payload = json!({"items": [{"name": "thing", "has_doc": false}]});
        let out = format_evidence_block(&registry(), "s", &payload, &opts(RenderMode::List, 1600));
        assert_eq!(out, "[s] 1 results:\n  1. | doc: (has_doc=false) | +name='thing'");
    }

    #[test]
    fn list_mode_truncates_on_char_boundary() {
        let payload = json!([{"file_path": "src/é.rs", "snippet": "ééééééééééééé"}]);
        let out = format_evidence_block(&registry(), "n", &payload, &opts(RenderMode::List, 30));
        // header, newline, then a body cut to 30 - header - 2
        assert_eq!(char_len(&out), 29);
        assert!(out.starts_with("[n] 1 results:\n"));
    }

    #[test]
    fn block_mode_fences_sources() {
        let payload = json!([
            {"file_path": "a.rs", "line_start": 1, "snippet": "fn a() {}"},
            {"file_path": "b.rs", "line_start": 2},
            {"source_text": "fn c() {}"}
        ]);
        let options = RenderOptions {
            mode: RenderMode::Block,
            max_chars: 8000,
            fence_lang: "rust".to_string(),
        };
        let out = format_evidence_block(&registry(), "src", &payload, &options);
        assert_eq!(
            out,
            "[src] 3 results:\n### a.rs:1\n```rust\nfn a() {}\n```\n\n### Block 3\n```rust\nfn c() {}\n```\n"
        );
    }

    #[test]
    fn block_mode_reports_truncation() {
        let payload = json!([
            {"file_path": "a.rs", "snippet": "x".repeat(40)},
            {"file_path": "b.rs", "snippet": "y"}
        ]);
        let out = format_evidence_block(&registry(), "s", &payload, &opts(RenderMode::Block, 40));
        assert_eq!(out, "[s] 2 results:\n... (2 more rows truncated)");
    }

    #[test]
    fn lines_mode_keeps_text_at_end_of_line() {
        let payload = json!([
            {"file_path": "src/lib.rs", "line_start": 7, "snippet": "pub use foo::Bar;\n"},
            {"signature": "fn only_sig()"},
            {"file_path": "src/z.rs"}
        ]);
        let out = format_evidence_block(&registry(), "reexports", &payload, &opts(RenderMode::Lines, 4000));
        assert_eq!(
            out,
            "[reexports] 3 results:\n  [src/lib.rs:7] pub use foo::Bar;\n  fn only_sig()"
        );
    }

    #[test]
    fn lines_mode_counts_remaining() {
        let payload = json!([
            {"snippet": "aaaa"},
            {"snippet": "bbbb"},
            {"snippet": "cccc"}
        ]);
        let out = format_lines_rows(&registry(), &rows(&registry(), &payload), 15);
        assert_eq!(out, "  aaaa\n  bbbb\n  ... (1 more)");
    }

    #[test]
    fn json_mode_uses_single_space_indent() {
        let payload = json!([{"file_path": "a.rs"}]);
        let out = format_evidence_block(&registry(), "j", &payload, &opts(RenderMode::Json, 10000));
        assert_eq!(out, "[j] 1 results:\n[\n {\n  \"file_path\": \"a.rs\"\n }\n]");

        let cut = format_json_rows(&rows(&registry(), &payload), 5);
        assert_eq!(cut, "[\n {\n\n... (truncated)");
    }

    #[test]
    fn non_row_payload_is_compact_json() {
        let payload = json!({"status": "healthy", "score": 9});
        let out = format_evidence_block(&registry(), "h", &payload, &opts(RenderMode::List, 12));
        assert_eq!(out, "{\"status\":\"h");
    }

    #[test]
    fn block_framing_has_one_anchor() {
        let block = EvidenceBlock::for_step("Q1", "unsafe", "[unsafe] 1 results:\n  1. src/x.rs:1");
        assert_eq!(
            block.to_string(),
            "[Preflight unsafe]:\nCITE=Q1_unsafe.json:1\n[unsafe] 1 results:\n  1. src/x.rs:1"
        );
        assert_eq!(block.artifact_name(), "Q1_unsafe.json");
        assert_eq!(
            format_zero_results("unsafe", 42, &["exclude_test_files", "require_regex"]),
            "[unsafe] 0 results (filtered 42 raw hits; filters: exclude_test_files, require_regex)"
        );
    }

    #[test]
    fn doc_summary_counts_visibility() {
        let payload = json!({
            "entities": [
                {"visibility": "pub", "doc": {"has_doc": true}},
                {"visibility": "pub"},
                {"visibility": "pub(crate)"},
                {"visibility": "private"},
                {"visibility": "pub(super)"}
            ],
            "module_docs": [{"has_doc": true}, {"has_doc": false}]
        });
        assert_eq!(
            doc_summary(&payload, Some(50)),
            "DOC_SUMMARY: entities_shown=5 max_items_configured=50 pub_shown=2 pub_doc_shown=1 \
             pub_undoc_shown=1 pub_crate_shown=1 private_shown=1 other_vis_shown=1 module_docs_shown=2 \
             module_docs_with_shown=1 module_docs_without_shown=1"
        );
        assert_eq!(
            doc_summary(&json!({"other": 1}), None),
            "DOC_SUMMARY: unavailable (schema mismatch: missing entities list) max_items_configured=(unset)"
        );
        let block = EvidenceBlock::doc_summary("Q2", "DOC_SUMMARY: x");
        assert_eq!(block.to_string(), "[Preflight DOC_SUMMARY]:\nCITE=Q2_doc_analysis.json:1\nDOC_SUMMARY: x");
    }

    #[test]
    fn render_mode_parses() {
        assert_eq!("BLOCK".parse::<RenderMode>(), Ok(RenderMode::Block));
        assert!("table".parse::<RenderMode>().is_err());
        assert_eq!(RenderMode::default().default_max_chars(), 1600);
    }
}
