//! Builds prompts from incident + repository context + prior-attempt
//! context, and converts the LLM's structured response into a `FixPlan`.
//! Prompt section ordering follows an ordered-sections-plus-truncation
//! style; the worked example baked into the schema instruction below
//! mirrors a simple subtract-off-by-one fixture used to sanity-check
//! the reasoning loop end to end.

use serde::{Deserialize, Serialize};

use crate::context::RepositoryContextLoader;
use crate::domain::{ChangeType, FileChange, FixPlan, IncidentEvent, RiskTag};
use crate::llm::{LlmClient, StructuredValidator};
use crate::error::Result;

const MAX_FILE_LIST_ENTRIES: usize = 15;
const FAILING_FILE_BYTE_BUDGET: usize = 4_000;
const PRIOR_LOG_BYTE_BUDGET: usize = 2_000;

/// Field aliases the model tends to emit, normalized before schema
/// validation.
const FILE_PATH_ALIASES: &[&str] = &["file", "path"];
const CHANGE_TYPE_ALIASES: &[&str] = &["type", "action"];
const CONTENT_ALIASES: &[&str] = &["changes", "patch", "diff", "code"];

#[derive(Debug, Deserialize, Serialize)]
struct RawFixResponse {
    root_cause: String,
    rationale: String,
    files_to_change: Vec<serde_json::Value>,
    verification_commands: Vec<String>,
    confidence: f64,
    risk_assessment: String,
}

fn take_aliased(map: &serde_json::Map<String, serde_json::Value>, canonical: &str, aliases: &[&str]) -> Option<String> {
    if let Some(v) = map.get(canonical).and_then(|v| v.as_str()) {
        return Some(v.to_string());
    }
    for alias in aliases {
        if let Some(v) = map.get(*alias).and_then(|v| v.as_str()) {
            return Some(v.to_string());
        }
    }
    None
}

fn normalize_change_type(raw: &str) -> Option<ChangeType> {
    match raw.to_lowercase().as_str() {
        "modify" | "update" | "edit" => Some(ChangeType::Modify),
        "add" | "create" => Some(ChangeType::Add),
        "delete" | "remove" => Some(ChangeType::Delete),
        _ => None,
    }
}

/// Normalizes one raw file-change object's aliased field names and
/// coerces it into a `FileChange`. Returns an error message (for the
/// corrective re-prompt) on failure.
fn normalize_file_change(value: &serde_json::Value) -> std::result::Result<FileChange, String> {
    let map = value
        .as_object()
        .ok_or_else(|| "each entry in files_to_change must be an object".to_string())?;

    let file_path = take_aliased(map, "file_path", FILE_PATH_ALIASES)
        .ok_or_else(|| "missing file_path (or alias file/path)".to_string())?;
    let change_type_raw = take_aliased(map, "change_type", CHANGE_TYPE_ALIASES)
        .ok_or_else(|| "missing change_type (or alias type/action)".to_string())?;
    let content = take_aliased(map, "content", CONTENT_ALIASES).unwrap_or_default();

    let change_type = normalize_change_type(&change_type_raw)
        .ok_or_else(|| format!("unrecognized change_type: {change_type_raw}"))?;

    Ok(FileChange {
        file_path,
        change_type,
        content,
    })
}

fn validate_fix_response(attempt_index: u32, prior_failure_log: Option<String>) -> impl StructuredValidator<FixPlan> {
    move |value: serde_json::Value| -> std::result::Result<FixPlan, String> {
        let raw: RawFixResponse = serde_json::from_value(value).map_err(|e| e.to_string())?;

        let mut files_to_change = Vec::with_capacity(raw.files_to_change.len());
        for entry in &raw.files_to_change {
            files_to_change.push(normalize_file_change(entry)?);
        }

        Ok(FixPlan {
            root_cause: raw.root_cause,
            rationale: raw.rationale,
            files_to_change,
            verification_steps: raw.verification_commands,
            confidence: raw.confidence.clamp(0.0, 1.0),
            risk_level: RiskTag::from_str_lossy(&raw.risk_assessment),
            attempt_index,
            prior_failure_log: prior_failure_log.clone(),
        })
    }
}

const SCHEMA_INSTRUCTION: &str = r#"Respond with only valid JSON, no commentary, no code fences. The JSON must match this schema exactly:
{
  "root_cause": "string",
  "rationale": "string",
  "files_to_change": [
    { "file_path": "string", "change_type": "modify|add|delete", "content": "string" }
  ],
  "verification_commands": ["string"],
  "confidence": 0.0,
  "risk_assessment": "low|medium|high|critical"
}

Worked example:
{
  "root_cause": "off-by-one in subtract()",
  "rationale": "test asserted the wrong expected value",
  "files_to_change": [
    { "file_path": "tests/test_math.py", "change_type": "modify", "content": "def test_subtract():\n    assert subtract(2, 2) == 0\n" }
  ],
  "verification_commands": ["python -m pytest -v"],
  "confidence": 0.95,
  "risk_assessment": "low"
}"#;

pub struct ReasoningAgent<'a> {
    client: &'a LlmClient,
}

impl<'a> ReasoningAgent<'a> {
    pub fn new(client: &'a LlmClient) -> Self {
        Self { client }
    }

    fn truncate_utf8_safe(s: &str, max_bytes: usize) -> &str {
        if s.len() <= max_bytes {
            return s;
        }
        let mut end = max_bytes;
        while end > 0 && !s.is_char_boundary(end) {
            end -= 1;
        }
        &s[..end]
    }

    /// Builds the full prompt text for one attempt.
    pub fn build_prompt(
        &self,
        event: &IncidentEvent,
        context: &RepositoryContextLoader,
        attempt_index: u32,
        prior_plan: Option<&FixPlan>,
        prior_failure_log: Option<&str>,
    ) -> String {
        let mut sections = Vec::new();

        sections.push(format!(
            "Incident {} ({:?}) in {} on branch {} at {}",
            event.id, event.kind, event.repository_path, event.branch, event.commit_sha
        ));

        if let Some(step) = event.last_failed_step() {
            sections.push(format!(
                "Failed step: {} [{}]\nLogs:\n{}",
                step.name,
                step.status,
                step.logs.as_deref().unwrap_or("(no logs captured)")
            ));
        }

        if let Ok(mut files) = context.list_files() {
            files.truncate(MAX_FILE_LIST_ENTRIES);
            sections.push(format!("Repository files (partial):\n{}", files.join("\n")));
        }

        if let Some(step) = event.last_failed_step() {
            if let Some(logs) = &step.logs {
                if let Some(path) = files_mentioned_in_logs(logs, context) {
                    let content = context.get_file_content(&path, "HEAD");
                    let truncated = Self::truncate_utf8_safe(&content, FAILING_FILE_BYTE_BUDGET);
                    sections.push(format!("Content of {path}:\n{truncated}"));
                }
            }
        }

        if attempt_index > 1 {
            if let Some(plan) = prior_plan {
                let log = prior_failure_log.unwrap_or_default();
                let truncated_log = Self::truncate_utf8_safe(log, PRIOR_LOG_BYTE_BUDGET);
                sections.push(format!(
                    "Previous attempt failed.\nPrior root cause: {}\nPrior rationale: {}\nVerification log tail:\n{}\nPropose a DIFFERENT approach.",
                    plan.root_cause, plan.rationale, truncated_log
                ));
            }
        }

        sections.push(
            "Identify the root cause, propose the minimal fix, list the exact file changes, and list verification commands."
                .to_string(),
        );

        sections.join("\n\n")
    }

    /// Calls the LLM client's structured endpoint and converts the
    /// response into a `FixPlan`.
    pub async fn analyze(
        &self,
        event: &IncidentEvent,
        context: &RepositoryContextLoader,
        model_tag: &str,
        attempt_index: u32,
        prior_plan: Option<&FixPlan>,
        prior_failure_log: Option<&str>,
    ) -> Result<FixPlan> {
        let prompt = self.build_prompt(event, context, attempt_index, prior_plan, prior_failure_log);
        let validator = validate_fix_response(attempt_index, prior_failure_log.map(str::to_string));
        self.client
            .generate_structured(&prompt, SCHEMA_INSTRUCTION, model_tag, &event.id, validator)
            .await
    }
}

fn files_mentioned_in_logs(logs: &str, context: &RepositoryContextLoader) -> Option<String> {
    context
        .list_files()
        .ok()?
        .into_iter()
        .find(|path| logs.contains(path.as_str()))
}
