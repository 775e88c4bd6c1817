//! Typed records for incidents, fix plans, verification results, confidence
//! factors and the final incident report. These are read-only facts passed
//! between components; nothing in this module performs I/O.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// The kind of pipeline failure that triggered an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IncidentKind {
    Pipeline,
    Test,
    Lint,
    Build,
}

/// One step of the CI pipeline that was recorded for the failing run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineStep {
    pub name: String,
    pub status: String,
    pub logs: Option<String>,
    pub duration: Option<Duration>,
}

/// The input event. Created by an external adapter (e.g. the webhook
/// surface); read-only within the core.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentEvent {
    pub id: String,
    pub kind: IncidentKind,
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    pub repository_path: String,
    pub commit_sha: String,
    pub branch: String,
    pub failed_steps: Vec<PipelineStep>,
    pub workflow_path: Option<String>,
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl IncidentEvent {
    /// The most recent failed step, used to seed the prompt. `failed_steps`
    /// is required to carry at least one entry by the inbound contract.
    pub fn last_failed_step(&self) -> Option<&PipelineStep> {
        self.failed_steps.last()
    }
}

/// The operation a `FileChange` performs against a tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeType {
    Modify,
    Add,
    Delete,
}

/// One proposed edit. `content` is the full new file content; empty for a
/// delete. Operations always replace or delete whole files — there is no
/// patch/diff format in this data model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    pub file_path: String,
    pub change_type: ChangeType,
    pub content: String,
}

impl FileChange {
    /// Stable content fingerprint, hex-encoded SHA-256 over path + content.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.file_path.as_bytes());
        hasher.update([0u8]);
        hasher.update(self.content.as_bytes());
        hex::encode(hasher.finalize())
    }
}

/// Risk classification of a fix plan, used by the resolution gate's
/// scoring and reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RiskTag {
    Low,
    Medium,
    High,
    Critical,
}

impl RiskTag {
    pub fn from_str_lossy(s: &str) -> Self {
        match s.to_lowercase().as_str() {
            "low" => RiskTag::Low,
            "high" => RiskTag::High,
            "critical" => RiskTag::Critical,
            _ => RiskTag::Medium,
        }
    }
}

/// One attempt's proposal. Immutable once produced.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixPlan {
    pub root_cause: String,
    pub rationale: String,
    pub files_to_change: Vec<FileChange>,
    pub verification_steps: Vec<String>,
    pub confidence: f64,
    pub risk_level: RiskTag,
    pub attempt_index: u32,
    pub prior_failure_log: Option<String>,
}

impl FixPlan {
    /// Content fingerprint over the ordered list of file changes.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for change in &self.files_to_change {
            hasher.update(change.fingerprint().as_bytes());
        }
        hex::encode(hasher.finalize())
    }
}

/// The outcome of running a plan's verification commands in the sandbox.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationResult {
    pub success: bool,
    pub plan_fingerprint: String,
    pub output_log: String,
    pub duration: Duration,
    pub tests_passed: u32,
    pub tests_failed: u32,
    pub tests_total: u32,
    pub exit_code: i32,
}

impl VerificationResult {
    /// `passed / total`, defined as `1.0` when there are no tests and the
    /// run succeeded, else `0.0`.
    pub fn pass_ratio(&self) -> f64 {
        if self.tests_total == 0 {
            return if self.success { 1.0 } else { 0.0 };
        }
        f64::from(self.tests_passed) / f64::from(self.tests_total)
    }
}

/// The five confidence factors, each clamped to `[0, 1]` before weighting.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceFactors {
    pub test_pass_ratio: f64,
    pub inverse_blast_radius: f64,
    pub attempt_penalty: f64,
    pub risk_modifier: f64,
    pub self_consistency_score: f64,
}

/// Weight of each factor in the weighted sum. Must sum to `1.0`.
pub const WEIGHT_TEST_PASS_RATIO: f64 = 0.35;
pub const WEIGHT_INVERSE_BLAST_RADIUS: f64 = 0.25;
pub const WEIGHT_ATTEMPT_PENALTY: f64 = 0.15;
pub const WEIGHT_RISK_MODIFIER: f64 = 0.15;
pub const WEIGHT_SELF_CONSISTENCY: f64 = 0.10;

/// Panics if the compiled-in weights do not sum to `1.0`. Called once at
/// startup from `main`/test harnesses, per the data model's invariant.
pub fn assert_weights_sum_to_one() {
    let total = WEIGHT_TEST_PASS_RATIO
        + WEIGHT_INVERSE_BLAST_RADIUS
        + WEIGHT_ATTEMPT_PENALTY
        + WEIGHT_RISK_MODIFIER
        + WEIGHT_SELF_CONSISTENCY;
    assert!(
        (total - 1.0).abs() < 1e-3,
        "confidence weights must sum to 1.0, got {total}"
    );
}

impl ConfidenceFactors {
    pub fn weighted_score(&self) -> f64 {
        let score = self.test_pass_ratio.clamp(0.0, 1.0) * WEIGHT_TEST_PASS_RATIO
            + self.inverse_blast_radius.clamp(0.0, 1.0) * WEIGHT_INVERSE_BLAST_RADIUS
            + self.attempt_penalty.clamp(0.0, 1.0) * WEIGHT_ATTEMPT_PENALTY
            + self.risk_modifier.clamp(0.0, 1.0) * WEIGHT_RISK_MODIFIER
            + self.self_consistency_score.clamp(0.0, 1.0) * WEIGHT_SELF_CONSISTENCY;
        score.clamp(0.0, 1.0)
    }
}

/// The decision the resolution gate reaches for an incident.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Resolve,
    Escalate,
}

/// One pass through the reflective loop.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AttemptRecord {
    pub attempt_index: u32,
    pub plan: Option<FixPlan>,
    pub verification: Option<VerificationResult>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
}

/// Aggregate counters accumulated across an incident's processing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct IncidentMetrics {
    pub total_duration: Option<Duration>,
    pub attempt_count: u32,
    pub llm_calls: u32,
    pub tokens: u64,
    pub sandbox_runs: u32,
    pub files_modified: usize,
}

/// The final artifact returned by `process_incident`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IncidentReport {
    pub incident_id: String,
    pub decision: Decision,
    pub score: f64,
    pub factors: Option<ConfidenceFactors>,
    pub attempts: Vec<AttemptRecord>,
    pub metrics: IncidentMetrics,
    pub winning_plan: Option<FixPlan>,
    pub winning_verification: Option<VerificationResult>,
    pub rendered_text: String,
}
