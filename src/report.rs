//! Incident-report renderer (thin adapter). Formats an `IncidentReport`
//! into markdown: status and confidence header, incident details, an
//! optional confidence-factor breakdown, metrics, and a trimmed
//! verification log tail.

use std::fmt::Write as _;

use crate::domain::{ConfidenceFactors, Decision, IncidentEvent, IncidentMetrics};

pub fn render(event: &IncidentEvent, decision: Decision, score: f64, factors: Option<&ConfidenceFactors>, metrics: &IncidentMetrics, last_log: Option<&str>) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "# Nightingale Incident Report\n");
    let _ = writeln!(
        out,
        "**Status**: {}\n**Confidence**: {:.2}\n",
        match decision {
            Decision::Resolve => "RESOLVE",
            Decision::Escalate => "ESCALATE",
        },
        score
    );
    let _ = writeln!(out, "## Incident Details");
    let _ = writeln!(out, "- **ID**: {}", event.id);
    let _ = writeln!(out, "- **Kind**: {:?}", event.kind);
    let _ = writeln!(out, "- **Repo**: {}", event.repository_path);
    let _ = writeln!(out, "- **Branch**: {}\n", event.branch);

    if let Some(factors) = factors {
        let _ = writeln!(out, "## Confidence Breakdown");
        let _ = writeln!(out, "- test_pass_ratio: {:.3} (weight 0.35)", factors.test_pass_ratio);
        let _ = writeln!(
            out,
            "- inverse_blast_radius: {:.3} (weight 0.25)",
            factors.inverse_blast_radius
        );
        let _ = writeln!(out, "- attempt_penalty: {:.3} (weight 0.15)", factors.attempt_penalty);
        let _ = writeln!(out, "- risk_modifier: {:.3} (weight 0.15)", factors.risk_modifier);
        let _ = writeln!(
            out,
            "- self_consistency_score: {:.3} (weight 0.10)\n",
            factors.self_consistency_score
        );
    }

    let _ = writeln!(out, "## Metrics");
    let _ = writeln!(out, "- Attempts: {}", metrics.attempt_count);
    let _ = writeln!(out, "- LLM calls: {}", metrics.llm_calls);
    let _ = writeln!(out, "- Tokens: {}", metrics.tokens);
    let _ = writeln!(out, "- Files modified: {}\n", metrics.files_modified);

    if let Some(log) = last_log {
        let tail: String = log.chars().rev().take(500).collect::<Vec<_>>().into_iter().rev().collect();
        let _ = writeln!(out, "## Verification Log (last 500 chars)\n```\n{tail}\n```");
    }

    out
}
