//! Blast-radius risk classification and the five-factor weighted
//! confidence score: test pass ratio, inverse blast radius, attempt
//! penalty, risk modifier, and self-consistency, combined into one
//! composite score.

use crate::domain::{ConfidenceFactors, FileChange, FixPlan, VerificationResult};

const CRITICAL_PATTERNS: &[&str] = &[
    "auth",
    "security",
    "secret",
    "password",
    "database",
    "migration",
    ".env",
    "credentials",
];
const HIGH_PATTERNS: &[&str] = &["core/", "main.", "app.", "base.", "models/", "__init__"];
const MEDIUM_PATTERNS: &[&str] = &["utils/", "helpers/", "tools/", "config.", "settings."];
const LOW_PATTERNS: &[&str] = &[
    "test_", "_test", "tests/", "spec/", ".md", ".txt", ".rst", "readme", "license", "changelog",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum PathRisk {
    Low,
    Medium,
    High,
    Critical,
}

impl PathRisk {
    fn score(self) -> f64 {
        match self {
            PathRisk::Low => 1.0,
            PathRisk::Medium => 0.7,
            PathRisk::High => 0.4,
            PathRisk::Critical => 0.1,
        }
    }
}

fn classify_path_risk(path: &str) -> PathRisk {
    let lower = path.to_lowercase();
    if CRITICAL_PATTERNS.iter().any(|p| lower.contains(p)) {
        PathRisk::Critical
    } else if HIGH_PATTERNS.iter().any(|p| lower.contains(p)) {
        PathRisk::High
    } else if MEDIUM_PATTERNS.iter().any(|p| lower.contains(p)) {
        PathRisk::Medium
    } else if LOW_PATTERNS.iter().any(|p| lower.contains(p)) {
        PathRisk::Low
    } else {
        PathRisk::Medium
    }
}

pub struct BlastRadiusAnalysis {
    pub inverse_blast_radius: f64,
    pub risk_modifier: f64,
}

/// Classifies every changed file's path risk and derives the blast-radius
/// factors. `total_files` is the repository's total file count, floored
/// at 1 to avoid a division by zero.
pub fn analyze_blast_radius(changes: &[FileChange], total_files: usize) -> BlastRadiusAnalysis {
    if changes.is_empty() {
        return BlastRadiusAnalysis {
            inverse_blast_radius: 1.0,
            risk_modifier: 1.0,
        };
    }

    let total_files = total_files.max(1) as f64;
    let ratio = changes.len() as f64 / total_files;
    let inverse_blast_radius = 1.0 - ratio.min(1.0);

    let mean_risk_score: f64 = changes
        .iter()
        .map(|c| classify_path_risk(&c.file_path).score())
        .sum::<f64>()
        / changes.len() as f64;

    BlastRadiusAnalysis {
        inverse_blast_radius,
        risk_modifier: mean_risk_score,
    }
}

/// Attempt-penalty lookup: 1.0, 0.7, 0.4 for attempts 1, 2, 3; 0.3 beyond.
pub fn attempt_penalty(attempt_index: u32) -> f64 {
    match attempt_index {
        1 => 1.0,
        2 => 0.7,
        3 => 0.4,
        _ => 0.3,
    }
}

/// Computes the five confidence factors for a completed attempt.
pub fn compute_factors(plan: &FixPlan, result: &VerificationResult, total_files: usize) -> ConfidenceFactors {
    let blast = analyze_blast_radius(&plan.files_to_change, total_files);
    ConfidenceFactors {
        test_pass_ratio: if result.success { result.pass_ratio() } else { 0.0 },
        inverse_blast_radius: blast.inverse_blast_radius,
        attempt_penalty: attempt_penalty(plan.attempt_index),
        risk_modifier: blast.risk_modifier,
        self_consistency_score: plan.confidence.clamp(0.0, 1.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ChangeType;

    fn change(path: &str) -> FileChange {
        FileChange {
            file_path: path.to_string(),
            change_type: ChangeType::Modify,
            content: String::new(),
        }
    }

    #[test]
    fn zero_changes_yields_full_confidence() {
        let blast = analyze_blast_radius(&[], 100);
        assert_eq!(blast.inverse_blast_radius, 1.0);
        assert_eq!(blast.risk_modifier, 1.0);
    }

    #[test]
    fn zero_total_files_floors_denominator_at_one() {
        let blast = analyze_blast_radius(&[change("a.rs")], 0);
        assert_eq!(blast.inverse_blast_radius, 0.0);
    }

    #[test]
    fn critical_path_scores_lowest() {
        let blast = analyze_blast_radius(&[change("src/auth/login.rs")], 10);
        assert!((blast.risk_modifier - 0.1).abs() < f64::EPSILON);
    }

    #[test]
    fn test_file_path_scores_highest() {
        let blast = analyze_blast_radius(&[change("tests/test_foo.rs")], 10);
        assert!((blast.risk_modifier - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn unmatched_path_defaults_to_medium() {
        let blast = analyze_blast_radius(&[change("weird/thing.xyz")], 10);
        assert!((blast.risk_modifier - 0.7).abs() < f64::EPSILON);
    }

    #[test]
    fn attempt_penalty_table() {
        assert_eq!(attempt_penalty(1), 1.0);
        assert_eq!(attempt_penalty(2), 0.7);
        assert_eq!(attempt_penalty(3), 0.4);
        assert_eq!(attempt_penalty(4), 0.3);
    }

    #[test]
    fn inverse_blast_radius_for_60_of_100() {
        let changes: Vec<FileChange> = (0..60).map(|i| change(&format!("file_{i}.rs"))).collect();
        let blast = analyze_blast_radius(&changes, 100);
        assert!((blast.inverse_blast_radius - 0.40).abs() < 1e-9);
    }
}
