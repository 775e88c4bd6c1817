//! Applies thresholds and safety overrides to choose resolve vs escalate,
//! and mutates the working tree when resolving. A plain threshold
//! comparison on its own is too coarse — this adds two safety overrides
//! so a high composite score can't paper over a mostly-failing or
//! sweeping change.

use std::path::Path;

use tracing::info;

use crate::domain::{ConfidenceFactors, Decision, FileChange};
use crate::error::Result;
use crate::sandbox;

const TEST_PASS_RATIO_FLOOR: f64 = 0.5;
const INVERSE_BLAST_RADIUS_FLOOR: f64 = 0.3;

pub struct ResolutionGate {
    threshold: f64,
}

impl ResolutionGate {
    pub fn new(threshold: f64) -> Self {
        Self { threshold }
    }

    /// Decides resolve vs escalate. Order matters: a below-threshold score
    /// escalates before either safety override is consulted.
    pub fn decide(&self, score: f64, factors: &ConfidenceFactors) -> Decision {
        if score < self.threshold {
            return Decision::Escalate;
        }
        if factors.test_pass_ratio < TEST_PASS_RATIO_FLOOR {
            return Decision::Escalate;
        }
        if factors.inverse_blast_radius < INVERSE_BLAST_RADIUS_FLOOR {
            return Decision::Escalate;
        }
        Decision::Resolve
    }

    /// Applies `changes` to the working repository at `repository_path`.
    /// Only ever called after a `resolve` decision.
    pub fn apply_to_working_tree(&self, repository_path: &Path, changes: &[FileChange]) -> Result<()> {
        info!(count = changes.len(), "applying fix to working tree");
        sandbox::apply_to_tree(repository_path, changes)
    }
}
