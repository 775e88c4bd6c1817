//! End-to-end scenarios covering sandbox apply + verify + score +
//! resolve/escalate, exercised through the real sandbox and verifier
//! rather than mocks: `#[tokio::test]`, real subprocesses, real
//! filesystem fixtures.

use std::time::Duration;

use nightingale::domain::{ChangeType, FileChange, FixPlan, RiskTag};
use nightingale::resolution::ResolutionGate;
use nightingale::sandbox::Sandbox;
use nightingale::scoring::compute_factors;
use nightingale::verifier::Verifier;

fn write_file(dir: &std::path::Path, rel: &str, content: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, content).unwrap();
}

fn subtract_repo() -> tempfile::TempDir {
    let dir = tempfile::tempdir().unwrap();
    write_file(
        dir.path(),
        "src/lib.rs",
        "pub fn subtract(a: i32, b: i32) -> i32 { a - b }\n",
    );
    write_file(
        dir.path(),
        "tests/test_math.py",
        "def test_subtract():\n    assert subtract(2, 2) == 1\n",
    );
    dir
}

fn one_shot_plan() -> FixPlan {
    FixPlan {
        root_cause: "test asserted the wrong expected value".to_string(),
        rationale: "rewrite the assertion to match subtract's actual behavior".to_string(),
        files_to_change: vec![FileChange {
            file_path: "tests/test_math.py".to_string(),
            change_type: ChangeType::Modify,
            content: "def test_subtract():\n    assert subtract(2, 2) == 0\n".to_string(),
        }],
        verification_steps: vec!["echo '2 passed'".to_string()],
        confidence: 0.95,
        risk_level: RiskTag::Low,
        attempt_index: 1,
        prior_failure_log: None,
    }
}

/// Scenario 1: broken test, one-shot fix. High score, resolve, working
/// tree (sandbox, as a stand-in here) ends up with the plan's content.
#[tokio::test]
async fn scenario_one_shot_fix_resolves_with_high_confidence() {
    let repo = subtract_repo();
    let plan = one_shot_plan();

    let mut sandbox = Sandbox::new(repo.path(), ".sandbox", "scenario-1");
    sandbox.setup().unwrap();
    sandbox.apply(&plan.files_to_change).unwrap();

    let verifier = Verifier::new();
    let result = verifier.verify(&sandbox, &plan).await;
    assert!(result.success);

    let factors = compute_factors(&plan, &result, 2);
    let score = factors.weighted_score();
    assert!(score >= 0.90, "expected score >= 0.90, got {score}");

    let decision = ResolutionGate::new(0.85).decide(score, &factors);
    assert_eq!(decision, nightingale::domain::Decision::Resolve);

    let applied = std::fs::read_to_string(sandbox.path().join("tests/test_math.py")).unwrap();
    assert_eq!(applied, plan.files_to_change[0].content);

    sandbox.cleanup().unwrap();
}

/// Scenario 2: two-attempt convergence. The attempt-2 plan's penalty
/// factor is 0.7, and its composite score is strictly below attempt 1's.
#[tokio::test]
async fn scenario_two_attempt_convergence_scores_lower_than_one_shot() {
    let repo = subtract_repo();

    let attempt_one_plan = FixPlan {
        attempt_index: 1,
        verification_steps: vec!["echo '1 failed'; exit 1".to_string()],
        ..one_shot_plan()
    };
    let mut sandbox_one = Sandbox::new(repo.path(), ".sandbox", "scenario-2a");
    sandbox_one.setup().unwrap();
    sandbox_one.apply(&attempt_one_plan.files_to_change).unwrap();
    let result_one = Verifier::new().verify(&sandbox_one, &attempt_one_plan).await;
    assert!(!result_one.success);
    sandbox_one.cleanup().unwrap();

    let attempt_two_plan = FixPlan {
        attempt_index: 2,
        ..one_shot_plan()
    };
    let mut sandbox_two = Sandbox::new(repo.path(), ".sandbox", "scenario-2b");
    sandbox_two.setup().unwrap();
    sandbox_two.apply(&attempt_two_plan.files_to_change).unwrap();
    let result_two = Verifier::new().verify(&sandbox_two, &attempt_two_plan).await;
    assert!(result_two.success);
    sandbox_two.cleanup().unwrap();

    let factors_one_shot = compute_factors(&one_shot_plan(), &result_two, 2);
    let factors_two_attempt = compute_factors(&attempt_two_plan, &result_two, 2);

    assert_eq!(factors_two_attempt.attempt_penalty, 0.7);
    assert!(factors_two_attempt.weighted_score() < factors_one_shot.weighted_score());
}

/// Scenario 3: all attempts exhausted. Score is zero and the decision is
/// escalate; the working tree (sandbox copy) is left untouched because
/// resolution only ever writes to the working repo, never the sandbox.
#[tokio::test]
async fn scenario_all_attempts_exhausted_escalates_with_zero_score() {
    let repo = subtract_repo();
    let failing_plan = FixPlan {
        verification_steps: vec!["exit 1".to_string()],
        ..one_shot_plan()
    };

    let mut sandbox = Sandbox::new(repo.path(), ".sandbox", "scenario-3");
    sandbox.setup().unwrap();
    sandbox.apply(&failing_plan.files_to_change).unwrap();
    let result = Verifier::new().verify(&sandbox, &failing_plan).await;
    assert!(!result.success);

    let factors = compute_factors(&failing_plan, &result, 2);
    let score = factors.weighted_score();
    assert_eq!(factors.test_pass_ratio, 0.0);

    let decision = ResolutionGate::new(0.85).decide(score, &factors);
    assert_eq!(decision, nightingale::domain::Decision::Escalate);

    sandbox.cleanup().unwrap();
    let original = std::fs::read_to_string(repo.path().join("tests/test_math.py")).unwrap();
    assert!(original.contains("== 1"), "working tree must be unchanged on escalate");
}

/// Scenario 5: safety override by blast radius. A high composite score
/// still escalates once inverse_blast_radius drops below 0.3.
#[tokio::test]
async fn scenario_safety_override_on_sweeping_change() {
    let repo = subtract_repo();
    let mut wide_plan = one_shot_plan();
    wide_plan.files_to_change = (0..80)
        .map(|i| FileChange {
            file_path: format!("src/generated_{i}.rs"),
            change_type: ChangeType::Modify,
            content: String::new(),
        })
        .collect();
    wide_plan.confidence = 0.95;

    let mut sandbox = Sandbox::new(repo.path(), ".sandbox", "scenario-5");
    sandbox.setup().unwrap();
    let result = Verifier::new()
        .verify(&sandbox, &FixPlan { verification_steps: vec!["exit 0".to_string()], ..wide_plan.clone() })
        .await;
    assert!(result.success);

    let factors = compute_factors(&wide_plan, &result, 100);
    assert!((factors.inverse_blast_radius - 0.20).abs() < 1e-9);

    let score = factors.weighted_score();
    let decision = ResolutionGate::new(0.85).decide(score, &factors);
    assert_eq!(
        decision,
        nightingale::domain::Decision::Escalate,
        "inverse_blast_radius below 0.3 must force escalation even at high score"
    );

    sandbox.cleanup().unwrap();
}

/// Scenario 6: integrity violation is detected but does not itself flip
/// the decision computed from the verification/scoring pipeline.
#[tokio::test]
async fn scenario_integrity_violation_is_detected_but_non_fatal() {
    let repo = subtract_repo();
    let mut sandbox = Sandbox::new(repo.path(), ".sandbox", "scenario-6");
    sandbox.setup().unwrap();

    std::fs::write(repo.path().join("src/lib.rs"), "tampered by a concurrent process").unwrap();

    let unchanged = sandbox.verify_original_unchanged().unwrap();
    assert!(!unchanged);

    sandbox.cleanup().unwrap();
}

#[tokio::test]
async fn verification_timeout_yields_failing_exit_code() {
    let repo = subtract_repo();
    let mut sandbox = Sandbox::new(repo.path(), ".sandbox", "timeout-scenario");
    sandbox.setup().unwrap();

    let plan = FixPlan {
        verification_steps: vec!["sleep 5".to_string()],
        ..one_shot_plan()
    };
    let outcome = sandbox.run_command(&plan.verification_steps[0], Duration::from_millis(100)).await;
    assert_eq!(outcome.exit_code, -1);

    sandbox.cleanup().unwrap();
}
