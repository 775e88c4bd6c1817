//! Runs a plan's verification commands in the sandbox and parses the
//! test-runner output into pass/fail/total counts.

use std::sync::LazyLock;
use std::time::{Duration, Instant};

use regex::Regex;

use crate::domain::{FixPlan, VerificationResult};
use crate::sandbox::Sandbox;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

static PASSED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+passed").unwrap());
static FAILED_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)(\d+)\s+failed").unwrap());
static RAN_RE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"(?i)Ran\s+(\d+)\s+tests?").unwrap());
static SUMMARY_RE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?i)Tests:\s*(\d+)\s+passed,\s*(\d+)\s+failed,\s*(\d+)\s+total").unwrap()
});

struct Counts {
    passed: u32,
    failed: u32,
    total: u32,
}

fn parse_counts(output: &str, exit_code: i32) -> Counts {
    if let Some(caps) = SUMMARY_RE.captures(output) {
        return Counts {
            passed: caps[1].parse().unwrap_or(0),
            failed: caps[2].parse().unwrap_or(0),
            total: caps[3].parse().unwrap_or(0),
        };
    }

    let passed = PASSED_RE.captures(output).and_then(|c| c[1].parse().ok());
    let failed = FAILED_RE.captures(output).and_then(|c| c[1].parse().ok());

    if passed.is_some() || failed.is_some() {
        let passed = passed.unwrap_or(0);
        let failed = failed.unwrap_or(0);
        return Counts {
            passed,
            failed,
            total: passed + failed,
        };
    }

    if let Some(caps) = RAN_RE.captures(output) {
        let total: u32 = caps[1].parse().unwrap_or(0);
        return if exit_code == 0 {
            Counts { passed: total, failed: 0, total }
        } else {
            Counts { passed: 0, failed: total, total }
        };
    }

    if exit_code == 0 {
        Counts { passed: 1, failed: 0, total: 1 }
    } else {
        Counts { passed: 0, failed: 0, total: 0 }
    }
}

pub struct Verifier;

impl Verifier {
    pub fn new() -> Self {
        Self
    }

    /// Executes `plan.verification_steps` in sequence in `sandbox`,
    /// stopping at the first nonzero exit code. Overall success is
    /// `exit_code == 0` on every command run.
    pub async fn verify(&self, sandbox: &Sandbox, plan: &FixPlan) -> VerificationResult {
        let started = Instant::now();
        let mut combined_log = String::new();
        let mut success = true;
        let mut last_exit_code = 0;

        for command in &plan.verification_steps {
            let outcome = sandbox.run_command(command, DEFAULT_TIMEOUT).await;
            combined_log.push_str(&format!(
                "CMD: {command}\nSTDOUT:\n{}\nSTDERR:\n{}\n",
                outcome.stdout, outcome.stderr
            ));
            last_exit_code = outcome.exit_code;
            if outcome.exit_code != 0 {
                success = false;
                break;
            }
        }

        let counts = if plan.verification_steps.is_empty() {
            Counts { passed: 0, failed: 0, total: 0 }
        } else {
            parse_counts(&combined_log, last_exit_code)
        };

        VerificationResult {
            success: plan.verification_steps.is_empty() || success,
            plan_fingerprint: plan.fingerprint(),
            output_log: combined_log,
            duration: started.elapsed(),
            tests_passed: counts.passed,
            tests_failed: counts.failed,
            tests_total: counts.total,
            exit_code: last_exit_code,
        }
    }
}

impl Default for Verifier {
    fn default() -> Self {
        Self::new()
    }
}
