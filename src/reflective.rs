//! The bounded retry construct: drives up to `MAX_ATTEMPTS` attempts,
//! feeding each failure back into the next attempt's prompt. A state
//! machine over {idle, generating, verifying, reflecting, succeeded,
//! exhausted, aborted}, in the same retry-with-context spirit as a
//! completion tracker that re-queues a failed job with its prior
//! failure context attached, collapsed here into a synchronous
//! in-process loop.

use chrono::Utc;
use tracing::info;

use crate::agent::ReasoningAgent;
use crate::context::RepositoryContextLoader;
use crate::domain::{AttemptRecord, FixPlan, IncidentEvent};
use crate::error::NightingaleError;
use crate::sandbox::Sandbox;
use crate::verifier::Verifier;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Idle,
    Generating,
    Verifying,
    Reflecting,
    Succeeded,
    Exhausted,
    Aborted,
}

pub struct ReflectiveLoopOutcome {
    pub winning_plan: Option<FixPlan>,
    pub attempts: Vec<AttemptRecord>,
    pub final_state: LoopState,
}

pub struct ReflectiveLoop<'a> {
    agent: ReasoningAgent<'a>,
    sandbox_base: String,
    max_attempts: u32,
    cleanup_sandbox: bool,
}

impl<'a> ReflectiveLoop<'a> {
    pub fn new(
        agent: ReasoningAgent<'a>,
        sandbox_base: impl Into<String>,
        max_attempts: u32,
        cleanup_sandbox: bool,
    ) -> Self {
        Self {
            agent,
            sandbox_base: sandbox_base.into(),
            max_attempts,
            cleanup_sandbox,
        }
    }

    pub async fn run(
        &self,
        event: &IncidentEvent,
        context: &RepositoryContextLoader,
        model_tag: &str,
        sandbox_id_prefix: &str,
    ) -> ReflectiveLoopOutcome {
        let mut state = LoopState::Idle;
        let mut attempts = Vec::new();
        let mut attempt_index = 1;
        let mut prior_plan: Option<FixPlan> = None;
        let mut prior_failure_log: Option<String> = None;
        let mut winning_plan = None;

        state = LoopState::Generating;

        loop {
            if state != LoopState::Generating {
                break;
            }

            let started_at = Utc::now();
            info!(attempt_index, "generating fix plan");

            let plan_result = self
                .agent
                .analyze(
                    event,
                    context,
                    model_tag,
                    attempt_index,
                    prior_plan.as_ref(),
                    prior_failure_log.as_deref(),
                )
                .await;

            let plan = match plan_result {
                Ok(plan) => plan,
                Err(NightingaleError::QuotaExhausted { message, .. }) => {
                    attempts.push(AttemptRecord {
                        attempt_index,
                        plan: None,
                        verification: None,
                        started_at,
                        finished_at: Some(Utc::now()),
                        failure_reason: Some(format!("quota exhausted: {message}")),
                    });
                    state = LoopState::Aborted;
                    break;
                }
                Err(NightingaleError::SchemaValidation { message, .. }) => {
                    attempts.push(AttemptRecord {
                        attempt_index,
                        plan: None,
                        verification: None,
                        started_at,
                        finished_at: Some(Utc::now()),
                        failure_reason: Some(format!("schema validation failed: {message}")),
                    });
                    if attempt_index >= self.max_attempts {
                        state = LoopState::Exhausted;
                        break;
                    }
                    attempt_index += 1;
                    state = LoopState::Generating;
                    continue;
                }
                Err(other) => {
                    attempts.push(AttemptRecord {
                        attempt_index,
                        plan: None,
                        verification: None,
                        started_at,
                        finished_at: Some(Utc::now()),
                        failure_reason: Some(other.to_string()),
                    });
                    state = LoopState::Aborted;
                    break;
                }
            };

            state = LoopState::Verifying;

            let sandbox_id = format!("{sandbox_id_prefix}-{attempt_index}");
            let mut sandbox = Sandbox::new(&event.repository_path, &self.sandbox_base, &sandbox_id);

            let verification = match sandbox.setup() {
                Ok(()) => {
                    if let Err(e) = sandbox.apply(&plan.files_to_change) {
                        Err(e)
                    } else {
                        Ok(Verifier::new().verify(&sandbox, &plan).await)
                    }
                }
                Err(e) => Err(e),
            };
            if self.cleanup_sandbox {
                let _ = sandbox.cleanup();
            }

            let verification_result = match verification {
                Ok(result) => result,
                Err(e) => {
                    attempts.push(AttemptRecord {
                        attempt_index,
                        plan: Some(plan.clone()),
                        verification: None,
                        started_at,
                        finished_at: Some(Utc::now()),
                        failure_reason: Some(e.to_string()),
                    });
                    if attempt_index >= self.max_attempts {
                        state = LoopState::Exhausted;
                        break;
                    }
                    prior_failure_log = Some(e.to_string());
                    prior_plan = Some(plan);
                    attempt_index += 1;
                    state = LoopState::Generating;
                    continue;
                }
            };

            let succeeded = verification_result.success;
            attempts.push(AttemptRecord {
                attempt_index,
                plan: Some(plan.clone()),
                verification: Some(verification_result.clone()),
                started_at,
                finished_at: Some(Utc::now()),
                failure_reason: if succeeded {
                    None
                } else {
                    Some("verification failed".to_string())
                },
            });

            if succeeded {
                winning_plan = Some(plan);
                state = LoopState::Succeeded;
                break;
            }

            if attempt_index >= self.max_attempts {
                state = LoopState::Exhausted;
                break;
            }

            state = LoopState::Reflecting;
            prior_failure_log = Some(verification_result.output_log.clone());
            prior_plan = Some(plan);
            attempt_index += 1;
            state = LoopState::Generating;
        }

        ReflectiveLoopOutcome {
            winning_plan,
            attempts,
            final_state: state,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempt_indices_are_one_based_and_unique() {
        let attempts = vec![
            AttemptRecord {
                attempt_index: 1,
                plan: None,
                verification: None,
                started_at: Utc::now(),
                finished_at: None,
                failure_reason: None,
            },
            AttemptRecord {
                attempt_index: 2,
                plan: None,
                verification: None,
                started_at: Utc::now(),
                finished_at: None,
                failure_reason: None,
            },
        ];
        let indices: Vec<u32> = attempts.iter().map(|a| a.attempt_index).collect();
        assert_eq!(indices, vec![1, 2]);
    }

    #[tokio::test(start_paused = true)]
    async fn quota_exhaustion_aborts_the_loop() {
        use crate::domain::{IncidentKind, PipelineStep};
        use crate::llm::LlmClient;

        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let cache_dir = tempfile::tempdir().unwrap();
        let client = LlmClient::new("test-key".to_string(), cache_dir.path(), 1000, false).with_base_url(server.uri());
        let agent = ReasoningAgent::new(&client);
        let reflective_loop = ReflectiveLoop::new(agent, ".sandbox".to_string(), 3, true);

        let repo = tempfile::tempdir().unwrap();
        std::fs::write(repo.path().join("file.txt"), "hello").unwrap();
        let context = RepositoryContextLoader::new(repo.path());

        let event = IncidentEvent {
            id: "incident-quota".to_string(),
            kind: IncidentKind::Test,
            timestamp: Utc::now(),
            repository_path: repo.path().to_string_lossy().to_string(),
            commit_sha: "deadbeef".to_string(),
            branch: "main".to_string(),
            failed_steps: vec![PipelineStep {
                name: "test".to_string(),
                status: "failed".to_string(),
                logs: Some("assertion failed".to_string()),
                duration: None,
            }],
            workflow_path: None,
            metadata: serde_json::Map::new(),
        };

        let outcome = reflective_loop.run(&event, &context, "gemini-1.5-pro", "quota-test").await;

        assert_eq!(outcome.final_state, LoopState::Aborted);
        assert_eq!(outcome.attempts.len(), 1);
        assert!(outcome.winning_plan.is_none());
        let failure_reason = outcome.attempts[0].failure_reason.as_deref().unwrap_or_default();
        assert!(failure_reason.to_lowercase().contains("quota"));
    }
}
