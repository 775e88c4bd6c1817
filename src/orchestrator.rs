//! Single entry point `process_incident`: composes the context loader,
//! workflow parser, reflective loop, confidence scorer, and resolution
//! gate, and emits the report. Drives the full reflective multi-attempt
//! pipeline rather than a single-shot generate-and-verify call.

use std::time::Instant;

use tracing::info;

use crate::agent::ReasoningAgent;
use crate::config::Config;
use crate::context::RepositoryContextLoader;
use crate::domain::{Decision, IncidentEvent, IncidentMetrics, IncidentReport};
use crate::llm::LlmClient;
use crate::reflective::{LoopState, ReflectiveLoop};
use crate::resolution::ResolutionGate;
use crate::scoring::compute_factors;

pub struct Orchestrator {
    llm_client: LlmClient,
    config: Config,
}

impl Orchestrator {
    pub fn new(llm_client: LlmClient, config: Config) -> Self {
        Self { llm_client, config }
    }

    pub async fn process_incident(&self, event: IncidentEvent) -> IncidentReport {
        let started = Instant::now();
        info!(incident_id = %event.id, "processing incident");

        let context = RepositoryContextLoader::new(&event.repository_path);
        let total_files = context.list_files().map(|f| f.len()).unwrap_or(0);

        let agent = ReasoningAgent::new(&self.llm_client);
        let reflective = ReflectiveLoop::new(
            agent,
            self.config.sandbox_dir.clone(),
            self.config.max_attempts,
            self.config.cleanup_sandbox,
        );

        let outcome = reflective
            .run(
                &event,
                &context,
                &self.config.agents_marathon_model,
                &format!("sandbox-{}", event.id),
            )
            .await;

        let last_attempt = outcome.attempts.last();
        let last_verification = last_attempt.and_then(|a| a.verification.clone());

        let (score, factors) = match (&outcome.winning_plan, &last_verification) {
            (Some(plan), Some(verification)) => {
                let factors = compute_factors(plan, verification, total_files);
                (factors.weighted_score(), Some(factors))
            }
            _ => (0.0, None),
        };

        let decision = if outcome.final_state == LoopState::Aborted {
            Decision::Escalate
        } else if let Some(factors) = &factors {
            ResolutionGate::new(self.config.resolve_threshold).decide(score, factors)
        } else {
            Decision::Escalate
        };

        let files_modified = if decision == Decision::Resolve {
            if let Some(plan) = &outcome.winning_plan {
                let repo_path = std::path::Path::new(&event.repository_path);
                if crate::sandbox::apply_to_tree(repo_path, &plan.files_to_change).is_ok() {
                    plan.files_to_change.len()
                } else {
                    0
                }
            } else {
                0
            }
        } else {
            0
        };

        let metrics = IncidentMetrics {
            total_duration: Some(started.elapsed()),
            attempt_count: outcome.attempts.len() as u32,
            llm_calls: self.llm_client.metrics().await.total_calls as u32,
            tokens: self.llm_client.metrics().await.total_tokens,
            sandbox_runs: outcome.attempts.len() as u32,
            files_modified,
        };

        let last_log = last_verification.as_ref().map(|v| v.output_log.clone());
        let rendered_text = crate::report::render(
            &event,
            decision,
            score,
            factors.as_ref(),
            &metrics,
            last_log.as_deref(),
        );

        info!(incident_id = %event.id, ?decision, score, "incident processed");

        let winning_verification = if outcome.winning_plan.is_some() {
            last_verification
        } else {
            None
        };

        IncidentReport {
            incident_id: event.id.clone(),
            decision,
            score,
            factors,
            attempts: outcome.attempts,
            metrics,
            winning_plan: outcome.winning_plan,
            winning_verification,
            rendered_text,
        }
    }
}
