//! Authenticated single-endpoint text generation with retry, client-side
//! rate limiting, a content-addressed response cache and schema-validated
//! structured output.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::sync::RwLock;
use tracing::{debug, instrument, warn};

use crate::error::{NightingaleError, Result};
use crate::llm::cache::ResponseCache;

const MAX_RETRIES: u32 = 3;
const INITIAL_DELAY: Duration = Duration::from_secs(2);
const MAX_DELAY: Duration = Duration::from_secs(30);
const BACKOFF_FACTOR: u32 = 2;

const QUOTA_MARKERS: &[&str] = &["429", "rate", "quota", "resource_exhausted"];
const TRANSIENT_MARKERS: &[&str] = &["500", "503", "timeout", "unavailable"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ErrorClass {
    Quota,
    Transient,
    Fatal,
}

fn classify_error(message: &str) -> ErrorClass {
    let lower = message.to_lowercase();
    if QUOTA_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorClass::Quota
    } else if TRANSIENT_MARKERS.iter().any(|m| lower.contains(m)) {
        ErrorClass::Transient
    } else {
        ErrorClass::Fatal
    }
}

/// Tracks requests made in the trailing 60 s window for client-side rate
/// limiting. Purely advisory: server-side rejection still routes through
/// the retry path.
#[derive(Default)]
struct RateLimiter {
    window_start: Option<Instant>,
    count_in_window: u32,
}

impl RateLimiter {
    /// Blocks (sleeps) if admitting one more request in the current window
    /// would exceed `rpm_limit`.
    async fn admit(&mut self, rpm_limit: u32) {
        let now = Instant::now();
        match self.window_start {
            Some(start) if now.duration_since(start) < Duration::from_secs(60) => {
                if self.count_in_window >= rpm_limit {
                    let remaining = Duration::from_secs(60) - now.duration_since(start);
                    warn!(?remaining, "rate limit window exhausted, sleeping");
                    tokio::time::sleep(remaining).await;
                    self.window_start = Some(Instant::now());
                    self.count_in_window = 0;
                }
            }
            _ => {
                self.window_start = Some(now);
                self.count_in_window = 0;
            }
        }
        self.count_in_window += 1;
    }
}

#[derive(Debug, Clone, Default)]
pub struct ClientMetrics {
    pub total_calls: u64,
    pub total_tokens: u64,
}

/// A normalization/validation step applied to a structured response. Given
/// the parsed JSON value (after alias normalization by the caller), return
/// either the decoded record or an error message to feed into a corrective
/// re-prompt.
pub trait StructuredValidator<T> {
    fn validate(&self, value: serde_json::Value) -> std::result::Result<T, String>;
}

impl<T, F> StructuredValidator<T> for F
where
    F: Fn(serde_json::Value) -> std::result::Result<T, String>,
{
    fn validate(&self, value: serde_json::Value) -> std::result::Result<T, String> {
        self(value)
    }
}

pub struct LlmClient {
    http: reqwest::Client,
    api_key: String,
    base_url: String,
    cache: ResponseCache,
    rate_limiter: Arc<RwLock<RateLimiter>>,
    metrics: Arc<RwLock<ClientMetrics>>,
    rpm_limit: u32,
    replay_mode: bool,
    max_validation_retries: u32,
}

const DEFAULT_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

impl LlmClient {
    pub fn new(api_key: String, cache_dir: impl Into<std::path::PathBuf>, rpm_limit: u32, replay_mode: bool) -> Self {
        Self {
            http: reqwest::Client::new(),
            api_key,
            base_url: DEFAULT_BASE_URL.to_string(),
            cache: ResponseCache::new(cache_dir),
            rate_limiter: Arc::new(RwLock::new(RateLimiter::default())),
            metrics: Arc::new(RwLock::new(ClientMetrics::default())),
            rpm_limit,
            replay_mode,
            max_validation_retries: 3,
        }
    }

    pub async fn metrics(&self) -> ClientMetrics {
        self.metrics.read().await.clone()
    }

    /// Points this client at a different base URL. Used by tests to redirect
    /// calls to a local mock server instead of the real Gemini endpoint.
    #[cfg(test)]
    pub(crate) fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    #[instrument(skip(self, prompt), fields(incident_id))]
    pub async fn generate(&self, prompt: &str, model_tag: &str, incident_id: &str) -> Result<String> {
        if let Some(cached) = self.cache.get(prompt)? {
            debug!("cache hit");
            return Ok(cached);
        }

        if self.replay_mode {
            return Err(NightingaleError::Configuration(format!(
                "replay mode is on and no cache entry exists for this prompt; populate {} first",
                self.cache.path_for(prompt).display()
            )));
        }

        let response = self.call_with_retry(prompt, model_tag).await?;
        self.cache.put(prompt, &response)?;
        {
            let mut metrics = self.metrics.write().await;
            metrics.total_calls += 1;
        }
        let _ = incident_id;
        Ok(response)
    }

    /// Appends a schema instruction to `prompt`, calls `generate`, strips
    /// code fences, parses JSON, and runs `validator`. On failure,
    /// constructs a corrective prompt and retries up to
    /// `max_validation_retries` times. Only the first attempt goes through
    /// the normal cached `generate` path; corrective re-prompts disable
    /// cache writes so they don't clobber the original cache entry.
    pub async fn generate_structured<T>(
        &self,
        prompt: &str,
        schema_instruction: &str,
        model_tag: &str,
        incident_id: &str,
        validator: impl StructuredValidator<T>,
    ) -> Result<T> {
        let mut full_prompt = format!("{prompt}\n\n{schema_instruction}");
        let mut attempts = 0;

        loop {
            attempts += 1;
            let raw = if attempts == 1 {
                self.generate(&full_prompt, model_tag, incident_id).await?
            } else {
                self.generate_no_cache_toggle(&full_prompt, model_tag, incident_id).await?
            };
            let cleaned = strip_code_fences(&raw);

            let parse_result = serde_json::from_str::<serde_json::Value>(&cleaned)
                .map_err(|e| e.to_string())
                .and_then(|value| validator.validate(value));

            match parse_result {
                Ok(record) => return Ok(record),
                Err(message) if attempts < self.max_validation_retries => {
                    warn!(attempts, %message, "structured response failed validation, retrying");
                    full_prompt = format!(
                        "{prompt}\n\nYour previous response was invalid, error: {message}. Output only JSON matching this schema.\n\n{schema_instruction}"
                    );
                }
                Err(message) => {
                    return Err(NightingaleError::SchemaValidation {
                        attempts,
                        message,
                    });
                }
            }
        }
    }

    /// Like `generate`, but disables cache writes for the duration of the
    /// call — used during a schema-retry sequence so a corrective
    /// re-prompt does not overwrite the prior cache entry.
    async fn generate_no_cache_toggle(&self, prompt: &str, model_tag: &str, incident_id: &str) -> Result<String> {
        if let Some(cached) = self.cache.get(prompt)? {
            return Ok(cached);
        }
        if self.replay_mode {
            return Err(NightingaleError::Configuration(format!(
                "replay mode is on and no cache entry exists for this prompt; populate {} first",
                self.cache.path_for(prompt).display()
            )));
        }
        let response = self.call_with_retry(prompt, model_tag).await?;
        {
            let mut metrics = self.metrics.write().await;
            metrics.total_calls += 1;
        }
        let _ = incident_id;
        Ok(response)
    }

    async fn call_with_retry(&self, prompt: &str, model_tag: &str) -> Result<String> {
        let mut delay = INITIAL_DELAY;
        let mut last_error = String::new();

        for attempt in 0..=MAX_RETRIES {
            self.rate_limiter.write().await.admit(self.rpm_limit).await;

            match self.call_api(prompt, model_tag).await {
                Ok(text) => return Ok(text),
                Err(message) => {
                    last_error = message;
                    match classify_error(&last_error) {
                        ErrorClass::Fatal => {
                            return Err(NightingaleError::Transient(last_error));
                        }
                        ErrorClass::Quota | ErrorClass::Transient => {
                            if attempt == MAX_RETRIES {
                                break;
                            }
                            warn!(attempt, delay = ?delay, error = %last_error, "retrying LLM call");
                            tokio::time::sleep(delay).await;
                            delay = std::cmp::min(delay * BACKOFF_FACTOR, MAX_DELAY);
                        }
                    }
                }
            }
        }

        Err(NightingaleError::QuotaExhausted {
            retries: MAX_RETRIES,
            message: last_error,
        })
    }

    async fn call_api(&self, prompt: &str, model_tag: &str) -> std::result::Result<String, String> {
        let url = format!(
            "{}/models/{}:generateContent?key={}",
            self.base_url, model_tag, self.api_key
        );
        let body = serde_json::json!({
            "contents": [{ "parts": [{ "text": prompt }] }]
        });

        let response = self
            .http
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = response.status();
        if !status.is_success() {
            let text = response.text().await.unwrap_or_default();
            return Err(format!("{status}: {text}"));
        }

        let value: serde_json::Value = response.json().await.map_err(|e| e.to_string())?;
        value
            .pointer("/candidates/0/content/parts/0/text")
            .and_then(|v| v.as_str())
            .map(std::string::ToString::to_string)
            .ok_or_else(|| "missing candidates[0].content.parts[0].text in response".to_string())
    }
}

fn strip_code_fences(text: &str) -> String {
    let trimmed = text.trim();
    let without_lang = trimmed
        .strip_prefix("```json")
        .or_else(|| trimmed.strip_prefix("```"))
        .unwrap_or(trimmed);
    without_lang.strip_suffix("```").unwrap_or(without_lang).trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_quota_errors() {
        assert_eq!(classify_error("429 Too Many Requests"), ErrorClass::Quota);
        assert_eq!(classify_error("RESOURCE_EXHAUSTED"), ErrorClass::Quota);
    }

    #[test]
    fn classifies_transient_errors() {
        assert_eq!(classify_error("503 Service Unavailable"), ErrorClass::Transient);
        assert_eq!(classify_error("request timeout"), ErrorClass::Transient);
    }

    #[test]
    fn classifies_fatal_errors() {
        assert_eq!(classify_error("400 Bad Request: invalid argument"), ErrorClass::Fatal);
    }

    #[test]
    fn strips_json_code_fence() {
        let raw = "```json\n{\"a\":1}\n```";
        assert_eq!(strip_code_fences(raw), "{\"a\":1}");
    }

    #[test]
    fn strips_bare_code_fence() {
        let raw = "```\n{\"a\":1}\n```";
        assert_eq!(strip_code_fences(raw), "{\"a\":1}");
    }

    #[tokio::test]
    async fn rate_limiter_admits_under_limit_without_sleeping() {
        let mut limiter = RateLimiter::default();
        let start = Instant::now();
        for _ in 0..5 {
            limiter.admit(15).await;
        }
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[tokio::test(start_paused = true)]
    async fn repeated_quota_errors_exhaust_retries() {
        let server = wiremock::MockServer::start().await;
        wiremock::Mock::given(wiremock::matchers::method("POST"))
            .respond_with(wiremock::ResponseTemplate::new(429).set_body_string("quota exceeded"))
            .mount(&server)
            .await;

        let cache_dir = tempfile::tempdir().unwrap();
        let client = LlmClient::new("test-key".to_string(), cache_dir.path(), 1000, false)
            .with_base_url(server.uri());

        let result = client.generate("hello", "gemini-1.5-pro", "incident-quota").await;

        match result {
            Err(NightingaleError::QuotaExhausted { retries, message }) => {
                assert_eq!(retries, MAX_RETRIES);
                assert!(message.to_lowercase().contains("quota") || message.contains("429"));
            }
            other => panic!("expected QuotaExhausted, got {other:?}"),
        }
    }
}
