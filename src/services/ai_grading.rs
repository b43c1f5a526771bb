use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use reqwest::Client;
use serde_json::{json, Value};
use thiserror::Error;

use crate::core::config::Settings;
use crate::schemas::grading::GradingRecord;
use crate::services::criteria::{GradingCriteria, SYSTEM_PROMPT};
use crate::services::grading_cache::{ContentFingerprint, GradingCache};
use crate::services::response_parser;

/// Per-call knobs for [`AiGradingService::grade`].
#[derive(Debug, Clone, Copy)]
pub(crate) struct GradeOptions {
    /// Total attempts, including the first one.
    pub(crate) max_retries: u32,
    /// Fixed pause between attempts.
    pub(crate) retry_delay: Duration,
    pub(crate) use_cache: bool,
    /// Whether a well-delivered but unparseable reply is cached like a real grade.
    pub(crate) cache_parse_failures: bool,
}

impl GradeOptions {
    pub(crate) fn from_settings(settings: &Settings) -> Self {
        Self {
            max_retries: settings.grading().max_retries,
            retry_delay: settings.grading().retry_delay(),
            use_cache: true,
            cache_parse_failures: settings.grading().cache_parse_failures,
        }
    }
}

/// Failures of a single completion request. All of them are retried.
#[derive(Debug, Error)]
pub(crate) enum GradingError {
    #[error("request failed: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("API error (status {status}): {body}")]
    Api { status: u16, body: String },
    #[error("malformed response envelope: {0}")]
    MalformedEnvelope(String),
}

#[derive(Debug, Clone)]
pub(crate) struct AiGradingService {
    client: Client,
    api_key: String,
    base_url: String,
    model: String,
    max_tokens: u32,
    temperature: f64,
    criteria: Arc<GradingCriteria>,
    cache: Arc<GradingCache>,
}

impl AiGradingService {
    pub(crate) fn from_settings(
        settings: &Settings,
        criteria: Arc<GradingCriteria>,
        cache: Arc<GradingCache>,
    ) -> Result<Self> {
        let timeout = Duration::from_secs(settings.ai().ai_request_timeout);
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(30).min(timeout))
            .timeout(timeout)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            client,
            api_key: settings.ai().openai_api_key.clone(),
            base_url: settings.ai().openai_base_url.trim_end_matches('/').to_string(),
            model: settings.ai().ai_model.clone(),
            max_tokens: settings.ai().ai_max_tokens,
            temperature: settings.ai().ai_temperature,
            criteria,
            cache,
        })
    }

    pub(crate) fn cache(&self) -> &GradingCache {
        &self.cache
    }

    /// Grades one submission. Always yields a record; exhausted retries surface as
    /// `success == false` with the last error in the comment.
    pub(crate) async fn grade(
        &self,
        student_id: &str,
        submission: &str,
        reference: &str,
        options: &GradeOptions,
    ) -> GradingRecord {
        let fingerprint = ContentFingerprint::of(submission);

        if options.use_cache {
            if let Some(cached) = self.cache.lookup(&fingerprint).await {
                if cached.success && !self.criteria.allows(cached.score) {
                    tracing::info!(
                        student_id,
                        score = cached.score,
                        "Cached score is outside the current rubric; grading again"
                    );
                } else {
                    tracing::info!(student_id, "Serving grade from cache");
                    metrics::counter!("grading_cache_hits_total").increment(1);
                    return cached.served_from_cache(student_id);
                }
            }
        }

        let prompt = self.criteria.build_prompt(student_id, submission, reference);
        let payload = json!({
            "model": self.model,
            "messages": [
                {"role": "system", "content": SYSTEM_PROMPT},
                {"role": "user", "content": prompt}
            ],
            "max_tokens": self.max_tokens,
            "temperature": self.temperature,
        });

        let max_attempts = options.max_retries.max(1);
        let timer = Instant::now();
        let mut last_error = None;

        for attempt in 1..=max_attempts {
            tracing::info!(student_id, attempt, max_attempts, "Sending grading request");

            match self.request_completion(&payload).await {
                Ok(content) => {
                    metrics::counter!("grading_requests_total", "outcome" => "ok").increment(1);
                    metrics::histogram!("grading_duration_seconds")
                        .record(timer.elapsed().as_secs_f64());

                    let record = self.interpret(student_id, &content);
                    if options.use_cache && (record.success || options.cache_parse_failures) {
                        if let Err(err) = self.cache.store(&fingerprint, record.clone()).await {
                            tracing::warn!(student_id, error = %err, "Failed to cache grade");
                        }
                    }
                    return record;
                }
                Err(err) => {
                    metrics::counter!("grading_requests_total", "outcome" => "error").increment(1);
                    tracing::error!(
                        student_id,
                        attempt,
                        max_attempts,
                        error = %err,
                        "Grading request failed"
                    );
                    last_error = Some(err);
                }
            }

            if attempt < max_attempts {
                tokio::time::sleep(options.retry_delay).await;
            }
        }

        let cause = match last_error {
            Some(err) => format!("API request failed after {max_attempts} attempts: {err}"),
            None => "API request failed: no attempt was made".to_string(),
        };
        GradingRecord::failed(student_id, cause)
    }

    /// Parses the reply and enforces the rubric's discrete score set.
    fn interpret(&self, student_id: &str, content: &str) -> GradingRecord {
        let record = response_parser::parse(content, student_id);
        if record.success && !self.criteria.allows(record.score) {
            tracing::warn!(student_id, score = record.score, "Score outside the rubric");
            let raw = record.raw_response.unwrap_or_default();
            return GradingRecord::failed(
                student_id,
                format!("Score {} is not an allowed rubric value: {raw}", record.score),
            )
            .with_raw_response(raw);
        }
        record
    }

    async fn request_completion(&self, payload: &Value) -> Result<String, GradingError> {
        let url = format!("{}/chat/completions", self.base_url);
        let response =
            self.client.post(&url).bearer_auth(&self.api_key).json(payload).send().await?;

        let status = response.status();
        let raw_body = response.text().await?;
        if !status.is_success() {
            return Err(GradingError::Api { status: status.as_u16(), body: raw_body });
        }

        let body: Value = serde_json::from_str(&raw_body)
            .map_err(|err| GradingError::MalformedEnvelope(format!("{err}: {raw_body}")))?;

        let tokens_used = body
            .get("usage")
            .and_then(|usage| usage.get("total_tokens"))
            .and_then(|value| value.as_u64());
        tracing::debug!(tokens_used, "Completion received");

        body.get("choices")
            .and_then(|choices| choices.get(0))
            .and_then(|choice| choice.get("message"))
            .and_then(|message| message.get("content"))
            .and_then(|value| value.as_str())
            .map(|content| content.trim().to_string())
            .ok_or_else(|| {
                GradingError::MalformedEnvelope("missing choices[0].message.content".to_string())
            })
    }
}
