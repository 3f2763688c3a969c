//! Anthropic-backed classifier — one Messages API call per message.
//!
//! The model is asked for four named sub-scores plus an overall score and a
//! brief rationale as a JSON object. Models sometimes wrap the object in
//! markdown or prose, so parsing goes through a best-effort JSON extraction
//! before giving up.

use async_trait::async_trait;
use secrecy::ExposeSecret;
use serde::Deserialize;
use tracing::debug;

use crate::classifier::{Classifier, ScoreResult};
use crate::config::ClassifierConfig;
use crate::error::ClassifierError;
use crate::store::ScoreSet;

const API_URL: &str = "https://api.anthropic.com/v1/messages";
const API_VERSION: &str = "2023-06-01";
const MAX_TOKENS: u32 = 1000;

/// Classifier client for the Anthropic Messages API.
pub struct AnthropicClassifier {
    http: reqwest::Client,
    config: ClassifierConfig,
}

impl AnthropicClassifier {
    pub fn new(config: ClassifierConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .expect("failed to build HTTP client");
        Self { http, config }
    }
}

#[async_trait]
impl Classifier for AnthropicClassifier {
    async fn classify(&self, redacted_text: &str) -> Result<ScoreResult, ClassifierError> {
        let api_key = self
            .config
            .api_key
            .as_ref()
            .ok_or(ClassifierError::NotConfigured)?;

        let prompt = build_prompt(redacted_text, self.config.max_input_chars);

        let body = serde_json::json!({
            "model": self.config.model,
            "max_tokens": MAX_TOKENS,
            "messages": [{"role": "user", "content": prompt}],
        });

        let response = self
            .http
            .post(API_URL)
            .header("x-api-key", api_key.expose_secret())
            .header("anthropic-version", API_VERSION)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    ClassifierError::Timeout {
                        timeout: self.config.timeout,
                    }
                } else {
                    ClassifierError::Transport(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(ClassifierError::Transport(format!(
                "HTTP {status}: {}",
                detail.chars().take(200).collect::<String>()
            )));
        }

        let payload: MessagesResponse = response
            .json()
            .await
            .map_err(|e| ClassifierError::Malformed {
                reason: format!("response body: {e}"),
            })?;

        let text = payload
            .content
            .iter()
            .find_map(|block| block.text.as_deref())
            .ok_or_else(|| ClassifierError::Malformed {
                reason: "no text block in response".into(),
            })?;

        debug!(model = %self.config.model, "Classifier responded");
        parse_score_response(text)
    }

    fn is_available(&self) -> bool {
        self.config.api_key.is_some()
    }
}

// ── Wire types ──────────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct MessagesResponse {
    content: Vec<ContentBlock>,
}

#[derive(Debug, Deserialize)]
struct ContentBlock {
    #[serde(default)]
    text: Option<String>,
}

/// Expected shape of the model's JSON answer.
#[derive(Debug, Deserialize)]
struct ScorePayload {
    #[serde(default)]
    adversity_score: f64,
    #[serde(default)]
    violence_score: f64,
    #[serde(default)]
    inappropriate_content_score: f64,
    #[serde(default)]
    spam_score: f64,
    moderation_score: Option<f64>,
    #[serde(default)]
    reasoning: Option<String>,
}

// ── Prompt construction ─────────────────────────────────────────────

fn build_prompt(redacted_text: &str, max_chars: usize) -> String {
    let truncated: String = redacted_text.chars().take(max_chars).collect();
    format!(
        "Analyze the following message for content moderation. Score each category from 0.0 \
         (clean) to 1.0 (severe violation).\n\n\
         Message: \"{truncated}\"\n\n\
         Provide scores for:\n\
         1. adversity_score: Hostility, aggression, personal attacks\n\
         2. violence_score: Threats, incitement to violence, graphic descriptions\n\
         3. inappropriate_content_score: Adult content, hate speech, discrimination\n\
         4. spam_score: Commercial spam, repetitive content, low-quality posts\n\n\
         Also provide an overall moderation_score (highest of individual scores) and brief \
         reasoning.\n\n\
         Respond with ONLY a JSON object:\n\
         {{\"adversity_score\": 0.0, \"violence_score\": 0.0, \"inappropriate_content_score\": 0.0, \
         \"spam_score\": 0.0, \"moderation_score\": 0.0, \"reasoning\": \"...\"}}"
    )
}

// ── Response parsing ────────────────────────────────────────────────

/// Parse the model's answer into a `ScoreResult`.
fn parse_score_response(raw: &str) -> Result<ScoreResult, ClassifierError> {
    let json_str = extract_json_object(raw);
    let payload: ScorePayload =
        serde_json::from_str(&json_str).map_err(|e| ClassifierError::Malformed {
            reason: format!("JSON parse error: {e}"),
        })?;

    let mut scores = match payload.moderation_score {
        Some(aggregate) => ScoreSet {
            adversity: payload.adversity_score,
            violence: payload.violence_score,
            inappropriate: payload.inappropriate_content_score,
            spam: payload.spam_score,
            aggregate,
        },
        // Service omitted the aggregate — derive it from the sub-scores.
        None => ScoreSet::from_subscores(
            payload.adversity_score,
            payload.violence_score,
            payload.inappropriate_content_score,
            payload.spam_score,
        ),
    };
    scores = scores.clamped();

    Ok(ScoreResult {
        scores,
        reasoning: payload.reasoning.filter(|r| !r.is_empty()),
    })
}

/// Extract a JSON object from model output (handles markdown wrapping and
/// surrounding prose).
fn extract_json_object(text: &str) -> String {
    let trimmed = text.trim();

    if trimmed.starts_with('{') {
        return trimmed.to_string();
    }

    if let Some(start) = trimmed.find("```json") {
        let after = &trimmed[start + 7..];
        if let Some(end) = after.find("```") {
            return after[..end].trim().to_string();
        }
    }

    if let Some(start) = trimmed.find("```") {
        let after = &trimmed[start + 3..];
        if let Some(end) = after.find("```") {
            let inner = after[..end].trim();
            if inner.starts_with('{') {
                return inner.to_string();
            }
        }
    }

    if let (Some(start), Some(end)) = (trimmed.find('{'), trimmed.rfind('}'))
        && end > start
    {
        return trimmed[start..=end].to_string();
    }

    trimmed.to_string()
}
