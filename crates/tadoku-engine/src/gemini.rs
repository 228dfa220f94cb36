//! Gemini generateContent backend.
//!
//! Free-tier quotas differ per model, so unless a model is pinned the
//! backend walks a small candidate list and keeps the first one that
//! answers with text.

use serde::{Deserialize, Serialize};
use tadoku_core::{Error, ModelBackend, ModelRequest, ModelResponse, Result};
use tracing::debug;

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

/// Tried in order when no model is pinned.
pub const DEFAULT_MODEL_CANDIDATES: &[&str] = &[
    "gemini-2.0-flash",
    "gemini-2.0-flash-lite",
    "gemini-1.5-flash",
];

fn gemini_timeout_ms_from_env() -> u64 {
    env("TADOKU_GEMINI_TIMEOUT_MS")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(90_000)
        .clamp(200, 600_000)
}

#[derive(Debug, Clone)]
pub struct GeminiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    models: Vec<String>,
    timeout_ms: u64,
}

impl GeminiBackend {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = env("TADOKU_GEMINI_API_KEY")
            .or_else(|| env("GEMINI_API_KEY"))
            .ok_or_else(|| Error::Config("missing TADOKU_GEMINI_API_KEY".to_string()))?;
        let base_url = env("TADOKU_GEMINI_BASE_URL")
            .unwrap_or_else(|| "https://generativelanguage.googleapis.com".to_string());
        let models = match env("TADOKU_GEMINI_MODEL") {
            Some(model) => vec![model],
            None => DEFAULT_MODEL_CANDIDATES
                .iter()
                .map(|m| m.to_string())
                .collect(),
        };
        Ok(Self {
            client,
            base_url,
            api_key,
            models,
            timeout_ms: gemini_timeout_ms_from_env(),
        })
    }

    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        models: Vec<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            models,
            timeout_ms: gemini_timeout_ms_from_env(),
        }
    }

    pub fn models(&self) -> &[String] {
        &self.models
    }

    fn endpoint(&self, model: &str) -> String {
        format!(
            "{}/v1beta/models/{model}:generateContent?key={}",
            self.base_url.trim_end_matches('/'),
            self.api_key
        )
    }

    async fn try_model(
        &self,
        model: &str,
        req: &ModelRequest,
    ) -> std::result::Result<ModelResponse, String> {
        let body = GenerateRequest {
            contents: vec![RequestContent {
                role: "user".to_string(),
                parts: vec![RequestPart {
                    text: req.prompt.clone(),
                }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json".to_string(),
                temperature: req.options.temperature,
                max_output_tokens: req.options.max_tokens,
            },
        };

        let resp = self
            .client
            .post(self.endpoint(model))
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| e.to_string())?;

        let status = resp.status();
        let payload: serde_json::Value = resp.json().await.unwrap_or_default();
        if !status.is_success() {
            let detail = payload
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("request failed");
            return Err(format!("HTTP {status} {detail}"));
        }

        let parsed: GenerateResponse =
            serde_json::from_value(payload).map_err(|e| e.to_string())?;
        let text = parsed.joined_text();
        if text.trim().is_empty() {
            return Err(format!("empty response ({})", parsed.no_text_reason()));
        }

        Ok(ModelResponse {
            usage_tokens: parsed.usage_metadata.map(|u| u.total()),
            text,
        })
    }
}

#[async_trait::async_trait]
impl ModelBackend for GeminiBackend {
    fn name(&self) -> &'static str {
        "gemini"
    }

    async fn complete(&self, req: &ModelRequest) -> Result<ModelResponse> {
        let models: Vec<String> = if req.options.model.is_empty() {
            self.models.clone()
        } else {
            vec![req.options.model.clone()]
        };

        let mut errors = Vec::new();
        for model in &models {
            match self.try_model(model, req).await {
                Ok(resp) => return Ok(resp),
                Err(detail) => {
                    debug!(model = %model, detail = %detail, "gemini candidate failed");
                    errors.push(format!("{model}: {detail}"));
                }
            }
        }
        Err(Error::Model(format!(
            "gemini request failed for all model candidates: {}",
            errors.join(" | ")
        )))
    }
}

#[derive(Debug, Serialize)]
struct GenerateRequest {
    contents: Vec<RequestContent>,
    #[serde(rename = "generationConfig")]
    generation_config: GenerationConfig,
}

#[derive(Debug, Serialize)]
struct RequestContent {
    role: String,
    parts: Vec<RequestPart>,
}

#[derive(Debug, Serialize)]
struct RequestPart {
    text: String,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_output_tokens: Option<u32>,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    #[serde(default, rename = "usageMetadata")]
    usage_metadata: Option<UsageMetadata>,
    #[serde(default, rename = "promptFeedback")]
    prompt_feedback: Option<PromptFeedback>,
}

impl GenerateResponse {
    fn joined_text(&self) -> String {
        let Some(content) = self.candidates.first().and_then(|c| c.content.as_ref()) else {
            return String::new();
        };
        content
            .parts
            .iter()
            .map(|p| p.text.as_str())
            .filter(|t| !t.is_empty())
            .collect::<Vec<_>>()
            .join("\n")
    }

    fn no_text_reason(&self) -> String {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            return format!("prompt blocked ({reason})");
        }
        if let Some(reason) = self
            .candidates
            .first()
            .and_then(|c| c.finish_reason.as_deref())
        {
            return format!("finish reason: {reason}");
        }
        "no text candidate returned".to_string()
    }
}

#[derive(Debug, Deserialize)]
struct Candidate {
    #[serde(default)]
    content: Option<CandidateContent>,
    #[serde(default, rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Deserialize)]
struct PromptFeedback {
    #[serde(default, rename = "blockReason")]
    block_reason: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct UsageMetadata {
    #[serde(default)]
    prompt_token_count: u64,
    #[serde(default)]
    candidates_token_count: u64,
    #[serde(default)]
    total_token_count: u64,
}

impl UsageMetadata {
    fn total(&self) -> u64 {
        if self.total_token_count > 0 {
            self.total_token_count
        } else {
            self.prompt_token_count + self.candidates_token_count
        }
    }
}
