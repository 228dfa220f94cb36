//! OpenAI chat-completions backend.

use serde::{Deserialize, Serialize};
use tadoku_core::{Error, ModelBackend, ModelRequest, ModelResponse, Result};

fn env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

pub const DEFAULT_OPENAI_MODEL: &str = "gpt-5-mini";
pub const DEFAULT_OPENAI_SERVICE_TIER: &str = "flex";

fn openai_timeout_ms_from_env() -> u64 {
    env("TADOKU_OPENAI_TIMEOUT_MS")
        .and_then(|s| s.parse::<u64>().ok())
        .unwrap_or(90_000)
        .clamp(200, 600_000)
}

#[derive(Debug, Clone)]
pub struct OpenAiBackend {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    service_tier: String,
    timeout_ms: u64,
}

impl OpenAiBackend {
    pub fn from_env(client: reqwest::Client) -> Result<Self> {
        let api_key = env("TADOKU_OPENAI_API_KEY")
            .or_else(|| env("OPENAI_API_KEY"))
            .ok_or_else(|| Error::Config("missing TADOKU_OPENAI_API_KEY".to_string()))?;
        let base_url =
            env("TADOKU_OPENAI_BASE_URL").unwrap_or_else(|| "https://api.openai.com".to_string());
        let model =
            env("TADOKU_OPENAI_MODEL").unwrap_or_else(|| DEFAULT_OPENAI_MODEL.to_string());
        let service_tier = env("TADOKU_OPENAI_SERVICE_TIER")
            .unwrap_or_else(|| DEFAULT_OPENAI_SERVICE_TIER.to_string());
        Ok(Self {
            client,
            base_url,
            api_key,
            model,
            service_tier,
            timeout_ms: openai_timeout_ms_from_env(),
        })
    }

    pub fn new(
        client: reqwest::Client,
        base_url: impl Into<String>,
        api_key: impl Into<String>,
        model: impl Into<String>,
        service_tier: impl Into<String>,
    ) -> Self {
        Self {
            client,
            base_url: base_url.into(),
            api_key: api_key.into(),
            model: model.into(),
            service_tier: service_tier.into(),
            timeout_ms: openai_timeout_ms_from_env(),
        }
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn service_tier(&self) -> &str {
        &self.service_tier
    }

    fn endpoint_chat_completions(&self) -> String {
        format!("{}/v1/chat/completions", self.base_url.trim_end_matches('/'))
    }

    /// The API spells the standard tier "default"; everything else runs
    /// on the discounted flex queue.
    fn wire_service_tier(&self) -> &'static str {
        if self.service_tier == "standard" {
            "default"
        } else {
            "flex"
        }
    }
}

#[async_trait::async_trait]
impl ModelBackend for OpenAiBackend {
    fn name(&self) -> &'static str {
        "openai"
    }

    async fn complete(&self, req: &ModelRequest) -> Result<ModelResponse> {
        let model = if req.options.model.is_empty() {
            self.model.clone()
        } else {
            req.options.model.clone()
        };
        let body = ChatCompletionsRequest {
            model,
            service_tier: self.wire_service_tier().to_string(),
            messages: vec![Message {
                role: "user".to_string(),
                content: req.prompt.clone(),
            }],
            temperature: req.options.temperature,
            max_tokens: req.options.max_tokens,
        };

        let resp = self
            .client
            .post(self.endpoint_chat_completions())
            .timeout(std::time::Duration::from_millis(self.timeout_ms))
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .header(
                reqwest::header::AUTHORIZATION,
                format!("Bearer {}", self.api_key),
            )
            .json(&body)
            .send()
            .await
            .map_err(|e| Error::Model(e.to_string()))?;

        let status = resp.status();
        let payload: serde_json::Value = resp.json().await.unwrap_or_default();
        if !status.is_success() {
            let detail = payload
                .get("error")
                .and_then(|e| e.get("message"))
                .and_then(serde_json::Value::as_str)
                .unwrap_or("request failed");
            return Err(Error::Model(format!("openai HTTP {status}: {detail}")));
        }

        let parsed: ChatCompletionsResponse =
            serde_json::from_value(payload).map_err(|e| Error::Model(e.to_string()))?;
        let text = parsed
            .choices
            .first()
            .map(|c| c.message.content.joined_text())
            .unwrap_or_default();
        if text.trim().is_empty() {
            return Err(Error::Model("openai returned an empty response".to_string()));
        }

        Ok(ModelResponse {
            text,
            usage_tokens: parsed.usage.map(|u| u.total()),
        })
    }
}

#[derive(Debug, Clone, Serialize)]
struct ChatCompletionsRequest {
    model: String,
    service_tier: String,
    messages: Vec<Message>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

#[derive(Debug, Clone, Serialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Clone, Deserialize)]
struct ChatCompletionsResponse {
    #[serde(default)]
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Clone, Deserialize)]
struct Choice {
    message: ChoiceMessage,
}

#[derive(Debug, Clone, Deserialize)]
struct ChoiceMessage {
    content: MessageContent,
}

/// Some gateways return content as a string, others as a parts array.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
enum MessageContent {
    Text(String),
    Parts(Vec<ContentPart>),
}

impl MessageContent {
    fn joined_text(&self) -> String {
        match self {
            MessageContent::Text(text) => text.clone(),
            MessageContent::Parts(parts) => parts
                .iter()
                .map(|p| p.text.as_str())
                .filter(|t| !t.is_empty())
                .collect::<Vec<_>>()
                .join("\n"),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
struct ContentPart {
    #[serde(default)]
    text: String,
}

#[derive(Debug, Clone, Deserialize)]
struct Usage {
    #[serde(default)]
    prompt_tokens: Option<u64>,
    #[serde(default)]
    input_tokens: Option<u64>,
    #[serde(default)]
    completion_tokens: Option<u64>,
    #[serde(default)]
    output_tokens: Option<u64>,
    #[serde(default)]
    total_tokens: Option<u64>,
}

impl Usage {
    fn total(&self) -> u64 {
        self.total_tokens.unwrap_or_else(|| {
            self.prompt_tokens.or(self.input_tokens).unwrap_or(0)
                + self.completion_tokens.or(self.output_tokens).unwrap_or(0)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::post, Json, Router};
    use std::net::SocketAddr;
    use tadoku_core::ModelOptions;

    async fn serve(app: Router) -> SocketAddr {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.expect("axum serve");
        });
        addr
    }

    fn request(prompt: &str) -> ModelRequest {
        ModelRequest {
            prompt: prompt.to_string(),
            options: ModelOptions::default(),
        }
    }

    #[tokio::test]
    async fn completes_and_reports_usage() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|Json(body): Json<serde_json::Value>| async move {
                assert_eq!(body["model"], "test-model");
                assert_eq!(body["service_tier"], "flex");
                assert_eq!(body["messages"][0]["role"], "user");
                Json(serde_json::json!({
                    "choices": [{"message": {"role": "assistant", "content": "{\"results\": []}"}}],
                    "usage": {"prompt_tokens": 10, "completion_tokens": 5, "total_tokens": 15}
                }))
            }),
        );
        let addr = serve(app).await;

        let backend = OpenAiBackend::new(
            reqwest::Client::new(),
            format!("http://{addr}"),
            "test-key",
            "test-model",
            "flex",
        );
        let resp = backend.complete(&request("hello")).await.unwrap();
        assert_eq!(resp.text, "{\"results\": []}");
        assert_eq!(resp.usage_tokens, Some(15));
    }

    #[tokio::test]
    async fn parts_content_is_joined() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                Json(serde_json::json!({
                    "choices": [{"message": {"content": [
                        {"type": "text", "text": "line one"},
                        {"type": "text", "text": "line two"}
                    ]}}]
                }))
            }),
        );
        let addr = serve(app).await;

        let backend = OpenAiBackend::new(
            reqwest::Client::new(),
            format!("http://{addr}"),
            "k",
            "m",
            "standard",
        );
        let resp = backend.complete(&request("p")).await.unwrap();
        assert_eq!(resp.text, "line one\nline two");
    }

    #[tokio::test]
    async fn api_error_surfaces_detail() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                (
                    axum::http::StatusCode::UNAUTHORIZED,
                    Json(serde_json::json!({"error": {"message": "bad key"}})),
                )
            }),
        );
        let addr = serve(app).await;

        let backend =
            OpenAiBackend::new(reqwest::Client::new(), format!("http://{addr}"), "k", "m", "flex");
        let err = backend.complete(&request("p")).await.unwrap_err();
        let text = err.to_string();
        assert!(text.contains("401"));
        assert!(text.contains("bad key"));
    }

    #[tokio::test]
    async fn empty_content_is_an_error() {
        let app = Router::new().route(
            "/v1/chat/completions",
            post(|| async {
                Json(serde_json::json!({
                    "choices": [{"message": {"content": "   "}}]
                }))
            }),
        );
        let addr = serve(app).await;

        let backend =
            OpenAiBackend::new(reqwest::Client::new(), format!("http://{addr}"), "k", "m", "flex");
        let err = backend.complete(&request("p")).await.unwrap_err();
        assert!(matches!(err, Error::Model(_)));
    }
}
