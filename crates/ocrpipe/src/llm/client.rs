//! Blocking Ollama HTTP client.

use std::time::Duration;

use reqwest::blocking::Client;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::{GenerationService, LlmError, ModelInfo};
use crate::config::LlmConfig;
use crate::sanitize::{describe_text, redact_url};

/// Model pulls download gigabytes; they get their own ceiling.
const PULL_TIMEOUT: Duration = Duration::from_secs(60 * 60);

pub struct OllamaClient {
    endpoint: String,
    client: Client,
}

#[derive(Debug, Serialize)]
struct GenerateRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct GenerateResponse {
    response: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    stream: bool,
}

#[derive(Debug, Serialize)]
struct ChatMessage<'a> {
    role: &'static str,
    content: &'a str,
    images: &'a [String],
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    message: ChatResponseMessage,
}

#[derive(Debug, Deserialize)]
struct ChatResponseMessage {
    content: String,
}

#[derive(Debug, Serialize)]
struct PullRequest<'a> {
    model: &'a str,
    stream: bool,
}

#[derive(Debug, Deserialize)]
struct PullResponse {
    status: String,
}

#[derive(Debug, Deserialize)]
struct TagsResponse {
    models: Vec<ModelInfo>,
}

impl OllamaClient {
    pub fn new(config: &LlmConfig) -> Result<Self, LlmError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| LlmError::Connection(format!("Failed to create HTTP client: {}", e)))?;

        Ok(Self {
            endpoint: config.endpoint.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.endpoint, path)
    }

    fn post<B: Serialize, R: for<'de> Deserialize<'de>>(
        &self,
        path: &str,
        model: &str,
        body: &B,
        timeout: Option<Duration>,
    ) -> Result<R, LlmError> {
        let mut request = self.client.post(self.url(path)).json(body);
        if let Some(timeout) = timeout {
            request = request.timeout(timeout);
        }
        let resp = request.send().map_err(map_transport_error)?;
        let resp = check_status(resp, model)?;
        resp.json().map_err(|e| LlmError::Parse(e.to_string()))
    }
}

fn map_transport_error(e: reqwest::Error) -> LlmError {
    if e.is_timeout() {
        LlmError::Timeout(e.to_string())
    } else {
        LlmError::Connection(e.to_string())
    }
}

/// Turns non-2xx responses into errors; Ollama answers a missing model with
/// 404 and a "not found" body.
fn check_status(
    resp: reqwest::blocking::Response,
    model: &str,
) -> Result<reqwest::blocking::Response, LlmError> {
    let status = resp.status();
    if status.is_success() {
        return Ok(resp);
    }
    let body = resp.text().unwrap_or_default();
    Err(classify_failure(status, body, model))
}

fn classify_failure(status: StatusCode, body: String, model: &str) -> LlmError {
    if status == StatusCode::NOT_FOUND || body.contains("not found") {
        LlmError::ModelNotFound(model.to_string())
    } else {
        LlmError::Api {
            status: status.as_u16(),
            body,
        }
    }
}

impl GenerationService for OllamaClient {
    fn generate(&self, model: &str, prompt: &str) -> Result<String, LlmError> {
        debug!(model, prompt = %describe_text(prompt), "Generating");
        let resp: GenerateResponse = self.post(
            "/api/generate",
            model,
            &GenerateRequest {
                model,
                prompt,
                stream: false,
            },
            None,
        )?;
        Ok(resp.response)
    }

    fn describe_images(
        &self,
        model: &str,
        prompt: &str,
        images_base64: &[String],
    ) -> Result<String, LlmError> {
        debug!(model, images = images_base64.len(), "Vision chat");
        let resp: ChatResponse = self.post(
            "/api/chat",
            model,
            &ChatRequest {
                model,
                messages: vec![ChatMessage {
                    role: "user",
                    content: prompt,
                    images: images_base64,
                }],
                stream: false,
            },
            None,
        )?;
        Ok(resp.message.content)
    }

    fn list_models(&self) -> Result<Vec<ModelInfo>, LlmError> {
        let resp = self
            .client
            .get(self.url("/api/tags"))
            .send()
            .map_err(map_transport_error)?;
        let status = resp.status();
        if !status.is_success() {
            return Err(LlmError::Api {
                status: status.as_u16(),
                body: resp.text().unwrap_or_default(),
            });
        }
        let tags: TagsResponse = resp.json().map_err(|e| LlmError::Parse(e.to_string()))?;
        Ok(tags.models)
    }

    fn pull(&self, model: &str) -> Result<(), LlmError> {
        tracing::info!(
            model,
            endpoint = %redact_url(&self.endpoint),
            "Pulling model"
        );
        let resp: PullResponse = self
            .post(
                "/api/pull",
                model,
                &PullRequest {
                    model,
                    stream: false,
                },
                Some(PULL_TIMEOUT),
            )
            .map_err(|e| LlmError::PullFailed {
                model: model.to_string(),
                reason: e.to_string(),
            })?;

        if resp.status != "success" {
            return Err(LlmError::PullFailed {
                model: model.to_string(),
                reason: format!("unexpected status '{}'", resp.status),
            });
        }
        Ok(())
    }
}
