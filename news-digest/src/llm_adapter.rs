use async_trait::async_trait;
use backoff::{backoff::Backoff, exponential::ExponentialBackoff};
use interfaces::ReasoningService;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::types::{DigestError, Result};

pub const GEMINI_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

#[derive(Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: String,
    pub timeout_seconds: u64,
    pub max_retries: u32,
    pub retry_delay_ms: u64,
}

impl std::fmt::Debug for GeminiConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GeminiConfig")
            .field("api_key", &"***")
            .field("model", &self.model)
            .field("base_url", &self.base_url)
            .field("timeout_seconds", &self.timeout_seconds)
            .field("max_retries", &self.max_retries)
            .finish()
    }
}

impl GeminiConfig {
    pub fn new(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            model: model.into(),
            base_url: GEMINI_BASE_URL.to_string(),
            timeout_seconds: 60,
            max_retries: 2,
            retry_delay_ms: 1000,
        }
    }

    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    pub fn with_retry_delay_ms(mut self, retry_delay_ms: u64) -> Self {
        self.retry_delay_ms = retry_delay_ms;
        self
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateRequest<'a> {
    contents: Vec<Content<'a>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    generation_config: Option<GenerationConfig>,
}

#[derive(Serialize)]
struct Content<'a> {
    parts: Vec<Part<'a>>,
}

#[derive(Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Deserialize)]
struct GenerateResponse {
    #[serde(default)]
    candidates: Vec<ResponseCandidate>,
}

#[derive(Deserialize)]
struct ResponseCandidate {
    content: Option<ResponseContent>,
}

#[derive(Deserialize)]
struct ResponseContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Deserialize)]
struct ResponsePart {
    #[serde(default)]
    text: String,
}

/// Reasoning service backed by the Gemini `generateContent` endpoint.
/// Rate limiting and server errors are retried with exponential backoff;
/// anything else fails the call immediately.
pub struct GeminiAdapter {
    client: Client,
    config: GeminiConfig,
}

impl GeminiAdapter {
    pub fn new(config: GeminiConfig) -> Result<Self> {
        if config.api_key.trim().is_empty() {
            return Err(DigestError::Config("GEMINI_API_KEY is not set".to_string()));
        }
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .build()?;
        Ok(Self { client, config })
    }

    fn endpoint(&self) -> String {
        format!(
            "{}/models/{}:generateContent",
            self.config.base_url.trim_end_matches('/'),
            self.config.model
        )
    }

    async fn call(&self, prompt: &str, json_mode: bool) -> Result<String> {
        let request = GenerateRequest {
            contents: vec![Content {
                parts: vec![Part { text: prompt }],
            }],
            generation_config: json_mode.then_some(GenerationConfig {
                response_mime_type: "application/json",
            }),
        };

        let initial = Duration::from_millis(self.config.retry_delay_ms);
        let mut backoff: ExponentialBackoff<backoff::SystemClock> = ExponentialBackoff {
            current_interval: initial,
            initial_interval: initial,
            max_interval: initial * 16,
            multiplier: 2.0,
            max_elapsed_time: Some(initial * 60),
            ..Default::default()
        };

        let mut attempt = 0;
        loop {
            let sent = self
                .client
                .post(self.endpoint())
                .header("x-goog-api-key", &self.config.api_key)
                .json(&request)
                .send()
                .await;

            let response = match sent {
                Ok(response) => response,
                Err(e) if (e.is_connect() || e.is_timeout()) && attempt < self.config.max_retries => {
                    match backoff.next_backoff() {
                        Some(delay) => {
                            attempt += 1;
                            warn!("Gemini unreachable (attempt {}), retrying in {:?}: {}", attempt, delay, e);
                            tokio::time::sleep(delay).await;
                            continue;
                        }
                        None => return Err(e.into()),
                    }
                }
                Err(e) => return Err(e.into()),
            };

            let status = response.status();
            if status.is_success() {
                let body: GenerateResponse = response.json().await?;
                return extract_text(body);
            }

            let retryable = status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error();
            if retryable && attempt < self.config.max_retries {
                if let Some(delay) = backoff.next_backoff() {
                    attempt += 1;
                    warn!(
                        "Gemini returned {} (attempt {}), retrying in {:?}",
                        status, attempt, delay
                    );
                    tokio::time::sleep(delay).await;
                    continue;
                }
            }

            let detail = response.text().await.unwrap_or_default();
            return Err(DigestError::Reasoning(format!(
                "Gemini returned {}: {}",
                status,
                detail.chars().take(200).collect::<String>()
            )));
        }
    }
}

fn extract_text(body: GenerateResponse) -> Result<String> {
    let text: String = body
        .candidates
        .into_iter()
        .next()
        .and_then(|candidate| candidate.content)
        .map(|content| content.parts.into_iter().map(|part| part.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return Err(DigestError::Reasoning("Gemini returned no text".to_string()));
    }
    Ok(text)
}

#[async_trait]
impl ReasoningService for GeminiAdapter {
    fn name(&self) -> String {
        format!("Gemini ({})", self.config.model)
    }

    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        debug!("Gemini text request ({} chars)", prompt.len());
        Ok(self.call(prompt, false).await?)
    }

    async fn generate_json(&self, prompt: &str) -> anyhow::Result<String> {
        debug!("Gemini JSON request ({} chars)", prompt.len());
        Ok(self.call(prompt, true).await?)
    }
}

type Scripted = std::result::Result<String, String>;

/// Scripted reasoning service for development and testing. Queued answers
/// are handed out in order; once a queue is empty the default answer is used.
pub struct MockLlmAdapter {
    name: String,
    text_responses: Mutex<VecDeque<Scripted>>,
    json_responses: Mutex<VecDeque<Scripted>>,
    default_text: String,
    default_json: String,
    prompts: Mutex<Vec<String>>,
}

impl MockLlmAdapter {
    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        Self {
            default_text: format!("## Mock analysis\n\nGenerated by {}.", name),
            default_json: "[]".to_string(),
            name,
            text_responses: Mutex::new(VecDeque::new()),
            json_responses: Mutex::new(VecDeque::new()),
            prompts: Mutex::new(Vec::new()),
        }
    }

    pub fn with_text_response(self, text: impl Into<String>) -> Self {
        push(&self.text_responses, Ok(text.into()));
        self
    }

    pub fn with_text_failure(self, message: impl Into<String>) -> Self {
        push(&self.text_responses, Err(message.into()));
        self
    }

    pub fn with_json_response(self, text: impl Into<String>) -> Self {
        push(&self.json_responses, Ok(text.into()));
        self
    }

    pub fn with_json_failure(self, message: impl Into<String>) -> Self {
        push(&self.json_responses, Err(message.into()));
        self
    }

    pub fn with_default_text(mut self, text: impl Into<String>) -> Self {
        self.default_text = text.into();
        self
    }

    /// Every prompt received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.lock().map(|p| p.clone()).unwrap_or_default()
    }

    async fn answer(&self, prompt: &str, queue: &Mutex<VecDeque<Scripted>>, default: &str) -> anyhow::Result<String> {
        if let Ok(mut prompts) = self.prompts.lock() {
            prompts.push(prompt.to_string());
        }

        let scripted = queue.lock().ok().and_then(|mut q| q.pop_front());
        match scripted {
            Some(Ok(text)) => Ok(text),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Ok(default.to_string()),
        }
    }
}

fn push(queue: &Mutex<VecDeque<Scripted>>, item: Scripted) {
    if let Ok(mut q) = queue.lock() {
        q.push_back(item);
    }
}

#[async_trait]
impl ReasoningService for MockLlmAdapter {
    fn name(&self) -> String {
        format!("Mock LLM Adapter ({})", self.name)
    }

    async fn generate(&self, prompt: &str) -> anyhow::Result<String> {
        self.answer(prompt, &self.text_responses, &self.default_text).await
    }

    async fn generate_json(&self, prompt: &str) -> anyhow::Result<String> {
        info!("Mock selection request handled by {}", self.name);
        self.answer(prompt, &self.json_responses, &self.default_json).await
    }
}
