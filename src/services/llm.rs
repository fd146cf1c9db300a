use crate::core::config::Config;
use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::warn;
use serde::{Deserialize, Serialize};
use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct LlmConfig {
    pub provider: String, // "gemini", "ollama" or "openai"
    #[serde(default = "default_retry_count")]
    pub retry_count: usize,
    #[serde(default = "default_retry_delay")]
    pub retry_delay_seconds: u64,
    pub gemini: Option<GeminiConfig>,
    pub ollama: Option<OllamaConfig>,
    pub openai: Option<OpenAIConfig>,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct GeminiConfig {
    pub api_key: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OllamaConfig {
    pub base_url: String,
    pub model: String,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct OpenAIConfig {
    pub api_key: String,
    pub model: String,
    pub base_url: Option<String>,
}

fn default_retry_count() -> usize {
    3
}
fn default_retry_delay() -> u64 {
    10
}

/// A chat-style model that answers with JSON text.
#[async_trait]
pub trait LlmClient: Send + Sync + Debug {
    async fn chat(&self, system: &str, user: &str) -> Result<String>;
}

pub fn create_llm(config: &Config) -> Result<Arc<dyn LlmClient>> {
    let llm = &config.llm;
    let inner: Box<dyn LlmClient> = match llm.provider.as_str() {
        "gemini" => {
            let cfg = llm.gemini.as_ref().context("Gemini config missing")?;
            Box::new(GeminiClient::new(&cfg.api_key, &cfg.model))
        }
        "ollama" => {
            let cfg = llm.ollama.as_ref().context("Ollama config missing")?;
            Box::new(OllamaClient::new(&cfg.base_url, &cfg.model))
        }
        "openai" => {
            let cfg = llm.openai.as_ref().context("OpenAI config missing")?;
            Box::new(OpenAIClient::new(
                &cfg.api_key,
                &cfg.model,
                cfg.base_url.as_deref(),
            ))
        }
        _ => return Err(anyhow!("Unknown LLM provider: {}", llm.provider)),
    };

    Ok(Arc::new(RetryingLlm::new(
        inner,
        llm.retry_count,
        Duration::from_secs(llm.retry_delay_seconds),
    )))
}

// --- Retry ---

/// Retries failed calls of the wrapped client. The pipeline itself never
/// retries, so transient model errors are absorbed here or not at all.
#[derive(Debug)]
pub struct RetryingLlm {
    inner: Box<dyn LlmClient>,
    retries: usize,
    delay: Duration,
}

impl RetryingLlm {
    pub fn new(inner: Box<dyn LlmClient>, retries: usize, delay: Duration) -> Self {
        Self {
            inner,
            retries,
            delay,
        }
    }
}

#[async_trait]
impl LlmClient for RetryingLlm {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let mut attempt = 0;
        loop {
            match self.inner.chat(system, user).await {
                Ok(text) => return Ok(text),
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        "LLM call failed (attempt {}/{}): {:#}. Retrying in {:?}",
                        attempt,
                        self.retries + 1,
                        e,
                        self.delay
                    );
                    tokio::time::sleep(self.delay).await;
                }
                Err(e) => {
                    return Err(e.context(format!("LLM call failed after {} attempts", attempt + 1)))
                }
            }
        }
    }
}

// --- Gemini ---
#[derive(Debug)]
struct GeminiClient {
    api_key: String,
    model: String,
    client: reqwest::Client,
}

impl GeminiClient {
    fn new(api_key: &str, model: &str) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiRequest {
    contents: Vec<GeminiContent>,
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<GeminiSystemInstruction>,
    generation_config: GeminiGenerationConfig,
}

#[derive(Serialize)]
struct GeminiContent {
    role: String,
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiSystemInstruction {
    parts: Vec<GeminiPart>,
}

#[derive(Serialize)]
struct GeminiPart {
    text: String,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct GeminiGenerationConfig {
    response_mime_type: String,
}

#[derive(Deserialize)]
struct GeminiResponse {
    candidates: Option<Vec<GeminiCandidate>>,
    error: Option<GeminiError>,
}

#[derive(Deserialize)]
struct GeminiCandidate {
    content: Option<GeminiContentResponse>,
    #[serde(rename = "finishReason")]
    finish_reason: Option<String>,
}

#[derive(Deserialize)]
struct GeminiContentResponse {
    #[serde(default)]
    parts: Vec<GeminiPartResponse>,
}

#[derive(Deserialize)]
struct GeminiPartResponse {
    #[serde(default)]
    text: String,
}

#[derive(Deserialize, Debug)]
struct GeminiError {
    message: String,
}

impl GeminiResponse {
    fn into_text(self) -> Result<String> {
        if let Some(err) = self.error {
            return Err(anyhow!("Gemini API returned error: {}", err.message));
        }

        let first = self
            .candidates
            .and_then(|c| c.into_iter().next())
            .ok_or_else(|| anyhow!("Gemini response has no candidates"))?;

        let text: String = first
            .content
            .map(|c| c.parts.into_iter().map(|p| p.text).collect())
            .unwrap_or_default();

        if text.is_empty() {
            let reason = first.finish_reason.as_deref().unwrap_or("UNKNOWN");
            return Err(anyhow!("Gemini response empty. Finish reason: {}", reason));
        }
        Ok(text)
    }
}

#[async_trait]
impl LlmClient for GeminiClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = gemini_url(&self.model, "generateContent", &self.api_key)?;

        let request_body = GeminiRequest {
            contents: vec![GeminiContent {
                role: "user".to_string(),
                parts: vec![GeminiPart {
                    text: user.to_string(),
                }],
            }],
            system_instruction: Some(GeminiSystemInstruction {
                parts: vec![GeminiPart {
                    text: system.to_string(),
                }],
            }),
            generation_config: GeminiGenerationConfig {
                response_mime_type: "application/json".to_string(),
            },
        };

        let resp = self.client.post(url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Gemini API error: {}", error_text));
        }

        let response_text = resp.text().await?;
        let result: GeminiResponse = serde_json::from_str(&response_text).with_context(|| {
            format!("Failed to parse Gemini response. Body: {}", response_text)
        })?;
        result.into_text()
    }
}

/// Builds a `generativelanguage.googleapis.com` model endpoint URL.
pub(crate) fn gemini_url(model: &str, method: &str, api_key: &str) -> Result<url::Url> {
    let base = format!(
        "https://generativelanguage.googleapis.com/v1beta/models/{}:{}",
        model, method
    );
    url::Url::parse_with_params(&base, &[("key", api_key)])
        .with_context(|| format!("Invalid Gemini model name: {}", model))
}

// --- Ollama ---
#[derive(Debug)]
struct OllamaClient {
    base_url: String,
    model: String,
    client: reqwest::Client,
}

impl OllamaClient {
    fn new(base_url: &str, model: &str) -> Self {
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            model: model.to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OllamaRequest {
    model: String,
    messages: Vec<ChatMessage>,
    stream: bool,
    format: String,
}

#[derive(Serialize)]
struct ChatMessage {
    role: String,
    content: String,
}

impl ChatMessage {
    fn pair(system: &str, user: &str) -> Vec<ChatMessage> {
        vec![
            ChatMessage {
                role: "system".to_string(),
                content: system.to_string(),
            },
            ChatMessage {
                role: "user".to_string(),
                content: user.to_string(),
            },
        ]
    }
}

#[derive(Deserialize)]
struct OllamaResponse {
    message: OllamaMessageResponse,
}

#[derive(Deserialize)]
struct OllamaMessageResponse {
    content: String,
}

#[async_trait]
impl LlmClient for OllamaClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/api/chat", self.base_url);

        let request_body = OllamaRequest {
            model: self.model.clone(),
            messages: ChatMessage::pair(system, user),
            stream: false,
            format: "json".to_string(),
        };

        let resp = self.client.post(&url).json(&request_body).send().await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("Ollama API error: {}", error_text));
        }

        let result: OllamaResponse = resp.json().await?;
        Ok(result.message.content)
    }
}

// --- OpenAI ---

#[derive(Debug)]
struct OpenAIClient {
    api_key: String,
    model: String,
    base_url: String,
    client: reqwest::Client,
}

impl OpenAIClient {
    fn new(api_key: &str, model: &str, base_url: Option<&str>) -> Self {
        Self {
            api_key: api_key.to_string(),
            model: model.to_string(),
            base_url: base_url
                .unwrap_or("https://api.openai.com/v1")
                .trim_end_matches('/')
                .to_string(),
            client: reqwest::Client::new(),
        }
    }
}

#[derive(Serialize)]
struct OpenAIRequest {
    model: String,
    messages: Vec<ChatMessage>,
}

#[derive(Deserialize)]
struct OpenAIResponse {
    choices: Vec<OpenAIChoice>,
}

#[derive(Deserialize)]
struct OpenAIChoice {
    message: OpenAIMessageResponse,
}

#[derive(Deserialize)]
struct OpenAIMessageResponse {
    content: Option<String>,
}

#[async_trait]
impl LlmClient for OpenAIClient {
    async fn chat(&self, system: &str, user: &str) -> Result<String> {
        let url = format!("{}/chat/completions", self.base_url);

        let request_body = OpenAIRequest {
            model: self.model.clone(),
            messages: ChatMessage::pair(system, user),
        };

        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&request_body)
            .send()
            .await?;

        if !resp.status().is_success() {
            let error_text = resp.text().await?;
            return Err(anyhow!("OpenAI API error: {}", error_text));
        }

        let result: OpenAIResponse = resp.json().await?;
        result
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or_else(|| anyhow!("OpenAI response empty or missing content"))
    }
}
