//! Generative text API interaction.
//!
//! # Architecture
//!
//! - [`TextGenerator`]: the collaborator contract, one request in, free text out
//! - [`OpenAiClient`]: talks to any OpenAI-compatible `chat/completions` endpoint
//! - [`TimeoutGenerator`]: decorator that bounds any [`TextGenerator`] call
//!
//! Nothing here retries. A failed call surfaces to the stage that made it,
//! which decides whether the item is dropped or passed through.

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::BoxError;
use crate::config::AiModelParams;

/// One generation request: model parameters plus the two prompts.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationRequest {
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
    pub top_p: f32,
    pub frequency_penalty: f32,
    pub presence_penalty: f32,
    pub system_prompt: String,
    pub user_prompt: String,
}

impl GenerationRequest {
    pub fn new(params: &AiModelParams, system_prompt: String, user_prompt: String) -> Self {
        Self {
            model: params.model.clone(),
            temperature: params.temperature,
            max_tokens: params.max_tokens,
            top_p: params.top_p,
            frequency_penalty: params.frequency_penalty,
            presence_penalty: params.presence_penalty,
            system_prompt,
            user_prompt,
        }
    }
}

/// The generative text collaborator.
///
/// Implementations return the model's raw text; callers are expected to
/// pull JSON out of it with [`crate::extract`].
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<String, BoxError>;
}

#[derive(Debug, Error)]
pub enum GenerateError {
    #[error("generation timed out after {0:?}")]
    Timeout(Duration),
    #[error("generation endpoint returned {status}: {body}")]
    Status { status: u16, body: String },
    #[error("generation response contained no choices")]
    NoChoices,
}

/// Wrapper that bounds every call to the inner [`TextGenerator`].
pub struct TimeoutGenerator<T> {
    inner: T,
    limit: Duration,
}

impl<T> TimeoutGenerator<T> {
    pub fn new(inner: T, limit: Duration) -> Self {
        Self { inner, limit }
    }
}

impl<T> fmt::Debug for TimeoutGenerator<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TimeoutGenerator")
            .field("limit", &self.limit)
            .finish()
    }
}

#[async_trait]
impl<T> TextGenerator for TimeoutGenerator<T>
where
    T: TextGenerator,
{
    #[instrument(level = "debug", skip_all, fields(model = %request.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, BoxError> {
        let t0 = Instant::now();
        match tokio::time::timeout(self.limit, self.inner.generate(request)).await {
            Ok(res) => res,
            Err(_) => {
                warn!(
                    elapsed_ms = t0.elapsed().as_millis() as u64,
                    "generate() timed out"
                );
                Err(Box::new(GenerateError::Timeout(self.limit)))
            }
        }
    }
}

#[derive(Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<ChatMessage<'a>>,
    temperature: f32,
    max_tokens: u32,
    top_p: f32,
    frequency_penalty: f32,
    presence_penalty: f32,
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct ChatResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Deserialize)]
struct ChatChoice {
    message: ChatChoiceMessage,
}

#[derive(Deserialize)]
struct ChatChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Client for an OpenAI-compatible chat completions endpoint.
pub struct OpenAiClient {
    base_url: String,
    api_key: Option<String>,
    client: Client,
}

impl fmt::Debug for OpenAiClient {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OpenAiClient")
            .field("base_url", &self.base_url)
            .field("has_api_key", &self.api_key.is_some())
            .finish()
    }
}

impl OpenAiClient {
    pub fn new(base_url: &str, api_key: Option<String>, timeout: Duration) -> Result<Self, BoxError> {
        let client = Client::builder().timeout(timeout).build()?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            client,
        })
    }
}

#[async_trait]
impl TextGenerator for OpenAiClient {
    #[instrument(level = "info", skip_all, fields(model = %request.model))]
    async fn generate(&self, request: &GenerationRequest) -> Result<String, BoxError> {
        let t0 = Instant::now();
        let body = ChatRequest {
            model: &request.model,
            messages: vec![
                ChatMessage {
                    role: "system",
                    content: &request.system_prompt,
                },
                ChatMessage {
                    role: "user",
                    content: &request.user_prompt,
                },
            ],
            temperature: request.temperature,
            max_tokens: request.max_tokens,
            top_p: request.top_p,
            frequency_penalty: request.frequency_penalty,
            presence_penalty: request.presence_penalty,
        };

        let mut req = self
            .client
            .post(format!("{}/chat/completions", self.base_url))
            .json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        let res = req.send().await?;
        let status = res.status();
        if !status.is_success() {
            let body = res.text().await.unwrap_or_default();
            warn!(status = status.as_u16(), "Generation endpoint returned an error");
            return Err(Box::new(GenerateError::Status {
                status: status.as_u16(),
                body: crate::utils::truncate_for_log(&body, 300),
            }));
        }

        let parsed: ChatResponse = res.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .ok_or(GenerateError::NoChoices)?;

        info!(
            elapsed_ms = t0.elapsed().as_millis() as u64,
            bytes = text.len(),
            "Generation succeeded"
        );
        Ok(text)
    }
}
