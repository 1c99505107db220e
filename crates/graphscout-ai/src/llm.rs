//! Generative model providers behind one narrow [`Completion`] interface.
//!
//! Anthropic speaks its own Messages API; OpenAI and Qwen (DashScope's
//! compatible mode) share the chat-completions shape.

use std::sync::Arc;

use async_trait::async_trait;
use graphscout_core::{LlmProvider, LlmSettings};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

const ANTHROPIC_VERSION: &str = "2023-06-01";

#[derive(Error, Debug)]
pub enum LlmError {
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("{provider} returned {status}: {body}")]
    Provider {
        provider: &'static str,
        status: u16,
        body: String,
    },
    #[error("model returned an empty completion")]
    EmptyCompletion,
}

/// One prompt/response exchange.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerateRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

#[async_trait]
pub trait Completion: Send + Sync {
    /// Model identifier, for logs.
    fn model(&self) -> &str;

    /// Return the model's text answer to `request`.
    async fn complete(&self, request: &GenerateRequest) -> Result<String, LlmError>;
}

/// Build the configured provider, or `None` when no api key is set.
pub fn from_settings(settings: &LlmSettings) -> Result<Option<Arc<dyn Completion>>, LlmError> {
    let Some(api_key) = settings.credential() else {
        warn!(provider = settings.provider.as_str(), "no LLM api key, generative paths disabled");
        return Ok(None);
    };
    let client = reqwest::Client::builder().timeout(settings.timeout).build()?;
    let model = settings.model().to_string();
    let base_url = settings.base_url().to_string();
    info!(provider = settings.provider.as_str(), model = %model, "LLM provider configured");

    let completion: Arc<dyn Completion> = match settings.provider {
        LlmProvider::Anthropic => Arc::new(AnthropicClient {
            client,
            base_url,
            api_key: api_key.to_string(),
            model,
        }),
        LlmProvider::OpenAi | LlmProvider::Qwen => Arc::new(OpenAiCompatibleClient {
            client,
            provider: settings.provider.as_str(),
            base_url,
            api_key: api_key.to_string(),
            model,
        }),
    };
    Ok(Some(completion))
}

// ── Anthropic ──

#[derive(Serialize)]
struct MessagesBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    system: Option<&'a str>,
    messages: [ChatMessage<'a>; 1],
}

#[derive(Serialize)]
struct ChatMessage<'a> {
    role: &'a str,
    content: &'a str,
}

#[derive(Deserialize)]
struct MessagesResponse {
    #[serde(default)]
    content: Vec<ContentBlock>,
}

#[derive(Deserialize)]
struct ContentBlock {
    #[serde(rename = "type")]
    kind: String,
    #[serde(default)]
    text: String,
}

pub struct AnthropicClient {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
}

#[async_trait]
impl Completion for AnthropicClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let url = format!("{}/v1/messages", self.base_url);
        let body = MessagesBody {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            system: request.system_prompt.as_deref(),
            messages: [ChatMessage {
                role: "user",
                content: &request.user_prompt,
            }],
        };

        debug!(model = %self.model, "requesting anthropic completion");
        let resp = self
            .client
            .post(&url)
            .header("x-api-key", &self.api_key)
            .header("anthropic-version", ANTHROPIC_VERSION)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                provider: "anthropic",
                status: status.as_u16(),
                body,
            });
        }

        let parsed: MessagesResponse = resp.json().await?;
        let text: String = parsed
            .content
            .into_iter()
            .filter(|b| b.kind == "text")
            .map(|b| b.text)
            .collect();
        non_empty(text)
    }
}

// ── OpenAI-compatible ──

#[derive(Serialize)]
struct ChatBody<'a> {
    model: &'a str,
    max_tokens: u32,
    temperature: f32,
    messages: Vec<ChatMessage<'a>>,
}

#[derive(Deserialize)]
struct ChatResponse {
    #[serde(default)]
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

pub struct OpenAiCompatibleClient {
    client: reqwest::Client,
    provider: &'static str,
    base_url: String,
    api_key: String,
    model: String,
}

#[async_trait]
impl Completion for OpenAiCompatibleClient {
    fn model(&self) -> &str {
        &self.model
    }

    async fn complete(&self, request: &GenerateRequest) -> Result<String, LlmError> {
        let url = format!("{}/chat/completions", self.base_url);
        let mut messages = Vec::with_capacity(2);
        if let Some(system) = request.system_prompt.as_deref() {
            messages.push(ChatMessage {
                role: "system",
                content: system,
            });
        }
        messages.push(ChatMessage {
            role: "user",
            content: &request.user_prompt,
        });
        let body = ChatBody {
            model: &self.model,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
            messages,
        };

        debug!(provider = self.provider, model = %self.model, "requesting chat completion");
        let resp = self
            .client
            .post(&url)
            .bearer_auth(&self.api_key)
            .json(&body)
            .send()
            .await?;
        let status = resp.status();
        if !status.is_success() {
            let body = resp.text().await.unwrap_or_default();
            return Err(LlmError::Provider {
                provider: self.provider,
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = resp.json().await?;
        let text = parsed
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.message.content)
            .unwrap_or_default();
        non_empty(text)
    }
}

fn non_empty(text: String) -> Result<String, LlmError> {
    if text.trim().is_empty() {
        Err(LlmError::EmptyCompletion)
    } else {
        Ok(text)
    }
}
