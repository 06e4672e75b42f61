//! Post content generation
//!
//! The execution loop asks a [`ContentGenerator`] for post text at publish
//! time. Production uses [`LlmGenerator`] against an OpenAI-compatible chat
//! completions endpoint with a persona prompt; tests substitute a canned
//! implementation.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset};
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

use crate::config::GeneratorConfig;
use crate::utils::retry::RetryClass;
use crate::utils::truncate_post;

/// Errors from content generation
#[derive(Error, Debug)]
pub enum GenerationError {
    /// Network or protocol failure reaching the endpoint
    #[error("Generation transport error: {0}")]
    Transport(#[from] reqwest::Error),

    /// 5xx from the endpoint
    #[error("Generation endpoint unavailable: HTTP {0}")]
    Unavailable(u16),

    /// 429 with an optional Retry-After hint
    #[error("Generation rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// The endpoint refused the request or filtered the output
    #[error("Content rejected: {0}")]
    Rejected(String),

    /// The endpoint answered with no usable text
    #[error("Empty generation response")]
    Empty,
}

impl GenerationError {
    /// Map onto the shared retry classification
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Transport(_) | Self::Unavailable(_) | Self::Empty => RetryClass::Retriable,
            Self::RateLimited { retry_after } => match retry_after {
                Some(delay) => RetryClass::RetriableAfter(*delay),
                None => RetryClass::Retriable,
            },
            Self::Rejected(_) => RetryClass::Fatal,
        }
    }
}

/// Inputs available when generating a post
#[derive(Debug, Clone)]
pub struct GenerationContext {
    /// Local time the post will go out
    pub now: DateTime<FixedOffset>,

    /// Whether the slot lies in the high-engagement range
    pub prime: bool,
}

/// Source of post text
#[async_trait]
pub trait ContentGenerator: Send + Sync {
    async fn generate(&self, ctx: &GenerationContext) -> Result<String, GenerationError>;
}

#[derive(Debug, Serialize)]
struct ChatRequest {
    model: String,
    messages: Vec<ChatMessage>,
    temperature: f32,
    max_tokens: u32,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    #[serde(default)]
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
    #[serde(default)]
    finish_reason: Option<String>,
}

/// OpenAI-compatible chat completion generator
pub struct LlmGenerator {
    client: Client,
    config: GeneratorConfig,
}

impl LlmGenerator {
    pub fn new(config: GeneratorConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!config.api_key.is_empty(), "Generator API key is not set");

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    fn build_system_prompt(&self) -> String {
        let interests = self.config.persona_interests.join(", ");
        format!(
            "You are {name}, posting a short social media update in your own voice. \
             Your interests: {interests}. \
             Write a single post of at most {max} characters. \
             No hashtag spam, no quotation marks around the post, no preamble.",
            name = self.config.persona_name,
            interests = interests,
            max = self.config.max_post_chars,
        )
    }

    fn build_user_prompt(&self, ctx: &GenerationContext) -> String {
        let mood = if ctx.prime {
            "It is peak evening hours, write something engaging"
        } else {
            "It is a quiet hour, write something casual"
        };
        format!(
            "{mood}. Local time is {}.",
            ctx.now.format("%A %H:%M")
        )
    }
}

#[async_trait]
impl ContentGenerator for LlmGenerator {
    async fn generate(&self, ctx: &GenerationContext) -> Result<String, GenerationError> {
        let url = format!("{}/chat/completions", self.config.endpoint);

        let request = ChatRequest {
            model: self.config.model.clone(),
            messages: vec![
                ChatMessage {
                    role: "system".to_string(),
                    content: self.build_system_prompt(),
                },
                ChatMessage {
                    role: "user".to_string(),
                    content: self.build_user_prompt(ctx),
                },
            ],
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        };

        let response = self
            .client
            .post(&url)
            .bearer_auth(&self.config.api_key)
            .json(&request)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            if status == StatusCode::TOO_MANY_REQUESTS {
                let retry_after = response
                    .headers()
                    .get(reqwest::header::RETRY_AFTER)
                    .and_then(|v| v.to_str().ok())
                    .and_then(|s| s.parse::<u64>().ok())
                    .map(Duration::from_secs);
                return Err(GenerationError::RateLimited { retry_after });
            }
            if status.is_server_error() {
                return Err(GenerationError::Unavailable(status.as_u16()));
            }
            let body = response.text().await.unwrap_or_default();
            return Err(GenerationError::Rejected(format!("{status} - {body}")));
        }

        let parsed: ChatResponse = response.json().await?;
        let choice = parsed.choices.into_iter().next().ok_or(GenerationError::Empty)?;

        if choice.finish_reason.as_deref() == Some("content_filter") {
            return Err(GenerationError::Rejected("content filtered".to_string()));
        }

        let text = choice.message.content.trim().to_string();
        if text.is_empty() {
            return Err(GenerationError::Empty);
        }

        Ok(truncate_post(&text, self.config.max_post_chars))
    }
}
