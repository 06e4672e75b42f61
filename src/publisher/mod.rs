//! Platform publishing client
//!
//! Publishing to Threads is a two-phase exchange: create a media container,
//! then publish it. Both phases can fail independently; every failure is
//! classified as retriable or fatal so the execution loop's retry policy
//! never hammers an endpoint that already gave a definitive answer.

use async_trait::async_trait;
use reqwest::{Client, Response, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::config::ApiConfig;
use crate::utils::retry::RetryClass;

/// Platform identifier of a published post
pub type PostId = String;

/// Errors from the publishing API
#[derive(Error, Debug)]
pub enum PublishError {
    /// Transport failure: timeout, connect error, broken stream
    #[error("Publish transport error: {0}")]
    Http(#[from] reqwest::Error),

    /// 429 with an optional Retry-After hint
    #[error("Rate limited")]
    RateLimited { retry_after: Option<Duration> },

    /// 5xx server failure
    #[error("Server error: HTTP {0}")]
    Server(u16),

    /// 401 or 403; credentials are bad, retrying cannot help
    #[error("Authentication failed: HTTP {0}")]
    Auth(u16),

    /// Other 4xx; the platform refused this post
    #[error("Post rejected: HTTP {status}: {body}")]
    Rejected { status: u16, body: String },

    /// Successful status but the response carried no id
    #[error("Malformed publish response: {0}")]
    Malformed(String),
}

impl PublishError {
    /// Map onto the shared retry classification
    pub fn retry_class(&self) -> RetryClass {
        match self {
            Self::Http(_) | Self::Server(_) => RetryClass::Retriable,
            Self::RateLimited { retry_after } => match retry_after {
                Some(delay) => RetryClass::RetriableAfter(*delay),
                None => RetryClass::Retriable,
            },
            Self::Auth(_) | Self::Rejected { .. } | Self::Malformed(_) => RetryClass::Fatal,
        }
    }
}

/// Outbound posting surface
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `text` and return the platform post id
    async fn publish(&self, text: &str) -> Result<PostId, PublishError>;
}

#[derive(Debug, Deserialize)]
struct IdResponse {
    id: Option<String>,
}

/// Threads Graph API client
pub struct ThreadsClient {
    client: Client,
    config: ApiConfig,
}

impl ThreadsClient {
    pub fn new(config: ApiConfig) -> anyhow::Result<Self> {
        anyhow::ensure!(!config.access_token.is_empty(), "Access token is not set");

        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()?;

        Ok(Self { client, config })
    }

    /// Turn a non-success response into a classified error
    async fn classify(response: Response) -> PublishError {
        let status = response.status();

        if status == StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|s| s.parse::<u64>().ok())
                .map(Duration::from_secs);
            return PublishError::RateLimited { retry_after };
        }

        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return PublishError::Auth(status.as_u16());
        }

        if status.is_server_error() {
            return PublishError::Server(status.as_u16());
        }

        let body = response.text().await.unwrap_or_default();
        PublishError::Rejected {
            status: status.as_u16(),
            body,
        }
    }

    async fn extract_id(response: Response, phase: &str) -> Result<String, PublishError> {
        let parsed: IdResponse = response.json().await?;
        parsed
            .id
            .ok_or_else(|| PublishError::Malformed(format!("{phase} response has no id")))
    }

    /// Phase one: create a text media container
    async fn create_container(&self, text: &str) -> Result<String, PublishError> {
        let url = format!("{}/{}/threads", self.config.base_url, self.config.user_id);
        let response = self
            .client
            .post(&url)
            .query(&[
                ("media_type", "TEXT"),
                ("text", text),
                ("access_token", &self.config.access_token),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }
        Self::extract_id(response, "container").await
    }

    /// Phase two: publish the container
    async fn publish_container(&self, creation_id: &str) -> Result<PostId, PublishError> {
        let url = format!(
            "{}/{}/threads_publish",
            self.config.base_url, self.config.user_id
        );
        let response = self
            .client
            .post(&url)
            .query(&[
                ("creation_id", creation_id),
                ("access_token", &self.config.access_token),
            ])
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(Self::classify(response).await);
        }
        Self::extract_id(response, "publish").await
    }
}

#[async_trait]
impl Publisher for ThreadsClient {
    async fn publish(&self, text: &str) -> Result<PostId, PublishError> {
        let creation_id = self.create_container(text).await?;
        tracing::debug!(creation_id = %creation_id, "Media container created");

        let post_id = self.publish_container(&creation_id).await?;
        tracing::info!(post_id = %post_id, chars = text.chars().count(), "Post published");
        Ok(post_id)
    }
}
