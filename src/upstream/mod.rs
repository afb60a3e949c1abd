//! Interfaces of the upstream services guarded by Tollgate.
//!
//! Only the call shapes live here. Real clients for the image store and the
//! generation service are provided by the embedding application.

mod error;

pub use error::{UpstreamError, UpstreamErrorKind, TRANSIENT_NETWORK_CODES, TRANSIENT_STATUSES};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// An image stored by the image store.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredImage {
    /// Public URL of the image
    pub url: String,
    /// Store-specific identifier used to destroy the image
    pub id: String,
}

/// Result of destroying an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DestroyOutcome {
    Ok,
    NotFound,
}

/// Object storage with image transforms.
#[async_trait]
pub trait ImageStore: Send + Sync {
    /// Upload an image, returning where it is stored.
    async fn upload(&self, payload: Vec<u8>) -> Result<StoredImage, UpstreamError>;

    /// Delete an image by id.
    async fn destroy(&self, id: &str) -> Result<DestroyOutcome, UpstreamError>;

    /// List stored images matching a query expression.
    async fn search(&self, query: &str) -> Result<Vec<StoredImage>, UpstreamError>;
}

/// Author of a chat message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

/// One message of a chat completion request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: Role,
    pub content: String,
}

impl ChatMessage {
    /// A system instruction.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: Role::System,
            content: content.into(),
        }
    }

    /// A user message.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
        }
    }
}

/// Sampling parameters for a chat completion.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelParams {
    pub model: String,
    pub max_tokens: u32,
    #[serde(default)]
    pub temperature: Option<f32>,
}

/// Language/vision model service.
#[async_trait]
pub trait GenerationService: Send + Sync {
    /// Run a chat completion and return the generated text.
    async fn chat(&self, messages: &[ChatMessage], params: &ModelParams) -> Result<String, UpstreamError>;

    /// Generate an image from a prompt, returning its URL.
    async fn generate_image(&self, prompt: &str) -> Result<String, UpstreamError>;
}
