//! Nickname generation for uploaded images.
//!
//! A nickname takes two model calls: one describing the image, one turning
//! the description into a short name. Each call is retried on its own, and
//! the pair is cached per image URL.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, instrument};

use crate::guard::{Guard, GuardError, Guarded};
use crate::retry::Cancellation;
use crate::upstream::{ChatMessage, GenerationService, ModelParams, UpstreamError};

const SERVICE: &str = "generation";

const ANALYSIS_INSTRUCTIONS: &str = "Describe the image in a few sentences. Mention notable \
features, colours and mood that could inspire a nickname.";

const NICKNAME_INSTRUCTIONS: &str = "Invent a fun, memorable nickname of one to three words \
from the image description. It must be suitable for all audiences. Reply with the nickname only.";

/// Cache key for the nickname of an image.
pub fn cache_key(image_url: &str) -> String {
    format!("nickname:{}", image_url)
}

/// A generated nickname and the description it was derived from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Nickname {
    pub nickname: String,
    pub analysis: String,
}

/// Failure to produce a nickname or image.
#[derive(Debug, Error)]
pub enum NicknameError {
    /// The request itself was unusable
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Rate limiting, upstream failure or caller abort
    #[error(transparent)]
    Guard(#[from] GuardError<UpstreamError>),
}

impl NicknameError {
    /// HTTP status a caller would answer with.
    pub fn status_code(&self) -> u16 {
        match self {
            NicknameError::InvalidInput(_) => 400,
            NicknameError::Guard(err) => err.status_code(),
        }
    }
}

/// Model parameters for the two chat calls.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NicknameModels {
    pub analysis: ModelParams,
    pub nickname: ModelParams,
}

impl Default for NicknameModels {
    fn default() -> Self {
        Self {
            analysis: ModelParams {
                model: "gpt-4-turbo".to_string(),
                max_tokens: 150,
                temperature: None,
            },
            nickname: ModelParams {
                model: "gpt-4-turbo".to_string(),
                max_tokens: 50,
                temperature: Some(0.8),
            },
        }
    }
}

/// Produces nicknames for images through a [`GenerationService`].
pub struct NicknameService<G> {
    generator: Arc<G>,
    guard: Guard<Nickname>,
    models: NicknameModels,
}

impl<G: GenerationService> NicknameService<G> {
    /// Create a service with the default model parameters.
    pub fn new(generator: Arc<G>, guard: Guard<Nickname>) -> Self {
        Self::with_models(generator, guard, NicknameModels::default())
    }

    /// Create a service with explicit model parameters.
    pub fn with_models(generator: Arc<G>, guard: Guard<Nickname>, models: NicknameModels) -> Self {
        Self {
            generator,
            guard,
            models,
        }
    }

    /// Nickname for the image at `image_url`, from cache when possible.
    #[instrument(skip(self, cancellation), fields(client = %client_key))]
    pub async fn generate(
        &self,
        client_key: &str,
        image_url: &str,
        cancellation: &Cancellation,
    ) -> Result<Guarded<Nickname>, NicknameError> {
        let image_url = image_url.trim();
        if image_url.is_empty() {
            return Err(NicknameError::InvalidInput("no image URL provided".to_string()));
        }

        self.guard.admit::<UpstreamError>(client_key)?;

        let key = cache_key(image_url);
        if let Some(value) = self.guard.cache().get(&key) {
            return Ok(Guarded { value, cached: true });
        }

        let analysis = self
            .guard
            .retry(cancellation, || self.chat(&self.models.analysis, ANALYSIS_INSTRUCTIONS, image_url))
            .await?;

        let nickname = self
            .guard
            .retry(cancellation, || self.chat(&self.models.nickname, NICKNAME_INSTRUCTIONS, &analysis))
            .await?;

        let value = Nickname { nickname, analysis };
        self.guard.cache().set(key, value.clone());
        info!(nickname = %value.nickname, "Generated nickname");

        Ok(Guarded { value, cached: false })
    }

    /// Generate an image from a text prompt, returning its URL.
    ///
    /// Generated images are not cached: the same prompt is expected to yield
    /// a different image each time.
    #[instrument(skip(self, cancellation), fields(client = %client_key))]
    pub async fn generate_image(
        &self,
        client_key: &str,
        prompt: &str,
        cancellation: &Cancellation,
    ) -> Result<String, NicknameError> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(NicknameError::InvalidInput("no prompt provided".to_string()));
        }

        let url = self
            .guard
            .call_uncached(client_key, cancellation, || async move {
                match self.generator.generate_image(prompt).await {
                    Ok(url) if url.trim().is_empty() => Err(UpstreamError::empty(SERVICE, "no image URL returned")),
                    other => other,
                }
            })
            .await?;

        Ok(url)
    }

    /// Drop the cached nickname for an image.
    pub fn forget(&self, image_url: &str) -> bool {
        self.guard.cache().delete(&cache_key(image_url.trim()))
    }

    async fn chat(&self, params: &ModelParams, instructions: &str, input: &str) -> Result<String, UpstreamError> {
        let messages = [ChatMessage::system(instructions), ChatMessage::user(input)];
        let text = self.generator.chat(&messages, params).await?;
        let text = text.trim();
        if text.is_empty() {
            return Err(UpstreamError::empty(SERVICE, "model returned no content"));
        }
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::VecDeque;
    use std::time::Duration;

    use async_trait::async_trait;
    use parking_lot::Mutex;

    use crate::cache::TtlCache;
    use crate::ratelimit::SlidingWindowLimiter;
    use crate::retry::RetryPolicy;

    /// Replays scripted chat replies and records every request.
    struct ScriptedGenerator {
        replies: Mutex<VecDeque<Result<String, UpstreamError>>>,
        requests: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedGenerator {
        fn new(replies: Vec<Result<String, UpstreamError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                requests: Mutex::new(Vec::new()),
            })
        }

        fn request_count(&self) -> usize {
            self.requests.lock().len()
        }
    }

    #[async_trait]
    impl GenerationService for ScriptedGenerator {
        async fn chat(&self, messages: &[ChatMessage], _params: &ModelParams) -> Result<String, UpstreamError> {
            self.requests.lock().push(messages.to_vec());
            self.replies
                .lock()
                .pop_front()
                .unwrap_or_else(|| Err(UpstreamError::status(SERVICE, 500, "script exhausted")))
        }

        async fn generate_image(&self, prompt: &str) -> Result<String, UpstreamError> {
            Ok(format!("https://images.example/{}.png", prompt.replace(' ', "-")))
        }
    }

    fn service(generator: Arc<ScriptedGenerator>, max_requests: usize) -> NicknameService<ScriptedGenerator> {
        let limiter = Arc::new(SlidingWindowLimiter::new(Duration::from_secs(60), max_requests));
        let policy = RetryPolicy::new(3, Duration::from_millis(1), Duration::from_millis(4), 2.0);
        let guard = Guard::new(limiter, TtlCache::new(Duration::from_secs(3600)), policy);
        NicknameService::new(generator, guard)
    }

    #[tokio::test]
    async fn test_generate_and_cache() {
        let generator = ScriptedGenerator::new(vec![
            Ok("A golden retriever on a beach".to_string()),
            Ok("  Sandy Paws \n".to_string()),
        ]);
        let service = service(generator.clone(), 10);
        let cancel = Cancellation::none();

        let first = service.generate("ip1", "https://img/dog.png", &cancel).await.unwrap();
        assert!(!first.cached);
        assert_eq!(first.value.nickname, "Sandy Paws");
        assert_eq!(first.value.analysis, "A golden retriever on a beach");

        let second = service.generate("ip2", "https://img/dog.png", &cancel).await.unwrap();
        assert!(second.cached);
        assert_eq!(second.value, first.value);
        assert_eq!(generator.request_count(), 2);

        // The nickname request is built from the analysis.
        let requests = generator.requests.lock();
        assert_eq!(requests[0][1].content, "https://img/dog.png");
        assert_eq!(requests[1][1].content, "A golden retriever on a beach");
    }

    #[tokio::test]
    async fn test_each_step_is_retried_separately() {
        let generator = ScriptedGenerator::new(vec![
            Ok("A cat".to_string()),
            Err(UpstreamError::status(SERVICE, 429, "slow down")),
            Err(UpstreamError::network(SERVICE, "ECONNRESET", "reset")),
            Ok("Whiskers".to_string()),
        ]);
        let service = service(generator.clone(), 10);

        let result = service.generate("ip1", "https://img/cat.png", &Cancellation::none()).await.unwrap();
        assert_eq!(result.value.nickname, "Whiskers");
        // The analysis is not repeated when only the nickname step fails.
        assert_eq!(generator.request_count(), 4);
    }

    #[tokio::test]
    async fn test_bad_request_is_not_retried() {
        let generator = ScriptedGenerator::new(vec![Err(UpstreamError::status(SERVICE, 400, "bad url"))]);
        let service = service(generator.clone(), 10);

        let err = service.generate("ip1", "not-a-url", &Cancellation::none()).await.unwrap_err();
        assert_eq!(err.status_code(), 400);
        assert_eq!(generator.request_count(), 1);
        assert!(!service.forget("not-a-url"));
    }

    #[tokio::test]
    async fn test_empty_model_output_fails() {
        let generator = ScriptedGenerator::new(vec![Ok("   ".to_string())]);
        let service = service(generator.clone(), 10);

        let err = service.generate("ip1", "https://img/x.png", &Cancellation::none()).await.unwrap_err();
        match err {
            NicknameError::Guard(GuardError::Upstream(inner)) => {
                assert_eq!(inner.kind, crate::upstream::UpstreamErrorKind::EmptyResponse)
            }
            other => panic!("unexpected error: {:?}", other),
        }
        assert_eq!(generator.request_count(), 1);
    }

    #[tokio::test]
    async fn test_empty_url_is_rejected_without_using_budget() {
        let generator = ScriptedGenerator::new(vec![]);
        let service = service(generator.clone(), 1);

        let err = service.generate("ip1", "  ", &Cancellation::none()).await.unwrap_err();
        assert!(matches!(err, NicknameError::InvalidInput(_)));
        assert_eq!(err.status_code(), 400);

        let url = service.generate_image("ip1", "a red fox", &Cancellation::none()).await.unwrap();
        assert_eq!(url, "https://images.example/a-red-fox.png");
    }

    #[tokio::test]
    async fn test_rate_limited() {
        let generator = ScriptedGenerator::new(vec![Ok("A tree".to_string()), Ok("Oakley".to_string())]);
        let service = service(generator.clone(), 1);
        let cancel = Cancellation::none();

        service.generate("ip1", "https://img/tree.png", &cancel).await.unwrap();
        let err = service.generate("ip1", "https://img/tree.png", &cancel).await.unwrap_err();
        assert_eq!(err.status_code(), 429);
    }

    #[tokio::test]
    async fn test_forget_drops_cached_nickname() {
        let generator = ScriptedGenerator::new(vec![
            Ok("A bird".to_string()),
            Ok("Tweety".to_string()),
            Ok("A bird again".to_string()),
            Ok("Chirp".to_string()),
        ]);
        let service = service(generator.clone(), 10);
        let cancel = Cancellation::none();

        service.generate("ip1", "https://img/bird.png", &cancel).await.unwrap();
        assert!(service.forget("https://img/bird.png"));

        let again = service.generate("ip1", "https://img/bird.png", &cancel).await.unwrap();
        assert!(!again.cached);
        assert_eq!(again.value.nickname, "Chirp");
    }

    #[test]
    fn test_cache_key_format() {
        assert_eq!(cache_key("https://img/1.png"), "nickname:https://img/1.png");
    }
}
