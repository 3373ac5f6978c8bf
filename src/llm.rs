//! Model access: the [`Generator`] seam, its edgequake-llm implementation,
//! and the retry policy shared by captioning and synthesis.
//!
//! ## Retry Strategy
//!
//! Rate limits and timeouts are transient. Each failed attempt waits
//! `retry_backoff_ms * 2^(attempt-1)`; a rate limit that names its own delay
//! waits at least that long. With 500 ms base and 3 retries the sequence is
//! 500 ms → 1 s → 2 s.

use crate::config::TutorialConfig;
use crate::error::{GenerationError, TutorialError};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, ImageData, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, warn};

/// Default model when the caller names a provider but no model.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// One request to the generative capability.
#[derive(Clone)]
pub struct GenerationRequest {
    pub system: String,
    pub prompt: String,
    /// Present for captioning calls.
    pub image: Option<ImageData>,
}

impl GenerationRequest {
    pub fn text(system: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            prompt: prompt.into(),
            image: None,
        }
    }

    pub fn with_image(mut self, image: ImageData) -> Self {
        self.image = Some(image);
        self
    }
}

/// A successful model answer.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Generation {
    pub text: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Generation {
    pub fn new(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Request/response access to a language model.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError>;
}

/// [`Generator`] backed by an edgequake-llm provider.
pub struct ProviderGenerator {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
    timeout: Duration,
}

impl ProviderGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &TutorialConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
            timeout: Duration::from_secs(config.api_timeout_secs),
        }
    }
}

#[async_trait]
impl Generator for ProviderGenerator {
    async fn generate(&self, request: &GenerationRequest) -> Result<Generation, GenerationError> {
        let mut messages = vec![ChatMessage::system(request.system.as_str())];
        match &request.image {
            Some(image) => messages.push(ChatMessage::user_with_images(
                request.prompt.as_str(),
                vec![image.clone()],
            )),
            None => messages.push(ChatMessage::user(request.prompt.as_str())),
        }

        let call = self.provider.chat(&messages, Some(&self.options));
        let response = match tokio::time::timeout(self.timeout, call).await {
            Err(_) => {
                return Err(GenerationError::Timeout {
                    secs: self.timeout.as_secs(),
                })
            }
            Ok(Err(e)) => return Err(classify_provider_error(&e.to_string())),
            Ok(Ok(response)) => response,
        };

        debug!(
            "LLM call: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );

        if response.content.trim().is_empty() {
            return Err(GenerationError::InvalidResponse("empty completion".into()));
        }

        Ok(Generation {
            text: response.content,
            input_tokens: response.prompt_tokens as u64,
            output_tokens: response.completion_tokens as u64,
        })
    }
}

/// Build `CompletionOptions` from the run config.
fn build_options(config: &TutorialConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_output_tokens),
        ..Default::default()
    }
}

/// Map a provider error message onto the retry taxonomy.
///
/// Provider errors arrive as opaque messages, so the HTTP status and the
/// usual wording are what is left to go on.
pub fn classify_provider_error(message: &str) -> GenerationError {
    let lower = message.to_lowercase();
    if lower.contains("429") || lower.contains("rate limit") || lower.contains("too many requests")
    {
        GenerationError::RateLimited {
            retry_after_secs: parse_retry_after(&lower),
        }
    } else if lower.contains("timed out") || lower.contains("timeout") {
        GenerationError::Timeout { secs: 0 }
    } else if lower.contains("deserializ")
        || lower.contains("invalid response")
        || lower.contains("content_filter")
    {
        GenerationError::InvalidResponse(message.to_string())
    } else {
        GenerationError::Api(message.to_string())
    }
}

fn parse_retry_after(lower: &str) -> Option<u64> {
    let idx = lower.find("retry after")?;
    lower[idx + "retry after".len()..]
        .trim_start()
        .split(|c: char| !c.is_ascii_digit())
        .next()
        .and_then(|n| n.parse().ok())
}

/// Bounded retry with exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_retries: u32,
    pub backoff_ms: u64,
}

/// Result of a retried call: the value plus how many retries it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub value: T,
    pub retries: u32,
}

/// Every attempt failed.
#[derive(Debug)]
pub struct Exhausted {
    pub attempts: u32,
    pub last_error: GenerationError,
}

impl RetryPolicy {
    pub fn from_config(config: &TutorialConfig) -> Self {
        Self {
            max_retries: config.max_retries,
            backoff_ms: config.retry_backoff_ms,
        }
    }

    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32, last_error: &GenerationError) -> Duration {
        let exp = self
            .backoff_ms
            .saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)));
        let floor = match last_error {
            GenerationError::RateLimited {
                retry_after_secs: Some(secs),
            } => secs.saturating_mul(1000),
            _ => 0,
        };
        Duration::from_millis(exp.max(floor))
    }

    /// Call `generator` until `accept` takes the answer or attempts run out.
    /// An error that is not [retryable](GenerationError::is_retryable) ends
    /// the loop at once.
    ///
    /// `accept` turns a raw generation into the caller's value; returning an
    /// error from it (e.g. empty output after cleanup) counts as a failed
    /// attempt.
    pub async fn run<T, F>(
        &self,
        generator: &dyn Generator,
        request: &GenerationRequest,
        label: &str,
        accept: F,
    ) -> Result<Attempted<T>, Exhausted>
    where
        F: Fn(Generation) -> Result<T, GenerationError>,
    {
        let mut last_error = GenerationError::Api("no attempt made".into());

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.delay_for(attempt, &last_error);
                warn!(
                    "{}: retry {}/{} after {}ms",
                    label,
                    attempt,
                    self.max_retries,
                    delay.as_millis()
                );
                sleep(delay).await;
            }

            match generator.generate(request).await.and_then(&accept) {
                Ok(value) => {
                    return Ok(Attempted {
                        value,
                        retries: attempt,
                    })
                }
                Err(e) if !e.is_retryable() => {
                    warn!("{}: attempt {} failed permanently: {}", label, attempt + 1, e);
                    return Err(Exhausted {
                        attempts: attempt + 1,
                        last_error: e,
                    });
                }
                Err(e) => {
                    warn!("{}: attempt {} failed: {}", label, attempt + 1, e);
                    last_error = e;
                }
            }
        }

        Err(Exhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }
}

/// Resolve the generator, from most-specific to least-specific:
///
/// 1. `config.generator`, used as-is.
/// 2. `config.provider`, wrapped in a [`ProviderGenerator`].
/// 3. `config.provider_name` (+ `config.model`).
/// 4. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set.
/// 5. `OPENAI_API_KEY` present → OpenAI.
/// 6. `ProviderFactory::from_env()` auto-detection.
pub fn resolve_generator(config: &TutorialConfig) -> Result<Arc<dyn Generator>, TutorialError> {
    if let Some(ref generator) = config.generator {
        return Ok(Arc::clone(generator));
    }
    let provider = resolve_provider(config)?;
    Ok(Arc::new(ProviderGenerator::new(provider, config)))
}

fn resolve_provider(config: &TutorialConfig) -> Result<Arc<dyn LLMProvider>, TutorialError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    if let Some(ref name) = config.provider_name {
        let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !model.is_empty() {
            return create_provider(&prov, &model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| TutorialError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, TutorialError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        TutorialError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyGenerator {
        failures_left: AtomicU32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl Generator for FlakyGenerator {
        async fn generate(&self, _: &GenerationRequest) -> Result<Generation, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.failures_left.load(Ordering::SeqCst) > 0 {
                self.failures_left.fetch_sub(1, Ordering::SeqCst);
                return Err(GenerationError::Timeout { secs: 1 });
            }
            Ok(Generation::new("ok"))
        }
    }

    fn policy(max_retries: u32) -> RetryPolicy {
        RetryPolicy {
            max_retries,
            backoff_ms: 1,
        }
    }

    #[test]
    fn build_options_defaults() {
        let config = TutorialConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.2));
        assert_eq!(opts.max_tokens, Some(4096));
    }

    #[test]
    fn classify_common_errors() {
        assert_eq!(
            classify_provider_error("HTTP 429 Too Many Requests, retry after 7 seconds"),
            GenerationError::RateLimited {
                retry_after_secs: Some(7)
            }
        );
        assert!(matches!(
            classify_provider_error("request timed out"),
            GenerationError::Timeout { .. }
        ));
        assert!(matches!(
            classify_provider_error("failed to deserialize body"),
            GenerationError::InvalidResponse(_)
        ));
        assert!(matches!(
            classify_provider_error("401 unauthorized"),
            GenerationError::Api(_)
        ));
    }

    #[test]
    fn backoff_doubles_and_honours_retry_after() {
        let p = RetryPolicy {
            max_retries: 3,
            backoff_ms: 500,
        };
        let timeout = GenerationError::Timeout { secs: 1 };
        assert_eq!(p.delay_for(1, &timeout), Duration::from_millis(500));
        assert_eq!(p.delay_for(2, &timeout), Duration::from_millis(1000));
        assert_eq!(p.delay_for(3, &timeout), Duration::from_millis(2000));

        let limited = GenerationError::RateLimited {
            retry_after_secs: Some(5),
        };
        assert_eq!(p.delay_for(1, &limited), Duration::from_secs(5));
    }

    #[tokio::test]
    async fn retry_recovers_after_transient_failures() {
        let g = FlakyGenerator {
            failures_left: AtomicU32::new(2),
            calls: AtomicU32::new(0),
        };
        let req = GenerationRequest::text("sys", "prompt");
        let out = policy(3).run(&g, &req, "test", Ok).await.unwrap();
        assert_eq!(out.value.text, "ok");
        assert_eq!(out.retries, 2);
        assert_eq!(g.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_gives_up_after_budget() {
        let g = FlakyGenerator {
            failures_left: AtomicU32::new(10),
            calls: AtomicU32::new(0),
        };
        let req = GenerationRequest::text("sys", "prompt");
        let err = policy(2).run(&g, &req, "test", Ok).await.unwrap_err();
        assert_eq!(err.attempts, 3);
        assert_eq!(err.last_error, GenerationError::Timeout { secs: 1 });
        assert_eq!(g.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn rejected_output_counts_as_failure() {
        let g = FlakyGenerator {
            failures_left: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        };
        let req = GenerationRequest::text("sys", "prompt");
        let err = policy(1)
            .run(&g, &req, "test", |_gen| -> Result<(), GenerationError> {
                Err(GenerationError::InvalidResponse("nope".into()))
            })
            .await
            .unwrap_err();
        assert_eq!(err.attempts, 2);
        assert!(matches!(err.last_error, GenerationError::InvalidResponse(_)));
    }

    struct Unauthorized {
        calls: AtomicU32,
    }

    #[async_trait]
    impl Generator for Unauthorized {
        async fn generate(&self, _: &GenerationRequest) -> Result<Generation, GenerationError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Err(classify_provider_error("401 Unauthorized: invalid api key"))
        }
    }

    #[tokio::test]
    async fn permanent_errors_are_not_retried() {
        let g = Unauthorized {
            calls: AtomicU32::new(0),
        };
        let req = GenerationRequest::text("sys", "prompt");
        let err = policy(3).run(&g, &req, "test", Ok).await.unwrap_err();
        assert_eq!(err.attempts, 1);
        assert!(matches!(err.last_error, GenerationError::Api(_)));
        assert_eq!(g.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn explicit_generator_wins() {
        let g: Arc<dyn Generator> = Arc::new(FlakyGenerator {
            failures_left: AtomicU32::new(0),
            calls: AtomicU32::new(0),
        });
        let config = TutorialConfig::builder()
            .generator(Arc::clone(&g))
            .build()
            .unwrap();
        let resolved = resolve_generator(&config).unwrap();
        assert!(Arc::ptr_eq(&resolved, &g));
    }
}
