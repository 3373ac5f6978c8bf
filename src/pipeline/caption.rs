//! Image captioning: store first, then describe.
//!
//! The bytes are written to the [`ImageStore`] under a name derived from
//! page and ordinal before any model call, and a caption failure only swaps
//! in a placeholder.

use crate::config::TutorialConfig;
use crate::error::GenerationError;
use crate::llm::{Generation, GenerationRequest, Generator, RetryPolicy};
use crate::output::{ImageDescription, RawImage};
use crate::pipeline::encode::to_image_data;
use crate::pipeline::postprocess::tidy_model_output;
use crate::prompts::{caption_request, DEFAULT_CAPTION_PROMPT};
use crate::storage::ImageStore;
use std::sync::Arc;
use tracing::{debug, warn};

/// Caption used when the model could not describe an image.
pub const PLACEHOLDER_CAPTION: &str = "description unavailable";

/// Deterministic, collision-free file name for image `ordinal` (1-based) of
/// page `page_index` (1-based).
pub fn image_name(page_index: usize, ordinal: usize, extension: &str) -> String {
    format!("image_{}_{}.{}", page_index, ordinal, extension)
}

/// Captioning outcome with token usage for the run stats.
#[derive(Debug)]
pub struct Captioned {
    pub description: ImageDescription,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

pub struct ImageCaptioner {
    generator: Arc<dyn Generator>,
    store: Arc<dyn ImageStore>,
    system_prompt: String,
    retry: RetryPolicy,
    enabled: bool,
}

impl ImageCaptioner {
    pub fn new(
        generator: Arc<dyn Generator>,
        store: Arc<dyn ImageStore>,
        config: &TutorialConfig,
    ) -> Self {
        Self {
            generator,
            store,
            system_prompt: config
                .caption_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_CAPTION_PROMPT.to_string()),
            retry: RetryPolicy::from_config(config),
            enabled: !config.skip_captions,
        }
    }

    /// Store `image`, then caption it.
    ///
    /// Fails only when the image could not be stored; there is nothing to
    /// reference in that case.
    pub async fn caption(
        &self,
        image: &RawImage,
        page_index: usize,
        ordinal: usize,
    ) -> std::io::Result<Captioned> {
        let name = image_name(page_index, ordinal, image.extension());
        let reference = self.store.store(&name, &image.bytes).await?;

        if !self.enabled {
            return Ok(Captioned {
                description: ImageDescription {
                    reference,
                    caption: PLACEHOLDER_CAPTION.to_string(),
                    captioned: false,
                },
                input_tokens: 0,
                output_tokens: 0,
            });
        }

        let request = GenerationRequest::text(
            self.system_prompt.as_str(),
            caption_request(page_index, ordinal),
        )
        .with_image(to_image_data(image));

        let label = format!("Caption {}", name);
        let result = self
            .retry
            .run(self.generator.as_ref(), &request, &label, accept_caption)
            .await;

        Ok(match result {
            Ok(done) => {
                debug!("{}: {} chars", label, done.value.text.len());
                Captioned {
                    description: ImageDescription {
                        reference,
                        caption: done.value.text,
                        captioned: true,
                    },
                    input_tokens: done.value.input_tokens,
                    output_tokens: done.value.output_tokens,
                }
            }
            Err(exhausted) => {
                warn!(
                    "{}: no caption after {} attempt(s): {}",
                    label, exhausted.attempts, exhausted.last_error
                );
                Captioned {
                    description: ImageDescription {
                        reference,
                        caption: PLACEHOLDER_CAPTION.to_string(),
                        captioned: false,
                    },
                    input_tokens: 0,
                    output_tokens: 0,
                }
            }
        })
    }
}

/// Captions are single-paragraph prose; collapse whatever layout the model chose.
fn accept_caption(generation: Generation) -> Result<Generation, GenerationError> {
    let text = tidy_model_output(&generation.text)
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ");
    if text.is_empty() {
        return Err(GenerationError::InvalidResponse("empty caption".into()));
    }
    Ok(Generation { text, ..generation })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::MemoryStore;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct FixedCaption(&'static str);

    #[async_trait]
    impl Generator for FixedCaption {
        async fn generate(&self, req: &GenerationRequest) -> Result<Generation, GenerationError> {
            assert!(req.image.is_some(), "caption call must carry the image");
            Ok(Generation::new(self.0))
        }
    }

    struct AlwaysDown(AtomicUsize);

    #[async_trait]
    impl Generator for AlwaysDown {
        async fn generate(&self, _: &GenerationRequest) -> Result<Generation, GenerationError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Err(GenerationError::RateLimited {
                retry_after_secs: None,
            })
        }
    }

    fn config() -> TutorialConfig {
        TutorialConfig::builder()
            .max_retries(1)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[test]
    fn names_are_deterministic() {
        assert_eq!(image_name(2, 1, "png"), "image_2_1.png");
        assert_ne!(image_name(1, 12, "png"), image_name(11, 2, "png"));
    }

    #[tokio::test]
    async fn stores_then_captions() {
        let store = Arc::new(MemoryStore::new());
        let captioner = ImageCaptioner::new(
            Arc::new(FixedCaption("A login\n\nform with two fields")),
            store.clone(),
            &config(),
        );
        let out = captioner
            .caption(&RawImage::png(vec![1, 2, 3]), 2, 1)
            .await
            .unwrap();
        assert_eq!(out.description.reference.name, "image_2_1.png");
        assert_eq!(out.description.caption, "A login form with two fields");
        assert!(out.description.captioned);
        assert_eq!(store.get("image_2_1.png"), Some(vec![1, 2, 3]));
    }

    #[tokio::test]
    async fn failed_caption_keeps_image_with_placeholder() {
        let store = Arc::new(MemoryStore::new());
        let generator = Arc::new(AlwaysDown(AtomicUsize::new(0)));
        let captioner = ImageCaptioner::new(generator.clone(), store.clone(), &config());

        let out = captioner
            .caption(&RawImage::png(vec![9]), 3, 2)
            .await
            .unwrap();
        assert_eq!(out.description.caption, PLACEHOLDER_CAPTION);
        assert!(!out.description.captioned);
        assert_eq!(store.names(), vec!["image_3_2.png".to_string()]);
        assert_eq!(generator.0.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn skip_captions_makes_no_calls() {
        let store = Arc::new(MemoryStore::new());
        let generator = Arc::new(AlwaysDown(AtomicUsize::new(0)));
        let config = TutorialConfig::builder().skip_captions(true).build().unwrap();
        let captioner = ImageCaptioner::new(generator.clone(), store, &config);

        let out = captioner
            .caption(&RawImage::png(vec![9]), 1, 1)
            .await
            .unwrap();
        assert!(!out.description.captioned);
        assert_eq!(generator.0.load(Ordering::SeqCst), 0);
    }
}
