//! Tutorial synthesis: fold the context window into the draft.
//!
//! Each call sends the whole current draft plus the rendered window and takes
//! the model's answer as the complete new draft (replace, not append).
//!
//! The draft passed in is borrowed and never written: a new
//! [`TutorialDraft`] is returned only after a fully successful, non-empty
//! response. Any failure leaves the caller's draft exactly as it was.

use crate::config::TutorialConfig;
use crate::error::{GenerationError, GenerationFailure};
use crate::llm::{Generation, GenerationRequest, Generator, RetryPolicy};
use crate::pipeline::accumulator::ContextAccumulator;
use crate::pipeline::postprocess::tidy_model_output;
use crate::prompts::{tutorial_request, DEFAULT_TUTORIAL_PROMPT};
use crate::output::TutorialDraft;
use std::sync::Arc;
use tracing::{debug, info};

/// A successful update and what it cost.
#[derive(Debug, Clone)]
pub struct SynthesisResult {
    pub draft: TutorialDraft,
    pub retries: u32,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

pub struct TutorialSynthesizer {
    generator: Arc<dyn Generator>,
    system_prompt: String,
    retry: RetryPolicy,
}

impl TutorialSynthesizer {
    pub fn new(generator: Arc<dyn Generator>, config: &TutorialConfig) -> Self {
        Self {
            generator,
            system_prompt: config
                .tutorial_prompt
                .clone()
                .unwrap_or_else(|| DEFAULT_TUTORIAL_PROMPT.to_string()),
            retry: RetryPolicy::from_config(config),
        }
    }

    /// The request `update` would send for this draft and window.
    pub fn request_for(&self, draft: &TutorialDraft, context: &ContextAccumulator) -> GenerationRequest {
        GenerationRequest::text(
            self.system_prompt.as_str(),
            tutorial_request(&draft.markdown, &context.render()),
        )
    }

    /// Produce the next draft covering pages `first_page..=last_page`.
    pub async fn update(
        &self,
        draft: &TutorialDraft,
        context: &ContextAccumulator,
        first_page: usize,
        last_page: usize,
    ) -> Result<SynthesisResult, GenerationFailure> {
        let request = self.request_for(draft, context);
        let label = format!("Synthesis pages {}-{}", first_page, last_page);
        debug!(
            "{}: draft {} chars, window {:?}",
            label,
            draft.markdown.len(),
            context.window_pages()
        );

        let done = self
            .retry
            .run(self.generator.as_ref(), &request, &label, accept_draft)
            .await
            .map_err(|exhausted| GenerationFailure {
                first_page,
                last_page,
                attempts: exhausted.attempts,
                last_error: exhausted.last_error,
            })?;

        let next = TutorialDraft {
            markdown: done.value.text,
            covered_through: last_page,
            updates: draft.updates + 1,
        };
        info!(
            "{}: draft updated ({} → {} chars, update #{})",
            label,
            draft.markdown.len(),
            next.markdown.len(),
            next.updates
        );

        Ok(SynthesisResult {
            draft: next,
            retries: done.retries,
            input_tokens: done.value.input_tokens,
            output_tokens: done.value.output_tokens,
        })
    }
}

fn accept_draft(generation: Generation) -> Result<Generation, GenerationError> {
    let text = tidy_model_output(&generation.text);
    if text.is_empty() {
        return Err(GenerationError::InvalidResponse("empty tutorial".into()));
    }
    Ok(Generation { text, ..generation })
}
