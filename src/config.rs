//! Configuration types for PDF-to-tutorial synthesis.
//!
//! Every knob lives in [`TutorialConfig`], built via its
//! [`TutorialConfigBuilder`]. The builder clamps obviously out-of-range
//! values and `build()` rejects combinations that would make the run lose
//! content, most importantly a synthesis cadence the context window cannot
//! keep up with.

use crate::error::TutorialError;
use crate::llm::Generator;
use crate::progress::ProgressCallback;
use crate::storage::ImageStore;
use crate::tokens::TokenCounter;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for one PDF-to-tutorial run.
///
/// # Example
/// ```rust
/// use pdf2tutorial::TutorialConfig;
///
/// let config = TutorialConfig::builder()
///     .max_context_tokens(6000)
///     .batch_size(2)
///     .model("gpt-4.1-mini")
///     .build()
///     .unwrap();
/// assert_eq!(config.batch_size, 2);
/// ```
#[derive(Clone)]
pub struct TutorialConfig {
    /// Token budget of the accumulated context window. Default: 8000.
    ///
    /// Measured with [`TutorialConfig::tokenizer`] (or the injected
    /// `token_counter`). Must leave room in the model's context for the
    /// current draft and the prompt scaffolding.
    pub max_context_tokens: usize,

    /// Pages folded into the draft per synthesis call. Default: 1.
    pub batch_size: usize,

    /// Expected size of one page in tokens, used to check that `batch_size`
    /// pages fit the window. Default: 1000.
    pub page_token_estimate: usize,

    /// Share of `max_context_tokens` kept when a single page overflows the
    /// window. Range: 0.1–1.0. Default: 1.0.
    pub oversize_keep_ratio: f32,

    /// Tokenizer used for context accounting. Default: cl100k_base.
    pub tokenizer: TokenizerKind,

    /// LLM model identifier, e.g. "gpt-4.1-mini". If None, uses provider default.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "azure", "anthropic").
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Pre-constructed generator. Takes precedence over every provider setting.
    pub generator: Option<Arc<dyn Generator>>,

    /// Pre-constructed token counter. Takes precedence over `tokenizer`.
    pub token_counter: Option<Arc<dyn TokenCounter>>,

    /// Pre-constructed image store. Takes precedence over `image_dir`.
    pub image_store: Option<Arc<dyn ImageStore>>,

    /// Directory extracted images are written to. Default: `output/images`.
    pub image_dir: PathBuf,

    /// Prefix used for image links in the Markdown. Default: `images`.
    pub image_link_prefix: String,

    /// Sampling temperature. Default: 0.2.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 4096.
    pub max_output_tokens: usize,

    /// Retries after the first failed model call. Default: 3.
    pub max_retries: u32,

    /// Initial retry delay in milliseconds, doubled per attempt. Default: 500.
    pub retry_backoff_ms: u64,

    /// Per-call timeout in seconds. Default: 90.
    pub api_timeout_secs: u64,

    /// Skip image captioning; images are still stored and linked. Default: false.
    pub skip_captions: bool,

    /// PDF user password for encrypted documents.
    pub password: Option<String>,

    /// Custom system prompt for tutorial synthesis.
    pub tutorial_prompt: Option<String>,

    /// Custom prompt for image captioning.
    pub caption_prompt: Option<String>,

    /// Page selection. Default: All pages.
    pub pages: PageSelection,

    /// Separator between page sections in the assembled output.
    pub page_separator: PageSeparator,

    /// Include YAML front-matter with document metadata. Default: false.
    pub include_metadata: bool,

    /// Download timeout for URL inputs in seconds. Default: 120.
    pub download_timeout_secs: u64,

    /// Optional per-page progress events.
    pub progress_callback: Option<ProgressCallback>,
}

impl Default for TutorialConfig {
    fn default() -> Self {
        Self {
            max_context_tokens: 8000,
            batch_size: 1,
            page_token_estimate: 1000,
            oversize_keep_ratio: 1.0,
            tokenizer: TokenizerKind::default(),
            model: None,
            provider_name: None,
            provider: None,
            generator: None,
            token_counter: None,
            image_store: None,
            image_dir: PathBuf::from("output").join("images"),
            image_link_prefix: "images".to_string(),
            temperature: 0.2,
            max_output_tokens: 4096,
            max_retries: 3,
            retry_backoff_ms: 500,
            api_timeout_secs: 90,
            skip_captions: false,
            password: None,
            tutorial_prompt: None,
            caption_prompt: None,
            pages: PageSelection::default(),
            page_separator: PageSeparator::default(),
            include_metadata: false,
            download_timeout_secs: 120,
            progress_callback: None,
        }
    }
}

impl fmt::Debug for TutorialConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TutorialConfig")
            .field("max_context_tokens", &self.max_context_tokens)
            .field("batch_size", &self.batch_size)
            .field("page_token_estimate", &self.page_token_estimate)
            .field("oversize_keep_ratio", &self.oversize_keep_ratio)
            .field("tokenizer", &self.tokenizer)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("generator", &self.generator.as_ref().map(|_| "<dyn Generator>"))
            .field("image_dir", &self.image_dir)
            .field("temperature", &self.temperature)
            .field("max_output_tokens", &self.max_output_tokens)
            .field("max_retries", &self.max_retries)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("pages", &self.pages)
            .field("page_separator", &self.page_separator)
            .finish()
    }
}

impl TutorialConfig {
    /// Create a new builder for `TutorialConfig`.
    pub fn builder() -> TutorialConfigBuilder {
        TutorialConfigBuilder {
            config: Self::default(),
        }
    }

    /// How many average pages the context window holds.
    pub fn window_pages(&self) -> usize {
        self.max_context_tokens / self.page_token_estimate.max(1)
    }

    /// Check that `batch_size` pages fit the window before anything runs.
    pub fn check_cadence(&self) -> Result<(), TutorialError> {
        let window_pages = self.window_pages();
        if self.batch_size > window_pages {
            return Err(TutorialError::Configuration {
                batch_size: self.batch_size,
                window_pages,
                max_context_tokens: self.max_context_tokens,
                page_token_estimate: self.page_token_estimate,
            });
        }
        Ok(())
    }
}

/// Builder for [`TutorialConfig`].
pub struct TutorialConfigBuilder {
    config: TutorialConfig,
}

impl fmt::Debug for TutorialConfigBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("TutorialConfigBuilder")
            .field(&self.config)
            .finish()
    }
}

impl TutorialConfigBuilder {
    pub fn max_context_tokens(mut self, n: usize) -> Self {
        self.config.max_context_tokens = n;
        self
    }

    pub fn batch_size(mut self, n: usize) -> Self {
        self.config.batch_size = n.max(1);
        self
    }

    pub fn page_token_estimate(mut self, n: usize) -> Self {
        self.config.page_token_estimate = n.max(1);
        self
    }

    pub fn oversize_keep_ratio(mut self, ratio: f32) -> Self {
        self.config.oversize_keep_ratio = ratio.clamp(0.1, 1.0);
        self
    }

    pub fn tokenizer(mut self, kind: TokenizerKind) -> Self {
        self.config.tokenizer = kind;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn generator(mut self, generator: Arc<dyn Generator>) -> Self {
        self.config.generator = Some(generator);
        self
    }

    pub fn token_counter(mut self, counter: Arc<dyn TokenCounter>) -> Self {
        self.config.token_counter = Some(counter);
        self
    }

    pub fn image_store(mut self, store: Arc<dyn ImageStore>) -> Self {
        self.config.image_store = Some(store);
        self
    }

    pub fn image_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.image_dir = dir.into();
        self
    }

    pub fn image_link_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.config.image_link_prefix = prefix.into();
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_output_tokens(mut self, n: usize) -> Self {
        self.config.max_output_tokens = n;
        self
    }

    pub fn max_retries(mut self, n: u32) -> Self {
        self.config.max_retries = n;
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs.max(1);
        self
    }

    pub fn skip_captions(mut self, v: bool) -> Self {
        self.config.skip_captions = v;
        self
    }

    pub fn password(mut self, pwd: impl Into<String>) -> Self {
        self.config.password = Some(pwd.into());
        self
    }

    pub fn tutorial_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.tutorial_prompt = Some(prompt.into());
        self
    }

    pub fn caption_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.config.caption_prompt = Some(prompt.into());
        self
    }

    pub fn pages(mut self, selection: PageSelection) -> Self {
        self.config.pages = selection;
        self
    }

    pub fn page_separator(mut self, sep: PageSeparator) -> Self {
        self.config.page_separator = sep;
        self
    }

    pub fn include_metadata(mut self, v: bool) -> Self {
        self.config.include_metadata = v;
        self
    }

    pub fn download_timeout_secs(mut self, secs: u64) -> Self {
        self.config.download_timeout_secs = secs;
        self
    }

    pub fn progress_callback(mut self, cb: ProgressCallback) -> Self {
        self.config.progress_callback = Some(cb);
        self
    }

    /// Build the configuration, validating constraints.
    ///
    /// Fails with [`TutorialError::Configuration`] when `batch_size` pages
    /// cannot fit the context window.
    pub fn build(self) -> Result<TutorialConfig, TutorialError> {
        let c = &self.config;
        if c.max_context_tokens < 16 {
            return Err(TutorialError::InvalidConfig(format!(
                "max_context_tokens must be at least 16, got {}",
                c.max_context_tokens
            )));
        }
        if c.max_output_tokens == 0 {
            return Err(TutorialError::InvalidConfig(
                "max_output_tokens must be ≥ 1".into(),
            ));
        }
        c.check_cadence()?;
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// BPE vocabulary used to measure the context window.
///
/// | Kind | Models |
/// |------|--------|
/// | `Cl100k` | gpt-4, gpt-4-turbo, gpt-3.5-turbo (default) |
/// | `O200k`  | gpt-4o, gpt-4.1, o-series |
/// | `Words`  | offline whitespace approximation |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum TokenizerKind {
    #[default]
    Cl100k,
    O200k,
    Words,
}

/// Specifies which pages of the PDF to process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSelection {
    /// Process all pages (default).
    #[default]
    All,
    /// A single page (1-indexed).
    Single(usize),
    /// A contiguous range of pages (1-indexed, inclusive).
    Range(usize, usize),
    /// Specific pages (1-indexed, deduplicated).
    Set(Vec<usize>),
}

impl PageSelection {
    /// Expand the selection into a sorted, deduplicated list of 0-indexed page numbers.
    pub fn to_indices(&self, total_pages: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = match self {
            PageSelection::All => (0..total_pages).collect(),
            PageSelection::Single(p) => {
                if *p >= 1 && *p <= total_pages {
                    vec![p - 1]
                } else {
                    vec![]
                }
            }
            PageSelection::Range(start, end) => {
                let s = (*start).max(1) - 1;
                let e = (*end).min(total_pages);
                (s..e).collect()
            }
            PageSelection::Set(pages) => pages
                .iter()
                .filter(|&&p| p >= 1 && p <= total_pages)
                .map(|p| p - 1)
                .collect(),
        };
        indices.sort_unstable();
        indices.dedup();
        indices
    }
}

/// How page sections are separated in the assembled document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub enum PageSeparator {
    /// Blank line only.
    None,
    /// Horizontal rule (default).
    #[default]
    HorizontalRule,
    /// HTML comment carrying the next page number.
    Comment,
    /// Custom string inserted between pages.
    Custom(String),
}

impl PageSeparator {
    /// Render the separator placed before the page with the given 1-based number.
    pub fn render(&self, page_num: usize) -> String {
        match self {
            PageSeparator::None => "\n".to_string(),
            PageSeparator::HorizontalRule => "\n---\n\n".to_string(),
            PageSeparator::Comment => format!("\n<!-- page {} -->\n\n", page_num),
            PageSeparator::Custom(s) => format!("\n{}\n\n", s),
        }
    }
}
