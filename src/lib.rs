//! # pdf2tutorial
//!
//! Turn a PDF into a Markdown tutorial: every page's text, every embedded
//! image with a model-written caption, and a step-by-step tutorial that an
//! LLM builds up as it reads the document.
//!
//! ## Pipeline Overview
//!
//! ```text
//! PDF
//!  │
//!  ├─ 1. Input       resolve local file or download from URL
//!  ├─ 2. Extract     text + images per page via pdfium (spawn_blocking)
//!  ├─ 3. Normalize   drop URLs, collapse whitespace
//!  ├─ 4. Caption     store each image, then describe it with a VLM
//!  ├─ 5. Window      token-bounded FIFO of recent pages
//!  ├─ 6. Synthesize  every `batch_size` pages: draft + window → new draft
//!  └─ 7. Assemble    pages, images, captions and the tutorial as Markdown
//! ```
//!
//! Pages are processed strictly in order. A page that cannot be read leaves a
//! gap marker; a page too large for the window is truncated and reported; a
//! synthesis batch that fails after all retries stops the run with a
//! [`GenerationFailure`] naming the pages that are not yet in the draft,
//! together with a [`PartialTutorial`] that [`resume_tutorial`] continues.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf2tutorial::{generate_tutorial, TutorialConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / GEMINI_API_KEY
//!     let config = TutorialConfig::builder()
//!         .max_context_tokens(8000)
//!         .batch_size(2)
//!         .build()?;
//!     let output = generate_tutorial("manual.pdf", &config).await?;
//!     println!("{}", output.markdown);
//!     for issue in &output.issues {
//!         eprintln!("{issue}");
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `pdf2tutorial` binary (clap + anyhow + tracing-subscriber + indicatif) |

pub mod config;
pub mod error;
pub mod llm;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod report;
pub mod storage;
pub mod stream;
pub mod tokens;
pub mod tutorial;

pub use config::{
    PageSelection, PageSeparator, TokenizerKind, TutorialConfig, TutorialConfigBuilder,
};
pub use error::{GenerationError, GenerationFailure, PageIssue, TutorialError};
pub use llm::{Generation, GenerationRequest, Generator, ProviderGenerator};
pub use output::{
    DocumentMetadata, FinalDocument, ImageDescription, ImageManifest, ImageRef, PageFragment,
    RawImage, RawPage, TutorialDraft, TutorialOutput, TutorialStats,
};
pub use pipeline::accumulator::ContextAccumulator;
pub use pipeline::extract::PdfiumSource;
pub use pipeline::source::{MemorySource, PageSource};
pub use pipeline::session::PartialTutorial;
pub use pipeline::TutorialPipeline;
pub use progress::{NoopProgressCallback, ProgressCallback, TutorialProgressCallback};
pub use storage::{DirectoryStore, ImageStore, MemoryStore};
pub use stream::{tutorial_stream, tutorial_stream_from_source, TutorialEvent, TutorialStream};
pub use tokens::{TiktokenCounter, TokenCounter, WordCounter};
pub use report::render_report;
pub use tutorial::{
    generate_tutorial, generate_tutorial_from_bytes, generate_tutorial_from_source,
    generate_tutorial_sync, generate_tutorial_to_dir, inspect, partial_output, resume_tutorial,
    resume_tutorial_from_source, write_outputs,
};
