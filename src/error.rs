//! Error types for the pdf2tutorial library.
//!
//! Failures fall into three groups:
//!
//! * [`TutorialError`]: **Fatal**: the run cannot start or cannot continue
//!   (bad input file, provider not configured, incompatible cadence). Returned
//!   as `Err(TutorialError)` from the top-level entry points.
//!
//! * [`PageIssue`]: **Non-fatal**: one page (or one image) had a problem but
//!   the document carries on. Issues are collected on the pipeline and in
//!   [`crate::output::TutorialOutput`] so callers can report gaps.
//!
//! * [`GenerationFailure`]: **Recoverable**: a synthesis call exhausted its
//!   retries. It carries the page range that was not folded into the draft,
//!   and the pipeline keeps those pages pending so the caller can resume with
//!   [`crate::pipeline::TutorialPipeline::flush`].
//!
//! [`GenerationError`] classifies a single failed model call and drives the
//! retry policy.

use crate::pipeline::session::PartialTutorial;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// All fatal errors returned by the pdf2tutorial library.
#[derive(Debug, Error)]
pub enum TutorialError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// Input file was not found at the given path.
    #[error("PDF file not found: '{path}'\nCheck the path exists and is readable.")]
    FileNotFound { path: PathBuf },

    /// Process does not have read permission on the file.
    #[error("Permission denied reading '{path}'\nTry: chmod +r {path:?}")]
    PermissionDenied { path: PathBuf },

    /// The input string is not a valid file path or URL.
    #[error("Invalid input '{input}': not a file path or a valid HTTP/HTTPS URL")]
    InvalidInput { input: String },

    /// HTTP URL was syntactically valid but download failed.
    #[error("Failed to download '{url}': {reason}\nCheck your internet connection.")]
    DownloadFailed { url: String, reason: String },

    /// Download exceeded the configured timeout.
    #[error("Download timed out after {secs}s for '{url}'\nIncrease --download-timeout.")]
    DownloadTimeout { url: String, secs: u64 },

    /// The file exists and was read, but is not a PDF.
    #[error("File is not a valid PDF: '{path}'\nFirst bytes: {magic:?}")]
    NotAPdf { path: PathBuf, magic: [u8; 4] },

    // ── PDF errors ────────────────────────────────────────────────────────
    /// PDF header/trailer/xref is corrupt and cannot be parsed.
    #[error("PDF '{path}' is corrupt: {detail}")]
    CorruptPdf { path: PathBuf, detail: String },

    /// PDF requires a password but none was provided.
    #[error("PDF '{path}' is encrypted and requires a password.\nProvide it with --password <PASSWORD>.")]
    PasswordRequired { path: PathBuf },

    /// A password was provided but it is wrong.
    #[error("Wrong password for PDF '{path}'")]
    WrongPassword { path: PathBuf },

    /// Could not bind to a pdfium library.
    #[error(
        "Failed to bind to pdfium library: {0}\n\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium, or place libpdfium next to the binary."
    )]
    PdfiumBindingFailed(String),

    // ── LLM errors ────────────────────────────────────────────────────────
    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },

    /// A synthesis call exhausted its retries. Recoverable: `partial` holds
    /// the interrupted pipeline when the entry point had one, and
    /// [`crate::tutorial::resume_tutorial`] continues from it.
    #[error("{failure}")]
    Generation {
        failure: GenerationFailure,
        partial: Option<Box<PartialTutorial>>,
    },

    // ── I/O errors ────────────────────────────────────────────────────────
    /// Could not create or write an output file.
    #[error("Failed to write output file '{path}': {source}")]
    OutputWriteFailed {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed on a single field.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Synthesis cadence cannot keep up with the accumulator window: pages
    /// would be evicted before any synthesis call saw them.
    #[error(
        "batch size {batch_size} exceeds the context window: {max_context_tokens} tokens \
hold about {window_pages} page(s) of ~{page_token_estimate} tokens.\n\
Lower --batch-size or raise --max-context-tokens."
    )]
    Configuration {
        batch_size: usize,
        window_pages: usize,
        max_context_tokens: usize,
        page_token_estimate: usize,
    },

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<GenerationFailure> for TutorialError {
    fn from(failure: GenerationFailure) -> Self {
        TutorialError::Generation {
            failure,
            partial: None,
        }
    }
}

impl TutorialError {
    /// Attach the interrupted pipeline to a generation failure.
    pub(crate) fn interrupted(failure: GenerationFailure, partial: PartialTutorial) -> Self {
        TutorialError::Generation {
            failure,
            partial: Some(Box::new(partial)),
        }
    }

    /// The failed synthesis batch, if this is a generation failure.
    pub fn generation_failure(&self) -> Option<&GenerationFailure> {
        match self {
            TutorialError::Generation { failure, .. } => Some(failure),
            _ => None,
        }
    }

    /// Take the interrupted run out of a generation failure.
    pub fn into_partial(self) -> Option<PartialTutorial> {
        match self {
            TutorialError::Generation { partial, .. } => partial.map(|p| *p),
            _ => None,
        }
    }
}

/// A non-fatal problem attached to a page.
///
/// Issues never abort the run. They are logged when raised, reported through
/// the progress callback, and kept for the final output.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum PageIssue {
    /// The page (or one of its images) could not be read. A page-level
    /// extraction error leaves a gap marker in the assembled document.
    #[error("Page {page}: extraction failed: {detail}")]
    Extraction { page: usize, detail: String },

    /// The page alone did not fit the context window and was truncated.
    #[error("Page {page}: {tokens} tokens exceed the {max_tokens}-token window; kept {kept_tokens}")]
    BudgetExceeded {
        page: usize,
        tokens: usize,
        max_tokens: usize,
        kept_tokens: usize,
    },

    /// A page left the context window before any synthesis call consumed it.
    #[error("Page {page}: evicted from the context window before synthesis")]
    EvictedBeforeSynthesis { page: usize },
}

impl PageIssue {
    /// 1-based page the issue belongs to.
    pub fn page(&self) -> usize {
        match self {
            PageIssue::Extraction { page, .. }
            | PageIssue::BudgetExceeded { page, .. }
            | PageIssue::EvictedBeforeSynthesis { page } => *page,
        }
    }
}

/// Why a single model call failed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GenerationError {
    /// HTTP 429 or equivalent. `retry_after_secs` overrides backoff when set.
    #[error("rate limited{}", .retry_after_secs.map(|s| format!(" (retry after {s}s)")).unwrap_or_default())]
    RateLimited { retry_after_secs: Option<u64> },

    /// The call did not complete within the per-call timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },

    /// The provider answered but the content is unusable (empty, malformed).
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Any other provider error.
    #[error("provider error: {0}")]
    Api(String),
}

/// 5xx status or the wording providers use for a temporarily unavailable
/// backend.
static SERVER_SIDE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b5\d\d\b|unavailable|overloaded|internal server error|bad gateway")
        .expect("server-side pattern is valid")
});

impl GenerationError {
    /// Whether another attempt can succeed. Provider errors other than
    /// server-side ones (auth, bad request, unknown model) fail fast.
    pub fn is_retryable(&self) -> bool {
        match self {
            GenerationError::RateLimited { .. }
            | GenerationError::Timeout { .. }
            | GenerationError::InvalidResponse(_) => true,
            GenerationError::Api(message) => SERVER_SIDE.is_match(message),
        }
    }
}

/// A synthesis call that failed after every retry.
///
/// The draft is unchanged; pages `first_page..=last_page` remain pending.
#[derive(Debug, Clone, Error)]
#[error("Tutorial synthesis failed for pages {first_page}-{last_page} after {attempts} attempt(s): {last_error}")]
pub struct GenerationFailure {
    pub first_page: usize,
    pub last_page: usize,
    pub attempts: u32,
    pub last_error: GenerationError,
}

impl GenerationFailure {
    /// The failed page range as an inclusive `(first, last)` pair.
    pub fn page_range(&self) -> (usize, usize) {
        (self.first_page, self.last_page)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn configuration_error_mentions_batch_size() {
        let e = TutorialError::Configuration {
            batch_size: 12,
            window_pages: 4,
            max_context_tokens: 4000,
            page_token_estimate: 1000,
        };
        let msg = e.to_string();
        assert!(msg.contains("batch size 12"), "got: {msg}");
        assert!(msg.contains("4 page(s)"), "got: {msg}");
    }

    #[test]
    fn rate_limit_display_with_retry() {
        let e = GenerationError::RateLimited {
            retry_after_secs: Some(30),
        };
        assert_eq!(e.to_string(), "rate limited (retry after 30s)");
    }

    #[test]
    fn rate_limit_display_without_retry() {
        let e = GenerationError::RateLimited {
            retry_after_secs: None,
        };
        assert_eq!(e.to_string(), "rate limited");
    }

    #[test]
    fn generation_failure_reports_range() {
        let f = GenerationFailure {
            first_page: 2,
            last_page: 2,
            attempts: 4,
            last_error: GenerationError::Timeout { secs: 60 },
        };
        assert_eq!(f.page_range(), (2, 2));
        let msg = f.to_string();
        assert!(msg.contains("pages 2-2"), "got: {msg}");
        assert!(msg.contains("timed out after 60s"), "got: {msg}");

        let wrapped: TutorialError = f.into();
        assert_eq!(wrapped.generation_failure().map(|f| f.page_range()), Some((2, 2)));
        assert!(wrapped.into_partial().is_none());
    }

    #[test]
    fn only_transient_errors_are_retryable() {
        assert!(GenerationError::Timeout { secs: 5 }.is_retryable());
        assert!(GenerationError::RateLimited {
            retry_after_secs: None
        }
        .is_retryable());
        assert!(GenerationError::Api("503 service unavailable".into()).is_retryable());
        assert!(GenerationError::Api("upstream overloaded".into()).is_retryable());
        assert!(!GenerationError::Api("401 unauthorized".into()).is_retryable());
        assert!(!GenerationError::Api("model 'gpt-9' not found".into()).is_retryable());
    }

    #[test]
    fn page_issue_page_accessor() {
        let issue = PageIssue::BudgetExceeded {
            page: 7,
            tokens: 150,
            max_tokens: 100,
            kept_tokens: 98,
        };
        assert_eq!(issue.page(), 7);
        assert!(issue.to_string().contains("150 tokens"));
    }
}
