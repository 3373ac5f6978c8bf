//! Progress-callback trait for per-page tutorial events.
//!
//! Inject an [`Arc<dyn TutorialProgressCallback>`] via
//! [`crate::config::TutorialConfigBuilder::progress_callback`] to observe the
//! run as pages are read, synthesis calls land, and issues are recorded.
//!
//! # Example
//!
//! ```rust
//! use pdf2tutorial::{TutorialConfig, TutorialProgressCallback};
//! use std::sync::{Arc, atomic::{AtomicUsize, Ordering}};
//!
//! struct CountingCallback {
//!     updates: AtomicUsize,
//! }
//!
//! impl TutorialProgressCallback for CountingCallback {
//!     fn on_synthesis_complete(&self, first_page: usize, last_page: usize, draft_len: usize) {
//!         let n = self.updates.fetch_add(1, Ordering::SeqCst) + 1;
//!         eprintln!("update #{n}: pages {first_page}-{last_page}, {draft_len} bytes");
//!     }
//! }
//!
//! let config = TutorialConfig::builder()
//!     .progress_callback(Arc::new(CountingCallback { updates: AtomicUsize::new(0) }))
//!     .build()
//!     .unwrap();
//! ```

use crate::error::PageIssue;
use std::sync::Arc;

/// Called by the tutorial pipeline as it works through the document.
///
/// Pages are processed strictly in order, so calls arrive sequentially, but
/// the callback is shared with spawned tasks and must be `Send + Sync`.
/// Every method defaults to a no-op.
pub trait TutorialProgressCallback: Send + Sync {
    /// Called once before the first page is read.
    fn on_run_start(&self, total_pages: usize) {
        let _ = total_pages;
    }

    /// Called when a page has been read and is about to be captioned.
    fn on_page_start(&self, page_num: usize, total_pages: usize) {
        let _ = (page_num, total_pages);
    }

    /// Called when a page's fragment has entered the context window.
    ///
    /// `image_count` counts images that were stored for the page.
    fn on_page_complete(&self, page_num: usize, total_pages: usize, image_count: usize) {
        let _ = (page_num, total_pages, image_count);
    }

    /// Called after each successful synthesis call.
    fn on_synthesis_complete(&self, first_page: usize, last_page: usize, draft_len: usize) {
        let _ = (first_page, last_page, draft_len);
    }

    /// Called for every non-fatal page issue as it is recorded.
    fn on_issue(&self, issue: &PageIssue) {
        let _ = issue;
    }

    /// Called once the run has finished, successfully or not.
    fn on_run_complete(&self, pages_processed: usize, synthesis_calls: usize) {
        let _ = (pages_processed, synthesis_calls);
    }
}

/// Default when no callback is configured.
pub struct NoopProgressCallback;

impl TutorialProgressCallback for NoopProgressCallback {}

/// Type stored in [`crate::config::TutorialConfig`].
pub type ProgressCallback = Arc<dyn TutorialProgressCallback>;
