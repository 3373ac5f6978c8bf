//! The tutorial pipeline: one document, page by page.
//!
//! ```text
//! RawPage ─▶ normalize ─▶ caption ─▶ PageFragment ─▶ window ─▶ synthesize
//!                                        │                        │
//!                                        ▼                        ▼
//!                                    fragments                  draft
//! ```
//!
//! All state lives in [`TutorialPipeline`] and is consistent between pages.
//! A synthesis failure leaves the draft as it was and the batch pending, so
//! a caller can checkpoint [`TutorialPipeline::draft`] and
//! [`TutorialPipeline::fragments`], then resume with
//! [`TutorialPipeline::flush`] or [`TutorialPipeline::resume`]. The
//! whole-document entry points hand the interrupted pipeline back as a
//! [`PartialTutorial`].

use crate::config::TutorialConfig;
use crate::error::{GenerationFailure, PageIssue, TutorialError};
use crate::llm::{resolve_generator, Generator};
use crate::output::{
    DocumentMetadata, FinalDocument, PageFragment, PageGap, RawPage, TutorialDraft, TutorialStats,
};
use crate::pipeline::accumulator::ContextAccumulator;
use crate::pipeline::caption::ImageCaptioner;
use crate::pipeline::normalize::normalize;
use crate::pipeline::source::PageSource;
use crate::pipeline::synthesize::TutorialSynthesizer;
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::storage::{DirectoryStore, ImageStore};
use crate::stream::TutorialEvent;
use crate::tokens::{counter_for, TokenCounter};
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

pub struct TutorialPipeline {
    document_id: String,
    metadata: DocumentMetadata,
    captioner: ImageCaptioner,
    accumulator: ContextAccumulator,
    synthesizer: TutorialSynthesizer,
    batch_size: usize,
    fragments: Vec<PageFragment>,
    gaps: Vec<PageGap>,
    draft: TutorialDraft,
    /// Pages appended since the last successful synthesis, in order.
    pending: Vec<usize>,
    issues: Vec<PageIssue>,
    stats: TutorialStats,
    progress: ProgressCallback,
    events: Option<mpsc::Sender<TutorialEvent>>,
    total_pages: usize,
    /// Highest page consumed from a source, fragment or gap.
    last_page: usize,
}

impl fmt::Debug for TutorialPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TutorialPipeline")
            .field("document_id", &self.document_id)
            .field("batch_size", &self.batch_size)
            .field("fragments", &self.fragments.len())
            .field("gaps", &self.gaps.len())
            .field("pending", &self.pending)
            .field("last_page", &self.last_page)
            .field("covered_through", &self.draft.covered_through)
            .finish()
    }
}

impl TutorialPipeline {
    /// Build a pipeline with explicit collaborators.
    ///
    /// Fails with [`TutorialError::Configuration`] when `batch_size` pages
    /// cannot fit the context window.
    pub fn new(
        document_id: impl Into<String>,
        config: &TutorialConfig,
        generator: Arc<dyn Generator>,
        counter: Arc<dyn TokenCounter>,
        store: Arc<dyn ImageStore>,
    ) -> Result<Self, TutorialError> {
        config.check_cadence()?;
        Ok(Self {
            document_id: document_id.into(),
            metadata: DocumentMetadata::default(),
            captioner: ImageCaptioner::new(generator.clone(), store, config),
            accumulator: ContextAccumulator::new(
                config.max_context_tokens,
                config.oversize_keep_ratio,
                counter,
            ),
            synthesizer: TutorialSynthesizer::new(generator, config),
            batch_size: config.batch_size.max(1),
            fragments: Vec::new(),
            gaps: Vec::new(),
            draft: TutorialDraft::default(),
            pending: Vec::new(),
            issues: Vec::new(),
            stats: TutorialStats::default(),
            progress: config
                .progress_callback
                .clone()
                .unwrap_or_else(|| Arc::new(NoopProgressCallback)),
            events: None,
            total_pages: 0,
            last_page: 0,
        })
    }

    /// Build a pipeline from the config's overrides, falling back to the
    /// provider from the environment, the configured tokenizer, and a
    /// [`DirectoryStore`] at `config.image_dir`.
    pub fn from_config(
        document_id: impl Into<String>,
        config: &TutorialConfig,
    ) -> Result<Self, TutorialError> {
        config.check_cadence()?;
        let generator = resolve_generator(config)?;
        let counter = match config.token_counter {
            Some(ref c) => Arc::clone(c),
            None => counter_for(config.tokenizer)?,
        };
        let store: Arc<dyn ImageStore> = match config.image_store {
            Some(ref s) => Arc::clone(s),
            None => Arc::new(DirectoryStore::new(
                config.image_dir.clone(),
                config.image_link_prefix.clone(),
            )),
        };
        Self::new(document_id, config, generator, counter, store)
    }

    /// Forward fragments, draft updates and issues to `events` as they happen.
    pub fn with_events(mut self, events: mpsc::Sender<TutorialEvent>) -> Self {
        self.events = Some(events);
        self
    }

    pub fn set_metadata(&mut self, metadata: DocumentMetadata) {
        self.metadata = metadata;
    }

    /// Turn one page into a fragment, add it to the window, and synthesize
    /// once `batch_size` pages are pending.
    ///
    /// On `Err` the page's fragment is already recorded; only the draft
    /// update is outstanding.
    pub async fn process_page(&mut self, raw: RawPage) -> Result<(), GenerationFailure> {
        let page = raw.page_index;
        self.last_page = self.last_page.max(page);
        self.progress.on_page_start(page, self.total_pages);
        for issue in raw.issues {
            self.record_issue(issue).await;
        }

        let text = normalize(&raw.text);
        let mut images = Vec::with_capacity(raw.images.len());
        for (i, image) in raw.images.iter().enumerate() {
            let ordinal = i + 1;
            match self.captioner.caption(image, page, ordinal).await {
                Ok(captioned) => {
                    self.stats.images_stored += 1;
                    if captioned.description.captioned {
                        self.stats.images_captioned += 1;
                    }
                    self.stats.total_input_tokens += captioned.input_tokens;
                    self.stats.total_output_tokens += captioned.output_tokens;
                    images.push(captioned.description);
                }
                Err(e) => {
                    warn!("Page {}: image {} could not be stored: {}", page, ordinal, e);
                    self.record_issue(PageIssue::Extraction {
                        page,
                        detail: format!("image {} not stored: {}", ordinal, e),
                    })
                    .await;
                }
            }
        }

        let fragment = PageFragment {
            page_index: page,
            text,
            images,
        };
        let outcome = self.accumulator.append(&fragment);
        self.stats.pages_processed += 1;
        let image_count = fragment.images.len();
        self.emit(TutorialEvent::FragmentReady(fragment.clone())).await;
        self.fragments.push(fragment);

        if let Some(issue) = outcome.truncation {
            self.stats.truncated_pages += 1;
            self.record_issue(issue).await;
        }
        for evicted in outcome.evicted {
            self.stats.evicted_pages += 1;
            if self.pending.contains(&evicted) {
                warn!("Page {} left the context window before synthesis", evicted);
                self.record_issue(PageIssue::EvictedBeforeSynthesis { page: evicted })
                    .await;
            }
        }

        self.pending.push(page);
        self.progress
            .on_page_complete(page, self.total_pages, image_count);
        debug!(
            "Page {} ready; {} pending, window {:?}",
            page,
            self.pending.len(),
            self.accumulator.window_pages()
        );

        if self.pending.len() >= self.batch_size {
            self.synthesize().await?;
        }
        Ok(())
    }

    /// Register a page that produced no fragment.
    pub async fn record_gap(&mut self, page: usize, reason: impl Into<String>) {
        let reason = reason.into();
        self.last_page = self.last_page.max(page);
        warn!("Page {} skipped: {}", page, reason);
        self.stats.pages_skipped += 1;
        self.gaps.push(PageGap {
            page_index: page,
            reason: reason.clone(),
        });
        self.record_issue(PageIssue::Extraction {
            page,
            detail: reason,
        })
        .await;
    }

    /// Synthesize whatever is pending. Also the way to retry after a
    /// [`GenerationFailure`].
    pub async fn flush(&mut self) -> Result<(), GenerationFailure> {
        self.synthesize().await
    }

    /// Drive `source` to the end, then flush. Stops at the first
    /// [`GenerationFailure`], leaving the pipeline resumable.
    pub async fn run(&mut self, source: &mut dyn PageSource) -> Result<(), GenerationFailure> {
        self.metadata = source.metadata();
        self.total_pages = source.page_count();
        self.progress.on_run_start(self.total_pages);
        info!(
            "Tutorial run '{}': {} page(s), batch size {}",
            self.document_id, self.total_pages, self.batch_size
        );
        self.drive(source).await
    }

    /// Continue after a [`GenerationFailure`]: retry the pending batch, then
    /// drain `source`. Pages up to the last one already consumed are
    /// skipped, so `source` may be the interrupted source or a fresh one
    /// over the same document.
    pub async fn resume(&mut self, source: &mut dyn PageSource) -> Result<(), GenerationFailure> {
        info!(
            "Resuming '{}' after page {}; pending {:?}",
            self.document_id, self.last_page, self.pending
        );
        if self.total_pages == 0 {
            self.metadata = source.metadata();
            self.total_pages = source.page_count();
        }
        self.flush().await?;
        self.drive(source).await
    }

    async fn drive(&mut self, source: &mut dyn PageSource) -> Result<(), GenerationFailure> {
        let started = Instant::now();
        let result = self.drain(source).await;
        self.stats.total_duration_ms += started.elapsed().as_millis() as u64;
        self.progress
            .on_run_complete(self.stats.pages_processed, self.stats.synthesis_calls);

        match result {
            Ok(()) => info!(
                "Tutorial run '{}' done: {} page(s), {} update(s), {} issue(s)",
                self.document_id,
                self.stats.pages_processed,
                self.stats.synthesis_calls,
                self.issues.len()
            ),
            Err(ref failure) => error!("Tutorial run '{}' halted: {}", self.document_id, failure),
        }
        result
    }

    async fn drain(&mut self, source: &mut dyn PageSource) -> Result<(), GenerationFailure> {
        while let Some(next) = source.next_page().await {
            let page = match next {
                Ok(ref raw) => raw.page_index,
                Err(ref issue) => issue.page(),
            };
            if page <= self.last_page {
                debug!("Page {} already consumed; skipping", page);
                continue;
            }
            match next {
                Ok(raw) => self.process_page(raw).await?,
                Err(issue) => {
                    let page = issue.page();
                    let reason = match issue {
                        PageIssue::Extraction { detail, .. } => detail,
                        other => other.to_string(),
                    };
                    self.record_gap(page, reason).await;
                }
            }
        }
        self.flush().await
    }

    async fn synthesize(&mut self) -> Result<(), GenerationFailure> {
        let (first, last) = match (self.pending.first(), self.pending.last()) {
            (Some(&first), Some(&last)) => (first, last),
            _ => return Ok(()),
        };

        match self
            .synthesizer
            .update(&self.draft, &self.accumulator, first, last)
            .await
        {
            Ok(result) => {
                self.stats.synthesis_calls += 1;
                self.stats.synthesis_retries += result.retries as usize;
                self.stats.total_input_tokens += result.input_tokens;
                self.stats.total_output_tokens += result.output_tokens;
                self.draft = result.draft;
                self.pending.clear();
                self.progress
                    .on_synthesis_complete(first, last, self.draft.markdown.len());
                self.emit(TutorialEvent::DraftUpdated(self.draft.clone())).await;
                Ok(())
            }
            Err(failure) => {
                self.stats.synthesis_retries += failure.attempts.saturating_sub(1) as usize;
                Err(failure)
            }
        }
    }

    async fn record_issue(&mut self, issue: PageIssue) {
        self.progress.on_issue(&issue);
        self.emit(TutorialEvent::Issue(issue.clone())).await;
        self.issues.push(issue);
    }

    async fn emit(&self, event: TutorialEvent) {
        if let Some(ref tx) = self.events {
            if tx.send(event).await.is_err() {
                debug!("Event receiver dropped");
            }
        }
    }

    pub fn draft(&self) -> &TutorialDraft {
        &self.draft
    }

    pub fn fragments(&self) -> &[PageFragment] {
        &self.fragments
    }

    /// Pages already in `fragments()` whose content the draft does not cover yet.
    pub fn pending_pages(&self) -> &[usize] {
        &self.pending
    }

    pub fn issues(&self) -> &[PageIssue] {
        &self.issues
    }

    pub fn stats(&self) -> &TutorialStats {
        &self.stats
    }

    pub fn context(&self) -> &ContextAccumulator {
        &self.accumulator
    }

    /// Highest page number consumed so far.
    pub fn last_page(&self) -> usize {
        self.last_page
    }

    pub fn document_id(&self) -> &str {
        &self.document_id
    }

    /// The assembler's input as of now, leaving the pipeline usable.
    pub fn snapshot(&self) -> FinalDocument {
        FinalDocument {
            document_id: self.document_id.clone(),
            metadata: self.metadata.clone(),
            fragments: self.fragments.clone(),
            gaps: self.gaps.clone(),
            draft: self.draft.clone(),
        }
    }

    /// Freeze the pipeline into the assembler's input.
    pub fn finish(self) -> FinalDocument {
        self.into_parts().0
    }

    /// [`finish`](Self::finish) plus the issues and stats gathered on the way.
    pub fn into_parts(self) -> (FinalDocument, Vec<PageIssue>, TutorialStats) {
        if !self.pending.is_empty() {
            warn!(
                "Finishing '{}' with pages {:?} not in the tutorial",
                self.document_id, self.pending
            );
        }
        let doc = FinalDocument {
            document_id: self.document_id,
            metadata: self.metadata,
            fragments: self.fragments,
            gaps: self.gaps,
            draft: self.draft,
        };
        (doc, self.issues, self.stats)
    }
}

/// A run stopped by a [`GenerationFailure`].
///
/// Holds the interrupted pipeline: the draft as of the last successful
/// update, every fragment and gap so far, and the pending batch. Resume it
/// with [`crate::tutorial::resume_tutorial`] or
/// [`crate::tutorial::resume_tutorial_from_source`], or turn it into a
/// partial document with [`crate::tutorial::partial_output`].
pub struct PartialTutorial {
    pipeline: TutorialPipeline,
}

impl PartialTutorial {
    /// Event forwarding is detached; a stream consumer holding the
    /// checkpoint must not keep its own channel open.
    pub(crate) fn new(mut pipeline: TutorialPipeline) -> Self {
        pipeline.events = None;
        Self { pipeline }
    }

    pub fn pipeline(&self) -> &TutorialPipeline {
        &self.pipeline
    }

    pub fn into_pipeline(self) -> TutorialPipeline {
        self.pipeline
    }
}

impl fmt::Debug for PartialTutorial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("PartialTutorial").field(&self.pipeline).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GenerationError;
    use crate::llm::{Generation, GenerationRequest};
    use crate::output::RawImage;
    use crate::pipeline::source::MemorySource;
    use crate::storage::MemoryStore;
    use crate::tokens::WordCounter;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Captions images; numbers tutorial updates "v1", "v2", ...
    #[derive(Default)]
    struct Counting {
        updates: Mutex<usize>,
    }

    #[async_trait]
    impl Generator for Counting {
        async fn generate(&self, req: &GenerationRequest) -> Result<Generation, GenerationError> {
            if req.image.is_some() {
                return Ok(Generation::new("a screenshot"));
            }
            let mut n = self.updates.lock().unwrap();
            *n += 1;
            Ok(Generation::new(format!("v{}", *n)))
        }
    }

    fn pipeline(config: &TutorialConfig) -> TutorialPipeline {
        TutorialPipeline::new(
            "doc",
            config,
            Arc::new(Counting::default()),
            Arc::new(WordCounter),
            Arc::new(MemoryStore::new()),
        )
        .unwrap()
    }

    fn config(batch_size: usize) -> TutorialConfig {
        TutorialConfig::builder()
            .max_context_tokens(1000)
            .page_token_estimate(100)
            .batch_size(batch_size)
            .retry_backoff_ms(1)
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn synthesizes_every_batch() {
        let mut p = pipeline(&config(2));
        p.process_page(RawPage::new(1, "one")).await.unwrap();
        assert_eq!(p.pending_pages(), &[1]);
        assert!(p.draft().is_empty());

        p.process_page(RawPage::new(2, "two")).await.unwrap();
        assert!(p.pending_pages().is_empty());
        assert_eq!(p.draft().markdown, "v1");
        assert_eq!(p.draft().covered_through, 2);

        p.process_page(RawPage::new(3, "three")).await.unwrap();
        p.flush().await.unwrap();
        assert_eq!(p.draft().markdown, "v2");
        assert_eq!(p.stats().synthesis_calls, 2);
    }

    #[tokio::test]
    async fn flush_with_nothing_pending_is_a_no_op() {
        let mut p = pipeline(&config(1));
        p.flush().await.unwrap();
        assert_eq!(p.stats().synthesis_calls, 0);
    }

    #[tokio::test]
    async fn normalizes_text_and_captions_images() {
        let mut p = pipeline(&config(1));
        let raw = RawPage::new(4, "See  https://example.com\n for   details")
            .with_image(RawImage::png(vec![1]));
        p.process_page(raw).await.unwrap();

        let f = &p.fragments()[0];
        assert_eq!(f.text, "See for details");
        assert_eq!(f.images[0].reference.name, "image_4_1.png");
        assert_eq!(f.images[0].caption, "a screenshot");
        assert_eq!(p.stats().images_captioned, 1);
    }

    #[tokio::test]
    async fn source_errors_become_gaps() {
        let mut p = pipeline(&config(1));
        let mut src = MemorySource::from_results(vec![
            Ok(RawPage::new(1, "intro")),
            Err(PageIssue::Extraction {
                page: 2,
                detail: "no text layer".into(),
            }),
        ]);
        p.run(&mut src).await.unwrap();

        let (doc, issues, stats) = p.into_parts();
        assert_eq!(doc.fragments.len(), 1);
        assert_eq!(doc.gaps[0].page_index, 2);
        assert_eq!(doc.gaps[0].reason, "no text layer");
        assert_eq!(issues.len(), 1);
        assert_eq!(stats.pages_skipped, 1);
    }

    #[tokio::test]
    async fn reports_unsynthesized_eviction() {
        // Estimate says two pages fit; real pages are larger.
        let config = TutorialConfig {
            max_context_tokens: 20,
            page_token_estimate: 10,
            batch_size: 2,
            ..config(1)
        };
        let mut p = pipeline(&config);
        p.process_page(RawPage::new(1, "a b c d e f g h i j"))
            .await
            .unwrap();
        p.process_page(RawPage::new(2, "k l m n o p q r s t"))
            .await
            .unwrap();
        assert!(p
            .issues()
            .contains(&PageIssue::EvictedBeforeSynthesis { page: 1 }));
        assert_eq!(p.stats().evicted_pages, 1);
    }

    #[test]
    fn new_rejects_batch_larger_than_window() {
        let config = TutorialConfig {
            max_context_tokens: 100,
            page_token_estimate: 50,
            batch_size: 3,
            ..config(1)
        };
        let err = TutorialPipeline::new(
            "doc",
            &config,
            Arc::new(Counting::default()),
            Arc::new(WordCounter),
            Arc::new(MemoryStore::new()),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            TutorialError::Configuration {
                batch_size: 3,
                window_pages: 2,
                ..
            }
        ));
    }

    #[tokio::test]
    async fn resume_skips_pages_already_consumed() {
        let mut p = pipeline(&config(1));
        p.process_page(RawPage::new(1, "one")).await.unwrap();
        p.process_page(RawPage::new(2, "two")).await.unwrap();

        let mut fresh = MemorySource::new(vec![
            RawPage::new(1, "one"),
            RawPage::new(2, "two"),
            RawPage::new(3, "three"),
        ]);
        p.resume(&mut fresh).await.unwrap();

        let pages: Vec<usize> = p.fragments().iter().map(|f| f.page_index).collect();
        assert_eq!(pages, [1, 2, 3]);
        assert_eq!(p.last_page(), 3);
        assert_eq!(p.draft().markdown, "v3");
    }

    #[tokio::test]
    async fn events_are_forwarded() {
        let (tx, mut rx) = mpsc::channel(16);
        let mut p = pipeline(&config(1)).with_events(tx);
        p.process_page(RawPage::new(1, "x")).await.unwrap();
        drop(p);

        let mut kinds = Vec::new();
        while let Some(event) = rx.recv().await {
            kinds.push(match event {
                TutorialEvent::FragmentReady(_) => "fragment",
                TutorialEvent::DraftUpdated(_) => "draft",
                TutorialEvent::Issue(_) => "issue",
                TutorialEvent::Finished(_) | TutorialEvent::Failed(_) => "end",
            });
        }
        assert_eq!(kinds, ["fragment", "draft"]);
    }
}
