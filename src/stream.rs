//! Streaming API: observe a run while it happens.
//!
//! [`tutorial_stream`] starts the pipeline on a spawned task and returns a
//! stream of [`TutorialEvent`]s. Fragments arrive in page order as each page
//! enters the window, draft updates after every synthesis call, and the
//! stream always ends with exactly one `Finished` or `Failed`.

use crate::config::TutorialConfig;
use crate::error::{PageIssue, TutorialError};
use crate::output::{PageFragment, TutorialDraft, TutorialOutput};
use crate::pipeline::extract::PdfiumSource;
use crate::pipeline::input;
use crate::pipeline::source::PageSource;
use crate::pipeline::session::PartialTutorial;
use crate::pipeline::TutorialPipeline;
use crate::tutorial::into_output;
use std::pin::Pin;
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::Stream;
use tracing::{debug, info};

/// Buffered events before the pipeline waits for the consumer.
const EVENT_BUFFER: usize = 32;

#[derive(Debug)]
pub enum TutorialEvent {
    /// A page became a fragment and entered the context window.
    FragmentReady(PageFragment),
    /// A synthesis call succeeded; this is the new draft.
    DraftUpdated(TutorialDraft),
    /// A non-fatal problem was recorded.
    Issue(PageIssue),
    /// The run completed; carries the assembled output.
    Finished(Box<TutorialOutput>),
    /// The run stopped. A synthesis failure carries the interrupted run as a
    /// [`PartialTutorial`], ready for [`crate::tutorial::resume_tutorial`].
    Failed(TutorialError),
}

pub type TutorialStream = Pin<Box<dyn Stream<Item = TutorialEvent> + Send>>;

/// Generate a tutorial from a PDF path or URL, streaming events.
///
/// Returns `Err` only for problems found before the run starts (bad input,
/// unopenable PDF, missing provider, bad cadence).
///
/// # Example
/// ```rust,no_run
/// use pdf2tutorial::{tutorial_stream, TutorialConfig, TutorialEvent};
/// use futures::StreamExt;
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = TutorialConfig::default();
/// let mut events = tutorial_stream("manual.pdf", &config).await?;
/// while let Some(event) = events.next().await {
///     match event {
///         TutorialEvent::DraftUpdated(d) => eprintln!("draft through page {}", d.covered_through),
///         TutorialEvent::Finished(out) => println!("{}", out.markdown),
///         TutorialEvent::Failed(e) => eprintln!("error: {e}"),
///         _ => {}
///     }
/// }
/// # Ok(())
/// # }
/// ```
pub async fn tutorial_stream(
    input_str: impl AsRef<str>,
    config: &TutorialConfig,
) -> Result<TutorialStream, TutorialError> {
    let input_str = input_str.as_ref();
    info!("Starting streaming tutorial generation: {}", input_str);
    config.check_cadence()?;

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let source = PdfiumSource::open(resolved.path(), config).await?;
    let pipeline = TutorialPipeline::from_config(resolved.document_id(), config)?;
    Ok(spawn_run(pipeline, Box::new(source), config.clone(), Some(resolved)))
}

/// Stream a run over any [`PageSource`].
pub fn tutorial_stream_from_source(
    document_id: &str,
    source: Box<dyn PageSource>,
    config: &TutorialConfig,
) -> Result<TutorialStream, TutorialError> {
    let pipeline = TutorialPipeline::from_config(document_id, config)?;
    Ok(spawn_run(pipeline, source, config.clone(), None))
}

/// `resolved` keeps a downloaded file alive until the run ends.
fn spawn_run(
    pipeline: TutorialPipeline,
    mut source: Box<dyn PageSource>,
    config: TutorialConfig,
    resolved: Option<input::ResolvedPdf>,
) -> TutorialStream {
    let (tx, rx) = mpsc::channel(EVENT_BUFFER);
    let mut pipeline = pipeline.with_events(tx.clone());

    tokio::spawn(async move {
        let result = pipeline.run(source.as_mut()).await;
        let last = match result {
            Ok(()) => TutorialEvent::Finished(Box::new(into_output(pipeline, &config))),
            Err(failure) => TutorialEvent::Failed(TutorialError::interrupted(
                failure,
                PartialTutorial::new(pipeline),
            )),
        };
        if tx.send(last).await.is_err() {
            debug!("Stream consumer dropped before the run finished");
        }
        drop(resolved);
    });

    Box::pin(ReceiverStream::new(rx))
}
