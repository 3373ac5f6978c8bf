//! Whole-document entry points.
//!
//! [`generate_tutorial`] resolves the input, extracts pages with pdfium, runs
//! the [`TutorialPipeline`] and assembles the Markdown. The `_from_source`
//! variant skips pdfium entirely and is what tests and embedders with their
//! own extraction use. Use [`crate::stream::tutorial_stream`] to observe
//! fragments and draft updates while the run is in progress.
//!
//! A synthesis batch that fails after every retry comes back as
//! [`TutorialError::Generation`] carrying a [`PartialTutorial`]; pass it to
//! [`resume_tutorial`] to continue where the run stopped, or to
//! [`partial_output`] to render what was done.

use crate::config::TutorialConfig;
use crate::error::{PageIssue, TutorialError};
use crate::output::{DocumentMetadata, FinalDocument, ImageManifest, TutorialOutput, TutorialStats};
use crate::pipeline::assemble::{assemble, AssembleOptions};
use crate::pipeline::extract::{inspect_pdf, PdfiumSource};
use crate::pipeline::input;
use crate::pipeline::source::PageSource;
use crate::pipeline::session::PartialTutorial;
use crate::pipeline::TutorialPipeline;
use crate::report::render_report;
use std::io::Write;
use std::path::Path;
use tracing::{info, warn};

/// File name of the assembled tutorial inside an output directory.
pub const TUTORIAL_FILE: &str = "tutorial.md";
/// File name of the image manifest inside an output directory.
pub const MANIFEST_FILE: &str = "results.json";
/// File name of the HTML image report inside an output directory.
pub const REPORT_FILE: &str = "report.html";

/// Generate a tutorial from a PDF path or URL.
///
/// Returns `Err` for fatal problems (unreadable input, no provider, a
/// synthesis batch that failed after all retries). Unreadable pages and
/// truncated pages are reported in [`TutorialOutput::issues`] instead.
pub async fn generate_tutorial(
    input_str: impl AsRef<str>,
    config: &TutorialConfig,
) -> Result<TutorialOutput, TutorialError> {
    let input_str = input_str.as_ref();
    info!("Starting tutorial generation: {}", input_str);
    config.check_cadence()?;

    let resolved = input::resolve_input(input_str, config.download_timeout_secs).await?;
    let mut source = PdfiumSource::open(resolved.path(), config).await?;
    generate_tutorial_from_source(resolved.document_id(), &mut source, config).await
}

/// Generate a tutorial from any [`PageSource`].
pub async fn generate_tutorial_from_source(
    document_id: &str,
    source: &mut dyn PageSource,
    config: &TutorialConfig,
) -> Result<TutorialOutput, TutorialError> {
    let mut pipeline = TutorialPipeline::from_config(document_id, config)?;
    match pipeline.run(source).await {
        Ok(()) => Ok(into_output(pipeline, config)),
        Err(failure) => Err(TutorialError::interrupted(
            failure,
            PartialTutorial::new(pipeline),
        )),
    }
}

/// Continue an interrupted run over the same PDF.
///
/// The pending batch is retried first; extraction then restarts and skips
/// the pages the interrupted run already consumed. A second failure returns
/// a new checkpoint.
pub async fn resume_tutorial(
    partial: PartialTutorial,
    input_str: impl AsRef<str>,
    config: &TutorialConfig,
) -> Result<TutorialOutput, TutorialError> {
    let resolved = input::resolve_input(input_str.as_ref(), config.download_timeout_secs).await?;
    let mut source = PdfiumSource::open(resolved.path(), config).await?;
    resume_tutorial_from_source(partial, &mut source, config).await
}

/// Continue an interrupted run over any [`PageSource`]: the source the run
/// stopped on, or a fresh one over the same document.
pub async fn resume_tutorial_from_source(
    partial: PartialTutorial,
    source: &mut dyn PageSource,
    config: &TutorialConfig,
) -> Result<TutorialOutput, TutorialError> {
    let mut pipeline = partial.into_pipeline();
    match pipeline.resume(source).await {
        Ok(()) => Ok(into_output(pipeline, config)),
        Err(failure) => Err(TutorialError::interrupted(
            failure,
            PartialTutorial::new(pipeline),
        )),
    }
}

/// Render an interrupted run as it stands: every page consumed so far and
/// the draft as of the last successful update. The checkpoint stays
/// resumable.
pub fn partial_output(partial: &PartialTutorial, config: &TutorialConfig) -> TutorialOutput {
    let pipeline = partial.pipeline();
    render_output(
        pipeline.snapshot(),
        pipeline.issues().to_vec(),
        pipeline.stats().clone(),
        config,
    )
}

/// Assemble a finished pipeline into the caller-facing output.
pub(crate) fn into_output(pipeline: TutorialPipeline, config: &TutorialConfig) -> TutorialOutput {
    let (document, issues, stats) = pipeline.into_parts();
    render_output(document, issues, stats, config)
}

fn render_output(
    document: FinalDocument,
    issues: Vec<PageIssue>,
    stats: TutorialStats,
    config: &TutorialConfig,
) -> TutorialOutput {
    let markdown = assemble(
        &document,
        &AssembleOptions {
            include_metadata: config.include_metadata,
            page_separator: config.page_separator.clone(),
        },
    );
    TutorialOutput {
        markdown,
        document,
        issues,
        stats,
    }
}

/// Generate a tutorial and write it under `output_dir`:
///
/// ```text
/// output_dir/
/// ├── tutorial.md
/// ├── results.json
/// ├── report.html
/// └── images/image_{page}_{ordinal}.png
/// ```
///
/// Images go to `output_dir/images` unless the config carries its own
/// [`crate::storage::ImageStore`]. Files are written atomically. When a
/// synthesis batch fails, the partial document is written before the
/// [`TutorialError::Generation`] is returned.
pub async fn generate_tutorial_to_dir(
    input_str: impl AsRef<str>,
    output_dir: impl AsRef<Path>,
    config: &TutorialConfig,
) -> Result<TutorialOutput, TutorialError> {
    let output_dir = output_dir.as_ref();
    let mut config = config.clone();
    config.image_dir = output_dir.join("images");

    match generate_tutorial(input_str, &config).await {
        Ok(output) => {
            write_outputs(&output, output_dir).await?;
            Ok(output)
        }
        Err(TutorialError::Generation {
            failure,
            partial: Some(partial),
        }) => {
            write_outputs(&partial_output(&partial, &config), output_dir).await?;
            warn!(
                "Wrote partial tutorial to {} (pages {:?} not in the draft)",
                output_dir.display(),
                partial.pipeline().pending_pages()
            );
            Err(TutorialError::Generation {
                failure,
                partial: Some(partial),
            })
        }
        Err(e) => Err(e),
    }
}

/// Write `tutorial.md`, `results.json` and `report.html` for a run.
pub async fn write_outputs(output: &TutorialOutput, output_dir: &Path) -> Result<(), TutorialError> {
    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| TutorialError::OutputWriteFailed {
            path: output_dir.to_path_buf(),
            source: e,
        })?;

    write_atomic(&output_dir.join(TUTORIAL_FILE), output.markdown.as_bytes()).await?;

    let manifest: ImageManifest = output.manifest();
    let json = serde_json::to_vec_pretty(&manifest)
        .map_err(|e| TutorialError::Internal(format!("manifest serialisation: {}", e)))?;
    write_atomic(&output_dir.join(MANIFEST_FILE), &json).await?;
    write_atomic(
        &output_dir.join(REPORT_FILE),
        render_report(&manifest).as_bytes(),
    )
    .await?;

    info!(
        "Wrote {} ({} image(s)) to {}",
        TUTORIAL_FILE,
        manifest.descriptions.len(),
        output_dir.display()
    );
    Ok(())
}

/// Temp file + rename, so readers never see a partial file.
async fn write_atomic(path: &Path, contents: &[u8]) -> Result<(), TutorialError> {
    let write_failed = |e: std::io::Error| TutorialError::OutputWriteFailed {
        path: path.to_path_buf(),
        source: e,
    };
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    tokio::fs::write(&tmp, contents).await.map_err(write_failed)?;
    tokio::fs::rename(&tmp, path).await.map_err(write_failed)
}

/// Synchronous wrapper around [`generate_tutorial`].
///
/// Creates a temporary tokio runtime internally.
pub fn generate_tutorial_sync(
    input_str: impl AsRef<str>,
    config: &TutorialConfig,
) -> Result<TutorialOutput, TutorialError> {
    tokio::runtime::Runtime::new()
        .map_err(|e| TutorialError::Internal(format!("Failed to create tokio runtime: {}", e)))?
        .block_on(generate_tutorial(input_str, config))
}

/// Generate a tutorial from PDF bytes held in memory.
///
/// The bytes are written to a managed temp file that is removed on return.
/// The document id is `document_id` rather than the temp file's name.
pub async fn generate_tutorial_from_bytes(
    bytes: &[u8],
    document_id: &str,
    config: &TutorialConfig,
) -> Result<TutorialOutput, TutorialError> {
    config.check_cadence()?;
    let mut tmp = tempfile::NamedTempFile::new()
        .map_err(|e| TutorialError::Internal(format!("tempfile: {e}")))?;
    tmp.write_all(bytes)
        .map_err(|e| TutorialError::Internal(format!("tempfile write: {e}")))?;

    if bytes.len() < 4 || &bytes[..4] != b"%PDF" {
        let mut magic = [0u8; 4];
        let n = bytes.len().min(4);
        magic[..n].copy_from_slice(&bytes[..n]);
        return Err(TutorialError::NotAPdf {
            path: tmp.path().to_path_buf(),
            magic,
        });
    }

    let mut source = PdfiumSource::open(tmp.path(), config).await?;
    generate_tutorial_from_source(document_id, &mut source, config).await
}

/// Read PDF metadata without extracting content or calling a model.
pub async fn inspect(input_str: impl AsRef<str>) -> Result<DocumentMetadata, TutorialError> {
    let resolved = input::resolve_input(input_str.as_ref(), 120).await?;
    inspect_pdf(resolved.path(), None).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::{GenerationError, PageIssue};
    use crate::llm::{Generation, GenerationRequest, Generator};
    use crate::output::{RawImage, RawPage};
    use crate::pipeline::source::MemorySource;
    use crate::storage::MemoryStore;
    use crate::tokens::WordCounter;
    use async_trait::async_trait;
    use std::sync::Arc;

    struct Echo;

    #[async_trait]
    impl Generator for Echo {
        async fn generate(&self, req: &GenerationRequest) -> Result<Generation, GenerationError> {
            if req.image.is_some() {
                Ok(Generation::new("diagram"))
            } else {
                Ok(Generation::new("## Steps\n\n1. Do it"))
            }
        }
    }

    fn config() -> TutorialConfig {
        TutorialConfig::builder()
            .generator(Arc::new(Echo))
            .token_counter(Arc::new(WordCounter))
            .image_store(Arc::new(MemoryStore::new()))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn from_source_assembles_markdown() {
        let mut src = MemorySource::new(vec![
            RawPage::new(1, "Intro"),
            RawPage::new(2, "Open it").with_image(RawImage::png(vec![0])),
        ]);
        let out = generate_tutorial_from_source("manual", &mut src, &config())
            .await
            .unwrap();

        assert!(out.markdown.starts_with("# manual\n\n## Page 1\n\nIntro\n"));
        assert!(out.markdown.contains("![image_2_1.png](memory://image_2_1.png)\n\n*diagram*"));
        assert!(out.markdown.ends_with("## Tutorial\n\n## Steps\n\n1. Do it\n"));
        assert_eq!(out.stats.synthesis_calls, 2);
        assert_eq!(out.manifest().descriptions.len(), 1);
    }

    #[tokio::test]
    async fn write_outputs_creates_files() {
        let dir = tempfile::tempdir().unwrap();
        let mut src = MemorySource::from_results(vec![
            Ok(RawPage::new(1, "Intro")),
            Err(PageIssue::Extraction {
                page: 2,
                detail: "blank".into(),
            }),
        ]);
        let out = generate_tutorial_from_source("doc", &mut src, &config())
            .await
            .unwrap();
        write_outputs(&out, dir.path()).await.unwrap();

        let md = std::fs::read_to_string(dir.path().join(TUTORIAL_FILE)).unwrap();
        assert_eq!(md, out.markdown);
        let manifest: ImageManifest =
            serde_json::from_slice(&std::fs::read(dir.path().join(MANIFEST_FILE)).unwrap()).unwrap();
        assert_eq!(manifest.document_id, "doc");
        let report = std::fs::read_to_string(dir.path().join(REPORT_FILE)).unwrap();
        assert!(report.contains("<title>Image report - doc</title>"));
        assert!(!dir.path().join("tutorial.md.tmp").exists());
    }

    #[tokio::test]
    async fn bytes_that_are_not_a_pdf_are_rejected() {
        let err = generate_tutorial_from_bytes(b"GIF89a", "x", &config())
            .await
            .unwrap_err();
        assert!(matches!(err, TutorialError::NotAPdf { .. }));
    }
}
