//! PDF page extraction via pdfium: text layer plus embedded images.
//!
//! pdfium keeps thread-local state and blocks, so the whole document is read
//! on one `spawn_blocking` thread that hands pages over a channel of depth
//! one. Extraction of page N+1 overlaps with captioning of page N, and at
//! most two raw pages are in memory at a time.

use crate::config::{PageSelection, TutorialConfig};
use crate::error::{PageIssue, TutorialError};
use crate::output::{DocumentMetadata, RawPage};
use crate::pipeline::encode::encode_png;
use crate::pipeline::source::PageSource;
use async_trait::async_trait;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

type Opened = Result<(DocumentMetadata, usize), TutorialError>;

/// Streams selected pages of a PDF file in order.
pub struct PdfiumSource {
    metadata: DocumentMetadata,
    selected: usize,
    pages: mpsc::Receiver<Result<RawPage, PageIssue>>,
}

impl PdfiumSource {
    /// Open `path` and start extracting the pages chosen by `config.pages`.
    ///
    /// Fails up front for documents that cannot be opened at all (binding,
    /// password, corruption). Per-page failures arrive later as issues.
    pub async fn open(path: &Path, config: &TutorialConfig) -> Result<Self, TutorialError> {
        let path = path.to_path_buf();
        let password = config.password.clone();
        let selection = config.pages.clone();
        let (opened_tx, opened_rx) = oneshot::channel();
        let (page_tx, page_rx) = mpsc::channel(1);

        let worker = tokio::task::spawn_blocking(move || {
            extract_blocking(&path, password.as_deref(), &selection, opened_tx, page_tx)
        });

        let (metadata, selected) = match opened_rx.await {
            Ok(opened) => opened?,
            Err(_) => {
                let detail = match worker.await {
                    Err(e) => format!("PDF reader panicked: {}", e),
                    Ok(()) => "PDF reader exited before opening the document".to_string(),
                };
                return Err(TutorialError::Internal(detail));
            }
        };

        Ok(Self {
            metadata,
            selected,
            pages: page_rx,
        })
    }

    /// Number of pages this source will yield.
    pub fn selected_pages(&self) -> usize {
        self.selected
    }
}

#[async_trait]
impl PageSource for PdfiumSource {
    async fn next_page(&mut self) -> Option<Result<RawPage, PageIssue>> {
        self.pages.recv().await
    }

    fn metadata(&self) -> DocumentMetadata {
        self.metadata.clone()
    }

    fn page_count(&self) -> usize {
        self.selected
    }
}

/// Read document metadata only; no page content is touched.
pub async fn inspect_pdf(path: &Path, password: Option<&str>) -> Result<DocumentMetadata, TutorialError> {
    let path = path.to_path_buf();
    let password = password.map(str::to_string);
    tokio::task::spawn_blocking(move || {
        let pdfium = bind_pdfium()?;
        let document = load_document(&pdfium, &path, password.as_deref())?;
        Ok(read_metadata(&document))
    })
    .await
    .map_err(|e| TutorialError::Internal(format!("Metadata task panicked: {}", e)))?
}

fn extract_blocking(
    path: &Path,
    password: Option<&str>,
    selection: &PageSelection,
    opened_tx: oneshot::Sender<Opened>,
    page_tx: mpsc::Sender<Result<RawPage, PageIssue>>,
) {
    let pdfium = match bind_pdfium() {
        Ok(p) => p,
        Err(e) => {
            let _ = opened_tx.send(Err(e));
            return;
        }
    };
    let document = match load_document(&pdfium, path, password) {
        Ok(d) => d,
        Err(e) => {
            let _ = opened_tx.send(Err(e));
            return;
        }
    };

    let metadata = read_metadata(&document);
    let indices = selection.to_indices(metadata.page_count);
    info!(
        "PDF loaded: {} pages, {} selected",
        metadata.page_count,
        indices.len()
    );
    if opened_tx.send(Ok((metadata, indices.len()))).is_err() {
        return;
    }

    let pages = document.pages();
    for idx in indices {
        let page = read_page(&pages, idx);
        if page_tx.blocking_send(page).is_err() {
            debug!("Page receiver dropped; stopping extraction at page {}", idx + 1);
            return;
        }
    }
}

/// `PDFIUM_LIB_PATH` first, then a library next to the working directory,
/// then the system library.
fn bind_pdfium() -> Result<Pdfium, TutorialError> {
    if let Ok(lib) = std::env::var("PDFIUM_LIB_PATH") {
        let lib = PathBuf::from(lib);
        return Pdfium::bind_to_library(&lib)
            .map(Pdfium::new)
            .map_err(|e| TutorialError::PdfiumBindingFailed(format!("{}: {}", lib.display(), e)));
    }

    Pdfium::bind_to_library(Pdfium::pdfium_platform_library_name_at_path("./"))
        .or_else(|_| Pdfium::bind_to_system_library())
        .map(Pdfium::new)
        .map_err(|e| TutorialError::PdfiumBindingFailed(e.to_string()))
}

fn load_document<'a>(
    pdfium: &'a Pdfium,
    path: &Path,
    password: Option<&'a str>,
) -> Result<PdfDocument<'a>, TutorialError> {
    pdfium.load_pdf_from_file(path, password).map_err(|e| {
        let detail = format!("{:?}", e);
        if detail.to_lowercase().contains("password") {
            if password.is_some() {
                TutorialError::WrongPassword {
                    path: path.to_path_buf(),
                }
            } else {
                TutorialError::PasswordRequired {
                    path: path.to_path_buf(),
                }
            }
        } else {
            TutorialError::CorruptPdf {
                path: path.to_path_buf(),
                detail,
            }
        }
    })
}

fn read_metadata(document: &PdfDocument<'_>) -> DocumentMetadata {
    let metadata = document.metadata();
    let get_meta = |tag: PdfDocumentMetadataTagType| -> Option<String> {
        metadata.get(tag).and_then(|t| {
            let v = t.value().trim().to_string();
            if v.is_empty() {
                None
            } else {
                Some(v)
            }
        })
    };

    DocumentMetadata {
        title: get_meta(PdfDocumentMetadataTagType::Title),
        author: get_meta(PdfDocumentMetadataTagType::Author),
        subject: get_meta(PdfDocumentMetadataTagType::Subject),
        page_count: document.pages().len() as usize,
    }
}

/// Text and images of one page (0-based `idx`).
///
/// A page whose text layer cannot be read is an issue. An image that cannot
/// be decoded is recorded on the page and skipped; ordinals count only the
/// images that survive, so names stay dense.
fn read_page(pages: &PdfPages<'_>, idx: usize) -> Result<RawPage, PageIssue> {
    let page_num = idx + 1;
    let extraction = |detail: String| PageIssue::Extraction {
        page: page_num,
        detail,
    };

    let page = pages
        .get(idx as u16)
        .map_err(|e| extraction(format!("{:?}", e)))?;
    let text = page
        .text()
        .map_err(|e| extraction(format!("text layer: {:?}", e)))?
        .all();

    let mut raw = RawPage::new(page_num, text);
    for (object_index, object) in page.objects().iter().enumerate() {
        let Some(image) = object.as_image_object() else {
            continue;
        };
        let encoded = image
            .get_raw_image()
            .map_err(|e| format!("{:?}", e))
            .and_then(|img| encode_png(&img).map_err(|e| e.to_string()));
        match encoded {
            Ok(img) => raw.images.push(img),
            Err(detail) => {
                warn!("Page {}: skipping image object {}: {}", page_num, object_index, detail);
                raw.issues.push(extraction(format!(
                    "image object {}: {}",
                    object_index, detail
                )));
            }
        }
    }

    debug!(
        "Extracted page {}: {} chars, {} image(s)",
        page_num,
        raw.text.len(),
        raw.images.len()
    );
    Ok(raw)
}
