//! Input resolution: turn a path or URL into a readable local PDF.
//!
//! pdfium opens files, not buffers, so downloads land in a `TempDir` that
//! lives as long as the returned [`ResolvedPdf`]. Every input is checked for
//! the `%PDF` magic before pdfium sees it.

use crate::error::TutorialError;
use std::io::Read;
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use tracing::{debug, info};

const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// A local PDF ready to open, plus the id used to name its outputs.
#[derive(Debug)]
pub struct ResolvedPdf {
    path: PathBuf,
    document_id: String,
    _temp_dir: Option<TempDir>,
}

impl ResolvedPdf {
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File stem of the PDF, e.g. `manual` for `docs/manual.pdf`.
    pub fn document_id(&self) -> &str {
        &self.document_id
    }
}

pub fn is_url(input: &str) -> bool {
    input.starts_with("http://") || input.starts_with("https://")
}

/// Resolve a local path or HTTP(S) URL.
pub async fn resolve_input(input: &str, timeout_secs: u64) -> Result<ResolvedPdf, TutorialError> {
    if input.trim().is_empty() {
        return Err(TutorialError::InvalidInput {
            input: input.to_string(),
        });
    }
    if is_url(input) {
        download_url(input, timeout_secs).await
    } else {
        resolve_local(Path::new(input))
    }
}

/// `stem` of the path, or `"document"` when there is none.
pub fn document_id_for(path: &Path) -> String {
    path.file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "document".to_string())
}

/// Every `*.pdf` (any case) directly inside `dir`, sorted by name.
pub fn pdfs_in_dir(dir: &Path) -> Result<Vec<PathBuf>, TutorialError> {
    let entries = std::fs::read_dir(dir).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => TutorialError::PermissionDenied {
            path: dir.to_path_buf(),
        },
        _ => TutorialError::FileNotFound {
            path: dir.to_path_buf(),
        },
    })?;

    let mut pdfs: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|p| {
            p.is_file()
                && p.extension()
                    .map(|ext| ext.eq_ignore_ascii_case("pdf"))
                    .unwrap_or(false)
        })
        .collect();
    pdfs.sort();
    debug!("Found {} PDF(s) in {}", pdfs.len(), dir.display());
    Ok(pdfs)
}

fn resolve_local(path: &Path) -> Result<ResolvedPdf, TutorialError> {
    if !path.is_file() {
        return Err(TutorialError::FileNotFound {
            path: path.to_path_buf(),
        });
    }

    let mut file = std::fs::File::open(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::PermissionDenied => TutorialError::PermissionDenied {
            path: path.to_path_buf(),
        },
        _ => TutorialError::FileNotFound {
            path: path.to_path_buf(),
        },
    })?;

    let mut magic = [0u8; 4];
    let read = file.read(&mut magic).unwrap_or(0);
    check_magic(path, &magic[..read])?;

    debug!("Resolved local PDF: {}", path.display());
    Ok(ResolvedPdf {
        path: path.to_path_buf(),
        document_id: document_id_for(path),
        _temp_dir: None,
    })
}

fn check_magic(path: &Path, head: &[u8]) -> Result<(), TutorialError> {
    if head.len() == PDF_MAGIC.len() && head == PDF_MAGIC {
        return Ok(());
    }
    let mut magic = [0u8; 4];
    magic[..head.len().min(4)].copy_from_slice(&head[..head.len().min(4)]);
    Err(TutorialError::NotAPdf {
        path: path.to_path_buf(),
        magic,
    })
}

async fn download_url(url: &str, timeout_secs: u64) -> Result<ResolvedPdf, TutorialError> {
    info!("Downloading PDF from: {}", url);
    let failed = |reason: String| TutorialError::DownloadFailed {
        url: url.to_string(),
        reason,
    };

    let client = reqwest::Client::builder()
        .timeout(std::time::Duration::from_secs(timeout_secs))
        .build()
        .map_err(|e| failed(e.to_string()))?;

    let response = client.get(url).send().await.map_err(|e| {
        if e.is_timeout() {
            TutorialError::DownloadTimeout {
                url: url.to_string(),
                secs: timeout_secs,
            }
        } else {
            failed(e.to_string())
        }
    })?;

    if !response.status().is_success() {
        return Err(failed(format!("HTTP {}", response.status())));
    }

    let filename = filename_from_url(url);
    let bytes = response.bytes().await.map_err(|e| failed(e.to_string()))?;

    let temp_dir = TempDir::new().map_err(|e| TutorialError::Internal(format!("tempdir: {}", e)))?;
    let path = temp_dir.path().join(&filename);
    check_magic(&path, &bytes[..bytes.len().min(4)])?;
    tokio::fs::write(&path, &bytes)
        .await
        .map_err(|e| TutorialError::Internal(format!("Failed to write temp file: {}", e)))?;

    info!("Downloaded {} bytes to {}", bytes.len(), path.display());
    Ok(ResolvedPdf {
        document_id: document_id_for(Path::new(&filename)),
        path,
        _temp_dir: Some(temp_dir),
    })
}

/// Last path segment of the URL when it looks like a file name.
fn filename_from_url(url: &str) -> String {
    reqwest::Url::parse(url)
        .ok()
        .and_then(|parsed| {
            parsed
                .path_segments()
                .and_then(|mut segments| segments.next_back().map(str::to_string))
        })
        .filter(|last| !last.is_empty() && last.contains('.'))
        .unwrap_or_else(|| "downloaded.pdf".to_string())
}
