//! Data carried through the pipeline and returned to callers.
//!
//! Everything here is plain data: raw pages in, fragments and drafts in the
//! middle, [`TutorialOutput`] out. Types that end up on disk or in `--json`
//! output derive `Serialize`.

use crate::error::PageIssue;
use serde::{Deserialize, Serialize};

/// One page as read from the PDF source, before normalisation.
#[derive(Debug, Clone, Default)]
pub struct RawPage {
    /// 1-based page number.
    pub page_index: usize,
    pub text: String,
    pub images: Vec<RawImage>,
    /// Image-level problems met while reading the page; the page itself is usable.
    pub issues: Vec<PageIssue>,
}

impl RawPage {
    pub fn new(page_index: usize, text: impl Into<String>) -> Self {
        Self {
            page_index,
            text: text.into(),
            ..Default::default()
        }
    }

    pub fn with_image(mut self, image: RawImage) -> Self {
        self.images.push(image);
        self
    }
}

/// An encoded image pulled out of a page.
#[derive(Debug, Clone)]
pub struct RawImage {
    pub bytes: Vec<u8>,
    pub mime_type: String,
}

impl RawImage {
    pub fn png(bytes: Vec<u8>) -> Self {
        Self {
            bytes,
            mime_type: "image/png".to_string(),
        }
    }

    /// File extension matching the MIME type.
    pub fn extension(&self) -> &'static str {
        match self.mime_type.as_str() {
            "image/jpeg" => "jpg",
            _ => "png",
        }
    }
}

/// Where a stored image lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageRef {
    /// Deterministic file name, `image_{page}_{ordinal}.{ext}`.
    pub name: String,
    /// Link target used in the Markdown.
    pub location: String,
}

/// A stored image and its caption.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageDescription {
    pub reference: ImageRef,
    pub caption: String,
    /// `false` when the caption is the placeholder.
    pub captioned: bool,
}

/// Normalized content of one page plus its image descriptions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageFragment {
    pub page_index: usize,
    pub text: String,
    pub images: Vec<ImageDescription>,
}

impl PageFragment {
    /// Text handed to the context window: page text followed by one line
    /// per image caption.
    pub fn context_text(&self) -> String {
        let mut out = self.text.clone();
        for image in &self.images {
            if !out.is_empty() {
                out.push('\n');
            }
            out.push_str(&format!("[Image {}: {}]", image.reference.name, image.caption));
        }
        out
    }
}

/// The evolving tutorial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TutorialDraft {
    pub markdown: String,
    /// Last page folded into the draft; 0 before the first update.
    pub covered_through: usize,
    /// Successful synthesis calls that produced this draft.
    pub updates: usize,
}

impl TutorialDraft {
    pub fn is_empty(&self) -> bool {
        self.markdown.trim().is_empty()
    }
}

/// A page that produced no fragment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageGap {
    pub page_index: usize,
    pub reason: String,
}

/// Document-level metadata read from the PDF info dictionary.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentMetadata {
    pub title: Option<String>,
    pub author: Option<String>,
    pub subject: Option<String>,
    pub page_count: usize,
}

/// Immutable snapshot handed to the assembler.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalDocument {
    pub document_id: String,
    pub metadata: DocumentMetadata,
    pub fragments: Vec<PageFragment>,
    pub gaps: Vec<PageGap>,
    pub draft: TutorialDraft,
}

/// Run statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TutorialStats {
    pub pages_processed: usize,
    pub pages_skipped: usize,
    pub images_stored: usize,
    pub images_captioned: usize,
    pub synthesis_calls: usize,
    pub synthesis_retries: usize,
    pub truncated_pages: usize,
    pub evicted_pages: usize,
    pub total_input_tokens: u64,
    pub total_output_tokens: u64,
    pub total_duration_ms: u64,
}

/// Result of a complete run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TutorialOutput {
    pub markdown: String,
    pub document: FinalDocument,
    pub issues: Vec<PageIssue>,
    pub stats: TutorialStats,
}

impl TutorialOutput {
    /// Manifest of stored images and their captions.
    pub fn manifest(&self) -> ImageManifest {
        ImageManifest::from_document(&self.document)
    }
}

/// `results.json`: every stored image with its description.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageManifest {
    pub document_id: String,
    pub descriptions: Vec<ManifestEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    pub image_name: String,
    pub path: String,
    pub description: String,
}

impl ImageManifest {
    pub fn from_document(doc: &FinalDocument) -> Self {
        let descriptions = doc
            .fragments
            .iter()
            .flat_map(|f| f.images.iter())
            .map(|img| ManifestEntry {
                image_name: img.reference.name.clone(),
                path: img.reference.location.clone(),
                description: img.caption.clone(),
            })
            .collect();
        Self {
            document_id: doc.document_id.clone(),
            descriptions,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(name: &str, caption: &str) -> ImageDescription {
        ImageDescription {
            reference: ImageRef {
                name: name.to_string(),
                location: format!("images/{name}"),
            },
            caption: caption.to_string(),
            captioned: true,
        }
    }

    #[test]
    fn context_text_lists_captions() {
        let f = PageFragment {
            page_index: 2,
            text: "Open the settings menu.".into(),
            images: vec![image("image_2_1.png", "A settings dialog")],
        };
        assert_eq!(
            f.context_text(),
            "Open the settings menu.\n[Image image_2_1.png: A settings dialog]"
        );
    }

    #[test]
    fn context_text_image_only_page() {
        let f = PageFragment {
            page_index: 1,
            text: String::new(),
            images: vec![image("image_1_1.png", "Logo")],
        };
        assert_eq!(f.context_text(), "[Image image_1_1.png: Logo]");
    }

    #[test]
    fn manifest_collects_images_in_page_order() {
        let doc = FinalDocument {
            document_id: "guide".into(),
            metadata: DocumentMetadata::default(),
            fragments: vec![
                PageFragment {
                    page_index: 1,
                    text: "a".into(),
                    images: vec![image("image_1_1.png", "first")],
                },
                PageFragment {
                    page_index: 3,
                    text: "b".into(),
                    images: vec![image("image_3_1.png", "second")],
                },
            ],
            gaps: vec![],
            draft: TutorialDraft::default(),
        };
        let manifest = ImageManifest::from_document(&doc);
        assert_eq!(manifest.document_id, "guide");
        let names: Vec<_> = manifest
            .descriptions
            .iter()
            .map(|d| d.image_name.as_str())
            .collect();
        assert_eq!(names, ["image_1_1.png", "image_3_1.png"]);

        let json = serde_json::to_value(&manifest).unwrap();
        assert_eq!(json["descriptions"][1]["description"], "second");
    }

    #[test]
    fn raw_image_extension() {
        assert_eq!(RawImage::png(vec![1]).extension(), "png");
        let jpeg = RawImage {
            bytes: vec![],
            mime_type: "image/jpeg".into(),
        };
        assert_eq!(jpeg.extension(), "jpg");
    }
}
