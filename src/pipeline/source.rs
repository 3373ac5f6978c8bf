//! Page sources: where raw pages come from.
//!
//! The pipeline pulls one page at a time, in document order. A page that
//! cannot be read comes through as `Err(PageIssue)` and becomes a gap; the
//! source keeps going with the next page.

use crate::error::PageIssue;
use crate::output::{DocumentMetadata, RawPage};
use async_trait::async_trait;
use std::collections::VecDeque;

#[async_trait]
pub trait PageSource: Send {
    /// Next page in order, or `None` once the document is exhausted.
    async fn next_page(&mut self) -> Option<Result<RawPage, PageIssue>>;

    /// Document metadata, available before the first page is pulled.
    fn metadata(&self) -> DocumentMetadata;

    /// Pages this source will yield; drives progress reporting.
    fn page_count(&self) -> usize {
        self.metadata().page_count
    }
}

/// In-memory source for tests and callers that extract pages themselves.
#[derive(Debug, Default)]
pub struct MemorySource {
    metadata: DocumentMetadata,
    pages: VecDeque<Result<RawPage, PageIssue>>,
}

impl MemorySource {
    pub fn new(pages: Vec<RawPage>) -> Self {
        let metadata = DocumentMetadata {
            page_count: pages.len(),
            ..Default::default()
        };
        Self {
            metadata,
            pages: pages.into_iter().map(Ok).collect(),
        }
    }

    /// Build from pages and unreadable-page markers, already in order.
    pub fn from_results(pages: Vec<Result<RawPage, PageIssue>>) -> Self {
        let metadata = DocumentMetadata {
            page_count: pages.len(),
            ..Default::default()
        };
        Self {
            metadata,
            pages: pages.into(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.metadata.title = Some(title.into());
        self
    }
}

#[async_trait]
impl PageSource for MemorySource {
    async fn next_page(&mut self) -> Option<Result<RawPage, PageIssue>> {
        self.pages.pop_front()
    }

    fn metadata(&self) -> DocumentMetadata {
        self.metadata.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn yields_pages_in_order_then_none() {
        let mut src = MemorySource::from_results(vec![
            Ok(RawPage::new(1, "one")),
            Err(PageIssue::Extraction {
                page: 2,
                detail: "no text layer".into(),
            }),
            Ok(RawPage::new(3, "three")),
        ])
        .with_title("Guide");

        assert_eq!(src.metadata().page_count, 3);
        assert_eq!(src.metadata().title.as_deref(), Some("Guide"));
        assert_eq!(src.next_page().await.unwrap().unwrap().page_index, 1);
        assert_eq!(src.next_page().await.unwrap().unwrap_err().page(), 2);
        assert_eq!(src.next_page().await.unwrap().unwrap().text, "three");
        assert!(src.next_page().await.is_none());
    }
}
