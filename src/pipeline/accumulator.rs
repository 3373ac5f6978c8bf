//! The context window: a token-bounded FIFO of page segments.
//!
//! Each appended fragment becomes one segment tagged with its page number.
//! After every append the buffer is brought back under `max_tokens` by
//! dropping whole segments from the front, so the window is always a
//! contiguous suffix of the pages seen so far.
//!
//! A page that alone exceeds the budget is the one case where a segment is
//! cut rather than dropped. Its body keeps the first
//! `max_tokens * keep_ratio` tokens (less the header) and is shortened
//! further until the whole buffer fits. The cut is reported back to the
//! caller as [`PageIssue::BudgetExceeded`].
//!
//! Mutation takes `&mut self`; the accumulator belongs to exactly one
//! pipeline and is never shared.

use crate::error::PageIssue;
use crate::output::PageFragment;
use crate::tokens::TokenCounter;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

const SEGMENT_SEPARATOR: &str = "\n\n";

#[derive(Debug, Clone)]
struct Segment {
    page_index: usize,
    body: String,
}

impl Segment {
    fn header(page_index: usize) -> String {
        format!("[Page {}]", page_index)
    }

    fn render(&self) -> String {
        if self.body.is_empty() {
            Self::header(self.page_index)
        } else {
            format!("{}\n{}", Self::header(self.page_index), self.body)
        }
    }
}

/// What one `append` did to the window.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AppendOutcome {
    /// Pages dropped from the front, oldest first.
    pub evicted: Vec<usize>,
    /// Set when the appended page itself had to be cut.
    pub truncation: Option<PageIssue>,
}

/// Token-bounded buffer of recent page text.
pub struct ContextAccumulator {
    segments: VecDeque<Segment>,
    max_tokens: usize,
    keep_ratio: f32,
    counter: Arc<dyn TokenCounter>,
}

impl ContextAccumulator {
    pub fn new(max_tokens: usize, keep_ratio: f32, counter: Arc<dyn TokenCounter>) -> Self {
        Self {
            segments: VecDeque::new(),
            max_tokens,
            keep_ratio: keep_ratio.clamp(0.1, 1.0),
            counter,
        }
    }

    pub fn max_tokens(&self) -> usize {
        self.max_tokens
    }

    /// Append a page and restore `measure() <= max_tokens`.
    pub fn append(&mut self, fragment: &PageFragment) -> AppendOutcome {
        self.segments.push_back(Segment {
            page_index: fragment.page_index,
            body: fragment.context_text(),
        });

        let mut outcome = AppendOutcome::default();

        while self.segments.len() > 1 && self.measure() > self.max_tokens {
            if let Some(oldest) = self.segments.pop_front() {
                debug!("Context window: evicted page {}", oldest.page_index);
                outcome.evicted.push(oldest.page_index);
            }
        }

        if self.measure() > self.max_tokens {
            outcome.truncation = self.truncate_last();
        }

        debug!(
            "Context window: {} page(s), {}/{} tokens",
            self.segments.len(),
            self.measure(),
            self.max_tokens
        );
        outcome
    }

    /// Cut the only remaining segment until it fits.
    fn truncate_last(&mut self) -> Option<PageIssue> {
        let counter = Arc::clone(&self.counter);
        let max_tokens = self.max_tokens;
        let target = ((max_tokens as f64) * f64::from(self.keep_ratio)).floor() as usize;

        let segment = self.segments.back_mut()?;
        let page = segment.page_index;
        let original_tokens = counter.count(&segment.render());
        let original_body = std::mem::take(&mut segment.body);

        let header_tokens = counter.count(&Segment::header(page));
        let mut body_budget = target.saturating_sub(header_tokens + 1);
        loop {
            segment.body = counter.truncate(&original_body, body_budget);
            if counter.count(&segment.render()) <= max_tokens || body_budget == 0 {
                break;
            }
            body_budget -= 1;
        }

        let kept_tokens = counter.count(&segment.render());
        warn!(
            "Page {} alone is {} tokens (window {}); truncated to {}",
            page, original_tokens, max_tokens, kept_tokens
        );
        Some(PageIssue::BudgetExceeded {
            page,
            tokens: original_tokens,
            max_tokens,
            kept_tokens,
        })
    }

    /// Token count of the rendered window.
    pub fn measure(&self) -> usize {
        if self.segments.is_empty() {
            return 0;
        }
        self.counter.count(&self.render())
    }

    /// The text handed to the synthesizer, oldest page first.
    pub fn render(&self) -> String {
        self.segments
            .iter()
            .map(Segment::render)
            .collect::<Vec<_>>()
            .join(SEGMENT_SEPARATOR)
    }

    /// Pages currently in the window, oldest first.
    pub fn window_pages(&self) -> Vec<usize> {
        self.segments.iter().map(|s| s.page_index).collect()
    }

    pub fn contains_page(&self, page_index: usize) -> bool {
        self.segments.iter().any(|s| s.page_index == page_index)
    }

    pub fn len(&self) -> usize {
        self.segments.len()
    }

    pub fn is_empty(&self) -> bool {
        self.segments.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tokens::WordCounter;

    fn words(n: usize) -> String {
        (0..n).map(|i| format!("w{i}")).collect::<Vec<_>>().join(" ")
    }

    fn fragment(page: usize, n_words: usize) -> PageFragment {
        PageFragment {
            page_index: page,
            text: words(n_words),
            images: vec![],
        }
    }

    fn acc(max: usize) -> ContextAccumulator {
        ContextAccumulator::new(max, 1.0, Arc::new(WordCounter))
    }

    #[test]
    fn empty_window_measures_zero() {
        let a = acc(100);
        assert_eq!(a.measure(), 0);
        assert!(a.is_empty());
        assert_eq!(a.render(), "");
    }

    #[test]
    fn append_within_budget_keeps_everything() {
        let mut a = acc(100);
        let out = a.append(&fragment(1, 10));
        assert!(out.evicted.is_empty());
        assert!(out.truncation.is_none());
        a.append(&fragment(2, 10));
        // header "[Page N]" is two words
        assert_eq!(a.measure(), 24);
        assert_eq!(a.window_pages(), vec![1, 2]);
    }

    #[test]
    fn fifo_eviction_drops_oldest_first() {
        let mut a = acc(50);
        a.append(&fragment(1, 20));
        a.append(&fragment(2, 20));
        let out = a.append(&fragment(3, 20));
        assert_eq!(out.evicted, vec![1]);
        assert_eq!(a.window_pages(), vec![2, 3]);
        assert!(a.measure() <= 50);
    }

    #[test]
    fn window_is_always_a_suffix_and_within_budget() {
        let sizes = [5, 40, 3, 17, 60, 1, 22, 90, 8, 30, 2, 45];
        let mut a = acc(80);
        for (i, n) in sizes.iter().enumerate() {
            let page = i + 1;
            a.append(&fragment(page, *n));
            assert!(a.measure() <= 80, "over budget after page {page}");

            let pages = a.window_pages();
            assert_eq!(*pages.last().unwrap(), page);
            for pair in pages.windows(2) {
                assert_eq!(pair[1], pair[0] + 1, "not contiguous: {pages:?}");
            }
        }
    }

    #[test]
    fn oversized_page_is_truncated_and_reported() {
        let mut a = acc(100);
        a.append(&fragment(1, 10));
        let out = a.append(&fragment(2, 150));

        assert_eq!(out.evicted, vec![1]);
        match out.truncation {
            Some(PageIssue::BudgetExceeded {
                page,
                tokens,
                max_tokens,
                kept_tokens,
            }) => {
                assert_eq!(page, 2);
                assert_eq!(tokens, 152);
                assert_eq!(max_tokens, 100);
                assert!(kept_tokens <= 100);
            }
            other => panic!("expected BudgetExceeded, got {other:?}"),
        }
        assert!(a.measure() <= 100);
        assert_eq!(a.window_pages(), vec![2]);
        assert!(a.render().starts_with("[Page 2]\nw0 w1"));
    }

    #[test]
    fn keep_ratio_shrinks_truncated_page() {
        let mut a = ContextAccumulator::new(100, 0.5, Arc::new(WordCounter));
        let out = a.append(&fragment(1, 300));
        assert!(out.truncation.is_some());
        assert!(a.measure() <= 50);
    }

    #[test]
    fn captions_are_part_of_the_segment() {
        use crate::output::{ImageDescription, ImageRef};
        let mut a = acc(100);
        a.append(&PageFragment {
            page_index: 4,
            text: "Click save".into(),
            images: vec![ImageDescription {
                reference: ImageRef {
                    name: "image_4_1.png".into(),
                    location: "images/image_4_1.png".into(),
                },
                caption: "A save button".into(),
                captioned: true,
            }],
        });
        assert_eq!(
            a.render(),
            "[Page 4]\nClick save\n[Image image_4_1.png: A save button]"
        );
        assert!(a.contains_page(4));
    }
}
