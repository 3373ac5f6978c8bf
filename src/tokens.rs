//! Token accounting for the context window.
//!
//! The accumulator never looks at characters: every budget decision goes
//! through a [`TokenCounter`], so the window is measured in the same unit the
//! model's context limit is expressed in. [`TiktokenCounter`] wraps the
//! OpenAI BPE vocabularies; [`WordCounter`] is a deterministic whitespace
//! approximation for offline use and tests.

use crate::config::TokenizerKind;
use crate::error::TutorialError;
use std::sync::Arc;
use tiktoken_rs::{cl100k_base, o200k_base, CoreBPE};

/// Counts and truncates text in model tokens.
pub trait TokenCounter: Send + Sync {
    /// Number of tokens in `text`.
    fn count(&self, text: &str) -> usize;

    /// Longest prefix of `text` that is at most `max_tokens` tokens long.
    fn truncate(&self, text: &str, max_tokens: usize) -> String;
}

/// BPE token counter backed by tiktoken-rs.
pub struct TiktokenCounter {
    bpe: CoreBPE,
}

impl TiktokenCounter {
    pub fn cl100k() -> Result<Self, TutorialError> {
        let bpe = cl100k_base()
            .map_err(|e| TutorialError::Internal(format!("failed to load cl100k_base: {e}")))?;
        Ok(Self { bpe })
    }

    pub fn o200k() -> Result<Self, TutorialError> {
        let bpe = o200k_base()
            .map_err(|e| TutorialError::Internal(format!("failed to load o200k_base: {e}")))?;
        Ok(Self { bpe })
    }
}

impl TokenCounter for TiktokenCounter {
    fn count(&self, text: &str) -> usize {
        self.bpe.encode_ordinary(text).len()
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        let tokens = self.bpe.encode_ordinary(text);
        if tokens.len() <= max_tokens {
            return text.to_string();
        }
        // A cut can land inside a multi-byte character; back off until the
        // prefix decodes cleanly.
        let mut keep = max_tokens;
        while keep > 0 {
            if let Ok(prefix) = self.bpe.decode(tokens[..keep].to_vec()) {
                return prefix;
            }
            keep -= 1;
        }
        String::new()
    }
}

/// Whitespace-separated words as tokens.
#[derive(Debug, Default, Clone, Copy)]
pub struct WordCounter;

impl TokenCounter for WordCounter {
    fn count(&self, text: &str) -> usize {
        text.split_whitespace().count()
    }

    fn truncate(&self, text: &str, max_tokens: usize) -> String {
        text.split_whitespace()
            .take(max_tokens)
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Build the counter selected by `kind`.
pub fn counter_for(kind: TokenizerKind) -> Result<Arc<dyn TokenCounter>, TutorialError> {
    Ok(match kind {
        TokenizerKind::Cl100k => Arc::new(TiktokenCounter::cl100k()?),
        TokenizerKind::O200k => Arc::new(TiktokenCounter::o200k()?),
        TokenizerKind::Words => Arc::new(WordCounter),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn word_counter_counts_and_truncates() {
        let c = WordCounter;
        assert_eq!(c.count("  one two\nthree "), 3);
        assert_eq!(c.count(""), 0);
        assert_eq!(c.truncate("a b c d e", 3), "a b c");
        assert_eq!(c.truncate("a b", 10), "a b");
    }

    #[test]
    fn tiktoken_truncate_respects_budget() {
        let c = TiktokenCounter::cl100k().expect("cl100k is bundled");
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(20);
        let total = c.count(&text);
        assert!(total > 50);

        let cut = c.truncate(&text, 50);
        assert!(c.count(&cut) <= 50);
        assert!(text.starts_with(&cut));
    }

    #[test]
    fn tiktoken_truncate_noop_when_short() {
        let c = TiktokenCounter::cl100k().expect("cl100k is bundled");
        assert_eq!(c.truncate("hello world", 100), "hello world");
        assert_eq!(c.truncate("hello world", 0), "");
    }

    #[test]
    fn counter_for_words() {
        let c = counter_for(TokenizerKind::Words).unwrap();
        assert_eq!(c.count("a b c"), 3);
    }
}
