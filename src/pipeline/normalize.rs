//! Text normalisation for raw page text.
//!
//! PDF text extraction keeps hard line breaks, column gaps, and every link
//! printed on the page. None of that helps the model write a tutorial and all
//! of it costs context tokens, so URLs are dropped and whitespace collapsed.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:https?://|ftp://|www\.)\S+").expect("URL pattern is valid")
});

/// Strip URLs, collapse whitespace runs to one space, trim.
///
/// Total and idempotent: `normalize(&normalize(x)) == normalize(x)`.
pub fn normalize(raw: &str) -> String {
    let without_urls = RE_URL.replace_all(raw, " ");
    without_urls.split_whitespace().collect::<Vec<_>>().join(" ")
}
