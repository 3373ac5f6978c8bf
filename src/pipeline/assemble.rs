//! Final Markdown assembly.
//!
//! Pure: the same [`FinalDocument`] and options always render to the same
//! bytes. Pages and gaps are merged by page number, so the output follows
//! the PDF regardless of the order gaps were recorded in.

use crate::config::PageSeparator;
use crate::output::{DocumentMetadata, FinalDocument, PageFragment, PageGap};
use once_cell::sync::Lazy;
use regex::Regex;

static RE_DASH_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"-{2,}").expect("dash pattern is valid"));
static RE_WHITESPACE: Lazy<Regex> = Lazy::new(|| Regex::new(r"\s+").expect("whitespace pattern is valid"));
static RE_EMPHASIS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[\\*_]").expect("emphasis pattern is valid"));

/// Rendering options taken from the run config.
#[derive(Debug, Clone, Default)]
pub struct AssembleOptions {
    pub include_metadata: bool,
    pub page_separator: PageSeparator,
}

enum Section<'a> {
    Page(&'a PageFragment),
    Gap(&'a PageGap),
}

impl Section<'_> {
    fn page_index(&self) -> usize {
        match self {
            Section::Page(f) => f.page_index,
            Section::Gap(g) => g.page_index,
        }
    }
}

/// Render the whole document: front matter, page sections, tutorial.
pub fn assemble(doc: &FinalDocument, options: &AssembleOptions) -> String {
    let mut out = String::new();

    if options.include_metadata {
        out.push_str(&front_matter(&doc.document_id, &doc.metadata));
    }

    let title = doc
        .metadata
        .title
        .as_deref()
        .filter(|t| !t.trim().is_empty())
        .unwrap_or(&doc.document_id);
    out.push_str(&format!("# {}\n\n", title.trim()));

    let mut sections: Vec<Section<'_>> = doc
        .fragments
        .iter()
        .map(Section::Page)
        .chain(doc.gaps.iter().map(Section::Gap))
        .collect();
    sections.sort_by_key(Section::page_index);

    for (i, section) in sections.iter().enumerate() {
        if i > 0 {
            out.push_str(&options.page_separator.render(section.page_index()));
        }
        match section {
            Section::Page(fragment) => render_page(&mut out, fragment),
            Section::Gap(gap) => out.push_str(&format!(
                "<!-- page {} skipped: {} -->\n",
                gap.page_index,
                comment_text(&gap.reason)
            )),
        }
    }

    if !sections.is_empty() {
        out.push_str(&tutorial_separator(&options.page_separator));
    }
    out.push_str("## Tutorial\n\n");
    if doc.draft.is_empty() {
        out.push_str("_No tutorial was generated._\n");
    } else {
        out.push_str(doc.draft.markdown.trim_end());
        out.push('\n');
    }
    out
}

fn tutorial_separator(separator: &PageSeparator) -> String {
    match separator {
        PageSeparator::Comment => "\n<!-- tutorial -->\n\n".to_string(),
        other => other.render(0),
    }
}

fn render_page(out: &mut String, fragment: &PageFragment) {
    out.push_str(&format!("## Page {}\n\n", fragment.page_index));
    if !fragment.text.is_empty() {
        out.push_str(&fragment.text);
        out.push('\n');
    }
    for image in &fragment.images {
        out.push_str(&format!(
            "\n![{}]({})\n\n*{}*\n",
            image.reference.name,
            image.reference.location,
            italic_text(&image.caption)
        ));
    }
}

/// No `--` may appear inside an HTML comment, so every dash run becomes one
/// dash; line breaks are flattened so the marker stays on one line.
fn comment_text(text: &str) -> String {
    let flat = RE_WHITESPACE.replace_all(text.trim(), " ");
    RE_DASH_RUNS.replace_all(&flat, "-").into_owned()
}

/// Caption body for `*...*`: one line, with `\`, `*` and `_` escaped.
fn italic_text(text: &str) -> String {
    let flat = RE_WHITESPACE.replace_all(text.trim(), " ");
    RE_EMPHASIS.replace_all(&flat, r"\$0").into_owned()
}

/// YAML front matter; string values are quoted with `"` and `\` escaped.
fn front_matter(document_id: &str, meta: &DocumentMetadata) -> String {
    let mut yaml = String::from("---\n");
    yaml.push_str(&format!("document_id: {}\n", yaml_str(document_id)));
    if let Some(ref t) = meta.title {
        yaml.push_str(&format!("title: {}\n", yaml_str(t)));
    }
    if let Some(ref a) = meta.author {
        yaml.push_str(&format!("author: {}\n", yaml_str(a)));
    }
    if let Some(ref s) = meta.subject {
        yaml.push_str(&format!("subject: {}\n", yaml_str(s)));
    }
    yaml.push_str(&format!("pages: {}\n", meta.page_count));
    yaml.push_str("---\n\n");
    yaml
}

fn yaml_str(s: &str) -> String {
    format!("\"{}\"", s.replace('\\', "\\\\").replace('"', "\\\""))
}
