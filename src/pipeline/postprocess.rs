//! Cleanup of model output before it becomes a caption or the draft.
//!
//! Models wrap answers in ```` ```markdown ```` fences despite being told
//! not to, leave CRLF line endings and zero-width characters behind, and pad
//! with blank lines. None of that should survive into the draft, because the
//! draft is fed back to the model on the next call and noise compounds.
//!
//! Order matters: fences are stripped before line endings are normalised so
//! the fence pattern sees the model's raw first and last lines.

use once_cell::sync::Lazy;
use regex::Regex;

static RE_OUTER_FENCES: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?s)^```(?:markdown|md)?[ \t]*\r?\n(.*?)\r?\n```\s*$").expect("fence pattern is valid")
});

static RE_BLANK_RUNS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\n{3,}").expect("blank-run pattern is valid"));

const INVISIBLE: [char; 6] = [
    '\u{200B}', // zero-width space
    '\u{200C}', // zero-width non-joiner
    '\u{200D}', // zero-width joiner
    '\u{2060}', // word joiner
    '\u{FEFF}', // BOM
    '\u{00AD}', // soft hyphen
];

/// Apply every cleanup rule; the result has no trailing newline.
pub fn tidy_model_output(input: &str) -> String {
    let s = strip_outer_fences(input);
    let s = s.replace("\r\n", "\n").replace('\r', "\n");
    let s: String = s.chars().filter(|c| !INVISIBLE.contains(c)).collect();
    let s = s
        .lines()
        .map(str::trim_end)
        .collect::<Vec<_>>()
        .join("\n");
    let s = RE_BLANK_RUNS.replace_all(&s, "\n\n");
    s.trim().to_string()
}

fn strip_outer_fences(input: &str) -> String {
    let trimmed = input.trim();
    match RE_OUTER_FENCES.captures(trimmed) {
        Some(caps) => caps[1].to_string(),
        None => trimmed.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strips_markdown_fences() {
        let raw = "```markdown\n## Setup\n\n1. Install\n```";
        assert_eq!(tidy_model_output(raw), "## Setup\n\n1. Install");
    }

    #[test]
    fn keeps_inner_code_blocks() {
        let raw = "## Run\n\n```bash\nmake\n```\n\nDone.";
        assert_eq!(tidy_model_output(raw), raw);
    }

    #[test]
    fn normalises_crlf_and_trailing_spaces() {
        assert_eq!(tidy_model_output("a  \r\nb\t\r\n"), "a\nb");
    }

    #[test]
    fn collapses_blank_runs() {
        assert_eq!(tidy_model_output("a\n\n\n\n\nb"), "a\n\nb");
    }

    #[test]
    fn removes_invisible_characters() {
        assert_eq!(tidy_model_output("\u{FEFF}Hel\u{200B}lo"), "Hello");
    }

    #[test]
    fn whitespace_only_becomes_empty() {
        assert_eq!(tidy_model_output(" \n\n\t"), "");
    }
}
