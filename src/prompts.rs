//! Prompts for image captioning and tutorial synthesis.
//!
//! Both calls must be deterministic given their inputs: the synthesis prompt
//! is a pure function of the current draft and the rendered context window,
//! so the same pages always produce the same request. Callers can override
//! either system prompt through [`crate::config::TutorialConfig`].

/// System prompt for describing one extracted image.
pub const DEFAULT_CAPTION_PROMPT: &str = r#"You describe images taken from software and system tutorials.

Describe the image objectively and in detail:
- what kind of image it is (screenshot, diagram, photo, chart, icon)
- every visible label, button, menu entry, field, or value
- the action the image is most likely illustrating

Output plain prose in at most five sentences. Do not add commentary about
the quality of the image and do not speculate beyond what is visible."#;

/// User text sent alongside the image bytes.
pub fn caption_request(page_index: usize, ordinal: usize) -> String {
    format!(
        "Describe image {} on page {} of the document.",
        ordinal, page_index
    )
}

/// System prompt for tutorial synthesis.
pub const DEFAULT_TUTORIAL_PROMPT: &str = r#"You are a technical writer turning a document into a step-by-step Markdown tutorial.

You receive the CURRENT TUTORIAL (possibly empty) and the most recent
DOCUMENT CONTEXT: page text and descriptions of the page images, tagged by
page number. Produce the COMPLETE updated tutorial.

Follow these rules precisely:

1. Keep every step already in the current tutorial unless the new context
   corrects it. Do not drop earlier material just because its pages are no
   longer in the context.
2. Integrate the new context where it belongs; do not simply append it.
3. Use ## for sections, numbered lists for procedures, and `code` for
   commands, paths, and UI labels.
4. Refer to images by their file name when a step depends on one.
5. Do not repeat content. Do not invent steps the document does not support.
6. Output ONLY the Markdown of the tutorial. Do NOT wrap it in ```markdown
   fences and do NOT add commentary."#;

/// Build the synthesis request body from the draft and the context window.
pub fn tutorial_request(draft: &str, context: &str) -> String {
    let draft = if draft.trim().is_empty() {
        "(empty: this is the first update)"
    } else {
        draft
    };
    format!(
        "CURRENT TUTORIAL:\n\"\"\"\n{}\n\"\"\"\n\nDOCUMENT CONTEXT:\n\"\"\"\n{}\n\"\"\"",
        draft, context
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tutorial_request_marks_first_update() {
        let req = tutorial_request("", "[Page 1]\nhello");
        assert!(req.contains("(empty: this is the first update)"));
        assert!(req.contains("[Page 1]\nhello"));
    }

    #[test]
    fn tutorial_request_is_deterministic() {
        let a = tutorial_request("## Setup\n1. Install", "[Page 2]\nRun it");
        let b = tutorial_request("## Setup\n1. Install", "[Page 2]\nRun it");
        assert_eq!(a, b);
        assert!(a.find("CURRENT TUTORIAL").unwrap() < a.find("DOCUMENT CONTEXT").unwrap());
    }

    #[test]
    fn caption_request_names_page() {
        assert_eq!(
            caption_request(2, 1),
            "Describe image 1 on page 2 of the document."
        );
    }
}
