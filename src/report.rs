//! `report.html`: every stored image next to its description.
//!
//! Rendered from the [`ImageManifest`], so the page shows exactly what
//! `results.json` records. Paths and text are HTML-escaped; the file is
//! self-contained apart from the image links.

use crate::output::ImageManifest;
use html_escape::{encode_double_quoted_attribute, encode_text};

const STYLE: &str = "\
body { font-family: Arial, sans-serif; margin: 20px; background-color: #f5f5f5; }
.header { background-color: #333; color: white; padding: 20px; margin-bottom: 20px; border-radius: 5px; }
.image-container { background-color: white; padding: 20px; margin-bottom: 20px; border-radius: 5px; box-shadow: 0 2px 4px rgba(0,0,0,0.1); }
.image-row { display: flex; margin-bottom: 20px; }
.image-col { flex: 1; padding: 10px; }
.description-col { flex: 2; padding: 10px; }
img { max-width: 100%; height: auto; border: 1px solid #ddd; border-radius: 4px; }
.description { background-color: #f9f9f9; padding: 15px; border-radius: 4px; }
.empty { color: #666; font-style: italic; }
";

/// Render the image report for one document.
pub fn render_report(manifest: &ImageManifest) -> String {
    let title = format!("Image report - {}", encode_text(&manifest.document_id));

    let mut out = String::with_capacity(2048 + manifest.descriptions.len() * 512);
    out.push_str("<!DOCTYPE html>\n<html>\n<head>\n<meta charset=\"utf-8\">\n");
    out.push_str(&format!("<title>{}</title>\n", title));
    out.push_str(&format!("<style>\n{}</style>\n</head>\n<body>\n", STYLE));
    out.push_str(&format!("<div class=\"header\">\n<h1>{}</h1>\n</div>\n", title));
    out.push_str("<div class=\"image-container\">\n");

    if manifest.descriptions.is_empty() {
        out.push_str("<p class=\"empty\">No images were extracted.</p>\n");
    }
    for entry in &manifest.descriptions {
        out.push_str(&format!(
            "<div class=\"image-row\">\n\
<div class=\"image-col\">\n\
<img src=\"{src}\" alt=\"{alt}\">\n\
<p><strong>{name}</strong></p>\n\
</div>\n\
<div class=\"description-col\">\n\
<div class=\"description\">\n<p>{description}</p>\n</div>\n\
</div>\n\
</div>\n",
            src = encode_double_quoted_attribute(&entry.path),
            alt = encode_double_quoted_attribute(&entry.image_name),
            name = encode_text(&entry.image_name),
            description = encode_text(&entry.description),
        ));
    }

    out.push_str("</div>\n</body>\n</html>\n");
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::output::ManifestEntry;

    fn manifest(entries: Vec<ManifestEntry>) -> ImageManifest {
        ImageManifest {
            document_id: "manual".into(),
            descriptions: entries,
        }
    }

    #[test]
    fn one_row_per_image() {
        let html = render_report(&manifest(vec![
            ManifestEntry {
                image_name: "image_1_1.png".into(),
                path: "images/image_1_1.png".into(),
                description: "The login form".into(),
            },
            ManifestEntry {
                image_name: "image_3_1.png".into(),
                path: "images/image_3_1.png".into(),
                description: "The settings menu".into(),
            },
        ]));

        assert!(html.starts_with("<!DOCTYPE html>"));
        assert!(html.contains("<title>Image report - manual</title>"));
        assert_eq!(html.matches("class=\"image-row\"").count(), 2);
        assert!(html.contains("<img src=\"images/image_1_1.png\" alt=\"image_1_1.png\">"));
        let first = html.find("The login form").unwrap();
        let second = html.find("The settings menu").unwrap();
        assert!(first < second);
    }

    #[test]
    fn text_and_paths_are_escaped() {
        let html = render_report(&manifest(vec![ManifestEntry {
            image_name: "image_2_1.png".into(),
            path: "images/a\"b.png".into(),
            description: "Click <Save> & wait".into(),
        }]));

        assert!(html.contains("Click &lt;Save&gt; &amp; wait"));
        assert!(!html.contains("<Save>"));
        assert!(html.contains("src=\"images/a&quot;b.png\""));
    }

    #[test]
    fn empty_manifest_says_so() {
        let html = render_report(&manifest(vec![]));
        assert!(html.contains("No images were extracted."));
        assert!(!html.contains("image-row"));
    }
}
