//! Image encoding for extracted page images.
//!
//! pdfium hands back decoded bitmaps of whatever the PDF embedded (JPEG,
//! JBIG2, raw Flate streams, …). Re-encoding everything as PNG gives one
//! lossless format that both the image store and every vision API accept.

use crate::output::RawImage;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use edgequake_llm::ImageData;
use image::DynamicImage;
use std::io::Cursor;
use tracing::debug;

/// Encode a decoded page image as PNG bytes.
pub fn encode_png(img: &DynamicImage) -> Result<RawImage, image::ImageError> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), image::ImageFormat::Png)?;
    debug!(
        "Encoded {}x{} image → {} bytes PNG",
        img.width(),
        img.height(),
        buf.len()
    );
    Ok(RawImage::png(buf))
}

/// Wrap stored image bytes as a base64 attachment for a captioning call.
///
/// `detail: "high"` keeps small UI text legible to GPT-4-class models.
pub fn to_image_data(image: &RawImage) -> ImageData {
    let b64 = STANDARD.encode(&image.bytes);
    ImageData::new(b64, image.mime_type.as_str()).with_detail("high")
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    #[test]
    fn encode_small_image() {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(10, 10, Rgba([0, 0, 255, 255])));
        let raw = encode_png(&img).expect("encode should succeed");
        assert_eq!(raw.mime_type, "image/png");
        assert_eq!(&raw.bytes[1..4], b"PNG");
    }

    #[test]
    fn image_data_is_base64_of_bytes() {
        let raw = RawImage::png(vec![0x89, b'P', b'N', b'G']);
        let data = to_image_data(&raw);
        assert_eq!(data.mime_type, "image/png");
        assert_eq!(STANDARD.decode(&data.data).unwrap(), raw.bytes);
    }
}
