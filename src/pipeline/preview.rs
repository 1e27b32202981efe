//! Image previews: a small PNG thumbnail kept next to the full payload.
//!
//! PNG keeps thumbnails of text-heavy pages readable; the size cost is
//! irrelevant at a few hundred pixels per edge.

use image::ImageFormat;
use std::io::Cursor;
use tracing::debug;

/// Decode `bytes` and encode a PNG whose longest edge is at most `max_edge`.
///
/// Images already within bounds are re-encoded at their own size. CPU
/// bound: call from `spawn_blocking`.
pub fn render_preview(bytes: &[u8], max_edge: u32) -> Result<Vec<u8>, image::ImageError> {
    let img = image::load_from_memory(bytes)?;
    let thumb = if img.width() > max_edge || img.height() > max_edge {
        img.thumbnail(max_edge, max_edge)
    } else {
        img
    };

    let mut buf = Vec::new();
    thumb.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png)?;
    debug!(
        width = thumb.width(),
        height = thumb.height(),
        "Rendered preview → {} bytes",
        buf.len()
    );
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{DynamicImage, Rgba, RgbaImage};

    fn png(width: u32, height: u32) -> Vec<u8> {
        let img = DynamicImage::ImageRgba8(RgbaImage::from_pixel(width, height, Rgba([255, 0, 0, 255])));
        let mut buf = Vec::new();
        img.write_to(&mut Cursor::new(&mut buf), ImageFormat::Png).unwrap();
        buf
    }

    #[test]
    fn shrinks_large_images() {
        let preview = render_preview(&png(400, 200), 100).unwrap();
        let decoded = image::load_from_memory(&preview).unwrap();
        assert_eq!(decoded.width(), 100);
        assert_eq!(decoded.height(), 50);
    }

    #[test]
    fn keeps_small_images() {
        let preview = render_preview(&png(10, 10), 100).unwrap();
        let decoded = image::load_from_memory(&preview).unwrap();
        assert_eq!((decoded.width(), decoded.height()), (10, 10));
    }

    #[test]
    fn rejects_garbage() {
        assert!(render_preview(b"not an image", 100).is_err());
    }
}
