use crate::error::Result;
use image::{DynamicImage, ImageFormat};
use std::io::Cursor;

pub const JPEG_CONTENT_TYPE: &str = "image/jpeg";

/// Encode a page image as JPEG bytes.
/// JPEG has no alpha channel, so the image is flattened to RGB8 first.
pub fn encode_jpeg(image: &DynamicImage) -> Result<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buffer = Cursor::new(Vec::new());
    rgb.write_to(&mut buffer, ImageFormat::Jpeg)?;
    Ok(buffer.into_inner())
}
