use anyhow::{Context, Result};
use image::{DynamicImage, Rgb, RgbImage};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use storage::Storage;

/// Pages written by the scenario; page 3 is deliberately left without an image
pub const IMAGE_PAGES: [u32; 3] = [1, 2, 10];
pub const TEXT_PAGES: [u32; 2] = [1, 3];

pub fn sample_page(page: u32) -> DynamicImage {
    let shade = (page * 20 % 255) as u8;
    DynamicImage::ImageRgb8(RgbImage::from_pixel(32, 48, Rgb([shade, shade, 255 - shade])))
}

pub fn sample_elements() -> Value {
    json!({
        "elements": [
            {"type": "Title", "content": "Quarterly report", "page_number": 1},
            {"type": "NarrativeText", "content": "Revenue grew.", "page_number": 2}
        ]
    })
}

pub fn page_text(page: u32) -> String {
    format!("Text of page {}", page)
}

/// Write a full document: images, page text and an elements blob
pub async fn populate_document(storage: &dyn Storage, kb_id: &str, doc_id: &str) -> Result<()> {
    storage
        .create_directory(kb_id, doc_id)
        .await
        .context("Failed to create document directory")?;

    for page in IMAGE_PAGES {
        storage
            .save_image(kb_id, doc_id, &format!("page_{}.jpg", page), &sample_page(page))
            .await
            .with_context(|| format!("Failed to save image for page {}", page))?;
    }
    for page in TEXT_PAGES {
        storage
            .save_page_content(kb_id, doc_id, page, &page_text(page))
            .await
            .with_context(|| format!("Failed to save content for page {}", page))?;
    }
    storage
        .save_json(kb_id, doc_id, "elements.json", &sample_elements())
        .await
        .context("Failed to save elements")?;
    Ok(())
}

/// Read everything back through the storage interface and check it
pub async fn verify_document(
    storage: &dyn Storage,
    kb_id: &str,
    doc_id: &str,
) -> Result<Vec<PathBuf>> {
    let elements = storage.load_data(kb_id, doc_id, "elements").await;
    if elements != Some(sample_elements()) {
        anyhow::bail!("elements.json did not round-trip: {:?}", elements);
    }
    println!("  ✓ elements.json round-trips");

    let all_images = storage
        .get_all_page_images(kb_id, doc_id)
        .await
        .context("Failed to list page images")?;
    let pages: Vec<String> = all_images.iter().map(|p| file_name(p)).collect();
    if pages != ["page_1.jpg", "page_2.jpg", "page_10.jpg"] {
        anyhow::bail!("Unexpected page image order: {:?}", pages);
    }
    println!("  ✓ Page images sorted numerically: {:?}", pages);

    let ranged = storage
        .get_files(kb_id, doc_id, Some(2), Some(3))
        .await
        .context("Failed to get page range")?;
    if ranged.len() != 1 || file_name(&ranged[0]) != "page_2.jpg" {
        anyhow::bail!("Expected only page_2.jpg for pages 2..=3, got {:?}", ranged);
    }
    println!("  ✓ Missing page 3 skipped in range");

    let contents = storage
        .load_page_content_range(kb_id, doc_id, 1, 3)
        .await
        .context("Failed to load page content range")?;
    if contents != vec![page_text(1), page_text(3)] {
        anyhow::bail!("Unexpected page contents: {:?}", contents);
    }
    println!("  ✓ Page content range skips page 2");

    Ok(all_images)
}

fn file_name(path: &Path) -> String {
    path.file_name()
        .and_then(|n| n.to_str())
        .unwrap_or_default()
        .to_string()
}
