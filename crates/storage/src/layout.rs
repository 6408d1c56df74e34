//! Asset naming shared by every backend.
//!
//! A document's assets live under `{kb_id}/{doc_id}/`: page images as
//! `page_{n}.{jpg|jpeg|png}`, page text as `page_content_{n}.json` and named
//! blobs as `{data_name}.json`. The local backend roots this under its base
//! path, the remote backend uses it verbatim as the object key.

use crate::error::{check_segment, Result};
use std::future::Future;
use std::ops::RangeInclusive;
use std::path::{Path, PathBuf};

/// Page image extensions in read preference order.
/// Older documents were written with `jpeg` or `png`, so readers try all three.
pub const IMAGE_EXTENSIONS: [&str; 3] = ["jpg", "jpeg", "png"];

pub fn page_image_name(page: u32, ext: &str) -> String {
    format!("page_{}.{}", page, ext)
}

pub fn page_content_name(page: u32) -> String {
    format!("page_content_{}.json", page)
}

pub fn data_file_name(data_name: &str) -> String {
    format!("{}.json", data_name)
}

/// Local directory of a document: `{base_path}/{kb_id}/{doc_id}`.
/// Used by the local backend as its store and by the remote backend as its mirror.
pub fn document_dir(base_path: &Path, kb_id: &str, doc_id: &str) -> Result<PathBuf> {
    check_segment(kb_id)?;
    check_segment(doc_id)?;
    Ok(base_path.join(kb_id).join(doc_id))
}

/// Pages requested by a `get_files` call; `None` when either bound is unset
pub fn requested_pages(
    page_start: Option<u32>,
    page_end: Option<u32>,
) -> Option<RangeInclusive<u32>> {
    Some(page_start?..=page_end?)
}

/// Parse `page_{n}.{ext}` into the page number and the extension's rank in
/// [`IMAGE_EXTENSIONS`]. Returns `None` for anything that is not a page image.
pub fn parse_page_image(file_name: &str) -> Option<(u32, usize)> {
    let rest = file_name.strip_prefix("page_")?;
    let (number, ext) = rest.rsplit_once('.')?;
    if number.is_empty() || !number.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let rank = IMAGE_EXTENSIONS
        .iter()
        .position(|candidate| candidate.eq_ignore_ascii_case(ext))?;
    Some((number.parse().ok()?, rank))
}

/// Try each image extension for `page` in preference order and return the
/// first candidate `lookup` accepts.
pub async fn first_page_image<T, F, Fut>(page: u32, mut lookup: F) -> Option<T>
where
    F: FnMut(String) -> Fut,
    Fut: Future<Output = Option<T>>,
{
    for ext in IMAGE_EXTENSIONS {
        if let Some(found) = lookup(page_image_name(page, ext)).await {
            return Some(found);
        }
    }
    None
}

/// Sort `(page, extension rank, item)` triples numerically by page
pub fn sort_page_images<T>(images: &mut [(u32, usize, T)]) {
    images.sort_by_key(|(page, rank, _)| (*page, *rank));
}
