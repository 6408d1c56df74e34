pub mod backend;
pub mod database;
pub mod error;
pub mod filesystem;
pub mod jpeg;
pub mod layout;
pub mod remote;

use async_trait::async_trait;
use common::ErrorRecord;
use image::DynamicImage;
use serde_json::Value;
use std::path::PathBuf;

pub use backend::{from_descriptor, Descriptor, StorageBackend, StorageRegistry};
pub use database::PostgresErrorLog;
pub use error::{Result, StorageError};
pub use filesystem::{FilesystemStorage, LocalConfig};
pub use remote::{RemoteConfig, RemoteStorage};

/// Storage backend trait for per-document page assets.
///
/// Every method is keyed by a knowledge base id and a document id. Read paths
/// treat missing assets as absent rather than as errors; write paths surface
/// the underlying failure.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Prepare an empty location for the document, discarding anything stored there before
    async fn create_directory(&self, kb_id: &str, doc_id: &str) -> Result<()>;

    /// Remove every asset of a document, returning the removed item identifiers.
    /// Deleting a document that does not exist succeeds with an empty list.
    async fn delete_directory(&self, kb_id: &str, doc_id: &str) -> Result<Vec<String>>;

    /// Remove every asset of every document in a knowledge base
    async fn delete_kb(&self, kb_id: &str) -> Result<Vec<String>>;

    /// Store `data` as pretty-printed JSON under `file_name`, overwriting
    async fn save_json(&self, kb_id: &str, doc_id: &str, file_name: &str, data: &Value)
        -> Result<()>;

    /// Store `image` as JPEG bytes under `file_name`
    async fn save_image(
        &self,
        kb_id: &str,
        doc_id: &str,
        file_name: &str,
        image: &DynamicImage,
    ) -> Result<()>;

    /// Local paths of the page images in `[page_start, page_end]`, one per
    /// page that has an image, in page order. Empty if either bound is unset.
    async fn get_files(
        &self,
        kb_id: &str,
        doc_id: &str,
        page_start: Option<u32>,
        page_end: Option<u32>,
    ) -> Result<Vec<PathBuf>>;

    /// Local paths of every page image of the document, sorted by page number
    async fn get_all_page_images(&self, kb_id: &str, doc_id: &str) -> Result<Vec<PathBuf>>;

    /// Append an error record. A backend without an error destination does nothing.
    async fn log_error(&self, kb_id: &str, doc_id: &str, error: &Value) -> Result<()>;

    async fn save_page_content(
        &self,
        kb_id: &str,
        doc_id: &str,
        page_number: u32,
        content: &str,
    ) -> Result<()>;

    /// Text content of one page, `None` when the page has none or its JSON is malformed.
    /// Unlike `load_data`, a store that cannot be read is an error rather than `None`.
    async fn load_page_content(
        &self,
        kb_id: &str,
        doc_id: &str,
        page_number: u32,
    ) -> Result<Option<String>>;

    /// Text content of every page in `[page_start, page_end]` that has some, in page order
    async fn load_page_content_range(
        &self,
        kb_id: &str,
        doc_id: &str,
        page_start: u32,
        page_end: u32,
    ) -> Result<Vec<String>> {
        let mut page_contents = Vec::new();
        for page_number in page_start..=page_end {
            if let Some(content) = self.load_page_content(kb_id, doc_id, page_number).await? {
                page_contents.push(content);
            }
        }
        Ok(page_contents)
    }

    /// Load the named JSON blob `{data_name}.json` (e.g. "elements").
    /// Missing or malformed data is logged and reported as `None`.
    async fn load_data(&self, kb_id: &str, doc_id: &str, data_name: &str) -> Option<Value>;

    /// Descriptor from which an equivalent backend can be rebuilt
    fn to_descriptor(&self) -> Descriptor;
}

/// Destination for error records
#[async_trait]
pub trait ErrorLog: Send + Sync {
    async fn append(&self, record: &ErrorRecord) -> Result<()>;
}
