//! Filesystem-based storage implementation

use crate::backend::{descriptor_for, Descriptor};
use crate::error::{check_segment, Result, StorageError};
use crate::jpeg::encode_jpeg;
use crate::layout::{
    data_file_name, document_dir, first_page_image, page_content_name, parse_page_image,
    requested_pages, sort_page_images,
};
use crate::{ErrorLog, Storage};
use async_trait::async_trait;
use common::{ErrorRecord, PageContent};
use image::DynamicImage;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Registry name of the local backend
pub const LOCAL_BACKEND_NAME: &str = "LocalFileSystem";

/// Constructor arguments of [`FilesystemStorage`], as carried in its descriptor
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct LocalConfig {
    pub base_path: String,
}

/// Stores page assets in a directory tree `{base_path}/{kb_id}/{doc_id}/{asset}`
pub struct FilesystemStorage {
    base_path: PathBuf,
    error_log: Option<Arc<dyn ErrorLog>>,
}

impl FilesystemStorage {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
            error_log: None,
        }
    }

    pub fn from_config(config: LocalConfig) -> Self {
        Self::new(config.base_path)
    }

    /// Send `log_error` records to `error_log` instead of dropping them
    pub fn with_error_log(mut self, error_log: Arc<dyn ErrorLog>) -> Self {
        self.error_log = Some(error_log);
        self
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn get_kb_dir(&self, kb_id: &str) -> Result<PathBuf> {
        check_segment(kb_id)?;
        Ok(self.base_path.join(kb_id))
    }

    fn get_doc_dir(&self, kb_id: &str, doc_id: &str) -> Result<PathBuf> {
        document_dir(&self.base_path, kb_id, doc_id)
    }

    fn get_asset_path(&self, kb_id: &str, doc_id: &str, file_name: &str) -> Result<PathBuf> {
        check_segment(file_name)?;
        Ok(self.get_doc_dir(kb_id, doc_id)?.join(file_name))
    }

    async fn write_asset(
        &self,
        kb_id: &str,
        doc_id: &str,
        file_name: &str,
        content: &[u8],
    ) -> Result<()> {
        let file_path = self.get_asset_path(kb_id, doc_id, file_name)?;
        if let Some(doc_dir) = file_path.parent() {
            fs::create_dir_all(doc_dir)
                .await
                .map_err(|e| StorageError::io(doc_dir, e))?;
        }
        fs::write(&file_path, content)
            .await
            .map_err(|e| StorageError::io(&file_path, e))?;
        debug!("Wrote {} bytes to {:?}", content.len(), file_path);
        Ok(())
    }
}

async fn is_dir(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_dir()).unwrap_or(false)
}

async fn is_file(path: &Path) -> bool {
    fs::metadata(path).await.map(|m| m.is_file()).unwrap_or(false)
}

/// Every file below `root`, identified as `{prefix}/{relative path}`
async fn collect_files(root: &Path, prefix: &str) -> Result<Vec<String>> {
    let mut files = Vec::new();
    let mut pending = vec![(root.to_path_buf(), prefix.to_string())];

    while let Some((dir, dir_id)) = pending.pop() {
        let mut entries = fs::read_dir(&dir)
            .await
            .map_err(|e| StorageError::io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&dir, e))?
        {
            let entry_id = format!("{}/{}", dir_id, entry.file_name().to_string_lossy());
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StorageError::io(entry.path(), e))?;
            if file_type.is_dir() {
                pending.push((entry.path(), entry_id));
            } else {
                files.push(entry_id);
            }
        }
    }

    files.sort();
    Ok(files)
}

/// Remove a directory tree, treating an already-missing tree as removed
async fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(StorageError::io(path, e)),
    }
}

#[async_trait]
impl Storage for FilesystemStorage {
    async fn create_directory(&self, kb_id: &str, doc_id: &str) -> Result<()> {
        let doc_dir = self.get_doc_dir(kb_id, doc_id)?;
        if is_dir(&doc_dir).await {
            remove_tree(&doc_dir).await?;
        }
        fs::create_dir_all(&doc_dir)
            .await
            .map_err(|e| StorageError::io(&doc_dir, e))?;
        debug!("Created document directory {:?}", doc_dir);
        Ok(())
    }

    async fn delete_directory(&self, kb_id: &str, doc_id: &str) -> Result<Vec<String>> {
        let doc_dir = self.get_doc_dir(kb_id, doc_id)?;
        if !is_dir(&doc_dir).await {
            debug!("No directory to delete at {:?}", doc_dir);
            return Ok(Vec::new());
        }

        let removed = collect_files(&doc_dir, &format!("{}/{}", kb_id, doc_id)).await?;
        remove_tree(&doc_dir).await?;
        info!("Deleted {} files from {:?}", removed.len(), doc_dir);
        Ok(removed)
    }

    async fn delete_kb(&self, kb_id: &str) -> Result<Vec<String>> {
        let kb_dir = self.get_kb_dir(kb_id)?;
        if !is_dir(&kb_dir).await {
            return Ok(Vec::new());
        }

        let mut removed = Vec::new();
        let mut entries = fs::read_dir(&kb_dir)
            .await
            .map_err(|e| StorageError::io(&kb_dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&kb_dir, e))?
        {
            let name = entry.file_name().to_string_lossy().into_owned();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| StorageError::io(entry.path(), e))?;
            if file_type.is_dir() {
                removed.extend(self.delete_directory(kb_id, &name).await?);
            } else {
                // Stray file directly under the knowledge base
                fs::remove_file(entry.path())
                    .await
                    .map_err(|e| StorageError::io(entry.path(), e))?;
                removed.push(format!("{}/{}", kb_id, name));
            }
        }

        remove_tree(&kb_dir).await?;
        info!("Deleted knowledge base {} ({} files)", kb_id, removed.len());
        Ok(removed)
    }

    async fn save_json(
        &self,
        kb_id: &str,
        doc_id: &str,
        file_name: &str,
        data: &Value,
    ) -> Result<()> {
        let json = serde_json::to_vec_pretty(data)?;
        self.write_asset(kb_id, doc_id, file_name, &json).await
    }

    async fn save_image(
        &self,
        kb_id: &str,
        doc_id: &str,
        file_name: &str,
        image: &DynamicImage,
    ) -> Result<()> {
        let jpeg = encode_jpeg(image)?;
        self.write_asset(kb_id, doc_id, file_name, &jpeg).await
    }

    async fn get_files(
        &self,
        kb_id: &str,
        doc_id: &str,
        page_start: Option<u32>,
        page_end: Option<u32>,
    ) -> Result<Vec<PathBuf>> {
        let Some(pages) = requested_pages(page_start, page_end) else {
            return Ok(Vec::new());
        };
        let doc_dir = self.get_doc_dir(kb_id, doc_id)?;

        let mut image_paths = Vec::new();
        for page in pages {
            let found = first_page_image(page, |name| {
                let candidate = doc_dir.join(name);
                async move {
                    if is_file(&candidate).await {
                        Some(candidate)
                    } else {
                        None
                    }
                }
            })
            .await;
            match found {
                Some(path) => image_paths.push(path),
                None => debug!("No image file found for page {} in {:?}", page, doc_dir),
            }
        }
        Ok(image_paths)
    }

    async fn get_all_page_images(&self, kb_id: &str, doc_id: &str) -> Result<Vec<PathBuf>> {
        let doc_dir = self.get_doc_dir(kb_id, doc_id)?;
        let mut entries = match fs::read_dir(&doc_dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(StorageError::io(&doc_dir, e)),
        };

        let mut images = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StorageError::io(&doc_dir, e))?
        {
            let file_name = entry.file_name();
            let Some(file_name) = file_name.to_str() else {
                continue;
            };
            if let Some((page, rank)) = parse_page_image(file_name) {
                images.push((page, rank, entry.path()));
            }
        }

        sort_page_images(&mut images);
        Ok(images.into_iter().map(|(_, _, path)| path).collect())
    }

    async fn log_error(&self, kb_id: &str, doc_id: &str, error: &Value) -> Result<()> {
        match &self.error_log {
            Some(error_log) => {
                error_log
                    .append(&ErrorRecord::new(kb_id, doc_id, error.clone()))
                    .await
            }
            None => {
                debug!("No error log configured, dropping error for {}/{}", kb_id, doc_id);
                Ok(())
            }
        }
    }

    async fn save_page_content(
        &self,
        kb_id: &str,
        doc_id: &str,
        page_number: u32,
        content: &str,
    ) -> Result<()> {
        let page = PageContent {
            content: content.to_string(),
        };
        let json = serde_json::to_vec(&page)?;
        self.write_asset(kb_id, doc_id, &page_content_name(page_number), &json)
            .await
    }

    async fn load_page_content(
        &self,
        kb_id: &str,
        doc_id: &str,
        page_number: u32,
    ) -> Result<Option<String>> {
        let path = self.get_asset_path(kb_id, doc_id, &page_content_name(page_number))?;
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(&path, e)),
        };

        match serde_json::from_slice::<PageContent>(&bytes) {
            Ok(page) => Ok(Some(page.content)),
            Err(e) => {
                warn!("Malformed page content in {:?}: {}", path, e);
                Ok(None)
            }
        }
    }

    async fn load_data(&self, kb_id: &str, doc_id: &str, data_name: &str) -> Option<Value> {
        let path = match self.get_asset_path(kb_id, doc_id, &data_file_name(data_name)) {
            Ok(path) => path,
            Err(e) => {
                warn!("Cannot load data {:?}: {}", data_name, e);
                return None;
            }
        };

        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("File not found: {:?}", path);
                return None;
            }
            Err(e) => {
                warn!("Failed to read {:?}: {}", path, e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Error decoding JSON from {:?}: {}", path, e);
                None
            }
        }
    }

    fn to_descriptor(&self) -> Descriptor {
        descriptor_for(
            LOCAL_BACKEND_NAME,
            &LocalConfig {
                base_path: self.base_path.to_string_lossy().into_owned(),
            },
        )
    }
}
