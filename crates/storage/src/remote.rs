//! Object-store backed storage with an optional error table.
//!
//! Objects are keyed `{kb_id}/{doc_id}/{asset}` inside one bucket. Reads that
//! hand out file paths download into a local mirror laid out exactly like the
//! filesystem backend, so callers always receive local paths. The mirror is a
//! disposable cache; the bucket is the source of truth.

use crate::backend::{descriptor_for, Descriptor};
use crate::database::PostgresErrorLog;
use crate::error::{check_segment, Result, StorageError};
use crate::jpeg::{encode_jpeg, JPEG_CONTENT_TYPE};
use crate::layout::{
    data_file_name, document_dir, first_page_image, page_content_name, parse_page_image,
    requested_pages, sort_page_images,
};
use crate::{ErrorLog, Storage};
use async_trait::async_trait;
use bytes::Bytes;
use common::file_utils::SegmentValidationError;
use common::{ErrorRecord, PageContent};
use futures::{StreamExt, TryStreamExt};
use image::DynamicImage;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::{Attribute, Attributes, ObjectStore, PutOptions, PutPayload};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs;
use tracing::{debug, info, warn};

/// Registry name of the remote backend
pub const REMOTE_BACKEND_NAME: &str = "S3FileSystem";

const JSON_CONTENT_TYPE: &str = "application/json";

/// Constructor arguments of [`RemoteStorage`], as carried in its descriptor
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct RemoteConfig {
    /// Root of the local mirror directory
    pub base_path: String,
    pub bucket_name: String,
    pub region_name: String,
    pub access_key: String,
    pub secret_key: String,
    /// Table receiving error records; no table means `log_error` is a no-op
    #[serde(default)]
    pub error_table: Option<String>,
    /// Custom endpoint for S3-compatible stores (MinIO, localstack)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub endpoint: Option<String>,
    /// PostgreSQL URL of the error table, falls back to `DATABASE_URL`
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_database_url: Option<String>,
    /// Legacy key-value table names; accepted on input, unused and never written back
    #[serde(default, skip_serializing)]
    pub dynamodb_table_name: Option<String>,
    #[serde(default, skip_serializing)]
    pub dynamodb_client_data_table_name: Option<String>,
}

impl fmt::Debug for RemoteConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RemoteConfig")
            .field("base_path", &self.base_path)
            .field("bucket_name", &self.bucket_name)
            .field("region_name", &self.region_name)
            .field("access_key", &self.access_key)
            .field("secret_key", &"<redacted>")
            .field("error_table", &self.error_table)
            .field("endpoint", &self.endpoint)
            .finish_non_exhaustive()
    }
}

fn required_env(key: &str) -> Result<String> {
    std::env::var(key)
        .map_err(|_| StorageError::InvalidDescriptor(format!("{} is not set", key)))
}

impl RemoteConfig {
    /// Load configuration from environment variables
    ///
    /// Required: `S3_BUCKET`, `AWS_REGION`, `AWS_ACCESS_KEY_ID`, `AWS_SECRET_ACCESS_KEY`.
    /// Optional: `PAGE_STORE_BASE_PATH` (default `page_store`), `AWS_ENDPOINT_URL`,
    /// `ERROR_TABLE` and `DATABASE_URL`.
    pub fn from_env() -> Result<Self> {
        let error_table = std::env::var("ERROR_TABLE").ok();
        let error_database_url = error_table
            .as_ref()
            .and_then(|_| std::env::var("DATABASE_URL").ok());

        Ok(Self {
            base_path: std::env::var("PAGE_STORE_BASE_PATH")
                .unwrap_or_else(|_| "page_store".to_string()),
            bucket_name: required_env("S3_BUCKET")?,
            region_name: required_env("AWS_REGION")?,
            access_key: required_env("AWS_ACCESS_KEY_ID")?,
            secret_key: required_env("AWS_SECRET_ACCESS_KEY")?,
            error_table,
            endpoint: std::env::var("AWS_ENDPOINT_URL").ok(),
            error_database_url,
            dynamodb_table_name: None,
            dynamodb_client_data_table_name: None,
        })
    }

    fn build_object_store(&self) -> Result<Arc<dyn ObjectStore>> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&self.bucket_name)
            .with_region(&self.region_name)
            .with_access_key_id(&self.access_key)
            .with_secret_access_key(&self.secret_key);

        // For supporting localstack/minio for testing
        if let Some(endpoint) = &self.endpoint {
            builder = builder.with_endpoint(endpoint);
            if endpoint.starts_with("http://") {
                builder = builder.with_allow_http(true);
            }
        }
        Ok(Arc::new(builder.build()?))
    }

    fn build_error_log(&self) -> Result<Option<Arc<dyn ErrorLog>>> {
        let Some(table) = &self.error_table else {
            return Ok(None);
        };
        let database_url = self
            .error_database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok())
            .ok_or_else(|| {
                StorageError::InvalidDescriptor(format!(
                    "error_table {} is set but no database url is configured",
                    table
                ))
            })?;
        Ok(Some(Arc::new(PostgresErrorLog::new(&database_url, table)?)))
    }
}

/// Create the mirror directory. Concurrent readers of the same document race
/// to create it; losing that race is not an error.
async fn ensure_mirror_dir(dir: &Path) -> Result<()> {
    match fs::create_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::AlreadyExists => {
            let created = fs::metadata(dir).await.map(|m| m.is_dir()).unwrap_or(false);
            if created {
                Ok(())
            } else {
                Err(StorageError::io(dir, e))
            }
        }
        Err(e) => Err(StorageError::io(dir, e)),
    }
}

/// Key or prefix `{a}/{b}/...` built from raw segments.
/// Segments are stored verbatim, not percent-encoded.
fn object_path(segments: &[&str]) -> Result<ObjectPath> {
    for segment in segments {
        check_segment(segment)?;
    }
    let raw = segments.join("/");
    ObjectPath::parse(&raw).map_err(|_| StorageError::InvalidSegment {
        segment: raw,
        reason: SegmentValidationError::InvalidSegment,
    })
}

/// Stores page assets in an S3 bucket, mirroring downloads to local disk
pub struct RemoteStorage {
    config: RemoteConfig,
    store: Arc<dyn ObjectStore>,
    error_log: Option<Arc<dyn ErrorLog>>,
}

impl RemoteStorage {
    /// Connect to the configured bucket and error table.
    /// Neither is contacted until first use.
    pub fn from_config(config: RemoteConfig) -> Result<Self> {
        let store = config.build_object_store()?;
        let error_log = config.build_error_log()?;
        info!(
            "Using object store bucket {} in {} (error table: {:?})",
            config.bucket_name, config.region_name, config.error_table
        );
        Ok(Self {
            config,
            store,
            error_log,
        })
    }

    /// Use an already constructed object store, without an error table
    pub fn with_object_store(config: RemoteConfig, store: Arc<dyn ObjectStore>) -> Self {
        Self {
            config,
            store,
            error_log: None,
        }
    }

    pub fn with_error_log(mut self, error_log: Arc<dyn ErrorLog>) -> Self {
        self.error_log = Some(error_log);
        self
    }

    pub fn config(&self) -> &RemoteConfig {
        &self.config
    }

    fn mirror_dir(&self, kb_id: &str, doc_id: &str) -> Result<PathBuf> {
        document_dir(Path::new(&self.config.base_path), kb_id, doc_id)
    }

    fn asset_key(&self, kb_id: &str, doc_id: &str, file_name: &str) -> Result<ObjectPath> {
        object_path(&[kb_id, doc_id, file_name])
    }

    async fn upload(
        &self,
        key: ObjectPath,
        content: Vec<u8>,
        content_type: &'static str,
    ) -> Result<()> {
        let mut attributes = Attributes::new();
        attributes.insert(Attribute::ContentType, content_type.into());
        let size = content.len();
        self.store
            .put_opts(
                &key,
                PutPayload::from(Bytes::from(content)),
                PutOptions::from(attributes),
            )
            .await?;
        debug!("Uploaded {} bytes to {}/{}", size, self.config.bucket_name, key);
        Ok(())
    }

    /// Object body, `None` when the key does not exist
    async fn fetch(&self, key: &ObjectPath) -> Result<Option<Bytes>> {
        match self.store.get(key).await {
            Ok(result) => Ok(Some(result.bytes().await?)),
            Err(object_store::Error::NotFound { .. }) => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Download `key` into `local_path`. Failures are logged and reported as `None`.
    async fn download(&self, key: &ObjectPath, local_path: PathBuf) -> Option<PathBuf> {
        let bytes = match self.fetch(key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => return None,
            Err(e) => {
                warn!("Error downloading {}: {}", key, e);
                return None;
            }
        };
        if let Err(e) = fs::write(&local_path, &bytes).await {
            warn!("Error writing {} to {:?}: {}", key, local_path, e);
            return None;
        }
        Some(local_path)
    }

    /// List then bulk delete everything under `prefix`
    async fn delete_prefix(&self, prefix: ObjectPath) -> Result<Vec<String>> {
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;
        if objects.is_empty() {
            info!("No objects found in {}/", prefix);
            return Ok(Vec::new());
        }

        let locations = futures::stream::iter(objects.into_iter().map(|meta| Ok(meta.location)));
        let mut results = self.store.delete_stream(locations.boxed());

        let mut removed = Vec::new();
        let mut first_failure = None;
        while let Some(result) = results.next().await {
            match result {
                Ok(location) => removed.push(location.to_string()),
                Err(e) => {
                    warn!("Failed to delete object under {}/: {}", prefix, e);
                    first_failure.get_or_insert(e);
                }
            }
        }

        if let Some(e) = first_failure {
            return Err(e.into());
        }
        info!(
            "Deleted {} objects in {}/ from {}",
            removed.len(),
            prefix,
            self.config.bucket_name
        );
        Ok(removed)
    }
}

#[async_trait]
impl Storage for RemoteStorage {
    async fn create_directory(&self, kb_id: &str, doc_id: &str) -> Result<()> {
        // Keys need no pre-created prefix
        check_segment(kb_id)?;
        check_segment(doc_id)?;
        Ok(())
    }

    async fn delete_directory(&self, kb_id: &str, doc_id: &str) -> Result<Vec<String>> {
        self.delete_prefix(object_path(&[kb_id, doc_id])?).await
    }

    async fn delete_kb(&self, kb_id: &str) -> Result<Vec<String>> {
        self.delete_prefix(object_path(&[kb_id])?).await
    }

    async fn save_json(
        &self,
        kb_id: &str,
        doc_id: &str,
        file_name: &str,
        data: &Value,
    ) -> Result<()> {
        let key = self.asset_key(kb_id, doc_id, file_name)?;
        let json = serde_json::to_vec_pretty(data)?;
        self.upload(key, json, JSON_CONTENT_TYPE).await
    }

    async fn save_image(
        &self,
        kb_id: &str,
        doc_id: &str,
        file_name: &str,
        image: &DynamicImage,
    ) -> Result<()> {
        let key = self.asset_key(kb_id, doc_id, file_name)?;
        let jpeg = encode_jpeg(image)?;
        self.upload(key, jpeg, JPEG_CONTENT_TYPE).await
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
        let mirror_dir = self.mirror_dir(kb_id, doc_id)?;
        ensure_mirror_dir(&mirror_dir).await?;

        let mut file_paths = Vec::new();
        for page in pages {
            let found = first_page_image(page, |name| {
                let key = self.asset_key(kb_id, doc_id, &name);
                let local_path = mirror_dir.join(&name);
                async move { self.download(&key.ok()?, local_path).await }
            })
            .await;
            match found {
                Some(path) => file_paths.push(path),
                None => warn!("No image file found for page {} of {}/{}", page, kb_id, doc_id),
            }
        }
        Ok(file_paths)
    }

    async fn get_all_page_images(&self, kb_id: &str, doc_id: &str) -> Result<Vec<PathBuf>> {
        let mirror_dir = self.mirror_dir(kb_id, doc_id)?;
        let prefix = object_path(&[kb_id, doc_id])?;
        let objects: Vec<_> = self.store.list(Some(&prefix)).try_collect().await?;

        let mut page_keys = Vec::new();
        for meta in objects {
            // Only direct children of the document prefix are page images
            if meta.location.parts().count() != 3 {
                continue;
            }
            let Some(file_name) = meta.location.filename().map(str::to_string) else {
                continue;
            };
            if let Some((page, rank)) = parse_page_image(&file_name) {
                page_keys.push((page, rank, (meta.location, file_name)));
            }
        }
        if page_keys.is_empty() {
            return Ok(Vec::new());
        }

        ensure_mirror_dir(&mirror_dir).await?;
        let mut images = Vec::new();
        for (page, rank, (key, file_name)) in page_keys {
            if let Some(path) = self.download(&key, mirror_dir.join(&file_name)).await {
                images.push((page, rank, path));
            }
        }

        sort_page_images(&mut images);
        Ok(images.into_iter().map(|(_, _, path)| path).collect())
    }

    async fn log_error(&self, kb_id: &str, doc_id: &str, error: &Value) -> Result<()> {
        let Some(error_log) = &self.error_log else {
            return Ok(());
        };
        error_log
            .append(&ErrorRecord::new(kb_id, doc_id, error.clone()))
            .await
    }

    async fn save_page_content(
        &self,
        kb_id: &str,
        doc_id: &str,
        page_number: u32,
        content: &str,
    ) -> Result<()> {
        let key = self.asset_key(kb_id, doc_id, &page_content_name(page_number))?;
        let page = PageContent {
            content: content.to_string(),
        };
        let json = serde_json::to_vec(&page)?;
        self.upload(key, json, JSON_CONTENT_TYPE).await
    }

    async fn load_page_content(
        &self,
        kb_id: &str,
        doc_id: &str,
        page_number: u32,
    ) -> Result<Option<String>> {
        let key = self.asset_key(kb_id, doc_id, &page_content_name(page_number))?;
        let Some(bytes) = self.fetch(&key).await? else {
            return Ok(None);
        };

        match serde_json::from_slice::<PageContent>(&bytes) {
            Ok(page) => Ok(Some(page.content)),
            Err(e) => {
                warn!("Malformed page content in {}: {}", key, e);
                Ok(None)
            }
        }
    }

    async fn load_data(&self, kb_id: &str, doc_id: &str, data_name: &str) -> Option<Value> {
        let key = match self.asset_key(kb_id, doc_id, &data_file_name(data_name)) {
            Ok(key) => key,
            Err(e) => {
                warn!("Cannot load data {:?}: {}", data_name, e);
                return None;
            }
        };

        let bytes = match self.fetch(&key).await {
            Ok(Some(bytes)) => bytes,
            Ok(None) => {
                warn!("File not found in object store: {}", key);
                return None;
            }
            Err(e) => {
                warn!("Error loading {} from object store: {}", key, e);
                return None;
            }
        };

        match serde_json::from_slice(&bytes) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!("Error decoding JSON from object {}: {}", key, e);
                None
            }
        }
    }

    fn to_descriptor(&self) -> Descriptor {
        descriptor_for(REMOTE_BACKEND_NAME, &self.config)
    }
}
