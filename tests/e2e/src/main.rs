mod test_utils;

use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use storage::{Descriptor, RemoteConfig, Storage, StorageBackend};
use test_utils::*;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter("e2e_tests=debug,storage=debug,info")
        .init();

    let storage_type = std::env::var("STORAGE_TYPE").unwrap_or_else(|_| "local".to_string());

    match storage_type.as_str() {
        "local" => {
            println!("📁 Running E2E tests with LOCAL storage...");
            run_local_storage_tests().await?;
        }
        "remote" => {
            println!("🪣 Running E2E tests with REMOTE storage...");
            run_remote_storage_tests().await?;
        }
        _ => {
            anyhow::bail!(
                "Invalid STORAGE_TYPE: {}. Must be 'local' or 'remote'",
                storage_type
            );
        }
    }

    println!("\n✅ All E2E tests passed!");

    Ok(())
}

fn test_data_dir(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("test_data")
        .join(name)
}

async fn run_local_storage_tests() -> Result<()> {
    let test_data_dir = test_data_dir("local");
    std::fs::create_dir_all(&test_data_dir)?;
    println!("Base path: {:?}", test_data_dir);

    let mut descriptor = Descriptor::new();
    descriptor.insert("subclass_name".to_string(), json!("LocalFileSystem"));
    descriptor.insert(
        "base_path".to_string(),
        json!(test_data_dir.to_string_lossy()),
    );

    let kb_id = format!("kb-{}", uuid::Uuid::new_v4());
    let doc_id = "doc-1";

    let test_result = async {
        println!("\n🔧 Building backend from descriptor...");
        let storage = storage::from_descriptor(descriptor.clone())
            .context("Failed to build local backend")?;
        if storage.to_descriptor() != descriptor {
            anyhow::bail!("Descriptor did not round-trip: {:?}", storage.to_descriptor());
        }
        println!("✅ Descriptor round-trips");

        println!("\n📤 Writing document...");
        populate_document(storage.as_ref(), &kb_id, doc_id).await?;

        println!("\n🔍 Validating document through storage...");
        let pages = verify_document(storage.as_ref(), &kb_id, doc_id).await?;
        println!("✅ Storage validation passed");

        println!("\n🔍 Validating filesystem layout...");
        filesystem_validator::validate_document_dir(&test_data_dir, &kb_id, doc_id)?;
        filesystem_validator::validate_page_files(
            &test_data_dir.join(&kb_id).join(doc_id),
            &pages,
        )?;
        println!("✅ Filesystem validation passed");

        println!("\n📝 Logging an error without an error table...");
        storage
            .log_error(&kb_id, doc_id, &json!({"stage": "ocr"}))
            .await
            .context("log_error should be a no-op")?;
        println!("✅ log_error is a no-op");

        test_deletion(storage.as_ref(), &kb_id, doc_id).await?;
        filesystem_validator::validate_deleted(&test_data_dir, &kb_id)?;
        println!("✅ Deletion validation passed");

        Ok::<(), anyhow::Error>(())
    };

    let result = test_result.await;

    // Always cleanup, even on error
    if let Err(e) = cleanup_test_data(&test_data_dir) {
        eprintln!("Warning: Failed to cleanup test data: {}", e);
    }

    result
}

async fn run_remote_storage_tests() -> Result<()> {
    let test_data_dir = test_data_dir("remote");
    std::fs::create_dir_all(&test_data_dir)?;

    let mut config = RemoteConfig::from_env().context("Failed to load remote configuration")?;
    config.base_path = test_data_dir.to_string_lossy().into_owned();
    println!("Remote config: {:?}", config);

    let error_target = config.error_table.clone().zip(
        config
            .error_database_url
            .clone()
            .or_else(|| std::env::var("DATABASE_URL").ok()),
    );

    let kb_id = format!("kb-{}", uuid::Uuid::new_v4());
    let doc_id = "doc-1";

    let test_result = async {
        println!("\n🔧 Building backend from configuration...");
        let backend = StorageBackend::Remote(config.clone());
        let descriptor = backend.to_descriptor();
        let storage: Arc<dyn Storage> = backend
            .initialize()
            .context("Failed to build remote backend")?;
        if storage.to_descriptor() != descriptor {
            anyhow::bail!("Descriptor did not round-trip");
        }
        println!("✅ Descriptor round-trips");

        println!("\n📤 Uploading document...");
        populate_document(storage.as_ref(), &kb_id, doc_id).await?;

        println!("\n🔍 Validating document through storage...");
        let pages = verify_document(storage.as_ref(), &kb_id, doc_id).await?;
        filesystem_validator::validate_page_files(
            &test_data_dir.join(&kb_id).join(doc_id),
            &pages,
        )?;
        println!("✅ Storage validation passed");

        let error = json!({"stage": "ocr", "message": "page 3 unreadable"});
        println!("\n📝 Logging an error...");
        storage
            .log_error(&kb_id, doc_id, &error)
            .await
            .context("Failed to log error")?;
        if let Some((table, database_url)) = &error_target {
            database_validator::validate_error_log(database_url, table, &kb_id, doc_id, &error)
                .await?;
            println!("✅ Error table validation passed");
        } else {
            println!("⚠️  No error table configured, skipping validation");
        }

        test_deletion(storage.as_ref(), &kb_id, doc_id).await?;
        let remaining = storage
            .get_all_page_images(&kb_id, doc_id)
            .await
            .context("Failed to list page images after deletion")?;
        if !remaining.is_empty() {
            anyhow::bail!("Page images still listed after deletion: {:?}", remaining);
        }
        println!("✅ Deletion validation passed");

        Ok::<(), anyhow::Error>(())
    };

    let result = test_result.await;

    // Always cleanup, even on error
    if let Some((table, database_url)) = &error_target {
        if let Err(e) = database_validator::cleanup_test_data(database_url, table, &kb_id).await {
            eprintln!("Warning: Failed to cleanup error table: {}", e);
        }
    }
    if let Err(e) = cleanup_test_data(&test_data_dir) {
        eprintln!("Warning: Failed to cleanup test data: {}", e);
    }

    result
}

/// Delete the document, then the knowledge base, then both again
async fn test_deletion(storage: &dyn Storage, kb_id: &str, doc_id: &str) -> Result<()> {
    println!("\n🗑️  Testing deletion...");

    storage
        .save_json(kb_id, "doc-2", "metadata.json", &Value::Bool(true))
        .await
        .context("Failed to save second document")?;

    let removed = storage
        .delete_directory(kb_id, doc_id)
        .await
        .context("Failed to delete document")?;
    // 3 images, 2 page contents, elements.json
    if removed.len() != 6 {
        anyhow::bail!("Expected 6 removed items, got {:?}", removed);
    }
    let prefix = format!("{}/{}/", kb_id, doc_id);
    if let Some(id) = removed.iter().find(|id| !id.starts_with(&prefix)) {
        anyhow::bail!("Removed id {} is outside {}", id, prefix);
    }
    println!("  ✓ delete_directory removed {} items", removed.len());

    if storage.load_data(kb_id, "doc-2", "metadata").await != Some(Value::Bool(true)) {
        anyhow::bail!("Sibling document was affected by delete_directory");
    }
    println!("  ✓ Sibling document untouched");

    let removed = storage.delete_directory(kb_id, doc_id).await?;
    if !removed.is_empty() {
        anyhow::bail!("Second delete_directory removed {:?}", removed);
    }
    println!("  ✓ delete_directory is idempotent");

    let removed = storage.delete_kb(kb_id).await.context("Failed to delete kb")?;
    if removed != vec![format!("{}/doc-2/metadata.json", kb_id)] {
        anyhow::bail!("Unexpected delete_kb result: {:?}", removed);
    }
    let removed = storage.delete_kb(kb_id).await?;
    if !removed.is_empty() {
        anyhow::bail!("Second delete_kb removed {:?}", removed);
    }
    println!("  ✓ delete_kb removes the rest and is idempotent");

    Ok(())
}

fn cleanup_test_data(test_data_dir: &Path) -> Result<()> {
    let keep_data = std::env::var("KEEP_TEST_DATA").unwrap_or_else(|_| "false".to_string());
    if keep_data == "true" {
        println!(
            "\n⚠️  Keeping test data (KEEP_TEST_DATA=true): {:?}",
            test_data_dir
        );
        return Ok(());
    }

    println!("\n🧹 Cleaning up test data: {:?}", test_data_dir);
    if test_data_dir.exists() {
        std::fs::remove_dir_all(test_data_dir).with_context(|| {
            format!("Failed to remove test data directory: {:?}", test_data_dir)
        })?;
        println!("✅ Test data cleaned up");
    }
    Ok(())
}
