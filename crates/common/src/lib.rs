pub mod file_utils;
pub mod utils;

use serde::{Deserialize, Serialize};

/// Extracted text of a single page, stored as `page_content_{n}.json`
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct PageContent {
    pub content: String,
}

/// A processing failure recorded against a document
/// Note: `client_id` carries the knowledge base id
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct ErrorRecord {
    pub client_id: String,
    pub doc_id: String,
    pub error: serde_json::Value,
    pub timestamp: String, // ISO-8601
}

impl ErrorRecord {
    /// Build a record stamped with the current time
    pub fn new(kb_id: &str, doc_id: &str, error: serde_json::Value) -> Self {
        Self {
            client_id: kb_id.to_string(),
            doc_id: doc_id.to_string(),
            error,
            timestamp: utils::current_timestamp_iso(),
        }
    }
}
