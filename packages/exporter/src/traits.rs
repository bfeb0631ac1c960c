// Trait definitions for the export sources
//
// These are INFRASTRUCTURE traits only: fetch a page, list a level, download
// a file. Pagination, failure isolation and artifact writing live in the
// exporters so they can be exercised against in-memory fakes.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use thiserror::Error;

pub use supabase_client::{Bucket, StorageEntry};

/// Errors surfaced by a source. Exporters branch on the variant, never on
/// the message.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SourceError {
    /// Table or bucket does not exist (skip, not an error)
    #[error("resource not found: {resource}")]
    NotFound { resource: String },

    /// Network or API failure while reading
    #[error("fetch failed: {0}")]
    Fetch(String),

    /// Failure while downloading a single object
    #[error("download failed: {0}")]
    Download(String),
}

impl SourceError {
    pub fn not_found(resource: impl Into<String>) -> Self {
        Self::NotFound {
            resource: resource.into(),
        }
    }
}

pub type SourceResult<T> = std::result::Result<T, SourceError>;

/// One page of table rows.
#[derive(Debug, Clone, Default)]
pub struct RowPage {
    pub rows: Vec<Value>,
    /// Exact row count reported by the source, if any.
    pub total: Option<u64>,
}

// =============================================================================
// Tables
// =============================================================================

#[async_trait]
pub trait TableSource: Send + Sync {
    /// Fetch rows `start..=end` (zero based, inclusive).
    async fn fetch_rows(&self, table: &str, start: u64, end: u64) -> SourceResult<RowPage>;
}

// =============================================================================
// Identities
// =============================================================================

#[async_trait]
pub trait IdentitySource: Send + Sync {
    /// List one page of raw identity records. `page` starts at 1.
    async fn list_users(&self, page: u32, per_page: u32) -> SourceResult<Vec<Value>>;
}

// =============================================================================
// Storage
// =============================================================================

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn list_buckets(&self) -> SourceResult<Vec<Bucket>>;

    /// List one directory level of `bucket` under `prefix` ("" for the root).
    async fn list_entries(
        &self,
        bucket: &str,
        prefix: &str,
        limit: u32,
        offset: u32,
    ) -> SourceResult<Vec<StorageEntry>>;

    /// The canonical URL the application stores for an object.
    fn public_url(&self, bucket: &str, path: &str) -> String;

    /// A URL the object can actually be fetched from. Defaults to the public
    /// URL; private buckets need a signed one.
    async fn fetch_url(&self, bucket: &Bucket, path: &str) -> SourceResult<String> {
        Ok(self.public_url(&bucket.name, path))
    }

    /// Download `url` to `dest`, returning the byte count.
    async fn download(&self, url: &str, dest: &Path) -> SourceResult<u64>;
}
