//! Supabase adapter for the source traits.

use async_trait::async_trait;
use serde_json::Value;
use std::path::Path;
use std::sync::Arc;
use supabase_client::{SupabaseClient, SupabaseError};

use crate::traits::{
    Bucket, IdentitySource, ObjectStore, RowPage, SourceError, SourceResult, StorageEntry,
    TableSource,
};

/// Wrapper around SupabaseClient that implements the source traits
pub struct SupabaseSource {
    client: Arc<SupabaseClient>,
    signed_url_ttl_secs: u64,
}

impl SupabaseSource {
    pub fn new(client: Arc<SupabaseClient>, signed_url_ttl_secs: u64) -> Self {
        Self {
            client,
            signed_url_ttl_secs,
        }
    }
}

fn fetch_error(resource: &str, err: SupabaseError) -> SourceError {
    if err.is_not_found() {
        SourceError::not_found(resource)
    } else {
        SourceError::Fetch(err.to_string())
    }
}

#[async_trait]
impl TableSource for SupabaseSource {
    async fn fetch_rows(&self, table: &str, start: u64, end: u64) -> SourceResult<RowPage> {
        let page = self
            .client
            .select_range(table, start, end)
            .await
            .map_err(|e| fetch_error(table, e))?;
        Ok(RowPage {
            rows: page.rows,
            total: page.total,
        })
    }
}

#[async_trait]
impl IdentitySource for SupabaseSource {
    async fn list_users(&self, page: u32, per_page: u32) -> SourceResult<Vec<Value>> {
        self.client
            .list_users(page, per_page)
            .await
            .map_err(|e| fetch_error("auth.users", e))
    }
}

#[async_trait]
impl ObjectStore for SupabaseSource {
    async fn list_buckets(&self) -> SourceResult<Vec<Bucket>> {
        self.client
            .list_buckets()
            .await
            .map_err(|e| fetch_error("storage buckets", e))
    }

    async fn list_entries(
        &self,
        bucket: &str,
        prefix: &str,
        limit: u32,
        offset: u32,
    ) -> SourceResult<Vec<StorageEntry>> {
        self.client
            .list_objects(bucket, prefix, limit, offset)
            .await
            .map_err(|e| fetch_error(bucket, e))
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        self.client.public_url(bucket, path)
    }

    async fn fetch_url(&self, bucket: &Bucket, path: &str) -> SourceResult<String> {
        if bucket.public {
            return Ok(self.client.public_url(&bucket.name, path));
        }
        self.client
            .signed_url(&bucket.name, path, self.signed_url_ttl_secs)
            .await
            .map_err(|e| SourceError::Download(format!("could not sign URL: {}", e)))
    }

    async fn download(&self, url: &str, dest: &Path) -> SourceResult<u64> {
        self.client
            .download_to(url, dest)
            .await
            .map_err(|e| SourceError::Download(e.to_string()))
    }
}
