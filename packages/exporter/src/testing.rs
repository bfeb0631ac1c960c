//! In-memory sources for tests.
//!
//! Each fake serves canned data through the source traits and records the
//! calls it received so tests can assert on pagination.

use async_trait::async_trait;
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::context::{ExportContext, ExportSettings};
use crate::traits::{
    Bucket, IdentitySource, ObjectStore, RowPage, SourceError, SourceResult, StorageEntry,
    TableSource,
};

/// Settings for tests: output under `dir`, no throttling.
pub fn test_settings(dir: &Path) -> ExportSettings {
    ExportSettings {
        output_dir: dir.to_path_buf(),
        tables: Vec::new(),
        page_delay: Duration::ZERO,
        download_delay: Duration::ZERO,
        ..ExportSettings::default()
    }
}

/// Context wired to the given fakes.
pub fn test_context(
    tables: MemoryTables,
    identities: MemoryIdentities,
    storage: MemoryStorage,
    settings: ExportSettings,
) -> ExportContext {
    ExportContext::new(
        Arc::new(tables),
        Arc::new(identities),
        Arc::new(storage),
        settings,
    )
}

/// `n` rows shaped like `{ "id": i, "name": "<table>-<i>" }`.
pub fn rows(table: &str, n: usize) -> Vec<Value> {
    (0..n)
        .map(|i| serde_json::json!({ "id": i, "name": format!("{}-{}", table, i) }))
        .collect()
}

// =============================================================================
// Tables
// =============================================================================

/// Arguments captured from a fetch_rows call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RangeCall {
    pub table: String,
    pub start: u64,
    pub end: u64,
}

#[derive(Default, Clone)]
pub struct MemoryTables {
    tables: Arc<Mutex<HashMap<String, Vec<Value>>>>,
    failures: Arc<Mutex<HashMap<String, String>>>,
    calls: Arc<Mutex<Vec<RangeCall>>>,
}

impl MemoryTables {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_table(self, name: &str, rows: Vec<Value>) -> Self {
        self.tables.lock().unwrap().insert(name.to_string(), rows);
        self
    }

    /// Every fetch against `name` fails with `message`.
    pub fn with_failure(self, name: &str, message: &str) -> Self {
        self.failures
            .lock()
            .unwrap()
            .insert(name.to_string(), message.to_string());
        self
    }

    pub fn calls(&self) -> Vec<RangeCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn calls_for(&self, table: &str) -> Vec<RangeCall> {
        self.calls()
            .into_iter()
            .filter(|c| c.table == table)
            .collect()
    }
}

#[async_trait]
impl TableSource for MemoryTables {
    async fn fetch_rows(&self, table: &str, start: u64, end: u64) -> SourceResult<RowPage> {
        self.calls.lock().unwrap().push(RangeCall {
            table: table.to_string(),
            start,
            end,
        });

        if let Some(message) = self.failures.lock().unwrap().get(table) {
            return Err(SourceError::Fetch(message.clone()));
        }

        let tables = self.tables.lock().unwrap();
        let rows = tables
            .get(table)
            .ok_or_else(|| SourceError::not_found(table))?;

        let len = rows.len() as u64;
        let page = if start >= len {
            Vec::new()
        } else {
            rows[start as usize..=(end.min(len - 1)) as usize].to_vec()
        };

        Ok(RowPage {
            rows: page,
            total: Some(len),
        })
    }
}

// =============================================================================
// Identities
// =============================================================================

#[derive(Default, Clone)]
pub struct MemoryIdentities {
    users: Arc<Mutex<Vec<Value>>>,
    fail_on_page: Arc<Mutex<Option<u32>>>,
    calls: Arc<Mutex<Vec<(u32, u32)>>>,
}

impl MemoryIdentities {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_users(self, users: Vec<Value>) -> Self {
        self.users.lock().unwrap().extend(users);
        self
    }

    /// Listing `page` fails with a fetch error.
    pub fn failing_on_page(self, page: u32) -> Self {
        *self.fail_on_page.lock().unwrap() = Some(page);
        self
    }

    /// `(page, per_page)` for every call.
    pub fn calls(&self) -> Vec<(u32, u32)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl IdentitySource for MemoryIdentities {
    async fn list_users(&self, page: u32, per_page: u32) -> SourceResult<Vec<Value>> {
        self.calls.lock().unwrap().push((page, per_page));

        if *self.fail_on_page.lock().unwrap() == Some(page) {
            return Err(SourceError::Fetch(format!("connection reset on page {}", page)));
        }

        let users = self.users.lock().unwrap();
        let start = (page.saturating_sub(1) as usize) * per_page as usize;
        Ok(users
            .iter()
            .skip(start)
            .take(per_page as usize)
            .cloned()
            .collect())
    }
}

// =============================================================================
// Storage
// =============================================================================

const MEMORY_SCHEME: &str = "memory://";

#[derive(Default, Clone)]
pub struct MemoryStorage {
    buckets: Arc<Mutex<Vec<Bucket>>>,
    /// bucket -> object path -> contents
    objects: Arc<Mutex<HashMap<String, BTreeMap<String, Vec<u8>>>>>,
    failing_downloads: Arc<Mutex<HashSet<String>>>,
    missing_buckets: Arc<Mutex<HashSet<String>>>,
    list_buckets_error: Arc<Mutex<Option<String>>>,
    downloads: Arc<Mutex<Vec<String>>>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_bucket(self, name: &str, public: bool) -> Self {
        self.buckets.lock().unwrap().push(Bucket::new(name, public));
        self.objects
            .lock()
            .unwrap()
            .entry(name.to_string())
            .or_default();
        self
    }

    pub fn with_object(self, bucket: &str, path: &str, body: &[u8]) -> Self {
        self.objects
            .lock()
            .unwrap()
            .entry(bucket.to_string())
            .or_default()
            .insert(path.to_string(), body.to_vec());
        self
    }

    /// Downloading `bucket/path` fails with a simulated network error.
    pub fn with_failing_download(self, bucket: &str, path: &str) -> Self {
        self.failing_downloads
            .lock()
            .unwrap()
            .insert(format!("{}/{}", bucket, path));
        self
    }

    /// The bucket is listed but listing its objects reports not found.
    pub fn with_vanished_bucket(self, name: &str) -> Self {
        self.missing_buckets.lock().unwrap().insert(name.to_string());
        self.with_bucket(name, true)
    }

    pub fn failing_bucket_list(self, message: &str) -> Self {
        *self.list_buckets_error.lock().unwrap() = Some(message.to_string());
        self
    }

    /// `bucket/path` of every attempted download, in order.
    pub fn downloads(&self) -> Vec<String> {
        self.downloads.lock().unwrap().clone()
    }
}

#[async_trait]
impl ObjectStore for MemoryStorage {
    async fn list_buckets(&self) -> SourceResult<Vec<Bucket>> {
        if let Some(message) = self.list_buckets_error.lock().unwrap().clone() {
            return Err(SourceError::Fetch(message));
        }
        Ok(self.buckets.lock().unwrap().clone())
    }

    async fn list_entries(
        &self,
        bucket: &str,
        prefix: &str,
        limit: u32,
        offset: u32,
    ) -> SourceResult<Vec<StorageEntry>> {
        if self.missing_buckets.lock().unwrap().contains(bucket) {
            return Err(SourceError::not_found(bucket));
        }

        let objects = self.objects.lock().unwrap();
        let files = objects
            .get(bucket)
            .ok_or_else(|| SourceError::not_found(bucket))?;

        let scope = if prefix.is_empty() {
            String::new()
        } else {
            format!("{}/", prefix)
        };

        // One directory level: direct children become files, deeper paths
        // collapse into their first folder.
        let mut folders = BTreeSet::new();
        let mut level = Vec::new();
        for (path, body) in files.iter() {
            let Some(rest) = path.strip_prefix(&scope) else {
                continue;
            };
            match rest.split_once('/') {
                Some((folder, _)) => {
                    folders.insert(folder.to_string());
                }
                None => level.push(StorageEntry::file(rest, body.len() as u64)),
            }
        }

        let mut entries: Vec<StorageEntry> =
            folders.into_iter().map(StorageEntry::folder).collect();
        entries.extend(level);
        entries.sort_by(|a, b| a.name.cmp(&b.name));

        Ok(entries
            .into_iter()
            .skip(offset as usize)
            .take(limit as usize)
            .collect())
    }

    fn public_url(&self, bucket: &str, path: &str) -> String {
        format!("{}{}/{}", MEMORY_SCHEME, bucket, path)
    }

    async fn fetch_url(&self, bucket: &Bucket, path: &str) -> SourceResult<String> {
        let url = self.public_url(&bucket.name, path);
        if bucket.public {
            Ok(url)
        } else {
            Ok(format!("{}?token=signed", url))
        }
    }

    async fn download(&self, url: &str, dest: &Path) -> SourceResult<u64> {
        let key = url
            .strip_prefix(MEMORY_SCHEME)
            .ok_or_else(|| SourceError::Download(format!("unsupported url {}", url)))?;
        let key = key.split('?').next().unwrap_or(key).to_string();
        self.downloads.lock().unwrap().push(key.clone());

        if self.failing_downloads.lock().unwrap().contains(&key) {
            return Err(SourceError::Download(format!(
                "simulated network error fetching {}",
                key
            )));
        }

        let body = {
            let objects = self.objects.lock().unwrap();
            let (bucket, path) = key
                .split_once('/')
                .ok_or_else(|| SourceError::Download(format!("bad key {}", key)))?;
            objects
                .get(bucket)
                .and_then(|files| files.get(path))
                .cloned()
                .ok_or_else(|| SourceError::Download(format!("404 for {}", key)))?
        };

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| SourceError::Download(e.to_string()))?;
        }
        tokio::fs::write(dest, &body)
            .await
            .map_err(|e| SourceError::Download(e.to_string()))?;

        Ok(body.len() as u64)
    }
}
