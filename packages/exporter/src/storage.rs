//! Storage exporter.
//!
//! Walks every bucket depth first, downloads each object to
//! `storage/<bucket>/<path>`, and records every attempt in the bucket's
//! `_manifest.json`. Successful downloads also go into the global
//! `_url_mapping.json` used to rewrite links after migration.

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::artifacts::{ensure_dir, safe_relative_path, write_json};
use crate::context::ExportContext;
use crate::pagination::is_last_page;
use crate::summary::{now_rfc3339, seconds, JobStatus, Tally};
use crate::throttle::Throttle;
use crate::traits::{Bucket, SourceError, SourceResult, StorageEntry};

pub const MANIFEST_FILE: &str = "_manifest.json";
pub const URL_MAPPING_FILE: &str = "_url_mapping.json";
pub const SUMMARY_FILE: &str = "_storage_export_summary.json";

/// An object found while walking a bucket.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteObject {
    /// Path inside the bucket, `/` separated.
    pub path: String,
    pub entry: StorageEntry,
}

/// One download attempt, as recorded in the bucket manifest.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ManifestEntry {
    pub name: String,
    pub path: String,
    pub size: Option<u64>,
    pub mime_type: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub original_url: String,
    pub local_path: Option<PathBuf>,
    pub downloaded: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub bytes: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Written to `storage/<bucket>/_manifest.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketManifest {
    pub bucket: String,
    pub public: bool,
    pub export_date: String,
    pub total_files: usize,
    pub downloaded_files: usize,
    pub failed_files: usize,
    pub total_bytes: u64,
    pub files: Vec<ManifestEntry>,
}

/// Link-rewrite record for one downloaded object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UrlMapping {
    pub original_url: String,
    pub bucket: String,
    pub path: String,
    pub local_path: PathBuf,
    pub new_url: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketResult {
    pub bucket: String,
    pub public: bool,
    pub status: JobStatus,
    pub success: bool,
    pub skipped: bool,
    pub total_files: usize,
    pub downloaded_files: usize,
    pub failed_files: usize,
    pub total_bytes: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub manifest: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl BucketResult {
    fn empty(bucket: &Bucket, status: JobStatus, error: Option<String>) -> Self {
        Self {
            bucket: bucket.name.clone(),
            public: bucket.public,
            status,
            success: status == JobStatus::Success,
            skipped: status == JobStatus::Skipped,
            total_files: 0,
            downloaded_files: 0,
            failed_files: 0,
            total_bytes: 0,
            manifest: None,
            error,
        }
    }
}

/// Written to `storage/_storage_export_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageExportSummary {
    pub export_date: String,
    pub duration_seconds: f64,
    pub total_buckets: usize,
    pub successful_buckets: usize,
    pub skipped_buckets: usize,
    pub failed_buckets: usize,
    pub total_files: usize,
    pub downloaded_files: usize,
    pub failed_files: usize,
    pub total_bytes: u64,
    pub total_mappings: usize,
    pub buckets: Vec<BucketResult>,
}

impl StorageExportSummary {
    fn from_results(buckets: Vec<BucketResult>, total_mappings: usize, started: Instant) -> Self {
        let tally: Tally = buckets.iter().map(|b| b.status).collect();
        Self {
            export_date: now_rfc3339(),
            duration_seconds: seconds(started.elapsed()),
            total_buckets: tally.total(),
            successful_buckets: tally.successful,
            skipped_buckets: tally.skipped,
            failed_buckets: tally.failed,
            total_files: buckets.iter().map(|b| b.total_files).sum(),
            downloaded_files: buckets.iter().map(|b| b.downloaded_files).sum(),
            failed_files: buckets.iter().map(|b| b.failed_files).sum(),
            total_bytes: buckets.iter().map(|b| b.total_bytes).sum(),
            total_mappings,
            buckets,
        }
    }

    pub fn failure_note(&self) -> Option<String> {
        let mut parts = Vec::new();
        if self.failed_buckets > 0 {
            parts.push(format!("{} bucket(s) failed", self.failed_buckets));
        }
        if self.failed_files > 0 {
            parts.push(format!("{} object download(s) failed", self.failed_files));
        }
        (!parts.is_empty()).then(|| parts.join(", "))
    }
}

/// Recursively list every object in a bucket.
///
/// The list call returns one directory level, so folders (entries without an
/// id) are pushed on a stack and walked depth first.
pub async fn list_bucket_objects(
    ctx: &ExportContext,
    bucket: &str,
) -> SourceResult<Vec<RemoteObject>> {
    let limit = ctx.settings.object_list_limit.max(1);
    let mut objects = Vec::new();
    let mut pending = vec![String::new()];

    while let Some(prefix) = pending.pop() {
        let mut folders = Vec::new();
        let mut offset = 0u32;

        loop {
            let entries = ctx
                .storage
                .list_entries(bucket, &prefix, limit, offset)
                .await?;
            let returned = entries.len();

            for entry in entries {
                let path = if prefix.is_empty() {
                    entry.name.clone()
                } else {
                    format!("{}/{}", prefix, entry.name)
                };
                if entry.is_folder() {
                    folders.push(path);
                } else {
                    objects.push(RemoteObject { path, entry });
                }
            }

            if is_last_page(returned, limit as u64) {
                break;
            }
            offset += limit;
        }

        tracing::debug!(bucket, prefix = %prefix, folders = folders.len(), "Listed folder");
        // Reverse so the first folder listed is walked first.
        pending.extend(folders.into_iter().rev());
    }

    Ok(objects)
}

/// Export every bucket. Only a failure to list buckets or to write the
/// global artifacts aborts the phase.
pub async fn export_storage(ctx: &ExportContext) -> Result<StorageExportSummary> {
    let started = Instant::now();
    let root = ctx.settings.storage_dir();
    ensure_dir(&root).await?;

    let buckets = ctx.storage.list_buckets().await?;
    tracing::info!(buckets = buckets.len(), dir = %root.display(), "Exporting storage");

    let throttle = Throttle::every(ctx.settings.download_delay);
    let mut results = Vec::with_capacity(buckets.len());
    let mut mappings = Vec::new();

    for (idx, bucket) in buckets.iter().enumerate() {
        tracing::info!(
            bucket = %bucket.name,
            public = bucket.public,
            "[{}/{}] Exporting bucket",
            idx + 1,
            buckets.len()
        );
        let (result, bucket_mappings) = export_bucket(ctx, bucket, &root, &throttle).await;
        results.push(result);
        mappings.extend(bucket_mappings);
    }

    write_json(
        &root.join(URL_MAPPING_FILE),
        "storage url mapping",
        mappings.len(),
        &mappings,
    )
    .await?;

    let summary = StorageExportSummary::from_results(results, mappings.len(), started);
    write_json(
        &root.join(SUMMARY_FILE),
        "storage summary",
        summary.total_buckets,
        &summary,
    )
    .await?;

    tracing::info!(
        successful = summary.successful_buckets,
        skipped = summary.skipped_buckets,
        failed = summary.failed_buckets,
        files = summary.downloaded_files,
        failed_files = summary.failed_files,
        bytes = summary.total_bytes,
        "Storage export finished"
    );

    Ok(summary)
}

async fn export_bucket(
    ctx: &ExportContext,
    bucket: &Bucket,
    root: &Path,
    throttle: &Throttle,
) -> (BucketResult, Vec<UrlMapping>) {
    let objects = match list_bucket_objects(ctx, &bucket.name).await {
        Ok(objects) => objects,
        Err(SourceError::NotFound { .. }) => {
            tracing::warn!(bucket = %bucket.name, "Bucket not found, skipping");
            return (BucketResult::empty(bucket, JobStatus::Skipped, None), Vec::new());
        }
        Err(e) => {
            tracing::error!(bucket = %bucket.name, error = %e, "Failed to list bucket");
            return (
                BucketResult::empty(bucket, JobStatus::Failed, Some(e.to_string())),
                Vec::new(),
            );
        }
    };

    if objects.is_empty() {
        tracing::info!(bucket = %bucket.name, "Bucket is empty, skipping");
        return (BucketResult::empty(bucket, JobStatus::Skipped, None), Vec::new());
    }

    let bucket_dir = root.join(&bucket.name);
    if let Err(e) = ensure_dir(&bucket_dir).await {
        return (
            BucketResult::empty(bucket, JobStatus::Failed, Some(format!("{:#}", e))),
            Vec::new(),
        );
    }

    let mut files = Vec::with_capacity(objects.len());
    let mut mappings = Vec::new();

    for object in &objects {
        throttle.ready().await;
        let original_url = ctx.storage.public_url(&bucket.name, &object.path);
        let outcome = download_object(ctx, bucket, object, &bucket_dir).await;

        let mut entry = ManifestEntry {
            name: object.entry.name.clone(),
            path: object.path.clone(),
            size: object.entry.size(),
            mime_type: object.entry.mime_type().map(String::from),
            created_at: object.entry.created_at.clone(),
            updated_at: object.entry.updated_at.clone(),
            original_url: original_url.clone(),
            local_path: None,
            downloaded: false,
            bytes: None,
            error: None,
        };

        match outcome {
            Ok((local_path, bytes)) => {
                tracing::debug!(bucket = %bucket.name, path = %object.path, bytes, "Downloaded");
                mappings.push(UrlMapping {
                    original_url,
                    bucket: bucket.name.clone(),
                    path: object.path.clone(),
                    local_path: local_path.clone(),
                    new_url: new_url(&ctx.settings.new_storage_base_url, &bucket.name, &object.path),
                });
                entry.local_path = Some(local_path);
                entry.downloaded = true;
                entry.bytes = Some(bytes);
            }
            Err(error) => {
                tracing::warn!(bucket = %bucket.name, path = %object.path, error = %error, "Download failed");
                entry.error = Some(error);
            }
        }
        files.push(entry);
    }

    let downloaded_files = files.iter().filter(|f| f.downloaded).count();
    let manifest = BucketManifest {
        bucket: bucket.name.clone(),
        public: bucket.public,
        export_date: now_rfc3339(),
        total_files: files.len(),
        downloaded_files,
        failed_files: files.len() - downloaded_files,
        total_bytes: files.iter().filter_map(|f| f.bytes).sum(),
        files,
    };

    // A bucket counts as exported when at least one object made it to disk.
    let status = if manifest.downloaded_files == 0 {
        JobStatus::Failed
    } else {
        JobStatus::Success
    };
    let mut result = BucketResult {
        bucket: bucket.name.clone(),
        public: bucket.public,
        status,
        success: status == JobStatus::Success,
        skipped: false,
        total_files: manifest.total_files,
        downloaded_files: manifest.downloaded_files,
        failed_files: manifest.failed_files,
        total_bytes: manifest.total_bytes,
        manifest: None,
        error: (status == JobStatus::Failed).then(|| {
            format!("all {} object download(s) failed", manifest.total_files)
        }),
    };

    let manifest_path = bucket_dir.join(MANIFEST_FILE);
    match write_json(&manifest_path, &bucket.name, manifest.total_files, &manifest).await {
        Ok(artifact) => result.manifest = Some(artifact.path),
        Err(e) => {
            // Without a manifest the mappings cannot be traced back to an entry.
            tracing::error!(bucket = %bucket.name, error = %e, "Failed to write manifest");
            result.status = JobStatus::Failed;
            result.success = false;
            result.error = Some(format!("{:#}", e));
            mappings.clear();
        }
    }

    tracing::info!(
        bucket = %bucket.name,
        downloaded = result.downloaded_files,
        failed = result.failed_files,
        bytes = result.total_bytes,
        "Bucket exported"
    );

    (result, mappings)
}

/// Resolve a fetchable URL and download one object under `bucket_dir`.
async fn download_object(
    ctx: &ExportContext,
    bucket: &Bucket,
    object: &RemoteObject,
    bucket_dir: &Path,
) -> std::result::Result<(PathBuf, u64), String> {
    let relative = safe_relative_path(&object.path)
        .ok_or_else(|| format!("refusing unsafe object path: {}", object.path))?;
    if relative == Path::new(MANIFEST_FILE) {
        return Err(format!(
            "object path {} collides with the bucket manifest",
            object.path
        ));
    }
    let local_path = bucket_dir.join(relative);

    let url = ctx
        .storage
        .fetch_url(bucket, &object.path)
        .await
        .map_err(|e| e.to_string())?;
    let bytes = ctx
        .storage
        .download(&url, &local_path)
        .await
        .map_err(|e| e.to_string())?;

    Ok((local_path, bytes))
}

fn new_url(base: &str, bucket: &str, path: &str) -> String {
    format!("{}/{}/{}", base.trim_end_matches('/'), bucket, path)
}
