//! Table exporter.
//!
//! Dumps each table to `data/<table>.json` by paging through it with range
//! reads. A missing table is skipped and any other failure is recorded
//! against that table only; the run always moves on to the next table.

use anyhow::Result;
use futures::stream::{self, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::artifacts::{ensure_dir, write_json};
use crate::context::ExportContext;
use crate::pagination::{is_last_page, Page};
use crate::summary::{now_rfc3339, seconds, JobStatus, Tally};
use crate::throttle::Throttle;
use crate::traits::{SourceError, SourceResult};

/// Tables exported when no list is configured.
///
/// Parents come before children so progress output reads naturally. Each dump
/// is independent; the order has no effect on the exported data.
pub const SUMMARY_FILE: &str = "_export_summary.json";

pub const DEFAULT_TABLES: &[&str] = &[
    // accounts
    "profiles",
    "teachers",
    "students",
    // learning modules
    "classes",
    "class_students",
    "vark_module_categories",
    "vark_modules",
    "vark_module_sections",
    "vark_module_assignments",
    "vark_module_progress",
    "vark_learning_paths",
    "student_module_submissions",
    "quizzes",
    "quiz_questions",
    "quiz_results",
    "announcements",
    // senior citizen registry
    "barangays",
    "basca_members",
    "senior_citizens",
    "senior_beneficiaries",
    "benefits",
    "pension_records",
    "announcements_osca",
    "reports",
];

/// Outcome of exporting one table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableResult {
    pub table: String,
    pub status: JobStatus,
    pub success: bool,
    pub skipped: bool,
    pub records: usize,
    pub pages: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub server_count: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub file: Option<PathBuf>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl TableResult {
    fn exported(table: &str, fetched: &FetchedTable, file: PathBuf) -> Self {
        Self {
            table: table.to_string(),
            status: JobStatus::Success,
            success: true,
            skipped: false,
            records: fetched.rows.len(),
            pages: fetched.pages,
            server_count: fetched.server_count,
            file: Some(file),
            error: None,
        }
    }

    fn skipped(table: &str) -> Self {
        Self {
            table: table.to_string(),
            status: JobStatus::Skipped,
            success: false,
            skipped: true,
            records: 0,
            pages: 0,
            server_count: None,
            file: None,
            error: None,
        }
    }

    fn failed(table: &str, error: String) -> Self {
        Self {
            table: table.to_string(),
            status: JobStatus::Failed,
            success: false,
            skipped: false,
            records: 0,
            pages: 0,
            server_count: None,
            file: None,
            error: Some(error),
        }
    }
}

/// Written to `data/_export_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableExportSummary {
    pub export_date: String,
    pub duration_seconds: f64,
    pub total_tables: usize,
    pub successful_tables: usize,
    pub skipped_tables: usize,
    pub failed_tables: usize,
    pub total_records: usize,
    pub tables: Vec<TableResult>,
}

impl TableExportSummary {
    fn from_results(tables: Vec<TableResult>, started: Instant) -> Self {
        let tally: Tally = tables.iter().map(|t| t.status).collect();
        Self {
            export_date: now_rfc3339(),
            duration_seconds: seconds(started.elapsed()),
            total_tables: tally.total(),
            successful_tables: tally.successful,
            skipped_tables: tally.skipped,
            failed_tables: tally.failed,
            total_records: tables.iter().map(|t| t.records).sum(),
            tables,
        }
    }

    /// Describe partial failures, if any.
    pub fn failure_note(&self) -> Option<String> {
        if self.failed_tables == 0 {
            return None;
        }
        let names: Vec<&str> = self
            .tables
            .iter()
            .filter(|t| t.status == JobStatus::Failed)
            .map(|t| t.table.as_str())
            .collect();
        Some(format!(
            "{} table(s) failed: {}",
            self.failed_tables,
            names.join(", ")
        ))
    }
}

struct FetchedTable {
    rows: Vec<Value>,
    pages: u64,
    server_count: Option<u64>,
}

/// Export every configured table. Only failing to create the output
/// directory or to write the summary aborts the phase.
pub async fn export_tables(ctx: &ExportContext) -> Result<TableExportSummary> {
    let started = Instant::now();
    let settings = &ctx.settings;
    let dir = settings.data_dir();
    ensure_dir(&dir).await?;

    let total = settings.tables.len();
    tracing::info!(tables = total, dir = %dir.display(), "Exporting tables");

    let throttle = Throttle::every(settings.page_delay);
    let dir_ref = dir.as_path();
    let throttle_ref = &throttle;

    let results: Vec<TableResult> = stream::iter(settings.tables.iter().enumerate())
        .map(move |(idx, table)| async move {
            tracing::info!(table = %table, "[{}/{}] Exporting table", idx + 1, total);
            export_table(ctx, table, dir_ref, throttle_ref).await
        })
        .buffered(settings.table_concurrency.max(1))
        .collect()
        .await;

    let summary = TableExportSummary::from_results(results, started);
    write_json(
        &dir.join(SUMMARY_FILE),
        "data summary",
        summary.total_tables,
        &summary,
    )
    .await?;

    tracing::info!(
        successful = summary.successful_tables,
        skipped = summary.skipped_tables,
        failed = summary.failed_tables,
        records = summary.total_records,
        "Table export finished"
    );

    Ok(summary)
}

async fn export_table(
    ctx: &ExportContext,
    table: &str,
    dir: &Path,
    throttle: &Throttle,
) -> TableResult {
    let Some(file_name) = dump_file_name(table) else {
        tracing::error!(table, "Refusing table name that is not a plain file name");
        return TableResult::failed(table, format!("refusing unsafe table name: {}", table));
    };

    let fetched = match fetch_all_rows(ctx, table, throttle).await {
        Ok(fetched) => fetched,
        Err(SourceError::NotFound { .. }) => {
            tracing::warn!(table, "Table not found, skipping");
            return TableResult::skipped(table);
        }
        Err(e) => {
            tracing::error!(table, error = %e, "Table export failed");
            return TableResult::failed(table, e.to_string());
        }
    };

    if let Some(count) = fetched.server_count {
        if count != fetched.rows.len() as u64 {
            tracing::warn!(
                table,
                server_count = count,
                exported = fetched.rows.len(),
                "Row count changed during export"
            );
        }
    }

    let path = dir.join(file_name);
    match write_json(&path, table, fetched.rows.len(), &fetched.rows).await {
        Ok(artifact) => {
            tracing::info!(table, records = artifact.records, pages = fetched.pages, "Table exported");
            TableResult::exported(table, &fetched, artifact.path)
        }
        Err(e) => {
            tracing::error!(table, error = %e, "Failed to write table dump");
            TableResult::failed(table, format!("{:#}", e))
        }
    }
}

/// File name of a table dump, or `None` when the name could leave the data
/// directory or clash with the summary.
fn dump_file_name(table: &str) -> Option<String> {
    if table.is_empty() || table == "." || table == ".." || table.contains(['/', '\\']) {
        return None;
    }
    let name = format!("{}.json", table);
    (name != SUMMARY_FILE).then_some(name)
}

/// Page through a table until a short (or empty) page comes back.
async fn fetch_all_rows(
    ctx: &ExportContext,
    table: &str,
    throttle: &Throttle,
) -> SourceResult<FetchedTable> {
    let size = ctx.settings.table_page_size.max(1);
    let mut rows = Vec::new();
    let mut server_count = None;
    let mut index = 0;

    loop {
        let page = Page::nth(index, size);
        throttle.ready().await;
        let fetched = ctx.tables.fetch_rows(table, page.start, page.end).await?;
        let returned = fetched.rows.len();

        tracing::debug!(
            table,
            page = page.index,
            start = page.start,
            end = page.end,
            returned,
            "Fetched page"
        );

        if fetched.total.is_some() {
            server_count = fetched.total;
        }
        rows.extend(fetched.rows);
        index += 1;

        if is_last_page(returned, size) {
            break;
        }
    }

    Ok(FetchedTable {
        rows,
        pages: index,
        server_count,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dump_file_name_rejects_paths_and_summary_clash() {
        assert_eq!(dump_file_name("profiles").as_deref(), Some("profiles.json"));
        assert_eq!(dump_file_name("vark_results").as_deref(), Some("vark_results.json"));
        assert!(dump_file_name("../../escaped").is_none());
        assert!(dump_file_name("nested/table").is_none());
        assert!(dump_file_name("..\\escaped").is_none());
        assert!(dump_file_name("..").is_none());
        assert!(dump_file_name("").is_none());
        assert!(dump_file_name("_export_summary").is_none());
    }

    #[test]
    fn skipped_result_has_no_error_and_no_records() {
        let result = TableResult::skipped("gone");
        assert!(result.skipped);
        assert!(!result.success);
        assert_eq!(result.records, 0);

        let json = serde_json::to_value(&result).unwrap();
        assert_eq!(json["skipped"], true);
        assert!(json.get("error").is_none());
    }

    #[test]
    fn failed_result_carries_message() {
        let result = TableResult::failed("profiles", "fetch failed: timeout".into());
        assert!(!result.skipped);
        assert_eq!(result.records, 0);
        assert_eq!(result.error.as_deref(), Some("fetch failed: timeout"));
    }

    #[test]
    fn failure_note_names_failed_tables() {
        let started = Instant::now();
        let summary = TableExportSummary::from_results(
            vec![
                TableResult::skipped("a"),
                TableResult::failed("b", "boom".into()),
                TableResult::failed("c", "boom".into()),
            ],
            started,
        );
        assert_eq!(summary.failure_note().unwrap(), "2 table(s) failed: b, c");

        let clean = TableExportSummary::from_results(vec![TableResult::skipped("a")], started);
        assert!(clean.failure_note().is_none());
    }

    #[test]
    fn default_tables_are_unique() {
        let mut seen = std::collections::HashSet::new();
        for table in DEFAULT_TABLES {
            assert!(seen.insert(*table), "duplicate table {}", table);
        }
    }
}
