//! Runs the selected export phases and writes the master summary.
//!
//! Phases run strictly in the order data → auth → storage. A phase that
//! errors is recorded and the next phase still runs. The master summary is
//! the only place that decides whether the run failed.

use colored::Colorize;
use serde::{Deserialize, Serialize};
use std::time::Instant;

use crate::artifacts::write_json;
use crate::auth::{export_auth, AuthExportSummary};
use crate::context::ExportContext;
use crate::storage::{export_storage, StorageExportSummary};
use crate::summary::{now_rfc3339, seconds, Phase, PhaseError};
use crate::tables::{export_tables, TableExportSummary};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExportMode {
    #[default]
    All,
    DataOnly,
    AuthOnly,
    StorageOnly,
}

impl ExportMode {
    /// Map the (mutually exclusive) CLI flags to a mode. No flag means all.
    pub fn from_flags(data_only: bool, auth_only: bool, storage_only: bool) -> Self {
        match (data_only, auth_only, storage_only) {
            (true, _, _) => Self::DataOnly,
            (_, true, _) => Self::AuthOnly,
            (_, _, true) => Self::StorageOnly,
            _ => Self::All,
        }
    }

    pub fn includes(&self, phase: Phase) -> bool {
        match self {
            Self::All => true,
            Self::DataOnly => phase == Phase::Data,
            Self::AuthOnly => phase == Phase::Auth,
            Self::StorageOnly => phase == Phase::Storage,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::DataOnly => "data-only",
            Self::AuthOnly => "auth-only",
            Self::StorageOnly => "storage-only",
        }
    }
}

/// Written to `_master_export_summary.json`. Every key is always present;
/// phases that were not run (or failed outright) are `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MasterSummary {
    pub export_date: String,
    pub mode: ExportMode,
    pub duration_seconds: f64,
    pub data: Option<TableExportSummary>,
    pub auth: Option<AuthExportSummary>,
    pub storage: Option<StorageExportSummary>,
    pub errors: Vec<PhaseError>,
}

impl MasterSummary {
    pub fn is_success(&self) -> bool {
        self.errors.is_empty()
    }

    pub fn exit_code(&self) -> i32 {
        if self.is_success() {
            0
        } else {
            1
        }
    }
}

fn record<T>(
    phase: Phase,
    outcome: anyhow::Result<T>,
    failure_note: impl Fn(&T) -> Option<String>,
    errors: &mut Vec<PhaseError>,
) -> Option<T> {
    match outcome {
        Ok(summary) => {
            if let Some(note) = failure_note(&summary) {
                errors.push(PhaseError::new(phase, note));
            }
            Some(summary)
        }
        Err(e) => {
            tracing::error!(phase = %phase, error = %format!("{:#}", e), "Export phase failed");
            errors.push(PhaseError::new(phase, format!("{:#}", e)));
            None
        }
    }
}

/// Run the phases selected by `mode`, then write the master summary.
pub async fn run_export(ctx: &ExportContext, mode: ExportMode) -> MasterSummary {
    let started = Instant::now();
    let mut errors = Vec::new();

    tracing::info!(mode = mode.as_str(), output = %ctx.settings.output_dir.display(), "Starting export");

    let data = if mode.includes(Phase::Data) {
        record(
            Phase::Data,
            export_tables(ctx).await,
            TableExportSummary::failure_note,
            &mut errors,
        )
    } else {
        None
    };

    let auth = if mode.includes(Phase::Auth) {
        record(
            Phase::Auth,
            export_auth(ctx).await,
            AuthExportSummary::failure_note,
            &mut errors,
        )
    } else {
        None
    };

    let storage = if mode.includes(Phase::Storage) {
        record(
            Phase::Storage,
            export_storage(ctx).await,
            StorageExportSummary::failure_note,
            &mut errors,
        )
    } else {
        None
    };

    let mut summary = MasterSummary {
        export_date: now_rfc3339(),
        mode,
        duration_seconds: seconds(started.elapsed()),
        data,
        auth,
        storage,
        errors,
    };

    let path = ctx.settings.master_summary_path();
    if let Err(e) = write_json(&path, "master summary", summary.errors.len(), &summary).await {
        tracing::error!(error = %format!("{:#}", e), "Failed to write master summary");
        // Attributed to the last phase that ran; the summary itself is still returned.
        let phase = [Phase::Storage, Phase::Auth, Phase::Data]
            .into_iter()
            .find(|p| mode.includes(*p))
            .unwrap_or(Phase::Data);
        summary
            .errors
            .push(PhaseError::new(phase, format!("master summary not written: {:#}", e)));
    }

    summary
}

/// Human-readable end-of-run report.
pub fn render_report(summary: &MasterSummary) -> String {
    let mut out = Vec::new();
    out.push(format!("{}", "═".repeat(48).bright_cyan()));
    out.push(format!(
        "{} ({})",
        "Export summary".bold(),
        summary.mode.as_str()
    ));
    out.push(format!("{}", "═".repeat(48).bright_cyan()));

    match &summary.data {
        Some(data) => out.push(format!(
            "  Tables:  {} exported, {} skipped, {} failed, {} records",
            data.successful_tables, data.skipped_tables, data.failed_tables, data.total_records
        )),
        None => out.push("  Tables:  not exported".dimmed().to_string()),
    }

    match &summary.auth {
        Some(auth) => {
            let roles: Vec<String> = auth
                .by_role
                .iter()
                .map(|(role, count)| format!("{} {}", count, role))
                .collect();
            out.push(format!(
                "  Users:   {} exported ({}), {} verified, {} unverified",
                auth.successful_users,
                roles.join(", "),
                auth.by_verification.verified,
                auth.by_verification.unverified
            ));
        }
        None => out.push("  Users:   not exported".dimmed().to_string()),
    }

    match &summary.storage {
        Some(storage) => out.push(format!(
            "  Storage: {} buckets, {} files downloaded, {} failed, {} bytes",
            storage.successful_buckets,
            storage.downloaded_files,
            storage.failed_files,
            storage.total_bytes
        )),
        None => out.push("  Storage: not exported".dimmed().to_string()),
    }

    out.push(format!("  Duration: {:.1}s", summary.duration_seconds));

    if summary.errors.is_empty() {
        out.push(format!("{}", "✓ Export completed without errors".bright_green().bold()));
    } else {
        out.push(format!(
            "{}",
            format!("✗ Export finished with {} error(s):", summary.errors.len())
                .bright_red()
                .bold()
        ));
        for error in &summary.errors {
            out.push(format!("  - [{}] {}", error.phase, error.message));
        }
    }

    out.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_map_to_modes() {
        assert_eq!(ExportMode::from_flags(false, false, false), ExportMode::All);
        assert_eq!(ExportMode::from_flags(true, false, false), ExportMode::DataOnly);
        assert_eq!(ExportMode::from_flags(false, true, false), ExportMode::AuthOnly);
        assert_eq!(ExportMode::from_flags(false, false, true), ExportMode::StorageOnly);
    }

    #[test]
    fn modes_select_phases() {
        assert!(ExportMode::All.includes(Phase::Data));
        assert!(ExportMode::All.includes(Phase::Storage));
        assert!(ExportMode::AuthOnly.includes(Phase::Auth));
        assert!(!ExportMode::AuthOnly.includes(Phase::Data));
        assert!(!ExportMode::AuthOnly.includes(Phase::Storage));
    }

    #[test]
    fn empty_summary_keeps_all_keys() {
        let summary = MasterSummary {
            export_date: "2024-01-01T00:00:00.000Z".into(),
            mode: ExportMode::AuthOnly,
            duration_seconds: 0.0,
            data: None,
            auth: None,
            storage: None,
            errors: vec![PhaseError::new(Phase::Auth, "boom")],
        };
        let json = serde_json::to_value(&summary).unwrap();

        assert_eq!(json["mode"], "auth-only");
        assert!(json["data"].is_null());
        assert!(json["storage"].is_null());
        assert_eq!(json["errors"].as_array().unwrap().len(), 1);
        assert_eq!(summary.exit_code(), 1);
    }

    #[test]
    fn report_lists_errors() {
        colored::control::set_override(false);
        let summary = MasterSummary {
            export_date: String::new(),
            mode: ExportMode::All,
            duration_seconds: 1.25,
            data: None,
            auth: None,
            storage: None,
            errors: vec![PhaseError::new(Phase::Storage, "1 object download(s) failed")],
        };
        let report = render_report(&summary);

        assert!(report.contains("Export summary (all)"));
        assert!(report.contains("[storage] 1 object download(s) failed"));
        assert!(report.contains("Duration: 1.2s") || report.contains("Duration: 1.3s"));
    }
}
