//! Auth exporter.
//!
//! Pages through the identity directory and writes five artifacts to
//! `auth/`: the raw dump, migration-ready users, the password reset
//! worklist, a CSV for manual review, and a summary with instructions.
//!
//! Password hashes are never requested. Every migrated user gets a fresh
//! random temporary password and must reset it on first sign-in.

use anyhow::Result;
use rand::rngs::OsRng;
use rand::RngCore;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Instant;
use supabase_client::AuthUser;

use crate::artifacts::{ensure_dir, write_csv, write_json};
use crate::context::ExportContext;
use crate::pagination::is_last_page;
use crate::summary::{now_rfc3339, seconds};
use crate::throttle::Throttle;

pub const DEFAULT_ROLE: &str = "student";
const TEMP_PASSWORD_BYTES: usize = 16;
const MIGRATION_NOTE: &str =
    "Password hashes are not exported. The user must reset their password on first sign-in.";

pub const RAW_USERS_FILE: &str = "supabase_auth_users_raw.json";
pub const MIGRATION_USERS_FILE: &str = "users_for_migration.json";
pub const RESET_LIST_FILE: &str = "password_reset_list.json";
pub const CSV_FILE: &str = "users_migration.csv";
pub const SUMMARY_FILE: &str = "_auth_export_summary.json";

/// A user in the shape the new identity store is provisioned from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationUser {
    pub id: String,
    pub email: Option<String>,
    pub email_verified: bool,
    pub role: String,
    pub created_at: Option<String>,
    pub last_sign_in_at: Option<String>,
    pub metadata: Map<String, Value>,
    pub temp_password: String,
    pub migration_note: MigrationNote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MigrationNote {
    pub requires_reset: bool,
    pub reason: String,
}

/// One line of `password_reset_list.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PasswordResetEntry {
    pub email: Option<String>,
    pub temp_password: String,
    pub requires_reset: bool,
}

#[derive(Debug, Serialize)]
struct CsvRow<'a> {
    id: &'a str,
    email: &'a str,
    role: &'a str,
    verified: bool,
    #[serde(rename = "createdAt")]
    created_at: &'a str,
    #[serde(rename = "lastSignInAt")]
    last_sign_in_at: &'a str,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct VerificationCounts {
    pub verified: usize,
    pub unverified: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthFiles {
    pub raw: PathBuf,
    pub migration: PathBuf,
    pub reset_list: PathBuf,
    pub csv: PathBuf,
}

/// Written to `auth/_auth_export_summary.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthExportSummary {
    pub export_date: String,
    pub duration_seconds: f64,
    pub pages: u32,
    pub total_users: usize,
    pub successful_users: usize,
    pub skipped_users: usize,
    pub failed_users: usize,
    pub without_email: usize,
    pub by_role: BTreeMap<String, usize>,
    pub by_verification: VerificationCounts,
    /// Raw records that could not be read as identities (missing id).
    pub failures: Vec<String>,
    pub files: AuthFiles,
    pub migration_instructions: Vec<String>,
}

impl AuthExportSummary {
    pub fn failure_note(&self) -> Option<String> {
        (self.failed_users > 0)
            .then(|| format!("{} auth record(s) could not be transformed", self.failed_users))
    }
}

/// Generate a temporary password: 16 bytes from the OS CSPRNG, hex encoded.
pub fn generate_temp_password() -> String {
    let mut bytes = [0u8; TEMP_PASSWORD_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Normalize one identity record. The output shape is fixed regardless of
/// which optional fields the auth server sent.
pub fn transform_user(user: &AuthUser) -> MigrationUser {
    let metadata = user.user_metadata.clone().unwrap_or_default();
    let role = metadata
        .get("role")
        .and_then(Value::as_str)
        .filter(|r| !r.is_empty())
        .unwrap_or(DEFAULT_ROLE)
        .to_string();

    MigrationUser {
        id: user.id.clone(),
        email: user.email.clone(),
        email_verified: user.email_confirmed_at.is_some(),
        role,
        created_at: user.created_at.clone(),
        last_sign_in_at: user.last_sign_in_at.clone(),
        metadata,
        temp_password: generate_temp_password(),
        migration_note: MigrationNote {
            requires_reset: true,
            reason: MIGRATION_NOTE.to_string(),
        },
    }
}

pub fn migration_instructions() -> Vec<String> {
    [
        "1. Create each account in the new identity store from users_for_migration.json, keeping the original id where the store allows it.",
        "2. Set the tempPassword from password_reset_list.json as the initial password and mark the account as requiring a reset.",
        "3. Carry over emailVerified so verified users are not asked to confirm their email again.",
        "4. Restore role and metadata so permissions match the old system.",
        "5. Email every user a password reset link before switching sign-in to the new system.",
        "6. Delete password_reset_list.json and users_migration.csv once provisioning is complete; they contain live credentials.",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}

/// Fetch every identity record, page by page (`page` starts at 1).
async fn fetch_all_users(ctx: &ExportContext, throttle: &Throttle) -> Result<(Vec<Value>, u32)> {
    let per_page = ctx.settings.user_page_size.max(1);
    let mut users = Vec::new();
    let mut page = 1u32;

    loop {
        throttle.ready().await;
        let batch = ctx.identities.list_users(page, per_page).await?;
        let returned = batch.len();
        tracing::debug!(page, returned, "Fetched user page");

        users.extend(batch);
        if is_last_page(returned, per_page as u64) {
            break;
        }
        page += 1;
    }

    Ok((users, page))
}

/// Export every auth user. A fetch failure aborts the phase since a partial
/// user list would silently drop accounts from the migration.
pub async fn export_auth(ctx: &ExportContext) -> Result<AuthExportSummary> {
    let started = Instant::now();
    let dir = ctx.settings.auth_dir();
    ensure_dir(&dir).await?;

    tracing::info!(dir = %dir.display(), "Exporting auth users");
    let throttle = Throttle::every(ctx.settings.page_delay);
    let (raw_users, pages) = fetch_all_users(ctx, &throttle).await?;
    tracing::info!(users = raw_users.len(), pages, "Fetched auth users");

    let mut migrated = Vec::with_capacity(raw_users.len());
    let mut failures = Vec::new();
    for (idx, raw) in raw_users.iter().enumerate() {
        match serde_json::from_value::<AuthUser>(raw.clone()) {
            Ok(user) => migrated.push(transform_user(&user)),
            Err(e) => {
                tracing::warn!(index = idx, error = %e, "Skipping unreadable auth record");
                failures.push(format!("record {}: {}", idx, e));
            }
        }
    }

    let reset_list: Vec<PasswordResetEntry> = migrated
        .iter()
        .map(|u| PasswordResetEntry {
            email: u.email.clone(),
            temp_password: u.temp_password.clone(),
            requires_reset: true,
        })
        .collect();

    let csv_rows: Vec<CsvRow> = migrated
        .iter()
        .map(|u| CsvRow {
            id: &u.id,
            email: u.email.as_deref().unwrap_or(""),
            role: &u.role,
            verified: u.email_verified,
            created_at: u.created_at.as_deref().unwrap_or(""),
            last_sign_in_at: u.last_sign_in_at.as_deref().unwrap_or(""),
        })
        .collect();

    let raw = write_json(&dir.join(RAW_USERS_FILE), "auth users (raw)", raw_users.len(), &raw_users).await?;
    let migration = write_json(
        &dir.join(MIGRATION_USERS_FILE),
        "auth users (migration)",
        migrated.len(),
        &migrated,
    )
    .await?;
    let reset = write_json(
        &dir.join(RESET_LIST_FILE),
        "password reset list",
        reset_list.len(),
        &reset_list,
    )
    .await?;
    let csv = write_csv(&dir.join(CSV_FILE), "auth users (csv)", &csv_rows).await?;

    let mut by_role: BTreeMap<String, usize> = BTreeMap::new();
    let mut by_verification = VerificationCounts::default();
    for user in &migrated {
        *by_role.entry(user.role.clone()).or_default() += 1;
        if user.email_verified {
            by_verification.verified += 1;
        } else {
            by_verification.unverified += 1;
        }
    }

    let summary = AuthExportSummary {
        export_date: now_rfc3339(),
        duration_seconds: seconds(started.elapsed()),
        pages,
        total_users: raw_users.len(),
        successful_users: migrated.len(),
        skipped_users: 0,
        failed_users: failures.len(),
        without_email: migrated.iter().filter(|u| u.email.is_none()).count(),
        by_role,
        by_verification,
        failures,
        files: AuthFiles {
            raw: raw.path,
            migration: migration.path,
            reset_list: reset.path,
            csv: csv.path,
        },
        migration_instructions: migration_instructions(),
    };

    write_json(&dir.join(SUMMARY_FILE), "auth summary", summary.total_users, &summary).await?;

    tracing::info!(
        users = summary.total_users,
        migrated = summary.successful_users,
        failed = summary.failed_users,
        "Auth export finished"
    );

    Ok(summary)
}
