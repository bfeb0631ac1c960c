//! Export a Supabase project (tables, auth users, storage) to local JSON.
//!
//! Writes everything under the output directory (default `exports/`) and
//! exits with 1 when any phase recorded an error.

use anyhow::{Context, Result};
use clap::{ArgGroup, Parser};
use export_core::config::{parse_table_list, Config};
use export_core::{render_report, run_export, ExportContext, ExportMode, ExportSettings};
use std::path::PathBuf;
use supabase_client::SupabaseClient;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "export-all")]
#[command(about = "Export Supabase tables, auth users and storage objects for migration")]
#[command(group(ArgGroup::new("mode").args(["data_only", "auth_only", "storage_only"])))]
struct Cli {
    /// Only export database tables
    #[arg(long)]
    data_only: bool,

    /// Only export auth users
    #[arg(long)]
    auth_only: bool,

    /// Only export storage buckets
    #[arg(long)]
    storage_only: bool,

    /// Output directory (overrides EXPORT_OUTPUT_DIR)
    #[arg(long)]
    output_dir: Option<PathBuf>,

    /// Comma separated tables to export, in order (overrides EXPORT_TABLES)
    #[arg(long)]
    tables: Option<String>,

    /// Number of tables exported at once
    #[arg(long, default_value_t = 1, value_parser = clap::value_parser!(u16).range(1..=16))]
    concurrency: u16,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,export_core=debug,supabase_client=info".into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_line_number(true),
        )
        .init();

    // Missing credentials are fatal: nothing is exported without them.
    let config = Config::from_env().context("Refusing to start export")?;

    let mut settings = ExportSettings::from_config(&config);
    if let Some(dir) = cli.output_dir {
        settings.output_dir = dir;
    }
    if let Some(tables) = cli.tables.as_deref() {
        settings.tables = parse_table_list(tables);
    }
    settings.table_concurrency = cli.concurrency as usize;

    let client = SupabaseClient::new(config.supabase_url.clone(), config.service_role_key.clone())
        .context("Failed to create Supabase client")?;
    let ctx = ExportContext::from_client(client, settings);

    let mode = ExportMode::from_flags(cli.data_only, cli.auth_only, cli.storage_only);
    let summary = run_export(&ctx, mode).await;

    println!();
    println!("{}", render_report(&summary));
    println!(
        "Master summary: {}",
        ctx.settings.master_summary_path().display()
    );

    std::process::exit(summary.exit_code());
}
