//! Supabase export pipeline.
//!
//! Snapshots a Supabase project to local disk for migration to another
//! backend: relational tables, auth users (with forced password reset), and
//! storage objects (with a URL mapping for link rewriting).
//!
//! # Modules
//!
//! - [`tables`] - Table exporter (paged range reads, one JSON file per table)
//! - [`auth`] - Auth exporter (migration-ready users, reset list, CSV)
//! - [`storage`] - Storage exporter (recursive walk, downloads, manifests)
//! - [`orchestrator`] - Runs the phases and writes the master summary
//! - [`traits`] - Source abstractions the exporters read through
//! - [`testing`] - In-memory sources for tests

pub mod artifacts;
pub mod auth;
pub mod config;
pub mod context;
pub mod orchestrator;
pub mod pagination;
pub mod storage;
pub mod summary;
pub mod supabase;
pub mod tables;
pub mod testing;
pub mod throttle;
pub mod traits;

pub use config::Config;
pub use context::{ExportContext, ExportSettings};
pub use orchestrator::{render_report, run_export, ExportMode, MasterSummary};
pub use summary::{JobStatus, Phase, PhaseError};
pub use traits::{IdentitySource, ObjectStore, SourceError, TableSource};
