//! Export context passed to every exporter.
//!
//! Built once at process start. Holds the sources (as traits so tests can
//! swap in fakes) and the settings that would otherwise be module globals.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use supabase_client::SupabaseClient;

use crate::config::{Config, DEFAULT_NEW_STORAGE_BASE_URL};
use crate::supabase::SupabaseSource;
use crate::tables::DEFAULT_TABLES;
use crate::traits::{IdentitySource, ObjectStore, TableSource};

pub const TABLE_PAGE_SIZE: u64 = 1000;
pub const USER_PAGE_SIZE: u32 = 1000;
pub const OBJECT_LIST_LIMIT: u32 = 1000;
pub const PAGE_DELAY: Duration = Duration::from_millis(100);
pub const DOWNLOAD_DELAY: Duration = Duration::from_millis(50);
pub const SIGNED_URL_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone)]
pub struct ExportSettings {
    pub output_dir: PathBuf,
    /// Tables in export order.
    pub tables: Vec<String>,
    pub table_page_size: u64,
    pub user_page_size: u32,
    pub object_list_limit: u32,
    /// Minimum spacing between page requests.
    pub page_delay: Duration,
    /// Minimum spacing between object downloads.
    pub download_delay: Duration,
    /// Tables exported at once. Results keep declared order either way.
    pub table_concurrency: usize,
    pub new_storage_base_url: String,
    pub signed_url_ttl_secs: u64,
}

impl Default for ExportSettings {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("exports"),
            tables: DEFAULT_TABLES.iter().map(|t| t.to_string()).collect(),
            table_page_size: TABLE_PAGE_SIZE,
            user_page_size: USER_PAGE_SIZE,
            object_list_limit: OBJECT_LIST_LIMIT,
            page_delay: PAGE_DELAY,
            download_delay: DOWNLOAD_DELAY,
            table_concurrency: 1,
            new_storage_base_url: DEFAULT_NEW_STORAGE_BASE_URL.to_string(),
            signed_url_ttl_secs: SIGNED_URL_TTL_SECS,
        }
    }
}

impl ExportSettings {
    pub fn from_config(config: &Config) -> Self {
        let mut settings = Self {
            output_dir: config.output_dir.clone(),
            new_storage_base_url: config.new_storage_base_url.clone(),
            ..Self::default()
        };
        if let Some(tables) = &config.tables {
            settings.tables = tables.clone();
        }
        settings
    }

    pub fn data_dir(&self) -> PathBuf {
        self.output_dir.join("data")
    }

    pub fn auth_dir(&self) -> PathBuf {
        self.output_dir.join("auth")
    }

    pub fn storage_dir(&self) -> PathBuf {
        self.output_dir.join("storage")
    }

    pub fn master_summary_path(&self) -> PathBuf {
        self.output_dir.join("_master_export_summary.json")
    }
}

#[derive(Clone)]
pub struct ExportContext {
    pub tables: Arc<dyn TableSource>,
    pub identities: Arc<dyn IdentitySource>,
    pub storage: Arc<dyn ObjectStore>,
    pub settings: ExportSettings,
}

impl ExportContext {
    pub fn new(
        tables: Arc<dyn TableSource>,
        identities: Arc<dyn IdentitySource>,
        storage: Arc<dyn ObjectStore>,
        settings: ExportSettings,
    ) -> Self {
        Self {
            tables,
            identities,
            storage,
            settings,
        }
    }

    /// All three sources backed by one Supabase client.
    pub fn from_client(client: SupabaseClient, settings: ExportSettings) -> Self {
        let source = Arc::new(SupabaseSource::new(
            Arc::new(client),
            settings.signed_url_ttl_secs,
        ));
        Self::new(source.clone(), source.clone(), source, settings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn output_layout() {
        let settings = ExportSettings {
            output_dir: PathBuf::from("/tmp/out"),
            ..ExportSettings::default()
        };
        assert_eq!(settings.data_dir(), PathBuf::from("/tmp/out/data"));
        assert_eq!(settings.auth_dir(), PathBuf::from("/tmp/out/auth"));
        assert_eq!(settings.storage_dir(), PathBuf::from("/tmp/out/storage"));
        assert_eq!(
            settings.master_summary_path(),
            PathBuf::from("/tmp/out/_master_export_summary.json")
        );
    }

    #[test]
    fn config_tables_override_defaults() {
        let config = Config {
            supabase_url: "https://p.supabase.co".into(),
            service_role_key: "k".into(),
            output_dir: PathBuf::from("out"),
            tables: Some(vec!["a".into(), "b".into()]),
            new_storage_base_url: "https://cdn.example.org".into(),
        };
        let settings = ExportSettings::from_config(&config);

        assert_eq!(settings.tables, vec!["a", "b"]);
        assert_eq!(settings.output_dir, PathBuf::from("out"));
        assert_eq!(settings.new_storage_base_url, "https://cdn.example.org");
        assert_eq!(settings.table_page_size, 1000);
    }
}
