use anyhow::{bail, Context, Result};
use dotenvy::dotenv;
use std::env;
use std::path::PathBuf;

/// Placeholder written into the URL mapping until the new storage host is known.
pub const DEFAULT_NEW_STORAGE_BASE_URL: &str = "{{NEW_STORAGE_URL}}";

/// Export configuration loaded from environment variables
#[derive(Debug, Clone)]
pub struct Config {
    pub supabase_url: String,
    pub service_role_key: String,
    pub output_dir: PathBuf,
    pub tables: Option<Vec<String>>,
    pub new_storage_base_url: String,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self> {
        // Load .env file if present (development)
        let _ = dotenv();

        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build configuration from any key lookup. Missing credentials are fatal:
    /// nothing can be exported without them.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        let supabase_url = non_empty("SUPABASE_URL")
            .or_else(|| non_empty("NEXT_PUBLIC_SUPABASE_URL"))
            .context("SUPABASE_URL (or NEXT_PUBLIC_SUPABASE_URL) must be set")?;
        let service_role_key = non_empty("SUPABASE_SERVICE_ROLE_KEY")
            .context("SUPABASE_SERVICE_ROLE_KEY must be set")?;

        if !supabase_url.starts_with("http://") && !supabase_url.starts_with("https://") {
            bail!("SUPABASE_URL must be an http(s) URL, got {}", supabase_url);
        }

        Ok(Self {
            supabase_url,
            service_role_key,
            output_dir: non_empty("EXPORT_OUTPUT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("exports")),
            tables: non_empty("EXPORT_TABLES").map(|v| parse_table_list(&v)),
            new_storage_base_url: non_empty("NEW_STORAGE_BASE_URL")
                .unwrap_or_else(|| DEFAULT_NEW_STORAGE_BASE_URL.to_string()),
        })
    }
}

/// Split a comma separated table list, dropping blanks and duplicates while
/// keeping the declared order.
pub fn parse_table_list(raw: &str) -> Vec<String> {
    let mut tables: Vec<String> = Vec::new();
    for name in raw.split(',').map(str::trim).filter(|s| !s.is_empty()) {
        if !tables.iter().any(|t| t == name) {
            tables.push(name.to_string());
        }
    }
    tables
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key| map.get(key).cloned()
    }

    #[test]
    fn missing_service_key_is_fatal() {
        let err = Config::from_lookup(lookup(&[("SUPABASE_URL", "https://p.supabase.co")]))
            .unwrap_err();
        assert!(err.to_string().contains("SUPABASE_SERVICE_ROLE_KEY"));
    }

    #[test]
    fn missing_url_is_fatal() {
        let err = Config::from_lookup(lookup(&[("SUPABASE_SERVICE_ROLE_KEY", "k")])).unwrap_err();
        assert!(err.to_string().contains("SUPABASE_URL"));
    }

    #[test]
    fn blank_values_count_as_missing() {
        let result = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "https://p.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "   "),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn falls_back_to_next_public_url_and_defaults() {
        let config = Config::from_lookup(lookup(&[
            ("NEXT_PUBLIC_SUPABASE_URL", "https://p.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "k"),
        ]))
        .unwrap();

        assert_eq!(config.supabase_url, "https://p.supabase.co");
        assert_eq!(config.output_dir, PathBuf::from("exports"));
        assert!(config.tables.is_none());
        assert_eq!(config.new_storage_base_url, DEFAULT_NEW_STORAGE_BASE_URL);
    }

    #[test]
    fn rejects_non_http_url() {
        let result = Config::from_lookup(lookup(&[
            ("SUPABASE_URL", "p.supabase.co"),
            ("SUPABASE_SERVICE_ROLE_KEY", "k"),
        ]));
        assert!(result.is_err());
    }

    #[test]
    fn table_list_keeps_order_and_drops_blanks() {
        assert_eq!(
            parse_table_list(" profiles, ,classes,profiles,modules "),
            vec!["profiles", "classes", "modules"]
        );
    }
}
