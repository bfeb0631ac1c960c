//! Error types for the Supabase client.

use thiserror::Error;

/// Result type for Supabase client operations.
pub type Result<T> = std::result::Result<T, SupabaseError>;

/// PostgREST error codes meaning the relation does not exist.
const MISSING_RELATION_CODES: &[&str] = &["42P01", "PGRST205"];

/// Supabase client errors.
#[derive(Debug, Error)]
pub enum SupabaseError {
    /// Configuration error (missing URL or key, invalid settings)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Transport error (connection failed, timeout, body stream aborted)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// Non-2xx response that is not a missing resource
    #[error("API error ({status}): {message}")]
    Api {
        status: u16,
        code: Option<String>,
        message: String,
    },

    /// Table, bucket or object does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// Local filesystem error while writing a download
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Unexpected response shape
    #[error("Parse error: {0}")]
    Parse(String),
}

impl SupabaseError {
    pub fn is_not_found(&self) -> bool {
        matches!(self, Self::NotFound(_))
    }

    /// Classify an error response body. PostgREST, GoTrue and Storage all
    /// report failures slightly differently, so the body is inspected as
    /// loose JSON.
    pub(crate) fn from_response(status: u16, body: &str, resource: &str) -> Self {
        let parsed: Option<serde_json::Value> = serde_json::from_str(body).ok();

        let field = |key: &str| -> Option<String> {
            parsed.as_ref().and_then(|v| match v.get(key)? {
                serde_json::Value::String(s) => Some(s.clone()),
                serde_json::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
        };

        let code = field("code");
        let storage_status = field("statusCode");
        let message = field("message")
            .or_else(|| field("msg"))
            .or_else(|| field("error"))
            .unwrap_or_else(|| body.to_string());

        let missing_relation = code
            .as_deref()
            .is_some_and(|c| MISSING_RELATION_CODES.contains(&c));

        if status == 404 || missing_relation || storage_status.as_deref() == Some("404") {
            return Self::NotFound(resource.to_string());
        }

        Self::Api {
            status,
            code,
            message,
        }
    }
}
