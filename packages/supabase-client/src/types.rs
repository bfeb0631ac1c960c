use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// One range read from a PostgREST table.
#[derive(Debug, Clone, Default)]
pub struct RangePage {
    pub rows: Vec<Value>,
    /// Exact row count reported in `Content-Range`, when the server sent one.
    pub total: Option<u64>,
}

/// Response body of `GET /auth/v1/admin/users`.
#[derive(Debug, Clone, Deserialize)]
pub(crate) struct UsersResponse {
    #[serde(default)]
    pub users: Vec<Value>,
}

/// The identity fields the exporter relies on. Everything else the auth
/// server returns stays in the raw record.
#[derive(Debug, Clone, Deserialize)]
pub struct AuthUser {
    pub id: String,
    pub email: Option<String>,
    pub email_confirmed_at: Option<String>,
    pub created_at: Option<String>,
    pub last_sign_in_at: Option<String>,
    #[serde(default)]
    pub user_metadata: Option<Map<String, Value>>,
}

/// Storage bucket metadata from `GET /storage/v1/bucket`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Bucket {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub public: bool,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
}

impl Bucket {
    pub fn new(name: impl Into<String>, public: bool) -> Self {
        let name = name.into();
        Self {
            id: name.clone(),
            name,
            public,
            created_at: None,
            updated_at: None,
        }
    }
}

/// One entry of a storage directory listing.
///
/// The list endpoint returns a single directory level. Folders come back
/// with a null `id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageEntry {
    pub name: String,
    pub id: Option<String>,
    pub created_at: Option<String>,
    pub updated_at: Option<String>,
    pub last_accessed_at: Option<String>,
    pub metadata: Option<Value>,
}

impl StorageEntry {
    pub fn file(name: impl Into<String>, size: u64) -> Self {
        let name = name.into();
        Self {
            id: Some(name.clone()),
            name,
            created_at: None,
            updated_at: None,
            last_accessed_at: None,
            metadata: Some(serde_json::json!({ "size": size })),
        }
    }

    pub fn folder(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            id: None,
            created_at: None,
            updated_at: None,
            last_accessed_at: None,
            metadata: None,
        }
    }

    pub fn is_folder(&self) -> bool {
        self.id.is_none()
    }

    pub fn size(&self) -> Option<u64> {
        self.metadata.as_ref()?.get("size")?.as_u64()
    }

    pub fn mime_type(&self) -> Option<&str> {
        self.metadata.as_ref()?.get("mimetype")?.as_str()
    }
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct ListObjectsRequest<'a> {
    pub prefix: &'a str,
    pub limit: u32,
    pub offset: u32,
    #[serde(rename = "sortBy")]
    pub sort_by: SortBy,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SortBy {
    pub column: &'static str,
    pub order: &'static str,
}

#[derive(Debug, Clone, Serialize)]
pub(crate) struct SignRequest {
    #[serde(rename = "expiresIn")]
    pub expires_in: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub(crate) struct SignResponse {
    #[serde(rename = "signedURL", alias = "signedUrl")]
    pub signed_url: String,
}

/// Parse the total out of a `Content-Range` header (`0-999/2500`, `*/0`).
/// An unknown total (`*`) yields `None`.
pub fn parse_content_range_total(header: &str) -> Option<u64> {
    header.rsplit_once('/')?.1.trim().parse().ok()
}
