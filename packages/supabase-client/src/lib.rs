//! Pure Supabase REST API client.
//!
//! A minimal client for the three Supabase services a data export needs:
//! PostgREST range reads, the GoTrue admin user listing, and Storage bucket
//! and object access. Every call authenticates with the service role key.
//!
//! # Example
//!
//! ```rust,ignore
//! use supabase_client::SupabaseClient;
//!
//! let client = SupabaseClient::new("https://xyz.supabase.co".into(), service_key)?;
//!
//! let page = client.select_range("profiles", 0, 999).await?;
//! println!("{} rows of {:?}", page.rows.len(), page.total);
//! ```

pub mod error;
pub mod types;

pub use error::{Result, SupabaseError};
pub use types::{AuthUser, Bucket, RangePage, StorageEntry};

use futures::StreamExt;
use reqwest::{RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use types::{ListObjectsRequest, SignRequest, SignResponse, SortBy, UsersResponse};

pub struct SupabaseClient {
    client: reqwest::Client,
    base_url: String,
    service_key: String,
}

impl SupabaseClient {
    pub fn new(base_url: String, service_key: String) -> Result<Self> {
        let base_url = base_url.trim().trim_end_matches('/').to_string();
        if base_url.is_empty() {
            return Err(SupabaseError::Config("Supabase URL is empty".into()));
        }
        if service_key.trim().is_empty() {
            return Err(SupabaseError::Config("service role key is empty".into()));
        }

        Ok(Self {
            client: reqwest::Client::new(),
            base_url,
            service_key,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authed(&self, builder: RequestBuilder) -> RequestBuilder {
        builder
            .header("apikey", &self.service_key)
            .bearer_auth(&self.service_key)
    }

    async fn check(resp: Response, resource: &str) -> Result<Response> {
        let status = resp.status();
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        Err(SupabaseError::from_response(status.as_u16(), &body, resource))
    }

    // ------------------------------------------------------------------
    // PostgREST
    // ------------------------------------------------------------------

    /// Read rows `start..=end` of a table with an exact count.
    ///
    /// A range past the end of the table (416) is returned as an empty page.
    pub async fn select_range(&self, table: &str, start: u64, end: u64) -> Result<RangePage> {
        let url = format!(
            "{}/rest/v1/{}?select=*",
            self.base_url,
            urlencoding::encode(table)
        );
        let resp = self
            .authed(self.client.get(&url))
            .header("Range-Unit", "items")
            .header("Range", format!("{}-{}", start, end))
            .header("Prefer", "count=exact")
            .send()
            .await?;

        let total = resp
            .headers()
            .get("content-range")
            .and_then(|v| v.to_str().ok())
            .and_then(types::parse_content_range_total);

        if resp.status() == StatusCode::RANGE_NOT_SATISFIABLE {
            tracing::debug!(table, start, end, "Range past end of table");
            return Ok(RangePage {
                rows: Vec::new(),
                total,
            });
        }

        let resp = Self::check(resp, table).await?;
        let rows: Vec<Value> = resp.json().await?;
        Ok(RangePage { rows, total })
    }

    // ------------------------------------------------------------------
    // GoTrue admin
    // ------------------------------------------------------------------

    /// List one page of auth users (`page` starts at 1). Records are returned
    /// exactly as the auth server sent them.
    pub async fn list_users(&self, page: u32, per_page: u32) -> Result<Vec<Value>> {
        let url = format!(
            "{}/auth/v1/admin/users?page={}&per_page={}",
            self.base_url, page, per_page
        );
        let resp = self.authed(self.client.get(&url)).send().await?;
        let resp = Self::check(resp, "auth.users").await?;

        let body: UsersResponse = resp
            .json()
            .await
            .map_err(|e| SupabaseError::Parse(format!("users response: {}", e)))?;
        Ok(body.users)
    }

    // ------------------------------------------------------------------
    // Storage
    // ------------------------------------------------------------------

    pub async fn list_buckets(&self) -> Result<Vec<Bucket>> {
        let url = format!("{}/storage/v1/bucket", self.base_url);
        let resp = self.authed(self.client.get(&url)).send().await?;
        let resp = Self::check(resp, "storage buckets").await?;
        Ok(resp.json().await?)
    }

    /// List one directory level of a bucket.
    pub async fn list_objects(
        &self,
        bucket: &str,
        prefix: &str,
        limit: u32,
        offset: u32,
    ) -> Result<Vec<StorageEntry>> {
        let url = format!(
            "{}/storage/v1/object/list/{}",
            self.base_url,
            urlencoding::encode(bucket)
        );
        let body = ListObjectsRequest {
            prefix,
            limit,
            offset,
            sort_by: SortBy {
                column: "name",
                order: "asc",
            },
        };
        let resp = self
            .authed(self.client.post(&url))
            .json(&body)
            .send()
            .await?;
        let resp = Self::check(resp, bucket).await?;
        Ok(resp.json().await?)
    }

    /// Public URL of an object. Always well formed; it only resolves for
    /// public buckets.
    pub fn public_url(&self, bucket: &str, path: &str) -> String {
        format!(
            "{}/storage/v1/object/public/{}/{}",
            self.base_url,
            urlencoding::encode(bucket),
            encode_object_path(path)
        )
    }

    /// Signed URL for an object in a private bucket.
    pub async fn signed_url(&self, bucket: &str, path: &str, expires_in: u64) -> Result<String> {
        let url = format!(
            "{}/storage/v1/object/sign/{}/{}",
            self.base_url,
            urlencoding::encode(bucket),
            encode_object_path(path)
        );
        let resp = self
            .authed(self.client.post(&url))
            .json(&SignRequest { expires_in })
            .send()
            .await?;
        let resp = Self::check(resp, path).await?;
        let signed: SignResponse = resp
            .json()
            .await
            .map_err(|e| SupabaseError::Parse(format!("sign response: {}", e)))?;

        // The storage API answers with a path relative to /storage/v1.
        if signed.signed_url.starts_with("http") {
            Ok(signed.signed_url)
        } else {
            Ok(format!("{}/storage/v1{}", self.base_url, signed.signed_url))
        }
    }

    /// Stream `url` into `dest`, creating parent directories. Returns the
    /// number of bytes written. A partially written file is removed.
    pub async fn download_to(&self, url: &str, dest: &Path) -> Result<u64> {
        let result = self.stream_to_file(url, dest).await;
        if result.is_err() {
            let _ = tokio::fs::remove_file(dest).await;
        }
        result
    }

    async fn stream_to_file(&self, url: &str, dest: &Path) -> Result<u64> {
        let resp = self.authed(self.client.get(url)).send().await?;
        let resp = Self::check(resp, url).await?;

        if let Some(parent) = dest.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        let mut file = tokio::fs::File::create(dest).await?;

        let mut written = 0u64;
        let mut body = resp.bytes_stream();
        while let Some(chunk) = body.next().await {
            let chunk = chunk?;
            file.write_all(&chunk).await?;
            written += chunk.len() as u64;
        }
        file.flush().await?;

        Ok(written)
    }
}

/// Percent-encode each segment of an object path, keeping the separators.
fn encode_object_path(path: &str) -> String {
    path.split('/')
        .map(|segment| urlencoding::encode(segment).into_owned())
        .collect::<Vec<_>>()
        .join("/")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tokio::io::AsyncReadExt;
    use wiremock::matchers::{body_partial_json, header, method, path, query_param};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> SupabaseClient {
        SupabaseClient::new("https://proj.supabase.co/".into(), "service-key".into()).unwrap()
    }

    fn client_for(server: &MockServer) -> SupabaseClient {
        SupabaseClient::new(server.uri(), "service-key".into()).unwrap()
    }

    fn rows(count: usize) -> Vec<Value> {
        (0..count).map(|i| json!({ "id": i })).collect()
    }

    #[test]
    fn rejects_empty_configuration() {
        assert!(matches!(
            SupabaseClient::new("".into(), "key".into()),
            Err(SupabaseError::Config(_))
        ));
        assert!(matches!(
            SupabaseClient::new("https://proj.supabase.co".into(), "  ".into()),
            Err(SupabaseError::Config(_))
        ));
    }

    #[test]
    fn trailing_slash_is_trimmed() {
        assert_eq!(client().base_url(), "https://proj.supabase.co");
    }

    #[test]
    fn public_url_encodes_segments_not_separators() {
        let url = client().public_url("avatars", "2024/my photo.png");
        assert_eq!(
            url,
            "https://proj.supabase.co/storage/v1/object/public/avatars/2024/my%20photo.png"
        );
    }

    #[tokio::test]
    async fn test_select_range_reads_rows_and_exact_total() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(query_param("select", "*"))
            .and(header("apikey", "service-key"))
            .and(header("authorization", "Bearer service-key"))
            .and(header("range", "0-999"))
            .and(header("prefer", "count=exact"))
            .respond_with(
                ResponseTemplate::new(206)
                    .insert_header("content-range", "0-999/2500")
                    .set_body_json(rows(3)),
            )
            .expect(1)
            .mount(&server)
            .await;

        let page = client_for(&server).select_range("profiles", 0, 999).await.unwrap();

        assert_eq!(page.rows.len(), 3);
        assert_eq!(page.total, Some(2500));
    }

    #[tokio::test]
    async fn test_range_past_end_is_an_empty_page() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/profiles"))
            .and(header("range", "3000-3999"))
            .respond_with(
                ResponseTemplate::new(416)
                    .insert_header("content-range", "*/2500")
                    .set_body_json(json!({
                        "code": "PGRST103",
                        "message": "Requested range not satisfiable"
                    })),
            )
            .mount(&server)
            .await;

        let page = client_for(&server)
            .select_range("profiles", 3000, 3999)
            .await
            .unwrap();

        assert!(page.rows.is_empty());
        assert_eq!(page.total, Some(2500));
    }

    #[tokio::test]
    async fn test_missing_table_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/gone"))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({
                "code": "PGRST205",
                "message": "Could not find the table 'public.gone' in the schema cache"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .select_range("gone", 0, 999)
            .await
            .unwrap_err();

        assert!(matches!(err, SupabaseError::NotFound(ref r) if r == "gone"));
    }

    #[tokio::test]
    async fn test_permission_error_keeps_status_and_message() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/rest/v1/secrets"))
            .respond_with(ResponseTemplate::new(401).set_body_json(json!({
                "code": "42501",
                "message": "permission denied for table secrets"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .select_range("secrets", 0, 999)
            .await
            .unwrap_err();

        match err {
            SupabaseError::Api { status, message, .. } => {
                assert_eq!(status, 401);
                assert_eq!(message, "permission denied for table secrets");
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_list_users_unwraps_users_envelope() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/auth/v1/admin/users"))
            .and(query_param("page", "2"))
            .and(query_param("per_page", "1000"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "users": [
                    { "id": "u1", "email": "a@example.org" },
                    { "id": "u2", "email": null }
                ],
                "aud": "authenticated"
            })))
            .expect(1)
            .mount(&server)
            .await;

        let users = client_for(&server).list_users(2, 1000).await.unwrap();

        assert_eq!(users.len(), 2);
        assert_eq!(users[0]["id"], "u1");
        assert!(users[1]["email"].is_null());
    }

    #[tokio::test]
    async fn test_list_users_rejects_unexpected_body() {
        let server = MockServer::start().await;

        Mock::given(method("GET"))
            .and(path("/auth/v1/admin/users"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let err = client_for(&server).list_users(1, 1000).await.unwrap_err();
        assert!(matches!(err, SupabaseError::Parse(_)));
    }

    #[tokio::test]
    async fn test_list_objects_posts_prefix_and_paging() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/storage/v1/object/list/avatars"))
            .and(body_partial_json(json!({
                "prefix": "2024",
                "limit": 100,
                "offset": 200,
                "sortBy": { "column": "name", "order": "asc" }
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([
                { "name": "march", "id": null, "metadata": null },
                {
                    "name": "me.png",
                    "id": "b7a1",
                    "metadata": { "size": 42, "mimetype": "image/png" }
                }
            ])))
            .expect(1)
            .mount(&server)
            .await;

        let entries = client_for(&server)
            .list_objects("avatars", "2024", 100, 200)
            .await
            .unwrap();

        assert_eq!(entries.len(), 2);
        assert!(entries[0].is_folder());
        assert_eq!(entries[1].size(), Some(42));
        assert_eq!(entries[1].mime_type(), Some("image/png"));
    }

    #[tokio::test]
    async fn test_missing_bucket_listing_is_not_found() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/storage/v1/object/list/gone"))
            .respond_with(ResponseTemplate::new(400).set_body_json(json!({
                "statusCode": "404",
                "error": "Bucket not found",
                "message": "Bucket not found"
            })))
            .mount(&server)
            .await;

        let err = client_for(&server)
            .list_objects("gone", "", 1000, 0)
            .await
            .unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_relative_signed_url_is_made_absolute() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/storage/v1/object/sign/private/2024/report.pdf"))
            .and(body_partial_json(json!({ "expiresIn": 3600 })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signedURL": "/object/sign/private/2024/report.pdf?token=abc"
            })))
            .mount(&server)
            .await;

        let url = client_for(&server)
            .signed_url("private", "2024/report.pdf", 3600)
            .await
            .unwrap();

        assert_eq!(
            url,
            format!(
                "{}/storage/v1/object/sign/private/2024/report.pdf?token=abc",
                server.uri()
            )
        );
    }

    #[tokio::test]
    async fn test_absolute_signed_url_is_kept() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/storage/v1/object/sign/private/a.txt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "signedUrl": "https://cdn.example.org/a.txt?token=xyz"
            })))
            .mount(&server)
            .await;

        let url = client_for(&server)
            .signed_url("private", "a.txt", 60)
            .await
            .unwrap();
        assert_eq!(url, "https://cdn.example.org/a.txt?token=xyz");
    }

    #[tokio::test]
    async fn test_download_streams_body_to_nested_path() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("avatars/2024/me.png");

        Mock::given(method("GET"))
            .and(path("/storage/v1/object/public/avatars/2024/me.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(b"png-bytes".to_vec()))
            .mount(&server)
            .await;

        let client = client_for(&server);
        let url = client.public_url("avatars", "2024/me.png");
        let written = client.download_to(&url, &dest).await.unwrap();

        assert_eq!(written, 9);
        assert_eq!(std::fs::read(&dest).unwrap(), b"png-bytes");
    }

    #[tokio::test]
    async fn test_failed_download_leaves_no_file() {
        let server = MockServer::start().await;
        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("stale.txt");
        std::fs::write(&dest, "from an earlier run").unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500).set_body_string("boom"))
            .mount(&server)
            .await;

        let url = format!("{}/storage/v1/object/public/docs/stale.txt", server.uri());
        let err = client_for(&server).download_to(&url, &dest).await.unwrap_err();

        assert!(matches!(err, SupabaseError::Api { status: 500, .. }));
        assert!(!dest.exists());
    }

    #[tokio::test]
    async fn test_aborted_body_removes_partial_file() {
        // Promise 64 bytes, send 7, then hang up.
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut request = Vec::new();
            let mut buf = [0u8; 1024];
            while !request.windows(4).any(|w| w == b"\r\n\r\n") {
                let n = socket.read(&mut buf).await.unwrap();
                if n == 0 {
                    break;
                }
                request.extend_from_slice(&buf[..n]);
            }
            socket
                .write_all(b"HTTP/1.1 200 OK\r\nContent-Length: 64\r\n\r\npartial")
                .await
                .unwrap();
            socket.flush().await.unwrap();
        });

        let dir = tempfile::tempdir().unwrap();
        let dest = dir.path().join("docs/big.bin");
        let client = SupabaseClient::new(format!("http://{}", addr), "service-key".into()).unwrap();
        let url = format!("http://{}/storage/v1/object/public/docs/big.bin", addr);

        let result = client.download_to(&url, &dest).await;
        server.await.unwrap();

        assert!(result.is_err());
        assert!(!dest.exists());
    }
}
