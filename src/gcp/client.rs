//! GCP Client
//!
//! Main client for interacting with GCP APIs, combining authentication
//! and HTTP functionality.

use super::auth::GcpCredentials;
use super::http::GcpHttpClient;
use anyhow::Result;
use serde_json::Value;
use std::path::Path;

const BIGQUERY_ENDPOINT: &str = "https://bigquery.googleapis.com";
const STORAGE_ENDPOINT: &str = "https://storage.googleapis.com";
const DATATRANSFER_ENDPOINT: &str = "https://bigquerydatatransfer.googleapis.com";

/// Base URLs of the services the tool talks to
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoints {
    pub bigquery: String,
    pub storage: String,
    pub datatransfer: String,
}

impl Default for Endpoints {
    fn default() -> Self {
        Self {
            bigquery: BIGQUERY_ENDPOINT.to_string(),
            storage: STORAGE_ENDPOINT.to_string(),
            datatransfer: DATATRANSFER_ENDPOINT.to_string(),
        }
    }
}

impl Endpoints {
    /// Every service served from one base URL (emulators, mock servers)
    pub fn single(base: &str) -> Self {
        let base = base.trim_end_matches('/').to_string();
        Self {
            bigquery: base.clone(),
            storage: base.clone(),
            datatransfer: base,
        }
    }

    /// Defaults, overridden by the emulator host variables when set
    pub fn from_env() -> Self {
        let mut endpoints = Self::default();
        if let Some(host) = emulator_host("BIGQUERY_EMULATOR_HOST") {
            endpoints.bigquery = host;
        }
        if let Some(host) = emulator_host("STORAGE_EMULATOR_HOST") {
            endpoints.storage = host;
        }
        if let Some(host) = emulator_host("BIGQUERY_DATATRANSFER_EMULATOR_HOST") {
            endpoints.datatransfer = host;
        }
        endpoints
    }
}

fn emulator_host(var: &str) -> Option<String> {
    let value = std::env::var(var).ok()?;
    let value = value.trim().trim_end_matches('/');
    if value.is_empty() {
        return None;
    }
    tracing::info!("Using {}={}", var, value);
    if value.starts_with("http://") || value.starts_with("https://") {
        Some(value.to_string())
    } else {
        Some(format!("http://{}", value))
    }
}

/// Main GCP client
#[derive(Clone)]
pub struct GcpClient {
    pub credentials: GcpCredentials,
    pub http: GcpHttpClient,
    pub project_id: String,
    pub endpoints: Endpoints,
}

impl GcpClient {
    /// Create a new GCP client
    pub fn new(credentials: GcpCredentials, project_id: &str, endpoints: Endpoints) -> Result<Self> {
        let http = GcpHttpClient::new()?;

        Ok(Self {
            credentials,
            http,
            project_id: project_id.to_string(),
            endpoints,
        })
    }

    /// Get the current access token
    pub async fn get_token(&self) -> Result<String> {
        self.credentials.get_token().await
    }

    /// Make a GET request to a GCP API
    pub async fn get(&self, url: &str) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.get(url, &token).await
    }

    /// Make a POST request to a GCP API
    pub async fn post(&self, url: &str, body: Option<&Value>) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.post(url, &token, body).await
    }

    /// Download a raw payload
    pub async fn get_bytes(&self, url: &str) -> Result<Vec<u8>> {
        let token = self.get_token().await?;
        self.http.get_bytes(url, &token).await
    }

    /// Upload a raw payload
    pub async fn post_bytes(&self, url: &str, data: Vec<u8>, content_type: &str) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.post_bytes(url, &token, data, content_type).await
    }

    /// Stream a download into a file
    pub async fn download_to_file(&self, url: &str, path: &Path) -> Result<u64> {
        let token = self.get_token().await?;
        self.http.download_to_file(url, &token, path).await
    }

    /// Stream a file as an upload body
    pub async fn upload_file(&self, url: &str, path: &Path, content_type: &str) -> Result<Value> {
        let token = self.get_token().await?;
        self.http.upload_file(url, &token, path, content_type).await
    }

    pub async fn delete(&self, url: &str) -> Result<()> {
        let token = self.get_token().await?;
        self.http.delete(url, &token).await
    }

    /// Fetch every page of a list call and collect the `items_key` arrays
    pub async fn list_all(&self, url: &str, items_key: &str) -> Result<Vec<Value>> {
        let mut all_items = Vec::new();
        let mut page_token: Option<String> = None;

        loop {
            let page_url = match page_token.as_deref() {
                Some(token) => with_query(url, &[("pageToken", token)]),
                None => url.to_string(),
            };

            let response = self.get(&page_url).await?;

            if let Some(items) = response.get(items_key).and_then(|v| v.as_array()) {
                all_items.extend(items.iter().cloned());
            }

            page_token = response
                .get("nextPageToken")
                .and_then(|v| v.as_str())
                .filter(|s| !s.is_empty())
                .map(|s| s.to_string());

            if page_token.is_none() {
                break;
            }
        }

        Ok(all_items)
    }

    // =========================================================================
    // BigQuery API helpers
    // =========================================================================

    /// Build BigQuery API URL for the client's project
    pub fn bigquery_url(&self, path: &str) -> String {
        format!(
            "{}/bigquery/v2/projects/{}/{}",
            self.endpoints.bigquery, self.project_id, path
        )
    }

    /// Build BigQuery dataset-scoped URL
    pub fn bigquery_dataset_url(&self, dataset_id: &str, resource: &str) -> String {
        if resource.is_empty() {
            self.bigquery_url(&format!("datasets/{}", dataset_id))
        } else {
            self.bigquery_url(&format!("datasets/{}/{}", dataset_id, resource))
        }
    }

    // =========================================================================
    // Cloud Storage API helpers
    // =========================================================================

    /// Build Cloud Storage API URL
    pub fn storage_url(&self, path: &str) -> String {
        format!("{}/storage/v1/{}", self.endpoints.storage, path)
    }

    /// Build Cloud Storage bucket URL
    pub fn storage_bucket_url(&self, bucket: &str) -> String {
        self.storage_url(&format!("b/{}", bucket))
    }

    /// Build Cloud Storage objects URL
    pub fn storage_objects_url(&self, bucket: &str) -> String {
        self.storage_url(&format!("b/{}/o", bucket))
    }

    /// Build Cloud Storage single object URL
    pub fn storage_object_url(&self, bucket: &str, name: &str) -> String {
        format!(
            "{}/{}",
            self.storage_objects_url(bucket),
            urlencoding::encode(name)
        )
    }

    /// Build Cloud Storage media upload URL
    pub fn storage_upload_url(&self, bucket: &str, name: &str) -> String {
        format!(
            "{}/upload/storage/v1/b/{}/o?uploadType=media&name={}",
            self.endpoints.storage,
            bucket,
            urlencoding::encode(name)
        )
    }

    // =========================================================================
    // BigQuery Data Transfer API helpers
    // =========================================================================

    /// Build Data Transfer URL for a location of the client's project
    pub fn datatransfer_location_url(&self, location: &str, resource: &str) -> String {
        format!(
            "{}/v1/projects/{}/locations/{}/{}",
            self.endpoints.datatransfer, self.project_id, location, resource
        )
    }
}

/// Append URL-encoded query parameters to a URL
pub fn with_query(url: &str, params: &[(&str, &str)]) -> String {
    if params.is_empty() {
        return url.to_string();
    }

    let query = params
        .iter()
        .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
        .collect::<Vec<_>>()
        .join("&");

    if url.contains('?') {
        format!("{}&{}", url, query)
    } else {
        format!("{}?{}", url, query)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn client() -> GcpClient {
        GcpClient::new(
            GcpCredentials::with_static_token("t"),
            "my-project",
            Endpoints::default(),
        )
        .unwrap()
    }

    #[test]
    fn test_bigquery_urls() {
        let client = client();
        assert_eq!(
            client.bigquery_url("datasets"),
            "https://bigquery.googleapis.com/bigquery/v2/projects/my-project/datasets"
        );
        assert_eq!(
            client.bigquery_dataset_url("sales", "tables"),
            "https://bigquery.googleapis.com/bigquery/v2/projects/my-project/datasets/sales/tables"
        );
        assert_eq!(
            client.bigquery_dataset_url("sales", ""),
            "https://bigquery.googleapis.com/bigquery/v2/projects/my-project/datasets/sales"
        );
    }

    #[test]
    fn test_storage_object_names_are_encoded() {
        let client = client();
        assert_eq!(
            client.storage_object_url("bkt", "views/sales.v1.json"),
            "https://storage.googleapis.com/storage/v1/b/bkt/o/views%2Fsales.v1.json"
        );
        assert_eq!(
            client.storage_upload_url("bkt", "tables/a.b.json"),
            "https://storage.googleapis.com/upload/storage/v1/b/bkt/o?uploadType=media&name=tables%2Fa.b.json"
        );
    }

    #[test]
    fn test_with_query_appends() {
        assert_eq!(with_query("http://x/a", &[("p", "a b")]), "http://x/a?p=a%20b");
        assert_eq!(
            with_query("http://x/a?k=1", &[("pageToken", "t/2")]),
            "http://x/a?k=1&pageToken=t%2F2"
        );
        assert_eq!(with_query("http://x/a", &[]), "http://x/a");
    }

    #[test]
    fn test_single_endpoint_trims_slash() {
        let endpoints = Endpoints::single("http://127.0.0.1:9000/");
        assert_eq!(endpoints.bigquery, "http://127.0.0.1:9000");
        assert_eq!(endpoints.storage, endpoints.datatransfer);
    }
}
