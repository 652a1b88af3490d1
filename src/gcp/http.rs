//! HTTP utilities for GCP REST API calls

use anyhow::{Context, Result};
use reqwest::{Body, Client, RequestBuilder, Response, StatusCode};
use serde_json::Value;
use std::path::Path;
use tokio::io::AsyncWriteExt;

/// Maximum length of response body to log (to avoid logging sensitive data)
const MAX_LOG_BODY_LENGTH: usize = 200;

/// Sanitize response body for logging
/// Truncates long responses and strips control characters
fn sanitize_for_log(body: &str) -> String {
    let truncated = if body.len() > MAX_LOG_BODY_LENGTH {
        let mut end = MAX_LOG_BODY_LENGTH;
        while !body.is_char_boundary(end) {
            end -= 1;
        }
        format!("{}... [truncated, {} bytes total]", &body[..end], body.len())
    } else {
        body.to_string()
    };

    truncated.replace(|c: char| !c.is_ascii_graphic() && c != ' ', "")
}

/// A non-success response from a Google API
#[derive(Debug, Clone, thiserror::Error)]
#[error("API request failed: {status}: {message}")]
pub struct ApiError {
    pub status: StatusCode,
    /// Google error reason, e.g. `notFound`, `duplicate`, `accessDenied`
    pub reason: Option<String>,
    pub message: String,
}

/// Coarse classification of an API failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiFailure {
    NotFound,
    PermissionDenied,
    AlreadyExists,
    Unauthenticated,
    RateLimited,
    Other,
}

impl ApiError {
    /// Build an error from a status and the raw response body
    pub fn from_response(status: StatusCode, body: &str) -> Self {
        let parsed: Option<Value> = serde_json::from_str(body).ok();
        let error = parsed.as_ref().and_then(|v| v.get("error"));

        let message = error
            .and_then(|e| e.get("message"))
            .and_then(|m| m.as_str())
            .map(|s| s.to_string())
            .unwrap_or_else(|| sanitize_for_log(body));

        let reason = error
            .and_then(|e| e.get("errors"))
            .and_then(|errs| errs.as_array())
            .and_then(|errs| errs.first())
            .and_then(|first| first.get("reason"))
            .or_else(|| error.and_then(|e| e.get("status")))
            .and_then(|r| r.as_str())
            .map(|s| s.to_string());

        Self {
            status,
            reason,
            message,
        }
    }

    pub fn failure(&self) -> ApiFailure {
        match self.status {
            StatusCode::NOT_FOUND => ApiFailure::NotFound,
            StatusCode::FORBIDDEN => ApiFailure::PermissionDenied,
            StatusCode::CONFLICT => ApiFailure::AlreadyExists,
            StatusCode::UNAUTHORIZED => ApiFailure::Unauthenticated,
            StatusCode::TOO_MANY_REQUESTS => ApiFailure::RateLimited,
            _ => ApiFailure::Other,
        }
    }
}

/// Find the API error anywhere in an error chain
pub fn api_error(error: &anyhow::Error) -> Option<&ApiError> {
    error.chain().find_map(|e| e.downcast_ref::<ApiError>())
}

/// Classify an error; errors that never reached the API are `Other`
pub fn classify(error: &anyhow::Error) -> ApiFailure {
    api_error(error)
        .map(ApiError::failure)
        .unwrap_or(ApiFailure::Other)
}

/// HTTP client wrapper for GCP API calls
#[derive(Clone)]
pub struct GcpHttpClient {
    client: Client,
}

impl GcpHttpClient {
    /// Create a new HTTP client
    pub fn new() -> Result<Self> {
        let client = Client::builder()
            .user_agent(concat!("bqshift/", env!("CARGO_PKG_VERSION")))
            .build()
            .context("Failed to create HTTP client")?;

        Ok(Self { client })
    }

    /// Make a GET request and parse the JSON response
    pub async fn get(&self, url: &str, token: &str) -> Result<Value> {
        tracing::debug!("GET {}", url);
        let body = self.send(self.client.get(url).bearer_auth(token)).await?;
        parse_json(&body)
    }

    /// Make a POST request with an optional JSON body
    pub async fn post(&self, url: &str, token: &str, body: Option<&Value>) -> Result<Value> {
        tracing::debug!("POST {}", url);

        let mut request = self.client.post(url).bearer_auth(token);
        if let Some(body) = body {
            request = request.json(body);
        }

        let response_body = self.send(request).await?;
        parse_json(&response_body)
    }

    /// Make a GET request and return the raw body
    pub async fn get_bytes(&self, url: &str, token: &str) -> Result<Vec<u8>> {
        tracing::debug!("GET (media) {}", url);

        let response = self.send_checked(self.client.get(url).bearer_auth(token)).await?;
        let bytes = response
            .bytes()
            .await
            .context("Failed to read response body")?;
        Ok(bytes.to_vec())
    }

    /// Stream a GET response body into a file, returning the bytes written
    pub async fn download_to_file(&self, url: &str, token: &str, path: &Path) -> Result<u64> {
        tracing::debug!("GET (media) {} -> {}", url, path.display());

        let mut response = self.send_checked(self.client.get(url).bearer_auth(token)).await?;
        let mut file = tokio::fs::File::create(path)
            .await
            .with_context(|| format!("Failed to create {}", path.display()))?;

        let mut written = 0u64;
        while let Some(chunk) = response
            .chunk()
            .await
            .context("Failed to read response body")?
        {
            file.write_all(&chunk)
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            written += chunk.len() as u64;
        }
        file.flush()
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        Ok(written)
    }

    /// POST a raw payload (media upload)
    pub async fn post_bytes(
        &self,
        url: &str,
        token: &str,
        data: Vec<u8>,
        content_type: &str,
    ) -> Result<Value> {
        tracing::debug!("POST (media, {} bytes) {}", data.len(), url);

        let request = self
            .client
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .body(data);

        let body = self.send(request).await?;
        parse_json(&body)
    }

    /// POST a file as the request body without reading it into memory
    pub async fn upload_file(
        &self,
        url: &str,
        token: &str,
        path: &Path,
        content_type: &str,
    ) -> Result<Value> {
        let file = tokio::fs::File::open(path)
            .await
            .with_context(|| format!("Failed to open {}", path.display()))?;
        let len = file
            .metadata()
            .await
            .with_context(|| format!("Failed to stat {}", path.display()))?
            .len();
        tracing::debug!("POST (media, {} bytes from {}) {}", len, path.display(), url);

        let request = self
            .client
            .post(url)
            .bearer_auth(token)
            .header(reqwest::header::CONTENT_TYPE, content_type)
            .header(reqwest::header::CONTENT_LENGTH, len)
            .body(Body::from(file));

        let body = self.send(request).await?;
        parse_json(&body)
    }

    /// Make a DELETE request, ignoring any response body
    pub async fn delete(&self, url: &str, token: &str) -> Result<()> {
        tracing::debug!("DELETE {}", url);
        self.send(self.client.delete(url).bearer_auth(token)).await?;
        Ok(())
    }

    /// Send and turn a non-success status into an [`ApiError`], leaving the
    /// body unread
    async fn send_checked(&self, request: RequestBuilder) -> Result<Response> {
        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            tracing::debug!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(ApiError::from_response(status, &body).into());
        }

        Ok(response)
    }

    async fn send(&self, request: RequestBuilder) -> Result<String> {
        let response = request.send().await.context("Failed to send request")?;

        let status = response.status();
        let body = response
            .text()
            .await
            .context("Failed to read response body")?;

        if !status.is_success() {
            // Only the sanitized/truncated body goes to the log
            tracing::debug!("API error: {} - {}", status, sanitize_for_log(&body));
            return Err(ApiError::from_response(status, &body).into());
        }

        Ok(body)
    }
}

fn parse_json(body: &str) -> Result<Value> {
    if body.is_empty() {
        return Ok(Value::Null);
    }
    serde_json::from_str(body).context("Failed to parse response JSON")
}

/// Format a GCP API error for display
pub fn format_gcp_error(error: &anyhow::Error) -> String {
    let Some(api) = api_error(error) else {
        return format!("{:#}", error);
    };

    let hint = match api.failure() {
        ApiFailure::PermissionDenied => "Permission denied. Check the service account's IAM roles.",
        ApiFailure::Unauthenticated => "Authentication failed. Check the credentials file.",
        ApiFailure::NotFound => "Resource not found.",
        ApiFailure::RateLimited => "Rate limit exceeded. Please try again later.",
        ApiFailure::AlreadyExists => "Resource already exists.",
        ApiFailure::Other if api.status == StatusCode::BAD_REQUEST => {
            "Invalid request. Check your parameters."
        }
        ApiFailure::Other if api.status.is_server_error() => {
            "GCP service temporarily unavailable. Please try again."
        }
        ApiFailure::Other => "Request failed.",
    };

    format!("{} ({})", hint, sanitize_for_log(&api.message))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_api_error_parses_google_error_body() {
        let body = r#"{"error":{"code":404,"message":"Not found: Dataset p:ds","errors":[{"reason":"notFound"}],"status":"NOT_FOUND"}}"#;
        let err = ApiError::from_response(StatusCode::NOT_FOUND, body);
        assert_eq!(err.reason.as_deref(), Some("notFound"));
        assert_eq!(err.message, "Not found: Dataset p:ds");
        assert_eq!(err.failure(), ApiFailure::NotFound);
    }

    #[test]
    fn test_api_error_falls_back_to_status_reason() {
        let body = r#"{"error":{"code":409,"message":"exists","status":"ALREADY_EXISTS"}}"#;
        let err = ApiError::from_response(StatusCode::CONFLICT, body);
        assert_eq!(err.reason.as_deref(), Some("ALREADY_EXISTS"));
        assert_eq!(err.failure(), ApiFailure::AlreadyExists);
    }

    #[test]
    fn test_api_error_with_non_json_body() {
        let err = ApiError::from_response(StatusCode::BAD_GATEWAY, "upstream\ndown");
        assert_eq!(err.reason, None);
        assert_eq!(err.message, "upstreamdown");
    }

    #[test]
    fn test_classify_through_context() {
        let err: anyhow::Error = ApiError::from_response(StatusCode::FORBIDDEN, "{}").into();
        let err = err.context("creating view");
        assert_eq!(classify(&err), ApiFailure::PermissionDenied);
        assert_eq!(classify(&anyhow::anyhow!("disk full")), ApiFailure::Other);
    }

    #[test]
    fn test_sanitize_truncates_long_bodies() {
        let body = "x".repeat(500);
        let sanitized = sanitize_for_log(&body);
        assert!(sanitized.contains("[truncated, 500 bytes total]"));
    }

    #[test]
    fn test_format_gcp_error_uses_status() {
        let err: anyhow::Error =
            ApiError::from_response(StatusCode::TOO_MANY_REQUESTS, r#"{"error":{"message":"slow down"}}"#).into();
        assert_eq!(
            format_gcp_error(&err),
            "Rate limit exceeded. Please try again later. (slow down)"
        );
    }

    mod transfer {
        use super::*;
        use wiremock::matchers::{bearer_token, method, path};
        use wiremock::{Mock, MockServer, ResponseTemplate};

        #[tokio::test]
        async fn test_download_to_file_writes_every_chunk() {
            let server = MockServer::start().await;
            let payload: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
            Mock::given(method("GET"))
                .and(path("/shard"))
                .and(bearer_token("tok"))
                .respond_with(ResponseTemplate::new(200).set_body_bytes(payload.clone()))
                .mount(&server)
                .await;

            let dir = tempfile::tempdir().unwrap();
            let target = dir.path().join("shard.parquet");
            let http = GcpHttpClient::new().unwrap();
            let written = http
                .download_to_file(&format!("{}/shard", server.uri()), "tok", &target)
                .await
                .unwrap();

            assert_eq!(written, payload.len() as u64);
            assert_eq!(std::fs::read(&target).unwrap(), payload);
        }

        #[tokio::test]
        async fn test_failed_download_creates_no_file() {
            let server = MockServer::start().await;
            Mock::given(method("GET"))
                .respond_with(ResponseTemplate::new(404).set_body_string(
                    r#"{"error":{"code":404,"message":"No such object"}}"#,
                ))
                .mount(&server)
                .await;

            let dir = tempfile::tempdir().unwrap();
            let target = dir.path().join("missing");
            let http = GcpHttpClient::new().unwrap();
            let err = http
                .download_to_file(&format!("{}/missing", server.uri()), "tok", &target)
                .await
                .unwrap_err();

            assert_eq!(classify(&err), ApiFailure::NotFound);
            assert!(!target.exists());
        }

        #[tokio::test]
        async fn test_upload_file_sends_file_contents() {
            let server = MockServer::start().await;
            Mock::given(method("POST"))
                .and(path("/upload"))
                .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({"name": "x"})))
                .expect(1)
                .mount(&server)
                .await;

            let dir = tempfile::tempdir().unwrap();
            let source = dir.path().join("x.parquet");
            std::fs::write(&source, b"PAR1 shard PAR1").unwrap();

            let http = GcpHttpClient::new().unwrap();
            let response = http
                .upload_file(
                    &format!("{}/upload", server.uri()),
                    "tok",
                    &source,
                    "application/octet-stream",
                )
                .await
                .unwrap();
            assert_eq!(response["name"], "x");

            let requests = server.received_requests().await.unwrap();
            assert_eq!(requests[0].body, b"PAR1 shard PAR1".to_vec());
            assert_eq!(
                requests[0].headers.get("content-type").unwrap(),
                "application/octet-stream"
            );
        }

        #[tokio::test]
        async fn test_delete_accepts_empty_response() {
            let server = MockServer::start().await;
            Mock::given(method("DELETE"))
                .and(path("/o/stale"))
                .respond_with(ResponseTemplate::new(204))
                .expect(1)
                .mount(&server)
                .await;

            let http = GcpHttpClient::new().unwrap();
            http.delete(&format!("{}/o/stale", server.uri()), "tok")
                .await
                .unwrap();
        }
    }
}
