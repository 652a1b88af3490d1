//! Cloud Storage JSON API calls

use super::client::{with_query, GcpClient};
use super::http::{classify, ApiFailure};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::path::Path;

/// Fetch bucket metadata, `None` when the bucket does not exist
pub async fn get_bucket(client: &GcpClient, bucket: &str) -> Result<Option<Value>> {
    match client.get(&client.storage_bucket_url(bucket)).await {
        Ok(value) => Ok(Some(value)),
        Err(e) if classify(&e) == ApiFailure::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Create a bucket in the client's project
pub async fn create_bucket(client: &GcpClient, bucket: &str, location: &str) -> Result<Value> {
    let url = with_query(&client.storage_url("b"), &[("project", &client.project_id)]);
    let body = json!({
        "name": bucket,
        "location": location,
    });
    client.post(&url, Some(&body)).await
}

pub async fn upload_object(
    client: &GcpClient,
    bucket: &str,
    name: &str,
    data: Vec<u8>,
    content_type: &str,
) -> Result<()> {
    let url = client.storage_upload_url(bucket, name);
    client
        .post_bytes(&url, data, content_type)
        .await
        .with_context(|| format!("Failed to upload gs://{}/{}", bucket, name))?;
    Ok(())
}

pub async fn download_object(client: &GcpClient, bucket: &str, name: &str) -> Result<Vec<u8>> {
    let url = with_query(&client.storage_object_url(bucket, name), &[("alt", "media")]);
    client
        .get_bytes(&url)
        .await
        .with_context(|| format!("Failed to download gs://{}/{}", bucket, name))
}

/// Upload a local file without buffering it
pub async fn upload_file(
    client: &GcpClient,
    bucket: &str,
    name: &str,
    path: &Path,
    content_type: &str,
) -> Result<()> {
    let url = client.storage_upload_url(bucket, name);
    client
        .upload_file(&url, path, content_type)
        .await
        .with_context(|| format!("Failed to upload {} to gs://{}/{}", path.display(), bucket, name))?;
    Ok(())
}

/// Stream an object into a local file
pub async fn download_file(client: &GcpClient, bucket: &str, name: &str, path: &Path) -> Result<u64> {
    let url = with_query(&client.storage_object_url(bucket, name), &[("alt", "media")]);
    client
        .download_to_file(&url, path)
        .await
        .with_context(|| format!("Failed to download gs://{}/{}", bucket, name))
}

pub async fn delete_object(client: &GcpClient, bucket: &str, name: &str) -> Result<()> {
    client
        .delete(&client.storage_object_url(bucket, name))
        .await
        .with_context(|| format!("Failed to delete gs://{}/{}", bucket, name))
}

/// List object names under a prefix
pub async fn list_objects(client: &GcpClient, bucket: &str, prefix: &str) -> Result<Vec<String>> {
    let mut url = with_query(&client.storage_objects_url(bucket), &[("fields", "items(name),nextPageToken")]);
    if !prefix.is_empty() {
        url = with_query(&url, &[("prefix", prefix)]);
    }

    let items = client
        .list_all(&url, "items")
        .await
        .with_context(|| format!("Failed to list gs://{}/{}", bucket, prefix))?;

    Ok(items
        .iter()
        .filter_map(|o| o.get("name").and_then(|n| n.as_str()))
        .map(|s| s.to_string())
        .collect())
}
