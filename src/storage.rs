//! Storage Adapter
//!
//! Named-object access to the export bucket plus bulk sync with a local
//! staging directory.

use crate::gcp::client::GcpClient;
use crate::gcp::http::{classify, ApiFailure};
use crate::gcp::storage as gcs;
use crate::summary::RunSummary;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Component as PathComponent, Path, PathBuf};
use walkdir::WalkDir;

pub const JSON_CONTENT_TYPE: &str = "application/json";
const OCTET_CONTENT_TYPE: &str = "application/octet-stream";

/// Idempotent put/get/list over named objects
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Bucket the objects live in
    fn bucket(&self) -> &str;

    /// Write an object, replacing any object with the same name
    async fn put(&self, name: &str, data: Vec<u8>, content_type: &str) -> Result<()>;

    async fn get(&self, name: &str) -> Result<Vec<u8>>;

    /// Names of all objects starting with `prefix`
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;

    async fn delete(&self, name: &str) -> Result<()>;

    /// Stream an object into `path`, returning the bytes written
    async fn download_to(&self, name: &str, path: &Path) -> Result<u64>;

    /// Store the file at `path` as `name` without reading it into memory
    async fn upload_from(&self, path: &Path, name: &str, content_type: &str) -> Result<()>;
}

/// Serialize `value` as pretty JSON and store it
pub async fn put_json<T: Serialize + ?Sized>(store: &dyn ObjectStore, name: &str, value: &T) -> Result<()> {
    let data = serde_json::to_vec_pretty(value).context("Failed to serialize record")?;
    store.put(name, data, JSON_CONTENT_TYPE).await
}

/// Read an object and deserialize it from JSON
pub async fn get_json<T: DeserializeOwned>(store: &dyn ObjectStore, name: &str) -> Result<T> {
    let data = store.get(name).await?;
    serde_json::from_slice(&data).with_context(|| format!("Failed to parse {}", name))
}

/// Delete every object under `prefix`, returning how many were removed
pub async fn delete_prefix(store: &dyn ObjectStore, prefix: &str) -> Result<usize> {
    let names = store.list(prefix).await?;
    for name in &names {
        store.delete(name).await?;
        tracing::debug!("Deleted gs://{}/{}", store.bucket(), name);
    }
    Ok(names.len())
}

/// Cloud Storage backed object store
pub struct GcsStore {
    client: GcpClient,
    bucket: String,
}

impl GcsStore {
    pub fn new(client: GcpClient, bucket: &str) -> Self {
        Self {
            client,
            bucket: bucket.to_string(),
        }
    }

    /// Create the bucket in `location` unless it already exists
    pub async fn ensure_bucket(&self, location: &str) -> Result<()> {
        match gcs::get_bucket(&self.client, &self.bucket).await {
            Ok(Some(_)) => {
                tracing::debug!("Bucket {} exists", self.bucket);
                return Ok(());
            }
            Ok(None) => {}
            Err(e) if classify(&e) == ApiFailure::PermissionDenied => {
                tracing::error!(
                    "Access denied to bucket {}. Ensure the service account has the necessary roles or that the new bucket name is globally unique.",
                    self.bucket
                );
                return Err(e.context(format!("Access denied to bucket {}", self.bucket)));
            }
            Err(e) => return Err(e.context(format!("Failed to look up bucket {}", self.bucket))),
        }

        match gcs::create_bucket(&self.client, &self.bucket, location).await {
            Ok(_) => {
                tracing::info!("Bucket {} created in {}", self.bucket, location);
                Ok(())
            }
            Err(e) if classify(&e) == ApiFailure::AlreadyExists => {
                tracing::error!(
                    "Bucket {} already exists in another project. Bucket names are globally unique, choose a different one.",
                    self.bucket
                );
                Err(e.context(format!("Bucket name {} is taken", self.bucket)))
            }
            Err(e) => Err(e.context(format!("Failed to create bucket {}", self.bucket))),
        }
    }
}

#[async_trait]
impl ObjectStore for GcsStore {
    fn bucket(&self) -> &str {
        &self.bucket
    }

    async fn put(&self, name: &str, data: Vec<u8>, content_type: &str) -> Result<()> {
        gcs::upload_object(&self.client, &self.bucket, name, data, content_type).await
    }

    async fn get(&self, name: &str) -> Result<Vec<u8>> {
        gcs::download_object(&self.client, &self.bucket, name).await
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        gcs::list_objects(&self.client, &self.bucket, prefix).await
    }

    async fn delete(&self, name: &str) -> Result<()> {
        gcs::delete_object(&self.client, &self.bucket, name).await
    }

    async fn download_to(&self, name: &str, path: &Path) -> Result<u64> {
        gcs::download_file(&self.client, &self.bucket, name, path).await
    }

    async fn upload_from(&self, path: &Path, name: &str, content_type: &str) -> Result<()> {
        gcs::upload_file(&self.client, &self.bucket, name, path, content_type).await
    }
}

// =============================================================================
// Local staging directory sync
// =============================================================================

/// Default staging directory for a download without `--local_dir`
pub fn default_export_dir(project_id: &str) -> PathBuf {
    PathBuf::from(format!(
        "./{}_export_{}",
        crate::config::file_safe(project_id),
        chrono::Local::now().format("%Y%m%d_%H%M%S")
    ))
}

/// Local path for an object, `None` for names that would escape `root`
fn local_path_for(root: &Path, name: &str) -> Option<PathBuf> {
    let relative = Path::new(name);
    let safe = relative
        .components()
        .all(|c| matches!(c, PathComponent::Normal(_)));
    if name.is_empty() || !safe {
        return None;
    }
    Some(root.join(relative))
}

/// Object name for a file below `root`, always `/`-separated
fn object_name_for(root: &Path, file: &Path) -> Option<String> {
    let relative = file.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    if parts.is_empty() {
        None
    } else {
        Some(parts.join("/"))
    }
}

/// Copy every object of the bucket into `local_dir`, overwriting files
pub async fn download_all(store: &dyn ObjectStore, local_dir: &Path) -> Result<RunSummary> {
    tokio::fs::create_dir_all(local_dir)
        .await
        .with_context(|| format!("Failed to create {}", local_dir.display()))?;

    let mut summary = RunSummary::default();
    let names = store.list("").await?;

    for name in names {
        // Folder placeholder objects
        if name.ends_with('/') {
            continue;
        }

        let Some(local_path) = local_path_for(local_dir, &name) else {
            tracing::warn!("Skipping object with unsafe name: {}", name);
            summary.warning();
            continue;
        };

        match download_one(store, &name, &local_path).await {
            Ok(()) => {
                tracing::info!("Downloaded {} to {}", name, local_path.display());
                summary.success();
            }
            Err(e) => {
                tracing::error!("Error downloading {}: {:#}", name, e);
                summary.error();
            }
        }
    }

    Ok(summary)
}

async fn download_one(store: &dyn ObjectStore, name: &str, local_path: &Path) -> Result<()> {
    if let Some(parent) = local_path.parent() {
        tokio::fs::create_dir_all(parent)
            .await
            .with_context(|| format!("Failed to create {}", parent.display()))?;
    }
    let bytes = store.download_to(name, local_path).await?;
    tracing::debug!("Wrote {} bytes to {}", bytes, local_path.display());
    Ok(())
}

/// Upload every file below `local_dir` under its relative path
pub async fn upload_all(store: &dyn ObjectStore, local_dir: &Path) -> Result<RunSummary> {
    let mut summary = RunSummary::default();

    if !local_dir.is_dir() {
        tracing::warn!(
            "Local directory {} does not exist. Skipping upload.",
            local_dir.display()
        );
        summary.warning();
        return Ok(summary);
    }

    let files: Vec<PathBuf> = WalkDir::new(local_dir)
        .into_iter()
        .filter_map(|entry| match entry {
            Ok(entry) => Some(entry),
            Err(e) => {
                tracing::warn!("Skipping unreadable entry: {}", e);
                None
            }
        })
        .filter(|entry| entry.file_type().is_file())
        .map(|entry| entry.into_path())
        .collect();

    for file in files {
        let Some(name) = object_name_for(local_dir, &file) else {
            continue;
        };

        match store.upload_from(&file, &name, content_type_for(&name)).await {
            Ok(()) => {
                tracing::info!("Uploaded {} to gs://{}/{}", file.display(), store.bucket(), name);
                summary.success();
            }
            Err(e) => {
                tracing::error!("Error uploading {}: {:#}", file.display(), e);
                summary.error();
            }
        }
    }

    Ok(summary)
}

fn content_type_for(name: &str) -> &'static str {
    if name.ends_with(".json") {
        JSON_CONTENT_TYPE
    } else {
        OCTET_CONTENT_TYPE
    }
}
