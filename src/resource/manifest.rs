//! Project manifest
//!
//! The manifest lists the exported datasets and their locations. It is the
//! first object written by an export and the first one read by an import.

use super::RunContext;
use crate::gcp::bigquery;
use crate::gcp::client::GcpClient;
use crate::gcp::http::{classify, format_gcp_error, ApiFailure};
use crate::storage::ObjectStore;
use crate::summary::RunSummary;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

const MANIFEST_SUFFIX: &str = "_config.json";

/// Locations searched for scheduled queries when the project has no datasets
pub const FALLBACK_TRANSFER_LOCATIONS: &[&str] = &["us", "eu"];

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DatasetEntry {
    pub dataset_id: String,
    #[serde(default)]
    pub location: Option<String>,
}

impl DatasetEntry {
    pub fn new(dataset_id: &str) -> Self {
        Self {
            dataset_id: dataset_id.to_string(),
            location: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectManifest {
    pub project_id: String,
    pub datasets: Vec<DatasetEntry>,
}

impl ProjectManifest {
    pub fn object_name(project_id: &str) -> String {
        format!("{}{}", project_id, MANIFEST_SUFFIX)
    }

    /// List the datasets of the client's project with their locations
    pub async fn collect(client: &GcpClient) -> Result<Self> {
        let dataset_ids = bigquery::list_datasets(client).await?;
        let mut datasets = Vec::with_capacity(dataset_ids.len());

        for dataset_id in dataset_ids {
            let location = match bigquery::get_dataset(client, &dataset_id).await {
                Ok(dataset) => dataset
                    .get("location")
                    .and_then(|v| v.as_str())
                    .map(|s| s.to_string()),
                Err(e) => {
                    tracing::warn!(
                        "Could not read location of dataset {}: {}",
                        dataset_id,
                        format_gcp_error(&e)
                    );
                    None
                }
            };
            datasets.push(DatasetEntry {
                dataset_id,
                location,
            });
        }

        Ok(Self {
            project_id: client.project_id.clone(),
            datasets,
        })
    }

    /// Distinct lower-cased dataset locations, for the Data Transfer API
    pub fn transfer_locations(&self, region: &str) -> Vec<String> {
        let locations: BTreeSet<String> = self
            .datasets
            .iter()
            .filter_map(|d| d.location.as_deref())
            .map(|l| l.to_lowercase())
            .collect();

        if !locations.is_empty() {
            return locations.into_iter().collect();
        }

        let mut fallback: Vec<String> = FALLBACK_TRANSFER_LOCATIONS
            .iter()
            .map(|s| s.to_string())
            .collect();
        let region = region.to_lowercase();
        if !fallback.contains(&region) {
            fallback.push(region);
        }
        fallback
    }

    /// Find and read the manifest written by an earlier export
    pub async fn load(store: &dyn ObjectStore) -> Result<Self> {
        let mut candidates: Vec<String> = store
            .list("")
            .await?
            .into_iter()
            .filter(|name| !name.contains('/') && name.ends_with(MANIFEST_SUFFIX))
            .collect();
        candidates.sort();

        let Some(name) = candidates.first() else {
            anyhow::bail!(
                "Configuration file with '{}' suffix not found in bucket {}",
                MANIFEST_SUFFIX,
                store.bucket()
            );
        };

        if candidates.len() > 1 {
            tracing::warn!(
                "Found {} manifests in bucket {}, using {}",
                candidates.len(),
                store.bucket(),
                name
            );
        }

        let manifest: ProjectManifest = crate::storage::get_json(store, name)
            .await
            .with_context(|| format!("Failed to read manifest {}", name))?;
        tracing::info!(
            "Loaded manifest {} ({} datasets exported from {})",
            name,
            manifest.datasets.len(),
            manifest.project_id
        );
        Ok(manifest)
    }
}

/// Datasets phase of an import: create every manifest dataset that is
/// missing in the target project
pub async fn ensure_datasets(ctx: &RunContext<'_>, manifest: &ProjectManifest, summary: &mut RunSummary) {
    for dataset in &manifest.datasets {
        let id = &dataset.dataset_id;
        match bigquery::get_dataset(ctx.client, id).await {
            Ok(_) => {
                tracing::info!("Dataset {} already exists", id);
                continue;
            }
            Err(e) if classify(&e) == ApiFailure::NotFound => {}
            Err(e) => {
                tracing::error!("Error checking dataset {}: {}", id, format_gcp_error(&e));
                summary.error();
                continue;
            }
        }

        match bigquery::insert_dataset(ctx.client, id, ctx.region).await {
            Ok(_) => {
                tracing::info!("Created dataset {} in {}", id, ctx.region);
                summary.success();
            }
            Err(e) => super::record_import_failure(summary, &format!("dataset {}", id), &e),
        }
    }
}
