//! BigQuery REST API calls
//!
//! Thin wrappers over the `bigquery/v2` endpoints used by the exporters and
//! importers. Results stay as `serde_json::Value` so resource metadata passes
//! through untouched.

use super::client::{with_query, GcpClient};
use anyhow::{Context, Result};
use serde_json::{json, Value};
use std::time::Duration;
use uuid::Uuid;

/// `type` field of a table resource
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TableKind {
    Table,
    View,
    External,
    Other(String),
}

impl TableKind {
    pub fn parse(s: &str) -> Self {
        match s {
            "TABLE" => Self::Table,
            "VIEW" => Self::View,
            "EXTERNAL" => Self::External,
            other => Self::Other(other.to_string()),
        }
    }
}

/// Entry of a `tables.list` response
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableEntry {
    pub table_id: String,
    pub kind: TableKind,
}

/// Walk a dot-separated path into a JSON value
pub fn value_at<'a>(item: &'a Value, path: &str) -> Option<&'a Value> {
    let mut current = item;
    for part in path.split('.') {
        current = match part.parse::<usize>() {
            Ok(idx) => current.get(idx)?,
            Err(_) => current.get(part)?,
        };
    }
    Some(current)
}

/// String at a dot-separated path
pub fn str_at<'a>(item: &'a Value, path: &str) -> Option<&'a str> {
    value_at(item, path).and_then(|v| v.as_str())
}

// =============================================================================
// Datasets
// =============================================================================

/// List dataset ids of the client's project
pub async fn list_datasets(client: &GcpClient) -> Result<Vec<String>> {
    let url = with_query(&client.bigquery_url("datasets"), &[("all", "true")]);
    let items = client
        .list_all(&url, "datasets")
        .await
        .context("Failed to list datasets")?;

    Ok(items
        .iter()
        .filter_map(|d| str_at(d, "datasetReference.datasetId"))
        .map(|s| s.to_string())
        .collect())
}

pub async fn get_dataset(client: &GcpClient, dataset_id: &str) -> Result<Value> {
    client.get(&client.bigquery_dataset_url(dataset_id, "")).await
}

pub async fn insert_dataset(client: &GcpClient, dataset_id: &str, location: &str) -> Result<Value> {
    let body = json!({
        "datasetReference": {
            "projectId": client.project_id,
            "datasetId": dataset_id,
        },
        "location": location,
    });
    client.post(&client.bigquery_url("datasets"), Some(&body)).await
}

// =============================================================================
// Tables
// =============================================================================

pub async fn list_tables(client: &GcpClient, dataset_id: &str) -> Result<Vec<TableEntry>> {
    let url = client.bigquery_dataset_url(dataset_id, "tables");
    let items = client
        .list_all(&url, "tables")
        .await
        .with_context(|| format!("Failed to list tables of {}", dataset_id))?;

    Ok(items
        .iter()
        .filter_map(|t| {
            let table_id = str_at(t, "tableReference.tableId")?;
            let kind = TableKind::parse(str_at(t, "type").unwrap_or("TABLE"));
            Some(TableEntry {
                table_id: table_id.to_string(),
                kind,
            })
        })
        .collect())
}

pub async fn get_table(client: &GcpClient, dataset_id: &str, table_id: &str) -> Result<Value> {
    let url = client.bigquery_dataset_url(dataset_id, &format!("tables/{}", table_id));
    client.get(&url).await
}

pub async fn insert_table(client: &GcpClient, dataset_id: &str, table: &Value) -> Result<Value> {
    let url = client.bigquery_dataset_url(dataset_id, "tables");
    client.post(&url, Some(table)).await
}

/// `tableReference` object for a table of the client's project
pub fn table_reference(client: &GcpClient, dataset_id: &str, table_id: &str) -> Value {
    json!({
        "projectId": client.project_id,
        "datasetId": dataset_id,
        "tableId": table_id,
    })
}

// =============================================================================
// Routines
// =============================================================================

pub async fn list_routines(client: &GcpClient, dataset_id: &str) -> Result<Vec<String>> {
    let url = client.bigquery_dataset_url(dataset_id, "routines");
    let items = client
        .list_all(&url, "routines")
        .await
        .with_context(|| format!("Failed to list routines of {}", dataset_id))?;

    Ok(items
        .iter()
        .filter_map(|r| str_at(r, "routineReference.routineId"))
        .map(|s| s.to_string())
        .collect())
}

pub async fn get_routine(client: &GcpClient, dataset_id: &str, routine_id: &str) -> Result<Value> {
    let url = client.bigquery_dataset_url(dataset_id, &format!("routines/{}", routine_id));
    client.get(&url).await
}

pub async fn insert_routine(client: &GcpClient, dataset_id: &str, routine: &Value) -> Result<Value> {
    let url = client.bigquery_dataset_url(dataset_id, "routines");
    client.post(&url, Some(routine)).await
}

// =============================================================================
// Jobs
// =============================================================================

/// State of a polled job
#[derive(Debug, Clone, PartialEq)]
pub enum JobStatus {
    Running,
    Done,
    Failed(String),
}

impl JobStatus {
    pub fn from_job(job: &Value) -> Self {
        if str_at(job, "status.state") != Some("DONE") {
            return Self::Running;
        }

        match value_at(job, "status.errorResult") {
            Some(error) if !error.is_null() => {
                let reason = str_at(error, "reason").unwrap_or("unknown");
                let message = str_at(error, "message").unwrap_or("no message");
                Self::Failed(format!("{}: {}", reason, message))
            }
            _ => Self::Done,
        }
    }
}

/// Submit a job and wait until BigQuery reports it `DONE`
pub async fn run_job(
    client: &GcpClient,
    configuration: Value,
    location: &str,
    poll_interval: Duration,
) -> Result<Value> {
    let job_id = format!("bqshift_{}", Uuid::new_v4().simple());
    let body = json!({
        "jobReference": {
            "projectId": client.project_id,
            "jobId": job_id,
            "location": location,
        },
        "configuration": configuration,
    });

    let mut job = client
        .post(&client.bigquery_url("jobs"), Some(&body))
        .await
        .with_context(|| format!("Failed to submit job {}", job_id))?;

    let poll_url = with_query(
        &client.bigquery_url(&format!("jobs/{}", job_id)),
        &[("location", location)],
    );

    loop {
        match JobStatus::from_job(&job) {
            JobStatus::Done => {
                tracing::debug!("Job {} done", job_id);
                return Ok(job);
            }
            JobStatus::Failed(error) => {
                anyhow::bail!("Job {} failed: {}", job_id, error);
            }
            JobStatus::Running => {
                tokio::time::sleep(poll_interval).await;
                job = client
                    .get(&poll_url)
                    .await
                    .with_context(|| format!("Failed to poll job {}", job_id))?;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_value_at_walks_objects_and_arrays() {
        let v = json!({"a": {"b": [{"c": "x"}]}});
        assert_eq!(str_at(&v, "a.b.0.c"), Some("x"));
        assert!(value_at(&v, "a.z").is_none());
    }

    #[test]
    fn test_table_kind_parse() {
        assert_eq!(TableKind::parse("TABLE"), TableKind::Table);
        assert_eq!(TableKind::parse("VIEW"), TableKind::View);
        assert_eq!(TableKind::parse("EXTERNAL"), TableKind::External);
        assert_eq!(
            TableKind::parse("MATERIALIZED_VIEW"),
            TableKind::Other("MATERIALIZED_VIEW".to_string())
        );
    }

    #[test]
    fn test_job_status() {
        assert_eq!(
            JobStatus::from_job(&json!({"status": {"state": "RUNNING"}})),
            JobStatus::Running
        );
        assert_eq!(
            JobStatus::from_job(&json!({"status": {"state": "DONE"}})),
            JobStatus::Done
        );
        assert_eq!(
            JobStatus::from_job(&json!({
                "status": {
                    "state": "DONE",
                    "errorResult": {"reason": "invalid", "message": "bad uri"}
                }
            })),
            JobStatus::Failed("invalid: bad uri".to_string())
        );
    }
}
