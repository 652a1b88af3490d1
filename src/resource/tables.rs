//! Native tables
//!
//! The schema travels as a JSON record, the rows as GZIP compressed PARQUET
//! shards written by a BigQuery extract job and read back by a load job.

use super::manifest::DatasetEntry;
use super::record::{api_timestamp, opt_string, opt_value, schema_fields, without_nulls};
use super::{load_records, paths, record_import_failure, Component, ComponentHandler, RunContext};
use crate::gcp::bigquery::{self, str_at, table_reference, TableKind};
use crate::gcp::http::format_gcp_error;
use crate::storage::{delete_prefix, put_json};
use crate::summary::RunSummary;
use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::collections::BTreeMap;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TableRecord {
    pub table_id: String,
    pub schema: Vec<Value>,
    pub description: Option<String>,
    #[serde(default)]
    pub time_partitioning: Option<Value>,
    #[serde(default)]
    pub range_partitioning: Option<Value>,
    #[serde(default)]
    pub clustering: Option<Value>,
    #[serde(default)]
    pub labels: BTreeMap<String, String>,
    pub created: Option<String>,
    pub modified: Option<String>,
}

impl TableRecord {
    pub fn from_api(table: &Value) -> Option<Self> {
        let labels = table
            .get("labels")
            .and_then(|v| v.as_object())
            .map(|map| {
                map.iter()
                    .filter_map(|(k, v)| v.as_str().map(|v| (k.clone(), v.to_string())))
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            table_id: str_at(table, "tableReference.tableId")?.to_string(),
            schema: schema_fields(table),
            description: opt_string(table, "description"),
            time_partitioning: opt_value(table, "timePartitioning"),
            range_partitioning: opt_value(table, "rangePartitioning"),
            clustering: opt_value(table, "clustering"),
            labels,
            created: api_timestamp(table, "creationTime"),
            modified: api_timestamp(table, "lastModifiedTime"),
        })
    }

    /// `configuration` of the load job that recreates the table
    pub fn load_configuration(&self, destination: Value, source_uri: &str) -> Value {
        let labels = (!self.labels.is_empty()).then_some(&self.labels);
        let properties = if self.description.is_some() || labels.is_some() {
            Some(without_nulls(json!({
                "description": self.description,
                "labels": labels,
            })))
        } else {
            None
        };

        json!({
            "load": without_nulls(json!({
                "sourceUris": [source_uri],
                "sourceFormat": "PARQUET",
                "destinationTable": destination,
                "schema": { "fields": self.schema },
                "createDisposition": "CREATE_IF_NEEDED",
                "writeDisposition": "WRITE_TRUNCATE",
                "timePartitioning": self.time_partitioning,
                "rangePartitioning": self.range_partitioning,
                "clustering": self.clustering,
                "destinationTableProperties": properties,
            }))
        })
    }
}

/// `configuration` of the extract job that writes the parquet shards
pub fn extract_configuration(source: Value, destination_uri: &str) -> Value {
    json!({
        "extract": {
            "sourceTable": source,
            "destinationUris": [destination_uri],
            "destinationFormat": "PARQUET",
            "compression": "GZIP",
        }
    })
}

pub struct TablesHandler;

impl TablesHandler {
    async fn export_table(
        &self,
        ctx: &RunContext<'_>,
        dataset: &DatasetEntry,
        table_id: &str,
    ) -> Result<()> {
        let dataset_id = &dataset.dataset_id;
        let table = bigquery::get_table(ctx.client, dataset_id, table_id).await?;
        let record = TableRecord::from_api(&table).context("table has no reference")?;

        let object = paths::record_object(Component::Tables, dataset_id, table_id);
        put_json(ctx.store, &object, &record).await?;

        let location = dataset
            .location
            .as_deref()
            .or_else(|| str_at(&table, "location"))
            .unwrap_or(ctx.region);
        // Shards of an earlier export would be picked up by the wildcard load
        let stale = delete_prefix(ctx.store, &paths::table_data_prefix(dataset_id, table_id))
            .await
            .context("Failed to clear earlier table data")?;
        if stale > 0 {
            tracing::debug!("Removed {} old shards of {}.{}", stale, dataset_id, table_id);
        }

        let destination_uri = paths::table_data_uri(ctx.store.bucket(), dataset_id, table_id);
        let configuration = extract_configuration(
            table_reference(ctx.client, dataset_id, table_id),
            &destination_uri,
        );

        bigquery::run_job(ctx.client, configuration, location, ctx.poll_interval).await?;
        tracing::info!("Table {}.{} exported to {}", dataset_id, table_id, destination_uri);
        Ok(())
    }
}

#[async_trait]
impl ComponentHandler for TablesHandler {
    fn component(&self) -> Component {
        Component::Tables
    }

    async fn export_dataset(
        &self,
        ctx: &RunContext<'_>,
        dataset: &DatasetEntry,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let tables: Vec<String> = bigquery::list_tables(ctx.client, &dataset.dataset_id)
            .await?
            .into_iter()
            .filter(|t| t.kind == TableKind::Table)
            .map(|t| t.table_id)
            .collect();

        for table_id in tables {
            ctx.progress
                .set_message(format!("tables {}.{}", dataset.dataset_id, table_id));
            match self.export_table(ctx, dataset, &table_id).await {
                Ok(()) => summary.success(),
                Err(e) => {
                    tracing::error!(
                        "Error exporting table {}.{}: {}",
                        dataset.dataset_id,
                        table_id,
                        format_gcp_error(&e)
                    );
                    summary.error();
                }
            }
        }
        Ok(())
    }

    async fn import_dataset(
        &self,
        ctx: &RunContext<'_>,
        dataset: &DatasetEntry,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let dataset_id = &dataset.dataset_id;
        let records: Vec<(String, TableRecord)> =
            load_records(ctx.store, Component::Tables, dataset_id, summary).await?;

        for (_, record) in records {
            ctx.progress
                .set_message(format!("tables {}.{}", dataset_id, record.table_id));
            let source_uri = paths::table_data_uri(ctx.store.bucket(), dataset_id, &record.table_id);
            let configuration = record.load_configuration(
                table_reference(ctx.client, dataset_id, &record.table_id),
                &source_uri,
            );

            match bigquery::run_job(ctx.client, configuration, ctx.region, ctx.poll_interval).await {
                Ok(_) => {
                    tracing::info!(
                        "Table {}.{}.{} imported from {}",
                        ctx.project_id(),
                        dataset_id,
                        record.table_id,
                        source_uri
                    );
                    summary.success();
                }
                Err(e) => record_import_failure(
                    summary,
                    &format!("table {}.{}", dataset_id, record.table_id),
                    &e,
                ),
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_table() -> Value {
        json!({
            "tableReference": {"projectId": "p1", "datasetId": "sales", "tableId": "orders"},
            "type": "TABLE",
            "location": "EU",
            "schema": {"fields": [
                {"name": "id", "type": "INTEGER", "mode": "REQUIRED"},
                {"name": "ts", "type": "TIMESTAMP"}
            ]},
            "timePartitioning": {"type": "DAY", "field": "ts"},
            "clustering": {"fields": ["id"]},
            "labels": {"team": "finance"},
            "numRows": "1200"
        })
    }

    #[test]
    fn test_record_keeps_schema_and_layout() {
        let record = TableRecord::from_api(&api_table()).unwrap();
        assert_eq!(record.schema.len(), 2);
        assert_eq!(record.time_partitioning, Some(json!({"type": "DAY", "field": "ts"})));
        assert_eq!(record.labels.get("team").map(String::as_str), Some("finance"));
        assert_eq!(record.range_partitioning, None);
    }

    #[test]
    fn test_load_configuration() {
        let record = TableRecord::from_api(&api_table()).unwrap();
        let config = record.load_configuration(
            json!({"projectId": "p2", "datasetId": "sales", "tableId": "orders"}),
            "gs://bkt/tables/sales.orders/*.parquet",
        );
        let load = &config["load"];

        assert_eq!(load["sourceFormat"], "PARQUET");
        assert_eq!(load["sourceUris"][0], "gs://bkt/tables/sales.orders/*.parquet");
        assert_eq!(load["schema"]["fields"], json!(record.schema));
        assert_eq!(load["writeDisposition"], "WRITE_TRUNCATE");
        assert_eq!(load["clustering"]["fields"][0], "id");
        assert!(load.get("rangePartitioning").is_none());
        assert_eq!(load["destinationTableProperties"]["labels"]["team"], "finance");
    }

    #[test]
    fn test_extract_configuration() {
        let config = extract_configuration(json!({"tableId": "orders"}), "gs://bkt/tables/sales.orders/*.parquet");
        assert_eq!(config["extract"]["destinationFormat"], "PARQUET");
        assert_eq!(config["extract"]["compression"], "GZIP");
    }
}
