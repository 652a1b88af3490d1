//! Views
//!
//! Views may select from other views or call routines of the same run, so
//! they are created in the shared [`super::passes`] phase.

use super::manifest::DatasetEntry;
use super::passes::{CreateCall, PendingCreate};
use super::record::{api_timestamp, opt_string, schema_fields, without_nulls};
use super::sql::{strip_project_prefix, warn_external_references};
use super::{load_records, paths, Component, ComponentHandler, RunContext};
use crate::gcp::bigquery::{self, str_at, table_reference, TableKind};
use crate::gcp::http::format_gcp_error;
use crate::storage::put_json;
use crate::summary::RunSummary;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ViewRecord {
    pub table_id: String,
    pub view_query: String,
    #[serde(default)]
    pub use_legacy_sql: bool,
    pub description: Option<String>,
    #[serde(default)]
    pub schema: Vec<Value>,
    pub created: Option<String>,
    pub modified: Option<String>,
}

impl ViewRecord {
    pub fn from_api(table: &Value, source_project: &str) -> Option<Self> {
        Some(Self {
            table_id: str_at(table, "tableReference.tableId")?.to_string(),
            view_query: strip_project_prefix(str_at(table, "view.query")?, source_project),
            use_legacy_sql: table
                .get("view")
                .and_then(|v| v.get("useLegacySql"))
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            description: opt_string(table, "description"),
            schema: schema_fields(table),
            created: api_timestamp(table, "creationTime"),
            modified: api_timestamp(table, "lastModifiedTime"),
        })
    }

    /// `tables.insert` body; the schema is derived by BigQuery from the query
    pub fn to_api(&self, table_ref: Value) -> Value {
        without_nulls(json!({
            "tableReference": table_ref,
            "view": {
                "query": self.view_query,
                "useLegacySql": self.use_legacy_sql,
            },
            "description": self.description,
        }))
    }
}

pub struct ViewsHandler;

#[async_trait]
impl ComponentHandler for ViewsHandler {
    fn component(&self) -> Component {
        Component::Views
    }

    async fn export_dataset(
        &self,
        ctx: &RunContext<'_>,
        dataset: &DatasetEntry,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let dataset_id = &dataset.dataset_id;
        let views: Vec<String> = bigquery::list_tables(ctx.client, dataset_id)
            .await?
            .into_iter()
            .filter(|t| t.kind == TableKind::View)
            .map(|t| t.table_id)
            .collect();
        let mut exported = 0;

        for view_id in views {
            let table = match bigquery::get_table(ctx.client, dataset_id, &view_id).await {
                Ok(table) => table,
                Err(e) => {
                    tracing::error!(
                        "Error reading view {}.{}: {}",
                        dataset_id,
                        view_id,
                        format_gcp_error(&e)
                    );
                    summary.error();
                    continue;
                }
            };

            let Some(record) = ViewRecord::from_api(&table, ctx.project_id()) else {
                tracing::error!("View {}.{} has no query", dataset_id, view_id);
                summary.error();
                continue;
            };

            // External projects must exist before this view can be created
            warn_external_references(&format!("view {}.{}", dataset_id, view_id), &record.view_query);

            let object = paths::record_object(Component::Views, dataset_id, &view_id);
            match put_json(ctx.store, &object, &record).await {
                Ok(()) => {
                    exported += 1;
                    summary.success();
                }
                Err(e) => {
                    tracing::error!("Error writing {}: {:#}", object, e);
                    summary.error();
                }
            }
        }

        tracing::info!("Exported {} views from {}", exported, dataset_id);
        Ok(())
    }

    fn creates_in_passes(&self) -> bool {
        true
    }

    async fn pending_creates(
        &self,
        ctx: &RunContext<'_>,
        dataset: &DatasetEntry,
        summary: &mut RunSummary,
    ) -> Result<Vec<PendingCreate>> {
        let dataset_id = &dataset.dataset_id;
        let records: Vec<(String, ViewRecord)> =
            load_records(ctx.store, Component::Views, dataset_id, summary).await?;

        Ok(records
            .into_iter()
            .map(|(_, record)| PendingCreate {
                call: CreateCall::View,
                dataset_id: dataset_id.clone(),
                body: record.to_api(table_reference(ctx.client, dataset_id, &record.table_id)),
                name: record.table_id,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_api_requires_query() {
        let table = json!({"tableReference": {"tableId": "t"}, "type": "TABLE"});
        assert!(ViewRecord::from_api(&table, "p1").is_none());
    }

    #[test]
    fn test_round_trip_body() {
        let table = json!({
            "tableReference": {"projectId": "p1", "datasetId": "rpt", "tableId": "daily"},
            "type": "VIEW",
            "view": {"query": "SELECT * FROM `p1.sales.orders`", "useLegacySql": false},
            "schema": {"fields": [{"name": "id", "type": "INTEGER"}]},
            "description": "daily report"
        });
        let record = ViewRecord::from_api(&table, "p1").unwrap();
        assert_eq!(record.view_query, "SELECT * FROM `sales.orders`");
        assert_eq!(record.schema.len(), 1);

        let body = record.to_api(json!({"projectId": "p2", "datasetId": "rpt", "tableId": "daily"}));
        assert_eq!(body["view"]["query"], "SELECT * FROM `sales.orders`");
        assert_eq!(body["view"]["useLegacySql"], false);
        assert_eq!(body["description"], "daily report");
        assert!(body.get("schema").is_none());
    }
}
