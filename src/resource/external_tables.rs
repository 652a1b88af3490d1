//! External tables

use super::manifest::DatasetEntry;
use super::record::{api_timestamp, opt_string, opt_value, schema_fields, without_nulls};
use super::{load_records, paths, record_import_failure, Component, ComponentHandler, RunContext};
use crate::gcp::bigquery::{self, str_at, table_reference, TableKind};
use crate::gcp::http::format_gcp_error;
use crate::storage::put_json;
use crate::summary::RunSummary;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalTableRecord {
    pub table_id: String,
    #[serde(default)]
    pub schema: Vec<Value>,
    pub external_data_configuration: Value,
    pub description: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
}

impl ExternalTableRecord {
    pub fn from_api(table: &Value) -> Option<Self> {
        Some(Self {
            table_id: str_at(table, "tableReference.tableId")?.to_string(),
            schema: schema_fields(table),
            external_data_configuration: opt_value(table, "externalDataConfiguration")?,
            description: opt_string(table, "description"),
            created: api_timestamp(table, "creationTime"),
            modified: api_timestamp(table, "lastModifiedTime"),
        })
    }

    pub fn to_api(&self, table_ref: Value) -> Value {
        let schema = if self.schema.is_empty() {
            None
        } else {
            Some(json!({ "fields": self.schema }))
        };

        without_nulls(json!({
            "tableReference": table_ref,
            "schema": schema,
            "externalDataConfiguration": self.external_data_configuration,
            "description": self.description,
        }))
    }
}

pub struct ExternalTablesHandler;

#[async_trait]
impl ComponentHandler for ExternalTablesHandler {
    fn component(&self) -> Component {
        Component::ExternalTables
    }

    async fn export_dataset(
        &self,
        ctx: &RunContext<'_>,
        dataset: &DatasetEntry,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let dataset_id = &dataset.dataset_id;
        let tables: Vec<String> = bigquery::list_tables(ctx.client, dataset_id)
            .await?
            .into_iter()
            .filter(|t| t.kind == TableKind::External)
            .map(|t| t.table_id)
            .collect();
        let mut exported = 0;

        for table_id in tables {
            let result = async {
                let table = bigquery::get_table(ctx.client, dataset_id, &table_id).await?;
                let record = ExternalTableRecord::from_api(&table).ok_or_else(|| {
                    anyhow::anyhow!("table has no external data configuration")
                })?;
                let object = paths::record_object(Component::ExternalTables, dataset_id, &table_id);
                put_json(ctx.store, &object, &record).await
            }
            .await;

            match result {
                Ok(()) => {
                    exported += 1;
                    summary.success();
                }
                Err(e) => {
                    tracing::error!(
                        "Error exporting external table {}.{}: {}",
                        dataset_id,
                        table_id,
                        format_gcp_error(&e)
                    );
                    summary.error();
                }
            }
        }

        tracing::info!("Exported {} external tables from {}", exported, dataset_id);
        Ok(())
    }

    async fn import_dataset(
        &self,
        ctx: &RunContext<'_>,
        dataset: &DatasetEntry,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let dataset_id = &dataset.dataset_id;
        let records: Vec<(String, ExternalTableRecord)> =
            load_records(ctx.store, Component::ExternalTables, dataset_id, summary).await?;
        let mut imported = 0;

        for (_, record) in records {
            let table_ref = table_reference(ctx.client, dataset_id, &record.table_id);
            match bigquery::insert_table(ctx.client, dataset_id, &record.to_api(table_ref)).await {
                Ok(_) => {
                    imported += 1;
                    summary.success();
                }
                Err(e) => record_import_failure(
                    summary,
                    &format!("external table {}.{}", dataset_id, record.table_id),
                    &e,
                ),
            }
        }

        tracing::info!("Imported {} external tables into {}", imported, dataset_id);
        Ok(())
    }
}
