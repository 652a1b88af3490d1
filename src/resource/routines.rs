//! Routines (UDFs, procedures, table functions)
//!
//! Routines are imported in the [`super::passes`] phase shared with views.

use super::manifest::DatasetEntry;
use super::record::{api_timestamp, opt_string, opt_value, without_nulls};
use super::passes::{CreateCall, PendingCreate};
use super::sql::{strip_project_prefix, warn_external_references};
use super::{load_records, paths, Component, ComponentHandler, RunContext};
use crate::gcp::bigquery::{self, str_at};
use crate::gcp::http::format_gcp_error;
use crate::storage::put_json;
use crate::summary::RunSummary;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineArgument {
    pub name: Option<String>,
    pub data_type: Option<Value>,
    pub mode: Option<String>,
    pub argument_kind: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutineRecord {
    pub routine_id: String,
    pub routine_type: Option<String>,
    pub language: Option<String>,
    pub definition_body: String,
    #[serde(default)]
    pub arguments: Vec<RoutineArgument>,
    pub return_type: Option<Value>,
    #[serde(default)]
    pub return_table_type: Option<Value>,
    #[serde(default)]
    pub imported_libraries: Vec<String>,
    pub description: Option<String>,
    pub created: Option<String>,
    pub modified: Option<String>,
}

impl RoutineRecord {
    /// Build a record from a `routines.get` response
    pub fn from_api(routine: &Value, source_project: &str) -> Option<Self> {
        let routine_id = str_at(routine, "routineReference.routineId")?.to_string();

        let arguments = routine
            .get("arguments")
            .and_then(|v| v.as_array())
            .map(|args| {
                args.iter()
                    .map(|arg| RoutineArgument {
                        name: opt_string(arg, "name"),
                        data_type: opt_value(arg, "dataType"),
                        mode: opt_string(arg, "mode"),
                        argument_kind: opt_string(arg, "argumentKind"),
                    })
                    .collect()
            })
            .unwrap_or_default();

        let imported_libraries = routine
            .get("importedLibraries")
            .and_then(|v| v.as_array())
            .map(|libs| {
                libs.iter()
                    .filter_map(|l| l.as_str())
                    .map(|s| s.to_string())
                    .collect()
            })
            .unwrap_or_default();

        Some(Self {
            routine_id,
            routine_type: opt_string(routine, "routineType"),
            language: opt_string(routine, "language"),
            definition_body: strip_project_prefix(
                str_at(routine, "definitionBody").unwrap_or_default(),
                source_project,
            ),
            arguments,
            return_type: opt_value(routine, "returnType"),
            return_table_type: opt_value(routine, "returnTableType"),
            imported_libraries,
            description: opt_string(routine, "description"),
            created: api_timestamp(routine, "creationTime"),
            modified: api_timestamp(routine, "lastModifiedTime"),
        })
    }

    /// `routines.insert` body for the target project
    pub fn to_api(&self, project_id: &str, dataset_id: &str) -> Value {
        let arguments: Vec<Value> = self
            .arguments
            .iter()
            .map(|arg| {
                without_nulls(json!({
                    "name": arg.name,
                    "dataType": arg.data_type,
                    "mode": arg.mode,
                    "argumentKind": arg.argument_kind,
                }))
            })
            .collect();

        let imported_libraries = if self.imported_libraries.is_empty() {
            None
        } else {
            Some(&self.imported_libraries)
        };

        without_nulls(json!({
            "routineReference": {
                "projectId": project_id,
                "datasetId": dataset_id,
                "routineId": self.routine_id,
            },
            "routineType": self.routine_type,
            "language": self.language,
            "definitionBody": self.definition_body,
            "arguments": arguments,
            "returnType": self.return_type,
            "returnTableType": self.return_table_type,
            "importedLibraries": imported_libraries,
            "description": self.description,
        }))
    }
}

pub struct RoutinesHandler;

#[async_trait]
impl ComponentHandler for RoutinesHandler {
    fn component(&self) -> Component {
        Component::Routines
    }

    async fn export_dataset(
        &self,
        ctx: &RunContext<'_>,
        dataset: &DatasetEntry,
        summary: &mut RunSummary,
    ) -> Result<()> {
        let dataset_id = &dataset.dataset_id;
        let routine_ids = bigquery::list_routines(ctx.client, dataset_id).await?;
        let mut exported = 0;

        for routine_id in routine_ids {
            // The list call omits the body, fetch each routine
            let routine = match bigquery::get_routine(ctx.client, dataset_id, &routine_id).await {
                Ok(routine) => routine,
                Err(e) => {
                    tracing::error!(
                        "Error reading routine {}.{}: {}",
                        dataset_id,
                        routine_id,
                        format_gcp_error(&e)
                    );
                    summary.error();
                    continue;
                }
            };

            let Some(record) = RoutineRecord::from_api(&routine, ctx.project_id()) else {
                tracing::error!("Routine {}.{} has no reference", dataset_id, routine_id);
                summary.error();
                continue;
            };

            if record.definition_body.trim().is_empty() {
                tracing::warn!(
                    "Skipping routine {} in {} due to empty body",
                    routine_id,
                    dataset_id
                );
                summary.warning();
                continue;
            }

            warn_external_references(
                &format!("routine {}.{}", dataset_id, routine_id),
                &record.definition_body,
            );

            let object = paths::record_object(Component::Routines, dataset_id, &routine_id);
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

        tracing::info!("Exported {} routines from {}", exported, dataset_id);
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
        let records: Vec<(String, RoutineRecord)> =
            load_records(ctx.store, Component::Routines, dataset_id, summary).await?;

        Ok(records
            .into_iter()
            .map(|(_, record)| PendingCreate {
                call: CreateCall::Routine,
                dataset_id: dataset_id.clone(),
                body: record.to_api(ctx.project_id(), dataset_id),
                name: record.routine_id,
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn api_routine() -> Value {
        json!({
            "routineReference": {"projectId": "p1", "datasetId": "fn", "routineId": "add_tax"},
            "routineType": "SCALAR_FUNCTION",
            "language": "SQL",
            "definitionBody": "x * (SELECT rate FROM `p1.ref.tax`)",
            "arguments": [
                {"name": "x", "dataType": {"typeKind": "FLOAT64"}}
            ],
            "returnType": {"typeKind": "FLOAT64"},
            "creationTime": "1700000000000",
            "lastModifiedTime": "1700000000000",
            "etag": "abc"
        })
    }

    #[test]
    fn test_from_api_strips_source_project() {
        let record = RoutineRecord::from_api(&api_routine(), "p1").unwrap();
        assert_eq!(record.routine_id, "add_tax");
        assert_eq!(record.definition_body, "x * (SELECT rate FROM `ref.tax`)");
        assert_eq!(record.arguments.len(), 1);
        assert_eq!(record.arguments[0].name.as_deref(), Some("x"));
        assert_eq!(record.return_type, Some(json!({"typeKind": "FLOAT64"})));
    }

    #[test]
    fn test_to_api_targets_new_project() {
        let record = RoutineRecord::from_api(&api_routine(), "p1").unwrap();
        let body = record.to_api("p2", "fn");

        assert_eq!(body["routineReference"]["projectId"], "p2");
        assert_eq!(body["routineReference"]["routineId"], "add_tax");
        assert_eq!(body["arguments"][0], json!({"name": "x", "dataType": {"typeKind": "FLOAT64"}}));
        assert!(body.get("importedLibraries").is_none());
        assert!(body.get("description").is_none());
        assert!(body.get("etag").is_none());
    }

    #[test]
    fn test_record_survives_serialization() {
        let record = RoutineRecord::from_api(&api_routine(), "p1").unwrap();
        let text = serde_json::to_string_pretty(&record).unwrap();
        let back: RoutineRecord = serde_json::from_str(&text).unwrap();
        assert_eq!(back, record);
    }
}
