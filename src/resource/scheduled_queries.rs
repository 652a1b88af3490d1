//! Scheduled queries (BigQuery Data Transfer configs)
//!
//! Project scoped rather than dataset scoped: exported from every dataset
//! location, imported into the run's region.

use super::manifest::ProjectManifest;
use super::record::{opt_string, opt_value, without_nulls};
use super::sql::{strip_project_prefix, warn_external_references};
use super::{paths, record_import_failure, Component, ComponentHandler, RunContext};
use crate::gcp::bigquery::str_at;
use crate::gcp::http::format_gcp_error;
use crate::gcp::transfer;
use crate::storage::{get_json, put_json};
use crate::summary::RunSummary;
use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScheduledQueryRecord {
    pub name: String,
    pub display_name: Option<String>,
    pub data_source_id: String,
    #[serde(default)]
    pub params: Map<String, Value>,
    pub query: Option<String>,
    pub schedule: Option<String>,
    pub schedule_options: Option<Value>,
    pub destination_dataset_id: Option<String>,
    #[serde(default)]
    pub disabled: bool,
    pub dataset_region: Option<String>,
    pub notification_pubsub_topic: Option<String>,
    pub email_preferences: Option<Value>,
    pub update_time: Option<String>,
    pub user_id: Option<String>,
}

impl ScheduledQueryRecord {
    pub fn from_api(config: &Value, source_project: &str) -> Option<Self> {
        let mut params = config
            .get("params")
            .and_then(|v| v.as_object())
            .cloned()
            .unwrap_or_default();

        let query = params
            .get("query")
            .and_then(|q| q.as_str())
            .map(|q| strip_project_prefix(q, source_project));
        if let Some(query) = &query {
            params.insert("query".to_string(), Value::String(query.clone()));
        }

        Some(Self {
            name: str_at(config, "name")?.to_string(),
            display_name: opt_string(config, "displayName"),
            data_source_id: opt_string(config, "dataSourceId")
                .unwrap_or_else(|| transfer::SCHEDULED_QUERY_SOURCE.to_string()),
            params,
            query,
            schedule: opt_string(config, "schedule"),
            schedule_options: opt_value(config, "scheduleOptions"),
            destination_dataset_id: opt_string(config, "destinationDatasetId"),
            disabled: config
                .get("disabled")
                .and_then(|v| v.as_bool())
                .unwrap_or(false),
            dataset_region: opt_string(config, "datasetRegion"),
            notification_pubsub_topic: opt_string(config, "notificationPubsubTopic"),
            email_preferences: opt_value(config, "emailPreferences"),
            update_time: opt_string(config, "updateTime"),
            user_id: opt_string(config, "userId"),
        })
    }

    /// Last segment of `projects/../transferConfigs/<id>`
    pub fn config_id(&self) -> String {
        self.name
            .rsplit('/')
            .next()
            .filter(|s| !s.is_empty())
            .unwrap_or(&self.name)
            .to_string()
    }

    /// `transferConfigs.create` body
    pub fn to_api(&self) -> Value {
        let mut params = self.params.clone();
        if let Some(query) = &self.query {
            params.insert("query".to_string(), Value::String(query.clone()));
        }

        without_nulls(json!({
            "displayName": self.display_name,
            "dataSourceId": self.data_source_id,
            "params": params,
            "schedule": self.schedule,
            "scheduleOptions": self.schedule_options,
            "destinationDatasetId": self.destination_dataset_id,
            "disabled": self.disabled,
            "notificationPubsubTopic": self.notification_pubsub_topic,
            "emailPreferences": self.email_preferences,
        }))
    }
}

pub struct ScheduledQueriesHandler;

#[async_trait]
impl ComponentHandler for ScheduledQueriesHandler {
    fn component(&self) -> Component {
        Component::ScheduledQueries
    }

    fn work_units(&self, _manifest: &ProjectManifest) -> u64 {
        1
    }

    async fn export(
        &self,
        ctx: &RunContext<'_>,
        manifest: &ProjectManifest,
        summary: &mut RunSummary,
    ) -> Result<()> {
        ctx.progress.set_message("scheduled_queries");
        let mut total = 0;

        for location in manifest.transfer_locations(ctx.region) {
            let configs = match transfer::list_scheduled_queries(ctx.client, &location).await {
                Ok(configs) => configs,
                Err(e) => {
                    tracing::error!(
                        "Error exporting scheduled queries from region {}: {}",
                        location,
                        format_gcp_error(&e)
                    );
                    summary.error();
                    continue;
                }
            };

            let mut exported = 0;
            for config in configs {
                let Some(record) = ScheduledQueryRecord::from_api(&config, ctx.project_id()) else {
                    tracing::error!("Scheduled query without a name in {}", location);
                    summary.error();
                    continue;
                };

                if let Some(query) = &record.query {
                    warn_external_references(
                        &format!("scheduled query {}", record.display_name.as_deref().unwrap_or(&record.name)),
                        query,
                    );
                }

                let object = paths::record_object(Component::ScheduledQueries, &location, &record.config_id());
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

            tracing::info!("Exported {} scheduled queries from region {}", exported, location);
            total += exported;
        }

        tracing::info!("Exported a total of {} scheduled queries from all regions", total);
        if total == 0 {
            tracing::warn!("No scheduled queries found in any region. This might be unexpected.");
        }

        ctx.progress.inc(1);
        Ok(())
    }

    async fn import(
        &self,
        ctx: &RunContext<'_>,
        _manifest: &ProjectManifest,
        summary: &mut RunSummary,
    ) -> Result<()> {
        ctx.progress.set_message("scheduled_queries");
        let result = self.import_all(ctx, summary).await;
        ctx.progress.inc(1);
        result
    }
}

impl ScheduledQueriesHandler {
    async fn import_all(&self, ctx: &RunContext<'_>, summary: &mut RunSummary) -> Result<()> {
        let mut objects: Vec<String> = ctx
            .store
            .list(&paths::component_prefix(Component::ScheduledQueries))
            .await?
            .into_iter()
            .filter(|o| paths::parse_record_object(Component::ScheduledQueries, o).is_some())
            .collect();
        objects.sort();

        let mut imported = 0;
        for object in objects {
            let record: ScheduledQueryRecord = match get_json(ctx.store, &object).await {
                Ok(record) => record,
                Err(e) => {
                    tracing::error!("Error reading {}: {:#}", object, e);
                    summary.error();
                    continue;
                }
            };

            match transfer::create_transfer_config(ctx.client, ctx.region, &record.to_api()).await {
                Ok(created) => {
                    let config_id = record.config_id();
                    tracing::info!(
                        "Created scheduled query: {}",
                        str_at(&created, "name").unwrap_or(&config_id)
                    );
                    imported += 1;
                    summary.success();
                }
                Err(e) => record_import_failure(
                    summary,
                    &format!(
                        "scheduled query {}",
                        record.display_name.as_deref().unwrap_or(&record.name)
                    ),
                    &e,
                ),
            }
        }

        tracing::info!("Imported {} scheduled queries", imported);
        Ok(())
    }
}
