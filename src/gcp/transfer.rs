//! BigQuery Data Transfer API calls (scheduled queries)

use super::client::{with_query, GcpClient};
use anyhow::{Context, Result};
use serde_json::Value;

/// Data source id of scheduled queries
pub const SCHEDULED_QUERY_SOURCE: &str = "scheduled_query";

/// List the scheduled query transfer configs of one location
pub async fn list_scheduled_queries(client: &GcpClient, location: &str) -> Result<Vec<Value>> {
    let url = with_query(
        &client.datatransfer_location_url(location, "transferConfigs"),
        &[("dataSourceIds", SCHEDULED_QUERY_SOURCE)],
    );

    let configs = client
        .list_all(&url, "transferConfigs")
        .await
        .with_context(|| format!("Failed to list transfer configs in {}", location))?;

    // The filter is applied client side as well, some locations ignore it
    Ok(configs
        .into_iter()
        .filter(|c| c.get("dataSourceId").and_then(|v| v.as_str()) == Some(SCHEDULED_QUERY_SOURCE))
        .collect())
}

pub async fn create_transfer_config(client: &GcpClient, location: &str, config: &Value) -> Result<Value> {
    let url = client.datatransfer_location_url(location, "transferConfigs");
    client.post(&url, Some(config)).await
}
