//! Deterministic object names
//!
//! `<component>/<scope>.<name>.json`, where the scope is the dataset id (or
//! the location for scheduled queries). BigQuery ids never contain `.`, so
//! the first `.` of the file stem separates scope and name.

use super::Component;

const RECORD_SUFFIX: &str = ".json";

pub fn record_object(component: Component, scope: &str, name: &str) -> String {
    format!("{}/{}.{}{}", component.as_str(), scope, name, RECORD_SUFFIX)
}

/// Prefix shared by every record of one scope
pub fn scope_prefix(component: Component, scope: &str) -> String {
    format!("{}/{}.", component.as_str(), scope)
}

/// Prefix shared by every record of one component
pub fn component_prefix(component: Component) -> String {
    format!("{}/", component.as_str())
}

/// Split a record object name back into `(scope, name)`
pub fn parse_record_object(component: Component, object: &str) -> Option<(String, String)> {
    let stem = object
        .strip_prefix(&component_prefix(component))?
        .strip_suffix(RECORD_SUFFIX)?;
    if stem.contains('/') {
        return None;
    }
    let (scope, name) = stem.split_once('.')?;
    if scope.is_empty() || name.is_empty() {
        return None;
    }
    Some((scope.to_string(), name.to_string()))
}

/// Folder holding the parquet shards of a table
pub fn table_data_prefix(dataset_id: &str, table_id: &str) -> String {
    format!("{}{}.{}/", component_prefix(Component::Tables), dataset_id, table_id)
}

/// Wildcard URI used by the extract and load jobs
pub fn table_data_uri(bucket: &str, dataset_id: &str, table_id: &str) -> String {
    format!(
        "gs://{}/{}*.parquet",
        bucket,
        table_data_prefix(dataset_id, table_id)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_object_layout() {
        assert_eq!(
            record_object(Component::Tables, "sales", "orders"),
            "tables/sales.orders.json"
        );
        assert_eq!(
            record_object(Component::ScheduledQueries, "eu", "6581a3f0-0000"),
            "scheduled_queries/eu.6581a3f0-0000.json"
        );
    }

    #[test]
    fn test_parse_record_object() {
        assert_eq!(
            parse_record_object(Component::Views, "views/sales.daily.json"),
            Some(("sales".to_string(), "daily".to_string()))
        );
        // wrong component
        assert_eq!(parse_record_object(Component::Tables, "views/sales.daily.json"), None);
        // parquet shards live in a sub-folder
        assert_eq!(
            parse_record_object(Component::Tables, "tables/sales.orders/000000000000.parquet"),
            None
        );
        assert_eq!(parse_record_object(Component::Tables, "tables/sales.json"), None);
    }

    #[test]
    fn test_table_data_uri() {
        assert_eq!(
            table_data_uri("bkt", "sales", "orders"),
            "gs://bkt/tables/sales.orders/*.parquet"
        );
    }
}
