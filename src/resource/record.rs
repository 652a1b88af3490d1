//! Helpers shared by the serialized record types

use crate::gcp::bigquery::{str_at, value_at};
use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

/// Render a BigQuery millisecond epoch string as RFC 3339
pub fn api_timestamp(item: &Value, key: &str) -> Option<String> {
    let raw = str_at(item, key)?;
    let millis: i64 = raw.parse().ok()?;
    DateTime::<Utc>::from_timestamp_millis(millis).map(|t| t.to_rfc3339())
}

/// Optional string field
pub fn opt_string(item: &Value, path: &str) -> Option<String> {
    str_at(item, path).map(|s| s.to_string())
}

/// Optional non-null value, cloned
pub fn opt_value(item: &Value, path: &str) -> Option<Value> {
    value_at(item, path).filter(|v| !v.is_null()).cloned()
}

/// `schema.fields` of a table resource
pub fn schema_fields(table: &Value) -> Vec<Value> {
    value_at(table, "schema.fields")
        .and_then(|v| v.as_array())
        .cloned()
        .unwrap_or_default()
}

/// Drop `null` members of a request body object
pub fn without_nulls(value: Value) -> Value {
    match value {
        Value::Object(map) => Value::Object(
            map.into_iter()
                .filter(|(_, v)| !v.is_null())
                .collect::<Map<String, Value>>(),
        ),
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_api_timestamp() {
        let item = json!({"creationTime": "1700000000000"});
        assert_eq!(
            api_timestamp(&item, "creationTime").as_deref(),
            Some("2023-11-14T22:13:20+00:00")
        );
        assert_eq!(api_timestamp(&item, "lastModifiedTime"), None);
        assert_eq!(api_timestamp(&json!({"creationTime": "soon"}), "creationTime"), None);
    }

    #[test]
    fn test_without_nulls() {
        let body = without_nulls(json!({"a": 1, "b": null, "c": {"d": null}}));
        assert_eq!(body, json!({"a": 1, "c": {"d": null}}));
    }

    #[test]
    fn test_schema_fields() {
        let table = json!({"schema": {"fields": [{"name": "id", "type": "INT64"}]}});
        assert_eq!(schema_fields(&table).len(), 1);
        assert!(schema_fields(&json!({})).is_empty());
    }
}
