//! Property-based tests using proptest
//!
//! Object naming must round-trip for every valid BigQuery id, and project
//! qualifier stripping must only ever touch the source project.

use bqshift::resource::paths::{parse_record_object, record_object, table_data_uri};
use bqshift::resource::sql::{referenced_projects, strip_project_prefix};
use bqshift::resource::Component;
use proptest::prelude::*;

/// Dataset, table and routine ids: letters, digits, underscores
fn arb_id() -> impl Strategy<Value = String> {
    "[A-Za-z_][A-Za-z0-9_]{0,40}"
}

/// Project ids: lowercase letters, digits, hyphens
fn arb_project() -> impl Strategy<Value = String> {
    "[a-z][a-z0-9-]{4,28}[a-z0-9]"
}

fn arb_component() -> impl Strategy<Value = Component> {
    prop::sample::select(Component::ALL.to_vec())
}

proptest! {
    #[test]
    fn record_object_round_trips(component in arb_component(), scope in arb_id(), name in arb_id()) {
        let object = record_object(component, &scope, &name);
        prop_assert_eq!(parse_record_object(component, &object), Some((scope, name)));
    }

    #[test]
    fn record_object_belongs_to_one_component(
        component in arb_component(),
        other in arb_component(),
        scope in arb_id(),
        name in arb_id(),
    ) {
        prop_assume!(component != other);
        let object = record_object(component, &scope, &name);
        prop_assert_eq!(parse_record_object(other, &object), None);
    }

    #[test]
    fn table_data_is_not_a_record(dataset in arb_id(), table in arb_id(), shard in 0u32..1000) {
        let uri = table_data_uri("bkt", &dataset, &table);
        let shard_object = uri
            .trim_start_matches("gs://bkt/")
            .replace('*', &format!("{:012}", shard));
        prop_assert_eq!(parse_record_object(Component::Tables, &shard_object), None);
    }
}

mod sql_tests {
    use super::*;

    proptest! {
        #[test]
        fn stripping_removes_every_source_reference(
            project in arb_project(),
            dataset in arb_id(),
            table in arb_id(),
        ) {
            let sql = format!(
                "SELECT * FROM `{p}.{d}.{t}` JOIN {p}.{d}.{t} USING (id)",
                p = project, d = dataset, t = table
            );
            let stripped = strip_project_prefix(&sql, &project);

            prop_assert_eq!(
                stripped,
                format!("SELECT * FROM `{d}.{t}` JOIN {d}.{t} USING (id)", d = dataset, t = table)
            );
        }

        #[test]
        fn stripping_keeps_other_projects(
            project in arb_project(),
            other in arb_project(),
            dataset in arb_id(),
            table in arb_id(),
        ) {
            prop_assume!(!other.ends_with(&project) && dataset != project);
            let sql = format!("SELECT * FROM `{}.{}.{}`", other, dataset, table);
            let stripped = strip_project_prefix(&sql, &project);

            prop_assert_eq!(&stripped, &sql);
            prop_assert!(referenced_projects(&stripped).contains(&other));
        }

        #[test]
        fn text_without_the_project_is_untouched(project in arb_project(), sql in "[ -~]{0,200}") {
            prop_assume!(!sql.contains(&project));
            prop_assert_eq!(strip_project_prefix(&sql, &project), sql);
        }
    }
}
