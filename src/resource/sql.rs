//! Project qualifiers in SQL text

use regex::Regex;
use std::collections::BTreeSet;
use std::sync::OnceLock;

/// `` `project.dataset.table` `` style references
static QUALIFIED_REFERENCE: OnceLock<Regex> = OnceLock::new();

fn qualified_reference() -> &'static Regex {
    QUALIFIED_REFERENCE.get_or_init(|| {
        Regex::new(r"`([^`]+)\.\w+\.\w+`").unwrap_or_else(|e| panic!("invalid reference pattern: {}", e))
    })
}

/// Remove `<project>.` qualifiers so the SQL resolves in whatever project it
/// is created in. Identifiers that merely end with the project id, including
/// the id part of another domain-scoped project, are left alone.
pub fn strip_project_prefix(sql: &str, project_id: &str) -> String {
    if project_id.is_empty() {
        return sql.to_string();
    }

    let pattern = format!(r"(^|[^A-Za-z0-9_.:-]){}\.", regex::escape(project_id));
    match Regex::new(&pattern) {
        Ok(re) => re.replace_all(sql, "${1}").into_owned(),
        Err(_) => sql.to_string(),
    }
}

/// Projects still referenced by fully qualified names
pub fn referenced_projects(sql: &str) -> BTreeSet<String> {
    qualified_reference()
        .captures_iter(sql)
        .filter_map(|c| c.get(1))
        .map(|m| m.as_str().to_string())
        .collect()
}

/// Warn about projects that must exist before `what` can be created
pub fn warn_external_references(what: &str, sql: &str) {
    let projects = referenced_projects(sql);
    if !projects.is_empty() {
        let list = projects.into_iter().collect::<Vec<_>>().join(", ");
        tracing::warn!(
            "Projects used in {}: {}. Ensure these projects are created first.",
            what,
            list
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_project_prefix() {
        let sql = "SELECT * FROM `p1.sales.orders` JOIN p1.sales.items USING (id)";
        assert_eq!(
            strip_project_prefix(sql, "p1"),
            "SELECT * FROM `sales.orders` JOIN sales.items USING (id)"
        );
    }

    #[test]
    fn test_strip_leaves_longer_identifiers() {
        let sql = "SELECT * FROM `otherp1.sales.orders`";
        assert_eq!(strip_project_prefix(sql, "p1"), sql);
    }

    #[test]
    fn test_strip_domain_scoped_project() {
        let sql = "SELECT * FROM `example.com:my-proj.sales.orders`";
        assert_eq!(
            strip_project_prefix(sql, "example.com:my-proj"),
            "SELECT * FROM `sales.orders`"
        );
        assert_eq!(strip_project_prefix(sql, "my-proj"), sql);
        assert_eq!(
            referenced_projects(sql).into_iter().collect::<Vec<_>>(),
            vec!["example.com:my-proj".to_string()]
        );
    }

    #[test]
    fn test_referenced_projects() {
        let sql = "SELECT * FROM `ext-a.ds.t` a JOIN `ext-b.ds.t2` b ON TRUE JOIN `ds.local` c ON TRUE";
        let projects: Vec<_> = referenced_projects(sql).into_iter().collect();
        assert_eq!(projects, vec!["ext-a".to_string(), "ext-b".to_string()]);
    }

    #[test]
    fn test_stripped_sql_has_no_self_reference() {
        let sql = "SELECT 1 FROM `my-proj.ds.t`";
        let stripped = strip_project_prefix(sql, "my-proj");
        assert!(referenced_projects(&stripped).is_empty());
    }
}
