//! Data scope for roles that are exempt from tenant membership.
//!
//! A guardian is not a member of any school; what they may see is bounded by
//! the students they are linked to. Reads are still tenant queries, bound to
//! the linked student's tenant and narrowed to the linked student ids.

use serde::Serialize;

use super::error::TenantError;
use super::model::GuardianLink;
use super::query::TenantQuery;

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GuardianScope {
    pub user_id: String,
    pub links: Vec<GuardianLink>,
}

/// Column naming the student on a table. `students` is keyed by `id`.
pub fn student_column_for(table: &str) -> &'static str {
    if table == "students" {
        "id"
    } else {
        "student_id"
    }
}

impl GuardianScope {
    pub fn new(user_id: &str, links: Vec<GuardianLink>) -> Result<Self, TenantError> {
        if links.is_empty() {
            return Err(TenantError::access_denied("guardian has no linked students"));
        }
        Ok(Self {
            user_id: user_id.to_string(),
            links,
        })
    }

    pub fn students_in(&self, tenant_id: &str) -> Vec<&str> {
        self.links
            .iter()
            .filter(|l| l.tenant_id == tenant_id)
            .map(|l| l.student_id.as_str())
            .collect()
    }

    pub fn covers(&self, tenant_id: &str, student_id: &str) -> bool {
        self.links
            .iter()
            .any(|l| l.tenant_id == tenant_id && l.student_id == student_id)
    }

    pub fn ensure_covers(&self, tenant_id: &str, student_id: &str) -> Result<(), TenantError> {
        if self.covers(tenant_id, student_id) {
            Ok(())
        } else {
            Err(TenantError::access_denied(format!(
                "student {student_id} is not linked to this guardian"
            )))
        }
    }

    /// Read query restricted to this guardian's students within `tenant_id`.
    pub fn select(&self, tenant_id: &str, table: &str, columns: &str) -> Result<TenantQuery, TenantError> {
        let students = self.students_in(tenant_id);
        if students.is_empty() {
            return Err(TenantError::access_denied(
                "guardian has no linked students in this school",
            ));
        }
        TenantQuery::new(tenant_id, table)
            .and_then(|q| q.select(columns))
            .and_then(|q| q.in_list(student_column_for(table), students.iter().map(|s| s.to_string())))
            .map_err(|e| TenantError::access_denied(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tenant::query::Filter;
    use serde_json::json;

    fn scope() -> GuardianScope {
        GuardianScope::new(
            "parent-1",
            vec![
                GuardianLink {
                    student_id: "s1".into(),
                    tenant_id: "school-a".into(),
                },
                GuardianLink {
                    student_id: "s9".into(),
                    tenant_id: "school-b".into(),
                },
            ],
        )
        .expect("scope")
    }

    #[test]
    fn guardian_without_links_is_denied() {
        let err = GuardianScope::new("parent-1", Vec::new()).expect_err("no links");
        assert_eq!(err.code(), "access_denied");
    }

    #[test]
    fn select_is_tenant_bound_and_narrowed_to_linked_students() {
        let q = scope().select("school-a", "student_fees", "*").expect("query");
        assert!(q.is_tenant_scoped());
        assert_eq!(
            q.filters()[1],
            Filter::In {
                column: "student_id".into(),
                values: vec![json!("s1")],
            }
        );
        let q = scope().select("school-a", "students", "*").expect("query");
        assert!(matches!(&q.filters()[1], Filter::In { column, .. } if column == "id"));
    }

    #[test]
    fn school_without_linked_student_is_denied() {
        assert!(scope().select("school-c", "students", "*").is_err());
        assert!(scope().ensure_covers("school-a", "s9").is_err());
        assert!(scope().ensure_covers("school-b", "s9").is_ok());
    }
}
