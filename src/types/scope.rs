use serde::Serialize;

/// The slice of tenant-partitioned rows a caller may observe.
///
/// Every tenant-scoped query is built through [`crate::store::Query::scoped`],
/// which turns the scope into a predicate on the table's `institution_id`
/// column. `All` is the only variant that adds no predicate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", content = "institution_id", rename_all = "snake_case")]
pub enum TenantScope {
    All,
    Institution(i64),
    Unassigned,
}

impl TenantScope {
    /// The institution new rows should be attributed to.
    #[must_use]
    pub fn institution_id(&self) -> Option<i64> {
        match self {
            TenantScope::Institution(id) => Some(*id),
            TenantScope::All | TenantScope::Unassigned => None,
        }
    }

    /// Whether a row owned by `institution_id` is visible under this scope.
    #[must_use]
    pub fn permits(&self, institution_id: Option<i64>) -> bool {
        match self {
            TenantScope::All => true,
            TenantScope::Institution(id) => institution_id == Some(*id),
            TenantScope::Unassigned => institution_id.is_none(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_institution_scope_only_permits_own_rows() {
        let scope = TenantScope::Institution(7);
        assert!(scope.permits(Some(7)));
        assert!(!scope.permits(Some(9)));
        assert!(!scope.permits(None));
    }

    #[test]
    fn test_unassigned_scope_only_permits_ungrouped_rows() {
        assert!(TenantScope::Unassigned.permits(None));
        assert!(!TenantScope::Unassigned.permits(Some(1)));
        assert_eq!(TenantScope::Unassigned.institution_id(), None);
    }
}
