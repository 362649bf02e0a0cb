use rusqlite::types::Value;

use crate::types::TenantScope;

/// Composes a SELECT with optional filters into one statement.
///
/// Clauses use anonymous `?` placeholders; values are bound in the order the
/// clauses were added.
#[derive(Debug, Clone)]
pub struct Query {
    base: String,
    clauses: Vec<String>,
    params: Vec<Value>,
    order_by: Option<String>,
    limit: Option<i64>,
}

impl Query {
    #[must_use]
    pub fn select(base: impl Into<String>) -> Self {
        Self {
            base: base.into(),
            clauses: Vec::new(),
            params: Vec::new(),
            order_by: None,
            limit: None,
        }
    }

    /// Adds `clause`, which must contain exactly one `?`.
    #[must_use]
    pub fn filter(mut self, clause: &str, value: impl Into<Value>) -> Self {
        self.clauses.push(clause.to_string());
        self.params.push(value.into());
        self
    }

    #[must_use]
    pub fn filter_opt<V: Into<Value>>(self, clause: &str, value: Option<V>) -> Self {
        match value {
            Some(v) => self.filter(clause, v),
            None => self,
        }
    }

    /// Adds a clause with no bound value.
    #[must_use]
    pub fn raw(mut self, clause: &str) -> Self {
        self.clauses.push(clause.to_string());
        self
    }

    /// Restricts rows to the caller's tenant via `column`.
    #[must_use]
    pub fn scoped(self, column: &str, scope: &TenantScope) -> Self {
        match scope {
            TenantScope::All => self,
            TenantScope::Institution(id) => self.filter(&format!("{column} = ?"), *id),
            TenantScope::Unassigned => self.raw(&format!("{column} IS NULL")),
        }
    }

    #[must_use]
    pub fn order_by(mut self, order: &str) -> Self {
        self.order_by = Some(order.to_string());
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: i64) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn build(self) -> (String, Vec<Value>) {
        let mut sql = self.base;
        let mut params = self.params;

        if !self.clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&self.clauses.join(" AND "));
        }
        if let Some(order) = self.order_by {
            sql.push_str(" ORDER BY ");
            sql.push_str(&order);
        }
        if let Some(limit) = self.limit {
            sql.push_str(" LIMIT ?");
            params.push(Value::Integer(limit));
        }

        (sql, params)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_plain_select() {
        let (sql, params) = Query::select("SELECT * FROM students").build();
        assert_eq!(sql, "SELECT * FROM students");
        assert!(params.is_empty());
    }

    #[test]
    fn test_scope_applies_without_other_filters() {
        let (sql, params) = Query::select("SELECT * FROM students")
            .scoped("institution_id", &TenantScope::Institution(7))
            .build();
        assert_eq!(sql, "SELECT * FROM students WHERE institution_id = ?");
        assert_eq!(params, vec![Value::Integer(7)]);
    }

    #[test]
    fn test_unassigned_scope() {
        let (sql, params) = Query::select("SELECT * FROM classes")
            .filter("status = ?", "active".to_string())
            .scoped("institution_id", &TenantScope::Unassigned)
            .build();
        assert_eq!(sql, "SELECT * FROM classes WHERE status = ? AND institution_id IS NULL");
        assert_eq!(params, vec![Value::Text("active".into())]);
    }

    #[test]
    fn test_optional_filters_order_and_limit() {
        let (sql, params) = Query::select("SELECT * FROM attendance")
            .filter_opt("date = ?", Some("2025-01-10".to_string()))
            .filter_opt::<String>("department = ?", None)
            .scoped("institution_id", &TenantScope::Institution(3))
            .order_by("date DESC, time DESC")
            .limit(50)
            .build();
        assert_eq!(
            sql,
            "SELECT * FROM attendance WHERE date = ? AND institution_id = ? \
             ORDER BY date DESC, time DESC LIMIT ?"
        );
        assert_eq!(
            params,
            vec![
                Value::Text("2025-01-10".into()),
                Value::Integer(3),
                Value::Integer(50)
            ]
        );
    }
}
