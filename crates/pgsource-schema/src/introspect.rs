//! Read-only catalog checks.
//!
//! Zero rows always means "does not exist" and is not an error; only
//! connectivity, permission, or row-shape failures are.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::db::{Database, Row};
use crate::error::{SchemaError, SchemaResult};
use crate::sql;

/// Which of the three row events a named trigger fires on.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TriggerCoverage {
    pub insert: bool,
    pub update: bool,
    pub delete: bool,
}

impl TriggerCoverage {
    /// All of INSERT, UPDATE, and DELETE are covered.
    pub fn exists(&self) -> bool {
        self.insert && self.update && self.delete
    }

    /// Some but not all events are covered.
    pub fn is_partial(&self) -> bool {
        (self.insert || self.update || self.delete) && !self.exists()
    }
}

#[derive(Clone)]
pub struct SchemaIntrospector {
    db: Arc<dyn Database>,
}

fn column<'r>(row: &'r Row, index: usize, query: &str) -> SchemaResult<&'r str> {
    row.get(index)
        .map(String::as_str)
        .ok_or_else(|| SchemaError::Decode(format!("{query}: missing column {index}")))
}

impl SchemaIntrospector {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self { db }
    }

    /// A function with exactly this name exists.
    pub async fn function_exists(&self, name: &str) -> SchemaResult<bool> {
        let rows = self.db.query(sql::FUNCTION_QUERY, &[name]).await?;
        for row in &rows {
            if column(row, 0, "function")? == name {
                debug!(function = %name, "found existing function");
                return Ok(true);
            }
        }
        Ok(false)
    }

    /// Classify the firing events of trigger `name` on `table`.
    ///
    /// Events other than INSERT/UPDATE/DELETE (e.g. TRUNCATE) are logged and
    /// ignored; they neither fail the call nor count toward coverage.
    pub async fn trigger_coverage(&self, table: &str, name: &str) -> SchemaResult<TriggerCoverage> {
        let rows = self.db.query(sql::TRIGGERS_QUERY, &[table, name]).await?;
        let mut coverage = TriggerCoverage::default();
        for row in &rows {
            let trigger = column(row, 0, "trigger")?;
            let action = column(row, 1, "trigger")?;
            let on_table = column(row, 2, "trigger")?;
            match action {
                "INSERT" => coverage.insert = true,
                "UPDATE" => coverage.update = true,
                "DELETE" => coverage.delete = true,
                other => {
                    warn!(%trigger, table = %on_table, action = %other, "ignoring unknown trigger action");
                }
            }
        }
        debug!(%table, trigger = %name, ?coverage, "trigger coverage");
        Ok(coverage)
    }

    /// Every table that carries a trigger named `name`, sorted.
    pub async fn trigger_tables(&self, name: &str) -> SchemaResult<Vec<String>> {
        let rows = self.db.query(sql::TRIGGER_TABLES_QUERY, &[name]).await?;
        rows.iter()
            .map(|row| column(row, 0, "trigger table").map(str::to_string))
            .collect()
    }

    /// A user table with exactly this name exists.
    pub async fn table_exists(&self, table: &str) -> SchemaResult<bool> {
        let rows = self.db.query(sql::TABLE_QUERY, &[table]).await?;
        for row in &rows {
            if column(row, 0, "table")? == table {
                return Ok(true);
            }
        }
        Ok(false)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::FakeDatabase;

    const NAME: &str = "postgressource_pg_0f3a2c9e_0000_4000_8000_000000000001";

    fn introspector(db: &Arc<FakeDatabase>) -> SchemaIntrospector {
        SchemaIntrospector::new(db.clone())
    }

    #[tokio::test]
    async fn function_exists_exact_match_only() {
        let db = Arc::new(FakeDatabase::new());
        db.add_function(&format!("{NAME}_v2"));
        let i = introspector(&db);
        assert!(!i.function_exists(NAME).await.unwrap());

        db.add_function(NAME);
        assert!(i.function_exists(NAME).await.unwrap());
    }

    #[tokio::test]
    async fn coverage_requires_all_three_actions() {
        let db = Arc::new(FakeDatabase::new());
        db.add_table("orders");
        db.add_trigger_actions("orders", NAME, &["INSERT", "UPDATE"]);
        let i = introspector(&db);

        let c = i.trigger_coverage("orders", NAME).await.unwrap();
        assert!(c.insert && c.update && !c.delete);
        assert!(!c.exists());
        assert!(c.is_partial());

        db.add_trigger_actions("orders", NAME, &["DELETE"]);
        assert!(i.trigger_coverage("orders", NAME).await.unwrap().exists());
    }

    #[tokio::test]
    async fn coverage_ignores_unknown_actions() {
        let db = Arc::new(FakeDatabase::new());
        db.add_table("orders");
        db.add_trigger_actions("orders", NAME, &["INSERT", "UPDATE", "DELETE", "TRUNCATE"]);
        let c = introspector(&db).trigger_coverage("orders", NAME).await.unwrap();
        assert!(c.exists());
    }

    #[tokio::test]
    async fn coverage_scoped_to_table() {
        let db = Arc::new(FakeDatabase::new());
        db.add_table("orders");
        db.add_table("users");
        db.add_trigger_actions("orders", NAME, &["INSERT", "UPDATE", "DELETE"]);
        let c = introspector(&db).trigger_coverage("users", NAME).await.unwrap();
        assert_eq!(c, TriggerCoverage::default());
    }

    #[tokio::test]
    async fn trigger_tables_lists_every_table_with_the_name() {
        let db = Arc::new(FakeDatabase::new());
        db.add_trigger_actions("users", NAME, &["INSERT", "UPDATE", "DELETE"]);
        db.add_trigger_actions("orders", NAME, &["INSERT"]);
        db.add_trigger_actions("audit", "other_trigger", &["INSERT"]);
        let tables = introspector(&db).trigger_tables(NAME).await.unwrap();
        assert_eq!(tables, vec!["orders".to_string(), "users".to_string()]);
    }

    #[tokio::test]
    async fn missing_table_is_not_an_error() {
        let db = Arc::new(FakeDatabase::new());
        db.add_table("orders_archive");
        let i = introspector(&db);
        assert!(!i.table_exists("orders").await.unwrap());
        assert!(i.table_exists("orders_archive").await.unwrap());
    }

    #[tokio::test]
    async fn connectivity_failure_is_an_error() {
        let db = Arc::new(FakeDatabase::new());
        db.fail_queries(SchemaError::Unavailable("connection refused".to_string()));
        let err = introspector(&db).table_exists("orders").await.unwrap_err();
        assert!(err.is_transient());
    }
}
