//! In-memory catalog fake for tests.
//!
//! `FakeDatabase` answers the catalog queries from [`crate::sql`] and
//! applies the DDL this crate generates to its own catalog, so a mutation is
//! visible to the next introspection just like on a real server. Every
//! `execute` call is recorded in order, failed ones included.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;

use pgsource_core::{CredentialRef, ObjectMeta, Pipeline, PipelineSpec, SinkRef, TableSpec};

use crate::db::{Database, Row};
use crate::error::{SchemaError, SchemaResult};
use crate::sql;

pub const TEST_NAMESPACE: &str = "default";
pub const TEST_NAME: &str = "pg";
pub const TEST_UID: &str = "0f3a2c9e-0000-4000-8000-000000000001";

/// A stored pipeline as the reconciler would see it: uid assigned, generation 1.
pub fn test_pipeline(tables: &[&str]) -> Pipeline {
    let mut metadata = ObjectMeta::new(TEST_NAMESPACE, TEST_NAME);
    metadata.uid = TEST_UID.to_string();
    metadata.generation = 1;
    Pipeline {
        metadata,
        spec: PipelineSpec {
            tables: tables.iter().map(|t| TableSpec::new(t)).collect(),
            credentials: CredentialRef {
                secret: "pg-creds".to_string(),
            },
            sink: SinkRef::Uri {
                uri: "http://event-display.default.svc".to_string(),
            },
        },
        status: Default::default(),
    }
}

#[derive(Default)]
struct Catalog {
    functions: BTreeSet<String>,
    tables: BTreeSet<String>,
    /// (table, trigger) -> firing events
    triggers: BTreeMap<(String, String), Vec<String>>,
    executed: Vec<String>,
    query_failure: Option<SchemaError>,
    statement_failures: Vec<(String, SchemaError)>,
}

#[derive(Default)]
pub struct FakeDatabase {
    catalog: Mutex<Catalog>,
}

fn statement_error(code: &str, message: String) -> SchemaError {
    SchemaError::Statement {
        code: Some(code.to_string()),
        message,
    }
}

/// First identifier in `s`, stopping at whitespace, `(`, or `;`.
fn ident(s: &str) -> String {
    s.trim_start()
        .chars()
        .take_while(|c| !c.is_whitespace() && *c != '(' && *c != ';')
        .collect()
}

impl FakeDatabase {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Catalog> {
        self.catalog.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn add_function(&self, name: &str) {
        self.lock().functions.insert(name.to_string());
    }

    pub fn add_table(&self, table: &str) {
        self.lock().tables.insert(table.to_string());
    }

    pub fn remove_table(&self, table: &str) {
        let mut c = self.lock();
        c.tables.remove(table);
        c.triggers.retain(|(t, _), _| t != table);
    }

    /// Add firing events to a trigger, creating it if needed.
    pub fn add_trigger_actions(&self, table: &str, name: &str, actions: &[&str]) {
        let mut c = self.lock();
        let entry = c
            .triggers
            .entry((table.to_string(), name.to_string()))
            .or_default();
        entry.extend(actions.iter().map(|a| a.to_string()));
    }

    pub fn has_function(&self, name: &str) -> bool {
        self.lock().functions.contains(name)
    }

    pub fn trigger_actions(&self, table: &str, name: &str) -> Vec<String> {
        self.lock()
            .triggers
            .get(&(table.to_string(), name.to_string()))
            .cloned()
            .unwrap_or_default()
    }

    pub fn has_trigger(&self, table: &str, name: &str) -> bool {
        !self.trigger_actions(table, name).is_empty()
    }

    /// Every statement passed to `execute`, in order.
    pub fn executed(&self) -> Vec<String> {
        self.lock().executed.clone()
    }

    pub fn clear_executed(&self) {
        self.lock().executed.clear();
    }

    /// Fail every catalog query with `err`.
    pub fn fail_queries(&self, err: SchemaError) {
        self.lock().query_failure = Some(err);
    }

    /// Fail every executed statement containing `pattern` with `err`.
    pub fn fail_statements_containing(&self, pattern: &str, err: SchemaError) {
        self.lock()
            .statement_failures
            .push((pattern.to_string(), err));
    }

    pub fn clear_failures(&self) {
        let mut c = self.lock();
        c.query_failure = None;
        c.statement_failures.clear();
    }

    fn apply(c: &mut Catalog, statement: &str) -> SchemaResult<()> {
        let s = statement.trim_start();
        if let Some(rest) = s.strip_prefix("CREATE OR REPLACE FUNCTION ") {
            c.functions.insert(ident(rest));
        } else if let Some(rest) = s.strip_prefix("CREATE TRIGGER ") {
            let name = ident(rest);
            let table = rest
                .split_once(" ON ")
                .map(|(_, t)| ident(t))
                .unwrap_or_default();
            if !c.tables.contains(&table) {
                return Err(statement_error(
                    "42P01",
                    format!("relation \"{table}\" does not exist"),
                ));
            }
            let key = (table.clone(), name.clone());
            if c.triggers.get(&key).is_some_and(|a| !a.is_empty()) {
                return Err(statement_error(
                    "42710",
                    format!("trigger \"{name}\" for relation \"{table}\" already exists"),
                ));
            }
            c.triggers.insert(
                key,
                vec!["INSERT".into(), "UPDATE".into(), "DELETE".into()],
            );
        } else if let Some(rest) = s.strip_prefix("DROP TRIGGER IF EXISTS ") {
            let name = ident(rest);
            let table = rest
                .split_once(" ON ")
                .map(|(_, t)| ident(t))
                .unwrap_or_default();
            if !c.tables.contains(&table) {
                return Err(statement_error(
                    "42P01",
                    format!("relation \"{table}\" does not exist"),
                ));
            }
            c.triggers.remove(&(table, name));
        } else if let Some(rest) = s.strip_prefix("DROP FUNCTION IF EXISTS ") {
            c.functions.remove(&ident(rest));
        }
        Ok(())
    }
}

#[async_trait]
impl Database for FakeDatabase {
    async fn query(&self, query: &str, params: &[&str]) -> SchemaResult<Vec<Row>> {
        let c = self.lock();
        if let Some(err) = &c.query_failure {
            return Err(err.clone());
        }
        let param = |i: usize| params.get(i).copied().unwrap_or_default();

        let rows = if query == sql::FUNCTION_QUERY {
            c.functions
                .iter()
                .filter(|f| f.as_str() == param(0))
                .map(|f| vec![f.clone()])
                .collect()
        } else if query == sql::TABLE_QUERY {
            c.tables
                .iter()
                .filter(|t| t.as_str() == param(0))
                .map(|t| vec![t.clone()])
                .collect()
        } else if query == sql::TRIGGERS_QUERY {
            let key = (param(0).to_string(), param(1).to_string());
            c.triggers
                .get(&key)
                .into_iter()
                .flatten()
                .map(|action| vec![key.1.clone(), action.clone(), key.0.clone()])
                .collect()
        } else if query == sql::TRIGGER_TABLES_QUERY {
            let tables: BTreeSet<&String> = c
                .triggers
                .keys()
                .filter(|(_, trigger)| trigger.as_str() == param(0))
                .map(|(table, _)| table)
                .collect();
            tables.into_iter().map(|t| vec![t.clone()]).collect()
        } else {
            return Err(statement_error(
                "42601",
                format!("unrecognized query: {query}"),
            ));
        };
        Ok(rows)
    }

    async fn execute(&self, statement: &str) -> SchemaResult<()> {
        let mut c = self.lock();
        c.executed.push(statement.to_string());
        if let Some((_, err)) = c
            .statement_failures
            .iter()
            .find(|(pattern, _)| statement.contains(pattern.as_str()))
        {
            return Err(err.clone());
        }
        Self::apply(&mut c, statement)
    }
}
