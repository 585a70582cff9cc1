//! Guarded creation and idempotent removal of CDC objects.
//!
//! `ensure_*` checks the catalog first and executes DDL only when the object
//! is missing. The function body is never compared against the current
//! template: once a function with the pipeline's name exists it is left
//! alone, even if the template has changed since it was created.

use std::sync::Arc;

use tracing::{debug, info, warn};

use pgsource_core::Pipeline;

use crate::db::Database;
use crate::error::SchemaResult;
use crate::introspect::SchemaIntrospector;
use crate::sql;

#[derive(Clone)]
pub struct SchemaMutator {
    db: Arc<dyn Database>,
    introspector: SchemaIntrospector,
}

impl SchemaMutator {
    pub fn new(db: Arc<dyn Database>) -> Self {
        Self {
            introspector: SchemaIntrospector::new(db.clone()),
            db,
        }
    }

    pub fn introspector(&self) -> &SchemaIntrospector {
        &self.introspector
    }

    /// Create the pipeline's notify function unless it exists.
    /// Returns whether DDL was executed.
    pub async fn ensure_function(&self, pipeline: &Pipeline) -> SchemaResult<bool> {
        let name = pipeline.postgres_name();
        if self.introspector.function_exists(&name).await? {
            return Ok(false);
        }

        let ddl = sql::create_function(&name)?;
        if let Err(e) = self.db.execute(&ddl).await {
            warn!(function = %name, error = %e, "failed to create function");
            return Err(e);
        }
        info!(function = %name, key = %pipeline.key(), "created notify function");
        Ok(true)
    }

    /// Create the pipeline's trigger on `table` unless it covers INSERT,
    /// UPDATE, and DELETE already. Returns whether DDL was executed.
    ///
    /// A trigger with the right name but partial coverage is dropped first,
    /// since `CREATE TRIGGER` refuses a name already present on the table.
    pub async fn ensure_trigger(&self, pipeline: &Pipeline, table: &str) -> SchemaResult<bool> {
        let name = pipeline.postgres_name();
        let coverage = self.introspector.trigger_coverage(table, &name).await?;
        if coverage.exists() {
            debug!(%table, trigger = %name, "found existing trigger");
            return Ok(false);
        }

        let ddl = sql::create_trigger(&name, table)?;
        if coverage.is_partial() {
            warn!(%table, trigger = %name, ?coverage, "replacing trigger with partial coverage");
            self.db.execute(&sql::drop_trigger(&name, table)?).await?;
        }
        if let Err(e) = self.db.execute(&ddl).await {
            warn!(%table, trigger = %name, error = %e, "failed to create trigger");
            return Err(e);
        }
        info!(%table, trigger = %name, "created trigger");
        Ok(true)
    }

    /// Drop the pipeline's trigger on `table`. A missing trigger or table is success.
    pub async fn drop_trigger(&self, pipeline: &Pipeline, table: &str) -> SchemaResult<()> {
        let name = pipeline.postgres_name();
        match self.db.execute(&sql::drop_trigger(&name, table)?).await {
            Ok(()) => {
                info!(%table, trigger = %name, "dropped trigger");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(%table, trigger = %name, "trigger already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    /// Drop the pipeline's triggers on tables no longer in its spec and
    /// return those tables. Stops at the first failing drop.
    pub async fn drop_stale_triggers(&self, pipeline: &Pipeline) -> SchemaResult<Vec<String>> {
        let name = pipeline.postgres_name();
        let stale: Vec<String> = self
            .introspector
            .trigger_tables(&name)
            .await?
            .into_iter()
            .filter(|table| !pipeline.spec.tables.iter().any(|t| &t.name == table))
            .collect();
        for table in &stale {
            self.drop_trigger(pipeline, table).await?;
        }
        if !stale.is_empty() {
            info!(trigger = %name, tables = ?stale, "dropped triggers on tables removed from spec");
        }
        Ok(stale)
    }

    /// Drop the pipeline's notify function. A missing function is success.
    pub async fn drop_function(&self, pipeline: &Pipeline) -> SchemaResult<()> {
        let name = pipeline.postgres_name();
        match self.db.execute(&sql::drop_function(&name)?).await {
            Ok(()) => {
                info!(function = %name, "dropped function");
                Ok(())
            }
            Err(e) if e.is_not_found() => {
                debug!(function = %name, "function already gone");
                Ok(())
            }
            Err(e) => Err(e),
        }
    }
}
