//! Teardown of a pipeline's database objects on deletion.

use tracing::{info, warn};

use pgsource_core::Pipeline;
use pgsource_schema::SchemaMutator;

use crate::cancel::Cancellation;
use crate::error::ReconcileResult;

#[derive(Clone)]
pub struct FinalizeEngine {
    schema: SchemaMutator,
}

impl FinalizeEngine {
    pub fn new(schema: SchemaMutator) -> Self {
        Self { schema }
    }

    /// Drop every trigger in spec order, then any left on tables that were
    /// removed from the spec, then the function.
    ///
    /// The first failing trigger drop aborts the run and leaves the function
    /// in place, since remaining triggers still reference it.
    pub async fn finalize(&self, pipeline: &Pipeline, cancel: &Cancellation) -> ReconcileResult<()> {
        let key = pipeline.key();
        for table in &pipeline.spec.tables {
            if let Err(e) = cancel
                .guard(self.schema.drop_trigger(pipeline, &table.name))
                .await
            {
                warn!(%key, table = %table.name, error = %e, "failed to drop trigger");
                return Err(e);
            }
        }
        cancel.guard(self.schema.drop_stale_triggers(pipeline)).await?;
        cancel.guard(self.schema.drop_function(pipeline)).await?;
        info!(%key, tables = pipeline.spec.tables.len(), "database objects removed");
        Ok(())
    }
}
