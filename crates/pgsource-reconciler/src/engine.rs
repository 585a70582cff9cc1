//! Reconcile engine — drives one pipeline towards its spec.
//!
//! A run re-derives everything from the store and the database catalog;
//! nothing is remembered between runs. Stages execute in dependency order:
//!
//! ```text
//! function ─▶ (per table: exists? ─▶ trigger) ─▶ stale triggers ─▶ receiver ─▶ binding
//! ```
//!
//! Each stage writes its condition before the next one starts, and the first
//! failure ends the run. The status is rebuilt from scratch every run and
//! persisted exactly once at the end, so a condition never outlives the run
//! that set it.

use std::sync::Arc;

use tracing::{debug, info, warn};

use pgsource_core::{ConditionType, Pipeline, PipelineStatus};
use pgsource_schema::SchemaMutator;
use pgsource_state::StateError;

use crate::cancel::Cancellation;
use crate::error::{
    ReconcileError, ReconcileResult, REASON_BINDING_NOT_READY, REASON_FINALIZE_FAILED,
    REASON_RECEIVER_UNAVAILABLE,
};
use crate::finalize::FinalizeEngine;
use crate::orchestrator::DependencyOrchestrator;
use crate::store::ResourceStore;

/// Outcome of a successful run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReconcileEvent {
    /// Every condition is `True`.
    Reconciled,
    /// Database side is done; a receiver or binding is not ready yet.
    AwaitingDependencies,
    /// Deletion was requested and teardown completed; the pipeline is gone.
    Finalized,
    /// No pipeline under this key.
    NotFound,
}

pub struct ReconcileEngine {
    store: Arc<dyn ResourceStore>,
    schema: SchemaMutator,
    orchestrator: DependencyOrchestrator,
    finalizer: FinalizeEngine,
}

/// Record `err` on `condition` and hand it back for propagation.
fn fail(status: &mut PipelineStatus, condition: ConditionType, err: ReconcileError) -> ReconcileError {
    status.mark_false(condition, err.reason(), &err.to_string());
    err
}

impl ReconcileEngine {
    pub fn new(
        store: Arc<dyn ResourceStore>,
        schema: SchemaMutator,
        orchestrator: DependencyOrchestrator,
    ) -> Self {
        Self {
            store,
            finalizer: FinalizeEngine::new(schema.clone()),
            schema,
            orchestrator,
        }
    }

    /// Run one reconcile (or finalize) pass for `key`.
    ///
    /// Errors mean "retry later with backoff". Waiting on a receiver or
    /// binding is not an error.
    pub async fn reconcile(&self, key: &str, cancel: &Cancellation) -> ReconcileResult<ReconcileEvent> {
        let Some(pipeline) = self.store.get(key)? else {
            debug!(%key, "pipeline not found, nothing to do");
            return Ok(ReconcileEvent::NotFound);
        };

        if pipeline.metadata.is_deleting() {
            return self.finalize(&pipeline, cancel).await;
        }

        let mut status = PipelineStatus::fresh(pipeline.metadata.generation);
        let result = self.converge(&pipeline, &mut status, cancel).await;
        status.carry_transition_times(&pipeline.status);

        match &result {
            Ok(ReconcileEvent::Reconciled) if !pipeline.status.is_ready() => {
                info!(%key, generation = pipeline.metadata.generation, "pipeline ready");
            }
            Ok(event) => debug!(%key, ?event, "reconcile pass complete"),
            Err(e) if e.is_cancelled() => debug!(%key, "reconcile cancelled"),
            Err(e) => warn!(%key, reason = e.reason(), error = %e, "reconcile failed"),
        }

        self.write_status(key, &status, result.is_ok())?;
        result
    }

    async fn converge(
        &self,
        pipeline: &Pipeline,
        status: &mut PipelineStatus,
        cancel: &Cancellation,
    ) -> ReconcileResult<ReconcileEvent> {
        cancel
            .guard(self.schema.ensure_function(pipeline))
            .await
            .map_err(|e| fail(status, ConditionType::FunctionReady, e))?;
        status.mark_true(ConditionType::FunctionReady);

        let introspector = self.schema.introspector();
        for table in &pipeline.spec.tables {
            let exists = cancel
                .guard(introspector.table_exists(&table.name))
                .await
                .map_err(|e| fail(status, ConditionType::TriggersReady, e))?;
            if !exists {
                let err = ReconcileError::MissingTable(table.name.clone());
                return Err(fail(status, ConditionType::TriggersReady, err));
            }
            cancel
                .guard(self.schema.ensure_trigger(pipeline, &table.name))
                .await
                .map_err(|e| fail(status, ConditionType::TriggersReady, e))?;
        }
        cancel
            .guard(self.schema.drop_stale_triggers(pipeline))
            .await
            .map_err(|e| fail(status, ConditionType::TriggersReady, e))?;
        status.mark_true(ConditionType::TriggersReady);

        let receiver = cancel
            .guard(self.orchestrator.ensure_receiver(pipeline))
            .await
            .map_err(|e| fail(status, ConditionType::ReceiverReady, e))?;
        let address = match (receiver.available, receiver.address) {
            (true, Some(address)) => address,
            (true, None) => {
                status.mark_unknown(
                    ConditionType::ReceiverReady,
                    REASON_RECEIVER_UNAVAILABLE,
                    &format!("receiver {} reports no address", receiver.name),
                );
                return Ok(ReconcileEvent::AwaitingDependencies);
            }
            (false, _) => {
                status.mark_unknown(
                    ConditionType::ReceiverReady,
                    REASON_RECEIVER_UNAVAILABLE,
                    &format!("receiver {} has no available instances", receiver.name),
                );
                return Ok(ReconcileEvent::AwaitingDependencies);
            }
        };
        status.mark_true(ConditionType::ReceiverReady);
        status.receiver_address = Some(address.clone());

        let binding = cancel
            .guard(self.orchestrator.ensure_binding(pipeline, &address))
            .await
            .map_err(|e| fail(status, ConditionType::BindingReady, e))?;
        if !binding.ready {
            status.mark_unknown(
                ConditionType::BindingReady,
                REASON_BINDING_NOT_READY,
                "sink binding is not ready",
            );
            return Ok(ReconcileEvent::AwaitingDependencies);
        }
        status.sink_uri = binding.sink_uri;
        status.mark_true(ConditionType::BindingReady);

        Ok(ReconcileEvent::Reconciled)
    }

    async fn finalize(&self, pipeline: &Pipeline, cancel: &Cancellation) -> ReconcileResult<ReconcileEvent> {
        let key = pipeline.key();
        match self.finalizer.finalize(pipeline, cancel).await {
            Ok(()) => {
                self.store.remove(&key)?;
                info!(%key, "pipeline finalized and removed");
                Ok(ReconcileEvent::Finalized)
            }
            Err(e) => {
                if !e.is_cancelled() {
                    warn!(%key, error = %e, "finalize failed, pipeline kept");
                    let mut status = pipeline.status.clone();
                    status.mark_false(
                        ConditionType::FunctionReady,
                        REASON_FINALIZE_FAILED,
                        &format!("teardown failed: {e}"),
                    );
                    self.write_status(&key, &status, false)?;
                }
                Err(e)
            }
        }
    }

    /// Persist `status`. A pipeline removed mid-run is not an error; other
    /// store failures only surface if the run itself succeeded.
    fn write_status(&self, key: &str, status: &PipelineStatus, surface: bool) -> ReconcileResult<()> {
        match self.store.update_status(key, status) {
            Ok(()) => Ok(()),
            Err(StateError::NotFound(_)) => {
                debug!(%key, "pipeline removed during reconcile, status dropped");
                Ok(())
            }
            Err(e) if surface => Err(e.into()),
            Err(e) => {
                warn!(%key, error = %e, "failed to persist status");
                Ok(())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use pgsource_core::{ConditionStatus, ObjectMeta};
    use pgsource_schema::testing::{test_pipeline, FakeDatabase};
    use pgsource_schema::{sql, SchemaError};
    use pgsource_state::StateStore;

    use crate::error::{REASON_DDL_FAILED, REASON_MISSING_DEPENDENCY, REASON_TRANSIENT};
    use crate::testing::{FakeBindings, FakeScheduler, SINK_URI};

    const ADDRESS: &str = "pg-receiver.default:8080";

    struct Harness {
        db: Arc<FakeDatabase>,
        state: StateStore,
        scheduler: Arc<FakeScheduler>,
        bindings: Arc<FakeBindings>,
        engine: ReconcileEngine,
    }

    impl Harness {
        fn new(present: &[&str]) -> Self {
            let db = Arc::new(FakeDatabase::new());
            for t in present {
                db.add_table(t);
            }
            let state = StateStore::open_in_memory().unwrap();
            let scheduler = Arc::new(FakeScheduler::available(ADDRESS));
            let bindings = Arc::new(FakeBindings::ready());
            let engine = ReconcileEngine::new(
                Arc::new(state.clone()),
                SchemaMutator::new(db.clone()),
                DependencyOrchestrator::new(scheduler.clone(), bindings.clone(), "img"),
            );
            Self {
                db,
                state,
                scheduler,
                bindings,
                engine,
            }
        }

        fn store(&self, pipeline: &Pipeline) -> String {
            self.state.put_pipeline(pipeline).unwrap();
            pipeline.key()
        }

        async fn run(&self, key: &str) -> ReconcileResult<ReconcileEvent> {
            self.engine.reconcile(key, &Cancellation::never()).await
        }

        fn status(&self, key: &str) -> PipelineStatus {
            self.state.get_pipeline(key).unwrap().unwrap().status
        }
    }

    fn condition(status: &PipelineStatus, t: ConditionType) -> (ConditionStatus, String, String) {
        let c = status.condition(t).unwrap();
        (c.status, c.reason.clone(), c.message.clone())
    }

    #[tokio::test]
    async fn provisions_function_then_trigger() {
        let h = Harness::new(&["cloud_events_table"]);
        let mut p = test_pipeline(&["cloud_events_table"]);
        p.metadata = ObjectMeta {
            uid: "d049318d-72c6-45e3-b8be-b0d4a38e82ad".to_string(),
            generation: 1,
            ..ObjectMeta::new("default", "mypostgres")
        };
        let key = h.store(&p);

        assert_eq!(h.run(&key).await.unwrap(), ReconcileEvent::Reconciled);

        let name = "postgressource_mypostgres_d049318d_72c6_45e3_b8be_b0d4a38e82ad";
        assert_eq!(
            h.db.executed(),
            vec![
                sql::create_function(name).unwrap(),
                sql::create_trigger(name, "cloud_events_table").unwrap(),
            ]
        );

        let status = h.status(&key);
        assert!(status.is_ready());
        assert_eq!(status.observed_generation, 1);
        for t in ConditionType::DEPENDENTS {
            assert_eq!(status.status_of(t), ConditionStatus::True, "{t:?}");
        }
        assert_eq!(status.receiver_address.as_deref(), Some(ADDRESS));
        assert_eq!(status.sink_uri.as_deref(), Some(SINK_URI));
    }

    #[tokio::test]
    async fn second_run_executes_no_ddl() {
        let h = Harness::new(&["orders", "users"]);
        let key = h.store(&test_pipeline(&["orders", "users"]));

        h.run(&key).await.unwrap();
        assert_eq!(h.db.executed().len(), 3);
        h.db.clear_executed();

        assert_eq!(h.run(&key).await.unwrap(), ReconcileEvent::Reconciled);
        assert!(h.db.executed().is_empty());
        assert!(h.status(&key).is_ready());
    }

    #[tokio::test]
    async fn missing_table_blocks_triggers() {
        let h = Harness::new(&[]);
        let key = h.store(&test_pipeline(&["orders"]));

        let err = h.run(&key).await.unwrap_err();
        assert!(matches!(err, ReconcileError::MissingTable(ref t) if t == "orders"));

        let status = h.status(&key);
        let (s, reason, message) = condition(&status, ConditionType::TriggersReady);
        assert_eq!(s, ConditionStatus::False);
        assert_eq!(reason, REASON_MISSING_DEPENDENCY);
        assert!(message.contains("orders"));
        assert_eq!(status.status_of(ConditionType::FunctionReady), ConditionStatus::True);
        assert_eq!(status.status_of(ConditionType::Ready), ConditionStatus::False);

        assert!(!h.db.executed().iter().any(|s| s.contains("CREATE TRIGGER")));
        assert!(h.scheduler.applied().is_empty());
    }

    #[tokio::test]
    async fn table_loop_stops_at_first_missing_table() {
        let h = Harness::new(&["a", "c"]);
        let p = test_pipeline(&["a", "b", "c"]);
        let key = h.store(&p);

        h.run(&key).await.unwrap_err();

        let name = p.postgres_name();
        assert!(h.db.has_trigger("a", &name));
        assert!(!h.db.has_trigger("c", &name));
        assert!(!h.db.executed().iter().any(|s| s.contains(" ON c")));
    }

    #[tokio::test]
    async fn regression_clears_ready() {
        let h = Harness::new(&["orders"]);
        let key = h.store(&test_pipeline(&["orders"]));
        h.run(&key).await.unwrap();
        assert!(h.status(&key).is_ready());

        h.db.remove_table("orders");
        h.run(&key).await.unwrap_err();

        let status = h.status(&key);
        assert!(!status.is_ready());
        assert_eq!(status.status_of(ConditionType::TriggersReady), ConditionStatus::False);
        assert_eq!(status.status_of(ConditionType::ReceiverReady), ConditionStatus::Unknown);
        assert_eq!(status.receiver_address, None);
        assert_eq!(status.sink_uri, None);
    }

    #[tokio::test]
    async fn table_removed_from_spec_loses_trigger() {
        let h = Harness::new(&["orders", "users"]);
        let key = h.store(&test_pipeline(&["orders", "users"]));
        h.run(&key).await.unwrap();
        assert!(h.status(&key).is_ready());
        h.db.clear_executed();

        let mut p = h.state.get_pipeline(&key).unwrap().unwrap();
        p.spec = test_pipeline(&["orders"]).spec;
        p.metadata.generation = 2;
        h.store(&p);

        assert_eq!(h.run(&key).await.unwrap(), ReconcileEvent::Reconciled);
        let name = p.postgres_name();
        assert_eq!(
            h.db.executed(),
            vec![format!("DROP TRIGGER IF EXISTS {name} ON users;")]
        );
        assert!(h.db.has_trigger("orders", &name));
        assert!(!h.db.has_trigger("users", &name));
        assert_eq!(h.status(&key).observed_generation, 2);
    }

    #[tokio::test]
    async fn failed_stale_trigger_drop_clears_ready() {
        let h = Harness::new(&["orders", "users"]);
        let key = h.store(&test_pipeline(&["orders", "users"]));
        h.run(&key).await.unwrap();

        let mut p = h.state.get_pipeline(&key).unwrap().unwrap();
        p.spec = test_pipeline(&["orders"]).spec;
        p.metadata.generation = 2;
        h.store(&p);
        h.db.fail_statements_containing(
            "ON users;",
            SchemaError::Statement {
                code: Some("42501".to_string()),
                message: "must be owner of relation users".to_string(),
            },
        );

        h.run(&key).await.unwrap_err();
        let status = h.status(&key);
        assert!(!status.is_ready());
        let (s, reason, message) = condition(&status, ConditionType::TriggersReady);
        assert_eq!(s, ConditionStatus::False);
        assert_eq!(reason, REASON_DDL_FAILED);
        assert!(message.contains("must be owner"));
    }

    #[tokio::test]
    async fn unavailable_receiver_awaits_without_error() {
        let h = Harness::new(&["orders"]);
        h.scheduler.set_available(None);
        let key = h.store(&test_pipeline(&["orders"]));

        assert_eq!(h.run(&key).await.unwrap(), ReconcileEvent::AwaitingDependencies);

        let status = h.status(&key);
        let (s, reason, _) = condition(&status, ConditionType::ReceiverReady);
        assert_eq!(s, ConditionStatus::Unknown);
        assert_eq!(reason, REASON_RECEIVER_UNAVAILABLE);
        assert_eq!(status.status_of(ConditionType::TriggersReady), ConditionStatus::True);
        assert_eq!(status.status_of(ConditionType::Ready), ConditionStatus::Unknown);
        assert!(h.bindings.applied().is_empty());

        h.scheduler.set_available(Some(ADDRESS));
        assert_eq!(h.run(&key).await.unwrap(), ReconcileEvent::Reconciled);
    }

    #[tokio::test]
    async fn unready_binding_awaits_without_error() {
        let h = Harness::new(&[]);
        h.bindings.set_ready(false);
        let key = h.store(&test_pipeline(&[]));

        assert_eq!(h.run(&key).await.unwrap(), ReconcileEvent::AwaitingDependencies);

        let status = h.status(&key);
        let (s, reason, _) = condition(&status, ConditionType::BindingReady);
        assert_eq!(s, ConditionStatus::Unknown);
        assert_eq!(reason, REASON_BINDING_NOT_READY);
        assert_eq!(status.receiver_address.as_deref(), Some(ADDRESS));
        assert_eq!(status.sink_uri, None);
    }

    #[tokio::test]
    async fn ddl_failure_recorded_on_function() {
        let h = Harness::new(&[]);
        h.db.fail_statements_containing(
            "CREATE OR REPLACE FUNCTION",
            SchemaError::Statement {
                code: Some("42501".to_string()),
                message: "permission denied for schema public".to_string(),
            },
        );
        let key = h.store(&test_pipeline(&[]));

        let err = h.run(&key).await.unwrap_err();
        assert_eq!(err.reason(), REASON_DDL_FAILED);

        let (s, reason, message) = condition(&h.status(&key), ConditionType::FunctionReady);
        assert_eq!(s, ConditionStatus::False);
        assert_eq!(reason, REASON_DDL_FAILED);
        assert_eq!(message, "permission denied for schema public");
    }

    #[tokio::test]
    async fn unreachable_database_is_transient() {
        let h = Harness::new(&[]);
        h.db.fail_queries(SchemaError::Unavailable("connection refused".to_string()));
        let key = h.store(&test_pipeline(&["orders"]));

        h.run(&key).await.unwrap_err();
        let (s, reason, _) = condition(&h.status(&key), ConditionType::FunctionReady);
        assert_eq!(s, ConditionStatus::False);
        assert_eq!(reason, REASON_TRANSIENT);
    }

    #[tokio::test]
    async fn collaborator_failure_is_transient() {
        let h = Harness::new(&[]);
        h.scheduler.fail_with("scheduler unreachable");
        let key = h.store(&test_pipeline(&[]));

        h.run(&key).await.unwrap_err();
        let (s, reason, _) = condition(&h.status(&key), ConditionType::ReceiverReady);
        assert_eq!(s, ConditionStatus::False);
        assert_eq!(reason, REASON_TRANSIENT);
    }

    #[tokio::test]
    async fn transition_times_survive_unchanged_conditions() {
        let h = Harness::new(&[]);
        let key = h.store(&test_pipeline(&[]));
        h.run(&key).await.unwrap();

        let mut status = h.status(&key);
        for c in &mut status.conditions {
            c.last_transition_time = 1;
        }
        h.state.update_status(&key, &status).unwrap();

        h.bindings.set_ready(false);
        h.run(&key).await.unwrap();
        let status = h.status(&key);
        let time = |t| status.condition(t).unwrap().last_transition_time;
        assert_eq!(time(ConditionType::FunctionReady), 1);
        assert_eq!(time(ConditionType::ReceiverReady), 1);
        assert_ne!(time(ConditionType::BindingReady), 1);
    }

    #[tokio::test]
    async fn deletion_finalizes_and_removes() {
        let h = Harness::new(&["orders"]);
        let p = test_pipeline(&["orders"]);
        let key = h.store(&p);
        h.run(&key).await.unwrap();

        assert!(h.state.request_deletion(&key).unwrap());
        assert_eq!(h.run(&key).await.unwrap(), ReconcileEvent::Finalized);

        assert!(h.state.get_pipeline(&key).unwrap().is_none());
        assert!(!h.db.has_function(&p.postgres_name()));
        assert!(!h.db.has_trigger("orders", &p.postgres_name()));
        assert_eq!(h.run(&key).await.unwrap(), ReconcileEvent::NotFound);
    }

    #[tokio::test]
    async fn failed_finalize_keeps_pipeline() {
        let h = Harness::new(&["orders"]);
        let key = h.store(&test_pipeline(&["orders"]));
        h.run(&key).await.unwrap();

        h.db.fail_statements_containing(
            "DROP TRIGGER",
            SchemaError::Unavailable("connection reset".to_string()),
        );
        h.state.request_deletion(&key).unwrap();
        h.run(&key).await.unwrap_err();

        let stored = h.state.get_pipeline(&key).unwrap().unwrap();
        let (s, reason, _) = condition(&stored.status, ConditionType::FunctionReady);
        assert_eq!(s, ConditionStatus::False);
        assert_eq!(reason, REASON_FINALIZE_FAILED);

        h.db.clear_failures();
        assert_eq!(h.run(&key).await.unwrap(), ReconcileEvent::Finalized);
    }

    #[tokio::test]
    async fn cancelled_run_records_reason() {
        let h = Harness::new(&[]);
        let key = h.store(&test_pipeline(&[]));
        let (tx, rx) = tokio::sync::watch::channel(false);
        tx.send(true).unwrap();

        let err = h
            .engine
            .reconcile(&key, &Cancellation::new(rx))
            .await
            .unwrap_err();
        assert!(err.is_cancelled());
        assert!(h.db.executed().is_empty());
        let (_, reason, _) = condition(&h.status(&key), ConditionType::FunctionReady);
        assert_eq!(reason, crate::error::REASON_CANCELLED);
    }
}
