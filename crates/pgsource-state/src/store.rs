//! StateStore — redb-backed persistence for pgsource resources.
//!
//! Provides typed operations over pipelines and the receiver/binding records
//! derived from them. All values are JSON-serialized into redb's `&[u8]`
//! value columns. The store supports both on-disk and in-memory backends
//! (the latter for testing).

use std::path::Path;
use std::sync::Arc;

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;
use tracing::debug;
use uuid::Uuid;

use pgsource_core::{
    epoch_secs, BindingDescriptor, ObjectMeta, Pipeline, PipelineSpec, PipelineStatus,
    ReceiverDescriptor,
};

use crate::error::{StateError, StateResult};
use crate::tables::*;
use crate::types::*;

/// Convert any `Display` error into a `StateError` variant via a closure factory.
macro_rules! map_err {
    ($variant:ident) => {
        |e| StateError::$variant(e.to_string())
    };
}

const EVENT_CHANNEL_CAPACITY: usize = 1024;

type RecordTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Thread-safe resource store backed by redb.
#[derive(Clone)]
pub struct StateStore {
    db: Arc<Database>,
    events: broadcast::Sender<StoreEvent>,
}

impl StateStore {
    /// Open (or create) a persistent store at the given path.
    pub fn open(path: &Path) -> StateResult<Self> {
        let db = Database::create(path).map_err(map_err!(Open))?;
        let store = Self::from_db(db)?;
        debug!(?path, "state store opened");
        Ok(store)
    }

    /// Create an ephemeral in-memory store (for testing).
    pub fn open_in_memory() -> StateResult<Self> {
        let backend = redb::backends::InMemoryBackend::new();
        let db = Database::builder()
            .create_with_backend(backend)
            .map_err(map_err!(Open))?;
        let store = Self::from_db(db)?;
        debug!("in-memory state store opened");
        Ok(store)
    }

    fn from_db(db: Database) -> StateResult<Self> {
        let (events, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        let store = Self {
            db: Arc::new(db),
            events,
        };
        store.ensure_tables()?;
        Ok(store)
    }

    /// Create all tables if they don't exist yet.
    fn ensure_tables(&self) -> StateResult<()> {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        // Opening a table in a write transaction creates it if absent.
        txn.open_table(PIPELINES).map_err(map_err!(Table))?;
        txn.open_table(RECEIVERS).map_err(map_err!(Table))?;
        txn.open_table(BINDINGS).map_err(map_err!(Table))?;
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    /// Subscribe to change notifications.
    pub fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        self.events.subscribe()
    }

    fn emit(&self, kind: StoreEventKind, pipeline_key: &str) {
        // No subscribers is fine; nothing is watching yet.
        let _ = self.events.send(StoreEvent {
            kind,
            pipeline_key: pipeline_key.to_string(),
        });
    }

    // ── Generic record access ──────────────────────────────────────

    fn get_record<T: DeserializeOwned>(&self, def: RecordTable, key: &str) -> StateResult<Option<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        match table.get(key).map_err(map_err!(Read))? {
            Some(guard) => {
                let value: T =
                    serde_json::from_slice(guard.value()).map_err(map_err!(Deserialize))?;
                Ok(Some(value))
            }
            None => Ok(None),
        }
    }

    fn put_record<T: Serialize>(&self, def: RecordTable, key: &str, value: &T) -> StateResult<()> {
        let bytes = serde_json::to_vec(value).map_err(map_err!(Serialize))?;
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
        }
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(())
    }

    fn list_records<T: DeserializeOwned>(&self, def: RecordTable) -> StateResult<Vec<T>> {
        let txn = self.db.begin_read().map_err(map_err!(Transaction))?;
        let table = txn.open_table(def).map_err(map_err!(Table))?;
        let mut results = Vec::new();
        for entry in table.iter().map_err(map_err!(Read))? {
            let (_, value) = entry.map_err(map_err!(Read))?;
            let record: T =
                serde_json::from_slice(value.value()).map_err(map_err!(Deserialize))?;
            results.push(record);
        }
        Ok(results)
    }

    /// Read-modify-write a record inside one write transaction.
    fn modify_record<T, F>(&self, def: RecordTable, key: &str, f: F) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(&mut T),
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current: Option<T> = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| serde_json::from_slice(guard.value()))
                .transpose()
                .map_err(map_err!(Deserialize))?;
            let mut record = current.ok_or_else(|| StateError::NotFound(key.to_string()))?;
            f(&mut record);
            let bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    /// Insert or replace a record built from the current one, inside one
    /// write transaction.
    fn upsert_record<T, F>(&self, def: RecordTable, key: &str, f: F) -> StateResult<T>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce(Option<T>) -> T,
    {
        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let record = {
            let mut table = txn.open_table(def).map_err(map_err!(Table))?;
            let current: Option<T> = table
                .get(key)
                .map_err(map_err!(Read))?
                .map(|guard| serde_json::from_slice(guard.value()))
                .transpose()
                .map_err(map_err!(Deserialize))?;
            let record = f(current);
            let bytes = serde_json::to_vec(&record).map_err(map_err!(Serialize))?;
            table
                .insert(key, bytes.as_slice())
                .map_err(map_err!(Write))?;
            record
        };
        txn.commit().map_err(map_err!(Transaction))?;
        Ok(record)
    }

    // ── Pipelines ──────────────────────────────────────────────────

    /// Admit a pipeline spec: create it, or update its spec in place.
    ///
    /// New pipelines get a fresh UID and generation 1. An update bumps the
    /// generation only when the spec actually changed; UID and status are
    /// preserved. Updating a pipeline that is being deleted is a conflict.
    pub fn apply_pipeline(
        &self,
        namespace: &str,
        name: &str,
        spec: PipelineSpec,
    ) -> StateResult<Pipeline> {
        let candidate = Pipeline {
            metadata: ObjectMeta::new(namespace, name),
            spec,
            status: PipelineStatus::default(),
        };
        candidate.validate()?;
        let key = candidate.key();
        let now = epoch_secs();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let (stored, changed) = {
            let mut table = txn.open_table(PIPELINES).map_err(map_err!(Table))?;
            let existing: Option<Pipeline> = table
                .get(key.as_str())
                .map_err(map_err!(Read))?
                .map(|guard| serde_json::from_slice(guard.value()))
                .transpose()
                .map_err(map_err!(Deserialize))?;

            let (stored, changed) = match existing {
                Some(current) if current.metadata.is_deleting() => {
                    return Err(StateError::Conflict(format!("{key} is being deleted")));
                }
                Some(current) if current.spec == candidate.spec => (current, false),
                Some(mut current) => {
                    current.spec = candidate.spec;
                    current.metadata.generation += 1;
                    current.metadata.updated_at = now;
                    (current, true)
                }
                None => {
                    let mut created = candidate;
                    created.metadata.uid = Uuid::new_v4().to_string();
                    created.metadata.generation = 1;
                    created.metadata.created_at = now;
                    created.metadata.updated_at = now;
                    (created, true)
                }
            };

            if changed {
                let bytes = serde_json::to_vec(&stored).map_err(map_err!(Serialize))?;
                table
                    .insert(key.as_str(), bytes.as_slice())
                    .map_err(map_err!(Write))?;
            }
            (stored, changed)
        };
        txn.commit().map_err(map_err!(Transaction))?;

        if changed {
            debug!(%key, generation = stored.metadata.generation, "pipeline applied");
            self.emit(StoreEventKind::PipelineApplied, &key);
        }
        Ok(stored)
    }

    /// Write a pipeline verbatim (identity included).
    pub fn put_pipeline(&self, pipeline: &Pipeline) -> StateResult<()> {
        let key = pipeline.key();
        self.put_record(PIPELINES, &key, pipeline)?;
        debug!(%key, "pipeline stored");
        Ok(())
    }

    /// Get a pipeline by `{namespace}/{name}` key.
    pub fn get_pipeline(&self, key: &str) -> StateResult<Option<Pipeline>> {
        self.get_record(PIPELINES, key)
    }

    /// List all pipelines.
    pub fn list_pipelines(&self) -> StateResult<Vec<Pipeline>> {
        self.list_records(PIPELINES)
    }

    /// Replace the status of a pipeline.
    pub fn update_status(&self, key: &str, status: &PipelineStatus) -> StateResult<()> {
        self.modify_record::<Pipeline, _>(PIPELINES, key, |p| p.status = status.clone())?;
        debug!(%key, ready = status.is_ready(), "pipeline status updated");
        Ok(())
    }

    /// Mark a pipeline for deletion. Returns false if it does not exist.
    ///
    /// The pipeline stays in the store until [`StateStore::remove_pipeline`]
    /// is called after finalization succeeds.
    pub fn request_deletion(&self, key: &str) -> StateResult<bool> {
        let now = epoch_secs();
        match self.modify_record::<Pipeline, _>(PIPELINES, key, |p| {
            if p.metadata.deletion_requested_at.is_none() {
                p.metadata.deletion_requested_at = Some(now);
            }
        }) {
            Ok(_) => {
                debug!(%key, "pipeline deletion requested");
                self.emit(StoreEventKind::PipelineDeletionRequested, key);
                Ok(true)
            }
            Err(StateError::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Remove a pipeline and every receiver/binding record it owns.
    /// Returns true if the pipeline existed.
    pub fn remove_pipeline(&self, key: &str) -> StateResult<bool> {
        let receivers: Vec<String> = self
            .list_receivers()?
            .into_iter()
            .filter(|r| r.desired.owner.key == key)
            .map(|r| r.desired.key())
            .collect();
        let bindings: Vec<String> = self
            .list_bindings()?
            .into_iter()
            .filter(|b| b.desired.owner.key == key)
            .map(|b| b.desired.key())
            .collect();

        let txn = self.db.begin_write().map_err(map_err!(Transaction))?;
        let existed;
        {
            let mut table = txn.open_table(PIPELINES).map_err(map_err!(Table))?;
            existed = table.remove(key).map_err(map_err!(Write))?.is_some();
        }
        {
            let mut table = txn.open_table(RECEIVERS).map_err(map_err!(Table))?;
            for k in &receivers {
                table.remove(k.as_str()).map_err(map_err!(Write))?;
            }
        }
        {
            let mut table = txn.open_table(BINDINGS).map_err(map_err!(Table))?;
            for k in &bindings {
                table.remove(k.as_str()).map_err(map_err!(Write))?;
            }
        }
        txn.commit().map_err(map_err!(Transaction))?;

        debug!(%key, existed, receivers = receivers.len(), bindings = bindings.len(), "pipeline removed");
        if existed {
            self.emit(StoreEventKind::PipelineRemoved, key);
        }
        Ok(existed)
    }

    // ── Receivers ──────────────────────────────────────────────────

    /// Upsert the desired receiver, keeping any previous report.
    pub fn put_receiver_desired(&self, desired: &ReceiverDescriptor) -> StateResult<ReceiverRecord> {
        self.upsert_record::<ReceiverRecord, _>(RECEIVERS, &desired.key(), |current| ReceiverRecord {
            desired: desired.clone(),
            observed: current.and_then(|r| r.observed),
        })
    }

    pub fn get_receiver(&self, key: &str) -> StateResult<Option<ReceiverRecord>> {
        self.get_record(RECEIVERS, key)
    }

    pub fn list_receivers(&self) -> StateResult<Vec<ReceiverRecord>> {
        self.list_records(RECEIVERS)
    }

    /// Record an agent's report for a requested receiver.
    pub fn report_receiver(&self, key: &str, mut report: ReceiverReport) -> StateResult<ReceiverRecord> {
        report.updated_at = epoch_secs();
        let record =
            self.modify_record::<ReceiverRecord, _>(RECEIVERS, key, |r| r.observed = Some(report))?;
        debug!(%key, "receiver status reported");
        self.emit(StoreEventKind::ReceiverReported, &record.desired.owner.key);
        Ok(record)
    }

    // ── Bindings ───────────────────────────────────────────────────

    /// Upsert the desired binding, keeping any previous report.
    pub fn put_binding_desired(&self, desired: &BindingDescriptor) -> StateResult<BindingRecord> {
        self.upsert_record::<BindingRecord, _>(BINDINGS, &desired.key(), |current| BindingRecord {
            desired: desired.clone(),
            observed: current.and_then(|b| b.observed),
        })
    }

    pub fn get_binding(&self, key: &str) -> StateResult<Option<BindingRecord>> {
        self.get_record(BINDINGS, key)
    }

    pub fn list_bindings(&self) -> StateResult<Vec<BindingRecord>> {
        self.list_records(BINDINGS)
    }

    /// Record an agent's report for a requested binding.
    pub fn report_binding(&self, key: &str, mut report: BindingReport) -> StateResult<BindingRecord> {
        report.updated_at = epoch_secs();
        let record =
            self.modify_record::<BindingRecord, _>(BINDINGS, key, |b| b.observed = Some(report))?;
        debug!(%key, "binding status reported");
        self.emit(StoreEventKind::BindingReported, &record.desired.owner.key);
        Ok(record)
    }
}
