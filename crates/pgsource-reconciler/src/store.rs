//! The resource store seen by the reconciler.

use tokio::sync::broadcast;

use pgsource_core::{Pipeline, PipelineKey, PipelineStatus};
use pgsource_state::{StateResult, StateStore, StoreEvent};

/// Read pipelines, persist their status, and watch for changes.
pub trait ResourceStore: Send + Sync {
    fn get(&self, key: &str) -> StateResult<Option<Pipeline>>;

    /// Replace the status of `key`. The spec is never touched.
    fn update_status(&self, key: &str, status: &PipelineStatus) -> StateResult<()>;

    /// Remove a finalized pipeline. Returns false if it was already gone.
    fn remove(&self, key: &str) -> StateResult<bool>;

    fn list_keys(&self) -> StateResult<Vec<PipelineKey>>;

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent>;
}

impl ResourceStore for StateStore {
    fn get(&self, key: &str) -> StateResult<Option<Pipeline>> {
        self.get_pipeline(key)
    }

    fn update_status(&self, key: &str, status: &PipelineStatus) -> StateResult<()> {
        StateStore::update_status(self, key, status)
    }

    fn remove(&self, key: &str) -> StateResult<bool> {
        self.remove_pipeline(key)
    }

    fn list_keys(&self) -> StateResult<Vec<PipelineKey>> {
        Ok(self.list_pipelines()?.iter().map(Pipeline::key).collect())
    }

    fn subscribe(&self) -> broadcast::Receiver<StoreEvent> {
        StateStore::subscribe(self)
    }
}
