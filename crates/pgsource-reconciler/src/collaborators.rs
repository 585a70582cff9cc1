//! Store-backed collaborators.
//!
//! Receivers and bindings are persisted as declarative requests in the state
//! store. An external agent polls them over the REST API, does the actual
//! work, and reports back; these collaborators answer with the last report.
//! A request with no report yet is "not available" / "not ready".

use async_trait::async_trait;
use tracing::debug;

use pgsource_core::{BindingDescriptor, BindingObservation, ReceiverDescriptor, ReceiverObservation};
use pgsource_state::StateStore;

use crate::error::ReconcileResult;
use crate::orchestrator::{BindingManager, WorkloadScheduler};

#[derive(Clone)]
pub struct StoreWorkloadScheduler {
    state: StateStore,
}

impl StoreWorkloadScheduler {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }
}

#[async_trait]
impl WorkloadScheduler for StoreWorkloadScheduler {
    async fn apply_receiver(&self, desired: &ReceiverDescriptor) -> ReconcileResult<ReceiverObservation> {
        let record = self.state.put_receiver_desired(desired)?;
        if record.observed.is_none() {
            debug!(receiver = %desired.key(), "receiver requested, no report yet");
        }
        Ok(record.observation())
    }
}

#[derive(Clone)]
pub struct StoreBindingManager {
    state: StateStore,
}

impl StoreBindingManager {
    pub fn new(state: StateStore) -> Self {
        Self { state }
    }
}

#[async_trait]
impl BindingManager for StoreBindingManager {
    async fn apply_binding(&self, desired: &BindingDescriptor) -> ReconcileResult<BindingObservation> {
        let record = self.state.put_binding_desired(desired)?;
        if record.observed.is_none() {
            debug!(binding = %desired.key(), "binding requested, no report yet");
        }
        Ok(record.observation())
    }
}
