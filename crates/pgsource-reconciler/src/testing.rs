//! Fake collaborators for engine and controller tests.

use std::sync::Mutex;

use async_trait::async_trait;

use pgsource_core::{BindingDescriptor, BindingObservation, ReceiverDescriptor, ReceiverObservation};

use crate::error::{ReconcileError, ReconcileResult};
use crate::orchestrator::{BindingManager, WorkloadScheduler};

pub const SINK_URI: &str = "http://event-display.default.svc.cluster.local";

struct SchedulerState {
    address: Option<String>,
    failure: Option<String>,
    applied: Vec<ReceiverDescriptor>,
}

pub struct FakeScheduler {
    state: Mutex<SchedulerState>,
}

impl FakeScheduler {
    pub fn available(address: &str) -> Self {
        Self {
            state: Mutex::new(SchedulerState {
                address: Some(address.to_string()),
                failure: None,
                applied: Vec::new(),
            }),
        }
    }

    pub fn set_available(&self, address: Option<&str>) {
        self.state.lock().unwrap().address = address.map(str::to_string);
    }

    pub fn fail_with(&self, message: &str) {
        self.state.lock().unwrap().failure = Some(message.to_string());
    }

    pub fn applied(&self) -> Vec<ReceiverDescriptor> {
        self.state.lock().unwrap().applied.clone()
    }
}

#[async_trait]
impl WorkloadScheduler for FakeScheduler {
    async fn apply_receiver(&self, desired: &ReceiverDescriptor) -> ReconcileResult<ReceiverObservation> {
        let mut state = self.state.lock().unwrap();
        if let Some(message) = &state.failure {
            return Err(ReconcileError::Collaborator(message.clone()));
        }
        state.applied.push(desired.clone());
        Ok(ReceiverObservation {
            namespace: desired.namespace.clone(),
            name: desired.name.clone(),
            available: state.address.is_some(),
            address: state.address.clone(),
        })
    }
}

struct BindingState {
    ready: bool,
    applied: Vec<BindingDescriptor>,
}

pub struct FakeBindings {
    state: Mutex<BindingState>,
}

impl FakeBindings {
    pub fn ready() -> Self {
        Self {
            state: Mutex::new(BindingState {
                ready: true,
                applied: Vec::new(),
            }),
        }
    }

    pub fn set_ready(&self, ready: bool) {
        self.state.lock().unwrap().ready = ready;
    }

    pub fn applied(&self) -> Vec<BindingDescriptor> {
        self.state.lock().unwrap().applied.clone()
    }
}

#[async_trait]
impl BindingManager for FakeBindings {
    async fn apply_binding(&self, desired: &BindingDescriptor) -> ReconcileResult<BindingObservation> {
        let mut state = self.state.lock().unwrap();
        state.applied.push(desired.clone());
        Ok(BindingObservation {
            ready: state.ready,
            sink_uri: state.ready.then(|| SINK_URI.to_string()),
        })
    }
}
