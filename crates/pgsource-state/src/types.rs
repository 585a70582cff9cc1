//! Persisted collaborator records and watch events.

use serde::{Deserialize, Serialize};

use pgsource_core::{
    BindingDescriptor, BindingObservation, PipelineKey, ReceiverDescriptor, ReceiverObservation,
};

/// Availability reported by the agent running a receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiverReport {
    pub available_replicas: u32,
    pub address: Option<String>,
    #[serde(default)]
    pub updated_at: u64,
}

/// A receiver request plus its last report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiverRecord {
    pub desired: ReceiverDescriptor,
    pub observed: Option<ReceiverReport>,
}

impl ReceiverRecord {
    pub fn observation(&self) -> ReceiverObservation {
        let (available, address) = match &self.observed {
            Some(r) => (r.available_replicas > 0, r.address.clone()),
            None => (false, None),
        };
        ReceiverObservation {
            namespace: self.desired.namespace.clone(),
            name: self.desired.name.clone(),
            available,
            address,
        }
    }
}

/// Readiness reported by the agent managing a binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindingReport {
    pub ready: bool,
    pub sink_uri: Option<String>,
    #[serde(default)]
    pub updated_at: u64,
}

/// A binding request plus its last report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindingRecord {
    pub desired: BindingDescriptor,
    pub observed: Option<BindingReport>,
}

impl BindingRecord {
    pub fn observation(&self) -> BindingObservation {
        match &self.observed {
            Some(r) => BindingObservation {
                ready: r.ready,
                sink_uri: r.sink_uri.clone(),
            },
            None => BindingObservation {
                ready: false,
                sink_uri: None,
            },
        }
    }
}

/// What changed in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StoreEventKind {
    PipelineApplied,
    PipelineDeletionRequested,
    PipelineRemoved,
    ReceiverReported,
    BindingReported,
}

/// A change notification, always addressed to the owning pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreEvent {
    pub kind: StoreEventKind,
    pub pipeline_key: PipelineKey,
}
