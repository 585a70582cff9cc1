//! Receiver and binding provisioning through collaborators.
//!
//! The orchestrator shapes declarative descriptors from a pipeline and
//! upserts them; it never waits for them to converge. Readiness comes back in
//! the observation and the engine decides what to do with it.

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use pgsource_core::descriptors::{
    ENV_CREDENTIALS_SECRET, ENV_EVENT_SOURCE, ENV_NOTIFICATION_CHANNEL, LABEL_PIPELINE, LABEL_ROLE,
};
use pgsource_core::naming;
use pgsource_core::{
    BindingDescriptor, BindingObservation, ObjectReference, OwnerRef, Pipeline,
    ReceiverDescriptor, ReceiverObservation,
};

use crate::error::ReconcileResult;

/// Kind recorded on a binding's subject reference.
pub const RECEIVER_KIND: &str = "Receiver";

/// Runs receiver processes.
#[async_trait]
pub trait WorkloadScheduler: Send + Sync {
    /// Create or update the receiver and report its current availability.
    async fn apply_receiver(&self, desired: &ReceiverDescriptor) -> ReconcileResult<ReceiverObservation>;
}

/// Manages delivery bindings from a receiver to a sink.
#[async_trait]
pub trait BindingManager: Send + Sync {
    /// Create or update the binding and report its current readiness.
    async fn apply_binding(&self, desired: &BindingDescriptor) -> ReconcileResult<BindingObservation>;
}

#[derive(Clone)]
pub struct DependencyOrchestrator {
    scheduler: Arc<dyn WorkloadScheduler>,
    bindings: Arc<dyn BindingManager>,
    receiver_image: String,
}

fn owner(pipeline: &Pipeline) -> OwnerRef {
    OwnerRef {
        key: pipeline.key(),
        uid: pipeline.metadata.uid.clone(),
    }
}

impl DependencyOrchestrator {
    pub fn new(
        scheduler: Arc<dyn WorkloadScheduler>,
        bindings: Arc<dyn BindingManager>,
        receiver_image: impl Into<String>,
    ) -> Self {
        Self {
            scheduler,
            bindings,
            receiver_image: receiver_image.into(),
        }
    }

    /// The receiver a pipeline needs: LISTEN on the pipeline's channel,
    /// connect with its credentials, label events with its identity.
    pub fn receiver_descriptor(&self, pipeline: &Pipeline) -> ReceiverDescriptor {
        let meta = &pipeline.metadata;
        let env = BTreeMap::from([
            (ENV_NOTIFICATION_CHANNEL.to_string(), pipeline.postgres_name()),
            (ENV_EVENT_SOURCE.to_string(), pipeline.key()),
            (
                ENV_CREDENTIALS_SECRET.to_string(),
                pipeline.spec.credentials.secret.clone(),
            ),
        ]);
        let labels = BTreeMap::from([
            (LABEL_PIPELINE.to_string(), meta.name.clone()),
            (LABEL_ROLE.to_string(), "receiver".to_string()),
        ]);
        ReceiverDescriptor {
            namespace: meta.namespace.clone(),
            name: naming::receiver_name(&meta.name),
            owner: owner(pipeline),
            image: self.receiver_image.clone(),
            env,
            labels,
        }
    }

    pub fn binding_descriptor(&self, pipeline: &Pipeline, receiver_address: &str) -> BindingDescriptor {
        let meta = &pipeline.metadata;
        BindingDescriptor {
            namespace: meta.namespace.clone(),
            name: naming::binding_name(&meta.name),
            owner: owner(pipeline),
            credentials: pipeline.spec.credentials.clone(),
            sink: pipeline.spec.sink.clone(),
            subject: ObjectReference {
                kind: RECEIVER_KIND.to_string(),
                namespace: meta.namespace.clone(),
                name: naming::receiver_name(&meta.name),
            },
            subject_address: receiver_address.to_string(),
        }
    }

    pub async fn ensure_receiver(&self, pipeline: &Pipeline) -> ReconcileResult<ReceiverObservation> {
        let desired = self.receiver_descriptor(pipeline);
        let observed = self.scheduler.apply_receiver(&desired).await?;
        debug!(
            key = %pipeline.key(),
            receiver = %desired.key(),
            available = observed.available,
            "receiver applied"
        );
        Ok(observed)
    }

    /// Only meaningful once the receiver is available at `receiver_address`.
    pub async fn ensure_binding(
        &self,
        pipeline: &Pipeline,
        receiver_address: &str,
    ) -> ReconcileResult<BindingObservation> {
        let desired = self.binding_descriptor(pipeline, receiver_address);
        let observed = self.bindings.apply_binding(&desired).await?;
        debug!(
            key = %pipeline.key(),
            binding = %desired.key(),
            ready = observed.ready,
            "binding applied"
        );
        Ok(observed)
    }
}
