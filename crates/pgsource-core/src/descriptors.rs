//! Declarative requests emitted for downstream collaborators.
//!
//! The reconciler never manipulates a receiver or binding directly: it shapes
//! one of these descriptors, hands it to the collaborator as an upsert, and
//! interprets the observation that comes back.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::types::{CredentialRef, PipelineKey, SinkRef};

/// Env var carrying the NOTIFY channel the receiver must LISTEN on.
pub const ENV_NOTIFICATION_CHANNEL: &str = "NOTIFICATION_CHANNEL";
/// Env var carrying the `{namespace}/{name}` event source identity.
pub const ENV_EVENT_SOURCE: &str = "EVENT_SOURCE";
/// Env var naming the secret with database connection info.
pub const ENV_CREDENTIALS_SECRET: &str = "PG_CREDENTIALS_SECRET";

pub const LABEL_PIPELINE: &str = "pgsource.dev/pipeline";
pub const LABEL_ROLE: &str = "pgsource.dev/role";

/// The pipeline a collaborator object belongs to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct OwnerRef {
    pub key: PipelineKey,
    pub uid: String,
}

/// Reference to another declarative object.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ObjectReference {
    pub kind: String,
    pub namespace: String,
    pub name: String,
}

/// Desired long-running receiver process.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiverDescriptor {
    pub namespace: String,
    pub name: String,
    pub owner: OwnerRef,
    pub image: String,
    pub env: BTreeMap<String, String>,
    pub labels: BTreeMap<String, String>,
}

impl ReceiverDescriptor {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// Desired delivery binding from a receiver to a sink.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindingDescriptor {
    pub namespace: String,
    pub name: String,
    pub owner: OwnerRef,
    pub credentials: CredentialRef,
    pub sink: SinkRef,
    /// The receiver being bound.
    pub subject: ObjectReference,
    /// Concrete address of the subject.
    pub subject_address: String,
}

impl BindingDescriptor {
    pub fn key(&self) -> String {
        format!("{}/{}", self.namespace, self.name)
    }
}

/// What the workload collaborator reports about a receiver.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ReceiverObservation {
    pub namespace: String,
    pub name: String,
    /// At least one instance is available.
    pub available: bool,
    pub address: Option<String>,
}

/// What the binding collaborator reports about a binding.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BindingObservation {
    pub ready: bool,
    pub sink_uri: Option<String>,
}
