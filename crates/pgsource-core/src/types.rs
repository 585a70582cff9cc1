//! Pipeline resource types.
//!
//! A `Pipeline` is the declarative request "capture row changes on these
//! tables and deliver them to this sink". Its `ObjectMeta` carries the
//! identity the naming scheme derives database object names from.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::error::{CoreError, CoreResult};
use crate::naming;
use crate::status::PipelineStatus;

/// Store key of a pipeline, `{namespace}/{name}`.
pub type PipelineKey = String;

/// Identity and bookkeeping shared by every stored resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    /// Stable unique id, assigned by the store on first admission.
    #[serde(default)]
    pub uid: String,
    /// Incremented by the store whenever the spec changes.
    #[serde(default)]
    pub generation: u64,
    /// Set when deletion was requested; the resource stays until finalized.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deletion_requested_at: Option<u64>,
    #[serde(default)]
    pub created_at: u64,
    #[serde(default)]
    pub updated_at: u64,
}

impl ObjectMeta {
    pub fn new(namespace: &str, name: &str) -> Self {
        Self {
            namespace: namespace.to_string(),
            name: name.to_string(),
            ..Default::default()
        }
    }

    pub fn key(&self) -> PipelineKey {
        format!("{}/{}", self.namespace, self.name)
    }

    pub fn is_deleting(&self) -> bool {
        self.deletion_requested_at.is_some()
    }
}

/// Split a `{namespace}/{name}` key.
pub fn split_key(key: &str) -> CoreResult<(&str, &str)> {
    match key.split_once('/') {
        Some((ns, name)) if !ns.is_empty() && !name.is_empty() && !name.contains('/') => {
            Ok((ns, name))
        }
        _ => Err(CoreError::InvalidKey(key.to_string())),
    }
}

/// A table to capture changes from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableSpec {
    pub name: String,
}

impl TableSpec {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
        }
    }
}

/// Reference to the secret holding database connection info.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialRef {
    pub secret: String,
}

/// Where the receiver delivers events.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SinkRef {
    Uri {
        uri: String,
    },
    Reference {
        kind: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        namespace: Option<String>,
        name: String,
    },
}

/// Desired state of a CDC pipeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineSpec {
    /// Tables to capture, processed in list order.
    #[serde(default)]
    pub tables: Vec<TableSpec>,
    pub credentials: CredentialRef,
    pub sink: SinkRef,
}

impl PipelineSpec {
    /// Check admission invariants: unique, well-formed table names and a
    /// non-empty credential reference. Zero tables is valid.
    pub fn validate(&self) -> CoreResult<()> {
        if self.credentials.secret.is_empty() {
            return Err(CoreError::MissingField("credentials.secret"));
        }
        let mut seen = HashSet::new();
        for table in &self.tables {
            if !naming::is_valid_identifier(&table.name) {
                return Err(CoreError::InvalidIdentifier(table.name.clone()));
            }
            if !seen.insert(table.name.as_str()) {
                return Err(CoreError::DuplicateTable(table.name.clone()));
            }
        }
        Ok(())
    }
}

/// A pipeline resource: identity, desired state, and observed state.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Pipeline {
    pub metadata: ObjectMeta,
    pub spec: PipelineSpec,
    #[serde(default)]
    pub status: PipelineStatus,
}

impl Pipeline {
    pub fn key(&self) -> PipelineKey {
        self.metadata.key()
    }

    /// Name of the notify function, its triggers, and the notification channel.
    pub fn postgres_name(&self) -> String {
        naming::postgres_name(&self.metadata.name, &self.metadata.uid)
    }

    /// Validate identity and spec.
    pub fn validate(&self) -> CoreResult<()> {
        if self.metadata.namespace.is_empty() {
            return Err(CoreError::MissingField("metadata.namespace"));
        }
        if self.metadata.name.is_empty() {
            return Err(CoreError::MissingField("metadata.name"));
        }
        self.spec.validate()
    }
}
