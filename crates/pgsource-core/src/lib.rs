//! pgsource-core — shared types for the pgsource CDC controller.
//!
//! Holds the declarative `Pipeline` resource (metadata, spec, status), the
//! condition set reported by reconciliation, the deterministic naming scheme
//! for database-side objects, and the daemon's TOML configuration.

pub mod config;
pub mod descriptors;
pub mod error;
pub mod naming;
pub mod status;
pub mod types;

pub use config::PgSourceConfig;
pub use descriptors::*;
pub use error::{CoreError, CoreResult};
pub use status::{Condition, ConditionStatus, ConditionType, PipelineStatus};
pub use types::*;

/// Current Unix time in seconds.
pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}
