//! redb table definitions for the pgsource state store.
//!
//! Each table uses `&str` keys (`{namespace}/{name}`) and `&[u8]` values
//! (JSON-serialized records).

use redb::TableDefinition;

/// Pipeline resources keyed by `{namespace}/{name}`.
pub const PIPELINES: TableDefinition<&str, &[u8]> = TableDefinition::new("pipelines");

/// Receiver requests and reports keyed by `{namespace}/{receiver}`.
pub const RECEIVERS: TableDefinition<&str, &[u8]> = TableDefinition::new("receivers");

/// Binding requests and reports keyed by `{namespace}/{binding}`.
pub const BINDINGS: TableDefinition<&str, &[u8]> = TableDefinition::new("bindings");
