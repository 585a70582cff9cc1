//! pgsource-schema — the database side of a CDC pipeline.
//!
//! Everything here talks plain SQL through the [`Database`] trait: catalog
//! lookups answering "does X exist", and the two DDL templates (notify
//! function, per-table trigger) plus their drops.
//!
//! # Components
//!
//! - **`db`** — the `Database` trait and its `sqlx::PgPool` implementation
//! - **`sql`** — DDL templates and catalog queries
//! - **`introspect`** — read-only existence checks (`SchemaIntrospector`)
//! - **`mutate`** — guarded create / idempotent drop (`SchemaMutator`)
//!
//! Nothing is cached: every check re-queries the catalog, so a mutation is
//! visible to the very next introspection call.

pub mod db;
pub mod error;
pub mod introspect;
pub mod mutate;
pub mod sql;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use db::{Database, PgDatabase, Row};
pub use error::{SchemaError, SchemaResult};
pub use introspect::{SchemaIntrospector, TriggerCoverage};
pub use mutate::SchemaMutator;
