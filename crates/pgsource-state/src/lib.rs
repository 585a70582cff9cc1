//! pgsource-state — embedded resource store for pgsource.
//!
//! Backed by [redb](https://docs.rs/redb), persists pipeline resources and
//! the declarative receiver/binding requests emitted for them, plus the
//! status those collaborators report back.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns under
//! `{namespace}/{name}` keys. Every admission, deletion request, and
//! collaborator status report is published as a [`StoreEvent`] on a
//! broadcast channel, which the controller uses as its watch stream.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::StateStore;
pub use types::*;
