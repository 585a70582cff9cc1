//! Deterministic names for database-side objects and collaborator resources.
//!
//! One name covers the notify function, every per-table trigger, and the
//! NOTIFY channel, so a pipeline owns exactly one channel regardless of how
//! many tables it captures. The resource UID is always part of the name, so
//! two resources with the same name never collide.

use std::sync::LazyLock;

use regex::Regex;

/// Prefix of every generated database object name.
pub const NAME_PREFIX: &str = "postgressource";

/// PostgreSQL's NAMEDATALEN - 1; longer identifiers are silently truncated.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Lowercase only: unquoted identifiers fold to lowercase in DDL, and the
/// catalog lookups compare against the folded name.
static IDENTIFIER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^[a-z_][a-z0-9_]*$").expect("identifier pattern is valid")
});

/// Whether `ident` may be interpolated into DDL without quoting and still
/// match its catalog entry.
pub fn is_valid_identifier(ident: &str) -> bool {
    ident.len() <= MAX_IDENTIFIER_LEN && IDENTIFIER.is_match(ident)
}

/// Map every character outside `[a-z0-9_]` to `_`, lowercasing ASCII.
fn sanitize(segment: &str) -> String {
    segment
        .chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_lowercase() || c.is_ascii_digit() || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Function, trigger, and channel name for a resource.
///
/// `postgressource_<name>_<uid>`, sanitized. If the result would exceed the
/// identifier limit the name segment is shortened; the UID is kept whole.
pub fn postgres_name(resource_name: &str, resource_uid: &str) -> String {
    let uid = sanitize(resource_uid);
    let mut name = sanitize(resource_name);
    let fixed = NAME_PREFIX.len() + 2 + uid.len();
    let budget = MAX_IDENTIFIER_LEN.saturating_sub(fixed);
    name.truncate(budget);

    let mut full = format!("{NAME_PREFIX}_{name}_{uid}");
    full.truncate(MAX_IDENTIFIER_LEN);
    full
}

/// Name of the receiver workload requested for a pipeline.
pub fn receiver_name(resource_name: &str) -> String {
    format!("{resource_name}-receiver")
}

/// Name of the delivery binding requested for a pipeline.
pub fn binding_name(resource_name: &str) -> String {
    format!("{resource_name}-sinkbinding")
}
