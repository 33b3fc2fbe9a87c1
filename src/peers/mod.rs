//! Peer resolution: declared peers or peers aggregated from relations, both
//! funnelled through the same required-field validator.

pub mod declarative;
pub mod relation;
pub mod validate;

pub use declarative::{resolve_from_declaration, PEERS_PROPERTY};
pub use relation::{check_unit, resolve_from_relations, warn_duplicate_ids, RelationView};
pub use validate::{validate, Identity};
