//! Peers declared inline in the unit configuration.
//!
//! The `peers` property is a YAML mapping of peer name to attributes:
//!
//! ```yaml
//! dc1:
//!   url: https://dc1.example.com/thruk/
//!   nagios_context: dc1
//!   thruk_key: s3cret
//! ```
//!
//! The whole document is accepted or rejected; a single bad entry rejects the
//! set.

use std::collections::BTreeMap;

use log::warn;
use serde_yaml::Value;

use super::validate::{validate, Identity};
use crate::error::ConfigError;
use crate::types::PeerSet;

/// Name of the configuration property holding the declaration.
pub const PEERS_PROPERTY: &str = "peers";

/// Parse and validate the declaration, preserving declaration order.
pub fn resolve_from_declaration(raw: &str) -> Result<PeerSet, ConfigError> {
    if raw.trim().is_empty() {
        return Ok(PeerSet::new());
    }

    let malformed = |reason: String| ConfigError::MalformedSyntax {
        property: PEERS_PROPERTY.to_string(),
        reason,
    };

    let document: Value = serde_yaml::from_str(raw).map_err(|e| malformed(e.to_string()))?;
    let entries = match document {
        Value::Null => return Ok(PeerSet::new()),
        Value::Mapping(entries) => entries,
        _ => return Err(malformed("expected a mapping of peer name to attributes".into())),
    };

    let mut peers = PeerSet::with_capacity(entries.len());
    let mut invalid = Vec::new();
    for (key, attributes) in &entries {
        let name = scalar(key).ok_or_else(|| malformed("peer names must be scalars".into()))?;
        let candidate = match attributes {
            Value::Mapping(fields) => fields
                .iter()
                .filter_map(|(k, v)| Some((scalar(k)?, scalar(v)?)))
                .collect(),
            Value::Null => BTreeMap::new(),
            _ => {
                warn!("Peer {} attributes are not a mapping", name);
                invalid.push(name);
                continue;
            }
        };
        match validate(&candidate, Identity::Derived) {
            Ok(peer) => peers.push(peer),
            Err(missing) => {
                warn!("Peer {} rejected: {}", name, missing);
                invalid.push(name);
            }
        }
    }

    if !invalid.is_empty() {
        return Err(ConfigError::InvalidPeers {
            property: PEERS_PROPERTY.to_string(),
            names: invalid,
        });
    }
    Ok(peers)
}

fn scalar(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Tagged(tagged) => scalar(&tagged.value),
        Value::Null | Value::Sequence(_) | Value::Mapping(_) => None,
    }
}
