//! Required-field check turning a string mapping into a [`PeerRecord`].

use std::collections::BTreeMap;

use crate::error::MissingFields;
use crate::types::PeerRecord;

pub const URL: &str = "url";
pub const NAGIOS_CONTEXT: &str = "nagios_context";
pub const THRUK_KEY: &str = "thruk_key";
pub const THRUK_ID: &str = "thruk_id";

/// Where a validated record gets its identity from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Identity {
    /// Computed from `nagios_context`; `thruk_id` is not required.
    Derived,
    /// Taken from the `thruk_id` field, which is then required.
    Published,
}

impl Identity {
    pub fn required_fields(self) -> &'static [&'static str] {
        match self {
            Identity::Derived => &[URL, NAGIOS_CONTEXT, THRUK_KEY],
            Identity::Published => &[URL, NAGIOS_CONTEXT, THRUK_KEY, THRUK_ID],
        }
    }
}

/// Required fields that are absent or empty, in schema order.
pub fn missing_fields(candidate: &BTreeMap<String, String>, identity: Identity) -> Vec<String> {
    identity
        .required_fields()
        .iter()
        .filter(|field| candidate.get(**field).map_or(true, |v| v.is_empty()))
        .map(|field| field.to_string())
        .collect()
}

/// Validate a candidate peer, reporting every missing field at once.
pub fn validate(
    candidate: &BTreeMap<String, String>,
    identity: Identity,
) -> Result<PeerRecord, MissingFields> {
    let missing = missing_fields(candidate, identity);
    if !missing.is_empty() {
        return Err(MissingFields(missing));
    }

    let field = |name: &str| candidate.get(name).cloned().unwrap_or_default();
    let nagios_context = field(NAGIOS_CONTEXT);
    let id = match identity {
        Identity::Derived => PeerRecord::derive_id(&nagios_context),
        Identity::Published => field(THRUK_ID),
    };
    let extra = candidate
        .iter()
        .filter(|(k, v)| !v.is_empty() && ![URL, NAGIOS_CONTEXT, THRUK_KEY, THRUK_ID].contains(&k.as_str()))
        .map(|(k, v)| (k.clone(), v.clone()))
        .collect();

    Ok(PeerRecord {
        id,
        url: field(URL),
        nagios_context,
        thruk_key: field(THRUK_KEY),
        extra,
    })
}
