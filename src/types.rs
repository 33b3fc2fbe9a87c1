//! Data structures shared by the reconciliation pass.
//!
//! Peer records and render contexts are typed at the boundary: the
//! declarative parser and the relation reader turn untyped mappings into
//! [`PeerRecord`]s, and nothing past that point sees a raw mapping.  Every
//! pass rebuilds its [`PeerSet`] and [`RenderContext`] from scratch.

use std::collections::BTreeMap;
use std::path::PathBuf;

use md5::{Digest, Md5};
use serde::{Deserialize, Serialize};

use crate::config::UnitConfig;

/// A monitored endpoint aggregated into the rendered Thruk configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PeerRecord {
    /// Stable identity, `hex(md5(nagios_context))` for declared peers or the
    /// published `thruk_id` for related units.
    pub id: String,
    pub url: String,
    pub nagios_context: String,
    pub thruk_key: String,
    /// Any other scalar attribute supplied by the source.
    #[serde(default)]
    pub extra: BTreeMap<String, String>,
}

impl PeerRecord {
    /// Derive the peer identity from its natural key.
    pub fn derive_id(nagios_context: &str) -> String {
        hex::encode(Md5::digest(nagios_context.as_bytes()))
    }
}

/// Ordered list of validated peers for one pass.
pub type PeerSet = Vec<PeerRecord>;

/// Immutable snapshot handed to the renderer.
#[derive(Debug, Clone, Serialize)]
pub struct RenderContext {
    /// Name of this Thruk site.
    pub site_name: String,
    /// Free-form local settings, exposed to templates as `settings.<key>`.
    pub settings: BTreeMap<String, String>,
    pub peers: PeerSet,
}

impl RenderContext {
    pub fn new(unit: &UnitConfig, peers: PeerSet) -> Self {
        Self {
            site_name: unit.site_name.clone(),
            settings: unit.settings.clone(),
            peers,
        }
    }
}

/// One rendered configuration file inside the workload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Template name relative to the template directory.
    pub template: String,
    /// Absolute path of the file inside the workload.
    pub path: PathBuf,
}

pub type ArtifactSet = Vec<Artifact>;

/// Data one remote unit has published on a relation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RemoteUnitView {
    pub unit: String,
    pub data: BTreeMap<String, String>,
}

/// A trigger delivered to the reconciler.
///
/// Events arrive on a single channel and are handled strictly one at a time.
/// They deserialize from JSON lines such as
/// `{"kind": "relation-changed", "relation_id": 3, "unit": "agent/0", "data": {...}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum Event {
    /// The workload backend is reachable and ready for a service layer.
    WorkloadReady,
    /// The unit configuration changed.
    ConfigChanged(UnitConfig),
    /// A remote unit published or updated its relation data.
    RelationChanged {
        relation_id: u32,
        unit: String,
        #[serde(default)]
        data: BTreeMap<String, String>,
    },
    /// A remote unit left the relation.
    RelationDeparted { relation_id: u32, unit: String },
}

impl Event {
    pub fn name(&self) -> &'static str {
        match self {
            Event::WorkloadReady => "workload-ready",
            Event::ConfigChanged(_) => "config-changed",
            Event::RelationChanged { .. } => "relation-changed",
            Event::RelationDeparted { .. } => "relation-departed",
        }
    }
}
