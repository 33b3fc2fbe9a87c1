//! Peers aggregated from relation data published by agent units.

use std::collections::BTreeMap;

use log::{debug, warn};

use super::validate::{missing_fields, validate, Identity};
use crate::error::{MissingFields, RelationDataError};
use crate::types::{PeerSet, RemoteUnitView};

/// Last known relation data of every remote unit, keyed by relation id.
///
/// Units keep the order in which they first joined their relation.
#[derive(Debug, Default, Clone)]
pub struct RelationView {
    relations: BTreeMap<u32, Vec<RemoteUnitView>>,
}

impl RelationView {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record the data a unit published, replacing anything it sent before.
    pub fn update(&mut self, relation_id: u32, unit: &str, data: BTreeMap<String, String>) {
        let units = self.relations.entry(relation_id).or_default();
        match units.iter_mut().find(|view| view.unit == unit) {
            Some(view) => view.data = data,
            None => units.push(RemoteUnitView {
                unit: unit.to_string(),
                data,
            }),
        }
    }

    /// Forget a unit that left the relation.
    pub fn depart(&mut self, relation_id: u32, unit: &str) {
        if let Some(units) = self.relations.get_mut(&relation_id) {
            units.retain(|view| view.unit != unit);
            if units.is_empty() {
                self.relations.remove(&relation_id);
            }
        }
    }

    pub fn get(&self, relation_id: u32, unit: &str) -> Option<&RemoteUnitView> {
        self.relations
            .get(&relation_id)?
            .iter()
            .find(|view| view.unit == unit)
    }

    /// Every unit, in relation then join order.
    pub fn units(&self) -> impl Iterator<Item = &RemoteUnitView> {
        self.relations.values().flatten()
    }
}

/// Refuse a unit whose published data lacks any required field.
pub fn check_unit(view: &RemoteUnitView) -> Result<(), RelationDataError> {
    let missing = missing_fields(&view.data, Identity::Published);
    if missing.is_empty() {
        Ok(())
    } else {
        Err(RelationDataError {
            unit: view.unit.clone(),
            missing: MissingFields(missing),
        })
    }
}

/// Aggregate the peers of every unit, keeping published identities.
///
/// Units that have not yet published a complete record are left out.
pub fn resolve_from_relations<'a>(units: impl IntoIterator<Item = &'a RemoteUnitView>) -> PeerSet {
    units
        .into_iter()
        .filter_map(|view| match validate(&view.data, Identity::Published) {
            Ok(peer) => Some(peer),
            Err(missing) => {
                debug!("Skipping unit {} until it publishes {}", view.unit, missing);
                None
            }
        })
        .collect()
}

/// Log identities that appear more than once; they are kept as-is.
pub fn warn_duplicate_ids(peers: &PeerSet) {
    let mut seen = BTreeMap::new();
    for peer in peers {
        if let Some(previous) = seen.insert(peer.id.as_str(), peer.url.as_str()) {
            warn!(
                "Peer id {} is shared by {} and {} (same nagios_context?)",
                peer.id, previous, peer.url
            );
        }
    }
}
