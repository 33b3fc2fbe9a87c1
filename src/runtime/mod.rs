use std::collections::BTreeMap;
use std::path::Path;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::WorkloadError;

pub mod docker;
pub mod mock;
pub use docker::{BindMount, DockerMonitor, DockerWorkload};
pub use mock::{MockWorkload, WorkloadAction};

/// Observable state of a managed service that exists.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceHandle {
    pub name: String,
    pub running: bool,
}

impl ServiceHandle {
    pub fn is_running(&self) -> bool {
        self.running
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Startup {
    Enabled,
    Disabled,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceSpec {
    pub summary: String,
    pub command: String,
    pub startup: Startup,
}

/// A named set of service definitions; later layers override earlier ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Layer {
    pub summary: String,
    pub description: String,
    pub services: BTreeMap<String, ServiceSpec>,
}

/// The workload control surface the reconciler sequences calls against.
///
/// Process supervision lives behind this trait; the reconciler never starts
/// or watches processes itself.
#[async_trait]
pub trait Workload: Send + Sync {
    /// Read a file. A missing file is [`WorkloadError::FileNotFound`].
    async fn pull(&self, path: &Path) -> Result<Vec<u8>, WorkloadError>;

    /// Replace a file's content in one step.
    async fn push(&self, path: &Path, content: &[u8]) -> Result<(), WorkloadError>;

    async fn add_layer(&self, label: &str, layer: Layer, combine: bool)
        -> Result<(), WorkloadError>;

    /// Start every service whose startup is enabled and which is not running.
    async fn autostart(&self) -> Result<(), WorkloadError>;

    /// Look up a service. An unknown service is [`WorkloadError::ServiceNotFound`].
    async fn get_service(&self, name: &str) -> Result<ServiceHandle, WorkloadError>;

    async fn stop(&self, name: &str) -> Result<(), WorkloadError>;

    async fn start(&self, name: &str) -> Result<(), WorkloadError>;
}

/// Add `layer` under `label`, merging its services into an existing layer
/// when `combine` is set.
pub(crate) fn merge_layer(
    layers: &mut BTreeMap<String, Layer>,
    label: &str,
    layer: Layer,
    combine: bool,
) -> Result<(), WorkloadError> {
    match layers.get_mut(label) {
        Some(existing) if combine => {
            existing.summary = layer.summary;
            existing.description = layer.description;
            existing.services.extend(layer.services);
            Ok(())
        }
        Some(_) => Err(WorkloadError::LayerExists(label.to_string())),
        None => {
            layers.insert(label.to_string(), layer);
            Ok(())
        }
    }
}

/// Services with `startup: enabled` across all layers, in label order.
pub(crate) fn enabled_services(layers: &BTreeMap<String, Layer>) -> BTreeMap<String, ServiceSpec> {
    let mut plan = BTreeMap::new();
    for layer in layers.values() {
        plan.extend(layer.services.clone());
    }
    plan.retain(|_, spec| spec.startup == Startup::Enabled);
    plan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn layer(command: &str, startup: Startup) -> Layer {
        Layer {
            summary: "s".into(),
            description: "d".into(),
            services: [(
                "thruk".to_string(),
                ServiceSpec {
                    summary: "thruk".into(),
                    command: command.into(),
                    startup,
                },
            )]
            .into_iter()
            .collect(),
        }
    }

    #[test]
    fn combine_replaces_services_of_existing_layer() {
        let mut layers = BTreeMap::new();
        merge_layer(&mut layers, "thruk", layer("a", Startup::Enabled), true).unwrap();
        merge_layer(&mut layers, "thruk", layer("b", Startup::Enabled), true).unwrap();
        assert_eq!(enabled_services(&layers)["thruk"].command, "b");
    }

    #[test]
    fn existing_layer_without_combine_is_rejected() {
        let mut layers = BTreeMap::new();
        merge_layer(&mut layers, "thruk", layer("a", Startup::Enabled), false).unwrap();
        assert!(matches!(
            merge_layer(&mut layers, "thruk", layer("b", Startup::Enabled), false),
            Err(WorkloadError::LayerExists(_))
        ));
    }

    #[test]
    fn disabled_services_are_not_planned() {
        let mut layers = BTreeMap::new();
        merge_layer(&mut layers, "thruk", layer("a", Startup::Disabled), true).unwrap();
        assert!(enabled_services(&layers).is_empty());
    }
}
