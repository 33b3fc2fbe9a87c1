use super::{enabled_services, merge_layer, Layer, ServiceHandle, Workload};
use crate::config::Config;
use crate::error::WorkloadError;
use crate::types::Event;
use anyhow::Result;
use async_trait::async_trait;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    StartContainerOptions, StopContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::HostConfig;
use bollard::system::EventsOptions;
use bollard::Docker;
use futures_util::stream::{StreamExt, TryStreamExt};
use log::{debug, error, info, warn};
use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Component, Path, PathBuf};
use std::time::Duration;
use tokio::fs;
use tokio::sync::{mpsc, Mutex};
use tokio::time::sleep;

/// Workload backed by the local Docker daemon.
///
/// Each service runs in its own container named `<prefix>-<service>`. The
/// host directory `state_dir` is bound at `config_dir` inside every
/// container, so files are read and written on the host side of the bind.
pub struct DockerWorkload {
    docker: Docker,
    container_prefix: String,
    image: String,
    mount: BindMount,
    layers: Mutex<BTreeMap<String, Layer>>,
}

/// Host directory `state_dir` seen inside the workload at `config_dir`.
#[derive(Debug, Clone)]
pub struct BindMount {
    pub config_dir: PathBuf,
    pub state_dir: PathBuf,
}

impl BindMount {
    /// Map a path inside the workload to its host location.
    fn host_path(&self, path: &Path) -> Result<PathBuf, WorkloadError> {
        if path.components().any(|c| c == Component::ParentDir) {
            return Err(WorkloadError::OutsideMount(path.to_path_buf()));
        }
        path.strip_prefix(&self.config_dir)
            .map(|relative| self.state_dir.join(relative))
            .map_err(|_| WorkloadError::OutsideMount(path.to_path_buf()))
    }

    fn bind_spec(&self) -> String {
        format!("{}:{}", self.state_dir.display(), self.config_dir.display())
    }

    pub async fn read(&self, path: &Path) -> Result<Vec<u8>, WorkloadError> {
        let host = self.host_path(path)?;
        fs::read(&host).await.map_err(|source| {
            if source.kind() == ErrorKind::NotFound {
                WorkloadError::FileNotFound(path.to_path_buf())
            } else {
                WorkloadError::Io { path: host, source }
            }
        })
    }

    pub async fn write(&self, path: &Path, content: &[u8]) -> Result<(), WorkloadError> {
        let host = self.host_path(path)?;
        let io = |path: &Path| {
            let path = path.to_path_buf();
            move |source: std::io::Error| WorkloadError::Io { path, source }
        };
        let parent = host
            .parent()
            .ok_or_else(|| WorkloadError::OutsideMount(path.to_path_buf()))?;
        fs::create_dir_all(parent).await.map_err(io(parent))?;

        // Write to temp file, then rename for atomicity.
        let file_name = host
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let tmp = parent.join(format!(".{}.tmp", file_name));
        fs::write(&tmp, content).await.map_err(io(&tmp))?;
        fs::rename(&tmp, &host).await.map_err(io(&host))?;
        debug!("Wrote {} ({} bytes)", path.display(), content.len());
        Ok(())
    }
}

impl DockerWorkload {
    pub fn connect(config: &Config) -> Result<Self, WorkloadError> {
        // Handles the unix socket on Linux.
        let docker = Docker::connect_with_local_defaults()?;
        Ok(Self {
            docker,
            container_prefix: config.container_prefix.clone(),
            image: config.image.clone(),
            mount: BindMount {
                config_dir: config.config_dir.clone(),
                state_dir: config.state_dir.clone(),
            },
            layers: Mutex::new(BTreeMap::new()),
        })
    }

    fn container_name(&self, service: &str) -> String {
        format!("{}-{}", self.container_prefix, service)
    }

    /// Watcher that reports readiness for the container of `service`.
    pub fn monitor(&self, service: &str) -> DockerMonitor {
        DockerMonitor {
            docker: self.docker.clone(),
            container: self.container_name(service),
        }
    }

    async fn ensure_image(&self) -> Result<(), WorkloadError> {
        let opts = CreateImageOptions {
            from_image: self.image.clone(),
            ..Default::default()
        };
        let progress: Vec<_> = self
            .docker
            .create_image(Some(opts), None, None)
            .try_collect()
            .await?;
        debug!("Pulled {} ({} progress messages)", self.image, progress.len());
        Ok(())
    }

    async fn create(&self, name: &str, command: &str) -> Result<(), WorkloadError> {
        self.ensure_image().await?;
        fs::create_dir_all(&self.mount.state_dir)
            .await
            .map_err(|source| WorkloadError::Io {
                path: self.mount.state_dir.clone(),
                source,
            })?;

        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };
        let config = ContainerConfig {
            image: Some(self.image.clone()),
            cmd: Some(vec!["/bin/sh".into(), "-c".into(), command.to_string()]),
            host_config: Some(HostConfig {
                binds: Some(vec![self.mount.bind_spec()]),
                ..Default::default()
            }),
            ..Default::default()
        };
        self.docker.create_container(Some(options), config).await?;
        info!("Created container {} from {}", name, self.image);
        Ok(())
    }
}

#[async_trait]
impl Workload for DockerWorkload {
    async fn pull(&self, path: &Path) -> Result<Vec<u8>, WorkloadError> {
        self.mount.read(path).await
    }

    async fn push(&self, path: &Path, content: &[u8]) -> Result<(), WorkloadError> {
        self.mount.write(path, content).await
    }

    async fn add_layer(&self, label: &str, layer: Layer, combine: bool) -> Result<(), WorkloadError> {
        let mut layers = self.layers.lock().await;
        merge_layer(&mut layers, label, layer, combine)
    }

    async fn autostart(&self) -> Result<(), WorkloadError> {
        let plan = enabled_services(&*self.layers.lock().await);
        for (service, spec) in plan {
            let name = self.container_name(&service);
            let running = match self.get_service(&service).await {
                Ok(handle) => handle.is_running(),
                Err(WorkloadError::ServiceNotFound(_)) => {
                    self.create(&name, &spec.command).await?;
                    false
                }
                Err(e) => return Err(e),
            };
            if !running {
                info!("Autostarting {}", name);
                self.start(&service).await?;
            }
        }
        Ok(())
    }

    async fn get_service(&self, name: &str) -> Result<ServiceHandle, WorkloadError> {
        let container = self.container_name(name);
        let detail = self
            .docker
            .inspect_container(&container, None::<InspectContainerOptions>)
            .await
            .map_err(|e| not_found(e, name))?;
        let running = detail
            .state
            .and_then(|state| state.running)
            .unwrap_or(false);
        Ok(ServiceHandle {
            name: name.to_string(),
            running,
        })
    }

    async fn stop(&self, name: &str) -> Result<(), WorkloadError> {
        self.docker
            .stop_container(&self.container_name(name), None::<StopContainerOptions>)
            .await
            .map_err(|e| not_found(e, name))
    }

    async fn start(&self, name: &str) -> Result<(), WorkloadError> {
        self.docker
            .start_container(&self.container_name(name), None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| not_found(e, name))
    }
}

fn not_found(err: bollard::errors::Error, service: &str) -> WorkloadError {
    match err {
        bollard::errors::Error::DockerResponseServerError {
            status_code: 404, ..
        } => WorkloadError::ServiceNotFound(service.to_string()),
        other => other.into(),
    }
}

/// Emits [`Event::WorkloadReady`] whenever the Docker daemon becomes
/// reachable and whenever the managed container is destroyed.
pub struct DockerMonitor {
    docker: Docker,
    container: String,
}

impl DockerMonitor {
    pub async fn run(self, events: mpsc::Sender<Event>) -> Result<()> {
        loop {
            if let Err(e) = self.docker.ping().await {
                error!("Failed to reach Docker: {}. Retrying in 5s...", e);
                sleep(Duration::from_secs(5)).await;
                continue;
            }
            info!("Docker reachable, workload ready");
            if events.send(Event::WorkloadReady).await.is_err() {
                return Err(anyhow::anyhow!("Channel closed"));
            }

            let opts = EventsOptions::<String> {
                filters: [
                    ("type", [String::from("container")].as_slice()),
                    ("event", [String::from("destroy")].as_slice()),
                    ("container", [self.container.clone()].as_slice()),
                ]
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_vec()))
                .collect(),
                ..Default::default()
            };
            let mut stream = self.docker.events(Some(opts));

            info!("Listening for Docker events on {}...", self.container);
            while let Some(msg) = stream.next().await {
                match msg {
                    Ok(event) => {
                        let action = event.action.unwrap_or_default();
                        warn!("Container {} {}, re-running workload setup", self.container, action);
                        if events.send(Event::WorkloadReady).await.is_err() {
                            return Err(anyhow::anyhow!("Channel closed"));
                        }
                    }
                    Err(e) => {
                        error!("Error in Docker event stream: {}", e);
                        break; // Break inner loop to reconnect
                    }
                }
            }

            warn!("Docker event stream ended. Reconnecting in 2s...");
            sleep(Duration::from_secs(2)).await;
        }
    }
}
