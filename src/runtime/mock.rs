//! In-memory workload for tests.
//!
//! Files and services live in memory and every mutating call is recorded,
//! so reconciliation code can be asserted on without a container engine.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::{enabled_services, merge_layer, Layer, ServiceHandle, Workload};
use crate::error::WorkloadError;

/// A mutating call made against [`MockWorkload`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WorkloadAction {
    Push(PathBuf),
    AddLayer(String),
    Autostart,
    Stop(String),
    Start(String),
}

#[derive(Debug, Default)]
struct MockState {
    files: BTreeMap<PathBuf, Vec<u8>>,
    layers: BTreeMap<String, Layer>,
    /// Existing services and whether they run.
    services: BTreeMap<String, bool>,
    actions: Vec<WorkloadAction>,
    fail_push: Option<PathBuf>,
    fail_stop: bool,
}

#[derive(Debug, Default)]
pub struct MockWorkload {
    state: Mutex<MockState>,
}

impl MockWorkload {
    pub fn new() -> Self {
        Self::default()
    }

    /// A workload where `name` already exists.
    pub fn with_service(name: &str, running: bool) -> Self {
        let mut state = MockState::default();
        state.services.insert(name.to_string(), running);
        Self {
            state: Mutex::new(state),
        }
    }

    pub async fn set_file(&self, path: impl Into<PathBuf>, content: &[u8]) {
        self.state.lock().await.files.insert(path.into(), content.to_vec());
    }

    pub async fn file(&self, path: impl AsRef<Path>) -> Option<Vec<u8>> {
        self.state.lock().await.files.get(path.as_ref()).cloned()
    }

    /// Make every push to `path` fail.
    pub async fn fail_push_on(&self, path: impl Into<PathBuf>) {
        self.state.lock().await.fail_push = Some(path.into());
    }

    pub async fn fail_stop(&self) {
        self.state.lock().await.fail_stop = true;
    }

    pub async fn actions(&self) -> Vec<WorkloadAction> {
        self.state.lock().await.actions.clone()
    }

    /// Number of stop/start cycles issued for `name`.
    pub async fn restarts(&self, name: &str) -> usize {
        self.state
            .lock()
            .await
            .actions
            .iter()
            .filter(|a| matches!(a, WorkloadAction::Start(n) if n == name))
            .count()
    }
}

#[async_trait]
impl Workload for MockWorkload {
    async fn pull(&self, path: &Path) -> Result<Vec<u8>, WorkloadError> {
        self.state
            .lock()
            .await
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| WorkloadError::FileNotFound(path.to_path_buf()))
    }

    async fn push(&self, path: &Path, content: &[u8]) -> Result<(), WorkloadError> {
        let mut state = self.state.lock().await;
        if state.fail_push.as_deref() == Some(path) {
            return Err(WorkloadError::Io {
                path: path.to_path_buf(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "injected push failure"),
            });
        }
        state.files.insert(path.to_path_buf(), content.to_vec());
        state.actions.push(WorkloadAction::Push(path.to_path_buf()));
        Ok(())
    }

    async fn add_layer(&self, label: &str, layer: Layer, combine: bool) -> Result<(), WorkloadError> {
        let mut state = self.state.lock().await;
        merge_layer(&mut state.layers, label, layer, combine)?;
        state.actions.push(WorkloadAction::AddLayer(label.to_string()));
        Ok(())
    }

    async fn autostart(&self) -> Result<(), WorkloadError> {
        let mut state = self.state.lock().await;
        for name in enabled_services(&state.layers).into_keys() {
            state.services.insert(name, true);
        }
        state.actions.push(WorkloadAction::Autostart);
        Ok(())
    }

    async fn get_service(&self, name: &str) -> Result<ServiceHandle, WorkloadError> {
        let state = self.state.lock().await;
        let running = state
            .services
            .get(name)
            .copied()
            .ok_or_else(|| WorkloadError::ServiceNotFound(name.to_string()))?;
        Ok(ServiceHandle {
            name: name.to_string(),
            running,
        })
    }

    async fn stop(&self, name: &str) -> Result<(), WorkloadError> {
        let mut state = self.state.lock().await;
        if state.fail_stop {
            return Err(WorkloadError::Control {
                service: name.to_string(),
                reason: "injected stop failure".into(),
            });
        }
        match state.services.get_mut(name) {
            Some(running) => *running = false,
            None => return Err(WorkloadError::ServiceNotFound(name.to_string())),
        }
        state.actions.push(WorkloadAction::Stop(name.to_string()));
        Ok(())
    }

    async fn start(&self, name: &str) -> Result<(), WorkloadError> {
        let mut state = self.state.lock().await;
        match state.services.get_mut(name) {
            Some(running) => *running = true,
            None => return Err(WorkloadError::ServiceNotFound(name.to_string())),
        }
        state.actions.push(WorkloadAction::Start(name.to_string()));
        Ok(())
    }
}
