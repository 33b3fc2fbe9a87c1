//! Change-gated restart of the managed service.
//!
//! Artifacts are hashed before and after they are written; the service is
//! restarted only when some hash moved, the service exists and it is running.
//! Either use the two-phase [`ChangeCheck`] directly or wrap the writes with
//! [`apply_if_changed`].

use std::future::Future;

use log::{debug, error, info, warn};
use sha2::{Digest, Sha256};

use crate::error::{ReconcileError, WorkloadError};
use crate::runtime::Workload;
use crate::status::{StatusProjector, StatusSink};
use crate::types::ArtifactSet;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestartOutcome {
    /// The service has not been created yet; nothing to restart.
    NoServiceYet,
    Unchanged,
    Restarted,
    /// Artifacts changed but the service is stopped and will read them on start.
    ChangedNoRestart,
}

pub fn digest(content: &[u8]) -> String {
    hex::encode(Sha256::digest(content))
}

/// Content hash of every artifact; a missing or unreadable file hashes as empty.
pub async fn snapshot<W: Workload + ?Sized>(workload: &W, artifacts: &ArtifactSet) -> Vec<String> {
    let mut hashes = Vec::with_capacity(artifacts.len());
    for artifact in artifacts {
        let content = match workload.pull(&artifact.path).await {
            Ok(content) => content,
            Err(WorkloadError::FileNotFound(_)) => Vec::new(),
            Err(e) => {
                warn!("Cannot read {}: {}; treating as empty", artifact.path.display(), e);
                Vec::new()
            }
        };
        hashes.push(digest(&content));
    }
    hashes
}

/// First phase of a change check: the hashes taken before writing.
pub struct ChangeCheck<'a, W: ?Sized> {
    workload: &'a W,
    artifacts: &'a ArtifactSet,
    before: Vec<String>,
}

impl<'a, W: Workload + ?Sized> ChangeCheck<'a, W> {
    pub async fn begin(workload: &'a W, artifacts: &'a ArtifactSet) -> ChangeCheck<'a, W> {
        let before = snapshot(workload, artifacts).await;
        ChangeCheck {
            workload,
            artifacts,
            before,
        }
    }

    /// Whether any artifact differs from its state at [`ChangeCheck::begin`].
    pub async fn changed(&self) -> bool {
        let after = snapshot(self.workload, self.artifacts).await;
        self.before
            .iter()
            .zip(after.iter())
            .any(|(before, after)| before != after)
    }

    /// Second phase: decide whether `service` needs a restart and do it.
    ///
    /// Stop and start failures are returned as-is, leaving the Maintenance
    /// status in place.
    pub async fn conclude<S: StatusSink>(
        self,
        service: &str,
        status: &mut StatusProjector<S>,
    ) -> Result<RestartOutcome, WorkloadError> {
        let changed = self.changed().await;
        let handle = match self.workload.get_service(service).await {
            Ok(handle) => handle,
            Err(WorkloadError::ServiceNotFound(_)) => {
                debug!("Service {} not created yet, skipping restart", service);
                return Ok(RestartOutcome::NoServiceYet);
            }
            Err(e) => return Err(e),
        };

        if !changed {
            debug!("Configuration of {} unchanged", service);
            return Ok(RestartOutcome::Unchanged);
        }
        if !handle.is_running() {
            info!("Configuration of {} changed; service stopped, not restarting", service);
            return Ok(RestartOutcome::ChangedNoRestart);
        }

        info!("Configuration of {} changed, restarting", service);
        status.maintenance(format!("restarting {}", service));
        self.workload.stop(service).await?;
        self.workload.start(service).await?;
        status.resume();
        Ok(RestartOutcome::Restarted)
    }
}

/// Run `write` between the two phases of a [`ChangeCheck`].
///
/// A render failure means nothing was written, so it is returned without
/// comparing hashes.  A workload failure may leave some artifacts written;
/// the check is still concluded before that failure is returned.
pub async fn apply_if_changed<W, S, F, Fut>(
    workload: &W,
    artifacts: &ArtifactSet,
    service: &str,
    status: &mut StatusProjector<S>,
    write: F,
) -> Result<RestartOutcome, ReconcileError>
where
    W: Workload + ?Sized,
    S: StatusSink,
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<(), ReconcileError>>,
{
    let check = ChangeCheck::begin(workload, artifacts).await;
    match write().await {
        Ok(()) => Ok(check.conclude(service, status).await?),
        Err(ReconcileError::Render(e)) => Err(e.into()),
        Err(write_error) => {
            match check.conclude(service, status).await {
                Ok(outcome) => warn!("Artifact write failed part-way; concluded with {:?}", outcome),
                Err(e) => error!("Artifact write failed part-way and restart failed: {}", e),
            }
            Err(write_error)
        }
    }
}
