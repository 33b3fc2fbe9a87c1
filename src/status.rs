//! Unit status projection.
//!
//! Passes return a [`Verdict`]; the reconciler hands it to the
//! [`StatusProjector`] together with the [`Origin`] of the pass.  A Blocked
//! verdict is remembered under its origin and only a later successful pass
//! from the same origin clears it, so an unrelated success (or a workload
//! bootstrap) cannot paper over bad operator input.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use log::{error, info, warn};
use serde::Serialize;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", content = "message", rename_all = "lowercase")]
pub enum UnitStatus {
    Active,
    Blocked(String),
    Maintenance(String),
}

impl fmt::Display for UnitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            UnitStatus::Active => write!(f, "active"),
            UnitStatus::Blocked(reason) => write!(f, "blocked: {}", reason),
            UnitStatus::Maintenance(reason) => write!(f, "maintenance: {}", reason),
        }
    }
}

/// Outcome of a pass as far as the operator is concerned.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Verdict {
    Settled,
    Blocked(String),
}

/// The input a pass was driven by.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub enum Origin {
    /// Workload bootstrap; never clears a block.
    Bootstrap,
    /// The declarative unit configuration.
    Config,
    /// Data published by one remote unit.
    Unit { relation_id: u32, unit: String },
}

/// Where projected statuses end up.
pub trait StatusSink {
    fn set(&mut self, status: &UnitStatus);
}

/// Records every projected status in order.
impl StatusSink for Vec<UnitStatus> {
    fn set(&mut self, status: &UnitStatus) {
        self.push(status.clone());
    }
}

/// Logs every status and optionally mirrors it to a JSON file.
#[derive(Debug, Default)]
pub struct ReportingSink {
    path: Option<PathBuf>,
}

impl ReportingSink {
    pub fn new(path: Option<PathBuf>) -> Self {
        Self { path }
    }

    fn write(&self, status: &UnitStatus) -> anyhow::Result<()> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(status)?;
        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, json)?;
        std::fs::rename(&tmp, path)?;
        Ok(())
    }
}

impl StatusSink for ReportingSink {
    fn set(&mut self, status: &UnitStatus) {
        match status {
            UnitStatus::Blocked(_) => warn!("Unit status: {}", status),
            _ => info!("Unit status: {}", status),
        }
        if let Err(e) = self.write(status) {
            error!("Failed to write status file: {}", e);
        }
    }
}

pub struct StatusProjector<S> {
    sink: S,
    current: Option<UnitStatus>,
    blocks: BTreeMap<Origin, String>,
}

impl<S: StatusSink> StatusProjector<S> {
    pub fn new(sink: S) -> Self {
        Self {
            sink,
            current: None,
            blocks: BTreeMap::new(),
        }
    }

    pub fn current(&self) -> Option<&UnitStatus> {
        self.current.as_ref()
    }

    pub fn sink(&self) -> &S {
        &self.sink
    }

    /// Project the verdict of a pass driven by `origin`.
    pub fn apply(&mut self, origin: Origin, verdict: Verdict) {
        match verdict {
            Verdict::Blocked(reason) => {
                self.blocks.insert(origin, reason);
            }
            Verdict::Settled if origin != Origin::Bootstrap => {
                self.blocks.remove(&origin);
            }
            Verdict::Settled => {}
        }
        self.resume();
    }

    /// Drop the block held by `origin` without projecting anything.
    ///
    /// Called once a pass has accepted its input, so a restart later in the
    /// same pass resumes without the stale reason.
    pub fn settle(&mut self, origin: &Origin) {
        if *origin != Origin::Bootstrap {
            self.blocks.remove(origin);
        }
    }

    /// Transient state while the workload is being acted on.
    pub fn maintenance(&mut self, reason: impl Into<String>) {
        self.set(UnitStatus::Maintenance(reason.into()));
    }

    /// Leave maintenance: Blocked if any block is outstanding, else Active.
    pub fn resume(&mut self) {
        let status = if self.blocks.is_empty() {
            UnitStatus::Active
        } else {
            let reasons: Vec<&str> = self.blocks.values().map(String::as_str).collect();
            UnitStatus::Blocked(reasons.join("; "))
        };
        self.set(status);
    }

    fn set(&mut self, status: UnitStatus) {
        self.sink.set(&status);
        self.current = Some(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn unit(name: &str) -> Origin {
        Origin::Unit {
            relation_id: 1,
            unit: name.into(),
        }
    }

    #[test]
    fn bootstrap_never_clears_a_block() {
        let mut status = StatusProjector::new(Vec::<UnitStatus>::new());
        status.apply(Origin::Config, Verdict::Blocked("bad peers".into()));
        status.apply(Origin::Bootstrap, Verdict::Settled);
        assert_eq!(status.current(), Some(&UnitStatus::Blocked("bad peers".into())));

        status.apply(Origin::Config, Verdict::Settled);
        assert_eq!(status.current(), Some(&UnitStatus::Active));
    }

    #[test]
    fn unrelated_success_keeps_block() {
        let mut status = StatusProjector::new(Vec::<UnitStatus>::new());
        status.apply(unit("agent/0"), Verdict::Blocked("agent/0 missing thruk_key".into()));
        status.apply(unit("agent/1"), Verdict::Settled);
        assert_eq!(
            status.current(),
            Some(&UnitStatus::Blocked("agent/0 missing thruk_key".into()))
        );

        status.apply(unit("agent/0"), Verdict::Settled);
        assert_eq!(status.current(), Some(&UnitStatus::Active));
    }

    #[test]
    fn settle_clears_own_block_before_resume() {
        let mut status = StatusProjector::new(Vec::<UnitStatus>::new());
        status.apply(Origin::Config, Verdict::Blocked("bad peers".into()));
        status.apply(unit("agent/0"), Verdict::Blocked("agent/0 missing url".into()));

        status.settle(&Origin::Bootstrap);
        status.settle(&Origin::Config);
        status.maintenance("restarting thruk");
        status.resume();
        assert_eq!(
            status.current(),
            Some(&UnitStatus::Blocked("agent/0 missing url".into()))
        );
    }

    #[test]
    fn maintenance_then_resume_is_recorded_in_order() {
        let mut status = StatusProjector::new(Vec::<UnitStatus>::new());
        status.maintenance("restarting thruk");
        status.resume();
        assert_eq!(
            status.sink(),
            &vec![
                UnitStatus::Maintenance("restarting thruk".into()),
                UnitStatus::Active
            ]
        );
    }

    #[test]
    fn reporting_sink_writes_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("status.json");
        let mut sink = ReportingSink::new(Some(path.clone()));
        sink.set(&UnitStatus::Blocked("bad".into()));

        let json: serde_json::Value =
            serde_json::from_slice(&std::fs::read(&path).unwrap()).unwrap();
        assert_eq!(json["state"], "blocked");
        assert_eq!(json["message"], "bad");
    }
}
