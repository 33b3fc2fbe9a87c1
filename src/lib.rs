//! Change-driven configuration reconciliation for a Thruk workload.
//!
//! Peers arrive from a declarative config property or from relation data;
//! every event re-resolves them, renders the configuration artifacts and
//! restarts the service only when the rendered content actually changed.

pub mod config;
pub mod error;
pub mod events;
pub mod peers;
pub mod reconciler;
pub mod render;
pub mod restart;
pub mod runtime;
pub mod status;
pub mod types;

pub use reconciler::{Pass, Reconciler};
