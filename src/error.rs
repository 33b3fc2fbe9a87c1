//! Error taxonomy of a reconciliation pass.
//!
//! Operator input defects ([`ConfigError`], [`RelationDataError`]) end the
//! pass with a Blocked status.  Packaging defects ([`RenderError`]) and
//! workload faults other than an absent service are returned to the caller.

use std::path::PathBuf;

use thiserror::Error;

/// Every required field absent (or empty) in a candidate peer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("missing required fields: {}", .0.join(", "))]
pub struct MissingFields(pub Vec<String>);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("config property `{property}` is not a valid peer document: {reason}")]
    MalformedSyntax { property: String, reason: String },

    #[error("invalid peers in `{property}`: {}", .names.join(", "))]
    InvalidPeers {
        property: String,
        names: Vec<String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unit {unit} is missing relation data: {}", .missing.0.join(", "))]
pub struct RelationDataError {
    pub unit: String,
    pub missing: MissingFields,
}

#[derive(Debug, Error)]
pub enum RenderError {
    #[error("template {name} not found in {}", .search_dir.display())]
    TemplateNotFound { name: String, search_dir: PathBuf },

    #[error("failed to render template {name}: {source}")]
    TemplateSyntaxOrDataError {
        name: String,
        #[source]
        source: minijinja::Error,
    },
}

#[derive(Debug, Error)]
pub enum WorkloadError {
    #[error("service {0} not found")]
    ServiceNotFound(String),

    #[error("layer {0} already exists and combine was not requested")]
    LayerExists(String),

    #[error("file {} not found in workload", .0.display())]
    FileNotFound(PathBuf),

    #[error("path {} is outside the workload config mount", .0.display())]
    OutsideMount(PathBuf),

    #[error("workload I/O on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("service {service} control failed: {reason}")]
    Control { service: String, reason: String },

    #[error("docker: {0}")]
    Docker(#[from] bollard::errors::Error),
}

/// Fatal failure of a reconciliation pass.
#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Render(#[from] RenderError),

    #[error(transparent)]
    Workload(#[from] WorkloadError),
}
