use std::collections::BTreeMap;
use std::path::{Component, PathBuf};

use figment::{
    providers::{Env, Format, Json, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};

use crate::types::{Artifact, ArtifactSet};

/// Which peer source drives the rendered configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    /// Peers come from the declarative `unit.peers` property.
    Standalone,
    /// Peers are aggregated from relation data published by agent units.
    Master,
}

/// Operator-facing settings of the unit, replaced wholesale on config-changed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(default)]
pub struct UnitConfig {
    /// YAML document mapping peer name to its attributes.
    pub peers: String,
    pub site_name: String,
    pub settings: BTreeMap<String, String>,
}

impl Default for UnitConfig {
    fn default() -> Self {
        Self {
            peers: String::new(),
            site_name: "thruk".into(),
            settings: BTreeMap::new(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub role: Role,
    pub service_name: String,
    pub container_prefix: String,
    pub image: String,
    pub command: String,
    pub template_dir: PathBuf,
    /// Directory inside the workload holding every artifact.
    pub config_dir: PathBuf,
    /// Host directory bound to `config_dir`.
    pub state_dir: PathBuf,
    pub artifacts: ArtifactSet,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_file: Option<PathBuf>,
    pub unit: UnitConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            role: Role::Standalone,
            service_name: "thruk".into(),
            container_prefix: "thruk-operator".into(),
            image: "sni/thruk:latest".into(),
            command: "/usr/src/start.sh".into(),
            template_dir: "templates".into(),
            config_dir: "/etc/thruk".into(),
            state_dir: "/var/lib/thruk-operator/etc-thruk".into(),
            artifacts: vec![Artifact {
                template: "thruk_local.conf.j2".into(),
                path: "/etc/thruk/thruk_local.conf".into(),
            }],
            status_file: None,
            unit: UnitConfig::default(),
        }
    }
}

impl Config {
    pub fn load() -> anyhow::Result<Self> {
        let mut config: Config = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file("thruk-operator.toml"))
            .merge(Json::file("thruk-operator.json"))
            .merge(Env::prefixed("THRUK_OPERATOR_").split("__"))
            .extract()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        // Support Docker-style secrets
        if let Ok(peers_file) = std::env::var("THRUK_OPERATOR_PEERS_FILE") {
            config.unit.peers = std::fs::read_to_string(&peers_file)
                .map_err(|e| anyhow::anyhow!("Failed to read {}: {}", peers_file, e))?;
        }

        config.check()?;
        Ok(config)
    }

    fn check(&self) -> anyhow::Result<()> {
        if self.artifacts.is_empty() {
            anyhow::bail!("No artifacts configured");
        }
        for artifact in &self.artifacts {
            let escapes = artifact
                .path
                .components()
                .any(|c| c == Component::ParentDir);
            if escapes || !artifact.path.starts_with(&self.config_dir) {
                anyhow::bail!(
                    "Artifact {} is outside config_dir {}",
                    artifact.path.display(),
                    self.config_dir.display()
                );
            }
        }
        Ok(())
    }
}
