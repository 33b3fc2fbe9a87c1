//! One reconciliation pass per event.
//!
//! Each event resolves the peer set from scratch, validates it, renders the
//! artifacts and lets the change check decide on a restart.  The pass
//! returns a [`Verdict`] which is projected onto the unit status here, in one
//! place, after the pass is over.

use log::{debug, error, info, warn};

use crate::config::{Config, Role};
use crate::error::{ConfigError, ReconcileError};
use crate::peers::{
    check_unit, resolve_from_declaration, resolve_from_relations, warn_duplicate_ids, RelationView,
};
use crate::render::Render;
use crate::restart::{apply_if_changed, RestartOutcome};
use crate::runtime::{Layer, ServiceSpec, Startup, Workload};
use crate::status::{Origin, StatusProjector, StatusSink, Verdict};
use crate::types::{Event, PeerSet, RenderContext};

/// What one pass decided.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pass {
    pub verdict: Verdict,
    /// Set when the pass reached the change check.
    pub outcome: Option<RestartOutcome>,
}

impl Pass {
    fn settled(outcome: Option<RestartOutcome>) -> Self {
        Self {
            verdict: Verdict::Settled,
            outcome,
        }
    }

    fn blocked(reason: String) -> Self {
        Self {
            verdict: Verdict::Blocked(reason),
            outcome: None,
        }
    }
}

pub struct Reconciler<W, R, S> {
    config: Config,
    workload: W,
    renderer: R,
    status: StatusProjector<S>,
    relations: RelationView,
}

impl<W: Workload, R: Render, S: StatusSink> Reconciler<W, R, S> {
    pub fn new(config: Config, workload: W, renderer: R, sink: S) -> Self {
        Self {
            config,
            workload,
            renderer,
            status: StatusProjector::new(sink),
            relations: RelationView::new(),
        }
    }

    pub fn workload(&self) -> &W {
        &self.workload
    }

    pub fn renderer(&self) -> &R {
        &self.renderer
    }

    pub fn status(&self) -> &StatusProjector<S> {
        &self.status
    }

    /// Run the pass for `event` and project its verdict.
    ///
    /// Errors are fatal for the pass and leave the status as last set.  A
    /// pass that restarted the service has already projected its final status
    /// on the way out of maintenance.
    pub async fn handle(&mut self, event: Event) -> Result<Pass, ReconcileError> {
        let name = event.name();
        info!("Handling {}", name);
        let origin = match &event {
            Event::WorkloadReady => Origin::Bootstrap,
            Event::ConfigChanged(_) => Origin::Config,
            Event::RelationChanged {
                relation_id, unit, ..
            }
            | Event::RelationDeparted { relation_id, unit } => Origin::Unit {
                relation_id: *relation_id,
                unit: unit.clone(),
            },
        };
        let pass = match event {
            Event::WorkloadReady => self.on_workload_ready().await,
            Event::ConfigChanged(unit) => {
                self.config.unit = unit;
                self.on_config_changed(&origin).await
            }
            Event::RelationChanged {
                relation_id,
                unit,
                data,
            } => {
                self.relations.update(relation_id, &unit, data);
                self.on_relation_changed(&origin, relation_id, &unit).await
            }
            Event::RelationDeparted { relation_id, unit } => {
                self.relations.depart(relation_id, &unit);
                self.on_relation_departed(&origin).await
            }
        };

        match pass {
            Ok(pass) => {
                debug!("{} finished with {:?}", name, pass);
                if pass.outcome != Some(RestartOutcome::Restarted) {
                    self.status.apply(origin, pass.verdict.clone());
                }
                Ok(pass)
            }
            Err(e) => {
                error!("{} failed: {}", name, e);
                Err(e)
            }
        }
    }

    async fn on_workload_ready(&mut self) -> Result<Pass, ReconcileError> {
        let service = self.config.service_name.clone();
        let layer = Layer {
            summary: format!("{} layer", service),
            description: format!("config layer for {}", service),
            services: [(
                service.clone(),
                ServiceSpec {
                    summary: service.clone(),
                    command: self.config.command.clone(),
                    startup: Startup::Enabled,
                },
            )]
            .into_iter()
            .collect(),
        };
        self.workload.add_layer(&service, layer, true).await?;
        self.workload.autostart().await?;
        Ok(Pass::settled(None))
    }

    async fn on_config_changed(&mut self, origin: &Origin) -> Result<Pass, ReconcileError> {
        let peers = match self.config.role {
            Role::Standalone => match resolve_from_declaration(&self.config.unit.peers) {
                Ok(peers) => peers,
                Err(e) => return Ok(Pass::blocked(blocked_reason(&e))),
            },
            Role::Master => resolve_from_relations(self.relations.units()),
        };
        let outcome = self.reconcile(origin, peers).await?;
        Ok(Pass::settled(Some(outcome)))
    }

    async fn on_relation_changed(
        &mut self,
        origin: &Origin,
        relation_id: u32,
        unit: &str,
    ) -> Result<Pass, ReconcileError> {
        if self.config.role != Role::Master {
            debug!("Ignoring relation data from {} in standalone role", unit);
            return Ok(Pass::settled(None));
        }
        if let Some(view) = self.relations.get(relation_id, unit) {
            if let Err(e) = check_unit(view) {
                error!("Missing required data fields for related agent: {}", e);
                return Ok(Pass::blocked(e.to_string()));
            }
        }
        let peers = resolve_from_relations(self.relations.units());
        let outcome = self.reconcile(origin, peers).await?;
        Ok(Pass::settled(Some(outcome)))
    }

    async fn on_relation_departed(&mut self, origin: &Origin) -> Result<Pass, ReconcileError> {
        if self.config.role != Role::Master {
            return Ok(Pass::settled(None));
        }
        let peers = resolve_from_relations(self.relations.units());
        let outcome = self.reconcile(origin, peers).await?;
        Ok(Pass::settled(Some(outcome)))
    }

    /// Render every artifact for `peers`, write them and restart on change.
    ///
    /// The input of `origin` has been accepted by now, so its block is gone
    /// before any restart projects a status.
    async fn reconcile(
        &mut self,
        origin: &Origin,
        peers: PeerSet,
    ) -> Result<RestartOutcome, ReconcileError> {
        warn_duplicate_ids(&peers);
        self.status.settle(origin);
        info!("Rendering configuration for {} peers", peers.len());
        let context = &RenderContext::new(&self.config.unit, peers);
        let workload = &self.workload;
        let renderer = &self.renderer;
        let artifacts = &self.config.artifacts;

        let outcome = apply_if_changed(
            workload,
            artifacts,
            &self.config.service_name,
            &mut self.status,
            move || async move {
                // Render everything first so a bad template writes nothing.
                let mut rendered = Vec::with_capacity(artifacts.len());
                for artifact in artifacts {
                    rendered.push(renderer.render(&artifact.template, context)?);
                }
                for (artifact, content) in artifacts.iter().zip(&rendered) {
                    workload.push(&artifact.path, content.as_bytes()).await?;
                }
                Ok::<(), ReconcileError>(())
            },
        )
        .await?;
        info!("Reconciled {}: {:?}", self.config.service_name, outcome);
        Ok(outcome)
    }
}

fn blocked_reason(err: &ConfigError) -> String {
    warn!("Rejecting peer configuration: {}", err);
    match err {
        ConfigError::MalformedSyntax { property, .. } => {
            format!("config property `{}` is not valid YAML", property)
        }
        ConfigError::InvalidPeers { .. } => err.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::UnitConfig;
    use crate::error::RenderError;
    use crate::runtime::{MockWorkload, WorkloadAction};
    use crate::status::UnitStatus;
    use std::collections::BTreeMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const CONF: &str = "/etc/thruk/thruk_local.conf";

    /// Renders peer ids one per line and counts its calls.
    #[derive(Default)]
    struct SpyRenderer {
        calls: AtomicUsize,
    }

    impl SpyRenderer {
        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl Render for SpyRenderer {
        fn render(&self, _template: &str, context: &RenderContext) -> Result<String, RenderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(context
                .peers
                .iter()
                .map(|p| format!("{} {}\n", p.id, p.url))
                .collect())
        }
    }

    fn reconciler(role: Role, workload: MockWorkload) -> Reconciler<MockWorkload, SpyRenderer, Vec<UnitStatus>> {
        let config = Config {
            role,
            ..Config::default()
        };
        Reconciler::new(config, workload, SpyRenderer::default(), Vec::new())
    }

    fn peers(raw: &str) -> Event {
        Event::ConfigChanged(UnitConfig {
            peers: raw.into(),
            ..UnitConfig::default()
        })
    }

    fn agent_data(context: &str, with_key: bool) -> BTreeMap<String, String> {
        let mut data: BTreeMap<String, String> = [
            ("url", format!("http://{}/thruk", context)),
            ("nagios_context", context.to_string()),
            ("thruk_id", format!("id-{}", context)),
        ]
        .into_iter()
        .map(|(k, v)| (k.to_string(), v))
        .collect();
        if with_key {
            data.insert("thruk_key".into(), "k".into());
        }
        data
    }

    #[tokio::test]
    async fn second_identical_pass_is_unchanged() {
        let mut r = reconciler(Role::Standalone, MockWorkload::with_service("thruk", true));
        let yaml = "p1: {url: u, nagios_context: c, thruk_key: k}";

        let first = r.handle(peers(yaml)).await.unwrap();
        assert_eq!(first.outcome, Some(RestartOutcome::Restarted));
        let second = r.handle(peers(yaml)).await.unwrap();
        assert_eq!(second.outcome, Some(RestartOutcome::Unchanged));
        assert_eq!(r.workload().restarts("thruk").await, 1);
    }

    #[tokio::test]
    async fn invalid_declaration_blocks_without_side_effects() {
        let mut r = reconciler(Role::Standalone, MockWorkload::with_service("thruk", true));
        let pass = r
            .handle(peers("a: {url: u, thruk_key: k}\nb: {url: u, nagios_context: c, thruk_key: k}"))
            .await
            .unwrap();

        assert_eq!(pass.verdict, Verdict::Blocked("invalid peers in `peers`: a".into()));
        assert_eq!(r.renderer().calls(), 0);
        assert!(r.workload().actions().await.is_empty());
        assert_eq!(
            r.status().current(),
            Some(&UnitStatus::Blocked("invalid peers in `peers`: a".into()))
        );
    }

    #[tokio::test]
    async fn malformed_declaration_blocks() {
        let mut r = reconciler(Role::Standalone, MockWorkload::new());
        let pass = r.handle(peers("p1: {url")).await.unwrap();
        assert_eq!(
            pass.verdict,
            Verdict::Blocked("config property `peers` is not valid YAML".into())
        );
    }

    #[tokio::test]
    async fn workload_ready_keeps_block_and_config_fix_clears_it() {
        let mut r = reconciler(Role::Standalone, MockWorkload::new());
        r.handle(peers("a: {url: u}")).await.unwrap();
        r.handle(Event::WorkloadReady).await.unwrap();
        assert!(matches!(r.status().current(), Some(UnitStatus::Blocked(_))));
        assert_eq!(
            r.workload().actions().await,
            vec![WorkloadAction::AddLayer("thruk".into()), WorkloadAction::Autostart]
        );

        r.handle(peers("a: {url: u, nagios_context: c, thruk_key: k}")).await.unwrap();
        assert_eq!(r.status().current(), Some(&UnitStatus::Active));
    }

    #[tokio::test]
    async fn config_before_workload_reports_no_service_yet() {
        let mut r = reconciler(Role::Standalone, MockWorkload::new());
        let pass = r
            .handle(peers("p1: {url: u, nagios_context: c, thruk_key: k}"))
            .await
            .unwrap();
        assert_eq!(pass.outcome, Some(RestartOutcome::NoServiceYet));
        assert!(r.workload().file(CONF).await.is_some());

        r.handle(Event::WorkloadReady).await.unwrap();
        assert_eq!(r.status().current(), Some(&UnitStatus::Active));
        assert!(r.workload().get_service("thruk").await.unwrap().is_running());
    }

    #[tokio::test]
    async fn relation_gate_blocks_before_rendering() {
        let mut r = reconciler(Role::Master, MockWorkload::with_service("thruk", true));
        let pass = r
            .handle(Event::RelationChanged {
                relation_id: 1,
                unit: "agent/0".into(),
                data: agent_data("dc1", false),
            })
            .await
            .unwrap();

        assert_eq!(r.renderer().calls(), 0);
        assert_eq!(pass.outcome, None);
        assert_eq!(
            pass.verdict,
            Verdict::Blocked("unit agent/0 is missing relation data: thruk_key".into())
        );
        assert!(r.workload().actions().await.is_empty());
    }

    #[tokio::test]
    async fn relation_units_are_aggregated_and_departures_rerender() {
        let mut r = reconciler(Role::Master, MockWorkload::with_service("thruk", true));
        for (unit, context) in [("agent/0", "dc1"), ("agent/1", "dc2")] {
            r.handle(Event::RelationChanged {
                relation_id: 4,
                unit: unit.into(),
                data: agent_data(context, true),
            })
            .await
            .unwrap();
        }
        let conf = String::from_utf8(r.workload().file(CONF).await.unwrap()).unwrap();
        assert_eq!(conf, "id-dc1 http://dc1/thruk\nid-dc2 http://dc2/thruk\n");

        let pass = r
            .handle(Event::RelationDeparted {
                relation_id: 4,
                unit: "agent/0".into(),
            })
            .await
            .unwrap();
        assert_eq!(pass.outcome, Some(RestartOutcome::Restarted));
        let conf = String::from_utf8(r.workload().file(CONF).await.unwrap()).unwrap();
        assert_eq!(conf, "id-dc2 http://dc2/thruk\n");
    }

    #[tokio::test]
    async fn other_units_success_does_not_clear_gate_block() {
        let mut r = reconciler(Role::Master, MockWorkload::with_service("thruk", true));
        r.handle(Event::RelationChanged {
            relation_id: 1,
            unit: "agent/0".into(),
            data: agent_data("dc1", false),
        })
        .await
        .unwrap();
        r.handle(Event::RelationChanged {
            relation_id: 1,
            unit: "agent/1".into(),
            data: agent_data("dc2", true),
        })
        .await
        .unwrap();
        assert!(matches!(r.status().current(), Some(UnitStatus::Blocked(_))));

        r.handle(Event::RelationChanged {
            relation_id: 1,
            unit: "agent/0".into(),
            data: agent_data("dc1", true),
        })
        .await
        .unwrap();
        assert_eq!(r.status().current(), Some(&UnitStatus::Active));
    }

    #[tokio::test]
    async fn fixed_unit_data_restarts_straight_to_active() {
        let mut r = reconciler(Role::Master, MockWorkload::with_service("thruk", true));
        for with_key in [false, true] {
            r.handle(Event::RelationChanged {
                relation_id: 1,
                unit: "agent/0".into(),
                data: agent_data("dc1", with_key),
            })
            .await
            .unwrap();
        }

        assert_eq!(r.workload().restarts("thruk").await, 1);
        assert_eq!(
            r.status().sink(),
            &vec![
                UnitStatus::Blocked("unit agent/0 is missing relation data: thruk_key".into()),
                UnitStatus::Maintenance("restarting thruk".into()),
                UnitStatus::Active,
            ]
        );
    }

    #[tokio::test]
    async fn restart_resumes_to_other_units_block() {
        let mut r = reconciler(Role::Master, MockWorkload::with_service("thruk", true));
        r.handle(Event::RelationChanged {
            relation_id: 1,
            unit: "agent/0".into(),
            data: agent_data("dc1", false),
        })
        .await
        .unwrap();
        r.handle(Event::RelationChanged {
            relation_id: 1,
            unit: "agent/1".into(),
            data: agent_data("dc2", true),
        })
        .await
        .unwrap();

        let blocked = UnitStatus::Blocked("unit agent/0 is missing relation data: thruk_key".into());
        assert_eq!(
            r.status().sink(),
            &vec![
                blocked.clone(),
                UnitStatus::Maintenance("restarting thruk".into()),
                blocked,
            ]
        );
    }

    #[tokio::test]
    async fn standalone_role_ignores_relation_data() {
        let mut r = reconciler(Role::Standalone, MockWorkload::with_service("thruk", true));
        let pass = r
            .handle(Event::RelationChanged {
                relation_id: 1,
                unit: "agent/0".into(),
                data: agent_data("dc1", true),
            })
            .await
            .unwrap();
        assert_eq!(pass.outcome, None);
        assert_eq!(r.renderer().calls(), 0);
    }
}
