//! thruk-operator daemon entry point.

use log::{debug, error, info};
use tokio::signal;
use tokio::sync::mpsc;

use thruk_operator::config::Config;
use thruk_operator::events::{run_reload_on_hangup, run_stdin_events};
use thruk_operator::render::TemplateDir;
use thruk_operator::runtime::DockerWorkload;
use thruk_operator::status::ReportingSink;
use thruk_operator::types::Event;
use thruk_operator::Reconciler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging
    env_logger::init();

    // Load configuration
    let cfg = Config::load()?;
    info!(
        "Starting thruk-operator: role {:?}, service {}, {} artifacts",
        cfg.role,
        cfg.service_name,
        cfg.artifacts.len()
    );

    // Event channel; the reconciler is its only consumer
    let (event_tx, mut event_rx) = mpsc::channel(128);
    event_tx.send(Event::ConfigChanged(cfg.unit.clone())).await?;

    // Workload (Docker)
    let workload = DockerWorkload::connect(&cfg)?;
    let monitor = workload.monitor(&cfg.service_name);
    let monitor_tx = event_tx.clone();
    let monitor_handle = tokio::spawn(async move {
        if let Err(e) = monitor.run(monitor_tx).await {
            error!("Workload monitor failed: {}", e);
        }
    });

    // Relation and config events on stdin
    let stdin_tx = event_tx.clone();
    let stdin_handle = tokio::spawn(async move {
        if let Err(e) = run_stdin_events(stdin_tx).await {
            error!("Event input failed: {}", e);
        }
    });

    // Config reload
    let reload_handle = tokio::spawn(async move {
        if let Err(e) = run_reload_on_hangup(event_tx).await {
            error!("Config reload failed: {}", e);
        }
    });

    let renderer = TemplateDir::new(cfg.template_dir.clone());
    let sink = ReportingSink::new(cfg.status_file.clone());
    let mut reconciler = Reconciler::new(cfg, workload, renderer, sink);

    // One pass at a time until Ctrl+C
    loop {
        tokio::select! {
            event = event_rx.recv() => {
                let Some(event) = event else {
                    info!("All event sources closed");
                    break;
                };
                // The next event re-drives a failed pass.
                if let Err(e) = reconciler.handle(event).await {
                    debug!("Waiting for the next event after: {}", e);
                }
            }
            result = signal::ctrl_c() => {
                match result {
                    Ok(()) => info!("Received Ctrl+C, shutting down..."),
                    Err(err) => error!("Unable to listen for shutdown signal: {}", err),
                }
                break;
            }
        }
    }

    // Abort tasks
    monitor_handle.abort();
    stdin_handle.abort();
    reload_handle.abort();

    info!("Shutdown complete.");
    Ok(())
}
