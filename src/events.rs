//! Event feeds for the daemon.
//!
//! Relation and config events arrive as JSON lines on stdin; SIGHUP reloads
//! the configuration files and emits a config-changed event.

use log::{error, info, warn};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::signal::unix::{signal, SignalKind};
use tokio::sync::mpsc;

use crate::config::Config;
use crate::types::Event;

/// Parse one input line; blank lines and `#` comments carry no event.
pub fn parse_event_line(line: &str) -> Result<Option<Event>, serde_json::Error> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    serde_json::from_str(line).map(Some)
}

pub async fn run_stdin_events(events: mpsc::Sender<Event>) -> anyhow::Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match parse_event_line(&line) {
            Ok(Some(event)) => {
                if events.send(event).await.is_err() {
                    return Err(anyhow::anyhow!("Channel closed"));
                }
            }
            Ok(None) => {}
            Err(e) => warn!("Ignoring malformed event line: {}", e),
        }
    }
    info!("Event input closed");
    Ok(())
}

pub async fn run_reload_on_hangup(events: mpsc::Sender<Event>) -> anyhow::Result<()> {
    let mut hangups = signal(SignalKind::hangup())?;
    while hangups.recv().await.is_some() {
        info!("SIGHUP received, reloading configuration");
        match Config::load() {
            Ok(config) => {
                if events.send(Event::ConfigChanged(config.unit)).await.is_err() {
                    return Err(anyhow::anyhow!("Channel closed"));
                }
            }
            Err(e) => error!("Keeping previous configuration: {}", e),
        }
    }
    Ok(())
}
