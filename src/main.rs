//! phdose daemon.
//!
//! Bootstraps the stores and hardware adapter, wires the orchestrator
//! and command router, then reads line-delimited JSON commands from
//! stdin — the same envelopes the supervisor link delivers — until EOF.
//! The transport client proper is deployed as a separate bridge; this
//! harness lets the whole device be driven on a bench with nothing but
//! a terminal.

use std::io::BufRead;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::{info, warn};
use serde_json::Value;

use phdose::adapters::fs_store::{FileBackupStore, FileConfigStore};
use phdose::adapters::hardware::{BoardAnalog, BoardPins};
use phdose::adapters::link::LogLink;
use phdose::config::pinmap::InputPinMap;
use phdose::config::ConfigStore;
use phdose::experiment::{ExperimentOrchestrator, OrchestratorDeps};
use phdose::rpc::CommandRouter;

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let data_dir = PathBuf::from(
        std::env::var("PHDOSE_DATA_DIR").unwrap_or_else(|_| "phdose-data".to_string()),
    );
    std::fs::create_dir_all(&data_dir)
        .with_context(|| format!("creating data directory {}", data_dir.display()))?;

    let config = ConfigStore::open(Box::new(FileConfigStore::new(
        data_dir.join("device_config.json"),
    )));
    let device_id = config.device().id.clone();
    info!("device {device_id} starting");

    let backup = FileBackupStore::new(data_dir.join("backups"))
        .map_err(|e| anyhow::anyhow!("opening backup store: {e}"))?;
    let pins = BoardPins::new().map_err(|e| anyhow::anyhow!("initialising GPIO: {e}"))?;
    let analog = BoardAnalog::new().map_err(|e| anyhow::anyhow!("initialising ADC: {e}"))?;
    let pinmap = load_pinmap(&data_dir);

    let orchestrator = ExperimentOrchestrator::new(
        device_id,
        pinmap,
        OrchestratorDeps {
            link: Arc::new(LogLink::new(true)),
            backup: Arc::new(backup),
            pins: Arc::new(pins),
            analog: Arc::new(analog),
        },
    );
    let mut router = CommandRouter::new(config, orchestrator);
    router.handle_connect();

    info!("reading commands from stdin (one JSON envelope per line)");
    let stdin = std::io::stdin();
    for line in stdin.lock().lines() {
        let line = line.context("reading stdin")?;
        if line.trim().is_empty() {
            continue;
        }
        match serde_json::from_str::<Value>(&line) {
            Ok(payload) => dispatch(&mut router, payload),
            Err(e) => warn!("ignoring unparseable line: {e}"),
        }
    }

    info!("stdin closed, shutting down");
    router.shutdown();
    Ok(())
}

/// Route a raw envelope by its shape, the way the transport bridge
/// routes its inbound events.
fn dispatch(router: &mut CommandRouter, payload: Value) {
    if payload.get("cmd").is_some() {
        router.handle_command(payload);
    } else if payload.get("context").is_some() {
        router.handle_config_envelope(payload);
    } else if payload.get("selectedLocation").is_some() {
        router.handle_toggle_pump(payload);
    } else {
        warn!("unrecognised envelope shape: {payload}");
    }
}

/// An optional `pin_map.json` in the data directory overrides the
/// reference wiring.
fn load_pinmap(data_dir: &std::path::Path) -> InputPinMap {
    let path = data_dir.join("pin_map.json");
    if !path.exists() {
        return InputPinMap::default();
    }
    match std::fs::read_to_string(&path)
        .map_err(|e| e.to_string())
        .and_then(|s| serde_json::from_str(&s).map_err(|e| e.to_string()))
    {
        Ok(map) => map,
        Err(e) => {
            warn!("ignoring invalid pin map at {}: {e}", path.display());
            InputPinMap::default()
        }
    }
}
