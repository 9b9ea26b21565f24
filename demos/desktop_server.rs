//! Desktop server over a simulated bus.
//!
//! Runs the switch-machine API against an in-memory bus so the HTTP surface
//! can be exercised without boards. Attach switch machines by posting full
//! receive frames, one byte per board with board 0 last (16 boards by
//! default):
//!
//! ```sh
//! cargo run --example desktop_server --features web
//! curl -X POST localhost:8080/api/switchmachines/mockrxdata -d 00000000000000000000000000000030
//! curl localhost:8080/api/switchmachines
//! curl -X PUT localhost:8080/api/switchmachines -d '[{"id": 0, "position": "position1"}]'
//! ```
//!
//! # Configuration
//!
//! Pass a JSON config file as the first argument, otherwise
//! `Config::default()` is used. Set `RUST_LOG` to adjust logging.

use std::sync::Arc;

use anyhow::Context;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use rs_tortoise::hal::MockTransport;
use rs_tortoise::services::{run_server, ApiState, WebServerConfig};
use rs_tortoise::{Config, SwitchMachineEvent, TortoiseBusDriver, TortoiseController};

fn load_config() -> anyhow::Result<Config> {
    match std::env::args().nth(1) {
        Some(path) => {
            let json = std::fs::read_to_string(&path)
                .with_context(|| format!("reading config file {path}"))?;
            Ok(Config::from_json(&json)?)
        }
        None => Ok(Config::default()),
    }
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let config = load_config()?;
    if !config.web.enabled {
        warn!("web server disabled in config, nothing to serve");
        return Ok(());
    }

    let bus = MockTransport::new(config.bus.boards);
    let driver = TortoiseBusDriver::new(bus.clone(), config.bus.clone())?;
    let controller = TortoiseController::new(driver, config.controller.clone())?;
    controller.set_switch_machine_event_listener(|event: &SwitchMachineEvent| {
        info!(event = %event.event_type, state = %event.state, "switch machine event");
    });

    info!(
        boards = config.bus.boards,
        port = config.web.port,
        "rs-tortoise desktop server"
    );

    let state = Arc::new(ApiState::new(controller.clone()).with_mock_bus(bus));
    let runtime = tokio::runtime::Runtime::new().context("creating tokio runtime")?;
    let served = runtime.block_on(run_server(state, WebServerConfig::from_config(&config.web)));

    controller.close()?;
    served.context("web server failed")
}
