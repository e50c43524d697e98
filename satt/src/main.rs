pub mod command_executor;
pub mod config;
pub mod console;
pub mod logging;
pub mod state_monitor;

use crate::{
    command_executor::blade::{SimulatedBladeHandler, command_sender::BladeCommandSender},
    config::{create_default_config, init_config},
    console::run_console,
    state_monitor::{run_motion_forwarder, run_state_monitor},
};

use anyhow::Context as _;
use attenuator::{
    AttenuatorCoordinator, AttenuatorEvent, FilterCatalog, MotionQueue, TableDirectory,
    TransmissionModel, WatchPublisher,
};
use std::{path::PathBuf, sync::Arc};
use tokio::sync::mpsc;
use tracing::{error, info};
use utilities::command_executor::CommandExecutor;

const EVENT_CHANNEL_CAPACITY: usize = 256;

fn should_create_config() -> bool {
    std::env::var("CREATE_CONFIG")
        .map(|val| val == "1" || val.to_lowercase() == "true")
        .unwrap_or(false)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    if should_create_config() {
        create_default_config(None::<PathBuf>)?;
    }

    let (_config_manager, config) = init_config().map_err(|e| {
        eprintln!("Failed to load configuration: {}", e);
        eprintln!("Run with CREATE_CONFIG=1 to create a default configuration file.");
        e
    })?;

    let _log_guard = logging::init(&config.logging)?;

    let catalog = FilterCatalog::from_descriptor(&config.device)?;
    let model = TransmissionModel::new(TableDirectory::new(&config.absorption_data.directory));
    let (publisher, published) = WatchPublisher::channel();
    let (queue, motion_commands) = MotionQueue::channel(config.motion.queue_capacity);
    let (events, event_rx) = mpsc::channel(EVENT_CHANNEL_CAPACITY);

    let coordinator = Arc::new(
        AttenuatorCoordinator::new(
            catalog,
            model,
            config.inputs.clone(),
            Arc::new(publisher),
            queue,
        )
        .context("Failed to create attenuator")?,
    );

    let executor = CommandExecutor::new(SimulatedBladeHandler::new(
        &config.device,
        config.motion.travel_time(),
    ));
    let blades = BladeCommandSender::new(executor.sender());
    let _executor = executor.spawn();

    tokio::spawn(coordinator.clone().run(event_rx));
    tokio::spawn(run_motion_forwarder(motion_commands, blades.clone()));
    let monitor = tokio::spawn(run_state_monitor(
        blades,
        events.clone(),
        config.motion.poll_interval(),
    ));

    events
        .send(AttenuatorEvent::Recalculate)
        .await
        .context("Coordinator stopped")?;

    info!(name = coordinator.name(), "Attenuator ready, reading commands from stdin");

    let driver_config = config.motion.driver;
    tokio::spawn(async move {
        if let Err(err) = run_console(events, coordinator, published, driver_config).await {
            error!(%err, "Console stopped");
        }
    });

    tokio::select! {
        result = tokio::signal::ctrl_c() => {
            result.context("Failed to listen for ctrl-c")?;
            info!("Shutting down");
        }
        result = monitor => {
            if let Err(err) = result? {
                error!(%err, "State monitor stopped");
            }
        }
    }

    Ok(())
}
