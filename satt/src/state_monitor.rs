use anyhow::{Context as _, Result};
use attenuator::{AttenuatorEvent, BladeId, BladeState, MotionReceiver};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info};

use crate::command_executor::blade::command_sender::BladeCommandSender;

/// Polls the blade motors and forwards every observed change as feedback.
pub async fn run_state_monitor(
    blades: BladeCommandSender,
    events: mpsc::Sender<AttenuatorEvent>,
    period: Duration,
) -> Result<()> {
    let mut interval = tokio::time::interval(period);
    let mut last: Vec<BladeState> = Vec::new();

    loop {
        interval.tick().await;

        let states = match blades.get_states().await {
            Ok(states) => states,
            Err(err) => {
                error!(%err, "Failed to read blade states");
                continue;
            }
        };

        for (idx, state) in states.iter().enumerate() {
            if last.get(idx) == Some(state) {
                continue;
            }
            events
                .send(AttenuatorEvent::BladeFeedback {
                    blade: BladeId(idx),
                    state: *state,
                })
                .await
                .context("Coordinator stopped")?;
        }
        last = states;
    }
}

/// Hands motion commands from the sequencer to the blade motors.
pub async fn run_motion_forwarder(mut commands: MotionReceiver, blades: BladeCommandSender) {
    while let Some(command) = commands.recv().await {
        match command.filter() {
            Some(filter) => debug!(%filter, "Inserting filter"),
            None => debug!(blade = %command.blade, target = %command.target, "Moving blade"),
        }
        if let Err(err) = blades.move_blade(command).await {
            error!(blade = %command.blade, target = %command.target, %err, "Failed to move blade");
        }
    }
    info!("Motion queue closed");
}
