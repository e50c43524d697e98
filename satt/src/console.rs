//! Line console on stdin, one `verb:arg` command per line.

use anyhow::{Context as _, Result};
use attenuator::{
    AttenuatorCoordinator, AttenuatorEvent, BladeId, BladeState, ConfigMode, EnergySource,
    FilterChange, FilterId, MotionDriver, MotionDriverConfig, PublishedState,
};
use std::sync::Arc;
use tokio::{
    io::{AsyncBufReadExt as _, BufReader},
    sync::{mpsc, watch},
    task::JoinHandle,
};
use tracing::{error, info, warn};

#[derive(Debug, Clone, PartialEq)]
pub enum ConsoleCommand {
    Event(AttenuatorEvent),
    Apply,
    Status,
}

fn parse_flag(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "on" => Some(true),
        "0" | "false" | "off" => Some(false),
        _ => None,
    }
}

pub fn parse_command(cmd_str: &str) -> Option<ConsoleCommand> {
    let parts: Vec<&str> = cmd_str.trim().split(':').collect();

    let event = match parts.as_slice() {
        ["apply"] => return Some(ConsoleCommand::Apply),
        ["status"] => return Some(ConsoleCommand::Status),
        ["energy", energy] => AttenuatorEvent::EnergyChanged(energy.parse().ok()?),
        ["custom_energy", energy] => AttenuatorEvent::CustomEnergyChanged(energy.parse().ok()?),
        ["source", source] => AttenuatorEvent::EnergySourceChanged(source.parse::<EnergySource>().ok()?),
        ["transmission", value] => AttenuatorEvent::DesiredTransmissionChanged(value.parse().ok()?),
        ["mode", mode] => AttenuatorEvent::ModeChanged(mode.parse::<ConfigMode>().ok()?),
        ["recalculate"] => AttenuatorEvent::Recalculate,
        ["blade", blade, raw] => AttenuatorEvent::BladeFeedback {
            blade: BladeId(blade.parse().ok()?),
            state: BladeState::from_raw(raw.parse().ok()?),
        },
        [verb @ ("active" | "stuck"), blade, slot, flag] => {
            let flag = parse_flag(flag)?;
            AttenuatorEvent::FilterChanged {
                filter: FilterId::new(blade.parse().ok()?, slot.parse().ok()?),
                change: if *verb == "active" {
                    FilterChange::Active(flag)
                } else {
                    FilterChange::Stuck(flag)
                },
            }
        }
        ["material", blade, slot, material] => AttenuatorEvent::FilterChanged {
            filter: FilterId::new(blade.parse().ok()?, slot.parse().ok()?),
            change: FilterChange::Material(material.to_string()),
        },
        ["thickness", blade, slot, um] => AttenuatorEvent::FilterChanged {
            filter: FilterId::new(blade.parse().ok()?, slot.parse().ok()?),
            change: FilterChange::ThicknessUm(um.parse().ok()?),
        },
        _ => return None,
    };

    Some(ConsoleCommand::Event(event))
}

/// Filter flags as `1`/`0`, first filter first.
fn bits(flags: &[bool]) -> String {
    flags.iter().map(|f| if *f { '1' } else { '0' }).collect()
}

fn print_status(state: &PublishedState) {
    let Some(status) = &state.calculation else {
        println!("no calculation yet");
        return;
    };

    println!(
        "{}: {:.1} eV ({}), desired {:.4e} ({})",
        status.name,
        status.energy,
        status.energy_source,
        status.target.desired_transmission,
        status.target.mode
    );
    for filter in &status.filters {
        match filter.status.working() {
            Some(pair) => println!(
                "  {} {} {} um: T = {:.4e}, T3 = {}",
                filter.id,
                filter.material,
                filter.thickness_um,
                pair.fundamental,
                pair.third_harmonic
                    .map_or_else(|| "n/a".to_string(), |t| format!("{t:.4e}"))
            ),
            None => println!(
                "  {} {} {} um: excluded ({:?})",
                filter.id, filter.material, filter.thickness_um, filter.status
            ),
        }
    }

    let target: Vec<String> = status
        .target
        .blades
        .iter()
        .map(|state| state.map_or_else(|| "hold".to_string(), |s| s.to_string()))
        .collect();
    println!(
        "  target [{}] {}: T = {:.4e}, T3 = {:.4e}, error {:+.4e}",
        target.join(", "),
        bits(&status.target.bitmask),
        status.target.transmission,
        status.target.transmission_3omega,
        status.target.error
    );

    if let Some(feedback) = &state.feedback {
        let active: Vec<String> = feedback.active_config.iter().map(ToString::to_string).collect();
        println!(
            "  blades [{}] {} moving {}: T = {:.4e}, T3 = {:.4e}",
            active.join(", "),
            bits(&feedback.active_bitmask),
            bits(&feedback.moving_bitmask),
            feedback.actual.fundamental,
            feedback.actual.third_harmonic
        );
    }
}

/// Reads commands until stdin closes.
pub async fn run_console(
    events: mpsc::Sender<AttenuatorEvent>,
    coordinator: Arc<AttenuatorCoordinator>,
    published: watch::Receiver<PublishedState>,
    driver_config: MotionDriverConfig,
) -> Result<()> {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut motion: Option<JoinHandle<()>> = None;

    while let Some(line) = lines.next_line().await.context("Failed to read stdin")? {
        if line.trim().is_empty() {
            continue;
        }

        match parse_command(&line) {
            Some(ConsoleCommand::Event(event)) => {
                events.send(event).await.context("Coordinator stopped")?;
            }
            Some(ConsoleCommand::Status) => print_status(&published.borrow()),
            Some(ConsoleCommand::Apply) => {
                if motion.as_ref().is_some_and(|task| !task.is_finished()) {
                    warn!("Motion already in progress");
                    continue;
                }
                let driver = MotionDriver::new(coordinator.clone(), driver_config);
                motion = Some(tokio::spawn(async move {
                    match driver.apply().await {
                        Ok(outcome) => info!(?outcome, "Motion finished"),
                        Err(err) => error!(%err, "Motion failed"),
                    }
                }));
            }
            None => warn!(command = %line.trim(), "Unknown command"),
        }
    }

    info!("Console closed");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(line: &str) -> AttenuatorEvent {
        match parse_command(line) {
            Some(ConsoleCommand::Event(event)) => event,
            other => panic!("{line}: {other:?}"),
        }
    }

    #[test]
    fn parses_inputs() {
        assert_eq!(event("energy:9500"), AttenuatorEvent::EnergyChanged(9500.0));
        assert_eq!(event(" custom_energy:12000.5 \n"), AttenuatorEvent::CustomEnergyChanged(12000.5));
        assert_eq!(event("source:Custom"), AttenuatorEvent::EnergySourceChanged(EnergySource::Custom));
        assert_eq!(event("transmission:1e-3"), AttenuatorEvent::DesiredTransmissionChanged(1e-3));
        assert_eq!(event("mode:ceiling"), AttenuatorEvent::ModeChanged(ConfigMode::Ceiling));
        assert_eq!(event("recalculate"), AttenuatorEvent::Recalculate);
    }

    #[test]
    fn parses_blade_and_filter_commands() {
        assert_eq!(
            event("blade:2:4"),
            AttenuatorEvent::BladeFeedback {
                blade: BladeId(2),
                state: BladeState::In(2),
            }
        );
        assert_eq!(
            event("stuck:0:3:true"),
            AttenuatorEvent::FilterChanged {
                filter: FilterId::new(0, 3),
                change: FilterChange::Stuck(true),
            }
        );
        assert_eq!(
            event("active:1:0:off"),
            AttenuatorEvent::FilterChanged {
                filter: FilterId::new(1, 0),
                change: FilterChange::Active(false),
            }
        );
        assert_eq!(
            event("thickness:1:0:12.5"),
            AttenuatorEvent::FilterChanged {
                filter: FilterId::new(1, 0),
                change: FilterChange::ThicknessUm(12.5),
            }
        );
        assert_eq!(parse_command("apply"), Some(ConsoleCommand::Apply));
        assert_eq!(parse_command("status"), Some(ConsoleCommand::Status));
    }

    #[test]
    fn rejects_malformed_commands() {
        for line in ["", "energy", "energy:lots", "mode:middle", "blade:1", "stuck:0:0:maybe", "move:1:2"] {
            assert_eq!(parse_command(line), None, "{line}");
        }
    }

    #[test]
    fn bits_list_filters_in_order() {
        assert_eq!(bits(&[true, false, false, true]), "1001");
        assert_eq!(bits(&[]), "");
    }
}
