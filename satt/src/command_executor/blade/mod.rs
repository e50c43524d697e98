//! Simulated blade motors.
//!
//! A commanded blade reports "moving" until its travel time has elapsed and
//! then the commanded position, using the raw state codes of the real
//! controllers.

use crate::command_executor::blade::commands::{BladeCommand, CommandResponse};
use attenuator::{BladeState, DeviceDescriptor};
use std::{
    io,
    time::{Duration, Instant},
};
use tracing::debug;
use utilities::command_executor::DeviceHandler;

pub mod command_sender;
pub mod commands;

struct SimulatedBlade {
    slots: usize,
    position: BladeState,
    arrives_at: Option<Instant>,
}

pub struct SimulatedBladeHandler {
    blades: Vec<SimulatedBlade>,
    travel_time: Duration,
}

impl DeviceHandler for SimulatedBladeHandler {
    type Command = BladeCommand;
}

impl SimulatedBladeHandler {
    /// All blades start retracted.
    pub fn new(descriptor: &DeviceDescriptor, travel_time: Duration) -> Self {
        Self {
            blades: descriptor
                .blades
                .iter()
                .map(|blade| SimulatedBlade {
                    slots: blade.filters.len(),
                    position: BladeState::Out,
                    arrives_at: None,
                })
                .collect(),
            travel_time,
        }
    }

    pub fn move_blade(&mut self, blade: usize, raw_target: i64) -> io::Result<CommandResponse> {
        let target = BladeState::from_raw(raw_target);
        let travel_time = self.travel_time;
        let sim = self.blades.get_mut(blade).ok_or_else(|| {
            io::Error::new(io::ErrorKind::InvalidInput, format!("no blade {blade}"))
        })?;

        let reachable = match target {
            BladeState::Out => true,
            BladeState::In(slot) => slot < sim.slots,
            BladeState::Moving | BladeState::Unknown => false,
        };
        if !reachable {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("blade {blade} cannot move to {target}"),
            ));
        }

        debug!(blade, %target, "Simulated move started");
        sim.position = target;
        sim.arrives_at = Some(Instant::now() + travel_time);
        Ok(CommandResponse::Ok)
    }

    pub fn get_states(&mut self) -> io::Result<CommandResponse> {
        let now = Instant::now();
        let states = self
            .blades
            .iter_mut()
            .map(|sim| {
                if sim.arrives_at.is_some_and(|at| at <= now) {
                    sim.arrives_at = None;
                }
                match sim.arrives_at {
                    Some(_) => BladeState::Moving.raw(),
                    None => sim.position.raw(),
                }
            })
            .collect();
        Ok(CommandResponse::States(states))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use attenuator::{DeviceFamily, FilterDescriptor};

    fn handler(travel_time: Duration) -> SimulatedBladeHandler {
        let descriptor = DeviceDescriptor::in_out(
            "AT2L0",
            DeviceFamily::Bitmask,
            vec![FilterDescriptor::new("Si", 10.0), FilterDescriptor::new("Si", 20.0)],
        );
        SimulatedBladeHandler::new(&descriptor, travel_time)
    }

    fn states(handler: &mut SimulatedBladeHandler) -> Vec<BladeState> {
        match handler.get_states().unwrap() {
            CommandResponse::States(raw) => raw.into_iter().map(BladeState::from_raw).collect(),
            CommandResponse::Ok => panic!("expected states"),
        }
    }

    #[test]
    fn reports_moving_until_arrival() {
        let mut handler = handler(Duration::from_secs(3600));
        assert_eq!(states(&mut handler), vec![BladeState::Out, BladeState::Out]);

        handler.move_blade(1, BladeState::In(0).raw()).unwrap();
        assert_eq!(states(&mut handler), vec![BladeState::Out, BladeState::Moving]);
    }

    #[test]
    fn arrives_after_travel_time() {
        let mut handler = handler(Duration::ZERO);
        handler.move_blade(0, BladeState::In(0).raw()).unwrap();
        assert_eq!(states(&mut handler), vec![BladeState::In(0), BladeState::Out]);
    }

    #[test]
    fn rejects_unreachable_targets() {
        let mut handler = handler(Duration::ZERO);
        assert!(handler.move_blade(5, BladeState::Out.raw()).is_err());
        assert!(handler.move_blade(0, BladeState::In(1).raw()).is_err());
        assert!(handler.move_blade(0, BladeState::Moving.raw()).is_err());
        assert_eq!(states(&mut handler), vec![BladeState::Out, BladeState::Out]);
    }
}
