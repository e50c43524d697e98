use std::io;
use utilities::command_executor::Command;

use crate::command_executor::blade::SimulatedBladeHandler;

#[derive(Clone)]
pub enum BladeCommand {
    GetStates,
    /// `target` is a raw controller state code.
    Move { blade: usize, target: i64 },
}

pub enum CommandResponse {
    States(Vec<i64>),
    Ok,
}

impl Command for BladeCommand {
    type Response = CommandResponse;
    type Handler = SimulatedBladeHandler;

    fn execute(self, handler: &mut Self::Handler) -> io::Result<Self::Response> {
        match self {
            BladeCommand::GetStates => handler.get_states(),
            BladeCommand::Move { blade, target } => handler.move_blade(blade, target),
        }
    }
}
