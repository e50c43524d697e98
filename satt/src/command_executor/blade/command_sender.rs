use crate::command_executor::blade::commands::{BladeCommand, CommandResponse};
use attenuator::{BladeState, MotionCommand};
use std::io;
use utilities::command_executor::{CommandSender, ExecutorError};

#[derive(Clone)]
pub struct BladeCommandSender {
    sender: CommandSender<BladeCommand>,
}

fn unexpected_response() -> ExecutorError {
    ExecutorError::Device(io::Error::other("Unexpected response type"))
}

impl BladeCommandSender {
    pub fn new(sender: CommandSender<BladeCommand>) -> Self {
        Self { sender }
    }

    pub async fn get_states(&self) -> Result<Vec<BladeState>, ExecutorError> {
        let response = self.sender.send_command(BladeCommand::GetStates).await?;

        match response {
            CommandResponse::States(raw) => Ok(raw.into_iter().map(BladeState::from_raw).collect()),
            _ => Err(unexpected_response()),
        }
    }

    pub async fn move_blade(&self, command: MotionCommand) -> Result<(), ExecutorError> {
        let response = self
            .sender
            .send_command(BladeCommand::Move {
                blade: command.blade.0,
                target: command.target.raw(),
            })
            .await?;

        match response {
            CommandResponse::Ok => Ok(()),
            _ => Err(unexpected_response()),
        }
    }
}
