//! Runs blocking device I/O on its own thread and hands results back to
//! async callers.

use std::{
    io,
    sync::mpsc::{Receiver, Sender},
};

use tokio::sync::oneshot;
use tracing::{debug, error};

#[derive(Debug, thiserror::Error)]
pub enum ExecutorError {
    #[error("Command executor is not running")]
    Disconnected,

    #[error("Command executor dropped the response")]
    ResponseDropped,

    #[error("Device error: {0}")]
    Device(#[from] io::Error),
}

pub trait Command: Send {
    type Response: Send;
    type Handler: DeviceHandler<Command = Self>;

    fn execute(self, handler: &mut Self::Handler) -> io::Result<Self::Response>;
}

pub trait DeviceHandler {
    type Command: Command<Handler = Self>;
}

pub struct GenericCommand<C: Command> {
    command: C,
    response_ch: oneshot::Sender<io::Result<C::Response>>,
}

impl<C: Command> GenericCommand<C> {
    pub fn new(command: C, response_ch: oneshot::Sender<io::Result<C::Response>>) -> Self {
        Self {
            command,
            response_ch,
        }
    }

    /// Runs the command and returns its own failure, if any, after passing
    /// the result on to the caller.
    pub fn execute(self, handler: &mut C::Handler) -> Result<(), ExecutorError> {
        let result = self.command.execute(handler);
        let failure = result
            .as_ref()
            .err()
            .map(|err| io::Error::new(err.kind(), err.to_string()));

        if self.response_ch.send(result).is_err() {
            debug!("Caller went away before the response was ready");
        }

        match failure {
            Some(err) => Err(ExecutorError::Device(err)),
            None => Ok(()),
        }
    }
}

pub struct CommandExecutor<H: DeviceHandler + Send + 'static> {
    handler: H,
    commands_ch: Receiver<GenericCommand<H::Command>>,
    sender: Sender<GenericCommand<H::Command>>,
}

impl<H: DeviceHandler + Send> CommandExecutor<H> {
    pub fn new(handler: H) -> Self {
        let (sender, commands_ch) = std::sync::mpsc::channel();

        Self {
            handler,
            commands_ch,
            sender,
        }
    }

    pub fn sender(&self) -> CommandSender<H::Command> {
        CommandSender::new(self.sender.clone())
    }

    /// Executes commands until every [`CommandSender`] is dropped.
    pub fn run(self) -> H {
        let Self {
            mut handler,
            commands_ch,
            sender,
        } = self;
        drop(sender);

        while let Ok(command) = commands_ch.recv() {
            if let Err(err) = command.execute(&mut handler) {
                error!(%err, "Device command failed");
            }
        }

        debug!("All command senders dropped, executor stopped");
        handler
    }

    pub fn spawn(self) -> tokio::task::JoinHandle<H> {
        tokio::task::spawn_blocking(move || self.run())
    }
}

pub struct CommandSender<C: Command> {
    commands_ch: Sender<GenericCommand<C>>,
}

impl<C: Command> Clone for CommandSender<C> {
    fn clone(&self) -> Self {
        Self {
            commands_ch: self.commands_ch.clone(),
        }
    }
}

impl<C: Command> CommandSender<C> {
    pub fn new(commands_ch: Sender<GenericCommand<C>>) -> Self {
        Self { commands_ch }
    }

    pub async fn send_command(&self, command: C) -> Result<C::Response, ExecutorError> {
        let (response_ch, response_rx) = oneshot::channel();
        let command = GenericCommand::new(command, response_ch);

        self.commands_ch
            .send(command)
            .map_err(|_| ExecutorError::Disconnected)?;

        Ok(response_rx
            .await
            .map_err(|_| ExecutorError::ResponseDropped)??)
    }
}
