//! Commands accepted by the dispatcher, and the bounded queue carrying them.

use std::sync::mpsc::{self, Receiver, SyncSender, TrySendError};

use thiserror::Error;

use crate::types::{ConstantModeId, SampleReceiver};

/// Number of commands that may wait for the dispatcher before producers block.
pub const QUEUE_CAPACITY: usize = 10;

/// One request for the instrument. Consumed exactly once by the dispatcher.
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    SetRemote,
    SetLocal,
    LoadOn,
    LoadOff,
    /// Sample the live inputs for the given consumer.
    ReadInputs(SampleReceiver),
    /// Read every setpoint and the active mode.
    GetConstants,
    /// Apply and verify a setpoint. `value` is the text the operator entered.
    SetConstant { mode: ConstantModeId, value: String },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::SetRemote => "set_remote",
            Command::SetLocal => "set_local",
            Command::LoadOn => "load_on",
            Command::LoadOff => "load_off",
            Command::ReadInputs(_) => "read_inputs",
            Command::GetConstants => "get_constants",
            Command::SetConstant { .. } => "set_constant",
        }
    }
}

#[derive(Error, Debug)]
pub enum QueueError {
    #[error("command queue is full")]
    Full(Command),
    #[error("dispatcher has stopped")]
    Closed(Command),
}

/// Producer side of the command queue. Cheap to clone, one per producer.
#[derive(Debug, Clone)]
pub struct CommandSender {
    tx: SyncSender<Command>,
}

impl CommandSender {
    /// Enqueue a command, blocking while the queue is full.
    pub fn send(&self, command: Command) -> Result<(), QueueError> {
        self.tx.send(command).map_err(|e| QueueError::Closed(e.0))
    }

    /// Enqueue a command only if there is room right now.
    pub fn try_send(&self, command: Command) -> Result<(), QueueError> {
        self.tx.try_send(command).map_err(|e| match e {
            TrySendError::Full(command) => QueueError::Full(command),
            TrySendError::Disconnected(command) => QueueError::Closed(command),
        })
    }
}

/// Create the bounded command queue.
pub fn queue() -> (CommandSender, Receiver<Command>) {
    let (tx, rx) = mpsc::sync_channel(QUEUE_CAPACITY);
    (CommandSender { tx }, rx)
}
