//! Events published by the dispatcher for the UI and the log writer.

use std::sync::mpsc::{self, Receiver, Sender};

use tracing::trace;

use crate::types::{ConstantsSnapshot, ControlMode, LoadState, SampleReading};

#[derive(Debug, Clone, PartialEq)]
pub enum Notification {
    ConnectionStateChanged(bool),
    /// Only published for the switch to [`ControlMode::Local`].
    ControlStateChanged(ControlMode),
    LoadStateChanged(LoadState),
    /// `None` when the read missed.
    DisplaySample(Option<SampleReading>),
    /// `None` when the read missed.
    FileSample(Option<SampleReading>),
    ConstantsSnapshot(ConstantsSnapshot),
    /// A setpoint was applied and verified; consumers should ask for fresh constants.
    ConstantModeChanged,
    /// Informational line for the operator log.
    Status(String),
    ErrorMessage(String),
}

/// Publishing half of the notification channel.
///
/// Publishing never blocks. Events for a consumer that has gone away are dropped.
#[derive(Debug, Clone)]
pub struct Notifier {
    tx: Sender<Notification>,
}

impl Notifier {
    pub fn publish(&self, notification: Notification) {
        if let Err(mpsc::SendError(dropped)) = self.tx.send(notification) {
            trace!(?dropped, "no notification consumer");
        }
    }

    pub fn status(&self, text: impl Into<String>) {
        self.publish(Notification::Status(text.into()));
    }

    pub fn error(&self, text: impl Into<String>) {
        self.publish(Notification::ErrorMessage(text.into()));
    }
}

pub fn channel() -> (Notifier, Receiver<Notification>) {
    let (tx, rx) = mpsc::channel();
    (Notifier { tx }, rx)
}
