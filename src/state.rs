//! What the dispatcher believes about the instrument.

use crate::{
    instrument::PortId,
    types::{ConstantModeId, ControlMode},
};

/// Control authority as last set by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ControlState {
    /// Nothing has been set since the port was opened.
    #[default]
    Unknown,
    Local,
    Remote,
}

impl From<ControlMode> for ControlState {
    fn from(value: ControlMode) -> Self {
        match value {
            ControlMode::Local => ControlState::Local,
            ControlMode::Remote => ControlState::Remote,
        }
    }
}

/// Position in the dispatcher's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Disconnected,
    Connected(ControlState),
}

/// Device state owned by the dispatch engine.
///
/// `active_constant_mode` is only ever `Some` while control is [`ControlState::Remote`].
#[derive(Debug, Clone, Default)]
pub struct DeviceState {
    connection_open: bool,
    control: ControlState,
    active_constant_mode: Option<ConstantModeId>,
    port: Option<PortId>,
    baud: Option<u32>,
}

impl DeviceState {
    pub fn phase(&self) -> Phase {
        if self.connection_open {
            Phase::Connected(self.control)
        } else {
            Phase::Disconnected
        }
    }

    pub fn is_open(&self) -> bool {
        self.connection_open
    }

    pub fn control(&self) -> ControlState {
        self.control
    }

    pub fn active_constant_mode(&self) -> Option<ConstantModeId> {
        self.active_constant_mode
    }

    /// Port and baud rate of the last connect request.
    pub fn endpoint(&self) -> Option<(&PortId, u32)> {
        Some((self.port.as_ref()?, self.baud?))
    }

    pub(crate) fn set_endpoint(&mut self, port: PortId, baud: u32) {
        self.port = Some(port);
        self.baud = Some(baud);
    }

    pub(crate) fn mark_open(&mut self) {
        self.connection_open = true;
        self.control = ControlState::Unknown;
        self.active_constant_mode = None;
    }

    pub(crate) fn mark_closed(&mut self) {
        self.connection_open = false;
        self.control = ControlState::Unknown;
        self.active_constant_mode = None;
    }

    pub(crate) fn set_control(&mut self, mode: ControlMode) {
        self.control = mode.into();
        if self.control != ControlState::Remote {
            self.active_constant_mode = None;
        }
    }

    /// Record a verified mode change. Ignored unless under remote control.
    pub(crate) fn set_active_constant_mode(&mut self, mode: ConstantModeId) {
        if self.control == ControlState::Remote {
            self.active_constant_mode = Some(mode);
        }
    }
}
