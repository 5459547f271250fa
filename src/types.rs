//! This module contains the value types exchanged with the load and between threads.

use core::fmt;

use modular_bitfield::prelude::*;
use strum_macros::{Display, EnumIter, EnumString};

/// The four regulation modes of the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, EnumIter, Display, EnumString)]
#[strum(ascii_case_insensitive)]
#[repr(u8)]
pub enum ConstantModeId {
    /// Constant current.
    #[strum(serialize = "CC")]
    Cc = 0,
    /// Constant voltage.
    #[strum(serialize = "CV")]
    Cv = 1,
    /// Constant power.
    #[strum(serialize = "CW")]
    Cw = 2,
    /// Constant resistance.
    #[strum(serialize = "CR")]
    Cr = 3,
}

impl ConstantModeId {
    /// Lower-case short code, as written to the log file.
    pub const fn code(self) -> &'static str {
        match self {
            ConstantModeId::Cc => "cc",
            ConstantModeId::Cv => "cv",
            ConstantModeId::Cw => "cw",
            ConstantModeId::Cr => "cr",
        }
    }

    pub const fn index(self) -> usize {
        self as usize
    }
}

impl TryFrom<u8> for ConstantModeId {
    type Error = u8;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(ConstantModeId::Cc),
            1 => Ok(ConstantModeId::Cv),
            2 => Ok(ConstantModeId::Cw),
            3 => Ok(ConstantModeId::Cr),
            other => Err(other),
        }
    }
}

/// Who has authority over the load.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum ControlMode {
    /// Front-panel control.
    #[strum(serialize = "local")]
    Local,
    /// Commanded over the serial link.
    #[strum(serialize = "remote")]
    Remote,
}

/// Used to be less ambiguous about whether the load input is on or off.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum LoadState {
    /// Disabled.
    #[strum(serialize = "off")]
    Off,
    /// Enabled.
    #[strum(serialize = "on")]
    On,
}

impl From<LoadState> for bool {
    fn from(value: LoadState) -> Self {
        match value {
            LoadState::Off => false,
            LoadState::On => true,
        }
    }
}

impl From<bool> for LoadState {
    fn from(value: bool) -> Self {
        match value {
            true => LoadState::On,
            false => LoadState::Off,
        }
    }
}

/// Which consumer a sampling read is destined for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum SampleReceiver {
    #[strum(serialize = "display")]
    Display,
    #[strum(serialize = "file")]
    File,
}

/// Status byte carried by the load's acknowledgement frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCode {
    Success,
    ChecksumIncorrect,
    ParameterIncorrect,
    UnrecognizedCommand,
    InvalidCommand,
    Other(u8),
}

impl From<u8> for StatusCode {
    fn from(value: u8) -> Self {
        match value {
            0x80 => StatusCode::Success,
            0x90 => StatusCode::ChecksumIncorrect,
            0xA0 => StatusCode::ParameterIncorrect,
            0xB0 => StatusCode::UnrecognizedCommand,
            0xC0 => StatusCode::InvalidCommand,
            other => StatusCode::Other(other),
        }
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Success => write!(f, "command successful"),
            StatusCode::ChecksumIncorrect => write!(f, "checksum incorrect"),
            StatusCode::ParameterIncorrect => write!(f, "parameter incorrect"),
            StatusCode::UnrecognizedCommand => write!(f, "unrecognized command"),
            StatusCode::InvalidCommand => write!(f, "invalid command"),
            StatusCode::Other(code) => write!(f, "unknown status 0x{code:02X}"),
        }
    }
}

/// "Operation state register" reported with every input reading.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OperationState {
    /// A new demand value is being calculated.
    pub calculating: bool,
    pub waiting_for_trigger: bool,
    pub remote_control: bool,
    pub load_on: bool,
    pub local_key_enabled: bool,
    pub remote_sensing: bool,
    pub load_on_timer: bool,
    #[skip]
    __: B1,
}

/// "Demand state register": protection flags and the regulation mode in effect.
#[bitfield]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DemandState {
    pub reversed_voltage: bool,
    pub over_voltage: bool,
    pub over_current: bool,
    pub over_power: bool,
    pub over_temperature: bool,
    /// Remote sense terminals are not connected.
    pub remote_terminal_open: bool,
    pub constant_current: bool,
    pub constant_voltage: bool,
    pub constant_power: bool,
    pub constant_resistance: bool,
    #[skip]
    __: B6,
}

impl DemandState {
    /// The regulation mode flagged in this register, if any.
    pub fn regulating(&self) -> Option<ConstantModeId> {
        if self.constant_current() {
            Some(ConstantModeId::Cc)
        } else if self.constant_voltage() {
            Some(ConstantModeId::Cv)
        } else if self.constant_power() {
            Some(ConstantModeId::Cw)
        } else if self.constant_resistance() {
            Some(ConstantModeId::Cr)
        } else {
            None
        }
    }
}

/// One set of live input readings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleReading {
    /// Volts.
    pub voltage: f64,
    /// Amps.
    pub current: f64,
    /// Watts.
    pub power: f64,
    pub operation: Option<OperationState>,
    pub demand: Option<DemandState>,
}

impl SampleReading {
    pub fn new(voltage: f64, current: f64, power: f64) -> Self {
        Self {
            voltage,
            current,
            power,
            operation: None,
            demand: None,
        }
    }
}

/// Value and activity of one constant mode within a [`ConstantsSnapshot`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ConstantEntry {
    pub mode: ConstantModeId,
    pub value: f64,
    pub is_active: bool,
}

/// Every constant-mode setpoint with exactly one of them marked active.
#[derive(Debug, Clone, PartialEq)]
pub struct ConstantsSnapshot {
    entries: [ConstantEntry; 4],
}

impl ConstantsSnapshot {
    /// Build a snapshot from setpoints ordered CC, CV, CW, CR.
    pub fn new(values: [f64; 4], active: ConstantModeId) -> Self {
        use strum::IntoEnumIterator;

        let mut entries = [ConstantEntry {
            mode: ConstantModeId::Cc,
            value: 0.0,
            is_active: false,
        }; 4];
        for mode in ConstantModeId::iter() {
            entries[mode.index()] = ConstantEntry {
                mode,
                value: values[mode.index()],
                is_active: mode == active,
            };
        }
        Self { entries }
    }

    pub fn get(&self, mode: ConstantModeId) -> &ConstantEntry {
        &self.entries[mode.index()]
    }

    pub fn active(&self) -> ConstantModeId {
        self.entries
            .iter()
            .find(|entry| entry.is_active)
            .map(|entry| entry.mode)
            .unwrap_or(ConstantModeId::Cc)
    }

    pub fn iter(&self) -> impl Iterator<Item = &ConstantEntry> {
        self.entries.iter()
    }
}
