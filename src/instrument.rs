//! The capability surface the dispatcher drives.
//!
//! Real hardware ([`SerialLoad`](crate::serial::SerialLoad)) and the test-mode
//! [`SimulatedLoad`](crate::simulation::SimulatedLoad) both implement [`Instrument`];
//! which one is used is decided once, when the dispatcher is spawned.

use core::fmt;

use serde::{Deserialize, Deserializer, Serialize};

use crate::{
    error::Fault,
    types::{ConstantModeId, ControlMode, LoadState, SampleReading},
};

/// Identifies a serial port, either by number or by device name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct PortId(String);

/// Port numbers may be written unquoted in TOML or the environment.
impl<'de> Deserialize<'de> for PortId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Raw {
            Number(u32),
            Name(String),
        }

        Ok(match Raw::deserialize(deserializer)? {
            Raw::Number(n) => PortId::from(n),
            Raw::Name(name) => PortId::from(name),
        })
    }
}

impl PortId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// The device to open.
    ///
    /// A bare number `n` names `COMn` on Windows and `/dev/ttySn` elsewhere.
    pub fn device_name(&self) -> String {
        let name = self.0.trim();
        if !name.is_empty() && name.chars().all(|c| c.is_ascii_digit()) {
            if cfg!(windows) {
                format!("COM{name}")
            } else {
                format!("/dev/ttyS{name}")
            }
        } else {
            name.to_string()
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PortId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for PortId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<String> for PortId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<u32> for PortId {
    fn from(value: u32) -> Self {
        Self(value.to_string())
    }
}

/// Typed operations of a DC electronic load.
///
/// All calls block until the instrument has answered. Implementations report
/// timeouts as [`Fault::Timeout`] and short or garbled answers as
/// [`Fault::MalformedData`], so sampling reads can treat both as a miss.
pub trait Instrument: Send {
    fn open(&mut self, port: &PortId, baud: u32) -> Result<(), Fault>;
    fn close(&mut self) -> Result<(), Fault>;

    fn set_control_mode(&mut self, mode: ControlMode) -> Result<(), Fault>;
    fn set_load(&mut self, state: LoadState) -> Result<(), Fault>;
    fn read_inputs(&mut self) -> Result<SampleReading, Fault>;

    fn get_cc_current(&mut self) -> Result<f64, Fault>;
    fn set_cc_current(&mut self, amps: f64) -> Result<(), Fault>;
    fn get_cv_voltage(&mut self) -> Result<f64, Fault>;
    fn set_cv_voltage(&mut self, volts: f64) -> Result<(), Fault>;
    fn get_cw_power(&mut self) -> Result<f64, Fault>;
    fn set_cw_power(&mut self, watts: f64) -> Result<(), Fault>;
    fn get_cr_resistance(&mut self) -> Result<f64, Fault>;
    fn set_cr_resistance(&mut self, ohms: f64) -> Result<(), Fault>;

    fn set_active_mode(&mut self, mode: ConstantModeId) -> Result<(), Fault>;
    fn get_active_mode(&mut self) -> Result<ConstantModeId, Fault>;
}

type Getter = fn(&mut dyn Instrument) -> Result<f64, Fault>;
type Setter = fn(&mut dyn Instrument, f64) -> Result<(), Fault>;

/// Static description of one constant mode: its name, unit and setpoint accessors.
pub struct ConstantModeDescriptor {
    pub id: ConstantModeId,
    pub name: &'static str,
    pub unit: &'static str,
    pub get: Getter,
    pub set: Setter,
}

impl fmt::Debug for ConstantModeDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConstantModeDescriptor")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("unit", &self.unit)
            .finish_non_exhaustive()
    }
}

fn get_cc(instrument: &mut dyn Instrument) -> Result<f64, Fault> {
    instrument.get_cc_current()
}

fn set_cc(instrument: &mut dyn Instrument, value: f64) -> Result<(), Fault> {
    instrument.set_cc_current(value)
}

fn get_cv(instrument: &mut dyn Instrument) -> Result<f64, Fault> {
    instrument.get_cv_voltage()
}

fn set_cv(instrument: &mut dyn Instrument, value: f64) -> Result<(), Fault> {
    instrument.set_cv_voltage(value)
}

fn get_cw(instrument: &mut dyn Instrument) -> Result<f64, Fault> {
    instrument.get_cw_power()
}

fn set_cw(instrument: &mut dyn Instrument, value: f64) -> Result<(), Fault> {
    instrument.set_cw_power(value)
}

fn get_cr(instrument: &mut dyn Instrument) -> Result<f64, Fault> {
    instrument.get_cr_resistance()
}

fn set_cr(instrument: &mut dyn Instrument, value: f64) -> Result<(), Fault> {
    instrument.set_cr_resistance(value)
}

/// Descriptors in CC, CV, CW, CR order.
pub static CONSTANT_MODES: [ConstantModeDescriptor; 4] = [
    ConstantModeDescriptor {
        id: ConstantModeId::Cc,
        name: "Constant current",
        unit: "A",
        get: get_cc,
        set: set_cc,
    },
    ConstantModeDescriptor {
        id: ConstantModeId::Cv,
        name: "Constant voltage",
        unit: "V",
        get: get_cv,
        set: set_cv,
    },
    ConstantModeDescriptor {
        id: ConstantModeId::Cw,
        name: "Constant power",
        unit: "W",
        get: get_cw,
        set: set_cw,
    },
    ConstantModeDescriptor {
        id: ConstantModeId::Cr,
        name: "Constant resistance",
        unit: "Ω",
        get: get_cr,
        set: set_cr,
    },
];

impl ConstantModeId {
    pub fn descriptor(self) -> &'static ConstantModeDescriptor {
        &CONSTANT_MODES[self.index()]
    }
}
