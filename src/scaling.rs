//! Scaling factors between physical units and the load's raw integer units.
//!
//! The load transfers every quantity as a little-endian u32 in a fixed sub-unit:
//! voltages, powers and resistances in thousandths, currents in ten-thousandths.

use crate::types::ConstantModeId;

/// Number of raw counts per physical unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Scale {
    raw_per_unit: u32,
}

impl Scale {
    /// Millivolts, milliwatts and milliohms.
    pub const MILLI: Scale = Scale::new(1_000);
    /// Current in units of 0.1 mA.
    pub const TENTH_MILLI: Scale = Scale::new(10_000);

    pub const fn new(raw_per_unit: u32) -> Self {
        Self { raw_per_unit }
    }

    /// Convert a raw count into the physical unit.
    #[inline]
    pub fn from_raw(&self, raw: u32) -> f64 {
        raw as f64 / self.raw_per_unit as f64
    }

    /// Convert a physical value into raw counts, rounding to the nearest count.
    ///
    /// Returns `None` for negative, non-finite or too large values.
    pub fn to_raw(&self, value: f64) -> Option<u32> {
        if !value.is_finite() || value < 0.0 {
            return None;
        }
        let raw = (value * self.raw_per_unit as f64).round();
        if raw > u32::MAX as f64 {
            return None;
        }
        Some(raw as u32)
    }
}

/// Scale used for input voltage readings.
pub const VOLTAGE: Scale = Scale::MILLI;
/// Scale used for input current readings.
pub const CURRENT: Scale = Scale::TENTH_MILLI;
/// Scale used for input power readings.
pub const POWER: Scale = Scale::MILLI;

impl ConstantModeId {
    /// Scale of this mode's setpoint.
    pub const fn scale(self) -> Scale {
        match self {
            ConstantModeId::Cc => Scale::TENTH_MILLI,
            ConstantModeId::Cv | ConstantModeId::Cw | ConstantModeId::Cr => Scale::MILLI,
        }
    }
}
