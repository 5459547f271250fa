//! A load that lives entirely in memory, for running the logger without hardware.
//!
//! Constant setpoints come from four canned sets, one per regulation mode. Until
//! a mode is selected the simulator reports one of them (the first, or a random
//! one in randomized mode). Selecting a mode switches to that mode's set, and
//! values written through the setters take precedence over the canned ones.
//!
//! Randomized reads draw from eight slots of which only three hold data, so most
//! reads miss the same way a short serial answer would.

use rand::{Rng, SeedableRng, rngs::StdRng};
use tracing::{debug, info};

use crate::{
    error::Fault,
    instrument::{Instrument, PortId},
    types::{ConstantModeId, ControlMode, LoadState, SampleReading},
};

const CONSTANT_SETS: [([f64; 4], ConstantModeId); 4] = [
    ([0.1, 0.2, 0.3, 0.4], ConstantModeId::Cc),
    ([1.1, 1.2, 1.3, 1.4], ConstantModeId::Cv),
    ([2.1, 2.2, 2.3, 2.4], ConstantModeId::Cw),
    ([3.1, 3.2, 3.3, 3.4], ConstantModeId::Cr),
];

/// Voltage, current, power.
const INPUT_VALUES: [(f64, f64, f64); 3] = [
    (0.11, 0.12, 0.13),
    (1.12, 1.22, 1.32),
    (2.13, 2.23, 2.33),
];

/// Number of slots a randomized read draws from.
const READ_SLOTS: usize = 8;

enum Source {
    /// Cycle through the input values in order; start on the first constant set.
    Sequential { next: usize },
    Random(StdRng),
}

pub struct SimulatedLoad {
    source: Source,
    open: bool,
    control: ControlMode,
    load: LoadState,
    constant_set: Option<usize>,
    written: [Option<f64>; 4],
}

impl SimulatedLoad {
    /// Every read succeeds, cycling through the canned input values.
    pub fn deterministic() -> Self {
        Self::with_source(Source::Sequential { next: 0 })
    }

    /// Reads and the initial constant set are drawn at random.
    pub fn randomized() -> Self {
        Self::with_source(Source::Random(StdRng::from_entropy()))
    }

    /// Like [`randomized`](Self::randomized) but reproducible.
    pub fn seeded(seed: u64) -> Self {
        Self::with_source(Source::Random(StdRng::seed_from_u64(seed)))
    }

    fn with_source(source: Source) -> Self {
        Self {
            source,
            open: false,
            control: ControlMode::Local,
            load: LoadState::Off,
            constant_set: None,
            written: [None; 4],
        }
    }

    pub fn load_state(&self) -> LoadState {
        self.load
    }

    pub fn control_mode(&self) -> ControlMode {
        self.control
    }

    fn ensure_open(&self) -> Result<(), Fault> {
        if self.open {
            Ok(())
        } else {
            Err(Fault::NotConnected)
        }
    }

    fn current_set(&mut self) -> usize {
        if let Some(set) = self.constant_set {
            return set;
        }
        let set = match &mut self.source {
            Source::Sequential { .. } => 0,
            Source::Random(rng) => rng.gen_range(0..CONSTANT_SETS.len()),
        };
        self.constant_set = Some(set);
        set
    }

    fn get(&mut self, mode: ConstantModeId) -> Result<f64, Fault> {
        self.ensure_open()?;
        let set = self.current_set();
        Ok(self.written[mode.index()].unwrap_or(CONSTANT_SETS[set].0[mode.index()]))
    }

    fn set(&mut self, mode: ConstantModeId, value: f64) -> Result<(), Fault> {
        self.ensure_open()?;
        if !value.is_finite() || value < 0.0 {
            return Err(Fault::InvalidValue(value.to_string()));
        }
        self.written[mode.index()] = Some(value);
        Ok(())
    }
}

impl Instrument for SimulatedLoad {
    fn open(&mut self, port: &PortId, baud: u32) -> Result<(), Fault> {
        info!(%port, baud, "simulated port open");
        self.open = true;
        Ok(())
    }

    fn close(&mut self) -> Result<(), Fault> {
        info!("simulated port closed");
        self.open = false;
        Ok(())
    }

    fn set_control_mode(&mut self, mode: ControlMode) -> Result<(), Fault> {
        self.ensure_open()?;
        self.control = mode;
        Ok(())
    }

    fn set_load(&mut self, state: LoadState) -> Result<(), Fault> {
        self.ensure_open()?;
        self.load = state;
        Ok(())
    }

    fn read_inputs(&mut self) -> Result<SampleReading, Fault> {
        self.ensure_open()?;
        let slot = match &mut self.source {
            Source::Sequential { next } => {
                let slot = *next;
                *next = (*next + 1) % INPUT_VALUES.len();
                slot
            }
            Source::Random(rng) => rng.gen_range(0..READ_SLOTS),
        };
        let Some(&(voltage, current, power)) = INPUT_VALUES.get(slot) else {
            debug!(slot, "simulated read miss");
            return Err(Fault::MalformedData("no data in simulated slot".into()));
        };
        Ok(SampleReading::new(voltage, current, power))
    }

    fn get_cc_current(&mut self) -> Result<f64, Fault> {
        self.get(ConstantModeId::Cc)
    }

    fn set_cc_current(&mut self, amps: f64) -> Result<(), Fault> {
        self.set(ConstantModeId::Cc, amps)
    }

    fn get_cv_voltage(&mut self) -> Result<f64, Fault> {
        self.get(ConstantModeId::Cv)
    }

    fn set_cv_voltage(&mut self, volts: f64) -> Result<(), Fault> {
        self.set(ConstantModeId::Cv, volts)
    }

    fn get_cw_power(&mut self) -> Result<f64, Fault> {
        self.get(ConstantModeId::Cw)
    }

    fn set_cw_power(&mut self, watts: f64) -> Result<(), Fault> {
        self.set(ConstantModeId::Cw, watts)
    }

    fn get_cr_resistance(&mut self) -> Result<f64, Fault> {
        self.get(ConstantModeId::Cr)
    }

    fn set_cr_resistance(&mut self, ohms: f64) -> Result<(), Fault> {
        self.set(ConstantModeId::Cr, ohms)
    }

    fn set_active_mode(&mut self, mode: ConstantModeId) -> Result<(), Fault> {
        self.ensure_open()?;
        self.constant_set = Some(mode.index());
        Ok(())
    }

    fn get_active_mode(&mut self) -> Result<ConstantModeId, Fault> {
        self.ensure_open()?;
        let set = self.current_set();
        Ok(CONSTANT_SETS[set].1)
    }
}
