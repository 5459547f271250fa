//! We use this mocking module in unit tests to stand in for the load.

use std::{
    collections::VecDeque,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, Ordering},
        mpsc::{Receiver, Sender},
    },
    time::Duration,
};

use crate::{
    error::Fault,
    instrument::{Instrument, PortId},
    types::{ConstantModeId, ControlMode, LoadState, SampleReading},
};

/// Every call the mock received, in order.
#[derive(Debug, Clone, PartialEq)]
pub enum Call {
    Open(PortId, u32),
    Close,
    SetControl(ControlMode),
    SetLoad(LoadState),
    ReadInputs,
    Get(ConstantModeId),
    Set(ConstantModeId, f64),
    SetActiveMode(ConstantModeId),
    GetActiveMode,
}

/// How the mock answers.
pub struct Script {
    pub fail_open: bool,
    pub fail_close: bool,
    pub fail_control: bool,
    pub fail_load: bool,
    pub fail_get: Option<ConstantModeId>,
    /// Answers for `read_inputs`, used front to back. Empty means a fixed reading.
    pub reads: VecDeque<Result<SampleReading, Fault>>,
    pub setpoints: [f64; 4],
    pub active: ConstantModeId,
    /// Returned by setpoint getters instead of the stored value.
    pub value_echo: Option<f64>,
    /// Returned by `get_active_mode` instead of the stored mode.
    pub mode_echo: Option<ConstantModeId>,
    /// Time spent inside every call.
    pub call_delay: Option<Duration>,
}

impl Default for Script {
    fn default() -> Self {
        Self {
            fail_open: false,
            fail_close: false,
            fail_control: false,
            fail_load: false,
            fail_get: None,
            reads: VecDeque::new(),
            setpoints: [0.1, 0.2, 0.3, 0.4],
            active: ConstantModeId::Cc,
            value_echo: None,
            mode_echo: None,
            call_delay: None,
        }
    }
}

/// Parks `read_inputs` until released, to stall the dispatcher.
struct Stall {
    entered: Sender<()>,
    release: Receiver<()>,
}

#[derive(Default)]
struct Shared {
    calls: Mutex<Vec<Call>>,
    script: Mutex<Script>,
    stall: Mutex<Option<Stall>>,
    busy: AtomicBool,
    overlapped: AtomicBool,
}

/// Cloning gives another handle on the same mock.
#[derive(Clone, Default)]
pub struct MockInstrument {
    shared: Arc<Shared>,
}

pub fn sample() -> SampleReading {
    SampleReading::new(12.0, 0.5, 6.0)
}

impl MockInstrument {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.shared.script.lock().unwrap()
    }

    pub fn calls(&self) -> Vec<Call> {
        self.shared.calls.lock().unwrap().clone()
    }

    pub fn clear_calls(&self) {
        self.shared.calls.lock().unwrap().clear();
    }

    /// Whether two calls were ever in progress at the same time.
    pub fn overlapped(&self) -> bool {
        self.shared.overlapped.load(Ordering::SeqCst)
    }

    /// Make the next `read_inputs` signal `entered` and wait on `release`.
    pub fn stall_next_read(&self, entered: Sender<()>, release: Receiver<()>) {
        *self.shared.stall.lock().unwrap() = Some(Stall { entered, release });
    }

    fn enter(&self, call: Call) -> BusyGuard<'_> {
        if self.shared.busy.swap(true, Ordering::SeqCst) {
            self.shared.overlapped.store(true, Ordering::SeqCst);
        }
        self.shared.calls.lock().unwrap().push(call);
        let delay = self.script().call_delay;
        if let Some(delay) = delay {
            std::thread::sleep(delay);
        }
        BusyGuard { shared: &self.shared }
    }

    fn get(&mut self, mode: ConstantModeId) -> Result<f64, Fault> {
        let _busy = self.enter(Call::Get(mode));
        let script = self.script();
        if script.fail_get == Some(mode) {
            return Err(Fault::Transport("get failed".into()));
        }
        Ok(script.value_echo.unwrap_or(script.setpoints[mode.index()]))
    }

    fn set(&mut self, mode: ConstantModeId, value: f64) -> Result<(), Fault> {
        let _busy = self.enter(Call::Set(mode, value));
        self.script().setpoints[mode.index()] = value;
        Ok(())
    }
}

struct BusyGuard<'a> {
    shared: &'a Shared,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.shared.busy.store(false, Ordering::SeqCst);
    }
}

impl Instrument for MockInstrument {
    fn open(&mut self, port: &PortId, baud: u32) -> Result<(), Fault> {
        let _busy = self.enter(Call::Open(port.clone(), baud));
        if self.script().fail_open {
            return Err(Fault::Transport("no such port".into()));
        }
        Ok(())
    }

    fn close(&mut self) -> Result<(), Fault> {
        let _busy = self.enter(Call::Close);
        if self.script().fail_close {
            return Err(Fault::Transport("close failed".into()));
        }
        Ok(())
    }

    fn set_control_mode(&mut self, mode: ControlMode) -> Result<(), Fault> {
        let _busy = self.enter(Call::SetControl(mode));
        if self.script().fail_control {
            return Err(Fault::Timeout);
        }
        Ok(())
    }

    fn set_load(&mut self, state: LoadState) -> Result<(), Fault> {
        let _busy = self.enter(Call::SetLoad(state));
        if self.script().fail_load {
            return Err(Fault::Transport("load switch failed".into()));
        }
        Ok(())
    }

    fn read_inputs(&mut self) -> Result<SampleReading, Fault> {
        let _busy = self.enter(Call::ReadInputs);
        let stall = self.shared.stall.lock().unwrap().take();
        if let Some(stall) = stall {
            let _ = stall.entered.send(());
            let _ = stall.release.recv();
        }
        self.script().reads.pop_front().unwrap_or(Ok(sample()))
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
        let _busy = self.enter(Call::SetActiveMode(mode));
        self.script().active = mode;
        Ok(())
    }

    fn get_active_mode(&mut self) -> Result<ConstantModeId, Fault> {
        let _busy = self.enter(Call::GetActiveMode);
        let script = self.script();
        Ok(script.mode_echo.unwrap_or(script.active))
    }
}
