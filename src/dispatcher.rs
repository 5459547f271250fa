//! The single-writer worker that owns the instrument.
//!
//! Producers push [`Command`]s into a bounded queue. One worker thread pops them
//! one at a time and runs each to completion against the [`Engine`], so the
//! instrument never sees overlapping calls. Results flow back as
//! [`Notification`]s.
//!
//! Before any command runs, the engine makes sure the port is open (reconnecting
//! with the last known port and baud rate) and that the load is under remote
//! control. If either step fails the command is dropped; the failing step has
//! already reported itself.

use std::{
    panic::{self, AssertUnwindSafe},
    sync::{Arc, Mutex, MutexGuard, PoisonError, mpsc::Receiver},
    thread::{self, JoinHandle},
};

use tracing::{debug, error, info, trace, warn};

use crate::{
    command::{self, Command, CommandSender},
    error::{Fault, FaultClass},
    instrument::{CONSTANT_MODES, Instrument, PortId},
    notification::{Notification, Notifier},
    state::{ControlState, DeviceState},
    types::{ConstantModeId, ConstantsSnapshot, ControlMode, LoadState, SampleReceiver},
};

/// Device state plus the instrument it describes.
pub struct Engine {
    instrument: Box<dyn Instrument>,
    state: DeviceState,
    notifier: Notifier,
}

impl Engine {
    pub fn new(instrument: Box<dyn Instrument>, notifier: Notifier) -> Self {
        Self {
            instrument,
            state: DeviceState::default(),
            notifier,
        }
    }

    pub fn state(&self) -> &DeviceState {
        &self.state
    }

    /// Remember the endpoint and open it.
    pub fn connect(&mut self, port: PortId, baud: u32) -> Result<(), Fault> {
        self.state.set_endpoint(port, baud);
        self.open()
    }

    /// Close the port. The state is reset even when closing fails.
    pub fn disconnect(&mut self) -> Result<(), Fault> {
        let result = self.instrument.close();
        self.state.mark_closed();
        match &result {
            Ok(()) => info!("port closed"),
            Err(fault) => {
                error!(%fault, "Failed to close port");
                self.notifier.error("Failed to close port");
            }
        }
        self.notifier
            .publish(Notification::ConnectionStateChanged(false));
        result
    }

    /// Run one command, including the connection and remote-control preconditions.
    pub fn dispatch(&mut self, command: Command) -> Result<(), Fault> {
        debug!(command = command.name(), "dispatching");
        self.ensure_ready()
            .map_err(|cause| Fault::Precondition(Box::new(cause)))?;

        match command {
            Command::SetRemote => self.set_remote(),
            Command::SetLocal => self.set_local(),
            Command::LoadOn => self.switch_load(LoadState::On),
            Command::LoadOff => self.switch_load(LoadState::Off),
            Command::ReadInputs(receiver) => self.read_inputs(receiver),
            Command::GetConstants => self.get_constants(),
            Command::SetConstant { mode, value } => self.set_constant(mode, &value),
        }
    }

    fn ensure_ready(&mut self) -> Result<(), Fault> {
        if !self.state.is_open() {
            self.open()?;
        }
        if self.state.control() != ControlState::Remote {
            self.set_remote()?;
        }
        Ok(())
    }

    fn open(&mut self) -> Result<(), Fault> {
        let Some((port, baud)) = self.state.endpoint().map(|(port, baud)| (port.clone(), baud))
        else {
            self.notifier.error("No port configured");
            return Err(Fault::NoPortConfigured);
        };

        match self.instrument.open(&port, baud) {
            Ok(()) => {
                self.state.mark_open();
                info!(%port, baud, "port open");
                self.notifier
                    .publish(Notification::ConnectionStateChanged(true));
                Ok(())
            }
            Err(fault) => {
                error!(%port, baud, %fault, "Failed to open port");
                self.notifier.error(format!("Failed to open port {port}"));
                Err(fault)
            }
        }
    }

    fn set_remote(&mut self) -> Result<(), Fault> {
        if self.state.control() != ControlState::Remote {
            if let Err(fault) = self.instrument.set_control_mode(ControlMode::Remote) {
                error!(%fault, "Failed to set remote control");
                self.notifier.error("Failed to set remote control");
                return Err(fault);
            }
            self.state.set_control(ControlMode::Remote);
        }
        self.notifier.status("Control set to remote");
        Ok(())
    }

    fn set_local(&mut self) -> Result<(), Fault> {
        if self.state.control() != ControlState::Local {
            if let Err(fault) = self.instrument.set_control_mode(ControlMode::Local) {
                error!(%fault, "Failed to set local control");
                self.notifier.error("Failed to set local control");
                return Err(fault);
            }
            self.state.set_control(ControlMode::Local);
        }
        self.notifier
            .publish(Notification::ControlStateChanged(ControlMode::Local));
        Ok(())
    }

    fn switch_load(&mut self, state: LoadState) -> Result<(), Fault> {
        if let Err(fault) = self.instrument.set_load(state) {
            error!(%fault, "Failed to turn load {state}");
            self.notifier.error(format!("Failed to turn load {state}"));
            return Err(fault);
        }
        self.notifier.status(format!("Load turned {state}"));
        self.notifier.publish(Notification::LoadStateChanged(state));
        Ok(())
    }

    fn read_inputs(&mut self, receiver: SampleReceiver) -> Result<(), Fault> {
        let sample = match self.instrument.read_inputs() {
            Ok(reading) => Some(reading),
            Err(fault) if fault.is_benign_sample_miss() => {
                trace!(%receiver, %fault, "sample missed");
                None
            }
            Err(fault) => {
                error!(%receiver, %fault, "Failed to obtain input values");
                self.notifier.error("Failed to obtain input values");
                return Err(fault);
            }
        };

        self.notifier.publish(match receiver {
            SampleReceiver::Display => Notification::DisplaySample(sample),
            SampleReceiver::File => Notification::FileSample(sample),
        });
        Ok(())
    }

    fn get_constants(&mut self) -> Result<(), Fault> {
        match self.read_snapshot() {
            Ok(snapshot) => {
                debug!(?snapshot, "constants read");
                self.notifier
                    .publish(Notification::ConstantsSnapshot(snapshot));
                Ok(())
            }
            Err(fault) => {
                error!(%fault, "Failed to obtain constants values");
                self.notifier.error("Failed to obtain constants values");
                Err(fault)
            }
        }
    }

    fn read_snapshot(&mut self) -> Result<ConstantsSnapshot, Fault> {
        let mut values = [0.0; 4];
        for descriptor in &CONSTANT_MODES {
            values[descriptor.id.index()] = (descriptor.get)(&mut *self.instrument)?;
        }
        let active = self.instrument.get_active_mode()?;
        Ok(ConstantsSnapshot::new(values, active))
    }

    fn set_constant(&mut self, mode: ConstantModeId, text: &str) -> Result<(), Fault> {
        match self.apply_constant(mode, text) {
            Ok(()) => {
                self.state.set_active_constant_mode(mode);
                info!(%mode, value = text, "constant mode activated");
                self.notifier
                    .status(format!("Mode {mode} activated, with value: {text}"));
                self.notifier.publish(Notification::ConstantModeChanged);
                Ok(())
            }
            Err(fault) => {
                error!(%mode, value = text, %fault, "Failed to update constant");
                self.notifier
                    .error(format!("Failed to update \"{}\" value: {text}", mode.code()));
                Err(fault)
            }
        }
    }

    /// Write the setpoint, select the mode, then read both back.
    fn apply_constant(&mut self, mode: ConstantModeId, text: &str) -> Result<(), Fault> {
        let value: f64 = text
            .trim()
            .parse()
            .map_err(|_| Fault::InvalidValue(text.to_string()))?;
        let descriptor = mode.descriptor();

        (descriptor.set)(&mut *self.instrument, value)?;
        self.instrument.set_active_mode(mode)?;
        let readback_mode = self.instrument.get_active_mode()?;
        let readback = (descriptor.get)(&mut *self.instrument)?;
        debug!(%mode, value, %readback_mode, readback, "verification");

        // Exact equality, no tolerance band.
        if readback_mode != mode || readback != value {
            return Err(Fault::Verification {
                requested: mode,
                value,
                mode: readback_mode,
                readback,
            });
        }
        Ok(())
    }
}

fn lock(engine: &Mutex<Engine>) -> MutexGuard<'_, Engine> {
    engine.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Handle on a running dispatcher worker.
///
/// `connect` and `disconnect` are called directly rather than queued. They wait
/// for the command in flight, if any, to finish.
pub struct Dispatcher {
    engine: Arc<Mutex<Engine>>,
    worker: JoinHandle<()>,
}

impl Dispatcher {
    /// Start the worker thread. It runs until every [`CommandSender`] is dropped.
    pub fn spawn(
        instrument: Box<dyn Instrument>,
        notifier: Notifier,
    ) -> std::io::Result<(Self, CommandSender)> {
        let (sender, commands) = command::queue();
        let engine = Arc::new(Mutex::new(Engine::new(instrument, notifier)));
        let worker_engine = Arc::clone(&engine);
        let worker = thread::Builder::new()
            .name("dc-load-dispatch".into())
            .spawn(move || run(&worker_engine, commands))?;
        Ok((Self { engine, worker }, sender))
    }

    pub fn connect(&self, port: impl Into<PortId>, baud: u32) -> Result<(), Fault> {
        lock(&self.engine).connect(port.into(), baud)
    }

    pub fn disconnect(&self) -> Result<(), Fault> {
        lock(&self.engine).disconnect()
    }

    /// Wait for the worker to drain the queue and stop.
    pub fn join(self) -> thread::Result<()> {
        self.worker.join()
    }
}

fn run(engine: &Mutex<Engine>, commands: Receiver<Command>) {
    info!("dispatcher started");
    while let Ok(command) = commands.recv() {
        let name = command.name();
        let mut engine = lock(engine);
        let outcome = panic::catch_unwind(AssertUnwindSafe(|| engine.dispatch(command)));
        match outcome {
            Ok(Ok(())) => trace!(command = name, "command done"),
            Ok(Err(fault)) => match fault.class() {
                // The failing step has already published its own error.
                FaultClass::Precondition => debug!(command = name, %fault, "command dropped"),
                FaultClass::Verification => {
                    warn!(command = name, %fault, "setpoint not confirmed")
                }
                FaultClass::Transport | FaultClass::MalformedData => {
                    warn!(command = name, %fault, "command failed")
                }
            },
            Err(_) => error!(command = name, "unexpected panic while dispatching"),
        }
    }
    info!("command queue closed, dispatcher stopped");
}

#[cfg(test)]
mod tests {
    use std::{
        sync::mpsc::{self, RecvTimeoutError},
        time::Duration,
    };

    use tracing_test::traced_test;

    use super::*;
    use crate::{
        command::{QUEUE_CAPACITY, QueueError},
        mock_instrument::{Call, MockInstrument, sample},
        notification,
        state::Phase,
    };

    fn engine(mock: &MockInstrument) -> (Engine, Receiver<Notification>) {
        let (notifier, rx) = notification::channel();
        (Engine::new(Box::new(mock.clone()), notifier), rx)
    }

    /// An engine that is connected and under remote control, with history cleared.
    fn remote_engine(mock: &MockInstrument) -> (Engine, Receiver<Notification>) {
        let (mut engine, rx) = engine(mock);
        engine.connect(PortId::from(3u32), 9600).unwrap();
        engine.dispatch(Command::SetRemote).unwrap();
        rx.try_iter().for_each(drop);
        mock.clear_calls();
        (engine, rx)
    }

    fn drain(rx: &Receiver<Notification>) -> Vec<Notification> {
        rx.try_iter().collect()
    }

    #[test]
    fn connect_opens_port() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = engine(&mock);

        engine.connect(PortId::from(3u32), 9600).unwrap();

        assert_eq!(engine.state().phase(), Phase::Connected(ControlState::Unknown));
        assert_eq!(mock.calls(), vec![Call::Open(PortId::from(3u32), 9600)]);
        assert_eq!(drain(&rx), vec![Notification::ConnectionStateChanged(true)]);
    }

    #[test]
    fn failed_connect_stays_disconnected() {
        let mock = MockInstrument::new();
        mock.script().fail_open = true;
        let (mut engine, rx) = engine(&mock);

        assert!(engine.connect(PortId::from(3u32), 9600).is_err());

        assert_eq!(engine.state().phase(), Phase::Disconnected);
        assert_eq!(
            drain(&rx),
            vec![Notification::ErrorMessage("Failed to open port 3".into())]
        );
    }

    #[test]
    fn command_reconnects_with_last_endpoint() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = engine(&mock);
        engine.connect(PortId::from(3u32), 9600).unwrap();
        engine.disconnect().unwrap();
        drain(&rx);
        mock.clear_calls();

        engine.dispatch(Command::LoadOn).unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                Call::Open(PortId::from(3u32), 9600),
                Call::SetControl(ControlMode::Remote),
                Call::SetLoad(LoadState::On),
            ]
        );
        assert_eq!(
            drain(&rx),
            vec![
                Notification::ConnectionStateChanged(true),
                Notification::Status("Control set to remote".into()),
                Notification::Status("Load turned on".into()),
                Notification::LoadStateChanged(LoadState::On),
            ]
        );
    }

    #[test]
    fn failed_reconnect_drops_command() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = engine(&mock);
        engine.connect(PortId::from(3u32), 9600).unwrap();
        engine.disconnect().unwrap();
        mock.script().fail_open = true;
        drain(&rx);
        mock.clear_calls();

        let result = engine.dispatch(Command::LoadOn);

        assert!(matches!(result, Err(Fault::Precondition(_))));
        assert_eq!(mock.calls(), vec![Call::Open(PortId::from(3u32), 9600)]);
        // Only the connect failure itself is reported.
        assert_eq!(
            drain(&rx),
            vec![Notification::ErrorMessage("Failed to open port 3".into())]
        );
    }

    #[test]
    fn command_without_endpoint_is_dropped() {
        let mock = MockInstrument::new();
        let (mut engine, _rx) = engine(&mock);

        let result = engine.dispatch(Command::GetConstants);

        assert!(matches!(
            result,
            Err(Fault::Precondition(cause)) if matches!(cause.as_ref(), Fault::NoPortConfigured)
        ));
        assert!(mock.calls().is_empty());
    }

    #[test]
    fn local_control_forces_remote_before_load_on() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);
        engine.dispatch(Command::SetLocal).unwrap();
        assert_eq!(engine.state().control(), ControlState::Local);
        drain(&rx);
        mock.clear_calls();

        engine.dispatch(Command::LoadOn).unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                Call::SetControl(ControlMode::Remote),
                Call::SetLoad(LoadState::On),
            ]
        );
    }

    #[test]
    fn set_remote_skips_call_but_still_reports() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);

        engine.dispatch(Command::SetRemote).unwrap();

        assert!(mock.calls().is_empty());
        assert_eq!(
            drain(&rx),
            vec![Notification::Status("Control set to remote".into())]
        );
    }

    #[test]
    fn set_local_always_publishes() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);
        engine.dispatch(Command::SetConstant {
            mode: ConstantModeId::Cc,
            value: "0.1".into(),
        })
        .unwrap();
        drain(&rx);
        mock.clear_calls();

        engine.dispatch(Command::SetLocal).unwrap();

        assert_eq!(mock.calls(), vec![Call::SetControl(ControlMode::Local)]);
        assert_eq!(engine.state().active_constant_mode(), None);
        assert_eq!(
            drain(&rx),
            vec![Notification::ControlStateChanged(ControlMode::Local)]
        );
    }

    #[test]
    fn failed_remote_switch_abandons_command() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = engine(&mock);
        engine.connect(PortId::from(3u32), 9600).unwrap();
        mock.script().fail_control = true;
        drain(&rx);

        let result = engine.dispatch(Command::LoadOff);

        assert!(matches!(result, Err(Fault::Precondition(_))));
        assert_eq!(engine.state().control(), ControlState::Unknown);
        assert!(!mock.calls().contains(&Call::SetLoad(LoadState::Off)));
        assert_eq!(
            drain(&rx),
            vec![Notification::ErrorMessage("Failed to set remote control".into())]
        );
    }

    #[test]
    fn load_failure_is_reported() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);
        mock.script().fail_load = true;

        assert!(engine.dispatch(Command::LoadOn).is_err());
        assert_eq!(
            drain(&rx),
            vec![Notification::ErrorMessage("Failed to turn load on".into())]
        );
    }

    #[test]
    fn set_constant_verifies_and_announces() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);

        engine
            .dispatch(Command::SetConstant {
                mode: ConstantModeId::Cv,
                value: "1.20".into(),
            })
            .unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                Call::Set(ConstantModeId::Cv, 1.2),
                Call::SetActiveMode(ConstantModeId::Cv),
                Call::GetActiveMode,
                Call::Get(ConstantModeId::Cv),
            ]
        );
        assert_eq!(engine.state().active_constant_mode(), Some(ConstantModeId::Cv));
        assert_eq!(
            drain(&rx),
            vec![
                Notification::Status("Mode CV activated, with value: 1.20".into()),
                Notification::ConstantModeChanged,
            ]
        );
    }

    #[test]
    fn value_mismatch_fails_verification() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);
        mock.script().value_echo = Some(1.21);

        let result = engine.dispatch(Command::SetConstant {
            mode: ConstantModeId::Cv,
            value: "1.20".into(),
        });

        assert!(matches!(result, Err(Fault::Verification { readback, .. }) if readback == 1.21));
        assert_eq!(engine.state().active_constant_mode(), None);
        let notifications = drain(&rx);
        assert_eq!(
            notifications,
            vec![Notification::ErrorMessage(
                "Failed to update \"cv\" value: 1.20".into()
            )]
        );
        assert!(!notifications.contains(&Notification::ConstantModeChanged));
    }

    #[test]
    fn mode_mismatch_keeps_prior_mode() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);
        engine
            .dispatch(Command::SetConstant {
                mode: ConstantModeId::Cc,
                value: "0.5".into(),
            })
            .unwrap();
        drain(&rx);
        mock.script().mode_echo = Some(ConstantModeId::Cc);

        let result = engine.dispatch(Command::SetConstant {
            mode: ConstantModeId::Cw,
            value: "10".into(),
        });

        assert!(matches!(result, Err(Fault::Verification { .. })));
        assert_eq!(engine.state().active_constant_mode(), Some(ConstantModeId::Cc));
    }

    #[test]
    fn unparseable_value_never_reaches_instrument() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);

        let result = engine.dispatch(Command::SetConstant {
            mode: ConstantModeId::Cr,
            value: "ten".into(),
        });

        assert!(matches!(result, Err(Fault::InvalidValue(_))));
        assert!(mock.calls().is_empty());
        assert_eq!(
            drain(&rx),
            vec![Notification::ErrorMessage("Failed to update \"cr\" value: ten".into())]
        );
    }

    #[test]
    #[traced_test]
    fn sampling_timeouts_yield_empty_samples() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);
        mock.script().reads.push_back(Err(Fault::Timeout));
        mock.script()
            .reads
            .push_back(Err(Fault::MalformedData("short".into())));

        engine
            .dispatch(Command::ReadInputs(SampleReceiver::Display))
            .unwrap();
        engine
            .dispatch(Command::ReadInputs(SampleReceiver::File))
            .unwrap();
        engine
            .dispatch(Command::ReadInputs(SampleReceiver::File))
            .unwrap();

        assert_eq!(
            drain(&rx),
            vec![
                Notification::DisplaySample(None),
                Notification::FileSample(None),
                Notification::FileSample(Some(sample())),
            ]
        );
        assert!(!logs_contain("Failed to obtain input values"));
    }

    #[test]
    #[traced_test]
    fn worker_logs_failures_by_class() {
        let mock = MockInstrument::new();
        let (engine, _rx) = engine(&mock);
        let (sender, commands) = command::queue();
        // No endpoint yet, so the first command never gets past the connect step.
        sender.send(Command::LoadOn).unwrap();
        sender
            .send(Command::SetConstant {
                mode: ConstantModeId::Cc,
                value: "x".into(),
            })
            .unwrap();
        drop(sender);

        let engine = Mutex::new(engine);
        run(&engine, commands);
        assert!(logs_contain("command dropped"));
        assert!(!logs_contain("command failed"));

        lock(&engine).connect(PortId::from(3u32), 9600).unwrap();
        mock.script().mode_echo = Some(ConstantModeId::Cv);
        let (sender, commands) = command::queue();
        sender
            .send(Command::SetConstant {
                mode: ConstantModeId::Cc,
                value: "0.5".into(),
            })
            .unwrap();
        drop(sender);
        run(&engine, commands);
        assert!(logs_contain("setpoint not confirmed"));
    }

    #[test]
    fn other_read_faults_fail_the_command() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);
        mock.script()
            .reads
            .push_back(Err(Fault::Transport("port vanished".into())));

        let result = engine.dispatch(Command::ReadInputs(SampleReceiver::Display));

        assert!(matches!(result, Err(Fault::Transport(_))));
        assert_eq!(
            drain(&rx),
            vec![Notification::ErrorMessage("Failed to obtain input values".into())]
        );
    }

    #[test]
    fn get_constants_snapshot() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);
        mock.script().active = ConstantModeId::Cw;

        engine.dispatch(Command::GetConstants).unwrap();

        assert_eq!(
            mock.calls(),
            vec![
                Call::Get(ConstantModeId::Cc),
                Call::Get(ConstantModeId::Cv),
                Call::Get(ConstantModeId::Cw),
                Call::Get(ConstantModeId::Cr),
                Call::GetActiveMode,
            ]
        );
        assert_eq!(
            drain(&rx),
            vec![Notification::ConstantsSnapshot(ConstantsSnapshot::new(
                [0.1, 0.2, 0.3, 0.4],
                ConstantModeId::Cw
            ))]
        );
    }

    #[test]
    fn partial_snapshot_is_never_published() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);
        mock.script().fail_get = Some(ConstantModeId::Cw);

        assert!(engine.dispatch(Command::GetConstants).is_err());
        assert_eq!(
            drain(&rx),
            vec![Notification::ErrorMessage("Failed to obtain constants values".into())]
        );
    }

    #[test]
    fn failed_close_still_clears_open_flag() {
        let mock = MockInstrument::new();
        let (mut engine, rx) = remote_engine(&mock);
        mock.script().fail_close = true;

        assert!(engine.disconnect().is_err());

        assert_eq!(engine.state().phase(), Phase::Disconnected);
        assert_eq!(
            drain(&rx),
            vec![
                Notification::ErrorMessage("Failed to close port".into()),
                Notification::ConnectionStateChanged(false),
            ]
        );
    }

    #[test]
    fn worker_survives_failed_commands() {
        let mock = MockInstrument::new();
        mock.script().fail_load = true;
        let (notifier, rx) = notification::channel();
        let (dispatcher, sender) = Dispatcher::spawn(Box::new(mock.clone()), notifier).unwrap();
        dispatcher.connect(3u32, 9600).unwrap();

        sender.send(Command::LoadOn).unwrap();
        sender
            .send(Command::ReadInputs(SampleReceiver::Display))
            .unwrap();
        drop(sender);
        dispatcher.join().unwrap();

        let notifications = drain(&rx);
        assert!(notifications.contains(&Notification::ErrorMessage("Failed to turn load on".into())));
        assert_eq!(
            notifications.last(),
            Some(&Notification::DisplaySample(Some(sample())))
        );
    }

    #[test]
    fn never_more_than_one_call_in_flight() {
        let mock = MockInstrument::new();
        mock.script().call_delay = Some(Duration::from_micros(200));
        let (notifier, _rx) = notification::channel();
        let (dispatcher, sender) = Dispatcher::spawn(Box::new(mock.clone()), notifier).unwrap();
        dispatcher.connect(3u32, 9600).unwrap();

        let producers: Vec<_> = (0..4)
            .map(|i| {
                let sender = sender.clone();
                thread::spawn(move || {
                    for n in 0..20 {
                        let command = match (i + n) % 4 {
                            0 => Command::ReadInputs(SampleReceiver::Display),
                            1 => Command::ReadInputs(SampleReceiver::File),
                            2 => Command::GetConstants,
                            _ => Command::SetConstant {
                                mode: ConstantModeId::Cv,
                                value: "1.5".into(),
                            },
                        };
                        sender.send(command).unwrap();
                    }
                })
            })
            .collect();
        for _ in 0..5 {
            dispatcher.disconnect().unwrap();
            dispatcher.connect(3u32, 9600).unwrap();
        }
        for producer in producers {
            producer.join().unwrap();
        }
        drop(sender);
        dispatcher.join().unwrap();

        assert!(!mock.overlapped());
        let reads = mock
            .calls()
            .iter()
            .filter(|call| **call == Call::ReadInputs)
            .count();
        assert_eq!(reads, 40);
    }

    #[test]
    fn full_queue_blocks_producer() {
        let mock = MockInstrument::new();
        let (entered_tx, entered_rx) = mpsc::channel();
        let (release_tx, release_rx) = mpsc::channel();
        mock.stall_next_read(entered_tx, release_rx);
        let (notifier, _rx) = notification::channel();
        let (dispatcher, sender) = Dispatcher::spawn(Box::new(mock.clone()), notifier).unwrap();
        dispatcher.connect(3u32, 9600).unwrap();

        // The worker takes this one and stalls inside the read.
        sender
            .send(Command::ReadInputs(SampleReceiver::Display))
            .unwrap();
        entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

        for _ in 0..QUEUE_CAPACITY {
            sender.try_send(Command::GetConstants).unwrap();
        }
        assert!(matches!(
            sender.try_send(Command::LoadOn),
            Err(QueueError::Full(_))
        ));

        let (sent_tx, sent_rx) = mpsc::channel();
        let blocked_sender = sender.clone();
        let producer = thread::spawn(move || {
            blocked_sender.send(Command::LoadOn).unwrap();
            sent_tx.send(()).unwrap();
        });
        assert_eq!(
            sent_rx.recv_timeout(Duration::from_millis(200)),
            Err(RecvTimeoutError::Timeout)
        );

        release_tx.send(()).unwrap();
        sent_rx.recv_timeout(Duration::from_secs(5)).unwrap();
        producer.join().unwrap();

        drop(sender);
        dispatcher.join().unwrap();
        assert_eq!(mock.calls().last(), Some(&Call::SetLoad(LoadState::On)));
    }
}
