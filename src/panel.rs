//! The operator's side of the logger.
//!
//! [`ControlPanel`] owns the dispatcher, the sampling timers and the log file.
//! It turns operator actions into queued commands and folds the dispatcher's
//! notifications back into its own view of the load. Informational and error
//! lines end up in an operator journal, read with [`ControlPanel::take_journal`].

use std::{
    io,
    path::{Path, PathBuf},
    sync::mpsc::{Receiver, RecvTimeoutError},
    time::{Duration, Instant},
};

use chrono::{DateTime, Local};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::{
    command::{Command, CommandSender, QueueError},
    dispatcher::Dispatcher,
    error::Fault,
    instrument::{Instrument, PortId},
    logfile::{FilePolicy, LogFileError, LogRecord, LogWriter},
    notification::{self, Notification},
    preferences::{Preferences, PreferencesError},
    scheduler::{IntervalError, SampleInterval, SamplingScheduler},
    types::{ConstantModeId, ConstantsSnapshot, ControlMode, LoadState, SampleReading, SampleReceiver},
};

#[derive(Error, Debug)]
pub enum PanelError {
    #[error(transparent)]
    Queue(#[from] QueueError),
    #[error(transparent)]
    Instrument(#[from] Fault),
    #[error(transparent)]
    LogFile(#[from] LogFileError),
    #[error(transparent)]
    Interval(#[from] IntervalError),
    #[error(transparent)]
    Preferences(#[from] PreferencesError),
    #[error("Failed to start worker thread: {0}")]
    Thread(#[from] io::Error),
}

struct Session {
    writer: LogWriter,
    started: DateTime<Local>,
}

pub struct ControlPanel {
    commands: CommandSender,
    dispatcher: Dispatcher,
    notifications: Receiver<Notification>,
    scheduler: SamplingScheduler,
    preferences: Preferences,
    preferences_path: Option<PathBuf>,
    connected: bool,
    load: LoadState,
    constant_mode: Option<ConstantModeId>,
    constants: Option<ConstantsSnapshot>,
    readings: Option<SampleReading>,
    session: Option<Session>,
    journal: Vec<String>,
}

impl ControlPanel {
    pub fn new(instrument: Box<dyn Instrument>, preferences: Preferences) -> Result<Self, PanelError> {
        let (notifier, notifications) = notification::channel();
        let (dispatcher, commands) = Dispatcher::spawn(instrument, notifier)?;
        Ok(Self {
            scheduler: SamplingScheduler::new(commands.clone()),
            commands,
            dispatcher,
            notifications,
            preferences,
            preferences_path: None,
            connected: false,
            load: LoadState::Off,
            constant_mode: None,
            constants: None,
            readings: None,
            session: None,
            journal: Vec::new(),
        })
    }

    /// Save preference changes to `path` from now on.
    pub fn with_preferences_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.preferences_path = Some(path.into());
        self
    }

    pub fn preferences(&self) -> &Preferences {
        &self.preferences
    }

    pub fn is_connected(&self) -> bool {
        self.connected
    }

    pub fn load_state(&self) -> LoadState {
        self.load
    }

    pub fn constant_mode(&self) -> Option<ConstantModeId> {
        self.constant_mode
    }

    pub fn constants(&self) -> Option<&ConstantsSnapshot> {
        self.constants.as_ref()
    }

    /// Latest display readings, `None` after a missed read.
    pub fn readings(&self) -> Option<&SampleReading> {
        self.readings.as_ref()
    }

    pub fn is_logging(&self) -> bool {
        self.session.is_some()
    }

    pub fn is_sampling(&self, receiver: SampleReceiver) -> bool {
        self.scheduler.is_running(receiver)
    }

    /// Operator journal lines since the last call.
    pub fn take_journal(&mut self) -> Vec<String> {
        std::mem::take(&mut self.journal)
    }

    fn note(&mut self, line: impl Into<String>) {
        let line = line.into();
        info!(target: "dc_load_logger::journal", "{line}");
        self.journal.push(line);
    }

    /// Open the port. The settings are remembered for implicit reconnects.
    pub fn connect(&mut self, port: impl Into<PortId>, baud: u32) -> Result<(), PanelError> {
        self.preferences.port = port.into();
        self.preferences.baud = baud;
        let result = self
            .dispatcher
            .connect(self.preferences.port.clone(), baud);
        self.pump();
        Ok(result?)
    }

    /// Stop logging, then close the port.
    pub fn disconnect(&mut self) -> Result<(), PanelError> {
        self.stop_logging();
        let result = self.dispatcher.disconnect();
        self.pump();
        Ok(result?)
    }

    pub fn load_on(&self) -> Result<(), PanelError> {
        Ok(self.commands.send(Command::LoadOn)?)
    }

    pub fn load_off(&self) -> Result<(), PanelError> {
        Ok(self.commands.send(Command::LoadOff)?)
    }

    pub fn set_local(&self) -> Result<(), PanelError> {
        Ok(self.commands.send(Command::SetLocal)?)
    }

    pub fn refresh_constants(&self) -> Result<(), PanelError> {
        Ok(self.commands.send(Command::GetConstants)?)
    }

    pub fn set_constant(&self, mode: ConstantModeId, value: impl Into<String>) -> Result<(), PanelError> {
        Ok(self.commands.send(Command::SetConstant {
            mode,
            value: value.into(),
        })?)
    }

    /// Open the log file and start both sampling timers.
    pub fn start_logging(&mut self, policy: FilePolicy) -> Result<(), PanelError> {
        if self.session.is_some() {
            return Ok(());
        }
        self.note("Initializing logger");
        let writer = match LogWriter::open(self.preferences.log_path(), policy) {
            Ok(writer) => writer,
            Err(err) => {
                error!(%err, "log file check failed");
                self.note(err.to_string());
                self.note("Initialization failed");
                return Err(err.into());
            }
        };
        self.commands.send(Command::GetConstants)?;

        let started = Local::now();
        self.session = Some(Session { writer, started });
        if self.load != LoadState::On {
            self.commands.send(Command::LoadOn)?;
        }

        for receiver in [SampleReceiver::Display, SampleReceiver::File] {
            if let Ok(interval) = SampleInterval::from_secs_f64(self.interval_secs(receiver)) {
                self.scheduler.start(receiver, interval)?;
            }
        }
        self.note(format!("logging started @ {}", started.format("%Y-%m-%d %H:%M:%S")));
        Ok(())
    }

    /// Stop both timers and close the log file.
    pub fn stop_logging(&mut self) {
        let Some(session) = self.session.take() else {
            return;
        };
        self.scheduler.stop_all();
        if let Err(err) = session.writer.close() {
            warn!(%err, "closing log file failed");
            self.note(err.to_string());
        }
        self.note(format!(
            "logging stopped @ {}",
            Local::now().format("%Y-%m-%d %H:%M:%S")
        ));
    }

    /// Log to `path` from the next session on. `.csv` is added when there is no extension.
    pub fn set_log_path(&mut self, path: impl AsRef<Path>) {
        self.preferences.set_log_path(path);
        self.save_preferences();
    }

    fn interval_secs(&self, receiver: SampleReceiver) -> f64 {
        match receiver {
            SampleReceiver::Display => self.preferences.display_interval_secs,
            SampleReceiver::File => self.preferences.file_log_interval_secs,
        }
    }

    pub fn set_display_interval(&mut self, secs: f64) -> Result<(), PanelError> {
        self.preferences.display_interval_secs = secs;
        self.apply_interval(SampleReceiver::Display, secs)
    }

    pub fn set_file_interval(&mut self, secs: f64) -> Result<(), PanelError> {
        self.preferences.file_log_interval_secs = secs;
        self.apply_interval(SampleReceiver::File, secs)
    }

    /// Below the minimum the timer is stopped; otherwise it is restarted while logging.
    fn apply_interval(&mut self, receiver: SampleReceiver, secs: f64) -> Result<(), PanelError> {
        let outcome = match SampleInterval::from_secs_f64(secs) {
            Ok(interval) => {
                if self.session.is_some() {
                    self.scheduler.start(receiver, interval)?;
                }
                Ok(())
            }
            Err(err) => {
                self.scheduler.stop(receiver);
                let label = match receiver {
                    SampleReceiver::Display => "Display",
                    SampleReceiver::File => "File log",
                };
                self.note(format!("{label} {err}"));
                Err(err.into())
            }
        };
        self.save_preferences();
        outcome
    }

    fn save_preferences(&mut self) {
        let Some(path) = &self.preferences_path else {
            return;
        };
        if let Err(err) = self.preferences.save_to(path) {
            warn!(%err, "saving preferences failed");
            self.note(err.to_string());
        }
    }

    /// Handle every notification already waiting. Returns how many there were.
    pub fn pump(&mut self) -> usize {
        let pending: Vec<_> = self.notifications.try_iter().collect();
        let count = pending.len();
        for notification in pending {
            self.handle(notification);
        }
        count
    }

    /// Wait up to `timeout` for a notification, then handle everything waiting.
    pub fn pump_for(&mut self, timeout: Duration) -> usize {
        match self.notifications.recv_timeout(timeout) {
            Ok(first) => {
                self.handle(first);
                1 + self.pump()
            }
            Err(RecvTimeoutError::Timeout | RecvTimeoutError::Disconnected) => 0,
        }
    }

    /// Keep pumping until `done` holds or `timeout` runs out.
    pub fn pump_until(&mut self, timeout: Duration, mut done: impl FnMut(&Self) -> bool) -> bool {
        let deadline = Instant::now() + timeout;
        while !done(self) {
            let left = deadline.saturating_duration_since(Instant::now());
            if left.is_zero() {
                return false;
            }
            self.pump_for(left);
        }
        true
    }

    pub fn handle(&mut self, notification: Notification) {
        debug!(?notification, "notification");
        match notification {
            Notification::ConnectionStateChanged(open) => {
                self.connected = open;
                if !open {
                    self.load = LoadState::Off;
                    self.constant_mode = None;
                    self.constants = None;
                    self.readings = None;
                }
            }
            Notification::ControlStateChanged(mode) => {
                if mode == ControlMode::Local {
                    self.constant_mode = None;
                }
                self.note(format!("Control set to {mode}"));
            }
            Notification::LoadStateChanged(state) => self.load = state,
            Notification::DisplaySample(sample) => self.readings = sample,
            Notification::FileSample(Some(reading)) => self.log_sample(&reading),
            Notification::FileSample(None) => {}
            Notification::ConstantsSnapshot(snapshot) => {
                self.constant_mode = Some(snapshot.active());
                self.constants = Some(snapshot);
            }
            Notification::ConstantModeChanged => {
                if let Err(err) = self.commands.send(Command::GetConstants) {
                    warn!(%err, "could not request constants");
                }
            }
            Notification::Status(line) | Notification::ErrorMessage(line) => self.note(line),
        }
    }

    fn log_sample(&mut self, reading: &SampleReading) {
        let Some(session) = self.session.as_mut() else {
            return;
        };
        let record = LogRecord::new(reading, self.constant_mode, Local::now(), session.started);
        match session.writer.append(&record) {
            Ok(()) => self.note(record.to_string()),
            Err(err) => {
                error!(%err, "Failed to update file log");
                self.note(err.to_string());
            }
        }
    }

    /// Stop logging, close the port and wait for the worker to finish.
    pub fn shutdown(mut self) {
        self.stop_logging();
        if self.connected {
            if let Err(err) = self.dispatcher.disconnect() {
                warn!(%err, "Failed to close connection");
            }
        }
        let Self {
            commands,
            dispatcher,
            scheduler,
            ..
        } = self;
        drop(scheduler);
        drop(commands);
        if dispatcher.join().is_err() {
            error!("dispatcher thread panicked");
        }
    }
}
