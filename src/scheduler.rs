//! Fixed-interval sampling timers.
//!
//! Each timer runs on its own thread and does nothing but enqueue
//! [`Command::ReadInputs`] for its receiver. A timer never touches the
//! instrument, so a slow read only delays the next tick through backpressure
//! on the command queue.

use std::{
    io,
    sync::mpsc::{self, Receiver, RecvTimeoutError, Sender},
    thread::{self, JoinHandle},
    time::{Duration, Instant},
};

use fugit::MillisDurationU32;
use thiserror::Error;
use tracing::{debug, warn};

use crate::{
    command::{Command, CommandSender},
    types::SampleReceiver,
};

/// Shortest sampling interval accepted.
pub const MIN_INTERVAL: MillisDurationU32 = MillisDurationU32::millis(500);

#[derive(Error, Debug, Clone, PartialEq)]
pub enum IntervalError {
    #[error("interval is too low, minimum allowed value is 0.5 second.")]
    TooLow(f64),
    #[error("invalid interval {0}")]
    Invalid(f64),
}

/// A sampling period of at least [`MIN_INTERVAL`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SampleInterval(MillisDurationU32);

impl SampleInterval {
    /// Interval from a number of seconds as entered by the operator.
    ///
    /// Values below half a second are refused rather than clamped.
    pub fn from_secs_f64(secs: f64) -> Result<Self, IntervalError> {
        if !secs.is_finite() || secs < 0.0 {
            return Err(IntervalError::Invalid(secs));
        }
        if secs < 0.5 {
            return Err(IntervalError::TooLow(secs));
        }
        let millis = (secs * 1000.0).round();
        if millis > u32::MAX as f64 {
            return Err(IntervalError::Invalid(secs));
        }
        Ok(Self(MillisDurationU32::millis(millis as u32)))
    }

    pub fn secs_f64(&self) -> f64 {
        self.0.to_millis() as f64 / 1000.0
    }

    pub fn as_duration(&self) -> Duration {
        Duration::from_millis(self.0.to_millis().into())
    }
}

impl TryFrom<MillisDurationU32> for SampleInterval {
    type Error = IntervalError;

    fn try_from(value: MillisDurationU32) -> Result<Self, Self::Error> {
        if value < MIN_INTERVAL {
            Err(IntervalError::TooLow(value.to_millis() as f64 / 1000.0))
        } else {
            Ok(Self(value))
        }
    }
}

struct Running {
    stop: Sender<()>,
    thread: JoinHandle<()>,
}

/// One periodic producer of `ReadInputs` commands.
pub struct SampleTimer {
    receiver: SampleReceiver,
    running: Option<Running>,
}

impl SampleTimer {
    pub fn new(receiver: SampleReceiver) -> Self {
        Self {
            receiver,
            running: None,
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.is_some()
    }

    /// (Re)start the timer. The first command is enqueued one interval from now.
    pub fn start(&mut self, interval: SampleInterval, commands: CommandSender) -> io::Result<()> {
        self.stop();
        let (stop, stopped) = mpsc::channel();
        let receiver = self.receiver;
        let period = interval.as_duration();
        let thread = thread::Builder::new()
            .name(format!("{receiver}-timer"))
            .spawn(move || tick(receiver, period, &stopped, &commands))?;
        debug!(%receiver, secs = interval.secs_f64(), "sampling timer started");
        self.running = Some(Running { stop, thread });
        Ok(())
    }

    pub fn stop(&mut self) {
        let Some(running) = self.running.take() else {
            return;
        };
        // Dropping the sender also wakes the thread.
        let _ = running.stop.send(());
        if running.thread.join().is_err() {
            warn!(receiver = %self.receiver, "sampling timer panicked");
        }
        debug!(receiver = %self.receiver, "sampling timer stopped");
    }
}

impl Drop for SampleTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

fn tick(receiver: SampleReceiver, period: Duration, stop: &Receiver<()>, commands: &CommandSender) {
    let mut next = Instant::now() + period;
    loop {
        match stop.recv_timeout(next.saturating_duration_since(Instant::now())) {
            Err(RecvTimeoutError::Timeout) => {
                if commands.send(Command::ReadInputs(receiver)).is_err() {
                    debug!(%receiver, "command queue closed, timer exiting");
                    return;
                }
                next += period;
                // Ticks missed while the queue was full are skipped, not bunched up.
                let now = Instant::now();
                if next < now {
                    next = now + period;
                }
            }
            Ok(()) | Err(RecvTimeoutError::Disconnected) => return,
        }
    }
}

/// The display and file timers side by side.
pub struct SamplingScheduler {
    display: SampleTimer,
    file: SampleTimer,
    commands: CommandSender,
}

impl SamplingScheduler {
    pub fn new(commands: CommandSender) -> Self {
        Self {
            display: SampleTimer::new(SampleReceiver::Display),
            file: SampleTimer::new(SampleReceiver::File),
            commands,
        }
    }

    fn timer(&mut self, receiver: SampleReceiver) -> &mut SampleTimer {
        match receiver {
            SampleReceiver::Display => &mut self.display,
            SampleReceiver::File => &mut self.file,
        }
    }

    pub fn start(&mut self, receiver: SampleReceiver, interval: SampleInterval) -> io::Result<()> {
        let commands = self.commands.clone();
        self.timer(receiver).start(interval, commands)
    }

    pub fn stop(&mut self, receiver: SampleReceiver) {
        self.timer(receiver).stop();
    }

    pub fn stop_all(&mut self) {
        self.display.stop();
        self.file.stop();
    }

    pub fn is_running(&self, receiver: SampleReceiver) -> bool {
        match receiver {
            SampleReceiver::Display => self.display.is_running(),
            SampleReceiver::File => self.file.is_running(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::command;

    #[test]
    fn intervals_below_half_a_second_are_refused() {
        assert_eq!(
            SampleInterval::from_secs_f64(0.4),
            Err(IntervalError::TooLow(0.4))
        );
        assert!(matches!(
            SampleInterval::from_secs_f64(f64::NAN),
            Err(IntervalError::Invalid(_))
        ));
        assert!(SampleInterval::from_secs_f64(-1.0).is_err());

        let interval = SampleInterval::from_secs_f64(0.5).unwrap();
        assert_eq!(interval.as_duration(), Duration::from_millis(500));
        assert_eq!(SampleInterval::from_secs_f64(60.0).unwrap().secs_f64(), 60.0);
    }

    #[test]
    fn too_low_message() {
        assert_eq!(
            IntervalError::TooLow(0.1).to_string(),
            "interval is too low, minimum allowed value is 0.5 second."
        );
    }

    #[test]
    fn fugit_durations_convert() {
        assert!(SampleInterval::try_from(MillisDurationU32::millis(499)).is_err());
        let interval = SampleInterval::try_from(MillisDurationU32::secs(2)).unwrap();
        assert_eq!(interval.secs_f64(), 2.0);
    }

    #[test]
    fn timer_enqueues_reads_until_stopped() {
        let (sender, rx) = command::queue();
        let mut scheduler = SamplingScheduler::new(sender);
        let interval = SampleInterval::try_from(MIN_INTERVAL).unwrap();

        scheduler.start(SampleReceiver::File, interval).unwrap();
        assert!(scheduler.is_running(SampleReceiver::File));
        assert!(!scheduler.is_running(SampleReceiver::Display));

        let first = rx.recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first, Command::ReadInputs(SampleReceiver::File));

        scheduler.stop_all();
        assert!(!scheduler.is_running(SampleReceiver::File));
        rx.try_iter().for_each(drop);
        assert!(rx.recv_timeout(Duration::from_millis(800)).is_err());
    }
}
