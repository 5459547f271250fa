//! This crate logs readings from, and controls, DC electronic loads speaking the BK Precision 85xx serial protocol.
//!
//! All traffic to the load goes through a single worker thread, the
//! [dispatcher](dispatcher::Dispatcher). Producers (the [control panel](panel::ControlPanel),
//! the sampling timers) push [commands](command::Command) into a bounded queue; the worker
//! executes them one at a time and publishes [notifications](notification::Notification).
//!
//! Load models which this should work with:
//! * 8500
//! * 8502
//! * 8510
//! * 8512
//! * 8514
//! * 8518
//! * 8520
//! * 8522
//! * 8524
//! * 8526
//!
//! The serial port used for load comms should be configured like so:
//! * Default baud rate: 38400 (4800, 9600 and 19200 are also selectable on the load)
//! * Data bits: 8
//! * Stop bits: 1
//! * Parity: None
//!
//! Without hardware, [`simulation::SimulatedLoad`] stands in for the load. The
//! dispatcher does not know the difference.

pub mod command;
pub mod dispatcher;
pub mod error;
pub mod instrument;
pub mod logfile;
pub mod notification;
pub mod opcodes;
pub mod panel;
pub mod preferences;
pub mod protocol;
pub mod scaling;
pub mod scheduler;
#[cfg(feature = "serial")]
pub mod serial;
pub mod simulation;
pub mod state;
pub mod types;

#[cfg(test)]
mod mock_instrument;
#[cfg(test)]
mod mock_serial;
