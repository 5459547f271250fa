//! Our error types, for both the serial frame link and the dispatch engine.

use thiserror::Error;

use crate::types::{ConstantModeId, StatusCode};

pub type Result<T, I> = core::result::Result<T, Error<I>>;

/// Errors raised while exchanging frames with the load over an [embedded_io] link.
#[derive(Error, Debug)]
pub enum Error<I: embedded_io::Error> {
    #[error("Serial communication error")]
    SerialError(I),
    #[error("Communication timeout")]
    Timeout,
    #[error("Short response: got {got} of {expected} bytes")]
    ShortResponse { expected: usize, got: usize },
    #[error("Frame checksum mismatch")]
    Checksum,
    #[error("Unexpected response to command 0x{sent:02X}: 0x{received:02X}")]
    UnexpectedCommand { sent: u8, received: u8 },
    #[error("Load rejected the command: {0}")]
    Status(StatusCode),
    #[error("Invalid range")]
    InvalidRange,
    #[error("Invalid response received")]
    InvalidResponse,
}

/// The broad class of a [`Fault`], which decides how the dispatcher reacts to it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FaultClass {
    /// Connection or timeout errors from the instrument link.
    Transport,
    /// A read-after-write check did not match what was written.
    Verification,
    /// The implicit connect or remote-mode step before a command failed.
    Precondition,
    /// The instrument answered with too little or unparseable data.
    MalformedData,
}

/// Faults surfaced by an [`Instrument`](crate::instrument::Instrument) or the dispatcher.
#[derive(Error, Debug)]
pub enum Fault {
    #[error("Transport error: {0}")]
    Transport(String),
    #[error("Instrument did not answer in time")]
    Timeout,
    #[error("Malformed data: {0}")]
    MalformedData(String),
    #[error("Instrument is not connected")]
    NotConnected,
    #[error("No port configured")]
    NoPortConfigured,
    #[error("Invalid value {0:?}")]
    InvalidValue(String),
    #[error("Verification failed: requested {requested} = {value}, instrument reports {mode} = {readback}")]
    Verification {
        requested: ConstantModeId,
        value: f64,
        mode: ConstantModeId,
        readback: f64,
    },
    #[error("Precondition failed: {0}")]
    Precondition(Box<Fault>),
}

impl Fault {
    pub fn class(&self) -> FaultClass {
        match self {
            Fault::Transport(_) | Fault::Timeout | Fault::NotConnected | Fault::NoPortConfigured => {
                FaultClass::Transport
            }
            Fault::MalformedData(_) | Fault::InvalidValue(_) => FaultClass::MalformedData,
            Fault::Verification { .. } => FaultClass::Verification,
            Fault::Precondition(_) => FaultClass::Precondition,
        }
    }

    /// Whether a sampling read that failed this way should quietly yield no sample.
    ///
    /// Timeouts and short reads happen routinely under polling load.
    pub fn is_benign_sample_miss(&self) -> bool {
        matches!(self, Fault::Timeout | Fault::MalformedData(_))
    }
}

impl<I: embedded_io::Error> From<Error<I>> for Fault {
    fn from(err: Error<I>) -> Self {
        match err {
            Error::SerialError(e) if matches!(e.kind(), embedded_io::ErrorKind::TimedOut) => {
                Fault::Timeout
            }
            Error::SerialError(e) => Fault::Transport(format!("{e:?}")),
            Error::Timeout => Fault::Timeout,
            Error::ShortResponse { .. } | Error::Checksum | Error::InvalidResponse => {
                Fault::MalformedData(err.to_string())
            }
            Error::UnexpectedCommand { .. } | Error::Status(_) => Fault::Transport(err.to_string()),
            Error::InvalidRange => Fault::InvalidValue(err.to_string()),
        }
    }
}
