//! The real instrument: a [`DcLoad`] driven over a host serial port.

use std::time::Duration;

use fugit::MillisDurationU32;
use serialport::{ClearBuffer, SerialPort};
use tracing::{debug, info};

use crate::{
    error::Fault,
    instrument::{Instrument, PortId},
    protocol::DcLoad,
    types::{ConstantModeId, ControlMode, LoadState, SampleReading},
};

/// Default serial timeout. The load can take a while to answer.
pub const DEFAULT_TIMEOUT: MillisDurationU32 = MillisDurationU32::secs(2);

/// Exposes a `serialport` handle through the [embedded_io] traits.
pub struct PortWrapper(Box<dyn SerialPort>);

#[derive(Debug)]
pub struct IoError(std::io::Error);

impl core::fmt::Display for IoError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::error::Error for IoError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.0)
    }
}

impl embedded_io::Error for IoError {
    fn kind(&self) -> embedded_io::ErrorKind {
        use embedded_io::ErrorKind;
        match self.0.kind() {
            std::io::ErrorKind::NotFound => ErrorKind::NotFound,
            std::io::ErrorKind::PermissionDenied => ErrorKind::PermissionDenied,
            std::io::ErrorKind::NotConnected => ErrorKind::NotConnected,
            std::io::ErrorKind::BrokenPipe => ErrorKind::BrokenPipe,
            std::io::ErrorKind::InvalidInput => ErrorKind::InvalidInput,
            std::io::ErrorKind::InvalidData => ErrorKind::InvalidData,
            // Some platforms report an expired read timeout as WouldBlock.
            std::io::ErrorKind::TimedOut | std::io::ErrorKind::WouldBlock => ErrorKind::TimedOut,
            std::io::ErrorKind::Interrupted => ErrorKind::Interrupted,
            std::io::ErrorKind::Unsupported => ErrorKind::Unsupported,
            _ => ErrorKind::Other,
        }
    }
}

impl embedded_io::ErrorType for PortWrapper {
    type Error = IoError;
}

impl embedded_io::Read for PortWrapper {
    fn read(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        std::io::Read::read(&mut self.0, buf).map_err(IoError)
    }
}

impl embedded_io::Write for PortWrapper {
    fn write(&mut self, buf: &[u8]) -> Result<usize, Self::Error> {
        std::io::Write::write(&mut self.0, buf).map_err(IoError)
    }

    fn flush(&mut self) -> Result<(), Self::Error> {
        std::io::Write::flush(&mut self.0).map_err(IoError)
    }
}

/// Names of the serial ports present on this machine.
pub fn available_ports() -> Result<Vec<String>, Fault> {
    let ports = serialport::available_ports().map_err(|e| Fault::Transport(e.to_string()))?;
    Ok(ports.into_iter().map(|p| p.port_name).collect())
}

/// A DC load on a serial port, opened on demand.
pub struct SerialLoad {
    address: u8,
    timeout: MillisDurationU32,
    link: Option<DcLoad<PortWrapper>>,
}

impl SerialLoad {
    pub fn new(address: u8, timeout: MillisDurationU32) -> Self {
        Self {
            address,
            timeout,
            link: None,
        }
    }

    /// The open link, with any stale input from an earlier late reply discarded.
    fn link(&mut self) -> Result<&mut DcLoad<PortWrapper>, Fault> {
        let link = self.link.as_mut().ok_or(Fault::NotConnected)?;
        if let Err(err) = link.interface_mut().0.clear(ClearBuffer::Input) {
            debug!(%err, "could not discard stale input");
        }
        Ok(link)
    }
}

impl Default for SerialLoad {
    fn default() -> Self {
        Self::new(0, DEFAULT_TIMEOUT)
    }
}

impl Instrument for SerialLoad {
    fn open(&mut self, port: &PortId, baud: u32) -> Result<(), Fault> {
        let device = port.device_name();
        debug!(%device, baud, "opening serial port");
        let handle = serialport::new(&device, baud)
            .timeout(Duration::from_millis(self.timeout.to_millis().into()))
            .open()
            .map_err(|e| Fault::Transport(format!("{device}: {e}")))?;
        // Reopening replaces any previous handle.
        self.link = Some(DcLoad::new(PortWrapper(handle), self.address));
        info!(%device, baud, "serial port open");
        Ok(())
    }

    fn close(&mut self) -> Result<(), Fault> {
        if self.link.take().is_some() {
            info!("serial port closed");
        }
        Ok(())
    }

    fn set_control_mode(&mut self, mode: ControlMode) -> Result<(), Fault> {
        Ok(self.link()?.set_control_mode(mode)?)
    }

    fn set_load(&mut self, state: LoadState) -> Result<(), Fault> {
        Ok(self.link()?.set_load(state)?)
    }

    fn read_inputs(&mut self) -> Result<SampleReading, Fault> {
        Ok(self.link()?.read_inputs()?)
    }

    fn get_cc_current(&mut self) -> Result<f64, Fault> {
        Ok(self.link()?.get_setpoint(ConstantModeId::Cc)?)
    }

    fn set_cc_current(&mut self, amps: f64) -> Result<(), Fault> {
        Ok(self.link()?.set_setpoint(ConstantModeId::Cc, amps)?)
    }

    fn get_cv_voltage(&mut self) -> Result<f64, Fault> {
        Ok(self.link()?.get_setpoint(ConstantModeId::Cv)?)
    }

    fn set_cv_voltage(&mut self, volts: f64) -> Result<(), Fault> {
        Ok(self.link()?.set_setpoint(ConstantModeId::Cv, volts)?)
    }

    fn get_cw_power(&mut self) -> Result<f64, Fault> {
        Ok(self.link()?.get_setpoint(ConstantModeId::Cw)?)
    }

    fn set_cw_power(&mut self, watts: f64) -> Result<(), Fault> {
        Ok(self.link()?.set_setpoint(ConstantModeId::Cw, watts)?)
    }

    fn get_cr_resistance(&mut self) -> Result<f64, Fault> {
        Ok(self.link()?.get_setpoint(ConstantModeId::Cr)?)
    }

    fn set_cr_resistance(&mut self, ohms: f64) -> Result<(), Fault> {
        Ok(self.link()?.set_setpoint(ConstantModeId::Cr, ohms)?)
    }

    fn set_active_mode(&mut self, mode: ConstantModeId) -> Result<(), Fault> {
        Ok(self.link()?.set_mode(mode)?)
    }

    fn get_active_mode(&mut self) -> Result<ConstantModeId, Fault> {
        Ok(self.link()?.get_mode()?)
    }
}
