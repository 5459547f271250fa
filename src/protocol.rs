//! Frame-level driver for the load's 26-byte serial protocol.
//!
//! Every request and every answer is one frame:
//!
//! | byte    | content                                   |
//! |---------|-------------------------------------------|
//! | 0       | start byte `0xAA`                         |
//! | 1       | address of the load (0x00 - 0xFE)         |
//! | 2       | command, see [`Opcode`]                   |
//! | 3 - 24  | payload, little-endian integers           |
//! | 25      | sum of bytes 0 - 24, modulo 256           |

use embedded_io::Error as _;
use tracing::{debug, trace};

use crate::{
    error::{Error, Result},
    opcodes::Opcode,
    scaling,
    types::{
        ConstantModeId, ControlMode, DemandState, LoadState, OperationState, SampleReading,
        StatusCode,
    },
};

pub const FRAME_LEN: usize = 26;
pub const START_BYTE: u8 = 0xAA;
const PAYLOAD_OFFSET: usize = 3;
const CHECKSUM_OFFSET: usize = FRAME_LEN - 1;
/// Bytes `transact` may throw away while hunting for its reply.
const MAX_SKIPPED: usize = 4 * FRAME_LEN;

/// Sum of all bytes, modulo 256.
pub fn checksum(bytes: &[u8]) -> u8 {
    bytes.iter().fold(0u8, |acc, byte| acc.wrapping_add(*byte))
}

/// One protocol frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Frame {
    bytes: [u8; FRAME_LEN],
}

impl Frame {
    /// Start a request frame with an empty payload.
    pub fn new(address: u8, command: impl Into<u8>) -> Self {
        let mut bytes = [0u8; FRAME_LEN];
        bytes[0] = START_BYTE;
        bytes[1] = address;
        bytes[2] = command.into();
        let mut frame = Self { bytes };
        frame.seal();
        frame
    }

    /// Set a payload byte. Offsets are relative to the payload start.
    pub fn with_u8(mut self, offset: usize, value: u8) -> Self {
        self.bytes[PAYLOAD_OFFSET + offset] = value;
        self.seal();
        self
    }

    pub fn with_u32(mut self, offset: usize, value: u32) -> Self {
        let start = PAYLOAD_OFFSET + offset;
        self.bytes[start..start + 4].copy_from_slice(&value.to_le_bytes());
        self.seal();
        self
    }

    fn seal(&mut self) {
        self.bytes[CHECKSUM_OFFSET] = checksum(&self.bytes[..CHECKSUM_OFFSET]);
    }

    /// Validate a received frame.
    pub fn parse<I: embedded_io::Error>(raw: &[u8]) -> Result<Self, I> {
        let bytes: [u8; FRAME_LEN] = raw.try_into().map_err(|_| Error::ShortResponse {
            expected: FRAME_LEN,
            got: raw.len(),
        })?;
        if bytes[0] != START_BYTE {
            return Err(Error::InvalidResponse);
        }
        if checksum(&bytes[..CHECKSUM_OFFSET]) != bytes[CHECKSUM_OFFSET] {
            return Err(Error::Checksum);
        }
        Ok(Self { bytes })
    }

    pub fn address(&self) -> u8 {
        self.bytes[1]
    }

    pub fn command(&self) -> u8 {
        self.bytes[2]
    }

    pub fn payload(&self) -> &[u8] {
        &self.bytes[PAYLOAD_OFFSET..CHECKSUM_OFFSET]
    }

    pub fn u8_at(&self, offset: usize) -> u8 {
        self.payload()[offset]
    }

    pub fn u16_at(&self, offset: usize) -> u16 {
        let p = self.payload();
        u16::from_le_bytes([p[offset], p[offset + 1]])
    }

    pub fn u32_at(&self, offset: usize) -> u32 {
        let p = self.payload();
        u32::from_le_bytes([p[offset], p[offset + 1], p[offset + 2], p[offset + 3]])
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }
}

const fn setpoint_opcodes(mode: ConstantModeId) -> (Opcode, Opcode) {
    match mode {
        ConstantModeId::Cc => (Opcode::SetCcCurrent, Opcode::GetCcCurrent),
        ConstantModeId::Cv => (Opcode::SetCvVoltage, Opcode::GetCvVoltage),
        ConstantModeId::Cw => (Opcode::SetCwPower, Opcode::GetCwPower),
        ConstantModeId::Cr => (Opcode::SetCrResistance, Opcode::GetCrResistance),
    }
}

/// You can create a DcLoad using any interface which implements [embedded_io::Read] & [embedded_io::Write].
///
/// For its methods, "set" means to write a configuration and "get" means to read
/// back a configuration value, whereas "read" means to get a measured value.
pub struct DcLoad<S: embedded_io::Read + embedded_io::Write, const L: usize = 32> {
    interface: S,
    /// Default for the load is 0x00.
    address: u8,
}

impl<S: embedded_io::Read + embedded_io::Write, const L: usize> DcLoad<S, L> {
    /// Create a new DcLoad instance with the given interface and address.
    pub fn new(interface: S, address: u8) -> Self {
        Self { interface, address }
    }

    /// Give back the underlying interface.
    pub fn into_inner(self) -> S {
        self.interface
    }

    /// Mutable access to the underlying interface.
    pub fn interface_mut(&mut self) -> &mut S {
        &mut self.interface
    }

    /// Hand control to the serial link or back to the front panel.
    pub fn set_control_mode(&mut self, mode: ControlMode) -> Result<(), S::Error> {
        let value = match mode {
            ControlMode::Local => 0,
            ControlMode::Remote => 1,
        };
        self.write_command(Frame::new(self.address, Opcode::RemoteControl).with_u8(0, value))
    }

    /// Switch the load input on or off.
    pub fn set_load(&mut self, state: impl Into<LoadState>) -> Result<(), S::Error> {
        let value = bool::from(state.into()) as u8;
        self.write_command(Frame::new(self.address, Opcode::LoadSwitch).with_u8(0, value))
    }

    /// Select the regulation mode.
    pub fn set_mode(&mut self, mode: ConstantModeId) -> Result<(), S::Error> {
        self.write_command(Frame::new(self.address, Opcode::SetMode).with_u8(0, mode as u8))
    }

    /// Get the regulation mode currently selected.
    pub fn get_mode(&mut self) -> Result<ConstantModeId, S::Error> {
        let frame = self.query(Frame::new(self.address, Opcode::GetMode))?;
        ConstantModeId::try_from(frame.u8_at(0)).map_err(|_| Error::InvalidResponse)
    }

    /// Set the setpoint of a mode, in amps, volts, watts or ohms.
    ///
    /// This can be set without selecting the mode.
    pub fn set_setpoint(&mut self, mode: ConstantModeId, value: f64) -> Result<(), S::Error> {
        let raw = mode.scale().to_raw(value).ok_or(Error::InvalidRange)?;
        let (set, _) = setpoint_opcodes(mode);
        self.write_command(Frame::new(self.address, set).with_u32(0, raw))
    }

    /// Get the setpoint of a mode, in amps, volts, watts or ohms.
    pub fn get_setpoint(&mut self, mode: ConstantModeId) -> Result<f64, S::Error> {
        let (_, get) = setpoint_opcodes(mode);
        let frame = self.query(Frame::new(self.address, get))?;
        Ok(mode.scale().from_raw(frame.u32_at(0)))
    }

    /// Return the measured input voltage, current and power with the state registers.
    pub fn read_inputs(&mut self) -> Result<SampleReading, S::Error> {
        let frame = self.query(Frame::new(self.address, Opcode::InputValues))?;
        Ok(SampleReading {
            voltage: scaling::VOLTAGE.from_raw(frame.u32_at(0)),
            current: scaling::CURRENT.from_raw(frame.u32_at(4)),
            power: scaling::POWER.from_raw(frame.u32_at(8)),
            operation: Some(OperationState::from_bytes([frame.u8_at(12)])),
            demand: Some(DemandState::from_bytes(frame.u16_at(13).to_le_bytes())),
        })
    }

    /// Send a set command and check the acknowledgement.
    pub fn write_command(&mut self, request: Frame) -> Result<(), S::Error> {
        let response = self.transact(&request)?;
        if response.command() != u8::from(Opcode::Status) {
            return Err(Error::UnexpectedCommand {
                sent: request.command(),
                received: response.command(),
            });
        }
        match StatusCode::from(response.u8_at(0)) {
            StatusCode::Success => Ok(()),
            status => Err(Error::Status(status)),
        }
    }

    /// Send a get command and return the answering frame.
    pub fn query(&mut self, request: Frame) -> Result<Frame, S::Error> {
        let response = self.transact(&request)?;
        if response.command() == request.command() {
            return Ok(response);
        }
        if response.command() == u8::from(Opcode::Status) {
            let status = StatusCode::from(response.u8_at(0));
            if status != StatusCode::Success {
                return Err(Error::Status(status));
            }
        }
        Err(Error::UnexpectedCommand {
            sent: request.command(),
            received: response.command(),
        })
    }

    /// Write one frame and read one frame back.
    ///
    /// Bytes that cannot start a valid frame are skipped up to the next start byte,
    /// so the tail of a reply that arrived after its timeout does not poison the
    /// exchanges that follow. Frames from other addresses are skipped too.
    fn transact(&mut self, request: &Frame) -> Result<Frame, S::Error> {
        self.interface
            .write_all(request.as_bytes())
            .map_err(Error::SerialError)?;
        trace!(command = request.command(), "frame sent");

        let mut response: heapless::Vec<u8, L> = heapless::Vec::new();
        let mut temp_buf = [0u8; FRAME_LEN];
        let mut skipped = 0;
        let mut rejected = None;
        loop {
            while response.len() < FRAME_LEN {
                let wanted = FRAME_LEN - response.len();
                match self.interface.read(&mut temp_buf[..wanted]) {
                    Ok(0) => return Err(Self::incomplete(response.len(), rejected)),
                    Ok(bytes_read) => {
                        response
                            .extend_from_slice(&temp_buf[..bytes_read])
                            .map_err(|_| Error::InvalidResponse)?;
                    }
                    Err(e) if matches!(e.kind(), embedded_io::ErrorKind::TimedOut) => {
                        return Err(Self::incomplete(response.len(), rejected));
                    }
                    Err(e) => return Err(Error::SerialError(e)),
                }
            }

            let discard = match Frame::parse(&response) {
                Ok(frame) if frame.address() == self.address => {
                    if skipped > 0 {
                        debug!(skipped, "resynchronised on a frame start");
                    }
                    return Ok(frame);
                }
                Ok(frame) => {
                    trace!(address = frame.address(), "frame for another unit");
                    rejected = Some(Error::InvalidResponse);
                    FRAME_LEN
                }
                Err(err) => {
                    rejected = Some(err);
                    response[1..]
                        .iter()
                        .position(|byte| *byte == START_BYTE)
                        .map_or(FRAME_LEN, |at| at + 1)
                }
            };
            skipped += discard;
            if skipped > MAX_SKIPPED {
                return Err(rejected.unwrap_or(Error::InvalidResponse));
            }
            response.rotate_left(discard);
            response.truncate(FRAME_LEN - discard);
        }
    }

    /// The port ran dry with `got` bytes of a frame collected.
    fn incomplete(got: usize, rejected: Option<Error<S::Error>>) -> Error<S::Error> {
        match (got, rejected) {
            (0, Some(err)) => err,
            (0, None) => Error::Timeout,
            _ => Error::ShortResponse {
                expected: FRAME_LEN,
                got,
            },
        }
    }
}
