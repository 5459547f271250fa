//! This module is used to define the command bytes understood by the load.
//!
//! Set commands are acknowledged with a [`Opcode::Status`] frame, get commands
//! are answered with a frame carrying the same command byte.

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
#[repr(u8)]
pub enum Opcode {
    /// __R__ - Acknowledgement frame.
    ///
    /// Payload byte 0 holds the [`StatusCode`](crate::types::StatusCode).
    Status = 0x12,
    /// __W__ - Control authority.
    /// * `0` - Front panel.
    /// * `1` - Remote.
    RemoteControl = 0x20,
    /// __W__ - Load input switch.
    /// * `0` - Off.
    /// * `1` - On.
    LoadSwitch = 0x21,
    /// __W__ - Regulation mode.
    ///
    /// See [`ConstantModeId`](crate::types::ConstantModeId) for the mode bytes.
    SetMode = 0x28,
    /// __R__ - Regulation mode.
    GetMode = 0x29,
    /// __W__ - CC current setpoint.
    ///
    /// Value is u32 in units of 0.1 mA. E.g. 1.5A => `15000`.
    SetCcCurrent = 0x2A,
    /// __R__ - CC current setpoint.
    GetCcCurrent = 0x2B,
    /// __W__ - CV voltage setpoint.
    ///
    /// Value is u32 in millivolts. E.g. 12V => `12000`.
    SetCvVoltage = 0x2C,
    /// __R__ - CV voltage setpoint.
    GetCvVoltage = 0x2D,
    /// __W__ - CW power setpoint.
    ///
    /// Value is u32 in milliwatts.
    SetCwPower = 0x2E,
    /// __R__ - CW power setpoint.
    GetCwPower = 0x2F,
    /// __W__ - CR resistance setpoint.
    ///
    /// Value is u32 in milliohms.
    SetCrResistance = 0x30,
    /// __R__ - CR resistance setpoint.
    GetCrResistance = 0x31,
    /// __R__ - Input voltage, current, power and state registers.
    ///
    /// * bytes 0-3 - Voltage, u32 in millivolts.
    /// * bytes 4-7 - Current, u32 in units of 0.1 mA.
    /// * bytes 8-11 - Power, u32 in milliwatts.
    /// * byte 12 - [`OperationState`](crate::types::OperationState).
    /// * bytes 13-14 - [`DemandState`](crate::types::DemandState).
    InputValues = 0x5F,
}

impl From<Opcode> for u8 {
    fn from(value: Opcode) -> Self {
        value as u8
    }
}
