//! Error types for the roller actuator.

use thiserror::Error;

/// Result type alias for actuator operations.
pub type Result<T> = std::result::Result<T, ActuatorError>;

/// Error types for actuator operations.
#[derive(Error, Debug)]
pub enum ActuatorError {
    /// Serial port communication error
    #[error("Serial port error: {0}")]
    SerialPort(#[from] serialport::Error),

    /// General I/O error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A persisted write did not verify
    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    /// Configuration could not be loaded
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    /// Inbound frame rejected
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Provisioning data stayed missing after the retry budget
    #[error("Provisioning of {field} failed after {attempts} attempts, restart required")]
    ProvisioningExhausted {
        /// Field that could not be provisioned
        field: &'static str,
        /// Requests sent before giving up
        attempts: u32,
    },

    /// Opening byte outside 0..=100, 0xF0 and 0xF1
    #[error("Invalid opening byte: {0:#04x}")]
    InvalidOpening(u8),

    /// A travel operation is already running
    #[error("Travel operation already in progress")]
    Busy,
}

/// Failures of the persistent parameter store.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Read-back after a write did not match
    #[error("Write verification failed for {field}")]
    VerifyFailed {
        /// Field being written
        field: &'static str,
    },

    /// Value rejected before writing
    #[error("Value {value} out of range for {field}")]
    OutOfRange {
        /// Field being written
        field: &'static str,
        /// Rejected value
        value: u32,
    },
}

/// Reasons an inbound frame is dropped.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Fewer bytes than the smallest frame
    #[error("Frame too short: {length} bytes")]
    TooShort {
        /// Received length
        length: usize,
    },

    /// First byte is not the header
    #[error("Bad header byte: {0:#04x}")]
    BadHeader(u8),

    /// Declared length does not fit the received bytes
    #[error("Declared length {declared} does not fit {length} received bytes")]
    BadLength {
        /// Length byte of the frame
        declared: u8,
        /// Received length
        length: usize,
    },

    /// CRC8 over the declared span does not match the check byte
    #[error("CRC mismatch: expected {expected:#04x}, got {actual:#04x}")]
    CrcMismatch {
        /// CRC computed over the span
        expected: u8,
        /// Check byte carried by the frame
        actual: u8,
    },

    /// Frame addressed to another product
    #[error("Device type {0:#06x} not accepted")]
    DeviceType(u16),

    /// Frame addressed to another area
    #[error("Area {0:#04x} does not match")]
    Area(u8),

    /// Frame addressed to another group
    #[error("Group {0:#04x} does not match")]
    Group(u8),

    /// Frame-ID not handled by this device
    #[error("Unknown frame id {0:#06x}")]
    UnknownFrameId(u16),

    /// Payload length differs from what the command carries
    #[error("Command {frame_id:#06x} expects length {expected}, got {actual}")]
    PayloadLength {
        /// Frame-ID of the command
        frame_id: u16,
        /// Length the command carries
        expected: u8,
        /// Length byte received
        actual: u8,
    },
}
