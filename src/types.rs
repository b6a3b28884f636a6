use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::constants::*;

/// Status of the travel controller, reported in the working-parameter receipt.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MotorStatus {
    FactoryMode = 0,
    RollOk,
    HighPositionLimitException,
    LowPositionLimitException,
    LowPower,
    MotorException,
    MotorCurrentException,
    Rolling,
    CmdException,
    NotInitialized,
    StoreException,
    ResetRolling,
    ResetRollOk,
    Rs485Exception,
    ForceStop,
    ManualRollOk,
    ManualKeyException,
    OpenRollError,
}

impl MotorStatus {
    /// Whether the status reports a fault rather than progress
    pub fn is_fault(self) -> bool {
        matches!(
            self,
            MotorStatus::HighPositionLimitException
                | MotorStatus::LowPositionLimitException
                | MotorStatus::MotorException
                | MotorStatus::MotorCurrentException
                | MotorStatus::CmdException
                | MotorStatus::StoreException
                | MotorStatus::ManualKeyException
                | MotorStatus::OpenRollError
        )
    }
}

/// Status byte of the general receipt.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ReceiptStatus {
    FactoryMode = 0,
    AskUploadParamsOk,
    AskUploadParamsErr,
    AssignGroupIdArrayOk,
    AssignGroupIdArrayErr,
    SetSnAndSlaverCountOk,
    SetSnAndSlaverCountErr,
    TurnOffOk,
    TurnOffErr,
    ResetRollerOk,
    ResetRollerErr,
    OpenRollerOk,
    OpenRollerErr,
    LimitRollerOk,
    LimitRollerErr,
    SetLoRaModeOk,
    SetLoRaModeErr,
}

/// Inbound commands, keyed by frame-ID.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Command {
    QueryWorkingParameters,
    SetGroupNumber,
    SetSnAreaChannel,
    QueryStatus,
    StopWork,
    ResetTravel,
    SetOpening,
    SetThresholds,
}

/// Filtering and length rules of an inbound command.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommandRule {
    /// Declared length byte the command carries
    pub length: u8,
    /// Area must match
    pub area_filter: bool,
    /// Group must match
    pub group_filter: bool,
}

impl Command {
    /// Look up the command for a frame-ID
    pub fn from_frame_id(id: u16) -> Option<Self> {
        match id {
            0xA011 => Some(Command::QueryWorkingParameters),
            0xA012 => Some(Command::SetGroupNumber),
            0xA013 => Some(Command::SetSnAreaChannel),
            0xA014 => Some(Command::QueryStatus),
            0xA015 => Some(Command::StopWork),
            0xA020 => Some(Command::ResetTravel),
            0xA021 => Some(Command::SetOpening),
            0xA022 => Some(Command::SetThresholds),
            _ => None,
        }
    }

    pub fn frame_id(self) -> u16 {
        match self {
            Command::QueryWorkingParameters => 0xA011,
            Command::SetGroupNumber => 0xA012,
            Command::SetSnAreaChannel => 0xA013,
            Command::QueryStatus => 0xA014,
            Command::StopWork => 0xA015,
            Command::ResetTravel => 0xA020,
            Command::SetOpening => 0xA021,
            Command::SetThresholds => 0xA022,
        }
    }

    pub fn rule(self) -> CommandRule {
        let (length, area_filter, group_filter) = match self {
            Command::QueryWorkingParameters => (23, true, false),
            Command::SetGroupNumber => (10, true, false),
            Command::SetSnAreaChannel => (15, false, false),
            Command::QueryStatus => (5, true, false),
            Command::StopWork => (6, true, true),
            Command::ResetTravel => (6, true, true),
            Command::SetOpening => (7, true, true),
            Command::SetThresholds => (11, true, true),
        };
        CommandRule {
            length,
            area_filter,
            group_filter,
        }
    }
}

/// Outbound frame-IDs.
#[repr(u16)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Response {
    GeneralParameters = 0xE011,
    RequestGroup = 0xE012,
    RequestSn = 0xE013,
    WorkingParameters = 0xE014,
    GeneralReceipt = 0xE015,
}

/// Direction of travel. Opening rolls the film up.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Direction {
    Open,
    Close,
}

impl Direction {
    pub fn reverse(self) -> Self {
        match self {
            Direction::Open => Direction::Close,
            Direction::Close => Direction::Open,
        }
    }

    /// Opening of the end stop in this direction
    pub fn end_opening(self) -> u8 {
        match self {
            Direction::Open => MAX_OPENING,
            Direction::Close => 0,
        }
    }

    /// Direction whose end stop is `opening`, if it is one
    pub fn toward(opening: u8) -> Option<Self> {
        match opening {
            0 => Some(Direction::Close),
            MAX_OPENING => Some(Direction::Open),
            _ => None,
        }
    }
}

/// Motor output requested by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Drive {
    Run(Direction),
    Stop,
}

/// Radio communication mode byte.
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommMode {
    Primary = 0xF0,
    Secondary = 0xF1,
}

impl TryFrom<u8> for CommMode {
    type Error = u8;

    fn try_from(value: u8) -> std::result::Result<Self, Self::Error> {
        match value {
            0xF0 => Ok(CommMode::Primary),
            0xF1 => Ok(CommMode::Secondary),
            other => Err(other),
        }
    }
}

/// Opening byte of a set-opening command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OpeningTarget {
    Percent(u8),
    ForceClose,
    ForceOpen,
}

impl OpeningTarget {
    pub fn decode(byte: u8) -> Option<Self> {
        match byte {
            0..=MAX_OPENING => Some(OpeningTarget::Percent(byte)),
            FORCE_CLOSE => Some(OpeningTarget::ForceClose),
            FORCE_OPEN => Some(OpeningTarget::ForceOpen),
            _ => None,
        }
    }
}

/// Thresholds configured by the gateway, with defaults applied.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Thresholds {
    /// Low-voltage threshold
    pub low_voltage: u8,
    /// Current overrun threshold, tenths of a multiple of the baseline
    pub current_multiple: u8,
    /// Status report interval, multiples of ten seconds
    pub report_interval: u8,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            low_voltage: DEFAULT_LOW_VOLTAGE,
            current_multiple: DEFAULT_CURRENT_MULTIPLE,
            report_interval: DEFAULT_REPORT_INTERVAL,
        }
    }
}

/// One reading of the analog and manual inputs.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SensorSnapshot {
    /// Motor current in ADC units
    pub current: u16,
    /// Supply voltage in millivolts
    pub voltage: u16,
    /// Manual open key level
    pub manual_up: bool,
    /// Manual close key level
    pub manual_down: bool,
}

/// Observable state of the actuator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceSnapshot {
    pub timestamp: DateTime<Utc>,
    pub status: MotorStatus,
    pub state: String,
    pub registered: bool,
    pub calibrated: bool,
    pub travel_secs: Option<u16>,
    pub last_opening: Option<u8>,
    pub target_opening: Option<u8>,
    pub realtime_opening: Option<u8>,
    pub area: u8,
    pub groups: Option<[u8; 5]>,
    pub thresholds: Thresholds,
    pub comm_mode: CommMode,
    pub current: u16,
    pub voltage: u16,
    pub manual_key_fault: bool,
}
