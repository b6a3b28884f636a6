//! Protocol, timing and storage constants for the roller actuator.
//!
//! This module defines the wire-level constants of the LoRa frame protocol,
//! the timing parameters of the travel controller and the address map of the
//! persistent parameter store.

use std::time::Duration;

// --- Frame layout ---------------------------------------------------------

/// Header byte that starts every frame
pub const FRAME_HEADER: u8 = 0xFE;

/// Fixed six byte terminator closing every frame
pub const FRAME_TERMINATOR: [u8; 6] = [0x0D, 0x0A, 0x0D, 0x0A, 0x0D, 0x0A];

/// Offset of the first byte covered by the CRC (device type)
pub const FRAME_CRC_START: usize = 4;

/// Offset of the first command specific payload byte
pub const FRAME_PAYLOAD_START: usize = 8;

/// Bytes in the declared span that precede the payload (device type, mass flag, area)
pub const FRAME_FIXED_SPAN: usize = 4;

/// Smallest possible frame: header, id, length, fixed span, crc and terminator
pub const FRAME_MIN_LEN: usize = FRAME_CRC_START + FRAME_FIXED_SPAN + 1 + FRAME_TERMINATOR.len();

/// Receive buffer capacity; overflowing it discards the partial frame
pub const RECEIVE_BUFFER_CAP: usize = 128;

/// Device type of this product
pub const DEVICE_TYPE_ID: u16 = 0xC001;

/// Device type accepted by every product
pub const BROADCAST_DEVICE_TYPE: u16 = 0x5555;

/// Mass command marker and area/group wildcard
pub const WILDCARD: u8 = 0x55;

/// Value written to every boolean "configured" flag
pub const FLAG_SET: u8 = 0x55;

/// Channel byte reported in outbound frames
pub const REPORT_CHANNEL: u8 = 0x01;

/// Intent byte in a query-parameters frame asking to change the comm mode
pub const SET_COMM_MODE_INTENT: u8 = 0x01;

/// Firmware version byte reported in the working-parameter receipt
pub const SOFT_VERSION: u8 = 0x14;

/// Hardware version byte reported in the working-parameter receipt
pub const HARD_VERSION: u8 = 0x53;

// --- Outbound payload lengths ----------------------------------------------

/// Declared length of the general parameter report
pub const GENERAL_PARAMETER_LEN: u8 = 0x24;

/// Declared length of the group and SN requests
pub const REQUEST_LEN: u8 = 0x05;

/// Declared length of the working-parameter receipt
pub const WORKING_PARAMETER_LEN: u8 = 0x1A;

/// Declared length of the general receipt
pub const GENERAL_RECEIPT_LEN: u8 = 0x0E;

// --- Opening payload -------------------------------------------------------

/// Highest percentage opening
pub const MAX_OPENING: u8 = 100;

/// Opening byte forcing a full close
pub const FORCE_CLOSE: u8 = 0xF0;

/// Opening byte forcing a full open
pub const FORCE_OPEN: u8 = 0xF1;

// --- Backoff ---------------------------------------------------------------

/// Upper bound of the first backoff draw in microseconds
pub const BACKOFF_PRIMARY_MAX_US: u64 = 1_500_000;

/// Upper bound of the second backoff draw in microseconds
pub const BACKOFF_SECONDARY_MAX_US: u64 = 200_000;

/// Spacing between repeated copies of a receipt in milliseconds
pub const SEND_COPY_DELAY_MS: u64 = 200;

// --- Travel controller -----------------------------------------------------

/// Current at or below which the motor is considered stalled against a stop
pub const LIMIT_CURRENT_FLOOR: u16 = 100;

/// Whole seconds of travel before limit detection is armed
pub const START_SETTLE_SECS: u32 = 3;

/// Whole seconds of low current that count as a reached limit
pub const LIMIT_HOLD_SECS: u32 = 3;

/// Travel time after which a run is declared stuck
pub const ROLL_OVERTIME_SECS: u32 = 600;

/// Seconds between current/voltage samples during calibration
pub const COLLECTION_PERIOD_SECS: u32 = 4;

/// Seconds between dynamic duration adjustments
pub const DYNAMIC_ADJUST_PERIOD_SECS: u32 = 3;

/// Consecutive overcurrent confirmations that abort a move
pub const OVERCURRENT_DEBOUNCE: u16 = 100;

/// Pause between motor reversals
pub const REVERSAL_PAUSE: Duration = Duration::from_millis(1000);

/// Seconds the motor backs off a limit during verification
pub const VERIFY_BACKOFF_SECS: u32 = 8;

/// Ceiling on the re-approach phase of verification
pub const VERIFY_APPROACH_SECS: u32 = 10;

/// Manual override tracks only after this many idle iterations
pub const TRACE_MIN_ITERATIONS: u16 = 10;

/// Time a manual key level must hold before its edge is reported
pub const MANUAL_KEY_DEBOUNCE: Duration = Duration::from_millis(20);

/// Continuous low current with the manual key asserted that latches a key fault
pub const MANUAL_KEY_FAULT_AFTER: Duration = Duration::from_millis(18_000 * 100);

/// Real-time opening within this distance of the target snaps onto it at boot
pub const RECOVERY_SNAP_WINDOW: u8 = 5;

// --- Dynamic duration adjustment -------------------------------------------

/// Voltage step (mV) a multiplier is applied per
pub const VOLTAGE_STEP_MV: f32 = 500.0;

/// Voltage deviation (mV) below which no adjustment happens
pub const VOLTAGE_DEADBAND_MV: u32 = 500;

/// Voltage deviation (mV) above which the reading is rejected
pub const VOLTAGE_DEVIATION_MAX_MV: u32 = 10_000;

/// Deviation (mV) at which the heavy multipliers apply
pub const VOLTAGE_HEAVY_MV: u32 = 4_000;

/// Opening while supply is below calibration voltage
pub const NEG_UP_MULTIPLIER: f32 = 1.2;

/// Opening while supply is above calibration voltage
pub const POS_UP_MULTIPLIER: f32 = 0.9;

/// Closing while supply is below calibration voltage
pub const NEG_DOWN_MULTIPLIER: f32 = 1.1;

/// Closing while supply is above calibration voltage
pub const POS_DOWN_MULTIPLIER: f32 = 0.8;

/// Added to slow-side multipliers past the heavy deviation
pub const HEAVY_SLOW_BONUS: f32 = 0.4;

/// Removed from fast-side multipliers past the heavy deviation
pub const HEAVY_FAST_PENALTY: f32 = 0.1;

// --- Calibration sampling --------------------------------------------------

/// Current samples at or below this are contact noise
pub const CURRENT_SAMPLE_FLOOR: u16 = 300;

/// Voltage samples at or below this are discarded
pub const VOLTAGE_SAMPLE_FLOOR: u16 = 14_000;

/// Current returned when the stored baseline is implausibly low
pub const DEFAULT_BASELINE_CURRENT: u16 = 800;

/// Stored voltage/current within this distance of a new value is kept
pub const WEAR_TOLERANCE: u16 = 100;

// --- Thresholds ------------------------------------------------------------

/// Default low-voltage threshold
pub const DEFAULT_LOW_VOLTAGE: u8 = 20;

/// Default current overrun threshold in tenths (2.0x)
pub const DEFAULT_CURRENT_MULTIPLE: u8 = 20;

/// Default report interval (multiples of ten seconds)
pub const DEFAULT_REPORT_INTERVAL: u8 = 3;

/// Shortest calibrated travel accepted
pub const MIN_TRAVEL_SECS: u16 = 15;

/// Longest calibrated travel accepted
pub const MAX_TRAVEL_SECS: u16 = 480;

// --- Persistent store layout (general EEPROM) ------------------------------

/// SN saved flag
pub const SN_FLAG_ADDR: u16 = 11;
/// Backup SN saved flag
pub const SN_BKP_FLAG_ADDR: u16 = 12;
/// Serial number, 9 bytes
pub const SN_ADDR: u16 = 13;
/// Serial number CRC
pub const SN_CRC_ADDR: u16 = 22;
/// Backup serial number, 9 bytes
pub const SN_BKP_ADDR: u16 = 23;
/// Backup serial number CRC
pub const SN_BKP_CRC_ADDR: u16 = 32;
/// Registered with the gateway
pub const ACCESS_NETWORK_FLAG_ADDR: u16 = 33;
/// Firmware version, 4 bytes
pub const VERSION_ADDR: u16 = 34;
/// Travel calibrated
pub const ROUTE_FLAG_ADDR: u16 = 38;
/// Travel time, high byte then low byte then CRC
pub const ROLL_TIME_ADDR: u16 = 39;
/// Threshold block, 5 bytes
pub const THRESHOLD_ADDR: u16 = 42;
/// Group slots, 5 bytes then CRC then flag
pub const GROUP_ADDR: u16 = 47;
/// Area number, then CRC then flag
pub const AREA_ADDR: u16 = 54;
/// Opening-direction baseline current, hi/lo/CRC/flag
pub const UP_CURRENT_ADDR: u16 = 57;
/// Closing-direction baseline current, hi/lo/CRC/flag
pub const DOWN_CURRENT_ADDR: u16 = 61;
/// Mirror of the backup register openings (last, current, real-time) with CRCs
pub const EP_OPENING_ADDR: u16 = 65;
/// Threshold block saved
pub const THRESHOLD_FLAG_ADDR: u16 = 71;
/// Radio configured
pub const LORA_CONFIG_FLAG_ADDR: u16 = 72;
/// Calibration voltage, hi/lo/CRC
pub const ROLL_VOLTAGE_ADDR: u16 = 73;
/// Comm mode, then flag then CRC
pub const COMM_MODE_ADDR: u16 = 76;
/// Radio address, 8 bytes then CRC then flag
pub const LORA_ADDR_ADDR: u16 = 79;

/// Size of the general store
pub const EEPROM_SIZE: usize = 256;

// --- Backup register bank --------------------------------------------------

/// Last opening value and CRC
pub const BKP_LAST_OPENING: u16 = 1;
/// Current (target) opening value and CRC
pub const BKP_CURRENT_OPENING: u16 = 3;
/// Real-time opening value and CRC
pub const BKP_REALTIME_OPENING: u16 = 5;

/// Size of the backup register bank
pub const BACKUP_SIZE: usize = 8;

// --- Provisioning ----------------------------------------------------------

/// Provisioning attempts before the device must restart
pub const PROVISIONING_RETRY_LIMIT: u32 = 50;

/// Wait between provisioning requests
pub const PROVISIONING_RETRY_WAIT: Duration = Duration::from_secs(3);

/// Interval of the periodic provisioning self-check
pub const SELF_CHECK_INTERVAL: Duration = Duration::from_secs(4 * 60 * 60);

/// Default serial port baud rate of the LoRa modem
pub const BAUD_RATE: u32 = 9600;

/// Serial read timeout in milliseconds
pub const TIMEOUT_MS: u64 = 50;
