//! Thresholds and the voltage/current learned during calibration.

use super::{Bank, ParameterStore};
use crate::constants::*;
use crate::error::StoreError;
use crate::types::{Direction, Thresholds};

/// Length of the threshold block sent by the gateway
pub const THRESHOLD_LEN: usize = 5;

fn current_addr(direction: Direction) -> u16 {
    match direction {
        Direction::Open => UP_CURRENT_ADDR,
        Direction::Close => DOWN_CURRENT_ADDR,
    }
}

fn current_field(direction: Direction) -> &'static str {
    match direction {
        Direction::Open => "up current",
        Direction::Close => "down current",
    }
}

impl ParameterStore {
    /// Save the raw threshold block (low voltage at +1, current multiple at
    /// +3, report interval at +4)
    pub fn save_thresholds(&mut self, block: &[u8; THRESHOLD_LEN]) -> Result<(), StoreError> {
        self.write_verified(Bank::Eeprom, THRESHOLD_ADDR, block, "thresholds")?;
        self.set_flag(THRESHOLD_FLAG_ADDR, true, "threshold flag")
    }

    /// Thresholds with defaults applied to unset or implausible values
    pub fn thresholds(&mut self) -> Thresholds {
        let configured = self.flag(THRESHOLD_FLAG_ADDR);
        let block = self.read_bytes(Bank::Eeprom, THRESHOLD_ADDR, THRESHOLD_LEN);
        let percent = |value: u8, default: u8| {
            if configured && (1..=100).contains(&value) {
                value
            } else {
                default
            }
        };

        Thresholds {
            low_voltage: percent(block[1], DEFAULT_LOW_VOLTAGE),
            current_multiple: percent(block[3], DEFAULT_CURRENT_MULTIPLE),
            report_interval: if (1..=10).contains(&block[4]) {
                block[4]
            } else {
                DEFAULT_REPORT_INTERVAL
            },
        }
    }

    /// Save the average supply voltage seen during calibration (mV)
    pub fn save_calibration_voltage(&mut self, millivolts: u16) -> Result<(), StoreError> {
        if let Some(stored) = self.calibration_voltage() {
            if stored.abs_diff(millivolts) <= WEAR_TOLERANCE {
                return Ok(());
            }
        }
        self.write_with_crc(
            Bank::Eeprom,
            ROLL_VOLTAGE_ADDR,
            &millivolts.to_be_bytes(),
            "calibration voltage",
        )
    }

    /// Calibration voltage; `None` when corrupt or implausibly low
    pub fn calibration_voltage(&mut self) -> Option<u16> {
        let bytes = self.read_with_crc(Bank::Eeprom, ROLL_VOLTAGE_ADDR, 2)?;
        let millivolts = u16::from_be_bytes([bytes[0], bytes[1]]);
        (millivolts >= VOLTAGE_SAMPLE_FLOOR).then_some(millivolts)
    }

    /// Save the average running current for one direction
    pub fn save_baseline_current(
        &mut self,
        direction: Direction,
        current: u16,
    ) -> Result<(), StoreError> {
        let addr = current_addr(direction);
        if let Some(bytes) = self.read_with_crc(Bank::Eeprom, addr, 2) {
            let stored = u16::from_be_bytes([bytes[0], bytes[1]]);
            if self.flag(addr + 3) && stored.abs_diff(current) <= WEAR_TOLERANCE {
                return Ok(());
            }
        }
        self.write_with_crc(Bank::Eeprom, addr, &current.to_be_bytes(), current_field(direction))?;
        self.set_flag(addr + 3, true, current_field(direction))
    }

    /// Baseline current for one direction, if learned
    pub fn baseline_current(&mut self, direction: Direction) -> Option<u16> {
        let addr = current_addr(direction);
        if !self.flag(addr + 3) {
            return None;
        }
        let bytes = self.read_with_crc(Bank::Eeprom, addr, 2)?;
        let current = u16::from_be_bytes([bytes[0], bytes[1]]);
        Some(if current < CURRENT_SAMPLE_FLOOR {
            DEFAULT_BASELINE_CURRENT
        } else {
            current
        })
    }

    /// Whether both directions have a learned current
    pub fn baseline_currents_saved(&mut self) -> bool {
        self.flag(UP_CURRENT_ADDR + 3) && self.flag(DOWN_CURRENT_ADDR + 3)
    }

    /// Every flagged current must still pass its CRC
    pub fn check_baseline_currents(&mut self) -> bool {
        [Direction::Open, Direction::Close].into_iter().all(|direction| {
            let addr = current_addr(direction);
            !self.flag(addr + 3) || self.read_with_crc(Bank::Eeprom, addr, 2).is_some()
        })
    }

    pub fn clear_baseline_currents(&mut self) -> Result<(), StoreError> {
        self.set_flag(UP_CURRENT_ADDR + 3, false, "up current")?;
        self.set_flag(DOWN_CURRENT_ADDR + 3, false, "down current")
    }
}
