//! Travel calibration flag, travel time and the three opening registers.
//!
//! Openings are kept in the battery-backed bank and mirrored to the EEPROM.
//! A register byte holds `opening + 1`, leaving 0 for "never written", which
//! is what the bank holds after losing power. Readers only ever see
//! `Some(0..=100)` or `None`.

use log::warn;

use super::{Bank, ParameterStore};
use crate::checksum::crc8;
use crate::constants::*;
use crate::error::StoreError;

/// One of the three persisted openings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpeningSlot {
    /// Opening the last completed move ended at
    Last,
    /// Opening most recently commanded
    Target,
    /// Opening estimated while travelling
    Realtime,
}

impl OpeningSlot {
    const ALL: [OpeningSlot; 3] = [OpeningSlot::Last, OpeningSlot::Target, OpeningSlot::Realtime];

    fn backup_addr(self) -> u16 {
        match self {
            OpeningSlot::Last => BKP_LAST_OPENING,
            OpeningSlot::Target => BKP_CURRENT_OPENING,
            OpeningSlot::Realtime => BKP_REALTIME_OPENING,
        }
    }

    fn mirror_addr(self) -> u16 {
        EP_OPENING_ADDR + self.backup_addr() - BKP_LAST_OPENING
    }

    fn name(self) -> &'static str {
        match self {
            OpeningSlot::Last => "last opening",
            OpeningSlot::Target => "target opening",
            OpeningSlot::Realtime => "realtime opening",
        }
    }
}

impl ParameterStore {
    /// Whether a calibration pass completed since the last fault
    pub fn is_calibrated(&mut self) -> bool {
        self.flag(ROUTE_FLAG_ADDR)
    }

    pub fn set_calibrated(&mut self, calibrated: bool) -> Result<(), StoreError> {
        self.set_flag(ROUTE_FLAG_ADDR, calibrated, "route flag")
    }

    /// Save the calibrated end-to-end travel time in seconds
    pub fn save_travel_time(&mut self, secs: u16) -> Result<(), StoreError> {
        if !(MIN_TRAVEL_SECS..=MAX_TRAVEL_SECS).contains(&secs) {
            return Err(StoreError::OutOfRange {
                field: "travel time",
                value: secs as u32,
            });
        }
        self.write_with_crc(Bank::Eeprom, ROLL_TIME_ADDR, &secs.to_be_bytes(), "travel time")
    }

    /// Calibrated travel time; `None` when corrupt or out of range
    pub fn travel_time(&mut self) -> Option<u16> {
        let bytes = self.read_with_crc(Bank::Eeprom, ROLL_TIME_ADDR, 2)?;
        let secs = u16::from_be_bytes([bytes[0], bytes[1]]);
        (MIN_TRAVEL_SECS..=MAX_TRAVEL_SECS)
            .contains(&secs)
            .then_some(secs)
    }

    pub fn save_opening(&mut self, slot: OpeningSlot, opening: u8) -> Result<(), StoreError> {
        if opening > MAX_OPENING {
            return Err(StoreError::OutOfRange {
                field: slot.name(),
                value: opening as u32,
            });
        }
        let encoded = [opening + 1];
        self.write_with_crc(Bank::Backup, slot.backup_addr(), &encoded, slot.name())?;
        self.write_with_crc(Bank::Eeprom, slot.mirror_addr(), &encoded, slot.name())
    }

    /// Persisted opening; `None` when never written or corrupt
    pub fn opening(&mut self, slot: OpeningSlot) -> Option<u8> {
        decode_opening(self.read_bytes(Bank::Backup, slot.backup_addr(), 2)).or_else(|| {
            let mirrored = decode_opening(self.read_bytes(Bank::Eeprom, slot.mirror_addr(), 2));
            if mirrored.is_some() {
                warn!("{} lost from backup registers, using EEPROM copy", slot.name());
            }
            mirrored
        })
    }

    /// Forget every opening register in both banks
    pub fn clear_openings(&mut self) -> Result<(), StoreError> {
        for slot in OpeningSlot::ALL {
            self.write_verified(Bank::Backup, slot.backup_addr(), &[0, 0], slot.name())?;
            self.write_verified(Bank::Eeprom, slot.mirror_addr(), &[0, 0], slot.name())?;
        }
        Ok(())
    }

    /// Save the same opening to last, target and real-time
    pub fn save_all_openings(&mut self, opening: u8) -> Result<(), StoreError> {
        for slot in OpeningSlot::ALL {
            self.save_opening(slot, opening)?;
        }
        Ok(())
    }
}

fn decode_opening(register: Vec<u8>) -> Option<u8> {
    let (value, crc) = (register[0], register[1]);
    if value == 0 || value > MAX_OPENING + 1 || crc8(&[value]) != crc {
        return None;
    }
    Some(value - 1)
}
