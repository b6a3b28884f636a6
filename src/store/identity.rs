//! Serial number, registration and firmware version.

use log::{error, info, warn};

use super::{Bank, ParameterStore};
use crate::checksum::crc8;
use crate::constants::*;
use crate::error::StoreError;

/// Length of a serial number
pub const SN_LEN: usize = 9;

impl ParameterStore {
    /// Save the serial number to both the primary and the backup copy
    pub fn save_serial_number(&mut self, sn: &[u8; SN_LEN]) -> Result<(), StoreError> {
        self.write_with_crc(Bank::Eeprom, SN_ADDR, sn, "serial number")?;
        self.set_flag(SN_FLAG_ADDR, true, "serial number flag")?;
        self.write_with_crc(Bank::Eeprom, SN_BKP_ADDR, sn, "backup serial number")?;
        self.set_flag(SN_BKP_FLAG_ADDR, true, "backup serial number flag")
    }

    /// Primary serial number, if saved and intact
    pub fn serial_number(&mut self) -> Option<[u8; SN_LEN]> {
        self.read_sn_copy(SN_FLAG_ADDR, SN_ADDR)
    }

    /// Backup serial number, if saved and intact
    pub fn backup_serial_number(&mut self) -> Option<[u8; SN_LEN]> {
        self.read_sn_copy(SN_BKP_FLAG_ADDR, SN_BKP_ADDR)
    }

    fn read_sn_copy(&mut self, flag: u16, addr: u16) -> Option<[u8; SN_LEN]> {
        if !self.flag(flag) {
            return None;
        }
        let bytes = self.read_with_crc(Bank::Eeprom, addr, SN_LEN)?;
        bytes.try_into().ok()
    }

    /// Reconcile the two serial number copies.
    ///
    /// An intact copy repairs a broken one. With both broken, both flags are
    /// cleared so the gateway is asked for a new one. Returns whether a valid
    /// serial number is available afterwards.
    pub fn reconcile_serial_numbers(&mut self) -> bool {
        match (self.serial_number(), self.backup_serial_number()) {
            (Some(_), Some(_)) => true,
            (Some(sn), None) => {
                warn!("Backup serial number damaged, restoring from primary");
                self.write_with_crc(Bank::Eeprom, SN_BKP_ADDR, &sn, "backup serial number")
                    .and_then(|_| self.set_flag(SN_BKP_FLAG_ADDR, true, "backup serial number flag"))
                    .is_ok()
            }
            (None, Some(sn)) => {
                warn!("Serial number damaged, restoring from backup");
                self.write_with_crc(Bank::Eeprom, SN_ADDR, &sn, "serial number")
                    .and_then(|_| self.set_flag(SN_FLAG_ADDR, true, "serial number flag"))
                    .is_ok()
            }
            (None, None) => {
                info!("No valid serial number, clearing both copies");
                for (addr, field) in [
                    (SN_FLAG_ADDR, "serial number flag"),
                    (SN_BKP_FLAG_ADDR, "backup serial number flag"),
                ] {
                    if let Err(e) = self.set_flag(addr, false, field) {
                        error!("Could not clear {}: {}", field, e);
                    }
                }
                false
            }
        }
    }

    /// Seed for the retransmission backoff, unique per unit
    pub fn random_seed(&mut self) -> u8 {
        let tail = self.read_bytes(Bank::Eeprom, SN_BKP_ADDR + 7, 2);
        crc8(&tail)
    }

    /// Whether the gateway has registered this unit
    pub fn is_registered(&mut self) -> bool {
        self.flag(ACCESS_NETWORK_FLAG_ADDR)
    }

    pub fn set_registered(&mut self, registered: bool) -> Result<(), StoreError> {
        self.set_flag(ACCESS_NETWORK_FLAG_ADDR, registered, "access network flag")
    }

    /// Persist the running firmware version
    pub fn save_version(&mut self, version: &[u8; 4]) -> Result<(), StoreError> {
        self.write_verified(Bank::Eeprom, VERSION_ADDR, version, "version")
    }

    pub fn version(&mut self) -> [u8; 4] {
        let bytes = self.read_bytes(Bank::Eeprom, VERSION_ADDR, 4);
        [bytes[0], bytes[1], bytes[2], bytes[3]]
    }
}
