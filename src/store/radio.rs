//! Radio settings: comm mode and the modem's network address.

use log::warn;

use super::{Bank, ParameterStore};
use crate::checksum::crc8;
use crate::constants::*;
use crate::error::StoreError;
use crate::types::CommMode;

/// Length of the radio address
pub const RADIO_ADDR_LEN: usize = 8;

impl ParameterStore {
    pub fn save_comm_mode(&mut self, mode: CommMode) -> Result<(), StoreError> {
        let byte = mode as u8;
        self.write_verified(Bank::Eeprom, COMM_MODE_ADDR, &[byte], "comm mode")?;
        self.write_verified(Bank::Eeprom, COMM_MODE_ADDR + 2, &[crc8(&[byte])], "comm mode")?;
        self.set_flag(COMM_MODE_ADDR + 1, true, "comm mode flag")
    }

    /// Radio comm mode; a damaged or unset value is reset to the primary mode
    pub fn comm_mode(&mut self) -> CommMode {
        let byte = self.read_byte(Bank::Eeprom, COMM_MODE_ADDR);
        let crc = self.read_byte(Bank::Eeprom, COMM_MODE_ADDR + 2);
        if self.flag(COMM_MODE_ADDR + 1) && crc8(&[byte]) == crc {
            if let Ok(mode) = CommMode::try_from(byte) {
                return mode;
            }
        }

        if self.flag(COMM_MODE_ADDR + 1) {
            warn!("Comm mode damaged, restoring primary mode");
            if let Err(e) = self.save_comm_mode(CommMode::Primary) {
                warn!("Could not restore comm mode: {}", e);
            }
        }
        CommMode::Primary
    }

    pub fn save_radio_address(&mut self, addr: &[u8; RADIO_ADDR_LEN]) -> Result<(), StoreError> {
        self.write_with_crc(Bank::Eeprom, LORA_ADDR_ADDR, addr, "radio address")?;
        self.set_flag(LORA_ADDR_ADDR + RADIO_ADDR_LEN as u16 + 1, true, "radio address flag")
    }

    pub fn radio_address(&mut self) -> Option<[u8; RADIO_ADDR_LEN]> {
        if !self.flag(LORA_ADDR_ADDR + RADIO_ADDR_LEN as u16 + 1) {
            return None;
        }
        self.read_with_crc(Bank::Eeprom, LORA_ADDR_ADDR, RADIO_ADDR_LEN)?
            .try_into()
            .ok()
    }

    /// Whether the modem has been configured once
    pub fn is_radio_configured(&mut self) -> bool {
        self.flag(LORA_CONFIG_FLAG_ADDR)
    }

    pub fn set_radio_configured(&mut self, configured: bool) -> Result<(), StoreError> {
        self.set_flag(LORA_CONFIG_FLAG_ADDR, configured, "radio config flag")
    }
}
