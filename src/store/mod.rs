//! Persistent parameter store.
//!
//! Two byte stores back the parameters: the general EEPROM, and a small
//! battery-backed register bank holding the three opening registers. Every
//! write is read back and compared; writes that would not change the stored
//! bytes are skipped to bound wear. Multi-byte fields carry a CRC8 byte and
//! "configured" facts a flag byte (0x55 = set).
//!
//! Field groups live in their own modules and extend [`ParameterStore`].

mod addressing;
mod calibration;
mod identity;
mod memory;
mod radio;
mod travel;

pub use addressing::GROUP_SLOTS;
pub use calibration::THRESHOLD_LEN;
pub use identity::SN_LEN;
pub use memory::MemoryStore;
pub use radio::RADIO_ADDR_LEN;
pub use travel::OpeningSlot;

use log::error;

use crate::checksum::crc8;
use crate::constants::*;
use crate::error::StoreError;
use crate::hal::ByteStore;

/// Which physical store an address refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Bank {
    Eeprom,
    Backup,
}

/// Typed access to every persisted parameter.
pub struct ParameterStore {
    eeprom: Box<dyn ByteStore>,
    backup: Box<dyn ByteStore>,
}

impl ParameterStore {
    pub fn new(eeprom: Box<dyn ByteStore>, backup: Box<dyn ByteStore>) -> Self {
        ParameterStore { eeprom, backup }
    }

    /// Store backed by two fresh in-memory banks
    pub fn in_memory() -> (Self, MemoryStore, MemoryStore) {
        let eeprom = MemoryStore::new(EEPROM_SIZE);
        let backup = MemoryStore::new(BACKUP_SIZE);
        let store = ParameterStore::new(Box::new(eeprom.clone()), Box::new(backup.clone()));
        (store, eeprom, backup)
    }

    fn bank(&mut self, bank: Bank) -> &mut dyn ByteStore {
        match bank {
            Bank::Eeprom => self.eeprom.as_mut(),
            Bank::Backup => self.backup.as_mut(),
        }
    }

    pub(crate) fn read_bytes(&mut self, bank: Bank, addr: u16, len: usize) -> Vec<u8> {
        let store = self.bank(bank);
        (0..len as u16).map(|i| store.read_byte(addr + i)).collect()
    }

    pub(crate) fn read_byte(&mut self, bank: Bank, addr: u16) -> u8 {
        self.bank(bank).read_byte(addr)
    }

    /// Write `bytes` at `addr` and verify them, skipping unchanged bytes
    pub(crate) fn write_verified(
        &mut self,
        bank: Bank,
        addr: u16,
        bytes: &[u8],
        field: &'static str,
    ) -> Result<(), StoreError> {
        if self.read_bytes(bank, addr, bytes.len()) == bytes {
            return Ok(());
        }

        let store = self.bank(bank);
        store.set_write_protect(false);
        for (i, &byte) in bytes.iter().enumerate() {
            store.write_byte(addr + i as u16, byte);
        }
        store.set_write_protect(true);

        if self.read_bytes(bank, addr, bytes.len()) != bytes {
            error!("Write verification failed for {} at {}", field, addr);
            return Err(StoreError::VerifyFailed { field });
        }
        Ok(())
    }

    /// Write `data` followed by its CRC8
    pub(crate) fn write_with_crc(
        &mut self,
        bank: Bank,
        addr: u16,
        data: &[u8],
        field: &'static str,
    ) -> Result<(), StoreError> {
        let mut block = data.to_vec();
        block.push(crc8(data));
        self.write_verified(bank, addr, &block, field)
    }

    /// Read `len` bytes at `addr` whose CRC8 follows them
    pub(crate) fn read_with_crc(&mut self, bank: Bank, addr: u16, len: usize) -> Option<Vec<u8>> {
        let mut block = self.read_bytes(bank, addr, len + 1);
        let stored = block.pop()?;
        (crc8(&block) == stored).then_some(block)
    }

    pub(crate) fn flag(&mut self, addr: u16) -> bool {
        self.read_byte(Bank::Eeprom, addr) == FLAG_SET
    }

    pub(crate) fn set_flag(
        &mut self,
        addr: u16,
        on: bool,
        field: &'static str,
    ) -> Result<(), StoreError> {
        let value = if on { FLAG_SET } else { 0x00 };
        self.write_verified(Bank::Eeprom, addr, &[value], field)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_write_verified_skips_unchanged_bytes() {
        let (mut store, eeprom, _) = ParameterStore::in_memory();
        store
            .write_with_crc(Bank::Eeprom, 100, &[1, 2, 3], "test")
            .unwrap();
        let writes = eeprom.writes();
        store
            .write_with_crc(Bank::Eeprom, 100, &[1, 2, 3], "test")
            .unwrap();
        assert_eq!(eeprom.writes(), writes);
        assert_eq!(store.read_with_crc(Bank::Eeprom, 100, 3), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_write_verified_reports_stuck_cell() {
        let (mut store, eeprom, _) = ParameterStore::in_memory();
        eeprom.stick(101);
        assert_eq!(
            store.write_with_crc(Bank::Eeprom, 100, &[1, 2, 3], "test"),
            Err(StoreError::VerifyFailed { field: "test" })
        );
        assert_eq!(store.read_with_crc(Bank::Eeprom, 100, 3), None);
    }

    #[test]
    fn test_flags_only_true_for_sentinel() {
        let (mut store, eeprom, _) = ParameterStore::in_memory();
        eeprom.poke(ROUTE_FLAG_ADDR, 0x01);
        assert!(!store.flag(ROUTE_FLAG_ADDR));
        store.set_flag(ROUTE_FLAG_ADDR, true, "route").unwrap();
        assert!(store.flag(ROUTE_FLAG_ADDR));
    }
}
