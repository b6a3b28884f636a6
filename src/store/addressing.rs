//! Area number and group slots.

use super::{Bank, ParameterStore};
use crate::checksum::crc8;
use crate::constants::*;
use crate::error::StoreError;

/// Number of group slots
pub const GROUP_SLOTS: usize = 5;

impl ParameterStore {
    pub fn save_area(&mut self, area: u8) -> Result<(), StoreError> {
        self.write_with_crc(Bank::Eeprom, AREA_ADDR, &[area], "area")?;
        self.set_flag(AREA_ADDR + 2, true, "area flag")
    }

    /// Configured area; 0 when unset
    pub fn area(&mut self) -> u8 {
        self.read_byte(Bank::Eeprom, AREA_ADDR)
    }

    /// Whether the area was saved and is intact
    pub fn check_area(&mut self) -> bool {
        let area = self.area();
        self.flag(AREA_ADDR + 2) && self.read_byte(Bank::Eeprom, AREA_ADDR + 1) == crc8(&[area])
    }

    pub fn save_groups(&mut self, groups: &[u8; GROUP_SLOTS]) -> Result<(), StoreError> {
        self.write_with_crc(Bank::Eeprom, GROUP_ADDR, groups, "group number")?;
        self.set_flag(GROUP_ADDR + GROUP_SLOTS as u16 + 1, true, "group flag")
    }

    /// Group slots, if saved and intact
    pub fn groups(&mut self) -> Option<[u8; GROUP_SLOTS]> {
        if !self.flag(GROUP_ADDR + GROUP_SLOTS as u16 + 1) {
            return None;
        }
        self.read_with_crc(Bank::Eeprom, GROUP_ADDR, GROUP_SLOTS)?
            .try_into()
            .ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_area_round_trip_and_check() {
        let (mut store, eeprom, _) = ParameterStore::in_memory();
        assert_eq!(store.area(), 0);
        assert!(!store.check_area());

        store.save_area(0x03).unwrap();
        assert_eq!(store.area(), 0x03);
        assert!(store.check_area());

        eeprom.poke(AREA_ADDR, 0x04);
        assert!(!store.check_area());
    }

    #[test]
    fn test_groups_need_flag_and_crc() {
        let (mut store, eeprom, _) = ParameterStore::in_memory();
        assert_eq!(store.groups(), None);

        store.save_groups(&[1, 2, 0, 0, 0]).unwrap();
        assert_eq!(store.groups(), Some([1, 2, 0, 0, 0]));

        eeprom.poke(GROUP_ADDR + 4, 9);
        assert_eq!(store.groups(), None);
    }
}
