//! CRC8 used by frames and persisted fields.

use crc::{Crc, CRC_8_MAXIM_DOW};

const CRC8: Crc<u8> = Crc::<u8>::new(&CRC_8_MAXIM_DOW);

/// CRC8 (Dallas/Maxim 1-Wire) of `data`
pub fn crc8(data: &[u8]) -> u8 {
    CRC8.checksum(data)
}

/// Convert a BCD encoded byte to its decimal value (0x23 -> 23)
pub fn bcd_to_decimal(byte: u8) -> u8 {
    (byte >> 4) * 10 + (byte & 0x0F)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_crc8_check_value() {
        // catalogue check value for "123456789"
        assert_eq!(crc8(b"123456789"), 0xA1);
        assert_eq!(crc8(&[0x00]), 0x00);
    }

    #[test]
    fn test_crc8_detects_single_bit_flips() {
        let span = [0xC0, 0x01, 0x55, 0x03, 0x01, 0x01, 0x3C];
        let reference = crc8(&span);
        for byte in 0..span.len() {
            for bit in 0..8 {
                let mut corrupted = span;
                corrupted[byte] ^= 1 << bit;
                assert_ne!(
                    crc8(&corrupted),
                    reference,
                    "flip of bit {} in byte {} went unnoticed",
                    bit,
                    byte
                );
            }
        }
    }

    #[test]
    fn test_bcd_to_decimal() {
        assert_eq!(bcd_to_decimal(0x23), 23);
        assert_eq!(bcd_to_decimal(0x09), 9);
        assert_eq!(bcd_to_decimal(0x99), 99);
    }
}
