//! Frame encoding, parsing and stream synchronisation.
//!
//! Every frame, in both directions, has the layout
//!
//! ```text
//! [0]      0xFE             header
//! [1..2]   frame-ID         big-endian
//! [3]      N                declared span length
//! [4..5]   device type      big-endian
//! [6]      mass flag
//! [7]      area
//! [8..4+N] payload
//! [4+N]    CRC8 over [4..4+N)
//! [..]     0D 0A 0D 0A 0D 0A
//! ```

use log::{debug, warn};

use crate::checksum::crc8;
use crate::constants::*;
use crate::error::FrameError;

/// A frame with its header fields split out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    pub frame_id: u16,
    pub device_type: u16,
    pub mass: u8,
    pub area: u8,
    pub payload: Vec<u8>,
}

impl Frame {
    /// Build a frame; the declared length is derived from the payload
    pub fn new(frame_id: u16, device_type: u16, mass: u8, area: u8, payload: Vec<u8>) -> Self {
        Frame {
            frame_id,
            device_type,
            mass,
            area,
            payload,
        }
    }

    /// Declared span length (device type through payload)
    pub fn declared_len(&self) -> usize {
        FRAME_FIXED_SPAN + self.payload.len()
    }

    /// Whether the mass command marker is set
    pub fn is_mass(&self) -> bool {
        self.mass == WILDCARD
    }

    /// Serialize the frame, computing its CRC
    pub fn encode(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(FRAME_MIN_LEN + self.payload.len());
        bytes.push(FRAME_HEADER);
        bytes.extend_from_slice(&self.frame_id.to_be_bytes());
        bytes.push(self.declared_len() as u8);
        bytes.extend_from_slice(&self.device_type.to_be_bytes());
        bytes.push(self.mass);
        bytes.push(self.area);
        bytes.extend_from_slice(&self.payload);
        let crc = crc8(&bytes[FRAME_CRC_START..]);
        bytes.push(crc);
        bytes.extend_from_slice(&FRAME_TERMINATOR);
        bytes
    }

    /// Parse and CRC-check a complete frame, terminator included
    pub fn parse(raw: &[u8]) -> Result<Self, FrameError> {
        if raw.len() < FRAME_MIN_LEN {
            return Err(FrameError::TooShort { length: raw.len() });
        }
        if raw[0] != FRAME_HEADER {
            return Err(FrameError::BadHeader(raw[0]));
        }

        let declared = raw[3];
        let span_end = FRAME_CRC_START + declared as usize;
        let check_at = raw.len() - FRAME_TERMINATOR.len() - 1;
        if (declared as usize) < FRAME_FIXED_SPAN
            || span_end != check_at
            || !raw.ends_with(&FRAME_TERMINATOR)
        {
            return Err(FrameError::BadLength {
                declared,
                length: raw.len(),
            });
        }

        let expected = crc8(&raw[FRAME_CRC_START..span_end]);
        let actual = raw[check_at];
        if expected != actual {
            return Err(FrameError::CrcMismatch { expected, actual });
        }

        Ok(Frame {
            frame_id: u16::from_be_bytes([raw[1], raw[2]]),
            device_type: u16::from_be_bytes([raw[4], raw[5]]),
            mass: raw[6],
            area: raw[7],
            payload: raw[FRAME_PAYLOAD_START..span_end].to_vec(),
        })
    }
}

/// Accumulates received bytes until a terminator closes a frame.
#[derive(Debug, Default)]
pub struct FrameAssembler {
    buffer: Vec<u8>,
    matched: usize,
}

impl FrameAssembler {
    pub fn new() -> Self {
        FrameAssembler {
            buffer: Vec::with_capacity(RECEIVE_BUFFER_CAP),
            matched: 0,
        }
    }

    /// Bytes currently buffered
    pub fn pending(&self) -> usize {
        self.buffer.len()
    }

    /// Drop anything buffered
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.matched = 0;
    }

    /// Feed one byte; returns the raw frame once its terminator completes.
    ///
    /// Leading bytes before the first header are discarded. Overflowing the
    /// buffer throws away the partial frame.
    pub fn push(&mut self, byte: u8) -> Option<Vec<u8>> {
        if self.buffer.len() >= RECEIVE_BUFFER_CAP {
            warn!("Receive buffer overflow, dropping {} bytes", self.buffer.len());
            self.clear();
        }
        self.buffer.push(byte);

        if byte == FRAME_TERMINATOR[self.matched] {
            self.matched += 1;
        } else {
            self.matched = usize::from(byte == FRAME_TERMINATOR[0]);
        }
        if self.matched < FRAME_TERMINATOR.len() {
            return None;
        }

        self.matched = 0;
        let raw = std::mem::take(&mut self.buffer);
        match raw.iter().position(|&b| b == FRAME_HEADER) {
            Some(0) => Some(raw),
            Some(start) => {
                debug!("Discarding {} bytes of noise before header", start);
                Some(raw[start..].to_vec())
            }
            None => {
                debug!("Terminator without header, dropping {} bytes", raw.len());
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stop_frame() -> Frame {
        Frame::new(0xA015, DEVICE_TYPE_ID, 0x00, 0x03, vec![0x02, 0x01])
    }

    #[test]
    fn test_encode_layout() {
        let bytes = stop_frame().encode();
        assert_eq!(bytes[0], FRAME_HEADER);
        assert_eq!(&bytes[1..3], &[0xA0, 0x15]);
        assert_eq!(bytes[3], 6);
        assert_eq!(&bytes[4..6], &[0xC0, 0x01]);
        assert_eq!(bytes[10], crc8(&bytes[4..10]));
        assert_eq!(&bytes[11..], &FRAME_TERMINATOR);
    }

    #[test]
    fn test_parse_accepts_encoded_frame() {
        let frame = stop_frame();
        assert_eq!(Frame::parse(&frame.encode()), Ok(frame));
    }

    #[test]
    fn test_parse_rejects_flipped_crc() {
        let mut bytes = stop_frame().encode();
        bytes[10] ^= 0x01;
        assert!(matches!(
            Frame::parse(&bytes),
            Err(FrameError::CrcMismatch { .. })
        ));
    }

    #[test]
    fn test_parse_rejects_wrong_declared_length() {
        let mut bytes = stop_frame().encode();
        bytes[3] = 7;
        assert!(matches!(
            Frame::parse(&bytes),
            Err(FrameError::BadLength { declared: 7, .. })
        ));
    }

    #[test]
    fn test_assembler_resynchronises_after_noise() {
        let frame = stop_frame();
        let mut stream = vec![0x13, 0x37, 0x0D, 0x0A, 0x00];
        stream.extend(frame.encode());

        let mut assembler = FrameAssembler::new();
        let completed: Vec<Vec<u8>> = stream.into_iter().filter_map(|b| assembler.push(b)).collect();

        assert_eq!(completed.len(), 1);
        assert_eq!(completed[0], frame.encode());
        assert_eq!(assembler.pending(), 0);
    }

    #[test]
    fn test_assembler_handles_back_to_back_frames() {
        let first = stop_frame();
        let second = Frame::new(0xA014, DEVICE_TYPE_ID, 0x00, 0x03, vec![0x01]);
        let mut assembler = FrameAssembler::new();
        let mut completed = Vec::new();
        for byte in first.encode().into_iter().chain(second.encode()) {
            if let Some(raw) = assembler.push(byte) {
                completed.push(Frame::parse(&raw));
            }
        }
        assert_eq!(completed, vec![Ok(first), Ok(second)]);
    }

    #[test]
    fn test_assembler_overflow_discards_partial_frame() {
        let mut assembler = FrameAssembler::new();
        for _ in 0..RECEIVE_BUFFER_CAP {
            assert!(assembler.push(0x11).is_none());
        }
        let frame = stop_frame();
        let mut completed = None;
        for byte in frame.encode() {
            if let Some(raw) = assembler.push(byte) {
                completed = Some(raw);
            }
        }
        assert_eq!(completed, Some(frame.encode()));
    }
}
