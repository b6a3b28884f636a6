use std::io::{Read, Write};
use std::time::Duration;

use log::{debug, info};
use serialport::SerialPort;

use crate::constants::*;
use crate::error::Result;
use crate::hal::Transport;
use crate::store::RADIO_ADDR_LEN;
use crate::types::CommMode;

/// LoRa modem attached to a serial port
pub struct SerialTransport {
    port: Box<dyn SerialPort>,
    signal_quality: Option<[u8; 2]>,
    address: Option<[u8; RADIO_ADDR_LEN]>,
}

impl SerialTransport {
    /// Open the modem on `port_name`
    pub fn new(port_name: &str, baud_rate: u32) -> Result<Self> {
        let port = serialport::new(port_name, baud_rate)
            .timeout(Duration::from_millis(TIMEOUT_MS))
            .open()?;
        info!("Opened {} at {} baud", port_name, baud_rate);

        Ok(SerialTransport {
            port,
            signal_quality: None,
            address: None,
        })
    }

    /// List available serial ports
    pub fn list_ports() -> Result<Vec<serialport::SerialPortInfo>> {
        Ok(serialport::available_ports()?)
    }

    /// Record the modem's last reported signal quality (BCD bytes)
    pub fn set_signal_quality(&mut self, csq: [u8; 2]) {
        self.signal_quality = Some(csq);
    }

    /// Record the network address the modem reported
    pub fn set_address(&mut self, address: [u8; RADIO_ADDR_LEN]) {
        self.address = Some(address);
    }
}

impl Transport for SerialTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        debug!("Sending:  {}", hex(bytes));
        self.port.write_all(bytes)?;
        self.port.flush()?;
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<u8>> {
        if self.port.bytes_to_read()? == 0 {
            return Ok(None);
        }
        let mut byte = [0u8; 1];
        self.port.read_exact(&mut byte)?;
        Ok(Some(byte[0]))
    }

    fn signal_quality(&mut self) -> Option<[u8; 2]> {
        self.signal_quality
    }

    fn reconfigure(&mut self, mode: CommMode) -> Result<()> {
        info!("Radio comm mode set to {:?}", mode);
        Ok(())
    }

    fn address(&mut self) -> Option<[u8; RADIO_ADDR_LEN]> {
        self.address
    }
}

/// Space separated hex dump for debug logs
pub fn hex(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{:02X}", b))
        .collect::<Vec<_>>()
        .join(" ")
}
