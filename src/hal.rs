//! Capability interfaces the control core is built against.
//!
//! The radio modem, EEPROM, ADC, motor bridge and watchdog are external
//! collaborators; the core only sees these traits, so each can be replaced
//! by an in-memory fake.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::store::RADIO_ADDR_LEN;
use crate::types::{CommMode, Drive, SensorSnapshot};

/// Byte transport to the gateway (LoRa modem over UART).
pub trait Transport {
    /// Send a complete frame
    fn send(&mut self, bytes: &[u8]) -> Result<()>;

    /// Next received byte, if one is waiting
    fn receive(&mut self) -> Result<Option<u8>>;

    /// Signal quality as reported by the modem (BCD encoded)
    fn signal_quality(&mut self) -> Option<[u8; 2]> {
        None
    }

    /// Switch the radio to another communication mode
    fn reconfigure(&mut self, _mode: CommMode) -> Result<()> {
        Ok(())
    }

    /// Network address of the modem, once known
    fn address(&mut self) -> Option<[u8; RADIO_ADDR_LEN]> {
        None
    }
}

/// Byte addressed persistent storage.
///
/// Writes only land while write protection is lifted; callers verify by
/// reading back.
pub trait ByteStore {
    fn read_byte(&mut self, addr: u16) -> u8;
    fn write_byte(&mut self, addr: u16, value: u8);
    fn set_write_protect(&mut self, protected: bool);
}

/// Analog inputs and manual key levels.
pub trait Sensors {
    fn sample(&mut self) -> SensorSnapshot;
}

/// H-bridge and manual key enable outputs.
pub trait MotorDriver {
    fn drive(&mut self, drive: Drive);

    /// Route the manual keys to the motor (and their edges to the controller)
    fn set_manual_enabled(&mut self, enabled: bool);
}

/// External supervisor that restarts the device when not fed.
pub trait Watchdog {
    fn feed(&mut self);
}

/// Blocking millisecond delay.
pub trait Delay {
    fn delay_ms(&mut self, ms: u64);
}

/// Watchdog for hosts without a supervisor
#[derive(Debug, Default, Clone, Copy)]
pub struct NoWatchdog;

impl Watchdog for NoWatchdog {
    fn feed(&mut self) {}
}

/// Delay backed by `thread::sleep`
#[derive(Debug, Default, Clone, Copy)]
pub struct StdDelay;

impl Delay for StdDelay {
    fn delay_ms(&mut self, ms: u64) {
        thread::sleep(Duration::from_millis(ms));
    }
}

/// Delay that returns immediately, for simulation and tests
#[derive(Debug, Default, Clone, Copy)]
pub struct NoDelay;

impl Delay for NoDelay {
    fn delay_ms(&mut self, _ms: u64) {}
}

/// In-memory transport standing in for the modem; clones share one link.
///
/// Bytes injected with [`LoopbackTransport::inject`] are what the gateway
/// sent; frames the device sends are collected for inspection.
#[derive(Debug, Clone, Default)]
pub struct LoopbackTransport {
    link: Rc<RefCell<Link>>,
}

#[derive(Debug, Default)]
struct Link {
    inbound: VecDeque<u8>,
    sent: Vec<Vec<u8>>,
    signal_quality: Option<[u8; 2]>,
    mode: Option<CommMode>,
    address: Option<[u8; RADIO_ADDR_LEN]>,
}

impl LoopbackTransport {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue bytes as if received from the gateway
    pub fn inject(&self, bytes: &[u8]) {
        self.link.borrow_mut().inbound.extend(bytes.iter().copied());
    }

    /// Frames sent since the last call
    pub fn take_sent(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.link.borrow_mut().sent)
    }

    pub fn set_signal_quality(&self, csq: [u8; 2]) {
        self.link.borrow_mut().signal_quality = Some(csq);
    }

    pub fn set_address(&self, address: [u8; RADIO_ADDR_LEN]) {
        self.link.borrow_mut().address = Some(address);
    }

    /// Comm mode most recently applied through [`Transport::reconfigure`]
    pub fn comm_mode(&self) -> Option<CommMode> {
        self.link.borrow().mode
    }
}

impl Transport for LoopbackTransport {
    fn send(&mut self, bytes: &[u8]) -> Result<()> {
        self.link.borrow_mut().sent.push(bytes.to_vec());
        Ok(())
    }

    fn receive(&mut self) -> Result<Option<u8>> {
        Ok(self.link.borrow_mut().inbound.pop_front())
    }

    fn signal_quality(&mut self) -> Option<[u8; 2]> {
        self.link.borrow().signal_quality
    }

    fn reconfigure(&mut self, mode: CommMode) -> Result<()> {
        self.link.borrow_mut().mode = Some(mode);
        Ok(())
    }

    fn address(&mut self) -> Option<[u8; RADIO_ADDR_LEN]> {
        self.link.borrow().address
    }
}

/// Manual override key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ManualKey {
    Up,
    Down,
}

/// A debounced edge on a manual key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManualEdge {
    pub key: ManualKey,
    pub pressed: bool,
}

/// Create the channel that carries manual key edges to the controller
pub fn manual_edge_channel() -> (Sender<ManualEdge>, Receiver<ManualEdge>) {
    mpsc::channel()
}

/// Debounces raw key levels into edges, playing the part of the key interrupt.
#[derive(Debug)]
pub struct ManualKeyMonitor {
    sender: Sender<ManualEdge>,
    debounce: Duration,
    keys: [KeyLine; 2],
}

#[derive(Debug, Default, Clone, Copy)]
struct KeyLine {
    stable: bool,
    candidate: bool,
    held: Duration,
}

impl ManualKeyMonitor {
    pub fn new(sender: Sender<ManualEdge>, debounce: Duration) -> Self {
        ManualKeyMonitor {
            sender,
            debounce,
            keys: [KeyLine::default(); 2],
        }
    }

    /// Feed the raw key levels observed `elapsed` after the previous poll
    pub fn poll(&mut self, elapsed: Duration, up: bool, down: bool) {
        for (index, level) in [up, down].into_iter().enumerate() {
            let line = &mut self.keys[index];
            if level != line.candidate {
                line.candidate = level;
                line.held = Duration::ZERO;
                continue;
            }
            if level == line.stable {
                continue;
            }
            line.held += elapsed;
            if line.held >= self.debounce {
                line.stable = level;
                let key = if index == 0 { ManualKey::Up } else { ManualKey::Down };
                // receiver gone means the controller was dropped
                let _ = self.sender.send(ManualEdge {
                    key,
                    pressed: level,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_monitor_emits_edge_after_debounce() {
        let (tx, rx) = manual_edge_channel();
        let mut monitor = ManualKeyMonitor::new(tx, Duration::from_millis(10));

        monitor.poll(Duration::from_millis(5), true, false);
        assert!(rx.try_recv().is_err());
        monitor.poll(Duration::from_millis(5), true, false);
        assert!(rx.try_recv().is_err());
        monitor.poll(Duration::from_millis(5), true, false);
        assert_eq!(
            rx.try_recv().ok(),
            Some(ManualEdge {
                key: ManualKey::Up,
                pressed: true
            })
        );
    }

    #[test]
    fn test_loopback_shares_link_between_clones() {
        let gateway = LoopbackTransport::new();
        let mut device = gateway.clone();

        gateway.inject(&[0xFE, 0xA0]);
        assert_eq!(device.receive().unwrap(), Some(0xFE));
        assert_eq!(device.receive().unwrap(), Some(0xA0));
        assert_eq!(device.receive().unwrap(), None);

        device.send(&[1, 2, 3]).unwrap();
        device.reconfigure(CommMode::Secondary).unwrap();
        assert_eq!(gateway.take_sent(), vec![vec![1, 2, 3]]);
        assert!(gateway.take_sent().is_empty());
        assert_eq!(gateway.comm_mode(), Some(CommMode::Secondary));
    }

    #[test]
    fn test_monitor_ignores_bounce() {
        let (tx, rx) = manual_edge_channel();
        let mut monitor = ManualKeyMonitor::new(tx, Duration::from_millis(10));

        for level in [true, false, true, false, false, false] {
            monitor.poll(Duration::from_millis(2), false, level);
        }
        assert!(rx.try_recv().is_err());
    }
}
