//! Outbound frames: parameter reports, provisioning requests and receipts.
//!
//! Many units answer the same broadcast, so every transmission except an
//! immediate working-parameter receipt first waits a random delay drawn from
//! a per-unit seed.

use log::{debug, info};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::checksum::bcd_to_decimal;
use crate::config::DeviceConfig;
use crate::constants::*;
use crate::error::Result;
use crate::frame::Frame;
use crate::hal::{Delay, Transport};
use crate::motor::StatusReport;
use crate::store::{OpeningSlot, ParameterStore};
use crate::types::{ReceiptStatus, Response, SensorSnapshot};

/// Builds and sends every frame the device originates.
pub struct Receipts {
    device: DeviceConfig,
    mass: bool,
    rng: Option<StdRng>,
    delay: Box<dyn Delay>,
    csq: Option<[u8; 2]>,
}

impl Receipts {
    pub fn new(device: DeviceConfig, delay: Box<dyn Delay>) -> Self {
        Receipts {
            device,
            mass: false,
            rng: None,
            delay,
            csq: None,
        }
    }

    /// Echo the mass flag of the command being answered
    pub fn set_mass(&mut self, mass: bool) {
        self.mass = mass;
    }

    pub fn mass(&self) -> bool {
        self.mass
    }

    /// Random wait in microseconds for a unit with `seed`
    pub fn backoff_us(&mut self, seed: u8) -> u64 {
        let rng = self
            .rng
            .get_or_insert_with(|| StdRng::seed_from_u64(seed as u64));
        let seed = seed as u64;
        rng.random_range(seed * 1000..BACKOFF_PRIMARY_MAX_US)
            + rng.random_range(seed * 100..BACKOFF_SECONDARY_MAX_US)
    }

    fn backoff(&mut self, store: &mut ParameterStore) {
        if !self.device.jittered_backoff {
            return;
        }
        let wait = self.backoff_us(store.random_seed());
        debug!("Backing off {} us", wait);
        self.delay.delay_ms(wait / 1000);
    }

    /// Signal quality as decimal digits, queried once the modem reports it
    fn signal_quality(&mut self, link: &mut dyn Transport) -> [u8; 2] {
        let csq = match self.csq {
            Some(csq) if csq[0] != 0 && csq[1] != 0 => csq,
            _ => {
                let csq = link.signal_quality().unwrap_or_default();
                self.csq = Some(csq);
                csq
            }
        };
        csq.map(bcd_to_decimal)
    }

    fn frame(&self, response: Response, area: u8, payload: Vec<u8>) -> Vec<u8> {
        let mass = if self.mass { WILDCARD } else { 0x00 };
        Frame::new(response as u16, self.device.device_type, mass, area, payload).encode()
    }

    fn send_copies(&mut self, link: &mut dyn Transport, bytes: &[u8], copies: u8) -> Result<()> {
        for copy in 0..copies {
            if copy > 0 {
                self.delay.delay_ms(SEND_COPY_DELAY_MS);
            }
            link.send(bytes)?;
        }
        Ok(())
    }

    /// General parameters (area, groups, SN); doubles as the registration request
    pub fn general_parameters(
        &mut self,
        link: &mut dyn Transport,
        store: &mut ParameterStore,
    ) -> Result<()> {
        self.backoff(store);

        let mut payload = Vec::with_capacity(GENERAL_PARAMETER_LEN as usize);
        payload.extend_from_slice(&store.groups().unwrap_or_default());
        payload.extend_from_slice(&store.serial_number().unwrap_or_default());
        payload.push(REPORT_CHANNEL);
        // collection interval and RTC are not kept by this device
        payload.extend_from_slice(&[0; 2]);
        payload.extend_from_slice(&[0; 7]);
        payload.extend_from_slice(&[0; 8]);

        info!("Reporting general parameters");
        let bytes = self.frame(Response::GeneralParameters, store.area(), payload);
        link.send(&bytes)
    }

    /// Ask the gateway to assign group numbers
    pub fn request_group(&mut self, link: &mut dyn Transport, store: &mut ParameterStore) -> Result<()> {
        self.request(link, store, Response::RequestGroup)
    }

    /// Ask the gateway to assign the SN and area
    pub fn request_serial_number(
        &mut self,
        link: &mut dyn Transport,
        store: &mut ParameterStore,
    ) -> Result<()> {
        self.request(link, store, Response::RequestSn)
    }

    fn request(
        &mut self,
        link: &mut dyn Transport,
        store: &mut ParameterStore,
        response: Response,
    ) -> Result<()> {
        self.backoff(store);
        info!("Requesting {:?}", response);
        let bytes = self.frame(response, store.area(), vec![REPORT_CHANNEL]);
        link.send(&bytes)
    }

    /// Detailed working state: motor status, supply, opening and thresholds
    pub fn working_parameters(
        &mut self,
        link: &mut dyn Transport,
        store: &mut ParameterStore,
        sensors: SensorSnapshot,
        report: StatusReport,
    ) -> Result<()> {
        let StatusReport {
            status,
            random_wait,
            copies,
        } = report;
        if random_wait {
            self.backoff(store);
        }

        let thresholds = store.thresholds();
        let csq = self.signal_quality(link);

        let mut payload = Vec::with_capacity(WORKING_PARAMETER_LEN as usize);
        payload.push(REPORT_CHANNEL);
        payload.push(status as u8);
        payload.extend_from_slice(&sensors.voltage.to_be_bytes());
        payload.extend_from_slice(&csq);
        payload.push(store.opening(OpeningSlot::Realtime).unwrap_or(0xFF));
        payload.extend_from_slice(&(thresholds.low_voltage as u16).to_be_bytes());
        payload.extend_from_slice(&(thresholds.current_multiple as u16).to_be_bytes());
        payload.extend_from_slice(&sensors.current.to_be_bytes());
        payload.push(thresholds.report_interval);
        payload.push(store.comm_mode() as u8);
        payload.push(self.device.soft_version);
        payload.push(self.device.hard_version);
        payload.extend_from_slice(&[0; 5]);

        info!("Working parameter receipt {:?} x{}", status, copies);
        let bytes = self.frame(Response::WorkingParameters, store.area(), payload);
        self.send_copies(link, &bytes, copies)
    }

    /// Acknowledge a command with `status`
    pub fn general(
        &mut self,
        link: &mut dyn Transport,
        store: &mut ParameterStore,
        status: ReceiptStatus,
        copies: u8,
    ) -> Result<()> {
        self.backoff(store);
        let csq = self.signal_quality(link);

        let mut payload = Vec::with_capacity(GENERAL_RECEIPT_LEN as usize);
        payload.push(REPORT_CHANNEL);
        payload.push(status as u8);
        payload.extend_from_slice(&csq);
        payload.extend_from_slice(&[0; 6]);

        info!("General receipt {:?} x{}", status, copies);
        let bytes = self.frame(Response::GeneralReceipt, store.area(), payload);
        self.send_copies(link, &bytes, copies)
    }
}
