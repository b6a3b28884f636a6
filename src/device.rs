//! The actuator as a whole: boot, the control loop and provisioning.
//!
//! [`Actuator`] owns the radio link, the parameter store and the travel
//! controller, and wires the hardware capabilities between them.

use std::time::Duration;

use chrono::Utc;
use log::{debug, error, info, warn};

use crate::config::ActuatorConfig;
use crate::constants::*;
use crate::error::{ActuatorError, FrameError, Result};
use crate::frame::{Frame, FrameAssembler};
use crate::hal::{
    manual_edge_channel, Delay, ManualKeyMonitor, MotorDriver, NoWatchdog, Sensors, StdDelay,
    Transport, Watchdog,
};
use crate::motor::TravelController;
use crate::protocol::Session;
use crate::receipt::Receipts;
use crate::serial::hex;
use crate::store::{OpeningSlot, ParameterStore};
use crate::types::DeviceSnapshot;

/// Provisioning data checked by the self-check
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Field {
    SerialNumber,
    Groups,
    Area,
}

impl Field {
    fn name(self) -> &'static str {
        match self {
            Field::SerialNumber => "serial number",
            Field::Groups => "group numbers",
            Field::Area => "area number",
        }
    }

    fn present(self, store: &mut ParameterStore) -> bool {
        match self {
            Field::SerialNumber => store.reconcile_serial_numbers(),
            Field::Groups => store.groups().is_some(),
            Field::Area => store.check_area(),
        }
    }
}

/// Main actuator interface
pub struct Actuator {
    config: ActuatorConfig,
    link: Box<dyn Transport>,
    assembler: FrameAssembler,
    store: ParameterStore,
    controller: TravelController,
    keys: ManualKeyMonitor,
    motor: Box<dyn MotorDriver>,
    sensors: Box<dyn Sensors>,
    watchdog: Box<dyn Watchdog>,
    delay: Box<dyn Delay>,
    receipts: Receipts,
    since_self_check: Duration,
}

impl Actuator {
    /// Create an actuator talking to the gateway over `link`
    pub fn new(
        config: ActuatorConfig,
        link: Box<dyn Transport>,
        store: ParameterStore,
        motor: Box<dyn MotorDriver>,
        sensors: Box<dyn Sensors>,
    ) -> Self {
        let (edges_tx, edges_rx) = manual_edge_channel();
        let receipts = Receipts::new(config.device.clone(), Box::new(StdDelay));

        Actuator {
            config,
            link,
            assembler: FrameAssembler::new(),
            store,
            controller: TravelController::new().with_manual_edges(edges_rx),
            keys: ManualKeyMonitor::new(edges_tx, MANUAL_KEY_DEBOUNCE),
            motor,
            sensors,
            watchdog: Box::new(NoWatchdog),
            delay: Box::new(StdDelay),
            receipts,
            since_self_check: Duration::ZERO,
        }
    }

    /// Feed `watchdog` on every poll
    pub fn with_watchdog(mut self, watchdog: Box<dyn Watchdog>) -> Self {
        self.watchdog = watchdog;
        self
    }

    /// Use `delay` for backoff and provisioning waits
    pub fn with_delay<D: Delay + Clone + 'static>(mut self, delay: D) -> Self {
        self.receipts = Receipts::new(self.config.device.clone(), Box::new(delay.clone()));
        self.delay = Box::new(delay);
        self
    }

    pub fn config(&self) -> &ActuatorConfig {
        &self.config
    }

    pub fn controller(&self) -> &TravelController {
        &self.controller
    }

    pub fn store(&mut self) -> &mut ParameterStore {
        &mut self.store
    }

    /// Start-up sequence: restore the radio mode, announce an unregistered
    /// unit and finish a move cut short by power loss
    pub fn boot(&mut self) -> Result<()> {
        info!(
            "Booting actuator {:#06x} (soft {:#04x}, hard {:#04x})",
            self.config.device.device_type,
            self.config.device.soft_version,
            self.config.device.hard_version
        );
        let mode = self.store.comm_mode();
        self.link.reconfigure(mode)?;
        self.record_version();
        self.record_radio_address();

        if !self.store.is_registered() {
            info!("Not registered, announcing to gateway");
            self.receipts
                .general_parameters(&mut *self.link, &mut self.store)?;
        }

        self.controller.resume_interrupted(&mut self.store)?;
        self.apply_outputs();
        self.send_reports()
    }

    /// Running firmware identity: device type, then soft and hard version
    fn running_version(&self) -> [u8; 4] {
        let [hi, lo] = self.config.device.device_type.to_be_bytes();
        [hi, lo, self.config.device.soft_version, self.config.device.hard_version]
    }

    fn record_version(&mut self) {
        let running = self.running_version();
        let stored = self.store.version();
        if stored == running {
            return;
        }
        info!("Firmware changed from {} to {}", hex(&stored), hex(&running));
        if let Err(e) = self.store.save_version(&running) {
            error!("Could not record firmware version: {}", e);
        }
    }

    fn record_radio_address(&mut self) {
        let Some(address) = self.link.address() else {
            return;
        };
        if self.store.is_radio_configured() && self.store.radio_address() == Some(address) {
            return;
        }
        info!("Radio address {}", hex(&address));
        if let Err(e) = self
            .store
            .save_radio_address(&address)
            .and_then(|_| self.store.set_radio_configured(true))
        {
            error!("Could not record radio address: {}", e);
        }
    }

    /// One control iteration, `elapsed` after the previous one.
    ///
    /// Samples the inputs, steps the travel controller, drives the motor and
    /// then services the radio, so a stop command acts on the next poll.
    pub fn poll(&mut self, elapsed: Duration) -> Result<()> {
        self.watchdog.feed();

        let snapshot = self.sensors.sample();
        self.keys
            .poll(elapsed, snapshot.manual_up, snapshot.manual_down);
        self.controller.tick(elapsed, snapshot, &mut self.store);
        self.apply_outputs();
        self.send_reports()?;

        self.service_radio()?;
        self.apply_outputs();
        self.send_reports()?;

        if self.controller.is_busy() {
            return Ok(());
        }
        self.since_self_check += elapsed;
        if self.since_self_check >= self.config.provisioning.self_check_interval() {
            self.since_self_check = Duration::ZERO;
            self.check_provisioning()?;
        }
        Ok(())
    }

    /// Verify serial number, groups and area, asking the gateway for any
    /// that are missing or damaged.
    ///
    /// Gives up with [`ActuatorError::ProvisioningExhausted`] once the retry
    /// budget is spent; the caller is expected to restart the device.
    pub fn check_provisioning(&mut self) -> Result<()> {
        info!("Checking provisioning data");
        for field in [Field::SerialNumber, Field::Groups, Field::Area] {
            self.provision(field)?;
        }
        info!("Provisioning data intact");
        Ok(())
    }

    fn provision(&mut self, field: Field) -> Result<()> {
        let limit = self.config.provisioning.retry_limit;
        let mut attempts = 0;
        while !field.present(&mut self.store) {
            if attempts >= limit {
                error!("{} still missing after {} requests", field.name(), attempts);
                return Err(ActuatorError::ProvisioningExhausted {
                    field: field.name(),
                    attempts,
                });
            }
            attempts += 1;
            warn!(
                "{} missing, requesting from gateway ({}/{})",
                field.name(),
                attempts,
                limit
            );
            match field {
                Field::Groups => self
                    .receipts
                    .request_group(&mut *self.link, &mut self.store)?,
                Field::SerialNumber | Field::Area => self
                    .receipts
                    .request_serial_number(&mut *self.link, &mut self.store)?,
            }
            self.delay.delay_ms(self.config.provisioning.retry_wait_ms);
            self.watchdog.feed();
            self.service_radio()?;
        }
        Ok(())
    }

    /// Drain received bytes, executing every complete frame
    fn service_radio(&mut self) -> Result<()> {
        while let Some(byte) = self.link.receive()? {
            if let Some(raw) = self.assembler.push(byte) {
                self.dispatch(&raw)?;
            }
        }
        Ok(())
    }

    fn dispatch(&mut self, raw: &[u8]) -> Result<()> {
        debug!("Received: {}", hex(raw));
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                warn!("Dropping frame: {}", e);
                return Ok(());
            }
        };

        let result = Session::new(
            &mut self.store,
            &mut self.controller,
            &mut *self.link,
            &mut self.receipts,
            self.config.device.device_type,
        )
        .handle(&frame);

        match result {
            Ok(_) => Ok(()),
            Err(ActuatorError::Frame(e)) => {
                if let FrameError::UnknownFrameId(_) = e {
                    self.assembler.clear();
                }
                debug!("Dropping frame: {}", e);
                Ok(())
            }
            Err(e) => Err(e),
        }
    }

    fn apply_outputs(&mut self) {
        self.motor.drive(self.controller.drive());
        self.motor
            .set_manual_enabled(self.controller.manual_enabled());
    }

    fn send_reports(&mut self) -> Result<()> {
        for report in self.controller.take_reports() {
            self.receipts.working_parameters(
                &mut *self.link,
                &mut self.store,
                self.controller.snapshot(),
                report,
            )?;
        }
        Ok(())
    }

    /// Current state for monitoring
    pub fn snapshot(&mut self) -> DeviceSnapshot {
        let sensors = self.controller.snapshot();
        DeviceSnapshot {
            timestamp: Utc::now(),
            status: self.controller.status(),
            state: format!("{:?}", self.controller.state()),
            registered: self.store.is_registered(),
            calibrated: self.store.is_calibrated(),
            travel_secs: self.store.travel_time(),
            last_opening: self.store.opening(OpeningSlot::Last),
            target_opening: self.store.opening(OpeningSlot::Target),
            realtime_opening: self.store.opening(OpeningSlot::Realtime),
            area: self.store.area(),
            groups: self.store.groups(),
            thresholds: self.store.thresholds(),
            comm_mode: self.store.comm_mode(),
            current: sensors.current,
            voltage: sensors.voltage,
            manual_key_fault: self.controller.manual_key_fault(),
        }
    }
}
