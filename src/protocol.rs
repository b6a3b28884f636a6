//! Inbound command validation and dispatch.
//!
//! A CRC-checked [`Frame`] is matched to a [`Command`], passed through the
//! device-type, length, area and group checks, and handed to its handler.
//! Rejected frames come back as [`FrameError`]s for the caller to log; no
//! reply is sent for them.

use log::{debug, error, info, warn};

use crate::constants::*;
use crate::error::{ActuatorError, FrameError, Result, StoreError};
use crate::frame::Frame;
use crate::hal::Transport;
use crate::motor::{StatusReport, TravelController};
use crate::receipt::Receipts;
use crate::store::{OpeningSlot, ParameterStore, GROUP_SLOTS, SN_LEN, THRESHOLD_LEN};
use crate::types::{CommMode, Command, Direction, MotorStatus, OpeningTarget, ReceiptStatus};

/// Whether a frame addressed to `device_type` is for this product
pub fn accepts_device_type(device_type: u16, own: u16) -> bool {
    device_type == own || device_type == BROADCAST_DEVICE_TYPE
}

/// Area filter. An unset local area (0) accepts every area.
pub fn area_matches(mass: bool, area: u8, local: u8) -> bool {
    mass || area == WILDCARD || local == 0 || area == local
}

/// Group filter. Unassigned (all zero) or unreadable local groups accept
/// every group.
pub fn group_matches(mass: bool, group: u8, local: Option<[u8; GROUP_SLOTS]>) -> bool {
    if mass || group == WILDCARD {
        return true;
    }
    match local {
        Some(slots) => slots == [0; GROUP_SLOTS] || slots.contains(&group),
        None => true,
    }
}

/// Everything a command handler touches, borrowed for one frame.
pub struct Session<'a> {
    store: &'a mut ParameterStore,
    controller: &'a mut TravelController,
    link: &'a mut dyn Transport,
    receipts: &'a mut Receipts,
    device_type: u16,
}

impl<'a> Session<'a> {
    pub fn new(
        store: &'a mut ParameterStore,
        controller: &'a mut TravelController,
        link: &'a mut dyn Transport,
        receipts: &'a mut Receipts,
        device_type: u16,
    ) -> Self {
        Session {
            store,
            controller,
            link,
            receipts,
            device_type,
        }
    }

    /// Validate and execute one frame.
    ///
    /// Returns the executed command, `None` when an unregistered unit ignores
    /// it, or the reason the frame was rejected.
    pub fn handle(&mut self, frame: &Frame) -> Result<Option<Command>> {
        let command = Command::from_frame_id(frame.frame_id)
            .ok_or(FrameError::UnknownFrameId(frame.frame_id))?;

        if command != Command::SetSnAreaChannel && !self.store.is_registered() {
            debug!("Unregistered, ignoring {:?}", command);
            return Ok(None);
        }
        self.validate(frame, command)?;

        debug!("Executing {:?}", command);
        let payload = &frame.payload;
        match command {
            Command::QueryWorkingParameters => self.query_parameters(payload)?,
            Command::SetGroupNumber => self.set_groups(payload)?,
            Command::SetSnAreaChannel => self.set_serial_number(frame.area, payload)?,
            Command::QueryStatus => self.working(true, 1)?,
            Command::StopWork => self.stop()?,
            Command::ResetTravel => self.reset_travel()?,
            Command::SetOpening => self.set_opening(payload[2])?,
            Command::SetThresholds => self.set_thresholds(payload)?,
        }
        Ok(Some(command))
    }

    fn validate(&mut self, frame: &Frame, command: Command) -> std::result::Result<(), FrameError> {
        if !accepts_device_type(frame.device_type, self.device_type) {
            return Err(FrameError::DeviceType(frame.device_type));
        }
        self.receipts.set_mass(frame.is_mass());

        let rule = command.rule();
        if frame.declared_len() != rule.length as usize {
            return Err(FrameError::PayloadLength {
                frame_id: frame.frame_id,
                expected: rule.length,
                actual: frame.declared_len() as u8,
            });
        }
        if rule.area_filter && !area_matches(frame.is_mass(), frame.area, self.store.area()) {
            return Err(FrameError::Area(frame.area));
        }
        if rule.group_filter {
            let group = frame.payload[0];
            if !group_matches(frame.is_mass(), group, self.store.groups()) {
                return Err(FrameError::Group(group));
            }
        }
        Ok(())
    }

    fn general(&mut self, status: ReceiptStatus, copies: u8) -> Result<()> {
        self.receipts
            .general(&mut *self.link, &mut *self.store, status, copies)
    }

    fn working(&mut self, random_wait: bool, copies: u8) -> Result<()> {
        let report = StatusReport {
            status: self.controller.status(),
            random_wait,
            copies,
        };
        self.receipts.working_parameters(
            &mut *self.link,
            &mut *self.store,
            self.controller.snapshot(),
            report,
        )
    }

    fn store_fault(&mut self, err: StoreError) {
        error!("Store fault: {}", err);
        self.controller.set_status(MotorStatus::StoreException);
    }

    fn query_parameters(&mut self, payload: &[u8]) -> Result<()> {
        if payload[0] != SET_COMM_MODE_INTENT {
            return self
                .receipts
                .general_parameters(&mut *self.link, &mut *self.store);
        }

        let mode = match CommMode::try_from(payload[11]) {
            Ok(mode) => mode,
            Err(byte) => {
                warn!("Unknown comm mode {:#04x}", byte);
                return self.general(ReceiptStatus::SetLoRaModeErr, 2);
            }
        };
        if let Err(e) = self.store.save_comm_mode(mode) {
            error!("Could not save comm mode: {}", e);
            return self.general(ReceiptStatus::SetLoRaModeErr, 2);
        }
        self.general(ReceiptStatus::SetLoRaModeOk, 1)?;
        self.link.reconfigure(mode)?;
        self.working(true, 2)
    }

    fn set_groups(&mut self, payload: &[u8]) -> Result<()> {
        let mut groups = [0u8; GROUP_SLOTS];
        groups.copy_from_slice(&payload[..GROUP_SLOTS]);
        match self.store.save_groups(&groups) {
            Ok(()) => {
                info!("Groups set to {:?}", groups);
                self.general(ReceiptStatus::AssignGroupIdArrayOk, 2)
            }
            Err(e) => {
                self.store_fault(e);
                self.general(ReceiptStatus::AssignGroupIdArrayErr, 1)
            }
        }
    }

    fn set_serial_number(&mut self, area: u8, payload: &[u8]) -> Result<()> {
        let mut sn = [0u8; SN_LEN];
        sn.copy_from_slice(&payload[2..2 + SN_LEN]);
        let saved = self
            .store
            .save_serial_number(&sn)
            .and_then(|_| self.store.save_area(area));
        if let Err(e) = saved {
            self.store_fault(e);
            return self.general(ReceiptStatus::SetSnAndSlaverCountErr, 1);
        }

        info!("Registered with area {}", area);
        self.general(ReceiptStatus::SetSnAndSlaverCountOk, 1)?;
        if let Err(e) = self.store.set_registered(true) {
            self.store_fault(e);
        }
        Ok(())
    }

    fn stop(&mut self) -> Result<()> {
        self.controller.request_stop();
        self.general(ReceiptStatus::TurnOffOk, 1)?;
        self.controller.set_manual_enabled(true);
        Ok(())
    }

    fn reset_travel(&mut self) -> Result<()> {
        if self.controller.manual_key_fault() {
            warn!("Manual key circuit fault, reset refused");
            return Ok(());
        }
        if self.controller.is_busy() {
            info!("Travel in progress, reset ignored");
            return Ok(());
        }
        if self.controller.manual_detected() {
            info!("Manual roll in progress, reset ignored");
            return Ok(());
        }

        self.controller.set_manual_enabled(false);
        let result = match self.general(ReceiptStatus::ResetRollerOk, 1) {
            Ok(()) => self.controller.start_calibration(self.store, None),
            Err(e) => Err(e),
        };
        self.controller.release_manual();
        result
    }

    fn set_opening(&mut self, byte: u8) -> Result<()> {
        if self.controller.manual_key_fault() {
            warn!("Manual key circuit fault, opening refused");
            self.controller.set_status(MotorStatus::ManualKeyException);
            return self.working(false, 2);
        }
        if self.controller.manual_detected() {
            info!("Manual roll in progress, opening ignored");
            return Ok(());
        }
        if self.controller.is_busy() {
            info!("Travel in progress, opening ignored");
            return Ok(());
        }

        self.controller.set_manual_enabled(false);
        let result = self.start_opening(byte);
        self.controller.release_manual();
        result
    }

    fn start_opening(&mut self, byte: u8) -> Result<()> {
        self.general(ReceiptStatus::OpenRollerOk, 1)?;

        let percent = match OpeningTarget::decode(byte) {
            Some(OpeningTarget::ForceClose) => {
                return self.controller.start_forced(self.store, Direction::Close)
            }
            Some(OpeningTarget::ForceOpen) => {
                return self.controller.start_forced(self.store, Direction::Open)
            }
            Some(OpeningTarget::Percent(percent)) => percent,
            None => {
                warn!("{}", ActuatorError::InvalidOpening(byte));
                self.controller.set_status(MotorStatus::CmdException);
                return self.working(false, 2);
            }
        };

        let calibrated = self.store.is_calibrated();
        if !calibrated {
            if let Some(direction) = Direction::toward(percent) {
                info!("Travel not calibrated, forcing {:?} to {}%", direction, percent);
                return self.controller.start_forced(self.store, direction);
            }
        }
        if self.store.opening(OpeningSlot::Realtime) == Some(percent) {
            info!("Already at {}%", percent);
            self.controller.set_status(MotorStatus::RollOk);
            return self.working(true, 2);
        }
        if !calibrated {
            info!("Calibrating before moving to {}%", percent);
            return self.controller.start_calibration(self.store, Some(percent));
        }

        if let Err(e) = self.store.save_opening(OpeningSlot::Target, percent) {
            self.store_fault(e);
            return self.working(false, 2);
        }
        self.controller.start_positioning(self.store)
    }

    fn set_thresholds(&mut self, payload: &[u8]) -> Result<()> {
        let mut block = [0u8; THRESHOLD_LEN];
        block.copy_from_slice(&payload[2..2 + THRESHOLD_LEN]);
        match self.store.save_thresholds(&block) {
            Ok(()) => {
                info!("Thresholds set to {:?}", self.store.thresholds());
                self.general(ReceiptStatus::LimitRollerOk, 1)
            }
            Err(e) => {
                self.general(ReceiptStatus::LimitRollerErr, 1)?;
                self.store_fault(e);
                self.working(false, 2)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::DeviceConfig;
    use crate::hal::{LoopbackTransport, NoDelay};
    use crate::motor::TravelState;
    use crate::store::MemoryStore;

    const SN: &[u8; SN_LEN] = b"RF2024001";

    struct Bench {
        store: ParameterStore,
        eeprom: MemoryStore,
        controller: TravelController,
        link: LoopbackTransport,
        receipts: Receipts,
    }

    impl Bench {
        fn unregistered() -> Self {
            let (store, eeprom, _) = ParameterStore::in_memory();
            let device = DeviceConfig {
                jittered_backoff: false,
                ..DeviceConfig::default()
            };
            Bench {
                store,
                eeprom,
                controller: TravelController::new(),
                link: LoopbackTransport::new(),
                receipts: Receipts::new(device, Box::new(NoDelay)),
            }
        }

        /// Registered unit in area 3, groups 1 and 2
        fn new() -> Self {
            let mut bench = Self::unregistered();
            bench.store.save_serial_number(SN).unwrap();
            bench.store.save_area(3).unwrap();
            bench.store.save_groups(&[1, 2, 0, 0, 0]).unwrap();
            bench.store.set_registered(true).unwrap();
            bench
        }

        fn calibrated(mut self, last: u8) -> Self {
            self.store.save_travel_time(100).unwrap();
            self.store.save_all_openings(last).unwrap();
            self.store.set_calibrated(true).unwrap();
            self
        }

        fn handle(&mut self, frame: Frame) -> Result<Option<Command>> {
            let mut link = self.link.clone();
            Session::new(
                &mut self.store,
                &mut self.controller,
                &mut link,
                &mut self.receipts,
                DEVICE_TYPE_ID,
            )
            .handle(&frame)
        }

        fn sent(&self) -> Vec<Frame> {
            self.link
                .take_sent()
                .iter()
                .map(|raw| Frame::parse(raw).unwrap())
                .collect()
        }

        /// Receipt status bytes of the general receipts sent
        fn acks(frames: &[Frame]) -> Vec<u8> {
            frames
                .iter()
                .filter(|f| f.frame_id == 0xE015)
                .map(|f| f.payload[1])
                .collect()
        }
    }

    fn command(id: u16, area: u8, payload: Vec<u8>) -> Frame {
        Frame::new(id, DEVICE_TYPE_ID, 0x00, area, payload)
    }

    fn opening(value: u8) -> Frame {
        command(0xA021, 3, vec![1, 1, value])
    }

    #[test]
    fn test_area_filter() {
        assert!(area_matches(false, 3, 3));
        assert!(area_matches(false, WILDCARD, 3));
        assert!(area_matches(false, 9, 0));
        assert!(area_matches(true, 9, 3));
        assert!(!area_matches(false, 9, 3));
    }

    #[test]
    fn test_group_filter() {
        let local = Some([4, 7, 0, 0, 0]);
        assert!(group_matches(false, 7, local));
        assert!(group_matches(false, WILDCARD, local));
        assert!(group_matches(false, 9, Some([0; 5])));
        assert!(group_matches(false, 9, None));
        assert!(group_matches(true, 9, local));
        assert!(!group_matches(false, 9, local));
    }

    #[test]
    fn test_device_type_filter() {
        assert!(accepts_device_type(0xC001, DEVICE_TYPE_ID));
        assert!(accepts_device_type(0x5555, DEVICE_TYPE_ID));
        assert!(!accepts_device_type(0xC002, DEVICE_TYPE_ID));
    }

    #[test]
    fn test_unregistered_unit_ignores_commands() {
        let mut bench = Bench::unregistered();
        let result = bench.handle(command(0xA014, 3, vec![1])).unwrap();
        assert_eq!(result, None);
        assert!(bench.sent().is_empty());
    }

    #[test]
    fn test_set_serial_number_registers_unit() {
        let mut bench = Bench::unregistered();
        let mut payload = vec![0x01, 0x00];
        payload.extend_from_slice(SN);

        let result = bench.handle(command(0xA013, 5, payload)).unwrap();

        assert_eq!(result, Some(Command::SetSnAreaChannel));
        assert_eq!(bench.store.serial_number(), Some(*SN));
        assert_eq!(bench.store.backup_serial_number(), Some(*SN));
        assert_eq!(bench.store.area(), 5);
        assert!(bench.store.is_registered());
        assert_eq!(
            Bench::acks(&bench.sent()),
            vec![ReceiptStatus::SetSnAndSlaverCountOk as u8]
        );
    }

    #[test]
    fn test_failed_serial_number_write_reports_error() {
        let mut bench = Bench::unregistered();
        bench.eeprom.stick(SN_ADDR);
        let mut payload = vec![0x01, 0x00];
        payload.extend_from_slice(SN);

        bench.handle(command(0xA013, 5, payload)).unwrap();

        assert!(!bench.store.is_registered());
        assert_eq!(bench.controller.status(), MotorStatus::StoreException);
        assert_eq!(
            Bench::acks(&bench.sent()),
            vec![ReceiptStatus::SetSnAndSlaverCountErr as u8]
        );
    }

    #[test]
    fn test_unknown_frame_id_rejected() {
        let mut bench = Bench::new();
        let result = bench.handle(command(0xA099, 3, vec![1]));
        assert!(matches!(
            result,
            Err(ActuatorError::Frame(FrameError::UnknownFrameId(0xA099)))
        ));
    }

    #[test]
    fn test_wrong_length_rejected() {
        let mut bench = Bench::new();
        let result = bench.handle(command(0xA014, 3, vec![1, 2]));
        assert!(matches!(
            result,
            Err(ActuatorError::Frame(FrameError::PayloadLength { expected: 5, actual: 6, .. }))
        ));
        assert!(bench.sent().is_empty());
    }

    #[test]
    fn test_other_area_and_group_rejected() {
        let mut bench = Bench::new();
        assert!(matches!(
            bench.handle(command(0xA014, 4, vec![1])),
            Err(ActuatorError::Frame(FrameError::Area(4)))
        ));
        assert!(matches!(
            bench.handle(command(0xA015, 3, vec![9, 1])),
            Err(ActuatorError::Frame(FrameError::Group(9)))
        ));
        assert!(bench.sent().is_empty());
    }

    #[test]
    fn test_broadcast_reaches_every_unit() {
        let mut bench = Bench::new();
        let frame = Frame::new(0xA014, BROADCAST_DEVICE_TYPE, WILDCARD, 0x21, vec![1]);
        assert_eq!(bench.handle(frame).unwrap(), Some(Command::QueryStatus));

        let sent = bench.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame_id, 0xE014);
        assert_eq!(sent[0].mass, WILDCARD);
    }

    #[test]
    fn test_set_groups() {
        let mut bench = Bench::new();
        bench
            .handle(command(0xA012, 3, vec![5, 6, 7, 0, 0, 1]))
            .unwrap();
        assert_eq!(bench.store.groups(), Some([5, 6, 7, 0, 0]));
        assert_eq!(
            Bench::acks(&bench.sent()),
            vec![ReceiptStatus::AssignGroupIdArrayOk as u8; 2]
        );
    }

    #[test]
    fn test_query_reports_general_parameters() {
        let mut bench = Bench::new();
        bench.handle(command(0xA011, 3, vec![0; 19])).unwrap();
        let sent = bench.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].frame_id, 0xE011);
        assert_eq!(&sent[0].payload[5..14], SN);
    }

    #[test]
    fn test_query_with_intent_switches_comm_mode() {
        let mut bench = Bench::new();
        let mut payload = vec![0; 19];
        payload[0] = SET_COMM_MODE_INTENT;
        payload[11] = 0xF1;

        bench.handle(command(0xA011, 3, payload)).unwrap();

        assert_eq!(bench.store.comm_mode(), CommMode::Secondary);
        assert_eq!(bench.link.comm_mode(), Some(CommMode::Secondary));
        let sent = bench.sent();
        assert_eq!(Bench::acks(&sent), vec![ReceiptStatus::SetLoRaModeOk as u8]);
        assert_eq!(sent.iter().filter(|f| f.frame_id == 0xE014).count(), 2);
    }

    #[test]
    fn test_query_with_bad_comm_mode_refused() {
        let mut bench = Bench::new();
        let mut payload = vec![0; 19];
        payload[0] = SET_COMM_MODE_INTENT;
        payload[11] = 0x33;

        bench.handle(command(0xA011, 3, payload)).unwrap();

        assert_eq!(bench.store.comm_mode(), CommMode::Primary);
        assert_eq!(
            Bench::acks(&bench.sent()),
            vec![ReceiptStatus::SetLoRaModeErr as u8; 2]
        );
    }

    #[test]
    fn test_set_thresholds() {
        let mut bench = Bench::new();
        bench
            .handle(command(0xA022, 3, vec![1, 1, 0, 25, 0, 15, 6]))
            .unwrap();
        let thresholds = bench.store.thresholds();
        assert_eq!(thresholds.low_voltage, 25);
        assert_eq!(thresholds.current_multiple, 15);
        assert_eq!(thresholds.report_interval, 6);
        assert_eq!(
            Bench::acks(&bench.sent()),
            vec![ReceiptStatus::LimitRollerOk as u8]
        );
    }

    #[test]
    fn test_uncalibrated_full_open_forces_travel() {
        let mut bench = Bench::new();
        bench.handle(opening(100)).unwrap();
        assert_eq!(bench.controller.state(), TravelState::ForcedTravel);
        assert!(!bench.controller.manual_enabled());
        assert_eq!(
            Bench::acks(&bench.sent()),
            vec![ReceiptStatus::OpenRollerOk as u8]
        );
    }

    #[test]
    fn test_uncalibrated_mid_opening_calibrates_first() {
        let mut bench = Bench::new();
        bench.handle(opening(40)).unwrap();
        assert_eq!(bench.controller.state(), TravelState::Calibrating);
    }

    #[test]
    fn test_calibrated_opening_starts_positioning() {
        let mut bench = Bench::new().calibrated(20);
        bench.handle(opening(60)).unwrap();
        assert_eq!(bench.controller.state(), TravelState::Positioning);
        assert_eq!(bench.store.opening(OpeningSlot::Target), Some(60));
        assert_eq!(bench.controller.planned_duration(), Some(40));
    }

    #[test]
    fn test_opening_already_reached_reports_ok() {
        let mut bench = Bench::new().calibrated(60);
        bench.handle(opening(60)).unwrap();

        assert!(!bench.controller.is_busy());
        assert!(bench.controller.manual_enabled());
        assert_eq!(bench.controller.status(), MotorStatus::RollOk);
        let sent = bench.sent();
        assert_eq!(sent.iter().filter(|f| f.frame_id == 0xE014).count(), 2);
    }

    #[test]
    fn test_force_bytes_ignore_calibration() {
        let mut bench = Bench::new().calibrated(60);
        bench.handle(opening(FORCE_CLOSE)).unwrap();
        assert_eq!(bench.controller.state(), TravelState::ForcedTravel);
        assert_eq!(bench.controller.drive(), crate::types::Drive::Run(Direction::Close));
    }

    #[test]
    fn test_invalid_opening_byte_reports_command_exception() {
        let mut bench = Bench::new().calibrated(60);
        bench.handle(opening(0x80)).unwrap();

        assert!(!bench.controller.is_busy());
        assert_eq!(bench.controller.status(), MotorStatus::CmdException);
        let sent = bench.sent();
        assert_eq!(sent.last().map(|f| f.payload[1]), Some(MotorStatus::CmdException as u8));
    }

    #[test]
    fn test_opening_ignored_while_busy() {
        let mut bench = Bench::new().calibrated(20);
        bench.handle(opening(60)).unwrap();
        bench.sent();

        bench.handle(opening(80)).unwrap();
        assert!(bench.sent().is_empty());
        assert_eq!(bench.store.opening(OpeningSlot::Target), Some(60));
    }

    #[test]
    fn test_stop_requests_force_stop() {
        let mut bench = Bench::new().calibrated(20);
        bench.handle(opening(60)).unwrap();
        bench.sent();

        bench.handle(command(0xA015, 3, vec![2, 1])).unwrap();

        assert!(bench.controller.flags().stop_requested);
        assert!(bench.controller.manual_enabled());
        assert_eq!(
            Bench::acks(&bench.sent()),
            vec![ReceiptStatus::TurnOffOk as u8]
        );
    }

    #[test]
    fn test_reset_starts_calibration() {
        let mut bench = Bench::new().calibrated(20);
        bench.handle(command(0xA020, 3, vec![1, 1])).unwrap();

        assert_eq!(bench.controller.state(), TravelState::Calibrating);
        assert!(!bench.store.is_calibrated());
        assert!(!bench.controller.manual_enabled());
        assert_eq!(
            Bench::acks(&bench.sent()),
            vec![ReceiptStatus::ResetRollerOk as u8]
        );
    }

    #[test]
    fn test_reset_store_fault_releases_manual_keys() {
        let mut bench = Bench::new().calibrated(20);
        bench.eeprom.stick(ROUTE_FLAG_ADDR);
        bench.handle(command(0xA020, 3, vec![1, 1])).unwrap();

        assert!(!bench.controller.is_busy());
        assert!(bench.controller.manual_enabled());
        assert_eq!(bench.controller.status(), MotorStatus::StoreException);
    }

    #[test]
    fn test_reset_ignored_while_busy() {
        let mut bench = Bench::new().calibrated(20);
        bench.handle(opening(60)).unwrap();
        bench.sent();

        bench.handle(command(0xA020, 3, vec![1, 1])).unwrap();
        assert_eq!(bench.controller.state(), TravelState::Positioning);
        assert!(bench.sent().is_empty());
    }
}
