use std::time::Duration;

use roller_actuator::config::ProvisioningConfig;
use roller_actuator::constants::{BROADCAST_DEVICE_TYPE, DEVICE_TYPE_ID, WILDCARD};
use roller_actuator::frame::Frame;
use roller_actuator::hal::{LoopbackTransport, ManualKey, NoDelay};
use roller_actuator::motor::TravelState;
use roller_actuator::sim::SimulatedRoller;
use roller_actuator::store::{MemoryStore, OpeningSlot, ParameterStore};
use roller_actuator::{Actuator, ActuatorConfig, MotorStatus, ReceiptStatus};

const PERIOD: Duration = Duration::from_millis(100);
const SN: &[u8; 9] = b"RF2024001";
const AREA: u8 = 3;

/// Actuator on a simulated roller, with the gateway end of the link
struct Site {
    actuator: Actuator,
    gateway: LoopbackTransport,
    roller: SimulatedRoller,
    eeprom: MemoryStore,
}

impl Site {
    /// Fresh, unregistered unit on a roller whose full travel takes `travel_secs`
    fn new(travel_secs: f64) -> Self {
        let (store, eeprom, _) = ParameterStore::in_memory();
        let mut config = ActuatorConfig::default();
        config.device.jittered_backoff = false;
        config.provisioning = ProvisioningConfig {
            retry_limit: 2,
            retry_wait_ms: 0,
            self_check_interval_secs: 24 * 60 * 60,
        };

        let gateway = LoopbackTransport::new();
        let roller = SimulatedRoller::new(200.0, 200.0 / travel_secs);
        let actuator = Actuator::new(
            config,
            Box::new(gateway.clone()),
            store,
            Box::new(roller.clone()),
            Box::new(roller.clone()),
        )
        .with_delay(NoDelay);

        Site {
            actuator,
            gateway,
            roller,
            eeprom,
        }
    }

    /// Registered unit in area 3, group 1
    fn registered(travel_secs: f64) -> Self {
        let mut site = Self::new(travel_secs);
        let store = site.actuator.store();
        store.save_serial_number(SN).unwrap();
        store.save_area(AREA).unwrap();
        store.save_groups(&[1, 0, 0, 0, 0]).unwrap();
        store.set_registered(true).unwrap();
        site
    }

    /// Registered and calibrated to `total` seconds, resting at `opening`
    fn calibrated(travel_secs: f64, total: u16, opening: u8) -> Self {
        let mut site = Self::registered(travel_secs);
        let store = site.actuator.store();
        store.save_travel_time(total).unwrap();
        store.save_all_openings(opening).unwrap();
        store.set_calibrated(true).unwrap();
        site.roller.set_position_percent(opening as f64);
        site
    }

    fn send(&self, frame_id: u16, payload: Vec<u8>) {
        self.send_frame(Frame::new(frame_id, DEVICE_TYPE_ID, 0x00, AREA, payload));
    }

    fn send_frame(&self, frame: Frame) {
        self.gateway.inject(&frame.encode());
    }

    fn run_for(&mut self, duration: Duration) {
        let steps = duration.as_millis() / PERIOD.as_millis();
        for _ in 0..steps {
            self.roller.advance(PERIOD);
            self.actuator.poll(PERIOD).unwrap();
        }
    }

    fn run_until_idle(&mut self, limit: Duration) -> bool {
        let steps = limit.as_millis() / PERIOD.as_millis();
        for _ in 0..steps {
            self.run_for(PERIOD);
            if !self.actuator.controller().is_busy() {
                return true;
            }
        }
        false
    }

    fn replies(&self) -> Vec<Frame> {
        self.gateway
            .take_sent()
            .iter()
            .map(|raw| Frame::parse(raw).unwrap())
            .collect()
    }
}

fn receipts(frames: &[Frame]) -> Vec<u8> {
    frames
        .iter()
        .filter(|f| f.frame_id == 0xE015)
        .map(|f| f.payload[1])
        .collect()
}

fn statuses(frames: &[Frame]) -> Vec<u8> {
    frames
        .iter()
        .filter(|f| f.frame_id == 0xE014)
        .map(|f| f.payload[1])
        .collect()
}

#[test]
fn test_registration_unlocks_commands() {
    let mut site = Site::new(40.0);
    site.actuator.boot().unwrap();
    let announced = site.replies();
    assert_eq!(announced.len(), 1);
    assert_eq!(announced[0].frame_id, 0xE011);

    // ignored until registered
    site.send(0xA014, vec![0x01]);
    site.run_for(PERIOD);
    assert!(site.replies().is_empty());

    let mut payload = vec![0x01, 0x00];
    payload.extend_from_slice(SN);
    site.send(0xA013, payload);
    site.run_for(PERIOD);
    assert_eq!(
        receipts(&site.replies()),
        vec![ReceiptStatus::SetSnAndSlaverCountOk as u8]
    );

    site.send(0xA014, vec![0x01]);
    site.run_for(PERIOD);
    let replies = site.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].frame_id, 0xE014);
    assert_eq!(replies[0].area, AREA);
    assert!(site.actuator.snapshot().registered);
}

#[test]
fn test_corrupted_frame_is_dropped_silently() {
    let mut site = Site::registered(40.0);
    let mut bytes = Frame::new(0xA012, DEVICE_TYPE_ID, 0, AREA, vec![7, 0, 0, 0, 0, 1]).encode();
    bytes[10] ^= 0x01;
    let writes = site.eeprom.writes();

    site.gateway.inject(&bytes);
    site.run_for(PERIOD);

    assert!(site.replies().is_empty());
    assert_eq!(site.actuator.store().groups(), Some([1, 0, 0, 0, 0]));
    assert_eq!(site.eeprom.writes(), writes);
}

#[test]
fn test_noise_before_frame_is_skipped() {
    let mut site = Site::registered(40.0);
    site.gateway.inject(&[0x00, 0x13, 0x37]);
    site.send(0xA014, vec![0x01]);
    site.run_for(PERIOD);
    assert_eq!(statuses(&site.replies()).len(), 1);
}

#[test]
fn test_unknown_command_gets_no_reply() {
    let mut site = Site::registered(40.0);
    site.send(0xA0FF, vec![0x01]);
    site.run_for(PERIOD);
    assert!(site.replies().is_empty());
}

#[test]
fn test_addressing_filters() {
    let mut site = Site::registered(40.0);

    // other area, other group
    site.send_frame(Frame::new(0xA014, DEVICE_TYPE_ID, 0, 9, vec![0x01]));
    site.send(0xA015, vec![4, 0x01]);
    // another product
    site.send_frame(Frame::new(0xA014, 0xC002, 0, AREA, vec![0x01]));
    site.run_for(PERIOD);
    assert!(site.replies().is_empty());

    // wildcard area and group
    site.send_frame(Frame::new(0xA014, DEVICE_TYPE_ID, 0, WILDCARD, vec![0x01]));
    site.send(0xA015, vec![WILDCARD, 0x01]);
    site.run_for(PERIOD);
    let replies = site.replies();
    assert_eq!(statuses(&replies).len(), 1);
    assert_eq!(receipts(&replies), vec![ReceiptStatus::TurnOffOk as u8]);
}

#[test]
fn test_broadcast_echoes_mass_flag() {
    let mut site = Site::registered(40.0);
    site.send_frame(Frame::new(
        0xA014,
        BROADCAST_DEVICE_TYPE,
        WILDCARD,
        0x42,
        vec![0x01],
    ));
    site.run_for(PERIOD);

    let replies = site.replies();
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].mass, WILDCARD);
    assert_eq!(replies[0].device_type, DEVICE_TYPE_ID);
}

#[test]
fn test_first_opening_calibrates_then_positions() {
    let mut site = Site::registered(40.0);
    site.roller.set_position_percent(35.0);

    site.send(0xA021, vec![1, 0x01, 60]);
    site.run_for(PERIOD);
    assert_eq!(
        site.actuator.controller().state(),
        TravelState::Calibrating
    );
    assert!(site.run_until_idle(Duration::from_secs(10 * 60)));

    let snapshot = site.actuator.snapshot();
    assert!(snapshot.calibrated);
    assert_eq!(snapshot.realtime_opening, Some(60));
    assert_eq!(snapshot.last_opening, Some(60));
    let travel = snapshot.travel_secs.unwrap();
    assert!((40..=46).contains(&travel), "travel {}", travel);
    let position = site.roller.position_percent();
    assert!((55.0..=75.0).contains(&position), "film at {}", position);

    let replies = site.replies();
    assert_eq!(receipts(&replies), vec![ReceiptStatus::OpenRollerOk as u8]);
    let reported = statuses(&replies);
    assert_eq!(reported.first(), Some(&(MotorStatus::ResetRolling as u8)));
    assert!(reported.contains(&(MotorStatus::ResetRollOk as u8)));
    assert_eq!(reported.last(), Some(&(MotorStatus::RollOk as u8)));
}

#[test]
fn test_stop_command_interrupts_positioning() {
    let mut site = Site::calibrated(40.0, 40, 20);
    site.send(0xA021, vec![1, 0x01, 80]);
    site.run_for(Duration::from_secs(5));
    assert_eq!(
        site.actuator.controller().state(),
        TravelState::Positioning
    );
    site.replies();

    site.send(0xA015, vec![1, 0x01]);
    site.run_for(Duration::from_millis(300));

    assert!(!site.actuator.controller().is_busy());
    assert_eq!(site.actuator.controller().status(), MotorStatus::ForceStop);
    let replies = site.replies();
    assert_eq!(receipts(&replies), vec![ReceiptStatus::TurnOffOk as u8]);
    assert!(statuses(&replies).contains(&(MotorStatus::ForceStop as u8)));

    let snapshot = site.actuator.snapshot();
    assert!(snapshot.calibrated);
    let opening = snapshot.realtime_opening.unwrap();
    assert!((30..=34).contains(&opening), "stopped at {}", opening);
}

#[test]
fn test_opening_to_current_position_does_not_move() {
    let mut site = Site::calibrated(40.0, 40, 50);
    site.send(0xA021, vec![1, 0x01, 50]);
    site.run_for(PERIOD);

    assert!(!site.actuator.controller().is_busy());
    let replies = site.replies();
    assert_eq!(receipts(&replies), vec![ReceiptStatus::OpenRollerOk as u8]);
    assert_eq!(
        statuses(&replies),
        vec![MotorStatus::RollOk as u8, MotorStatus::RollOk as u8]
    );
    assert_eq!(site.roller.position_percent(), 50.0);
}

#[test]
fn test_manual_roll_is_tracked() {
    let mut site = Site::calibrated(40.0, 40, 50);
    site.run_for(Duration::from_secs(2));

    site.roller.press(ManualKey::Up);
    site.run_for(Duration::from_secs(4));
    site.roller.release(ManualKey::Up);
    site.run_for(Duration::from_secs(3));

    let opening = site.actuator.snapshot().realtime_opening.unwrap();
    assert!((58..=62).contains(&opening), "tracked {}", opening);
    assert!(statuses(&site.replies()).contains(&(MotorStatus::ManualRollOk as u8)));
}

#[test]
fn test_boot_resumes_interrupted_move() {
    let mut site = Site::calibrated(40.0, 40, 20);
    let store = site.actuator.store();
    store.save_opening(OpeningSlot::Target, 60).unwrap();
    store.save_opening(OpeningSlot::Realtime, 43).unwrap();
    site.roller.set_position_percent(43.0);

    site.actuator.boot().unwrap();
    assert_eq!(
        site.actuator.controller().state(),
        TravelState::Positioning
    );
    assert!(site.run_until_idle(Duration::from_secs(60)));
    assert_eq!(site.actuator.snapshot().realtime_opening, Some(60));
}

#[test]
fn test_threshold_update_shows_in_status() {
    let mut site = Site::registered(40.0);
    site.send(0xA022, vec![1, 0x01, 0, 24, 0, 30, 5]);
    site.send(0xA014, vec![0x01]);
    site.run_for(PERIOD);

    let replies = site.replies();
    assert_eq!(receipts(&replies), vec![ReceiptStatus::LimitRollerOk as u8]);
    let status = replies.iter().find(|f| f.frame_id == 0xE014).unwrap();
    assert_eq!(&status.payload[7..11], &[0, 24, 0, 30]);
    assert_eq!(status.payload[13], 5);
}

#[test]
fn test_snapshot_serializes_to_json() {
    let mut site = Site::calibrated(40.0, 40, 50);
    let json = serde_json::to_value(site.actuator.snapshot()).unwrap();
    assert_eq!(json["realtime_opening"], 50);
    assert_eq!(json["status"], "FactoryMode");
    assert_eq!(json["comm_mode"], "Primary");
}
