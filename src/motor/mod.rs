//! Travel controller.
//!
//! A state machine stepped by [`TravelController::tick`]. The driver samples
//! the sensors, ticks the controller, applies the returned [`Drive`] and then
//! services the radio, so a stop command lands on the very next tick.
//!
//! Three operations exist, at most one at a time:
//!
//! * calibration: run to one end stop, then to the other, timing the second
//!   run and learning supply voltage and running currents;
//! * positioning: run for a share of the calibrated travel time toward a
//!   percentage target, or to an end stop for 0 and 100;
//! * forced travel: run to an end stop regardless of calibration.
//!
//! Every run that finishes on an end stop is verified by backing off the
//! stop and approaching it again.

mod detect;
mod sampling;

pub use detect::{CurrentCheck, LimitDetector, ManualKeyWatch, OvercurrentGuard};
pub use sampling::{compensate_duration, planned_duration, Averager, TravelClock};

use std::sync::mpsc::Receiver;
use std::time::Duration;

use log::{debug, error, info, warn};
use serde::{Deserialize, Serialize};

use crate::constants::*;
use crate::error::{ActuatorError, Result, StoreError};
use crate::hal::{ManualEdge, ManualKey};
use crate::store::{OpeningSlot, ParameterStore};
use crate::types::{Direction, Drive, MotorStatus, SensorSnapshot};

/// Externally visible controller state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TravelState {
    Idle,
    Calibrating,
    Positioning,
    ForcedTravel,
    Fault(MotorStatus),
}

/// A working-parameter receipt the controller wants sent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReport {
    pub status: MotorStatus,
    /// Wait a jittered backoff before sending the copies
    pub random_wait: bool,
    pub copies: u8,
}

/// Flags shared between command handling and the control loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ControllerFlags {
    pub stop_requested: bool,
    pub manual_up: bool,
    pub manual_down: bool,
    pub manual_key_fault: bool,
    pub manual_enabled: bool,
    pub adjust_pending: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Next {
    Backoff,
    Approach,
    Run,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    Run,
    Pause { left: Duration, next: Next },
    Backoff { low_since: Option<u32> },
    Approach,
}

#[derive(Debug, Clone, Copy)]
struct Calibration {
    second_run: bool,
    then_position: Option<u8>,
    current: Averager,
    voltage: Averager,
    travel_secs: u32,
}

#[derive(Debug, Clone, Copy)]
struct Positioning {
    last: u8,
    target: u8,
    total: u16,
    base_duration: u32,
    duration: u32,
    reached: u8,
    seconds_seen: u32,
    adjustments: u32,
    drift: bool,
    follow_up: bool,
}

impl Positioning {
    /// 0 and 100 run until the end stop instead of for a duration
    fn to_end_stop(&self) -> bool {
        Direction::toward(self.target).is_some()
    }

    fn interpolate(&self, secs: u32) -> u8 {
        let moved = (secs * 100 / self.total as u32).min(MAX_OPENING as u32) as u8;
        if self.target > self.last {
            self.last.saturating_add(moved).min(self.target)
        } else {
            self.last.saturating_sub(moved).max(self.target)
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Operation {
    Calibrate(Calibration),
    Position(Positioning),
    Force,
}

#[derive(Debug, Clone, Copy)]
struct Travel {
    op: Operation,
    direction: Direction,
    stage: Stage,
    clock: TravelClock,
    limit: LimitDetector,
    overcurrent: OvercurrentGuard,
    overtime_armed: bool,
}

impl Travel {
    fn new(op: Operation, direction: Direction, overcurrent: OvercurrentGuard) -> Self {
        Travel {
            op,
            direction,
            stage: Stage::Run,
            clock: TravelClock::default(),
            limit: LimitDetector::default(),
            overcurrent,
            overtime_armed: false,
        }
    }

    fn verify(&mut self) {
        self.stage = Stage::Pause {
            left: REVERSAL_PAUSE,
            next: Next::Backoff,
        };
    }
}

#[derive(Debug, Clone, Copy)]
struct ManualTrace {
    direction: Direction,
    timing: bool,
    elapsed: Duration,
    iterations: u16,
}

/// Motor travel state machine.
pub struct TravelController {
    travel: Option<Travel>,
    fault: Option<MotorStatus>,
    status: MotorStatus,
    flags: ControllerFlags,
    edges: Option<Receiver<ManualEdge>>,
    snapshot: SensorSnapshot,
    trace: Option<ManualTrace>,
    key_watch: ManualKeyWatch,
    reports: Vec<StatusReport>,
}

impl Default for TravelController {
    fn default() -> Self {
        TravelController::new()
    }
}

impl TravelController {
    pub fn new() -> Self {
        TravelController {
            travel: None,
            fault: None,
            status: MotorStatus::FactoryMode,
            flags: ControllerFlags {
                manual_enabled: true,
                ..ControllerFlags::default()
            },
            edges: None,
            snapshot: SensorSnapshot::default(),
            trace: None,
            key_watch: ManualKeyWatch::default(),
            reports: Vec::new(),
        }
    }

    /// Receive manual key edges from `edges`
    pub fn with_manual_edges(mut self, edges: Receiver<ManualEdge>) -> Self {
        self.edges = Some(edges);
        self
    }

    pub fn state(&self) -> TravelState {
        match (&self.travel, self.fault) {
            (Some(travel), _) => match travel.op {
                Operation::Calibrate(_) => TravelState::Calibrating,
                Operation::Position(_) => TravelState::Positioning,
                Operation::Force => TravelState::ForcedTravel,
            },
            (None, Some(status)) => TravelState::Fault(status),
            (None, None) => TravelState::Idle,
        }
    }

    pub fn is_busy(&self) -> bool {
        self.travel.is_some()
    }

    pub fn status(&self) -> MotorStatus {
        self.status
    }

    pub fn set_status(&mut self, status: MotorStatus) {
        self.status = status;
    }

    pub fn flags(&self) -> ControllerFlags {
        self.flags
    }

    /// Last sensor snapshot seen by the controller
    pub fn snapshot(&self) -> SensorSnapshot {
        self.snapshot
    }

    /// Motor output for the current stage
    pub fn drive(&self) -> Drive {
        match &self.travel {
            Some(travel) => match travel.stage {
                Stage::Run | Stage::Approach => Drive::Run(travel.direction),
                Stage::Backoff { .. } => Drive::Run(travel.direction.reverse()),
                Stage::Pause { .. } => Drive::Stop,
            },
            None => Drive::Stop,
        }
    }

    pub fn manual_enabled(&self) -> bool {
        self.flags.manual_enabled
    }

    pub fn set_manual_enabled(&mut self, enabled: bool) {
        self.flags.manual_enabled = enabled;
    }

    /// Re-enable the manual keys unless a travel operation holds them off
    pub fn release_manual(&mut self) {
        self.flags.manual_enabled = !self.is_busy();
    }

    pub fn manual_key_fault(&self) -> bool {
        self.flags.manual_key_fault
    }

    /// Whether a manual key is held, dropping flags whose key reads released
    pub fn manual_detected(&mut self) -> bool {
        if self.flags.manual_up && !self.snapshot.manual_up {
            debug!("Clearing stale manual up flag");
            self.flags.manual_up = false;
        }
        if self.flags.manual_down && !self.snapshot.manual_down {
            debug!("Clearing stale manual down flag");
            self.flags.manual_down = false;
        }
        self.manual_asserted()
    }

    fn manual_asserted(&self) -> bool {
        self.flags.manual_up || self.flags.manual_down
    }

    /// Ask the running operation to stop on the next tick
    pub fn request_stop(&mut self) {
        if self.is_busy() {
            self.flags.stop_requested = true;
        }
    }

    /// Move duration planned for the running positioning, in seconds
    pub fn planned_duration(&self) -> Option<u32> {
        match self.travel.as_ref().map(|t| t.op) {
            Some(Operation::Position(p)) if !p.to_end_stop() => Some(p.duration),
            _ => None,
        }
    }

    /// Reports queued since the last call
    pub fn take_reports(&mut self) -> Vec<StatusReport> {
        std::mem::take(&mut self.reports)
    }

    fn report(&mut self, status: MotorStatus, random_wait: bool, copies: u8) {
        self.status = status;
        self.reports.push(StatusReport {
            status,
            random_wait,
            copies,
        });
    }

    fn report_store_fault(&mut self, err: impl std::fmt::Display) {
        error!("Store fault: {}", err);
        self.report(MotorStatus::StoreException, false, 2);
    }

    fn begin(&mut self, travel: Travel) {
        info!("Starting {} toward {:?}", travel.op_name(), travel.direction);
        self.fault = None;
        self.flags.stop_requested = false;
        self.flags.manual_enabled = false;
        self.trace = None;
        self.travel = Some(travel);
    }

    /// Stop the motor and return to idle housekeeping
    fn finish(&mut self) {
        self.travel = None;
        self.flags.stop_requested = false;
        self.flags.manual_enabled = true;
    }

    /// Abort with a motor fault, forgetting position and calibration
    fn fail(&mut self, status: MotorStatus, store: &mut ParameterStore) {
        warn!("Travel fault: {:?}", status);
        self.finish();
        self.fault = Some(status);
        if let Err(e) = store.clear_openings() {
            self.report_store_fault(e);
            return;
        }
        if let Err(e) = store.set_calibrated(false) {
            self.report_store_fault(e);
            return;
        }
        self.report(status, false, 2);
    }

    // --- starting operations ------------------------------------------------

    /// Calibrate the travel range, then optionally move to `then_position`
    pub fn start_calibration(
        &mut self,
        store: &mut ParameterStore,
        then_position: Option<u8>,
    ) -> Result<()> {
        if self.is_busy() {
            return Err(ActuatorError::Busy);
        }
        self.report(MotorStatus::ResetRolling, false, 1);
        if let Err(e) = store.set_calibrated(false) {
            self.report_store_fault(e);
            return Ok(());
        }

        let first = match store.opening(OpeningSlot::Target) {
            Some(opening) if opening >= 90 => Direction::Close,
            _ => Direction::Open,
        };
        let calibration = Calibration {
            second_run: false,
            then_position,
            current: Averager::new(CURRENT_SAMPLE_FLOOR),
            voltage: Averager::new(VOLTAGE_SAMPLE_FLOOR),
            travel_secs: 0,
        };
        let overcurrent = OvercurrentGuard::init(store, first);
        self.begin(Travel::new(
            Operation::Calibrate(calibration),
            first,
            overcurrent,
        ));
        Ok(())
    }

    /// Move from the last opening to the persisted target opening
    pub fn start_positioning(&mut self, store: &mut ParameterStore) -> Result<()> {
        if self.is_busy() {
            return Err(ActuatorError::Busy);
        }
        self.begin_positioning(store, false);
        Ok(())
    }

    fn begin_positioning(&mut self, store: &mut ParameterStore, follow_up: bool) {
        if !store.is_calibrated() {
            warn!("Positioning refused, travel not calibrated");
            return;
        }

        let total = store.travel_time();
        let last = store.opening(OpeningSlot::Last);
        let target = store.opening(OpeningSlot::Target);
        let (Some(total), Some(last), Some(target)) = (total, last, target) else {
            error!(
                "Stored travel state unusable (time {:?}, last {:?}, target {:?})",
                total, last, target
            );
            if let Err(e) = store.clear_openings().and_then(|_| store.set_calibrated(false)) {
                error!("Could not reset travel state: {}", e);
            }
            self.report(MotorStatus::StoreException, false, 2);
            return;
        };

        self.report(MotorStatus::Rolling, false, 1);
        if last == target {
            info!("Already at {}%", target);
            self.fault = None;
            self.release_manual();
            self.report(MotorStatus::RollOk, true, 2);
            return;
        }

        let direction = if target > last {
            Direction::Open
        } else {
            Direction::Close
        };
        let duration = planned_duration(last.abs_diff(target), total);
        info!(
            "Positioning {}% -> {}% over {} s of {} s travel",
            last, target, duration, total
        );
        let positioning = Positioning {
            last,
            target,
            total,
            base_duration: duration,
            duration,
            reached: target,
            seconds_seen: 0,
            adjustments: 0,
            drift: false,
            follow_up,
        };
        let overcurrent = OvercurrentGuard::init(store, direction);
        self.begin(Travel::new(
            Operation::Position(positioning),
            direction,
            overcurrent,
        ));
    }

    /// Drive to an end stop regardless of calibration
    pub fn start_forced(&mut self, store: &mut ParameterStore, direction: Direction) -> Result<()> {
        if self.is_busy() {
            return Err(ActuatorError::Busy);
        }
        self.report(MotorStatus::Rolling, false, 1);
        let overcurrent = OvercurrentGuard::init(store, direction);
        self.begin(Travel::new(Operation::Force, direction, overcurrent));
        Ok(())
    }

    /// Finish a move interrupted by power loss.
    ///
    /// A real-time opening close to the target that is not a round ten is
    /// taken as arrived. Otherwise the move continues from the real-time
    /// opening.
    pub fn resume_interrupted(&mut self, store: &mut ParameterStore) -> Result<()> {
        if self.is_busy() {
            return Err(ActuatorError::Busy);
        }
        if !store.is_calibrated() {
            return Ok(());
        }
        let (Some(target), Some(mut realtime)) = (
            store.opening(OpeningSlot::Target),
            store.opening(OpeningSlot::Realtime),
        ) else {
            return Ok(());
        };

        if realtime % 10 != 0 && realtime.abs_diff(target) <= RECOVERY_SNAP_WINDOW {
            realtime = target;
            store.save_opening(OpeningSlot::Realtime, realtime)?;
            store.save_opening(OpeningSlot::Last, realtime)?;
        }
        if realtime != target {
            info!("Resuming interrupted move {}% -> {}%", realtime, target);
            store.save_opening(OpeningSlot::Last, realtime)?;
            self.begin_positioning(store, false);
        }
        Ok(())
    }

    // --- stepping -------------------------------------------------------------

    /// Advance the controller by one control iteration
    pub fn tick(
        &mut self,
        elapsed: Duration,
        snapshot: SensorSnapshot,
        store: &mut ParameterStore,
    ) -> Drive {
        self.snapshot = snapshot;
        self.drain_manual_edges();

        match self.travel.take() {
            Some(travel) => {
                if let Some(travel) = self.step_travel(travel, elapsed, store) {
                    self.travel = Some(travel);
                }
            }
            None => self.housekeeping(elapsed, store),
        }
        self.drive()
    }

    fn drain_manual_edges(&mut self) {
        let edges: Vec<ManualEdge> = match &self.edges {
            Some(rx) => rx.try_iter().collect(),
            None => return,
        };
        for edge in edges {
            self.on_manual_edge(edge);
        }
    }

    fn on_manual_edge(&mut self, edge: ManualEdge) {
        if !self.flags.manual_enabled {
            debug!("Manual edge {:?} ignored while travelling", edge);
            return;
        }
        let direction = match edge.key {
            ManualKey::Up => {
                self.flags.manual_up = edge.pressed;
                Direction::Open
            }
            ManualKey::Down => {
                self.flags.manual_down = edge.pressed;
                Direction::Close
            }
        };

        if edge.pressed {
            info!("Manual {:?} pressed", edge.key);
            self.trace = Some(ManualTrace {
                direction,
                timing: true,
                elapsed: Duration::ZERO,
                iterations: 0,
            });
        } else if let Some(trace) = self.trace.as_mut() {
            trace.timing = false;
        }
    }

    fn step_travel(
        &mut self,
        mut travel: Travel,
        elapsed: Duration,
        store: &mut ParameterStore,
    ) -> Option<Travel> {
        if self.flags.stop_requested {
            self.force_stop(travel, store);
            return None;
        }

        let new_second = travel.clock.advance(elapsed);
        let secs = travel.clock.secs();
        let current = self.snapshot.current;

        match travel.stage {
            Stage::Run => self.step_run(travel, new_second, store),
            Stage::Pause { left, next } => {
                if elapsed < left {
                    travel.stage = Stage::Pause {
                        left: left - elapsed,
                        next,
                    };
                    return Some(travel);
                }
                travel.clock.restart();
                travel.limit.reset();
                travel.stage = match next {
                    Next::Backoff => Stage::Backoff { low_since: None },
                    Next::Approach => Stage::Approach,
                    Next::Run => {
                        travel.overtime_armed = false;
                        Stage::Run
                    }
                };
                Some(travel)
            }
            Stage::Backoff { low_since } => {
                if current < LIMIT_CURRENT_FLOOR {
                    let since = low_since.unwrap_or(secs);
                    if secs >= since + LIMIT_HOLD_SECS {
                        warn!("Motor did not leave the end stop, verification failed");
                        self.fail(MotorStatus::MotorException, store);
                        return None;
                    }
                    travel.stage = Stage::Backoff {
                        low_since: Some(since),
                    };
                } else if secs >= VERIFY_BACKOFF_SECS {
                    travel.stage = Stage::Pause {
                        left: REVERSAL_PAUSE,
                        next: Next::Approach,
                    };
                } else {
                    travel.stage = Stage::Backoff { low_since: None };
                }
                Some(travel)
            }
            Stage::Approach => {
                let at_limit = secs >= START_SETTLE_SECS && travel.limit.check(secs, current);
                if at_limit || secs >= VERIFY_APPROACH_SECS {
                    debug!("End stop verified after {} s", secs);
                    return self.on_verified(travel, store);
                }
                Some(travel)
            }
        }
    }

    fn step_run(
        &mut self,
        mut travel: Travel,
        new_second: bool,
        store: &mut ParameterStore,
    ) -> Option<Travel> {
        let secs = travel.clock.secs();
        let current = self.snapshot.current;
        let manual = self.manual_asserted();

        if let Operation::Position(p) = travel.op {
            if !p.drift && !p.to_end_stop() && secs >= p.duration {
                self.complete_positioning(p, store);
                return None;
            }
        }

        if secs >= START_SETTLE_SECS && !manual {
            travel.overtime_armed = true;
            if travel.limit.check(secs, current) {
                return self.on_limit(travel);
            }
        }

        if travel.overtime_armed && secs >= ROLL_OVERTIME_SECS {
            let status = match travel.direction {
                Direction::Open => MotorStatus::HighPositionLimitException,
                Direction::Close => MotorStatus::LowPositionLimitException,
            };
            error!("No end stop after {} s", secs);
            self.fail(status, store);
            return None;
        }

        if secs > START_SETTLE_SECS && !manual {
            match travel.overcurrent.check(current) {
                CurrentCheck::Normal => {}
                CurrentCheck::OverCurrent => {
                    error!("Motor current {} above limit", current);
                    self.finish();
                    self.fault = Some(MotorStatus::MotorCurrentException);
                    self.report(MotorStatus::MotorCurrentException, false, 2);
                    return None;
                }
                CurrentCheck::Exception { first } => {
                    if first {
                        self.report(MotorStatus::StoreException, false, 2);
                    }
                }
            }
        }

        if new_second {
            match travel.op {
                Operation::Calibrate(mut c) => {
                    if secs % COLLECTION_PERIOD_SECS == 0 {
                        c.current.push(current);
                        if c.second_run {
                            c.voltage.push(self.snapshot.voltage);
                        }
                        travel.op = Operation::Calibrate(c);
                    }
                }
                Operation::Position(p) => {
                    travel.op = Operation::Position(self.track_progress(p, secs, store));
                }
                Operation::Force => {}
            }
        }
        Some(travel)
    }

    /// Per-second bookkeeping of a positioning run
    fn track_progress(
        &mut self,
        mut p: Positioning,
        secs: u32,
        store: &mut ParameterStore,
    ) -> Positioning {
        p.seconds_seen += 1;
        if let Err(e) = store.save_opening(OpeningSlot::Realtime, p.interpolate(secs)) {
            self.report_store_fault(e);
        }

        if p.seconds_seen % DYNAMIC_ADJUST_PERIOD_SECS == 0 && !p.to_end_stop() {
            p.adjustments += 1;
            if let Some(calibrated) = store.calibration_voltage() {
                let direction = if p.target > p.last {
                    Direction::Open
                } else {
                    Direction::Close
                };
                if let Some(duration) =
                    compensate_duration(p.base_duration, direction, self.snapshot.voltage, calibrated)
                {
                    if duration != p.duration {
                        debug!("Move duration adjusted {} -> {} s", p.duration, duration);
                    }
                    p.duration = duration;
                }
            }
        }

        let interval = store.thresholds().report_interval as u32 * 10;
        if secs % interval == 0 {
            self.report(MotorStatus::Rolling, false, 1);
        }
        p
    }

    fn on_limit(&mut self, mut travel: Travel) -> Option<Travel> {
        let secs = travel.clock.secs();
        info!("End stop reached {:?} after {} s", travel.direction, secs);
        match &mut travel.op {
            Operation::Calibrate(c) => {
                if c.second_run {
                    c.travel_secs = secs + secs % 2;
                }
            }
            Operation::Position(p) => {
                p.reached = travel.direction.end_opening();
                if p.reached != p.target {
                    warn!(
                        "End stop reached before {}%, opening drifted",
                        p.target
                    );
                    p.drift = true;
                }
            }
            Operation::Force => {}
        }
        travel.verify();
        Some(travel)
    }

    fn on_verified(&mut self, mut travel: Travel, store: &mut ParameterStore) -> Option<Travel> {
        match travel.op {
            Operation::Calibrate(mut c) if !c.second_run => {
                if let Some(average) = c.current.average() {
                    if let Err(e) = store.save_baseline_current(travel.direction, average) {
                        self.report_store_fault(e);
                    }
                }
                c.second_run = true;
                c.current = Averager::new(CURRENT_SAMPLE_FLOOR);
                travel.direction = travel.direction.reverse();
                travel.overcurrent = OvercurrentGuard::init(store, travel.direction);
                travel.op = Operation::Calibrate(c);
                travel.stage = Stage::Pause {
                    left: REVERSAL_PAUSE,
                    next: Next::Run,
                };
                Some(travel)
            }
            Operation::Calibrate(c) => {
                self.complete_calibration(c, travel.direction, store);
                None
            }
            Operation::Position(p) => {
                self.complete_positioning(p, store);
                None
            }
            Operation::Force => {
                self.finish();
                let opening = travel.direction.end_opening();
                match store.save_all_openings(opening) {
                    Ok(()) => self.report(MotorStatus::RollOk, true, 2),
                    Err(e) => self.report_store_fault(e),
                }
                None
            }
        }
    }

    fn complete_calibration(
        &mut self,
        c: Calibration,
        direction: Direction,
        store: &mut ParameterStore,
    ) {
        self.finish();
        info!("Calibrated travel time {} s", c.travel_secs);

        let secs = c.travel_secs.min(u16::MAX as u32) as u16;
        match store.save_travel_time(secs) {
            Ok(()) => {}
            Err(e @ StoreError::OutOfRange { .. }) => {
                error!("Calibration run rejected: {}", e);
                self.fail(MotorStatus::MotorException, store);
                return;
            }
            Err(e) => {
                self.report_store_fault(e);
                return;
            }
        }
        if let Some(voltage) = c.voltage.average() {
            if let Err(e) = store.save_calibration_voltage(voltage) {
                self.report_store_fault(e);
            }
        }
        if let Some(current) = c.current.average() {
            if let Err(e) = store.save_baseline_current(direction, current) {
                self.report_store_fault(e);
            }
        }

        let opening = direction.end_opening();
        if let Err(e) = store
            .save_all_openings(opening)
            .and_then(|_| store.set_calibrated(true))
        {
            self.report_store_fault(e);
            return;
        }
        self.report(MotorStatus::ResetRollOk, true, 2);

        if let Some(target) = c.then_position {
            if let Err(e) = store.save_opening(OpeningSlot::Target, target) {
                self.report_store_fault(e);
                return;
            }
            self.flags.adjust_pending = false;
            self.begin_positioning(store, false);
        }
    }

    fn complete_positioning(&mut self, p: Positioning, store: &mut ParameterStore) {
        self.finish();
        if let Err(e) = store
            .save_opening(OpeningSlot::Last, p.reached)
            .and_then(|_| store.save_opening(OpeningSlot::Realtime, p.reached))
        {
            self.report_store_fault(e);
            return;
        }
        if p.drift && !p.follow_up {
            info!("Returning to {}% after drift", p.target);
            self.flags.adjust_pending = true;
            return;
        }
        info!("Reached {}%", p.reached);
        self.report(MotorStatus::RollOk, true, 2);
    }

    fn force_stop(&mut self, travel: Travel, store: &mut ParameterStore) {
        info!("Forced stop during {}", travel.op_name());
        self.finish();
        self.status = MotorStatus::ForceStop;
        match travel.op {
            Operation::Calibrate(_) => {}
            Operation::Position(_) => {
                if let Some(realtime) = store.opening(OpeningSlot::Realtime) {
                    if let Err(e) = store
                        .save_opening(OpeningSlot::Last, realtime)
                        .and_then(|_| store.save_opening(OpeningSlot::Target, realtime))
                    {
                        self.report_store_fault(e);
                        return;
                    }
                }
            }
            Operation::Force => {
                if let Err(e) = store.set_calibrated(false) {
                    self.report_store_fault(e);
                    return;
                }
            }
        }
        self.report(MotorStatus::ForceStop, false, 1);
    }

    // --- idle housekeeping ----------------------------------------------------

    fn housekeeping(&mut self, elapsed: Duration, store: &mut ParameterStore) {
        self.watch_manual_key(elapsed, store);
        self.trace_manual_opening(elapsed, store);

        if self.flags.adjust_pending && !self.manual_asserted() && !self.flags.manual_key_fault {
            self.flags.adjust_pending = false;
            self.begin_positioning(store, true);
        }
    }

    fn watch_manual_key(&mut self, elapsed: Duration, store: &mut ParameterStore) {
        if self.flags.manual_key_fault {
            return;
        }
        if !self.manual_asserted() || !self.manual_detected() {
            self.key_watch.reset();
            return;
        }
        if !self.key_watch.observe(elapsed, self.snapshot.current) {
            return;
        }

        error!("Manual key held without motor current, key circuit fault");
        self.flags.manual_key_fault = true;
        self.trace = None;
        if let Err(e) = store.clear_openings() {
            self.report_store_fault(e);
            return;
        }
        self.report(MotorStatus::ManualKeyException, false, 2);
    }

    fn trace_manual_opening(&mut self, elapsed: Duration, store: &mut ParameterStore) {
        let Some(trace) = self.trace.as_mut() else {
            return;
        };
        if trace.timing {
            trace.elapsed += elapsed;
        }
        trace.iterations = trace.iterations.saturating_add(1);
        if self.snapshot.current >= LIMIT_CURRENT_FLOOR || trace.iterations <= TRACE_MIN_ITERATIONS {
            return;
        }

        let trace = *trace;
        self.trace = None;
        if self.flags.manual_key_fault || !store.is_calibrated() {
            return;
        }
        let (Some(total), Some(last)) = (store.travel_time(), store.opening(OpeningSlot::Last))
        else {
            warn!("Manual move not tracked, stored travel state unusable");
            return;
        };

        let moved = (trace.elapsed.as_millis() * 100 / (total as u128 * 1000))
            .min(MAX_OPENING as u128) as u8;
        let opening = match trace.direction {
            Direction::Open => last.saturating_add(moved).min(MAX_OPENING),
            Direction::Close => last.saturating_sub(moved),
        };
        info!(
            "Manual {:?} for {:?} moved {}% -> {}%",
            trace.direction, trace.elapsed, last, opening
        );
        match store.save_all_openings(opening) {
            Ok(()) => self.report(MotorStatus::ManualRollOk, true, 2),
            Err(e) => self.report_store_fault(e),
        }
    }
}

impl Travel {
    fn op_name(&self) -> &'static str {
        match self.op {
            Operation::Calibrate(_) => "calibration",
            Operation::Position(_) => "positioning",
            Operation::Force => "forced travel",
        }
    }
}
