//! Virtual roller for tests and the simulation demo.
//!
//! The film moves between two end stops at a fixed speed. Running current is
//! drawn only while the film actually moves; against an end stop the limit
//! switch cuts the motor and current collapses, which is what the travel
//! controller watches for.

use std::cell::RefCell;
use std::rc::Rc;
use std::sync::mpsc::Sender;
use std::time::Duration;

use crate::hal::{ManualEdge, ManualKey, MotorDriver, Sensors};
use crate::types::{Direction, Drive, SensorSnapshot};

/// Running current of the simulated motor
pub const SIM_RUNNING_CURRENT: u16 = 900;

/// Supply voltage of the simulated motor in mV
pub const SIM_SUPPLY_MV: u16 = 24_000;

/// Shared handle to a simulated roller; clones drive the same plant.
#[derive(Debug, Clone)]
pub struct SimulatedRoller {
    plant: Rc<RefCell<Plant>>,
}

#[derive(Debug)]
struct Plant {
    position: f64,
    travel_units: f64,
    units_per_sec: f64,
    drive: Drive,
    manual_enabled: bool,
    manual_up: bool,
    manual_down: bool,
    voltage: u16,
    current_override: Option<u16>,
    edges: Option<Sender<ManualEdge>>,
}

impl Plant {
    fn motion(&self) -> Option<Direction> {
        let direction = match self.drive {
            Drive::Run(direction) => Some(direction),
            Drive::Stop if self.manual_enabled && self.manual_up => Some(Direction::Open),
            Drive::Stop if self.manual_enabled && self.manual_down => Some(Direction::Close),
            Drive::Stop => None,
        }?;
        let blocked = match direction {
            Direction::Open => self.position >= self.travel_units,
            Direction::Close => self.position <= 0.0,
        };
        (!blocked).then_some(direction)
    }
}

impl SimulatedRoller {
    /// Roller with `travel_units` between the stops, moving `units_per_sec`
    pub fn new(travel_units: f64, units_per_sec: f64) -> Self {
        SimulatedRoller {
            plant: Rc::new(RefCell::new(Plant {
                position: 0.0,
                travel_units,
                units_per_sec,
                drive: Drive::Stop,
                manual_enabled: true,
                manual_up: false,
                manual_down: false,
                voltage: SIM_SUPPLY_MV,
                current_override: None,
                edges: None,
            })),
        }
    }

    /// Report manual key edges to `edges`
    pub fn attach_manual_edges(&self, edges: Sender<ManualEdge>) {
        self.plant.borrow_mut().edges = Some(edges);
    }

    /// Move the film for `elapsed`
    pub fn advance(&self, elapsed: Duration) {
        let mut plant = self.plant.borrow_mut();
        let step = plant.units_per_sec * elapsed.as_secs_f64();
        match plant.motion() {
            Some(Direction::Open) => {
                plant.position = (plant.position + step).min(plant.travel_units);
            }
            Some(Direction::Close) => {
                plant.position = (plant.position - step).max(0.0);
            }
            None => {}
        }
    }

    /// Film position as a percentage of full travel
    pub fn position_percent(&self) -> f64 {
        let plant = self.plant.borrow();
        plant.position / plant.travel_units * 100.0
    }

    pub fn set_position_percent(&self, percent: f64) {
        let mut plant = self.plant.borrow_mut();
        plant.position = plant.travel_units * percent / 100.0;
    }

    pub fn set_voltage(&self, millivolts: u16) {
        self.plant.borrow_mut().voltage = millivolts;
    }

    /// Force the current reading, e.g. a jam (`Some(0)`) or a short
    pub fn set_current_override(&self, current: Option<u16>) {
        self.plant.borrow_mut().current_override = current;
    }

    pub fn press(&self, key: ManualKey) {
        self.set_key(key, true);
    }

    pub fn release(&self, key: ManualKey) {
        self.set_key(key, false);
    }

    fn set_key(&self, key: ManualKey, pressed: bool) {
        let mut plant = self.plant.borrow_mut();
        match key {
            ManualKey::Up => plant.manual_up = pressed,
            ManualKey::Down => plant.manual_down = pressed,
        }
        if let Some(edges) = &plant.edges {
            let _ = edges.send(ManualEdge { key, pressed });
        }
    }
}

impl Sensors for SimulatedRoller {
    fn sample(&mut self) -> SensorSnapshot {
        let plant = self.plant.borrow();
        let current = plant.current_override.unwrap_or(match plant.motion() {
            Some(_) => SIM_RUNNING_CURRENT,
            None => 0,
        });
        SensorSnapshot {
            current,
            voltage: plant.voltage,
            manual_up: plant.manual_up,
            manual_down: plant.manual_down,
        }
    }
}

impl MotorDriver for SimulatedRoller {
    fn drive(&mut self, drive: Drive) {
        self.plant.borrow_mut().drive = drive;
    }

    fn set_manual_enabled(&mut self, enabled: bool) {
        self.plant.borrow_mut().manual_enabled = enabled;
    }
}
