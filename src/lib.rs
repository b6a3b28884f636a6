//! # Roller Actuator
//!
//! Control core of a LoRa-commanded roller film actuator: the motor that rolls
//! greenhouse film up and down between two mechanical end stops.
//!
//! ## Features
//!
//! - Framed, CRC8-checked command protocol with area, group and broadcast addressing
//! - Travel calibration, percentage positioning and forced full travel
//! - End-stop, overcurrent, overtime and manual-key fault detection
//! - Persistent parameter store with write verification and wear suppression
//! - Power-loss recovery of interrupted moves
//! - Simulated roller for running the whole device on a desktop
//!
//! ## Example
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use roller_actuator::hal::{Delay, StdDelay};
//! use roller_actuator::serial::SerialTransport;
//! use roller_actuator::sim::SimulatedRoller;
//! use roller_actuator::store::ParameterStore;
//! use roller_actuator::{Actuator, ActuatorConfig};
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ActuatorConfig::load_default()?;
//!     let link = SerialTransport::new(&config.serial.port, config.serial.baud_rate)?;
//!     let (store, _, _) = ParameterStore::in_memory();
//!     let roller = SimulatedRoller::new(200.0, 5.0);
//!
//!     let mut actuator = Actuator::new(
//!         config,
//!         Box::new(link),
//!         store,
//!         Box::new(roller.clone()),
//!         Box::new(roller.clone()),
//!     );
//!     actuator.boot()?;
//!
//!     let period = Duration::from_millis(100);
//!     loop {
//!         roller.advance(period);
//!         actuator.poll(period)?;
//!         StdDelay.delay_ms(100);
//!     }
//! }
//! ```

pub mod checksum;
pub mod config;
pub mod constants;
pub mod device;
pub mod error;
pub mod frame;
pub mod hal;
pub mod motor;
pub mod protocol;
pub mod receipt;
pub mod serial;
pub mod sim;
pub mod store;
pub mod types;

pub use crate::config::ActuatorConfig;
pub use device::Actuator;
pub use error::{ActuatorError, Result};
pub use types::*;
