//! Simulation Example
//!
//! Runs the complete actuator against a simulated roller and an in-memory
//! gateway link:
//! - Registration, group assignment and threshold setup
//! - Calibration triggered by the first opening command
//! - Percentage positioning and a stop command mid-travel
//! - Device snapshot with JSON export
//!
//! Usage:
//!   cargo run --example simulate
//!   cargo run --example simulate -- 45        # full travel time in seconds
//!
//! Set RUST_LOG environment variable to control logging:
//!   RUST_LOG=debug cargo run --example simulate

use std::time::Duration;

use log::{info, warn};
use roller_actuator::constants::DEVICE_TYPE_ID;
use roller_actuator::frame::Frame;
use roller_actuator::hal::{LoopbackTransport, NoDelay};
use roller_actuator::sim::SimulatedRoller;
use roller_actuator::store::ParameterStore;
use roller_actuator::{Actuator, ActuatorConfig, Result};

const PERIOD: Duration = Duration::from_millis(100);
const AREA: u8 = 3;
const GROUP: u8 = 1;

/// Simulated plant, device and gateway end of the link
struct Bench {
    roller: SimulatedRoller,
    actuator: Actuator,
    gateway: LoopbackTransport,
}

impl Bench {
    fn send(&self, frame_id: u16, area: u8, payload: Vec<u8>) {
        let frame = Frame::new(frame_id, DEVICE_TYPE_ID, 0x00, area, payload);
        self.gateway.inject(&frame.encode());
    }

    /// Advance the simulation by `duration`, printing what the gateway hears
    fn run_for(&mut self, duration: Duration) -> Result<()> {
        let steps = duration.as_millis() / PERIOD.as_millis();
        for _ in 0..steps {
            self.roller.advance(PERIOD);
            self.actuator.poll(PERIOD)?;
            self.print_replies();
        }
        Ok(())
    }

    /// Advance until the controller is idle again
    fn run_until_idle(&mut self, limit: Duration) -> Result<()> {
        let steps = limit.as_millis() / PERIOD.as_millis();
        for _ in 0..steps {
            self.run_for(PERIOD)?;
            if !self.actuator.controller().is_busy() {
                return Ok(());
            }
        }
        warn!("Still busy after {:?}", limit);
        Ok(())
    }

    fn print_replies(&self) {
        for raw in self.gateway.take_sent() {
            let Ok(frame) = Frame::parse(&raw) else {
                warn!("Unparseable reply");
                continue;
            };
            match frame.frame_id {
                0xE014 => info!(
                    "<- status {} at opening {}",
                    frame.payload[1], frame.payload[6]
                ),
                0xE015 => info!("<- receipt {}", frame.payload[1]),
                id => info!("<- {:#06x} ({} payload bytes)", id, frame.payload.len()),
            }
        }
    }
}

fn main() -> Result<()> {
    // Initialize logger with default info level if RUST_LOG is not set
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let travel_secs: f64 = std::env::args()
        .nth(1)
        .and_then(|arg| arg.parse().ok())
        .unwrap_or(40.0);

    let mut config = ActuatorConfig::default();
    config.device.jittered_backoff = false;

    let gateway = LoopbackTransport::new();
    let roller = SimulatedRoller::new(200.0, 200.0 / travel_secs);
    roller.set_position_percent(35.0);
    let (store, _, _) = ParameterStore::in_memory();
    let actuator = Actuator::new(
        config,
        Box::new(gateway.clone()),
        store,
        Box::new(roller.clone()),
        Box::new(roller.clone()),
    )
    .with_delay(NoDelay);

    let mut bench = Bench {
        roller,
        actuator,
        gateway,
    };

    info!("=== Boot ===");
    bench.actuator.boot()?;
    bench.print_replies();

    info!("=== Registration ===");
    let mut sn = vec![0x01, 0x00];
    sn.extend_from_slice(b"SIM000001");
    bench.send(0xA013, AREA, sn);
    bench.send(0xA012, AREA, vec![GROUP, 0, 0, 0, 0, 0x01]);
    bench.send(0xA022, AREA, vec![GROUP, 0x01, 0, 22, 0, 25, 3]);
    bench.run_for(PERIOD)?;

    info!("=== Open to 60% (calibrates first) ===");
    bench.send(0xA021, AREA, vec![GROUP, 0x01, 60]);
    bench.run_until_idle(Duration::from_secs(20 * 60))?;
    info!("Film at {:.0}%", bench.roller.position_percent());

    info!("=== Close to 20%, stopped after 5 s ===");
    bench.send(0xA021, AREA, vec![GROUP, 0x01, 20]);
    bench.run_for(Duration::from_secs(5))?;
    bench.send(0xA015, AREA, vec![GROUP, 0x01]);
    bench.run_for(Duration::from_secs(2))?;
    info!("Film at {:.0}%", bench.roller.position_percent());

    info!("=== Broadcast status query ===");
    let query = Frame::new(0xA014, 0x5555, 0x55, 0x55, vec![0x01]);
    bench.gateway.inject(&query.encode());
    bench.run_for(PERIOD)?;

    info!("=== Device Snapshot ===");
    let snapshot = bench.actuator.snapshot();
    info!("State: {}", snapshot.state);
    info!("Status: {:?}", snapshot.status);
    info!("Travel time: {:?} s", snapshot.travel_secs);
    info!("Real-time opening: {:?}", snapshot.realtime_opening);

    if let Ok(json) = serde_json::to_string_pretty(&snapshot) {
        info!("JSON Export:");
        info!("{}", json);
    }

    Ok(())
}
