//! Travel timing, calibration sampling and voltage compensation.

use std::time::Duration;

use log::warn;

use crate::constants::*;
use crate::types::Direction;

/// Travel time of the current run, counted in whole seconds.
#[derive(Debug, Default, Clone, Copy)]
pub struct TravelClock {
    elapsed: Duration,
}

impl TravelClock {
    pub fn restart(&mut self) {
        self.elapsed = Duration::ZERO;
    }

    /// Advance the clock; true when a whole second boundary was crossed
    pub fn advance(&mut self, elapsed: Duration) -> bool {
        let before = self.secs();
        self.elapsed += elapsed;
        self.secs() > before
    }

    pub fn secs(&self) -> u32 {
        self.elapsed.as_secs() as u32
    }
}

/// Running average that discards samples at or below a floor.
#[derive(Debug, Clone, Copy)]
pub struct Averager {
    floor: u16,
    sum: u32,
    count: u32,
    discarded: u32,
}

impl Averager {
    pub fn new(floor: u16) -> Self {
        Averager {
            floor,
            sum: 0,
            count: 0,
            discarded: 0,
        }
    }

    pub fn push(&mut self, sample: u16) {
        if sample > self.floor {
            self.sum += sample as u32;
            self.count += 1;
        } else {
            self.discarded += 1;
        }
    }

    pub fn average(&self) -> Option<u16> {
        (self.count > 0).then(|| (self.sum / self.count) as u16)
    }

    pub fn discarded(&self) -> u32 {
        self.discarded
    }
}

/// Planned duration of a move of `delta` percent over a travel of `total` seconds
pub fn planned_duration(delta: u8, total: u16) -> u32 {
    (delta as u32 * total as u32 + 50) / 100
}

/// Stretch or shrink `base` seconds for the supply voltage drift since
/// calibration. `None` when the reading is too far off to trust.
pub fn compensate_duration(
    base: u32,
    direction: Direction,
    now_mv: u16,
    calibrated_mv: u16,
) -> Option<u32> {
    let deviation = now_mv.abs_diff(calibrated_mv) as u32;
    if deviation > VOLTAGE_DEVIATION_MAX_MV {
        warn!(
            "Voltage {} mV deviates too far from calibration {} mV",
            now_mv, calibrated_mv
        );
        return None;
    }
    if deviation < VOLTAGE_DEADBAND_MV {
        return Some(base);
    }

    let heavy = deviation >= VOLTAGE_HEAVY_MV;
    let faster = now_mv > calibrated_mv;
    let multiplier = match (direction, faster) {
        (Direction::Open, true) => POS_UP_MULTIPLIER,
        (Direction::Open, false) => NEG_UP_MULTIPLIER,
        (Direction::Close, true) => POS_DOWN_MULTIPLIER,
        (Direction::Close, false) => NEG_DOWN_MULTIPLIER,
    };
    let multiplier = match (heavy, faster) {
        (true, true) => multiplier - HEAVY_FAST_PENALTY,
        (true, false) => multiplier + HEAVY_SLOW_BONUS,
        (false, _) => multiplier,
    };

    let correction = multiplier * (deviation as f32 / VOLTAGE_STEP_MV);
    let adjusted = if faster {
        base as f32 - correction
    } else {
        base as f32 + correction
    };
    Some(adjusted.round().max(0.0) as u32)
}
