//! Fault detectors evaluated on every control iteration.

use std::time::Duration;

use log::{debug, warn};

use crate::constants::*;
use crate::store::ParameterStore;
use crate::types::Direction;

/// Recognises a reached end stop from collapsed motor current.
#[derive(Debug, Default, Clone, Copy)]
pub struct LimitDetector {
    low_since: Option<u32>,
}

impl LimitDetector {
    pub fn reset(&mut self) {
        self.low_since = None;
    }

    /// Feed the current at travel second `secs`; true once it has stayed at
    /// or below the floor for the hold time
    pub fn check(&mut self, secs: u32, current: u16) -> bool {
        if current > LIMIT_CURRENT_FLOOR {
            self.low_since = None;
            return false;
        }
        let since = *self.low_since.get_or_insert(secs);
        if secs >= since + LIMIT_HOLD_SECS {
            self.low_since = None;
            return true;
        }
        false
    }
}

/// Outcome of one overcurrent check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CurrentCheck {
    Normal,
    OverCurrent,
    /// Baseline currents failed their self-check; `first` on the first report
    Exception { first: bool },
}

/// Compares running current to the calibrated baseline plus threshold.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OvercurrentGuard {
    /// No baseline learned yet
    Uninit,
    /// Stored baselines are damaged
    Exception { reported: bool },
    Armed {
        limit: u32,
        previous_over: bool,
        count: u16,
    },
}

impl OvercurrentGuard {
    /// Prepare the guard for a run in `direction`
    pub fn init(store: &mut ParameterStore, direction: Direction) -> Self {
        if !store.baseline_currents_saved() {
            return OvercurrentGuard::Uninit;
        }
        if !store.check_baseline_currents() {
            warn!("Baseline current self-check failed, clearing learned currents");
            if let Err(e) = store.clear_baseline_currents() {
                warn!("Could not clear baseline currents: {}", e);
            }
            return OvercurrentGuard::Exception { reported: false };
        }

        let baseline = store
            .baseline_current(direction)
            .unwrap_or(DEFAULT_BASELINE_CURRENT) as u32;
        let multiple = store.thresholds().current_multiple as u32;
        let limit = baseline + baseline * multiple / 10;
        debug!("Overcurrent limit for {:?}: {}", direction, limit);
        OvercurrentGuard::Armed {
            limit,
            previous_over: false,
            count: 0,
        }
    }

    pub fn check(&mut self, current: u16) -> CurrentCheck {
        match self {
            OvercurrentGuard::Uninit => CurrentCheck::Normal,
            OvercurrentGuard::Exception { reported } => {
                let first = !*reported;
                *reported = true;
                CurrentCheck::Exception { first }
            }
            OvercurrentGuard::Armed {
                limit,
                previous_over,
                count,
            } => {
                let over = current as u32 > *limit;
                match (over, *previous_over) {
                    (true, true) => *count += 1,
                    (false, true) => *count = 0,
                    _ => {}
                }
                *previous_over = over;
                if *count >= OVERCURRENT_DEBOUNCE {
                    *count = 0;
                    return CurrentCheck::OverCurrent;
                }
                CurrentCheck::Normal
            }
        }
    }
}

/// Latches a key fault when a manual key stays asserted with no motor current.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualKeyWatch {
    low_for: Duration,
}

impl ManualKeyWatch {
    pub fn reset(&mut self) {
        self.low_for = Duration::ZERO;
    }

    /// True once low current has persisted long enough
    pub fn observe(&mut self, elapsed: Duration, current: u16) -> bool {
        if current >= LIMIT_CURRENT_FLOOR {
            self.low_for = Duration::ZERO;
            return false;
        }
        self.low_for += elapsed;
        self.low_for >= MANUAL_KEY_FAULT_AFTER
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_needs_three_low_seconds() {
        let mut limit = LimitDetector::default();
        assert!(!limit.check(5, 40));
        assert!(!limit.check(6, 40));
        assert!(!limit.check(7, 40));
        assert!(limit.check(8, 40));
    }

    #[test]
    fn test_limit_restarts_after_current_returns() {
        let mut limit = LimitDetector::default();
        assert!(!limit.check(5, 40));
        assert!(!limit.check(7, 40));
        assert!(!limit.check(7, 900));
        assert!(!limit.check(8, 40));
        assert!(!limit.check(10, 40));
        assert!(limit.check(11, 40));
    }

    #[test]
    fn test_overcurrent_needs_consecutive_confirmations() {
        let mut guard = OvercurrentGuard::Armed {
            limit: 2700,
            previous_over: false,
            count: 0,
        };
        assert_eq!(guard.check(3000), CurrentCheck::Normal);
        for _ in 0..OVERCURRENT_DEBOUNCE - 1 {
            assert_eq!(guard.check(3000), CurrentCheck::Normal);
        }
        assert_eq!(guard.check(3000), CurrentCheck::OverCurrent);
    }

    #[test]
    fn test_overcurrent_dip_resets_count() {
        let mut guard = OvercurrentGuard::Armed {
            limit: 2700,
            previous_over: false,
            count: 0,
        };
        for _ in 0..60 {
            guard.check(3000);
        }
        guard.check(900);
        for _ in 0..60 {
            assert_eq!(guard.check(3000), CurrentCheck::Normal);
        }
    }

    #[test]
    fn test_overcurrent_limit_from_store() {
        let (mut store, _, _) = ParameterStore::in_memory();
        assert_eq!(
            OvercurrentGuard::init(&mut store, Direction::Open),
            OvercurrentGuard::Uninit
        );

        store.save_baseline_current(Direction::Open, 900).unwrap();
        store.save_baseline_current(Direction::Close, 1000).unwrap();
        assert_eq!(
            OvercurrentGuard::init(&mut store, Direction::Close),
            OvercurrentGuard::Armed {
                limit: 3000,
                previous_over: false,
                count: 0
            }
        );
    }

    #[test]
    fn test_exception_reported_once() {
        let mut guard = OvercurrentGuard::Exception { reported: false };
        assert_eq!(guard.check(0), CurrentCheck::Exception { first: true });
        assert_eq!(guard.check(0), CurrentCheck::Exception { first: false });
    }

    #[test]
    fn test_manual_key_watch_latches_after_continuous_low_current() {
        let mut watch = ManualKeyWatch::default();
        let step = Duration::from_secs(60);
        for _ in 0..29 {
            assert!(!watch.observe(step, 0));
        }
        assert!(!watch.observe(step, 900));
        for _ in 0..29 {
            assert!(!watch.observe(step, 0));
        }
        assert!(watch.observe(step, 0));
    }
}
