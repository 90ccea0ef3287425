//! Shared configuration store for runtime-mutable parameters.
//!
//! Both the command dispatcher and the telemetry scheduler read and write
//! this store concurrently. All access goes through one mutex, acquired and
//! released around each individual call, so neither side ever observes a
//! configuration with some fields updated and others stale. The guard is
//! never held across an await point or a network call.
//!
//! Mutation goes through `try_set_*` accessors which apply a value only if it
//! is in bounds AND differs from the current value. Rejections are logged and
//! the prior value retained.

use std::sync::{Mutex, MutexGuard};
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, info, warn};

/// Minimum accepted publish interval in seconds. `try_set_interval` accepts
/// any value strictly greater than 4.
pub const MIN_PUBLISH_INTERVAL_SECS: u64 = 5;

/// Standard atmosphere, used when the config file omits `seaLevelPressure`.
pub const DEFAULT_SEA_LEVEL_PRESSURE: f64 = 1013.25;

/// Validation predicate for the publish interval.
pub fn interval_in_bounds(secs: u64) -> bool {
    secs >= MIN_PUBLISH_INTERVAL_SECS
}

/// Validation predicate for the sea-level pressure reference (hPa).
pub fn pressure_in_bounds(hpa: f64) -> bool {
    hpa.is_finite() && hpa > 100.0 && hpa < 10000.0
}

/// Current epoch time in whole seconds. Scheduling arithmetic runs on this.
pub fn epoch_now() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or(0)
}

/// Runtime parameters guarded by the store mutex.
#[derive(Debug, Clone, Copy, PartialEq)]
struct RuntimeState {
    publish_interval: u64,
    sea_level_pressure: f64,
    last_publish: u64,
}

/// A consistent point-in-time copy of the runtime parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RuntimeSnapshot {
    pub publish_interval: u64,
    pub sea_level_pressure: f64,
    pub last_publish: u64,
}

/// Synchronized store for runtime-mutable configuration.
///
/// Constructed once at startup from the loaded [`crate::config::AgentConfig`]
/// and passed by `Arc` into the dispatcher and the scheduler. There are no
/// ambient globals.
#[derive(Debug)]
pub struct ConfigStore {
    inner: Mutex<RuntimeState>,
}

impl ConfigStore {
    pub fn new(publish_interval: u64, sea_level_pressure: f64) -> Self {
        ConfigStore {
            inner: Mutex::new(RuntimeState {
                publish_interval,
                sea_level_pressure,
                // Epoch zero so the first scheduler tick is immediately due.
                last_publish: 0,
            }),
        }
    }

    pub fn from_config(config: &crate::config::AgentConfig) -> Self {
        Self::new(config.publish_interval, config.sea_level_pressure)
    }

    fn state(&self) -> MutexGuard<'_, RuntimeState> {
        match self.inner.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    pub fn publish_interval(&self) -> u64 {
        self.state().publish_interval
    }

    pub fn sea_level_pressure(&self) -> f64 {
        self.state().sea_level_pressure
    }

    /// Epoch seconds of the last successful telemetry publish.
    pub fn last_publish(&self) -> u64 {
        self.state().last_publish
    }

    /// Record a successful telemetry publish. Called only after the broker
    /// accepted the payload, so a failed publish never advances the schedule.
    pub fn mark_published(&self, epoch_secs: u64) {
        self.state().last_publish = epoch_secs;
    }

    /// Apply a new publish interval if it is valid and actually different.
    /// Returns whether the value was applied.
    pub fn try_set_interval(&self, secs: u64) -> bool {
        if !interval_in_bounds(secs) {
            warn!(
                requested = secs,
                minimum = MIN_PUBLISH_INTERVAL_SECS,
                "rejecting publish interval change: below minimum"
            );
            return false;
        }
        let mut state = self.state();
        if state.publish_interval == secs {
            debug!(interval = secs, "publish interval unchanged");
            return false;
        }
        info!(
            old = state.publish_interval,
            new = secs,
            "publish interval changed"
        );
        state.publish_interval = secs;
        true
    }

    /// Apply a new sea-level pressure reference if it is valid and actually
    /// different. Returns whether the value was applied.
    pub fn try_set_pressure(&self, hpa: f64) -> bool {
        if !pressure_in_bounds(hpa) {
            warn!(
                requested = hpa,
                "rejecting sea level pressure change: out of bounds (100, 10000)"
            );
            return false;
        }
        let mut state = self.state();
        if state.sea_level_pressure == hpa {
            debug!(pressure = hpa, "sea level pressure unchanged");
            return false;
        }
        info!(
            old = state.sea_level_pressure,
            new = hpa,
            "sea level pressure changed"
        );
        state.sea_level_pressure = hpa;
        true
    }

    /// All runtime parameters, read under a single lock acquisition.
    pub fn snapshot(&self) -> RuntimeSnapshot {
        let state = self.state();
        RuntimeSnapshot {
            publish_interval: state.publish_interval,
            sea_level_pressure: state.sea_level_pressure,
            last_publish: state.last_publish,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn store() -> ConfigStore {
        ConfigStore::new(10, DEFAULT_SEA_LEVEL_PRESSURE)
    }

    #[test]
    fn interval_change_applies_and_reads_back() {
        let store = store();
        assert!(store.try_set_interval(30));
        assert_eq!(store.publish_interval(), 30);
    }

    #[test]
    fn interval_below_minimum_is_rejected() {
        let store = store();
        assert!(!store.try_set_interval(4));
        assert!(!store.try_set_interval(0));
        assert_eq!(store.publish_interval(), 10);
    }

    #[test]
    fn identical_interval_is_a_no_op() {
        let store = store();
        assert!(store.try_set_interval(20));
        assert!(!store.try_set_interval(20));
        assert_eq!(store.publish_interval(), 20);
    }

    #[test]
    fn pressure_bounds_are_strict() {
        let store = store();
        assert!(!store.try_set_pressure(100.0));
        assert!(!store.try_set_pressure(10000.0));
        assert!(!store.try_set_pressure(f64::NAN));
        assert!(store.try_set_pressure(100.1));
        assert_eq!(store.sea_level_pressure(), 100.1);
    }

    #[test]
    fn identical_pressure_is_a_no_op() {
        let store = store();
        assert!(store.try_set_pressure(990.0));
        assert!(!store.try_set_pressure(990.0));
        assert_eq!(store.sea_level_pressure(), 990.0);
    }

    #[test]
    fn mark_published_updates_last_publish() {
        let store = store();
        assert_eq!(store.last_publish(), 0);
        store.mark_published(1_700_000_000);
        assert_eq!(store.last_publish(), 1_700_000_000);
    }

    #[test]
    fn snapshot_is_consistent() {
        let store = store();
        store.try_set_interval(42);
        store.mark_published(7);
        let snap = store.snapshot();
        assert_eq!(snap.publish_interval, 42);
        assert_eq!(snap.sea_level_pressure, DEFAULT_SEA_LEVEL_PRESSURE);
        assert_eq!(snap.last_publish, 7);
    }

    proptest! {
        #[test]
        fn interval_accepted_iff_greater_than_four(v in any::<u64>()) {
            let store = ConfigStore::new(10, DEFAULT_SEA_LEVEL_PRESSURE);
            let accepted = store.try_set_interval(v);
            if v > 4 && v != 10 {
                prop_assert!(accepted);
                prop_assert_eq!(store.publish_interval(), v);
            } else {
                prop_assert!(!accepted);
                prop_assert_eq!(store.publish_interval(), 10);
            }
        }

        #[test]
        fn pressure_accepted_iff_in_open_interval(v in -20000.0f64..20000.0) {
            let current = DEFAULT_SEA_LEVEL_PRESSURE;
            let store = ConfigStore::new(10, current);
            let accepted = store.try_set_pressure(v);
            if v > 100.0 && v < 10000.0 && v != current {
                prop_assert!(accepted);
                prop_assert_eq!(store.sea_level_pressure(), v);
            } else {
                prop_assert!(!accepted);
                prop_assert_eq!(store.sea_level_pressure(), current);
            }
        }

        #[test]
        fn try_set_is_idempotent_under_repetition(v in 5u64..100_000) {
            let store = ConfigStore::new(10, DEFAULT_SEA_LEVEL_PRESSURE);
            let first = store.try_set_interval(v);
            let second = store.try_set_interval(v);
            prop_assert_eq!(first, v != 10);
            prop_assert!(!second);
            prop_assert_eq!(store.publish_interval(), v);
        }
    }
}
