//! Gateway operation counters: monotonically increasing, reset only by a
//! process restart. Counters measure attempts, not confirmed delivery.

use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};

#[derive(Debug, Default)]
pub struct Counters {
    from_devices: AtomicU64,
    to_devices: AtomicU64,
    from_controller: AtomicU64,
    to_controller: AtomicU64,
}

/// Point-in-time copy of the counters, for status reporting.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CountersSnapshot {
    pub from_devices: u64,
    pub to_devices: u64,
    pub from_controller: u64,
    pub to_controller: u64,
}

impl Counters {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_from_devices(&self) {
        self.from_devices.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_to_devices(&self) {
        self.to_devices.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_from_controller(&self) {
        self.from_controller.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_to_controller(&self) {
        self.to_controller.fetch_add(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> CountersSnapshot {
        CountersSnapshot {
            from_devices: self.from_devices.load(Ordering::Relaxed),
            to_devices: self.to_devices.load(Ordering::Relaxed),
            from_controller: self.from_controller.load(Ordering::Relaxed),
            to_controller: self.to_controller.load(Ordering::Relaxed),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_independently() {
        let c = Counters::new();
        c.inc_from_devices();
        c.inc_from_devices();
        c.inc_to_controller();
        let snap = c.snapshot();
        assert_eq!(snap.from_devices, 2);
        assert_eq!(snap.to_devices, 0);
        assert_eq!(snap.from_controller, 0);
        assert_eq!(snap.to_controller, 1);
    }
}
