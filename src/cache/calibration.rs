use std::time::Duration;

use serde::Serialize;

use crate::config::ThroughputConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IoDirection {
    Read,
    Write,
}

/// Moving estimates of local disk throughput, in MB/s.
///
/// Each observation is averaged with the previous estimate, so estimates
/// converge toward the device's steady-state speed while single slow or
/// fast transfers only move them halfway.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct IoThroughput {
    pub sparse_read: f64,
    pub dense_read: f64,
    pub sparse_write: f64,
    pub dense_write: f64,
}

impl IoThroughput {
    pub fn new(initial: &ThroughputConfig) -> Self {
        Self {
            sparse_read: initial.sparse_read_mbps,
            dense_read: initial.dense_read_mbps,
            sparse_write: initial.sparse_write_mbps,
            dense_write: initial.dense_write_mbps,
        }
    }

    pub fn speed(&self, direction: IoDirection, sparse: bool) -> f64 {
        match (direction, sparse) {
            (IoDirection::Read, true) => self.sparse_read,
            (IoDirection::Read, false) => self.dense_read,
            (IoDirection::Write, true) => self.sparse_write,
            (IoDirection::Write, false) => self.dense_write,
        }
    }

    fn speed_mut(&mut self, direction: IoDirection, sparse: bool) -> &mut f64 {
        match (direction, sparse) {
            (IoDirection::Read, true) => &mut self.sparse_read,
            (IoDirection::Read, false) => &mut self.dense_read,
            (IoDirection::Write, true) => &mut self.sparse_write,
            (IoDirection::Write, false) => &mut self.dense_write,
        }
    }

    /// Projected write plus read time for `size_mb`, in milliseconds.
    pub fn round_trip_ms(&self, size_mb: f64, sparse: bool) -> f64 {
        let write = size_mb / self.speed(IoDirection::Write, sparse);
        let read = size_mb / self.speed(IoDirection::Read, sparse);
        (write + read) * 1000.0
    }

    /// Folds one measured transfer into the matching estimate. Returns
    /// whether the estimate changed; transfers below `min_size_mb` and
    /// unmeasurably fast ones are ignored.
    pub fn observe(
        &mut self,
        direction: IoDirection,
        sparse: bool,
        size_mb: f64,
        elapsed: Duration,
        min_size_mb: f64,
    ) -> bool {
        let seconds = elapsed.as_secs_f64();
        if size_mb < min_size_mb || seconds <= 0.0 {
            return false;
        }
        let observed = size_mb / seconds;
        let estimate = self.speed_mut(direction, sparse);
        *estimate = (*estimate + observed) / 2.0;
        true
    }
}

impl Default for IoThroughput {
    fn default() -> Self {
        Self::new(&ThroughputConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_sums_read_and_write() {
        let io = IoThroughput::default();
        // 100 MB dense: 100/450 s write + 100/500 s read.
        let expected = (100.0 / 450.0 + 100.0 / 500.0) * 1000.0;
        assert!((io.round_trip_ms(100.0, false) - expected).abs() < 1e-9);
        assert!(io.round_trip_ms(100.0, true) > io.round_trip_ms(100.0, false));
    }

    #[test]
    fn observation_moves_estimate_halfway() {
        let mut io = IoThroughput::default();
        // 10 MB in 0.1 s is 100 MB/s.
        assert!(io.observe(
            IoDirection::Write,
            false,
            10.0,
            Duration::from_millis(100),
            2.0
        ));
        assert!((io.dense_write - 275.0).abs() < 1e-9);
        assert_eq!(io.sparse_write, 225.0);
        assert_eq!(io.dense_read, 500.0);
    }

    #[test]
    fn small_or_instant_transfers_are_ignored() {
        let mut io = IoThroughput::default();
        assert!(!io.observe(IoDirection::Read, true, 1.0, Duration::from_millis(5), 2.0));
        assert!(!io.observe(IoDirection::Read, true, 8.0, Duration::ZERO, 2.0));
        assert_eq!(io, IoThroughput::default());
    }

    #[test]
    fn repeated_observations_converge() {
        let mut io = IoThroughput::default();
        for _ in 0..40 {
            io.observe(IoDirection::Read, false, 50.0, Duration::from_millis(250), 2.0);
        }
        assert!((io.dense_read - 200.0).abs() < 1e-6);
    }
}
