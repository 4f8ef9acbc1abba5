//! Per-cycle workload accounting.

use serde::Serialize;
use std::time::Duration;

/// Writes sent during one collection cycle.
///
/// Accumulated while the cycle runs, logged once at the end and then dropped.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkloadMetrics {
    /// Documents acknowledged by the insert phase.
    pub plain_inserts: u64,
    /// Documents removed by the delete phase.
    pub plain_deletes: u64,
    #[serde(skip)]
    pub elapsed: Duration,
}

impl WorkloadMetrics {
    /// Elapsed seconds rounded to two decimals.
    pub fn elapsed_secs(&self) -> f64 {
        (self.elapsed.as_secs_f64() * 100.0).round() / 100.0
    }

    /// JSON rendering of the write counts, e.g. `{"plainInserts":5,"plainDeletes":5}`.
    pub fn writes_json(&self) -> String {
        serde_json::to_string(self).unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_writes_json() {
        let metrics = WorkloadMetrics {
            plain_inserts: 50_000,
            plain_deletes: 49_990,
            elapsed: Duration::from_millis(1234),
        };

        assert_eq!(
            metrics.writes_json(),
            r#"{"plainInserts":50000,"plainDeletes":49990}"#
        );
    }

    #[test]
    fn test_elapsed_rounding() {
        let metrics = WorkloadMetrics {
            elapsed: Duration::from_millis(12_345),
            ..Default::default()
        };
        assert_eq!(metrics.elapsed_secs(), 12.35);
    }
}
