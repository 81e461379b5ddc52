use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Derived ride statistics. Always recomputed from the recording, either by the
/// external analysis tool (`statistics.json`) or by the in-process engine.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Statistics {
    pub recorded_at: Option<DateTime<Utc>>,
    pub recorded_until: Option<DateTime<Utc>>,
    /// Seconds between `recorded_at` and `recorded_until`.
    pub duration: Option<f64>,
    /// Meters.
    pub length: f64,
    #[serde(default)]
    pub segments: Option<u32>,
    pub num_events: u64,
    pub num_measurements: u64,
    pub num_valid: u64,
}

impl Statistics {
    pub fn duration_between(
        recorded_at: Option<DateTime<Utc>>,
        recorded_until: Option<DateTime<Utc>>,
    ) -> Option<f64> {
        match (recorded_at, recorded_until) {
            (Some(start), Some(end)) => Some((end - start).num_milliseconds() as f64 / 1000.0),
            _ => None,
        }
    }
}
