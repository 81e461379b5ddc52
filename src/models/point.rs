use serde::{Deserialize, Serialize};

/// One timestamped GPS + distance-sensor sample of a recorded ride.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Point {
    /// `DD.MM.YYYY`
    pub date: Option<String>,
    /// `HH:MM:SS`
    pub time: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    /// Degrees.
    pub course: Option<f64>,
    /// Meters per second.
    pub speed: Option<f64>,
    pub distance_overtaker: Option<f64>,
    pub distance_stationary: Option<f64>,
    pub confirmed: bool,
    pub private: bool,
}

impl Point {
    /// Both coordinates, or nothing. A point carrying only one of them is invalid.
    pub fn position(&self) -> Option<(f64, f64)> {
        match (self.latitude, self.longitude) {
            (Some(lat), Some(lon)) => Some((lat, lon)),
            _ => None,
        }
    }

    pub fn has_timestamp(&self) -> bool {
        self.date.is_some() && self.time.is_some()
    }
}
