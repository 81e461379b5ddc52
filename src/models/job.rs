use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A unit of processing work. Only valid while the track's
/// `processing_job_id` still equals `job_id`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Job {
    pub track_id: Uuid,
    pub job_id: Uuid,
}

/// Queue payload. The job id travels as the queue's identity key, not in the body.
#[derive(Debug, Serialize, Deserialize)]
pub struct JobPayload {
    #[serde(rename = "trackId")]
    pub track_id: Uuid,
}

impl Job {
    pub fn payload(&self) -> JobPayload {
        JobPayload {
            track_id: self.track_id,
        }
    }
}
