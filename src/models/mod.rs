pub mod job;
pub mod point;
pub mod statistics;
pub mod track;

pub use job::{Job, JobPayload};
pub use point::Point;
pub use statistics::Statistics;
pub use track::{Author, ProcessingStatus, Track, TrackError};
