use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use uuid::Uuid;

use super::TrackStore;
use crate::models::{Job, ProcessingStatus, Statistics, Track};

/// Process-local store with the same conditional-update semantics as Postgres.
#[derive(Default)]
pub struct MemoryTrackStore {
    tracks: Mutex<HashMap<Uuid, Track>>,
}

impl MemoryTrackStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, HashMap<Uuid, Track>>> {
        self.tracks
            .lock()
            .map_err(|_| anyhow!("track store mutex poisoned"))
    }

    /// Applies `update` if `job` owns the track and it is in one of `from`.
    fn transition<T>(
        &self,
        job: &Job,
        from: &[ProcessingStatus],
        update: impl FnOnce(&mut Track) -> T,
    ) -> Result<Option<T>> {
        let mut tracks = self.lock()?;
        Ok(tracks
            .get_mut(&job.track_id)
            .filter(|t| t.processing_job_id == Some(job.job_id))
            .filter(|t| from.contains(&t.processing_status))
            .map(update))
    }
}

#[async_trait]
impl TrackStore for MemoryTrackStore {
    async fn insert(&self, track: &Track) -> Result<bool> {
        let mut tracks = self.lock()?;
        if tracks.values().any(|t| t.slug() == track.slug()) {
            return Ok(false);
        }
        tracks.insert(track.id, track.clone());
        Ok(true)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Track>> {
        Ok(self.lock()?.get(&id).cloned())
    }

    async fn reset_for_processing(&self, id: Uuid, job_id: Uuid) -> Result<bool> {
        let mut tracks = self.lock()?;
        Ok(match tracks.get_mut(&id) {
            Some(track) => {
                track.processing_status = ProcessingStatus::Pending;
                track.processing_job_id = Some(job_id);
                track.processing_log.clear();
                track.processing_attempts = 0;
                true
            }
            None => false,
        })
    }

    async fn claim(&self, job: &Job) -> Result<Option<Track>> {
        self.transition(
            job,
            &[ProcessingStatus::Pending, ProcessingStatus::Processing],
            |track| {
                track.processing_status = ProcessingStatus::Processing;
                track.processing_log.clear();
                track.processing_attempts += 1;
                track.clone()
            },
        )
    }

    async fn commit_success(&self, job: &Job, log: &str, statistics: &Statistics) -> Result<bool> {
        let committed = self.transition(job, &[ProcessingStatus::Processing], |track| {
            track.processing_status = ProcessingStatus::Complete;
            track.processing_log.push_str(log);
            track.statistics = Some(statistics.clone());
        })?;
        Ok(committed.is_some())
    }

    async fn commit_failure(&self, job: &Job, log: &str) -> Result<bool> {
        let committed = self.transition(job, &[ProcessingStatus::Processing], |track| {
            track.processing_status = ProcessingStatus::Error;
            track.processing_log.push_str(log);
        })?;
        Ok(committed.is_some())
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        Ok(self.lock()?.remove(&id).is_some())
    }
}
