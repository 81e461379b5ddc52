use anyhow::{anyhow, Result};
use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::models::Job;
use crate::processor::TrackProcessor;

const IDLE_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Producer side of the processing queue.
#[async_trait]
pub trait JobQueue: Send + Sync {
    /// Makes `job` visible to workers. Submitting a job id that is already
    /// queued or running is a no-op.
    async fn submit(&self, job: &Job) -> Result<()>;
}

struct QueuedJob {
    job: Job,
    attempts: u32,
    locked_until: Option<Instant>,
    lease: u64,
}

#[derive(Default)]
struct QueueState {
    jobs: HashMap<Uuid, QueuedJob>,
    order: VecDeque<Uuid>,
    abandoned: Vec<Job>,
    next_lease: u64,
    closed: bool,
}

/// A delivered job. Held by the worker until it acks.
#[derive(Debug, Clone, Copy)]
pub struct Lease {
    pub job: Job,
    pub attempt: u32,
    token: u64,
}

/// In-process at-least-once queue.
///
/// A delivery locks the job for `lock_duration`. A worker that neither acks
/// nor extends the lock in time is considered stalled and the job becomes
/// deliverable again. After `max_attempts` stalled deliveries the job goes
/// out once more, so the worker can record the abandonment on the track
/// (its claim sees the exceeded attempt count); if that one stalls too, the
/// job is dropped into [`MemoryQueue::abandoned`].
pub struct MemoryQueue {
    state: Mutex<QueueState>,
    notify: Notify,
    lock_duration: Duration,
    max_attempts: u32,
}

impl MemoryQueue {
    pub fn new(lock_duration: Duration, max_attempts: u32) -> Self {
        Self {
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
            lock_duration,
            max_attempts: max_attempts.max(1),
        }
    }

    fn lock(&self) -> Result<MutexGuard<'_, QueueState>> {
        self.state
            .lock()
            .map_err(|_| anyhow!("job queue mutex poisoned"))
    }

    /// No more submissions; workers return once the queue is drained.
    pub fn close(&self) -> Result<()> {
        self.lock()?.closed = true;
        self.notify.notify_waiters();
        Ok(())
    }

    pub fn abandoned(&self) -> Result<Vec<Job>> {
        Ok(self.lock()?.abandoned.clone())
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.lock()?.jobs.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Waits for the next deliverable job. `None` once closed and drained.
    pub async fn next(&self) -> Result<Option<Lease>> {
        loop {
            let wait_until = {
                let mut state = self.lock()?;
                let now = Instant::now();
                match self.take_ready(&mut state, now) {
                    Some(lease) => return Ok(Some(lease)),
                    None if state.closed && state.jobs.is_empty() => return Ok(None),
                    None => state
                        .jobs
                        .values()
                        .filter_map(|q| q.locked_until)
                        .min()
                        .unwrap_or(now + IDLE_POLL_INTERVAL)
                        .min(now + IDLE_POLL_INTERVAL),
                }
            };

            tokio::select! {
                _ = self.notify.notified() => {}
                _ = tokio::time::sleep_until(wait_until) => {}
            }
        }
    }

    fn take_ready(&self, state: &mut QueueState, now: Instant) -> Option<Lease> {
        let mut index = 0;
        while index < state.order.len() {
            let id = state.order[index];
            let Some(queued) = state.jobs.get(&id) else {
                state.order.remove(index);
                continue;
            };

            match queued.locked_until {
                Some(until) if until > now => {
                    index += 1;
                    continue;
                }
                Some(_) if queued.attempts > self.max_attempts => {
                    warn!(
                        "Job {} for track {} stalled {} times, abandoning",
                        id, queued.job.track_id, queued.attempts
                    );
                    let job = queued.job;
                    state.jobs.remove(&id);
                    state.order.remove(index);
                    state.abandoned.push(job);
                    continue;
                }
                Some(_) => {
                    warn!("Job {} stalled, redelivering", id);
                }
                None => {}
            }

            state.next_lease += 1;
            let token = state.next_lease;
            let queued = state.jobs.get_mut(&id)?;
            queued.attempts += 1;
            queued.locked_until = Some(now + self.lock_duration);
            queued.lease = token;
            return Some(Lease {
                job: queued.job,
                attempt: queued.attempts,
                token,
            });
        }
        None
    }

    /// Pushes the lock expiry out by another `lock_duration`. `false` if the
    /// lease was lost to a redelivery.
    pub fn extend(&self, lease: &Lease) -> Result<bool> {
        let mut state = self.lock()?;
        Ok(match state.jobs.get_mut(&lease.job.job_id) {
            Some(queued) if queued.lease == lease.token => {
                queued.locked_until = Some(Instant::now() + self.lock_duration);
                true
            }
            _ => false,
        })
    }

    /// Removes the job. A stale lease (job since redelivered) is ignored.
    pub fn ack(&self, lease: &Lease) -> Result<bool> {
        let mut state = self.lock()?;
        let owned = matches!(
            state.jobs.get(&lease.job.job_id),
            Some(queued) if queued.lease == lease.token
        );
        if owned {
            state.jobs.remove(&lease.job.job_id);
            state.order.retain(|id| *id != lease.job.job_id);
        }
        Ok(owned)
    }
}

#[async_trait]
impl JobQueue for MemoryQueue {
    async fn submit(&self, job: &Job) -> Result<()> {
        {
            let mut state = self.lock()?;
            if state.closed {
                return Err(anyhow!("job queue is closed"));
            }
            if state.jobs.contains_key(&job.job_id) {
                info!("Job {} already queued, ignoring duplicate", job.job_id);
                return Ok(());
            }
            state.jobs.insert(
                job.job_id,
                QueuedJob {
                    job: *job,
                    attempts: 0,
                    locked_until: None,
                    lease: 0,
                },
            );
            state.order.push_back(job.job_id);
        }
        self.notify.notify_one();
        Ok(())
    }
}

/// Consumes jobs until the queue is closed and drained.
///
/// While a job runs its lock is renewed every half lock duration. A job whose
/// processing returns an error is left unacked, so the queue redelivers it
/// once the lock runs out.
pub async fn run_worker(queue: Arc<MemoryQueue>, processor: Arc<TrackProcessor>) -> Result<()> {
    let renew_every = (queue.lock_duration / 2).max(Duration::from_millis(10));

    while let Some(lease) = queue.next().await? {
        info!(
            "Delivering job {} for track {} (attempt {})",
            lease.job.job_id, lease.job.track_id, lease.attempt
        );

        let work = processor.process_job(&lease.job);
        tokio::pin!(work);
        let mut renew = tokio::time::interval_at(Instant::now() + renew_every, renew_every);

        let result = loop {
            tokio::select! {
                result = &mut work => break result,
                _ = renew.tick() => {
                    if !queue.extend(&lease)? {
                        warn!("Lost lock on job {}", lease.job.job_id);
                    }
                }
            }
        };

        match result {
            Ok(outcome) => {
                info!("Job {} finished: {:?}", lease.job.job_id, outcome);
                queue.ack(&lease)?;
            }
            Err(e) => {
                error!("Error processing job {}: {:?}", lease.job.job_id, e);
            }
        }
    }

    Ok(())
}
