//! Track processing state machine.
//!
//! ```text
//! pending ──claim──> processing ──commit──> complete | error
//!    ^                                          │
//!    └──────────── queue_processing ────────────┘
//! ```
//!
//! The job id stored on the track is the only ownership token. Every
//! transition is a conditional update against it, so a superseded job (the
//! track was re-queued meanwhile) or a duplicate delivery of an already
//! committed job drops out without touching the record.

pub mod analysis;

use anyhow::{bail, Context, Result};
use std::sync::Arc;
use tokio::fs;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::db::TrackStore;
use crate::models::{Job, Statistics, Track};
use crate::queue::JobQueue;
use crate::storage::{StagedRun, TrackFiles};

pub use analysis::{AnalysisReport, Analyzer, ExternalAnalyzer, InProcessAnalyzer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    Complete,
    Failed,
    /// The job no longer owns the track, or another delivery already committed.
    Superseded,
    /// Delivered more often than allowed; the track was put into `error`.
    Abandoned,
}

enum Execution {
    Completed { log: String, statistics: Statistics },
    Failed { log: String },
}

/// Puts a track (back) into `pending` under a fresh job id, then submits the job.
///
/// The job id is persisted before the job becomes visible, so a worker can
/// never see a job its track doesn't know about yet.
pub async fn queue_processing(
    store: &dyn TrackStore,
    queue: &dyn JobQueue,
    track_id: Uuid,
) -> Result<Job> {
    let job = Job {
        track_id,
        job_id: Uuid::new_v4(),
    };

    if !store.reset_for_processing(track_id, job.job_id).await? {
        bail!("track {} not found", track_id);
    }
    queue.submit(&job).await?;

    info!("Queued job {} for track {}", job.job_id, track_id);
    Ok(job)
}

pub struct TrackProcessor {
    store: Arc<dyn TrackStore>,
    analyzer: Arc<dyn Analyzer>,
    files: TrackFiles,
    max_attempts: u32,
}

impl TrackProcessor {
    pub fn new(
        store: Arc<dyn TrackStore>,
        analyzer: Arc<dyn Analyzer>,
        files: TrackFiles,
        max_attempts: u32,
    ) -> Self {
        Self {
            store,
            analyzer,
            files,
            max_attempts: max_attempts.max(1),
        }
    }

    /// Claim, execute and commit one delivery of `job`.
    ///
    /// Failures of the analysis itself end in the `error` state and an `Ok`
    /// outcome; only store failures surface as `Err`, leaving redelivery to
    /// the queue.
    pub async fn process_job(&self, job: &Job) -> Result<JobOutcome> {
        let Some(track) = self.store.claim(job).await? else {
            info!(
                "Job {} no longer owns track {}, skipping",
                job.job_id, job.track_id
            );
            return Ok(JobOutcome::Superseded);
        };

        if i64::from(track.processing_attempts) > i64::from(self.max_attempts) {
            warn!(
                "Track {} was delivered {} times, abandoning job {}",
                track.id, track.processing_attempts, job.job_id
            );
            let log = format!(
                "Processing abandoned after {} attempts.\n",
                self.max_attempts
            );
            self.store.commit_failure(job, &log).await?;
            return Ok(JobOutcome::Abandoned);
        }

        info!(
            "Processing track {} ({}), attempt {}",
            track.id,
            track.slug(),
            track.processing_attempts
        );

        let execution = match self.execute(&track).await {
            Ok(execution) => execution,
            Err(e) => {
                warn!("Processing track {} failed: {:#}", track.id, e);
                Execution::Failed {
                    log: format!("{:?}\n", e),
                }
            }
        };

        let (committed, outcome) = match execution {
            Execution::Completed { log, statistics } => (
                self.store.commit_success(job, &log, &statistics).await?,
                JobOutcome::Complete,
            ),
            Execution::Failed { log } => (
                self.store.commit_failure(job, &log).await?,
                JobOutcome::Failed,
            ),
        };

        if !committed {
            info!(
                "Job {} lost track {} before committing, result dropped",
                job.job_id, track.id
            );
            return Ok(JobOutcome::Superseded);
        }

        info!("Track {} processed: {:?}", track.id, outcome);
        Ok(outcome)
    }

    /// Stages the upload, runs the analyzer and reads its statistics. Works in
    /// the directories of the claimed attempt, so a concurrent delivery of the
    /// same job can't clobber this run's files.
    async fn execute(&self, track: &Track) -> Result<Execution> {
        let attempt = u32::try_from(track.processing_attempts).unwrap_or_default();
        let run = self.files.track(track.file_path()).stage(attempt).await?;
        let path_cache = self.files.path_cache_dir().await?;

        let report = self.analyzer.analyze(&run, &path_cache).await?;
        if !report.success {
            let status = match report.exit_code {
                Some(code) => format!("exit code {}", code),
                None => "a signal".to_string(),
            };
            warn!("Analysis of track {} ended with {}", track.id, status);
            return Ok(Execution::Failed {
                log: format!("{}Analysis ended with {}.\n", report.log, status),
            });
        }

        match read_statistics(&run).await {
            Ok(statistics) => Ok(Execution::Completed {
                log: report.log,
                statistics,
            }),
            Err(e) => {
                error!("Track {} produced no usable statistics: {:#}", track.id, e);
                Ok(Execution::Failed {
                    log: format!("{}{:?}\n", report.log, e),
                })
            }
        }
    }
}

async fn read_statistics(run: &StagedRun) -> Result<Statistics> {
    let path = run.statistics_file();
    let raw = fs::read(&path)
        .await
        .with_context(|| format!("reading {}", path.display()))?;
    serde_json::from_slice(&raw).with_context(|| format!("parsing {}", path.display()))
}
