use anyhow::Result;
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};
use uuid::Uuid;

use crate::models::{Job, Statistics, Track};

pub mod memory;
pub mod postgres;
pub mod queries;

pub use memory::MemoryTrackStore;
pub use postgres::PgTrackStore;

pub type DbPool = Pool<Postgres>;

pub async fn init_pool(database_url: &str) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(database_url)
        .await?;
    Ok(pool)
}

pub async fn ensure_schema(pool: &DbPool) -> Result<()> {
    sqlx::query(queries::CREATE_TRACKS_TABLE)
        .execute(pool)
        .await?;
    Ok(())
}

/// Document store for track records.
///
/// Every processing transition is a conditional update keyed on the job id,
/// never a read-then-write: between any two calls another process may have
/// re-queued the track.
#[async_trait]
pub trait TrackStore: Send + Sync {
    /// Persists a new track. `false` if the slug is already taken.
    async fn insert(&self, track: &Track) -> Result<bool>;

    async fn get(&self, id: Uuid) -> Result<Option<Track>>;

    /// Resets the track to `pending` under a fresh job id and clears the log.
    /// `false` if the track doesn't exist.
    async fn reset_for_processing(&self, id: Uuid, job_id: Uuid) -> Result<bool>;

    /// Moves the track to `processing` if `job` still owns it and it hasn't
    /// finished yet. Returns the updated record, or `None` for a stale job.
    async fn claim(&self, job: &Job) -> Result<Option<Track>>;

    /// `processing` → `complete`, appending `log`. `false` if `job` lost ownership
    /// or another delivery already committed.
    async fn commit_success(&self, job: &Job, log: &str, statistics: &Statistics) -> Result<bool>;

    /// `processing` → `error`, appending `log`. Same ownership rules as success.
    async fn commit_failure(&self, job: &Job, log: &str) -> Result<bool>;

    async fn delete(&self, id: Uuid) -> Result<bool>;
}
