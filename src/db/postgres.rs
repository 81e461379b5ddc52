use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::types::Json;
use sqlx::Row;
use uuid::Uuid;

use super::{queries, DbPool, TrackStore};
use crate::models::{Author, Job, ProcessingStatus, Statistics, Track};

pub struct PgTrackStore {
    pool: DbPool,
}

impl PgTrackStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

fn track_from_row(row: &PgRow) -> Result<Track> {
    let status: String = row.try_get("processing_status")?;
    let statistics: Option<Json<Statistics>> = row.try_get("statistics")?;
    let created_at: DateTime<Utc> = row.try_get("created_at")?;

    Ok(Track {
        id: row.try_get("id")?,
        slug: row.try_get("slug")?,
        title: row.try_get("title")?,
        description: row.try_get("description")?,
        author: Author {
            id: row.try_get("author_id")?,
            username: row.try_get("author_username")?,
        },
        processing_status: status.parse::<ProcessingStatus>()?,
        processing_job_id: row.try_get("processing_job_id")?,
        processing_log: row.try_get("processing_log")?,
        processing_attempts: row.try_get("processing_attempts")?,
        original_file_name: row.try_get("original_file_name")?,
        file_path: row.try_get("file_path")?,
        statistics: statistics.map(|s| s.0),
        created_at,
    })
}

#[async_trait]
impl TrackStore for PgTrackStore {
    async fn insert(&self, track: &Track) -> Result<bool> {
        let result = sqlx::query(queries::INSERT_TRACK)
            .bind(track.id)
            .bind(track.slug())
            .bind(&track.title)
            .bind(&track.description)
            .bind(track.author.id)
            .bind(&track.author.username)
            .bind(track.processing_status.as_str())
            .bind(track.processing_job_id)
            .bind(&track.processing_log)
            .bind(track.processing_attempts)
            .bind(&track.original_file_name)
            .bind(track.file_path())
            .bind(track.statistics.clone().map(Json))
            .bind(track.created_at)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn get(&self, id: Uuid) -> Result<Option<Track>> {
        let row = sqlx::query(queries::SELECT_TRACK)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(track_from_row).transpose()
    }

    async fn reset_for_processing(&self, id: Uuid, job_id: Uuid) -> Result<bool> {
        let result = sqlx::query(queries::UPDATE_TRACK_QUEUED)
            .bind(id)
            .bind(job_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn claim(&self, job: &Job) -> Result<Option<Track>> {
        let row = sqlx::query(queries::CLAIM_TRACK)
            .bind(job.track_id)
            .bind(job.job_id)
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(track_from_row).transpose()
    }

    async fn commit_success(&self, job: &Job, log: &str, statistics: &Statistics) -> Result<bool> {
        let result = sqlx::query(queries::COMMIT_TRACK_COMPLETE)
            .bind(job.track_id)
            .bind(job.job_id)
            .bind(log)
            .bind(Json(statistics.clone()))
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn commit_failure(&self, job: &Job, log: &str) -> Result<bool> {
        let result = sqlx::query(queries::COMMIT_TRACK_ERROR)
            .bind(job.track_id)
            .bind(job.job_id)
            .bind(log)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn delete(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(queries::DELETE_TRACK)
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() == 1)
    }
}
