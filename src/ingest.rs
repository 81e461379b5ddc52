use anyhow::{bail, Context, Result};
use tracing::{info, warn};
use uuid::Uuid;

use crate::db::TrackStore;
use crate::models::{Job, Track};
use crate::parser::validate_format;
use crate::processor::queue_processing;
use crate::queue::JobQueue;
use crate::storage::TrackFiles;
use crate::upload::CompletedUpload;

const MAX_SLUG_ATTEMPTS: usize = 5;

/// Creates a track from a finished upload and queues it for processing.
///
/// Rejects bad file names and undetectable bodies before anything is written.
/// Validation failures keep their typed error (`TrackError`, `FormatError`)
/// as the root cause.
pub async fn ingest_upload(
    store: &dyn TrackStore,
    queue: &dyn JobQueue,
    files: &TrackFiles,
    upload: CompletedUpload,
) -> Result<(Track, Job)> {
    let format = validate_format(&upload.body)?;
    let CompletedUpload { author, meta, body } = upload;

    for _ in 0..MAX_SLUG_ATTEMPTS {
        let mut track = Track::new(
            author.clone(),
            &meta.title,
            &meta.description,
            &meta.original_file_name,
        )?;

        if !store.insert(&track).await? {
            warn!("Slug {} already taken, rolling a new one", track.slug());
            continue;
        }

        let dir = files.track(track.file_path());
        if let Err(e) = dir.write_original(body.as_bytes()).await {
            store.delete(track.id).await?;
            return Err(e).context("storing uploaded track");
        }

        let job = queue_processing(store, queue, track.id).await?;
        track.processing_job_id = Some(job.job_id);

        info!(
            "Ingested track {} ({}) as {:?} for {}",
            track.id,
            track.slug(),
            format,
            track.author.username
        );
        return Ok((track, job));
    }

    bail!(
        "no free slug for {:?} after {} attempts",
        meta.title,
        MAX_SLUG_ATTEMPTS
    )
}

/// Removes the track record and its directory tree. `false` if it didn't exist.
pub async fn delete_track(store: &dyn TrackStore, files: &TrackFiles, id: Uuid) -> Result<bool> {
    let Some(track) = store.get(id).await? else {
        return Ok(false);
    };

    files.track(track.file_path()).remove().await?;
    let deleted = store.delete(id).await?;
    info!("Deleted track {} ({})", id, track.slug());
    Ok(deleted)
}
