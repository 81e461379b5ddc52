use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::AsyncReadExt;
use tracing::info;
use uuid::Uuid;

use track_pipeline::config::{AnalyzerKind, AppConfig};
use track_pipeline::db::{self, MemoryTrackStore, PgTrackStore, TrackStore};
use track_pipeline::ingest::ingest_upload;
use track_pipeline::kafka::{self, KafkaJobQueue};
use track_pipeline::models::Author;
use track_pipeline::processor::{
    queue_processing, Analyzer, ExternalAnalyzer, InProcessAnalyzer, TrackProcessor,
};
use track_pipeline::queue::{run_worker, MemoryQueue};
use track_pipeline::storage::TrackFiles;
use track_pipeline::upload::{UploadMeta, UploadSessions};

const UPLOAD_CHUNK_SIZE: usize = 64 * 1024;

/// Track ingestion and processing pipeline
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Consume processing jobs from Kafka (default).
    Worker,
    /// Upload a sensor CSV as a new track and queue it.
    Import {
        #[arg(long, value_name = "FILE")]
        file: PathBuf,
        #[arg(long)]
        title: String,
        #[arg(long, default_value = "")]
        description: String,
        /// Username of the uploading author.
        #[arg(long)]
        author: String,
        /// Use the in-memory store and queue and process the track right away.
        #[arg(long, default_value_t = false)]
        local: bool,
    },
    /// Queue an existing track for processing again.
    Reprocess {
        #[arg(value_name = "TRACK_ID")]
        track_id: Uuid,
    },
}

fn build_analyzer(config: &AppConfig) -> Arc<dyn Analyzer> {
    match config.analyzer {
        AnalyzerKind::External => Arc::new(
            ExternalAnalyzer::new(&config.analysis_command)
                .with_district(config.analysis_district.clone())
                .with_settings(config.analysis_settings.clone()),
        ),
        AnalyzerKind::InProcess => Arc::new(InProcessAnalyzer::new(config.max_leg_meters)),
    }
}

async fn connect_store(config: &AppConfig) -> Result<Arc<PgTrackStore>> {
    let pool = db::init_pool(&config.database_url).await?;
    db::ensure_schema(&pool).await?;
    info!("Connected to database");
    Ok(Arc::new(PgTrackStore::new(pool)))
}

async fn worker(config: AppConfig) -> Result<()> {
    let store = connect_store(&config).await?;
    let processor = Arc::new(TrackProcessor::new(
        store,
        build_analyzer(&config),
        TrackFiles::new(&config.data_dir),
        config.job_max_attempts,
    ));

    kafka::start_kafka_consumer(&config, processor).await
}

async fn import(
    config: AppConfig,
    file: PathBuf,
    meta: UploadMeta,
    username: String,
    local: bool,
) -> Result<()> {
    let author = Author {
        id: Uuid::new_v5(&Uuid::NAMESPACE_OID, username.as_bytes()),
        username,
    };

    let sessions = UploadSessions::new();
    let mut session = sessions.begin(author, meta)?;
    let mut reader = tokio::fs::File::open(&file)
        .await
        .with_context(|| format!("opening {}", file.display()))?;
    let mut pending = Vec::new();
    let mut chunk = vec![0u8; UPLOAD_CHUNK_SIZE];
    loop {
        let n = reader.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        pending.extend_from_slice(&chunk[..n]);
        // Only hand over complete UTF-8 sequences.
        let valid = match std::str::from_utf8(&pending) {
            Ok(text) => text.len(),
            Err(e) if e.error_len().is_none() => e.valid_up_to(),
            Err(e) => return Err(e).with_context(|| format!("reading {}", file.display())),
        };
        session.add(std::str::from_utf8(&pending[..valid])?);
        pending.drain(..valid);
    }
    if !pending.is_empty() {
        anyhow::bail!("{} ends in a truncated UTF-8 sequence", file.display());
    }
    let upload = session.finish()?;
    let files = TrackFiles::new(&config.data_dir);

    if !local {
        let store = connect_store(&config).await?;
        let queue = KafkaJobQueue::new(&config)?;
        let (track, job) = ingest_upload(store.as_ref(), &queue, &files, upload).await?;
        info!("Track {} queued as job {}", track.id, job.job_id);
        println!("{}", serde_json::to_string_pretty(&track)?);
        return Ok(());
    }

    let store = Arc::new(MemoryTrackStore::new());
    let queue = Arc::new(MemoryQueue::new(
        config.job_lock_duration(),
        config.job_max_attempts,
    ));
    let (track, _) = ingest_upload(store.as_ref(), queue.as_ref(), &files, upload).await?;
    queue.close()?;

    let processor = Arc::new(TrackProcessor::new(
        store.clone(),
        build_analyzer(&config),
        files,
        config.job_max_attempts,
    ));
    run_worker(queue, processor).await?;

    let processed = store
        .get(track.id)
        .await?
        .with_context(|| format!("track {} vanished", track.id))?;
    println!("{}", serde_json::to_string_pretty(&processed)?);
    Ok(())
}

async fn reprocess(config: AppConfig, track_id: Uuid) -> Result<()> {
    let store = connect_store(&config).await?;
    let queue = KafkaJobQueue::new(&config)?;
    let job = queue_processing(store.as_ref(), &queue, track_id).await?;
    println!("{}", job.job_id);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let config = AppConfig::load()?;

    // Init logging
    tracing_subscriber::fmt()
        .with_env_filter(&config.log_level)
        .with_writer(std::io::stderr)
        .init();

    match cli.command.unwrap_or(Command::Worker) {
        Command::Worker => {
            info!("Starting track processing worker...");
            worker(config).await
        }
        Command::Import {
            file,
            title,
            description,
            author,
            local,
        } => {
            let original_file_name = file
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .unwrap_or_default();
            let meta = UploadMeta {
                title,
                description,
                original_file_name,
            };
            import(config, file, meta, author, local).await
        }
        Command::Reprocess { track_id } => reprocess(config, track_id).await,
    }
}
