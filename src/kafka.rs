use crate::config::AppConfig;
use crate::models::{Job, JobPayload};
use crate::processor::TrackProcessor;
use crate::queue::JobQueue;
use anyhow::{anyhow, Context};
use async_trait::async_trait;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use rdkafka::{Offset, TopicPartitionList};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};
use uuid::Uuid;

const SEND_TIMEOUT: Duration = Duration::from_secs(10);
const SEEK_TIMEOUT: Duration = Duration::from_secs(10);
/// Kafka refuses a poll interval below the group session timeout.
const MIN_POLL_INTERVAL_MS: u64 = 45_000;

fn client_config(config: &AppConfig) -> ClientConfig {
    let mut client_config = ClientConfig::new();
    client_config
        .set("bootstrap.servers", &config.kafka_bootstrap_servers)
        // SASL Configuration
        .set("security.protocol", &config.kafka_security_protocol)
        .set("sasl.mechanism", &config.kafka_sasl_mechanism)
        .set("sasl.username", &config.kafka_username)
        .set("sasl.password", &config.kafka_password);
    client_config
}

/// Publishes processing jobs. The record key is the job id, the payload `{"trackId": ...}`.
pub struct KafkaJobQueue {
    producer: FutureProducer,
    topic: String,
}

impl KafkaJobQueue {
    pub fn new(config: &AppConfig) -> anyhow::Result<Self> {
        let producer: FutureProducer = client_config(config)
            .set("message.timeout.ms", "10000")
            .set("enable.idempotence", "true")
            .create()?;
        Ok(Self {
            producer,
            topic: config.kafka_topic.clone(),
        })
    }
}

#[async_trait]
impl JobQueue for KafkaJobQueue {
    async fn submit(&self, job: &Job) -> anyhow::Result<()> {
        let key = job.job_id.to_string();
        let payload = serde_json::to_vec(&job.payload())?;
        let record = FutureRecord::to(&self.topic).key(&key).payload(&payload);

        self.producer
            .send(record, Timeout::After(SEND_TIMEOUT))
            .await
            .map_err(|(e, _)| anyhow!("publishing job {}: {}", job.job_id, e))?;
        Ok(())
    }
}

/// Rebuilds a job from a record's key (job id) and payload (track id).
pub fn decode_job(key: Option<&[u8]>, payload: Option<&[u8]>) -> anyhow::Result<Job> {
    let key = key.ok_or_else(|| anyhow!("message has no key"))?;
    let job_id = Uuid::parse_str(std::str::from_utf8(key)?).context("invalid job id key")?;
    let payload = payload.ok_or_else(|| anyhow!("message has no payload"))?;
    let JobPayload { track_id } = serde_json::from_slice(payload).context("invalid job payload")?;
    Ok(Job { track_id, job_id })
}

/// What happens to a consumed record's offset once its job was handled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    /// Done with the record, including records that can never succeed.
    Commit,
    /// The store or another dependency failed; the record must be consumed again.
    Redeliver,
}

async fn handle_record(
    processor: &TrackProcessor,
    key: Option<&[u8]>,
    payload: Option<&[u8]>,
    offset: i64,
) -> Disposition {
    let job = match decode_job(key, payload) {
        Ok(job) => job,
        Err(e) => {
            warn!("Dropping malformed job message at offset {}: {}", offset, e);
            return Disposition::Commit;
        }
    };

    match processor.process_job(&job).await {
        Ok(outcome) => {
            info!("Job {} finished: {:?}", job.job_id, outcome);
            Disposition::Commit
        }
        Err(e) => {
            error!("Error processing job {}: {:?}", job.job_id, e);
            Disposition::Redeliver
        }
    }
}

/// Starts the Kafka consumer with SASL/SCRAM authentication and a circuit breaker mechanism.
///
/// Jobs are processed one at a time and their offset is committed only after
/// processing returns, so a worker that dies mid-job gets the job redelivered.
/// When processing fails on infrastructure (the store is unreachable, say) the
/// partition is rewound to the record and it is consumed again after a pause;
/// repeated failures trip the circuit breaker.
/// A worker that doesn't come back to poll within the job lock duration is
/// evicted from the group and its uncommitted jobs move to another member.
pub async fn start_kafka_consumer(
    config: &AppConfig,
    processor: Arc<TrackProcessor>,
) -> anyhow::Result<()> {
    info!("Initializing Kafka consumer for topic: {}", config.kafka_topic);

    let poll_interval_ms = (config.job_lock_duration().as_millis() as u64).max(MIN_POLL_INTERVAL_MS);
    let consumer: StreamConsumer = client_config(config)
        .set("group.id", &config.kafka_group_id)
        .set("auto.offset.reset", &config.kafka_auto_offset_reset)
        .set("enable.auto.commit", "false")
        .set("max.poll.interval.ms", poll_interval_ms.to_string())
        .create()?;

    consumer.subscribe(&[&config.kafka_topic])?;
    info!("Subscribed to topic: {}", config.kafka_topic);

    let mut consecutive_failures = 0;
    let max_retries = config.kafka_max_retries;
    let cooldown_duration = Duration::from_secs(config.kafka_circuit_breaker_cooldown);

    loop {
        // Circuit Breaker Check
        if consecutive_failures >= max_retries {
            warn!(
                "Circuit breaker tripped ({} consecutive failures)! Sleeping for {} seconds...",
                consecutive_failures,
                config.kafka_circuit_breaker_cooldown
            );
            tokio::time::sleep(cooldown_duration).await;
            consecutive_failures = 0;
            info!("Circuit breaker reset. Resuming consumption.");
        }

        match consumer.recv().await {
            Ok(m) => {
                let m = m.detach();
                let topic = m.topic().to_string();
                let partition = m.partition();
                let offset = m.offset();
                let disposition = handle_record(&processor, m.key(), m.payload(), offset).await;
                drop(m);

                match disposition {
                    Disposition::Commit => {
                        consecutive_failures = 0;
                        let mut processed = TopicPartitionList::new();
                        processed.add_partition_offset(&topic, partition, Offset::Offset(offset + 1))?;
                        if let Err(e) = consumer.commit(&processed, CommitMode::Async) {
                            error!("Failed to commit offset {} on {}: {}", offset, topic, e);
                        }
                    }
                    Disposition::Redeliver => {
                        consecutive_failures += 1;
                        consumer
                            .seek(&topic, partition, Offset::Offset(offset), Timeout::After(SEEK_TIMEOUT))
                            .with_context(|| format!("rewinding {} [{}] to offset {}", topic, partition, offset))?;
                        tokio::time::sleep(Duration::from_millis(500)).await;
                    }
                }
            }
            Err(e) => {
                error!("Kafka error: {}. Incrementing failure count ({} / {})", e, consecutive_failures + 1, max_retries);
                consecutive_failures += 1;

                // Small delay to prevent tight loop in case of minor network glitches
                tokio::time::sleep(Duration::from_millis(500)).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{MemoryTrackStore, TrackStore};
    use crate::models::{Statistics, Track};
    use crate::processor::InProcessAnalyzer;
    use crate::storage::TrackFiles;
    use anyhow::bail;

    /// A store whose database is unreachable.
    struct UnreachableStore;

    #[async_trait]
    impl TrackStore for UnreachableStore {
        async fn insert(&self, _track: &Track) -> anyhow::Result<bool> {
            bail!("connection refused")
        }
        async fn get(&self, _id: Uuid) -> anyhow::Result<Option<Track>> {
            bail!("connection refused")
        }
        async fn reset_for_processing(&self, _id: Uuid, _job_id: Uuid) -> anyhow::Result<bool> {
            bail!("connection refused")
        }
        async fn claim(&self, _job: &Job) -> anyhow::Result<Option<Track>> {
            bail!("connection refused")
        }
        async fn commit_success(&self, _job: &Job, _log: &str, _statistics: &Statistics) -> anyhow::Result<bool> {
            bail!("connection refused")
        }
        async fn commit_failure(&self, _job: &Job, _log: &str) -> anyhow::Result<bool> {
            bail!("connection refused")
        }
        async fn delete(&self, _id: Uuid) -> anyhow::Result<bool> {
            bail!("connection refused")
        }
    }

    fn record(job: &Job) -> (String, Vec<u8>) {
        (job.job_id.to_string(), serde_json::to_vec(&job.payload()).unwrap())
    }

    fn job() -> Job {
        Job {
            track_id: Uuid::new_v4(),
            job_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    async fn test_store_failure_keeps_record_uncommitted() {
        let tmp = tempfile::tempdir().unwrap();
        let processor = TrackProcessor::new(
            Arc::new(UnreachableStore),
            Arc::new(InProcessAnalyzer::new(100.0)),
            TrackFiles::new(tmp.path()),
            3,
        );

        let (key, payload) = record(&job());
        let disposition = handle_record(&processor, Some(key.as_bytes()), Some(payload.as_slice()), 7).await;
        assert_eq!(disposition, Disposition::Redeliver);
    }

    #[tokio::test]
    async fn test_handled_and_malformed_records_are_committed() {
        let tmp = tempfile::tempdir().unwrap();
        let processor = TrackProcessor::new(
            Arc::new(MemoryTrackStore::new()),
            Arc::new(InProcessAnalyzer::new(100.0)),
            TrackFiles::new(tmp.path()),
            3,
        );

        // Unknown track: the job is stale and finishes as superseded.
        let (key, payload) = record(&job());
        let disposition = handle_record(&processor, Some(key.as_bytes()), Some(payload.as_slice()), 0).await;
        assert_eq!(disposition, Disposition::Commit);

        let disposition = handle_record(&processor, Some(b"garbage"), Some(b"{}"), 1).await;
        assert_eq!(disposition, Disposition::Commit);
    }

    #[test]
    fn test_decode_job() {
        let job_id = Uuid::new_v4();
        let track_id = Uuid::new_v4();
        let key = job_id.to_string();
        let payload = format!(r#"{{"trackId":"{}"}}"#, track_id);

        let job = decode_job(Some(key.as_bytes()), Some(payload.as_bytes())).unwrap();
        assert_eq!(job, Job { track_id, job_id });
    }

    #[test]
    fn test_decode_job_rejects_malformed_messages() {
        let key = Uuid::new_v4().to_string();
        assert!(decode_job(None, Some(b"{}")).is_err());
        assert!(decode_job(Some(b"not-a-uuid"), Some(br#"{"trackId":"x"}"#)).is_err());
        assert!(decode_job(Some(key.as_bytes()), None).is_err());
        assert!(decode_job(Some(key.as_bytes()), Some(b"{\"track\":1}")).is_err());
    }
}
