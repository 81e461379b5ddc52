use anyhow::Result;
use dotenvy::dotenv;
use serde::Deserialize;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::statistics::DEFAULT_MAX_LEG_METERS;

#[derive(Debug, Deserialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "kebab-case")]
pub enum AnalyzerKind {
    External,
    InProcess,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub kafka_bootstrap_servers: String,
    pub kafka_topic: String,
    pub kafka_group_id: String,
    pub kafka_auto_offset_reset: String,
    pub kafka_sasl_mechanism: String,
    pub kafka_username: String,
    pub kafka_password: String,
    pub kafka_security_protocol: String,
    pub kafka_max_retries: u32,
    pub kafka_circuit_breaker_cooldown: u64,
    pub database_url: String,
    pub log_level: String,
    pub data_dir: PathBuf,
    pub analyzer: AnalyzerKind,
    pub analysis_command: String,
    pub analysis_district: Option<String>,
    pub analysis_settings: Option<PathBuf>,
    pub max_leg_meters: f64,
    pub job_lock_duration_secs: u64,
    pub job_max_attempts: u32,
}

fn var_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn parsed_or<T: FromStr>(name: &str, default: T) -> T {
    env::var(name)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

fn optional(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

impl AppConfig {
    pub fn load() -> Result<Self> {
        dotenv().ok();

        let kafka_bootstrap_servers = var_or("KAFKA_BOOTSTRAP_SERVERS", "localhost:9092");
        let kafka_topic = var_or("KAFKA_TOPIC", "track-processing");
        let kafka_group_id = var_or("KAFKA_GROUP_ID", "track-pipeline-worker");
        let kafka_auto_offset_reset = var_or("KAFKA_AUTO_OFFSET_RESET", "earliest");
        let kafka_sasl_mechanism = var_or("KAFKA_SASL_MECHANISM", "SCRAM-SHA-256");
        let kafka_username = env::var("KAFKA_USERNAME").unwrap_or_default();
        let kafka_password = env::var("KAFKA_PASSWORD").unwrap_or_default();
        let kafka_security_protocol = var_or("KAFKA_SECURITY_PROTOCOL", "SASL_PLAINTEXT");
        let kafka_max_retries = parsed_or("KAFKA_MAX_RETRIES", 5);
        let kafka_circuit_breaker_cooldown = parsed_or("KAFKA_CIRCUIT_BREAKER_COOLDOWN", 300);

        let db_host = var_or("DB_HOST", "localhost");
        let db_port = var_or("DB_PORT", "5432");
        let db_name = var_or("DB_DATABASE", "tracks");
        let db_user = var_or("DB_USER", "tracks");
        let db_pwd = var_or("DB_PWD", "tracks");

        let database_url = format!(
            "postgres://{}:{}@{}:{}/{}",
            db_user, db_pwd, db_host, db_port, db_name
        );

        let log_level = var_or("LOG_LEVEL", "info");

        let analyzer = match var_or("ANALYZER", "external").trim() {
            "in-process" | "in_process" | "inprocess" => AnalyzerKind::InProcess,
            _ => AnalyzerKind::External,
        };

        Ok(Self {
            kafka_bootstrap_servers,
            kafka_topic,
            kafka_group_id,
            kafka_auto_offset_reset,
            kafka_sasl_mechanism,
            kafka_username,
            kafka_password,
            kafka_security_protocol,
            kafka_max_retries,
            kafka_circuit_breaker_cooldown,
            database_url,
            log_level,
            data_dir: PathBuf::from(var_or("DATA_DIR", "data")),
            analyzer,
            analysis_command: var_or("ANALYSIS_COMMAND", "obs-process-track"),
            analysis_district: optional("ANALYSIS_DISTRICT"),
            analysis_settings: optional("ANALYSIS_SETTINGS").map(PathBuf::from),
            max_leg_meters: parsed_or("MAX_LEG_METERS", DEFAULT_MAX_LEG_METERS),
            job_lock_duration_secs: parsed_or("JOB_LOCK_DURATION", 600),
            job_max_attempts: parsed_or("JOB_MAX_ATTEMPTS", 3),
        })
    }

    pub fn job_lock_duration(&self) -> Duration {
        Duration::from_secs(self.job_lock_duration_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parsed_or_falls_back() {
        env::set_var("TRACK_PIPELINE_TEST_NUMBER", "not-a-number");
        assert_eq!(parsed_or("TRACK_PIPELINE_TEST_NUMBER", 7u32), 7);
        env::set_var("TRACK_PIPELINE_TEST_NUMBER", " 42 ");
        assert_eq!(parsed_or("TRACK_PIPELINE_TEST_NUMBER", 7u32), 42);
        assert_eq!(parsed_or("TRACK_PIPELINE_TEST_UNSET", 1.5f64), 1.5);
    }

    #[test]
    fn test_blank_optional_is_none() {
        env::set_var("TRACK_PIPELINE_TEST_OPTIONAL", "  ");
        assert_eq!(optional("TRACK_PIPELINE_TEST_OPTIONAL"), None);
    }
}
