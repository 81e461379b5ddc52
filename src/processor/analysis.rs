use anyhow::{Context, Result};
use async_trait::async_trait;
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::fs::{self, File};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::process::Command;
use tracing::{debug, info};

use crate::models::{Point, Statistics};
use crate::parser::parse_points;
use crate::storage::{StagedRun, STDERR_LOG, STDOUT_LOG};

const TEE_BUFFER_SIZE: usize = 8192;
const POINTS_FILE: &str = "points.json";

/// What an analysis run printed and whether it succeeded. On success the run
/// has written `statistics.json` into the output directory.
#[derive(Debug, Clone)]
pub struct AnalysisReport {
    pub success: bool,
    pub exit_code: Option<i32>,
    pub log: String,
}

#[async_trait]
pub trait Analyzer: Send + Sync {
    async fn analyze(&self, run: &StagedRun, path_cache: &Path) -> Result<AnalysisReport>;
}

/// Shells out to the external analysis tool.
#[derive(Debug, Clone)]
pub struct ExternalAnalyzer {
    command: PathBuf,
    leading_args: Vec<OsString>,
    district: Option<String>,
    settings: Option<PathBuf>,
}

impl ExternalAnalyzer {
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            leading_args: Vec::new(),
            district: None,
            settings: None,
        }
    }

    /// Arguments placed before the generated ones, e.g. a script for an interpreter.
    pub fn with_leading_args(mut self, args: Vec<OsString>) -> Self {
        self.leading_args = args;
        self
    }

    pub fn with_district(mut self, district: Option<String>) -> Self {
        self.district = district;
        self
    }

    pub fn with_settings(mut self, settings: Option<PathBuf>) -> Self {
        self.settings = settings;
        self
    }

    pub fn arguments(&self, run: &StagedRun, path_cache: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "--input".into(),
            run.input.clone().into(),
            "--output".into(),
            run.output.clone().into(),
            "--path-cache".into(),
            path_cache.into(),
        ];
        if let Some(district) = &self.district {
            args.push("--district".into());
            args.push(district.into());
        }
        if let Some(settings) = &self.settings {
            args.push("--settings".into());
            args.push(settings.into());
        }
        args
    }
}

#[async_trait]
impl Analyzer for ExternalAnalyzer {
    async fn analyze(&self, run: &StagedRun, path_cache: &Path) -> Result<AnalysisReport> {
        let args = self.arguments(run, path_cache);
        info!("Running {} {:?}", self.command.display(), args);

        let mut child = Command::new(&self.command)
            .args(&self.leading_args)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .spawn()
            .with_context(|| format!("spawning {}", self.command.display()))?;

        let stdout = child.stdout.take().context("analysis stdout not captured")?;
        let stderr = child.stderr.take().context("analysis stderr not captured")?;

        let (out, err, status) = futures::try_join!(
            tee(stdout, tokio::io::stdout(), run.output.join(STDOUT_LOG)),
            tee(stderr, tokio::io::stderr(), run.output.join(STDERR_LOG)),
            async { child.wait().await.context("waiting for analysis tool") },
        )?;

        let mut log = String::from_utf8_lossy(&out).into_owned();
        log.push_str(&String::from_utf8_lossy(&err));

        Ok(AnalysisReport {
            success: status.success(),
            exit_code: status.code(),
            log,
        })
    }
}

/// Copies `source` to the parent's stream and to `log_path`, returning the
/// same bytes. A closed parent stream doesn't stop the copy.
async fn tee<R, W>(mut source: R, mut parent: W, log_path: PathBuf) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let mut log = File::create(&log_path)
        .await
        .with_context(|| format!("creating {}", log_path.display()))?;
    let mut captured = Vec::new();
    let mut parent_open = true;
    let mut buf = [0u8; TEE_BUFFER_SIZE];

    loop {
        let n = source.read(&mut buf).await.context("reading analysis output")?;
        if n == 0 {
            break;
        }
        let chunk = &buf[..n];
        log.write_all(chunk)
            .await
            .with_context(|| format!("writing {}", log_path.display()))?;
        captured.extend_from_slice(chunk);
        if parent_open {
            if let Err(e) = parent.write_all(chunk).await {
                debug!("Parent stream closed: {}", e);
                parent_open = false;
            }
        }
    }

    log.flush().await?;
    if parent_open {
        let _ = parent.flush().await;
    }
    Ok(captured)
}

/// Parses and measures the recording inside the worker process, producing the
/// same `statistics.json` artifact as the external tool plus the point list.
#[derive(Debug, Clone)]
pub struct InProcessAnalyzer {
    max_leg_meters: f64,
}

impl InProcessAnalyzer {
    pub fn new(max_leg_meters: f64) -> Self {
        Self { max_leg_meters }
    }
}

#[async_trait]
impl Analyzer for InProcessAnalyzer {
    async fn analyze(&self, run: &StagedRun, _path_cache: &Path) -> Result<AnalysisReport> {
        let raw = fs::read(&run.input)
            .await
            .with_context(|| format!("reading {}", run.input.display()))?;

        let max_leg_meters = self.max_leg_meters;
        let (points, statistics) = tokio::task::spawn_blocking(move || -> Result<_> {
            let body = String::from_utf8_lossy(&raw);
            let points: Vec<Point> = parse_points(&body)?.collect();
            let statistics = Statistics::from_points(&points, max_leg_meters);
            Ok((points, statistics))
        })
        .await??;

        fs::write(run.statistics_file(), serde_json::to_vec_pretty(&statistics)?)
            .await
            .context("writing statistics.json")?;
        fs::write(run.output.join(POINTS_FILE), serde_json::to_vec(&points)?)
            .await
            .context("writing points.json")?;

        Ok(AnalysisReport {
            success: true,
            exit_code: Some(0),
            log: format!(
                "Parsed {} points: {} events, {} measurements, {:.1} m\n",
                points.len(),
                statistics.num_events,
                statistics.num_measurements,
                statistics.length
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::TrackFiles;

    async fn staged(tmp: &Path, body: &str) -> StagedRun {
        let dir = TrackFiles::new(tmp).track("alice/ride-abcdef");
        dir.write_original(body.as_bytes()).await.unwrap();
        dir.stage(1).await.unwrap()
    }

    #[tokio::test]
    async fn test_arguments_are_deterministic() {
        let run = StagedRun {
            input: PathBuf::from("/data/in.csv"),
            output: PathBuf::from("/data/out"),
        };
        let analyzer = ExternalAnalyzer::new("obs-process-track")
            .with_district(Some("Stuttgart".to_string()))
            .with_settings(Some(PathBuf::from("/etc/obs.json")));

        let args = analyzer.arguments(&run, Path::new("/data/cache"));
        let args: Vec<&str> = args.iter().map(|a| a.to_str().unwrap()).collect();
        assert_eq!(
            args,
            [
                "--input", "/data/in.csv", "--output", "/data/out", "--path-cache",
                "/data/cache", "--district", "Stuttgart", "--settings", "/etc/obs.json",
            ]
        );

        let bare = ExternalAnalyzer::new("x").arguments(&run, Path::new("/c"));
        assert_eq!(bare.len(), 6);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_tees_output_to_logs() {
        let tmp = tempfile::tempdir().unwrap();
        let run = staged(tmp.path(), "Date;Time\n").await;

        let script = tmp.path().join("tool.sh");
        fs::write(&script, "echo out-line\necho err-line >&2\nexit 3\n")
            .await
            .unwrap();

        let report = ExternalAnalyzer::new("sh")
            .with_leading_args(vec![script.into_os_string()])
            .analyze(&run, tmp.path())
            .await
            .unwrap();
        assert!(!report.success);
        assert_eq!(report.exit_code, Some(3));
        assert_eq!(report.log, "out-line\nerr-line\n");
        assert_eq!(
            fs::read_to_string(run.output.join(STDOUT_LOG)).await.unwrap(),
            "out-line\n"
        );
        assert_eq!(
            fs::read_to_string(run.output.join(STDERR_LOG)).await.unwrap(),
            "err-line\n"
        );
    }

    #[tokio::test]
    async fn test_missing_tool_is_an_error() {
        let tmp = tempfile::tempdir().unwrap();
        let run = staged(tmp.path(), "Date;Time\n").await;
        let result = ExternalAnalyzer::new(tmp.path().join("does-not-exist"))
            .analyze(&run, tmp.path())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_in_process_writes_statistics_artifact() {
        let tmp = tempfile::tempdir().unwrap();
        let body = "Date;Time;Lat;Lon$01.07.2021;10:00:00;48.0;9.0;0;0;1.5;;1;0$01.07.2021;10:00:05;48.0001;9.0;0;0;;;0;0$";
        let run = staged(tmp.path(), body).await;

        let report = InProcessAnalyzer::new(100.0)
            .analyze(&run, tmp.path())
            .await
            .unwrap();
        assert!(report.success);

        let raw = fs::read(run.statistics_file()).await.unwrap();
        let stats: Statistics = serde_json::from_slice(&raw).unwrap();
        assert_eq!(stats.num_events, 1);
        assert_eq!(stats.num_measurements, 1);
        assert_eq!(stats.duration, Some(5.0));
        assert!((stats.length - 11.12).abs() < 0.01, "{}", stats.length);
    }

    #[tokio::test]
    async fn test_in_process_rejects_unrecognized_body() {
        let tmp = tempfile::tempdir().unwrap();
        let run = staged(tmp.path(), "not a track").await;
        let err = InProcessAnalyzer::new(100.0)
            .analyze(&run, tmp.path())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("cannot be detected"));
    }
}
