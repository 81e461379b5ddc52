use anyhow::{Context, Result};
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::fs;

const TRACKS_DIR: &str = "tracks";
const PATH_CACHE_DIR: &str = "path-cache";
const ORIGINAL_FILE: &str = "original.csv";
const PROCESSING_DIR: &str = "processing";
const STAGED_INPUT_FILE: &str = "input.csv";
const OUTPUT_DIR: &str = "output";

pub const STATISTICS_FILE: &str = "statistics.json";
pub const STDOUT_LOG: &str = "stdout.log";
pub const STDERR_LOG: &str = "stderr.log";

/// Root of all on-disk track data.
#[derive(Debug, Clone)]
pub struct TrackFiles {
    root: PathBuf,
}

impl TrackFiles {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Directory tree of one track. `file_path` is the track's `<author>/<slug>`.
    pub fn track(&self, file_path: &str) -> TrackDir {
        TrackDir {
            base: self.root.join(TRACKS_DIR).join(file_path),
        }
    }

    /// Cache shared by all analysis runs.
    pub async fn path_cache_dir(&self) -> Result<PathBuf> {
        ensure_dir(self.root.join(PATH_CACHE_DIR)).await
    }
}

/// Everything belonging to one track lives below `base`:
///
/// ```text
/// original.csv
/// processing/<attempt>/input.csv
/// output/<attempt>/{stdout.log, stderr.log, statistics.json, ...}
/// ```
///
/// Each delivery of a job works in the directories of its own attempt
/// number, so two live deliveries never touch each other's files. Every
/// accessor creates the directories it needs.
#[derive(Debug, Clone)]
pub struct TrackDir {
    base: PathBuf,
}

impl TrackDir {
    pub fn base(&self) -> &Path {
        &self.base
    }

    pub async fn original_file(&self) -> Result<PathBuf> {
        Ok(ensure_dir(self.base.clone()).await?.join(ORIGINAL_FILE))
    }

    pub async fn staged_input(&self, attempt: u32) -> Result<PathBuf> {
        Ok(ensure_dir(self.base.join(PROCESSING_DIR).join(attempt.to_string()))
            .await?
            .join(STAGED_INPUT_FILE))
    }

    fn attempt_output(&self, attempt: u32) -> PathBuf {
        self.base.join(OUTPUT_DIR).join(attempt.to_string())
    }

    pub async fn write_original(&self, body: &[u8]) -> Result<PathBuf> {
        let path = self.original_file().await?;
        fs::write(&path, body)
            .await
            .with_context(|| format!("writing {}", path.display()))?;
        Ok(path)
    }

    /// Copies the original upload over the attempt's working copy and empties
    /// the attempt's output directory, so a re-run never sees leftovers from
    /// an earlier run with the same attempt number.
    pub async fn stage(&self, attempt: u32) -> Result<StagedRun> {
        let original = self.original_file().await?;
        let input = self.staged_input(attempt).await?;
        fs::copy(&original, &input)
            .await
            .with_context(|| format!("staging {} to {}", original.display(), input.display()))?;

        let output = self.attempt_output(attempt);
        remove_dir_if_exists(&output).await?;
        let output = ensure_dir(output).await?;

        Ok(StagedRun { input, output })
    }

    pub async fn remove(&self) -> Result<()> {
        remove_dir_if_exists(&self.base).await
    }
}

/// Paths of one prepared processing attempt.
#[derive(Debug, Clone)]
pub struct StagedRun {
    pub input: PathBuf,
    pub output: PathBuf,
}

impl StagedRun {
    pub fn statistics_file(&self) -> PathBuf {
        self.output.join(STATISTICS_FILE)
    }
}

async fn ensure_dir(dir: PathBuf) -> Result<PathBuf> {
    fs::create_dir_all(&dir)
        .await
        .with_context(|| format!("creating {}", dir.display()))?;
    Ok(dir)
}

async fn remove_dir_if_exists(dir: &Path) -> Result<()> {
    match fs::remove_dir_all(dir).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e).with_context(|| format!("removing {}", dir.display())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_layout_derives_from_file_path() {
        let tmp = tempfile::tempdir().unwrap();
        let files = TrackFiles::new(tmp.path());
        let dir = files.track("alice/commute-a1b2c3");

        let original = dir.write_original(b"Date;Time\n").await.unwrap();
        assert_eq!(
            original,
            tmp.path().join("tracks/alice/commute-a1b2c3/original.csv")
        );
        assert_eq!(
            dir.staged_input(2).await.unwrap(),
            tmp.path().join("tracks/alice/commute-a1b2c3/processing/2/input.csv")
        );
        // Directory creation is idempotent.
        dir.stage(2).await.unwrap();
        assert_eq!(
            dir.stage(2).await.unwrap().output,
            tmp.path().join("tracks/alice/commute-a1b2c3/output/2")
        );
    }

    #[tokio::test]
    async fn test_stage_clobbers_previous_run_of_same_attempt() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = TrackFiles::new(tmp.path()).track("bob/ride-000000");
        dir.write_original(b"first").await.unwrap();

        let run = dir.stage(1).await.unwrap();
        fs::write(run.output.join("partial.json"), b"{").await.unwrap();

        dir.write_original(b"second").await.unwrap();
        let run = dir.stage(1).await.unwrap();
        assert!(!run.output.join("partial.json").exists());
        assert_eq!(fs::read(&run.input).await.unwrap(), b"second");
    }

    #[tokio::test]
    async fn test_attempts_do_not_share_files() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = TrackFiles::new(tmp.path()).track("bob/ride-000000");
        dir.write_original(b"body").await.unwrap();

        let first = dir.stage(1).await.unwrap();
        fs::write(first.statistics_file(), b"{}").await.unwrap();

        let second = dir.stage(2).await.unwrap();
        assert_ne!(first.output, second.output);
        assert_ne!(first.input, second.input);
        assert_eq!(fs::read(first.statistics_file()).await.unwrap(), b"{}");
        assert!(!second.statistics_file().exists());
    }

    #[tokio::test]
    async fn test_remove_is_idempotent() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = TrackFiles::new(tmp.path()).track("bob/ride-000000");
        dir.write_original(b"x").await.unwrap();
        dir.remove().await.unwrap();
        dir.remove().await.unwrap();
        assert!(!dir.base().exists());
    }
}
