use crate::models::statistics::Statistics;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;
use uuid::Uuid;

const SLUG_SUFFIX_LEN: usize = 6;
const BASE36: &[u8] = b"0123456789abcdefghijklmnopqrstuvwxyz";

#[derive(Debug, Error, PartialEq)]
pub enum TrackError {
    #[error("original file name must not be empty")]
    EmptyFileName,
    #[error("original file name must end with .csv: {0}")]
    NotCsv(String),
    #[error("unknown processing status: {0}")]
    UnknownStatus(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessingStatus {
    Pending,
    Processing,
    Complete,
    Error,
}

impl ProcessingStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingStatus::Pending => "pending",
            ProcessingStatus::Processing => "processing",
            ProcessingStatus::Complete => "complete",
            ProcessingStatus::Error => "error",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, ProcessingStatus::Complete | ProcessingStatus::Error)
    }
}

impl fmt::Display for ProcessingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ProcessingStatus {
    type Err = TrackError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(ProcessingStatus::Pending),
            "processing" => Ok(ProcessingStatus::Processing),
            "complete" => Ok(ProcessingStatus::Complete),
            "error" => Ok(ProcessingStatus::Error),
            other => Err(TrackError::UnknownStatus(other.to_string())),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub id: Uuid,
    pub username: String,
}

/// An uploaded ride recording and everything derived from it.
///
/// `slug` and `file_path` are assigned once in [`Track::new`], before the
/// record is first persisted, and never change afterwards.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Track {
    pub id: Uuid,
    pub(crate) slug: String,
    pub title: String,
    pub description: String,
    pub author: Author,
    pub processing_status: ProcessingStatus,
    pub processing_job_id: Option<Uuid>,
    pub processing_log: String,
    pub processing_attempts: i32,
    pub original_file_name: String,
    pub(crate) file_path: String,
    pub statistics: Option<Statistics>,
    pub created_at: DateTime<Utc>,
}

impl Track {
    pub fn new(
        author: Author,
        title: &str,
        description: &str,
        original_file_name: &str,
    ) -> Result<Self, TrackError> {
        let original_file_name = validate_file_name(original_file_name)?;
        let slug = generate_slug(title);
        let file_path = format!("{}/{}", sanitize_path_segment(&author.username), slug);

        Ok(Self {
            id: Uuid::new_v4(),
            slug,
            title: title.trim().to_string(),
            description: description.to_string(),
            author,
            processing_status: ProcessingStatus::Pending,
            processing_job_id: None,
            processing_log: String::new(),
            processing_attempts: 0,
            original_file_name,
            file_path,
            statistics: None,
            created_at: Utc::now(),
        })
    }

    pub fn slug(&self) -> &str {
        &self.slug
    }

    /// Relative path (`<author>/<slug>`) every on-disk artifact of this track hangs off.
    pub fn file_path(&self) -> &str {
        &self.file_path
    }
}

/// Slugified title (or "track") plus a 6 character base-36 random suffix.
pub fn generate_slug(title: &str) -> String {
    let base = slugify(title);
    let base = if base.is_empty() { "track".to_string() } else { base };
    format!("{}-{}", base, random_suffix())
}

pub fn slugify(text: &str) -> String {
    let mut slug = String::with_capacity(text.len());
    let mut pending_dash = false;

    for c in text.chars().flat_map(char::to_lowercase) {
        let replacement = match c {
            'ä' => Some("ae"),
            'ö' => Some("oe"),
            'ü' => Some("ue"),
            'ß' => Some("ss"),
            _ => None,
        };

        if let Some(r) = replacement {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push_str(r);
        } else if c.is_ascii_alphanumeric() {
            if pending_dash && !slug.is_empty() {
                slug.push('-');
            }
            pending_dash = false;
            slug.push(c);
        } else {
            pending_dash = true;
        }
    }

    slug
}

fn random_suffix() -> String {
    let bytes = Uuid::new_v4().into_bytes();
    let mut value = u64::from_le_bytes([
        bytes[0], bytes[1], bytes[2], bytes[3], bytes[4], bytes[5], bytes[6], bytes[7],
    ]);

    let mut suffix = [0u8; SLUG_SUFFIX_LEN];
    for slot in suffix.iter_mut() {
        *slot = BASE36[(value % 36) as usize];
        value /= 36;
    }

    suffix.iter().map(|&b| b as char).collect()
}

/// Strips directories and anything outside `[A-Za-z0-9._ -]` from an uploaded file name.
pub fn sanitize_file_name(name: &str) -> String {
    let base = name.rsplit(['/', '\\']).next().unwrap_or("");
    base.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | ' ' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect::<String>()
        .trim()
        .to_string()
}

pub fn validate_file_name(name: &str) -> Result<String, TrackError> {
    let sanitized = sanitize_file_name(name);
    if sanitized.is_empty() {
        return Err(TrackError::EmptyFileName);
    }
    if !sanitized.to_ascii_lowercase().ends_with(".csv") {
        return Err(TrackError::NotCsv(sanitized));
    }
    Ok(sanitized)
}

fn sanitize_path_segment(segment: &str) -> String {
    let cleaned: String = segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '-' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.');
    if cleaned.is_empty() {
        "_".to_string()
    } else {
        cleaned.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Author {
        Author {
            id: Uuid::new_v4(),
            username: "alice".to_string(),
        }
    }

    #[test]
    fn test_slug_shape() {
        let slug = generate_slug("Morning Ride: Südstadt!");
        let (base, suffix) = slug.rsplit_once('-').unwrap();
        assert_eq!(base, "morning-ride-suedstadt");
        assert_eq!(suffix.len(), 6);
        assert!(suffix.bytes().all(|b| BASE36.contains(&b)));
    }

    #[test]
    fn test_empty_title_falls_back_to_track() {
        let slug = generate_slug("  !!  ");
        assert!(slug.starts_with("track-"));
    }

    #[test]
    fn test_file_path_derives_from_author_and_slug() {
        let track = Track::new(author(), "Commute", "", "ride.csv").unwrap();
        assert_eq!(track.file_path(), format!("alice/{}", track.slug()));
        assert_eq!(track.processing_status, ProcessingStatus::Pending);
    }

    #[test]
    fn test_original_file_name_rules() {
        assert_eq!(
            validate_file_name("../../etc/ride 01.CSV").unwrap(),
            "ride 01.CSV"
        );
        assert_eq!(validate_file_name("dir/"), Err(TrackError::EmptyFileName));
        assert_eq!(
            validate_file_name("ride.txt"),
            Err(TrackError::NotCsv("ride.txt".to_string()))
        );
        assert_eq!(sanitize_file_name("r<i>de.csv"), "r_i_de.csv");
    }

    #[test]
    fn test_hostile_username_stays_one_segment() {
        let author = Author {
            id: Uuid::new_v4(),
            username: "../root".to_string(),
        };
        let track = Track::new(author, "x", "", "x.csv").unwrap();
        assert!(track.file_path().starts_with("_root/"));
    }

    #[test]
    fn test_status_round_trip_through_text() {
        for status in [
            ProcessingStatus::Pending,
            ProcessingStatus::Processing,
            ProcessingStatus::Complete,
            ProcessingStatus::Error,
        ] {
            assert_eq!(status.as_str().parse::<ProcessingStatus>().unwrap(), status);
        }
        assert!("done".parse::<ProcessingStatus>().is_err());
    }
}
