pub const CREATE_TRACKS_TABLE: &str = r#"
CREATE TABLE IF NOT EXISTS tracks (
    id uuid PRIMARY KEY,
    slug text NOT NULL UNIQUE,
    title text NOT NULL,
    description text NOT NULL DEFAULT '',
    author_id uuid NOT NULL,
    author_username text NOT NULL,
    processing_status text NOT NULL DEFAULT 'pending',
    processing_job_id uuid NULL,
    processing_log text NOT NULL DEFAULT '',
    processing_attempts int4 NOT NULL DEFAULT 0,
    original_file_name text NOT NULL,
    file_path text NOT NULL,
    statistics jsonb NULL,
    created_at timestamptz NOT NULL DEFAULT NOW(),
    updated_at timestamptz NOT NULL DEFAULT NOW()
);
"#;

pub const INSERT_TRACK: &str = r#"
INSERT INTO tracks (
    id, slug, title, description, author_id, author_username, processing_status,
    processing_job_id, processing_log, processing_attempts, original_file_name, file_path,
    statistics, created_at
) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
ON CONFLICT (slug) DO NOTHING;
"#;

pub const SELECT_TRACK: &str = r#"
SELECT id, slug, title, description, author_id, author_username, processing_status,
       processing_job_id, processing_log, processing_attempts, original_file_name, file_path,
       statistics, created_at
FROM tracks WHERE id = $1;
"#;

pub const UPDATE_TRACK_QUEUED: &str = r#"
UPDATE tracks
SET processing_status = 'pending',
    processing_job_id = $2,
    processing_log = '',
    processing_attempts = 0,
    updated_at = NOW()
WHERE id = $1;
"#;

// Ownership check and transition in one statement: only the current job may
// claim, and only before the track reached a terminal state.
pub const CLAIM_TRACK: &str = r#"
UPDATE tracks
SET processing_status = 'processing',
    processing_log = '',
    processing_attempts = processing_attempts + 1,
    updated_at = NOW()
WHERE id = $1
  AND processing_job_id = $2
  AND processing_status IN ('pending', 'processing')
RETURNING id, slug, title, description, author_id, author_username, processing_status,
          processing_job_id, processing_log, processing_attempts, original_file_name, file_path,
          statistics, created_at;
"#;

pub const COMMIT_TRACK_COMPLETE: &str = r#"
UPDATE tracks
SET processing_status = 'complete',
    processing_log = processing_log || $3,
    statistics = $4,
    updated_at = NOW()
WHERE id = $1
  AND processing_job_id = $2
  AND processing_status = 'processing';
"#;

pub const COMMIT_TRACK_ERROR: &str = r#"
UPDATE tracks
SET processing_status = 'error',
    processing_log = processing_log || $3,
    updated_at = NOW()
WHERE id = $1
  AND processing_job_id = $2
  AND processing_status = 'processing';
"#;

pub const DELETE_TRACK: &str = r#"
DELETE FROM tracks WHERE id = $1;
"#;
