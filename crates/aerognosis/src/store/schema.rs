//! `SQLite` schema definitions for the submission ledger.

/// SQL statement to create the submissions table (schema version 1).
///
/// `status` always agrees with which of `storage_*`, `result` and `error`
/// are populated; rows are only ever written from a full submission state.
pub const CREATE_SUBMISSIONS_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS submissions (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    status TEXT NOT NULL,
    file_name TEXT NOT NULL,
    file_size_bytes INTEGER NOT NULL,
    file_mime_type TEXT NOT NULL,
    submitted_by TEXT NOT NULL,
    storage_path TEXT,
    storage_url TEXT,
    result TEXT,
    error TEXT,
    created_at TEXT NOT NULL,
    updated_at TEXT NOT NULL,
    uploaded_at TEXT,
    analysis_requested_at TEXT,
    analysis_completed_at TEXT
)
";

/// Index for status dashboards.
pub const CREATE_STATUS_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_submissions_status ON submissions(status)
";

/// Index for per-user lookups.
pub const CREATE_SUBMITTER_INDEX: &str = r"
CREATE INDEX IF NOT EXISTS idx_submissions_submitter ON submissions(submitted_by, created_at DESC)
";

/// SQL statement to create the metadata table for storing key-value pairs.
pub const CREATE_METADATA_TABLE: &str = r"
CREATE TABLE IF NOT EXISTS metadata (
    key TEXT PRIMARY KEY,
    value TEXT NOT NULL
)
";

/// All schema creation statements in order.
pub const SCHEMA_STATEMENTS: &[&str] = &[
    CREATE_SUBMISSIONS_TABLE,
    CREATE_STATUS_INDEX,
    CREATE_SUBMITTER_INDEX,
    CREATE_METADATA_TABLE,
];
