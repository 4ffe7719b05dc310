use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use tracing::{debug, info};

use crate::analysis::AnalysisResult;
use crate::error::{Error, Result};
use crate::record::{
    Identity, NewRecord, RecordId, RecordPatch, RecordStatus, SourceFile, StorageRef,
    SubmissionRecord, SubmissionState, Timestamps,
};

use super::{migrations, RecordStore};

const SELECT_COLUMNS: &str = r"
SELECT id, status, file_name, file_size_bytes, file_mime_type, submitted_by,
       storage_path, storage_url, storage_checksum, result, error,
       created_at, updated_at, uploaded_at, analysis_requested_at, analysis_completed_at
FROM submissions
";

/// `SQLite`-backed submission ledger.
///
/// Record ids are the decimal form of the row id. The connection is shared
/// behind a mutex, so concurrent submissions serialize their writes.
///
/// The [`RecordStore`] methods run their queries on tokio's blocking pool.
/// [`recent`](Self::recent) and [`stats`](Self::stats) block the caller.
#[derive(Debug)]
pub struct SqliteRecordStore {
    path: PathBuf,
    conn: Arc<Mutex<Connection>>,
}

/// Ledger counts for `aerog list`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StoreStats {
    /// Total number of records.
    pub total: i64,
    /// Records per status, in status order; statuses with no records are omitted.
    pub by_status: Vec<(RecordStatus, i64)>,
}

impl SqliteRecordStore {
    /// Open or create a ledger at `path`.
    ///
    /// # Errors
    ///
    /// Returns an error if the parent directory cannot be created, the
    /// database cannot be opened, or the schema cannot be brought up to date.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|source| Error::DirectoryCreate {
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
        }

        debug!("Opening submission ledger at {}", path.display());
        let mut conn = Connection::open(&path).map_err(|source| Error::DatabaseOpen {
            path: path.clone(),
            source,
        })?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        migrations::initialize_schema(&mut conn)?;

        info!("Submission ledger ready at {}", path.display());
        Ok(Self {
            path,
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// In-memory ledger, mostly for tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the in-memory database cannot be created.
    pub fn open_in_memory() -> Result<Self> {
        let mut conn = Connection::open_in_memory().map_err(|source| Error::DatabaseOpen {
            path: PathBuf::from(":memory:"),
            source,
        })?;
        migrations::initialize_schema(&mut conn)?;
        Ok(Self {
            path: PathBuf::from(":memory:"),
            conn: Arc::new(Mutex::new(conn)),
        })
    }

    /// Path of the database file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Most recent records first, optionally restricted to one status.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails or a row is inconsistent.
    pub fn recent(&self, limit: usize, status: Option<RecordStatus>) -> Result<Vec<SubmissionRecord>> {
        let conn = self.lock()?;
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = if let Some(status) = status {
            let mut stmt = conn.prepare(&format!(
                "{SELECT_COLUMNS} WHERE status = ?1 ORDER BY id DESC LIMIT ?2"
            ))?;
            let rows = stmt
                .query_map(params![status.as_str(), limit], StoredRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        } else {
            let mut stmt = conn.prepare(&format!("{SELECT_COLUMNS} ORDER BY id DESC LIMIT ?1"))?;
            let rows = stmt
                .query_map([limit], StoredRow::from_row)?
                .collect::<std::result::Result<Vec<_>, _>>()?;
            rows
        };
        rows.into_iter().map(StoredRow::into_record).collect()
    }

    /// Record counts.
    ///
    /// # Errors
    ///
    /// Returns an error if the query fails.
    pub fn stats(&self) -> Result<StoreStats> {
        let conn = self.lock()?;
        let total: i64 = conn.query_row("SELECT COUNT(*) FROM submissions", [], |row| row.get(0))?;

        let mut stmt = conn.prepare("SELECT status, COUNT(*) FROM submissions GROUP BY status")?;
        let mut by_status = stmt
            .query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?
            .collect::<std::result::Result<Vec<_>, _>>()?
            .into_iter()
            .map(|(status, count)| Ok((status.parse::<RecordStatus>()?, count)))
            .collect::<Result<Vec<_>>>()?;
        by_status.sort_by_key(|(status, _)| *status);

        Ok(StoreStats { total, by_status })
    }

    fn lock(&self) -> Result<MutexGuard<'_, Connection>> {
        lock(&self.conn)
    }

    /// Run `f` against the connection on the blocking pool.
    async fn blocking<T, F>(&self, f: F) -> Result<T>
    where
        T: Send + 'static,
        F: FnOnce(&Connection) -> Result<T> + Send + 'static,
    {
        let conn = Arc::clone(&self.conn);
        tokio::task::spawn_blocking(move || {
            let guard = lock(&conn)?;
            f(&guard)
        })
        .await
        .map_err(|e| Error::internal(format!("submission ledger task failed: {e}")))?
    }
}

fn lock(conn: &Mutex<Connection>) -> Result<MutexGuard<'_, Connection>> {
    conn.lock()
        .map_err(|_| Error::internal("submission ledger connection poisoned"))
}

fn insert(conn: &Connection, record: &NewRecord) -> Result<RecordId> {
    let created_at = record.created_at.to_rfc3339();
    conn.execute(
        r"
        INSERT INTO submissions
            (status, file_name, file_size_bytes, file_mime_type, submitted_by,
             created_at, updated_at)
        VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?6)
        ",
        params![
            RecordStatus::Uploading.as_str(),
            record.source_file.name,
            i64::try_from(record.source_file.size_bytes).unwrap_or(i64::MAX),
            record.source_file.mime_type,
            record.submitted_by.as_str(),
            created_at,
        ],
    )?;
    let id = RecordId::new(conn.last_insert_rowid().to_string());
    debug!("Inserted submission {}", id);
    Ok(id)
}

fn update(conn: &Connection, id: &RecordId, patch: &RecordPatch) -> Result<()> {
    let row_id = parse_row_id(id)?;
    let storage = patch.state.storage();
    let result = patch.state.result().map(serde_json::to_string).transpose()?;

    let affected = conn.execute(
        r"
        UPDATE submissions SET
            status = ?2,
            storage_path = ?3,
            storage_url = ?4,
            storage_checksum = ?5,
            result = ?6,
            error = ?7,
            updated_at = ?8,
            uploaded_at = COALESCE(?9, uploaded_at),
            analysis_requested_at = COALESCE(?10, analysis_requested_at),
            analysis_completed_at = COALESCE(?11, analysis_completed_at)
        WHERE id = ?1
        ",
        params![
            row_id,
            patch.state.status().as_str(),
            storage.map(|s| s.path.as_str()),
            storage.map(|s| s.url.as_str()),
            storage.and_then(|s| s.checksum.as_deref()),
            result,
            patch.state.error(),
            patch.updated_at.to_rfc3339(),
            patch.uploaded_at.map(|t| t.to_rfc3339()),
            patch.analysis_requested_at.map(|t| t.to_rfc3339()),
            patch.analysis_completed_at.map(|t| t.to_rfc3339()),
        ],
    )?;

    if affected == 0 {
        return Err(Error::RecordNotFound {
            id: id.to_string(),
        });
    }
    debug!("Patched submission {} to {}", id, patch.state.status());
    Ok(())
}

fn fetch(conn: &Connection, id: &RecordId) -> Result<Option<SubmissionRecord>> {
        let Ok(row_id) = parse_row_id(id) else {
            return Ok(None);
        };
        let row = conn
            .query_row(
                &format!("{SELECT_COLUMNS} WHERE id = ?1"),
                [row_id],
                StoredRow::from_row,
            )
            .optional()?;
        row.map(StoredRow::into_record).transpose()
}

#[async_trait::async_trait]
impl RecordStore for SqliteRecordStore {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    async fn create(&self, record: &NewRecord) -> Result<RecordId> {
        let record = record.clone();
        self.blocking(move |conn| insert(conn, &record)).await
    }

    async fn patch(&self, id: &RecordId, patch: &RecordPatch) -> Result<()> {
        let (id, patch) = (id.clone(), patch.clone());
        self.blocking(move |conn| update(conn, &id, &patch)).await
    }

    async fn get(&self, id: &RecordId) -> Result<Option<SubmissionRecord>> {
        let id = id.clone();
        self.blocking(move |conn| fetch(conn, &id)).await
    }
}

fn parse_row_id(id: &RecordId) -> Result<i64> {
    id.as_str().parse().map_err(|_| Error::RecordNotFound {
        id: id.to_string(),
    })
}

/// Raw column values of one `submissions` row.
struct StoredRow {
    id: i64,
    status: String,
    file_name: String,
    file_size_bytes: i64,
    file_mime_type: String,
    submitted_by: String,
    storage_path: Option<String>,
    storage_url: Option<String>,
    storage_checksum: Option<String>,
    result: Option<String>,
    error: Option<String>,
    created_at: String,
    updated_at: String,
    uploaded_at: Option<String>,
    analysis_requested_at: Option<String>,
    analysis_completed_at: Option<String>,
}

impl StoredRow {
    fn from_row(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            status: row.get(1)?,
            file_name: row.get(2)?,
            file_size_bytes: row.get(3)?,
            file_mime_type: row.get(4)?,
            submitted_by: row.get(5)?,
            storage_path: row.get(6)?,
            storage_url: row.get(7)?,
            storage_checksum: row.get(8)?,
            result: row.get(9)?,
            error: row.get(10)?,
            created_at: row.get(11)?,
            updated_at: row.get(12)?,
            uploaded_at: row.get(13)?,
            analysis_requested_at: row.get(14)?,
            analysis_completed_at: row.get(15)?,
        })
    }

    fn into_record(self) -> Result<SubmissionRecord> {
        let id = self.id.to_string();
        let corrupt = |message: String| Error::corrupt_record(id.clone(), message);

        let status: RecordStatus = self
            .status
            .parse()
            .map_err(|_| corrupt(format!("unknown status {:?}", self.status)))?;
        let storage = match (self.storage_path, self.storage_url) {
            (Some(path), Some(url)) => Some(StorageRef {
                path,
                url,
                checksum: self.storage_checksum,
            }),
            (None, None) => None,
            _ => return Err(corrupt("partial storage reference".to_string())),
        };
        let result = self
            .result
            .map(|text| serde_json::from_str::<AnalysisResult>(&text))
            .transpose()
            .map_err(|e| corrupt(format!("unreadable result: {e}")))?;
        let state = SubmissionState::from_parts(status, storage, result, self.error)
            .map_err(&corrupt)?;

        let parse_time = |text: &str| {
            DateTime::parse_from_rfc3339(text)
                .map(|dt| dt.with_timezone(&Utc))
                .map_err(|e| corrupt(format!("bad timestamp {text:?}: {e}")))
        };
        let parse_opt = |text: Option<String>| text.as_deref().map(parse_time).transpose();

        let timestamps = Timestamps {
            created_at: parse_time(&self.created_at)?,
            updated_at: parse_time(&self.updated_at)?,
            uploaded_at: parse_opt(self.uploaded_at)?,
            analysis_requested_at: parse_opt(self.analysis_requested_at)?,
            analysis_completed_at: parse_opt(self.analysis_completed_at)?,
        };
        let submitted_by =
            Identity::new(self.submitted_by).map_err(|e| corrupt(e.to_string()))?;

        Ok(SubmissionRecord {
            id: RecordId::new(id.clone()),
            source_file: SourceFile {
                name: self.file_name,
                size_bytes: u64::try_from(self.file_size_bytes).unwrap_or(0),
                mime_type: self.file_mime_type,
            },
            submitted_by,
            state,
            timestamps,
        })
    }
}
