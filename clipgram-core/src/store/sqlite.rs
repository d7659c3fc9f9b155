use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use flate2::{write::GzEncoder, Compression};
use rusqlite::{params, Connection, OpenFlags, OptionalExtension, Row};

use super::{RecordStore, StoreError, StoreResult};
use crate::records::{DownloadJob, JobStatus, SourceCategory, StoredFile, UsageRecord};

const RECORDS_SCHEMA: &str = include_str!("../../sql/records.sql");

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;\n\
         PRAGMA synchronous = NORMAL;\n\
         PRAGMA temp_store = MEMORY;\n\
         PRAGMA busy_timeout = 5000;\n",
    )
}

#[derive(Debug, Clone)]
pub struct SqliteRecordStoreBuilder {
    path: Option<PathBuf>,
    read_only: bool,
    create_if_missing: bool,
}

impl Default for SqliteRecordStoreBuilder {
    fn default() -> Self {
        Self {
            path: None,
            read_only: false,
            create_if_missing: true,
        }
    }
}

impl SqliteRecordStoreBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn path(mut self, path: impl AsRef<Path>) -> Self {
        self.path = Some(path.as_ref().to_path_buf());
        self
    }

    pub fn read_only(mut self, value: bool) -> Self {
        self.read_only = value;
        self
    }

    pub fn create_if_missing(mut self, value: bool) -> Self {
        self.create_if_missing = value;
        self
    }

    pub fn build(self) -> StoreResult<SqliteRecordStore> {
        let path = self.path.ok_or(StoreError::MissingStore)?;
        let mut flags = if self.read_only {
            OpenFlags::SQLITE_OPEN_READ_ONLY
        } else {
            OpenFlags::SQLITE_OPEN_READ_WRITE
        };
        if !self.read_only && self.create_if_missing {
            flags |= OpenFlags::SQLITE_OPEN_CREATE;
        }
        Ok(SqliteRecordStore { path, flags })
    }
}

/// SQLite-backed implementation of the record-store contract, used by local
/// deployments, tests and the operator CLI.
#[derive(Debug, Clone)]
pub struct SqliteRecordStore {
    path: PathBuf,
    flags: OpenFlags,
}

impl SqliteRecordStore {
    pub fn builder() -> SqliteRecordStoreBuilder {
        SqliteRecordStoreBuilder::new()
    }

    pub fn new(path: impl AsRef<Path>) -> StoreResult<Self> {
        SqliteRecordStoreBuilder::new().path(path).build()
    }

    fn open(&self) -> StoreResult<Connection> {
        let conn = Connection::open_with_flags(&self.path, self.flags).map_err(|source| {
            StoreError::Open {
                source,
                path: self.path.clone(),
            }
        })?;
        configure_connection(&conn).map_err(|source| StoreError::Open {
            source,
            path: self.path.clone(),
        })?;
        Ok(conn)
    }

    pub fn initialize(&self) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute_batch(RECORDS_SCHEMA)?;
        Ok(())
    }

    /// Gzip-compressed SQL dump of the file and usage records, for offline
    /// inspection and restore.
    pub fn export_backup(&self, output: impl AsRef<Path>) -> StoreResult<()> {
        let output = output.as_ref();
        if let Some(parent) = output.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                source,
                path: parent.to_path_buf(),
            })?;
        }
        let conn = self.open()?;
        let mut dump = String::new();
        dump.push_str(RECORDS_SCHEMA);
        dump.push('\n');
        dump.push_str("BEGIN;\n");

        let mut stmt = conn.prepare(
            "SELECT key, category, title, origin_url, owner, size_mb, created_at, expires_at
             FROM files ORDER BY key",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, String>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, f64>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
            ))
        })?;
        for row in rows {
            let (key, category, title, origin_url, owner, size_mb, created_at, expires_at) = row?;
            dump.push_str(&format!(
                "INSERT INTO files (key, category, title, origin_url, owner, size_mb, created_at, expires_at) VALUES ({}, {}, {}, {}, {}, {}, {}, {});\n",
                sql_quote(&key),
                sql_quote(&category),
                sql_quote(&title),
                sql_quote(&origin_url),
                sql_quote(&owner),
                size_mb,
                sql_quote(&created_at),
                sql_quote(&expires_at),
            ));
        }

        let mut stmt = conn.prepare(
            "SELECT user_id, request_count, total_mb, tube_audio_mb, tube_video_mb, clip_video_mb
             FROM usage ORDER BY user_id",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, i64>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, f64>(3)?,
                row.get::<_, f64>(4)?,
                row.get::<_, f64>(5)?,
            ))
        })?;
        for row in rows {
            let (user_id, request_count, total_mb, tube_audio, tube_video, clip_video) = row?;
            dump.push_str(&format!(
                "INSERT INTO usage (user_id, request_count, total_mb, tube_audio_mb, tube_video_mb, clip_video_mb) VALUES ({}, {}, {}, {}, {}, {});\n",
                sql_quote(&user_id),
                request_count,
                total_mb,
                tube_audio,
                tube_video,
                clip_video,
            ));
        }

        dump.push_str("COMMIT;\n");

        let file = File::create(output).map_err(|source| StoreError::Io {
            source,
            path: output.to_path_buf(),
        })?;
        let mut encoder = GzEncoder::new(file, Compression::default());
        encoder.write_all(dump.as_bytes()).map_err(|source| StoreError::Io {
            source,
            path: output.to_path_buf(),
        })?;
        encoder.finish().map_err(|source| StoreError::Io {
            source,
            path: output.to_path_buf(),
        })?;
        Ok(())
    }
}

fn job_from_row(row: &Row<'_>) -> rusqlite::Result<DownloadJob> {
    Ok(DownloadJob {
        job_id: row.get("job_id")?,
        category: row
            .get::<_, String>("category")?
            .parse()
            .unwrap_or(SourceCategory::TubeVideo),
        url: row.get("url")?,
        user_id: row.get("user_id")?,
        chat_id: row.get("chat_id")?,
        status: row
            .get::<_, String>("status")?
            .parse()
            .unwrap_or(JobStatus::Queued),
        percent: row.get("percent")?,
        speed: row.get("speed")?,
        updated_at: parse_timestamp(row.get("updated_at")?)?,
    })
}

fn file_from_row(row: &Row<'_>) -> rusqlite::Result<StoredFile> {
    Ok(StoredFile {
        key: row.get("key")?,
        category: row
            .get::<_, String>("category")?
            .parse()
            .unwrap_or(SourceCategory::TubeVideo),
        title: row.get("title")?,
        origin_url: row.get("origin_url")?,
        owner: row.get("owner")?,
        size_mb: row.get("size_mb")?,
        created_at: row.get("created_at")?,
        expires_at: row.get("expires_at")?,
    })
}

#[async_trait]
impl RecordStore for SqliteRecordStore {
    async fn put_job(&self, job: &DownloadJob) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO jobs (job_id, category, url, user_id, chat_id, status, percent, speed)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(job_id) DO UPDATE SET
                 status = excluded.status,
                 percent = excluded.percent,
                 speed = excluded.speed,
                 updated_at = CURRENT_TIMESTAMP",
            params![
                &job.job_id,
                job.category.as_str(),
                &job.url,
                &job.user_id,
                &job.chat_id,
                job.status.as_str(),
                job.percent,
                &job.speed,
            ],
        )?;
        Ok(())
    }

    async fn update_job_progress(
        &self,
        job_id: &str,
        status: JobStatus,
        percent: Option<f64>,
        speed: Option<&str>,
    ) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute(
            "UPDATE jobs SET status=?1, percent=COALESCE(?2, percent), speed=COALESCE(?3, speed),
                 updated_at=CURRENT_TIMESTAMP WHERE job_id=?4",
            params![status.as_str(), percent, speed, job_id],
        )?;
        Ok(())
    }

    async fn delete_job(&self, job_id: &str) -> StoreResult<()> {
        let conn = self.open()?;
        conn.execute("DELETE FROM jobs WHERE job_id=?1", [job_id])?;
        Ok(())
    }

    async fn get_job(&self, job_id: &str) -> StoreResult<Option<DownloadJob>> {
        let conn = self.open()?;
        let job = conn
            .query_row("SELECT * FROM jobs WHERE job_id=?1", [job_id], job_from_row)
            .optional()?;
        Ok(job)
    }

    async fn create_file_if_absent(&self, file: &StoredFile) -> StoreResult<bool> {
        let conn = self.open()?;
        let affected = conn.execute(
            "INSERT OR IGNORE INTO files (key, category, title, origin_url, owner, size_mb, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)",
            params![
                &file.key,
                file.category.as_str(),
                &file.title,
                &file.origin_url,
                &file.owner,
                file.size_mb,
                file.created_at,
                file.expires_at,
            ],
        )?;
        Ok(affected == 1)
    }

    async fn get_file(&self, key: &str) -> StoreResult<Option<StoredFile>> {
        let conn = self.open()?;
        let file = conn
            .query_row("SELECT * FROM files WHERE key=?1", [key], file_from_row)
            .optional()?;
        Ok(file)
    }

    async fn list_files(&self) -> StoreResult<Vec<StoredFile>> {
        let conn = self.open()?;
        let mut stmt = conn.prepare("SELECT * FROM files ORDER BY created_at DESC")?;
        let mut rows = stmt.query([])?;
        let mut files = Vec::new();
        while let Some(row) = rows.next()? {
            files.push(file_from_row(row)?);
        }
        Ok(files)
    }

    async fn purge_files(&self) -> StoreResult<usize> {
        let conn = self.open()?;
        let affected = conn.execute("DELETE FROM files", [])?;
        Ok(affected)
    }

    async fn add_usage(
        &self,
        user_id: &str,
        category: SourceCategory,
        size_mb: f64,
    ) -> StoreResult<()> {
        let tube_audio = if category == SourceCategory::TubeAudio {
            size_mb
        } else {
            0.0
        };
        let tube_video = if category == SourceCategory::TubeVideo {
            size_mb
        } else {
            0.0
        };
        let clip_video = if category == SourceCategory::ClipVideo {
            size_mb
        } else {
            0.0
        };
        let conn = self.open()?;
        conn.execute(
            "INSERT INTO usage (user_id, request_count, total_mb, tube_audio_mb, tube_video_mb, clip_video_mb)
             VALUES (?1, 1, ?2, ?3, ?4, ?5)
             ON CONFLICT(user_id) DO UPDATE SET
                 request_count = request_count + 1,
                 total_mb = total_mb + excluded.total_mb,
                 tube_audio_mb = tube_audio_mb + excluded.tube_audio_mb,
                 tube_video_mb = tube_video_mb + excluded.tube_video_mb,
                 clip_video_mb = clip_video_mb + excluded.clip_video_mb",
            params![user_id, size_mb, tube_audio, tube_video, clip_video],
        )?;
        Ok(())
    }

    async fn get_usage(&self, user_id: &str) -> StoreResult<Option<UsageRecord>> {
        let conn = self.open()?;
        let usage = conn
            .query_row(
                "SELECT user_id, request_count, total_mb, tube_audio_mb, tube_video_mb, clip_video_mb
                 FROM usage WHERE user_id=?1",
                [user_id],
                |row| {
                    Ok(UsageRecord {
                        user_id: row.get(0)?,
                        request_count: row.get(1)?,
                        total_mb: row.get(2)?,
                        tube_audio_mb: row.get(3)?,
                        tube_video_mb: row.get(4)?,
                        clip_video_mb: row.get(5)?,
                    })
                },
            )
            .optional()?;
        Ok(usage)
    }
}

fn sql_quote(value: &str) -> String {
    let escaped = value.replace('\'', "''");
    format!("'{}'", escaped)
}

fn parse_timestamp(value: Option<NaiveDateTime>) -> Result<Option<DateTime<Utc>>, rusqlite::Error> {
    Ok(value.map(|dt| DateTime::<Utc>::from_naive_utc_and_offset(dt, Utc)))
}
