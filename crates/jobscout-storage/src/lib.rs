//! Job persistence (in-memory + Postgres), the upsert coordinator, and the
//! hash-addressed page snapshot archive.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use jobscout_core::{identity_key, JobPosting, JobType, NormalizedJob};
use sha2::{Digest, Sha256};
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::Row;
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

pub const CRATE_NAME: &str = "jobscout-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("a job with key {0:?} already exists")]
    Conflict(String),
    #[error("job {0} not found")]
    NotFound(Uuid),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("stored value could not be decoded: {0}")]
    Encoding(String),
}

/// The narrow storage contract the scrape pipeline depends on.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Looks a job up by case-normalized `(role, company_name)`.
    async fn find_by_key(&self, role: &str, company_name: &str) -> Result<Option<JobPosting>, StoreError>;

    async fn create(&self, posting: JobPosting) -> Result<JobPosting, StoreError>;

    async fn update(&self, posting: JobPosting) -> Result<JobPosting, StoreError>;
}

/// Insertion-ordered store used by tests, fixture replays and runs without
/// `DATABASE_URL`.
#[derive(Debug, Default)]
pub struct MemoryJobStore {
    records: Mutex<Vec<JobPosting>>,
}

impl MemoryJobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn records(&self) -> Vec<JobPosting> {
        self.records.lock().await.clone()
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl JobStore for MemoryJobStore {
    async fn find_by_key(&self, role: &str, company_name: &str) -> Result<Option<JobPosting>, StoreError> {
        let key = identity_key(role, company_name);
        let records = self.records.lock().await;
        Ok(records.iter().find(|r| r.identity_key() == key).cloned())
    }

    async fn create(&self, posting: JobPosting) -> Result<JobPosting, StoreError> {
        let key = posting.identity_key();
        let mut records = self.records.lock().await;
        if records.iter().any(|r| r.identity_key() == key) {
            return Err(StoreError::Conflict(key));
        }
        records.push(posting.clone());
        Ok(posting)
    }

    async fn update(&self, posting: JobPosting) -> Result<JobPosting, StoreError> {
        let mut records = self.records.lock().await;
        let slot = records
            .iter_mut()
            .find(|r| r.id == posting.id)
            .ok_or(StoreError::NotFound(posting.id))?;
        *slot = posting.clone();
        Ok(posting)
    }
}

/// `job_postings` table keyed by a unique `identity_key` column.
#[derive(Debug, Clone)]
pub struct PgJobStore {
    pool: PgPool,
}

impl PgJobStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPoolOptions::new()
            .max_connections(4)
            .connect(database_url)
            .await?;
        Ok(Self::new(pool))
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("../../migrations")
            .run(&self.pool)
            .await
            .context("applying job_postings migrations")?;
        info!("database migrations applied");
        Ok(())
    }
}

const SELECT_COLUMNS: &str = r#"
    SELECT id, role, company_name, job_type, location, experience_required,
           short_description, full_description, skills_required,
           compensation_raw, compensation_min, compensation_max,
           apply_link, source_url, details_scraped, created_at, updated_at
      FROM job_postings
"#;

fn posting_from_row(row: &PgRow) -> Result<JobPosting, StoreError> {
    let job_type: String = row.try_get("job_type")?;
    let skills: serde_json::Value = row.try_get("skills_required")?;
    let skills_required = serde_json::from_value::<Vec<String>>(skills)
        .map_err(|e| StoreError::Encoding(format!("skills_required: {e}")))?;
    Ok(JobPosting {
        id: row.try_get("id")?,
        role: row.try_get("role")?,
        company_name: row.try_get("company_name")?,
        job_type: JobType::from_label(&job_type),
        location: row.try_get("location")?,
        experience_required: row.try_get("experience_required")?,
        short_description: row.try_get("short_description")?,
        full_description: row.try_get("full_description")?,
        skills_required,
        compensation_raw: row.try_get("compensation_raw")?,
        compensation_min: row.try_get("compensation_min")?,
        compensation_max: row.try_get("compensation_max")?,
        apply_link: row.try_get("apply_link")?,
        source_url: row.try_get("source_url")?,
        details_scraped: row.try_get("details_scraped")?,
        created_at: row.try_get("created_at")?,
        updated_at: row.try_get("updated_at")?,
    })
}

#[async_trait]
impl JobStore for PgJobStore {
    async fn find_by_key(&self, role: &str, company_name: &str) -> Result<Option<JobPosting>, StoreError> {
        let sql = format!("{SELECT_COLUMNS} WHERE identity_key = $1");
        let row = sqlx::query(&sql)
            .bind(identity_key(role, company_name))
            .fetch_optional(&self.pool)
            .await?;
        row.as_ref().map(posting_from_row).transpose()
    }

    async fn create(&self, posting: JobPosting) -> Result<JobPosting, StoreError> {
        let result = sqlx::query(
            r#"
            INSERT INTO job_postings (
                id, identity_key, role, company_name, job_type, location,
                experience_required, short_description, full_description,
                skills_required, compensation_raw, compensation_min,
                compensation_max, apply_link, source_url, details_scraped,
                created_at, updated_at
            ) VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
            ON CONFLICT (identity_key) DO NOTHING
            "#,
        )
        .bind(posting.id)
        .bind(posting.identity_key())
        .bind(&posting.role)
        .bind(&posting.company_name)
        .bind(posting.job_type.as_str())
        .bind(&posting.location)
        .bind(&posting.experience_required)
        .bind(&posting.short_description)
        .bind(&posting.full_description)
        .bind(sqlx::types::Json(&posting.skills_required))
        .bind(&posting.compensation_raw)
        .bind(posting.compensation_min)
        .bind(posting.compensation_max)
        .bind(&posting.apply_link)
        .bind(&posting.source_url)
        .bind(posting.details_scraped)
        .bind(posting.created_at)
        .bind(posting.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::Conflict(posting.identity_key()));
        }
        Ok(posting)
    }

    async fn update(&self, posting: JobPosting) -> Result<JobPosting, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE job_postings
               SET identity_key = $2,
                   role = $3,
                   company_name = $4,
                   job_type = $5,
                   location = $6,
                   experience_required = $7,
                   short_description = $8,
                   full_description = $9,
                   skills_required = $10,
                   compensation_raw = $11,
                   compensation_min = $12,
                   compensation_max = $13,
                   apply_link = $14,
                   source_url = $15,
                   details_scraped = $16,
                   updated_at = $17
             WHERE id = $1
            "#,
        )
        .bind(posting.id)
        .bind(posting.identity_key())
        .bind(&posting.role)
        .bind(&posting.company_name)
        .bind(posting.job_type.as_str())
        .bind(&posting.location)
        .bind(&posting.experience_required)
        .bind(&posting.short_description)
        .bind(&posting.full_description)
        .bind(sqlx::types::Json(&posting.skills_required))
        .bind(&posting.compensation_raw)
        .bind(posting.compensation_min)
        .bind(posting.compensation_max)
        .bind(&posting.apply_link)
        .bind(&posting.source_url)
        .bind(posting.details_scraped)
        .bind(posting.updated_at)
        .execute(&self.pool)
        .await?;
        if result.rows_affected() == 0 {
            return Err(StoreError::NotFound(posting.id));
        }
        Ok(posting)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UpsertOutcome {
    pub id: Uuid,
    pub was_created: bool,
}

/// Create-or-merge keyed by `(role, company_name)`. Calls are sequential per
/// run so no locking beyond the store's own is needed.
#[derive(Clone)]
pub struct UpsertCoordinator {
    store: Arc<dyn JobStore>,
}

impl UpsertCoordinator {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }

    pub async fn upsert(&self, job: &NormalizedJob) -> Result<UpsertOutcome, StoreError> {
        self.upsert_at(job, Utc::now()).await
    }

    pub async fn upsert_at(&self, job: &NormalizedJob, now: DateTime<Utc>) -> Result<UpsertOutcome, StoreError> {
        match self.store.find_by_key(&job.role, &job.company_name).await? {
            Some(mut existing) => {
                existing.merge(job, now);
                let saved = self.store.update(existing).await?;
                debug!(id = %saved.id, key = %saved.identity_key(), "updated job");
                Ok(UpsertOutcome {
                    id: saved.id,
                    was_created: false,
                })
            }
            None => {
                let saved = self.store.create(JobPosting::from_normalized(job, now)).await?;
                debug!(id = %saved.id, key = %saved.identity_key(), "created job");
                Ok(UpsertOutcome {
                    id: saved.id,
                    was_created: true,
                })
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct StoredSnapshot {
    pub content_hash: String,
    pub relative_path: PathBuf,
    pub absolute_path: PathBuf,
    pub byte_size: usize,
    pub deduplicated: bool,
}

/// Archive of raw page sources, for diagnosing selector drift.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    pub fn snapshot_relative_path(&self, fetched_at: DateTime<Utc>, kind: &str, content_hash: &str) -> PathBuf {
        let stamp = fetched_at.format("%Y%m%d_%H%M%S").to_string();
        PathBuf::from(stamp)
            .join(kind)
            .join(format!("{content_hash}.html"))
    }

    /// Writes `html` under `<stamp>/<kind>/<sha256>.html` via temp-file
    /// rename. Identical content in the same slot is not rewritten.
    pub async fn store_page(&self, fetched_at: DateTime<Utc>, kind: &str, html: &str) -> anyhow::Result<StoredSnapshot> {
        let bytes = html.as_bytes();
        let content_hash = Self::sha256_hex(bytes);
        let relative_path = self.snapshot_relative_path(fetched_at, kind, &content_hash);
        let absolute_path = self.root.join(&relative_path);
        let parent = absolute_path
            .parent()
            .map(Path::to_path_buf)
            .with_context(|| format!("snapshot path {} has no parent", absolute_path.display()))?;

        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating snapshot directory {}", parent.display()))?;

        let snapshot = |deduplicated| StoredSnapshot {
            content_hash: content_hash.clone(),
            relative_path: relative_path.clone(),
            absolute_path: absolute_path.clone(),
            byte_size: bytes.len(),
            deduplicated,
        };

        if fs::try_exists(&absolute_path)
            .await
            .with_context(|| format!("checking snapshot path {}", absolute_path.display()))?
        {
            return Ok(snapshot(true));
        }

        let temp_path = parent.join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp snapshot {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp snapshot {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp snapshot {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, &absolute_path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "renaming temp snapshot {} -> {}",
                    temp_path.display(),
                    absolute_path.display()
                )
            });
        }
        Ok(snapshot(false))
    }
}
