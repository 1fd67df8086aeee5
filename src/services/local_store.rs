//! src/services/local_store.rs
//!
//! LocalObjectStore: a bucket-scoped object store backed by SQLite for
//! metadata and local disk for payloads. Payloads are sharded beneath
//! `base_path/{bucket}/{shard}/{shard}/{key}`.

use crate::{
    models::{bucket::Bucket, object::ObjectRecord},
    services::object_store::{
        Acl, ByteStream, HealthCheck, ObjectHead, ObjectStore, ObjectSummary, PutObject,
        StoreError, StoreResult,
    },
};
use async_trait::async_trait;
use chrono::Utc;
use futures::StreamExt;
use md5::Context;
use sqlx::{SqliteConnection, SqlitePool};
use std::{
    collections::HashMap,
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use tokio::{
    fs::{self, File},
    io::AsyncWriteExt,
};
use tokio_util::io::ReaderStream;
use tracing::debug;
use uuid::Uuid;

const INIT_SQL: &str = include_str!("../../migrations/0001_init.sql");

const MAX_OBJECT_KEY_LEN: usize = 1024;
const BUCKET_NAME_MIN_LEN: usize = 3;
const BUCKET_NAME_MAX_LEN: usize = 63;

const OBJECT_COLUMNS: &str = "id, bucket_id, key, content_type, size_bytes, etag, acl, metadata, last_modified";

/// Object store keeping payloads on disk and metadata in SQLite.
///
/// Cheap to clone; clones share the pool.
#[derive(Clone)]
pub struct LocalObjectStore {
    /// Shared SQLite connection pool used for metadata operations.
    pub db: Arc<SqlitePool>,

    /// Base directory on disk where object payloads are stored.
    pub base_path: PathBuf,
}

impl LocalObjectStore {
    pub fn new(db: Arc<SqlitePool>, base_path: impl Into<PathBuf>) -> Self {
        Self {
            db,
            base_path: base_path.into(),
        }
    }

    /// Apply the embedded schema. Every statement is idempotent.
    pub async fn migrate(&self) -> StoreResult<()> {
        let statements = INIT_SQL
            .split(';')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .collect::<Vec<_>>();

        tracing::info!("Running {} migration statements...", statements.len());

        for stmt in statements {
            debug!("Executing migration SQL: {}", stmt);
            sqlx::query(stmt).execute(&*self.db).await?;
        }
        Ok(())
    }

    /// Return the named bucket, creating it (and its directory) if missing.
    pub async fn ensure_bucket(&self, name: &str) -> StoreResult<Bucket> {
        match self.fetch_bucket(name).await {
            Ok(bucket) => return Ok(bucket),
            Err(StoreError::NoSuchBucket(_)) => {}
            Err(err) => return Err(err),
        }

        fs::create_dir_all(self.bucket_root(name)).await?;
        let bucket = Bucket {
            id: Uuid::new_v4(),
            name: name.to_string(),
            created_at: Utc::now(),
        };

        match sqlx::query("INSERT INTO buckets (id, name, created_at) VALUES (?, ?, ?)")
            .bind(bucket.id)
            .bind(&bucket.name)
            .bind(bucket.created_at)
            .execute(&*self.db)
            .await
        {
            Ok(_) => {
                tracing::info!("Created bucket {}", name);
                Ok(bucket)
            }
            // lost a creation race; the winner's row is the bucket
            Err(err) if is_unique_violation(&err) => self.fetch_bucket(name).await,
            Err(err) => Err(StoreError::Sqlx(err)),
        }
    }

    /// Basic key validation to avoid trivial path traversal vectors.
    fn ensure_key_safe(&self, key: &str) -> StoreResult<()> {
        let unsafe_key = key.is_empty()
            || key.len() > MAX_OBJECT_KEY_LEN
            || key.starts_with('/')
            || key.split('/').any(|segment| segment == "..")
            || key
                .bytes()
                .any(|b| b.is_ascii_control() || b == b'\\' || b == b'\0');
        if unsafe_key {
            return Err(StoreError::InvalidKey(key.to_string()));
        }
        Ok(())
    }

    /// Validate bucket name format.
    ///
    /// Enforces S3-like naming rules:
    /// - 3–63 characters
    /// - lowercase letters, digits, dots, hyphens only
    /// - cannot start/end with dot or hyphen
    /// - cannot contain consecutive dots or dot-hyphen patterns
    /// - cannot look like an IPv4 address
    fn ensure_bucket_name_safe(&self, name: &str) -> StoreResult<()> {
        let invalid = |reason: &str| StoreError::InvalidBucketName {
            name: name.to_string(),
            reason: reason.into(),
        };

        let len = name.len();
        if !(BUCKET_NAME_MIN_LEN..=BUCKET_NAME_MAX_LEN).contains(&len) {
            return Err(invalid("must be between 3 and 63 characters"));
        }
        if !name
            .chars()
            .all(|c| matches!(c, 'a'..='z' | '0'..='9' | '.' | '-'))
        {
            return Err(invalid(
                "allowed characters are lowercase letters, digits, dots, and hyphens",
            ));
        }
        if name.starts_with(['.', '-']) || name.ends_with(['.', '-']) {
            return Err(invalid("must start and end with a lowercase letter or digit"));
        }
        if name.contains("..") || name.contains("-.") || name.contains(".-") {
            return Err(invalid(
                "cannot contain consecutive dots or dot-hyphen combinations",
            ));
        }
        if is_ipv4_like(name) {
            return Err(invalid("must not be formatted like an IP address"));
        }
        Ok(())
    }

    fn bucket_root(&self, bucket_name: &str) -> PathBuf {
        self.base_path.join(bucket_name)
    }

    /// Two-level shard directories from MD5(bucket/key), keeping per-directory
    /// file counts low.
    fn object_shards(bucket_name: &str, key: &str) -> (String, String) {
        let digest = md5::compute(format!("{}/{}", bucket_name, key));
        (format!("{:02x}", digest[0]), format!("{:02x}", digest[1]))
    }

    fn object_path(&self, bucket_name: &str, key: &str) -> PathBuf {
        let (shard_a, shard_b) = Self::object_shards(bucket_name, key);
        let mut path = self.bucket_root(bucket_name);
        path.push(shard_a);
        path.push(shard_b);
        path.push(key);
        path
    }

    async fn fetch_bucket(&self, bucket: &str) -> StoreResult<Bucket> {
        self.ensure_bucket_name_safe(bucket)?;
        sqlx::query_as::<_, Bucket>("SELECT id, name, created_at FROM buckets WHERE name = ?")
            .bind(bucket)
            .fetch_one(&*self.db)
            .await
            .map_err(|err| match err {
                sqlx::Error::RowNotFound => StoreError::NoSuchBucket(bucket.to_string()),
                other => StoreError::Sqlx(other),
            })
    }

    async fn fetch_object(&self, bucket: &Bucket, key: &str) -> StoreResult<ObjectRecord> {
        sqlx::query_as::<_, ObjectRecord>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects WHERE key = ? AND bucket_id = ?"
        ))
        .bind(key)
        .bind(bucket.id)
        .fetch_one(&*self.db)
        .await
        .map_err(|err| match err {
            sqlx::Error::RowNotFound => StoreError::NoSuchKey(key.to_string()),
            other => StoreError::Sqlx(other),
        })
    }

    /// Resolve the bucket and the object row, checking the payload is on disk.
    async fn locate(&self, bucket: &str, key: &str) -> StoreResult<(ObjectRecord, PathBuf)> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let record = self.fetch_object(&bucket_rec, key).await?;
        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::metadata(&file_path).await {
            Ok(_) => Ok((record, file_path)),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                Err(StoreError::NotFound(key.to_string()))
            }
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    /// Stream `body` into a temp file next to `file_path`. Returns the temp
    /// path, byte count and MD5 etag; the caller installs it.
    async fn write_payload(
        &self,
        file_path: &Path,
        mut body: ByteStream,
    ) -> StoreResult<(PathBuf, i64, String)> {
        let parent = parent_dir(file_path)?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        let mut file = File::create(&tmp_path).await?;

        let mut size_bytes: i64 = 0;
        let mut digest = Context::new();
        while let Some(chunk_res) = body.next().await {
            let written = match chunk_res {
                Ok(chunk) => {
                    size_bytes += chunk.len() as i64;
                    digest.consume(&chunk);
                    file.write_all(&chunk).await
                }
                Err(err) => Err(err),
            };
            if let Err(err) = written {
                let _ = fs::remove_file(&tmp_path).await;
                return Err(StoreError::Io(err));
            }
        }
        if let Err(err) = finish_file(&mut file).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        Ok((tmp_path, size_bytes, format!("{:x}", digest.compute())))
    }

    /// Upsert the row for `key` and move `tmp_path` over `file_path` as one
    /// unit. The row is committed only once the payload is in place; any
    /// failure leaves the previous object untouched and removes `tmp_path`.
    async fn commit_object(
        &self,
        tmp_path: &Path,
        file_path: &Path,
        row: NewRecord<'_>,
    ) -> StoreResult<()> {
        let staged = async {
            let mut tx = self.db.begin().await?;
            upsert_record(&mut *tx, row).await?;
            install(tmp_path, file_path).await?;
            tx.commit().await?;
            Ok::<_, StoreError>(())
        }
        .await;
        if staged.is_err() {
            let _ = fs::remove_file(tmp_path).await;
        }
        staged
    }

    /// Recursively remove empty directories up to bucket root.
    async fn prune_empty_dirs(&self, start: &Path, stop: &Path) {
        let mut current = start.to_path_buf();
        while current.starts_with(stop) && current != stop {
            match fs::remove_dir(&current).await {
                Ok(_) => match current.parent() {
                    Some(parent) => current = parent.to_path_buf(),
                    None => break,
                },
                Err(err) if err.kind() == ErrorKind::NotFound => break,
                Err(err) if err.kind() == ErrorKind::DirectoryNotEmpty => break,
                Err(err) => {
                    debug!("failed to prune directory {}: {}", current.display(), err);
                    break;
                }
            }
        }
    }
}

#[async_trait]
impl ObjectStore for LocalObjectStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        opts: PutObject,
    ) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;
        let metadata = serde_json::to_string(&opts.metadata)?;

        let file_path = self.object_path(&bucket_rec.name, key);
        let (tmp_path, size_bytes, etag) = self.write_payload(&file_path, body).await?;

        self.commit_object(
            &tmp_path,
            &file_path,
            NewRecord {
                bucket: &bucket_rec,
                key,
                content_type: opts.content_type.as_deref(),
                size_bytes,
                etag: &etag,
                acl: opts.acl,
                metadata: &metadata,
            },
        )
        .await?;
        debug!("stored {}/{} ({} bytes)", bucket, key, size_bytes);
        Ok(())
    }

    async fn head(&self, bucket: &str, key: &str) -> StoreResult<ObjectHead> {
        let (record, _) = self.locate(bucket, key).await?;
        record_head(&record)
    }

    async fn list(&self, bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectSummary>> {
        let bucket_rec = self.fetch_bucket(bucket).await?;
        // substr instead of LIKE so `%` and `_` in prefixes match literally
        let rows = sqlx::query_as::<_, ObjectRecord>(&format!(
            "SELECT {OBJECT_COLUMNS} FROM objects \
             WHERE bucket_id = ? AND substr(key, 1, length(?)) = ? \
             ORDER BY key ASC"
        ))
        .bind(bucket_rec.id)
        .bind(prefix)
        .bind(prefix)
        .fetch_all(&*self.db)
        .await?;

        Ok(rows
            .into_iter()
            .map(|row| ObjectSummary {
                size: u64::try_from(row.size_bytes).unwrap_or_default(),
                last_modified: Some(row.last_modified),
                key: row.key,
            })
            .collect())
    }

    async fn copy(&self, bucket: &str, source: &str, dest: &str, acl: Acl) -> StoreResult<()> {
        self.ensure_key_safe(dest)?;
        let (record, source_path) = self.locate(bucket, source).await?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let dest_path = self.object_path(&bucket_rec.name, dest);
        let parent = parent_dir(&dest_path)?;
        fs::create_dir_all(&parent).await?;
        let tmp_path = parent.join(format!(".tmp-{}", Uuid::new_v4()));
        if let Err(err) = fs::copy(&source_path, &tmp_path).await {
            let _ = fs::remove_file(&tmp_path).await;
            return Err(StoreError::Io(err));
        }

        self.commit_object(
            &tmp_path,
            &dest_path,
            NewRecord {
                bucket: &bucket_rec,
                key: dest,
                content_type: record.content_type.as_deref(),
                size_bytes: record.size_bytes,
                etag: record.etag.as_deref().unwrap_or_default(),
                acl,
                metadata: &record.metadata,
            },
        )
        .await?;
        debug!("copied {}/{} to {}", bucket, source, dest);
        Ok(())
    }

    /// Deleting a key the store does not hold succeeds.
    async fn delete(&self, bucket: &str, key: &str) -> StoreResult<()> {
        self.ensure_key_safe(key)?;
        let bucket_rec = self.fetch_bucket(bucket).await?;

        let result = sqlx::query("DELETE FROM objects WHERE key = ? AND bucket_id = ?")
            .bind(key)
            .bind(bucket_rec.id)
            .execute(&*self.db)
            .await?;
        if result.rows_affected() == 0 {
            debug!("delete of absent key {}/{}", bucket, key);
            return Ok(());
        }

        let file_path = self.object_path(&bucket_rec.name, key);
        match fs::remove_file(&file_path).await {
            Ok(_) => debug!("removed physical file {}", file_path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!("file {} already missing", file_path.display());
            }
            Err(err) => return Err(StoreError::Io(err)),
        }

        if let Some(parent) = file_path.parent() {
            let bucket_root = self.bucket_root(&bucket_rec.name);
            self.prune_empty_dirs(parent, &bucket_root).await;
        }
        Ok(())
    }

    async fn open(&self, bucket: &str, key: &str) -> StoreResult<(ObjectHead, ByteStream)> {
        let (record, file_path) = self.locate(bucket, key).await?;
        let file = File::open(&file_path).await.map_err(|err| {
            if err.kind() == ErrorKind::NotFound {
                StoreError::NotFound(key.to_string())
            } else {
                StoreError::Io(err)
            }
        })?;
        Ok((record_head(&record)?, ReaderStream::new(file).boxed()))
    }

    /// SQLite connectivity plus a write/read/delete round trip under `base_path`.
    async fn health_checks(&self) -> Vec<HealthCheck> {
        let sqlite = match sqlx::query_scalar::<_, i64>("SELECT 1")
            .fetch_one(&*self.db)
            .await
        {
            Ok(1) => (true, None),
            Ok(v) => (false, Some(format!("unexpected result: {}", v))),
            Err(e) => (false, Some(format!("error: {}", e))),
        };

        let tmp_path = self.base_path.join(format!(".readyz-{}", Uuid::new_v4()));
        let disk = match fs::write(&tmp_path, b"readyz").await {
            Ok(_) => match fs::read(&tmp_path).await {
                Ok(bytes) if bytes == b"readyz" => match fs::remove_file(&tmp_path).await {
                    Ok(_) => (true, None),
                    Err(e) => (true, Some(format!("could not remove tmp file: {}", e))),
                },
                Ok(_) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some("file content mismatch".to_string()))
                }
                Err(e) => {
                    let _ = fs::remove_file(&tmp_path).await;
                    (false, Some(format!("could not read tmp file: {}", e)))
                }
            },
            Err(e) => (false, Some(format!("could not write tmp file: {}", e))),
        };

        vec![
            HealthCheck {
                name: "sqlite",
                ok: sqlite.0,
                error: sqlite.1,
            },
            HealthCheck {
                name: "disk",
                ok: disk.0,
                error: disk.1,
            },
        ]
    }
}

/// Column values for one object row.
struct NewRecord<'a> {
    bucket: &'a Bucket,
    key: &'a str,
    content_type: Option<&'a str>,
    size_bytes: i64,
    etag: &'a str,
    acl: Acl,
    metadata: &'a str,
}

/// Insert or replace the metadata row for `row.key` (S3-like overwrite semantics).
async fn upsert_record(conn: &mut SqliteConnection, row: NewRecord<'_>) -> StoreResult<()> {
    sqlx::query(
        r#"
        INSERT INTO objects (
            id, bucket_id, key, content_type, size_bytes,
            etag, acl, metadata, last_modified
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(bucket_id, key) DO UPDATE SET
            content_type = excluded.content_type,
            size_bytes = excluded.size_bytes,
            etag = excluded.etag,
            acl = excluded.acl,
            metadata = excluded.metadata,
            last_modified = excluded.last_modified
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(row.bucket.id)
    .bind(row.key)
    .bind(row.content_type)
    .bind(row.size_bytes)
    .bind(row.etag)
    .bind(row.acl.as_str())
    .bind(row.metadata)
    .bind(Utc::now())
    .execute(conn)
    .await?;
    Ok(())
}

fn record_head(record: &ObjectRecord) -> StoreResult<ObjectHead> {
    let metadata: HashMap<String, String> = serde_json::from_str(&record.metadata)?;
    Ok(ObjectHead {
        content_length: u64::try_from(record.size_bytes).unwrap_or_default(),
        content_type: record.content_type.clone(),
        last_modified: Some(record.last_modified),
        metadata,
        acl: Acl::parse(&record.acl),
    })
}

fn parent_dir(path: &Path) -> StoreResult<PathBuf> {
    path.parent().map(Path::to_path_buf).ok_or_else(|| {
        StoreError::Io(io::Error::new(
            ErrorKind::Other,
            "object path missing parent directory",
        ))
    })
}

async fn finish_file(file: &mut File) -> io::Result<()> {
    file.flush().await?;
    file.sync_all().await
}

/// Atomically move a finished temp file over `dest`.
async fn install(tmp_path: &Path, dest: &Path) -> StoreResult<()> {
    if let Err(err) = fs::rename(tmp_path, dest).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(dest).await?;
            fs::rename(tmp_path, dest).await?;
        } else {
            let _ = fs::remove_file(tmp_path).await;
            return Err(StoreError::Io(err));
        }
    }
    Ok(())
}

fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(
        err,
        sqlx::Error::Database(db_err) if db_err.message().to_ascii_lowercase().contains("unique")
    )
}

/// Check if a string matches IPv4-like dotted decimal form.
fn is_ipv4_like(name: &str) -> bool {
    let parts: Vec<&str> = name.split('.').collect();
    parts.len() == 4
        && parts.iter().all(|segment| {
            !segment.is_empty()
                && segment.len() <= 3
                && segment.chars().all(|c| c.is_ascii_digit())
                && segment.parse::<u8>().is_ok()
        })
}
