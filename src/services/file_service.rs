//! src/services/file_service.rs
//!
//! FileService: the user-facing file operations (create, get, list, move,
//! delete) layered over an [`ObjectStore`]. Files live in a per-user virtual
//! path space; `key_codec` maps that space onto the store's flat keys.
//!
//! Store failures are normalized exactly once, here, into
//! [`FileServiceError`]. Missing objects become `NotFound`, keys the store
//! refuses become `InvalidKey`, and anything else is logged and passed
//! through as [`FileServiceError::Backend`].
//!
//! Duplicate detection is a read followed by a write. Two concurrent
//! non-overwrite writers targeting the same key can both pass the check; the
//! later write wins.

use crate::{
    models::file::File,
    services::{
        key_codec::{self, InvalidKey},
        object_store::{
            Acl, ByteStream, CREATED_AT_METADATA, ObjectHead, ObjectStore, PutObject, StoreError,
            StoreResult,
        },
    },
};
use chrono::{DateTime, SecondsFormat, SubsecRound, Utc};
use std::{collections::HashMap, future::Future, sync::Arc, time::Duration};
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

#[derive(Debug, Error)]
pub enum FileServiceError {
    #[error(transparent)]
    InvalidKey(#[from] InvalidKey),
    #[error("file not found")]
    NotFound,
    #[error("a file already exists at the target path")]
    DuplicateFile,
    /// The stored creation time is missing or unparsable.
    #[error("stored metadata for `{key}` is corrupt: {reason}")]
    CorruptMetadata { key: String, reason: String },
    #[error("object store unavailable: {0}")]
    Backend(#[source] StoreError),
}

pub type FileResult<T> = Result<T, FileServiceError>;

/// Settings injected at construction.
#[derive(Clone, Debug)]
pub struct FileServiceConfig {
    /// Bucket every file is stored in.
    pub bucket: String,

    /// Upper bound on a single store call; `None` waits indefinitely.
    pub backend_timeout: Option<Duration>,
}

/// Caller-supplied description of a file being uploaded.
#[derive(Clone, Debug)]
pub struct CreateFile {
    pub user: u64,
    pub size: u64,
    pub name: String,
    pub path: String,
    pub content_type: String,
    pub overwrite: bool,
}

#[derive(Clone)]
pub struct FileService {
    store: Arc<dyn ObjectStore>,
    config: FileServiceConfig,
}

impl FileService {
    pub fn new(store: Arc<dyn ObjectStore>, config: FileServiceConfig) -> Self {
        Self { store, config }
    }

    pub fn bucket(&self) -> &str {
        &self.config.bucket
    }

    pub fn store(&self) -> &Arc<dyn ObjectStore> {
        &self.store
    }

    /// Upload `content` as `req.name` under `req.path`.
    ///
    /// The returned file echoes the caller's metadata rather than re-reading
    /// the store: `created_at` is taken before the write, `updated_at` after.
    pub async fn create(
        &self,
        req: CreateFile,
        content: ByteStream,
        cancel: &CancellationToken,
    ) -> FileResult<File> {
        let key = key_codec::encode(req.user, &req.path, &req.name);
        // a key that cannot be decoded would poison every later listing
        key_codec::decode(&key)?;

        if !req.overwrite {
            self.ensure_vacant(&key, cancel).await?;
        }

        let created_at = Utc::now().trunc_subsecs(0);
        let opts = PutObject {
            content_type: Some(req.content_type.clone()).filter(|c| !c.is_empty()),
            metadata: HashMap::from([(
                CREATED_AT_METADATA.to_string(),
                created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
            )]),
            acl: Acl::PublicRead,
        };
        self.call(cancel, self.store.put(&self.config.bucket, &key, content, opts))
            .await
            .map_err(normalize)?;
        debug!("created {}", key);

        Ok(File {
            id: key,
            name: req.name,
            path: req.path,
            user: req.user,
            size: req.size,
            content_type: req.content_type,
            created_at,
            updated_at: Utc::now(),
        })
    }

    /// Fetch one file by key.
    pub async fn get(&self, id: &str, cancel: &CancellationToken) -> FileResult<File> {
        let key = key_codec::decode(id)?;
        let head = self
            .call(cancel, self.store.head(&self.config.bucket, id))
            .await
            .map_err(normalize)?;

        let corrupt = |reason: String| FileServiceError::CorruptMetadata {
            key: id.to_string(),
            reason,
        };
        let raw_created_at = head
            .metadata
            .get(CREATED_AT_METADATA)
            .ok_or_else(|| corrupt(format!("missing `{CREATED_AT_METADATA}`")))?;
        let created_at = DateTime::parse_from_rfc3339(raw_created_at)
            .map_err(|err| corrupt(format!("`{raw_created_at}`: {err}")))?
            .with_timezone(&Utc);

        Ok(File {
            id: id.to_string(),
            name: key.name,
            path: key.path,
            user: key.user,
            size: head.content_length,
            content_type: head.content_type.unwrap_or_default(),
            created_at,
            updated_at: head.last_modified.unwrap_or_default(),
        })
    }

    /// List the user's files under `path_prefix`, in store listing order.
    ///
    /// Only what the listing itself reports is filled in (key, size,
    /// last-modified); content type and creation time stay zero. Any key in the
    /// listing that does not decode fails the whole call.
    pub async fn get_by_user(
        &self,
        user: u64,
        path_prefix: &str,
        cancel: &CancellationToken,
    ) -> FileResult<Vec<File>> {
        let prefix = key_codec::encode_prefix(user, path_prefix);
        let objects = self
            .call(cancel, self.store.list(&self.config.bucket, &prefix))
            .await
            .map_err(normalize)?;

        let mut files = Vec::with_capacity(objects.len());
        for object in objects {
            let key = key_codec::decode(&object.key)?;
            // "1" is also a prefix of "10/..."
            if key.user != user {
                continue;
            }
            files.push(File {
                id: object.key,
                name: key.name,
                path: key.path,
                user: key.user,
                size: object.size,
                updated_at: object.last_modified.unwrap_or_default(),
                ..File::default()
            });
        }
        Ok(files)
    }

    /// Remove the object at `key`. Removing a key that holds nothing succeeds.
    pub async fn delete(&self, key: &str, cancel: &CancellationToken) -> FileResult<()> {
        self.call(cancel, self.store.delete(&self.config.bucket, key))
            .await
            .map_err(normalize)
    }

    /// Open a publicly readable object for streaming. Private objects are
    /// reported as missing.
    pub async fn download(
        &self,
        key: &str,
        cancel: &CancellationToken,
    ) -> FileResult<(ObjectHead, ByteStream)> {
        let (head, body) = self
            .call(cancel, self.store.open(&self.config.bucket, key))
            .await
            .map_err(normalize)?;
        if head.acl != Acl::PublicRead {
            return Err(FileServiceError::NotFound);
        }
        Ok((head, body))
    }

    /// Move `source_id` to `new_path`, which names the full destination
    /// (directories and file name) relative to `user`.
    ///
    /// Implemented as copy-then-delete. Once the copy succeeds the move is
    /// reported as done; failing to remove the source is only logged.
    pub async fn move_file(
        &self,
        user: u64,
        source_id: &str,
        new_path: &str,
        overwrite: bool,
        cancel: &CancellationToken,
    ) -> FileResult<File> {
        let source = self.get(source_id, cancel).await?;

        let new_key = key_codec::encode_prefix(user, new_path);
        let destination = key_codec::decode(&new_key)?;
        if new_key == source.id {
            return Ok(source);
        }

        if !overwrite {
            self.ensure_vacant(&new_key, cancel).await?;
        }

        self.call(
            cancel,
            self.store
                .copy(&self.config.bucket, source_id, &new_key, Acl::PublicRead),
        )
        .await
        .map_err(normalize)?;

        if let Err(err) = self
            .call(cancel, self.store.delete(&self.config.bucket, source_id))
            .await
        {
            warn!("could not delete file {} after move: {}", source_id, err);
        }

        Ok(File {
            id: new_key,
            name: destination.name,
            path: destination.path,
            user: destination.user,
            size: source.size,
            content_type: source.content_type,
            created_at: source.created_at,
            updated_at: Utc::now(),
        })
    }

    /// `DuplicateFile` if a file already lives at `key`.
    async fn ensure_vacant(&self, key: &str, cancel: &CancellationToken) -> FileResult<()> {
        match self.get(key, cancel).await {
            Ok(existing) if !existing.is_empty() => Err(FileServiceError::DuplicateFile),
            Ok(_) | Err(FileServiceError::NotFound) => Ok(()),
            Err(err) => Err(err),
        }
    }

    /// Run one store call under the caller's cancellation token and the
    /// configured deadline.
    async fn call<T>(
        &self,
        cancel: &CancellationToken,
        op: impl Future<Output = StoreResult<T>>,
    ) -> StoreResult<T> {
        let bounded = async {
            match self.config.backend_timeout {
                Some(limit) => tokio::time::timeout(limit, op)
                    .await
                    .unwrap_or_else(|_| Err(StoreError::Timeout)),
                None => op.await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => Err(StoreError::Cancelled),
            result = bounded => result,
        }
    }
}

/// Map a store failure onto the service taxonomy.
fn normalize(err: StoreError) -> FileServiceError {
    match err {
        StoreError::NoSuchKey(_) | StoreError::NotFound(_) => FileServiceError::NotFound,
        StoreError::InvalidKey(key) => FileServiceError::InvalidKey(InvalidKey(key)),
        other => {
            error!("object store error: {}", other);
            FileServiceError::Backend(other)
        }
    }
}
