//! Scripted in-memory `ObjectStore` for unit tests.
//!
//! Each method pops its next queued response; an empty queue falls back to a
//! neutral default (`head`/`open` report `NoSuchKey`, everything else
//! succeeds). Every call is recorded so tests can assert on what reached the
//! store and in which order.

use crate::services::object_store::{
    Acl, ByteStream, ObjectHead, ObjectStore, ObjectSummary, PutObject, StoreError, StoreResult,
};
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use futures::{StreamExt, TryStreamExt, stream};
use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::Duration,
};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Call {
    Put {
        bucket: String,
        key: String,
        content_type: Option<String>,
        metadata: HashMap<String, String>,
        acl: Acl,
        body: Vec<u8>,
    },
    Head(String),
    List(String),
    Copy {
        source: String,
        dest: String,
        acl: Acl,
    },
    Delete(String),
    Open(String),
}

#[derive(Default)]
pub struct ScriptedStore {
    calls: Mutex<Vec<Call>>,
    puts: Mutex<VecDeque<StoreResult<()>>>,
    heads: Mutex<VecDeque<StoreResult<ObjectHead>>>,
    lists: Mutex<VecDeque<StoreResult<Vec<ObjectSummary>>>>,
    copies: Mutex<VecDeque<StoreResult<()>>>,
    deletes: Mutex<VecDeque<StoreResult<()>>>,
    opens: Mutex<VecDeque<StoreResult<(ObjectHead, Vec<u8>)>>>,
    /// Artificial latency applied to `head`.
    head_delay: Option<Duration>,
}

impl ScriptedStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_head_delay(delay: Duration) -> Self {
        Self {
            head_delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn on_put(&self, result: StoreResult<()>) -> &Self {
        self.puts.lock().unwrap().push_back(result);
        self
    }

    pub fn on_head(&self, result: StoreResult<ObjectHead>) -> &Self {
        self.heads.lock().unwrap().push_back(result);
        self
    }

    pub fn on_list(&self, result: StoreResult<Vec<ObjectSummary>>) -> &Self {
        self.lists.lock().unwrap().push_back(result);
        self
    }

    pub fn on_copy(&self, result: StoreResult<()>) -> &Self {
        self.copies.lock().unwrap().push_back(result);
        self
    }

    pub fn on_delete(&self, result: StoreResult<()>) -> &Self {
        self.deletes.lock().unwrap().push_back(result);
        self
    }

    pub fn on_open(&self, result: StoreResult<(ObjectHead, Vec<u8>)>) -> &Self {
        self.opens.lock().unwrap().push_back(result);
        self
    }

    fn record(&self, call: Call) {
        self.calls.lock().unwrap().push(call);
    }
}

/// Head of a stored object carrying a well-formed creation time.
pub fn head_created(created_at: DateTime<Utc>, size: u64) -> ObjectHead {
    ObjectHead {
        content_length: size,
        metadata: HashMap::from([(
            "created_at".to_string(),
            created_at.to_rfc3339_opts(SecondsFormat::Secs, true),
        )]),
        ..ObjectHead::default()
    }
}

pub fn body(data: &'static [u8]) -> ByteStream {
    stream::iter(vec![Ok(Bytes::from_static(data))]).boxed()
}

#[async_trait]
impl ObjectStore for ScriptedStore {
    async fn put(
        &self,
        bucket: &str,
        key: &str,
        body: ByteStream,
        opts: PutObject,
    ) -> StoreResult<()> {
        let chunks: Vec<Bytes> = body.try_collect().await?;
        self.record(Call::Put {
            bucket: bucket.to_string(),
            key: key.to_string(),
            content_type: opts.content_type,
            metadata: opts.metadata,
            acl: opts.acl,
            body: chunks.concat(),
        });
        self.puts.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn head(&self, _bucket: &str, key: &str) -> StoreResult<ObjectHead> {
        self.record(Call::Head(key.to_string()));
        if let Some(delay) = self.head_delay {
            tokio::time::sleep(delay).await;
        }
        let next = self.heads.lock().unwrap().pop_front();
        next.unwrap_or_else(|| Err(StoreError::NoSuchKey(key.to_string())))
    }

    async fn list(&self, _bucket: &str, prefix: &str) -> StoreResult<Vec<ObjectSummary>> {
        self.record(Call::List(prefix.to_string()));
        self.lists.lock().unwrap().pop_front().unwrap_or(Ok(Vec::new()))
    }

    async fn copy(&self, _bucket: &str, source: &str, dest: &str, acl: Acl) -> StoreResult<()> {
        self.record(Call::Copy {
            source: source.to_string(),
            dest: dest.to_string(),
            acl,
        });
        self.copies.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn delete(&self, _bucket: &str, key: &str) -> StoreResult<()> {
        self.record(Call::Delete(key.to_string()));
        self.deletes.lock().unwrap().pop_front().unwrap_or(Ok(()))
    }

    async fn open(&self, _bucket: &str, key: &str) -> StoreResult<(ObjectHead, ByteStream)> {
        self.record(Call::Open(key.to_string()));
        let next = self.opens.lock().unwrap().pop_front();
        let (head, data) = next.unwrap_or_else(|| Err(StoreError::NoSuchKey(key.to_string())))?;
        let stream = stream::iter(vec![Ok(Bytes::from(data))]).boxed();
        Ok((head, stream))
    }
}
