use std::ops::Range;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use bytes::Bytes;
use futures_util::stream::BoxStream;
use opendal::{ErrorKind, Operator, Scheme};

use crate::key::validate_key;

pub type ByteStream = BoxStream<'static, std::io::Result<Bytes>>;

/// Byte blobs addressed by key.
///
/// `delete` of a key that is already gone succeeds: sweeps are retried.
#[async_trait]
pub trait StorageGateway: Send + Sync {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()>;

    async fn exists(&self, key: &str) -> Result<bool>;

    /// Object size in bytes, `None` when absent
    async fn size(&self, key: &str) -> Result<Option<u64>>;

    /// Streams `range` of an object without buffering it whole
    async fn read_range(&self, key: &str, range: Range<u64>) -> Result<ByteStream>;

    /// Where `key` lives on the local filesystem, for fs backends only
    fn local_path(&self, key: &str) -> Option<PathBuf>;

    async fn delete(&self, key: &str) -> Result<()>;

    /// Keys under `prefix` (non-recursive)
    async fn list(&self, prefix: &str) -> Result<Vec<String>>;
}

#[derive(Clone)]
pub struct ObjectStore {
    op: Operator,
}

impl ObjectStore {
    pub fn new(op: Operator) -> Self {
        Self { op }
    }

    fn checked<'a>(&self, key: &'a str) -> Result<&'a str> {
        if !validate_key(key) {
            anyhow::bail!("invalid storage key: {}", key);
        }
        Ok(key)
    }
}

#[async_trait]
impl StorageGateway for ObjectStore {
    async fn put(&self, key: &str, bytes: Vec<u8>) -> Result<()> {
        let key = self.checked(key)?;
        let size = bytes.len();
        self.op.write(key, bytes).await?;
        tracing::debug!("[storage] wrote {} ({} bytes)", key, size);
        Ok(())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let key = self.checked(key)?;
        Ok(self.op.exists(key).await?)
    }

    async fn size(&self, key: &str) -> Result<Option<u64>> {
        let key = self.checked(key)?;
        match self.op.stat(key).await {
            Ok(meta) => Ok(Some(meta.content_length())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    async fn read_range(&self, key: &str, range: Range<u64>) -> Result<ByteStream> {
        let key = self.checked(key)?;
        let stream = self.op.reader(key).await?.into_bytes_stream(range).await?;
        Ok(Box::pin(stream))
    }

    fn local_path(&self, key: &str) -> Option<PathBuf> {
        if !validate_key(key) {
            return None;
        }
        let info = self.op.info();
        matches!(info.scheme(), Scheme::Fs).then(|| PathBuf::from(info.root()).join(key))
    }

    async fn delete(&self, key: &str) -> Result<()> {
        let key = self.checked(key)?;
        match self.op.delete(key).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                tracing::debug!("[storage] {} already gone", key);
                Ok(())
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn list(&self, prefix: &str) -> Result<Vec<String>> {
        let dir = if prefix.is_empty() || prefix.ends_with('/') {
            prefix.to_string()
        } else {
            format!("{prefix}/")
        };
        let entries = match self.op.list(&dir).await {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(vec![]),
            Err(e) => return Err(e.into()),
        };
        Ok(entries
            .into_iter()
            .filter(|entry| !entry.metadata().is_dir())
            .map(|entry| entry.path().to_string())
            .collect())
    }
}
