use std::collections::{BTreeMap, HashMap};

use camino::{Utf8Path, Utf8PathBuf};
use chrono::{DateTime, Utc};
use tokio::{io::AsyncWriteExt, sync::RwLock};

use storage_driver::{
    validate_bucket, validate_location, Driver, Metadata, Reader, StorageError, StorageErrorKind,
    Writer,
};

#[derive(Debug)]
struct MemoryFileItem {
    created: DateTime<Utc>,
    data: Vec<u8>,
}

impl AsRef<[u8]> for MemoryFileItem {
    fn as_ref(&self) -> &[u8] {
        &self.data
    }
}

impl From<Vec<u8>> for MemoryFileItem {
    fn from(data: Vec<u8>) -> Self {
        Self {
            created: Utc::now(),
            data,
        }
    }
}

impl From<&MemoryFileItem> for Metadata {
    fn from(value: &MemoryFileItem) -> Self {
        Self {
            created: value.created,
            size: value.data.len() as u64,
        }
    }
}

type Bucket = BTreeMap<Utf8PathBuf, MemoryFileItem>;

/// Storage driver that stores objects in memory.
///
/// Keys are kept ordered, so listings are deterministic.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    buckets: RwLock<HashMap<String, Bucket>>,
}

impl MemoryStorage {
    /// Create a new, empty `MemoryStorage` instance.
    pub fn new() -> Self {
        Self::default()
    }

    fn not_found(&self, bucket: &str, remote: &Utf8Path) -> StorageError {
        StorageError::builder(
            self.name(),
            StorageErrorKind::NotFound,
            format!("Path not found: {remote}"),
        )
        .bucket(bucket)
        .path(remote.as_str())
        .build()
    }

    async fn read_all(&self, local: &mut Reader<'_>) -> Result<Vec<u8>, StorageError> {
        let mut buf = Vec::new();

        tokio::io::copy_buf(local, &mut buf)
            .await
            .map_err(|err| StorageError::io(self.name(), err).context("read upload").build())?;

        Ok(buf)
    }
}

#[async_trait::async_trait]
impl Driver for MemoryStorage {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        validate_location(self.name(), bucket, remote)?;
        let buckets = self.buckets.read().await;
        buckets
            .get(bucket)
            .and_then(|items| items.get(remote))
            .map(Metadata::from)
            .ok_or_else(|| self.not_found(bucket, remote))
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        validate_location(self.name(), bucket, remote)?;
        let mut buckets = self.buckets.write().await;
        buckets
            .get_mut(bucket)
            .and_then(|items| items.remove(remote))
            .map(|_| ())
            .ok_or_else(|| self.not_found(bucket, remote))
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        validate_location(self.name(), bucket, remote)?;
        let buf = self.read_all(local).await?;

        let mut buckets = self.buckets.write().await;
        let items = buckets.entry(bucket.to_string()).or_default();
        items.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn create(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        validate_location(self.name(), bucket, remote)?;

        let taken = |bucket: &str| {
            StorageError::builder(
                self.name(),
                StorageErrorKind::AlreadyExists,
                format!("Path already exists: {remote}"),
            )
            .bucket(bucket)
            .path(remote.as_str())
            .build()
        };

        // Check before reading so the caller keeps an unconsumed reader.
        {
            let buckets = self.buckets.read().await;
            if buckets
                .get(bucket)
                .is_some_and(|items| items.contains_key(remote))
            {
                return Err(taken(bucket));
            }
        }

        let buf = self.read_all(local).await?;

        let mut buckets = self.buckets.write().await;
        let items = buckets.entry(bucket.to_string()).or_default();
        if items.contains_key(remote) {
            return Err(taken(bucket));
        }
        items.insert(remote.to_owned(), buf.into());

        Ok(())
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        local: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        validate_location(self.name(), bucket, remote)?;
        let buckets = self.buckets.read().await;
        let mut buf = buckets
            .get(bucket)
            .and_then(|items| items.get(remote))
            .ok_or_else(|| self.not_found(bucket, remote))?
            .as_ref();

        tokio::io::copy_buf(&mut buf, local)
            .await
            .map_err(|err| StorageError::io(self.name(), err).bucket(bucket).build())?;

        local
            .flush()
            .await
            .map_err(|err| StorageError::io(self.name(), err).bucket(bucket).build())?;

        Ok(())
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        validate_bucket(self.name(), bucket)?;
        tracing::trace!(%bucket, ?prefix, "list memory bucket");

        let buckets = self.buckets.read().await;
        let Some(items) = buckets.get(bucket) else {
            return Ok(Vec::new());
        };

        Ok(items
            .keys()
            .filter(|path| prefix.map_or(true, |prefix| path.as_str().starts_with(prefix.as_str())))
            .map(|path| path.to_string())
            .collect())
    }
}
