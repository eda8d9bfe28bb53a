use std::io;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
use std::task::{Context, Poll};

use camino::Utf8Path;
use chrono::{DateTime, TimeZone, Utc};
use storage::{Driver, MemoryStorage, Metadata, Reader, StorageError, StorageErrorKind, Writer};

use tokio::io::{AsyncRead, ReadBuf};

use crate::id::IdGenerator;

const EPOCH: i64 = 1_700_000_000;

/// `secs` seconds after 2023-11-14T22:13:20Z.
pub(crate) fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(EPOCH + secs, 0).unwrap()
}

/// A clock stuck at [`at(0)`](at).
pub(crate) fn fixed_clock() -> IdGenerator {
    IdGenerator::with_clock(|| at(0))
}

/// A clock which advances one second per reading, starting at [`at(0)`](at).
pub(crate) fn stepping_clock() -> IdGenerator {
    let tick = Arc::new(AtomicI64::new(0));
    IdGenerator::with_clock(move || at(tick.fetch_add(1, Ordering::SeqCst)))
}

/// Yields `data`, then fails as if the connection dropped.
#[derive(Debug)]
pub(crate) struct BrokenReader {
    data: &'static [u8],
}

impl BrokenReader {
    pub(crate) fn new(data: &'static [u8]) -> Self {
        Self { data }
    }
}

impl AsyncRead for BrokenReader {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        if self.data.is_empty() {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::ConnectionReset,
                "reset",
            )));
        }
        let data = self.data;
        let (head, tail) = data.split_at(data.len().min(buf.remaining()));
        buf.put_slice(head);
        self.data = tail;
        Poll::Ready(Ok(()))
    }
}

/// Memory storage whose writes can be switched to fail.
#[derive(Debug, Default)]
pub(crate) struct FlakyStorage {
    inner: MemoryStorage,
    fail_uploads: Arc<AtomicBool>,
    fail_creates: Arc<AtomicBool>,
}

impl FlakyStorage {
    /// The storage, and a switch which makes every later upload fail while set.
    pub(crate) fn new() -> (Self, Arc<AtomicBool>) {
        let storage = Self::default();
        let switch = storage.fail_uploads.clone();
        (storage, switch)
    }

    /// A switch which makes every later exclusive create fail while set.
    pub(crate) fn create_switch(&self) -> Arc<AtomicBool> {
        self.fail_creates.clone()
    }

    fn disk_full(&self) -> StorageError {
        StorageError::new(self.name(), StorageErrorKind::Io, "disk full")
    }
}

#[async_trait::async_trait]
impl Driver for FlakyStorage {
    fn name(&self) -> &'static str {
        "flaky"
    }

    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError> {
        self.inner.delete(bucket, remote).await
    }

    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError> {
        self.inner.metadata(bucket, remote).await
    }

    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        if self.fail_uploads.load(Ordering::SeqCst) {
            return Err(self.disk_full());
        }
        self.inner.upload(bucket, remote, reader).await
    }

    async fn create(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError> {
        if self.fail_creates.load(Ordering::SeqCst) {
            return Err(self.disk_full());
        }
        self.inner.create(bucket, remote, reader).await
    }

    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError> {
        self.inner.download(bucket, remote, writer).await
    }

    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError> {
        self.inner.list(bucket, prefix).await
    }
}
