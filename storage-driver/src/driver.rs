use std::fmt;

use camino::{Utf8Component, Utf8Path};
use chrono::{DateTime, Utc};
use tokio::io;

use crate::error::{StorageError, StorageErrorKind};

/// A reader stream for object contents.
pub type Reader<'r> = dyn io::AsyncBufRead + Unpin + Send + Sync + 'r;

/// A writer stream for object contents.
pub type Writer<'w> = dyn io::AsyncWrite + Unpin + Send + Sync + 'w;

/// Object metadata, which will be generically provided by the driver.
///
/// This struct only provides common metadata fields, and drivers may provide more specific
/// metadata fields directly.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Metadata {
    /// The size of the object in bytes.
    pub size: u64,

    /// The creation timestamp of the object.
    pub created: DateTime<Utc>,
}

/// A storage driver, which provides keyed access to a storage backend.
///
/// Objects live in a bucket (a single path component) under a relative key.
/// Drivers must reject locations which would escape their bucket, see
/// [`validate_location`].
#[async_trait::async_trait]
pub trait Driver: fmt::Debug {
    /// The name of the driver.
    fn name(&self) -> &'static str;

    /// Delete an object, by key.
    ///
    /// Fails with [`StorageErrorKind::NotFound`] if nothing is stored under the key.
    async fn delete(&self, bucket: &str, remote: &Utf8Path) -> Result<(), StorageError>;

    /// Get the metadata for an object, by key.
    async fn metadata(&self, bucket: &str, remote: &Utf8Path) -> Result<Metadata, StorageError>;

    /// Store an object, replacing anything already stored under the key.
    ///
    /// The replacement is atomic: concurrent readers see either the old
    /// object or the complete new one.
    async fn upload(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError>;

    /// Store a new object, failing if the key is already taken.
    ///
    /// A taken key is reported as [`StorageErrorKind::AlreadyExists`] before
    /// any bytes are read from `reader`, so the caller may retry the same
    /// reader under another key.
    async fn create(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        reader: &mut Reader<'_>,
    ) -> Result<(), StorageError>;

    /// Copy an object from storage into a writer stream.
    async fn download(
        &self,
        bucket: &str,
        remote: &Utf8Path,
        writer: &mut Writer<'_>,
    ) -> Result<(), StorageError>;

    /// List the keys in a bucket, optionally filtered by a prefix.
    ///
    /// A bucket which has never been written to is empty.
    async fn list(
        &self,
        bucket: &str,
        prefix: Option<&Utf8Path>,
    ) -> Result<Vec<String>, StorageError>;
}

/// Check that a bucket and key address a location strictly inside the bucket.
///
/// The bucket must be a single normal path component, and the key must be a
/// non-empty relative path made only of normal components (no `.`, `..`, or
/// roots).
pub fn validate_location(
    engine: &'static str,
    bucket: &str,
    remote: &Utf8Path,
) -> Result<(), StorageError> {
    validate_bucket(engine, bucket)?;

    let key_ok = !remote.as_str().is_empty()
        && remote
            .components()
            .all(|part| matches!(part, Utf8Component::Normal(_)));
    if !key_ok {
        return Err(StorageError::builder(
            engine,
            StorageErrorKind::InvalidRequest,
            format!("key escapes its bucket: {remote:?}"),
        )
        .bucket(bucket)
        .path(remote.as_str())
        .build());
    }

    Ok(())
}

/// Check that a bucket name is a single normal path component.
pub fn validate_bucket(engine: &'static str, bucket: &str) -> Result<(), StorageError> {
    let mut parts = Utf8Path::new(bucket).components();
    let bucket_ok = matches!(
        (parts.next(), parts.next()),
        (Some(Utf8Component::Normal(name)), None) if name == bucket
    );
    if !bucket_ok {
        return Err(StorageError::builder(
            engine,
            StorageErrorKind::InvalidRequest,
            format!("invalid bucket name: {bucket:?}"),
        )
        .bucket(bucket)
        .build());
    }

    Ok(())
}
