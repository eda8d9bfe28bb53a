//! The release store.
//!
//! Each release is a pair of objects in the `releases` bucket: the artifact
//! blob `<id>.dat` and its metadata `<id>.json`. The blob is always written
//! first and the metadata last, so a failure in between can leave a blob
//! without metadata but never metadata without a blob. Such orphan blobs are
//! invisible to readers and are skipped by identifier allocation.

use std::sync::Arc;

use camino::Utf8PathBuf;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage::{Storage, StorageBucket, StorageErrorKind};
use tokio::io::{AsyncBufRead, AsyncRead, AsyncWrite, BufReader};
use tokio::sync::RwLock;

use crate::digest::DigestReader;
use crate::error::{DistributorError, DistributorResult};
use crate::id::{IdGenerator, MAX_ID_ATTEMPTS, ReleaseId};

/// Bucket holding release blobs and metadata.
pub const RELEASE_BUCKET: &str = "releases";

const BLOB_EXTENSION: &str = "dat";
const META_EXTENSION: &str = "json";

/// A published release, as recorded in its metadata object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Release {
    /// Time-ordered identifier assigned at publication.
    pub id: ReleaseId,
    /// Version label chosen by the publisher.
    pub version: String,
    /// Free-form notes, omitted when empty.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    /// When the release was published.
    pub created_at: DateTime<Utc>,

    /// Artifact length in bytes.
    pub size: u64,

    /// Lower-case hex SHA-256 of the artifact.
    pub sha256: String,
}

/// Caller-supplied fields for a new release.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct NewRelease {
    /// Version label; must not be blank.
    pub version: String,
    /// Optional notes.
    #[serde(default)]
    pub description: Option<String>,
}

impl NewRelease {
    /// A release labelled `version` with no description.
    pub fn new(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
            description: None,
        }
    }

    /// Attach notes to the release.
    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }
}

fn blob_key(id: &ReleaseId) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{id}.{BLOB_EXTENSION}"))
}

fn meta_key(id: &ReleaseId) -> Utf8PathBuf {
    Utf8PathBuf::from(format!("{id}.{META_EXTENSION}"))
}

/// Durable store of releases.
///
/// One lock guards the whole store: publish and unpublish hold it
/// exclusively, reads and streams share it. Clones share the lock.
#[derive(Debug, Clone)]
pub struct ReleaseStore {
    bucket: Arc<RwLock<StorageBucket>>,
    ids: IdGenerator,
}

impl ReleaseStore {
    /// Open the release store kept in `storage`.
    pub fn new(storage: &Storage, ids: IdGenerator) -> Self {
        Self {
            bucket: Arc::new(RwLock::new(storage.bucket(RELEASE_BUCKET))),
            ids,
        }
    }

    /// Store a new release, reading its artifact from `artifact`.
    ///
    /// The identifier and creation time are assigned here. If anything fails
    /// after the blob was written, the blob is removed again.
    #[tracing::instrument(skip(self, meta, artifact), fields(version = %meta.version))]
    pub async fn publish<R>(&self, meta: NewRelease, artifact: R) -> DistributorResult<Release>
    where
        R: AsyncRead + Unpin + Send + Sync,
    {
        let version = meta.version.trim();
        if version.is_empty() {
            return Err(DistributorError::MissingVersion);
        }
        let description = meta
            .description
            .map(|description| description.trim().to_owned())
            .filter(|description| !description.is_empty());

        let bucket = self.bucket.write().await;
        let created_at = self.ids.now();

        let mut reader = BufReader::new(DigestReader::new(artifact));
        let id = allocate(&bucket, self.ids.candidates(created_at), &mut reader).await?;
        let (size, sha256) = reader.into_inner().finish();

        if size == 0 {
            discard(&bucket, &blob_key(&id)).await;
            return Err(DistributorError::EmptyArtifact);
        }

        let release = Release {
            id,
            version: version.to_owned(),
            description,
            created_at,
            size,
            sha256,
        };

        if let Err(err) = commit(&bucket, &release).await {
            discard(&bucket, &blob_key(&release.id)).await;
            return Err(err);
        }

        tracing::info!(id = %release.id, size, "Published release");
        Ok(release)
    }

    /// Fetch the metadata of one release.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: &ReleaseId) -> DistributorResult<Release> {
        let bucket = self.bucket.read().await;
        read_meta(&bucket, id).await
    }

    /// Fetch the metadata of a release whose artifact is present.
    ///
    /// Fails with [`DistributorError::ArtifactNotFound`] when only the
    /// metadata survives.
    #[tracing::instrument(skip(self))]
    pub async fn available(&self, id: &ReleaseId) -> DistributorResult<Release> {
        let bucket = self.bucket.read().await;
        let release = read_meta(&bucket, id).await?;
        if !bucket.exists(&blob_key(id)).await? {
            return Err(DistributorError::ArtifactNotFound(id.clone()));
        }
        Ok(release)
    }

    /// All releases, newest first.
    ///
    /// Releases created at the same instant keep the order in which the
    /// storage enumerated them.
    #[tracing::instrument(skip(self))]
    pub async fn list(&self) -> DistributorResult<Vec<Release>> {
        let bucket = self.bucket.read().await;
        let keys = bucket.list(None).await?;

        let mut releases = Vec::new();
        for key in keys {
            let Some(stem) = key
                .strip_suffix(META_EXTENSION)
                .and_then(|stem| stem.strip_suffix('.'))
            else {
                continue;
            };

            let Ok(id) = stem.parse::<ReleaseId>() else {
                tracing::warn!(%key, "Skipping unexpected entry in release store");
                continue;
            };

            match read_meta(&bucket, &id).await {
                Ok(release) => releases.push(release),
                Err(DistributorError::Serialization(err)) => {
                    tracing::warn!(%key, "Skipping unreadable release metadata: {err}");
                }
                Err(err) => return Err(err),
            }
        }

        releases.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(releases)
    }

    /// Remove a release's blob and metadata.
    ///
    /// Either object may already be missing; the call fails with
    /// [`DistributorError::ReleaseNotFound`] only when both are.
    #[tracing::instrument(skip(self))]
    pub async fn unpublish(&self, id: &ReleaseId) -> DistributorResult<()> {
        let bucket = self.bucket.write().await;

        let blob = remove(&bucket, &blob_key(id)).await?;
        let meta = remove(&bucket, &meta_key(id)).await?;

        match (blob, meta) {
            (false, false) => Err(DistributorError::ReleaseNotFound(id.clone())),
            (true, true) => {
                tracing::info!(%id, "Unpublished release");
                Ok(())
            }
            _ => {
                tracing::warn!(%id, blob, meta, "Unpublished incomplete release");
                Ok(())
            }
        }
    }

    /// Copy a release's artifact into `sink`.
    #[tracing::instrument(skip(self, sink))]
    pub async fn stream<W>(&self, id: &ReleaseId, sink: &mut W) -> DistributorResult<()>
    where
        W: AsyncWrite + Unpin + Send + Sync,
    {
        let bucket = self.bucket.read().await;
        read_meta(&bucket, id).await?;

        match bucket.download(&blob_key(id), sink).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_not_found() => Err(DistributorError::ArtifactNotFound(id.clone())),
            Err(err) => Err(err.into()),
        }
    }
}

/// Write the artifact under the first free candidate identifier.
///
/// A candidate is free when neither its metadata nor its blob exist. The
/// blob is created exclusively, so a taken name is detected before the
/// reader is consumed and the next candidate can reuse it.
async fn allocate<C, R>(
    bucket: &StorageBucket,
    candidates: C,
    reader: &mut R,
) -> DistributorResult<ReleaseId>
where
    C: IntoIterator<Item = ReleaseId>,
    R: AsyncBufRead + Unpin + Send + Sync,
{
    for id in candidates {
        if bucket.exists(&meta_key(&id)).await? {
            tracing::debug!(%id, "Release identifier taken");
            continue;
        }

        let key = blob_key(&id);
        match bucket.create(&key, &mut *reader).await {
            Ok(()) => return Ok(id),
            Err(err) if err.kind() == StorageErrorKind::AlreadyExists => {
                tracing::debug!(%id, "Release identifier taken");
            }
            Err(err) => {
                discard(bucket, &key).await;
                return Err(err.into());
            }
        }
    }

    Err(DistributorError::IdentifiersExhausted {
        attempts: MAX_ID_ATTEMPTS,
    })
}

async fn commit(bucket: &StorageBucket, release: &Release) -> DistributorResult<()> {
    let json = serde_json::to_vec_pretty(release)?;
    bucket.upload(&meta_key(&release.id), &mut &json[..]).await?;
    Ok(())
}

async fn read_meta(bucket: &StorageBucket, id: &ReleaseId) -> DistributorResult<Release> {
    match bucket.read(&meta_key(id)).await {
        Ok(data) => Ok(serde_json::from_slice(&data)?),
        Err(err) if err.is_not_found() => Err(DistributorError::ReleaseNotFound(id.clone())),
        Err(err) => Err(err.into()),
    }
}

/// Delete `key`, reporting whether it existed.
async fn remove(bucket: &StorageBucket, key: &Utf8PathBuf) -> DistributorResult<bool> {
    match bucket.delete(key).await {
        Ok(()) => Ok(true),
        Err(err) if err.is_not_found() => Ok(false),
        Err(err) => Err(err.into()),
    }
}

/// Best-effort removal of a partially written object.
async fn discard(bucket: &StorageBucket, key: &Utf8PathBuf) {
    match bucket.delete(key).await {
        Ok(()) => tracing::debug!(%key, "Removed partial artifact"),
        Err(err) if err.is_not_found() => {}
        Err(err) => tracing::warn!(%key, "Unable to remove partial artifact: {err}"),
    }
}
