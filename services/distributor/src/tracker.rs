//! Per-subscriber download counters.

use std::collections::BTreeMap;
use std::sync::Arc;

use camino::Utf8Path;
use storage::{Storage, StorageBucket};
use tokio::io::AsyncWrite;
use tokio::sync::RwLock;

use crate::error::DistributorResult;
use crate::id::ReleaseId;
use crate::link::{Link, LinkId, LinkRegistry};
use crate::release::ReleaseStore;

/// Bucket holding the counter table.
pub const DOWNLOAD_BUCKET: &str = "downloads";

const COUNTER_TABLE: &str = "counters.json";

/// Download counts for one subscriber, by release.
pub type DownloadStats = BTreeMap<ReleaseId, u64>;

type CounterTable = BTreeMap<String, DownloadStats>;

/// Streams releases through links, counting each download.
///
/// The counter table has its own lock. It is held only while a counter is
/// bumped; the artifact itself is streamed under the release store's shared
/// lock, so concurrent downloads only queue up for the bookkeeping.
#[derive(Debug, Clone)]
pub struct DownloadTracker {
    bucket: Arc<RwLock<StorageBucket>>,
    links: LinkRegistry,
    releases: ReleaseStore,
}

impl DownloadTracker {
    /// Counters live in the `downloads` bucket of `storage`.
    pub fn new(storage: &Storage, links: LinkRegistry, releases: ReleaseStore) -> Self {
        Self {
            bucket: Arc::new(RwLock::new(storage.bucket(DOWNLOAD_BUCKET))),
            links,
            releases,
        }
    }

    /// Resolve `link`, count the download, then stream the release into `sink`.
    ///
    /// The count is persisted before any bytes are written and is kept even
    /// when streaming fails.
    #[tracing::instrument(skip(self, sink))]
    pub async fn record_download<W>(&self, link: &LinkId, sink: &mut W) -> DistributorResult<Link>
    where
        W: AsyncWrite + Unpin + Send + Sync,
    {
        let link = self.links.get(link).await?;
        let count = self.increment(&link.subscriber_id, &link.release_id).await?;

        self.releases.stream(&link.release_id, sink).await?;
        tracing::info!(
            subscriber = %link.subscriber_id,
            release = %link.release_id,
            count,
            "Download complete"
        );
        Ok(link)
    }

    /// Every counter recorded for `subscriber`; empty when there are none.
    #[tracing::instrument(skip(self))]
    pub async fn stats_for_subscriber(&self, subscriber: &str) -> DistributorResult<DownloadStats> {
        let bucket = self.bucket.read().await;
        let mut table = load(&bucket).await?;
        Ok(table.remove(subscriber).unwrap_or_default())
    }

    async fn increment(&self, subscriber: &str, release: &ReleaseId) -> DistributorResult<u64> {
        let bucket = self.bucket.write().await;
        let mut table = load(&bucket).await?;

        let count = table
            .entry(subscriber.to_owned())
            .or_default()
            .entry(release.clone())
            .or_default();
        *count = count.saturating_add(1);
        let count = *count;

        save(&bucket, &table).await?;
        Ok(count)
    }
}

async fn load(bucket: &StorageBucket) -> DistributorResult<CounterTable> {
    match bucket.read(Utf8Path::new(COUNTER_TABLE)).await {
        Ok(data) => Ok(serde_json::from_slice(&data)?),
        Err(err) if err.is_not_found() => Ok(CounterTable::default()),
        Err(err) => Err(err.into()),
    }
}

async fn save(bucket: &StorageBucket, table: &CounterTable) -> DistributorResult<()> {
    let json = serde_json::to_vec_pretty(table)?;
    bucket
        .upload(Utf8Path::new(COUNTER_TABLE), &mut &json[..])
        .await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DistributorError;
    use crate::release::{NewRelease, RELEASE_BUCKET};
    use crate::testing::stepping_clock;
    use storage::MemoryStorage;

    struct Fixture {
        storage: Storage,
        releases: ReleaseStore,
        links: LinkRegistry,
        tracker: DownloadTracker,
    }

    fn fixture() -> Fixture {
        let storage = Storage::new(MemoryStorage::new());
        let clock = stepping_clock();
        let releases = ReleaseStore::new(&storage, clock.clone());
        let links = LinkRegistry::new(&storage, clock);
        let tracker = DownloadTracker::new(&storage, links.clone(), releases.clone());
        Fixture {
            storage,
            releases,
            links,
            tracker,
        }
    }

    #[tokio::test]
    async fn publish_link_download() {
        let Fixture {
            releases,
            links,
            tracker,
            ..
        } = fixture();

        let v1 = releases
            .publish(NewRelease::new("V1"), &b"RELEASE"[..])
            .await
            .unwrap();
        let link = links.create_links(&["s1"], &v1.id).await.unwrap().remove(0);

        let mut sink = Vec::new();
        tracker.record_download(&link.id, &mut sink).await.unwrap();
        assert_eq!(sink, b"RELEASE");

        let stats = tracker.stats_for_subscriber("s1").await.unwrap();
        assert_eq!(stats, DownloadStats::from([(v1.id, 1)]));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_downloads_are_all_counted() {
        const N: u64 = 32;
        let Fixture {
            releases,
            links,
            tracker,
            ..
        } = fixture();

        let release = releases
            .publish(NewRelease::new("1.0"), &b"payload"[..])
            .await
            .unwrap();
        let link = links.create_links(&["s1"], &release.id).await.unwrap().remove(0);

        let mut tasks = Vec::new();
        for _ in 0..N {
            let tracker = tracker.clone();
            let id = link.id.clone();
            tasks.push(tokio::spawn(async move {
                let mut sink = Vec::new();
                tracker.record_download(&id, &mut sink).await.unwrap();
                sink
            }));
        }

        for task in tasks {
            assert_eq!(task.await.unwrap(), b"payload");
        }

        let stats = tracker.stats_for_subscriber("s1").await.unwrap();
        assert_eq!(stats.get(&release.id), Some(&N));
    }

    #[tokio::test]
    async fn unknown_subscriber_has_empty_stats() {
        let Fixture { tracker, .. } = fixture();
        let stats = tracker.stats_for_subscriber("nobody").await.unwrap();
        assert!(stats.is_empty());
    }

    #[tokio::test]
    async fn unknown_link_is_not_counted() {
        let Fixture { tracker, .. } = fixture();

        let mut sink = Vec::new();
        let err = tracker
            .record_download(&LinkId::from("missing"), &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, DistributorError::LinkNotFound(_)));
        assert!(sink.is_empty());
    }

    #[tokio::test]
    async fn failed_stream_still_counts() {
        let Fixture {
            storage,
            releases,
            links,
            tracker,
        } = fixture();

        let release = releases
            .publish(NewRelease::new("1.0"), &b"payload"[..])
            .await
            .unwrap();
        let link = links.create_links(&["s1"], &release.id).await.unwrap().remove(0);

        storage
            .bucket(RELEASE_BUCKET)
            .delete(Utf8Path::new(&format!("{}.dat", release.id)))
            .await
            .unwrap();

        let mut sink = Vec::new();
        let err = tracker
            .record_download(&link.id, &mut sink)
            .await
            .unwrap_err();
        assert!(matches!(err, DistributorError::ArtifactNotFound(_)));

        let stats = tracker.stats_for_subscriber("s1").await.unwrap();
        assert_eq!(stats.get(&release.id), Some(&1));
    }
}
