//! Download links.
//!
//! A link grants one subscriber access to one release. Its identifier is the
//! only credential on the download path, so it is drawn from the OS random
//! number generator (UUID v4) rather than derived from anything guessable.
//!
//! All links live in a single table object which is rewritten whole on every
//! change. The storage driver replaces objects atomically, so a batch of new
//! links is either recorded completely or not at all.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use camino::Utf8Path;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use storage::{Storage, StorageBucket};
use tokio::sync::RwLock;

use crate::error::{DistributorError, DistributorResult};
use crate::id::{IdGenerator, ReleaseId};

/// Bucket holding the link table.
pub const LINK_BUCKET: &str = "links";

const LINK_TABLE: &str = "links.json";

/// Opaque, unguessable link token.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LinkId(String);

impl LinkId {
    fn generate() -> Self {
        LinkId(uuid::Uuid::new_v4().simple().to_string())
    }

    /// The token as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for LinkId {
    fn from(value: String) -> Self {
        LinkId(value)
    }
}

impl From<&str> for LinkId {
    fn from(value: &str) -> Self {
        LinkId(value.to_owned())
    }
}

impl fmt::Display for LinkId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Grants `subscriber_id` access to `release_id`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Link {
    /// The token handed out in the download URL.
    pub id: LinkId,
    /// Subscriber whose downloads are counted.
    pub subscriber_id: String,
    /// Release the link grants access to.
    pub release_id: ReleaseId,
    /// When the link was minted.
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct LinkTable {
    links: BTreeMap<LinkId, Link>,
}

/// Persistent mapping from link tokens to (subscriber, release) pairs.
#[derive(Debug, Clone)]
pub struct LinkRegistry {
    bucket: Arc<RwLock<StorageBucket>>,
    clock: IdGenerator,
}

impl LinkRegistry {
    /// Open the link registry kept in `storage`.
    pub fn new(storage: &Storage, clock: IdGenerator) -> Self {
        Self {
            bucket: Arc::new(RwLock::new(storage.bucket(LINK_BUCKET))),
            clock,
        }
    }

    /// Mint one link to `release` for each subscriber.
    ///
    /// All links share one creation time and are stored in a single write.
    #[tracing::instrument(skip(self, subscribers))]
    pub async fn create_links<S>(
        &self,
        subscribers: &[S],
        release: &ReleaseId,
    ) -> DistributorResult<Vec<Link>>
    where
        S: AsRef<str>,
    {
        if subscribers.is_empty() {
            return Ok(Vec::new());
        }

        let bucket = self.bucket.write().await;
        let mut table = load(&bucket).await?;
        let created_at = self.clock.now();

        let mut links = Vec::with_capacity(subscribers.len());
        for subscriber in subscribers {
            let id = loop {
                let id = LinkId::generate();
                if !table.links.contains_key(&id) {
                    break id;
                }
            };

            let link = Link {
                id: id.clone(),
                subscriber_id: subscriber.as_ref().to_owned(),
                release_id: release.clone(),
                created_at,
            };
            table.links.insert(id, link.clone());
            links.push(link);
        }

        save(&bucket, &table).await?;
        tracing::debug!(count = links.len(), "Created links");
        Ok(links)
    }

    /// Look up a link by its token.
    #[tracing::instrument(skip(self))]
    pub async fn get(&self, id: &LinkId) -> DistributorResult<Link> {
        let bucket = self.bucket.read().await;
        let mut table = load(&bucket).await?;
        table
            .links
            .remove(id)
            .ok_or_else(|| DistributorError::LinkNotFound(id.to_string()))
    }

    /// Delete every link for which `predicate(subscriber_id, release_id)` holds.
    ///
    /// Returns how many links were removed.
    pub async fn remove_where<F>(&self, mut predicate: F) -> DistributorResult<usize>
    where
        F: FnMut(&str, &ReleaseId) -> bool,
    {
        let bucket = self.bucket.write().await;
        let mut table = load(&bucket).await?;

        let before = table.links.len();
        table
            .links
            .retain(|_, link| !predicate(link.subscriber_id.as_str(), &link.release_id));
        let removed = before - table.links.len();

        if removed > 0 {
            save(&bucket, &table).await?;
        }
        Ok(removed)
    }

    /// Delete all links held by a subscriber.
    #[tracing::instrument(skip(self))]
    pub async fn remove_subscriber(&self, subscriber: &str) -> DistributorResult<usize> {
        let removed = self
            .remove_where(|subscriber_id, _| subscriber_id == subscriber)
            .await?;
        tracing::debug!(removed, "Removed subscriber links");
        Ok(removed)
    }

    /// Delete all links to a release.
    #[tracing::instrument(skip(self))]
    pub async fn remove_release(&self, release: &ReleaseId) -> DistributorResult<usize> {
        let removed = self
            .remove_where(|_, release_id| release_id == release)
            .await?;
        tracing::debug!(removed, "Removed release links");
        Ok(removed)
    }
}

async fn load(bucket: &StorageBucket) -> DistributorResult<LinkTable> {
    match bucket.read(Utf8Path::new(LINK_TABLE)).await {
        Ok(data) => Ok(serde_json::from_slice(&data)?),
        Err(err) if err.is_not_found() => Ok(LinkTable::default()),
        Err(err) => Err(err.into()),
    }
}

async fn save(bucket: &StorageBucket, table: &LinkTable) -> DistributorResult<()> {
    let json = serde_json::to_vec_pretty(table)?;
    bucket
        .upload(Utf8Path::new(LINK_TABLE), &mut &json[..])
        .await?;
    Ok(())
}
