//! The distributor service: the stores wired together with their collaborators.

use std::fmt;
use std::sync::Arc;

use axum::Router;
use axum::http::HeaderMap;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use storage::Storage;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;

use crate::config::{DEFAULT_CONTENT, DEFAULT_FILENAME, DEFAULT_SUBJECT};
use crate::error::{DistributorError, DistributorResult};
use crate::id::{IdGenerator, ReleaseId};
use crate::link::{Link, LinkId, LinkRegistry};
use crate::notify::{LinkUrl, LogMailer, MESSAGE_FIELDS, Mailer, Notifier, download_url};
use crate::release::{NewRelease, Release, ReleaseStore};
use crate::subscriber::{MemoryDirectory, NewSubscriber, Subscriber, SubscriberDirectory};
use crate::template::Template;
use crate::tracker::{DownloadStats, DownloadTracker};

/// Fields available to the attachment filename template.
pub const FILENAME_FIELDS: &[&str] = &["version", "date"];

const FILENAME_DATE_FORMAT: &str = "%Y%m%d%H%M%S";

/// Largest accepted artifact upload, unless configured otherwise.
pub const DEFAULT_UPLOAD_LIMIT: usize = 512 * 1024 * 1024;

#[derive(Clone, PartialEq, Eq)]
struct Credentials {
    user: String,
    password: String,
}

/// The release distribution service.
///
/// Cheap to clone; clones share the same stores and locks.
#[derive(Clone)]
pub struct Distributor {
    releases: ReleaseStore,
    links: LinkRegistry,
    tracker: DownloadTracker,
    directory: Arc<dyn SubscriberDirectory>,
    notifier: Notifier,
    /// Held while links are minted for the subscriber list, and while a
    /// subscriber and its links are removed.
    roster: Arc<Mutex<()>>,
    filename: Template,
    credentials: Option<Arc<Credentials>>,
    upload_limit: usize,
}

impl fmt::Debug for Distributor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Distributor")
            .field("releases", &self.releases)
            .field("directory", &self.directory)
            .field("notifier", &self.notifier)
            .field("protected", &self.credentials.is_some())
            .finish_non_exhaustive()
    }
}

impl Distributor {
    /// Start configuring a distributor.
    pub fn builder() -> DistributorBuilder {
        DistributorBuilder::new()
    }

    /// Store a new release and announce it to every subscriber.
    ///
    /// The release stays published when the announcement fails.
    pub async fn publish<R>(&self, meta: NewRelease, artifact: R) -> DistributorResult<Release>
    where
        R: AsyncRead + Unpin + Send + Sync,
    {
        let release = self.releases.publish(meta, artifact).await?;

        let _roster = self.roster.lock().await;
        self.notifier.notify_all(&release).await?;
        Ok(release)
    }

    /// Metadata for the release `id`.
    pub async fn release(&self, id: &str) -> DistributorResult<Release> {
        let id: ReleaseId = id.parse()?;
        self.releases.get(&id).await
    }

    /// All releases, newest first.
    pub async fn releases(&self) -> DistributorResult<Vec<Release>> {
        self.releases.list().await
    }

    /// Remove a release along with every link to it.
    pub async fn unpublish(&self, id: &str) -> DistributorResult<()> {
        let id: ReleaseId = id.parse()?;
        self.releases.unpublish(&id).await?;
        self.links.remove_release(&id).await?;
        Ok(())
    }

    /// Every subscriber.
    pub async fn subscribers(&self) -> DistributorResult<Vec<Subscriber>> {
        self.directory.list().await
    }

    /// Register a new subscriber.
    pub async fn subscribe(&self, subscriber: NewSubscriber) -> DistributorResult<Subscriber> {
        self.directory.subscribe(subscriber).await
    }

    /// Change a subscriber's name and email.
    pub async fn update_subscriber(&self, subscriber: Subscriber) -> DistributorResult<Subscriber> {
        self.directory.update(subscriber).await
    }

    /// Remove a subscriber and its links. Its download counts are kept.
    ///
    /// Waits for any announcement in progress, so no link outlives the
    /// subscription.
    pub async fn unsubscribe(&self, id: &str) -> DistributorResult<Subscriber> {
        let _roster = self.roster.lock().await;
        let removed = self.directory.remove(id).await?;
        self.links.remove_subscriber(id).await?;
        Ok(removed)
    }

    /// Download counts for a subscriber, by release.
    pub async fn stats(&self, subscriber: &str) -> DistributorResult<DownloadStats> {
        self.tracker.stats_for_subscriber(subscriber).await
    }

    /// The link and the release it grants access to.
    ///
    /// Fails unless both the release metadata and its artifact are stored.
    pub async fn resolve(&self, link: &LinkId) -> DistributorResult<(Link, Release)> {
        let link = self.links.get(link).await?;
        let release = self.releases.available(&link.release_id).await?;
        Ok((link, release))
    }

    /// Stream the release behind `link` into `sink`, counting the download.
    pub async fn download<W>(&self, link: &LinkId, sink: &mut W) -> DistributorResult<Link>
    where
        W: AsyncWrite + Unpin + Send + Sync,
    {
        self.tracker.record_download(link, sink).await
    }

    /// File name offered to clients downloading `release`.
    pub fn attachment_name(&self, release: &Release) -> String {
        self.filename.render(|field| match field {
            "version" => release.version.clone(),
            "date" => release.created_at.format(FILENAME_DATE_FORMAT).to_string(),
            _ => String::new(),
        })
    }

    /// Whether `headers` carry the credentials for the management API.
    ///
    /// Always true when no credentials are configured.
    pub fn authorized(&self, headers: &HeaderMap) -> bool {
        let Some(expected) = &self.credentials else {
            return true;
        };

        headers
            .get(axum::http::header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .and_then(|value| value.strip_prefix("Basic "))
            .and_then(|encoded| {
                base64::engine::general_purpose::STANDARD
                    .decode(encoded.trim())
                    .ok()
            })
            .and_then(|decoded| String::from_utf8(decoded).ok())
            .is_some_and(|decoded| match decoded.split_once(':') {
                Some((user, password)) => {
                    // Both comparisons always run.
                    let user = constant_time_eq(user, &expected.user);
                    let password = constant_time_eq(password, &expected.password);
                    user & password
                }
                None => false,
            })
    }

    pub(crate) fn upload_limit(&self) -> usize {
        self.upload_limit
    }

    /// The HTTP interface, ready to be served.
    pub fn router(self) -> Router {
        crate::routes::router(self)
    }
}

/// Compare digests of `a` and `b` in time independent of their contents and lengths.
fn constant_time_eq(a: &str, b: &str) -> bool {
    let a = Sha256::digest(a.as_bytes());
    let b = Sha256::digest(b.as_bytes());
    a.iter().zip(b.iter()).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

/// Builder for [`Distributor`].
pub struct DistributorBuilder {
    storage: Option<Storage>,
    clock: Option<IdGenerator>,
    base_uri: Option<String>,
    link_url: Option<LinkUrl>,
    filename: String,
    subject: String,
    content: String,
    mailer: Option<Arc<dyn Mailer>>,
    directory: Option<Arc<dyn SubscriberDirectory>>,
    subscribers: Vec<Subscriber>,
    credentials: Option<Credentials>,
    upload_limit: usize,
}

impl fmt::Debug for DistributorBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DistributorBuilder")
            .field("storage", &self.storage)
            .field("base_uri", &self.base_uri)
            .field("filename", &self.filename)
            .field("subscribers", &self.subscribers.len())
            .finish_non_exhaustive()
    }
}

impl Default for DistributorBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl DistributorBuilder {
    /// A builder with default templates and no storage.
    pub fn new() -> Self {
        Self {
            storage: None,
            clock: None,
            base_uri: None,
            link_url: None,
            filename: DEFAULT_FILENAME.to_owned(),
            subject: DEFAULT_SUBJECT.to_owned(),
            content: DEFAULT_CONTENT.to_owned(),
            mailer: None,
            directory: None,
            subscribers: Vec::new(),
            credentials: None,
            upload_limit: DEFAULT_UPLOAD_LIMIT,
        }
    }

    /// Set the storage backend
    pub fn storage(mut self, storage: Storage) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Use `clock` for release identifiers and link timestamps.
    pub fn clock(mut self, clock: IdGenerator) -> Self {
        self.clock = Some(clock);
        self
    }

    /// Public URL prefix; links are handed out as `<base>/download/<link>`.
    pub fn base_uri(mut self, base_uri: impl Into<String>) -> Self {
        self.base_uri = Some(base_uri.into());
        self
    }

    /// Format link URLs with `link_url` instead of from the base URI.
    pub fn link_url(mut self, link_url: LinkUrl) -> Self {
        self.link_url = Some(link_url);
        self
    }

    /// Template for the attachment name; fields `version` and `date`.
    pub fn filename_template(mut self, template: impl Into<String>) -> Self {
        self.filename = template.into();
        self
    }

    /// Template for the notification subject.
    pub fn subject_template(mut self, template: impl Into<String>) -> Self {
        self.subject = template.into();
        self
    }

    /// Template for the notification body.
    pub fn content_template(mut self, template: impl Into<String>) -> Self {
        self.content = template.into();
        self
    }

    /// Deliver announcements through `mailer`. Defaults to [`LogMailer`].
    pub fn mailer(mut self, mailer: Arc<dyn Mailer>) -> Self {
        self.mailer = Some(mailer);
        self
    }

    /// Keep subscribers in `directory`. Overrides [`subscribers`](Self::subscribers).
    pub fn directory(mut self, directory: Arc<dyn SubscriberDirectory>) -> Self {
        self.directory = Some(directory);
        self
    }

    /// Seed the default in-memory directory.
    pub fn subscribers(mut self, subscribers: Vec<Subscriber>) -> Self {
        self.subscribers = subscribers;
        self
    }

    /// Require HTTP basic credentials on the management API.
    pub fn basic_auth(mut self, user: impl Into<String>, password: impl Into<String>) -> Self {
        self.credentials = Some(Credentials {
            user: user.into(),
            password: password.into(),
        });
        self
    }

    /// Largest accepted artifact upload, in bytes.
    pub fn upload_limit(mut self, limit: usize) -> Self {
        self.upload_limit = limit;
        self
    }

    /// Build the distributor
    pub fn build(self) -> DistributorResult<Distributor> {
        let storage = self
            .storage
            .ok_or_else(|| DistributorError::Config("storage backend must be configured".into()))?;

        let link_url = match (self.link_url, self.base_uri) {
            (Some(link_url), _) => link_url,
            (None, Some(base)) => download_url(&base),
            (None, None) => {
                return Err(DistributorError::Config(
                    "base URI must be configured".into(),
                ));
            }
        };

        let filename = Template::parse(&self.filename, FILENAME_FIELDS)?;
        let subject = Template::parse(&self.subject, MESSAGE_FIELDS)?;
        let content = Template::parse(&self.content, MESSAGE_FIELDS)?;

        let clock = self.clock.unwrap_or_default();
        let releases = ReleaseStore::new(&storage, clock.clone());
        let links = LinkRegistry::new(&storage, clock);
        let tracker = DownloadTracker::new(&storage, links.clone(), releases.clone());

        let directory = self.directory.unwrap_or_else(|| {
            Arc::new(MemoryDirectory::with_subscribers(self.subscribers))
        });
        let mailer = self.mailer.unwrap_or_else(|| Arc::new(LogMailer));

        let notifier = Notifier::new(
            directory.clone(),
            links.clone(),
            link_url,
            subject,
            content,
            mailer,
        );

        tracing::debug!(storage = storage.name(), "Built distributor");

        Ok(Distributor {
            releases,
            links,
            tracker,
            directory,
            notifier,
            roster: Arc::default(),
            filename,
            credentials: self.credentials.map(Arc::new),
            upload_limit: self.upload_limit,
        })
    }
}
