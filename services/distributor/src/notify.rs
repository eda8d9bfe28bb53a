//! Release announcements.
//!
//! After a release is published every subscriber gets a message carrying a
//! freshly minted download link. Delivering the message is left to a
//! [`Mailer`]; the bundled [`LogMailer`] only records it in the log.

use std::error::Error as StdError;
use std::fmt;
use std::sync::Arc;

use thiserror::Error;

use crate::error::{DistributorError, DistributorResult};
use crate::link::{Link, LinkId, LinkRegistry};
use crate::release::Release;
use crate::subscriber::SubscriberDirectory;
use crate::template::Template;

/// Fields available to the subject and content templates.
pub const MESSAGE_FIELDS: &[&str] = &["id", "version", "description", "date", "link", "name"];

const MESSAGE_DATE_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

/// Turns a link token into the URL handed to its subscriber.
pub type LinkUrl = Arc<dyn Fn(&LinkId) -> String + Send + Sync>;

/// Links of the form `<base>/download/<link>`.
pub fn download_url(base: &str) -> LinkUrl {
    let base = base.trim_end_matches('/').to_owned();
    Arc::new(move |link: &LinkId| format!("{base}/download/{link}"))
}

/// An outgoing notification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    /// Recipient email address.
    pub to: String,
    /// Rendered subject line.
    pub subject: String,
    /// Rendered message body.
    pub body: String,
}

/// A message which could not be delivered.
#[derive(Debug, Error)]
pub enum MailError {
    /// The recipient was refused.
    #[error("message rejected: {0}")]
    Rejected(String),

    /// The mail transport failed.
    #[error(transparent)]
    Transport(Box<dyn StdError + Send + Sync + 'static>),
}

/// Delivers messages to subscribers.
#[async_trait::async_trait]
pub trait Mailer: fmt::Debug + Send + Sync {
    /// Deliver one message.
    async fn send(&self, message: Message) -> Result<(), MailError>;
}

/// A mailer which writes each message to the log instead of sending it.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogMailer;

#[async_trait::async_trait]
impl Mailer for LogMailer {
    async fn send(&self, message: Message) -> Result<(), MailError> {
        tracing::info!(to = %message.to, subject = %message.subject, "Notification");
        tracing::debug!(to = %message.to, "{}", message.body);
        Ok(())
    }
}

/// Announces releases to every subscriber.
#[derive(Clone)]
pub struct Notifier {
    directory: Arc<dyn SubscriberDirectory>,
    links: LinkRegistry,
    link_url: LinkUrl,
    subject: Template,
    content: Template,
    mailer: Arc<dyn Mailer>,
}

impl fmt::Debug for Notifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Notifier")
            .field("directory", &self.directory)
            .field("mailer", &self.mailer)
            .finish_non_exhaustive()
    }
}

impl Notifier {
    /// A notifier sending `subject` and `content` to everyone in `directory`.
    pub fn new(
        directory: Arc<dyn SubscriberDirectory>,
        links: LinkRegistry,
        link_url: LinkUrl,
        subject: Template,
        content: Template,
        mailer: Arc<dyn Mailer>,
    ) -> Self {
        Self {
            directory,
            links,
            link_url,
            subject,
            content,
            mailer,
        }
    }

    /// Mint a link to `release` for every subscriber and send each one a message.
    ///
    /// All links are created in one batch before anything is sent. Sending
    /// stops at the first delivery failure.
    #[tracing::instrument(skip(self, release), fields(release = %release.id))]
    pub async fn notify_all(&self, release: &Release) -> DistributorResult<Vec<Link>> {
        let subscribers = self.directory.list().await?;
        let ids: Vec<&str> = subscribers
            .iter()
            .map(|subscriber| subscriber.id.as_str())
            .collect();
        let links = self.links.create_links(&ids[..], &release.id).await?;

        let date = release.created_at.format(MESSAGE_DATE_FORMAT).to_string();
        for (subscriber, link) in subscribers.iter().zip(&links) {
            let url = (self.link_url)(&link.id);
            let lookup = |field: &str| match field {
                "id" => release.id.to_string(),
                "version" => release.version.clone(),
                "description" => release.description.clone().unwrap_or_default(),
                "date" => date.clone(),
                "link" => url.clone(),
                "name" => subscriber.name.clone(),
                _ => String::new(),
            };

            let message = Message {
                to: subscriber.email.clone(),
                subject: self.subject.render(&lookup),
                body: self.content.render(&lookup),
            };

            self.mailer
                .send(message)
                .await
                .map_err(|source| DistributorError::Delivery {
                    subscriber: subscriber.id.clone(),
                    source,
                })?;
        }

        tracing::info!(subscribers = links.len(), "Notified subscribers");
        Ok(links)
    }
}
