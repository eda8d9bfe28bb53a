//! # Release distributor
//!
//! Publishes versioned binary artifacts ("releases") and hands every
//! subscriber a private, trackable download link for each one.
//!
//! ## Components
//!
//! - [`ReleaseStore`]: durable release blobs and metadata, with collision-free
//!   time-ordered identifiers from an [`IdGenerator`].
//! - [`LinkRegistry`]: unguessable link tokens mapping to a (subscriber, release) pair.
//! - [`DownloadTracker`]: per-subscriber, per-release download counters.
//! - [`Notifier`]: announces new releases through a [`Mailer`].
//! - [`Distributor`]: all of the above behind an axum router.
//!
//! ## Example
//!
//! ```no_run
//! use distributor::Distributor;
//! use storage::MemoryStorage;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let distributor = Distributor::builder()
//!     .storage(MemoryStorage::new().into())
//!     .base_uri("http://localhost:8080")
//!     .build()?;
//!
//! let listener = tokio::net::TcpListener::bind("127.0.0.1:8080").await?;
//! axum::serve(listener, distributor.router()).await?;
//! # Ok(())
//! # }
//! ```

mod config;
mod digest;
mod error;
mod id;
mod link;
mod notify;
mod release;
mod routes;
mod service;
mod subscriber;
mod template;
mod tracker;

#[cfg(test)]
mod testing;

pub use config::{AuthConfig, DistributorConfig, TemplateConfig};
pub use error::{DistributorError, DistributorResult, ErrorCategory};
pub use id::{Candidates, IdGenerator, InvalidReleaseId, MAX_ID_ATTEMPTS, RELEASE_ID_LEN, ReleaseId};
pub use link::{Link, LinkId, LinkRegistry};
pub use notify::{LinkUrl, LogMailer, MailError, Mailer, Message, Notifier, download_url};
pub use release::{NewRelease, RELEASE_BUCKET, Release, ReleaseStore};
pub use service::{DEFAULT_UPLOAD_LIMIT, Distributor, DistributorBuilder};
pub use subscriber::{MemoryDirectory, NewSubscriber, Subscriber, SubscriberDirectory};
pub use template::{Template, TemplateError};
pub use tracker::{DownloadStats, DownloadTracker};
