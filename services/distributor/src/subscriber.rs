//! Subscribers, who are notified about new releases.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::error::{DistributorError, DistributorResult};

/// Someone who receives a download link for every release.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscriber {
    /// Opaque identifier assigned on registration.
    pub id: String,
    /// Display name used in announcements.
    pub name: String,
    /// Where release announcements are sent.
    pub email: String,
}

/// Registration request for a new subscriber.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct NewSubscriber {
    /// Display name; must not be blank.
    pub name: String,
    /// Contact address; must be unique.
    pub email: String,
}

impl NewSubscriber {
    fn validate(self) -> DistributorResult<Self> {
        let name = self.name.trim().to_owned();
        let email = self.email.trim().to_owned();

        if name.is_empty() {
            return Err(DistributorError::InvalidSubscriber("name is required".into()));
        }
        if email.len() < 3 || !email.contains('@') || email.starts_with('@') || email.ends_with('@') {
            return Err(DistributorError::InvalidSubscriber(format!(
                "not an email address: {email:?}"
            )));
        }

        Ok(Self { name, email })
    }
}

/// Where subscribers are kept.
#[async_trait::async_trait]
pub trait SubscriberDirectory: fmt::Debug + Send + Sync {
    /// Every subscriber, in a stable order.
    async fn list(&self) -> DistributorResult<Vec<Subscriber>>;

    /// Register a subscriber, assigning its id.
    async fn subscribe(&self, subscriber: NewSubscriber) -> DistributorResult<Subscriber>;

    /// Replace the name and email of an existing subscriber.
    async fn update(&self, subscriber: Subscriber) -> DistributorResult<Subscriber>;

    /// Remove a subscriber, returning what was removed.
    async fn remove(&self, id: &str) -> DistributorResult<Subscriber>;
}

/// In-memory subscriber directory, usually seeded from configuration.
#[derive(Debug, Default)]
pub struct MemoryDirectory {
    subscribers: RwLock<BTreeMap<String, Subscriber>>,
}

impl MemoryDirectory {
    /// An empty directory.
    pub fn new() -> Self {
        Self::default()
    }

    /// A directory holding `subscribers`. Later duplicates of an id replace earlier ones.
    pub fn with_subscribers<I>(subscribers: I) -> Self
    where
        I: IntoIterator<Item = Subscriber>,
    {
        let subscribers = subscribers
            .into_iter()
            .map(|subscriber| (subscriber.id.clone(), subscriber))
            .collect();
        Self {
            subscribers: RwLock::new(subscribers),
        }
    }
}

#[async_trait::async_trait]
impl SubscriberDirectory for MemoryDirectory {
    async fn list(&self) -> DistributorResult<Vec<Subscriber>> {
        Ok(self.subscribers.read().await.values().cloned().collect())
    }

    async fn subscribe(&self, subscriber: NewSubscriber) -> DistributorResult<Subscriber> {
        let NewSubscriber { name, email } = subscriber.validate()?;

        let mut subscribers = self.subscribers.write().await;
        ensure_unique(&subscribers, None, &email)?;

        let subscriber = Subscriber {
            id: uuid::Uuid::new_v4().simple().to_string(),
            name,
            email,
        };
        subscribers.insert(subscriber.id.clone(), subscriber.clone());
        tracing::info!(id = %subscriber.id, "Subscribed");
        Ok(subscriber)
    }

    async fn update(&self, subscriber: Subscriber) -> DistributorResult<Subscriber> {
        let Subscriber { id, name, email } = subscriber;
        let NewSubscriber { name, email } = NewSubscriber { name, email }.validate()?;

        let mut subscribers = self.subscribers.write().await;
        ensure_unique(&subscribers, Some(&id), &email)?;

        let existing = subscribers
            .get_mut(&id)
            .ok_or_else(|| DistributorError::SubscriberNotFound(id.clone()))?;
        existing.name = name;
        existing.email = email;
        Ok(existing.clone())
    }

    async fn remove(&self, id: &str) -> DistributorResult<Subscriber> {
        let removed = self
            .subscribers
            .write()
            .await
            .remove(id)
            .ok_or_else(|| DistributorError::SubscriberNotFound(id.to_owned()))?;
        tracing::info!(%id, "Unsubscribed");
        Ok(removed)
    }
}

fn ensure_unique(
    subscribers: &BTreeMap<String, Subscriber>,
    except: Option<&str>,
    email: &str,
) -> DistributorResult<()> {
    let taken = subscribers.values().any(|existing| {
        Some(existing.id.as_str()) != except && existing.email.eq_ignore_ascii_case(email)
    });
    if taken {
        return Err(DistributorError::InvalidSubscriber(format!(
            "already subscribed: {email}"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    static_assertions::assert_obj_safe!(SubscriberDirectory);

    fn new(name: &str, email: &str) -> NewSubscriber {
        NewSubscriber {
            name: name.into(),
            email: email.into(),
        }
    }

    #[tokio::test]
    async fn subscribe_and_remove() {
        let directory = MemoryDirectory::new();

        let ada = directory
            .subscribe(new(" Ada ", "ada@example.com"))
            .await
            .unwrap();
        assert_eq!(ada.name, "Ada");
        assert_eq!(directory.list().await.unwrap(), vec![ada.clone()]);

        assert_eq!(directory.remove(&ada.id).await.unwrap(), ada);
        assert!(directory.list().await.unwrap().is_empty());

        let err = directory.remove(&ada.id).await.unwrap_err();
        assert!(matches!(err, DistributorError::SubscriberNotFound(_)));
    }

    #[tokio::test]
    async fn rejects_bad_registrations() {
        let directory = MemoryDirectory::new();
        directory
            .subscribe(new("Ada", "ada@example.com"))
            .await
            .unwrap();

        for request in [
            new("", "x@example.com"),
            new("Bob", "bob"),
            new("Bob", "@example.com"),
            new("Eve", "ADA@example.com"),
        ] {
            let err = directory.subscribe(request.clone()).await.unwrap_err();
            assert!(
                matches!(err, DistributorError::InvalidSubscriber(_)),
                "{request:?}"
            );
        }
    }

    #[tokio::test]
    async fn update_existing() {
        let directory = MemoryDirectory::new();
        let ada = directory
            .subscribe(new("Ada", "ada@example.com"))
            .await
            .unwrap();
        let bob = directory
            .subscribe(new("Bob", "bob@example.com"))
            .await
            .unwrap();

        let renamed = directory
            .update(Subscriber {
                name: "Ada L.".into(),
                ..ada.clone()
            })
            .await
            .unwrap();
        assert_eq!(renamed.name, "Ada L.");
        assert_eq!(renamed.id, ada.id);

        let err = directory
            .update(Subscriber {
                email: "bob@example.com".into(),
                ..ada.clone()
            })
            .await
            .unwrap_err();
        assert!(matches!(err, DistributorError::InvalidSubscriber(_)));

        directory.remove(&bob.id).await.unwrap();
        let err = directory.update(bob).await.unwrap_err();
        assert!(matches!(err, DistributorError::SubscriberNotFound(_)));
    }

    #[tokio::test]
    async fn seeded_directory() {
        let directory = MemoryDirectory::with_subscribers([
            Subscriber {
                id: "s2".into(),
                name: "Bob".into(),
                email: "bob@example.com".into(),
            },
            Subscriber {
                id: "s1".into(),
                name: "Ada".into(),
                email: "ada@example.com".into(),
            },
        ]);

        let ids: Vec<_> = directory
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|subscriber| subscriber.id)
            .collect();
        assert_eq!(ids, vec!["s1", "s2"]);
    }
}
