//! Release identifiers.
//!
//! A release identifier is the UTC creation time formatted to whole seconds
//! with its offset (`20261016T101530+0000`), so identifiers sort in creation
//! order. When two releases are created within the same second the later
//! one gets a numeric suffix (`20261016T101530+0000_1`). Suffixes are not
//! padded, so within one second text order matches creation order only up
//! to `_9`.

use std::{fmt, str::FromStr, sync::Arc};

use camino::{Utf8Component, Utf8Path};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

const TIMESTAMP_FORMAT: &str = "%Y%m%dT%H%M%S%z";

/// Length of an identifier without a collision suffix.
pub const RELEASE_ID_LEN: usize = 20;

/// How many identifiers are tried for a single second before giving up.
pub const MAX_ID_ATTEMPTS: u32 = 100;

/// An identifier string which is not shaped like a generated release identifier.
#[derive(Debug, Error)]
#[error("Invalid release id: {value:?}")]
pub struct InvalidReleaseId {
    value: String,
}

impl InvalidReleaseId {
    fn new(value: &str) -> Self {
        Self {
            value: value.to_owned(),
        }
    }
}

/// Identifier of a stored release.
///
/// Parsing validates the shape, so a `ReleaseId` is always safe to use as a
/// single storage key component.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ReleaseId(String);

impl ReleaseId {
    fn from_timestamp(timestamp: DateTime<Utc>) -> Self {
        ReleaseId(timestamp.format(TIMESTAMP_FORMAT).to_string())
    }

    fn with_suffix(&self, attempt: u32) -> Self {
        ReleaseId(format!("{}_{attempt}", self.0))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl FromStr for ReleaseId {
    type Err = InvalidReleaseId;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || InvalidReleaseId::new(s);

        if s.is_empty() || !s.is_ascii() || s.len() < RELEASE_ID_LEN {
            return Err(invalid());
        }

        let (timestamp, suffix) = s.split_at(RELEASE_ID_LEN);
        DateTime::parse_from_str(timestamp, TIMESTAMP_FORMAT).map_err(|_| invalid())?;

        if !suffix.is_empty() {
            let attempt = suffix
                .strip_prefix('_')
                .filter(|n| !n.starts_with('0') && n.bytes().all(|b| b.is_ascii_digit()))
                .and_then(|n| n.parse::<u32>().ok())
                .ok_or_else(invalid)?;
            if attempt == 0 || attempt >= MAX_ID_ATTEMPTS {
                return Err(invalid());
            }
        }

        // The identifier must name a direct child of the store root.
        let mut components = Utf8Path::new(s).components();
        match (components.next(), components.next()) {
            (Some(Utf8Component::Normal(name)), None) if name == s => Ok(ReleaseId(s.to_owned())),
            _ => Err(invalid()),
        }
    }
}

impl TryFrom<String> for ReleaseId {
    type Error = InvalidReleaseId;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ReleaseId> for String {
    fn from(id: ReleaseId) -> Self {
        id.0
    }
}

impl AsRef<str> for ReleaseId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ReleaseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

type Clock = Arc<dyn Fn() -> DateTime<Utc> + Send + Sync>;

/// Produces timestamps and candidate identifiers for new releases.
#[derive(Clone)]
pub struct IdGenerator {
    clock: Clock,
}

impl fmt::Debug for IdGenerator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("IdGenerator").finish_non_exhaustive()
    }
}

impl Default for IdGenerator {
    fn default() -> Self {
        Self::new()
    }
}

impl IdGenerator {
    /// A generator reading the system clock.
    pub fn new() -> Self {
        Self::with_clock(Utc::now)
    }

    /// A generator reading time from `clock`.
    pub fn with_clock<F>(clock: F) -> Self
    where
        F: Fn() -> DateTime<Utc> + Send + Sync + 'static,
    {
        Self {
            clock: Arc::new(clock),
        }
    }

    /// The current time.
    pub fn now(&self) -> DateTime<Utc> {
        (self.clock)()
    }

    /// Identifiers to try, in order, for a release created at `timestamp`.
    ///
    /// The first candidate is the bare timestamp; later ones carry `_1`, `_2`, ...
    /// The sequence ends after [`MAX_ID_ATTEMPTS`] candidates.
    pub fn candidates(&self, timestamp: DateTime<Utc>) -> Candidates {
        Candidates {
            base: ReleaseId::from_timestamp(timestamp),
            attempt: 0,
        }
    }
}

/// Bounded sequence of candidate identifiers for one timestamp.
#[derive(Debug, Clone)]
pub struct Candidates {
    base: ReleaseId,
    attempt: u32,
}

impl Iterator for Candidates {
    type Item = ReleaseId;

    fn next(&mut self) -> Option<Self::Item> {
        let attempt = self.attempt;
        if attempt >= MAX_ID_ATTEMPTS {
            return None;
        }
        self.attempt += 1;

        if attempt == 0 {
            Some(self.base.clone())
        } else {
            Some(self.base.with_suffix(attempt))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::at;

    #[test]
    fn format_is_fixed_width() {
        let id = ReleaseId::from_timestamp(at(0));
        assert_eq!(id.as_str(), "20231114T221320+0000");
        assert_eq!(id.as_str().len(), RELEASE_ID_LEN);
    }

    #[test]
    fn candidates_are_suffixed_and_bounded() {
        let generator = IdGenerator::with_clock(|| at(0));
        let candidates: Vec<_> = generator.candidates(generator.now()).collect();

        assert_eq!(candidates.len(), MAX_ID_ATTEMPTS as usize);
        assert_eq!(candidates[0].as_str(), "20231114T221320+0000");
        assert_eq!(candidates[1].as_str(), "20231114T221320+0000_1");
        assert_eq!(candidates[2].as_str(), "20231114T221320+0000_2");

        for candidate in candidates {
            let parsed: ReleaseId = candidate.as_str().parse().unwrap();
            assert_eq!(parsed, candidate);
        }
    }

    #[test]
    fn identifiers_sort_by_creation() {
        let mut ids = vec![
            ReleaseId::from_timestamp(at(3600)),
            ReleaseId::from_timestamp(at(0)),
            ReleaseId::from_timestamp(at(59)),
        ];
        ids.sort();
        assert_eq!(
            ids,
            vec![
                ReleaseId::from_timestamp(at(0)),
                ReleaseId::from_timestamp(at(59)),
                ReleaseId::from_timestamp(at(3600)),
            ]
        );
    }

    #[test]
    fn suffixes_sort_as_text() {
        let generator = IdGenerator::with_clock(|| at(0));
        let candidates: Vec<_> = generator.candidates(generator.now()).take(11).collect();

        // Up to `_9` text order is creation order; `_10` sorts before `_2`.
        let mut first_ten = candidates[..10].to_vec();
        first_ten.sort();
        assert_eq!(first_ten, candidates[..10]);
        assert!(candidates[10] < candidates[2]);

        // Any later second still sorts after every suffix of this one.
        let next = ReleaseId::from_timestamp(at(1));
        assert!(candidates.iter().all(|id| *id < next));
    }

    #[test]
    fn rejects_malformed() {
        for value in [
            "",
            "2023",
            "20231114T221320+0000_",
            "20231114T221320+0000_0",
            "20231114T221320+0000_01",
            "20231114T221320+0000_100",
            "20231114T221320+0000x",
            "../../../../etc/passwd",
            "..%2F..%2F..%2Fpasswd",
            "20231114T221320+0000/..",
            "2023111ÄT221320+000",
        ] {
            assert!(value.parse::<ReleaseId>().is_err(), "{value:?}");
        }
    }

    #[test]
    fn serde_validates() {
        let id: ReleaseId = serde_json::from_str("\"20231114T221320+0000_7\"").unwrap();
        assert_eq!(id.as_str(), "20231114T221320+0000_7");
        assert!(serde_json::from_str::<ReleaseId>("\"../x\"").is_err());
    }
}
