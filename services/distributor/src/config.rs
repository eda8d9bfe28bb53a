//! Service configuration, read from TOML.

use camino::Utf8Path;
use serde::Deserialize;
use storage::StorageConfig;

use crate::error::{DistributorError, DistributorResult};
use crate::service::DistributorBuilder;
use crate::subscriber::Subscriber;

/// Default attachment name for downloads.
pub const DEFAULT_FILENAME: &str = "release-{version}-{date}.bin";

/// Default notification subject.
pub const DEFAULT_SUBJECT: &str = "Release {version} is available";

/// Default notification body.
pub const DEFAULT_CONTENT: &str = "Hello {name},

version {version} was released on {date}.

{description}

Download it here: {link}
";

/// Top-level configuration for the distributor service.
///
/// ```toml
/// base-uri = "https://dist.example.com"
///
/// [storage.local]
/// path = "/var/lib/distributor"
///
/// [templates]
/// filename = "app-{version}.bin"
///
/// [auth]
/// user = "admin"
/// password = "secret"
///
/// [[subscribers]]
/// id = "ada"
/// name = "Ada"
/// email = "ada@example.com"
/// ```
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", deny_unknown_fields)]
pub struct DistributorConfig {
    /// Public URL prefix for download links.
    pub base_uri: String,

    /// Where releases, links and counters are stored.
    #[serde(default = "default_storage")]
    pub storage: StorageConfig,

    /// Filename and notification templates.
    #[serde(default)]
    pub templates: TemplateConfig,

    /// Credentials required for the `/api` routes. Unprotected when absent.
    #[serde(default)]
    pub auth: Option<AuthConfig>,

    /// Subscribers known at startup.
    #[serde(default)]
    pub subscribers: Vec<Subscriber>,
}

fn default_storage() -> StorageConfig {
    StorageConfig::Memory
}

/// Text templates, see [`Template`](crate::template::Template) for the syntax.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "kebab-case", default, deny_unknown_fields)]
pub struct TemplateConfig {
    /// Attachment name; fields `version` and `date`.
    pub filename: String,

    /// Notification subject; fields as for `content`.
    pub subject: String,

    /// Notification body; fields `id`, `version`, `description`, `date`, `link` and `name`.
    pub content: String,
}

impl Default for TemplateConfig {
    fn default() -> Self {
        Self {
            filename: DEFAULT_FILENAME.into(),
            subject: DEFAULT_SUBJECT.into(),
            content: DEFAULT_CONTENT.into(),
        }
    }
}

/// HTTP basic credentials for the management API.
#[derive(Clone, Deserialize, PartialEq, Eq)]
#[serde(deny_unknown_fields)]
pub struct AuthConfig {
    /// Login name.
    pub user: String,
    /// Password, never printed.
    pub password: String,
}

impl std::fmt::Debug for AuthConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthConfig")
            .field("user", &self.user)
            .field("password", &"****")
            .finish()
    }
}

impl DistributorConfig {
    /// Parse a TOML document.
    pub fn from_toml(source: &str) -> DistributorResult<Self> {
        toml::from_str(source).map_err(|err| DistributorError::Config(err.to_string()))
    }

    /// Read and parse a TOML file.
    pub fn load(path: &Utf8Path) -> DistributorResult<Self> {
        let source = std::fs::read_to_string(path)
            .map_err(|err| DistributorError::Config(format!("reading {path}: {err}")))?;
        Self::from_toml(&source)
    }

    /// A builder for the configured service.
    ///
    /// The storage backend is constructed here.
    pub fn into_builder(self) -> DistributorResult<DistributorBuilder> {
        let storage = self.storage.build()?;

        let mut builder = DistributorBuilder::new()
            .storage(storage)
            .base_uri(self.base_uri)
            .filename_template(self.templates.filename)
            .subject_template(self.templates.subject)
            .content_template(self.templates.content)
            .subscribers(self.subscribers);

        if let Some(auth) = self.auth {
            builder = builder.basic_auth(auth.user, auth.password);
        }

        Ok(builder)
    }
}
