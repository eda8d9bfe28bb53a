//! Error types for the distributor

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};

use crate::id::{InvalidReleaseId, ReleaseId};
use crate::notify::MailError;
use crate::template::TemplateError;

/// Result type for distributor operations
pub type DistributorResult<T> = Result<T, DistributorError>;

/// Broad classes of failure, used to pick a response status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    /// The request was malformed and nothing was touched.
    Validation,

    /// A well-formed identifier named nothing.
    NotFound,

    /// Storage, serialization or delivery failed.
    Io,
}

/// Error types for distributor operations
#[derive(Debug, thiserror::Error)]
pub enum DistributorError {
    /// Malformed or unsafe release identifier
    #[error(transparent)]
    InvalidReleaseId(#[from] InvalidReleaseId),

    /// Publish without a version label
    #[error("release version is required")]
    MissingVersion,

    /// Publish without any artifact bytes
    #[error("release artifact is empty")]
    EmptyArtifact,

    /// Template failed to parse
    #[error(transparent)]
    Template(#[from] TemplateError),

    /// No metadata is stored for the release
    #[error("release not found: {0}")]
    ReleaseNotFound(ReleaseId),

    /// Metadata exists but the blob is gone
    #[error("artifact not found for release: {0}")]
    ArtifactNotFound(ReleaseId),

    /// Unknown download link
    #[error("link not found: {0}")]
    LinkNotFound(String),

    /// Subscriber registration rejected
    #[error("invalid subscriber: {0}")]
    InvalidSubscriber(String),

    /// Unknown subscriber
    #[error("subscriber not found: {0}")]
    SubscriberNotFound(String),

    /// Every identifier candidate for the current second was taken
    #[error("no free release identifier after {attempts} attempts")]
    IdentifiersExhausted {
        /// Number of candidates tried
        attempts: u32,
    },

    /// Notification could not be delivered
    #[error("unable to notify subscriber {subscriber}")]
    Delivery {
        /// Subscriber the message was addressed to
        subscriber: String,

        /// Underlying mailer failure
        #[source]
        source: MailError,
    },

    /// Storage error
    #[error("storage error: {0}")]
    Storage(#[from] storage::StorageError),

    /// Stored record could not be encoded or decoded
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(String),
}

impl DistributorError {
    /// Which class of failure this is.
    pub fn category(&self) -> ErrorCategory {
        match self {
            DistributorError::InvalidReleaseId(_)
            | DistributorError::MissingVersion
            | DistributorError::EmptyArtifact
            | DistributorError::InvalidSubscriber(_)
            | DistributorError::Template(_) => ErrorCategory::Validation,
            DistributorError::ReleaseNotFound(_)
            | DistributorError::ArtifactNotFound(_)
            | DistributorError::LinkNotFound(_)
            | DistributorError::SubscriberNotFound(_) => ErrorCategory::NotFound,
            DistributorError::Storage(err) if err.kind().is_client_fault() => {
                ErrorCategory::Validation
            }
            DistributorError::IdentifiersExhausted { .. }
            | DistributorError::Delivery { .. }
            | DistributorError::Storage(_)
            | DistributorError::Serialization(_)
            | DistributorError::Config(_) => ErrorCategory::Io,
        }
    }

    /// Get the HTTP status code for this error
    pub fn status_code(&self) -> StatusCode {
        match self.category() {
            ErrorCategory::Validation => StatusCode::BAD_REQUEST,
            ErrorCategory::NotFound => StatusCode::NOT_FOUND,
            ErrorCategory::Io => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

#[derive(Debug, serde::Serialize)]
struct ErrorResponse {
    message: String,
}

impl IntoResponse for DistributorError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        if status.is_server_error() {
            tracing::error!("{self}");
        }

        let body = ErrorResponse {
            message: self.to_string(),
        };

        (status, axum::Json(body)).into_response()
    }
}
