//! Transport error taxonomy.

use thiserror::Error;

/// Errors raised by a [`Transport`](crate::Transport).
#[derive(Debug, Error)]
pub enum TransportError {
    /// The remote answered with a non-success status.
    #[error("remote returned status {status}: {body}")]
    Status {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        body: String,
    },

    /// The body is not a response document.
    #[error("malformed response: {0}")]
    Malformed(#[source] serde_json::Error),

    /// The body lacks the `type: response` marker.
    #[error("response is missing the type marker")]
    MissingMarker,

    /// The response does not carry the requested component.
    #[error("response has no item for component {0}")]
    MissingComponent(String),

    /// Static template location is not configured.
    #[error("no static template location configured")]
    NoStaticLocation,

    /// Network or protocol failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

impl TransportError {
    /// Whether retrying the same exchange may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Status { status, .. } => *status == 429 || *status >= 500,
            Self::Http(e) => e.is_timeout() || e.is_connect(),
            Self::Malformed(_)
            | Self::MissingMarker
            | Self::MissingComponent(_)
            | Self::NoStaticLocation => false,
        }
    }
}

/// Convenience type alias for transport results.
pub type Result<T> = std::result::Result<T, TransportError>;
