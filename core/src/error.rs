use thiserror::Error;

/// Failures that end a run before or instead of dispatch.
#[derive(Debug, Error)]
pub enum RefreshError {
    #[error("Invalid server URL '{url}': {reason}")]
    InvalidUrl { url: String, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Failed to discover users: {0}")]
    UserDiscovery(#[source] reqwest::Error),

    #[error("No user IDs found.")]
    NoUserId,

    #[error("Server returned status code {status}")]
    Unreachable { status: u16 },

    #[error("Connection error: {0}")]
    Connection(#[source] reqwest::Error),

    #[error("Failed to retrieve person data: {0}")]
    PersonFetch(#[source] reqwest::Error),

    #[error("Failed to decode person data: {0}")]
    Decode(#[from] serde_json::Error),

    #[error("Failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

/// Failure of a single refresh attempt.
#[derive(Debug, Error)]
pub enum FetchError {
    /// Connection, timeout or body read failure; retried.
    #[error("{0}")]
    Transport(String),

    /// Anything else; the item is abandoned and reported as a task error.
    #[error(transparent)]
    Unexpected(#[from] anyhow::Error),
}
