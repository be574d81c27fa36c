//! Error taxonomy shared by every SDK component.

/// Errors surfaced by the SDK.
///
/// Only [`Error::NotAuthenticated`] and [`Error::AuthenticationFailed`] are
/// meant for the user. Transport failures are absorbed by the reconnect path
/// and show up only as connection-state changes.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No credential is present where one is required.
    #[error("not authenticated")]
    NotAuthenticated,
    /// A credential with an empty token or username was offered.
    #[error("invalid credential: token and username must be non-empty")]
    InvalidCredential,
    /// The server rejected the credential.
    #[error("authentication failed: {0}")]
    AuthenticationFailed(String),
    /// Handshake or transport failure; recoverable by retrying.
    #[error("connection failure: {0}")]
    TransientConnectionFailure(String),
    /// An inbound frame could not be parsed into a feed entry.
    #[error("malformed inbound payload: {0}")]
    MalformedInboundPayload(String),
    /// A connection attempt is already in flight.
    #[error("a connection attempt is already in progress")]
    AlreadyConnecting,
    /// The configured server address cannot be used.
    #[error("invalid server endpoint: {0}")]
    InvalidEndpoint(String),
    /// An upload was given a content type that is not a valid MIME type.
    #[error("invalid content type {0:?}")]
    InvalidContentType(String),
    /// The server answered with an unexpected HTTP status.
    #[error("server returned HTTP {status}: {body}")]
    Http { status: u16, body: String },
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    /// The session task is no longer running.
    #[error("session closed")]
    Closed,
}

impl Error {
    /// Whether this error should be shown to the user rather than handled
    /// silently by the reconnect machinery.
    pub fn is_user_visible(&self) -> bool {
        matches!(self, Error::NotAuthenticated | Error::AuthenticationFailed(_))
    }
}

impl From<reqwest::Error> for Error {
    fn from(e: reqwest::Error) -> Self {
        Error::TransientConnectionFailure(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, Error>;
