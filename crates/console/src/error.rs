/// Malformed record identifier. Raised before any remote call is made.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid format")]
pub struct ValidationError;

/// A snapshot, schema or lookup call failed. The message is shown to the
/// operator verbatim.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("{0}")]
    Transport(String),
    #[error("remote returned status {status}: {message}")]
    Status { status: u16, message: String },
    #[error("failed to decode remote response: {0}")]
    Decode(String),
}

/// The change channel could not be opened or went away. Never retried here.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum SubscriptionError {
    #[error("failed to open subscription: {0}")]
    Open(String),
    #[error("subscription dropped: {0}")]
    Dropped(String),
    #[error("failed to decode change event: {0}")]
    Decode(String),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocatorError {
    #[error("invalid format")]
    InvalidFormat,
    #[error("{0}")]
    RemoteFailure(String),
    #[error("search superseded by a newer request")]
    Superseded,
}

impl From<ValidationError> for LocatorError {
    fn from(_: ValidationError) -> Self {
        LocatorError::InvalidFormat
    }
}
