use thiserror::Error;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("malformed protocol message: {0}")]
    MalformedMessage(String),

    #[error("unknown protocol message tag: {0}")]
    UnknownMessageType(u8),

    #[error("channel subscription failed: {0}")]
    SubscriptionFailure(String),

    #[error("failed to apply remote document update: {0}")]
    MergeFailure(String),

    #[error("awareness update failed: {0}")]
    AwarenessFailure(String),

    #[error("relay transport error: {0}")]
    Transport(#[from] presence_relay::RelayError),

    #[error("timed out waiting for initial sync")]
    SyncTimeout,
}

pub type Result<T> = std::result::Result<T, SyncError>;
