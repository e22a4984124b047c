use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("transport error: {0}")]
    Transport(#[from] transport::TransportError),
    #[error("store error: {0}")]
    Store(#[from] store::StoreError),
    #[error("dispatch error: {0}")]
    Dispatch(#[from] dispatch::DispatchError),
    #[error("config error: {0}")]
    Config(String),
    #[error("not connected")]
    NotConnected,
    #[error("authentication failed: {0}")]
    AuthFailed(String),
    #[error("revoke window of {window_secs}s has expired for this message")]
    RevokeWindowExpired { window_secs: u64 },
    #[error("only the sender may revoke this message")]
    RevokePermissionDenied,
    #[error("message not found: {0}")]
    MessageNotFound(String),
    #[error("revoke rejected by server: {0}")]
    RevokeRejected(String),
}

pub type Result<T> = std::result::Result<T, Error>;
