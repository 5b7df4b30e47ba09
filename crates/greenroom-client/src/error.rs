use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    #[error("invalid server url: {0}")]
    InvalidUrl(String),

    #[error("failed to connect: {0}")]
    ConnectFailed(String),

    #[error("transport error: {0}")]
    Transport(String),
}
