use crate::outbound::ConnectionError;
use thiserror::Error;

/// Errors that abort building an [`AuthenticateState`](crate::state::AuthenticateState).
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid configuration: {0}")]
    Configuration(String),
    #[error("invalid key: {0}")]
    Key(String),
    #[error("failed to decode signing key: {0}")]
    CertificateDecode(String),
    #[error("failed to convert signing key: {0}")]
    KeyConversion(String),
    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

impl Error {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        Self::Configuration(msg.into())
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
