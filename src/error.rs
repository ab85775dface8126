use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The radio handshake came back with `session=FAILED`.
    #[error("Handshake failed: {0}")]
    Handshake(String),
    /// Bad credentials, a banned account or an expired session.
    #[error("{0}")]
    Authentication(String),
    #[error("Tuning failed: {0}")]
    Tuning(String),
    #[error("Tuning failed: unknown error")]
    UnknownTuning,
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),
    #[error("Source type not supported: {0}")]
    UnsupportedSource(String),
    #[error("Malformed response: {0}")]
    MalformedResponse(String),
    #[error(transparent)]
    Transport(#[from] anyhow::Error),
}

impl ClientError {
    /// Errors that drop the session back to logged out.
    pub fn is_auth_class(&self) -> bool {
        matches!(self, ClientError::Authentication(_))
    }

    /// Errors the login dialog reports verbatim instead of a generic
    /// "unable to connect" message.
    pub fn is_login_failure(&self) -> bool {
        matches!(
            self,
            ClientError::Authentication(_) | ClientError::Handshake(_)
        )
    }
}

pub type ClientResult<T> = std::result::Result<T, ClientError>;
