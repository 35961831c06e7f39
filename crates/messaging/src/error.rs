use thiserror::Error;

/// Errors raised by subject mapping and validation.
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum Error {
    /// An argument was blank or malformed.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
}

impl Error {
    pub(crate) fn invalid(message: impl Into<String>) -> Self {
        Self::InvalidArgument(message.into())
    }
}
