use thiserror::Error;

/// Errors raised while building, encoding or decoding envelopes.
#[derive(Debug, Error)]
pub enum Error {
    /// Binary payload was not valid base64.
    #[error("invalid data_base64 member: {0}")]
    Base64(#[from] base64::DecodeError),

    /// A required attribute is missing or blank.
    #[error("required attribute '{0}' is missing or blank")]
    MissingAttribute(&'static str),

    /// Extension attribute name breaks the naming rules.
    #[error("invalid extension attribute name '{0}'")]
    InvalidExtensionName(String),

    /// Extension attribute value is not a boolean, integer or string.
    #[error("extension attribute '{0}' must be a boolean, integer or string")]
    InvalidExtensionValue(String),

    /// The document could not be parsed or produced.
    #[error(transparent)]
    Json(#[from] serde_json::Error),

    /// The `time` attribute is not RFC 3339.
    #[error("invalid time attribute '{0}'")]
    InvalidTime(String),

    /// The document declares a spec version we do not speak.
    #[error("unsupported specversion '{0}'")]
    UnsupportedSpecVersion(String),
}
