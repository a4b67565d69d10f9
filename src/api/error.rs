use reqwest::StatusCode;

/// Errors from the admin API client.
#[derive(Debug, thiserror::Error)]
#[non_exhaustive]
pub enum ApiError {
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),

    /// 401: credential missing, expired, or rejected.
    #[error("Unauthorized: {message}")]
    Unauthorized { message: String },

    /// 403: credential valid but not allowed.
    #[error("Forbidden: {message}")]
    Forbidden { message: String },

    #[error("Request failed ({status}): {message}")]
    Status { status: StatusCode, message: String },

    /// No response was received.
    #[error("Network error: {0}")]
    Transport(#[source] reqwest::Error),

    #[error("Invalid response: {0}")]
    Decode(String),
}

impl ApiError {
    /// HTTP status behind the error, if a response was received.
    pub fn status(&self) -> Option<StatusCode> {
        match self {
            Self::Unauthorized { .. } => Some(StatusCode::UNAUTHORIZED),
            Self::Forbidden { .. } => Some(StatusCode::FORBIDDEN),
            Self::Status { status, .. } => Some(*status),
            Self::InvalidUrl(_) | Self::Transport(_) | Self::Decode(_) => None,
        }
    }

    /// Whether the API answered 401 or 403. The session is only ended when
    /// the request carried the session token.
    pub fn is_session_error(&self) -> bool {
        matches!(self, Self::Unauthorized { .. } | Self::Forbidden { .. })
    }
}
