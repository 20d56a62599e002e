use reqwest::StatusCode;

/// Errors talking to the conversation and history services
#[derive(Debug, thiserror::Error)]
pub enum ChatError {
    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Rate limit exceeded: {0}")]
    RateLimit(String),

    #[error("Service error: {0}")]
    ServiceError(String),

    #[error("History service error: {0}")]
    History(String),

    #[error("Unknown error: {0}")]
    Unknown(String),
}

impl ChatError {
    /// Map a non-success status and its body to an error
    pub fn from_status(status: StatusCode, body: String) -> Self {
        match status {
            StatusCode::TOO_MANY_REQUESTS => ChatError::RateLimit(body),
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => ChatError::Authentication(body),
            StatusCode::BAD_REQUEST => ChatError::InvalidRequest(body),
            status if status.is_server_error() => ChatError::ServiceError(body),
            _ => ChatError::Unknown(format!("Status {status}: {body}")),
        }
    }
}

/// Reasons a streaming callback asks the reader to stop
#[derive(Debug, thiserror::Error)]
pub enum StreamingError {
    #[error("Streaming cancelled by user")]
    UserCancelled,
}
