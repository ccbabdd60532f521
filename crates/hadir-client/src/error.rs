use thiserror::Error;

#[derive(Error, Debug)]
pub enum ApiError {
    /// The backend answered 401; stored credentials have been cleared.
    #[error("session expired, please sign in again")]
    AuthExpired,
    #[error("not signed in")]
    NotAuthenticated,
    /// The backend declined the request (4xx/5xx other than 401).
    #[error("backend rejected request ({status}): {}", .message.as_deref().unwrap_or("no message"))]
    Rejected { status: u16, message: Option<String> },
    /// The backend could not be reached.
    #[error("network error: {0}")]
    Network(String),
    #[error("unexpected response: {0}")]
    Decode(String),
    #[error("session storage: {0}")]
    Storage(#[from] std::io::Error),
}

impl ApiError {
    /// Message supplied by the backend, if any.
    pub fn backend_message(&self) -> Option<&str> {
        match self {
            ApiError::Rejected { message, .. } => message.as_deref(),
            _ => None,
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_decode() {
            ApiError::Decode(e.to_string())
        } else {
            ApiError::Network(e.to_string())
        }
    }
}
