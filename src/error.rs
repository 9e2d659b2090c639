/// Application-level errors
#[derive(thiserror::Error, Debug)]
pub enum AppError {
    /// User or media does not exist, or is private. Permanent for that entity.
    #[error("Not found: {0}")]
    NotFound(String),

    /// Temporary failure talking to the rating service (timeout, 429, 5xx).
    #[error("Service unavailable: {0}")]
    Unavailable(String),

    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// The service rejected the query or answered with something unparseable.
    /// Throttling and server faults are `Unavailable` instead.
    #[error("External API error: {0}")]
    ExternalApi(String),

    #[error("HTTP client error: {0}")]
    HttpClient(#[from] reqwest::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AppError {
    /// Whether a retry of the same request can reasonably succeed
    pub fn is_transient(&self) -> bool {
        match self {
            AppError::Unavailable(_) => true,
            AppError::HttpClient(e) => {
                e.is_timeout()
                    || e.is_connect()
                    || e.is_request()
                    || e.is_body()
                    || e.is_decode()
                    || e
                        .status()
                        .map(|s| s.is_server_error() || s.as_u16() == 429)
                        .unwrap_or(false)
            }
            AppError::NotFound(_)
            | AppError::ExternalApi(_)
            | AppError::EmptyInput(_)
            | AppError::InvalidInput(_)
            | AppError::Io(_)
            | AppError::Serialization(_) => false,
        }
    }

    /// Whether the failure is permanent for the entity it was raised for
    pub fn is_not_found(&self) -> bool {
        matches!(self, AppError::NotFound(_))
    }
}

pub type AppResult<T> = Result<T, AppError>;
