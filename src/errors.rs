use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppError {
    #[error("TOKEN_DECODE: {0}")]
    Decode(String),
    #[error("TOKEN_EXPIRED: {0}")]
    Expired(String),
    #[error("AUTH_EXPIRED: {0}")]
    AuthExpired(String),
    #[error("NETWORK: {0}")]
    Network(String),
    #[error("API_{status}: {message}")]
    Api { status: u16, message: String },
    #[error("INVALID: {0}")]
    Invalid(String),
    #[error("NOT_FOUND: {0}")]
    NotFound(String),
    #[error("IO_FAILURE: {0}")]
    Io(String),
    #[error("INTERNAL: {0}")]
    Internal(String),
}

impl From<std::io::Error> for AppError {
    fn from(value: std::io::Error) -> Self {
        Self::Io(value.to_string())
    }
}

impl From<rusqlite::Error> for AppError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<serde_json::Error> for AppError {
    fn from(value: serde_json::Error) -> Self {
        Self::Internal(value.to_string())
    }
}

impl From<keyring::Error> for AppError {
    fn from(value: keyring::Error) -> Self {
        Self::Io(value.to_string())
    }
}

pub type AppResult<T> = Result<T, AppError>;
