use thiserror::Error;

pub type Result<T> = std::result::Result<T, PinError>;

#[derive(Error, Debug)]
pub enum PinError {
    /// No API token has been stored yet.
    #[error("No API token! Log in first")]
    MissingCredential,
    #[error("remote request failed: {0}")]
    Remote(String),
    #[error("remote rejected request: {status} - {message}")]
    Api { status: u16, message: String },
    /// The remote answered but refused the change (`result_code` other than `done`).
    #[error("remote refused: {0}")]
    Refused(String),
    #[error("invalid input: {0}")]
    Validation(String),
    #[error("local storage unavailable: {0}")]
    Storage(String),
}

impl PinError {
    /// Network/API failures, as opposed to a missing credential or local problems.
    pub fn is_remote(&self) -> bool {
        matches!(
            self,
            PinError::Remote(_) | PinError::Api { .. } | PinError::Refused(_)
        )
    }
}

impl From<serde_json::Error> for PinError {
    fn from(e: serde_json::Error) -> Self {
        PinError::Storage(format!("json: {e}"))
    }
}

#[cfg(feature = "sqlite")]
impl From<rusqlite::Error> for PinError {
    fn from(e: rusqlite::Error) -> Self {
        PinError::Storage(format!("sqlite: {e}"))
    }
}

#[cfg(feature = "pinboard")]
impl From<reqwest::Error> for PinError {
    fn from(e: reqwest::Error) -> Self {
        PinError::Remote(e.to_string())
    }
}

impl From<tokio::task::JoinError> for PinError {
    fn from(e: tokio::task::JoinError) -> Self {
        PinError::Storage(format!("background task: {e}"))
    }
}
