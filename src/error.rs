//! Error types for the direct-message broadcaster

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Environment variable {0} not set")]
    MissingEnv(String),

    #[error("No message provided in either the environment variable or the file")]
    EmptyMessage,

    #[error("No recipients provided")]
    NoRecipients,

    #[error("Failed to read message file {path}: {source}")]
    MessageFile {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("CSV error: {0}")]
    CsvError(String),

    #[error("Failed to get the bot's user ID (HTTP {status}): {body}")]
    Authentication { status: u16, body: String },

    #[error("Mattermost API returned HTTP {status}: {body}")]
    ApiStatus { status: u16, body: String },

    #[error("HTTP error: {0}")]
    HttpError(String),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Background task failed: {0}")]
    TaskFailed(String),
}

pub type Result<T> = std::result::Result<T, Error>;

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::SerializationError(err.to_string())
    }
}

impl From<reqwest::Error> for Error {
    fn from(err: reqwest::Error) -> Self {
        Error::HttpError(err.to_string())
    }
}

impl From<tokio::task::JoinError> for Error {
    fn from(err: tokio::task::JoinError) -> Self {
        Error::TaskFailed(err.to_string())
    }
}

impl From<csv::Error> for Error {
    fn from(err: csv::Error) -> Self {
        Error::CsvError(err.to_string())
    }
}
