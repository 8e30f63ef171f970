//! Error type for the validation library.
//!
//! Rule violations are never reported through this type; they are the normal
//! output of a validation pass. `ValidatorError` covers input that could not be
//! read or decoded and failures of the storage collaborator.

#[derive(thiserror::Error, Debug)]
pub enum ValidatorError {
    #[error("Decode error: {0}")]
    Decode(#[from] prost::DecodeError),

    #[error(transparent)]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("Zip error: {0}")]
    Zip(#[from] zip::result::ZipError),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Static GTFS error: {0}")]
    StaticData(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Engine contract violated: {0}")]
    Contract(String),
}

pub type Result<T> = std::result::Result<T, ValidatorError>;
