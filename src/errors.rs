use std::result::Result as StdResult;

use thiserror::Error;

/// Unified error type for the entry core and its persistence collaborators.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Invalid record: {0}")]
    Validation(String),
    #[error("Import rejected: {0}")]
    Import(String),
    #[error("Parse error: {0}")]
    Parse(String),
    #[error("Persistence error: {0}")]
    Storage(String),
}

pub type Result<T> = StdResult<T, CoreError>;

impl From<std::io::Error> for CoreError {
    fn from(err: std::io::Error) -> Self {
        CoreError::Storage(err.to_string())
    }
}
