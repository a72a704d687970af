use thiserror::Error;

/// Errors raised while decoding or validating a fragment.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Invalid fragment: {0}")]
    InvalidFragment(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
