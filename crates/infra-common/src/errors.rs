//! Error types for infrastructure helpers

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Logging already initialized: {0}")]
    LoggingInit(String),
}

pub type Result<T> = std::result::Result<T, Error>;
