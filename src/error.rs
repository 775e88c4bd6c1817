//! Single error currency for the core. Every fallible core operation returns
//! `Result<T, NightingaleError>`; adapters convert to `anyhow` at the boundary.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NightingaleError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("LLM quota exhausted after {retries} retries: {message}")]
    QuotaExhausted { retries: u32, message: String },

    #[error("structured response failed schema validation after {attempts} attempts: {message}")]
    SchemaValidation { attempts: u32, message: String },

    #[error("sandbox error: {0}")]
    Sandbox(String),

    #[error("verification command timed out after {0:?}")]
    VerificationTimeout(std::time::Duration),

    #[error("transient error: {0}")]
    Transient(String),
}

pub type Result<T> = std::result::Result<T, NightingaleError>;
