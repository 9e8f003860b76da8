// ABOUTME: Error types for workflow request parsing
// ABOUTME: Covers file access, YAML decoding, and malformed request documents

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ParserError {
    #[error("Failed to read request file: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Failed to parse YAML: {0}")]
    YamlError(#[from] serde_yaml::Error),

    #[error("Invalid request format: {0}")]
    InvalidFormat(String),
}

pub type Result<T> = std::result::Result<T, ParserError>;
