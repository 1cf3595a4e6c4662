//! Error types for I/O operations

use thiserror::Error;

/// Errors that can occur while reading or writing mesh files
#[derive(Error, Debug)]
pub enum IoError {
    #[error("Unsupported mesh format: {extension}")]
    UnsupportedExtension { extension: String },

    #[error("Parse error at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Write error: {message}")]
    WriteError { message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<IoError> for occmesh_core::Error {
    fn from(err: IoError) -> Self {
        match err {
            IoError::Io(e) => occmesh_core::Error::Io(e),
            IoError::UnsupportedExtension { extension } => {
                occmesh_core::Error::UnsupportedFormat(extension)
            }
            other => occmesh_core::Error::InvalidData(other.to_string()),
        }
    }
}
