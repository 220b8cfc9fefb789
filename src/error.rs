//! Error taxonomy for the extraction pipeline
//!
//! Every precondition failure maps onto one of these variants so callers
//! can match on the kind rather than parse message strings. Recoverable
//! conditions (e.g. a specified-but-missing GMWMI) are not errors; they
//! are logged and trigger a fallback path instead.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ExtractError {
    /// A required input path does not exist on the filesystem.
    #[error("input not found: {0}")]
    InputNotFound(PathBuf),

    /// A file extension is not in the accepted set for its role.
    #[error("unsupported file type for {role}: {path}")]
    UnsupportedFileType { role: &'static str, path: PathBuf },

    /// An out-of-range numeric argument (search distance, projection step, ...).
    #[error("invalid parameter {name}: {message}")]
    InvalidParameter { name: &'static str, message: String },

    /// Mutually exclusive options were both set, or neither when one is needed.
    #[error("conflicting configuration: {0}")]
    ConflictingConfiguration(String),

    /// Grids or affines disagree between spatial artifacts.
    #[error("space mismatch: {0}")]
    SpaceMismatch(String),

    /// A required upstream artifact (e.g. a FreeSurfer directory) is absent.
    #[error("missing precursor: {0}")]
    MissingPrecursor(String),

    /// Filesystem failure while reading or writing an artifact.
    #[error("i/o error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// A file exists but its contents do not parse as the expected format.
    #[error("failed to parse {path}: {message}")]
    Parse { path: PathBuf, message: String },
}

impl ExtractError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        ExtractError::Io {
            path: path.into(),
            source,
        }
    }

    pub(crate) fn parse(path: impl Into<PathBuf>, message: impl Into<String>) -> Self {
        ExtractError::Parse {
            path: path.into(),
            message: message.into(),
        }
    }

    pub(crate) fn invalid(name: &'static str, message: impl Into<String>) -> Self {
        ExtractError::InvalidParameter {
            name,
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, ExtractError>;
