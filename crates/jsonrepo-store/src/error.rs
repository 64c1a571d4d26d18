use std::io;
use std::path::{Path, PathBuf};

/// Errors from entity store operations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Settings are missing a required value or name an invalid key.
    #[error("configuration error: {0}")]
    Config(String),

    /// Settings text could not be parsed.
    #[error("settings parse error: {0}")]
    SettingsParse(String),

    /// I/O error from the filesystem collaborator.
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Encoding the collection to JSON failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// The backing file does not hold a JSON array of entities.
    #[error("corrupt repository file {}: {reason}", path.display())]
    Corrupt { path: PathBuf, reason: String },
}

impl StoreError {
    pub(crate) fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Result alias for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
