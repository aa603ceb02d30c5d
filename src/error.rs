use std::path::PathBuf;
use thiserror::Error;

/// Error type for vhostmux operations
#[derive(Debug, Error)]
pub enum MuxError {
    /// A vhost file carries no usable `Listen` port
    #[error("cannot parse vhost file {}: {reason}", .path.display())]
    Parse { path: PathBuf, reason: String },

    /// Two vhost files claim the same port
    #[error(
        "port {port} is claimed by both {} and {}",
        .first.display(),
        .second.display()
    )]
    Collision {
        port: u16,
        first: PathBuf,
        second: PathBuf,
    },

    /// A server child could not be launched or exited non-zero
    #[error("failed to start instance for vhost '{vhost}': {reason}")]
    SpawnFailure { vhost: String, reason: String },

    /// A pid file could not be read or does not hold a pid
    #[error("unreadable pid file {}: {reason}", .path.display())]
    PidFileUnreadable { path: PathBuf, reason: String },

    /// I/O operation on a known path failed
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// Configuration error
    #[error("configuration error: {0}")]
    Config(String),

    /// JSON deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MuxError {
    /// Wrap an I/O error together with the path it happened on
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        MuxError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Result type alias for vhostmux operations
pub type Result<T> = std::result::Result<T, MuxError>;
