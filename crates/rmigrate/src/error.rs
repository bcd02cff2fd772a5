use std::path::PathBuf;

/// Command-level failures. Per-record problems are logged instead.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("{context} [{status}]: {body}")]
    HttpStatus {
        context: String,
        status: u16,
        body: String,
    },

    #[error("Network error: {0}")]
    Network(String),

    #[error("Not a directory: {}", .0.display())]
    NotADirectory(PathBuf),

    #[error("Failed to write {}: {message}", path.display())]
    Write { path: PathBuf, message: String },
}
